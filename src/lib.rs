//! Evolves small feed-forward snake controllers with a generational genetic algorithm.

pub mod agent;
pub mod config;
pub mod draw;
pub mod error;
pub mod evolution;
pub mod game;
pub mod genome;
pub mod nn;
pub mod observer;
pub mod pos;
pub mod session;
pub mod training;

pub use agent::{Agent, AgentSnapshot, AgentStats};
pub use config::Config;
pub use error::{ConfigError, Result, SnakeError};
pub use evolution::{EvolveReport, Population, PopulationCheckpoint};
pub use game::{Game, GameState, GameStatus};
pub use genome::Genome;
pub use nn::{NeuralController, Topology};
pub use observer::{
    ChannelObserver, LiveFrame, LiveStatus, NullObserver, TrainingEvent, TrainingObserver,
};
pub use pos::{Dir, Pos};
pub use session::SessionRecorder;
pub use training::{
    CancelToken, EvaluationSummary, Evaluator, GenerationReport, SnakeEvaluator, StopReason,
    TrainingLoop, TrainingOutcome,
};
