use thiserror::Error;

/// Problems with parameters, topologies or genome shapes. Always fatal at setup.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ConfigError {
    #[error("{name} must be within [0, 1], got {value}")]
    RateOutOfRange { name: &'static str, value: f64 },
    #[error("{name} must be greater than zero")]
    Zero { name: &'static str },
    #[error("grid size {size} is too small, need at least {min}")]
    GridTooSmall { size: i32, min: i32 },
    #[error("grid size {size} is too large, at most {max} is supported")]
    GridTooLarge { size: i32, max: i32 },
    #[error("genome length mismatch: {left} vs {right}")]
    GenomeLengthMismatch { left: usize, right: usize },
    #[error("parameter vector has {got} values, topology needs {expected}")]
    ParamCount { expected: usize, got: usize },
    #[error("network expects {expected} inputs, got {got}")]
    InputCount { expected: usize, got: usize },
    #[error("invalid mutation strength {0}")]
    MutationStrength(f32),
    #[error("{0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SnakeError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    /// The simulator was stepped after it terminated without a reset.
    #[error("episode already terminated; call reset() before stepping again")]
    EpisodeTerminated,
    #[error("no data available: {0}")]
    DataUnavailable(&'static str),
    #[error("failed to build worker pool: {0}")]
    WorkerPool(String),
}

pub type Result<T> = std::result::Result<T, SnakeError>;

pub(crate) fn check_rate(name: &'static str, value: f64) -> std::result::Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::RateOutOfRange { name, value })
    }
}
