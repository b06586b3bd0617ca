//! Hooks through which a training run reports progress. The core never waits on an observer.

use crate::agent::AgentSnapshot;
use crate::evolution::PopulationCheckpoint;
use crate::game::{EndReason, GameState, GameStatus};
use crate::training::{GenerationReport, TrainingOutcome};
use serde::{Deserialize, Serialize};
use std::sync::mpsc::Sender;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LiveStatus {
    InProgress,
    Win,
    Loss,
}

impl From<GameStatus> for LiveStatus {
    fn from(status: GameStatus) -> Self {
        match status {
            GameStatus::Active => LiveStatus::InProgress,
            GameStatus::Terminated(EndReason::BoardFilled) => LiveStatus::Win,
            GameStatus::Terminated(_) => LiveStatus::Loss,
        }
    }
}

/// One tick of a demo episode.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LiveFrame {
    pub agent_id: String,
    pub state: GameState,
    pub status: LiveStatus,
}

impl LiveFrame {
    pub fn new(agent_id: &str, state: GameState) -> Self {
        Self {
            agent_id: agent_id.to_string(),
            status: state.status.into(),
            state,
        }
    }
}

pub trait TrainingObserver {
    fn on_generation(&mut self, report: &GenerationReport);

    /// Called every `save_interval` generations.
    fn on_checkpoint(&mut self, _checkpoint: &PopulationCheckpoint) {}

    fn on_frame(&mut self, _frame: &LiveFrame) {}

    /// Demo episodes are only played when this returns true.
    fn wants_frames(&self) -> bool {
        false
    }

    fn on_finish(&mut self, _outcome: &TrainingOutcome) {}
}

pub struct NullObserver;

impl TrainingObserver for NullObserver {
    fn on_generation(&mut self, _report: &GenerationReport) {}
}

#[derive(Clone, Debug)]
pub enum TrainingEvent {
    Generation(GenerationReport),
    BestAgent(AgentSnapshot),
    Frame(LiveFrame),
    Finished {
        generations: u32,
        best_fitness: f32,
    },
}

/// Forwards events over a channel. Send failures are dropped.
pub struct ChannelObserver {
    tx: Sender<TrainingEvent>,
    frames: bool,
}

impl ChannelObserver {
    pub fn new(tx: Sender<TrainingEvent>) -> Self {
        Self { tx, frames: false }
    }

    pub fn with_frames(mut self) -> Self {
        self.frames = true;
        self
    }
}

impl TrainingObserver for ChannelObserver {
    fn on_generation(&mut self, report: &GenerationReport) {
        let _ = self.tx.send(TrainingEvent::Generation(report.clone()));
    }

    fn on_checkpoint(&mut self, checkpoint: &PopulationCheckpoint) {
        if let Some(best) = &checkpoint.best {
            let _ = self.tx.send(TrainingEvent::BestAgent(best.clone()));
        }
    }

    fn on_frame(&mut self, frame: &LiveFrame) {
        let _ = self.tx.send(TrainingEvent::Frame(frame.clone()));
    }

    fn wants_frames(&self) -> bool {
        self.frames
    }

    fn on_finish(&mut self, outcome: &TrainingOutcome) {
        let _ = self.tx.send(TrainingEvent::Finished {
            generations: outcome.generations_completed,
            best_fitness: outcome.best_fitness,
        });
    }
}

/// Fans every event out to several observers.
impl<A: TrainingObserver, B: TrainingObserver> TrainingObserver for (A, B) {
    fn on_generation(&mut self, report: &GenerationReport) {
        self.0.on_generation(report);
        self.1.on_generation(report);
    }

    fn on_checkpoint(&mut self, checkpoint: &PopulationCheckpoint) {
        self.0.on_checkpoint(checkpoint);
        self.1.on_checkpoint(checkpoint);
    }

    fn on_frame(&mut self, frame: &LiveFrame) {
        if self.0.wants_frames() {
            self.0.on_frame(frame);
        }
        if self.1.wants_frames() {
            self.1.on_frame(frame);
        }
    }

    fn wants_frames(&self) -> bool {
        self.0.wants_frames() || self.1.wants_frames()
    }

    fn on_finish(&mut self, outcome: &TrainingOutcome) {
        self.0.on_finish(outcome);
        self.1.on_finish(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GameConfig;
    use crate::game::Game;
    use std::sync::mpsc;

    fn report(generation: u32) -> GenerationReport {
        GenerationReport {
            generation,
            ..GenerationReport::default()
        }
    }

    #[test]
    fn status_maps_end_reasons() {
        assert_eq!(LiveStatus::from(GameStatus::Active), LiveStatus::InProgress);
        assert_eq!(
            LiveStatus::from(GameStatus::Terminated(EndReason::BoardFilled)),
            LiveStatus::Win
        );
        assert_eq!(
            LiveStatus::from(GameStatus::Terminated(EndReason::Collision)),
            LiveStatus::Loss
        );
        assert_eq!(
            LiveStatus::from(GameStatus::Terminated(EndReason::Starvation)),
            LiveStatus::Loss
        );
        assert_eq!(
            serde_json::to_string(&LiveStatus::InProgress).unwrap(),
            "\"IN_PROGRESS\""
        );
    }

    #[test]
    fn channel_observer_forwards_events() {
        let (tx, rx) = mpsc::channel();
        let mut obs = ChannelObserver::new(tx).with_frames();
        assert!(obs.wants_frames());
        obs.on_generation(&report(3));
        let state = Game::new(&GameConfig::default(), 1).unwrap().state();
        obs.on_frame(&LiveFrame::new("g0-a1", state));

        match rx.recv().unwrap() {
            TrainingEvent::Generation(r) => assert_eq!(r.generation, 3),
            other => panic!("unexpected {other:?}"),
        }
        match rx.recv().unwrap() {
            TrainingEvent::Frame(f) => {
                assert_eq!(f.agent_id, "g0-a1");
                assert_eq!(f.status, LiveStatus::InProgress);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn dropped_receiver_is_ignored() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        let mut obs = ChannelObserver::new(tx);
        obs.on_generation(&report(0));
    }

    #[test]
    fn pair_only_sends_frames_to_interested_side() {
        let (tx_a, rx_a) = mpsc::channel();
        let (tx_b, rx_b) = mpsc::channel();
        let mut pair = (
            ChannelObserver::new(tx_a),
            ChannelObserver::new(tx_b).with_frames(),
        );
        assert!(pair.wants_frames());
        let state = Game::new(&GameConfig::default(), 2).unwrap().state();
        pair.on_frame(&LiveFrame::new("x", state));
        pair.on_generation(&report(1));
        assert!(matches!(rx_a.try_recv(), Ok(TrainingEvent::Generation(_))));
        assert!(matches!(rx_b.try_recv(), Ok(TrainingEvent::Frame(_))));
        assert!(matches!(rx_b.try_recv(), Ok(TrainingEvent::Generation(_))));
    }
}
