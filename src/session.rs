//! File-backed record of a training run under `<data_dir>/session_<unix-secs>/`.
//!
//! Write failures are logged and swallowed; training never depends on them.

use crate::agent::AgentSnapshot;
use crate::config::Config;
use crate::error::SnakeError;
use crate::evolution::PopulationCheckpoint;
use crate::observer::TrainingObserver;
use crate::training::{GenerationReport, StopReason, TrainingOutcome};
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

pub const SESSIONS_FILE: &str = "sessions.json";
pub const CHECKPOINT_FILE: &str = "checkpoint.bin";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub started_unix: u64,
    pub elapsed_secs: f64,
    pub generations: usize,
    pub best_fitness: f32,
    pub max_snake_length: f32,
    pub stop_reason: Option<StopReason>,
}

pub struct SessionRecorder {
    data_dir: PathBuf,
    dir: PathBuf,
    session_id: String,
    started_unix: u64,
    started: Instant,
    generations: Vec<GenerationReport>,
    best_agents: Vec<AgentSnapshot>,
}

impl SessionRecorder {
    /// Creates the session directory and stores the run configuration in it.
    pub fn create(data_dir: impl AsRef<Path>, config: &Config) -> anyhow::Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        let started_unix = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);

        let mut session_id = format!("session_{started_unix}");
        let mut n = 1;
        while data_dir.join(&session_id).exists() {
            session_id = format!("session_{started_unix}_{n}");
            n += 1;
        }
        let dir = data_dir.join(&session_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed creating session dir {}", dir.display()))?;

        let recorder = Self {
            data_dir,
            dir,
            session_id,
            started_unix,
            started: Instant::now(),
            generations: Vec::new(),
            best_agents: Vec::new(),
        };
        write_json(&recorder.dir.join("config.json"), config)?;
        Ok(recorder)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn generations(&self) -> &[GenerationReport] {
        &self.generations
    }

    pub fn summary(&self) -> Result<SessionSummary, SnakeError> {
        let last = self
            .generations
            .last()
            .ok_or(SnakeError::DataUnavailable("session has no completed generation"))?;
        let max_snake_length = self
            .generations
            .iter()
            .map(|g| g.max_length)
            .fold(0.0f32, f32::max);
        Ok(SessionSummary {
            session_id: self.session_id.clone(),
            started_unix: self.started_unix,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
            generations: self.generations.len(),
            best_fitness: last.best_fitness,
            max_snake_length,
            stop_reason: None,
        })
    }

    fn persist<T: Serialize>(&self, name: &str, value: &T) {
        if let Err(e) = write_json(&self.dir.join(name), value) {
            warn!(file = name, error = %e, "session write failed");
        }
    }

    fn append_session(&self, summary: &SessionSummary) -> anyhow::Result<()> {
        let path = self.data_dir.join(SESSIONS_FILE);
        // an unreadable index is replaced rather than blocking the append
        let mut sessions: Vec<SessionSummary> = fs::read_to_string(&path)
            .ok()
            .and_then(|s| serde_json::from_str(&s).ok())
            .unwrap_or_default();
        sessions.push(summary.clone());
        write_json(&path, &sessions)
    }
}

impl TrainingObserver for SessionRecorder {
    fn on_generation(&mut self, report: &GenerationReport) {
        self.generations.push(report.clone());
        self.persist("generation_data.json", &self.generations);
    }

    fn on_checkpoint(&mut self, checkpoint: &PopulationCheckpoint) {
        match checkpoint.to_bytes() {
            Ok(bytes) => {
                let path = self.dir.join(CHECKPOINT_FILE);
                if let Err(e) = fs::write(&path, bytes) {
                    warn!(path = %path.display(), error = %e, "checkpoint write failed");
                }
            }
            Err(e) => warn!(error = %e, "checkpoint encoding failed"),
        }

        let Some(best) = &checkpoint.best else {
            return;
        };
        if self.best_agents.last() != Some(best) {
            self.best_agents.push(best.clone());
            self.persist("best_agents.json", &self.best_agents);
            self.persist("latest_best_agent.json", best);
            debug!(agent = %best.id, fitness = best.fitness, "best agent saved");
        }
    }

    fn on_finish(&mut self, outcome: &TrainingOutcome) {
        if let Some(best) = &outcome.best_agent {
            self.persist("best_agent.json", best);
        }
        if let Some(evaluation) = &outcome.evaluation {
            self.persist("evaluation_results.json", evaluation);
        }
        let mut summary = match self.summary() {
            Ok(s) => s,
            Err(e) => {
                debug!(error = %e, "nothing to summarise");
                return;
            }
        };
        summary.stop_reason = Some(outcome.stop_reason);
        self.persist("summary.json", &summary);
        if let Err(e) = self.append_session(&summary) {
            warn!(error = %e, "failed updating session index");
        }
    }
}

fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json).with_context(|| format!("failed writing {}", path.display()))?;
    Ok(())
}

/// Every finished session recorded under `data_dir`, oldest first.
/// A data dir without an index has no sessions.
pub fn list_sessions(data_dir: impl AsRef<Path>) -> anyhow::Result<Vec<SessionSummary>> {
    let path = data_dir.as_ref().join(SESSIONS_FILE);
    if !path.exists() {
        return Ok(Vec::new());
    }
    read_json(&path)
}

/// Files of one session directory read back.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionRecord {
    /// `None` while the run has not finished.
    pub summary: Option<SessionSummary>,
    pub generations: Vec<GenerationReport>,
}

pub fn load_session(
    data_dir: impl AsRef<Path>,
    session_id: &str,
) -> anyhow::Result<SessionRecord> {
    let dir = data_dir.as_ref().join(session_id);
    if !dir.is_dir() {
        anyhow::bail!("no session directory {}", dir.display());
    }
    let summary_path = dir.join("summary.json");
    let summary = if summary_path.exists() {
        Some(read_json(&summary_path)?)
    } else {
        None
    };
    let generations_path = dir.join("generation_data.json");
    let generations = if generations_path.exists() {
        read_json(&generations_path)?
    } else {
        Vec::new()
    };
    Ok(SessionRecord {
        summary,
        generations,
    })
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed reading {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("failed parsing {}", path.display()))
}

pub fn load_snapshot(path: impl AsRef<Path>) -> anyhow::Result<AgentSnapshot> {
    read_json(path.as_ref())
}

pub fn load_checkpoint(path: impl AsRef<Path>) -> anyhow::Result<PopulationCheckpoint> {
    let path = path.as_ref();
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    PopulationCheckpoint::from_bytes(&bytes)
        .with_context(|| format!("failed decoding checkpoint {}", path.display()))
}
