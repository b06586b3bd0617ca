use crate::error::ConfigError;
use crate::game::GameState;
use crate::genome::Genome;
use crate::nn::{NeuralController, Topology};
use crate::pos::Dir;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub const FOOD_WEIGHT: f32 = 100.0;
pub const EFFICIENCY_WEIGHT: f32 = 50.0;
/// Survival bonus is steps / 100, capped so stalling cannot dominate.
pub const SURVIVAL_CAP: f32 = 50.0;

/// Weighted sum of food, energy efficiency and (capped) survival time.
pub fn fitness(food_eaten: f32, steps_taken: f32, energy_left: f32) -> f32 {
    let food = food_eaten * FOOD_WEIGHT;
    let efficiency = if steps_taken > 0.0 {
        energy_left / steps_taken * EFFICIENCY_WEIGHT
    } else {
        0.0
    };
    let survival = (steps_taken / 100.0).min(SURVIVAL_CAP);
    food + efficiency + survival
}

/// Per-generation performance, averaged over the evaluation episodes.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentStats {
    pub fitness: f32,
    pub food_eaten: f32,
    pub steps_taken: f32,
    pub energy_left: f32,
    /// Last evaluation episode hit the step cap with the snake still alive.
    pub alive_at_end: bool,
}

#[derive(Clone, Debug)]
pub struct Agent {
    pub id: String,
    /// Generation the agent was born in.
    pub generation: u32,
    pub parents: Option<(String, String)>,
    genome: Genome,
    topology: Topology,
    pub stats: AgentStats,
}

impl Agent {
    pub fn new(
        id: impl Into<String>,
        generation: u32,
        topology: Topology,
        genome: Genome,
    ) -> Result<Self, ConfigError> {
        topology.validate()?;
        if genome.len() != topology.param_count() {
            return Err(ConfigError::GenomeLengthMismatch {
                left: genome.len(),
                right: topology.param_count(),
            });
        }
        Ok(Self {
            id: id.into(),
            generation,
            parents: None,
            genome,
            topology,
            stats: AgentStats::default(),
        })
    }

    pub fn random<R: Rng + ?Sized>(
        id: impl Into<String>,
        topology: Topology,
        rng: &mut R,
    ) -> Result<Self, ConfigError> {
        let genome = Genome::random(topology.param_count(), rng);
        Self::new(id, 0, topology, genome)
    }

    pub fn with_parents(mut self, first: &str, second: &str) -> Self {
        self.parents = Some((first.to_string(), second.to_string()));
        self
    }

    pub fn genome(&self) -> &Genome {
        &self.genome
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    pub fn fitness(&self) -> f32 {
        self.stats.fitness
    }

    pub fn controller(&self) -> Result<NeuralController<'_>, ConfigError> {
        NeuralController::new(self.topology, self.genome.genes())
    }

    pub fn decide(&self, state: &GameState) -> Result<Dir, ConfigError> {
        let idx = self.controller()?.decide(&state.inputs())?;
        Dir::from_index(idx).ok_or_else(|| {
            ConfigError::Invalid(format!("action index {idx} has no direction"))
        })
    }

    pub fn update_fitness(&mut self, food_eaten: f32, steps_taken: f32, energy_left: f32) {
        self.stats.food_eaten = food_eaten;
        self.stats.steps_taken = steps_taken;
        self.stats.energy_left = energy_left;
        self.stats.fitness = fitness(food_eaten, steps_taken, energy_left);
    }

    pub fn reset_stats(&mut self) {
        self.stats = AgentStats::default();
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            id: self.id.clone(),
            generation: self.generation,
            parents: self.parents.clone(),
            fitness: self.stats.fitness,
            food_eaten: self.stats.food_eaten,
            steps_taken: self.stats.steps_taken,
            topology: self.topology,
            genome: self.genome.genes().to_vec(),
        }
    }

    pub fn from_snapshot(snapshot: &AgentSnapshot) -> Result<Self, ConfigError> {
        let mut agent = Self::new(
            snapshot.id.clone(),
            snapshot.generation,
            snapshot.topology,
            Genome::from_vec(snapshot.genome.clone()),
        )?;
        agent.parents = snapshot.parents.clone();
        agent.stats.fitness = snapshot.fitness;
        agent.stats.food_eaten = snapshot.food_eaten;
        agent.stats.steps_taken = snapshot.steps_taken;
        Ok(agent)
    }
}

/// Everything needed to rebuild an agent for replay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: String,
    pub generation: u32,
    pub parents: Option<(String, String)>,
    pub fitness: f32,
    pub food_eaten: f32,
    pub steps_taken: f32,
    pub topology: Topology,
    pub genome: Vec<f32>,
}
