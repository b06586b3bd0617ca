//! Generational GA: rank, keep elites, fill the rest by tournament, crossover and mutation.

use crate::agent::{Agent, AgentSnapshot};
use crate::config::EvolutionConfig;
use crate::error::{ConfigError, check_rate};
use crate::nn::Topology;
use rand::Rng;
use rand::seq::index;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Summary of one `evolve` call. The new agents are read through `Population::agents`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EvolveReport {
    /// Generation number after the increment.
    pub generation: u32,
    pub best_fitness: f32,
    pub diversity: f32,
    pub population_size: usize,
    /// Best-ever fitness went up during this call.
    pub improved: bool,
}

pub struct Population {
    agents: Vec<Agent>,
    generation: u32,
    best_fitness: f32,
    best_agent: Option<Agent>,
    params: EvolutionConfig,
    topology: Topology,
    next_id: u64,
}

impl Population {
    pub fn new<R: Rng + ?Sized>(
        params: EvolutionConfig,
        topology: Topology,
        rng: &mut R,
    ) -> Result<Self, ConfigError> {
        validate_params(&params)?;
        topology.validate()?;
        let mut pop = Self {
            agents: Vec::with_capacity(params.population_size),
            generation: 0,
            best_fitness: 0.0,
            best_agent: None,
            params,
            topology,
            next_id: 0,
        };
        for _ in 0..pop.params.population_size {
            let id = pop.fresh_id();
            let agent = Agent::random(id, topology, rng)?;
            pop.agents.push(agent);
        }
        Ok(pop)
    }

    fn fresh_id(&mut self) -> String {
        let id = format!("g{}-a{}", self.generation, self.next_id);
        self.next_id += 1;
        id
    }

    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    pub fn agents_mut(&mut self) -> &mut [Agent] {
        &mut self.agents
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn best_fitness(&self) -> f32 {
        self.best_fitness
    }

    pub fn best_agent(&self) -> Option<&Agent> {
        self.best_agent.as_ref()
    }

    pub fn best_snapshot(&self) -> Option<AgentSnapshot> {
        self.best_agent.as_ref().map(Agent::snapshot)
    }

    pub fn params(&self) -> &EvolutionConfig {
        &self.params
    }

    pub fn topology(&self) -> Topology {
        self.topology
    }

    /// Mean pairwise genome distance per gene, halved and capped at 1.
    pub fn diversity(&self) -> f32 {
        let n = self.agents.len();
        if n < 2 {
            return 0.0;
        }
        let mut total = 0.0f64;
        let mut pairs = 0u64;
        for i in 0..n {
            for j in i + 1..n {
                let a = self.agents[i].genome();
                let b = self.agents[j].genome();
                let len = a.len().max(1) as f64;
                total += a.distance(b) as f64 / len;
                pairs += 1;
            }
        }
        ((total / pairs as f64) / 2.0).min(1.0) as f32
    }

    /// Winner index. Agents are sorted best-first, so the lowest sampled index wins.
    fn tournament<R: Rng + ?Sized>(&self, rng: &mut R) -> usize {
        let n = self.agents.len();
        let k = self.params.tournament_size.min(n);
        index::sample(rng, n, k).iter().min().unwrap_or(0)
    }

    pub fn evolve<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<EvolveReport, ConfigError> {
        let n = self.agents.len();
        if n == 0 {
            return Err(ConfigError::Zero {
                name: "population_size",
            });
        }

        // stable: equal fitness keeps the current order
        self.agents
            .sort_by(|a, b| b.stats.fitness.total_cmp(&a.stats.fitness));

        let top = &self.agents[0];
        let improved = top.stats.fitness > self.best_fitness;
        if improved {
            self.best_fitness = top.stats.fitness;
            self.best_agent = Some(top.clone());
        }
        let diversity = self.diversity();

        let elite_count = ((n as f64 * self.params.elitism).floor() as usize).min(n);
        let mut next = Vec::with_capacity(n);
        for elite in &self.agents[..elite_count] {
            let mut keep = elite.clone();
            keep.reset_stats();
            next.push(keep);
        }
        debug!(
            generation = self.generation,
            elites = elite_count,
            top = %self.agents[0].id,
            "elites carried over"
        );

        let child_generation = self.generation + 1;
        while next.len() < n {
            let p1 = &self.agents[self.tournament(rng)];
            let p2 = &self.agents[self.tournament(rng)];
            let mut genome = if rng.gen_bool(self.params.crossover_rate) {
                p1.genome().crossover(p2.genome(), rng)?
            } else {
                p1.genome().clone()
            };
            genome.mutate(
                self.params.mutation_rate,
                self.params.mutation_strength,
                rng,
            )?;
            let (first, second) = (p1.id.clone(), p2.id.clone());
            let id = format!("g{}-a{}", child_generation, self.next_id);
            self.next_id += 1;
            let child = Agent::new(id, child_generation, self.topology, genome)?
                .with_parents(&first, &second);
            next.push(child);
        }

        self.agents = next;
        self.generation = child_generation;
        Ok(EvolveReport {
            generation: self.generation,
            best_fitness: self.best_fitness,
            diversity,
            population_size: self.agents.len(),
            improved,
        })
    }

    pub fn checkpoint(&self) -> PopulationCheckpoint {
        PopulationCheckpoint {
            generation: self.generation,
            best_fitness: self.best_fitness,
            best: self.best_snapshot(),
            agents: self.agents.iter().map(Agent::snapshot).collect(),
            next_id: self.next_id,
        }
    }

    /// Rebuilds a population from a checkpoint. `params` may differ from the run that saved it.
    pub fn from_checkpoint(
        checkpoint: &PopulationCheckpoint,
        params: EvolutionConfig,
    ) -> Result<Self, ConfigError> {
        validate_params(&params)?;
        let agents = checkpoint
            .agents
            .iter()
            .map(Agent::from_snapshot)
            .collect::<Result<Vec<_>, _>>()?;
        let Some(first) = agents.first() else {
            return Err(ConfigError::Zero {
                name: "population_size",
            });
        };
        let topology = first.topology();
        if let Some(other) = agents.iter().find(|a| a.topology() != topology) {
            return Err(ConfigError::GenomeLengthMismatch {
                left: topology.param_count(),
                right: other.topology().param_count(),
            });
        }
        let best_agent = checkpoint
            .best
            .as_ref()
            .map(Agent::from_snapshot)
            .transpose()?;
        Ok(Self {
            params: EvolutionConfig {
                population_size: agents.len(),
                ..params
            },
            agents,
            generation: checkpoint.generation,
            best_fitness: checkpoint.best_fitness,
            best_agent,
            topology,
            next_id: checkpoint.next_id,
        })
    }
}

fn validate_params(params: &EvolutionConfig) -> Result<(), ConfigError> {
    if params.population_size == 0 {
        return Err(ConfigError::Zero {
            name: "population_size",
        });
    }
    if params.tournament_size == 0 {
        return Err(ConfigError::Zero {
            name: "tournament_size",
        });
    }
    check_rate("mutation_rate", params.mutation_rate)?;
    check_rate("crossover_rate", params.crossover_rate)?;
    check_rate("elitism", params.elitism)?;
    if !params.mutation_strength.is_finite() || params.mutation_strength < 0.0 {
        return Err(ConfigError::MutationStrength(params.mutation_strength));
    }
    Ok(())
}

/// Resumable population state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PopulationCheckpoint {
    pub generation: u32,
    pub best_fitness: f32,
    pub best: Option<AgentSnapshot>,
    pub agents: Vec<AgentSnapshot>,
    pub next_id: u64,
}

impl PopulationCheckpoint {
    pub fn to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        Ok(bincode::serde::encode_to_vec(
            self,
            bincode::config::standard(),
        )?)
    }

    pub fn from_bytes(bytes: &[u8]) -> anyhow::Result<Self> {
        let (checkpoint, _) =
            bincode::serde::decode_from_slice(bytes, bincode::config::standard())?;
        Ok(checkpoint)
    }
}
