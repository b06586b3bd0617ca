use crate::error::{ConfigError, check_rate};
use crate::game::{MAX_GRID_SIZE, MIN_GRID_SIZE, SENSOR_INPUTS};
use crate::nn::Topology;
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameConfig {
    pub grid_size: i32,
    pub initial_energy: i32,
    pub energy_per_food: i32,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            grid_size: 25,
            initial_energy: 100,
            energy_per_food: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvolutionConfig {
    pub population_size: usize,
    pub mutation_rate: f64,
    /// Standard deviation of the gaussian added to a mutated gene.
    pub mutation_strength: f32,
    pub crossover_rate: f64,
    /// Fraction of the ranked population copied unchanged.
    pub elitism: f64,
    pub tournament_size: usize,
}

impl Default for EvolutionConfig {
    fn default() -> Self {
        Self {
            population_size: 100,
            mutation_rate: 0.1,
            mutation_strength: 0.2,
            crossover_rate: 0.7,
            elitism: 0.1,
            tournament_size: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub max_generations: u32,
    pub games_per_agent: u32,
    /// Tick cap for a single episode.
    pub max_steps: u32,
    pub target_fitness: f32,
    pub stagnation_limit: u32,
    pub save_interval: u32,
    /// 0 disables the best-agent demo broadcast.
    pub visualization_interval: u32,
    pub final_evaluation_games: u32,
    pub seed: Option<u64>,
    /// Size of a dedicated rayon pool; the global pool is used when unset.
    pub threads: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_generations: 100,
            games_per_agent: 3,
            max_steps: 1000,
            target_fitness: 1000.0,
            stagnation_limit: 20,
            save_interval: 10,
            visualization_interval: 5,
            final_evaluation_games: 10,
            seed: None,
            threads: None,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub game: GameConfig,
    pub network: Topology,
    pub evolution: EvolutionConfig,
    pub training: TrainingConfig,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let game = &self.game;
        if game.grid_size < MIN_GRID_SIZE {
            return Err(ConfigError::GridTooSmall {
                size: game.grid_size,
                min: MIN_GRID_SIZE,
            });
        }
        if game.grid_size > MAX_GRID_SIZE {
            return Err(ConfigError::GridTooLarge {
                size: game.grid_size,
                max: MAX_GRID_SIZE,
            });
        }
        if game.initial_energy <= 0 {
            return Err(ConfigError::Zero { name: "initial_energy" });
        }
        if game.energy_per_food < 0 {
            return Err(ConfigError::Invalid(format!(
                "energy_per_food must not be negative, got {}",
                game.energy_per_food
            )));
        }

        self.network.validate()?;
        if self.network.input != SENSOR_INPUTS {
            return Err(ConfigError::Invalid(format!(
                "network input size must be {SENSOR_INPUTS} (8 rays x 3 readings), got {}",
                self.network.input
            )));
        }
        if self.network.output != 4 {
            return Err(ConfigError::Invalid(format!(
                "network output size must be 4 (directions), got {}",
                self.network.output
            )));
        }

        let evo = &self.evolution;
        if evo.population_size == 0 {
            return Err(ConfigError::Zero { name: "population_size" });
        }
        if evo.tournament_size == 0 {
            return Err(ConfigError::Zero { name: "tournament_size" });
        }
        check_rate("mutation_rate", evo.mutation_rate)?;
        check_rate("crossover_rate", evo.crossover_rate)?;
        check_rate("elitism", evo.elitism)?;
        if !evo.mutation_strength.is_finite() || evo.mutation_strength < 0.0 {
            return Err(ConfigError::MutationStrength(evo.mutation_strength));
        }

        let tr = &self.training;
        if tr.max_generations == 0 {
            return Err(ConfigError::Zero { name: "max_generations" });
        }
        if tr.games_per_agent == 0 {
            return Err(ConfigError::Zero { name: "games_per_agent" });
        }
        if tr.max_steps == 0 {
            return Err(ConfigError::Zero { name: "max_steps" });
        }
        if tr.stagnation_limit == 0 {
            return Err(ConfigError::Zero { name: "stagnation_limit" });
        }
        if tr.threads == Some(0) {
            return Err(ConfigError::Zero { name: "threads" });
        }
        if tr.target_fitness.is_nan() {
            return Err(ConfigError::Invalid("target_fitness is NaN".into()));
        }
        Ok(())
    }

    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?;
        let config: Config = serde_json::from_str(&contents)
            .with_context(|| format!("failed parsing {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json).with_context(|| format!("failed writing {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert_eq!(Config::default().validate(), Ok(()));
    }

    #[test]
    fn default_topology_has_468_parameters() {
        assert_eq!(Config::default().network.param_count(), 468);
    }

    #[test]
    fn partial_json_falls_back_to_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"evolution": {"population_size": 20}}"#).unwrap();
        assert_eq!(config.evolution.population_size, 20);
        assert_eq!(config.evolution.tournament_size, 5);
        assert_eq!(config.game.grid_size, 25);
    }

    #[test]
    fn rates_outside_unit_interval_are_rejected() {
        let mut config = Config::default();
        config.evolution.mutation_rate = 1.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RateOutOfRange { name: "mutation_rate", .. })
        ));

        let mut config = Config::default();
        config.evolution.crossover_rate = -0.1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::RateOutOfRange { name: "crossover_rate", .. })
        ));

        let mut config = Config::default();
        config.evolution.elitism = f64::NAN;
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let mut config = Config::default();
        config.evolution.population_size = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero { name: "population_size" })
        );

        let mut config = Config::default();
        config.game.grid_size = 0;
        assert!(matches!(config.validate(), Err(ConfigError::GridTooSmall { .. })));

        let mut config = Config::default();
        config.game.grid_size = 50_000;
        assert_eq!(
            config.validate(),
            Err(ConfigError::GridTooLarge {
                size: 50_000,
                max: MAX_GRID_SIZE,
            })
        );

        let mut config = Config::default();
        config.training.games_per_agent = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::Zero { name: "games_per_agent" })
        );
    }

    #[test]
    fn network_must_match_sensor_layout() {
        let mut config = Config::default();
        config.network.input = 10;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = Config::default();
        config.network.hidden = 32;
        assert_eq!(config.validate(), Ok(()));
    }

    #[test]
    fn save_and_load_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let mut config = Config::default();
        config.training.seed = Some(7);
        config.save(&path).unwrap();
        assert_eq!(Config::load(&path).unwrap(), config);
    }
}
