//! Generation loop: evaluate every agent, report, evolve, check the stop criteria.

use crate::agent::{Agent, AgentSnapshot};
use crate::config::{Config, GameConfig, TrainingConfig};
use crate::error::{ConfigError, Result, SnakeError};
use crate::evolution::{Population, PopulationCheckpoint};
use crate::game::{EndReason, Game, GameState, INITIAL_LENGTH, StepResult};
use crate::observer::{LiveFrame, TrainingObserver};
use rand::rngs::SmallRng;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cooperative stop flag, checked between generations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    TargetReached,
    Stagnation,
    MaxGenerations,
    Cancelled,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationReport {
    pub generation: u32,
    /// Best-ever fitness after this generation.
    pub best_fitness: f32,
    pub generation_best: f32,
    pub avg_fitness: f32,
    pub max_length: f32,
    pub avg_length: f32,
    pub diversity: f32,
    pub alive_agents: usize,
    pub stagnation: u32,
    pub elapsed_secs: f64,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub games_played: u32,
    pub avg_score: f32,
    pub max_score: u32,
    pub avg_steps: f32,
    pub avg_fitness: f32,
}

#[derive(Clone, Debug)]
pub struct TrainingOutcome {
    pub generations_completed: u32,
    pub best_fitness: f32,
    /// `None` when no agent ever scored above zero.
    pub best_agent: Option<AgentSnapshot>,
    pub stop_reason: StopReason,
    pub elapsed: Duration,
    pub evaluation: Option<EvaluationSummary>,
    pub history: Vec<GenerationReport>,
}

/// Result of a single episode.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EpisodeResult {
    pub score: u32,
    pub steps: u32,
    pub energy_left: i32,
    /// `None` when the tick cap ended the episode.
    pub end: Option<EndReason>,
}

/// Plays `agent` on `game` until termination or `max_steps` ticks.
/// `on_tick` sees the state before every decision and the final state.
pub fn run_episode<F>(
    agent: &Agent,
    game: &mut Game,
    max_steps: u32,
    mut on_tick: F,
) -> Result<EpisodeResult>
where
    F: FnMut(&GameState),
{
    let mut end = None;
    for _ in 0..max_steps {
        let state = game.state();
        on_tick(&state);
        let dir = agent.decide(&state)?;
        game.apply_action(dir);
        if let StepResult::Terminated(reason) = game.step()? {
            end = Some(reason);
            break;
        }
    }
    on_tick(&game.state());
    Ok(EpisodeResult {
        score: game.score(),
        steps: game.steps(),
        energy_left: game.energy(),
        end,
    })
}

/// Plays `games` fresh episodes with seeds drawn from `seed`.
pub fn evaluate_agent(
    agent: &Agent,
    game: &GameConfig,
    games: u32,
    max_steps: u32,
    seed: u64,
) -> Result<EvaluationSummary> {
    if games == 0 {
        return Err(SnakeError::DataUnavailable("no evaluation games requested"));
    }
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut summary = EvaluationSummary {
        games_played: games,
        ..EvaluationSummary::default()
    };
    let (mut score, mut steps, mut fitness) = (0.0f32, 0.0f32, 0.0f32);
    for _ in 0..games {
        let mut g = Game::new(game, rng.next_u64())?;
        let r = run_episode(agent, &mut g, max_steps, |_| {})?;
        score += r.score as f32;
        steps += r.steps as f32;
        fitness += crate::agent::fitness(r.score as f32, r.steps as f32, r.energy_left as f32);
        summary.max_score = summary.max_score.max(r.score);
    }
    let n = games as f32;
    summary.avg_score = score / n;
    summary.avg_steps = steps / n;
    summary.avg_fitness = fitness / n;
    Ok(summary)
}

/// Assigns fitness to every agent of a generation.
pub trait Evaluator {
    fn evaluate(&self, agents: &mut [Agent], rng: &mut ChaCha8Rng);
}

pub struct SnakeEvaluator {
    game: GameConfig,
    games_per_agent: u32,
    max_steps: u32,
    pool: Option<rayon::ThreadPool>,
}

impl SnakeEvaluator {
    pub fn new(game: GameConfig, training: &TrainingConfig) -> Result<Self> {
        if training.games_per_agent == 0 {
            return Err(ConfigError::Zero {
                name: "games_per_agent",
            }
            .into());
        }
        let pool = match training.threads {
            Some(jobs) => Some(
                rayon::ThreadPoolBuilder::new()
                    .num_threads(jobs)
                    .build()
                    .map_err(|e| SnakeError::WorkerPool(e.to_string()))?,
            ),
            None => None,
        };
        Ok(Self {
            game,
            games_per_agent: training.games_per_agent,
            max_steps: training.max_steps,
            pool,
        })
    }

    fn evaluate_one(&self, agent: &mut Agent, seed: u64) {
        agent.reset_stats();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (mut food, mut steps, mut energy) = (0.0f32, 0.0f32, 0.0f32);
        let mut alive = false;
        for game_idx in 0..self.games_per_agent {
            let episode = Game::new(&self.game, rng.next_u64())
                .and_then(|mut g| run_episode(agent, &mut g, self.max_steps, |_| {}));
            match episode {
                Ok(r) => {
                    food += r.score as f32;
                    steps += r.steps as f32;
                    energy += r.energy_left as f32;
                    alive = r.end.is_none();
                }
                Err(e) => {
                    warn!(agent = %agent.id, game = game_idx, error = %e, "episode failed, counting zeros");
                    alive = false;
                }
            }
        }
        let n = self.games_per_agent as f32;
        agent.update_fitness(food / n, steps / n, energy / n);
        agent.stats.alive_at_end = alive;
    }
}

impl Evaluator for SnakeEvaluator {
    fn evaluate(&self, agents: &mut [Agent], rng: &mut ChaCha8Rng) {
        // drawn up front so results do not depend on scheduling
        let seeds: Vec<u64> = agents.iter().map(|_| rng.next_u64()).collect();
        let run = |agents: &mut [Agent]| {
            agents
                .par_iter_mut()
                .zip(seeds.par_iter())
                .for_each(|(agent, &seed)| self.evaluate_one(agent, seed));
        };
        match &self.pool {
            Some(pool) => pool.install(|| run(agents)),
            None => run(agents),
        }
    }
}

pub struct TrainingLoop<E: Evaluator = SnakeEvaluator> {
    config: Config,
    population: Population,
    evaluator: E,
    seed: u64,
    rng: ChaCha8Rng,
    cancel: CancelToken,
    stagnation: u32,
    history: Vec<GenerationReport>,
    started: Instant,
}

impl TrainingLoop<SnakeEvaluator> {
    pub fn new(config: Config) -> Result<Self> {
        let evaluator = SnakeEvaluator::new(config.game.clone(), &config.training)?;
        Self::with_evaluator(config, evaluator)
    }

    /// Continues a run from a saved population.
    pub fn resume(config: Config, checkpoint: &PopulationCheckpoint) -> Result<Self> {
        let evaluator = SnakeEvaluator::new(config.game.clone(), &config.training)?;
        let mut lp = Self::with_evaluator(config, evaluator)?;
        lp.population = Population::from_checkpoint(checkpoint, lp.config.evolution.clone())?;
        info!(
            generation = lp.population.generation(),
            best = lp.population.best_fitness(),
            "resumed from checkpoint"
        );
        Ok(lp)
    }
}

impl<E: Evaluator> TrainingLoop<E> {
    pub fn with_evaluator(config: Config, evaluator: E) -> Result<Self> {
        config.validate()?;
        let seed = config
            .training
            .seed
            .unwrap_or_else(|| SmallRng::from_entropy().next_u64());
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let population = Population::new(config.evolution.clone(), config.network, &mut rng)?;
        Ok(Self {
            config,
            population,
            evaluator,
            seed,
            rng,
            cancel: CancelToken::new(),
            stagnation: 0,
            history: Vec::new(),
            started: Instant::now(),
        })
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn population(&self) -> &Population {
        &self.population
    }

    pub fn stagnation(&self) -> u32 {
        self.stagnation
    }

    pub fn history(&self) -> &[GenerationReport] {
        &self.history
    }

    pub fn latest_report(&self) -> Result<&GenerationReport> {
        self.history
            .last()
            .ok_or(SnakeError::DataUnavailable("no generation has completed"))
    }

    /// Evaluates and evolves one generation.
    pub fn run_generation(
        &mut self,
        observer: &mut dyn TrainingObserver,
    ) -> Result<GenerationReport> {
        let generation = self.population.generation();
        self.evaluator
            .evaluate(self.population.agents_mut(), &mut self.rng);

        let agents = self.population.agents();
        let n = agents.len() as f32;
        let generation_best = agents
            .iter()
            .map(Agent::fitness)
            .fold(f32::NEG_INFINITY, f32::max);
        let avg_fitness = agents.iter().map(Agent::fitness).sum::<f32>() / n;
        let max_food = agents
            .iter()
            .map(|a| a.stats.food_eaten)
            .fold(0.0f32, f32::max);
        let avg_food = agents.iter().map(|a| a.stats.food_eaten).sum::<f32>() / n;
        let alive_agents = agents.iter().filter(|a| a.stats.alive_at_end).count();

        let evolved = self.population.evolve(&mut self.rng)?;
        if evolved.improved {
            self.stagnation = 0;
        } else {
            self.stagnation += 1;
        }

        let report = GenerationReport {
            generation,
            best_fitness: evolved.best_fitness,
            generation_best,
            avg_fitness,
            max_length: INITIAL_LENGTH as f32 + max_food,
            avg_length: INITIAL_LENGTH as f32 + avg_food,
            diversity: evolved.diversity,
            alive_agents,
            stagnation: self.stagnation,
            elapsed_secs: self.started.elapsed().as_secs_f64(),
        };
        info!(
            generation,
            best = report.best_fitness,
            gen_best = report.generation_best,
            avg = report.avg_fitness,
            diversity = report.diversity,
            stagnation = report.stagnation,
            "generation complete"
        );
        self.history.push(report.clone());
        observer.on_generation(&report);

        let done = generation + 1;
        let tr = &self.config.training;
        if tr.save_interval > 0 && done % tr.save_interval == 0 {
            observer.on_checkpoint(&self.population.checkpoint());
        }
        if tr.visualization_interval > 0
            && done % tr.visualization_interval == 0
            && observer.wants_frames()
        {
            self.play_demo(generation, observer);
        }
        Ok(report)
    }

    /// Streams one episode of the best agent to the observer.
    fn play_demo(&self, generation: u32, observer: &mut dyn TrainingObserver) {
        let agent = match self.population.best_agent() {
            Some(a) => a,
            None => match self.population.agents().first() {
                Some(a) => a,
                None => return,
            },
        };
        // separate stream so demos never shift the evolution rng
        let seed = self.seed.wrapping_add(u64::from(generation));
        let played = Game::new(&self.config.game, seed).and_then(|mut game| {
            run_episode(agent, &mut game, self.config.training.max_steps, |state| {
                observer.on_frame(&LiveFrame::new(&agent.id, state.clone()));
            })
        });
        match played {
            Ok(r) => debug!(agent = %agent.id, score = r.score, steps = r.steps, "demo finished"),
            Err(e) => warn!(agent = %agent.id, error = %e, "demo episode failed"),
        }
    }

    fn should_stop(&self) -> Option<StopReason> {
        let tr = &self.config.training;
        if self.population.best_fitness() >= tr.target_fitness {
            Some(StopReason::TargetReached)
        } else if self.stagnation >= tr.stagnation_limit {
            Some(StopReason::Stagnation)
        } else {
            None
        }
    }

    pub fn run(mut self, observer: &mut dyn TrainingObserver) -> Result<TrainingOutcome> {
        info!(
            seed = self.seed,
            population = self.population.agents().len(),
            max_generations = self.config.training.max_generations,
            "training started"
        );
        let first = self.population.generation();
        let stop_reason = loop {
            if self.cancel.is_cancelled() {
                break StopReason::Cancelled;
            }
            if self.population.generation() >= self.config.training.max_generations {
                break StopReason::MaxGenerations;
            }
            self.run_generation(observer)?;
            if let Some(reason) = self.should_stop() {
                break reason;
            }
        };

        let done = self.population.generation();
        let interval = self.config.training.save_interval;
        if done > first && (interval == 0 || done % interval != 0) {
            observer.on_checkpoint(&self.population.checkpoint());
        }

        let best_agent = self.population.best_snapshot();
        let evaluation = match (self.population.best_agent(), self.config.training.final_evaluation_games) {
            (Some(agent), games) if games > 0 => Some(evaluate_agent(
                agent,
                &self.config.game,
                games,
                self.config.training.max_steps,
                self.rng.next_u64(),
            )?),
            _ => None,
        };

        let outcome = TrainingOutcome {
            generations_completed: self.population.generation() - first,
            best_fitness: self.population.best_fitness(),
            best_agent,
            stop_reason,
            elapsed: self.started.elapsed(),
            evaluation,
            history: self.history,
        };
        info!(
            reason = ?outcome.stop_reason,
            generations = outcome.generations_completed,
            best = outcome.best_fitness,
            "training finished"
        );
        observer.on_finish(&outcome);
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EvolutionConfig;
    use crate::genome::Genome;
    use crate::nn::Topology;
    use crate::observer::{LiveStatus, NullObserver};

    fn small_config() -> Config {
        let mut config = Config::default();
        config.game.grid_size = 10;
        config.evolution = EvolutionConfig {
            population_size: 8,
            ..EvolutionConfig::default()
        };
        config.training.max_generations = 4;
        config.training.games_per_agent = 2;
        config.training.max_steps = 60;
        config.training.target_fitness = 1.0e9;
        config.training.final_evaluation_games = 3;
        config.training.seed = Some(17);
        config
    }

    /// Gives every agent the same fitness.
    struct Fixed(f32);

    impl Evaluator for Fixed {
        fn evaluate(&self, agents: &mut [Agent], _rng: &mut ChaCha8Rng) {
            for a in agents {
                a.reset_stats();
                a.stats.fitness = self.0;
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        generations: Vec<u32>,
        checkpoints: usize,
        frames: Vec<LiveFrame>,
        finished: bool,
    }

    impl TrainingObserver for Recorder {
        fn on_generation(&mut self, report: &GenerationReport) {
            self.generations.push(report.generation);
        }

        fn on_checkpoint(&mut self, _checkpoint: &PopulationCheckpoint) {
            self.checkpoints += 1;
        }

        fn on_frame(&mut self, frame: &LiveFrame) {
            self.frames.push(frame.clone());
        }

        fn wants_frames(&self) -> bool {
            true
        }

        fn on_finish(&mut self, _outcome: &TrainingOutcome) {
            self.finished = true;
        }
    }

    fn zero_agent() -> Agent {
        let t = Topology::default();
        Agent::new("zero", 0, t, Genome::zeros(t.param_count())).unwrap()
    }

    #[test]
    fn stops_at_exactly_the_stagnation_limit() {
        let mut config = small_config();
        config.training.max_generations = 50;
        config.training.stagnation_limit = 5;
        let lp = TrainingLoop::with_evaluator(config, Fixed(0.0)).unwrap();
        let outcome = lp.run(&mut NullObserver).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Stagnation);
        assert_eq!(outcome.generations_completed, 5);
        assert_eq!(outcome.history.len(), 5);
        assert_eq!(outcome.history[4].stagnation, 5);
        assert!(outcome.best_agent.is_none());
        assert!(outcome.evaluation.is_none());
    }

    #[test]
    fn constant_positive_fitness_counts_the_first_generation_as_improvement() {
        let mut config = small_config();
        config.training.max_generations = 50;
        config.training.stagnation_limit = 3;
        let outcome = TrainingLoop::with_evaluator(config, Fixed(10.0))
            .unwrap()
            .run(&mut NullObserver)
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Stagnation);
        assert_eq!(outcome.generations_completed, 4);
        assert_eq!(outcome.history[0].stagnation, 0);
        assert!(outcome.best_agent.is_some());
        assert_eq!(outcome.evaluation.unwrap().games_played, 3);
    }

    #[test]
    fn target_fitness_stops_the_run() {
        let mut config = small_config();
        config.training.target_fitness = 500.0;
        let outcome = TrainingLoop::with_evaluator(config, Fixed(600.0))
            .unwrap()
            .run(&mut NullObserver)
            .unwrap();
        assert_eq!(outcome.stop_reason, StopReason::TargetReached);
        assert_eq!(outcome.generations_completed, 1);
        assert_eq!(outcome.best_fitness, 600.0);
    }

    #[test]
    fn cancellation_before_start_runs_nothing() {
        let lp = TrainingLoop::new(small_config()).unwrap();
        assert_eq!(
            lp.latest_report(),
            Err(SnakeError::DataUnavailable("no generation has completed"))
        );
        let token = lp.cancel_token();
        token.cancel();
        let outcome = lp.run(&mut NullObserver).unwrap();
        assert_eq!(outcome.stop_reason, StopReason::Cancelled);
        assert_eq!(outcome.generations_completed, 0);
        assert!(outcome.history.is_empty());
    }

    #[test]
    fn max_generations_bounds_the_run() {
        let mut recorder = Recorder::default();
        let outcome = TrainingLoop::new(small_config())
            .unwrap()
            .run(&mut recorder)
            .unwrap();
        assert_eq!(outcome.generations_completed, 4);
        assert_eq!(outcome.stop_reason, StopReason::MaxGenerations);
        assert_eq!(recorder.generations, vec![0, 1, 2, 3]);
        assert!(recorder.finished);
        for r in &outcome.history {
            assert!(r.avg_length >= 3.0);
            assert!(r.max_length >= r.avg_length);
            assert!((0.0..=1.0).contains(&r.diversity));
            assert!(r.generation_best >= r.avg_fitness);
        }
    }

    #[test]
    fn report_and_interval_hooks_fire() {
        let mut config = small_config();
        config.training.save_interval = 2;
        config.training.visualization_interval = 4;
        let mut recorder = Recorder::default();
        let mut lp = TrainingLoop::new(config).unwrap();
        for _ in 0..4 {
            lp.run_generation(&mut recorder).unwrap();
        }
        assert_eq!(recorder.checkpoints, 2);
        assert!(!recorder.frames.is_empty());
        let last = recorder.frames.last().unwrap();
        assert_ne!(last.status, LiveStatus::Win);
        assert!(recorder.frames[..recorder.frames.len() - 1]
            .iter()
            .all(|f| f.status == LiveStatus::InProgress));
        assert_eq!(lp.latest_report().unwrap().generation, 3);
    }

    #[test]
    fn same_seed_gives_the_same_history() {
        let run = |threads| {
            let mut config = small_config();
            config.training.threads = threads;
            TrainingLoop::new(config)
                .unwrap()
                .run(&mut NullObserver)
                .unwrap()
                .history
                .iter()
                .map(|r| (r.best_fitness, r.avg_fitness))
                .collect::<Vec<_>>()
        };
        assert_eq!(run(None), run(Some(2)));
    }

    #[test]
    fn tick_cap_ends_an_episode_alive() {
        // zero genome always heads up; 12 free cells above the head
        let agent = zero_agent();
        let mut game = Game::new(&GameConfig::default(), 5).unwrap();
        let mut ticks = 0;
        let r = run_episode(&agent, &mut game, 5, |_| ticks += 1).unwrap();
        assert_eq!(r.end, None);
        assert_eq!(r.steps, 5);
        assert_eq!(ticks, 6);
    }

    #[test]
    fn running_into_the_wall_ends_with_collision() {
        let agent = zero_agent();
        let mut game = Game::new(&GameConfig::default(), 5).unwrap();
        let r = run_episode(&agent, &mut game, 1000, |_| {}).unwrap();
        assert_eq!(r.end, Some(EndReason::Collision));
        assert!(r.steps <= 12);
    }

    #[test]
    fn evaluation_summary_counts_games() {
        let agent = zero_agent();
        let s = evaluate_agent(&agent, &GameConfig::default(), 10, 1000, 3).unwrap();
        assert_eq!(s.games_played, 10);
        assert!(s.avg_steps > 0.0);
        assert!(s.max_score as f32 >= s.avg_score);
        assert!(matches!(
            evaluate_agent(&agent, &GameConfig::default(), 0, 1000, 3),
            Err(SnakeError::DataUnavailable(_))
        ));
    }

    #[test]
    fn evaluator_rejects_zero_games_per_agent() {
        let mut config = small_config();
        config.training.games_per_agent = 0;
        assert_eq!(
            SnakeEvaluator::new(config.game.clone(), &config.training).err(),
            Some(SnakeError::Config(ConfigError::Zero {
                name: "games_per_agent"
            }))
        );
    }

    #[test]
    fn stopping_between_save_intervals_still_checkpoints_the_last_generation() {
        let mut config = small_config();
        config.training.max_generations = 50;
        config.training.stagnation_limit = 3;
        config.training.save_interval = 10;
        let mut recorder = Recorder::default();
        let outcome = TrainingLoop::with_evaluator(config, Fixed(10.0))
            .unwrap()
            .run(&mut recorder)
            .unwrap();
        assert_eq!(outcome.generations_completed, 4);
        assert_eq!(recorder.checkpoints, 1);
    }

    #[test]
    fn stopping_on_a_save_interval_does_not_checkpoint_twice() {
        let mut config = small_config();
        config.training.save_interval = 2;
        let mut recorder = Recorder::default();
        TrainingLoop::with_evaluator(config, Fixed(10.0))
            .unwrap()
            .run(&mut recorder)
            .unwrap();
        // generations 2 and 4, nothing extra at the stop
        assert_eq!(recorder.checkpoints, 2);
    }

    #[test]
    fn invalid_config_is_rejected_before_any_generation() {
        let mut config = small_config();
        config.evolution.mutation_rate = 2.0;
        assert!(matches!(
            TrainingLoop::new(config),
            Err(SnakeError::Config(_))
        ));
    }
}
