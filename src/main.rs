use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use snake_ga::draw::render_frame;
use snake_ga::session::{self, SessionRecorder};
use snake_ga::training::{evaluate_agent, run_episode};
use snake_ga::{Agent, Config, Game, LiveFrame, NullObserver, TrainingLoop, TrainingObserver};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "snake-ga")]
#[command(about = "Evolve neural-network snake players with a genetic algorithm")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a training session
    Train {
        /// JSON config; defaults are used for missing fields
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long)]
        generations: Option<u32>,
        #[arg(long)]
        population: Option<usize>,
        #[arg(long)]
        games: Option<u32>,
        #[arg(long)]
        grid_size: Option<i32>,
        #[arg(long)]
        mutation_rate: Option<f64>,
        #[arg(long)]
        crossover_rate: Option<f64>,
        #[arg(long)]
        elitism: Option<f64>,
        #[arg(long)]
        target_fitness: Option<f32>,
        #[arg(long)]
        stagnation_limit: Option<u32>,
        #[arg(long)]
        seed: Option<u64>,
        #[arg(long)]
        threads: Option<usize>,
        /// Root directory for session files
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
        /// Skip writing session files
        #[arg(long, default_value_t = false)]
        no_session: bool,
        /// Continue from a checkpoint.bin
        #[arg(long)]
        resume: Option<PathBuf>,
    },
    /// Play a saved agent over several games and print statistics
    Evaluate {
        agent: PathBuf,
        #[arg(long, default_value_t = 100)]
        games: u32,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Print a saved agent's game tick by tick
    Replay {
        agent: PathBuf,
        #[arg(long, default_value_t = 200)]
        max_frames: u32,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        #[arg(long, default_value_t = 100)]
        delay_ms: u64,
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// List recorded sessions, or show one in detail
    Sessions {
        /// Session directory name, e.g. session_1700000000
        id: Option<String>,
        #[arg(long, default_value = "data")]
        data_dir: PathBuf,
    },
    /// Write the default configuration
    GenerateConfig {
        #[arg(default_value = "config.json")]
        path: PathBuf,
    },
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(p) => Config::load(p),
        None => Ok(Config::default()),
    }
}

fn load_agent(path: &Path) -> Result<Agent> {
    let snapshot = session::load_snapshot(path)?;
    Agent::from_snapshot(&snapshot)
        .with_context(|| format!("agent in {} does not fit its topology", path.display()))
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Train {
            config,
            generations,
            population,
            games,
            grid_size,
            mutation_rate,
            crossover_rate,
            elitism,
            target_fitness,
            stagnation_limit,
            seed,
            threads,
            data_dir,
            no_session,
            resume,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(v) = generations {
                config.training.max_generations = v;
            }
            if let Some(v) = population {
                config.evolution.population_size = v;
            }
            if let Some(v) = games {
                config.training.games_per_agent = v;
            }
            if let Some(v) = grid_size {
                config.game.grid_size = v;
            }
            if let Some(v) = mutation_rate {
                config.evolution.mutation_rate = v;
            }
            if let Some(v) = crossover_rate {
                config.evolution.crossover_rate = v;
            }
            if let Some(v) = elitism {
                config.evolution.elitism = v;
            }
            if let Some(v) = target_fitness {
                config.training.target_fitness = v;
            }
            if let Some(v) = stagnation_limit {
                config.training.stagnation_limit = v;
            }
            if seed.is_some() {
                config.training.seed = seed;
            }
            if threads.is_some() {
                config.training.threads = threads;
            }
            config.validate().context("invalid configuration")?;
            train(config, &data_dir, no_session, resume.as_deref())
        }
        Commands::Evaluate {
            agent,
            games,
            seed,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let agent = load_agent(&agent)?;
            let summary = evaluate_agent(
                &agent,
                &config.game,
                games,
                config.training.max_steps,
                seed,
            )?;
            println!("Agent {} (generation {})", agent.id, agent.generation);
            println!("  Games played:  {}", summary.games_played);
            println!("  Average score: {:.2}", summary.avg_score);
            println!("  Max score:     {}", summary.max_score);
            println!("  Average steps: {:.1}", summary.avg_steps);
            println!("  Avg fitness:   {:.2}", summary.avg_fitness);
            Ok(())
        }
        Commands::Replay {
            agent,
            max_frames,
            seed,
            delay_ms,
            config,
        } => {
            let config = load_config(config.as_deref())?;
            let agent = load_agent(&agent)?;
            let mut game = Game::new(&config.game, seed)?;
            let delay = Duration::from_millis(delay_ms);
            let result = run_episode(&agent, &mut game, max_frames, |state| {
                let frame = LiveFrame::new(&agent.id, state.clone());
                print!("\x1b[2J\x1b[H{}", render_frame(&frame));
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
            })?;
            println!(
                "Finished: score {} in {} steps ({})",
                result.score,
                result.steps,
                match result.end {
                    Some(reason) => format!("{reason:?}"),
                    None => "frame limit".to_string(),
                }
            );
            Ok(())
        }
        Commands::Sessions { id, data_dir } => match id {
            Some(id) => show_session(&data_dir, &id),
            None => list_sessions(&data_dir),
        },
        Commands::GenerateConfig { path } => {
            Config::default().save(&path)?;
            println!("Wrote default configuration to {}", path.display());
            Ok(())
        }
    }
}

fn train(config: Config, data_dir: &Path, no_session: bool, resume: Option<&Path>) -> Result<()> {
    let mut observer: Box<dyn TrainingObserver> = if no_session {
        Box::new(NullObserver)
    } else {
        let recorder = SessionRecorder::create(data_dir, &config)?;
        println!("Session directory: {}", recorder.dir().display());
        Box::new(recorder)
    };

    let training = match resume {
        Some(path) => {
            let checkpoint = session::load_checkpoint(path)?;
            TrainingLoop::resume(config, &checkpoint)?
        }
        None => TrainingLoop::new(config)?,
    };
    println!("Random seed: {}", training.seed());

    let outcome = training.run(observer.as_mut())?;
    println!();
    println!("Stopped: {:?}", outcome.stop_reason);
    println!("Generations: {}", outcome.generations_completed);
    println!("Best fitness: {:.2}", outcome.best_fitness);
    println!("Elapsed: {:.1}s", outcome.elapsed.as_secs_f64());
    if let Some(best) = &outcome.best_agent {
        println!("Best agent: {} (generation {})", best.id, best.generation);
    }
    if let Some(eval) = &outcome.evaluation {
        println!(
            "Final evaluation over {} games: avg score {:.2}, max score {}, avg steps {:.1}",
            eval.games_played, eval.avg_score, eval.max_score, eval.avg_steps
        );
    }
    Ok(())
}

fn list_sessions(data_dir: &Path) -> Result<()> {
    let sessions = session::list_sessions(data_dir)?;
    if sessions.is_empty() {
        println!("No sessions recorded in {}", data_dir.display());
        return Ok(());
    }
    println!(
        "{:<24} {:>6} {:>12} {:>8} {:>9}  stop",
        "session", "gens", "best", "max len", "secs"
    );
    for s in &sessions {
        println!(
            "{:<24} {:>6} {:>12.2} {:>8.1} {:>9.1}  {}",
            s.session_id,
            s.generations,
            s.best_fitness,
            s.max_snake_length,
            s.elapsed_secs,
            s.stop_reason.map_or("-".to_string(), |r| format!("{r:?}"))
        );
    }
    Ok(())
}

fn show_session(data_dir: &Path, id: &str) -> Result<()> {
    let record = session::load_session(data_dir, id)?;
    match &record.summary {
        Some(s) => println!(
            "{}: {} generations, best fitness {:.2}, stopped: {:?}",
            s.session_id, s.generations, s.best_fitness, s.stop_reason
        ),
        None => println!("{id}: not finished"),
    }
    for g in &record.generations {
        println!(
            "gen {:>4}  best {:>10.2}  avg {:>10.2}  max len {:>5.1}  diversity {:.3}",
            g.generation, g.best_fitness, g.avg_fitness, g.max_length, g.diversity
        );
    }
    Ok(())
}
