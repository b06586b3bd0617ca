use crate::config::GameConfig;
use crate::error::{ConfigError, Result, SnakeError};
use crate::pos::{Dir, Pos};
use ahash::AHashSet;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

pub const INITIAL_LENGTH: usize = 3;
/// Smallest board that fits the centred starting snake.
pub const MIN_GRID_SIZE: i32 = 4;
pub const MAX_GRID_SIZE: i32 = 1024;
/// A ray shorter than this fraction of the board counts as danger.
pub const DANGER_THRESHOLD: f32 = 0.2;
pub const SENSOR_INPUTS: usize = 8 * 3;

/// Vision rays: N, NE, E, SE, S, SW, W, NW.
pub const RAYS: [(i32, i32); 8] = [
    (0, -1),
    (1, -1),
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Collision,
    Starvation,
    /// The snake covers every cell; no place left for food.
    BoardFilled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    Active,
    Terminated(EndReason),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepResult {
    Moved,
    Ate,
    Terminated(EndReason),
}

impl StepResult {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepResult::Terminated(_))
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ray {
    pub distance: u32,
    pub food_visible: bool,
    pub danger: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorFrame {
    pub rays: [Ray; 8],
}

impl SensorFrame {
    /// `[distance / grid, food, danger]` per ray, in `RAYS` order.
    pub fn to_inputs(&self, grid_size: i32) -> Vec<f32> {
        let mut inputs = Vec::with_capacity(SENSOR_INPUTS);
        for ray in &self.rays {
            inputs.push(ray.distance as f32 / grid_size as f32);
            inputs.push(if ray.food_visible { 1.0 } else { 0.0 });
            inputs.push(if ray.danger { 1.0 } else { 0.0 });
        }
        inputs
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GameState {
    /// Head first.
    pub body: Vec<Pos>,
    pub heading: Dir,
    pub food: Pos,
    pub energy: i32,
    pub score: u32,
    pub steps: u32,
    pub grid_size: i32,
    pub status: GameStatus,
    pub sensors: SensorFrame,
}

impl GameState {
    pub fn head(&self) -> Pos {
        self.body[0]
    }

    pub fn length(&self) -> usize {
        self.body.len()
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.status, GameStatus::Terminated(_))
    }

    pub fn inputs(&self) -> Vec<f32> {
        self.sensors.to_inputs(self.grid_size)
    }
}

pub struct Game {
    pub grid_size: i32,
    initial_energy: i32,
    energy_per_food: i32,
    snake: VecDeque<Pos>,
    occupied: AHashSet<Pos>,
    dir: Dir,
    food: Pos,
    energy: i32,
    score: u32,
    steps: u32,
    status: GameStatus,
    rng: ChaCha8Rng,
}

impl Game {
    /// A fresh, reset game whose food placement is driven by `seed`.
    pub fn new(config: &GameConfig, seed: u64) -> Result<Self> {
        Self::with_rng(config, ChaCha8Rng::seed_from_u64(seed))
    }

    pub fn with_rng(config: &GameConfig, rng: ChaCha8Rng) -> Result<Self> {
        if config.grid_size < MIN_GRID_SIZE {
            return Err(ConfigError::GridTooSmall {
                size: config.grid_size,
                min: MIN_GRID_SIZE,
            }
            .into());
        }
        if config.grid_size > MAX_GRID_SIZE {
            return Err(ConfigError::GridTooLarge {
                size: config.grid_size,
                max: MAX_GRID_SIZE,
            }
            .into());
        }
        if config.initial_energy <= 0 {
            return Err(ConfigError::Zero { name: "initial_energy" }.into());
        }
        let mut g = Self {
            grid_size: config.grid_size,
            initial_energy: config.initial_energy,
            energy_per_food: config.energy_per_food,
            snake: VecDeque::with_capacity(INITIAL_LENGTH),
            occupied: AHashSet::new(),
            dir: Dir::Right,
            food: Pos::new(0, 0),
            energy: config.initial_energy,
            score: 0,
            steps: 0,
            status: GameStatus::Active,
            rng,
        };
        g.reset();
        Ok(g)
    }

    pub fn reset(&mut self) {
        let c = self.grid_size / 2;
        self.snake.clear();
        self.occupied.clear();
        for i in 0..INITIAL_LENGTH as i32 {
            let p = Pos::new(c - i, c);
            self.snake.push_back(p);
            self.occupied.insert(p);
        }
        self.dir = Dir::Right;
        self.energy = self.initial_energy;
        self.score = 0;
        self.steps = 0;
        self.status = GameStatus::Active;
        // a fresh 3-cell snake always leaves room on a legal board
        self.place_food();
    }

    /// Picks a uniformly random free cell. Returns false when the board is full.
    fn place_food(&mut self) -> bool {
        let n = self.grid_size;
        let cells = n as usize * n as usize;
        if self.snake.len() >= cells {
            return false;
        }
        if self.snake.len() * 2 < cells {
            loop {
                let p = Pos::new(self.rng.gen_range(0..n), self.rng.gen_range(0..n));
                if !self.occupied.contains(&p) {
                    self.food = p;
                    return true;
                }
            }
        }
        // crowded board: sample from the free list instead of rejecting
        let free: Vec<Pos> = (0..n)
            .flat_map(|y| (0..n).map(move |x| Pos::new(x, y)))
            .filter(|p| !self.occupied.contains(p))
            .collect();
        match free.choose(&mut self.rng) {
            Some(&p) => {
                self.food = p;
                true
            }
            None => false,
        }
    }

    /// Turns the snake. Reversing onto itself is ignored.
    pub fn apply_action(&mut self, new_dir: Dir) {
        if new_dir != self.dir.opposite() {
            self.dir = new_dir;
        }
    }

    pub fn step(&mut self) -> Result<StepResult> {
        if let GameStatus::Terminated(_) = self.status {
            return Err(SnakeError::EpisodeTerminated);
        }

        let new_head = self.head().offset(self.dir.delta());
        // the tail vacates this tick, so moving onto it is legal
        let tail = self.snake.back().copied();
        let hits_body = self.occupied.contains(&new_head) && Some(new_head) != tail;
        if !new_head.in_bounds(self.grid_size) || hits_body {
            return Ok(self.terminate(EndReason::Collision));
        }

        self.snake.push_front(new_head);
        if new_head == self.food {
            self.occupied.insert(new_head);
            self.score += 1;
            self.energy += self.energy_per_food;
            if !self.place_food() {
                return Ok(self.terminate(EndReason::BoardFilled));
            }
            self.steps += 1;
            return Ok(StepResult::Ate);
        }

        if let Some(t) = self.snake.pop_back() {
            self.occupied.remove(&t);
        }
        self.occupied.insert(new_head);
        self.energy -= 1;
        if self.energy <= 0 {
            return Ok(self.terminate(EndReason::Starvation));
        }
        self.steps += 1;
        Ok(StepResult::Moved)
    }

    fn terminate(&mut self, reason: EndReason) -> StepResult {
        self.status = GameStatus::Terminated(reason);
        StepResult::Terminated(reason)
    }

    pub fn state(&self) -> GameState {
        GameState {
            body: self.snake.iter().copied().collect(),
            heading: self.dir,
            food: self.food,
            energy: self.energy,
            score: self.score,
            steps: self.steps,
            grid_size: self.grid_size,
            status: self.status,
            sensors: self.vision(),
        }
    }

    pub fn vision(&self) -> SensorFrame {
        let mut frame = SensorFrame::default();
        for (ray, &delta) in frame.rays.iter_mut().zip(RAYS.iter()) {
            *ray = self.cast(delta);
        }
        frame
    }

    fn cast(&self, delta: (i32, i32)) -> Ray {
        let mut p = self.head();
        let mut distance = 0u32;
        let mut food_visible = false;
        loop {
            p = p.offset(delta);
            distance += 1;
            if !p.in_bounds(self.grid_size) || self.occupied.contains(&p) {
                break;
            }
            if p == self.food {
                food_visible = true;
            }
        }
        Ray {
            distance,
            food_visible,
            danger: (distance as f32 / self.grid_size as f32) < DANGER_THRESHOLD,
        }
    }

    pub fn head(&self) -> Pos {
        self.snake[0]
    }

    pub fn snake_contains(&self, p: Pos) -> bool {
        self.occupied.contains(&p)
    }

    pub fn dir(&self) -> Dir {
        self.dir
    }

    pub fn food(&self) -> Pos {
        self.food
    }

    pub fn energy(&self) -> i32 {
        self.energy
    }

    pub fn score(&self) -> u32 {
        self.score
    }

    pub fn steps(&self) -> u32 {
        self.steps
    }

    pub fn len(&self) -> usize {
        self.snake.len()
    }

    pub fn status(&self) -> GameStatus {
        self.status
    }

    pub fn is_over(&self) -> bool {
        matches!(self.status, GameStatus::Terminated(_))
    }
}
