use crate::game::{GameState, GameStatus};
use crate::observer::{LiveFrame, LiveStatus};
use crate::pos::{Dir, Pos};
use ahash::AHashSet;

const FOOD: char = '●';
const BODY: char = '■';
const EMPTY: char = '·';

fn head_char(dir: Dir) -> char {
    match dir {
        Dir::Up => '▲',
        Dir::Down => '▼',
        Dir::Left => '◄',
        Dir::Right => '►',
    }
}

/// Render a game state as text lines: header, bordered board, stats.
pub fn render_state(state: &GameState) -> Vec<String> {
    let n = state.grid_size.max(0) as usize;
    let mut lines = Vec::with_capacity(n + 5);

    let title = match state.status {
        GameStatus::Active => "SNAKE".to_string(),
        GameStatus::Terminated(reason) => format!("GAME OVER ({reason:?})"),
    };
    lines.push(title);

    lines.push(format!("╔{}╗", "═".repeat(n)));
    let body: AHashSet<Pos> = state.body.iter().copied().collect();
    let head = state.body.first().copied();
    for y in 0..state.grid_size {
        let mut row = String::with_capacity(n + 2);
        row.push('║');
        for x in 0..state.grid_size {
            let p = Pos::new(x, y);
            let c = if Some(p) == head {
                head_char(state.heading)
            } else if body.contains(&p) {
                BODY
            } else if p == state.food && !state.is_terminal() {
                FOOD
            } else {
                EMPTY
            };
            row.push(c);
        }
        row.push('║');
        lines.push(row);
    }
    lines.push(format!("╚{}╝", "═".repeat(n)));

    lines.push(format!(
        "Score: {}  │  Length: {}  │  Energy: {}  │  Steps: {}",
        state.score,
        state.length(),
        state.energy,
        state.steps
    ));
    lines
}

pub fn render_frame(frame: &LiveFrame) -> String {
    let status = match frame.status {
        LiveStatus::InProgress => "IN_PROGRESS",
        LiveStatus::Win => "WIN",
        LiveStatus::Loss => "LOSS",
    };
    let mut out = format!("agent {}  [{status}]\n", frame.agent_id);
    for line in render_state(&frame.state) {
        out.push_str(&line);
        out.push('\n');
    }
    out
}
