use std::fmt::Write as _;

use sera_coordinator::TourState;
use sera_geom::{Grid, Offset, Point};
use sera_protocol::{Direction, StatusResponse};

pub fn point(p: Point) -> String {
    format!("({:.1}, {:.1})", p.x, p.y)
}

pub fn offset(o: Offset) -> String {
    format!("({:+.1}, {:+.1})", o.x, o.y)
}

/// The grid, as the operator would see it from above, with the cell we're
/// at (if any) marked.
pub fn grid(grid: &Grid, current: Option<usize>) -> String {
    let mut out = String::new();
    for row in 0..grid.rows() {
        for col in 0..grid.cols() {
            let idx = row * grid.cols() + col;
            let mark = if current == Some(idx) { '*' } else { ' ' };
            let _ = write!(out, "{mark}{:>3}", idx + 1);
        }
        out.push('\n');
    }
    out
}

pub fn status(status: &StatusResponse) -> String {
    let mut out = String::new();
    for (name, m) in status {
        let dir = match m.dir {
            Direction::Forward => "fwd",
            Direction::Backward => "back",
        };
        let _ = writeln!(
            out,
            "{name:<10} {:<5} {:>5.1}cm/s {dir:<4} {:>6.1}cm left  ({}mm/rev, 1/{} step, max {}cm/s)",
            if m.en { "on" } else { "off" },
            m.sp_cm,
            m.cm_rem,
            m.cfg.mmrev,
            m.cfg.ms,
            m.cfg.max_cm,
        );
    }
    out
}

pub fn tour_progress(state: &TourState) -> String {
    match (state.step, state.cell) {
        (Some(step), Some(cell)) => format!("step {}/{}: position {}", step + 1, state.total, cell + 1),
        _ => String::new(),
    }
}
