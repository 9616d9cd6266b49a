//! Planning for tours: the order in which to visit the grid, and how long
//! each leg is expected to take.
//!
//! Nothing in here talks to the rig. The coordinator runs the actual tour,
//! but it asks this crate what to do next and how long to wait.

use std::time::Duration;

use sera_geom::{distance, Grid, GridError, Point};

pub mod timing;

pub use timing::TourTiming;

/// Visit a `rows` x `cols` row-major grid boustrophedon-style: the first row
/// left to right, the second right to left, and so on.
pub fn zigzag(rows: usize, cols: usize) -> Vec<usize> {
    let mut ret = Vec::with_capacity(rows * cols);
    for row in 0..rows {
        let start = row * cols;
        if row % 2 == 0 {
            ret.extend(start..start + cols);
        } else {
            ret.extend((start..start + cols).rev());
        }
    }
    ret
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TourPlan {
    order: Vec<usize>,
    cols: usize,
}

impl TourPlan {
    pub fn zigzag(grid: &Grid) -> Self {
        TourPlan {
            order: zigzag(grid.rows(), grid.cols()),
            cols: grid.cols(),
        }
    }

    /// The cell indices, in visiting order.
    pub fn order(&self) -> &[usize] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Is `step` the last one in its row (but not the last one overall)?
    /// The tour takes a breather there before switching rows.
    pub fn ends_row(&self, step: usize) -> bool {
        self.cols > 0 && (step + 1) % self.cols == 0 && step + 1 < self.order.len()
    }

    /// A dry run of the tour, assuming every move lands exactly where it was
    /// aimed.
    pub fn schedule(
        &self,
        grid: &Grid,
        home: Point,
        start: Point,
        speed: f32,
        timing: &TourTiming,
    ) -> Result<Schedule, GridError> {
        let mut pos = start;
        let mut steps = Vec::with_capacity(self.order.len());
        for (step, &cell) in self.order.iter().enumerate() {
            let target = grid.resolve_target(home, cell)?;
            let dist = distance(pos, target);
            let row_pause = if self.ends_row(step) {
                timing.row_pause
            } else {
                Duration::ZERO
            };
            steps.push(ScheduledStep {
                step,
                cell,
                target,
                distance: dist,
                settle: timing.settle_time(dist, speed),
                row_pause,
            });
            pos = target;
        }
        let home_distance = distance(pos, home);
        Ok(Schedule {
            steps,
            home_pause: timing.home_pause,
            home_distance,
            home_settle: timing.settle_time(home_distance, speed),
        })
    }
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct ScheduledStep {
    pub step: usize,
    pub cell: usize,
    pub target: Point,
    pub distance: f32,
    pub settle: Duration,
    pub row_pause: Duration,
}

#[derive(Clone, Debug, serde::Serialize)]
pub struct Schedule {
    pub steps: Vec<ScheduledStep>,
    pub home_pause: Duration,
    pub home_distance: f32,
    pub home_settle: Duration,
}

impl Schedule {
    /// The time spent waiting, start to finish, if nobody cancels.
    pub fn total(&self) -> Duration {
        self.steps
            .iter()
            .map(|s| s.settle + s.row_pause)
            .sum::<Duration>()
            + self.home_pause
            + self.home_settle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use sera_geom::RigConfig;

    #[test]
    fn plant_zigzag() {
        let plan = TourPlan::zigzag(&Grid::plant());
        assert_eq!(plan.order(), &[0, 1, 2, 5, 4, 3, 6, 7, 8, 11, 10, 9]);
    }

    #[test]
    fn row_ends() {
        let plan = TourPlan::zigzag(&Grid::plant());
        let ends: Vec<usize> = (0..plan.len()).filter(|&s| plan.ends_row(s)).collect();
        // No pause after the very last cell: we head home instead.
        assert_eq!(ends, vec![2, 5, 8]);
    }

    #[test]
    fn schedule_from_home() {
        let rig = RigConfig::default();
        let grid = Grid::plant();
        let plan = TourPlan::zigzag(&grid);
        let home = rig.default_home();
        let timing = TourTiming::default();
        let sched = plan.schedule(&grid, home, home, 8.0, &timing).unwrap();

        assert_eq!(sched.steps.len(), 12);
        // Home to (-12, 18) is sqrt(12^2 + 18^2).
        assert!((sched.steps[0].distance - 21.633).abs() < 1e-2);
        // Neighbors in a row are 12cm apart.
        assert!((sched.steps[1].distance - 12.0).abs() < 1e-4);
        // Switching rows is a straight 9cm hop.
        assert!((sched.steps[3].distance - 9.0).abs() < 1e-4);
        assert_eq!(sched.steps[2].row_pause, timing.row_pause);
        assert_eq!(sched.steps[3].row_pause, Duration::ZERO);
        // The tour ends at (-12, -18).
        assert!((sched.home_distance - 21.633).abs() < 1e-2);
        assert!(sched.total() > Duration::from_secs(12 * 3 + 3 * 2 + 2 + 3));
    }

    proptest! {
        #[test]
        fn zigzag_is_a_permutation(rows in 0..8usize, cols in 0..8usize) {
            let mut order = zigzag(rows, cols);
            order.sort();
            prop_assert_eq!(order, (0..rows * cols).collect::<Vec<_>>());
        }

        // Consecutive cells within a row are neighbors.
        #[test]
        fn zigzag_moves_are_short(rows in 1..8usize, cols in 1..8usize) {
            let order = zigzag(rows, cols);
            for pair in order.windows(2) {
                let (a, b) = (pair[0], pair[1]);
                let (ra, ca) = (a / cols, a % cols);
                let (rb, cb) = (b / cols, b % cols);
                prop_assert!(ra.abs_diff(rb) + ca.abs_diff(cb) == 1);
            }
        }
    }
}
