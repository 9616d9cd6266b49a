//! How long to wait for the rig.
//!
//! The controller accepts a move and answers right away, without telling us
//! when the carriage actually arrives. So we estimate the travel time from the
//! distance and the commanded speed, and pad it generously. None of these
//! numbers come from physics; they were tuned on the real rig.

use std::time::Duration;

/// Multiplier on the ideal travel time, to cover acceleration, deceleration
/// and slack in the belts.
pub const SAFETY_FACTOR: f32 = 2.0;
/// Added to every travel estimate.
pub const SETTLE_BUFFER: Duration = Duration::from_millis(3000);
/// Never wait less than this after a move, even a zero-length one.
pub const MIN_WAIT: Duration = Duration::from_millis(3000);
/// Extra pause when the tour switches rows.
pub const ROW_PAUSE: Duration = Duration::from_millis(2000);
/// Pause between the last cell and the trip back home.
pub const HOME_PAUSE: Duration = Duration::from_millis(2000);
/// Speeds below this (including nonsense like zero or negative speeds) are
/// treated as this for the purpose of estimating.
pub const MIN_SPEED: f32 = 1.0;

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct TourTiming {
    pub safety_factor: f32,
    pub settle_buffer: Duration,
    pub min_wait: Duration,
    pub row_pause: Duration,
    pub home_pause: Duration,
}

impl Default for TourTiming {
    fn default() -> Self {
        TourTiming {
            safety_factor: SAFETY_FACTOR,
            settle_buffer: SETTLE_BUFFER,
            min_wait: MIN_WAIT,
            row_pause: ROW_PAUSE,
            home_pause: HOME_PAUSE,
        }
    }
}

impl TourTiming {
    /// The padded time it takes to travel `distance` cm at `speed` cm/s.
    pub fn travel_time(&self, distance: f32, speed: f32) -> Duration {
        // NaN.max(x) is x.
        let speed = speed.max(MIN_SPEED);
        let distance = if distance.is_finite() { distance.abs() } else { 0.0 };
        let secs = f64::from(distance) / f64::from(speed) * f64::from(self.safety_factor.max(0.0));
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::MAX)
    }

    /// How long to wait after issuing a move before assuming it's done.
    pub fn settle_time(&self, distance: f32, speed: f32) -> Duration {
        self.travel_time(distance, speed)
            .saturating_add(self.settle_buffer)
            .max(self.min_wait)
    }
}
