//! Drives the greenhouse camera rig.
//!
//! The rig is a two-axis gantry (plus two roof panels) behind a small HTTP
//! controller. The controller is forgetful: it doesn't know where the
//! carriage is, it moves by whatever delta we imply, and it never tells us
//! when a move has finished. So this crate keeps track of the position,
//! makes sure only one move is outstanding at a time, and paces tours by
//! estimating how long each move takes.

use std::sync::{Mutex, MutexGuard, PoisonError};

use log::{error, info, warn};
use sera_geom::{Grid, Offset, Point, RigConfig};
use sera_planner::TourTiming;
use sera_protocol::{
    EmergencyStopResponse, Health, HomeRequest, Motors, PositionRequest, StatusResponse,
    StopResponse,
};

pub mod device;
mod error;
mod gate;
pub mod manual;
pub mod simulator;
pub mod store;
pub mod tour;

pub use device::{HttpRig, HttpRigBuilder, RigDevice};
pub use error::MoveError;
pub use manual::{RoofAction, RoofSide};
pub use simulator::SimulatedRig;
pub use store::{Backend, FileBackend, MemoryBackend, PositionStore};
pub use tour::{TourOutcome, TourPhase, TourState};

use gate::BusyGate;
use tour::TourControl;

/// What the controller reports after a move.
pub type MoveResult = sera_protocol::PositionResponse;

/// One rig, and everything we know about it.
///
/// All the operations take `&self`, so that (for example) a stop can be
/// issued while a tour is running.
pub struct Rig<D, B = MemoryBackend> {
    device: D,
    grid: Grid,
    timing: TourTiming,
    store: Mutex<PositionStore<B>>,
    motion: BusyGate,
    roof: BusyGate,
    tour: TourControl,
}

impl<D: RigDevice, B: Backend> Rig<D, B> {
    pub fn new(device: D, store: PositionStore<B>, grid: Grid) -> Self {
        Rig {
            device,
            grid,
            timing: TourTiming::default(),
            store: Mutex::new(store),
            motion: BusyGate::default(),
            roof: BusyGate::default(),
            tour: TourControl::default(),
        }
    }

    pub fn with_timing(mut self, timing: TourTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    pub fn timing(&self) -> &TourTiming {
        &self.timing
    }

    pub fn config(&self) -> RigConfig {
        *self.store().rig()
    }

    fn store(&self) -> MutexGuard<'_, PositionStore<B>> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Where we think the carriage is.
    pub fn position(&self) -> Point {
        self.store().position()
    }

    pub fn home(&self) -> Point {
        self.store().home()
    }

    pub fn offset(&self) -> Offset {
        self.store().offset()
    }

    pub fn relative_position(&self) -> Offset {
        self.store().relative_position()
    }

    /// The grid cell we're sitting on, if any.
    pub fn closest_cell(&self) -> Option<usize> {
        self.grid.closest_cell(self.relative_position())
    }

    /// Is a move (or a tour) in progress?
    pub fn is_busy(&self) -> bool {
        self.motion.is_held()
    }

    // Sends a move without looking at the gate; callers must hold it.
    async fn send_move(&self, target: Point, speed: f32) -> Result<MoveResult, MoveError> {
        let current = self.position();
        info!(
            "moving from ({:.1}, {:.1}) to ({:.1}, {:.1}) at {speed}cm/s",
            current.x, current.y, target.x, target.y
        );
        let req = PositionRequest::new(target, current, speed);
        let result = self.device.move_to_position(&req).await?;
        self.store().save_position(result.new_position());
        Ok(result)
    }

    /// Moves to an absolute position.
    ///
    /// If another move is already in progress, this fails immediately with
    /// [`MoveError::Busy`] instead of waiting its turn.
    pub async fn move_to(&self, target: Point, speed: f32) -> Result<MoveResult, MoveError> {
        let _guard = self.motion.try_acquire().ok_or(MoveError::Busy)?;
        self.send_move(target, speed).await
    }

    /// Moves to one of the grid cells, measured from HOME.
    pub async fn move_to_cell(&self, index: usize, speed: f32) -> Result<MoveResult, MoveError> {
        let target = self.grid.resolve_target(self.home(), index)?;
        self.move_to(target, speed).await
    }

    /// Moves to HOME, wherever it's been calibrated to.
    pub async fn go_home(&self, speed: f32) -> Result<MoveResult, MoveError> {
        let home = self.home();
        self.move_to(home, speed).await
    }

    /// Moves to the controller's own notion of home, the center of the rig.
    ///
    /// This ignores calibration, so it's mostly useful for recovering after
    /// the position estimate has gone wrong.
    pub async fn device_home(&self, speed: f32) -> Result<MoveResult, MoveError> {
        let _guard = self.motion.try_acquire().ok_or(MoveError::Busy)?;
        let req = HomeRequest::new(self.position(), speed);
        info!("moving to the controller's home at {speed}cm/s");
        let result = self.device.go_home(&req).await?;
        self.store().save_position(result.new_position());
        Ok(result)
    }

    /// Stops everything.
    ///
    /// Our own state is cleared before the controller is even contacted: any
    /// tour is cancelled and the rig is no longer busy, even if the stop
    /// request itself fails.
    pub async fn stop(&self) -> Result<(), MoveError> {
        self.tour.cancel();
        self.motion.force_release();
        self.roof.force_release();
        warn!("emergency stop");
        match self.device.emergency_stop().await {
            Ok(EmergencyStopResponse {
                emergency_stop: true,
            }) => Ok(()),
            Ok(_) => {
                error!("the controller didn't confirm the emergency stop");
                Err(MoveError::Device(
                    "the controller didn't confirm the emergency stop".to_owned(),
                ))
            }
            Err(e) => {
                error!("emergency stop failed: {e}");
                Err(e)
            }
        }
    }

    /// De-energizes every motor. They'll stop holding their position, so
    /// the roof panels may sag and the carriage can be pushed around by
    /// hand. Ask the operator first.
    pub async fn release_all(&self) -> Result<(), MoveError> {
        self.tour.cancel();
        self.motion.force_release();
        self.roof.force_release();
        warn!("releasing all motors");
        self.device.release_motors(Motors::All).await.map_err(|e| {
            error!("release failed: {e}");
            e
        })
    }

    pub async fn health(&self) -> Result<Health, MoveError> {
        self.device.health().await
    }

    pub async fn status(&self) -> Result<StatusResponse, MoveError> {
        self.device.status().await
    }

    /// Halts some motors without the full emergency stop.
    pub async fn stop_motors(&self, motors: Motors) -> Result<StopResponse, MoveError> {
        info!("stopping {motors:?}");
        self.device.stop_motors(motors).await
    }

    /// Declares the current position to be HOME.
    pub fn set_home_from_current(&self) -> Point {
        let home = self.store().set_home_from_current();
        info!("HOME is now ({:.1}, {:.1})", home.x, home.y);
        home
    }

    pub fn reset_calibration(&self) {
        self.store().reset_calibration();
        info!("HOME reset to the factory default");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use proptest::prelude::*;
    use simulator::RecordedCmd;

    const LATENCY: Duration = Duration::from_millis(100);

    fn rig(grid: Grid) -> Rig<SimulatedRig> {
        let config = RigConfig::default();
        let sim = SimulatedRig::new(config).with_latency(LATENCY);
        Rig::new(sim, PositionStore::load(config, MemoryBackend::default()), grid)
    }

    fn last_target(rig: &Rig<SimulatedRig>) -> Option<Point> {
        rig.device().history().iter().rev().find_map(|cmd| match cmd {
            RecordedCmd::Position(req) => Some(req.target()),
            _ => None,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn move_updates_position() {
        let rig = rig(Grid::plant());
        rig.move_to_cell(0, 8.0).await.unwrap();
        assert_eq!(rig.position(), Point::new(10.5, 49.5));
        assert_eq!(rig.closest_cell(), Some(0));

        // The next move is sent from where the last one ended.
        rig.move_to_cell(11, 8.0).await.unwrap();
        match rig.device().history().last() {
            Some(RecordedCmd::Position(req)) => {
                assert_eq!(req.current(), Point::new(10.5, 49.5));
                assert_eq!(req.target(), Point::new(34.5, 13.5));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(rig.device().physical_position(), rig.position());
        assert!(!rig.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_touches_nothing() {
        let rig = rig(Grid::plant());
        let err = rig.move_to_cell(12, 8.0).await.unwrap_err();
        assert_eq!(err, MoveError::IndexOutOfRange { index: 12, len: 12 });
        let err = rig.move_to_cell(usize::MAX, 8.0).await.unwrap_err();
        assert!(err.to_string().contains(&usize::MAX.to_string()));
        assert!(rig.device().history().is_empty());
        assert_eq!(rig.position(), Point::new(22.5, 31.5));
        assert!(!rig.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn one_move_at_a_time() {
        let rig = rig(Grid::plant());
        let (a, b) = tokio::join!(
            rig.move_to(Point::new(10.0, 10.0), 8.0),
            rig.move_to(Point::new(30.0, 30.0), 8.0)
        );
        assert!(a.is_ok());
        assert_eq!(b.unwrap_err(), MoveError::Busy);
        assert_eq!(rig.device().max_in_flight(), 1);
        assert_eq!(rig.device().moves(), 1);
        assert_eq!(rig.position(), Point::new(10.0, 10.0));

        // The gate is free again afterwards.
        rig.move_to(Point::new(30.0, 30.0), 8.0).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_move_keeps_position() {
        let rig = rig(Grid::plant());
        let err = rig.move_to(Point::new(10.0, 10.0), 99.0).await.unwrap_err();
        assert!(matches!(err, MoveError::Device(_)));
        assert_eq!(rig.position(), Point::new(22.5, 31.5));
        assert!(!rig.is_busy());

        rig.device().set_reachable(false);
        let err = rig.move_to(Point::new(10.0, 10.0), 8.0).await.unwrap_err();
        assert!(matches!(err, MoveError::Transport(_)));
        assert!(!rig.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn home_follows_calibration() {
        // The middle cell of a 3x3 grid sits exactly on HOME.
        let rig = rig(Grid::uniform(&RigConfig::default(), 3, 3));
        assert_eq!(rig.grid().offset(4), Ok(Offset::zero()));

        rig.move_to(Point::new(12.0, 20.0), 8.0).await.unwrap();
        assert_eq!(rig.set_home_from_current(), Point::new(12.0, 20.0));
        rig.move_to(Point::new(40.0, 40.0), 8.0).await.unwrap();

        rig.go_home(8.0).await.unwrap();
        assert_eq!(last_target(&rig), Some(Point::new(12.0, 20.0)));
        rig.move_to_cell(4, 8.0).await.unwrap();
        assert_eq!(last_target(&rig), Some(Point::new(12.0, 20.0)));
        assert_eq!(rig.closest_cell(), Some(4));

        rig.reset_calibration();
        rig.move_to_cell(4, 8.0).await.unwrap();
        assert_eq!(last_target(&rig), Some(Point::new(22.5, 31.5)));
        rig.move_to(Point::new(5.0, 5.0), 8.0).await.unwrap();
        rig.go_home(8.0).await.unwrap();
        assert_eq!(rig.position(), Point::new(22.5, 31.5));
    }

    #[tokio::test(start_paused = true)]
    async fn device_home_ignores_calibration() {
        let rig = rig(Grid::plant());
        rig.move_to(Point::new(12.0, 20.0), 8.0).await.unwrap();
        rig.set_home_from_current();
        rig.device_home(8.0).await.unwrap();
        assert_eq!(rig.position(), Point::new(22.5, 31.5));
        assert!(matches!(
            rig.device().history().last(),
            Some(RecordedCmd::Home(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn stop_clears_busy_even_if_it_fails() {
        let rig = rig(Grid::plant());
        let (first, ()) = tokio::join!(rig.move_to(Point::new(10.0, 10.0), 8.0), async {
            tokio::time::sleep(LATENCY / 2).await;
            assert!(rig.is_busy());
            rig.device().set_reachable(false);
            assert!(matches!(rig.stop().await, Err(MoveError::Transport(_))));
            assert!(!rig.is_busy());

            rig.device().set_reachable(true);
            rig.move_to(Point::new(30.0, 30.0), 8.0).await.unwrap();
        });
        // The move that was already on the wire still completes.
        assert!(first.is_ok());
        assert!(!rig.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_and_release() {
        let rig = rig(Grid::plant());
        rig.stop().await.unwrap();
        rig.move_to(Point::new(10.0, 10.0), 8.0).await.unwrap();
        rig.release_all().await.unwrap();
        let history = rig.device().history();
        assert_eq!(history[0], RecordedCmd::EmergencyStop);
        assert_eq!(history.last(), Some(&RecordedCmd::Release(Motors::All)));
        let status = rig.status().await.unwrap();
        assert!(status.values().all(|m| !m.en));
    }

    proptest! {
        #[test]
        fn home_cell_tracks_calibration(
            homes in prop::collection::vec((0.0..45.0f32, 0.0..63.0f32), 1..6),
            reset_at in prop::option::of(0..6usize),
        ) {
            let config = RigConfig::default();
            let grid = Grid::uniform(&config, 3, 3);
            let mut store = PositionStore::load(config, MemoryBackend::default());
            for (i, &(x, y)) in homes.iter().enumerate() {
                store.save_position(Point::new(x, y));
                store.set_home_from_current();
                if reset_at == Some(i) {
                    store.reset_calibration();
                }
                prop_assert_eq!(grid.resolve_target(store.home(), 4), Ok(store.home()));
            }
        }
    }
}
