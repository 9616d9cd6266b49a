//! An in-process stand-in for the motor controller.
//!
//! It answers requests the way the real controller does (including its
//! habit of trusting whatever "current" position it's told) and records
//! everything it was asked to do.

use std::{
    collections::BTreeMap,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use sera_geom::{Point, RigConfig};
use sera_protocol::{
    Direction, EmergencyStopResponse, Health, HomeRequest, MotorConfig, MotorName, MotorStatus,
    Motors, MoveRequest, MoveResponse, PositionRequest, PositionResponse, StatusResponse,
    StopResponse, Stopped, MAX_SPEED,
};

use crate::{device::RigDevice, MoveError};

/// Axis moves shorter than this (in cm) are ignored.
pub const DEAD_BAND: f32 = 0.1;
/// The longest single motor move the controller accepts, in cm.
pub const MAX_TRAVEL: f32 = 1000.0;

#[derive(Clone, Debug, PartialEq)]
pub enum RecordedCmd {
    Position(PositionRequest),
    Home(HomeRequest),
    Move(MoveRequest),
    EmergencyStop,
    Stop(Motors),
    Release(Motors),
}

#[derive(Clone, Debug)]
struct SimMotor {
    energized: bool,
    dir: Direction,
}

struct SimState {
    // Where the carriage physically is. This drifts away from what the
    // coordinator believes if it's told the wrong starting point.
    position: Point,
    reachable: bool,
    motors: BTreeMap<MotorName, SimMotor>,
    history: Vec<RecordedCmd>,
    in_flight: usize,
    max_in_flight: usize,
}

pub struct SimulatedRig {
    rig: RigConfig,
    latency: Duration,
    inner: Mutex<SimState>,
}

// Keeps the in-flight count honest even if a request future is dropped.
struct InFlight<'a>(&'a SimulatedRig);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.state().in_flight -= 1;
    }
}

fn check_speed(speed: f32) -> Result<(), MoveError> {
    if speed > 0.0 && speed <= MAX_SPEED {
        Ok(())
    } else {
        Err(MoveError::Device(format!(
            "speed must be in (0, {MAX_SPEED}] cm/s, got {speed}"
        )))
    }
}

fn selected(motors: &Motors) -> Vec<MotorName> {
    match motors {
        Motors::All => MotorName::ALL.to_vec(),
        Motors::Only(names) => names.clone(),
    }
}

impl SimulatedRig {
    pub fn new(rig: RigConfig) -> Self {
        let motors = MotorName::ALL
            .iter()
            .map(|&m| {
                (
                    m,
                    SimMotor {
                        energized: false,
                        dir: Direction::Forward,
                    },
                )
            })
            .collect();
        SimulatedRig {
            rig,
            latency: Duration::ZERO,
            inner: Mutex::new(SimState {
                position: rig.default_home(),
                reachable: true,
                motors,
                history: Vec::new(),
                in_flight: 0,
                max_in_flight: 0,
            }),
        }
    }

    /// Makes every request take this long to answer.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn state(&self) -> MutexGuard<'_, SimState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Simulates the network going down (or coming back).
    pub fn set_reachable(&self, reachable: bool) {
        self.state().reachable = reachable;
    }

    /// Where the carriage actually is.
    pub fn physical_position(&self) -> Point {
        self.state().position
    }

    pub fn history(&self) -> Vec<RecordedCmd> {
        self.state().history.clone()
    }

    /// The number of position and home requests received so far.
    pub fn moves(&self) -> usize {
        self.state()
            .history
            .iter()
            .filter(|c| matches!(c, RecordedCmd::Position(_) | RecordedCmd::Home(_)))
            .count()
    }

    /// The most requests that were ever being handled at once.
    pub fn max_in_flight(&self) -> usize {
        self.state().max_in_flight
    }

    pub fn is_energized(&self, motor: MotorName) -> bool {
        self.state().motors.get(&motor).map_or(false, |m| m.energized)
    }

    async fn request(&self) -> Result<InFlight<'_>, MoveError> {
        {
            let mut state = self.state();
            if !state.reachable {
                return Err(MoveError::Transport("connection refused".to_owned()));
            }
            state.in_flight += 1;
            state.max_in_flight = state.max_in_flight.max(state.in_flight);
        }
        let guard = InFlight(self);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        Ok(guard)
    }

    fn move_axes(&self, target: Point, current: Point, speed: f32) -> PositionResponse {
        let delta = target - current;
        let mut state = self.state();
        let mut moved = Vec::new();
        for (motor, d) in [(MotorName::AxisX, delta.x), (MotorName::AxisY, delta.y)] {
            if d.abs() > DEAD_BAND {
                moved.push(motor);
                match motor {
                    MotorName::AxisX => state.position.x += d,
                    _ => state.position.y += d,
                }
                if let Some(m) = state.motors.get_mut(&motor) {
                    m.energized = true;
                    m.dir = if d >= 0.0 {
                        Direction::Forward
                    } else {
                        Direction::Backward
                    };
                }
            }
        }
        log::debug!(
            "[sim] moving by ({:.2}, {:.2}) at {speed}cm/s, now at ({:.2}, {:.2})",
            delta.x,
            delta.y,
            state.position.x,
            state.position.y
        );
        PositionResponse {
            moved,
            delta_x: delta.x,
            delta_y: delta.y,
            new_position: target.into(),
        }
    }
}

impl RigDevice for SimulatedRig {
    async fn health(&self) -> Result<Health, MoveError> {
        let _req = self.request().await?;
        Ok(Health {
            status: "ok".to_owned(),
            device_reachable: true,
            device_host: "simulator".to_owned(),
        })
    }

    async fn move_to_position(&self, req: &PositionRequest) -> Result<PositionResponse, MoveError> {
        let _req = self.request().await?;
        self.state().history.push(RecordedCmd::Position(req.clone()));
        check_speed(req.speed)?;
        Ok(self.move_axes(req.target(), req.current(), req.speed))
    }

    async fn go_home(&self, req: &HomeRequest) -> Result<PositionResponse, MoveError> {
        let _req = self.request().await?;
        self.state().history.push(RecordedCmd::Home(req.clone()));
        check_speed(req.speed)?;
        let current = Point::new(req.current_x, req.current_y);
        Ok(self.move_axes(self.rig.default_home(), current, req.speed))
    }

    async fn emergency_stop(&self) -> Result<EmergencyStopResponse, MoveError> {
        let _req = self.request().await?;
        self.state().history.push(RecordedCmd::EmergencyStop);
        Ok(EmergencyStopResponse {
            emergency_stop: true,
        })
    }

    async fn stop_motors(&self, motors: Motors) -> Result<StopResponse, MoveError> {
        let _req = self.request().await?;
        self.state().history.push(RecordedCmd::Stop(motors.clone()));
        let stopped = match motors {
            Motors::All => Stopped::Motors(Motors::All),
            Motors::Only(_) => Stopped::Flag(true),
        };
        Ok(StopResponse {
            stopped,
            ok: Some(true),
        })
    }

    async fn move_motors(&self, req: &MoveRequest) -> Result<MoveResponse, MoveError> {
        let _req = self.request().await?;
        let mut state = self.state();
        state.history.push(RecordedCmd::Move(req.clone()));
        if req.is_empty() {
            return Err(MoveError::Device("at least one motor must be given".to_owned()));
        }
        for cmd in req.values() {
            check_speed(cmd.speed)?;
            if !(cmd.cm > 0.0 && cmd.cm <= MAX_TRAVEL) {
                return Err(MoveError::Device(format!(
                    "distance must be in (0, {MAX_TRAVEL}] cm, got {}",
                    cmd.cm
                )));
            }
        }
        for (motor, cmd) in req {
            let sign = match cmd.dir {
                Direction::Forward => 1.0,
                Direction::Backward => -1.0,
            };
            match motor {
                MotorName::AxisX => state.position.x += sign * cmd.cm,
                MotorName::AxisY => state.position.y += sign * cmd.cm,
                MotorName::RoofLeft | MotorName::RoofRight => {}
            }
            if let Some(m) = state.motors.get_mut(motor) {
                m.energized = true;
                m.dir = cmd.dir;
            }
        }
        Ok(MoveResponse {
            moved: req.keys().copied().collect(),
        })
    }

    async fn release_motors(&self, motors: Motors) -> Result<(), MoveError> {
        let _req = self.request().await?;
        let mut state = self.state();
        state.history.push(RecordedCmd::Release(motors.clone()));
        for name in selected(&motors) {
            if let Some(m) = state.motors.get_mut(&name) {
                m.energized = false;
            }
        }
        Ok(())
    }

    async fn status(&self) -> Result<StatusResponse, MoveError> {
        let _req = self.request().await?;
        let state = self.state();
        Ok(state
            .motors
            .iter()
            .map(|(&name, m)| {
                (
                    name,
                    MotorStatus {
                        en: m.energized,
                        sp_cm: 0.0,
                        dir: m.dir,
                        cm_rem: 0.0,
                        cfg: MotorConfig {
                            mmrev: 40.0,
                            ms: 8,
                            max_cm: MAX_SPEED,
                            steps_mm: 40.0,
                        },
                    },
                )
            })
            .collect())
    }
}
