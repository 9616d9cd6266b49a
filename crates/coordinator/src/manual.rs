//! Driving individual motors by hand: the roof panels, and jogging the axes.

use std::str::FromStr;

use log::{info, warn};
use sera_protocol::{Direction, MotorCommand, MotorName, Motors, MoveRequest, MoveResponse};

use crate::{store::Backend, MoveError, Rig, RigDevice};

/// How far a roof panel moves per command, in cm.
pub const ROOF_STEP_CM: f32 = 2.0;
/// The roof panels are heavy, so they move slowly. In cm/s.
pub const ROOF_SPEED: f32 = 1.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoofSide {
    Left,
    Right,
    Both,
}

impl RoofSide {
    pub fn motors(self) -> &'static [MotorName] {
        match self {
            RoofSide::Left => &[MotorName::RoofLeft],
            RoofSide::Right => &[MotorName::RoofRight],
            RoofSide::Both => &[MotorName::RoofLeft, MotorName::RoofRight],
        }
    }
}

impl FromStr for RoofSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(RoofSide::Left),
            "right" => Ok(RoofSide::Right),
            "both" => Ok(RoofSide::Both),
            _ => Err(format!("expected left, right or both, not {s:?}")),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RoofAction {
    Open,
    Close,
}

impl RoofAction {
    pub fn direction(self) -> Direction {
        match self {
            RoofAction::Open => Direction::Forward,
            RoofAction::Close => Direction::Backward,
        }
    }
}

impl FromStr for RoofAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(RoofAction::Open),
            "close" => Ok(RoofAction::Close),
            _ => Err(format!("expected open or close, not {s:?}")),
        }
    }
}

impl<D: RigDevice, B: Backend> Rig<D, B> {
    /// Opens or closes a roof panel by a notch.
    ///
    /// The roof has its own gate, separate from the carriage's. It's refused
    /// while the carriage is moving, though, since the camera could be in
    /// the way.
    pub async fn move_roof(
        &self,
        side: RoofSide,
        action: RoofAction,
    ) -> Result<MoveResponse, MoveError> {
        if self.motion.is_held() {
            return Err(MoveError::Busy);
        }
        let _guard = self.roof.try_acquire().ok_or(MoveError::Busy)?;
        let cmd = MotorCommand {
            cm: ROOF_STEP_CM,
            speed: ROOF_SPEED,
            dir: action.direction(),
        };
        let req: MoveRequest = side.motors().iter().map(|&m| (m, cmd)).collect();
        info!("{action:?} roof ({side:?})");
        self.device.move_motors(&req).await
    }

    pub fn is_roof_moving(&self) -> bool {
        self.roof.is_held()
    }

    /// Lets both roof panels go slack.
    pub async fn release_roofs(&self) -> Result<(), MoveError> {
        warn!("releasing the roof motors");
        self.device
            .release_motors(Motors::Only(RoofSide::Both.motors().to_vec()))
            .await
    }

    /// Moves one motor by a fixed distance.
    ///
    /// The controller doesn't report where the carriage ends up after a raw
    /// move, so jogging an axis leaves our position estimate out of date.
    /// Jog to where you want to be and then calibrate.
    pub async fn jog(
        &self,
        motor: MotorName,
        cm: f32,
        speed: f32,
        dir: Direction,
    ) -> Result<MoveResponse, MoveError> {
        let _guard = self.motion.try_acquire().ok_or(MoveError::Busy)?;
        let req = MoveRequest::from([(motor, MotorCommand { cm, speed, dir })]);
        info!("jogging {motor} {cm}cm {dir:?}");
        let resp = self.device.move_motors(&req).await?;
        if matches!(motor, MotorName::AxisX | MotorName::AxisY) {
            warn!("jogged {motor}; the position estimate is stale until the next calibration");
        }
        Ok(resp)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{simulator::RecordedCmd, MemoryBackend, PositionStore, SimulatedRig};
    use sera_geom::{Grid, Point, RigConfig};

    fn rig() -> Rig<SimulatedRig> {
        let config = RigConfig::default();
        let sim = SimulatedRig::new(config).with_latency(Duration::from_millis(100));
        Rig::new(
            sim,
            PositionStore::load(config, MemoryBackend::default()),
            Grid::plant(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn open_both_roofs() {
        let rig = rig();
        let resp = rig.move_roof(RoofSide::Both, RoofAction::Open).await.unwrap();
        assert_eq!(resp.moved, vec![MotorName::RoofLeft, MotorName::RoofRight]);
        match rig.device().history().last() {
            Some(RecordedCmd::Move(req)) => {
                assert_eq!(req.len(), 2);
                assert!(req.values().all(|c| c.cm == ROOF_STEP_CM
                    && c.speed == ROOF_SPEED
                    && c.dir == Direction::Forward));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn roof_waits_for_the_carriage() {
        let rig = rig();
        let (moved, roof) = tokio::join!(rig.move_to(Point::new(10.0, 10.0), 8.0), async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            rig.move_roof(RoofSide::Left, RoofAction::Close).await
        });
        assert!(moved.is_ok());
        assert_eq!(roof.unwrap_err(), MoveError::Busy);
    }

    #[tokio::test(start_paused = true)]
    async fn one_roof_command_at_a_time() {
        let rig = rig();
        let (a, b) = tokio::join!(
            rig.move_roof(RoofSide::Left, RoofAction::Open),
            rig.move_roof(RoofSide::Right, RoofAction::Open)
        );
        assert!(a.is_ok());
        assert_eq!(b.unwrap_err(), MoveError::Busy);
        assert!(!rig.is_roof_moving());
    }

    #[tokio::test(start_paused = true)]
    async fn jog_leaves_estimate_alone() {
        let rig = rig();
        rig.jog(MotorName::AxisX, 1.0, 5.0, Direction::Forward)
            .await
            .unwrap();
        assert_eq!(rig.position(), Point::new(22.5, 31.5));
        assert_eq!(rig.device().physical_position(), Point::new(23.5, 31.5));
    }

    #[tokio::test(start_paused = true)]
    async fn release_roofs() {
        let rig = rig();
        rig.release_roofs().await.unwrap();
        assert_eq!(
            rig.device().history(),
            vec![RecordedCmd::Release(Motors::Only(vec![
                MotorName::RoofLeft,
                MotorName::RoofRight
            ]))]
        );
    }

    #[test]
    fn parse() {
        assert_eq!("both".parse::<RoofSide>(), Ok(RoofSide::Both));
        assert_eq!("close".parse::<RoofAction>(), Ok(RoofAction::Close));
        assert!("up".parse::<RoofAction>().is_err());
    }
}
