use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorName {
    RoofLeft,
    RoofRight,
    AxisX,
    AxisY,
}

impl MotorName {
    pub const ALL: [MotorName; 4] = [
        MotorName::RoofLeft,
        MotorName::RoofRight,
        MotorName::AxisX,
        MotorName::AxisY,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MotorName::RoofLeft => "roof_left",
            MotorName::RoofRight => "roof_right",
            MotorName::AxisX => "axis_x",
            MotorName::AxisY => "axis_y",
        }
    }
}

impl std::fmt::Display for MotorName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// On the wire, `1` is forward and `0` is backward.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Direction {
    Backward,
    Forward,
}

impl From<Direction> for u8 {
    fn from(d: Direction) -> u8 {
        match d {
            Direction::Backward => 0,
            Direction::Forward => 1,
        }
    }
}

impl TryFrom<u8> for Direction {
    type Error = String;

    fn try_from(d: u8) -> Result<Self, Self::Error> {
        match d {
            0 => Ok(Direction::Backward),
            1 => Ok(Direction::Forward),
            _ => Err(format!("invalid direction {d}, expected 0 or 1")),
        }
    }
}

/// Move a single motor by a relative distance.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotorCommand {
    pub cm: f32,
    pub speed: f32,
    pub dir: Direction,
}

/// Commands for any subset of the motors, keyed by motor name.
pub type MoveRequest = BTreeMap<MotorName, MotorCommand>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MoveResponse {
    pub moved: Vec<MotorName>,
}

/// Which motors a stop or release applies to: either a list, or the
/// string `"all"`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Motors {
    All,
    Only(Vec<MotorName>),
}

impl Serialize for Motors {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Motors::All => serializer.serialize_str("all"),
            Motors::Only(names) => names.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for Motors {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Word(String),
            List(Vec<MotorName>),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Word(w) if w == "all" => Ok(Motors::All),
            Repr::Word(w) => Err(serde::de::Error::custom(format!(
                "expected \"all\" or a list of motors, got {w:?}"
            ))),
            Repr::List(names) => Ok(Motors::Only(names)),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopRequest {
    pub motors: Motors,
}

/// The device answers a stop with either `true` or the motors it stopped.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Stopped {
    Flag(bool),
    Motors(Motors),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StopResponse {
    pub stopped: Stopped,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ok: Option<bool>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotorConfig {
    /// Millimeters of travel per revolution.
    pub mmrev: f32,
    /// Microsteps.
    pub ms: u32,
    /// Top speed, in cm/s.
    pub max_cm: f32,
    pub steps_mm: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MotorStatus {
    /// Is the driver energized?
    pub en: bool,
    /// Current speed, in cm/s.
    pub sp_cm: f32,
    pub dir: Direction,
    /// How far the motor still has to go.
    pub cm_rem: f32,
    pub cfg: MotorConfig,
}

pub type StatusResponse = BTreeMap<MotorName, MotorStatus>;
