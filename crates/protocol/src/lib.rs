//! Request and response bodies for the rig controller's HTTP API.
//!
//! The device speaks JSON. Field names here are the ones on the wire, so
//! they're snake_case even where the rest of the code would call them
//! something else.

use sera_geom::Point;
use serde::{Deserialize, Serialize};

mod motors;

pub use motors::{
    Direction, MotorCommand, MotorConfig, MotorName, MotorStatus, Motors, MoveRequest,
    MoveResponse, StatusResponse, StopRequest, StopResponse, Stopped,
};

/// The speed used when the operator hasn't picked one, in cm/s.
pub const DEFAULT_SPEED: f32 = 8.0;
/// The device refuses anything faster than this, in cm/s.
pub const MAX_SPEED: f32 = 30.0;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Xy {
    pub x: f32,
    pub y: f32,
}

impl From<Point> for Xy {
    fn from(p: Point) -> Self {
        Xy { x: p.x, y: p.y }
    }
}

impl From<Xy> for Point {
    fn from(p: Xy) -> Self {
        Point::new(p.x, p.y)
    }
}

/// Move both axes to an absolute position.
///
/// The device doesn't know where the carriage is: it just moves by
/// `target - current`, so `current` had better be right.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionRequest {
    pub target_x: f32,
    pub target_y: f32,
    pub current_x: f32,
    pub current_y: f32,
    pub speed: f32,
}

impl PositionRequest {
    pub fn new(target: Point, current: Point, speed: f32) -> Self {
        PositionRequest {
            target_x: target.x,
            target_y: target.y,
            current_x: current.x,
            current_y: current.y,
            speed,
        }
    }

    pub fn target(&self) -> Point {
        Point::new(self.target_x, self.target_y)
    }

    pub fn current(&self) -> Point {
        Point::new(self.current_x, self.current_y)
    }
}

/// Move back to the device's own idea of home (the center of the rig).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct HomeRequest {
    pub current_x: f32,
    pub current_y: f32,
    pub speed: f32,
}

impl HomeRequest {
    pub fn new(current: Point, speed: f32) -> Self {
        HomeRequest {
            current_x: current.x,
            current_y: current.y,
            speed,
        }
    }
}

/// What the device did in response to a position or home request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PositionResponse {
    /// The axes that actually moved. An axis whose delta is within the
    /// device's dead band doesn't move.
    pub moved: Vec<MotorName>,
    pub delta_x: f32,
    pub delta_y: f32,
    pub new_position: Xy,
}

impl PositionResponse {
    pub fn new_position(&self) -> Point {
        self.new_position.into()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(
        rename = "deviceReachable",
        alias = "device_reachable",
        alias = "esp32_reachable"
    )]
    pub device_reachable: bool,
    #[serde(rename = "deviceHost", alias = "device_host", alias = "esp32_host")]
    pub device_host: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmergencyStopResponse {
    pub emergency_stop: bool,
}

/// The body of a failed request.
///
/// Usually `detail` is a string, but validation failures come back with a
/// list of complaints instead.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub detail: serde_json::Value,
}

impl ErrorBody {
    pub fn message(&self) -> String {
        match &self.detail {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Array(items) => items
                .iter()
                .map(|item| match item.get("msg").and_then(|m| m.as_str()) {
                    Some(msg) => msg.to_owned(),
                    None => item.to_string(),
                })
                .collect::<Vec<_>>()
                .join("; "),
            other => other.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn position_request_shape() {
        let req = PositionRequest::new(Point::new(10.5, 49.5), Point::new(22.5, 31.5), 8.0);
        assert_eq!(
            serde_json::to_value(&req).unwrap(),
            json!({
                "target_x": 10.5,
                "target_y": 49.5,
                "current_x": 22.5,
                "current_y": 31.5,
                "speed": 8.0,
            })
        );
    }

    #[test]
    fn position_response() {
        let resp: PositionResponse = serde_json::from_value(json!({
            "moved": ["axis_x", "axis_y"],
            "delta_x": -12.0,
            "delta_y": 18.0,
            "new_position": { "x": 10.5, "y": 49.5 },
        }))
        .unwrap();
        assert_eq!(resp.moved, vec![MotorName::AxisX, MotorName::AxisY]);
        assert_eq!(resp.new_position(), Point::new(10.5, 49.5));
    }

    #[test]
    fn health_accepts_both_spellings() {
        let new: Health = serde_json::from_value(json!({
            "status": "ok",
            "deviceReachable": true,
            "deviceHost": "172.16.32.190:8080",
        }))
        .unwrap();
        let old: Health = serde_json::from_value(json!({
            "status": "ok",
            "esp32_reachable": true,
            "esp32_host": "172.16.32.190:8080",
        }))
        .unwrap();
        assert_eq!(new, old);
    }

    #[test]
    fn error_messages() {
        let plain: ErrorBody = serde_json::from_value(json!({ "detail": "out of range" })).unwrap();
        assert_eq!(plain.message(), "out of range");

        let validation: ErrorBody = serde_json::from_value(json!({
            "detail": [
                { "loc": ["body", "speed"], "msg": "Input should be less than or equal to 30" },
            ]
        }))
        .unwrap();
        assert_eq!(validation.message(), "Input should be less than or equal to 30");
    }
}
