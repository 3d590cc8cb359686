//! Core type definitions for the director multi-camera control and
//! analytics platform.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

mod detection;
pub use detection::{Detection, COCO_CLASS_NAMES};

mod frame;
pub use frame::BgrFrame;

pub mod timestamp;

/// Pan range, degrees.
pub const PAN_MIN_DEG: f64 = -180.0;
pub const PAN_MAX_DEG: f64 = 180.0;

/// Tilt range, degrees.
pub const TILT_MIN_DEG: f64 = -90.0;
pub const TILT_MAX_DEG: f64 = 90.0;

/// Normalized zoom range.
pub const ZOOM_MIN: f64 = 0.0;
pub const ZOOM_MAX: f64 = 1.0;

/// The server-assigned opaque camera identity.
///
/// Valid from a successful registration until deregistration (or until the
/// control service forgets it, in which case the agent re-registers and
/// adopts a fresh id). All downstream RPCs carry it.
#[derive(Debug, PartialEq, Eq, Clone, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CameraId(String);

impl CameraId {
    pub fn new(s: String) -> Self {
        CameraId(s)
    }
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CameraId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> Result<(), std::fmt::Error> {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraMode {
    Autonomous,
    Lightweight,
}

impl Default for CameraMode {
    fn default() -> Self {
        CameraMode::Autonomous
    }
}

impl std::str::FromStr for CameraMode {
    type Err = DirectorTypesError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AUTONOMOUS" => Ok(CameraMode::Autonomous),
            "LIGHTWEIGHT" => Ok(CameraMode::Lightweight),
            other => Err(DirectorTypesError::UnknownEnumVariant {
                what: "camera mode",
                got: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionType {
    Onvif,
    Ndi,
    UsbSerial,
    Webrtc,
    Rtsp,
}

impl std::str::FromStr for ConnectionType {
    type Err = DirectorTypesError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ONVIF" => Ok(ConnectionType::Onvif),
            "NDI" => Ok(ConnectionType::Ndi),
            "USB_SERIAL" => Ok(ConnectionType::UsbSerial),
            "WEBRTC" => Ok(ConnectionType::Webrtc),
            "RTSP" => Ok(ConnectionType::Rtsp),
            other => Err(DirectorTypesError::UnknownEnumVariant {
                what: "connection type",
                got: other.to_string(),
            }),
        }
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct CameraCredentials {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

impl CameraCredentials {
    pub fn is_empty(&self) -> bool {
        self.username.is_none() && self.password.is_none() && self.token.is_none()
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Serialize, Deserialize)]
pub struct CameraConnection {
    #[serde(rename = "type")]
    pub connection_type: ConnectionType,
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub credentials: Option<CameraCredentials>,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
pub struct CameraCapabilities {
    pub supports_ptz: bool,
}

/// Everything the control service needs to know about a camera when it
/// registers.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct CameraDescriptor {
    /// The human-chosen camera name (e.g. "cam-stage-left").
    pub name: String,
    pub mode: CameraMode,
    /// Identifier of the logical master frame grouping this camera with its
    /// siblings in the control plane.
    pub master_mf_id: String,
    pub connection: CameraConnection,
    pub capabilities: CameraCapabilities,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

impl CameraDescriptor {
    /// Check the registration invariants before anything goes on the wire.
    pub fn validate(&self) -> Result<(), DirectorTypesError> {
        if self.name.is_empty() {
            return Err(DirectorTypesError::EmptyCameraName);
        }
        if self.master_mf_id.is_empty() {
            return Err(DirectorTypesError::EmptyMasterFrameId);
        }
        Ok(())
    }
}

/// Current pan/tilt/zoom state (or target), with paired speed magnitudes.
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PtzParameters {
    pub pan: f64,
    pub tilt: f64,
    pub zoom: f64,
    pub pan_speed: f64,
    pub tilt_speed: f64,
    pub zoom_speed: f64,
}

impl PtzParameters {
    /// Clamp every axis into its semantic range. Called after every executor
    /// step so observers never see an out-of-range PTZ state.
    pub fn clamp_to_range(&mut self) {
        self.pan = self.pan.clamp(PAN_MIN_DEG, PAN_MAX_DEG);
        self.tilt = self.tilt.clamp(TILT_MIN_DEG, TILT_MAX_DEG);
        self.zoom = self.zoom.clamp(ZOOM_MIN, ZOOM_MAX);
    }
}

/// Axis correction applied between command space and mount space, fixed at
/// startup. Applied in a fixed order: invert pan, invert tilt, then swap.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PtzCorrection {
    pub swap_pan_tilt: bool,
    pub invert_pan: bool,
    pub invert_tilt: bool,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceStatus {
    Idle,
    Executing,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus::Idle
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CameraStatus {
    Active,
    Inactive,
    Error,
}

impl Default for CameraStatus {
    fn default() -> Self {
        CameraStatus::Active
    }
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandLayer {
    Ptz,
    Cinematic,
}

#[derive(Debug, PartialEq, Eq, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    Executing,
    Completed,
    Failed,
}

/// A command task delivered through the polling exchange.
#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: String,
    pub layer: CommandLayer,
    pub status: TaskStatus,
    #[serde(flatten)]
    pub body: TaskBody,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskBody {
    PtzCommand(PtzCommand),
    CinematicCommand(CinematicCommand),
}

/// Normalized absolute target. x and y are in [-1, 1] (mapped to pan and
/// tilt degrees by the executor), z is the normalized zoom in [0, 1].
#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct NormalizedPosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PtzSpeed {
    pub pan_speed: f64,
    pub tilt_speed: f64,
    pub zoom_speed: f64,
}

#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PtzTranslation {
    pub pan_delta: f64,
    pub tilt_delta: f64,
    pub zoom_delta: f64,
}

#[derive(Debug, PartialEq, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PtzVelocity {
    pub pan_velocity: f64,
    pub tilt_velocity: f64,
    pub zoom_velocity: f64,
}

#[derive(Debug, PartialEq, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "operation")]
pub enum PtzCommand {
    AbsoluteMove {
        position: NormalizedPosition,
        #[serde(skip_serializing_if = "Option::is_none")]
        speed: Option<PtzSpeed>,
    },
    RelativeMove {
        translation: PtzTranslation,
        #[serde(skip_serializing_if = "Option::is_none")]
        speed: Option<PtzSpeed>,
    },
    ContinuousMove {
        velocity: PtzVelocity,
        timeout_ms: u64,
    },
}

/// Cinematic-layer command body. The agent acknowledges these but the
/// cinematic planner itself lives on the server side.
#[derive(Debug, PartialEq, Clone, Default, Serialize, Deserialize)]
pub struct CinematicCommand {
    pub name: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

#[derive(thiserror::Error, Debug)]
pub enum DirectorTypesError {
    #[error("camera name must not be empty")]
    EmptyCameraName,
    #[error("master frame id must not be empty")]
    EmptyMasterFrameId,
    #[error("unknown {what}: \"{got}\"")]
    UnknownEnumVariant { what: &'static str, got: String },
    #[error("degenerate bounding box [{x1},{y1},{x2},{y2}]")]
    DegenerateBoundingBox { x1: u32, y1: u32, x2: u32, y2: u32 },
    #[error("frame buffer size {got} does not match {width}x{height}x3")]
    FrameSizeMismatch { width: u32, height: u32, got: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor() -> CameraDescriptor {
        CameraDescriptor {
            name: "cam-A".to_string(),
            mode: CameraMode::Autonomous,
            master_mf_id: "mf-0".to_string(),
            connection: CameraConnection {
                connection_type: ConnectionType::Webrtc,
                address: "192.168.1.10".to_string(),
                port: None,
                credentials: None,
            },
            capabilities: CameraCapabilities { supports_ptz: true },
            metadata: BTreeMap::new(),
        }
    }

    #[test]
    fn descriptor_validation() {
        assert!(descriptor().validate().is_ok());

        let mut d = descriptor();
        d.name.clear();
        assert!(d.validate().is_err());

        let mut d = descriptor();
        d.master_mf_id.clear();
        assert!(d.validate().is_err());
    }

    #[test]
    fn mode_and_connection_type_roundtrip() {
        for s in ["AUTONOMOUS", "LIGHTWEIGHT"] {
            let mode: CameraMode = s.parse().unwrap();
            assert_eq!(serde_json::to_value(mode).unwrap(), s);
        }
        for s in ["ONVIF", "NDI", "USB_SERIAL", "WEBRTC", "RTSP"] {
            let ct: ConnectionType = s.parse().unwrap();
            assert_eq!(serde_json::to_value(ct).unwrap(), s);
        }
        assert!("BOGUS".parse::<ConnectionType>().is_err());
    }

    #[test]
    fn ptz_clamping() {
        let mut ptz = PtzParameters {
            pan: 400.0,
            tilt: -200.0,
            zoom: 1.5,
            ..Default::default()
        };
        ptz.clamp_to_range();
        assert_eq!(ptz.pan, PAN_MAX_DEG);
        assert_eq!(ptz.tilt, TILT_MIN_DEG);
        assert_eq!(ptz.zoom, ZOOM_MAX);
    }

    #[test]
    fn task_json_shape() {
        let task = Task {
            task_id: "T7".to_string(),
            layer: CommandLayer::Ptz,
            status: TaskStatus::Executing,
            body: TaskBody::PtzCommand(PtzCommand::AbsoluteMove {
                position: NormalizedPosition {
                    x: 0.5,
                    y: -0.2,
                    z: 0.3,
                },
                speed: None,
            }),
        };
        let val = serde_json::to_value(&task).unwrap();
        assert_eq!(val["task_id"], "T7");
        assert_eq!(val["layer"], "PTZ");
        assert_eq!(val["ptz_command"]["operation"], "absolute_move");
        let back: Task = serde_json::from_value(val).unwrap();
        assert_eq!(back, task);
    }
}
