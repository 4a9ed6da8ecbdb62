//! `fidodom-types` – shared message schema and error vocabulary.
//!
//! The structs in this crate are the wire shapes exchanged with the outside
//! world: what a marker detector hands back, what the odometry sink receives,
//! and what the diagnostics channel carries.  They are plain data; the rigid
//! transform math that operates on them lives in `fidodom-perception`.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

// ────────────────────────────────────────────────────────────────────────────
// Geometry messages
// ────────────────────────────────────────────────────────────────────────────

/// A point or free vector in 3-D space (metres, or metres per second when
/// used as a linear velocity).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Vector3Msg {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vector3Msg {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// Orientation as a quaternion in `(x, y, z, w)` wire order.
///
/// Values received from collaborators are not trusted to be unit length;
/// converting into a `Quaternion` renormalises them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct QuaternionMsg {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl QuaternionMsg {
    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Self { x, y, z, w }
    }

    /// The identity rotation.
    pub fn identity() -> Self {
        Self::new(0.0, 0.0, 0.0, 1.0)
    }
}

/// Position plus orientation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PoseMsg {
    pub position: Vector3Msg,
    pub orientation: QuaternionMsg,
}

/// Reference frame and timestamp (seconds on the transform provider's clock).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Header {
    pub frame_id: String,
    pub stamp: f64,
}

impl Header {
    pub fn new(frame_id: impl Into<String>, stamp: f64) -> Self {
        Self {
            frame_id: frame_id.into(),
            stamp,
        }
    }
}

/// A pose tagged with the frame it is expressed in and when it was observed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PoseStampedMsg {
    pub header: Header,
    pub pose: PoseMsg,
}

/// Linear velocity plus angular velocity (roll, pitch, yaw rates in rad/s).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TwistMsg {
    pub linear: Vector3Msg,
    pub angular: Vector3Msg,
}

/// Row-major 6×6 covariance over `(x, y, z, roll, pitch, yaw)`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Covariance6(pub [[f64; 6]; 6]);

impl Covariance6 {
    /// A covariance with `variance` on every diagonal entry and zero
    /// elsewhere.
    pub fn diagonal(variance: f64) -> Self {
        let mut m = [[0.0; 6]; 6];
        for (i, row) in m.iter_mut().enumerate() {
            row[i] = variance;
        }
        Self(m)
    }

    pub fn get(&self, row: usize, col: usize) -> f64 {
        self.0[row][col]
    }
}

impl Default for Covariance6 {
    fn default() -> Self {
        Self::diagonal(0.0)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct PoseWithCovariance {
    pub pose: PoseMsg,
    pub covariance: Covariance6,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct TwistWithCovariance {
    pub twist: TwistMsg,
    pub covariance: Covariance6,
}

// ────────────────────────────────────────────────────────────────────────────
// Odometry output
// ────────────────────────────────────────────────────────────────────────────

/// The fused odometry result emitted once per successful cycle.
///
/// `header.frame_id` is the odometry frame, `child_frame_id` the robot
/// footprint frame.  Any transport used by an odometry sink must carry every
/// field of this struct.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct OdometryEstimate {
    pub header: Header,
    pub child_frame_id: String,
    pub pose: PoseWithCovariance,
    pub twist: TwistWithCovariance,
}

// ────────────────────────────────────────────────────────────────────────────
// Camera and detection
// ────────────────────────────────────────────────────────────────────────────

/// Pinhole intrinsics of the camera that produced an image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CameraInfo {
    /// Optical frame of the camera, e.g. `"rear_cam_optical"`.
    pub frame_id: String,
    pub width: u32,
    pub height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Distortion coefficients in whatever model the detector expects.
    #[serde(default)]
    pub distortion: Vec<f64>,
}

/// Output of a marker detector run on one image.
///
/// `relative_pose` is the best marker's pose relative to the camera and is
/// only meaningful when `number_found > 0`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct DetectionResult {
    pub number_found: u32,
    pub relative_pose: PoseStampedMsg,
}

impl DetectionResult {
    /// A result reporting no markers.
    pub fn none() -> Self {
        Self::default()
    }

    /// A result with a single marker at `pose`.
    pub fn found(pose: PoseStampedMsg) -> Self {
        Self {
            number_found: 1,
            relative_pose: pose,
        }
    }

    /// The best marker pose, if any marker was found.
    pub fn best_pose(&self) -> Option<&PoseStampedMsg> {
        (self.number_found > 0).then_some(&self.relative_pose)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Diagnostics side-channel
// ────────────────────────────────────────────────────────────────────────────

/// Why a cycle produced no estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "error")]
pub enum SkipReason {
    /// Both sources ran and neither saw the landmark.
    NoMarkerDetected,
    /// A collaborator failed, timed out, or the cycle was cancelled.
    Collaborator(OdomError),
}

impl SkipReason {
    /// Short, stable label used as a metrics/log key.
    pub fn label(&self) -> &'static str {
        match self {
            SkipReason::NoMarkerDetected => "no_marker",
            SkipReason::Collaborator(e) => e.label(),
        }
    }
}

impl From<OdomError> for SkipReason {
    fn from(e: OdomError) -> Self {
        SkipReason::Collaborator(e)
    }
}

/// Startup state of the engine's collaborators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Readiness {
    /// `connect` has not run yet.
    Pending,
    /// Every collaborator answered a probe.
    Ready,
    /// Retries were exhausted.
    NotReady { attempts: u32, last_error: String },
}

/// Unified event wrapper for the diagnostics and odometry bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    /// e.g. `"fidodom-runtime::engine"`
    pub source: String,
    pub payload: EventPayload,
}

impl Event {
    /// Wrap `payload` with a fresh id and the current wall-clock time.
    pub fn new(source: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source: source.into(),
            payload,
        }
    }
}

/// Variants of data that can be routed over the event bus.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EventPayload {
    Odometry(OdometryEstimate),
    CycleSkipped { cycle: u64, reason: SkipReason },
    /// An estimate was emitted with a zero twist.
    VelocityUnavailable { cycle: u64, reason: String },
    Readiness(Readiness),
}

// ────────────────────────────────────────────────────────────────────────────
// Errors
// ────────────────────────────────────────────────────────────────────────────

/// Global error type for collaborator failures, bounded-wait expiry, and
/// configuration problems.
#[derive(Error, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OdomError {
    #[error("Image source '{source_name}' unavailable: {details}")]
    ImageUnavailable { source_name: String, details: String },

    #[error("Marker detection failed: {0}")]
    DetectionFailed(String),

    /// A detection or derived pose carried NaN/Inf.
    #[error("Invalid pose: {0}")]
    InvalidPose(String),

    #[error("Transform {target} <- {source_frame} unavailable: {details}")]
    TransformUnavailable {
        target: String,
        source_frame: String,
        details: String,
    },

    #[error("Call '{call}' timed out after {after_ms} ms")]
    Timeout { call: String, after_ms: u64 },

    #[error("Call '{0}' cancelled")]
    Cancelled(String),

    #[error("Collaborators not ready: {0}")]
    NotReady(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Odometry sink error: {0}")]
    Sink(String),
}

impl OdomError {
    pub fn label(&self) -> &'static str {
        match self {
            OdomError::ImageUnavailable { .. } => "image_unavailable",
            OdomError::DetectionFailed(_) => "detection_failed",
            OdomError::InvalidPose(_) => "invalid_pose",
            OdomError::TransformUnavailable { .. } => "transform_unavailable",
            OdomError::Timeout { .. } => "timeout",
            OdomError::Cancelled(_) => "cancelled",
            OdomError::NotReady(_) => "not_ready",
            OdomError::Config(_) => "config",
            OdomError::Sink(_) => "sink",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_covariance_has_zero_off_diagonal() {
        let cov = Covariance6::diagonal(0.1);
        for row in 0..6 {
            for col in 0..6 {
                let expected = if row == col { 0.1 } else { 0.0 };
                assert_eq!(cov.get(row, col), expected, "entry ({row}, {col})");
            }
        }
    }

    #[test]
    fn detection_best_pose_requires_a_marker() {
        assert!(DetectionResult::none().best_pose().is_none());

        let pose = PoseStampedMsg {
            header: Header::new("rear_cam_optical", 3.5),
            pose: PoseMsg::default(),
        };
        let found = DetectionResult::found(pose.clone());
        assert_eq!(found.best_pose(), Some(&pose));
    }

    #[test]
    fn odometry_estimate_json_keeps_every_field() {
        let estimate = OdometryEstimate {
            header: Header::new("odom", 12.25),
            child_frame_id: "footprint".to_string(),
            pose: PoseWithCovariance {
                pose: PoseMsg {
                    position: Vector3Msg::new(1.0, 2.0, 0.0),
                    orientation: QuaternionMsg::identity(),
                },
                covariance: Covariance6::diagonal(0.1),
            },
            twist: TwistWithCovariance {
                twist: TwistMsg {
                    linear: Vector3Msg::new(0.5, 0.0, 0.0),
                    angular: Vector3Msg::new(0.0, 0.0, 0.1),
                },
                covariance: Covariance6::diagonal(0.1),
            },
        };
        let json = serde_json::to_value(&estimate).unwrap();
        assert_eq!(json["header"]["frame_id"], "odom");
        assert_eq!(json["child_frame_id"], "footprint");
        assert_eq!(json["pose"]["covariance"][5][5], 0.1);
        assert_eq!(json["twist"]["twist"]["angular"]["z"], 0.1);

        let back: OdometryEstimate = serde_json::from_value(json).unwrap();
        assert_eq!(back, estimate);
    }

    #[test]
    fn odometry_schema_names_top_level_fields() {
        let schema = schemars::schema_for!(OdometryEstimate);
        let json = serde_json::to_string(&schema).unwrap();
        for field in ["header", "child_frame_id", "pose", "twist", "covariance"] {
            assert!(json.contains(field), "schema is missing {field}");
        }
    }

    #[test]
    fn skip_reason_labels() {
        assert_eq!(SkipReason::NoMarkerDetected.label(), "no_marker");
        let timeout = SkipReason::from(OdomError::Timeout {
            call: "detect".to_string(),
            after_ms: 250,
        });
        assert_eq!(timeout.label(), "timeout");
        let invalid = SkipReason::from(OdomError::InvalidPose("stamp NaN".to_string()));
        assert_eq!(invalid.label(), "invalid_pose");
    }

    #[test]
    fn odom_error_display() {
        let err = OdomError::TransformUnavailable {
            target: "odom".to_string(),
            source_frame: "bin_footprint".to_string(),
            details: "unknown frame".to_string(),
        };
        let text = err.to_string();
        assert!(text.contains("odom"));
        assert!(text.contains("bin_footprint"));
    }

    #[test]
    fn event_roundtrip() {
        let event = Event::new(
            "fidodom-runtime::engine",
            EventPayload::CycleSkipped {
                cycle: 7,
                reason: SkipReason::NoMarkerDetected,
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(event.id, back.id);
        assert_eq!(event.source, back.source);
        assert!(matches!(
            back.payload,
            EventPayload::CycleSkipped { cycle: 7, reason: SkipReason::NoMarkerDetected }
        ));
    }
}
