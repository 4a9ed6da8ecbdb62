//! In-process simulation for CI/CD testing without cameras or a detector.
//!
//! - [`SimClock`] – a shared, manually advanced clock in seconds.
//! - [`SimCamera`] – an [`ImageSource`] that stamps blank frames from a
//!   [`SimClock`] and can be switched offline or slowed down.
//! - [`ScriptedDetector`] – replays a fixed queue of detection results.
//! - [`LandmarkRig`] – a [`MarkerDetector`] that synthesises detections of a
//!   landmark at a known odometry position seen from a robot moving at
//!   constant velocity.
//!
//! # Example
//!
//! ```rust
//! use fidodom_hal::sim::SimClock;
//!
//! let clock = SimClock::new();
//! let camera_clock = clock.clone();
//! clock.advance(0.2);
//! assert!((camera_clock.now() - 0.2).abs() < 1e-12);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fidodom_types::{
    CameraInfo, DetectionResult, Header, OdomError, PoseMsg, PoseStampedMsg, QuaternionMsg,
    Vector3Msg,
};
use tracing::debug;

use crate::camera::{CameraFrame, ImageSource};
use crate::detector::MarkerDetector;

// ────────────────────────────────────────────────────────────────────────────
// Clock
// ────────────────────────────────────────────────────────────────────────────

/// Shared simulated time in seconds.  Clones observe the same clock.
#[derive(Debug, Clone, Default)]
pub struct SimClock {
    bits: Arc<AtomicU64>,
}

impl SimClock {
    /// A clock starting at `0.0`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Acquire))
    }

    pub fn set(&self, seconds: f64) {
        self.bits.store(seconds.to_bits(), Ordering::Release);
    }

    pub fn advance(&self, seconds: f64) {
        self.set(self.now() + seconds);
    }
}

// ────────────────────────────────────────────────────────────────────────────
// SimCamera
// ────────────────────────────────────────────────────────────────────────────

/// A simulated camera producing blank 4×4 `mono8` frames.
pub struct SimCamera {
    name: String,
    info: CameraInfo,
    clock: SimClock,
    online: AtomicBool,
    latency: Option<Duration>,
    grabs: AtomicU64,
}

impl SimCamera {
    pub fn new(name: impl Into<String>, optical_frame: impl Into<String>, clock: SimClock) -> Self {
        Self {
            name: name.into(),
            info: CameraInfo {
                frame_id: optical_frame.into(),
                width: 4,
                height: 4,
                fx: 500.0,
                fy: 500.0,
                cx: 2.0,
                cy: 2.0,
                distortion: vec![0.0; 5],
            },
            clock,
            online: AtomicBool::new(true),
            latency: None,
            grabs: AtomicU64::new(0),
        }
    }

    /// Delay every `grab` by `latency` (simulates a stalled driver).
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Switch the camera on or off line.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Number of `grab` calls made so far, successful or not.
    pub fn grab_count(&self) -> u64 {
        self.grabs.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ImageSource for SimCamera {
    fn name(&self) -> &str {
        &self.name
    }

    async fn grab(&self) -> Result<CameraFrame, OdomError> {
        self.grabs.fetch_add(1, Ordering::AcqRel);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        if !self.online.load(Ordering::Acquire) {
            return Err(OdomError::ImageUnavailable {
                source_name: self.name.clone(),
                details: "simulated camera offline".to_string(),
            });
        }
        Ok(CameraFrame {
            source: self.name.clone(),
            stamp: self.clock.now(),
            encoding: "mono8".to_string(),
            data: vec![0u8; (self.info.width * self.info.height) as usize],
            info: self.info.clone(),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// ScriptedDetector
// ────────────────────────────────────────────────────────────────────────────

/// A detector that pops pre-recorded results in order.  Once the script is
/// exhausted every call reports zero markers.
///
/// Scripted poses with an empty `frame_id` are filled in from the frame, as
/// is a zero stamp.
#[derive(Default)]
pub struct ScriptedDetector {
    script: Mutex<VecDeque<Result<DetectionResult, OdomError>>>,
    calls: Mutex<Vec<String>>,
    latency: Option<Duration>,
}

impl ScriptedDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a result to the script.
    pub fn push(&self, result: Result<DetectionResult, OdomError>) {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(result);
    }

    /// Builder-style [`push`](Self::push).
    pub fn then(self, result: Result<DetectionResult, OdomError>) -> Self {
        self.push(result);
        self
    }

    /// Delay every `detect` by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Sources of the frames passed to `detect`, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }
}

#[async_trait]
impl MarkerDetector for ScriptedDetector {
    async fn detect(&self, frame: &CameraFrame) -> Result<DetectionResult, OdomError> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(frame.source.clone());
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        let next = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        let mut result = next.unwrap_or_else(|| Ok(DetectionResult::none()))?;
        let header = &mut result.relative_pose.header;
        if header.frame_id.is_empty() {
            header.frame_id = frame.info.frame_id.clone();
        }
        if header.stamp == 0.0 {
            header.stamp = frame.stamp;
        }
        Ok(result)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// LandmarkRig
// ────────────────────────────────────────────────────────────────────────────

/// When a given camera can see the landmark.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Visibility {
    Always,
    Never,
    /// Visible while `stamp mod period < visible_for`.
    Periodic { period: f64, visible_for: f64 },
}

impl Visibility {
    fn visible_at(self, stamp: f64) -> bool {
        match self {
            Visibility::Always => true,
            Visibility::Never => false,
            Visibility::Periodic { period, visible_for } => {
                period > 0.0 && stamp.rem_euclid(period) < visible_for
            }
        }
    }
}

/// Synthesises detections for a robot translating at constant velocity
/// with its cameras aligned to the footprint frame.
///
/// The reported marker pose follows the detector's optical convention, in
/// which Y and Z point opposite to the footprint axes, so the fusion engine
/// recovers the simulated robot position exactly.
pub struct LandmarkRig {
    landmark: Vector3Msg,
    start: Vector3Msg,
    velocity: Vector3Msg,
    visibility: Mutex<Vec<(String, Visibility)>>,
}

impl LandmarkRig {
    /// `landmark` is the landmark position in the odometry frame; the robot
    /// starts at `start` at time zero and moves at `velocity`.
    pub fn new(landmark: Vector3Msg, start: Vector3Msg, velocity: Vector3Msg) -> Self {
        Self {
            landmark,
            start,
            velocity,
            visibility: Mutex::new(Vec::new()),
        }
    }

    /// Set when the camera named `source` sees the landmark.  Cameras not
    /// configured see it always.
    pub fn with_visibility(self, source: impl Into<String>, visibility: Visibility) -> Self {
        self.set_visibility(source, visibility);
        self
    }

    pub fn set_visibility(&self, source: impl Into<String>, visibility: Visibility) {
        let source = source.into();
        let mut table = self.visibility.lock().unwrap_or_else(|p| p.into_inner());
        table.retain(|(s, _)| *s != source);
        table.push((source, visibility));
    }

    /// Ground-truth robot position at `stamp`.
    pub fn robot_position(&self, stamp: f64) -> Vector3Msg {
        Vector3Msg::new(
            self.start.x + self.velocity.x * stamp,
            self.start.y + self.velocity.y * stamp,
            self.start.z + self.velocity.z * stamp,
        )
    }

    pub fn landmark(&self) -> Vector3Msg {
        self.landmark
    }

    fn visibility_for(&self, source: &str) -> Visibility {
        self.visibility
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
            .find(|(s, _)| s == source)
            .map(|(_, v)| *v)
            .unwrap_or(Visibility::Always)
    }
}

#[async_trait]
impl MarkerDetector for LandmarkRig {
    async fn detect(&self, frame: &CameraFrame) -> Result<DetectionResult, OdomError> {
        if !self.visibility_for(&frame.source).visible_at(frame.stamp) {
            debug!(source = %frame.source, stamp = frame.stamp, "landmark out of view");
            return Ok(DetectionResult::none());
        }
        let robot = self.robot_position(frame.stamp);
        // Landmark offset from the robot, in footprint axes.
        let offset = Vector3Msg::new(
            self.landmark.x - robot.x,
            self.landmark.y - robot.y,
            self.landmark.z - robot.z,
        );
        Ok(DetectionResult::found(PoseStampedMsg {
            header: Header::new(frame.info.frame_id.clone(), frame.stamp),
            pose: PoseMsg {
                position: Vector3Msg::new(offset.x, -offset.y, -offset.z),
                orientation: QuaternionMsg::identity(),
            },
        }))
    }
}
