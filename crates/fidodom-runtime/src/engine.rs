//! [`OdometryFusionEngine`] – landmark-anchored odometry from fiducial
//! detections.
//!
//! Each call to [`OdometryFusionEngine::run_cycle`]:
//!
//! 1. **Select** – grab a frame from the primary camera and run the marker
//!    detector on it.  If nothing is found (or the camera/detector fails),
//!    repeat the whole step on the secondary camera.  If both come up empty
//!    the cycle is skipped.
//! 2. **Convert** – re-express the detected marker pose in the footprint
//!    frame using the camera's extrinsics, then negate its Y and Z
//!    translation to reconcile the optical and footprint axis conventions.
//! 3. **Anchor** – look up the landmark's pose in the odometry frame and
//!    take the rigid difference against the observation.  The negated
//!    translation of that difference is the robot position.
//! 4. **Differentiate** – estimate a twist from the previous pose with the
//!    configured [`VelocityModel`].  When no twist can be computed (first
//!    cycle, duplicate stamps) the estimate carries a zero twist.
//! 5. **Package and emit** – attach fixed diagonal covariances, hand the
//!    estimate to the [`OdometrySink`] and make the new pose "previous".
//!
//! Skipped cycles never touch the previous pose.  The next successful cycle
//! therefore differentiates over a longer interval.
//!
//! Every collaborator call is bounded by [`call_with_deadline`].  Reasons
//! for skipped or degraded cycles go to the `Diagnostics` topic of the
//! [`EventBus`] and to the [`CycleStats`] counters; the return value of
//! `run_cycle` only says whether an estimate was produced.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use fidodom_hal::sim::{ScriptedDetector, SimCamera, SimClock};
//! use fidodom_middleware::RecordingSink;
//! use fidodom_perception::StaticTransformProvider;
//! use fidodom_runtime::engine::{Collaborators, EngineConfig, OdometryFusionEngine};
//!
//! # async fn demo() {
//! let clock = SimClock::new();
//! let collaborators = Collaborators {
//!     primary: Arc::new(SimCamera::new("rear_cam", "rear_cam_optical", clock.clone())),
//!     secondary: Arc::new(SimCamera::new("kinect", "kinect_optical", clock)),
//!     detector: Arc::new(ScriptedDetector::new()),
//!     transforms: Arc::new(StaticTransformProvider::new()),
//!     sink: Arc::new(RecordingSink::new()),
//! };
//! let mut engine = OdometryFusionEngine::new(EngineConfig::default(), collaborators);
//! if let Some(estimate) = engine.run_cycle().await {
//!     println!("robot at {:?}", estimate.pose.pose.position);
//! }
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use fidodom_hal::{ImageSource, MarkerDetector};
use fidodom_middleware::{EventBus, OdometrySink, Topic};
use fidodom_perception::{
    FiniteDifferenceRpy, FrameTransformProvider, StampedPose, Transform3D, Twist, Vec3,
    VelocityError, VelocityModel,
};
use fidodom_types::{
    Covariance6, DetectionResult, Event, EventPayload, Header, OdomError, OdometryEstimate,
    PoseMsg, PoseStampedMsg, PoseWithCovariance, Readiness, SkipReason, TwistMsg,
    TwistWithCovariance,
};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bounded::{CancelToken, call_with_deadline};
use crate::startup::StartupPolicy;

// ─────────────────────────────────────────────────────────────────────────────
// Constants
// ─────────────────────────────────────────────────────────────────────────────

/// Diagonal entry of every emitted pose covariance.
pub const POSE_VARIANCE: f64 = 0.1;

/// Diagonal entry of every emitted twist covariance.
pub const TWIST_VARIANCE: f64 = 0.1;

const EVENT_SOURCE: &str = "fidodom-runtime::engine";

/// Per-stage pose dumps: `info!` when the debug flag is set, `debug!`
/// otherwise.
macro_rules! stage {
    ($enabled:expr, $($arg:tt)+) => {
        if $enabled {
            info!($($arg)+);
        } else {
            debug!($($arg)+);
        }
    };
}

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Resolved boundary configuration.  The engine performs no parsing or
/// defaulting of its own.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Frame id stamped on the derived robot pose.
    pub camera_frame: String,
    /// Robot footprint frame; child frame of every estimate.
    pub footprint_frame: String,
    /// Frame attached to the physical landmark.
    pub landmark_frame: String,
    /// World-fixed frame estimates are reported in.
    pub odometry_frame: String,
    /// Promote per-stage pose dumps to `info!`.
    pub debug: bool,
    /// Cycle rate used by the scheduler.
    pub rate_hz: f64,
    /// Bound on each camera `grab`.
    pub image_timeout: Duration,
    /// Bound on each detector call.
    pub detection_timeout: Duration,
    /// Bound on each transform lookup.
    pub transform_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            camera_frame: "camera_link".to_string(),
            footprint_frame: "footprint".to_string(),
            landmark_frame: "bin_footprint".to_string(),
            odometry_frame: "odom".to_string(),
            debug: false,
            rate_hz: 5.0,
            image_timeout: Duration::from_millis(500),
            detection_timeout: Duration::from_secs(1),
            transform_timeout: Duration::from_millis(200),
        }
    }
}

/// The external collaborators the engine drives each cycle.
#[derive(Clone)]
pub struct Collaborators {
    /// Queried first every cycle.
    pub primary: Arc<dyn ImageSource>,
    /// Queried only when the primary yields no marker.
    pub secondary: Arc<dyn ImageSource>,
    pub detector: Arc<dyn MarkerDetector>,
    pub transforms: Arc<dyn FrameTransformProvider>,
    pub sink: Arc<dyn OdometrySink>,
}

/// Running counters, readable between cycles.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleStats {
    /// Cycles started.
    pub cycles: u64,
    /// Estimates handed to the sink.
    pub emitted: u64,
    /// Estimates that came from the secondary source.
    pub secondary_used: u64,
    /// Cycles skipped because neither source saw the landmark.
    pub no_marker: u64,
    /// Cycles skipped because a collaborator failed or returned a
    /// non-finite pose.
    pub collaborator_failures: u64,
    /// Collaborator calls that hit their deadline, skipped cycle or not.
    pub timeouts: u64,
    /// Cycles abandoned because the cancel token fired.
    pub cancelled: u64,
    /// Estimates emitted with a zero twist.
    pub velocity_fallbacks: u64,
}

impl CycleStats {
    pub fn skipped(&self) -> u64 {
        self.no_marker + self.collaborator_failures + self.cancelled
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Engine
// ─────────────────────────────────────────────────────────────────────────────

/// Landmark-anchored odometry estimator.
///
/// Owns the previous pose; several engines can run side by side without
/// sharing any state.
pub struct OdometryFusionEngine {
    config: EngineConfig,
    collaborators: Collaborators,
    velocity_model: Box<dyn VelocityModel>,
    diagnostics: Option<EventBus>,
    cancel: CancelToken,
    previous: StampedPose,
    stats: CycleStats,
    readiness: Readiness,
}

impl OdometryFusionEngine {
    pub fn new(config: EngineConfig, collaborators: Collaborators) -> Self {
        let previous = StampedPose::unset(config.camera_frame.clone());
        Self {
            config,
            collaborators,
            velocity_model: Box::new(FiniteDifferenceRpy),
            diagnostics: None,
            cancel: CancelToken::new(),
            previous,
            stats: CycleStats::default(),
            readiness: Readiness::Pending,
        }
    }

    /// Replace the default [`FiniteDifferenceRpy`] model.
    pub fn with_velocity_model(mut self, model: impl VelocityModel + 'static) -> Self {
        self.velocity_model = Box::new(model);
        self
    }

    /// Publish skip reasons, degraded velocity and readiness on `bus`.
    pub fn with_diagnostics(mut self, bus: EventBus) -> Self {
        self.diagnostics = Some(bus);
        self
    }

    /// Share a cancellation flag with the scheduler or signal handler.
    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The pose the next velocity estimate will be differenced against.
    pub fn previous_pose(&self) -> &StampedPose {
        &self.previous
    }

    pub fn stats(&self) -> &CycleStats {
        &self.stats
    }

    pub fn readiness(&self) -> &Readiness {
        &self.readiness
    }

    pub fn velocity_model(&self) -> &str {
        self.velocity_model.name()
    }

    // ── Cycle ────────────────────────────────────────────────────────────────

    /// Run one full cycle.
    ///
    /// Returns the emitted estimate, or `None` when the cycle was skipped.
    /// Skipping is a normal outcome: the landmark is frequently out of view.
    pub async fn run_cycle(&mut self) -> Option<OdometryEstimate> {
        self.stats.cycles += 1;
        let cycle = self.stats.cycles;
        match self.try_cycle(cycle).await {
            Ok(estimate) => Some(estimate),
            Err(reason) => {
                self.record_skip(cycle, reason);
                None
            }
        }
    }

    async fn try_cycle(&mut self, cycle: u64) -> Result<OdometryEstimate, SkipReason> {
        let (source, detected) = self.select_detection().await?;
        let current = self.derive_pose(&detected).await?;
        let twist = self.estimate_velocity(cycle, &current);
        let estimate = self.package(&current, twist);

        self.collaborators.sink.emit(&estimate);
        self.stats.emitted += 1;
        if source == self.collaborators.secondary.name() {
            self.stats.secondary_used += 1;
        }
        debug!(
            cycle,
            source = %source,
            stamp = estimate.header.stamp,
            x = estimate.pose.pose.position.x,
            y = estimate.pose.pose.position.y,
            "odometry emitted"
        );
        self.previous = current;
        Ok(estimate)
    }

    /// Primary first, secondary only if the primary has nothing.  Returns the
    /// name of the source that saw the marker along with its pose.
    async fn select_detection(&mut self) -> Result<(String, PoseStampedMsg), SkipReason> {
        let sources = [
            Arc::clone(&self.collaborators.primary),
            Arc::clone(&self.collaborators.secondary),
        ];
        let mut last_failure = None;

        for source in sources {
            let outcome = self.detect_from(source.as_ref()).await;
            match outcome.and_then(|result| finite_detection(&result)) {
                Ok(Some(pose)) => return Ok((source.name().to_string(), pose)),
                Ok(None) => debug!(source = source.name(), "no marker in view"),
                Err(e @ OdomError::Cancelled(_)) => return Err(SkipReason::from(e)),
                Err(e) => {
                    if matches!(e, OdomError::Timeout { .. }) {
                        self.stats.timeouts += 1;
                    }
                    debug!(source = source.name(), error = %e, "source failed, trying next");
                    last_failure = Some(e);
                }
            }
        }

        Err(last_failure.map_or(SkipReason::NoMarkerDetected, SkipReason::from))
    }

    async fn detect_from(&self, source: &dyn ImageSource) -> Result<DetectionResult, OdomError> {
        let frame = call_with_deadline(
            &format!("{}.grab", source.name()),
            self.config.image_timeout,
            &self.cancel,
            source.grab(),
        )
        .await?;
        call_with_deadline(
            "detector.detect",
            self.config.detection_timeout,
            &self.cancel,
            self.collaborators.detector.detect(&frame),
        )
        .await
    }

    /// Steps 2–4: camera-relative marker pose → robot pose in the odometry
    /// frame.
    async fn derive_pose(&mut self, detected: &PoseStampedMsg) -> Result<StampedPose, SkipReason> {
        let debug = self.config.debug;
        let optical_frame = if detected.header.frame_id.is_empty() {
            self.config.camera_frame.clone()
        } else {
            detected.header.frame_id.clone()
        };

        let raw = Transform3D::from(&detected.pose);
        stage!(debug, frame = %optical_frame, pose = %raw, "unprocessed detection");

        let footprint_from_camera = self
            .bounded_lookup(&self.config.footprint_frame, &optical_frame)
            .await;
        let footprint_from_camera = footprint_from_camera.map_err(|e| self.failure(e))?;

        let mut in_footprint = footprint_from_camera.compose(raw);
        in_footprint.translation.y = -in_footprint.translation.y;
        in_footprint.translation.z = -in_footprint.translation.z;
        stage!(debug, pose = %in_footprint, "detection in footprint frame");

        let landmark = self
            .bounded_lookup(&self.config.odometry_frame, &self.config.landmark_frame)
            .await;
        let landmark = landmark.map_err(|e| self.failure(e))?;
        stage!(debug, transform = %landmark, "landmark in odometry frame");

        let mut relative = landmark.difference(in_footprint);
        relative.translation = relative.translation.neg();
        stage!(debug, pose = %relative, "robot pose relative to landmark");

        if !relative.is_finite() {
            warn!(pose = %relative, "derived pose is not finite");
            return Err(SkipReason::from(OdomError::InvalidPose(format!(
                "derived pose {relative}"
            ))));
        }

        Ok(StampedPose::new(
            relative,
            self.config.camera_frame.clone(),
            detected.header.stamp,
        ))
    }

    /// Bounded lookup.  Rotations are renormalised; a non-finite transform is
    /// reported as unavailable.
    async fn bounded_lookup(&self, target: &str, source: &str) -> Result<Transform3D, OdomError> {
        let transform = call_with_deadline(
            &format!("transform {target} <- {source}"),
            self.config.transform_timeout,
            &self.cancel,
            self.collaborators.transforms.lookup_transform(target, source),
        )
        .await?;
        if !transform.is_finite() {
            return Err(OdomError::TransformUnavailable {
                target: target.to_string(),
                source_frame: source.to_string(),
                details: format!("non-finite transform {transform}"),
            });
        }
        Ok(transform.normalized())
    }

    fn failure(&mut self, e: OdomError) -> SkipReason {
        if matches!(e, OdomError::Timeout { .. }) {
            self.stats.timeouts += 1;
        }
        SkipReason::from(e)
    }

    fn estimate_velocity(&mut self, cycle: u64, current: &StampedPose) -> Twist {
        match self.velocity_model.estimate(&self.previous, current) {
            Ok(twist) => {
                stage!(
                    self.config.debug,
                    model = self.velocity_model.name(),
                    linear = ?twist.linear,
                    angular = ?twist.angular,
                    "velocity"
                );
                twist
            }
            Err(e) => {
                self.stats.velocity_fallbacks += 1;
                if e == VelocityError::MissingTimestamp {
                    debug!(cycle, "first estimate, emitting zero twist");
                } else {
                    warn!(cycle, error = %e, "velocity unavailable, emitting zero twist");
                }
                self.publish(EventPayload::VelocityUnavailable {
                    cycle,
                    reason: e.to_string(),
                });
                Twist::zero()
            }
        }
    }

    fn package(&self, current: &StampedPose, twist: Twist) -> OdometryEstimate {
        OdometryEstimate {
            header: Header::new(
                self.config.odometry_frame.clone(),
                current.stamp.unwrap_or_default(),
            ),
            child_frame_id: self.config.footprint_frame.clone(),
            pose: PoseWithCovariance {
                pose: PoseMsg::from(current.pose),
                covariance: Covariance6::diagonal(POSE_VARIANCE),
            },
            twist: TwistWithCovariance {
                twist: TwistMsg::from(twist),
                covariance: Covariance6::diagonal(TWIST_VARIANCE),
            },
        }
    }

    fn record_skip(&mut self, cycle: u64, reason: SkipReason) {
        match &reason {
            SkipReason::NoMarkerDetected => {
                self.stats.no_marker += 1;
                debug!(cycle, "no marker from either source, cycle skipped");
            }
            SkipReason::Collaborator(OdomError::Cancelled(call)) => {
                self.stats.cancelled += 1;
                debug!(cycle, call = %call, "cycle cancelled");
            }
            SkipReason::Collaborator(e) => {
                self.stats.collaborator_failures += 1;
                warn!(cycle, reason = e.label(), error = %e, "cycle skipped");
            }
        }
        self.publish(EventPayload::CycleSkipped { cycle, reason });
    }

    fn publish(&self, payload: EventPayload) {
        if let Some(bus) = &self.diagnostics {
            bus.publish_lossy(Topic::Diagnostics, Event::new(EVENT_SOURCE, payload));
        }
    }

    // ── Startup ──────────────────────────────────────────────────────────────

    /// Probe every collaborator until all answer, backing off exponentially
    /// between attempts.
    ///
    /// On success waits `settle_delay` and marks the engine
    /// [`Readiness::Ready`].  `run_cycle` works regardless of readiness;
    /// this only gives the surrounding process an explicit answer instead of
    /// an endless wait.
    ///
    /// # Errors
    ///
    /// - [`OdomError::Config`] if `policy` does not validate.
    /// - [`OdomError::NotReady`] once `max_attempts` probes have failed.
    /// - [`OdomError::Cancelled`] if the cancel token fires meanwhile.
    pub async fn connect(&mut self, policy: &StartupPolicy) -> Result<(), OdomError> {
        policy.validate()?;
        let mut waits = policy.delays().into_iter();
        let mut attempts = 0;

        let last_error = loop {
            attempts += 1;
            match self.probe(policy.attempt_timeout).await {
                Ok(()) => {
                    info!(attempts, settle_ms = policy.settle_delay.as_millis() as u64, "collaborators ready");
                    self.pause(policy.settle_delay, attempts).await?;
                    self.set_readiness(Readiness::Ready);
                    return Ok(());
                }
                Err(e @ OdomError::Cancelled(_)) => {
                    self.set_readiness(Readiness::NotReady {
                        attempts,
                        last_error: e.to_string(),
                    });
                    return Err(e);
                }
                Err(e) => {
                    let Some(delay) = waits.next() else {
                        break e.to_string();
                    };
                    warn!(
                        attempt = attempts,
                        max_attempts = policy.max_attempts,
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "collaborators not ready"
                    );
                    self.pause(delay, attempts).await?;
                }
            }
        };
        warn!(attempts, error = %last_error, "collaborators never became ready");

        self.set_readiness(Readiness::NotReady {
            attempts,
            last_error: last_error.clone(),
        });
        Err(OdomError::NotReady(format!(
            "gave up after {attempts} attempts: {last_error}"
        )))
    }

    /// One readiness probe: both cameras, the detector, and the
    /// odometry-to-landmark transform.
    async fn probe(&self, timeout: Duration) -> Result<(), OdomError> {
        for source in [&self.collaborators.primary, &self.collaborators.secondary] {
            call_with_deadline(
                &format!("{}.grab", source.name()),
                timeout,
                &self.cancel,
                source.grab(),
            )
            .await?;
        }

        let detector_ready = call_with_deadline("detector.ready", timeout, &self.cancel, async {
            Ok(self.collaborators.detector.ready().await)
        })
        .await?;
        if !detector_ready {
            return Err(OdomError::NotReady("marker detector not ready".to_string()));
        }

        call_with_deadline(
            "landmark transform",
            timeout,
            &self.cancel,
            self.collaborators
                .transforms
                .lookup_transform(&self.config.odometry_frame, &self.config.landmark_frame),
        )
        .await?;
        Ok(())
    }

    async fn pause(&mut self, wait: Duration, attempts: u32) -> Result<(), OdomError> {
        let cancel = self.cancel.clone();
        tokio::select! {
            _ = tokio::time::sleep(wait) => Ok(()),
            _ = cancel.cancelled() => {
                let e = OdomError::Cancelled("connect".to_string());
                self.set_readiness(Readiness::NotReady {
                    attempts,
                    last_error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn set_readiness(&mut self, readiness: Readiness) {
        self.readiness = readiness.clone();
        self.publish(EventPayload::Readiness(readiness));
    }
}

/// The best pose of `result`, if any, provided every number in it is finite.
fn finite_detection(result: &DetectionResult) -> Result<Option<PoseStampedMsg>, OdomError> {
    let Some(pose) = result.best_pose() else {
        return Ok(None);
    };
    let q = pose.pose.orientation;
    let finite = pose.header.stamp.is_finite()
        && Vec3::from(pose.pose.position).is_finite()
        && [q.x, q.y, q.z, q.w].iter().all(|c| c.is_finite());
    if !finite {
        warn!(frame = %pose.header.frame_id, stamp = pose.header.stamp, "detection is not finite");
        return Err(OdomError::InvalidPose(format!(
            "detection in {} at t={} has non-finite values",
            pose.header.frame_id, pose.header.stamp
        )));
    }
    Ok(Some(pose.clone()))
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
