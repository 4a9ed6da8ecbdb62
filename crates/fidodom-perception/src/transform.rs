//! Rigid transforms and the Transform Frame (TF) engine.
//!
//! [`Transform3D`] is a translation plus a unit [`Quaternion`].  A transform
//! `T_A_B` is the pose of frame B expressed in frame A: applying it to a point
//! written in B yields the same point written in A.
//!
//! # Conventions
//!
//! - Quaternions are renormalised whenever they are built from untrusted
//!   input ([`Quaternion::normalized`], `From<&PoseMsg>`).  A zero-norm or
//!   non-finite quaternion is replaced by the identity rotation.
//! - Roll-pitch-yaw uses fixed X-Y-Z axes: `R = Rz(yaw) · Ry(pitch) ·
//!   Rx(roll)`, the convention used by tf2 and `nav_msgs/Odometry`.
//!
//! # Example
//!
//! ```rust
//! use fidodom_perception::transform::{TfEngine, Transform3D, Vec3, Quaternion};
//!
//! let mut tf = TfEngine::new();
//!
//! // The landmark sits 2 m ahead of the odom origin.
//! tf.set_transform("odom", "bin_footprint",
//!     Transform3D::new(Vec3::new(2.0, 0.0, 0.0), Quaternion::identity()));
//!
//! let t = tf.lookup("odom", "bin_footprint").unwrap();
//! assert!((t.translation.x - 2.0).abs() < 1e-9);
//!
//! // Edges can be walked backwards; the inverse is computed on the fly.
//! let back = tf.lookup("bin_footprint", "odom").unwrap();
//! assert!((back.translation.x + 2.0).abs() < 1e-9);
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::RwLock;

use async_trait::async_trait;
use fidodom_types::{OdomError, PoseMsg, QuaternionMsg, Vector3Msg};
use tracing::debug;

/// Squared norm below which a quaternion is treated as the zero quaternion.
const MIN_NORM_SQUARED: f64 = 1e-24;

// ────────────────────────────────────────────────────────────────────────────
// Primitive types
// ────────────────────────────────────────────────────────────────────────────

/// A 3-D translation vector.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    /// Create a new vector.
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// The zero vector.
    pub fn zero() -> Self {
        Self::new(0.0, 0.0, 0.0)
    }

    pub fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }

    pub fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn neg(self) -> Self {
        self.scale(-1.0)
    }

    pub fn norm(self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

/// A unit quaternion representing a 3-D rotation (w, x, y, z convention).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Quaternion {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Quaternion {
    /// Create a quaternion.  The caller is responsible for providing a unit
    /// quaternion (|q| = 1); use [`Quaternion::normalized`] for raw input.
    pub fn new(w: f64, x: f64, y: f64, z: f64) -> Self {
        Self { w, x, y, z }
    }

    /// The identity rotation (no rotation).
    pub fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0)
    }

    /// Build from fixed-axis roll (X), pitch (Y) and yaw (Z) angles.
    pub fn from_rpy(roll: f64, pitch: f64, yaw: f64) -> Self {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();
        Self::new(
            cr * cp * cy + sr * sp * sy,
            sr * cp * cy - cr * sp * sy,
            cr * sp * cy + sr * cp * sy,
            cr * cp * sy - sr * sp * cy,
        )
    }

    pub fn norm(self) -> f64 {
        (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    /// `true` when every component is exactly zero, the "never set" sentinel
    /// of an uninitialised pose message.
    pub fn is_zero(self) -> bool {
        self.w == 0.0 && self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    /// Rescale to unit length.  Zero-norm or non-finite input yields the
    /// identity rotation.
    pub fn normalized(self) -> Self {
        let n2 = self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z;
        if !n2.is_finite() || n2 < MIN_NORM_SQUARED {
            return Self::identity();
        }
        let inv = 1.0 / n2.sqrt();
        Self::new(self.w * inv, self.x * inv, self.y * inv, self.z * inv)
    }

    /// Hamilton product: compose two rotations.
    pub fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.w * rhs.w - self.x * rhs.x - self.y * rhs.y - self.z * rhs.z,
            self.w * rhs.x + self.x * rhs.w + self.y * rhs.z - self.z * rhs.y,
            self.w * rhs.y - self.x * rhs.z + self.y * rhs.w + self.z * rhs.x,
            self.w * rhs.z + self.x * rhs.y - self.y * rhs.x + self.z * rhs.w,
        )
    }

    /// Conjugate (== inverse for a unit quaternion).
    pub fn conjugate(self) -> Self {
        Self::new(self.w, -self.x, -self.y, -self.z)
    }

    /// Rotate a vector by this quaternion: p' = q * p * q*.
    pub fn rotate(self, v: Vec3) -> Vec3 {
        // Express v as a pure quaternion.
        let p = Self::new(0.0, v.x, v.y, v.z);
        let rotated = self.mul(p).mul(self.conjugate());
        Vec3::new(rotated.x, rotated.y, rotated.z)
    }

    /// Extract fixed-axis `(roll, pitch, yaw)` in radians.
    ///
    /// Pitch is clamped to ±π/2 at the gimbal-lock singularity instead of
    /// producing NaN from `asin` of a value slightly outside `[-1, 1]`.
    pub fn to_rpy(self) -> (f64, f64, f64) {
        let q = self.normalized();
        let roll = (2.0 * (q.w * q.x + q.y * q.z)).atan2(1.0 - 2.0 * (q.x * q.x + q.y * q.y));
        let sin_pitch = (2.0 * (q.w * q.y - q.z * q.x)).clamp(-1.0, 1.0);
        let pitch = sin_pitch.asin();
        let yaw = (2.0 * (q.w * q.z + q.x * q.y)).atan2(1.0 - 2.0 * (q.y * q.y + q.z * q.z));
        (roll, pitch, yaw)
    }

    /// Logarithm map: the rotation vector (axis × angle) of this rotation,
    /// taking the short way round.
    pub fn log(self) -> Vec3 {
        let q = self.normalized();
        let q = if q.w < 0.0 {
            Self::new(-q.w, -q.x, -q.y, -q.z)
        } else {
            q
        };
        let v = Vec3::new(q.x, q.y, q.z);
        let s = v.norm();
        if s < 1e-12 {
            // sin(θ/2) ≈ θ/2 near the identity.
            return v.scale(2.0);
        }
        let angle = 2.0 * s.atan2(q.w);
        v.scale(angle / s)
    }
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::identity()
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Transform3D
// ────────────────────────────────────────────────────────────────────────────

/// A rigid-body 3-D transform: translation followed by rotation.
///
/// Represents the pose of frame B relative to frame A: to convert a point
/// expressed in frame B into frame A, rotate it by `rotation` then add
/// `translation`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Transform3D {
    pub translation: Vec3,
    pub rotation: Quaternion,
}

impl Transform3D {
    /// Create a transform from a translation and rotation.
    pub fn new(translation: Vec3, rotation: Quaternion) -> Self {
        Self {
            translation,
            rotation,
        }
    }

    /// The identity transform (no translation, no rotation).
    pub fn identity() -> Self {
        Self::new(Vec3::zero(), Quaternion::identity())
    }

    /// Compose two transforms: `self` applied first, then `other`.
    ///
    /// If `self` = T_A_B and `other` = T_B_C, the result is T_A_C.
    pub fn compose(self, other: Self) -> Self {
        // Rotate other's translation by self's rotation, then add.
        let translated = self.translation.add(self.rotation.rotate(other.translation));
        let rotated = self.rotation.mul(other.rotation);
        Self::new(translated, rotated)
    }

    /// The inverse transform: T_A_B becomes T_B_A.
    pub fn inverse(self) -> Self {
        let rotation = self.rotation.conjugate();
        Self::new(rotation.rotate(self.translation).neg(), rotation)
    }

    /// `other` expressed relative to `self`: `self⁻¹ ∘ other`.
    ///
    /// If `self` = T_W_A and `other` = T_W_B, the result is T_A_B.
    pub fn difference(self, other: Self) -> Self {
        self.inverse().compose(other)
    }

    /// Same translation with the rotation rescaled to unit length; a zero or
    /// non-finite rotation becomes the identity.
    pub fn normalized(self) -> Self {
        Self::new(self.translation, self.rotation.normalized())
    }

    pub fn is_finite(self) -> bool {
        self.translation.is_finite()
            && self.rotation.w.is_finite()
            && self.rotation.x.is_finite()
            && self.rotation.y.is_finite()
            && self.rotation.z.is_finite()
    }
}

impl fmt::Display for Transform3D {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "t=({:.4}, {:.4}, {:.4}) q=({:.4}, {:.4}, {:.4}, {:.4})",
            self.translation.x,
            self.translation.y,
            self.translation.z,
            self.rotation.x,
            self.rotation.y,
            self.rotation.z,
            self.rotation.w,
        )
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Message conversions
// ────────────────────────────────────────────────────────────────────────────

impl From<Vector3Msg> for Vec3 {
    fn from(v: Vector3Msg) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Vec3> for Vector3Msg {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<QuaternionMsg> for Quaternion {
    /// Renormalises; zero or non-finite input becomes the identity.
    fn from(q: QuaternionMsg) -> Self {
        Self::new(q.w, q.x, q.y, q.z).normalized()
    }
}

impl From<Quaternion> for QuaternionMsg {
    fn from(q: Quaternion) -> Self {
        Self::new(q.x, q.y, q.z, q.w)
    }
}

impl From<&PoseMsg> for Transform3D {
    fn from(p: &PoseMsg) -> Self {
        Self::new(p.position.into(), p.orientation.into())
    }
}

impl From<Transform3D> for PoseMsg {
    fn from(t: Transform3D) -> Self {
        Self {
            position: t.translation.into(),
            orientation: t.rotation.into(),
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// StampedPose
// ────────────────────────────────────────────────────────────────────────────

/// A pose with the frame it belongs to and the time it was observed.
///
/// `stamp` is `None` until the pose has been produced from a real
/// observation; velocity models refuse to difference against it.
#[derive(Debug, Clone, PartialEq)]
pub struct StampedPose {
    pub pose: Transform3D,
    pub frame_id: String,
    pub stamp: Option<f64>,
}

impl StampedPose {
    pub fn new(pose: Transform3D, frame_id: impl Into<String>, stamp: f64) -> Self {
        Self {
            pose,
            frame_id: frame_id.into(),
            stamp: Some(stamp),
        }
    }

    /// Identity pose at the origin of `frame_id` with no timestamp.
    pub fn unset(frame_id: impl Into<String>) -> Self {
        Self {
            pose: Transform3D::identity(),
            frame_id: frame_id.into(),
            stamp: None,
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// TfEngine
// ────────────────────────────────────────────────────────────────────────────

/// A graph of named reference frames and the [`Transform3D`]s that relate
/// them.
///
/// Frames are identified by arbitrary string names (e.g. `"odom"`,
/// `"footprint"`, `"camera_link"`).  An edge `parent → child` stores
/// T_parent_child; lookups may walk it in either direction, using the
/// inverse when walking child to parent.
#[derive(Debug, Default)]
pub struct TfEngine {
    /// `edges[parent][child] = T_parent_child`
    edges: HashMap<String, HashMap<String, Transform3D>>,
    /// `reverse[child]` = parents that have an edge into `child`
    reverse: HashMap<String, HashSet<String>>,
}

impl TfEngine {
    /// Create an empty TF engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update the transform from `parent_frame` to `child_frame`.
    pub fn set_transform(&mut self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        self.edges
            .entry(parent_frame.to_string())
            .or_default()
            .insert(child_frame.to_string(), transform);
        self.reverse
            .entry(child_frame.to_string())
            .or_default()
            .insert(parent_frame.to_string());
    }

    /// `true` if `frame` appears on any edge.
    pub fn knows(&self, frame: &str) -> bool {
        self.edges.contains_key(frame) || self.reverse.contains_key(frame)
    }

    /// Compute T_target_source: the pose of `source_frame` expressed in
    /// `target_frame`.
    ///
    /// Returns `None` if the two frames are not connected.
    pub fn lookup(&self, target_frame: &str, source_frame: &str) -> Option<Transform3D> {
        if target_frame == source_frame {
            return Some(Transform3D::identity());
        }

        // BFS over the frame graph; each queue item carries T_target_current.
        let mut queue: VecDeque<(String, Transform3D)> = VecDeque::new();
        let mut visited: HashSet<String> = HashSet::new();

        queue.push_back((target_frame.to_string(), Transform3D::identity()));
        visited.insert(target_frame.to_string());

        while let Some((current, accumulated)) = queue.pop_front() {
            for (next, step) in self.neighbours(&current) {
                if visited.contains(&next) {
                    continue;
                }
                let composed = accumulated.compose(step);
                if next == source_frame {
                    return Some(composed);
                }
                visited.insert(next.clone());
                queue.push_back((next, composed));
            }
        }

        None
    }

    /// Every frame one edge away from `frame`, with T_frame_next.
    fn neighbours(&self, frame: &str) -> Vec<(String, Transform3D)> {
        let mut out = Vec::new();
        if let Some(children) = self.edges.get(frame) {
            out.extend(children.iter().map(|(c, t)| (c.clone(), *t)));
        }
        if let Some(parents) = self.reverse.get(frame) {
            for parent in parents {
                if let Some(t) = self.edges.get(parent).and_then(|m| m.get(frame)) {
                    out.push((parent.clone(), t.inverse()));
                }
            }
        }
        out
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Provider seam
// ────────────────────────────────────────────────────────────────────────────

/// Source of the current rigid transform between two named frames.
///
/// `lookup_transform(target, source)` returns T_target_source.  A failed
/// lookup (unknown frame, stale data, disconnected tree) must be reported as
/// [`OdomError::TransformUnavailable`] rather than a default transform.
#[async_trait]
pub trait FrameTransformProvider: Send + Sync {
    async fn lookup_transform(&self, target: &str, source: &str) -> Result<Transform3D, OdomError>;
}

/// In-process provider over a [`TfEngine`], for static extrinsics, mapped
/// landmarks, and simulation.
#[derive(Debug, Default)]
pub struct StaticTransformProvider {
    tree: RwLock<TfEngine>,
}

impl StaticTransformProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register or update an edge.  Usable while the provider is shared.
    pub fn set_transform(&self, parent_frame: &str, child_frame: &str, transform: Transform3D) {
        let mut tree = self.tree.write().unwrap_or_else(|p| p.into_inner());
        tree.set_transform(parent_frame, child_frame, transform);
    }

    /// Builder-style [`set_transform`](Self::set_transform).
    pub fn with_transform(self, parent_frame: &str, child_frame: &str, transform: Transform3D) -> Self {
        self.set_transform(parent_frame, child_frame, transform);
        self
    }
}

#[async_trait]
impl FrameTransformProvider for StaticTransformProvider {
    async fn lookup_transform(&self, target: &str, source: &str) -> Result<Transform3D, OdomError> {
        let tree = self.tree.read().unwrap_or_else(|p| p.into_inner());
        tree.lookup(target, source).ok_or_else(|| {
            let details = if tree.knows(target) && tree.knows(source) {
                "frames are not connected"
            } else {
                "unknown frame"
            };
            debug!(target_frame = target, source_frame = source, details, "transform lookup failed");
            OdomError::TransformUnavailable {
                target: target.to_string(),
                source_frame: source.to_string(),
                details: details.to_string(),
            }
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_1_SQRT_2, FRAC_PI_2, FRAC_PI_4};

    const TOL: f64 = 1e-9;

    fn assert_identity(t: Transform3D) {
        assert!(t.translation.norm() < TOL, "translation {:?}", t.translation);
        // q and -q are the same rotation.
        assert!((t.rotation.w.abs() - 1.0).abs() < TOL, "rotation {:?}", t.rotation);
        assert!(t.rotation.x.abs() < TOL);
        assert!(t.rotation.y.abs() < TOL);
        assert!(t.rotation.z.abs() < TOL);
    }

    fn sample_transforms() -> Vec<Transform3D> {
        vec![
            Transform3D::identity(),
            Transform3D::new(Vec3::new(1.0, -2.0, 0.5), Quaternion::identity()),
            Transform3D::new(Vec3::new(0.3, 0.1, -4.0), Quaternion::from_rpy(0.2, -0.4, 1.3)),
            Transform3D::new(Vec3::new(-7.0, 2.5, 1.0), Quaternion::from_rpy(3.0, 0.1, -2.9)),
        ]
    }

    // ── Quaternion ──────────────────────────────────────────────────────────

    #[test]
    fn quaternion_identity_rotate_is_noop() {
        let r = Quaternion::identity().rotate(Vec3::new(1.0, 2.0, 3.0));
        assert!((r.x - 1.0).abs() < TOL);
        assert!((r.y - 2.0).abs() < TOL);
        assert!((r.z - 3.0).abs() < TOL);
    }

    #[test]
    fn quaternion_90deg_yaw_rotates_x_to_y() {
        // 90° rotation around Z axis: (cos45°, 0, 0, sin45°)
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let r = q.rotate(Vec3::new(1.0, 0.0, 0.0));
        assert!(r.x.abs() < TOL, "x should be ~0, got {}", r.x);
        assert!((r.y - 1.0).abs() < TOL, "y should be ~1, got {}", r.y);
        assert!(r.z.abs() < TOL);
    }

    #[test]
    fn zero_quaternion_normalizes_to_identity() {
        let q = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        assert!(q.is_zero());
        assert_eq!(q.normalized(), Quaternion::identity());
    }

    #[test]
    fn non_finite_quaternion_normalizes_to_identity() {
        let q = Quaternion::new(f64::NAN, 0.0, 1.0, 0.0);
        assert_eq!(q.normalized(), Quaternion::identity());
        let q = Quaternion::new(f64::INFINITY, 0.0, 0.0, 0.0);
        assert_eq!(q.normalized(), Quaternion::identity());
    }

    #[test]
    fn raw_message_quaternion_is_renormalized() {
        let q: Quaternion = QuaternionMsg::new(0.0, 0.0, 2.0, 2.0).into();
        assert!((q.norm() - 1.0).abs() < TOL);
        assert!((q.z - FRAC_1_SQRT_2).abs() < TOL);
    }

    #[test]
    fn rpy_roundtrip_away_from_gimbal_lock() {
        let (roll, pitch, yaw) = (0.3, -0.7, 2.1);
        let (r, p, y) = Quaternion::from_rpy(roll, pitch, yaw).to_rpy();
        assert!((r - roll).abs() < TOL);
        assert!((p - pitch).abs() < TOL);
        assert!((y - yaw).abs() < TOL);
    }

    #[test]
    fn rpy_of_pure_yaw() {
        let q = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let (r, p, y) = q.to_rpy();
        assert!(r.abs() < TOL);
        assert!(p.abs() < TOL);
        assert!((y - FRAC_PI_2).abs() < TOL);
    }

    #[test]
    fn rpy_at_gimbal_lock_is_finite() {
        let q = Quaternion::from_rpy(0.0, FRAC_PI_2, 0.0);
        let (r, p, y) = q.to_rpy();
        assert!(r.is_finite() && p.is_finite() && y.is_finite());
        assert!((p - FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn log_of_yaw_rotation_is_axis_angle() {
        let v = Quaternion::from_rpy(0.0, 0.0, FRAC_PI_4).log();
        assert!(v.x.abs() < TOL && v.y.abs() < TOL);
        assert!((v.z - FRAC_PI_4).abs() < TOL);
    }

    // ── Transform3D ─────────────────────────────────────────────────────────

    #[test]
    fn transform_compose_translations_add() {
        let t1 = Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity());
        let t2 = Transform3D::new(Vec3::new(2.0, 0.0, 0.0), Quaternion::identity());
        assert!((t1.compose(t2).translation.x - 3.0).abs() < TOL);
    }

    #[test]
    fn inverse_composes_to_identity_both_ways() {
        for a in sample_transforms() {
            assert_identity(a.inverse().compose(a));
            assert_identity(a.compose(a.inverse()));
        }
    }

    #[test]
    fn difference_with_itself_is_identity() {
        for a in sample_transforms() {
            assert_identity(a.difference(a));
        }
    }

    #[test]
    fn difference_recovers_relative_transform() {
        let samples = sample_transforms();
        let a = samples[2];
        let rel = samples[3];
        let b = a.compose(rel);
        let d = a.difference(b);
        assert!(d.translation.sub(rel.translation).norm() < 1e-9);
        let residual = d.rotation.conjugate().mul(rel.rotation);
        assert_identity(Transform3D::new(Vec3::zero(), residual));
    }

    #[test]
    fn compose_is_associative() {
        let s = sample_transforms();
        let left = s[1].compose(s[2]).compose(s[3]);
        let right = s[1].compose(s[2].compose(s[3]));
        assert_identity(left.difference(right));
    }

    #[test]
    fn compose_is_not_commutative() {
        let a = Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::from_rpy(0.0, 0.0, FRAC_PI_2));
        let b = Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity());
        let ab = a.compose(b);
        let ba = b.compose(a);
        assert!(ab.translation.sub(ba.translation).norm() > 0.5);
    }

    #[test]
    fn pose_msg_roundtrip_normalizes() {
        let msg = PoseMsg {
            position: Vector3Msg::new(1.0, 2.0, 3.0),
            orientation: QuaternionMsg::new(0.0, 0.0, 0.0, 0.0),
        };
        let t = Transform3D::from(&msg);
        assert_eq!(t.rotation, Quaternion::identity());
        let back = PoseMsg::from(t);
        assert_eq!(back.position, msg.position);
        assert_eq!(back.orientation, QuaternionMsg::identity());
    }

    #[test]
    fn normalized_transform_keeps_translation_and_fixes_scale() {
        let skewed = Transform3D::new(Vec3::new(1.0, -2.0, 0.5), Quaternion::new(0.0, 0.0, 0.0, 3.0));
        let t = skewed.normalized();
        assert_eq!(t.translation, skewed.translation);
        assert!((t.rotation.norm() - 1.0).abs() < TOL);
        assert!((t.rotation.z - 1.0).abs() < TOL);

        let zero = Transform3D::new(Vec3::new(4.0, 0.0, 0.0), Quaternion::new(0.0, 0.0, 0.0, 0.0));
        assert_eq!(zero.normalized().rotation, Quaternion::identity());
    }

    #[test]
    fn non_finite_translation_is_detected() {
        let t = Transform3D::new(Vec3::new(f64::NAN, 0.0, 0.0), Quaternion::identity());
        assert!(!t.is_finite());
        assert!(Transform3D::identity().is_finite());
    }

    // ── TfEngine ────────────────────────────────────────────────────────────

    #[test]
    fn lookup_same_frame_returns_identity() {
        let tf = TfEngine::new();
        assert_eq!(tf.lookup("odom", "odom"), Some(Transform3D::identity()));
    }

    #[test]
    fn lookup_composed_chain() {
        let mut tf = TfEngine::new();
        tf.set_transform(
            "odom",
            "footprint",
            Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()),
        );
        tf.set_transform(
            "footprint",
            "camera_link",
            Transform3D::new(Vec3::new(0.5, 0.0, 0.0), Quaternion::identity()),
        );
        let t = tf.lookup("odom", "camera_link").unwrap();
        assert!((t.translation.x - 1.5).abs() < TOL);
    }

    #[test]
    fn lookup_walks_edges_backwards() {
        let mut tf = TfEngine::new();
        let edge = Transform3D::new(Vec3::new(0.2, 0.0, 0.4), Quaternion::from_rpy(0.0, 0.0, 1.0));
        tf.set_transform("footprint", "camera_link", edge);
        let back = tf.lookup("camera_link", "footprint").unwrap();
        assert_identity(back.compose(edge));
    }

    #[test]
    fn lookup_respects_rotation_in_chain() {
        // footprint is at odom origin, rotated 90° around Z.
        // camera is 1 m forward in footprint (local +X) → (0, 1, 0) in odom.
        let q90z = Quaternion::new(FRAC_1_SQRT_2, 0.0, 0.0, FRAC_1_SQRT_2);
        let mut tf = TfEngine::new();
        tf.set_transform("odom", "footprint", Transform3D::new(Vec3::zero(), q90z));
        tf.set_transform(
            "footprint",
            "camera_link",
            Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()),
        );
        let t = tf.lookup("odom", "camera_link").unwrap();
        assert!(t.translation.x.abs() < TOL, "x={}", t.translation.x);
        assert!((t.translation.y - 1.0).abs() < TOL, "y={}", t.translation.y);
    }

    #[test]
    fn lookup_no_path_returns_none() {
        let mut tf = TfEngine::new();
        tf.set_transform("odom", "footprint", Transform3D::identity());
        tf.set_transform("map", "bin_footprint", Transform3D::identity());
        assert!(tf.lookup("odom", "bin_footprint").is_none());
        assert!(tf.lookup("odom", "ghost_frame").is_none());
    }

    #[test]
    fn set_transform_overrides_previous() {
        let mut tf = TfEngine::new();
        tf.set_transform(
            "odom",
            "bin_footprint",
            Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()),
        );
        tf.set_transform(
            "odom",
            "bin_footprint",
            Transform3D::new(Vec3::new(5.0, 0.0, 0.0), Quaternion::identity()),
        );
        let t = tf.lookup("odom", "bin_footprint").unwrap();
        assert!((t.translation.x - 5.0).abs() < TOL);
    }

    // ── StaticTransformProvider ─────────────────────────────────────────────

    #[tokio::test]
    async fn provider_reports_unknown_frame() {
        let provider = StaticTransformProvider::new()
            .with_transform("odom", "bin_footprint", Transform3D::identity());
        let err = provider.lookup_transform("odom", "ghost").await.unwrap_err();
        match err {
            OdomError::TransformUnavailable { target, source_frame, details } => {
                assert_eq!(target, "odom");
                assert_eq!(source_frame, "ghost");
                assert_eq!(details, "unknown frame");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn provider_sees_updates_while_shared() {
        let provider = std::sync::Arc::new(StaticTransformProvider::new());
        assert!(provider.lookup_transform("odom", "bin_footprint").await.is_err());
        provider.set_transform(
            "odom",
            "bin_footprint",
            Transform3D::new(Vec3::new(3.0, 0.0, 0.0), Quaternion::identity()),
        );
        let t = provider.lookup_transform("odom", "bin_footprint").await.unwrap();
        assert!((t.translation.x - 3.0).abs() < TOL);
    }
}
