//! Velocity estimation from consecutive stamped poses.
//!
//! A [`VelocityModel`] turns the previous and the current [`StampedPose`]
//! into a [`Twist`].  Two strategies are provided:
//!
//! - [`FiniteDifferenceRpy`] – the default.  Takes the rigid difference
//!   `previous⁻¹ ∘ current`, converts its rotation to roll-pitch-yaw, and
//!   divides translation and angles by Δt.  Exact for translation; for
//!   rotation it is a first-order approximation that is only good while the
//!   angular displacement per cycle stays small.
//! - [`RotationLogMap`] – divides the rotation vector `log(Δq)` by Δt, the
//!   exact mean angular velocity about a fixed axis.
//!
//! ```text
//! Δ       = previous⁻¹ ∘ current
//! Δt      = current.stamp − previous.stamp
//! linear  = Δ.translation / Δt
//! angular = rpy(Δ.rotation) / Δt        (FiniteDifferenceRpy)
//!         = log(Δ.rotation) / Δt        (RotationLogMap)
//! ```
//!
//! # Example
//!
//! ```rust
//! use fidodom_perception::transform::{Quaternion, StampedPose, Transform3D, Vec3};
//! use fidodom_perception::velocity::{FiniteDifferenceRpy, VelocityModel};
//!
//! let p0 = StampedPose::new(Transform3D::identity(), "camera_link", 0.0);
//! let p1 = StampedPose::new(
//!     Transform3D::new(Vec3::new(1.0, 0.0, 0.0), Quaternion::identity()),
//!     "camera_link",
//!     1.0,
//! );
//!
//! let twist = FiniteDifferenceRpy.estimate(&p0, &p1).unwrap();
//! assert!((twist.linear.x - 1.0).abs() < 1e-9);
//! ```

use fidodom_types::{TwistMsg, Vector3Msg};
use thiserror::Error;

use crate::transform::{StampedPose, Transform3D, Vec3};

// ────────────────────────────────────────────────────────────────────────────
// Output type
// ────────────────────────────────────────────────────────────────────────────

/// Linear velocity (m/s) and angular velocity (rad/s about X, Y, Z).
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Twist {
    pub linear: Vec3,
    pub angular: Vec3,
}

impl Twist {
    pub fn zero() -> Self {
        Self::default()
    }
}

impl From<Twist> for TwistMsg {
    fn from(t: Twist) -> Self {
        Self {
            linear: Vector3Msg::from(t.linear),
            angular: Vector3Msg::from(t.angular),
        }
    }
}

/// Why a twist could not be computed.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum VelocityError {
    /// One of the poses has never been stamped (first cycle after start).
    #[error("previous pose has no timestamp")]
    MissingTimestamp,
    /// Duplicate or non-monotonic timestamps.
    #[error("non-positive time step {dt} s")]
    NonPositiveInterval { dt: f64 },
    /// The division produced NaN or infinity.
    #[error("velocity is not finite")]
    NonFinite,
}

// ────────────────────────────────────────────────────────────────────────────
// Strategy trait
// ────────────────────────────────────────────────────────────────────────────

/// Strategy for deriving a twist from two consecutive poses.
pub trait VelocityModel: Send + Sync {
    /// Short identifier used in logs, e.g. `"finite_difference_rpy"`.
    fn name(&self) -> &'static str;

    /// Estimate the twist that carried `previous` to `current`.
    fn estimate(&self, previous: &StampedPose, current: &StampedPose) -> Result<Twist, VelocityError>;
}

/// Elapsed time between two poses, rejecting missing or non-positive steps.
pub fn interval(previous: &StampedPose, current: &StampedPose) -> Result<f64, VelocityError> {
    let (Some(t0), Some(t1)) = (previous.stamp, current.stamp) else {
        return Err(VelocityError::MissingTimestamp);
    };
    let dt = t1 - t0;
    if !dt.is_finite() || dt <= 0.0 {
        return Err(VelocityError::NonPositiveInterval { dt });
    }
    Ok(dt)
}

/// `previous⁻¹ ∘ current`, with a zero-quaternion `previous` treated as the
/// identity rotation.
pub fn pose_delta(previous: &StampedPose, current: &StampedPose) -> Transform3D {
    let start = Transform3D::new(previous.pose.translation, previous.pose.rotation.normalized());
    start.difference(current.pose)
}

fn finite(twist: Twist) -> Result<Twist, VelocityError> {
    if twist.linear.is_finite() && twist.angular.is_finite() {
        Ok(twist)
    } else {
        Err(VelocityError::NonFinite)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// FiniteDifferenceRpy
// ────────────────────────────────────────────────────────────────────────────

/// First-order finite difference with roll-pitch-yaw angle deltas.
#[derive(Debug, Clone, Copy, Default)]
pub struct FiniteDifferenceRpy;

impl VelocityModel for FiniteDifferenceRpy {
    fn name(&self) -> &'static str {
        "finite_difference_rpy"
    }

    fn estimate(&self, previous: &StampedPose, current: &StampedPose) -> Result<Twist, VelocityError> {
        let dt = interval(previous, current)?;
        let delta = pose_delta(previous, current);
        let (roll, pitch, yaw) = delta.rotation.to_rpy();
        finite(Twist {
            linear: delta.translation.scale(1.0 / dt),
            angular: Vec3::new(roll, pitch, yaw).scale(1.0 / dt),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// RotationLogMap
// ────────────────────────────────────────────────────────────────────────────

/// Angular velocity from the rotation vector of the pose delta.
#[derive(Debug, Clone, Copy, Default)]
pub struct RotationLogMap;

impl VelocityModel for RotationLogMap {
    fn name(&self) -> &'static str {
        "rotation_log_map"
    }

    fn estimate(&self, previous: &StampedPose, current: &StampedPose) -> Result<Twist, VelocityError> {
        let dt = interval(previous, current)?;
        let delta = pose_delta(previous, current);
        finite(Twist {
            linear: delta.translation.scale(1.0 / dt),
            angular: delta.rotation.log().scale(1.0 / dt),
        })
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Tests
// ────────────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transform::Quaternion;

    const TOL: f64 = 1e-9;

    fn pose(x: f64, y: f64, yaw: f64, stamp: f64) -> StampedPose {
        StampedPose::new(
            Transform3D::new(Vec3::new(x, y, 0.0), Quaternion::from_rpy(0.0, 0.0, yaw)),
            "camera_link",
            stamp,
        )
    }

    #[test]
    fn unit_step_forward_gives_unit_velocity() {
        let twist = FiniteDifferenceRpy
            .estimate(&pose(0.0, 0.0, 0.0, 0.0), &pose(1.0, 0.0, 0.0, 1.0))
            .unwrap();
        assert!((twist.linear.x - 1.0).abs() < TOL);
        assert!(twist.linear.y.abs() < TOL && twist.linear.z.abs() < TOL);
        assert!(twist.angular.norm() < TOL);
    }

    #[test]
    fn linear_velocity_is_expressed_in_previous_frame() {
        // Facing +Y, moving 2 m along world +Y in 0.5 s → 4 m/s forward.
        let p0 = pose(0.0, 0.0, std::f64::consts::FRAC_PI_2, 10.0);
        let p1 = pose(0.0, 2.0, std::f64::consts::FRAC_PI_2, 10.5);
        let twist = FiniteDifferenceRpy.estimate(&p0, &p1).unwrap();
        assert!((twist.linear.x - 4.0).abs() < TOL, "{:?}", twist.linear);
        assert!(twist.linear.y.abs() < TOL);
    }

    #[test]
    fn yaw_rate_from_heading_change() {
        let twist = FiniteDifferenceRpy
            .estimate(&pose(0.0, 0.0, 0.1, 0.0), &pose(0.0, 0.0, 0.3, 0.2))
            .unwrap();
        assert!((twist.angular.z - 1.0).abs() < 1e-6, "{:?}", twist.angular);
        assert!(twist.angular.x.abs() < TOL && twist.angular.y.abs() < TOL);
    }

    #[test]
    fn zero_quaternion_previous_matches_identity_previous() {
        let current = pose(0.5, -0.25, 0.4, 2.0);
        let mut sentinel = pose(0.0, 0.0, 0.0, 1.0);
        sentinel.pose.rotation = Quaternion::new(0.0, 0.0, 0.0, 0.0);
        let explicit = pose(0.0, 0.0, 0.0, 1.0);

        let a = FiniteDifferenceRpy.estimate(&sentinel, &current).unwrap();
        let b = FiniteDifferenceRpy.estimate(&explicit, &current).unwrap();
        assert!(a.linear.is_finite() && a.angular.is_finite());
        assert!(a.linear.sub(b.linear).norm() < TOL);
        assert!(a.angular.sub(b.angular).norm() < TOL);
    }

    #[test]
    fn missing_previous_stamp_is_rejected() {
        let previous = StampedPose::unset("camera_link");
        let err = FiniteDifferenceRpy
            .estimate(&previous, &pose(1.0, 0.0, 0.0, 1.0))
            .unwrap_err();
        assert_eq!(err, VelocityError::MissingTimestamp);
    }

    #[test]
    fn duplicate_stamp_is_rejected() {
        let err = FiniteDifferenceRpy
            .estimate(&pose(0.0, 0.0, 0.0, 4.0), &pose(1.0, 0.0, 0.0, 4.0))
            .unwrap_err();
        assert_eq!(err, VelocityError::NonPositiveInterval { dt: 0.0 });
    }

    #[test]
    fn backwards_clock_is_rejected() {
        let err = RotationLogMap
            .estimate(&pose(0.0, 0.0, 0.0, 5.0), &pose(1.0, 0.0, 0.0, 4.5))
            .unwrap_err();
        assert!(matches!(err, VelocityError::NonPositiveInterval { dt } if dt < 0.0));
    }

    #[test]
    fn log_map_and_rpy_agree_for_pure_yaw() {
        let p0 = pose(0.0, 0.0, 0.0, 0.0);
        let p1 = pose(0.0, 0.0, 0.8, 0.4);
        let rpy = FiniteDifferenceRpy.estimate(&p0, &p1).unwrap();
        let log = RotationLogMap.estimate(&p0, &p1).unwrap();
        assert!((rpy.angular.z - 2.0).abs() < 1e-6);
        assert!((log.angular.z - 2.0).abs() < 1e-6);
    }

    #[test]
    fn log_map_differs_from_rpy_for_compound_rotation() {
        let p0 = StampedPose::new(Transform3D::identity(), "camera_link", 0.0);
        let p1 = StampedPose::new(
            Transform3D::new(Vec3::zero(), Quaternion::from_rpy(0.6, 0.5, 0.7)),
            "camera_link",
            1.0,
        );
        let rpy = FiniteDifferenceRpy.estimate(&p0, &p1).unwrap();
        let log = RotationLogMap.estimate(&p0, &p1).unwrap();
        assert!(rpy.angular.sub(log.angular).norm() > 1e-3);
    }

    #[test]
    fn twist_converts_to_message() {
        let msg = TwistMsg::from(Twist {
            linear: Vec3::new(1.0, 2.0, 3.0),
            angular: Vec3::new(0.1, 0.2, 0.3),
        });
        assert_eq!(msg.linear, Vector3Msg::new(1.0, 2.0, 3.0));
        assert_eq!(msg.angular, Vector3Msg::new(0.1, 0.2, 0.3));
    }
}
