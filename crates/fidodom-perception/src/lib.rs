//! `fidodom-perception` – geometry for fiducial odometry.
//!
//! # Modules
//!
//! - [`transform`] – [`Transform3D`][transform::Transform3D] rigid-body math
//!   (compose, invert, difference, roll-pitch-yaw) plus the
//!   [`TfEngine`][transform::TfEngine] frame graph and the
//!   [`FrameTransformProvider`][transform::FrameTransformProvider] seam the
//!   fusion engine queries.
//! - [`velocity`] – [`VelocityModel`][velocity::VelocityModel] strategies
//!   that turn two consecutive stamped poses into a twist.

pub mod transform;
pub mod velocity;

pub use transform::{
    FrameTransformProvider, Quaternion, StampedPose, StaticTransformProvider, TfEngine,
    Transform3D, Vec3,
};
pub use velocity::{FiniteDifferenceRpy, RotationLogMap, Twist, VelocityError, VelocityModel};
