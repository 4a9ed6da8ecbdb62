//! `fidodom-hal` – collaborator seams for image capture and marker detection.
//!
//! # Modules
//!
//! - [`camera`] – [`ImageSource`][camera::ImageSource] and the
//!   [`CameraFrame`][camera::CameraFrame] it returns.
//! - [`detector`] – [`MarkerDetector`][detector::MarkerDetector], the black
//!   box that finds fiducial markers in a frame.
//! - [`sim`] – simulated cameras and detectors for CI and headless runs.

pub mod camera;
pub mod detector;
pub mod sim;

pub use camera::{CameraFrame, ImageSource};
pub use detector::MarkerDetector;
