//! The `MarkerDetector` seam.
//!
//! Image processing and the marker codec live outside this workspace; the
//! fusion engine only needs "given this frame, where is the best marker
//! relative to the camera, if anywhere".

use async_trait::async_trait;
use fidodom_types::{DetectionResult, OdomError};

use crate::camera::CameraFrame;

/// Finds fiducial markers in a camera frame.
#[async_trait]
pub trait MarkerDetector: Send + Sync {
    /// Run detection on `frame`.
    ///
    /// The returned pose, when `number_found > 0`, is expressed in the
    /// camera's optical frame (`frame.info.frame_id`) and stamped with the
    /// frame's capture time.  Finding nothing is `Ok` with
    /// `number_found == 0`, not an error.
    ///
    /// # Errors
    ///
    /// Returns [`OdomError::DetectionFailed`] when the detector itself fails.
    async fn detect(&self, frame: &CameraFrame) -> Result<DetectionResult, OdomError>;

    /// `true` once the detector can accept work.  Probed during startup.
    async fn ready(&self) -> bool {
        true
    }
}
