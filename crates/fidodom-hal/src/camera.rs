//! Generic `ImageSource` trait and supporting types for image-capture hardware.

use async_trait::async_trait;
use fidodom_types::{CameraInfo, OdomError};

/// A raw image frame returned by a camera driver, with the intrinsics needed
/// to interpret it.
#[derive(Debug, Clone)]
pub struct CameraFrame {
    /// Name of the source that produced the frame, e.g. `"rear_cam"`.
    pub source: String,
    /// Capture time in seconds on the transform provider's clock.
    pub stamp: f64,
    /// Pixel encoding, e.g. `"mono8"` or `"rgb8"`.
    pub encoding: String,
    /// Raw pixel data.
    pub data: Vec<u8>,
    pub info: CameraInfo,
}

/// A camera that can be asked for its latest frame on demand.
///
/// Drivers may be transiently unavailable; that is reported as
/// [`OdomError::ImageUnavailable`] and never by blocking forever.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Stable identifier for this source, e.g. `"rear_cam"`.
    fn name(&self) -> &str;

    /// Fetch the most recent frame.
    ///
    /// # Errors
    ///
    /// Returns [`OdomError::ImageUnavailable`] if no frame can be produced
    /// (device disconnected, service down, buffer empty).
    async fn grab(&self) -> Result<CameraFrame, OdomError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct MockCamera {
        name: String,
    }

    #[async_trait]
    impl ImageSource for MockCamera {
        fn name(&self) -> &str {
            &self.name
        }

        async fn grab(&self) -> Result<CameraFrame, OdomError> {
            Ok(CameraFrame {
                source: self.name.clone(),
                stamp: 1.5,
                encoding: "rgb8".to_string(),
                data: vec![0u8; 2 * 2 * 3], // 2×2 RGB24
                info: CameraInfo {
                    frame_id: "rear_cam_optical".to_string(),
                    width: 2,
                    height: 2,
                    fx: 1.0,
                    fy: 1.0,
                    cx: 1.0,
                    cy: 1.0,
                    distortion: Vec::new(),
                },
            })
        }
    }

    #[tokio::test]
    async fn mock_camera_grab() {
        let cam = MockCamera {
            name: "rear_cam".to_string(),
        };
        assert_eq!(cam.name(), "rear_cam");
        let frame = cam.grab().await.unwrap();
        assert_eq!(frame.source, "rear_cam");
        assert_eq!(frame.info.width, 2);
        assert_eq!(frame.data.len(), 12);
    }
}
