// src/camera.rs - Webcam acquisition
use image::DynamicImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CameraError {
    /// The device could not be opened. Surfaced to the launcher; restart and
    /// backoff policy live there, not here.
    #[error("camera {index} unavailable: {reason}")]
    Unavailable { index: u32, reason: String },
    #[error("frame capture failed: {0}")]
    Capture(String),
}

/// Scoped handle on the capture device. The stream is stopped when the
/// handle drops, on every exit path.
pub struct CameraSource {
    camera: Camera,
    index: u32,
}

impl CameraSource {
    pub fn open(index: u32) -> Result<Self, CameraError> {
        let format = CameraFormat::new(Resolution::new(640, 480), FrameFormat::MJPEG, 30);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Exact(format));

        let camera =
            Camera::new(CameraIndex::Index(index), requested).map_err(|e| {
                CameraError::Unavailable {
                    index,
                    reason: e.to_string(),
                }
            })?;

        tracing::info!(index, "camera opened");
        Ok(Self { camera, index })
    }

    pub fn read_frame(&mut self) -> Result<DynamicImage, CameraError> {
        if !self.camera.is_stream_open() {
            self.camera
                .open_stream()
                .map_err(|e| CameraError::Unavailable {
                    index: self.index,
                    reason: format!("failed to open stream: {e}"),
                })?;
        }

        let frame = self
            .camera
            .frame()
            .map_err(|e| CameraError::Capture(e.to_string()))?;
        let decoded = frame
            .decode_image::<RgbFormat>()
            .map_err(|e| CameraError::Capture(format!("decode: {e}")))?;

        Ok(DynamicImage::ImageRgb8(decoded))
    }
}

impl Drop for CameraSource {
    fn drop(&mut self) {
        let _ = self.camera.stop_stream();
        tracing::debug!(index = self.index, "camera released");
    }
}
