//! Virtual camera output
//!
//! Supports:
//! - A memshare camera that republishes output frames under the camera name
//! - v4l2loopback devices (with the `v4l2loopback` feature)
//! - A best-effort preview slot for on-screen display

mod camera;
mod memshare;
mod pacer;
mod preview;
#[cfg(feature = "v4l2loopback")]
mod v4l2;

pub use camera::{CameraSink, PushOutcome, SinkState};
pub use memshare::{default_camera_dir, MemShareCameraBackend};
pub use pacer::FramePacer;
pub use preview::{PreviewSink, PreviewStats};
#[cfg(feature = "v4l2loopback")]
pub use v4l2::V4l2LoopbackBackend;

use std::sync::Arc;

use crate::config::{CameraBackendKind, CameraConfig};
use crate::error::SinkError;
use crate::types::{Frame, SinkConfig};

/// A virtual camera driver
pub trait CameraBackend: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// Open and configure the device
    ///
    /// Returns `DeviceBusy` when another process holds it and
    /// `DeviceNotInstalled` when the driver is absent.
    fn open(&self, config: &SinkConfig) -> Result<Box<dyn CameraDevice>, SinkError>;
}

/// An open virtual camera device
pub trait CameraDevice: Send {
    /// Deliver one frame in the negotiated format
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Release the device
    fn close(&mut self);
}

/// Build the backend selected in the configuration
pub fn create_backend(config: &CameraConfig) -> Arc<dyn CameraBackend> {
    match config.backend {
        CameraBackendKind::MemShare => Arc::new(MemShareCameraBackend::new(default_camera_dir())),
        CameraBackendKind::V4l2Loopback => v4l2_backend(config),
    }
}

#[cfg(feature = "v4l2loopback")]
fn v4l2_backend(config: &CameraConfig) -> Arc<dyn CameraBackend> {
    Arc::new(V4l2LoopbackBackend::new(config.device.clone()))
}

#[cfg(not(feature = "v4l2loopback"))]
fn v4l2_backend(_config: &CameraConfig) -> Arc<dyn CameraBackend> {
    Arc::new(Unavailable)
}

/// Stand-in for a backend compiled out of this build
#[cfg(not(feature = "v4l2loopback"))]
struct Unavailable;

#[cfg(not(feature = "v4l2loopback"))]
impl CameraBackend for Unavailable {
    fn name(&self) -> &'static str {
        "v4l2loopback"
    }

    fn open(&self, _config: &SinkConfig) -> Result<Box<dyn CameraDevice>, SinkError> {
        Err(SinkError::DeviceNotInstalled(
            "built without the v4l2loopback feature".to_string(),
        ))
    }
}
