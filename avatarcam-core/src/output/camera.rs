//! Paced virtual camera sink
//!
//! Owns the camera device handle. Frames are delivered in the order they are
//! pushed, at no more than the negotiated frame rate.

use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

use super::{CameraBackend, CameraDevice, FramePacer};
use crate::error::SinkError;
use crate::types::{DeviceHandle, Frame, SinkConfig, SinkFormat};

/// Lifecycle of a [`CameraSink`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Closed,
    Opening,
    /// Device open, nothing delivered yet
    Ready,
    Streaming,
    /// Device failed and was released; `close` or `open` clears this
    Failed,
}

/// What happened to a pushed frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// Written to the device
    Delivered,
    /// Dropped to hold the target rate
    Paced,
    /// Dropped because it does not match the negotiated format
    Mismatched,
}

/// Virtual camera sink
pub struct CameraSink {
    backend: Arc<dyn CameraBackend>,
    state: SinkState,
    device: Option<Box<dyn CameraDevice>>,
    handle: Option<DeviceHandle>,
    config: Option<SinkConfig>,
    pacer: FramePacer,
}

impl CameraSink {
    pub fn new(backend: Arc<dyn CameraBackend>) -> Self {
        Self {
            backend,
            state: SinkState::Closed,
            device: None,
            handle: None,
            config: None,
            pacer: FramePacer::new(30),
        }
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    /// Handle of the open device
    pub fn handle(&self) -> Option<DeviceHandle> {
        self.handle
    }

    /// Negotiated format, if open
    pub fn format(&self) -> Option<SinkFormat> {
        self.config.as_ref().map(|c| c.format)
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Open and configure the device, closing any previous one first
    pub fn open(&mut self, config: &SinkConfig) -> Result<DeviceHandle, SinkError> {
        self.close();
        self.state = SinkState::Opening;

        match self.backend.open(config) {
            Ok(device) => {
                let handle = DeviceHandle::new();
                info!(
                    "Opened {} camera '{}' {} as {}",
                    self.backend.name(),
                    config.name,
                    config.format,
                    handle
                );
                self.device = Some(device);
                self.handle = Some(handle);
                self.config = Some(config.clone());
                self.pacer = FramePacer::new(config.format.fps);
                self.state = SinkState::Ready;
                Ok(handle)
            }
            Err(e) => {
                debug!("Failed to open camera '{}': {}", config.name, e);
                self.state = SinkState::Closed;
                Err(e)
            }
        }
    }

    /// Deliver a frame, subject to pacing
    pub fn push_frame(&mut self, frame: &Frame) -> Result<PushOutcome, SinkError> {
        self.push_frame_at(frame, Instant::now())
    }

    /// Deliver a frame as if pushed at `now`
    pub fn push_frame_at(&mut self, frame: &Frame, now: Instant) -> Result<PushOutcome, SinkError> {
        let (Some(device), Some(config)) = (self.device.as_mut(), self.config.as_ref()) else {
            return Err(SinkError::NotOpen);
        };

        if frame.format() != config.format.frame_format() {
            trace!(
                "Dropping {} frame, camera expects {}",
                frame.format(),
                config.format
            );
            return Ok(PushOutcome::Mismatched);
        }

        if !self.pacer.admit(now) {
            return Ok(PushOutcome::Paced);
        }

        match device.write_frame(frame) {
            Ok(()) => {
                if self.state == SinkState::Ready {
                    debug!("Camera '{}' streaming", config.name);
                    self.state = SinkState::Streaming;
                }
                Ok(PushOutcome::Delivered)
            }
            Err(e) => {
                warn!("Camera '{}' failed: {}", config.name, e);
                self.release();
                self.state = SinkState::Failed;
                Err(e)
            }
        }
    }

    /// Release the device; safe to call in any state
    pub fn close(&mut self) {
        self.release();
        self.state = SinkState::Closed;
    }

    fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            device.close();
            if let Some(handle) = self.handle {
                info!("Closed camera device {}", handle);
            }
        }
        self.handle = None;
        self.config = None;
        self.pacer.reset();
    }
}

impl Drop for CameraSink {
    fn drop(&mut self) {
        self.close();
    }
}
