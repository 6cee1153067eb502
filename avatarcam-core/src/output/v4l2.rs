//! v4l2loopback virtual camera
//!
//! Negotiates the output format on the loopback device and writes frames
//! with plain `write(2)`, which v4l2loopback accepts on output devices.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use tracing::{debug, info};
use v4l::video::Output;
use v4l::{Device, FourCC};

use super::{CameraBackend, CameraDevice};
use crate::error::SinkError;
use crate::types::{Frame, SinkConfig};

/// Backend writing to one v4l2loopback device node
#[derive(Debug, Clone)]
pub struct V4l2LoopbackBackend {
    device: PathBuf,
}

impl V4l2LoopbackBackend {
    pub fn new(device: impl Into<PathBuf>) -> Self {
        Self {
            device: device.into(),
        }
    }
}

fn map_open_error(path: &std::path::Path, e: io::Error) -> SinkError {
    let what = format!("{}: {}", path.display(), e);
    match (e.kind(), e.raw_os_error()) {
        (io::ErrorKind::NotFound, _) | (_, Some(libc::ENODEV)) | (_, Some(libc::ENXIO)) => {
            SinkError::DeviceNotInstalled(what)
        }
        (_, Some(libc::EBUSY)) => SinkError::DeviceBusy(what),
        _ => SinkError::WriteFailed(what),
    }
}

impl CameraBackend for V4l2LoopbackBackend {
    fn name(&self) -> &'static str {
        "v4l2loopback"
    }

    fn open(&self, config: &SinkConfig) -> Result<Box<dyn CameraDevice>, SinkError> {
        let device = Device::with_path(&self.device).map_err(|e| map_open_error(&self.device, e))?;

        let caps = device
            .query_caps()
            .map_err(|e| map_open_error(&self.device, e))?;
        debug!("v4l2 device: {} ({})", caps.card, caps.driver);
        if caps.driver != "v4l2 loopback" {
            debug!("{:?} is driven by '{}', not v4l2loopback", self.device, caps.driver);
        }

        let format = &config.format;
        let mut fmt = Output::format(&device).map_err(|e| map_open_error(&self.device, e))?;
        fmt.width = format.width;
        fmt.height = format.height;
        fmt.fourcc = FourCC::new(&format.pixel_format.fourcc());
        let applied = Output::set_format(&device, &fmt).map_err(|e| map_open_error(&self.device, e))?;

        if applied.width != format.width || applied.height != format.height {
            return Err(SinkError::WriteFailed(format!(
                "device accepted {}x{} instead of {}x{}",
                applied.width, applied.height, format.width, format.height
            )));
        }

        let writer = OpenOptions::new()
            .write(true)
            .open(&self.device)
            .map_err(|e| map_open_error(&self.device, e))?;

        info!(
            "v4l2loopback {:?} configured for {} ({})",
            self.device, format, applied.fourcc
        );
        Ok(Box::new(V4l2Camera {
            _device: device,
            writer: Some(writer),
        }))
    }
}

struct V4l2Camera {
    /// Keeps the negotiated format alive
    _device: Device,
    writer: Option<File>,
}

impl CameraDevice for V4l2Camera {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let writer = self.writer.as_mut().ok_or(SinkError::NotOpen)?;
        writer
            .write_all(frame.data())
            .map_err(|e| SinkError::WriteFailed(e.to_string()))
    }

    fn close(&mut self) {
        self.writer = None;
    }
}
