//! Core types for AvatarCam
//!
//! These types represent the fundamental data structures passed between the
//! capture, conversion and output stages.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::error::ConversionError;
use crate::formats::PixelFormat;

/// Global handle counter for unique connection and device IDs
static HANDLE_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Opaque, process-unique handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Create a new unique handle
    pub fn new() -> Self {
        Self(HANDLE_COUNTER.fetch_add(1, Ordering::SeqCst))
    }

    /// Get the raw handle value
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Handle for an open sender connection
pub type ConnectionHandle = Handle;

/// Handle for an open virtual camera device
pub type DeviceHandle = Handle;

/// Snapshot of an advertised shared-texture sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Sender name, unique among active senders
    pub name: String,
    /// Published width in pixels
    pub width: u32,
    /// Published height in pixels
    pub height: u32,
    /// When the sender last published a frame
    pub last_seen_at: SystemTime,
}

impl SourceDescriptor {
    /// Create a descriptor seen now
    pub fn new(name: impl Into<String>, width: u32, height: u32) -> Self {
        Self {
            name: name.into(),
            width,
            height,
            last_seen_at: SystemTime::now(),
        }
    }

    /// Override the last-seen timestamp
    pub fn with_last_seen(mut self, at: SystemTime) -> Self {
        self.last_seen_at = at;
        self
    }
}

impl std::fmt::Display for SourceDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}x{})", self.name, self.width, self.height)
    }
}

/// Frame geometry and pixel layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FrameFormat {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Pixel layout
    pub pixel_format: PixelFormat,
}

impl FrameFormat {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
        }
    }

    /// Bytes per row (frames are tightly packed)
    pub fn stride(&self) -> usize {
        self.width as usize * self.pixel_format.bytes_per_pixel()
    }

    /// Total buffer size in bytes, `None` for dimensions no buffer can hold
    pub fn buffer_size(&self) -> Option<usize> {
        self.pixel_format.frame_size(self.width, self.height)
    }

    /// Dimensions as a tuple
    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

impl std::fmt::Display for FrameFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{} {}", self.width, self.height, self.pixel_format)
    }
}

/// One video frame in CPU memory
///
/// Frames own their buffer and are immutable once built; conversion produces
/// a new frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    format: FrameFormat,
    data: Vec<u8>,
    /// Presentation timestamp in nanoseconds
    pub pts: u64,
}

impl Frame {
    /// Build a frame, checking the buffer length against the format
    pub fn new(format: FrameFormat, data: Vec<u8>, pts: u64) -> Result<Self, ConversionError> {
        let expected = format.buffer_size().ok_or(ConversionError::InvalidSize {
            width: format.width,
            height: format.height,
        })?;
        if data.len() != expected {
            return Err(ConversionError::BufferSize {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self { format, data, pts })
    }

    pub fn format(&self) -> FrameFormat {
        self.format
    }

    pub fn width(&self) -> u32 {
        self.format.width
    }

    pub fn height(&self) -> u32 {
        self.format.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format.pixel_format
    }

    /// Raw pixel bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Take ownership of the pixel bytes
    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// How the orchestrator picks a sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "lowercase")]
pub enum SelectionPolicy {
    /// First sender whose name contains the pattern
    Auto {
        /// Substring to look for
        pattern: String,
    },
    /// Exactly the named sender
    Manual {
        /// Sender name
        name: String,
    },
}

impl SelectionPolicy {
    /// Auto-detect senders containing `pattern`
    pub fn auto(pattern: impl Into<String>) -> Self {
        Self::Auto {
            pattern: pattern.into(),
        }
    }

    /// Always use the sender called `name`
    pub fn manual(name: impl Into<String>) -> Self {
        Self::Manual { name: name.into() }
    }

    /// Whether `name` satisfies this policy
    pub fn accepts(&self, name: &str) -> bool {
        match self {
            Self::Auto { pattern } => name.contains(pattern.as_str()),
            Self::Manual { name: wanted } => name == wanted,
        }
    }
}

impl Default for SelectionPolicy {
    fn default() -> Self {
        Self::auto("VRC")
    }
}

impl std::fmt::Display for SelectionPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto { pattern } => write!(f, "auto(*{}*)", pattern),
            Self::Manual { name } => write!(f, "manual({})", name),
        }
    }
}

/// Negotiated output format of the virtual camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkFormat {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub pixel_format: PixelFormat,
}

impl SinkFormat {
    /// Frame format every pushed frame must have
    pub fn frame_format(&self) -> FrameFormat {
        FrameFormat::new(self.width, self.height, self.pixel_format)
    }
}

impl std::fmt::Display for SinkFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}x{}@{} {}",
            self.width, self.height, self.fps, self.pixel_format
        )
    }
}

/// Everything needed to open the virtual camera
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    /// Device name shown to consumers
    pub name: String,
    /// Negotiated format
    pub format: SinkFormat,
}

/// Nanoseconds since the Unix epoch, saturating
pub fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_are_unique() {
        let a = Handle::new();
        let b = Handle::new();
        assert_ne!(a, b);
        assert!(b.as_u64() > a.as_u64());
    }

    #[test]
    fn test_frame_rejects_wrong_size() {
        let format = FrameFormat::new(4, 2, PixelFormat::Bgra8);
        assert!(Frame::new(format, vec![0; 32], 0).is_ok());
        let err = Frame::new(format, vec![0; 31], 0).unwrap_err();
        assert_eq!(
            err,
            ConversionError::BufferSize {
                expected: 32,
                actual: 31
            }
        );
    }

    #[test]
    fn test_policy_accepts() {
        assert!(SelectionPolicy::auto("VRC").accepts("VRChatCam"));
        assert!(!SelectionPolicy::auto("VRC").accepts("OBS"));
        assert!(SelectionPolicy::manual("OBS").accepts("OBS"));
        assert!(!SelectionPolicy::manual("OBS").accepts("OBS2"));
    }
}
