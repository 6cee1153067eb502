//! Error types for AvatarCam
//!
//! Each pipeline stage has its own error enum so the orchestrator can decide
//! per failure whether to retry, reconfigure in place, or surface a
//! diagnostic. [`AvatarCamError`] wraps all of them for callers that only
//! need to report.

use thiserror::Error;

use crate::types::FrameFormat;

/// Result type alias using AvatarCamError
pub type Result<T> = std::result::Result<T, AvatarCamError>;

/// Source discovery failures
///
/// Never fatal: the registry turns these into an empty result plus a log line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiscoveryError {
    /// The discovery mechanism could not be queried
    #[error("Sender query failed: {0}")]
    QueryFailed(String),

    /// A sender is advertised but has stopped publishing
    #[error("Sender '{0}' is stale")]
    Stale(String),
}

/// Failures while connecting to a sender
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectError {
    /// The sender vanished between enumeration and open
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// The transport refused the connection
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),
}

/// Failures while receiving a frame
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReceiveError {
    /// No frame arrived within the timeout
    #[error("Timed out waiting for a frame")]
    Timeout,

    /// The sender explicitly terminated
    #[error("Source closed")]
    SourceClosed,

    /// Resolution or pixel layout changed since the previous frame
    #[error("Source format changed from {previous} to {current}")]
    FormatChanged {
        /// Format of the previous frame
        previous: FrameFormat,
        /// Format the sender now publishes
        current: FrameFormat,
    },

    /// Receive attempted without an open connection
    #[error("Receiver is not open")]
    NotOpen,

    /// Unexpected transport failure
    #[error("Transport error: {0}")]
    Transport(String),
}

/// Virtual camera device failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SinkError {
    /// Another process holds the device
    #[error("Camera device busy: {0}")]
    DeviceBusy(String),

    /// The virtual camera driver is not present
    #[error("Camera device not installed: {0}")]
    DeviceNotInstalled(String),

    /// Writing a frame to the device failed
    #[error("Camera write failed: {0}")]
    WriteFailed(String),

    /// Push attempted without an open device
    #[error("Camera device is not open")]
    NotOpen,
}

/// Pixel conversion failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversionError {
    /// Source or target pixel format cannot be converted
    #[error("Unsupported pixel format: {0}")]
    UnsupportedFormat(String),

    /// Buffer length does not match the declared frame format
    #[error("Frame buffer is {actual} bytes, expected {expected}")]
    BufferSize {
        /// Bytes required by the frame format
        expected: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// Target dimensions are zero
    #[error("Invalid target size {width}x{height}")]
    InvalidSize {
        /// Requested width
        width: u32,
        /// Requested height
        height: u32,
    },

    /// The resampler rejected the frame
    #[error("Resize failed: {0}")]
    Resize(String),
}

impl ConnectError {
    /// Whether retrying later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::SourceNotFound(_) | Self::ConnectionRefused(_))
    }
}

impl ReceiveError {
    /// Whether this error means the connection is gone
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::SourceClosed | Self::Transport(_) | Self::NotOpen)
    }
}

impl SinkError {
    /// Configuration-class errors are surfaced immediately instead of retried
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::DeviceNotInstalled(_))
    }

    /// Whether reopening the device may succeed
    pub fn is_transient(&self) -> bool {
        !self.is_configuration()
    }
}

/// Main error type for AvatarCam operations
#[derive(Debug, Error)]
pub enum AvatarCamError {
    /// Source discovery error
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    /// Source connection error
    #[error("Connect error: {0}")]
    Connect(#[from] ConnectError),

    /// Frame receive error
    #[error("Receive error: {0}")]
    Receive(#[from] ReceiveError),

    /// Virtual camera error
    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),

    /// Pixel conversion error
    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IPC communication error
    #[error("IPC error: {0}")]
    Ipc(String),

    /// No running pipeline to talk to
    #[error("No active pipeline")]
    NoActiveSession,

    /// The pipeline control task has exited
    #[error("Pipeline has shut down")]
    PipelineClosed,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<AvatarCamError>,
    },
}

impl AvatarCamError {
    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an IPC error
    pub fn ipc(msg: impl Into<String>) -> Self {
        Self::Ipc(msg.into())
    }

    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Innermost error, skipping context wrappers
    pub fn root(&self) -> &AvatarCamError {
        match self {
            Self::WithContext { source, .. } => source.root(),
            other => other,
        }
    }

    /// A short hint telling the user what to do about this error
    pub fn user_hint(&self) -> Option<&'static str> {
        match self.root() {
            Self::Connect(ConnectError::SourceNotFound(_)) => Some(
                "Make sure the sending application is running, then check 'avatarcam list-sources'",
            ),
            Self::Connect(ConnectError::ConnectionRefused(_)) => {
                Some("The sender rejected the connection; restart the sending application")
            }
            Self::Sink(SinkError::DeviceBusy(_)) => {
                Some("Another program is using the virtual camera; close it or pick another camera name")
            }
            Self::Sink(SinkError::DeviceNotInstalled(_)) => Some(
                "Install the virtual camera driver (e.g. 'modprobe v4l2loopback') or use the memshare backend",
            ),
            Self::Conversion(ConversionError::UnsupportedFormat(_)) => {
                Some("Pick a packed RGB pixel format (bgra8, rgba8, bgr8, rgb8) in config.toml")
            }
            Self::Config(_) => Some("Check your config.toml ('avatarcam config path' shows where it is)"),
            Self::NoActiveSession | Self::Ipc(_) => {
                Some("Start the bridge first with 'avatarcam run'")
            }
            _ => None,
        }
    }

    /// Whether the user can fix this without a code change
    pub fn is_user_recoverable(&self) -> bool {
        match self.root() {
            Self::Discovery(_) | Self::Connect(_) | Self::Receive(_) => true,
            Self::Sink(_) | Self::Config(_) | Self::NoActiveSession | Self::Ipc(_) => true,
            Self::Conversion(e) => matches!(e, ConversionError::UnsupportedFormat(_)),
            Self::PipelineClosed | Self::Io(_) => false,
            Self::WithContext { .. } => false,
        }
    }
}

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error
    fn context(self, context: impl Into<String>) -> Result<T>;
}

impl<T, E: Into<AvatarCamError>> ResultExt<T> for std::result::Result<T, E> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.into().with_context(context))
    }
}

impl From<toml::de::Error> for AvatarCamError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("Failed to parse config file: {}", err))
    }
}

impl From<serde_json::Error> for AvatarCamError {
    fn from(err: serde_json::Error) -> Self {
        Self::Ipc(format!("Invalid message: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_error_classification() {
        assert!(SinkError::DeviceNotInstalled("x".into()).is_configuration());
        assert!(!SinkError::DeviceBusy("x".into()).is_configuration());
        assert!(SinkError::WriteFailed("x".into()).is_transient());
    }

    #[test]
    fn test_root_skips_context() {
        let err = AvatarCamError::from(SinkError::NotOpen)
            .with_context("a")
            .with_context("b");
        assert!(matches!(err.root(), AvatarCamError::Sink(SinkError::NotOpen)));
    }
}
