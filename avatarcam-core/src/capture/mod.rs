//! Shared-texture capture
//!
//! This module handles:
//! - The [`TextureTransport`] seam to the shared-texture subsystem
//! - Sender discovery through [`SourceRegistry`]
//! - Frame acquisition through [`FrameReceiver`]
//! - The file-backed memshare transport

pub mod memshare;
pub mod receiver;
pub mod registry;

pub use memshare::{MemShareSender, MemShareTransport};
pub use receiver::{FrameReceiver, ReceiverState};
pub use registry::{find_matching, select_from, SourceRegistry};

use std::time::Duration;

use crate::error::{ConnectError, DiscoveryError, ReceiveError};
use crate::types::{Frame, SourceDescriptor};

/// A shared-texture subsystem: enumerate senders, connect by name
pub trait TextureTransport: Send + Sync {
    /// Short name for logs
    fn name(&self) -> &'static str;

    /// All currently advertised senders
    fn list_senders(&self) -> Result<Vec<SourceDescriptor>, DiscoveryError>;

    /// Open a connection to the named sender
    fn connect(&self, name: &str) -> Result<Box<dyn TextureConnection>, ConnectError>;
}

/// One open connection to a sender
///
/// Implementations copy the shared resource into an owned buffer before
/// returning. `pull` never reports `FormatChanged`; the receiver derives that.
pub trait TextureConnection: Send {
    /// Block up to `timeout` for the next frame
    fn pull(&mut self, timeout: Duration) -> Result<Frame, ReceiveError>;

    /// Release the connection
    fn close(&mut self);
}
