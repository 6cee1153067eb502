//! Frame acquisition from one sender

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::{TextureConnection, TextureTransport};
use crate::error::{ConnectError, ReceiveError};
use crate::types::{ConnectionHandle, Frame, FrameFormat, SourceDescriptor};

/// Lifecycle of a [`FrameReceiver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiverState {
    Closed,
    Opening,
    Open,
}

/// Owns at most one connection to a sender and pulls frames from it
pub struct FrameReceiver {
    transport: Arc<dyn TextureTransport>,
    state: ReceiverState,
    connection: Option<Box<dyn TextureConnection>>,
    handle: Option<ConnectionHandle>,
    source: Option<SourceDescriptor>,
    last_format: Option<FrameFormat>,
    /// Frame that carried a format change, returned by the next receive
    pending: Option<Frame>,
}

impl FrameReceiver {
    pub fn new(transport: Arc<dyn TextureTransport>) -> Self {
        Self {
            transport,
            state: ReceiverState::Closed,
            connection: None,
            handle: None,
            source: None,
            last_format: None,
            pending: None,
        }
    }

    pub fn state(&self) -> ReceiverState {
        self.state
    }

    /// Handle of the open connection
    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.handle
    }

    /// Sender the receiver is connected to
    pub fn source(&self) -> Option<&SourceDescriptor> {
        self.source.as_ref()
    }

    /// Format of the most recent frame
    pub fn current_format(&self) -> Option<FrameFormat> {
        self.last_format
    }

    /// Connect to a sender, closing any previous connection first
    pub fn open(&mut self, descriptor: &SourceDescriptor) -> Result<ConnectionHandle, ConnectError> {
        self.close();
        self.state = ReceiverState::Opening;

        match self.transport.connect(&descriptor.name) {
            Ok(connection) => {
                let handle = ConnectionHandle::new();
                info!("Opened source '{}' as {}", descriptor.name, handle);
                self.connection = Some(connection);
                self.handle = Some(handle);
                self.source = Some(descriptor.clone());
                self.state = ReceiverState::Open;
                Ok(handle)
            }
            Err(e) => {
                debug!("Failed to open source '{}': {}", descriptor.name, e);
                self.state = ReceiverState::Closed;
                Err(e)
            }
        }
    }

    /// Wait up to `timeout` for the next frame
    ///
    /// A frame whose format differs from the previous one is reported as
    /// `FormatChanged`; the receiver adopts the new format and returns that
    /// frame from the next call. `SourceClosed` and transport failures close
    /// the connection.
    pub fn receive_frame(&mut self, timeout: Duration) -> Result<Frame, ReceiveError> {
        if let Some(frame) = self.pending.take() {
            return Ok(frame);
        }

        let connection = self.connection.as_mut().ok_or(ReceiveError::NotOpen)?;
        let frame = match connection.pull(timeout) {
            Ok(frame) => frame,
            Err(e) => {
                if e.is_disconnect() {
                    debug!("Source connection ended: {}", e);
                    self.close();
                }
                return Err(e);
            }
        };

        let current = frame.format();
        match self.last_format.replace(current) {
            Some(previous) if previous != current => {
                info!("Source format changed: {} -> {}", previous, current);
                self.pending = Some(frame);
                Err(ReceiveError::FormatChanged { previous, current })
            }
            _ => Ok(frame),
        }
    }

    /// Release the connection; safe to call in any state
    pub fn close(&mut self) {
        if let Some(mut connection) = self.connection.take() {
            connection.close();
            if let Some(handle) = self.handle {
                info!("Closed source connection {}", handle);
            }
        }
        self.handle = None;
        self.source = None;
        self.last_format = None;
        self.pending = None;
        self.state = ReceiverState::Closed;
    }
}

impl Drop for FrameReceiver {
    fn drop(&mut self) {
        self.close();
    }
}
