//! IPC protocol definitions
//!
//! Newline-delimited JSON, one request and one response per line.

use serde::{Deserialize, Serialize};

use crate::pipeline::{PipelineStats, PipelineStatus};
use crate::types::SourceDescriptor;

/// Requests a client can send to the bridge daemon
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcMessage {
    /// Check if the daemon is alive
    Ping,
    /// Current pipeline state
    Status,
    /// Frame counters and timing
    Stats,
    /// Start (or restart) the pipeline
    Start,
    /// Stop the pipeline; the daemon keeps running
    Stop,
    /// Scan for senders right away
    Rescan,
    /// Bind to a named sender, or go back to auto-detection with `None`
    Select { source: Option<String> },
    /// Advertised senders
    ListSources,
    /// Stop the pipeline and exit the daemon
    Shutdown,
}

/// Responses from the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum IpcResponse {
    /// Simple acknowledgment
    Ok,
    /// Pong response to ping
    Pong,
    /// Error response
    Error { message: String },
    /// Status response
    Status(DaemonStatus),
    /// Statistics response
    Stats(PipelineStats),
    /// Sender list
    Sources { sources: Vec<SourceDescriptor> },
    /// Shutdown acknowledgment
    Stopping,
}

/// Pipeline status plus daemon process details
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Process ID of the daemon
    pub pid: u32,
    /// Daemon uptime in seconds
    pub uptime_seconds: f64,
    pub pipeline: PipelineStatus,
}

impl IpcMessage {
    /// Serialize message to JSON bytes with newline terminator
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(self).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }

    /// Deserialize message from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl IpcResponse {
    /// Serialize response to JSON bytes with newline terminator
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = serde_json::to_vec(self).unwrap_or_default();
        bytes.push(b'\n');
        bytes
    }

    /// Deserialize response from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Create an error response
    pub fn error(message: impl Into<String>) -> Self {
        IpcResponse::Error {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_format() {
        let bytes = IpcMessage::Select {
            source: Some("VRChatCam".into()),
        }
        .to_bytes();
        assert_eq!(bytes.last(), Some(&b'\n'));
        let text = std::str::from_utf8(&bytes).unwrap();
        assert!(text.contains(r#""type":"Select""#));

        let parsed = IpcMessage::from_bytes(br#"{"type":"Select","source":null}"#).unwrap();
        assert_eq!(parsed, IpcMessage::Select { source: None });
    }

    #[test]
    fn test_sources_response() {
        let resp = IpcResponse::Sources {
            sources: vec![SourceDescriptor::new("VRChatCam", 1280, 720)],
        };
        let bytes = resp.to_bytes();
        let parsed = IpcResponse::from_bytes(&bytes[..bytes.len() - 1]).unwrap();
        match parsed {
            IpcResponse::Sources { sources } => {
                assert_eq!(sources.len(), 1);
                assert_eq!(sources[0].name, "VRChatCam");
            }
            other => panic!("unexpected response {:?}", other),
        }
    }

    #[test]
    fn test_unknown_message_rejected() {
        assert!(IpcMessage::from_bytes(br#"{"type":"Reboot"}"#).is_err());
    }
}
