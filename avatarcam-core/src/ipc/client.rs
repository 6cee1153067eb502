//! IPC client for CLI commands

use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::protocol::{DaemonStatus, IpcMessage, IpcResponse};
use super::socket_path;
use crate::error::{AvatarCamError, Result};
use crate::pipeline::PipelineStats;
use crate::types::SourceDescriptor;

/// Default connection timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default read/write timeout
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// IPC client for communicating with the daemon
pub struct IpcClient {
    stream: UnixStream,
}

impl IpcClient {
    /// Connect to the daemon on the default socket
    pub async fn connect() -> Result<Self> {
        Self::connect_to(&socket_path()).await
    }

    /// Connect to the daemon listening on `path`
    pub async fn connect_to(path: &Path) -> Result<Self> {
        Self::connect_with_timeout(path, CONNECT_TIMEOUT).await
    }

    pub async fn connect_with_timeout(path: &Path, timeout: Duration) -> Result<Self> {
        if !path.exists() {
            return Err(AvatarCamError::NoActiveSession);
        }

        let stream = tokio::time::timeout(timeout, UnixStream::connect(path))
            .await
            .map_err(|_| AvatarCamError::ipc("Connection timed out"))?
            .map_err(|e| AvatarCamError::ipc(format!("Failed to connect to daemon: {}", e)))?;

        debug!("Connected to daemon at {:?}", path);
        Ok(Self { stream })
    }

    async fn send(&mut self, msg: IpcMessage) -> Result<IpcResponse> {
        let (reader, mut writer) = self.stream.split();

        tokio::time::timeout(IO_TIMEOUT, writer.write_all(&msg.to_bytes()))
            .await
            .map_err(|_| AvatarCamError::ipc("Write timed out"))?
            .map_err(|e| AvatarCamError::ipc(format!("Failed to send message: {}", e)))?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        let read = tokio::time::timeout(IO_TIMEOUT, reader.read_line(&mut line))
            .await
            .map_err(|_| AvatarCamError::ipc("Read timed out"))?
            .map_err(|e| AvatarCamError::ipc(format!("Failed to read response: {}", e)))?;
        if read == 0 {
            return Err(AvatarCamError::ipc("Daemon closed the connection"));
        }

        Ok(IpcResponse::from_bytes(line.trim().as_bytes())?)
    }

    /// Send a request that is answered with a plain acknowledgment
    async fn command(&mut self, msg: IpcMessage) -> Result<()> {
        match self.send(msg).await? {
            IpcResponse::Ok => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    /// Ping the daemon to check if it's alive
    pub async fn ping(&mut self) -> Result<bool> {
        match self.send(IpcMessage::Ping).await {
            Ok(IpcResponse::Pong) => Ok(true),
            Ok(_) | Err(_) => Ok(false),
        }
    }

    pub async fn status(&mut self) -> Result<DaemonStatus> {
        match self.send(IpcMessage::Status).await? {
            IpcResponse::Status(status) => Ok(status),
            other => Err(unexpected(other)),
        }
    }

    pub async fn stats(&mut self) -> Result<PipelineStats> {
        match self.send(IpcMessage::Stats).await? {
            IpcResponse::Stats(stats) => Ok(stats),
            other => Err(unexpected(other)),
        }
    }

    pub async fn list_sources(&mut self) -> Result<Vec<SourceDescriptor>> {
        match self.send(IpcMessage::ListSources).await? {
            IpcResponse::Sources { sources } => Ok(sources),
            other => Err(unexpected(other)),
        }
    }

    pub async fn start(&mut self) -> Result<()> {
        self.command(IpcMessage::Start).await
    }

    /// Stop the pipeline, leaving the daemon running
    pub async fn stop(&mut self) -> Result<()> {
        self.command(IpcMessage::Stop).await
    }

    pub async fn rescan(&mut self) -> Result<()> {
        self.command(IpcMessage::Rescan).await
    }

    /// Bind to `source`, or return to auto-detection with `None`
    pub async fn select(&mut self, source: Option<String>) -> Result<()> {
        self.command(IpcMessage::Select { source }).await
    }

    /// Ask the daemon to exit
    pub async fn shutdown(&mut self) -> Result<()> {
        match self.send(IpcMessage::Shutdown).await? {
            IpcResponse::Stopping => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: IpcResponse) -> AvatarCamError {
    match response {
        IpcResponse::Error { message } => AvatarCamError::Ipc(message),
        other => AvatarCamError::ipc(format!("Unexpected response: {:?}", other)),
    }
}
