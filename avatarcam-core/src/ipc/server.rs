//! IPC server for daemon mode
//!
//! Listens on a Unix socket and forwards client requests to a [`Pipeline`].

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

use super::protocol::{DaemonStatus, IpcMessage, IpcResponse};
use super::socket_path;
use crate::error::{AvatarCamError, Result};
use crate::pipeline::Pipeline;
use crate::types::SelectionPolicy;

/// How long `accept_one` waits before returning to the caller
const ACCEPT_POLL: Duration = Duration::from_millis(100);

/// Serves control requests for one [`Pipeline`]
pub struct IpcServer {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    pipeline: Pipeline,
    /// Pattern used when a client asks to go back to auto-detection
    auto_pattern: String,
    started_at: Instant,
}

/// What to do with the connection after answering a line
enum Next {
    Continue,
    Shutdown,
}

impl IpcServer {
    /// Create a server on the default socket path
    pub fn new(pipeline: Pipeline, auto_pattern: impl Into<String>) -> Self {
        Self::with_socket_path(pipeline, auto_pattern, socket_path())
    }

    pub fn with_socket_path(
        pipeline: Pipeline,
        auto_pattern: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            socket_path: path.into(),
            listener: None,
            pipeline,
            auto_pattern: auto_pattern.into(),
            started_at: Instant::now(),
        }
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Bind the socket, replacing a stale one left by a dead daemon
    pub async fn start(&mut self) -> Result<()> {
        prepare_socket_path(&self.socket_path)?;

        let listener = UnixListener::bind(&self.socket_path).map_err(|e| {
            AvatarCamError::ipc(format!("Cannot bind {:?}: {}", self.socket_path, e))
        })?;
        std::fs::set_permissions(&self.socket_path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| AvatarCamError::ipc(format!("Cannot restrict socket mode: {}", e)))?;

        info!("Control socket ready at {:?}", self.socket_path);
        self.listener = Some(listener);
        Ok(())
    }

    /// Wait briefly for a client and serve it to completion
    ///
    /// Returns false once a client has asked the daemon to shut down.
    pub async fn accept_one(&self) -> Result<bool> {
        let Some(listener) = self.listener.as_ref() else {
            return Err(AvatarCamError::ipc("Server not started"));
        };

        match tokio::time::timeout(ACCEPT_POLL, listener.accept()).await {
            Err(_) => Ok(true),
            Ok(Err(e)) => {
                error!("accept() on control socket failed: {}", e);
                Ok(true)
            }
            Ok(Ok((stream, _))) => {
                debug!("Control client connected");
                Ok(matches!(self.serve_client(stream).await, Next::Continue))
            }
        }
    }

    /// Serve clients until a shutdown request arrives
    pub async fn serve(&self) -> Result<()> {
        while self.accept_one().await? {}
        Ok(())
    }

    async fn serve_client(&self, stream: UnixStream) -> Next {
        let (read_half, mut write_half) = stream.into_split();
        let mut lines = BufReader::new(read_half).lines();

        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("Control client went away");
                    return Next::Continue;
                }
                Err(e) => {
                    error!("Reading control request failed: {}", e);
                    return Next::Continue;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let (response, next) = self.respond(line.trim()).await;
            if let Err(e) = write_half.write_all(&response.to_bytes()).await {
                error!("Writing control response failed: {}", e);
                return Next::Continue;
            }
            if let Next::Shutdown = next {
                return next;
            }
        }
    }

    async fn respond(&self, line: &str) -> (IpcResponse, Next) {
        match IpcMessage::from_bytes(line.as_bytes()) {
            Ok(msg) => self.handle_message(msg).await,
            Err(e) => {
                warn!("Rejecting malformed control request: {}", e);
                (IpcResponse::error(format!("Invalid message: {}", e)), Next::Continue)
            }
        }
    }

    async fn handle_message(&self, msg: IpcMessage) -> (IpcResponse, Next) {
        debug!("Control request: {:?}", msg);
        let response = match msg {
            IpcMessage::Ping => IpcResponse::Pong,
            IpcMessage::Status => IpcResponse::Status(self.daemon_status()),
            IpcMessage::Stats => IpcResponse::Stats(self.pipeline.stats()),
            IpcMessage::ListSources => IpcResponse::Sources {
                sources: self.pipeline.list_sources().await,
            },
            IpcMessage::Start => acknowledge(self.pipeline.start().await),
            IpcMessage::Stop => {
                info!("Client asked to stop the pipeline");
                acknowledge(self.pipeline.stop().await)
            }
            IpcMessage::Rescan => acknowledge(self.pipeline.rescan().await),
            IpcMessage::Select { source } => {
                let policy = source.map_or_else(
                    || SelectionPolicy::auto(self.auto_pattern.clone()),
                    SelectionPolicy::manual,
                );
                acknowledge(self.pipeline.select_source(policy).await)
            }
            IpcMessage::Shutdown => {
                info!("Client asked the daemon to exit");
                if let Err(e) = self.pipeline.shutdown().await {
                    warn!("Pipeline shutdown failed: {}", e);
                }
                return (IpcResponse::Stopping, Next::Shutdown);
            }
        };
        (response, Next::Continue)
    }

    fn daemon_status(&self) -> DaemonStatus {
        DaemonStatus {
            pid: std::process::id(),
            uptime_seconds: self.started_at.elapsed().as_secs_f64(),
            pipeline: self.pipeline.status(),
        }
    }

    /// Remove the socket file
    pub fn cleanup(&self) {
        match std::fs::remove_file(&self.socket_path) {
            Ok(()) => debug!("Removed control socket {:?}", self.socket_path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Could not remove control socket: {}", e),
        }
    }
}

fn acknowledge(result: Result<()>) -> IpcResponse {
    match result {
        Ok(()) => IpcResponse::Ok,
        Err(e) => IpcResponse::error(e.to_string()),
    }
}

impl Drop for IpcServer {
    fn drop(&mut self) {
        self.cleanup();
    }
}

fn prepare_socket_path(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => debug!("Replaced stale socket {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(AvatarCamError::ipc(format!("Cannot remove old socket: {}", e)));
        }
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| AvatarCamError::ipc(format!("Cannot create socket directory: {}", e)))?;
    }
    Ok(())
}
