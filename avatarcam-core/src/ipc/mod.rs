//! IPC for daemon mode
//!
//! Unix socket communication between `avatarcam run` and the other CLI
//! commands (`stop`, `status`, `select`, ...).

mod client;
mod protocol;
mod server;

pub use client::IpcClient;
pub use protocol::{DaemonStatus, IpcMessage, IpcResponse};
pub use server::IpcServer;

use std::path::{Path, PathBuf};

/// Get the IPC socket path
///
/// Uses XDG_RUNTIME_DIR if available, otherwise /tmp
pub fn socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        PathBuf::from(runtime_dir).join("avatarcam.sock")
    } else {
        // SAFETY: getuid has no preconditions and cannot fail
        let uid = unsafe { libc::getuid() };
        PathBuf::from(format!("/tmp/avatarcam-{}.sock", uid))
    }
}

/// Check if a daemon is listening on the default socket and answers pings
pub async fn daemon_running() -> bool {
    daemon_running_at(&socket_path()).await
}

/// Check if a daemon is listening on `path` and answers pings
pub async fn daemon_running_at(path: &Path) -> bool {
    if !path.exists() {
        return false;
    }
    match IpcClient::connect_to(path).await {
        Ok(mut client) => matches!(client.ping().await, Ok(true)),
        Err(_) => false,
    }
}
