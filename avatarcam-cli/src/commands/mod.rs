//! CLI command implementations

mod config;
mod control;
mod list;
mod run;
mod select;
mod status;
mod test_pattern;

pub use config::{config, ConfigArgs};
pub use control::{rescan, shutdown, start, stop};
pub use list::list_sources;
pub use run::{run, RunArgs};
pub use select::{select, SelectArgs};
pub use status::status;
pub use test_pattern::{test_pattern, TestPatternArgs};

use anyhow::{anyhow, Result};
use avatarcam_core::error::AvatarCamError;
use avatarcam_core::ipc::IpcClient;

/// Connect to the running bridge, with a friendly message if there is none
pub(crate) async fn connect_daemon() -> Result<IpcClient> {
    match IpcClient::connect().await {
        Ok(client) => Ok(client),
        Err(AvatarCamError::NoActiveSession) => Err(anyhow!(
            "AvatarCam is not running. Start it with 'avatarcam run'."
        )),
        Err(e) => Err(anyhow!("Failed to reach the running bridge: {}", e)),
    }
}
