//! Start, stop, rescan and shutdown commands for a running bridge

use anyhow::{Context, Result};

use super::connect_daemon;

/// Start a stopped pipeline again
pub async fn start() -> Result<()> {
    let mut client = connect_daemon().await?;
    client.start().await.context("Failed to start pipeline")?;
    println!("Pipeline started.");
    Ok(())
}

/// Stop the running pipeline and release the sender and camera
pub async fn stop() -> Result<()> {
    let mut client = connect_daemon().await?;
    client.stop().await.context("Failed to stop pipeline")?;
    println!("Pipeline stopped. The camera has been released.");
    println!("Resume with 'avatarcam start' or exit with 'avatarcam shutdown'.");
    Ok(())
}

/// Ask the running bridge to scan for senders right away
pub async fn rescan() -> Result<()> {
    let mut client = connect_daemon().await?;
    client.rescan().await.context("Failed to rescan")?;
    println!("Rescan requested.");
    Ok(())
}

/// Stop the bridge and exit the daemon
pub async fn shutdown() -> Result<()> {
    let mut client = connect_daemon().await?;
    client.shutdown().await.context("Failed to shut down")?;
    println!("AvatarCam is shutting down.");
    Ok(())
}
