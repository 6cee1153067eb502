//! Status command - show status of the running bridge

use anyhow::{Context, Result};

use super::connect_daemon;

/// Show status and statistics of the running bridge
pub async fn status() -> Result<()> {
    println!("AvatarCam - Status\n");

    let mut client = connect_daemon().await?;
    let status = client.status().await.context("Failed to query status")?;
    let pipeline = &status.pipeline;

    println!("Daemon:");
    println!("  PID:        {}", status.pid);
    println!("  Uptime:     {:.0}s", status.uptime_seconds);
    println!();
    println!("Pipeline:");
    println!("  State:      {}", pipeline.state);
    println!("  Selection:  {}", pipeline.selection);
    println!("  Source:     {}", pipeline.source.as_deref().unwrap_or("-"));
    match &pipeline.output {
        Some(output) => println!("  Camera:     {} ({})", pipeline.camera_name, output),
        None => println!("  Camera:     {} (closed)", pipeline.camera_name),
    }
    if let Some(diagnostic) = &pipeline.diagnostic {
        println!();
        println!("Diagnostic: {}", diagnostic);
    }

    let stats = client.stats().await.context("Failed to query statistics")?;
    println!();
    println!("Statistics:");
    for line in stats.to_string().lines() {
        println!("  {}", line);
    }

    Ok(())
}
