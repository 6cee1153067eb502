//! List sources command

use anyhow::{Context, Result};
use avatarcam_core::capture::{MemShareTransport, SourceRegistry};
use avatarcam_core::config::ConfigFile;
use avatarcam_core::ipc::{self, IpcClient};
use avatarcam_core::types::SourceDescriptor;
use std::sync::Arc;
use std::time::SystemTime;

/// List advertised texture senders
///
/// Asks the running bridge if there is one, otherwise enumerates directly.
pub async fn list_sources() -> Result<()> {
    println!("AvatarCam - Available Senders\n");

    let file = ConfigFile::load().context("Failed to load configuration")?;
    let selection = file.selection();

    let sources = if ipc::daemon_running().await {
        let mut client = IpcClient::connect().await?;
        client.list_sources().await.context("Failed to list senders")?
    } else {
        let config = file.to_bridge_config().context("Invalid configuration")?;
        let transport = Arc::new(MemShareTransport::from_config(&config.transport));
        let registry = SourceRegistry::new(transport);
        tokio::task::spawn_blocking(move || registry.enumerate()).await?
    };

    if sources.is_empty() {
        println!("No senders found.");
        println!("\nMake sure the sending application is running with its stream camera enabled.");
        println!("'avatarcam test-pattern' publishes a sender for testing.");
        return Ok(());
    }

    println!("{:<3} {:<32} {:<12} {:<10}", "", "Name", "Resolution", "Last frame");
    println!("{}", "-".repeat(60));

    for source in &sources {
        let marker = if selection.accepts(&source.name) { "*" } else { "" };
        println!(
            "{:<3} {:<32} {:<12} {}",
            marker,
            truncate(&source.name, 30),
            format!("{}x{}", source.width, source.height),
            age(source)
        );
    }

    println!("\n* matches the current selection ({})", selection);
    Ok(())
}

fn age(source: &SourceDescriptor) -> String {
    match SystemTime::now().duration_since(source.last_seen_at) {
        Ok(age) if age.as_secs() == 0 => format!("{}ms ago", age.as_millis()),
        Ok(age) => format!("{}s ago", age.as_secs()),
        Err(_) => "just now".to_string(),
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let head: String = s.chars().take(max - 3).collect();
        format!("{}...", head)
    }
}
