//! Select command - change the sender the bridge uses

use anyhow::{Context, Result};
use avatarcam_core::config::ConfigFile;
use avatarcam_core::types::SelectionPolicy;
use clap::Args;

use super::connect_daemon;

/// Arguments for the select command
#[derive(Args)]
pub struct SelectArgs {
    /// Sender name to bind to
    #[arg(required_unless_present = "auto")]
    name: Option<String>,

    /// Return to auto-detection
    #[arg(long, conflicts_with = "name")]
    auto: bool,

    /// Remember the choice in the config file
    #[arg(long)]
    save: bool,
}

/// Change the selection of the running bridge, optionally persisting it
pub async fn select(args: SelectArgs) -> Result<()> {
    let source = if args.auto { None } else { args.name.clone() };

    if args.save {
        let mut file = ConfigFile::load().context("Failed to load configuration")?;
        let policy = match &source {
            Some(name) => SelectionPolicy::manual(name.clone()),
            None => SelectionPolicy::auto(file.source.auto_pattern.clone()),
        };
        file.set_selection(&policy);
        file.save().context("Failed to save configuration")?;
        println!("Saved selection: {}", policy);
    }

    match connect_daemon().await {
        Ok(mut client) => {
            client
                .select(source.clone())
                .await
                .context("Failed to change selection")?;
            match source {
                Some(name) => println!("Now using sender '{}'.", name),
                None => println!("Auto-detecting senders."),
            }
            Ok(())
        }
        Err(_) if args.save => {
            println!("AvatarCam is not running; the selection applies on the next 'avatarcam run'.");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
