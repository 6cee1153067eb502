//! Config command - inspect and create the config file

use anyhow::{Context, Result};
use avatarcam_core::config::{sample_config, BridgeConfig, ConfigFile};
use clap::{Args, Subcommand};
use std::path::Path;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Print where the config file lives
    Path,

    /// Print the effective settings
    Show,

    /// Write the sample config to the default location
    Init {
        /// Replace an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Print the sample config to stdout
    Sample,
}

pub async fn config(args: ConfigArgs) -> Result<()> {
    let path = ConfigFile::default_path();
    match args.command {
        ConfigCommand::Path => {
            let note = if path.exists() { "exists" } else { "not created yet" };
            println!("{} ({})", path.display(), note);
        }
        ConfigCommand::Show => show(&path)?,
        ConfigCommand::Init { force } => {
            if ConfigFile::write_sample_to(&path, force)
                .context("Failed to write config file")?
            {
                println!("Wrote {}", path.display());
            } else {
                println!("{} already exists; pass --force to replace it.", path.display());
            }
        }
        ConfigCommand::Sample => print!("{}", sample_config()),
    }
    Ok(())
}

fn show(path: &Path) -> Result<()> {
    let bridge = if path.exists() {
        let file = ConfigFile::load_from(path.to_path_buf())
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        println!("Settings from {}\n", path.display());
        file.to_bridge_config().context("Invalid configuration")?
    } else {
        println!("No config file at {}; showing built-in defaults.", path.display());
        println!("Run 'avatarcam config init' to create one.\n");
        BridgeConfig::default()
    };

    let preview = if bridge.preview.enabled {
        format!(
            "{}x{} @ {} fps",
            bridge.preview.width, bridge.preview.height, bridge.preview.fps
        )
    } else {
        "off".to_string()
    };

    println!("  Source:      {}", bridge.selection);
    println!("  Resolution:  {}", bridge.resolution);
    println!("  Framerate:   {} fps", bridge.fps);
    println!("  Format:      {}", bridge.pixel_format);
    println!("  Camera:      {} ({})", bridge.camera.name, bridge.camera.backend);
    println!("  Preview:     {}", preview);
    println!(
        "  Recovery:    sink budget {}, scan backoff {:?}..{:?}",
        bridge.recovery.sink_retry_budget,
        bridge.recovery.scan_backoff_base,
        bridge.recovery.scan_backoff_max
    );

    for warning in bridge.validate() {
        println!("Warning: {}", warning);
    }
    Ok(())
}
