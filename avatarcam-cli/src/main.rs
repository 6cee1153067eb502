//! AvatarCam CLI
//!
//! Shared-texture to virtual camera bridge.
//!
//! # Usage
//!
//! ```bash
//! # List advertised senders
//! avatarcam list-sources
//!
//! # Run the bridge in the foreground
//! avatarcam run
//!
//! # From another terminal
//! avatarcam status
//! avatarcam select VRChatCam --save
//! avatarcam shutdown
//! ```

mod commands;

use anyhow::{Context, Result};
use avatarcam_core::config::default_log_dir;
use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::{warn, Level};
use tracing_appender::non_blocking::{NonBlocking, WorkerGuard};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Environment variable overriding the log filter
const LOG_ENV: &str = "AVATARCAM_LOG";

/// Log file name is `avatarcam.<date>.log`
const LOG_FILE_PREFIX: &str = "avatarcam";

/// Current day plus three older files
const LOG_FILES_KEPT: usize = 4;

/// AvatarCam - shared-texture to virtual camera bridge
#[derive(Parser)]
#[command(name = "avatarcam")]
#[command(version)]
#[command(about = "Bridge shared-texture senders to a virtual camera", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Subcommand to run
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List advertised texture senders
    #[command(alias = "ls")]
    ListSources,

    /// Run the bridge in the foreground
    Run(commands::RunArgs),

    /// Start a stopped pipeline again
    Start,

    /// Stop the running pipeline (the daemon keeps running)
    Stop,

    /// Show status of the running bridge
    Status,

    /// Select a sender by name, or return to auto-detection
    Select(commands::SelectArgs),

    /// Scan for senders right away
    Rescan,

    /// Stop the bridge and exit the daemon
    Shutdown,

    /// Manage the configuration file
    Config(commands::ConfigArgs),

    /// Publish a moving test pattern as a sender
    TestPattern(commands::TestPatternArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };
    // The file always gets at least info
    let file_level = level.max(Level::INFO);

    let stderr = fmt::layer()
        .with_target(false)
        .with_filter(log_filter(level));

    let log_dir = default_log_dir();
    let (file, _log_guard, file_error) = match log_file(&log_dir) {
        Ok((writer, guard)) => {
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(log_filter(file_level));
            (Some(layer), Some(guard), None)
        }
        Err(e) => (None, None, Some(e)),
    };

    tracing_subscriber::registry().with(stderr).with(file).init();
    if let Some(e) = file_error {
        warn!("File logging disabled: {:#}", e);
    }

    match cli.command {
        Commands::ListSources => commands::list_sources().await?,
        Commands::Run(args) => commands::run(args).await?,
        Commands::Start => commands::start().await?,
        Commands::Stop => commands::stop().await?,
        Commands::Status => commands::status().await?,
        Commands::Select(args) => commands::select(args).await?,
        Commands::Rescan => commands::rescan().await?,
        Commands::Shutdown => commands::shutdown().await?,
        Commands::Config(args) => commands::config(args).await?,
        Commands::TestPattern(args) => commands::test_pattern(args).await?,
    }

    Ok(())
}

/// `AVATARCAM_LOG` directives, or `level` for the avatarcam targets
fn log_filter(level: Level) -> EnvFilter {
    match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.is_empty() => EnvFilter::new(directives),
        _ => EnvFilter::new(format!("avatarcam_core={level},avatarcam={level}")),
    }
}

/// Daily rolling log file in `dir`, written from a background thread
///
/// Records are lost if the guard is dropped before the program exits.
fn log_file(dir: &Path) -> Result<(NonBlocking, WorkerGuard)> {
    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let appender = RollingFileAppender::builder()
        .rotation(Rotation::DAILY)
        .filename_prefix(LOG_FILE_PREFIX)
        .filename_suffix("log")
        .max_log_files(LOG_FILES_KEPT)
        .build(dir)
        .with_context(|| format!("Failed to open a log file in {}", dir.display()))?;
    Ok(tracing_appender::non_blocking(appender))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_file_receives_records() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let (writer, guard) = log_file(&logs).unwrap();

        let subscriber = tracing_subscriber::registry().with(
            fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(EnvFilter::new("info")),
        );
        tracing::subscriber::with_default(subscriber, || {
            tracing::info!("bridge started");
            tracing::debug!("not written");
        });
        // Dropping the guard flushes the background writer
        drop(guard);

        let files: Vec<_> = std::fs::read_dir(&logs)
            .unwrap()
            .map(|e| e.unwrap().path())
            .collect();
        assert_eq!(files.len(), 1, "{:?}", files);
        let name = files[0].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("avatarcam.") && name.ends_with(".log"), "{}", name);

        let contents = std::fs::read_to_string(&files[0]).unwrap();
        assert!(contents.contains("bridge started"));
        assert!(contents.contains("INFO"));
        assert!(!contents.contains("not written"));
    }
}
