//! Run command - the bridge in the foreground

use anyhow::{anyhow, Context, Result};
use avatarcam_core::capture::MemShareTransport;
use avatarcam_core::config::{BridgeConfig, CameraBackendKind, ConfigFile, OutputResolution};
use avatarcam_core::ipc::{self, IpcServer};
use avatarcam_core::output::create_backend;
use avatarcam_core::types::SelectionPolicy;
use avatarcam_core::{PixelFormat, Pipeline, PipelineState, StatusEvent};
use clap::Args;
use std::sync::Arc;
use tokio::signal;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};

/// Arguments for the run command
#[derive(Args)]
pub struct RunArgs {
    /// Bind to this sender instead of auto-detecting
    #[arg(short, long)]
    source: Option<String>,

    /// Auto-detect senders whose name contains this text
    #[arg(short, long, conflicts_with = "source")]
    pattern: Option<String>,

    /// Output size (source, 480p, 720p, 1080p, 1440p, 2160p, WIDTHxHEIGHT)
    #[arg(short, long)]
    resolution: Option<String>,

    /// Output frame rate
    #[arg(short, long)]
    fps: Option<u32>,

    /// Pixel format delivered to the camera (bgra8, rgba8, bgr8, rgb8)
    #[arg(long)]
    pixel_format: Option<String>,

    /// Virtual camera name
    #[arg(long)]
    camera_name: Option<String>,

    /// Camera backend (memshare, v4l2loopback)
    #[arg(long)]
    backend: Option<String>,

    /// Disable the preview stream
    #[arg(long)]
    no_preview: bool,
}

impl RunArgs {
    fn apply(&self, mut config: BridgeConfig) -> Result<BridgeConfig> {
        if let Some(name) = &self.source {
            config.selection = SelectionPolicy::manual(name.clone());
        } else if let Some(pattern) = &self.pattern {
            config.selection = SelectionPolicy::auto(pattern.clone());
        }
        if let Some(resolution) = &self.resolution {
            let resolution: OutputResolution = resolution.parse().map_err(|e| anyhow!("{}", e))?;
            config = config.with_resolution(resolution);
        }
        if let Some(fps) = self.fps {
            config = config.with_fps(fps);
        }
        if let Some(format) = &self.pixel_format {
            let format: PixelFormat = format.parse().map_err(|e| anyhow!("{}", e))?;
            config = config.with_pixel_format(format);
        }
        if let Some(name) = &self.camera_name {
            config = config.with_camera_name(name.clone());
        }
        if let Some(backend) = &self.backend {
            let backend: CameraBackendKind = backend.parse().map_err(|e| anyhow!("{}", e))?;
            config = config.with_camera_backend(backend);
        }
        if self.no_preview {
            config.preview.enabled = false;
        }
        Ok(config)
    }
}

/// Run the bridge until Ctrl+C or a shutdown request
pub async fn run(args: RunArgs) -> Result<()> {
    println!("AvatarCam - Starting Bridge\n");

    if ipc::daemon_running().await {
        return Err(anyhow!(
            "AvatarCam is already running. Use 'avatarcam status' or 'avatarcam shutdown'."
        ));
    }

    let file = ConfigFile::load().context("Failed to load configuration")?;
    let auto_pattern = file.source.auto_pattern.clone();
    let config = args.apply(file.to_bridge_config().context("Invalid configuration")?)?;

    for warning in config.validate() {
        warn!("{}", warning);
        println!("Warning: {}", warning);
    }

    println!("Configuration:");
    println!("  Source:      {}", config.selection);
    println!("  Resolution:  {}", config.resolution);
    println!("  Framerate:   {} fps", config.fps);
    println!("  Format:      {}", config.pixel_format);
    println!("  Camera:      {} ({})", config.camera.name, config.camera.backend);
    println!();

    let transport = Arc::new(MemShareTransport::from_config(&config.transport));
    let backend = create_backend(&config.camera);
    let pipeline =
        Pipeline::spawn(config, transport, backend).context("Failed to create pipeline")?;
    let events = tokio::spawn(print_events(pipeline.subscribe()));

    let mut server = IpcServer::new(pipeline.clone(), auto_pattern);
    server.start().await.context("Failed to start IPC server")?;
    println!("Control socket: {}", server.socket_path().display());

    pipeline.start().await.context("Failed to start pipeline")?;

    println!("Bridge running. Press Ctrl+C to stop...\n");

    let ctrl_c = signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            result = &mut ctrl_c => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl+C: {}", e);
                }
                println!("\nReceived interrupt signal...");
                break;
            }
            accepted = server.accept_one() => match accepted {
                Ok(true) => {}
                Ok(false) => {
                    info!("Shutdown requested via IPC");
                    break;
                }
                Err(e) => {
                    error!("IPC server error: {}", e);
                    break;
                }
            },
        }
    }

    println!("Stopping bridge...");
    pipeline.shutdown().await?;
    server.cleanup();

    let stats = pipeline.stats();
    println!("\n{}", stats);
    if let Some(diagnostic) = pipeline.diagnostic() {
        println!("\nLast diagnostic: {}", diagnostic);
    }
    println!("\nBridge stopped.");

    events.abort();
    Ok(())
}

/// Print state transitions as they happen
///
/// The controller also logs each transition, with a timestamp, through tracing.
async fn print_events(mut events: broadcast::Receiver<StatusEvent>) {
    loop {
        match events.recv().await {
            Ok(event) => println!("{}", describe_event(&event)),
            Err(RecvError::Lagged(n)) => warn!("Missed {} status events", n),
            Err(RecvError::Closed) => break,
        }
    }
}

fn describe_event(event: &StatusEvent) -> String {
    let source = event.source.as_deref().unwrap_or("-");
    let mut line = format!("{} -> {} (source: {})", event.previous, event.state, source);
    if event.state == PipelineState::SinkError {
        if let Some(diagnostic) = &event.diagnostic {
            line.push_str("\n  ");
            line.push_str(diagnostic);
        }
    }
    line
}
