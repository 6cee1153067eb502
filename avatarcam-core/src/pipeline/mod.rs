//! Capture-convert-output pipeline
//!
//! [`Pipeline`] is a cloneable handle to a control task that owns the state
//! machine. The control task drives two worker threads: acquisition (receive
//! and convert) and output (pace and deliver to the virtual camera). It reacts
//! only to messages: commands from handles, events from the workers, and one
//! timer for scan, cooldown and sink retry deadlines.
//!
//! ```text
//! Idle -> Scanning -> Connecting -> Streaming
//!            ^  ^          |          |  \
//!            |  +----------+          |   +-> SinkError (retry, then terminal)
//!            +---- SourceLost <-------+
//! any state -> Stopped
//! ```

mod controller;
mod state;
mod worker;

pub use state::{Backoff, BlankDetector, PipelineState, StallDetector};
pub use worker::LossReason;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::debug;

use crate::capture::{SourceRegistry, TextureTransport};
use crate::config::BridgeConfig;
use crate::error::{AvatarCamError, Result};
use crate::output::{CameraBackend, PreviewSink};
use crate::performance::{create_metrics, LatencyStats, PipelineMetrics};
use crate::types::{SelectionPolicy, SinkFormat, SourceDescriptor};

use controller::{Command, Controller};

/// Capacity of the command channel
const COMMAND_QUEUE: usize = 16;

/// Capacity of the status event channel
const EVENT_QUEUE: usize = 64;

/// One state transition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub previous: PipelineState,
    pub state: PipelineState,
    /// Sender in use, if any
    pub source: Option<String>,
    /// Persistent diagnostic at the time of the transition
    pub diagnostic: Option<String>,
}

/// Point-in-time view of the pipeline
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStatus {
    pub state: PipelineState,
    /// Sender in use, if any
    pub source: Option<String>,
    /// Active selection policy
    pub selection: SelectionPolicy,
    /// Negotiated camera format
    pub output: Option<SinkFormat>,
    /// Virtual camera name
    pub camera_name: String,
    /// Persistent diagnostic, set for configuration errors and exhausted retries
    pub diagnostic: Option<String>,
}

/// Pipeline statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineStats {
    pub state: PipelineState,
    pub source: Option<String>,
    pub output: Option<SinkFormat>,
    pub frames_received: u64,
    pub frames_delivered: u64,
    /// Dropped to hold the target rate
    pub frames_paced: u64,
    /// Dropped for backpressure or a stale format
    pub frames_dropped: u64,
    pub frames_failed: u64,
    pub preview_frames: u64,
    pub reconnects: u64,
    pub latency: LatencyStats,
    pub uptime_seconds: f64,
}

impl std::fmt::Display for PipelineStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "State:      {}", self.state)?;
        writeln!(f, "Source:     {}", self.source.as_deref().unwrap_or("-"))?;
        match &self.output {
            Some(output) => writeln!(f, "Output:     {}", output)?,
            None => writeln!(f, "Output:     -")?,
        }
        writeln!(
            f,
            "Frames:     {} received, {} delivered, {} paced, {} dropped, {} failed",
            self.frames_received,
            self.frames_delivered,
            self.frames_paced,
            self.frames_dropped,
            self.frames_failed
        )?;
        writeln!(f, "Preview:    {} frames", self.preview_frames)?;
        writeln!(f, "Reconnects: {}", self.reconnects)?;
        writeln!(f, "Timing:     {}", self.latency.format_line())?;
        write!(f, "Uptime:     {:.0}s", self.uptime_seconds)
    }
}

/// State shared between the control task and handles
struct Shared {
    status: RwLock<PipelineStatus>,
    events: broadcast::Sender<StatusEvent>,
    diagnostic: watch::Sender<Option<String>>,
    metrics: Arc<PipelineMetrics>,
    preview: PreviewSink,
    registry: Arc<SourceRegistry>,
}

/// Handle to a running pipeline
///
/// Cheap to clone; all clones talk to the same control task.
#[derive(Clone)]
pub struct Pipeline {
    commands: mpsc::Sender<Command>,
    shared: Arc<Shared>,
}

impl Pipeline {
    /// Spawn the control task on the current tokio runtime
    ///
    /// The pipeline starts in `Idle`; call [`Pipeline::start`] to begin
    /// scanning.
    pub fn spawn(
        config: BridgeConfig,
        transport: Arc<dyn TextureTransport>,
        backend: Arc<dyn CameraBackend>,
    ) -> Result<Self> {
        config.validate_strict().map_err(AvatarCamError::config)?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE);
        let (events, _) = broadcast::channel(EVENT_QUEUE);
        let (diagnostic, _) = watch::channel(None);

        let shared = Arc::new(Shared {
            status: RwLock::new(PipelineStatus {
                state: PipelineState::Idle,
                source: None,
                selection: config.selection.clone(),
                output: None,
                camera_name: config.camera.name.clone(),
                diagnostic: None,
            }),
            events,
            diagnostic,
            metrics: create_metrics(),
            preview: PreviewSink::new(config.preview, config.fps),
            registry: Arc::new(SourceRegistry::new(transport.clone())),
        });

        let controller = Controller::new(config, transport, backend, shared.clone(), command_rx);
        tokio::spawn(controller.run());
        debug!("Pipeline control task spawned");

        Ok(Self {
            commands: command_tx,
            shared,
        })
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(build(tx))
            .await
            .map_err(|_| AvatarCamError::PipelineClosed)?;
        rx.await.map_err(|_| AvatarCamError::PipelineClosed)
    }

    /// Begin scanning; accepted from Idle, Stopped and a terminal SinkError
    pub async fn start(&self) -> Result<()> {
        self.request(Command::Start).await?
    }

    /// Stop and release both handles
    ///
    /// Always succeeds; stopping a pipeline whose control task has already
    /// exited is a no-op.
    pub async fn stop(&self) -> Result<()> {
        match self.request(Command::Stop).await {
            Ok(()) | Err(AvatarCamError::PipelineClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Replace the selection policy
    ///
    /// If the current sender no longer satisfies it, the pipeline disconnects
    /// and scans again.
    pub async fn select_source(&self, policy: SelectionPolicy) -> Result<()> {
        self.request(|reply| Command::Select(policy, reply)).await
    }

    /// Scan again right away, or refresh the sender list when connected
    pub async fn rescan(&self) -> Result<()> {
        self.request(Command::Rescan).await
    }

    /// Stop the pipeline and end the control task
    pub async fn shutdown(&self) -> Result<()> {
        match self.request(Command::Shutdown).await {
            Ok(()) | Err(AvatarCamError::PipelineClosed) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Subscribe to state transitions
    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.shared.events.subscribe()
    }

    /// Watch the persistent diagnostic
    pub fn watch_diagnostic(&self) -> watch::Receiver<Option<String>> {
        self.shared.diagnostic.subscribe()
    }

    pub fn state(&self) -> PipelineState {
        self.shared.status.read().state
    }

    pub fn diagnostic(&self) -> Option<String> {
        self.shared.status.read().diagnostic.clone()
    }

    pub fn status(&self) -> PipelineStatus {
        self.shared.status.read().clone()
    }

    pub fn stats(&self) -> PipelineStats {
        let status = self.status();
        let metrics = &self.shared.metrics;
        PipelineStats {
            state: status.state,
            source: status.source,
            output: status.output,
            frames_received: metrics.frames_received(),
            frames_delivered: metrics.frames_delivered(),
            frames_paced: metrics.frames_paced(),
            frames_dropped: metrics.frames_dropped(),
            frames_failed: metrics.frames_failed(),
            preview_frames: self.shared.preview.stats().offered,
            reconnects: metrics.reconnects(),
            latency: metrics.latency(),
            uptime_seconds: metrics.session_duration().as_secs_f64(),
        }
    }

    /// Latest preview frame slot
    pub fn preview(&self) -> PreviewSink {
        self.shared.preview.clone()
    }

    /// Shared frame counters
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.shared.metrics.clone()
    }

    /// Enumerate advertised senders
    pub async fn list_sources(&self) -> Vec<SourceDescriptor> {
        let registry = self.shared.registry.clone();
        match tokio::task::spawn_blocking(move || registry.enumerate()).await {
            Ok(sources) => sources,
            Err(e) => {
                debug!("Sender enumeration task failed: {}", e);
                self.shared.registry.cached()
            }
        }
    }

    /// Senders seen by the most recent enumeration
    pub fn cached_sources(&self) -> Vec<SourceDescriptor> {
        self.shared.registry.cached()
    }
}
