//! Pipeline control task
//!
//! Owns every piece of pipeline state. The state reported to subscribers is
//! derived from that state after each message, so a transition is published
//! exactly once no matter how many messages lead to it.

use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::oneshot;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, trace, warn};

use super::state::{Backoff, PipelineState};
use super::worker::{AcquireCommand, OutputCommand, WorkerContext, WorkerEvent, Workers};
use super::{Shared, StatusEvent};
use crate::capture::TextureTransport;
use crate::config::BridgeConfig;
use crate::error::{Result, SinkError};
use crate::output::CameraBackend;
use crate::types::{FrameFormat, SelectionPolicy, SinkConfig, SinkFormat, SourceDescriptor};

/// Requests from [`super::Pipeline`] handles
pub(super) enum Command {
    Start(oneshot::Sender<Result<()>>),
    Stop(oneshot::Sender<()>),
    Select(SelectionPolicy, oneshot::Sender<()>),
    Rescan(oneshot::Sender<()>),
    Shutdown(oneshot::Sender<()>),
}

pub(super) struct Controller {
    config: BridgeConfig,
    transport: Arc<dyn TextureTransport>,
    backend: Arc<dyn CameraBackend>,
    shared: Arc<Shared>,
    commands: mpsc::Receiver<Command>,
    events_tx: UnboundedSender<WorkerEvent>,
    events_rx: UnboundedReceiver<WorkerEvent>,
    workers: Option<Workers>,
    policy: SelectionPolicy,

    running: bool,
    started_once: bool,

    // Source side; `generation` tags acquisition commands and events
    generation: u64,
    current_source: Option<SourceDescriptor>,
    source_open: bool,
    source_streaming: bool,
    source_format: Option<FrameFormat>,
    had_source: bool,
    cooling_down: bool,
    next_scan: Option<Instant>,
    scan_backoff: Backoff,

    // Sink side; `sink_generation` tags output commands and events
    sink_generation: u64,
    sink_format: Option<SinkFormat>,
    sink_open: bool,
    sink_pending: bool,
    sink_failures: u32,
    sink_terminal: bool,
    next_sink_retry: Option<Instant>,
    sink_backoff: Backoff,
}

impl Controller {
    pub(super) fn new(
        config: BridgeConfig,
        transport: Arc<dyn TextureTransport>,
        backend: Arc<dyn CameraBackend>,
        shared: Arc<Shared>,
        commands: mpsc::Receiver<Command>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let recovery = config.recovery;
        Self {
            policy: config.selection.clone(),
            config,
            transport,
            backend,
            shared,
            commands,
            events_tx,
            events_rx,
            workers: None,
            running: false,
            started_once: false,
            generation: 0,
            current_source: None,
            source_open: false,
            source_streaming: false,
            source_format: None,
            had_source: false,
            cooling_down: false,
            next_scan: None,
            scan_backoff: Backoff::new(recovery.scan_backoff_base, recovery.scan_backoff_max),
            sink_generation: 0,
            sink_format: None,
            sink_open: false,
            sink_pending: false,
            sink_failures: 0,
            sink_terminal: false,
            next_sink_retry: None,
            sink_backoff: Backoff::new(recovery.sink_backoff_base, recovery.sink_backoff_max),
        }
    }

    pub(super) async fn run(mut self) {
        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Shutdown(reply)) => {
                        self.stop().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(event) = self.events_rx.recv() => self.handle_event(event).await,
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    self.on_deadline().await;
                }
            }
        }

        self.release_workers().await;
        debug!("Pipeline control task exited");
    }

    fn next_deadline(&self) -> Option<Instant> {
        match (self.next_scan, self.next_sink_retry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start(reply) => {
                let result = self.start().await;
                let _ = reply.send(result);
            }
            Command::Stop(reply) => {
                self.stop().await;
                let _ = reply.send(());
            }
            Command::Select(policy, reply) => {
                self.select_source(policy).await;
                let _ = reply.send(());
            }
            Command::Rescan(reply) => {
                self.rescan().await;
                let _ = reply.send(());
            }
            Command::Shutdown(reply) => {
                self.stop().await;
                let _ = reply.send(());
            }
        }
    }

    async fn start(&mut self) -> Result<()> {
        if self.running && !self.sink_terminal {
            debug!("Pipeline already running");
            return Ok(());
        }

        self.release_workers().await;
        self.clear_source();
        self.cooling_down = false;
        self.next_scan = None;
        self.next_sink_retry = None;
        self.scan_backoff.reset();
        self.sink_backoff.reset();
        self.sink_format = None;
        self.sink_failures = 0;
        self.sink_terminal = false;
        self.had_source = false;
        self.set_diagnostic(None);
        self.shared.metrics.reset();

        let workers = Workers::spawn(WorkerContext {
            transport: self.transport.clone(),
            backend: self.backend.clone(),
            recovery: self.config.recovery,
            metrics: self.shared.metrics.clone(),
            preview: self.shared.preview.clone(),
            events: self.events_tx.clone(),
        })?;
        self.workers = Some(workers);
        self.running = true;
        self.started_once = true;

        info!(
            "Pipeline started via {} ({}, camera '{}')",
            self.transport.name(),
            self.policy,
            self.config.camera.name
        );
        self.refresh_state();
        self.scan().await;
        self.refresh_state();
        Ok(())
    }

    async fn stop(&mut self) {
        let was_running = self.running;
        self.running = false;
        self.started_once = true;
        self.release_workers().await;
        self.clear_source();
        self.cooling_down = false;
        self.next_scan = None;
        self.next_sink_retry = None;
        self.sink_format = None;
        if was_running {
            info!("Pipeline stopped");
        }
        self.refresh_state();
    }

    async fn select_source(&mut self, policy: SelectionPolicy) {
        info!("Source selection: {}", policy);
        self.policy = policy;

        let keep = self
            .current_source
            .as_ref()
            .is_some_and(|source| self.policy.accepts(&source.name));
        if !keep {
            if let Some(source) = self.current_source.take() {
                info!("Disconnecting from '{}'", source.name);
                if let Some(workers) = &self.workers {
                    workers.acquire(AcquireCommand::Close);
                }
                // Late events from the old connection no longer match
                self.generation += 1;
                self.clear_source();
            }
            self.scan_now().await;
        }
        self.refresh_state();
    }

    async fn rescan(&mut self) {
        if self.can_scan() {
            self.scan_now().await;
            return;
        }
        let registry = self.shared.registry.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || registry.enumerate()).await {
            warn!("Sender enumeration task failed: {}", e);
        }
    }

    fn can_scan(&self) -> bool {
        self.running && !self.sink_terminal && self.workers.is_some() && self.current_source.is_none()
    }

    /// Drop any pending backoff or cooldown and scan right away
    async fn scan_now(&mut self) {
        if !self.can_scan() {
            return;
        }
        self.cooling_down = false;
        self.next_scan = None;
        self.scan_backoff.reset();
        self.refresh_state();
        self.scan().await;
        self.refresh_state();
    }

    async fn scan(&mut self) {
        if !self.can_scan() {
            return;
        }

        let registry = self.shared.registry.clone();
        let policy = self.policy.clone();
        let found = match tokio::task::spawn_blocking(move || registry.select(&policy)).await {
            Ok(found) => found,
            Err(e) => {
                warn!("Sender enumeration task failed: {}", e);
                None
            }
        };

        match found {
            Some(descriptor) => self.connect(descriptor),
            None => {
                if self.scan_backoff.attempts() == 0 {
                    info!("Waiting for a sender ({})", self.policy);
                }
                let delay = self.scan_backoff.next_delay();
                trace!("No sender found, next scan in {:?}", delay);
                self.next_scan = Some(Instant::now() + delay);
            }
        }
    }

    fn connect(&mut self, descriptor: SourceDescriptor) {
        self.generation += 1;
        self.scan_backoff.reset();
        if self.had_source {
            self.shared.metrics.record_reconnect();
        }
        self.had_source = true;

        let desired = self.desired_format(descriptor.width, descriptor.height);
        info!(
            "Connecting to '{}' ({}x{}) -> {}",
            descriptor.name, descriptor.width, descriptor.height, desired
        );

        self.current_source = Some(descriptor.clone());
        self.source_open = false;
        self.source_streaming = false;
        self.source_format = None;
        if let Some(workers) = &self.workers {
            workers.acquire(AcquireCommand::Open {
                generation: self.generation,
                descriptor,
                target: desired.into(),
            });
        }
        self.ensure_sink(desired);
    }

    /// Camera format for a sender of the given size
    fn desired_format(&self, width: u32, height: u32) -> SinkFormat {
        let (width, height) = self.config.resolution.resolve(width.max(1), height.max(1));
        SinkFormat {
            width,
            height,
            fps: self.config.fps,
            pixel_format: self.config.pixel_format,
        }
    }

    /// Open the camera, or renegotiate if `desired` differs from the current format
    fn ensure_sink(&mut self, desired: SinkFormat) {
        if self.sink_terminal {
            return;
        }
        let changed = self.sink_format != Some(desired);
        self.sink_format = Some(desired);

        // A scheduled retry picks up the new format
        if self.next_sink_retry.is_some() {
            return;
        }
        if changed || (!self.sink_open && !self.sink_pending) {
            if changed && self.sink_open {
                info!("Renegotiating virtual camera format: {}", desired);
            }
            self.open_sink(desired);
        }
    }

    fn open_sink(&mut self, format: SinkFormat) {
        let Some(workers) = &self.workers else {
            return;
        };
        self.sink_generation += 1;
        self.sink_pending = true;
        workers.output(OutputCommand::Open {
            generation: self.sink_generation,
            config: SinkConfig {
                name: self.config.camera.name.clone(),
                format,
            },
        });
    }

    async fn on_deadline(&mut self) {
        let now = Instant::now();

        if self.next_sink_retry.is_some_and(|at| at <= now) {
            self.next_sink_retry = None;
            if let Some(format) = self.sink_format {
                if self.running && !self.sink_terminal {
                    debug!("Retrying virtual camera ({})", format);
                    self.open_sink(format);
                }
            }
        }

        if self.next_scan.is_some_and(|at| at <= now) {
            self.next_scan = None;
            self.cooling_down = false;
            self.refresh_state();
            self.scan().await;
        }

        self.refresh_state();
    }

    async fn handle_event(&mut self, event: WorkerEvent) {
        match event {
            WorkerEvent::SourceOpened { generation, handle } if generation == self.generation => {
                self.source_open = true;
                if let Some(source) = &self.current_source {
                    info!("Receiving from '{}' ({})", source.name, handle);
                }
            }
            WorkerEvent::SourceStreaming { generation } if generation == self.generation => {
                self.source_streaming = true;
                debug!("First frame received");
            }
            WorkerEvent::SourceOpenFailed { generation, error } if generation == self.generation => {
                warn!("Could not connect to sender: {}", error);
                self.clear_source();
                let delay = self.scan_backoff.next_delay();
                self.next_scan = Some(Instant::now() + delay);
            }
            WorkerEvent::SourceFormat { generation, format }
                if generation == self.generation && self.source_format != Some(format) =>
            {
                info!("Sender format is {}", format);
                self.source_format = Some(format);
                let desired = self.desired_format(format.width, format.height);
                self.ensure_sink(desired);
                if let Some(workers) = &self.workers {
                    workers.acquire(AcquireCommand::Retarget {
                        generation,
                        target: desired.into(),
                    });
                }
            }
            WorkerEvent::SourceLost { generation, reason } if generation == self.generation => {
                warn!("Lost sender: {}", reason);
                self.clear_source();
                if self.running {
                    self.cooling_down = true;
                    self.next_scan = Some(Instant::now() + self.config.recovery.source_lost_cooldown);
                }
            }
            WorkerEvent::ConversionFailed { generation, error } if generation == self.generation => {
                let message = format!("Frame conversion failed: {}", error);
                error!("{}", message);
                self.set_diagnostic(Some(message));
                self.stop().await;
            }
            WorkerEvent::SinkOpened { generation, handle } if generation == self.sink_generation => {
                self.sink_pending = false;
                self.sink_open = true;
                if let Some(format) = self.sink_format {
                    info!("Virtual camera '{}' open at {} ({})", self.config.camera.name, format, handle);
                }
            }
            WorkerEvent::SinkOpenFailed { generation, error } if generation == self.sink_generation => {
                self.sink_pending = false;
                self.sink_open = false;
                self.handle_sink_failure(error).await;
            }
            WorkerEvent::SinkFailed { generation, error } if generation == self.sink_generation => {
                self.sink_open = false;
                self.handle_sink_failure(error).await;
            }
            WorkerEvent::SinkRecovered { generation } if generation == self.sink_generation => {
                if self.sink_failures > 0 {
                    info!("Virtual camera recovered after {} failures", self.sink_failures);
                }
                self.sink_failures = 0;
                self.sink_backoff.reset();
            }
            stale => trace!("Ignoring stale worker event: {:?}", stale),
        }
        self.refresh_state();
    }

    async fn handle_sink_failure(&mut self, error: SinkError) {
        let budget = self.config.recovery.sink_retry_budget;

        if error.is_configuration() || self.sink_failures >= budget {
            let message = if error.is_configuration() {
                format!("Virtual camera unavailable: {}", error)
            } else {
                format!(
                    "Virtual camera failed {} times, giving up: {}",
                    self.sink_failures + 1,
                    error
                )
            };
            error!("{}", message);
            self.sink_terminal = true;
            self.next_sink_retry = None;
            self.next_scan = None;
            self.cooling_down = false;
            self.set_diagnostic(Some(message));
            self.release_workers().await;
            self.clear_source();
            return;
        }

        self.sink_failures += 1;
        let delay = self.sink_backoff.next_delay();
        warn!(
            "Virtual camera error: {} (retry {}/{} in {:?})",
            error, self.sink_failures, budget, delay
        );
        self.next_sink_retry = Some(Instant::now() + delay);
    }

    fn clear_source(&mut self) {
        self.current_source = None;
        self.source_open = false;
        self.source_streaming = false;
        self.source_format = None;
    }

    /// Stop both workers and wait until they have released their handles
    async fn release_workers(&mut self) {
        if let Some(workers) = self.workers.take() {
            if let Err(e) = tokio::task::spawn_blocking(move || workers.stop_and_join()).await {
                error!("Failed to join pipeline workers: {}", e);
            }
        }
        self.source_open = false;
        self.source_streaming = false;
        self.sink_open = false;
        self.sink_pending = false;
    }

    fn set_diagnostic(&self, message: Option<String>) {
        self.shared.status.write().diagnostic = message.clone();
        self.shared.diagnostic.send_replace(message);
    }

    fn derive_state(&self) -> PipelineState {
        if !self.running {
            return if self.started_once {
                PipelineState::Stopped
            } else {
                PipelineState::Idle
            };
        }
        if self.sink_terminal || (self.sink_failures > 0 && !self.sink_open) {
            return PipelineState::SinkError;
        }
        if self.cooling_down {
            return PipelineState::SourceLost;
        }
        if self.source_open && self.source_streaming && self.sink_open {
            return PipelineState::Streaming;
        }
        if self.current_source.is_some() {
            return PipelineState::Connecting;
        }
        PipelineState::Scanning
    }

    /// Publish the derived state; emits one event per actual change
    fn refresh_state(&mut self) {
        let next = self.derive_state();
        let source = self.current_source.as_ref().map(|s| s.name.clone());

        let (previous, diagnostic) = {
            let mut status = self.shared.status.write();
            status.source = source.clone();
            status.selection = self.policy.clone();
            status.output = if self.sink_open { self.sink_format } else { None };
            let previous = status.state;
            status.state = next;
            (previous, status.diagnostic.clone())
        };

        if previous == next {
            return;
        }
        if !previous.can_transition(next) {
            warn!("Unexpected state transition {} -> {}", previous, next);
        }
        info!("Pipeline {} -> {}", previous, next);
        let _ = self.shared.events.send(StatusEvent {
            previous,
            state: next,
            source,
            diagnostic,
        });
    }
}
