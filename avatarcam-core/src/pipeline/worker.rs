//! Acquisition and output worker threads
//!
//! Each worker exclusively owns its handle (the [`FrameReceiver`] or the
//! [`CameraSink`]). The controller only sends commands; workers answer with
//! [`WorkerEvent`]s tagged with the generation of the command they belong to.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, trace, warn};

use super::state::{BlankDetector, StallDetector};
use crate::capture::{FrameReceiver, TextureTransport};
use crate::config::RecoveryPolicy;
use crate::convert::{convert_owned, ConvertTarget};
use crate::error::{AvatarCamError, ConnectError, ConversionError, ReceiveError, Result, SinkError};
use crate::output::{CameraBackend, CameraSink, PreviewSink, PushOutcome};
use crate::performance::{PipelineMetrics, RateWindow};
use crate::types::{ConnectionHandle, DeviceHandle, Frame, FrameFormat, SinkConfig, SourceDescriptor};

/// Frames buffered between acquisition and output
const FRAME_QUEUE: usize = 2;

/// Output worker wake-up interval while idle
const OUTPUT_POLL: Duration = Duration::from_millis(50);

/// Delivered frame rate log interval
const FPS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Why a source was given up
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LossReason {
    /// Sender terminated
    Closed,
    /// Too many consecutive receive timeouts
    Stalled,
    /// Sender keeps publishing empty frames
    Blank,
    /// Unexpected transport failure
    Failed(String),
}

impl std::fmt::Display for LossReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "sender closed"),
            Self::Stalled => write!(f, "no frames received"),
            Self::Blank => write!(f, "sender only publishes empty frames"),
            Self::Failed(msg) => write!(f, "transport error: {}", msg),
        }
    }
}

/// Reports from the workers to the controller
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    SourceOpened {
        generation: u64,
        handle: ConnectionHandle,
    },
    SourceOpenFailed {
        generation: u64,
        error: ConnectError,
    },
    /// First frame arrived on a new connection
    SourceStreaming { generation: u64 },
    /// First frame size differs from the advertised one, or the format changed
    SourceFormat {
        generation: u64,
        format: FrameFormat,
    },
    SourceLost {
        generation: u64,
        reason: LossReason,
    },
    ConversionFailed {
        generation: u64,
        error: ConversionError,
    },
    SinkOpened {
        generation: u64,
        handle: DeviceHandle,
    },
    SinkOpenFailed {
        generation: u64,
        error: SinkError,
    },
    /// A write failed; the sink already released the device
    SinkFailed {
        generation: u64,
        error: SinkError,
    },
    /// First delivery after an open
    SinkRecovered { generation: u64 },
}

/// Commands for the acquisition worker
#[derive(Debug)]
pub enum AcquireCommand {
    Open {
        generation: u64,
        descriptor: SourceDescriptor,
        target: ConvertTarget,
    },
    Retarget {
        generation: u64,
        target: ConvertTarget,
    },
    Close,
}

/// Commands for the output worker
#[derive(Debug)]
pub enum OutputCommand {
    Open { generation: u64, config: SinkConfig },
    Close,
}

/// Everything the workers share with the rest of the pipeline
#[derive(Clone)]
pub struct WorkerContext {
    pub transport: Arc<dyn TextureTransport>,
    pub backend: Arc<dyn CameraBackend>,
    pub recovery: RecoveryPolicy,
    pub metrics: Arc<PipelineMetrics>,
    pub preview: PreviewSink,
    pub events: UnboundedSender<WorkerEvent>,
}

/// Both worker threads plus their command channels
pub struct Workers {
    acquire_tx: Sender<AcquireCommand>,
    output_tx: Sender<OutputCommand>,
    stop: Arc<AtomicBool>,
    acquire: Option<JoinHandle<()>>,
    output: Option<JoinHandle<()>>,
}

impl Workers {
    /// Spawn the acquisition and output threads
    pub fn spawn(ctx: WorkerContext) -> Result<Self> {
        let stop = Arc::new(AtomicBool::new(false));
        let (frame_tx, frame_rx) = mpsc::sync_channel(FRAME_QUEUE);
        let (acquire_tx, acquire_rx) = mpsc::channel();
        let (output_tx, output_rx) = mpsc::channel();

        let acquirer = Acquirer::new(&ctx, acquire_rx, frame_tx, stop.clone());
        let acquire = std::thread::Builder::new()
            .name("avatarcam-acquire".to_string())
            .spawn(move || acquirer.run())
            .map_err(|e| {
                AvatarCamError::from(e).with_context("Failed to spawn acquisition thread")
            })?;

        let outputter = Outputter::new(&ctx, output_rx, frame_rx, stop.clone());
        let output = match std::thread::Builder::new()
            .name("avatarcam-output".to_string())
            .spawn(move || outputter.run())
        {
            Ok(handle) => handle,
            Err(e) => {
                stop.store(true, Ordering::SeqCst);
                let _ = acquire.join();
                return Err(AvatarCamError::from(e).with_context("Failed to spawn output thread"));
            }
        };

        debug!("Pipeline workers started");
        Ok(Self {
            acquire_tx,
            output_tx,
            stop,
            acquire: Some(acquire),
            output: Some(output),
        })
    }

    pub fn acquire(&self, command: AcquireCommand) {
        if self.acquire_tx.send(command).is_err() {
            warn!("Acquisition worker is gone");
        }
    }

    pub fn output(&self, command: OutputCommand) {
        if self.output_tx.send(command).is_err() {
            warn!("Output worker is gone");
        }
    }

    /// Signal both workers and wait for them to release their handles
    ///
    /// Blocks for at most about one receive timeout.
    pub fn stop_and_join(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        for handle in [self.acquire.take(), self.output.take()].into_iter().flatten() {
            let name = handle.thread().name().unwrap_or("worker").to_string();
            if handle.join().is_err() {
                error!("{} thread panicked", name);
            }
        }
        debug!("Pipeline workers stopped");
    }
}

impl Drop for Workers {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Acquisition loop state: receive, convert, forward
struct Acquirer {
    receiver: FrameReceiver,
    commands: Receiver<AcquireCommand>,
    frames: SyncSender<Frame>,
    stop: Arc<AtomicBool>,
    events: UnboundedSender<WorkerEvent>,
    metrics: Arc<PipelineMetrics>,
    preview: PreviewSink,
    recovery: RecoveryPolicy,
    generation: u64,
    target: Option<ConvertTarget>,
    advertised: Option<(u32, u32)>,
    first_frame: bool,
    stall: StallDetector,
    blank: BlankDetector,
}

impl Acquirer {
    fn new(
        ctx: &WorkerContext,
        commands: Receiver<AcquireCommand>,
        frames: SyncSender<Frame>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            receiver: FrameReceiver::new(ctx.transport.clone()),
            commands,
            frames,
            stop,
            events: ctx.events.clone(),
            metrics: ctx.metrics.clone(),
            preview: ctx.preview.clone(),
            recovery: ctx.recovery,
            generation: 0,
            target: None,
            advertised: None,
            first_frame: false,
            stall: StallDetector::new(ctx.recovery.stall_timeouts),
            blank: BlankDetector::new(ctx.recovery.blank_frame_limit),
        }
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }

    fn run(mut self) {
        info!("Acquisition worker started");
        while !self.stop.load(Ordering::SeqCst) {
            match panic::catch_unwind(AssertUnwindSafe(|| self.tick())) {
                Ok(true) => {}
                Ok(false) => break,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("Acquisition worker panicked: {}", message);
                    self.metrics.record_failed();
                    self.lose(LossReason::Failed(format!("acquisition panicked: {}", message)));
                }
            }
        }
        self.receiver.close();
        info!("Acquisition worker stopped");
    }

    /// One loop iteration; false when the worker should exit
    fn tick(&mut self) -> bool {
        loop {
            match self.commands.try_recv() {
                Ok(command) => self.handle_command(command),
                Err(mpsc::TryRecvError::Empty) => break,
                Err(mpsc::TryRecvError::Disconnected) => return false,
            }
        }
        if self.stop.load(Ordering::SeqCst) {
            return false;
        }

        if self.target.is_none() {
            // Idle until the controller hands us a source
            return match self.commands.recv_timeout(self.recovery.receive_timeout) {
                Ok(command) => {
                    self.handle_command(command);
                    true
                }
                Err(RecvTimeoutError::Timeout) => true,
                Err(RecvTimeoutError::Disconnected) => false,
            };
        }

        self.step()
    }

    fn handle_command(&mut self, command: AcquireCommand) {
        match command {
            AcquireCommand::Open {
                generation,
                descriptor,
                target,
            } => {
                self.generation = generation;
                self.target = None;
                match self.receiver.open(&descriptor) {
                    Ok(handle) => {
                        self.target = Some(target);
                        self.advertised = Some((descriptor.width, descriptor.height));
                        self.first_frame = true;
                        self.stall = StallDetector::new(self.recovery.stall_timeouts);
                        self.blank = BlankDetector::new(self.recovery.blank_frame_limit);
                        self.emit(WorkerEvent::SourceOpened { generation, handle });
                    }
                    Err(error) => self.emit(WorkerEvent::SourceOpenFailed { generation, error }),
                }
            }
            AcquireCommand::Retarget { generation, target } => {
                if generation == self.generation && self.target.is_some() {
                    debug!("Converting to {}x{} {}", target.width, target.height, target.pixel_format);
                    self.target = Some(target);
                }
            }
            AcquireCommand::Close => self.release(),
        }
    }

    fn release(&mut self) {
        self.receiver.close();
        self.target = None;
        self.advertised = None;
    }

    fn lose(&mut self, reason: LossReason) {
        info!("Source lost: {}", reason);
        self.release();
        self.emit(WorkerEvent::SourceLost {
            generation: self.generation,
            reason,
        });
    }

    /// One receive iteration; false when the output side is gone
    fn step(&mut self) -> bool {
        let started = Instant::now();
        let frame = match self.receiver.receive_frame(self.recovery.receive_timeout) {
            Ok(frame) => frame,
            Err(ReceiveError::Timeout) => {
                if self.stall.record_timeout() {
                    self.lose(LossReason::Stalled);
                }
                return true;
            }
            Err(ReceiveError::FormatChanged { current, .. }) => {
                self.emit(WorkerEvent::SourceFormat {
                    generation: self.generation,
                    format: current,
                });
                return true;
            }
            Err(ReceiveError::SourceClosed) => {
                self.lose(LossReason::Closed);
                return true;
            }
            Err(ReceiveError::Transport(msg)) => {
                self.lose(LossReason::Failed(msg));
                return true;
            }
            Err(ReceiveError::NotOpen) => {
                self.release();
                return true;
            }
        };

        self.stall.record_frame();
        self.metrics.record_receive(started.elapsed());

        if self.first_frame {
            self.first_frame = false;
            self.emit(WorkerEvent::SourceStreaming {
                generation: self.generation,
            });
            if self.advertised != Some(frame.format().size()) {
                self.emit(WorkerEvent::SourceFormat {
                    generation: self.generation,
                    format: frame.format(),
                });
            }
        }

        if self.blank.observe(&frame) {
            self.lose(LossReason::Blank);
            return true;
        }

        let Some(target) = self.target else {
            return true;
        };
        let started = Instant::now();
        let converted = match convert_owned(frame, target.pixel_format, (target.width, target.height)) {
            Ok(converted) => converted,
            Err(error) => {
                error!("Frame conversion failed: {}", error);
                self.metrics.record_failed();
                self.release();
                self.emit(WorkerEvent::ConversionFailed {
                    generation: self.generation,
                    error,
                });
                return true;
            }
        };
        self.metrics.record_convert(started.elapsed());
        self.preview.sample(&converted);

        match self.frames.try_send(converted) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!("Output busy, dropping frame");
                self.metrics.record_dropped();
                true
            }
            Err(TrySendError::Disconnected(_)) => false,
        }
    }
}

/// Output loop state: pace and deliver
struct Outputter {
    sink: CameraSink,
    commands: Receiver<OutputCommand>,
    frames: Receiver<Frame>,
    stop: Arc<AtomicBool>,
    events: UnboundedSender<WorkerEvent>,
    metrics: Arc<PipelineMetrics>,
    generation: u64,
    awaiting_first: bool,
    rate: RateWindow,
}

impl Outputter {
    fn new(
        ctx: &WorkerContext,
        commands: Receiver<OutputCommand>,
        frames: Receiver<Frame>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            sink: CameraSink::new(ctx.backend.clone()),
            commands,
            frames,
            stop,
            events: ctx.events.clone(),
            metrics: ctx.metrics.clone(),
            generation: 0,
            awaiting_first: false,
            rate: RateWindow::new(FPS_LOG_INTERVAL, Instant::now()),
        }
    }

    fn emit(&self, event: WorkerEvent) {
        let _ = self.events.send(event);
    }

    fn run(mut self) {
        info!("Output worker started");
        while !self.stop.load(Ordering::SeqCst) {
            match panic::catch_unwind(AssertUnwindSafe(|| self.tick())) {
                Ok(true) => {}
                Ok(false) => break,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    error!("Output worker panicked: {}", message);
                    self.metrics.record_failed();
                    self.sink.close();
                    self.emit(WorkerEvent::SinkFailed {
                        generation: self.generation,
                        error: SinkError::WriteFailed(format!("output panicked: {}", message)),
                    });
                }
            }
        }
        self.sink.close();
        info!("Output worker stopped");
    }

    /// One loop iteration; false when the worker should exit
    fn tick(&mut self) -> bool {
        while let Ok(command) = self.commands.try_recv() {
            self.handle_command(command);
        }

        match self.frames.recv_timeout(OUTPUT_POLL) {
            Ok(frame) => {
                self.deliver(frame);
                true
            }
            Err(RecvTimeoutError::Timeout) => true,
            Err(RecvTimeoutError::Disconnected) => false,
        }
    }

    fn handle_command(&mut self, command: OutputCommand) {
        match command {
            OutputCommand::Open { generation, config } => {
                self.generation = generation;
                match self.sink.open(&config) {
                    Ok(handle) => {
                        self.awaiting_first = true;
                        self.emit(WorkerEvent::SinkOpened { generation, handle });
                    }
                    Err(error) => self.emit(WorkerEvent::SinkOpenFailed { generation, error }),
                }
            }
            OutputCommand::Close => self.sink.close(),
        }
    }

    fn deliver(&mut self, frame: Frame) {
        if !self.sink.is_open() {
            self.metrics.record_dropped();
            return;
        }

        let started = Instant::now();
        match self.sink.push_frame_at(&frame, started) {
            Ok(PushOutcome::Delivered) => {
                let now = Instant::now();
                self.metrics.record_delivered(now - started, now);
                if self.awaiting_first {
                    self.awaiting_first = false;
                    self.emit(WorkerEvent::SinkRecovered {
                        generation: self.generation,
                    });
                }
                if let Some(fps) = self.rate.record(now) {
                    info!("Delivering {:.1} fps to the virtual camera", fps);
                }
            }
            Ok(PushOutcome::Paced) => self.metrics.record_paced(),
            Ok(PushOutcome::Mismatched) => self.metrics.record_dropped(),
            Err(error) => {
                self.metrics.record_failed();
                self.emit(WorkerEvent::SinkFailed {
                    generation: self.generation,
                    error,
                });
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
