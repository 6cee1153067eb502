//! Pipeline state and recovery bookkeeping

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::Frame;

/// Pipeline state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Created, never started
    #[default]
    Idle,
    /// Looking for a sender
    Scanning,
    /// Opening the sender and the camera
    Connecting,
    /// Frames flowing to the camera
    Streaming,
    /// Sender went away; scanning resumes after a cooldown
    SourceLost,
    /// Camera failed; retrying, or terminal with a diagnostic
    SinkError,
    /// Stopped on request; all handles released
    Stopped,
}

impl PipelineState {
    /// Lowercase name for status output
    pub fn name(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::SourceLost => "source_lost",
            Self::SinkError => "sink_error",
            Self::Stopped => "stopped",
        }
    }

    /// Whether the pipeline is working towards or delivering output
    pub fn is_active(&self) -> bool {
        !matches!(self, Self::Idle | Self::Stopped)
    }

    /// Whether the orchestrator may move from `self` to `next`
    pub fn can_transition(&self, next: PipelineState) -> bool {
        use PipelineState::*;
        if next == Stopped {
            return *self != Stopped;
        }
        matches!(
            (*self, next),
            (Idle | Stopped, Scanning)
                | (Scanning, Connecting)
                | (Connecting, Scanning | Streaming | SourceLost)
                | (Streaming, SourceLost | Scanning | Connecting)
                | (SourceLost, Scanning | Connecting)
                | (Scanning | Connecting | Streaming | SourceLost, SinkError)
                | (SinkError, Scanning | Connecting | Streaming | SourceLost)
        )
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Bounded exponential backoff
#[derive(Debug, Clone)]
pub struct Backoff {
    base: Duration,
    max: Duration,
    current: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            current: base,
            attempts: 0,
        }
    }

    /// Delay before the next attempt; doubles up to the cap
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current.min(self.max);
        self.current = (self.current * 2).min(self.max);
        self.attempts += 1;
        delay
    }

    /// Attempts since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn reset(&mut self) {
        self.current = self.base;
        self.attempts = 0;
    }
}

/// Turns a run of receive timeouts into a single "source lost"
#[derive(Debug, Clone)]
pub struct StallDetector {
    threshold: u32,
    consecutive: u32,
    fired: bool,
}

impl StallDetector {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold: threshold.max(1),
            consecutive: 0,
            fired: false,
        }
    }

    /// Count a timeout; true exactly once when the threshold is reached
    pub fn record_timeout(&mut self) -> bool {
        self.consecutive = self.consecutive.saturating_add(1);
        if self.consecutive >= self.threshold && !self.fired {
            self.fired = true;
            return true;
        }
        false
    }

    /// A frame arrived
    pub fn record_frame(&mut self) {
        self.consecutive = 0;
        self.fired = false;
    }
}

/// Detects a sender that keeps publishing empty frames
///
/// Every `SAMPLE_EVERY`th frame is sampled on a 16 pixel grid over the colour
/// channels. More than `limit` consecutive blank samples count as a lost
/// source.
#[derive(Debug, Clone)]
pub struct BlankDetector {
    limit: u32,
    frames: u64,
    consecutive: u32,
    fired: bool,
}

impl BlankDetector {
    /// Frames between samples
    pub const SAMPLE_EVERY: u64 = 10;
    /// Grid step in pixels
    pub const GRID: usize = 16;

    /// `limit` of 0 disables detection
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            frames: 0,
            consecutive: 0,
            fired: false,
        }
    }

    /// Observe one frame; true exactly once when the limit is exceeded
    pub fn observe(&mut self, frame: &Frame) -> bool {
        if self.limit == 0 {
            return false;
        }
        self.frames += 1;
        if self.frames % Self::SAMPLE_EVERY != 0 {
            return false;
        }

        match is_blank(frame) {
            Some(true) => self.consecutive += 1,
            Some(false) => {
                self.consecutive = 0;
                self.fired = false;
            }
            None => return false,
        }

        if self.consecutive > self.limit && !self.fired {
            self.fired = true;
            return true;
        }
        false
    }
}

/// Whether every sampled colour channel is zero; `None` for non-RGB layouts
fn is_blank(frame: &Frame) -> Option<bool> {
    let layout = frame.pixel_format().channels()?;
    let bpp = frame.pixel_format().bytes_per_pixel();
    let stride = frame.format().stride();
    let data = frame.data();

    for y in (0..frame.height() as usize).step_by(BlankDetector::GRID) {
        let row = &data[y * stride..][..stride];
        for px in row.chunks_exact(bpp).step_by(BlankDetector::GRID) {
            if px[layout.r] != 0 || px[layout.g] != 0 || px[layout.b] != 0 {
                return Some(false);
            }
        }
    }
    Some(true)
}
