//! Performance metrics for the bridge pipeline
//!
//! Provides:
//! - Stage timing (receive, convert, output) as rolling averages
//! - Frame counters shared between the worker threads
//! - Delivered frame rate, both rolling and over fixed log windows
//!
//! Counters are statistics only; nothing in the pipeline makes control
//! decisions from them.

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Maximum number of samples to keep for rolling averages
const MAX_SAMPLES: usize = 120;

/// Stage latency snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    /// Average time spent waiting for and copying a frame, in milliseconds
    pub receive_ms: f64,
    /// Average conversion time in milliseconds
    pub convert_ms: f64,
    /// Average camera write time in milliseconds
    pub output_ms: f64,
    /// Delivered frames per second over the rolling window
    pub fps: f64,
}

impl LatencyStats {
    /// Format stats as a single-line string
    pub fn format_line(&self) -> String {
        format!(
            "Receive: {:.1}ms | Convert: {:.1}ms | Output: {:.1}ms | {:.1}fps",
            self.receive_ms, self.convert_ms, self.output_ms, self.fps
        )
    }
}

/// Rolling average calculator for timing data
#[derive(Debug)]
struct RollingAverage {
    samples: VecDeque<Duration>,
    max_samples: usize,
}

impl RollingAverage {
    fn new(max_samples: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(max_samples),
            max_samples,
        }
    }

    fn add(&mut self, duration: Duration) {
        if self.samples.len() >= self.max_samples {
            self.samples.pop_front();
        }
        self.samples.push_back(duration);
    }

    fn average(&self) -> Duration {
        if self.samples.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.samples.iter().sum();
        total / self.samples.len() as u32
    }

    fn average_ms(&self) -> f64 {
        self.average().as_secs_f64() * 1000.0
    }

    fn clear(&mut self) {
        self.samples.clear();
    }
}

/// Metrics shared by the acquisition and output workers
#[derive(Debug)]
pub struct PipelineMetrics {
    receive_latency: RwLock<RollingAverage>,
    convert_latency: RwLock<RollingAverage>,
    output_latency: RwLock<RollingAverage>,
    /// Time between consecutive deliveries
    delivery_intervals: RwLock<RollingAverage>,
    last_delivery: Mutex<Option<Instant>>,
    frames_received: AtomicU64,
    frames_delivered: AtomicU64,
    frames_paced: AtomicU64,
    frames_dropped: AtomicU64,
    frames_failed: AtomicU64,
    reconnects: AtomicU64,
    start_time: RwLock<Instant>,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            receive_latency: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            convert_latency: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            output_latency: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            delivery_intervals: RwLock::new(RollingAverage::new(MAX_SAMPLES)),
            last_delivery: Mutex::new(None),
            frames_received: AtomicU64::new(0),
            frames_delivered: AtomicU64::new(0),
            frames_paced: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            frames_failed: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
            start_time: RwLock::new(Instant::now()),
        }
    }

    /// Record a received frame and how long the receive took
    pub fn record_receive(&self, duration: Duration) {
        self.receive_latency.write().add(duration);
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    /// Record conversion timing
    pub fn record_convert(&self, duration: Duration) {
        self.convert_latency.write().add(duration);
    }

    /// Record a delivered frame and how long the write took
    pub fn record_delivered(&self, write_time: Duration, now: Instant) {
        self.output_latency.write().add(write_time);
        self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        let mut last = self.last_delivery.lock();
        if let Some(previous) = last.replace(now) {
            self.delivery_intervals
                .write()
                .add(now.duration_since(previous));
        }
    }

    /// Record a frame dropped by pacing
    pub fn record_paced(&self) {
        self.frames_paced.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame dropped for backpressure or format mismatch
    pub fn record_dropped(&self) {
        self.frames_dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a frame lost to a conversion or write failure
    pub fn record_failed(&self) {
        self.frames_failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a source reconnect
    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    /// Current stage latencies
    pub fn latency(&self) -> LatencyStats {
        let avg_interval = self.delivery_intervals.read().average();
        let fps = if avg_interval.as_secs_f64() > 0.0 {
            1.0 / avg_interval.as_secs_f64()
        } else {
            0.0
        };

        LatencyStats {
            receive_ms: self.receive_latency.read().average_ms(),
            convert_ms: self.convert_latency.read().average_ms(),
            output_ms: self.output_latency.read().average_ms(),
            fps,
        }
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn frames_delivered(&self) -> u64 {
        self.frames_delivered.load(Ordering::Relaxed)
    }

    pub fn frames_paced(&self) -> u64 {
        self.frames_paced.load(Ordering::Relaxed)
    }

    pub fn frames_dropped(&self) -> u64 {
        self.frames_dropped.load(Ordering::Relaxed)
    }

    pub fn frames_failed(&self) -> u64 {
        self.frames_failed.load(Ordering::Relaxed)
    }

    pub fn reconnects(&self) -> u64 {
        self.reconnects.load(Ordering::Relaxed)
    }

    /// Time since creation or the last reset
    pub fn session_duration(&self) -> Duration {
        self.start_time.read().elapsed()
    }

    /// Reset all metrics
    pub fn reset(&self) {
        self.receive_latency.write().clear();
        self.convert_latency.write().clear();
        self.output_latency.write().clear();
        self.delivery_intervals.write().clear();
        *self.last_delivery.lock() = None;
        for counter in [
            &self.frames_received,
            &self.frames_delivered,
            &self.frames_paced,
            &self.frames_dropped,
            &self.frames_failed,
            &self.reconnects,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        *self.start_time.write() = Instant::now();
    }
}

/// Create a shared metrics instance
pub fn create_metrics() -> Arc<PipelineMetrics> {
    Arc::new(PipelineMetrics::new())
}

/// Counts events over fixed windows for periodic rate logging
#[derive(Debug, Clone)]
pub struct RateWindow {
    window: Duration,
    started: Instant,
    count: u64,
}

impl RateWindow {
    pub fn new(window: Duration, now: Instant) -> Self {
        Self {
            window,
            started: now,
            count: 0,
        }
    }

    /// Count one event; returns the rate once per elapsed window
    pub fn record(&mut self, now: Instant) -> Option<f64> {
        self.count += 1;
        let elapsed = now.duration_since(self.started);
        if elapsed < self.window {
            return None;
        }
        let rate = self.count as f64 / elapsed.as_secs_f64();
        self.started = now;
        self.count = 0;
        Some(rate)
    }
}
