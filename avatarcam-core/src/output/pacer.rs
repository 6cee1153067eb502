//! Deadline-based frame pacing

use std::time::{Duration, Instant};

/// Admits frames at no more than a target rate
///
/// Each admitted frame moves the deadline one interval forward. A frame that
/// arrives more than a quarter interval before the deadline is rejected. A
/// frame that arrives more than a whole interval late re-anchors the schedule
/// instead of letting a burst through.
#[derive(Debug, Clone)]
pub struct FramePacer {
    interval: Duration,
    slack: Duration,
    next_due: Option<Instant>,
}

impl FramePacer {
    pub fn new(fps: u32) -> Self {
        let interval = Duration::from_secs(1) / fps.max(1);
        Self {
            interval,
            slack: interval / 4,
            next_due: None,
        }
    }

    /// Time between admitted frames
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether a frame arriving at `now` should be delivered
    pub fn admit(&mut self, now: Instant) -> bool {
        let Some(due) = self.next_due else {
            self.next_due = Some(now + self.interval);
            return true;
        };

        if now + self.slack < due {
            return false;
        }

        self.next_due = Some(if now > due + self.interval {
            now + self.interval
        } else {
            due + self.interval
        });
        true
    }

    /// Forget the schedule; the next frame is admitted immediately
    pub fn reset(&mut self) {
        self.next_due = None;
    }
}
