//! Preview frame slot
//!
//! Holds only the latest decimated frame for an on-screen preview. Offering
//! never blocks and never backpressures the pipeline.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::trace;

use crate::config::PreviewConfig;
use crate::convert::convert;
use crate::types::Frame;

/// Counters for the preview slot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreviewStats {
    /// Frames placed in the slot
    pub offered: u64,
    /// Frames overwritten before anyone took them
    pub replaced: u64,
}

struct Inner {
    slot: Mutex<Option<Frame>>,
    enabled: AtomicBool,
    config: PreviewConfig,
    frames_per_preview: u64,
    seen: AtomicU64,
    offered: AtomicU64,
    replaced: AtomicU64,
}

/// Latest-wins preview sink, cheap to clone
#[derive(Clone)]
pub struct PreviewSink {
    inner: Arc<Inner>,
}

impl PreviewSink {
    /// Create a preview sink for an output running at `output_fps`
    pub fn new(config: PreviewConfig, output_fps: u32) -> Self {
        Self {
            inner: Arc::new(Inner {
                slot: Mutex::new(None),
                enabled: AtomicBool::new(config.enabled),
                config,
                frames_per_preview: config.frames_per_preview(output_fps).max(1) as u64,
                seen: AtomicU64::new(0),
                offered: AtomicU64::new(0),
                replaced: AtomicU64::new(0),
            }),
        }
    }

    /// Place a frame in the slot, replacing any frame not yet taken
    pub fn offer(&self, frame: Frame) {
        let previous = self.inner.slot.lock().replace(frame);
        self.inner.offered.fetch_add(1, Ordering::Relaxed);
        if previous.is_some() {
            self.inner.replaced.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Consider a pipeline frame for preview
    ///
    /// Keeps one frame in `frames_per_preview`, downscales it to the preview
    /// size and offers it. Does nothing while disabled.
    pub fn sample(&self, frame: &Frame) {
        if !self.is_enabled() {
            return;
        }
        let n = self.inner.seen.fetch_add(1, Ordering::Relaxed);
        if n % self.inner.frames_per_preview != 0 {
            return;
        }

        let size = fit_within(
            frame.width(),
            frame.height(),
            self.inner.config.width,
            self.inner.config.height,
        );
        match convert(frame, frame.pixel_format(), size) {
            Ok(preview) => self.offer(preview),
            Err(e) => trace!("Preview conversion skipped: {}", e),
        }
    }

    /// Take the latest frame, leaving the slot empty
    pub fn take_latest(&self) -> Option<Frame> {
        self.inner.slot.lock().take()
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::Relaxed)
    }

    /// Turn sampling on or off; disabling clears the slot
    pub fn set_enabled(&self, enabled: bool) {
        self.inner.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.inner.slot.lock().take();
        }
    }

    pub fn stats(&self) -> PreviewStats {
        PreviewStats {
            offered: self.inner.offered.load(Ordering::Relaxed),
            replaced: self.inner.replaced.load(Ordering::Relaxed),
        }
    }
}

/// Largest size within `max_w` x `max_h` keeping the aspect ratio, never upscaling
fn fit_within(width: u32, height: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if width <= max_w && height <= max_h {
        return (width.max(1), height.max(1));
    }
    let scale_w = max_w as u64 * height as u64;
    let scale_h = max_h as u64 * width as u64;
    if scale_w <= scale_h {
        // width-bound
        let h = (height as u64 * max_w as u64 / width as u64).max(1);
        (max_w, h as u32)
    } else {
        let w = (width as u64 * max_h as u64 / height as u64).max(1);
        (w as u32, max_h)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::formats::PixelFormat;
    use crate::types::FrameFormat;

    fn preview(fps: u32, output_fps: u32) -> PreviewSink {
        let config = PreviewConfig {
            enabled: true,
            fps,
            width: 4,
            height: 4,
        };
        PreviewSink::new(config, output_fps)
    }

    fn frame(width: u32, height: u32, pts: u64) -> Frame {
        let format = FrameFormat::new(width, height, PixelFormat::Rgba8);
        let data = [1u8, 2, 3, 255].repeat(width as usize * height as usize);
        Frame::new(format, data, pts).unwrap()
    }

    #[test]
    fn test_latest_frame_wins() {
        let sink = preview(5, 30);
        sink.offer(frame(2, 2, 1));
        sink.offer(frame(2, 2, 2));
        sink.offer(frame(2, 2, 3));

        assert_eq!(sink.take_latest().map(|f| f.pts), Some(3));
        assert!(sink.take_latest().is_none());
        assert_eq!(sink.stats(), PreviewStats { offered: 3, replaced: 2 });

        // Taking empties the slot, so the next offer replaces nothing
        sink.offer(frame(2, 2, 4));
        assert_eq!(sink.stats().replaced, 2);
    }

    #[test]
    fn test_sample_keeps_one_in_n() {
        // 30 fps output, 10 fps preview: every third frame
        let sink = preview(10, 30);
        for pts in 0..9 {
            sink.sample(&frame(2, 2, pts));
        }
        assert_eq!(sink.stats().offered, 3);
        assert_eq!(sink.take_latest().map(|f| f.pts), Some(6));
    }

    #[test]
    fn test_sample_downscales_to_preview_size() {
        let sink = preview(30, 30);
        sink.sample(&frame(16, 8, 0));
        let taken = sink.take_latest().unwrap();
        assert_eq!(taken.format(), FrameFormat::new(4, 2, PixelFormat::Rgba8));
        assert_eq!(&taken.data()[..4], &[1, 2, 3, 255]);
    }

    #[test]
    fn test_zero_preview_fps_offers_first_frame_only() {
        let sink = preview(0, 30);
        for pts in 0..60 {
            sink.sample(&frame(2, 2, pts));
        }
        assert_eq!(sink.stats().offered, 1);
    }

    #[test]
    fn test_disable_clears_slot_and_stops_sampling() {
        let sink = preview(30, 30);
        sink.sample(&frame(2, 2, 0));
        sink.set_enabled(false);
        assert!(!sink.is_enabled());
        assert!(sink.take_latest().is_none());

        sink.sample(&frame(2, 2, 1));
        assert!(sink.take_latest().is_none());
        assert_eq!(sink.stats().offered, 1);

        sink.set_enabled(true);
        sink.sample(&frame(2, 2, 2));
        assert_eq!(sink.take_latest().map(|f| f.pts), Some(2));
    }

    #[test]
    fn test_fit_within() {
        assert_eq!(fit_within(1920, 1080, 384, 216), (384, 216));
        assert_eq!(fit_within(1080, 1080, 384, 216), (216, 216));
        assert_eq!(fit_within(320, 200, 384, 216), (320, 200));
        assert_eq!(fit_within(4000, 100, 384, 216), (384, 9));
    }
}
