//! Mock infrastructure for testing
//!
//! A scripted texture transport and camera backend that count open handles,
//! plus frame builders.

#![allow(dead_code)]

use avatarcam_core::capture::{TextureConnection, TextureTransport};
use avatarcam_core::error::{ConnectError, DiscoveryError, ReceiveError, SinkError};
use avatarcam_core::output::{CameraBackend, CameraDevice};
use avatarcam_core::types::{now_ns, Frame, FrameFormat, SinkConfig, SourceDescriptor};
use avatarcam_core::PixelFormat;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Colour used by [`MockTransport`] frames, BGRA order
pub const MOCK_COLOR: [u8; 4] = [10, 20, 30, 255];

/// Solid colour frame in `format`, colour given in BGRA order
pub fn solid_frame(format: FrameFormat, bgra: [u8; 4]) -> Frame {
    let [b, g, r, a] = bgra;
    let pixel: Vec<u8> = match format.pixel_format {
        PixelFormat::Bgra8 => vec![b, g, r, a],
        PixelFormat::Rgba8 => vec![r, g, b, a],
        PixelFormat::Bgr8 => vec![b, g, r],
        PixelFormat::Rgb8 => vec![r, g, b],
        other => panic!("no solid frames for {}", other),
    };
    let data = pixel.repeat((format.width * format.height) as usize);
    Frame::new(format, data, now_ns()).expect("solid frame size")
}

/// BGRA frame with a solid colour
pub fn bgra_frame(width: u32, height: u32, bgra: [u8; 4]) -> Frame {
    solid_frame(FrameFormat::new(width, height, PixelFormat::Bgra8), bgra)
}

/// BGRA frame with a diagonal gradient
pub fn gradient_frame(width: u32, height: u32) -> Frame {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            let b = ((x + y) * 255 / (width + height).max(1)) as u8;
            data.extend_from_slice(&[b, g, r, 255]);
        }
    }
    Frame::new(FrameFormat::new(width, height, PixelFormat::Bgra8), data, now_ns())
        .expect("gradient frame size")
}

#[derive(Debug, Clone)]
struct MockSender {
    width: u32,
    height: u32,
    stalled: bool,
    refuse: bool,
    pixel_format: PixelFormat,
    panic_on_pull: bool,
}

#[derive(Default)]
struct TransportState {
    senders: HashMap<String, MockSender>,
    fail_discovery: bool,
}

struct TransportInner {
    state: Mutex<TransportState>,
    frame_interval: Duration,
    open: AtomicUsize,
    connects: AtomicUsize,
    attempts: AtomicUsize,
}

/// Scripted texture transport
///
/// Every connection produces solid [`MOCK_COLOR`] frames at the sender's
/// current size until the sender is removed (SourceClosed) or stalled
/// (Timeout).
#[derive(Clone)]
pub struct MockTransport {
    inner: Arc<TransportInner>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::with_frame_interval(Duration::from_millis(5))
    }

    pub fn with_frame_interval(frame_interval: Duration) -> Self {
        Self {
            inner: Arc::new(TransportInner {
                state: Mutex::new(TransportState::default()),
                frame_interval,
                open: AtomicUsize::new(0),
                connects: AtomicUsize::new(0),
                attempts: AtomicUsize::new(0),
            }),
        }
    }

    pub fn add_sender(&self, name: &str, width: u32, height: u32) {
        self.inner.state.lock().senders.insert(
            name.to_string(),
            MockSender {
                width,
                height,
                stalled: false,
                refuse: false,
                pixel_format: PixelFormat::Bgra8,
                panic_on_pull: false,
            },
        );
    }

    pub fn remove_sender(&self, name: &str) {
        self.inner.state.lock().senders.remove(name);
    }

    pub fn resize(&self, name: &str, width: u32, height: u32) {
        if let Some(sender) = self.inner.state.lock().senders.get_mut(name) {
            sender.width = width;
            sender.height = height;
        }
    }

    /// A stalled sender stays advertised but never delivers a frame
    pub fn set_stalled(&self, name: &str, stalled: bool) {
        if let Some(sender) = self.inner.state.lock().senders.get_mut(name) {
            sender.stalled = stalled;
        }
    }

    pub fn set_refuse(&self, name: &str, refuse: bool) {
        if let Some(sender) = self.inner.state.lock().senders.get_mut(name) {
            sender.refuse = refuse;
        }
    }

    /// Frames from `name` use `pixel_format`; non-BGRA frames are all zero
    pub fn set_pixel_format(&self, name: &str, pixel_format: PixelFormat) {
        if let Some(sender) = self.inner.state.lock().senders.get_mut(name) {
            sender.pixel_format = pixel_format;
        }
    }

    /// Pulling from `name` panics inside the transport
    pub fn set_panic_on_pull(&self, name: &str, panic_on_pull: bool) {
        if let Some(sender) = self.inner.state.lock().senders.get_mut(name) {
            sender.panic_on_pull = panic_on_pull;
        }
    }

    pub fn set_fail_discovery(&self, fail: bool) {
        self.inner.state.lock().fail_discovery = fail;
    }

    /// Connections currently open
    pub fn open_connections(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Successful connects so far
    pub fn connects(&self) -> usize {
        self.inner.connects.load(Ordering::SeqCst)
    }

    /// Connect calls so far, refused ones included
    pub fn connect_attempts(&self) -> usize {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl TextureTransport for MockTransport {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn list_senders(&self) -> Result<Vec<SourceDescriptor>, DiscoveryError> {
        let state = self.inner.state.lock();
        if state.fail_discovery {
            return Err(DiscoveryError::QueryFailed("scripted failure".into()));
        }
        Ok(state
            .senders
            .iter()
            .map(|(name, s)| SourceDescriptor::new(name.clone(), s.width, s.height))
            .collect())
    }

    fn connect(&self, name: &str) -> Result<Box<dyn TextureConnection>, ConnectError> {
        self.inner.attempts.fetch_add(1, Ordering::SeqCst);
        let state = self.inner.state.lock();
        match state.senders.get(name) {
            None => Err(ConnectError::SourceNotFound(name.to_string())),
            Some(sender) if sender.refuse => {
                Err(ConnectError::ConnectionRefused(name.to_string()))
            }
            Some(_) => {
                self.inner.open.fetch_add(1, Ordering::SeqCst);
                self.inner.connects.fetch_add(1, Ordering::SeqCst);
                Ok(Box::new(MockConnection {
                    inner: self.inner.clone(),
                    name: name.to_string(),
                    closed: false,
                }))
            }
        }
    }
}

struct MockConnection {
    inner: Arc<TransportInner>,
    name: String,
    closed: bool,
}

impl TextureConnection for MockConnection {
    fn pull(&mut self, timeout: Duration) -> Result<Frame, ReceiveError> {
        let sender = self.inner.state.lock().senders.get(&self.name).cloned();
        let Some(sender) = sender else {
            return Err(ReceiveError::SourceClosed);
        };
        if sender.stalled {
            std::thread::sleep(timeout);
            return Err(ReceiveError::Timeout);
        }
        if sender.panic_on_pull {
            panic!("scripted transport panic in '{}'", self.name);
        }
        std::thread::sleep(self.inner.frame_interval.min(timeout));
        if sender.pixel_format == PixelFormat::Bgra8 {
            return Ok(bgra_frame(sender.width, sender.height, MOCK_COLOR));
        }
        let format = FrameFormat::new(sender.width, sender.height, sender.pixel_format);
        let size = format.buffer_size().expect("mock frame size");
        Ok(Frame::new(format, vec![0; size], now_ns()).expect("mock frame"))
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockConnection {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Default)]
struct BackendState {
    /// Opens that still fail before one succeeds; `None` fails forever
    busy_remaining: Option<u32>,
    always_busy: bool,
    not_installed: bool,
    /// Writes left before the next write fails
    fail_write_after: Option<u64>,
    last_frame: Option<Frame>,
    last_config: Option<SinkConfig>,
}

struct BackendInner {
    state: Mutex<BackendState>,
    open: AtomicUsize,
    opens: AtomicUsize,
    written: AtomicUsize,
}

/// Scripted camera backend
#[derive(Clone)]
pub struct MockCameraBackend {
    inner: Arc<BackendInner>,
}

impl MockCameraBackend {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BackendInner {
                state: Mutex::new(BackendState::default()),
                open: AtomicUsize::new(0),
                opens: AtomicUsize::new(0),
                written: AtomicUsize::new(0),
            }),
        }
    }

    /// Every open fails with DeviceBusy
    pub fn always_busy(self) -> Self {
        self.inner.state.lock().always_busy = true;
        self
    }

    /// The next `count` opens fail with DeviceBusy
    pub fn busy_for(self, count: u32) -> Self {
        self.inner.state.lock().busy_remaining = Some(count);
        self
    }

    /// Every open fails with DeviceNotInstalled
    pub fn not_installed(self) -> Self {
        self.inner.state.lock().not_installed = true;
        self
    }

    /// Fail one write after `count` successful ones
    pub fn fail_write_after(&self, count: u64) {
        self.inner.state.lock().fail_write_after = Some(count);
    }

    /// Devices currently open
    pub fn open_devices(&self) -> usize {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Successful opens so far
    pub fn opens(&self) -> usize {
        self.inner.opens.load(Ordering::SeqCst)
    }

    pub fn frames_written(&self) -> usize {
        self.inner.written.load(Ordering::SeqCst)
    }

    pub fn last_frame(&self) -> Option<Frame> {
        self.inner.state.lock().last_frame.clone()
    }

    pub fn last_config(&self) -> Option<SinkConfig> {
        self.inner.state.lock().last_config.clone()
    }
}

impl Default for MockCameraBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl CameraBackend for MockCameraBackend {
    fn name(&self) -> &'static str {
        "mock"
    }

    fn open(&self, config: &SinkConfig) -> Result<Box<dyn CameraDevice>, SinkError> {
        let mut state = self.inner.state.lock();
        if state.not_installed {
            return Err(SinkError::DeviceNotInstalled("mock driver missing".into()));
        }
        if state.always_busy {
            return Err(SinkError::DeviceBusy(config.name.clone()));
        }
        if let Some(remaining) = state.busy_remaining.as_mut() {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SinkError::DeviceBusy(config.name.clone()));
            }
        }
        state.last_config = Some(config.clone());
        self.inner.open.fetch_add(1, Ordering::SeqCst);
        self.inner.opens.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockCamera {
            inner: self.inner.clone(),
            closed: false,
        }))
    }
}

struct MockCamera {
    inner: Arc<BackendInner>,
    closed: bool,
}

impl CameraDevice for MockCamera {
    fn write_frame(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let mut state = self.inner.state.lock();
        if let Some(left) = state.fail_write_after.as_mut() {
            if *left == 0 {
                state.fail_write_after = None;
                return Err(SinkError::WriteFailed("scripted write failure".into()));
            }
            *left -= 1;
        }
        state.last_frame = Some(frame.clone());
        self.inner.written.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.inner.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for MockCamera {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_frame_layouts() {
        let bgra = bgra_frame(2, 1, [1, 2, 3, 4]);
        assert_eq!(bgra.data(), &[1, 2, 3, 4, 1, 2, 3, 4]);

        let rgb = solid_frame(FrameFormat::new(1, 1, PixelFormat::Rgb8), [1, 2, 3, 4]);
        assert_eq!(rgb.data(), &[3, 2, 1]);
    }

    #[test]
    fn test_mock_connection_counts() {
        let transport = MockTransport::new();
        transport.add_sender("VRChatCam", 8, 8);
        let mut conn = transport.connect("VRChatCam").unwrap();
        assert_eq!(transport.open_connections(), 1);
        conn.close();
        conn.close();
        assert_eq!(transport.open_connections(), 0);
    }
}
