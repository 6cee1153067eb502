//! Configuration types for AvatarCam
//!
//! [`BridgeConfig`] is the runtime configuration consumed by the pipeline.
//! It is usually built from a [`ConfigFile`] but can be assembled directly
//! with the `with_*` builders.

mod file;

pub use file::{
    default_log_dir, sample_config, CameraSection, ConfigFile, OutputSection, PreviewSection, RecoverySection,
    SourceSection,
};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::formats::PixelFormat;
use crate::types::SelectionPolicy;

/// Default sender name pattern for auto-detection
pub const DEFAULT_AUTO_PATTERN: &str = "VRC";

/// Default virtual camera name
pub const DEFAULT_CAMERA_NAME: &str = "AvatarCam";

/// Output resolution of the virtual camera
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputResolution {
    /// Keep the sender's size
    #[default]
    Source,
    /// 854x480
    P480,
    /// 1280x720
    P720,
    /// 1920x1080
    P1080,
    /// 2560x1440
    P1440,
    /// 3840x2160
    P2160,
    /// Exact size, upscaling allowed
    Custom { width: u32, height: u32 },
}

impl OutputResolution {
    /// Fixed dimensions of a preset, `None` for [`OutputResolution::Source`]
    pub fn dimensions(&self) -> Option<(u32, u32)> {
        match self {
            Self::Source => None,
            Self::P480 => Some((854, 480)),
            Self::P720 => Some((1280, 720)),
            Self::P1080 => Some((1920, 1080)),
            Self::P1440 => Some((2560, 1440)),
            Self::P2160 => Some((3840, 2160)),
            Self::Custom { width, height } => Some((*width, *height)),
        }
    }

    /// Output size for a sender of `source_width` x `source_height`
    ///
    /// Presets never upscale: if the sender is smaller than the preset in
    /// either dimension the sender size is used.
    pub fn resolve(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        match self {
            Self::Source => (source_width, source_height),
            Self::Custom { width, height } => (*width, *height),
            preset => match preset.dimensions() {
                Some((w, h)) if source_width >= w && source_height >= h => (w, h),
                _ => (source_width, source_height),
            },
        }
    }
}

impl std::fmt::Display for OutputResolution {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Source => write!(f, "source"),
            Self::P480 => write!(f, "480p"),
            Self::P720 => write!(f, "720p"),
            Self::P1080 => write!(f, "1080p"),
            Self::P1440 => write!(f, "1440p"),
            Self::P2160 => write!(f, "2160p"),
            Self::Custom { width, height } => write!(f, "{}x{}", width, height),
        }
    }
}

impl std::str::FromStr for OutputResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "source" | "native" => Ok(Self::Source),
            "480p" => Ok(Self::P480),
            "720p" => Ok(Self::P720),
            "1080p" => Ok(Self::P1080),
            "1440p" | "2k" => Ok(Self::P1440),
            "2160p" | "4k" => Ok(Self::P2160),
            other => {
                let parsed = other
                    .split_once('x')
                    .and_then(|(w, h)| Some((w.parse().ok()?, h.parse().ok()?)));
                match parsed {
                    Some((width, height)) => Ok(Self::Custom { width, height }),
                    None => Err(format!("Unknown resolution: {}", s)),
                }
            }
        }
    }
}

/// Virtual camera driver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraBackendKind {
    /// Publish output as a memshare sender
    #[default]
    MemShare,
    /// Write to a v4l2loopback device node
    V4l2Loopback,
}

impl std::fmt::Display for CameraBackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MemShare => write!(f, "memshare"),
            Self::V4l2Loopback => write!(f, "v4l2loopback"),
        }
    }
}

impl std::str::FromStr for CameraBackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "memshare" | "shm" => Ok(Self::MemShare),
            "v4l2loopback" | "v4l2" => Ok(Self::V4l2Loopback),
            _ => Err(format!("Unknown camera backend: {}", s)),
        }
    }
}

/// Virtual camera settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CameraConfig {
    /// Which driver to use
    pub backend: CameraBackendKind,
    /// Name shown to consumers
    pub name: String,
    /// Device node for v4l2loopback
    pub device: PathBuf,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            backend: CameraBackendKind::default(),
            name: DEFAULT_CAMERA_NAME.to_string(),
            device: PathBuf::from("/dev/video10"),
        }
    }
}

/// Memshare transport settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Sender directory, `None` for the per-user runtime directory
    pub directory: Option<PathBuf>,
    /// Senders not updated for this long are no longer advertised
    pub stale_after: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            directory: None,
            stale_after: Duration::from_secs(5),
        }
    }
}

/// Preview stream settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PreviewConfig {
    pub enabled: bool,
    /// Preview frames per second
    pub fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            fps: 5,
            width: 384,
            height: 216,
        }
    }
}

impl PreviewConfig {
    /// Keep one frame in this many for a stream of `output_fps`
    pub fn frames_per_preview(&self, output_fps: u32) -> u32 {
        if self.fps == 0 {
            return u32::MAX;
        }
        (output_fps / self.fps).max(1)
    }
}

/// Timeouts, backoff caps and retry budgets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryPolicy {
    /// Blocking receive timeout; also bounds stop latency
    pub receive_timeout: Duration,
    /// Consecutive timeouts before the source counts as lost
    pub stall_timeouts: u32,
    pub scan_backoff_base: Duration,
    pub scan_backoff_max: Duration,
    /// Pause between SourceLost and the next scan
    pub source_lost_cooldown: Duration,
    /// Consecutive sink failures before giving up
    pub sink_retry_budget: u32,
    pub sink_backoff_base: Duration,
    pub sink_backoff_max: Duration,
    /// Consecutive blank samples before the source counts as lost, 0 disables
    pub blank_frame_limit: u32,
}

impl Default for RecoveryPolicy {
    fn default() -> Self {
        Self {
            receive_timeout: Duration::from_millis(100),
            stall_timeouts: 30,
            scan_backoff_base: Duration::from_millis(500),
            scan_backoff_max: Duration::from_secs(5),
            source_lost_cooldown: Duration::from_secs(1),
            sink_retry_budget: 5,
            sink_backoff_base: Duration::from_millis(250),
            sink_backoff_max: Duration::from_secs(4),
            blank_frame_limit: 10,
        }
    }
}

/// Complete bridge configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// How to pick a sender
    pub selection: SelectionPolicy,
    /// Output size
    pub resolution: OutputResolution,
    /// Output frame rate
    pub fps: u32,
    /// Pixel layout delivered to the camera
    pub pixel_format: PixelFormat,
    pub camera: CameraConfig,
    pub transport: TransportConfig,
    pub preview: PreviewConfig,
    pub recovery: RecoveryPolicy,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            selection: SelectionPolicy::auto(DEFAULT_AUTO_PATTERN),
            resolution: OutputResolution::default(),
            fps: 30,
            pixel_format: PixelFormat::Rgba8,
            camera: CameraConfig::default(),
            transport: TransportConfig::default(),
            preview: PreviewConfig::default(),
            recovery: RecoveryPolicy::default(),
        }
    }
}

impl BridgeConfig {
    /// Config that auto-detects senders containing `pattern`
    pub fn auto(pattern: impl Into<String>) -> Self {
        Self::default().with_selection(SelectionPolicy::auto(pattern))
    }

    /// Config bound to one named sender
    pub fn manual(name: impl Into<String>) -> Self {
        Self::default().with_selection(SelectionPolicy::manual(name))
    }

    /// Set the selection policy
    pub fn with_selection(mut self, selection: SelectionPolicy) -> Self {
        self.selection = selection;
        self
    }

    /// Set the output resolution
    pub fn with_resolution(mut self, resolution: OutputResolution) -> Self {
        self.resolution = resolution;
        self
    }

    /// Set the output frame rate
    pub fn with_fps(mut self, fps: u32) -> Self {
        self.fps = fps;
        self
    }

    /// Set the output pixel format
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.pixel_format = format;
        self
    }

    /// Set the virtual camera name
    pub fn with_camera_name(mut self, name: impl Into<String>) -> Self {
        self.camera.name = name.into();
        self
    }

    /// Set the camera backend
    pub fn with_camera_backend(mut self, backend: CameraBackendKind) -> Self {
        self.camera.backend = backend;
        self
    }

    /// Set the memshare sender directory
    pub fn with_transport_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.transport.directory = Some(dir.into());
        self
    }

    /// Set preview settings
    pub fn with_preview(mut self, preview: PreviewConfig) -> Self {
        self.preview = preview;
        self
    }

    /// Set recovery timing
    pub fn with_recovery(mut self, recovery: RecoveryPolicy) -> Self {
        self.recovery = recovery;
        self
    }

    /// Validate the configuration and return any warnings
    ///
    /// An empty list means the configuration looks good.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if let SelectionPolicy::Auto { pattern } = &self.selection {
            if pattern.is_empty() {
                warnings.push(
                    "Empty auto-detect pattern matches every sender; the most recent one wins."
                        .to_string(),
                );
            }
        }

        if self.fps > 60 {
            warnings.push(format!(
                "{}fps is above what most camera consumers accept (60). Frames will be dropped downstream.",
                self.fps
            ));
        }

        if self.preview.enabled && self.preview.fps > self.fps {
            warnings.push(format!(
                "Preview rate {}fps exceeds output rate {}fps; preview will run at {}fps.",
                self.preview.fps, self.fps, self.fps
            ));
        }

        if let OutputResolution::Custom { width, height } = self.resolution {
            if width % 2 != 0 || height % 2 != 0 {
                warnings.push(format!(
                    "Odd output size {}x{} is rejected by some camera consumers.",
                    width, height
                ));
            }
        }

        if self.camera.backend == CameraBackendKind::V4l2Loopback
            && !cfg!(feature = "v4l2loopback")
        {
            warnings.push(
                "This build has no v4l2loopback support; the camera will report DeviceNotInstalled."
                    .to_string(),
            );
        }

        if self.recovery.sink_retry_budget == 0 {
            warnings.push("sink_retry_budget = 0: the first camera failure is terminal.".to_string());
        }

        warnings
    }

    /// Validate and return an error if configuration is invalid
    ///
    /// Unlike `validate()` which returns warnings, this returns hard errors
    /// for configurations that cannot work.
    pub fn validate_strict(&self) -> Result<(), String> {
        if self.fps == 0 {
            return Err("Framerate cannot be zero".to_string());
        }

        if self.fps > 240 {
            return Err(format!("Framerate {} exceeds maximum supported (240)", self.fps));
        }

        if !self.pixel_format.is_convertible() {
            return Err(format!(
                "Output pixel format '{}' is not supported; use bgra8, rgba8, bgr8 or rgb8",
                self.pixel_format
            ));
        }

        if let OutputResolution::Custom { width, height } = self.resolution {
            if width == 0 || height == 0 {
                return Err("Resolution cannot be zero".to_string());
            }
            if width > 7680 || height > 4320 {
                return Err(format!(
                    "Resolution {}x{} exceeds maximum supported (7680x4320)",
                    width, height
                ));
            }
        }

        if let SelectionPolicy::Manual { name } = &self.selection {
            if name.is_empty() {
                return Err("Source name cannot be empty".to_string());
            }
        }

        if self.camera.name.is_empty() || self.camera.name.contains('/') {
            return Err(format!("Invalid camera name '{}'", self.camera.name));
        }

        if self.preview.enabled && (self.preview.width == 0 || self.preview.height == 0) {
            return Err("Preview size cannot be zero".to_string());
        }

        if self.recovery.receive_timeout.is_zero() {
            return Err("receive_timeout_ms cannot be zero".to_string());
        }

        if self.recovery.stall_timeouts == 0 {
            return Err("stall_timeouts cannot be zero".to_string());
        }

        if self.recovery.scan_backoff_base > self.recovery.scan_backoff_max
            || self.recovery.sink_backoff_base > self.recovery.sink_backoff_max
        {
            return Err("Backoff base cannot exceed backoff max".to_string());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_never_upscales() {
        assert_eq!(OutputResolution::P1080.resolve(1280, 720), (1280, 720));
        assert_eq!(OutputResolution::P720.resolve(1920, 1080), (1280, 720));
        // Smaller in one dimension only still keeps the source size
        assert_eq!(OutputResolution::P720.resolve(1920, 700), (1920, 700));
        assert_eq!(OutputResolution::Source.resolve(640, 480), (640, 480));
    }

    #[test]
    fn test_custom_resolution_is_exact() {
        let res: OutputResolution = "1024x576".parse().unwrap();
        assert_eq!(res, OutputResolution::Custom { width: 1024, height: 576 });
        assert_eq!(res.resolve(640, 360), (1024, 576));
    }

    #[test]
    fn test_frames_per_preview() {
        let preview = PreviewConfig::default();
        assert_eq!(preview.frames_per_preview(30), 6);
        assert_eq!(preview.frames_per_preview(3), 1);
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = BridgeConfig::default();
        assert!(config.validate_strict().is_ok());
    }

    #[test]
    fn test_rejects_yuv_output() {
        let config = BridgeConfig::default().with_pixel_format(PixelFormat::Nv12);
        assert!(config.validate_strict().is_err());
    }
}
