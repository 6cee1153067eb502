//! Configuration file loading
//!
//! Loads user configuration from `~/.config/avatarcam/config.toml`

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use super::{
    BridgeConfig, CameraConfig, PreviewConfig, RecoveryPolicy, TransportConfig,
    DEFAULT_AUTO_PATTERN, DEFAULT_CAMERA_NAME,
};
use crate::error::{AvatarCamError, Result};
use crate::types::SelectionPolicy;

/// Configuration file structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfigFile {
    /// Sender selection
    #[serde(default)]
    pub source: SourceSection,

    /// Output format
    #[serde(default)]
    pub output: OutputSection,

    /// Virtual camera settings
    #[serde(default)]
    pub camera: CameraSection,

    /// Preview stream settings
    #[serde(default)]
    pub preview: PreviewSection,

    /// Reconnection timing
    #[serde(default)]
    pub recovery: RecoverySection,
}

/// Sender selection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceSection {
    /// Last selected sender; when set, auto-detection is skipped
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Substring used to auto-detect a sender
    #[serde(default = "default_auto_pattern")]
    pub auto_pattern: String,

    /// Memshare sender directory override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,

    /// Senders idle for longer than this are ignored
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: u64,
}

/// Output format settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSection {
    /// source, 480p, 720p, 1080p, 1440p, 2160p or WIDTHxHEIGHT
    #[serde(default = "default_resolution")]
    pub resolution: String,

    #[serde(default = "default_fps")]
    pub fps: u32,

    /// bgra8, rgba8, bgr8, rgb8
    #[serde(default = "default_pixel_format")]
    pub pixel_format: String,
}

/// Virtual camera settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraSection {
    /// memshare or v4l2loopback
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Virtual camera name
    #[serde(default = "default_camera_name")]
    pub name: String,

    /// v4l2loopback device node
    #[serde(default = "default_device")]
    pub device: PathBuf,
}

/// Preview stream settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewSection {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_preview_fps")]
    pub fps: u32,

    #[serde(default = "default_preview_width")]
    pub width: u32,

    #[serde(default = "default_preview_height")]
    pub height: u32,
}

/// Reconnection timing and retry budgets
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecoverySection {
    #[serde(default = "default_receive_timeout_ms")]
    pub receive_timeout_ms: u64,
    #[serde(default = "default_stall_timeouts")]
    pub stall_timeouts: u32,
    #[serde(default = "default_scan_backoff_base_ms")]
    pub scan_backoff_base_ms: u64,
    #[serde(default = "default_scan_backoff_max_ms")]
    pub scan_backoff_max_ms: u64,
    #[serde(default = "default_source_lost_cooldown_ms")]
    pub source_lost_cooldown_ms: u64,
    #[serde(default = "default_sink_retry_budget")]
    pub sink_retry_budget: u32,
    #[serde(default = "default_sink_backoff_base_ms")]
    pub sink_backoff_base_ms: u64,
    #[serde(default = "default_sink_backoff_max_ms")]
    pub sink_backoff_max_ms: u64,
    #[serde(default = "default_blank_frame_limit")]
    pub blank_frame_limit: u32,
}

// Default value functions
fn default_auto_pattern() -> String {
    DEFAULT_AUTO_PATTERN.to_string()
}

fn default_stale_after_ms() -> u64 {
    5000
}

fn default_resolution() -> String {
    "source".to_string()
}

fn default_fps() -> u32 {
    30
}

fn default_pixel_format() -> String {
    "rgba8".to_string()
}

fn default_backend() -> String {
    "memshare".to_string()
}

fn default_camera_name() -> String {
    DEFAULT_CAMERA_NAME.to_string()
}

fn default_device() -> PathBuf {
    PathBuf::from("/dev/video10")
}

fn default_true() -> bool {
    true
}

fn default_preview_fps() -> u32 {
    5
}

fn default_preview_width() -> u32 {
    384
}

fn default_preview_height() -> u32 {
    216
}

fn default_receive_timeout_ms() -> u64 {
    100
}

fn default_stall_timeouts() -> u32 {
    30
}

fn default_scan_backoff_base_ms() -> u64 {
    500
}

fn default_scan_backoff_max_ms() -> u64 {
    5000
}

fn default_source_lost_cooldown_ms() -> u64 {
    1000
}

fn default_sink_retry_budget() -> u32 {
    5
}

fn default_sink_backoff_base_ms() -> u64 {
    250
}

fn default_sink_backoff_max_ms() -> u64 {
    4000
}

fn default_blank_frame_limit() -> u32 {
    10
}

impl Default for SourceSection {
    fn default() -> Self {
        Self {
            name: None,
            auto_pattern: default_auto_pattern(),
            directory: None,
            stale_after_ms: default_stale_after_ms(),
        }
    }
}

impl Default for OutputSection {
    fn default() -> Self {
        Self {
            resolution: default_resolution(),
            fps: default_fps(),
            pixel_format: default_pixel_format(),
        }
    }
}

impl Default for CameraSection {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            name: default_camera_name(),
            device: default_device(),
        }
    }
}

impl Default for PreviewSection {
    fn default() -> Self {
        Self {
            enabled: true,
            fps: default_preview_fps(),
            width: default_preview_width(),
            height: default_preview_height(),
        }
    }
}

impl Default for RecoverySection {
    fn default() -> Self {
        Self {
            receive_timeout_ms: default_receive_timeout_ms(),
            stall_timeouts: default_stall_timeouts(),
            scan_backoff_base_ms: default_scan_backoff_base_ms(),
            scan_backoff_max_ms: default_scan_backoff_max_ms(),
            source_lost_cooldown_ms: default_source_lost_cooldown_ms(),
            sink_retry_budget: default_sink_retry_budget(),
            sink_backoff_base_ms: default_sink_backoff_base_ms(),
            sink_backoff_max_ms: default_sink_backoff_max_ms(),
            blank_frame_limit: default_blank_frame_limit(),
        }
    }
}

/// Directory for the rolling log file
pub fn default_log_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join("avatarcam")
        .join("logs")
}

impl ConfigFile {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        if let Some(config_dir) = dirs::config_dir() {
            config_dir.join("avatarcam").join("config.toml")
        } else if let Some(home) = dirs::home_dir() {
            home.join(".config").join("avatarcam").join("config.toml")
        } else {
            PathBuf::from("/etc/avatarcam/config.toml")
        }
    }

    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        Self::load_from(Self::default_path())
    }

    /// Load configuration from a specific path
    ///
    /// A missing file yields the defaults.
    pub fn load_from(path: PathBuf) -> Result<Self> {
        if !path.exists() {
            debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&path)
            .map_err(|e| AvatarCamError::config(format!("Failed to read config file: {}", e)))?;

        let config: ConfigFile = toml::from_str(&content)?;

        info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    /// Save configuration to the default path
    pub fn save(&self) -> Result<()> {
        self.save_to(Self::default_path())
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: PathBuf) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    AvatarCamError::config(format!("Failed to create config directory: {}", e))
                })?;
            }
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| AvatarCamError::config(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(&path, content)
            .map_err(|e| AvatarCamError::config(format!("Failed to write config file: {}", e)))?;

        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Write the commented sample to `path`
    ///
    /// Returns false when a file is already there and `force` is off.
    pub fn write_sample_to(path: &Path, force: bool) -> Result<bool> {
        if path.exists() && !force {
            return Ok(false);
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, sample_config())?;
        info!("Wrote sample configuration to {:?}", path);
        Ok(true)
    }

    /// Selection policy stored in the file
    pub fn selection(&self) -> SelectionPolicy {
        match &self.source.name {
            Some(name) if !name.is_empty() => SelectionPolicy::manual(name.clone()),
            _ => SelectionPolicy::auto(self.source.auto_pattern.clone()),
        }
    }

    /// Persist a selection as the last selected source
    pub fn set_selection(&mut self, selection: &SelectionPolicy) {
        match selection {
            SelectionPolicy::Manual { name } => self.source.name = Some(name.clone()),
            SelectionPolicy::Auto { pattern } => {
                self.source.name = None;
                self.source.auto_pattern = pattern.clone();
            }
        }
    }

    /// Convert to the runtime configuration
    pub fn to_bridge_config(&self) -> Result<BridgeConfig> {
        let resolution = self.output.resolution.parse().map_err(AvatarCamError::config)?;
        let pixel_format = self.output.pixel_format.parse().map_err(AvatarCamError::config)?;
        let backend = self.camera.backend.parse().map_err(AvatarCamError::config)?;
        let r = &self.recovery;

        Ok(BridgeConfig {
            selection: self.selection(),
            resolution,
            fps: self.output.fps,
            pixel_format,
            camera: CameraConfig {
                backend,
                name: self.camera.name.clone(),
                device: self.camera.device.clone(),
            },
            transport: TransportConfig {
                directory: self.source.directory.clone(),
                stale_after: Duration::from_millis(self.source.stale_after_ms),
            },
            preview: PreviewConfig {
                enabled: self.preview.enabled,
                fps: self.preview.fps,
                width: self.preview.width,
                height: self.preview.height,
            },
            recovery: RecoveryPolicy {
                receive_timeout: Duration::from_millis(r.receive_timeout_ms),
                stall_timeouts: r.stall_timeouts,
                scan_backoff_base: Duration::from_millis(r.scan_backoff_base_ms),
                scan_backoff_max: Duration::from_millis(r.scan_backoff_max_ms),
                source_lost_cooldown: Duration::from_millis(r.source_lost_cooldown_ms),
                sink_retry_budget: r.sink_retry_budget,
                sink_backoff_base: Duration::from_millis(r.sink_backoff_base_ms),
                sink_backoff_max: Duration::from_millis(r.sink_backoff_max_ms),
                blank_frame_limit: r.blank_frame_limit,
            },
        })
    }
}

/// Generate a sample configuration file
pub fn sample_config() -> String {
    r#"# AvatarCam Configuration

[source]
# Sender to use. Leave unset to auto-detect.
# name = "VRChatCam"

# Auto-detect the first sender whose name contains this text
auto_pattern = "VRC"

# Senders that have not published for this long are ignored (milliseconds)
stale_after_ms = 5000

[output]
# Output size: source, 480p, 720p, 1080p, 1440p, 2160p or WIDTHxHEIGHT
# Presets never upscale a smaller sender.
resolution = "source"

# Output frame rate
fps = 30

# Pixel format delivered to the camera: bgra8, rgba8, bgr8, rgb8
pixel_format = "rgba8"

[camera]
# Camera driver: memshare or v4l2loopback
backend = "memshare"

# Virtual camera name shown in applications
name = "AvatarCam"

# Device node used by the v4l2loopback backend
device = "/dev/video10"

[preview]
enabled = true
fps = 5
width = 384
height = 216

[recovery]
# How long one receive waits for a frame
receive_timeout_ms = 100

# Consecutive receive timeouts before the sender is considered lost
stall_timeouts = 30

# Backoff between scans while no sender is found
scan_backoff_base_ms = 500
scan_backoff_max_ms = 5000

# Pause after losing a sender before scanning again
source_lost_cooldown_ms = 1000

# Camera reopen attempts before giving up
sink_retry_budget = 5
sink_backoff_base_ms = 250
sink_backoff_max_ms = 4000

# Consecutive blank samples (every 10th frame) before the sender counts as lost
blank_frame_limit = 10
"#
    .to_string()
}
