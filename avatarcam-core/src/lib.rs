//! AvatarCam Core Library
//!
//! Bridges shared-texture senders (such as a game's stream camera) to a
//! virtual camera device.
//!
//! This library provides:
//! - Sender discovery and frame transport over per-user shared memory
//! - Pixel format conversion and bilinear scaling
//! - Virtual camera output (memshare, or v4l2loopback behind a feature)
//! - A self-healing pipeline with a subscribable state
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐    ┌──────────────┐    ┌─────────────────┐
//! │ Texture Sender  │───▶│   Convert    │───▶│ Virtual Camera  │
//! │ (FrameReceiver) │    │  (+ Preview) │    │  (CameraSink)   │
//! └─────────────────┘    └──────────────┘    └─────────────────┘
//!          acquisition thread              output thread
//! ```

pub mod capture;
pub mod config;
pub mod convert;
pub mod error;
pub mod formats;
pub mod ipc;
pub mod output;
pub mod performance;
pub mod pipeline;
pub mod types;

pub use config::{BridgeConfig, ConfigFile, OutputResolution};
pub use error::{AvatarCamError, Result};
pub use formats::PixelFormat;
pub use pipeline::{Pipeline, PipelineState, PipelineStats, PipelineStatus, StatusEvent};
pub use types::{Frame, FrameFormat, Handle, SelectionPolicy, SinkFormat, SourceDescriptor};
