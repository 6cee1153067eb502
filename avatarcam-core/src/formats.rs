//! Pixel format definitions
//!
//! Centralizes pixel layout handling: byte sizes, V4L2 fourcc codes, the
//! numeric codes used in the memshare frame header, and which layouts the
//! converter supports.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// V4L2 fourcc codes for the formats we can present to a camera consumer
///
/// See: <https://www.kernel.org/doc/html/latest/userspace-api/media/v4l/pixfmt-rgb.html>
pub mod fourcc {
    /// V4L2_PIX_FMT_ABGR32, memory order B G R A
    pub const BGRA8: [u8; 4] = *b"AR24";
    /// V4L2_PIX_FMT_RGBA32, memory order R G B A
    pub const RGBA8: [u8; 4] = *b"AB24";
    /// V4L2_PIX_FMT_BGR24
    pub const BGR8: [u8; 4] = *b"BGR3";
    /// V4L2_PIX_FMT_RGB24
    pub const RGB8: [u8; 4] = *b"RGB3";
    /// V4L2_PIX_FMT_NV12, YUV 4:2:0 semi-planar
    pub const NV12: [u8; 4] = *b"NV12";
    /// V4L2_PIX_FMT_YUYV, packed YUV 4:2:2
    pub const YUYV: [u8; 4] = *b"YUYV";
}

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PixelFormat {
    /// 32-bit B G R A, the usual shared-texture layout
    #[default]
    Bgra8,
    /// 32-bit R G B A
    Rgba8,
    /// 24-bit B G R
    Bgr8,
    /// 24-bit R G B
    Rgb8,
    /// YUV 4:2:0 semi-planar
    Nv12,
    /// Packed YUV 4:2:2
    Yuyv,
}

/// Byte offsets of the colour channels inside one pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    pub r: usize,
    pub g: usize,
    pub b: usize,
    pub a: Option<usize>,
}

impl PixelFormat {
    /// Every known format
    pub const ALL: [PixelFormat; 6] = [
        Self::Bgra8,
        Self::Rgba8,
        Self::Bgr8,
        Self::Rgb8,
        Self::Nv12,
        Self::Yuyv,
    ];

    /// Bytes per pixel in the first plane
    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            Self::Bgra8 | Self::Rgba8 => 4,
            Self::Bgr8 | Self::Rgb8 => 3,
            Self::Yuyv => 2,
            Self::Nv12 => 1,
        }
    }

    /// Total size of a tightly packed frame, `None` if it overflows `usize`
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = (width as usize).checked_mul(height as usize)?;
        match self {
            Self::Nv12 => pixels.checked_add(pixels / 2),
            other => pixels.checked_mul(other.bytes_per_pixel()),
        }
    }

    /// Whether the converter can read and write this format
    pub fn is_convertible(&self) -> bool {
        self.channels().is_some()
    }

    /// Channel offsets for packed RGB layouts
    pub fn channels(&self) -> Option<ChannelLayout> {
        match self {
            Self::Bgra8 => Some(ChannelLayout { r: 2, g: 1, b: 0, a: Some(3) }),
            Self::Rgba8 => Some(ChannelLayout { r: 0, g: 1, b: 2, a: Some(3) }),
            Self::Bgr8 => Some(ChannelLayout { r: 2, g: 1, b: 0, a: None }),
            Self::Rgb8 => Some(ChannelLayout { r: 0, g: 1, b: 2, a: None }),
            Self::Nv12 | Self::Yuyv => None,
        }
    }

    /// V4L2 fourcc code
    pub fn fourcc(&self) -> [u8; 4] {
        match self {
            Self::Bgra8 => fourcc::BGRA8,
            Self::Rgba8 => fourcc::RGBA8,
            Self::Bgr8 => fourcc::BGR8,
            Self::Rgb8 => fourcc::RGB8,
            Self::Nv12 => fourcc::NV12,
            Self::Yuyv => fourcc::YUYV,
        }
    }

    /// Numeric code stored in the memshare frame header
    pub fn wire_code(&self) -> u16 {
        match self {
            Self::Bgra8 => 1,
            Self::Rgba8 => 2,
            Self::Bgr8 => 3,
            Self::Rgb8 => 4,
            Self::Nv12 => 5,
            Self::Yuyv => 6,
        }
    }

    /// Inverse of [`PixelFormat::wire_code`]
    pub fn from_wire_code(code: u16) -> Option<Self> {
        Self::ALL.into_iter().find(|f| f.wire_code() == code)
    }

    /// Lowercase name as used in config files
    pub fn name(&self) -> &'static str {
        match self {
            Self::Bgra8 => "bgra8",
            Self::Rgba8 => "rgba8",
            Self::Bgr8 => "bgr8",
            Self::Rgb8 => "rgb8",
            Self::Nv12 => "nv12",
            Self::Yuyv => "yuyv",
        }
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.to_ascii_lowercase();
        match lower.as_str() {
            "bgra" | "bgra8" => Ok(Self::Bgra8),
            "rgba" | "rgba8" => Ok(Self::Rgba8),
            "bgr" | "bgr8" | "bgr24" => Ok(Self::Bgr8),
            "rgb" | "rgb8" | "rgb24" => Ok(Self::Rgb8),
            "nv12" => Ok(Self::Nv12),
            "yuyv" | "yuy2" => Ok(Self::Yuyv),
            _ => Err(format!("unknown pixel format '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        assert_eq!(PixelFormat::Bgra8.bytes_per_pixel(), 4);
        assert_eq!(PixelFormat::Rgb8.bytes_per_pixel(), 3);
        assert_eq!(PixelFormat::Yuyv.bytes_per_pixel(), 2);
    }

    #[test]
    fn test_frame_size() {
        assert_eq!(PixelFormat::Bgra8.frame_size(1280, 720), Some(1280 * 720 * 4));
        assert_eq!(PixelFormat::Nv12.frame_size(4, 4), Some(24));
        assert_eq!(PixelFormat::Bgra8.frame_size(u32::MAX, u32::MAX), None);
    }

    #[test]
    fn test_wire_code_round_trip() {
        for format in PixelFormat::ALL {
            assert_eq!(PixelFormat::from_wire_code(format.wire_code()), Some(format));
        }
        assert_eq!(PixelFormat::from_wire_code(0), None);
    }

    #[test]
    fn test_convertible_set() {
        assert!(PixelFormat::Bgra8.is_convertible());
        assert!(PixelFormat::Rgb8.is_convertible());
        assert!(!PixelFormat::Nv12.is_convertible());
        assert!(!PixelFormat::Yuyv.is_convertible());
    }

    #[test]
    fn test_parse() {
        assert_eq!("BGRA".parse::<PixelFormat>(), Ok(PixelFormat::Bgra8));
        assert_eq!("rgb24".parse::<PixelFormat>(), Ok(PixelFormat::Rgb8));
        assert!("p010".parse::<PixelFormat>().is_err());
    }
}
