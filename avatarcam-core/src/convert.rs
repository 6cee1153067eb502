//! Pixel format conversion and resizing
//!
//! Conversion is a pure function of its inputs. Channel reordering is exact;
//! resizing is a bilinear convolution from `fast_image_resize`, with every
//! byte lane filtered independently.

use fast_image_resize as fr;
use fr::images::Image;

use crate::error::ConversionError;
use crate::formats::{ChannelLayout, PixelFormat};
use crate::types::{Frame, FrameFormat, SinkFormat};

/// Pixel layout and size a frame should be converted to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvertTarget {
    pub pixel_format: PixelFormat,
    pub width: u32,
    pub height: u32,
}

impl ConvertTarget {
    pub fn new(pixel_format: PixelFormat, width: u32, height: u32) -> Self {
        Self {
            pixel_format,
            width,
            height,
        }
    }

    pub fn frame_format(&self) -> FrameFormat {
        FrameFormat::new(self.width, self.height, self.pixel_format)
    }
}

impl From<SinkFormat> for ConvertTarget {
    fn from(format: SinkFormat) -> Self {
        Self::new(format.pixel_format, format.width, format.height)
    }
}

/// Convert `frame` to `target` layout at `size`
///
/// Identity conversions return a byte-identical copy.
pub fn convert(
    frame: &Frame,
    target: PixelFormat,
    size: (u32, u32),
) -> Result<Frame, ConversionError> {
    let source = check(frame, target, size)?;
    if source.pixel_format == target && source.size() == size {
        return Ok(frame.clone());
    }
    run(frame, target, size)
}

/// Like [`convert`], but hands back the input buffer untouched on identity
pub fn convert_owned(
    frame: Frame,
    target: PixelFormat,
    size: (u32, u32),
) -> Result<Frame, ConversionError> {
    let source = check(&frame, target, size)?;
    if source.pixel_format == target && source.size() == size {
        return Ok(frame);
    }
    run(&frame, target, size)
}

fn check(frame: &Frame, target: PixelFormat, size: (u32, u32)) -> Result<FrameFormat, ConversionError> {
    let source = frame.format();
    if !source.pixel_format.is_convertible() {
        return Err(ConversionError::UnsupportedFormat(source.pixel_format.to_string()));
    }
    if !target.is_convertible() {
        return Err(ConversionError::UnsupportedFormat(target.to_string()));
    }
    if size.0 == 0 || size.1 == 0 {
        return Err(ConversionError::InvalidSize {
            width: size.0,
            height: size.1,
        });
    }
    let expected = source.buffer_size().ok_or(ConversionError::InvalidSize {
        width: source.width,
        height: source.height,
    })?;
    if frame.data().len() != expected {
        return Err(ConversionError::BufferSize {
            expected,
            actual: frame.data().len(),
        });
    }
    Ok(source)
}

fn run(frame: &Frame, target: PixelFormat, size: (u32, u32)) -> Result<Frame, ConversionError> {
    let source = frame.format();
    if source.width == 0 || source.height == 0 {
        return Err(ConversionError::InvalidSize {
            width: source.width,
            height: source.height,
        });
    }

    let (pixels, format) = if source.pixel_format == target {
        (frame.data().to_vec(), source)
    } else {
        (
            reorder(frame.data(), source.pixel_format, target)?,
            FrameFormat::new(source.width, source.height, target),
        )
    };

    let data = if format.size() == size {
        pixels
    } else {
        resize_bilinear(pixels, format, size)?
    };

    Frame::new(FrameFormat::new(size.0, size.1, target), data, frame.pts)
}

fn layout(format: PixelFormat) -> Result<ChannelLayout, ConversionError> {
    format
        .channels()
        .ok_or_else(|| ConversionError::UnsupportedFormat(format.to_string()))
}

/// Reorder channels between packed RGB layouts at the same size
fn reorder(src: &[u8], from: PixelFormat, to: PixelFormat) -> Result<Vec<u8>, ConversionError> {
    let src_layout = layout(from)?;
    let dst_layout = layout(to)?;
    let src_bpp = from.bytes_per_pixel();
    let dst_bpp = to.bytes_per_pixel();
    let pixel_count = src.len() / src_bpp;

    let mut out = vec![0u8; pixel_count * dst_bpp];
    for (s, d) in src.chunks_exact(src_bpp).zip(out.chunks_exact_mut(dst_bpp)) {
        d[dst_layout.r] = s[src_layout.r];
        d[dst_layout.g] = s[src_layout.g];
        d[dst_layout.b] = s[src_layout.b];
        if let Some(a) = dst_layout.a {
            d[a] = src_layout.a.map_or(255, |sa| s[sa]);
        }
    }
    Ok(out)
}

fn pixel_type(format: PixelFormat) -> Result<fr::PixelType, ConversionError> {
    match format.bytes_per_pixel() {
        4 => Ok(fr::PixelType::U8x4),
        3 => Ok(fr::PixelType::U8x3),
        _ => Err(ConversionError::UnsupportedFormat(format.to_string())),
    }
}

/// Bilinear resize of a packed frame
fn resize_bilinear(
    pixels: Vec<u8>,
    format: FrameFormat,
    size: (u32, u32),
) -> Result<Vec<u8>, ConversionError> {
    let pixel_type = pixel_type(format.pixel_format)?;
    let src = Image::from_vec_u8(format.width, format.height, pixels, pixel_type)
        .map_err(|e| ConversionError::Resize(e.to_string()))?;
    let mut dst = Image::new(size.0, size.1, pixel_type);

    // Alpha is carried as a plain channel, never premultiplied
    let options = fr::ResizeOptions::new()
        .resize_alg(fr::ResizeAlg::Convolution(fr::FilterType::Bilinear))
        .use_alpha(false);
    fr::Resizer::new()
        .resize(&src, &mut dst, &options)
        .map_err(|e| ConversionError::Resize(e.to_string()))?;
    Ok(dst.into_vec())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(format: PixelFormat, w: u32, h: u32, data: Vec<u8>) -> Frame {
        Frame::new(FrameFormat::new(w, h, format), data, 7).unwrap()
    }

    #[test]
    fn test_bgra_to_rgba_swaps_red_and_blue() {
        let src = frame(PixelFormat::Bgra8, 1, 1, vec![10, 20, 30, 40]);
        let out = convert(&src, PixelFormat::Rgba8, (1, 1)).unwrap();
        assert_eq!(out.data(), &[30, 20, 10, 40]);
        assert_eq!(out.pts, 7);
    }

    #[test]
    fn test_rgb_to_bgra_fills_alpha() {
        let src = frame(PixelFormat::Rgb8, 1, 1, vec![1, 2, 3]);
        let out = convert(&src, PixelFormat::Bgra8, (1, 1)).unwrap();
        assert_eq!(out.data(), &[3, 2, 1, 255]);
    }

    #[test]
    fn test_uniform_image_stays_uniform() {
        let src = frame(PixelFormat::Rgba8, 8, 4, [9u8, 99, 199, 255].repeat(32));
        let out = convert(&src, PixelFormat::Rgba8, (3, 5)).unwrap();
        assert_eq!(out.data(), &[9u8, 99, 199, 255].repeat(15)[..]);
    }

    #[test]
    fn test_downscale_averages_neighbours() {
        // 2x1 black/white halved to 1x1 lands between the two
        let src = frame(PixelFormat::Rgb8, 2, 1, vec![0, 0, 0, 255, 255, 255]);
        let out = convert(&src, PixelFormat::Rgb8, (1, 1)).unwrap();
        for &v in out.data() {
            assert!((127..=128).contains(&v), "{:?}", out.data());
        }
    }

    #[test]
    fn test_resize_keeps_channel_order() {
        // Left half red, right half blue in BGRA; upscaled then swapped
        let mut data = Vec::new();
        for _ in 0..4 {
            data.extend_from_slice(&[0, 0, 200, 255, 0, 0, 200, 255]);
            data.extend_from_slice(&[200, 0, 0, 255, 200, 0, 0, 255]);
        }
        let src = frame(PixelFormat::Bgra8, 4, 4, data);
        let out = convert(&src, PixelFormat::Rgba8, (8, 8)).unwrap();
        assert_eq!(out.format(), FrameFormat::new(8, 8, PixelFormat::Rgba8));
        assert_eq!(&out.data()[..4], &[200, 0, 0, 255]);
        assert_eq!(&out.data()[out.data().len() - 4..], &[0, 0, 200, 255]);
    }

    #[test]
    fn test_zero_target_rejected() {
        let src = frame(PixelFormat::Rgb8, 1, 1, vec![0, 0, 0]);
        assert!(matches!(
            convert(&src, PixelFormat::Rgb8, (0, 1)),
            Err(ConversionError::InvalidSize { .. })
        ));
    }

    #[test]
    fn test_yuv_unsupported() {
        let src = frame(PixelFormat::Rgb8, 2, 2, vec![0; 12]);
        assert!(matches!(
            convert(&src, PixelFormat::Nv12, (2, 2)),
            Err(ConversionError::UnsupportedFormat(_))
        ));
    }
}
