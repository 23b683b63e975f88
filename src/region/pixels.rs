//! Decoded pixel buffers and resampling.
//!
//! # Layout
//!
//! A [`PixelBuffer`] stores interleaved samples in row-major order. 8-bit and
//! 16-bit samples are supported; 16-bit samples are stored little-endian.
//!
//! # Resampling
//!
//! Shrinking uses area averaging (every source pixel contributes to the output
//! pixel it falls in), enlarging uses bilinear interpolation. Both go through
//! the `image` crate, which limits resampling to 1-4 channels.

use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, ImageBuffer, Luma, LumaA, Rgb, Rgba};
use serde::Serialize;

use crate::error::DecoderError;

// =============================================================================
// Pixel Layout
// =============================================================================

/// Sample layout of a pixel buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct PixelLayout {
    /// Samples per pixel
    pub channels: u8,

    /// Bits per sample (8 or 16 for resampling)
    pub bits_per_channel: u8,
}

impl PixelLayout {
    pub const GRAY8: PixelLayout = PixelLayout::new(1, 8);
    pub const RGB8: PixelLayout = PixelLayout::new(3, 8);
    pub const RGBA8: PixelLayout = PixelLayout::new(4, 8);
    pub const GRAY16: PixelLayout = PixelLayout::new(1, 16);
    pub const RGB16: PixelLayout = PixelLayout::new(3, 16);

    pub const fn new(channels: u8, bits_per_channel: u8) -> Self {
        Self {
            channels,
            bits_per_channel,
        }
    }

    /// Bytes used by one sample.
    pub fn bytes_per_sample(&self) -> usize {
        (self.bits_per_channel as usize).div_ceil(8)
    }

    /// Bytes used by one pixel.
    pub fn bytes_per_pixel(&self) -> usize {
        self.channels as usize * self.bytes_per_sample()
    }

    fn unsupported(&self) -> DecoderError {
        DecoderError::UnsupportedLayout {
            channels: self.channels,
            bits_per_channel: self.bits_per_channel,
        }
    }
}

// =============================================================================
// Pixel Buffer
// =============================================================================

/// An immutable decoded pixel buffer.
///
/// Cloning is cheap: clones share the same underlying [`Bytes`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    layout: PixelLayout,
    data: Bytes,
}

impl PixelBuffer {
    /// Wrap decoded samples, checking the length against the geometry.
    pub fn new(
        width: u32,
        height: u32,
        layout: PixelLayout,
        data: impl Into<Bytes>,
    ) -> Result<Self, DecoderError> {
        let data = data.into();
        let expected = width as usize * height as usize * layout.bytes_per_pixel();
        if data.len() != expected {
            return Err(DecoderError::BufferSize {
                expected,
                actual: data.len(),
            });
        }

        Ok(Self {
            width,
            height,
            layout,
            data,
        })
    }

    /// Create a buffer with every byte set to `value`.
    pub fn filled(width: u32, height: u32, layout: PixelLayout, value: u8) -> Self {
        let len = width as usize * height as usize * layout.bytes_per_pixel();
        Self {
            width,
            height,
            layout,
            data: Bytes::from(vec![value; len]),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn layout(&self) -> PixelLayout {
        self.layout
    }

    /// Raw interleaved samples.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Size of the sample data in bytes.
    pub fn byte_size(&self) -> usize {
        self.data.len()
    }

    /// Samples of the pixel at `(x, y)`, or `None` outside the buffer.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bpp = self.layout.bytes_per_pixel();
        let start = (y as usize * self.width as usize + x as usize) * bpp;
        Some(&self.data[start..start + bpp])
    }

    /// Resample to exactly `width` x `height`.
    ///
    /// Returns a clone when the size is unchanged. Shrinking on both axes uses
    /// area averaging; anything else uses bilinear interpolation.
    pub fn resize(&self, width: u32, height: u32) -> Result<PixelBuffer, DecoderError> {
        if width == self.width && height == self.height {
            return Ok(self.clone());
        }
        if width == 0 || height == 0 {
            return Err(DecoderError::CorruptData(format!(
                "cannot resample to an empty {width}x{height} buffer"
            )));
        }

        let image = self.to_dynamic()?;
        let resized = if width <= self.width && height <= self.height {
            image.thumbnail_exact(width, height)
        } else {
            image.resize_exact(width, height, FilterType::Triangle)
        };

        Ok(Self::from_dynamic(resized))
    }

    /// Convert to an `image` crate raster.
    pub fn to_dynamic(&self) -> Result<DynamicImage, DecoderError> {
        let (w, h) = (self.width, self.height);
        let corrupt = || DecoderError::CorruptData("buffer does not match geometry".to_string());

        let image = match (self.layout.channels, self.layout.bits_per_channel) {
            (1, 8) => DynamicImage::ImageLuma8(
                ImageBuffer::<Luma<u8>, _>::from_raw(w, h, self.data.to_vec()).ok_or_else(corrupt)?,
            ),
            (2, 8) => DynamicImage::ImageLumaA8(
                ImageBuffer::<LumaA<u8>, _>::from_raw(w, h, self.data.to_vec())
                    .ok_or_else(corrupt)?,
            ),
            (3, 8) => DynamicImage::ImageRgb8(
                ImageBuffer::<Rgb<u8>, _>::from_raw(w, h, self.data.to_vec()).ok_or_else(corrupt)?,
            ),
            (4, 8) => DynamicImage::ImageRgba8(
                ImageBuffer::<Rgba<u8>, _>::from_raw(w, h, self.data.to_vec())
                    .ok_or_else(corrupt)?,
            ),
            (1, 16) => DynamicImage::ImageLuma16(
                ImageBuffer::<Luma<u16>, _>::from_raw(w, h, self.samples_u16())
                    .ok_or_else(corrupt)?,
            ),
            (2, 16) => DynamicImage::ImageLumaA16(
                ImageBuffer::<LumaA<u16>, _>::from_raw(w, h, self.samples_u16())
                    .ok_or_else(corrupt)?,
            ),
            (3, 16) => DynamicImage::ImageRgb16(
                ImageBuffer::<Rgb<u16>, _>::from_raw(w, h, self.samples_u16())
                    .ok_or_else(corrupt)?,
            ),
            (4, 16) => DynamicImage::ImageRgba16(
                ImageBuffer::<Rgba<u16>, _>::from_raw(w, h, self.samples_u16())
                    .ok_or_else(corrupt)?,
            ),
            _ => return Err(self.layout.unsupported()),
        };

        Ok(image)
    }

    /// Convert from an `image` crate raster.
    ///
    /// Floating-point rasters are converted to 8-bit RGB(A).
    pub fn from_dynamic(image: DynamicImage) -> PixelBuffer {
        let (width, height) = (image.width(), image.height());
        let (layout, data) = match image {
            DynamicImage::ImageLuma8(buf) => (PixelLayout::new(1, 8), buf.into_raw()),
            DynamicImage::ImageLumaA8(buf) => (PixelLayout::new(2, 8), buf.into_raw()),
            DynamicImage::ImageRgb8(buf) => (PixelLayout::new(3, 8), buf.into_raw()),
            DynamicImage::ImageRgba8(buf) => (PixelLayout::new(4, 8), buf.into_raw()),
            DynamicImage::ImageLuma16(buf) => (PixelLayout::new(1, 16), le_bytes(buf.as_raw())),
            DynamicImage::ImageLumaA16(buf) => (PixelLayout::new(2, 16), le_bytes(buf.as_raw())),
            DynamicImage::ImageRgb16(buf) => (PixelLayout::new(3, 16), le_bytes(buf.as_raw())),
            DynamicImage::ImageRgba16(buf) => (PixelLayout::new(4, 16), le_bytes(buf.as_raw())),
            other if other.color().has_alpha() => (PixelLayout::RGBA8, other.to_rgba8().into_raw()),
            other => (PixelLayout::RGB8, other.to_rgb8().into_raw()),
        };

        PixelBuffer {
            width,
            height,
            layout,
            data: Bytes::from(data),
        }
    }

    fn samples_u16(&self) -> Vec<u16> {
        self.data
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect()
    }
}

fn le_bytes(samples: &[u16]) -> Vec<u8> {
    samples.iter().flat_map(|s| s.to_le_bytes()).collect()
}

// =============================================================================
// Tests
// =============================================================================
