//! Decoder capability traits.
//!
//! The region service never talks to a native slide library directly. Instead
//! a backend implements two capabilities:
//!
//! - [`PyramidMetadata`]: level geometry, channel and plane information, read
//!   once when the image is opened
//! - [`RegionDecoder`]: decodes a rectangle of one level into a [`PixelBuffer`]
//!
//! Backends are chosen by whoever constructs the service (an
//! `Arc<dyn RegionDecoder>`, or an [`ImageSource`](crate::registry::ImageSource)
//! for the registry).
//!
//! Decoding is blocking. The tile cache runs it on tokio's blocking pool, so
//! implementations may freely call into synchronous native code. A backend
//! that is not thread-safe must serialize access internally.

mod image_file;

pub use image_file::{ImageFileDecoder, DEFAULT_MIN_LEVEL_SIZE};

use crate::error::DecoderError;
use crate::pyramid::{ChannelInfo, PixelCalibration};
use crate::region::PixelBuffer;

/// A rectangle in a pyramid level's own pixel space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LevelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl LevelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Whether the rectangle lies within a `width` x `height` level.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x as u64 + self.width as u64 <= width as u64
            && self.y as u64 + self.height as u64 <= height as u64
    }
}

/// Pyramid metadata reported by an image backend.
pub trait PyramidMetadata {
    /// Number of pyramid levels. Level 0 is full resolution.
    fn level_count(&self) -> usize;

    /// `(width, height)` of a level, or `None` if out of range.
    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)>;

    /// Downsample of a level relative to level 0, or `None` if out of range.
    fn level_downsample(&self, level: usize) -> Option<f64>;

    /// Channel count, bit depth and RGB flag.
    fn channel_info(&self) -> ChannelInfo;

    /// `(n_z, n_t)`: number of z-slices and timepoints.
    fn plane_counts(&self) -> (u32, u32) {
        (1, 1)
    }

    /// Physical size of a full-resolution pixel, if known.
    fn pixel_calibration(&self) -> Option<PixelCalibration> {
        None
    }

    /// Preferred decode tile size, if the backend stores tiles.
    fn tile_size_hint(&self) -> Option<(u32, u32)> {
        None
    }
}

/// Decodes rectangles of a pyramid level.
pub trait RegionDecoder: PyramidMetadata + Send + Sync {
    /// Decode `rect` of `level` on plane `(z, t)`.
    ///
    /// `rect` is already clipped to the level bounds by the caller.
    fn decode(
        &self,
        level: usize,
        rect: LevelRect,
        z: u32,
        t: u32,
    ) -> Result<PixelBuffer, DecoderError>;
}
