//! Decoder for flat raster files.
//!
//! JPEG and PNG files carry a single resolution. On open the raster is decoded
//! once and a pyramid is built in memory by repeated halving:
//!
//! ```text
//! Level 0: 1000 x 600   (downsample 1.0)
//! Level 1:  500 x 300   (downsample 2.0)
//! Level 2:  250 x 150   (downsample 4.0)   <- longer side <= min_level_size
//! ```
//!
//! Each level is produced from the previous one by area averaging, so
//! coarse levels look like what a slide scanner would store.

use std::path::Path;

use image::DynamicImage;
use tracing::debug;

use crate::error::DecoderError;
use crate::pyramid::ChannelInfo;
use crate::region::{PixelBuffer, PixelLayout};

use super::{LevelRect, PyramidMetadata, RegionDecoder};

/// Default size at which pyramid building stops.
pub const DEFAULT_MIN_LEVEL_SIZE: u32 = 256;

/// In-memory pyramid of a decoded raster.
pub struct ImageFileDecoder {
    /// Level rasters, full resolution first
    levels: Vec<PixelBuffer>,

    /// Downsample of each level relative to level 0
    downsamples: Vec<f64>,

    layout: PixelLayout,
}

impl ImageFileDecoder {
    /// Decode the raster at `path` and build its pyramid.
    pub fn open(path: impl AsRef<Path>, min_level_size: u32) -> Result<Self, DecoderError> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|e| match e {
            image::ImageError::IoError(io) => DecoderError::Native(io.to_string()),
            other => DecoderError::CorruptData(other.to_string()),
        })?;

        debug!(
            path = %path.display(),
            width = image.width(),
            height = image.height(),
            "Decoded raster"
        );

        Ok(Self::from_image(image, min_level_size))
    }

    /// Build the pyramid from an in-memory raster.
    ///
    /// Levels are halved until the longer side is at most `min_level_size`.
    pub fn from_image(image: DynamicImage, min_level_size: u32) -> Self {
        let limit = min_level_size.max(1);
        let (base_w, base_h) = (image.width().max(1), image.height().max(1));

        let mut current = image;
        let mut rasters = Vec::new();
        let mut downsamples = Vec::new();

        loop {
            let (w, h) = (current.width(), current.height());
            downsamples.push((base_w as f64 / w as f64 + base_h as f64 / h as f64) / 2.0);

            if w.max(h) <= limit {
                rasters.push(current);
                break;
            }

            let next = current.thumbnail_exact(w.div_ceil(2), h.div_ceil(2));
            rasters.push(current);
            current = next;
        }

        let levels: Vec<PixelBuffer> = rasters.into_iter().map(PixelBuffer::from_dynamic).collect();
        let layout = levels
            .first()
            .map(|level| level.layout())
            .unwrap_or(PixelLayout::RGB8);

        Self {
            levels,
            downsamples,
            layout,
        }
    }

    /// Pixel layout shared by all levels.
    pub fn layout(&self) -> PixelLayout {
        self.layout
    }
}

impl PyramidMetadata for ImageFileDecoder {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(PixelBuffer::dimensions)
    }

    fn level_downsample(&self, level: usize) -> Option<f64> {
        self.downsamples.get(level).copied()
    }

    fn channel_info(&self) -> ChannelInfo {
        ChannelInfo::new(
            self.layout.channels,
            self.layout.bits_per_channel,
            self.layout.channels >= 3,
        )
    }
}

impl RegionDecoder for ImageFileDecoder {
    fn decode(
        &self,
        level: usize,
        rect: LevelRect,
        z: u32,
        t: u32,
    ) -> Result<PixelBuffer, DecoderError> {
        if z != 0 || t != 0 {
            return Err(DecoderError::PlaneOutOfRange {
                z,
                t,
                n_z: 1,
                n_t: 1,
            });
        }

        let out_of_bounds = || DecoderError::RegionOutOfBounds {
            level,
            x: rect.x,
            y: rect.y,
            width: rect.width,
            height: rect.height,
        };

        let raster = self.levels.get(level).ok_or_else(out_of_bounds)?;
        if rect.width == 0 || rect.height == 0 || !rect.fits_within(raster.width(), raster.height())
        {
            return Err(out_of_bounds());
        }

        crop(raster, rect)
    }
}

/// Copy `rect` out of `raster` row by row.
fn crop(raster: &PixelBuffer, rect: LevelRect) -> Result<PixelBuffer, DecoderError> {
    if rect == LevelRect::new(0, 0, raster.width(), raster.height()) {
        return Ok(raster.clone());
    }

    let bpp = raster.layout().bytes_per_pixel();
    let stride = raster.width() as usize * bpp;
    let row_len = rect.width as usize * bpp;
    let src = raster.data();

    let mut data = Vec::with_capacity(row_len * rect.height as usize);
    for row in rect.y..rect.y + rect.height {
        let start = row as usize * stride + rect.x as usize * bpp;
        data.extend_from_slice(&src[start..start + row_len]);
    }

    PixelBuffer::new(rect.width, rect.height, raster.layout(), data)
}
