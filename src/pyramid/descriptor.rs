//! Pyramid descriptor.
//!
//! Immutable metadata describing a multi-resolution image: per-level geometry
//! and downsample, channel layout, plane counts and pixel calibration. It is
//! built once when an image is opened and shared read-only afterwards.

use serde::Serialize;

use crate::decoder::PyramidMetadata;
use crate::error::RegionError;

/// One resolution level of a pyramid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PyramidLevel {
    /// Level index (0 = full resolution)
    pub index: usize,

    /// Width of this level in pixels
    pub width: u32,

    /// Height of this level in pixels
    pub height: u32,

    /// Downsample factor relative to level 0
    pub downsample: f64,
}

impl PyramidLevel {
    pub fn new(index: usize, width: u32, height: u32, downsample: f64) -> Self {
        Self {
            index,
            width,
            height,
            downsample,
        }
    }
}

/// Channel layout of an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChannelInfo {
    /// Number of channels
    pub count: u8,

    /// Bits per channel sample
    pub bits_per_channel: u8,

    /// Whether the channels are packed RGB(A)
    pub is_rgb: bool,
}

impl ChannelInfo {
    pub const RGB8: ChannelInfo = ChannelInfo {
        count: 3,
        bits_per_channel: 8,
        is_rgb: true,
    };

    pub fn new(count: u8, bits_per_channel: u8, is_rgb: bool) -> Self {
        Self {
            count,
            bits_per_channel,
            is_rgb,
        }
    }
}

/// Physical size of one full-resolution pixel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PixelCalibration {
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl PixelCalibration {
    pub fn new(pixel_width: f64, pixel_height: f64) -> Self {
        Self {
            pixel_width,
            pixel_height,
        }
    }
}

/// Validated, immutable description of an image pyramid.
///
/// Invariants enforced at construction:
/// - at least one level, level 0 has downsample 1.0
/// - downsamples strictly increase
/// - widths and heights are non-zero and never increase
/// - at least one channel, z-slice and timepoint
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PyramidDescriptor {
    levels: Vec<PyramidLevel>,
    channels: ChannelInfo,
    calibration: Option<PixelCalibration>,
    tile_size_hint: Option<(u32, u32)>,
    n_z: u32,
    n_t: u32,
}

impl PyramidDescriptor {
    /// Build a single-plane descriptor from levels and channel info.
    pub fn new(levels: Vec<PyramidLevel>, channels: ChannelInfo) -> Result<Self, RegionError> {
        let descriptor = Self {
            levels,
            channels,
            calibration: None,
            tile_size_hint: None,
            n_z: 1,
            n_t: 1,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Build a descriptor from the metadata a backend reports.
    pub fn from_metadata<M>(metadata: &M) -> Result<Self, RegionError>
    where
        M: PyramidMetadata + ?Sized,
    {
        let count = metadata.level_count();
        let mut levels = Vec::with_capacity(count);

        for index in 0..count {
            let (width, height) = metadata.level_dimensions(index).ok_or_else(|| {
                RegionError::configuration(format!("level {index} reports no dimensions"))
            })?;
            let downsample = metadata.level_downsample(index).ok_or_else(|| {
                RegionError::configuration(format!("level {index} reports no downsample"))
            })?;
            levels.push(PyramidLevel::new(index, width, height, downsample));
        }

        let (n_z, n_t) = metadata.plane_counts();
        let descriptor = Self {
            levels,
            channels: metadata.channel_info(),
            calibration: metadata.pixel_calibration(),
            tile_size_hint: metadata.tile_size_hint(),
            n_z,
            n_t,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    /// Set the number of z-slices and timepoints.
    pub fn with_planes(mut self, n_z: u32, n_t: u32) -> Result<Self, RegionError> {
        self.n_z = n_z;
        self.n_t = n_t;
        self.validate()?;
        Ok(self)
    }

    pub fn with_calibration(mut self, calibration: PixelCalibration) -> Self {
        self.calibration = Some(calibration);
        self
    }

    pub fn with_tile_size_hint(mut self, width: u32, height: u32) -> Self {
        self.tile_size_hint = Some((width, height));
        self
    }

    fn validate(&self) -> Result<(), RegionError> {
        let first = self
            .levels
            .first()
            .ok_or_else(|| RegionError::configuration("pyramid has no levels"))?;

        if first.downsample != 1.0 {
            return Err(RegionError::configuration(format!(
                "level 0 downsample must be 1.0, got {}",
                first.downsample
            )));
        }

        for (i, level) in self.levels.iter().enumerate() {
            if level.index != i {
                return Err(RegionError::configuration(format!(
                    "level at position {i} has index {}",
                    level.index
                )));
            }
            if !level.downsample.is_finite() {
                return Err(RegionError::configuration(format!(
                    "level {i} has a non-finite downsample ({})",
                    level.downsample
                )));
            }
            if level.width == 0 || level.height == 0 {
                return Err(RegionError::configuration(format!(
                    "level {i} has zero dimensions ({}x{})",
                    level.width, level.height
                )));
            }
        }

        for pair in self.levels.windows(2) {
            let (finer, coarser) = (&pair[0], &pair[1]);
            if coarser.downsample <= finer.downsample {
                return Err(RegionError::configuration(format!(
                    "downsample must increase: level {} has {}, level {} has {}",
                    finer.index, finer.downsample, coarser.index, coarser.downsample
                )));
            }
            if coarser.width > finer.width || coarser.height > finer.height {
                return Err(RegionError::configuration(format!(
                    "level {} ({}x{}) is larger than level {} ({}x{})",
                    coarser.index,
                    coarser.width,
                    coarser.height,
                    finer.index,
                    finer.width,
                    finer.height
                )));
            }
        }

        if self.n_z == 0 || self.n_t == 0 {
            return Err(RegionError::configuration(format!(
                "image must have at least one plane (n_z={}, n_t={})",
                self.n_z, self.n_t
            )));
        }
        if self.channels.count == 0 || self.channels.bits_per_channel == 0 {
            return Err(RegionError::configuration(format!(
                "invalid channel layout: {} channel(s) at {} bits",
                self.channels.count, self.channels.bits_per_channel
            )));
        }

        Ok(())
    }

    pub fn levels(&self) -> &[PyramidLevel] {
        &self.levels
    }

    pub fn level(&self, index: usize) -> Option<&PyramidLevel> {
        self.levels.get(index)
    }

    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Full-resolution `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        // validate() guarantees level 0 exists
        let full = &self.levels[0];
        (full.width, full.height)
    }

    pub fn downsamples(&self) -> Vec<f64> {
        self.levels.iter().map(|l| l.downsample).collect()
    }

    pub fn channels(&self) -> ChannelInfo {
        self.channels
    }

    pub fn calibration(&self) -> Option<PixelCalibration> {
        self.calibration
    }

    pub fn tile_size_hint(&self) -> Option<(u32, u32)> {
        self.tile_size_hint
    }

    pub fn n_z(&self) -> u32 {
        self.n_z
    }

    pub fn n_t(&self) -> u32 {
        self.n_t
    }
}
