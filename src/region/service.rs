//! Region Service for orchestrating region reads.
//!
//! The RegionService is the main entry point for pixel requests against one
//! image. It orchestrates:
//! - Request validation
//! - Level selection
//! - Mapping the request onto the chosen level's pixel grid
//! - Cache lookups (single-flight decode on miss)
//! - Residual rescaling
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        RegionService                            │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │                    read_region()                        │    │
//! │  │  1. Validate request   4. Cache lookup / decode         │    │
//! │  │  2. Select level       5. Rescale by residual           │    │
//! │  │  3. Level rectangle    6. Return shared view            │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! │           │                    │                    │           │
//! │           ▼                    ▼                    ▼           │
//! │  ┌────────────────┐    ┌──────────────┐    ┌────────────────┐   │
//! │  │ select_level() │    │  TileCache   │    │ RegionDecoder  │   │
//! │  └────────────────┘    └──────────────┘    └────────────────┘   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::decoder::{LevelRect, RegionDecoder};
use crate::error::{DecoderError, RegionError};
use crate::pyramid::{select_level, PyramidDescriptor, PyramidLevel};
use crate::tile::{CacheOutcome, TileCache};

use super::pixels::PixelBuffer;
use super::request::RegionRequest;

/// Residual scales within this distance of 1.0 are returned unscaled.
pub const RESAMPLE_TOLERANCE: f64 = 0.001;

/// Largest output a single read may produce, in pixels (1 gigapixel).
pub const MAX_OUTPUT_PIXELS: u64 = 1 << 30;

// =============================================================================
// Region Response
// =============================================================================

/// Response from the region service.
#[derive(Debug, Clone)]
pub struct RegionResponse {
    /// Pixels at the requested downsample
    pub pixels: PixelBuffer,

    /// Pyramid level the pixels were decoded from
    pub level: usize,

    /// Scale applied after decoding
    pub residual_scale: f64,

    /// How the tile cache satisfied the lookup
    pub cache_outcome: CacheOutcome,
}

impl RegionResponse {
    /// Whether the decode was avoided (resident tile or shared flight).
    pub fn cache_hit(&self) -> bool {
        self.cache_outcome != CacheOutcome::Computed
    }
}

// =============================================================================
// Region Service
// =============================================================================

/// Service reading regions of one image through a shared tile cache.
///
/// The descriptor is built from the decoder's metadata when the service is
/// opened. Several services (one per image) typically share one
/// [`TileCache`].
///
/// # Example
///
/// ```ignore
/// use wsi_region::region::{RegionRequest, RegionService};
/// use wsi_region::tile::TileCache;
///
/// let cache = TileCache::with_capacity(256 * 1024 * 1024);
/// let service = RegionService::open("slides/sample.svs", decoder, cache)?;
///
/// let request = RegionRequest::new("slides/sample.svs", 8.0, 0, 0, 4096, 4096);
/// let pixels = service.read(&request).await?;
/// assert_eq!(pixels.dimensions(), (512, 512));
/// ```
pub struct RegionService {
    /// Identity of the image this service reads
    image: Arc<str>,

    /// Validated pyramid metadata
    descriptor: Arc<PyramidDescriptor>,

    /// Backend decoding level rectangles
    decoder: Arc<dyn RegionDecoder>,

    /// Shared cache of decoded tiles
    cache: TileCache,
}

impl RegionService {
    /// Open a service for `image`, building its descriptor from `decoder`.
    ///
    /// # Errors
    ///
    /// Returns [`RegionError::Configuration`] if the decoder reports an
    /// inconsistent pyramid.
    pub fn open(
        image: impl Into<Arc<str>>,
        decoder: Arc<dyn RegionDecoder>,
        cache: TileCache,
    ) -> Result<Self, RegionError> {
        let image = image.into();
        let descriptor = PyramidDescriptor::from_metadata(decoder.as_ref())?;

        debug!(
            image = %image,
            levels = descriptor.level_count(),
            width = descriptor.dimensions().0,
            height = descriptor.dimensions().1,
            "Opened region service"
        );

        Ok(Self {
            image,
            descriptor: Arc::new(descriptor),
            decoder,
            cache,
        })
    }

    /// Read a region, returning only the pixels.
    pub async fn read(&self, request: &RegionRequest) -> Result<PixelBuffer, RegionError> {
        self.read_region(request).await.map(|r| r.pixels)
    }

    /// Read a region.
    ///
    /// The returned pixels share the cached bytes and are immutable, so the
    /// caller cannot affect the cached original.
    ///
    /// # Errors
    ///
    /// - [`RegionError::InvalidRequest`] for a request naming another image,
    ///   empty geometry, a non-positive downsample, a missing plane, or a
    ///   region entirely outside the image, or an output larger than
    ///   [`MAX_OUTPUT_PIXELS`]
    /// - [`RegionError::Decode`] if the decoder fails; the failure is not
    ///   cached and a later identical request decodes again
    pub async fn read_region(&self, request: &RegionRequest) -> Result<RegionResponse, RegionError> {
        self.validate(request)?;

        let selection = select_level(&self.descriptor, request.downsample)?;
        let level = *self
            .descriptor
            .level(selection.level)
            .ok_or_else(|| RegionError::configuration(format!("missing level {}", selection.level)))?;

        let rect = level_rect(&level, request).ok_or_else(|| {
            RegionError::invalid(format!("region {request} lies outside the image"))
        })?;

        let resample = (selection.residual_scale - 1.0).abs() > RESAMPLE_TOLERANCE;
        let (width, height) = if resample {
            output_extent(rect, selection.residual_scale).ok_or_else(|| {
                RegionError::invalid(format!(
                    "region {request} exceeds {MAX_OUTPUT_PIXELS} output pixels"
                ))
            })?
        } else {
            (rect.width, rect.height)
        };

        debug!(
            request = %request,
            level = level.index,
            residual = selection.residual_scale,
            x = rect.x,
            y = rect.y,
            width = rect.width,
            height = rect.height,
            "Reading region"
        );

        let decoder = Arc::clone(&self.decoder);
        let failing = request.clone();
        let (z, t) = (request.z, request.t);
        let (tile, cache_outcome) = self
            .cache
            .lookup(request.clone(), move || {
                decode_checked(decoder.as_ref(), level.index, rect, z, t)
                    .map_err(|e| RegionError::decode(&failing, e))
            })
            .await?;

        let pixels = if resample {
            tile.pixels()
                .resize(width, height)
                .map_err(|e| RegionError::decode(request, e))?
        } else {
            tile.pixels().clone()
        };

        Ok(RegionResponse {
            pixels,
            level: level.index,
            residual_scale: selection.residual_scale,
            cache_outcome,
        })
    }

    /// Read the whole image scaled to fit within `max_width` x `max_height`.
    ///
    /// Images already smaller than the bounds are returned at full resolution.
    pub async fn read_thumbnail(
        &self,
        max_width: u32,
        max_height: u32,
        z: u32,
        t: u32,
    ) -> Result<PixelBuffer, RegionError> {
        if max_width == 0 || max_height == 0 {
            return Err(RegionError::invalid(format!(
                "thumbnail bounds must be positive, got {max_width}x{max_height}"
            )));
        }

        let (width, height) = self.descriptor.dimensions();
        let downsample = (width as f64 / max_width as f64)
            .max(height as f64 / max_height as f64)
            .max(1.0);

        let request = RegionRequest::full_image(Arc::clone(&self.image), downsample, width, height)
            .with_plane(z, t);
        let pixels = self.read(&request).await?;

        // rounding can overshoot the bounds by a pixel
        if pixels.width() > max_width || pixels.height() > max_height {
            return pixels
                .resize(pixels.width().min(max_width), pixels.height().min(max_height))
                .map_err(|e| RegionError::decode(&request, e));
        }
        Ok(pixels)
    }

    /// Drop every cached tile of this image.
    pub async fn invalidate(&self) -> usize {
        self.cache.invalidate_image(&self.image).await
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn descriptor(&self) -> &Arc<PyramidDescriptor> {
        &self.descriptor
    }

    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    fn validate(&self, request: &RegionRequest) -> Result<(), RegionError> {
        if request.image() != &*self.image {
            return Err(RegionError::invalid(format!(
                "request for '{}' sent to service for '{}'",
                request.image(),
                self.image
            )));
        }
        if request.width == 0 || request.height == 0 {
            return Err(RegionError::invalid(format!(
                "region must be non-empty, got {}x{}",
                request.width, request.height
            )));
        }
        if !request.downsample.is_finite() || request.downsample <= 0.0 {
            return Err(RegionError::invalid(format!(
                "downsample must be a positive number, got {}",
                request.downsample
            )));
        }
        if request.z >= self.descriptor.n_z() || request.t >= self.descriptor.n_t() {
            return Err(RegionError::invalid(format!(
                "plane z={}, t={} out of range (n_z={}, n_t={})",
                request.z,
                request.t,
                self.descriptor.n_z(),
                self.descriptor.n_t()
            )));
        }
        Ok(())
    }
}

/// Decode and check the buffer matches the rectangle that was asked for.
fn decode_checked(
    decoder: &dyn RegionDecoder,
    level: usize,
    rect: LevelRect,
    z: u32,
    t: u32,
) -> Result<PixelBuffer, DecoderError> {
    let pixels = decoder.decode(level, rect, z, t)?;
    if pixels.dimensions() != (rect.width, rect.height) {
        return Err(DecoderError::CorruptData(format!(
            "decoder returned {}x{} for a {}x{} region",
            pixels.width(),
            pixels.height(),
            rect.width,
            rect.height
        )));
    }
    Ok(pixels)
}

/// Map a full-resolution request onto `level`'s pixel grid.
///
/// Each coordinate is divided by the level downsample and rounded half-up,
/// then the rectangle is clipped to the level. Returns `None` when nothing is
/// left after clipping.
pub fn level_rect(level: &PyramidLevel, request: &RegionRequest) -> Option<LevelRect> {
    let ds = level.downsample;
    let x = round_half_up(request.x as f64 / ds);
    let y = round_half_up(request.y as f64 / ds);
    let width = round_half_up(request.width as f64 / ds).max(1);
    let height = round_half_up(request.height as f64 / ds).max(1);

    let x0 = x.clamp(0, level.width as i64);
    let y0 = y.clamp(0, level.height as i64);
    let x1 = x.saturating_add(width).clamp(0, level.width as i64);
    let y1 = y.saturating_add(height).clamp(0, level.height as i64);

    if x1 <= x0 || y1 <= y0 {
        return None;
    }

    Some(LevelRect::new(
        x0 as u32,
        y0 as u32,
        (x1 - x0) as u32,
        (y1 - y0) as u32,
    ))
}

fn round_half_up(value: f64) -> i64 {
    (value + 0.5).floor() as i64
}

/// Output size of `rect` after dividing by `residual_scale`.
///
/// `None` if either side overflows `u32` or the area exceeds
/// [`MAX_OUTPUT_PIXELS`].
fn output_extent(rect: LevelRect, residual_scale: f64) -> Option<(u32, u32)> {
    let width = scaled_extent(rect.width, residual_scale)?;
    let height = scaled_extent(rect.height, residual_scale)?;
    let pixels = u64::from(width) * u64::from(height);
    (pixels <= MAX_OUTPUT_PIXELS).then_some((width, height))
}

fn scaled_extent(extent: u32, residual_scale: f64) -> Option<u32> {
    u32::try_from(round_half_up(extent as f64 / residual_scale).max(1)).ok()
}

// =============================================================================
// Tests
// =============================================================================
