//! Test utilities for integration tests.
//!
//! This module provides an instrumented decoder, a mock image source and
//! helpers for writing raster files.

use async_trait::async_trait;
use image::{Rgb, RgbImage};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wsi_region::decoder::{LevelRect, PyramidMetadata, RegionDecoder};
use wsi_region::error::{DecoderError, RegionError};
use wsi_region::pyramid::ChannelInfo;
use wsi_region::region::{PixelBuffer, PixelLayout, RegionService};
use wsi_region::registry::ImageSource;
use wsi_region::tile::TileCache;

/// Levels used by the round-trip scenario.
pub fn standard_levels() -> Vec<(u32, u32, f64)> {
    vec![(10_000, 8_000, 1.0), (2_500, 2_000, 4.0), (625, 500, 16.0)]
}

// =============================================================================
// Counting Decoder
// =============================================================================

/// A decoder that counts invocations and can be told to fail or panic.
///
/// Every decoded region is RGB8 filled with `level + 1`.
pub struct CountingDecoder {
    levels: Vec<(u32, u32, f64)>,
    decodes: AtomicUsize,
    failing: AtomicBool,
    panic_next: AtomicBool,
    delay: Duration,
}

impl CountingDecoder {
    pub fn new(levels: Vec<(u32, u32, f64)>) -> Self {
        Self {
            levels,
            decodes: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            panic_next: AtomicBool::new(false),
            delay: Duration::ZERO,
        }
    }

    pub fn standard() -> Self {
        Self::new(standard_levels())
    }

    /// Sleep for `delay` inside every decode.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn decodes(&self) -> usize {
        self.decodes.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn panic_next(&self) {
        self.panic_next.store(true, Ordering::SeqCst);
    }
}

impl PyramidMetadata for CountingDecoder {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(|&(w, h, _)| (w, h))
    }

    fn level_downsample(&self, level: usize) -> Option<f64> {
        self.levels.get(level).map(|&(_, _, d)| d)
    }

    fn channel_info(&self) -> ChannelInfo {
        ChannelInfo::RGB8
    }
}

impl RegionDecoder for CountingDecoder {
    fn decode(
        &self,
        level: usize,
        rect: LevelRect,
        _z: u32,
        _t: u32,
    ) -> Result<PixelBuffer, DecoderError> {
        self.decodes.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        if self.panic_next.swap(false, Ordering::SeqCst) {
            panic!("decoder blew up");
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(DecoderError::Native("simulated decoder failure".to_string()));
        }

        Ok(PixelBuffer::filled(
            rect.width,
            rect.height,
            PixelLayout::RGB8,
            level as u8 + 1,
        ))
    }
}

/// Open a service over a shared counting decoder.
pub fn open_service(image: &str, decoder: &Arc<CountingDecoder>, cache: &TileCache) -> RegionService {
    RegionService::open(
        image,
        Arc::clone(decoder) as Arc<dyn RegionDecoder>,
        cache.clone(),
    )
    .unwrap()
}

// =============================================================================
// Mock Image Source
// =============================================================================

/// An image source serving preconfigured counting decoders.
pub struct MockImageSource {
    decoders: HashMap<String, Arc<CountingDecoder>>,
    opens: AtomicUsize,
}

impl MockImageSource {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
            opens: AtomicUsize::new(0),
        }
    }

    pub fn with_image(mut self, image: &str, decoder: CountingDecoder) -> Self {
        self.decoders.insert(image.to_string(), Arc::new(decoder));
        self
    }

    pub fn decoder(&self, image: &str) -> Arc<CountingDecoder> {
        Arc::clone(&self.decoders[image])
    }

    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageSource for MockImageSource {
    async fn open_decoder(&self, image: &str) -> Result<Arc<dyn RegionDecoder>, RegionError> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(10)).await;

        match self.decoders.get(image) {
            Some(decoder) => Ok(Arc::clone(decoder) as Arc<dyn RegionDecoder>),
            None => Err(RegionError::InvalidRequest {
                reason: format!("no such image: {image}"),
            }),
        }
    }
}

// =============================================================================
// Raster Files
// =============================================================================

/// Write an RGB gradient PNG of the given size and return its path.
///
/// Pixel `(x, y)` is `[x % 256, y % 256, 128]`.
pub fn write_gradient_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let path = dir.join(name);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }

    RgbImage::from_fn(width, height, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    })
    .save(&path)
    .unwrap();

    path
}
