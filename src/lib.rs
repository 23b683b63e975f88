//! # WSI Region
//!
//! A multi-resolution region reader for Whole Slide Images (WSI).
//!
//! Callers ask for a rectangle of an image in full-resolution coordinates at
//! an arbitrary downsample. The library picks the best stored pyramid level,
//! decodes the matching level rectangle through a pluggable decoder, caches
//! the decoded tile in a shared byte-bounded LRU, and rescales the residual.
//!
//! ## Features
//!
//! - **Level selection**: always decodes from the finest level that is still
//!   at least as coarse as requested, never from a coarser one
//! - **Single-flight caching**: concurrent identical requests decode once
//! - **Byte-bounded LRU**: borrowed tiles are never evicted
//! - **Pluggable decoders**: native slide libraries plug in through
//!   [`decoder::RegionDecoder`]; a raster-file decoder is included
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`pyramid`] - Pyramid descriptor and level selection
//! - [`decoder`] - Decoder capability traits and the raster-file decoder
//! - [`region`] - Requests, pixel buffers and the region service
//! - [`tile`] - Shared tile cache
//! - [`registry`] - Open/close lifecycle of images
//! - [`config`] - CLI and configuration types
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use wsi_region::{ImageFileDecoder, RegionRequest, RegionService, TileCache};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let decoder = ImageFileDecoder::open("slide.png", 256)?;
//!     let cache = TileCache::with_capacity(256 * 1024 * 1024);
//!     let service = RegionService::open("slide.png", Arc::new(decoder), cache)?;
//!
//!     let request = RegionRequest::new("slide.png", 4.0, 0, 0, 2048, 2048);
//!     let pixels = service.read(&request).await?;
//!     println!("{}x{}", pixels.width(), pixels.height());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod decoder;
pub mod error;
pub mod pyramid;
pub mod region;
pub mod registry;
pub mod tile;

// Re-export commonly used types
pub use config::{CacheConfig, Cli, Command};
pub use decoder::{ImageFileDecoder, LevelRect, PyramidMetadata, RegionDecoder};
pub use error::{DecoderError, RegionError};
pub use pyramid::{select_level, ChannelInfo, LevelSelection, PyramidDescriptor, PyramidLevel};
pub use region::{PixelBuffer, PixelLayout, RegionRequest, RegionResponse, RegionService};
pub use registry::{FileImageSource, ImageRegistry, ImageSource};
pub use tile::{CacheOutcome, CacheStats, CachedTile, TileCache};
