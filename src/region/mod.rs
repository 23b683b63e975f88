//! Region layer.
//!
//! This module turns arbitrary region requests into pixel buffers:
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │        Viewer / plugins / thumbnails    │
//! └────────────────────┬────────────────────┘
//!                      │ RegionRequest
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │             RegionService               │
//! │  ┌──────────────┐  ┌─────────────────┐  │
//! │  │ LevelSelector│  │   TileCache     │  │
//! │  │ (pick level, │  │ (single-flight, │  │
//! │  │  residual)   │  │  bounded LRU)   │  │
//! │  └──────────────┘  └─────────────────┘  │
//! └────────────────────┬────────────────────┘
//!                      │ level + clipped rectangle
//!                      ▼
//! ┌─────────────────────────────────────────┐
//! │            RegionDecoder                │
//! └─────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`RegionRequest`]: cache key naming a region in full-resolution pixels
//! - [`PixelBuffer`]: immutable decoded samples with resampling support
//! - [`RegionService`]: validates, selects a level, consults the cache, rescales

mod pixels;
mod request;
mod service;

pub use pixels::{PixelBuffer, PixelLayout};
pub use request::RegionRequest;
pub use service::{
    level_rect, RegionResponse, RegionService, MAX_OUTPUT_PIXELS, RESAMPLE_TOLERANCE,
};
