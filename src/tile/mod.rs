//! Tile cache layer.
//!
//! Decoded regions are cached under the caller's [`RegionRequest`] so that
//! the viewer, background plugins and thumbnail generators share decode work.
//!
//! # Components
//!
//! - [`TileCache`]: byte-bounded LRU with single-flight computation
//! - [`CachedTile`]: an immutable decoded tile owned by the cache
//! - [`CacheOutcome`]: whether a lookup hit, joined a flight, or computed
//! - [`CacheStats`]: counters and accounting snapshot
//!
//! # Example
//!
//! ```
//! use wsi_region::region::{PixelBuffer, PixelLayout, RegionRequest};
//! use wsi_region::tile::{CacheOutcome, TileCache};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Create a cache with 50MB capacity
//!     let cache = TileCache::with_capacity(50 * 1024 * 1024);
//!     let key = RegionRequest::new("slides/sample.svs", 1.0, 0, 0, 64, 64);
//!
//!     let (_, outcome) = cache
//!         .lookup(key.clone(), || Ok(PixelBuffer::filled(64, 64, PixelLayout::GRAY8, 0)))
//!         .await
//!         .unwrap();
//!     assert_eq!(outcome, CacheOutcome::Computed);
//!
//!     // Closing the image drops its tiles
//!     cache.invalidate_image("slides/sample.svs").await;
//!     assert!(cache.is_empty().await);
//! }
//! ```
//!
//! [`RegionRequest`]: crate::region::RegionRequest

mod cache;

pub use cache::{CacheOutcome, CacheStats, CachedTile, TileCache, DEFAULT_TILE_CACHE_CAPACITY};
