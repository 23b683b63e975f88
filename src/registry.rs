//! Image Registry for managing open images.
//!
//! The registry provides:
//! - LRU caching of open [`RegionService`] handles to avoid re-reading metadata
//! - Single-flight opens so concurrent requests for one image open it once
//! - One [`TileCache`] shared by every open image
//! - Tile invalidation when a handle is closed or evicted
//!
//! # Example
//!
//! ```ignore
//! use wsi_region::registry::{FileImageSource, ImageRegistry};
//! use wsi_region::tile::TileCache;
//!
//! let source = FileImageSource::new("/data/slides");
//! let registry = ImageRegistry::new(source, TileCache::with_capacity(512 * 1024 * 1024));
//!
//! // Opens and caches on first access
//! let service = registry.get("case-17/he.png").await?;
//! let thumb = service.read_thumbnail(512, 512, 0, 0).await?;
//!
//! // Drops the handle and every cached tile of the image
//! registry.close("case-17/he.png").await;
//! ```

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use lru::LruCache;
use tokio::sync::{watch, Mutex};
use tracing::{debug, info, warn};

use crate::decoder::{ImageFileDecoder, RegionDecoder, DEFAULT_MIN_LEVEL_SIZE};
use crate::error::RegionError;
use crate::region::RegionService;
use crate::tile::TileCache;

/// Default number of images kept open.
pub const DEFAULT_MAX_OPEN_IMAGES: usize = 32;

// =============================================================================
// ImageSource Trait
// =============================================================================

/// Trait for creating decoders from image identifiers.
///
/// This abstraction allows the registry to work with different backends
/// (local raster files, native slide libraries, test doubles) without being
/// tied to a specific implementation.
#[async_trait]
pub trait ImageSource: Send + Sync {
    /// Open a decoder for the given image identifier.
    async fn open_decoder(&self, image: &str) -> Result<Arc<dyn RegionDecoder>, RegionError>;
}

// =============================================================================
// FileImageSource
// =============================================================================

/// Opens raster files below a root directory.
///
/// Image identifiers are paths relative to the root. Absolute paths and `..`
/// components are rejected.
#[derive(Debug, Clone)]
pub struct FileImageSource {
    root: PathBuf,
    min_level_size: u32,
}

impl FileImageSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            min_level_size: DEFAULT_MIN_LEVEL_SIZE,
        }
    }

    /// Set the size at which pyramid building stops.
    pub fn with_min_level_size(mut self, min_level_size: u32) -> Self {
        self.min_level_size = min_level_size;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve an image identifier to a path below the root.
    pub fn resolve(&self, image: &str) -> Result<PathBuf, RegionError> {
        let relative = Path::new(image);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));

        if image.is_empty() || relative.is_absolute() || escapes {
            return Err(RegionError::invalid(format!(
                "image id '{image}' must be a relative path inside the root"
            )));
        }

        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ImageSource for FileImageSource {
    async fn open_decoder(&self, image: &str) -> Result<Arc<dyn RegionDecoder>, RegionError> {
        let path = self.resolve(image)?;

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => {
                return Err(RegionError::invalid(format!(
                    "image '{image}' not found under {}",
                    self.root.display()
                )))
            }
        }

        let min_level_size = self.min_level_size;
        let decoder =
            tokio::task::spawn_blocking(move || ImageFileDecoder::open(&path, min_level_size))
                .await
                .map_err(|e| RegionError::configuration(format!("opening '{image}' panicked: {e}")))?
                .map_err(|e| RegionError::configuration(format!("cannot read '{image}': {e}")))?;

        Ok(Arc::new(decoder))
    }
}

// =============================================================================
// ImageRegistry
// =============================================================================

type OpenResult = Option<Result<Arc<RegionService>, RegionError>>;

/// An open in progress. `id` tells a detached flight apart from a newer one.
struct OpenFlight {
    id: u64,
    receiver: watch::Receiver<OpenResult>,
}

struct RegistryState {
    open: LruCache<Arc<str>, Arc<RegionService>>,
    opening: HashMap<Arc<str>, OpenFlight>,
    next_flight: u64,
}

/// Registry of open images sharing one tile cache.
///
/// The registry:
/// - Caches open services with LRU eviction
/// - Opens images on demand through an [`ImageSource`]
/// - Uses single-flight so concurrent first requests open an image once
/// - Drops an image's cached tiles when its handle is closed or evicted
pub struct ImageRegistry<S: ImageSource> {
    source: Arc<S>,
    cache: TileCache,
    state: Arc<Mutex<RegistryState>>,
}

impl<S: ImageSource + 'static> ImageRegistry<S> {
    /// Create a registry keeping up to [`DEFAULT_MAX_OPEN_IMAGES`] images open.
    pub fn new(source: S, cache: TileCache) -> Self {
        Self::with_capacity(source, cache, DEFAULT_MAX_OPEN_IMAGES)
    }

    /// Create a registry keeping up to `max_open_images` images open.
    ///
    /// A capacity of zero is treated as one.
    pub fn with_capacity(source: S, cache: TileCache, max_open_images: usize) -> Self {
        let capacity = NonZeroUsize::new(max_open_images).unwrap_or(NonZeroUsize::MIN);
        Self {
            source: Arc::new(source),
            cache,
            state: Arc::new(Mutex::new(RegistryState {
                open: LruCache::new(capacity),
                opening: HashMap::new(),
                next_flight: 0,
            })),
        }
    }

    /// Get the service for an image, opening it if needed.
    ///
    /// Failed opens are not remembered; the next call tries again.
    pub async fn get(&self, image: &str) -> Result<Arc<RegionService>, RegionError> {
        let mut receiver = {
            let mut state = self.state.lock().await;

            if let Some(service) = state.open.get(image) {
                return Ok(Arc::clone(service));
            }

            if let Some(flight) = state.opening.get(image) {
                debug!(image, "Joining in-flight open");
                flight.receiver.clone()
            } else {
                let id = state.next_flight;
                state.next_flight += 1;

                let (sender, receiver) = watch::channel(None);
                let key: Arc<str> = Arc::from(image);
                state.opening.insert(
                    Arc::clone(&key),
                    OpenFlight {
                        id,
                        receiver: receiver.clone(),
                    },
                );
                self.spawn_open(key, id, sender);
                receiver
            }
        };

        wait_for_open(image, &mut receiver).await
    }

    fn spawn_open(&self, image: Arc<str>, id: u64, sender: watch::Sender<OpenResult>) {
        let source = Arc::clone(&self.source);
        let cache = self.cache.clone();
        let state = Arc::clone(&self.state);

        tokio::spawn(async move {
            let opening = tokio::spawn(open_service(
                Arc::clone(&source),
                Arc::clone(&image),
                cache.clone(),
            ));
            let opened = match opening.await {
                Ok(result) => result,
                Err(join_error) => Err(RegionError::configuration(format!(
                    "opening '{image}' panicked: {join_error}"
                ))),
            };

            let evicted = {
                let mut state = state.lock().await;
                let attached = state.opening.get(&*image).is_some_and(|f| f.id == id);
                if attached {
                    state.opening.remove(&*image);
                }
                match &opened {
                    Ok(service) if attached => state
                        .open
                        .push(Arc::clone(&image), Arc::clone(service))
                        .filter(|(old, _)| *old != image),
                    _ => None,
                }
            };

            if let Some((old, _)) = evicted {
                let dropped = cache.invalidate_image(&old).await;
                info!(image = %old, tiles = dropped, "Evicted image handle");
            }

            match &opened {
                Ok(service) => info!(
                    image = %image,
                    levels = service.descriptor().level_count(),
                    "Opened image"
                ),
                Err(err) => warn!(image = %image, error = %err, "Failed to open image"),
            }

            // every caller may have gone away already
            let _ = sender.send(Some(opened));
        });
    }

    /// Close an image and drop its cached tiles.
    ///
    /// Returns `false` if the image was not open. An open still in progress
    /// is detached: its callers get the service but it is not kept.
    pub async fn close(&self, image: &str) -> bool {
        let closed = {
            let mut state = self.state.lock().await;
            let detached = state.opening.remove(image).is_some();
            state.open.pop(image).is_some() || detached
        };

        let dropped = self.cache.invalidate_image(image).await;
        if closed {
            info!(image, tiles = dropped, "Closed image");
        }
        closed
    }

    /// Whether an image is currently open.
    pub async fn is_open(&self, image: &str) -> bool {
        self.state.lock().await.open.contains(image)
    }

    /// Number of open images.
    pub async fn open_count(&self) -> usize {
        self.state.lock().await.open.len()
    }

    /// The tile cache shared by every open image.
    pub fn cache(&self) -> &TileCache {
        &self.cache
    }

    pub fn source(&self) -> &S {
        &self.source
    }
}

async fn open_service<S: ImageSource + ?Sized>(
    source: Arc<S>,
    image: Arc<str>,
    cache: TileCache,
) -> Result<Arc<RegionService>, RegionError> {
    let decoder = source.open_decoder(&image).await?;
    RegionService::open(image, decoder, cache).map(Arc::new)
}

/// Wait for an open flight to publish its result.
async fn wait_for_open(
    image: &str,
    receiver: &mut watch::Receiver<OpenResult>,
) -> Result<Arc<RegionService>, RegionError> {
    match receiver.wait_for(Option::is_some).await {
        Ok(published) => match &*published {
            Some(result) => result.clone(),
            None => Err(abandoned(image)),
        },
        Err(_) => Err(abandoned(image)),
    }
}

fn abandoned(image: &str) -> RegionError {
    RegionError::configuration(format!("open of '{image}' was abandoned"))
}

// =============================================================================
// Tests
// =============================================================================
