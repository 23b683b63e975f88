//! Tile cache for decoded regions.
//!
//! This module provides a bounded, byte-accounted LRU cache for decoded
//! regions with single-flight de-duplication of concurrent identical requests.
//!
//! # Per-key lifecycle
//!
//! ```text
//! Absent ──lookup──▶ Pending ──ok──▶ Resident ──pressure──▶ Evicted (Absent)
//!                       │
//!                       └──error──▶ Absent (waiters get the error)
//! ```
//!
//! # Single-flight
//!
//! The first caller for a key registers a flight in the pending map and the
//! compute runs on a detached task. Later callers for the same key subscribe
//! to that flight instead of computing again. Because the flight is not owned
//! by any caller, cancelling a caller (including the one that started it)
//! never strands the others. Failures and panics release every waiter and
//! leave the key Absent, so the next caller retries.
//!
//! # Size-Based Eviction
//!
//! The cache tracks the byte size of resident tiles and evicts
//! least-recently-used entries when the capacity is exceeded. A tile whose
//! `Arc<CachedTile>` is still held outside the cache is borrowed and skipped.
//! A single tile larger than the whole budget is still admitted and becomes
//! the next eviction candidate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{debug, info, warn};

use crate::error::{DecoderError, RegionError};
use crate::region::{PixelBuffer, RegionRequest};

/// Default cache capacity: 512MB
pub const DEFAULT_TILE_CACHE_CAPACITY: usize = 512 * 1024 * 1024;

// =============================================================================
// Cached Tile
// =============================================================================

/// A decoded tile owned by the cache.
///
/// The pixels are immutable once published. Holding an `Arc<CachedTile>`
/// protects the tile from eviction until it is dropped.
#[derive(Debug)]
pub struct CachedTile {
    key: RegionRequest,
    pixels: PixelBuffer,
    byte_size: usize,
    last_access: AtomicU64,
}

impl CachedTile {
    fn new(key: RegionRequest, pixels: PixelBuffer, tick: u64) -> Self {
        let byte_size = pixels.byte_size();
        Self {
            key,
            pixels,
            byte_size,
            last_access: AtomicU64::new(tick),
        }
    }

    pub fn key(&self) -> &RegionRequest {
        &self.key
    }

    pub fn pixels(&self) -> &PixelBuffer {
        &self.pixels
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    /// Bytes charged against the cache capacity.
    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    /// Value of the cache's access clock at the last hit or insertion.
    pub fn last_access(&self) -> u64 {
        self.last_access.load(Ordering::Relaxed)
    }

    fn touch(&self, tick: u64) {
        self.last_access.store(tick, Ordering::Relaxed);
    }
}

/// How a lookup was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheOutcome {
    /// Tile was resident
    Hit,
    /// Another caller's in-flight compute produced the tile
    Joined,
    /// This caller started the compute
    Computed,
}

/// Cache statistics snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub joined: u64,
    pub evictions: u64,
    pub failures: u64,
    pub entries: usize,
    pub in_flight: usize,
    pub usage_bytes: usize,
    pub capacity_bytes: usize,
}

impl CacheStats {
    /// Fraction of lookups served without a new compute (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let served = self.hits + self.joined;
        let total = served + self.misses;
        if total == 0 {
            0.0
        } else {
            served as f64 / total as f64
        }
    }
}

// =============================================================================
// Internal State
// =============================================================================

type FlightResult = Option<Result<Arc<CachedTile>, RegionError>>;

/// Handle on an in-flight compute.
struct Flight {
    id: u64,
    receiver: watch::Receiver<FlightResult>,
}

/// Entry map and byte accounting, always mutated together under one lock.
struct CacheState {
    resident: LruCache<RegionRequest, Arc<CachedTile>>,
    pending: HashMap<RegionRequest, Flight>,
    usage_bytes: usize,
    capacity_bytes: usize,
    next_flight: u64,
}

impl CacheState {
    fn new(capacity_bytes: usize) -> Self {
        Self {
            resident: LruCache::unbounded(),
            pending: HashMap::new(),
            usage_bytes: 0,
            capacity_bytes,
            next_flight: 0,
        }
    }

    /// Insert a freshly computed tile and evict down to budget.
    ///
    /// Returns the number of evicted entries.
    fn admit(&mut self, tile: Arc<CachedTile>) -> usize {
        let key = tile.key.clone();
        let size = tile.byte_size;

        if let Some(old) = self.resident.put(key.clone(), tile) {
            self.usage_bytes = self.usage_bytes.saturating_sub(old.byte_size);
        }
        self.usage_bytes += size;

        if size > self.capacity_bytes {
            warn!(
                key = %key,
                size,
                capacity = self.capacity_bytes,
                "Tile exceeds cache capacity, admitting as next eviction candidate"
            );
        }

        self.evict_to_budget(Some(&key))
    }

    fn remove(&mut self, key: &RegionRequest) -> Option<Arc<CachedTile>> {
        let tile = self.resident.pop(key)?;
        self.usage_bytes = self.usage_bytes.saturating_sub(tile.byte_size);
        Some(tile)
    }

    /// Evict least-recently-used, unborrowed entries until within budget.
    fn evict_to_budget(&mut self, protect: Option<&RegionRequest>) -> usize {
        let mut evicted = 0;

        while self.usage_bytes > self.capacity_bytes {
            // iter() runs most- to least-recently used
            let victim = self
                .resident
                .iter()
                .rev()
                .find(|&(key, tile)| protect != Some(key) && Arc::strong_count(tile) == 1)
                .map(|(key, _)| key.clone());

            let Some(key) = victim else {
                debug!(
                    usage = self.usage_bytes,
                    capacity = self.capacity_bytes,
                    "No evictable tiles left, cache stays over budget"
                );
                break;
            };

            if let Some(tile) = self.remove(&key) {
                debug!(key = %key, size = tile.byte_size, "Evicted tile");
                evicted += 1;
            }
        }

        evicted
    }
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    joined: AtomicU64,
    evictions: AtomicU64,
    failures: AtomicU64,
}

struct CacheInner {
    state: Mutex<CacheState>,
    clock: AtomicU64,
    counters: Counters,
    decode_limit: Option<Arc<Semaphore>>,
}

impl CacheInner {
    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Publish the outcome of flight `id` for `key`.
    ///
    /// A flight detached by `invalidate` still hands its result to its own
    /// waiters but does not store it.
    async fn complete(
        &self,
        key: &RegionRequest,
        id: u64,
        computed: Result<PixelBuffer, RegionError>,
    ) -> Result<Arc<CachedTile>, RegionError> {
        let mut state = self.state.lock().await;

        let attached = state.pending.get(key).is_some_and(|f| f.id == id);
        if attached {
            state.pending.remove(key);
        }

        match computed {
            Ok(pixels) => {
                let tile = Arc::new(CachedTile::new(key.clone(), pixels, self.tick()));
                if attached {
                    let evicted = state.admit(Arc::clone(&tile));
                    self.counters
                        .evictions
                        .fetch_add(evicted as u64, Ordering::Relaxed);
                    debug!(
                        key = %key,
                        size = tile.byte_size,
                        usage = state.usage_bytes,
                        evicted,
                        "Cached tile"
                    );
                } else {
                    debug!(key = %key, "Discarding result of detached flight");
                }
                Ok(tile)
            }
            Err(err) => {
                self.counters.failures.fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %err, "Region compute failed, not caching");
                Err(err)
            }
        }
    }
}

// =============================================================================
// Tile Cache
// =============================================================================

/// Bounded LRU cache of decoded tiles with single-flight computation.
///
/// # Thread Safety
///
/// The cache is a cheap handle around shared state: clone it to share it
/// between services and tasks.
///
/// # Example
///
/// ```
/// use wsi_region::region::{PixelBuffer, PixelLayout, RegionRequest};
/// use wsi_region::tile::TileCache;
///
/// #[tokio::main]
/// async fn main() {
///     let cache = TileCache::with_capacity(50 * 1024 * 1024);
///     let key = RegionRequest::new("slides/sample.svs", 4.0, 0, 0, 1024, 1024);
///
///     let tile = cache
///         .get_or_compute(key.clone(), || {
///             Ok(PixelBuffer::filled(256, 256, PixelLayout::RGB8, 255))
///         })
///         .await
///         .unwrap();
///
///     assert_eq!(tile.width(), 256);
///     assert!(cache.contains(&key).await);
/// }
/// ```
#[derive(Clone)]
pub struct TileCache {
    inner: Arc<CacheInner>,
}

impl TileCache {
    /// Create a cache with the default capacity (512MB).
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_TILE_CACHE_CAPACITY)
    }

    /// Create a cache holding at most `capacity_bytes` of pixel data.
    pub fn with_capacity(capacity_bytes: usize) -> Self {
        Self::build(capacity_bytes, None)
    }

    /// Create a cache that also runs at most `max_concurrent` computes at once.
    ///
    /// `max_concurrent == 0` means unbounded.
    pub fn with_decode_limit(capacity_bytes: usize, max_concurrent: usize) -> Self {
        let limit = (max_concurrent > 0).then(|| Arc::new(Semaphore::new(max_concurrent)));
        Self::build(capacity_bytes, limit)
    }

    fn build(capacity_bytes: usize, decode_limit: Option<Arc<Semaphore>>) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState::new(capacity_bytes)),
                clock: AtomicU64::new(0),
                counters: Counters::default(),
                decode_limit,
            }),
        }
    }

    /// Return the tile for `key`, computing it at most once.
    ///
    /// Concurrent callers with the same key share one compute. `compute` is
    /// blocking and runs on tokio's blocking pool. Errors are returned to every
    /// waiting caller and are not cached.
    pub async fn get_or_compute<F>(
        &self,
        key: RegionRequest,
        compute: F,
    ) -> Result<Arc<CachedTile>, RegionError>
    where
        F: FnOnce() -> Result<PixelBuffer, RegionError> + Send + 'static,
    {
        self.lookup(key, compute).await.map(|(tile, _)| tile)
    }

    /// Like [`get_or_compute`](Self::get_or_compute), also reporting how the
    /// lookup was satisfied.
    pub async fn lookup<F>(
        &self,
        key: RegionRequest,
        compute: F,
    ) -> Result<(Arc<CachedTile>, CacheOutcome), RegionError>
    where
        F: FnOnce() -> Result<PixelBuffer, RegionError> + Send + 'static,
    {
        let (mut receiver, outcome) = {
            let mut state = self.inner.state.lock().await;

            if let Some(tile) = state.resident.get(&key) {
                let tile = Arc::clone(tile);
                tile.touch(self.inner.tick());
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Tile cache hit");
                return Ok((tile, CacheOutcome::Hit));
            }

            if let Some(flight) = state.pending.get(&key) {
                self.inner.counters.joined.fetch_add(1, Ordering::Relaxed);
                debug!(key = %key, "Joining in-flight compute");
                (flight.receiver.clone(), CacheOutcome::Joined)
            } else {
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                let id = state.next_flight;
                state.next_flight += 1;

                let (sender, receiver) = watch::channel(None);
                state.pending.insert(
                    key.clone(),
                    Flight {
                        id,
                        receiver: receiver.clone(),
                    },
                );
                debug!(key = %key, flight = id, "Tile cache miss, starting compute");
                self.spawn_flight(key.clone(), id, sender, compute);
                (receiver, CacheOutcome::Computed)
            }
        };

        let tile = wait_for_flight(&key, &mut receiver).await?;
        Ok((tile, outcome))
    }

    fn spawn_flight<F>(
        &self,
        key: RegionRequest,
        id: u64,
        sender: watch::Sender<FlightResult>,
        compute: F,
    ) where
        F: FnOnce() -> Result<PixelBuffer, RegionError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            let permit = match &inner.decode_limit {
                Some(limit) => Arc::clone(limit).acquire_owned().await.ok(),
                None => None,
            };

            let computed = match tokio::task::spawn_blocking(compute).await {
                Ok(result) => result,
                Err(join_error) => Err(RegionError::decode(
                    &key,
                    DecoderError::Panicked(join_error.to_string()),
                )),
            };
            drop(permit);

            let published = inner.complete(&key, id, computed).await;
            // every waiter may have gone away already
            let _ = sender.send(Some(published));
        });
    }

    /// Get a resident tile, marking it as recently used.
    pub async fn get(&self, key: &RegionRequest) -> Option<Arc<CachedTile>> {
        let mut state = self.inner.state.lock().await;
        match state.resident.get(key) {
            Some(tile) => {
                let tile = Arc::clone(tile);
                tile.touch(self.inner.tick());
                self.inner.counters.hits.fetch_add(1, Ordering::Relaxed);
                Some(tile)
            }
            None => {
                self.inner.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Check if a tile is resident without updating LRU order.
    pub async fn contains(&self, key: &RegionRequest) -> bool {
        let state = self.inner.state.lock().await;
        state.resident.contains(key)
    }

    /// Remove one resident tile.
    pub async fn remove(&self, key: &RegionRequest) -> Option<Arc<CachedTile>> {
        let mut state = self.inner.state.lock().await;
        state.remove(key)
    }

    /// Remove every resident tile whose key matches `predicate`.
    ///
    /// Matching in-flight computes keep running for their current waiters but
    /// are detached: their results are not stored, and later callers start a
    /// fresh compute. Returns the number of resident tiles removed.
    pub async fn invalidate<P>(&self, predicate: P) -> usize
    where
        P: Fn(&RegionRequest) -> bool,
    {
        let mut state = self.inner.state.lock().await;

        let doomed: Vec<RegionRequest> = state
            .resident
            .iter()
            .filter(|&(key, _)| predicate(key))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            state.remove(key);
        }

        let pending_before = state.pending.len();
        state.pending.retain(|key, _| !predicate(key));
        let detached = pending_before - state.pending.len();

        debug!(
            removed = doomed.len(),
            detached,
            usage = state.usage_bytes,
            "Invalidated tiles"
        );
        doomed.len()
    }

    /// Remove every tile belonging to `image`.
    pub async fn invalidate_image(&self, image: &str) -> usize {
        self.invalidate(|key| key.image() == image).await
    }

    /// Change the byte budget, evicting immediately if usage exceeds it.
    pub async fn set_capacity_bytes(&self, capacity_bytes: usize) {
        let mut state = self.inner.state.lock().await;
        state.capacity_bytes = capacity_bytes;
        let evicted = state.evict_to_budget(None);
        self.inner
            .counters
            .evictions
            .fetch_add(evicted as u64, Ordering::Relaxed);
        info!(
            capacity = capacity_bytes,
            usage = state.usage_bytes,
            evicted,
            "Tile cache capacity changed"
        );
    }

    /// Clear all resident tiles.
    pub async fn clear(&self) {
        let mut state = self.inner.state.lock().await;
        state.resident.clear();
        state.usage_bytes = 0;
    }

    /// Sum of `byte_size` over all resident tiles.
    pub async fn current_usage_bytes(&self) -> usize {
        self.inner.state.lock().await.usage_bytes
    }

    /// The current byte budget.
    pub async fn capacity_bytes(&self) -> usize {
        self.inner.state.lock().await.capacity_bytes
    }

    /// Number of resident tiles.
    pub async fn len(&self) -> usize {
        self.inner.state.lock().await.resident.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.state.lock().await.resident.is_empty()
    }

    /// Number of computes currently in flight.
    pub async fn in_flight(&self) -> usize {
        self.inner.state.lock().await.pending.len()
    }

    pub async fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock().await;
        let counters = &self.inner.counters;
        CacheStats {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            joined: counters.joined.load(Ordering::Relaxed),
            evictions: counters.evictions.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
            entries: state.resident.len(),
            in_flight: state.pending.len(),
            usage_bytes: state.usage_bytes,
            capacity_bytes: state.capacity_bytes,
        }
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Wait for a flight to publish its result.
async fn wait_for_flight(
    key: &RegionRequest,
    receiver: &mut watch::Receiver<FlightResult>,
) -> Result<Arc<CachedTile>, RegionError> {
    match receiver.wait_for(Option::is_some).await {
        Ok(published) => match &*published {
            Some(result) => result.clone(),
            None => Err(RegionError::decode(key, DecoderError::Abandoned)),
        },
        // the flight task was dropped without publishing (runtime shutdown)
        Err(_) => Err(RegionError::decode(key, DecoderError::Abandoned)),
    }
}

// =============================================================================
// Tests
// =============================================================================
