//! Shared tile cache integration tests.
//!
//! Tests verify:
//! - Several images share one byte budget
//! - Borrowed tiles survive eviction pressure
//! - The decode concurrency limit holds under load
//! - Mixed concurrent workloads keep the accounting consistent
//!
//! Tiles held by in-flight readers count as borrowed, so under concurrency
//! usage may exceed the budget. Concurrent tests check usage against the
//! resident total instead.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use wsi_region::config::CacheConfig;
use wsi_region::region::{PixelBuffer, PixelLayout, RegionRequest};
use wsi_region::tile::TileCache;

use super::test_utils::{open_service, CountingDecoder};

fn gray_tile(size: u32) -> PixelBuffer {
    PixelBuffer::filled(size, size, PixelLayout::GRAY8, 7)
}

#[tokio::test]
async fn test_images_share_one_budget() {
    let cache = TileCache::with_capacity(4 * 32 * 32 * 3);
    let decoders: Vec<_> = (0..3)
        .map(|_| Arc::new(CountingDecoder::standard()))
        .collect();
    let services: Vec<_> = decoders
        .iter()
        .enumerate()
        .map(|(i, d)| open_service(&format!("img-{i}.svs"), d, &cache))
        .collect();

    for (i, service) in services.iter().enumerate() {
        for x in 0..2 {
            let request = RegionRequest::new(service.image(), 1.0, x * 64, 0, 32, 32);
            service.read(&request).await.unwrap();
        }
        assert!(
            cache.current_usage_bytes().await <= cache.capacity_bytes().await,
            "after image {i}"
        );
    }

    // Six tiles read, four fit
    assert_eq!(cache.len().await, 4);
    assert_eq!(cache.stats().await.evictions, 2);
}

#[tokio::test]
async fn test_borrowed_tile_survives_pressure() {
    let cache = TileCache::with_capacity(2 * 64 * 64);
    let pinned_key = RegionRequest::new("a.svs", 1.0, 0, 0, 64, 64);

    let pinned = cache
        .get_or_compute(pinned_key.clone(), || Ok(gray_tile(64)))
        .await
        .unwrap();

    for x in 1..6 {
        let key = RegionRequest::new("a.svs", 1.0, x * 64, 0, 64, 64);
        cache.get_or_compute(key, || Ok(gray_tile(64))).await.unwrap();
    }

    assert!(cache.contains(&pinned_key).await);
    assert_eq!(pinned.pixels().dimensions(), (64, 64));

    drop(pinned);
    for x in 6..8 {
        let key = RegionRequest::new("a.svs", 1.0, x * 64, 0, 64, 64);
        cache.get_or_compute(key, || Ok(gray_tile(64))).await.unwrap();
    }
    assert!(!cache.contains(&pinned_key).await);
    assert!(cache.current_usage_bytes().await <= cache.capacity_bytes().await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_decode_limit_from_config() {
    let config = CacheConfig {
        cache_size: 64 * 1024 * 1024,
        decode_concurrency: 2,
        max_open_images: 4,
        min_level_size: 256,
        root: ".".into(),
    };
    let cache = config.build_cache();

    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let cache = cache.clone();
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            tokio::spawn(async move {
                let key = RegionRequest::new("a.svs", 1.0, i * 16, 0, 16, 16);
                cache
                    .get_or_compute(key, move || {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        std::thread::sleep(Duration::from_millis(40));
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(gray_tile(16))
                    })
                    .await
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= 2);
    assert_eq!(cache.len().await, 8);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mixed_concurrent_workload() {
    let cache = TileCache::with_capacity(1024 * 1024);
    let decoder = Arc::new(CountingDecoder::standard().with_delay(Duration::from_millis(2)));
    let service = Arc::new(open_service("mixed.svs", &decoder, &cache));

    let handles: Vec<_> = (0..64)
        .map(|i: i64| {
            let service = Arc::clone(&service);
            tokio::spawn(async move {
                // 16 distinct keys, each requested four times
                let slot = i % 16;
                let request = RegionRequest::new("mixed.svs", 2.0, slot * 200, 0, 200, 200);
                service.read(&request).await
            })
        })
        .collect();

    for handle in handles {
        let pixels = handle.await.unwrap().unwrap();
        assert_eq!(pixels.dimensions(), (100, 100));
    }

    let stats = cache.stats().await;
    assert_eq!(stats.hits + stats.joined + stats.misses, 64);
    assert!(decoder.decodes() >= 16);
    assert_eq!(decoder.decodes() as u64, stats.misses);
    assert_eq!(stats.failures, 0);
    assert_eq!(cache.in_flight().await, 0);

    let mut resident = 0;
    for slot in 0..16 {
        let request = RegionRequest::new("mixed.svs", 2.0, slot * 200, 0, 200, 200);
        if let Some(tile) = cache.get(&request).await {
            resident += tile.byte_size();
        }
    }
    assert_eq!(cache.current_usage_bytes().await, resident);
}
