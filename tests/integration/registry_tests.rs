//! Image registry integration tests.
//!
//! Tests verify:
//! - File-backed images open once and read correct pixels
//! - Concurrent first requests share one open
//! - Closing and evicting images drops their tiles
//! - Error mapping for missing, unreadable and escaping image ids

use std::sync::Arc;

use wsi_region::error::RegionError;
use wsi_region::region::RegionRequest;
use wsi_region::registry::{FileImageSource, ImageRegistry};
use wsi_region::tile::{CacheOutcome, TileCache};

use super::test_utils::{write_gradient_png, CountingDecoder, MockImageSource};

// =============================================================================
// File-backed Registry
// =============================================================================

#[tokio::test]
async fn test_file_backed_read_and_thumbnail() {
    let dir = tempfile::tempdir().unwrap();
    write_gradient_png(dir.path(), "case-1/he.png", 1024, 512);

    let source = FileImageSource::new(dir.path()).with_min_level_size(128);
    let registry = ImageRegistry::new(source, TileCache::with_capacity(16 * 1024 * 1024));
    let service = registry.get("case-1/he.png").await.unwrap();

    // 1024 -> 512 -> 256 -> 128
    let descriptor = service.descriptor();
    assert_eq!(descriptor.level_count(), 4);
    assert_eq!(descriptor.downsamples(), vec![1.0, 2.0, 4.0, 8.0]);

    // Full resolution pixels come straight from the file
    let request = RegionRequest::new("case-1/he.png", 1.0, 300, 40, 16, 8);
    let pixels = service.read(&request).await.unwrap();
    assert_eq!(pixels.dimensions(), (16, 8));
    assert_eq!(pixels.pixel(0, 0), Some(&[44u8, 40, 128][..]));
    assert_eq!(pixels.pixel(15, 7), Some(&[59u8, 47, 128][..]));

    let response = service
        .read_region(&RegionRequest::new("case-1/he.png", 3.0, 0, 0, 1024, 512))
        .await
        .unwrap();
    assert_eq!(response.level, 1);
    assert_eq!(response.pixels.dimensions(), (341, 171));

    let thumb = service.read_thumbnail(100, 100, 0, 0).await.unwrap();
    assert!(thumb.width() <= 100 && thumb.height() <= 100);
    assert_eq!(thumb.width(), 100);
}

#[tokio::test]
async fn test_file_backed_errors() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("notes.png"), b"definitely not a png").unwrap();
    let registry = ImageRegistry::new(FileImageSource::new(dir.path()), TileCache::new());

    assert!(matches!(
        registry.get("missing.png").await,
        Err(RegionError::InvalidRequest { .. })
    ));
    assert!(matches!(
        registry.get("../outside.png").await,
        Err(RegionError::InvalidRequest { .. })
    ));
    assert!(matches!(
        registry.get("notes.png").await,
        Err(RegionError::Configuration { .. })
    ));
    assert_eq!(registry.open_count().await, 0);
}

// =============================================================================
// Lifecycle
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_first_requests_open_once() {
    let source = MockImageSource::new().with_image("a.svs", CountingDecoder::standard());
    let registry = Arc::new(ImageRegistry::new(source, TileCache::new()));

    let handles: Vec<_> = (0..16)
        .map(|i: i64| {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move {
                let service = registry.get("a.svs").await?;
                let request = RegionRequest::new("a.svs", 4.0, (i % 4) * 400, 0, 400, 400);
                service.read(&request).await
            })
        })
        .collect();

    for handle in handles {
        let pixels = handle.await.unwrap().unwrap();
        assert_eq!(pixels.dimensions(), (100, 100));
    }

    assert_eq!(registry.source().opens(), 1);
    assert_eq!(registry.source().decoder("a.svs").decodes(), 4);
}

#[tokio::test]
async fn test_close_then_reopen_recomputes() {
    let source = MockImageSource::new()
        .with_image("a.svs", CountingDecoder::standard())
        .with_image("b.svs", CountingDecoder::standard());
    let registry = ImageRegistry::new(source, TileCache::new());
    let request_a = RegionRequest::new("a.svs", 16.0, 0, 0, 3200, 3200);
    let request_b = RegionRequest::new("b.svs", 16.0, 0, 0, 3200, 3200);

    registry.get("a.svs").await.unwrap().read(&request_a).await.unwrap();
    registry.get("b.svs").await.unwrap().read(&request_b).await.unwrap();

    assert!(registry.close("a.svs").await);
    assert_eq!(registry.open_count().await, 1);
    assert!(!registry.cache().contains(&request_a).await);
    assert!(registry.cache().contains(&request_b).await);

    let reopened = registry.get("a.svs").await.unwrap();
    let response = reopened.read_region(&request_a).await.unwrap();
    assert_eq!(response.cache_outcome, CacheOutcome::Computed);
    assert_eq!(registry.source().opens(), 3);
    assert_eq!(registry.source().decoder("a.svs").decodes(), 2);
    assert_eq!(registry.source().decoder("b.svs").decodes(), 1);
}

#[tokio::test]
async fn test_evicted_handle_drops_tiles() {
    let source = MockImageSource::new()
        .with_image("a.svs", CountingDecoder::standard())
        .with_image("b.svs", CountingDecoder::standard())
        .with_image("c.svs", CountingDecoder::standard());
    let registry = ImageRegistry::with_capacity(source, TileCache::new(), 2);

    for image in ["a.svs", "b.svs"] {
        let service = registry.get(image).await.unwrap();
        service
            .read(&RegionRequest::new(image, 16.0, 0, 0, 160, 160))
            .await
            .unwrap();
    }
    assert_eq!(registry.cache().len().await, 2);

    registry.get("c.svs").await.unwrap();

    assert_eq!(registry.open_count().await, 2);
    assert!(!registry.is_open("a.svs").await);
    assert_eq!(registry.cache().len().await, 1);
    assert!(
        registry
            .cache()
            .contains(&RegionRequest::new("b.svs", 16.0, 0, 0, 160, 160))
            .await
    );
}

#[tokio::test]
async fn test_unknown_image_not_remembered() {
    let source = MockImageSource::new().with_image("a.svs", CountingDecoder::standard());
    let registry = ImageRegistry::new(source, TileCache::new());

    assert!(registry.get("nope.svs").await.is_err());
    assert!(registry.get("nope.svs").await.is_err());
    assert_eq!(registry.source().opens(), 2);
    assert_eq!(registry.open_count().await, 0);
}
