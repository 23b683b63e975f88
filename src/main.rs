//! WSI Region - probe tool for the region reader.
//!
//! Opens images through the file-backed registry and prints descriptors or
//! writes regions and thumbnails to disk.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use image::DynamicImage;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wsi_region::{
    config::{Cli, Command, InfoArgs, ReadArgs, ThumbnailArgs},
    registry::{FileImageSource, ImageRegistry},
    PixelBuffer, RegionRequest,
};

type Registry = ImageRegistry<FileImageSource>;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = cli.cache.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let registry = cli.cache.build_registry();

    let result = match &cli.command {
        Command::Info(args) => run_info(&registry, args).await,
        Command::Read(args) => run_read(&registry, args).await,
        Command::Thumbnail(args) => run_thumbnail(&registry, args).await,
    };

    let stats = registry.cache().stats().await;
    info!(
        hits = stats.hits,
        misses = stats.misses,
        joined = stats.joined,
        evictions = stats.evictions,
        usage_bytes = stats.usage_bytes,
        capacity_bytes = stats.capacity_bytes,
        "Tile cache stats"
    );

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Commands
// =============================================================================

async fn run_info(registry: &Registry, args: &InfoArgs) -> Result<(), String> {
    let service = registry.get(&args.image).await.map_err(|e| e.to_string())?;

    let json = serde_json::to_string_pretty(service.descriptor().as_ref())
        .map_err(|e| format!("Failed to serialize descriptor: {}", e))?;
    println!("{}", json);

    Ok(())
}

async fn run_read(registry: &Registry, args: &ReadArgs) -> Result<(), String> {
    let service = registry.get(&args.image).await.map_err(|e| e.to_string())?;

    let request = RegionRequest::new(
        args.image.as_str(),
        args.downsample,
        args.x,
        args.y,
        args.width,
        args.height,
    )
    .with_plane(args.z, args.t);

    let response = service
        .read_region(&request)
        .await
        .map_err(|e| e.to_string())?;

    info!(
        level = response.level,
        residual = response.residual_scale,
        width = response.pixels.width(),
        height = response.pixels.height(),
        "Read region"
    );

    save(&response.pixels, &args.output)
}

async fn run_thumbnail(registry: &Registry, args: &ThumbnailArgs) -> Result<(), String> {
    let service = registry.get(&args.image).await.map_err(|e| e.to_string())?;

    let pixels = service
        .read_thumbnail(args.max_width, args.max_height, args.z, args.t)
        .await
        .map_err(|e| e.to_string())?;

    info!(
        width = pixels.width(),
        height = pixels.height(),
        "Read thumbnail"
    );

    save(&pixels, &args.output)
}

// =============================================================================
// Helpers
// =============================================================================

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr so command output on stdout stays clean.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "wsi_region=debug"
    } else {
        "wsi_region=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Write pixels to `path`, picking the format from the extension.
fn save(pixels: &PixelBuffer, path: &Path) -> Result<(), String> {
    let image = pixels.to_dynamic().map_err(|e| e.to_string())?;

    let is_jpeg = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("jpg") || ext.eq_ignore_ascii_case("jpeg"));

    // JPEG has no alpha channel and no 16-bit samples
    let image = if is_jpeg {
        match image.color().channel_count() {
            1 | 2 => DynamicImage::ImageLuma8(image.to_luma8()),
            _ => DynamicImage::ImageRgb8(image.to_rgb8()),
        }
    } else {
        image
    };

    image
        .save(path)
        .map_err(|e| format!("Failed to write {}: {}", path.display(), e))?;

    info!(path = %path.display(), "Wrote image");
    Ok(())
}
