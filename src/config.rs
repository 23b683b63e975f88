//! Configuration management for the region reader.
//!
//! This module provides a flexible configuration system that supports:
//! - Command-line arguments via clap
//! - Environment variables with `WSI_REGION_` prefix
//! - Sensible defaults for all optional settings
//!
//! # Example
//!
//! ```ignore
//! use clap::Parser;
//! use wsi_region::config::Cli;
//!
//! let cli = Cli::parse();
//! cli.cache.validate()?;
//!
//! let registry = cli.cache.build_registry();
//! ```
//!
//! # Environment Variables
//!
//! - `WSI_REGION_CACHE_SIZE` - Tile cache budget, e.g. `512MB` (default: 512MB)
//! - `WSI_REGION_DECODE_CONCURRENCY` - Max concurrent decodes, 0 = unbounded (default: 0)
//! - `WSI_REGION_MAX_OPEN_IMAGES` - Max images kept open (default: 32)
//! - `WSI_REGION_MIN_LEVEL_SIZE` - Smallest generated pyramid level (default: 256)
//! - `WSI_REGION_ROOT` - Directory image ids are resolved against (default: .)

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::decoder::DEFAULT_MIN_LEVEL_SIZE;
use crate::registry::{FileImageSource, ImageRegistry, DEFAULT_MAX_OPEN_IMAGES};
use crate::tile::TileCache;

// =============================================================================
// Default Values
// =============================================================================

/// Default tile cache budget.
pub const DEFAULT_CACHE_SIZE: &str = "512MB";

/// Default thumbnail bound in pixels.
pub const DEFAULT_THUMBNAIL_SIZE: u32 = 512;

// =============================================================================
// CLI Structure
// =============================================================================

/// WSI Region - multi-resolution region reader for Whole Slide Images.
///
/// Reads regions at arbitrary downsamples from image pyramids through a
/// shared, byte-bounded tile cache.
#[derive(Parser, Debug, Clone)]
#[command(name = "wsi-region")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub cache: CacheConfig,

    /// Enable verbose logging (debug level).
    #[arg(short, long, global = true, default_value_t = false)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print an image's pyramid descriptor as JSON.
    Info(InfoArgs),

    /// Read one region and write it to an image file.
    Read(ReadArgs),

    /// Write a thumbnail of the whole image.
    Thumbnail(ThumbnailArgs),
}

// =============================================================================
// Cache Configuration
// =============================================================================

/// Settings shared by every command.
#[derive(Args, Debug, Clone)]
pub struct CacheConfig {
    /// Tile cache budget (accepts B, KB, MB, GB).
    #[arg(
        long,
        default_value = DEFAULT_CACHE_SIZE,
        value_parser = parse_byte_size,
        env = "WSI_REGION_CACHE_SIZE"
    )]
    pub cache_size: usize,

    /// Maximum number of decodes running at once (0 = unbounded).
    #[arg(long, default_value_t = 0, env = "WSI_REGION_DECODE_CONCURRENCY")]
    pub decode_concurrency: usize,

    /// Maximum number of images kept open.
    #[arg(long, default_value_t = DEFAULT_MAX_OPEN_IMAGES, env = "WSI_REGION_MAX_OPEN_IMAGES")]
    pub max_open_images: usize,

    /// Pyramid building stops once a level's longer side is at most this size.
    #[arg(long, default_value_t = DEFAULT_MIN_LEVEL_SIZE, env = "WSI_REGION_MIN_LEVEL_SIZE")]
    pub min_level_size: u32,

    /// Directory that image ids are resolved against.
    #[arg(long, default_value = ".", env = "WSI_REGION_ROOT")]
    pub root: PathBuf,
}

impl CacheConfig {
    /// Validate the configuration and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if self.cache_size == 0 {
            return Err("cache_size must be greater than 0".to_string());
        }
        if self.max_open_images == 0 {
            return Err("max_open_images must be greater than 0".to_string());
        }
        if self.min_level_size == 0 {
            return Err("min_level_size must be greater than 0".to_string());
        }
        Ok(())
    }

    /// Build the configured tile cache.
    pub fn build_cache(&self) -> TileCache {
        match self.decode_concurrency {
            0 => TileCache::with_capacity(self.cache_size),
            limit => TileCache::with_decode_limit(self.cache_size, limit),
        }
    }

    /// Build a file-backed registry over the configured root.
    pub fn build_registry(&self) -> ImageRegistry<FileImageSource> {
        let source =
            FileImageSource::new(self.root.clone()).with_min_level_size(self.min_level_size);
        ImageRegistry::with_capacity(source, self.build_cache(), self.max_open_images)
    }
}

// =============================================================================
// Command Arguments
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct InfoArgs {
    /// Image id, relative to the root.
    pub image: String,
}

#[derive(Args, Debug, Clone)]
pub struct ReadArgs {
    /// Image id, relative to the root.
    pub image: String,

    /// Left edge in full-resolution pixels.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub x: i64,

    /// Top edge in full-resolution pixels.
    #[arg(long, default_value_t = 0, allow_hyphen_values = true)]
    pub y: i64,

    /// Region width in full-resolution pixels.
    #[arg(long)]
    pub width: u32,

    /// Region height in full-resolution pixels.
    #[arg(long)]
    pub height: u32,

    /// Downsample of the returned pixels relative to full resolution.
    #[arg(long, default_value_t = 1.0)]
    pub downsample: f64,

    /// Z-slice index.
    #[arg(long, default_value_t = 0)]
    pub z: u32,

    /// Timepoint index.
    #[arg(long, default_value_t = 0)]
    pub t: u32,

    /// Output file; the format follows the extension.
    #[arg(short, long)]
    pub output: PathBuf,
}

#[derive(Args, Debug, Clone)]
pub struct ThumbnailArgs {
    /// Image id, relative to the root.
    pub image: String,

    /// Maximum thumbnail width.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_SIZE)]
    pub max_width: u32,

    /// Maximum thumbnail height.
    #[arg(long, default_value_t = DEFAULT_THUMBNAIL_SIZE)]
    pub max_height: u32,

    /// Z-slice index.
    #[arg(long, default_value_t = 0)]
    pub z: u32,

    /// Timepoint index.
    #[arg(long, default_value_t = 0)]
    pub t: u32,

    /// Output file; the format follows the extension.
    #[arg(short, long)]
    pub output: PathBuf,
}

// =============================================================================
// Byte Sizes
// =============================================================================

/// Parse a byte size such as `512MB`, `1GB`, `64 KB` or `4096`.
///
/// Units are binary multiples and case-insensitive.
pub fn parse_byte_size(value: &str) -> Result<usize, String> {
    let trimmed = value.trim();
    let split = trimmed
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(trimmed.len());
    let (number, unit) = trimmed.split_at(split);

    let number: usize = number
        .parse()
        .map_err(|_| format!("invalid byte size '{value}'"))?;

    let multiplier: usize = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" => 1024,
        "M" | "MB" => 1024 * 1024,
        "G" | "GB" => 1024 * 1024 * 1024,
        other => return Err(format!("unknown size unit '{other}' in '{value}'")),
    };

    number
        .checked_mul(multiplier)
        .ok_or_else(|| format!("byte size '{value}' is too large"))
}

// =============================================================================
// Tests
// =============================================================================
