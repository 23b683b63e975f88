//! Region request value type.
//!
//! A [`RegionRequest`] names a rectangle of an image in full-resolution pixel
//! coordinates, the downsample it should be returned at, and the plane it
//! comes from. It doubles as the tile cache key: repeated identical requests
//! always resolve to the same cached tile, regardless of how the rectangle is
//! later rounded onto a pyramid level.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A request for a rectangular region of an image.
///
/// Equality and hashing are structural. The downsample is compared by its
/// exact bit pattern, so `4.0` and `4.0000001` are different keys.
#[derive(Debug, Clone)]
pub struct RegionRequest {
    /// Image identity (typically its path)
    pub image: Arc<str>,

    /// Ratio of full-resolution pixels to output pixels
    pub downsample: f64,

    /// Left edge in full-resolution pixels
    pub x: i64,

    /// Top edge in full-resolution pixels
    pub y: i64,

    /// Width in full-resolution pixels
    pub width: u32,

    /// Height in full-resolution pixels
    pub height: u32,

    /// z-slice index
    pub z: u32,

    /// Timepoint index
    pub t: u32,
}

impl RegionRequest {
    /// Create a request for plane `z = 0, t = 0`.
    pub fn new(
        image: impl Into<Arc<str>>,
        downsample: f64,
        x: i64,
        y: i64,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            image: image.into(),
            downsample,
            x,
            y,
            width,
            height,
            z: 0,
            t: 0,
        }
    }

    /// Create a request covering a whole `width` x `height` image.
    pub fn full_image(image: impl Into<Arc<str>>, downsample: f64, width: u32, height: u32) -> Self {
        Self::new(image, downsample, 0, 0, width, height)
    }

    /// Return the same request on another z-slice and timepoint.
    pub fn with_plane(mut self, z: u32, t: u32) -> Self {
        self.z = z;
        self.t = t;
        self
    }

    /// Image identity as a string slice.
    pub fn image(&self) -> &str {
        &self.image
    }

    /// Right edge (exclusive) in full-resolution pixels, saturating at `i64::MAX`.
    pub fn max_x(&self) -> i64 {
        self.x.saturating_add(self.width as i64)
    }

    /// Bottom edge (exclusive) in full-resolution pixels, saturating at `i64::MAX`.
    pub fn max_y(&self) -> i64 {
        self.y.saturating_add(self.height as i64)
    }
}

impl PartialEq for RegionRequest {
    fn eq(&self, other: &Self) -> bool {
        self.image == other.image
            && self.downsample.to_bits() == other.downsample.to_bits()
            && self.x == other.x
            && self.y == other.y
            && self.width == other.width
            && self.height == other.height
            && self.z == other.z
            && self.t == other.t
    }
}

impl Eq for RegionRequest {}

impl Hash for RegionRequest {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.image.hash(state);
        self.downsample.to_bits().hash(state);
        self.x.hash(state);
        self.y.hash(state);
        self.width.hash(state);
        self.height.hash(state);
        self.z.hash(state);
        self.t.hash(state);
    }
}

impl fmt::Display for RegionRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[x={}, y={}, {}x{} @{} z={} t={}]",
            self.image, self.x, self.y, self.width, self.height, self.downsample, self.z, self.t
        )
    }
}
