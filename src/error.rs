use thiserror::Error;

use crate::region::RegionRequest;

/// Errors reported by a [`RegionDecoder`](crate::decoder::RegionDecoder) backend.
///
/// These describe why a single decode call failed. The region service wraps
/// them in [`RegionError::Decode`] together with the request that triggered
/// the decode.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecoderError {
    /// Failure reported by the native image library
    #[error("native decoder error: {0}")]
    Native(String),

    /// The stored pixel data could not be interpreted
    #[error("corrupt image data: {0}")]
    CorruptData(String),

    /// The pixel layout cannot be decoded or resampled
    #[error("unsupported pixel layout: {channels} channel(s) at {bits_per_channel} bits")]
    UnsupportedLayout { channels: u8, bits_per_channel: u8 },

    /// z-slice or timepoint does not exist in the image
    #[error("plane out of range: z={z}, t={t} (image has {n_z} z-slices, {n_t} timepoints)")]
    PlaneOutOfRange { z: u32, t: u32, n_z: u32, n_t: u32 },

    /// Rectangle falls outside the requested level
    #[error("region {x},{y} {width}x{height} exceeds level {level} bounds")]
    RegionOutOfBounds {
        level: usize,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },

    /// Pixel data length does not match the declared geometry
    #[error("pixel buffer size mismatch: expected {expected} bytes, got {actual}")]
    BufferSize { expected: usize, actual: usize },

    /// The decoder panicked while producing the region
    #[error("decoder panicked: {0}")]
    Panicked(String),

    /// The decode was dropped before it produced a result
    #[error("decode abandoned before completion")]
    Abandoned,
}

/// Errors returned by the region service, tile cache and image registry.
///
/// The type is `Clone` so a single decode failure can be handed to every
/// caller waiting on the same in-flight request.
#[derive(Debug, Clone, Error)]
pub enum RegionError {
    /// Caller-supplied geometry, plane index or image identity is invalid.
    ///
    /// Never retried and never cached.
    #[error("invalid region request: {reason}")]
    InvalidRequest { reason: String },

    /// The image pyramid is malformed or the image source is unusable.
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    /// Decoding failed for one specific request.
    ///
    /// A fresh call for the same request retries the decode.
    #[error("decode failed for {request}: {source}")]
    Decode {
        request: Box<RegionRequest>,
        #[source]
        source: DecoderError,
    },
}

impl RegionError {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        RegionError::InvalidRequest {
            reason: reason.into(),
        }
    }

    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        RegionError::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn decode(request: &RegionRequest, source: DecoderError) -> Self {
        RegionError::Decode {
            request: Box::new(request.clone()),
            source,
        }
    }

    /// Whether a fresh call with the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RegionError::Decode { .. })
    }
}
