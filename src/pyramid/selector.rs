//! Level selection.
//!
//! Maps an arbitrary requested downsample onto the pyramid level to decode
//! from, plus the residual scale still to apply after decoding.

use crate::error::RegionError;

use super::descriptor::{PyramidDescriptor, PyramidLevel};

/// Result of level selection.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LevelSelection {
    /// Index of the level to decode from
    pub level: usize,

    /// `requested / level downsample`; below 1.0 means the caller must upsample
    pub residual_scale: f64,
}

/// Select the level to decode for `requested` downsample.
///
/// Picks the level with the largest downsample that is still `<= requested`,
/// so decoding never happens at a coarser resolution than asked for. When no
/// level qualifies (an upsampling request) level 0 is used. Ties between
/// levels with identical downsample go to the lower index.
pub fn select_level(
    descriptor: &PyramidDescriptor,
    requested: f64,
) -> Result<LevelSelection, RegionError> {
    select_level_in(descriptor.levels(), requested)
}

/// [`select_level`] over a raw level slice.
pub fn select_level_in(
    levels: &[PyramidLevel],
    requested: f64,
) -> Result<LevelSelection, RegionError> {
    if !requested.is_finite() || requested <= 0.0 {
        return Err(RegionError::invalid(format!(
            "downsample must be a positive number, got {requested}"
        )));
    }

    let full = levels
        .first()
        .ok_or_else(|| RegionError::configuration("pyramid has no levels"))?;

    let mut best: Option<&PyramidLevel> = None;
    for level in levels {
        if level.downsample > requested {
            continue;
        }
        // strict comparison keeps the lower index on ties
        if best.map_or(true, |b| level.downsample > b.downsample) {
            best = Some(level);
        }
    }

    let chosen = best.unwrap_or(full);
    Ok(LevelSelection {
        level: chosen.index,
        residual_scale: requested / chosen.downsample,
    })
}
