//! Pyramid metadata and level selection.
//!
//! - [`PyramidDescriptor`]: validated, immutable per-image pyramid metadata
//! - [`select_level`]: maps a requested downsample to a level and residual scale

mod descriptor;
mod selector;

pub use descriptor::{ChannelInfo, PixelCalibration, PyramidDescriptor, PyramidLevel};
pub use selector::{select_level, select_level_in, LevelSelection};
