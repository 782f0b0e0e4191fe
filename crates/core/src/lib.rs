//! # segfuse Core
//!
//! Core types, errors and I/O for the segfuse label-fusion library.
//!
//! This crate provides:
//! - `Volume<T>`: N-dimensional label / probability grid
//! - `Geometry`: per-axis voxel spacing and origin
//! - `VoxelElement`: numeric types that can be stored in a volume
//! - Native TIFF I/O for 2-D and multi-page 3-D volumes

pub mod error;
pub mod io;
pub mod volume;

pub use error::{Error, Result};
pub use volume::{Geometry, Volume, VolumeStatistics, VoxelElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::volume::{Geometry, Volume, VoxelElement};
}
