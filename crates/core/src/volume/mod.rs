//! Volume data structures

mod element;
mod geometry;
mod grid;

pub use element::VoxelElement;
pub use geometry::Geometry;
pub use grid::{Volume, VolumeStatistics};
