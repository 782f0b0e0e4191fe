//! # segfuse Parallel
//!
//! Parallel processing strategies for per-pixel estimation.
//!
//! This crate provides:
//! - `ProcessingMode`: sequential, all-core or fixed-thread execution
//! - `BlockIterator`: contiguous pixel blocks that partition a flat index range

pub mod blocks;
pub mod strategy;

pub use blocks::{Block, BlockIterator};
pub use strategy::{num_cpus, ParallelStrategy, ProcessingMode};
