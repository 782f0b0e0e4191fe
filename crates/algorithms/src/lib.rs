//! # SegFuse Algorithms
//!
//! Label fusion for segmentation volumes.
//!
//! ## Available Algorithm Categories
//!
//! - **fusion**: Multi-label STAPLE, majority voting

pub mod fusion;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::fusion::{
        majority_vote, staple, staple_with_progress, CancelToken, ConfusionMatrix, MajorityVoteParams,
        ObserverSet, OutputKind, PriorSource, StapleParams, StapleReport, StapleResult, StopReason,
    };
    pub use segfuse_core::prelude::*;
}
