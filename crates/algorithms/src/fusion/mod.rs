//! Label fusion
//!
//! Combine several segmentations of the same grid into one labeling:
//! - STAPLE: simultaneous truth and performance level estimation (EM)
//! - Majority vote: per-pixel plurality, used as a baseline and initializer

mod confusion;
mod convergence;
mod decision;
mod estep;
pub(crate) mod input;
mod majority;
mod mask;
mod mstep;
mod params;
mod prior;
mod staple;

pub use confusion::{ConfusionMatrix, DEFAULT_OBSERVER_TRUST};
pub use convergence::{CancelToken, IterationProgress, StopReason};
pub use input::{ObserverSet, MAX_CLASSES};
pub use majority::{majority_vote, MajorityVoteParams};
pub use mask::Mask;
pub use params::{OutputKind, PriorSource, StapleParams};
pub use staple::{staple, staple_with_progress, StapleReport, StapleResult};
