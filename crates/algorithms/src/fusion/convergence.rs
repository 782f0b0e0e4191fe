//! Stopping rules, progress notification and cooperative cancellation

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Shared flag asking a running estimation to stop.
///
/// Checked only between iterations; the run then finishes with the most
/// recent estimates as if it had converged.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

/// Delivered after every M-step
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IterationProgress {
    /// 1-based index of the iteration just completed
    pub iteration: usize,
    /// Largest confusion matrix entry change in that iteration
    pub max_update: f64,
}

/// Why the EM loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopReason {
    /// The largest update fell below the termination threshold
    Converged,
    /// The iteration limit was reached first
    MaxIterations,
    /// A cancellation request was seen at an iteration boundary
    Cancelled,
}

pub(crate) struct ConvergenceMonitor<'a> {
    threshold: Option<f64>,
    max_iterations: Option<usize>,
    cancel: Option<&'a CancelToken>,
    progress: &'a mut dyn FnMut(IterationProgress),
    elapsed: usize,
    last_update: Option<f64>,
}

impl<'a> ConvergenceMonitor<'a> {
    pub(crate) fn new(
        threshold: Option<f64>,
        max_iterations: Option<usize>,
        cancel: Option<&'a CancelToken>,
        progress: &'a mut dyn FnMut(IterationProgress),
    ) -> Self {
        Self {
            threshold,
            max_iterations,
            cancel,
            progress,
            elapsed: 0,
            last_update: None,
        }
    }

    /// Whether to stop before starting another iteration
    pub(crate) fn stop_reason(&self) -> Option<StopReason> {
        if let (Some(threshold), Some(update)) = (self.threshold, self.last_update) {
            if update < threshold {
                return Some(StopReason::Converged);
            }
        }
        if self.max_iterations.is_some_and(|max| self.elapsed >= max) {
            return Some(StopReason::MaxIterations);
        }
        if self.cancel.is_some_and(CancelToken::is_cancelled) {
            return Some(StopReason::Cancelled);
        }
        None
    }

    /// Record a finished iteration and notify the progress callback
    pub(crate) fn record(&mut self, max_update: f64) {
        self.elapsed += 1;
        self.last_update = Some(max_update);
        debug!(iteration = self.elapsed, max_update, "STAPLE iteration");
        (self.progress)(IterationProgress {
            iteration: self.elapsed,
            max_update,
        });
    }

    pub(crate) fn elapsed(&self) -> usize {
        self.elapsed
    }

    pub(crate) fn last_update(&self) -> Option<f64> {
        self.last_update
    }
}
