//! Configuration for the STAPLE engine

use super::confusion::ConfusionMatrix;
use super::convergence::CancelToken;
use segfuse_core::{Error, Result, Volume};
use segfuse_parallel::ProcessingMode;

/// Where the fixed class priors come from
#[derive(Debug, Clone, Default)]
pub enum PriorSource {
    /// Relative label frequency over all observers and masked pixels
    #[default]
    Frequency,
    /// One probability per class, normalized before use
    Global(Vec<f64>),
    /// One probability volume per class on the input grid; each pixel's
    /// vector is normalized before use
    Spatial(Vec<Volume<f64>>),
}

/// Which outputs a run produces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputKind {
    /// Hard label volume only
    #[default]
    Labels,
    /// One posterior probability volume per class only
    Probabilities,
    /// Both of the above
    Both,
}

impl OutputKind {
    pub fn labels(self) -> bool {
        matches!(self, OutputKind::Labels | OutputKind::Both)
    }

    pub fn probabilities(self) -> bool {
        matches!(self, OutputKind::Probabilities | OutputKind::Both)
    }
}

/// Parameters for multi-label STAPLE
#[derive(Debug, Clone)]
pub struct StapleParams {
    /// Number of classes; detected as max label + 1 when unset
    pub number_of_classes: Option<usize>,
    /// Class prior probabilities, fixed for the whole run
    pub priors: PriorSource,
    /// Rank per class used to break ties; lower wins
    pub prior_preference: Option<Vec<usize>>,
    /// Per-observer diagonal value for the default initialization
    pub observer_trust: Option<Vec<f64>>,
    /// Stop once no confusion matrix entry moves by this much (default: 1e-5);
    /// zero disables the test and then needs `max_iterations`
    pub termination_threshold: Option<f64>,
    /// Stop after this many EM iterations
    pub max_iterations: Option<usize>,
    /// Seed the confusion matrices from a majority vote
    pub majority_vote_init: bool,
    /// Start from these confusion matrices instead of initializing
    pub initial_confusion: Option<Vec<ConfusionMatrix>>,
    /// Outputs to produce
    pub output: OutputKind,
    /// Label for pixels whose maximum posterior is not unique
    pub undecided_label: Option<u64>,
    /// Posteriors this close to the maximum count as tied (default: 1e-9)
    pub tie_tolerance: f64,
    /// How E- and M-step blocks are scheduled
    pub processing: ProcessingMode,
    /// Masked pixels per E/M block (default: 65536)
    pub block_size: usize,
    /// Cooperative cancellation, checked between iterations
    pub cancel: Option<CancelToken>,
}

impl Default for StapleParams {
    fn default() -> Self {
        Self {
            number_of_classes: None,
            priors: PriorSource::Frequency,
            prior_preference: None,
            observer_trust: None,
            termination_threshold: Some(1e-5),
            max_iterations: None,
            majority_vote_init: false,
            initial_confusion: None,
            output: OutputKind::Labels,
            undecided_label: None,
            tie_tolerance: 1e-9,
            processing: ProcessingMode::Parallel,
            block_size: 65536,
            cancel: None,
        }
    }
}

impl StapleParams {
    /// Threshold that can actually end the run. `MaxUpdate` is never
    /// negative, so a zero threshold disables the convergence test.
    pub(crate) fn convergence_threshold(&self) -> Option<f64> {
        self.termination_threshold.filter(|&t| t > 0.0)
    }

    /// Checks that do not need the input data
    pub(crate) fn validate(&self) -> Result<()> {
        if let Some(t) = self.termination_threshold {
            if !t.is_finite() || t < 0.0 {
                return Err(Error::invalid_parameter(
                    "termination_threshold",
                    t,
                    "must be finite and non-negative",
                ));
            }
        }
        if self.convergence_threshold().is_none() && self.max_iterations.is_none() {
            return Err(Error::NoStoppingCriterion);
        }
        if !self.tie_tolerance.is_finite() || self.tie_tolerance < 0.0 {
            return Err(Error::invalid_parameter(
                "tie_tolerance",
                self.tie_tolerance,
                "must be finite and non-negative",
            ));
        }
        if self.block_size == 0 {
            return Err(Error::invalid_parameter("block_size", 0, "must be positive"));
        }
        if let ProcessingMode::ParallelWith(0) = self.processing {
            return Err(Error::invalid_parameter("processing", self.processing, "zero threads"));
        }
        Ok(())
    }
}

/// A preference ranking must be a permutation of `0..classes`.
pub(crate) fn validate_preference(preference: &[usize], classes: usize) -> Result<()> {
    if preference.len() != classes {
        return Err(Error::invalid_parameter(
            "prior_preference",
            preference,
            format!("expected {} entries, one per class", classes),
        ));
    }
    let mut seen = vec![false; classes];
    for &rank in preference {
        if rank >= classes {
            return Err(Error::invalid_parameter(
                "prior_preference",
                preference,
                format!("rank {} is not below the number of classes {}", rank, classes),
            ));
        }
        if std::mem::replace(&mut seen[rank], true) {
            return Err(Error::invalid_parameter(
                "prior_preference",
                preference,
                format!("rank {} appears twice", rank),
            ));
        }
    }
    Ok(())
}
