//! Multi-label STAPLE
//!
//! Combines several segmentations of the same scene into one consensus
//! labeling while estimating, per observer, a confusion matrix against the
//! unknown truth. The expectation-maximization loop alternates the E-step
//! (per-pixel posteriors) and the M-step (confusion matrices) until no
//! matrix entry moves by more than the termination threshold, the
//! iteration limit is hit, or the run is cancelled.
//!
//! Reference: T. Rohlfing, D. B. Russakoff, C. R. Maurer Jr.,
//! "Performance-based classifier combination in atlas-based image
//! segmentation using expectation-maximization parameter estimation",
//! IEEE TMI 23(8), 2004.

use super::confusion::{self, ConfusionMatrix};
use super::convergence::{ConvergenceMonitor, IterationProgress, StopReason};
use super::decision::{assemble_labels, assemble_probabilities, DecisionRule};
use super::estep::compute_posteriors;
use super::input::ObserverSet;
use super::majority::majority_classes;
use super::mask::MaskFilter;
use super::mstep::{max_update, update_confusion};
use super::params::{validate_preference, StapleParams};
use super::prior::Priors;
use segfuse_core::{Error, Result, Volume, VoxelElement};
use segfuse_parallel::BlockIterator;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{info, warn};

/// Summary of a finished run
#[derive(Debug, Clone, Serialize)]
pub struct StapleReport {
    /// Observer identifiers, in matrix order
    pub observers: Vec<String>,
    pub number_of_classes: usize,
    /// Label written to undecided pixels
    pub undecided_label: u64,
    /// Class priors used, when shared by all pixels
    pub priors: Option<Vec<f64>>,
    /// One K×K matrix per observer, rows indexed by true label
    pub confusion_matrices: Vec<ConfusionMatrix>,
    /// Number of completed EM iterations
    pub elapsed_iterations: usize,
    /// Largest matrix entry change in the last iteration
    pub max_update: Option<f64>,
    pub stop_reason: StopReason,
    pub converged: bool,
    /// Classes that had no posterior mass in some M-step
    pub zero_support_classes: Vec<usize>,
    /// Masked pixels whose class weights all vanished
    pub collapsed_pixels: usize,
    /// Masked pixels that received the undecided label
    pub undecided_pixels: usize,
    /// Pixels taking part in estimation
    pub masked_pixels: usize,
}

impl StapleReport {
    /// Confusion matrix of the `i`-th observer
    pub fn confusion_matrix(&self, i: usize) -> Option<&ConfusionMatrix> {
        self.confusion_matrices.get(i)
    }
}

/// Result of [`staple`]
#[derive(Debug, Clone)]
pub struct StapleResult<O: VoxelElement> {
    /// Combined labeling, when labels were requested
    pub labels: Option<Volume<O>>,
    /// One posterior volume per class, when probabilities were requested
    pub probabilities: Option<Vec<Volume<f64>>>,
    pub report: StapleReport,
}

/// Run multi-label STAPLE with default progress handling (none).
///
/// # Arguments
/// * `inputs` - Observer segmentations and optional mask
/// * `params` - STAPLE parameters
///
/// # Returns
/// Combined labeling and/or class probabilities plus the run report.
pub fn staple<T, O>(inputs: &ObserverSet<T>, params: &StapleParams) -> Result<StapleResult<O>>
where
    T: VoxelElement,
    O: VoxelElement,
{
    staple_with_progress(inputs, params, |_| {})
}

/// Run multi-label STAPLE, calling `progress` after every M-step.
pub fn staple_with_progress<T, O, F>(
    inputs: &ObserverSet<T>,
    params: &StapleParams,
    mut progress: F,
) -> Result<StapleResult<O>>
where
    T: VoxelElement,
    O: VoxelElement,
    F: FnMut(IterationProgress),
{
    params.validate()?;

    let filter = MaskFilter::new(inputs.mask(), inputs.pixel_count())?;
    let table = inputs.label_table(params.number_of_classes, &filter)?;
    let (n, k) = (table.observers(), table.classes());

    check_working_set(n, k, table.pixels(), params.block_size)?;

    let preference = params.prior_preference.as_deref();
    if let Some(pref) = preference {
        validate_preference(pref, k)?;
    }

    let priors = Priors::estimate(&params.priors, &table, inputs, &filter)?;

    let undecided_label = params
        .undecided_label
        .unwrap_or(table.max_label() as u64 + 1);
    let undecided = if params.output.labels() {
        Some(output_voxel::<O>(undecided_label, preference.is_none())?)
    } else {
        None
    };
    if params.output.labels() && O::from_label(k - 1).is_none() {
        return Err(Error::UnsupportedDataType(format!(
            "{} classes do not fit the output voxel type",
            k
        )));
    }

    let trust = confusion::resolve_trust(params.observer_trust.as_deref(), n)?;
    let mut matrices = match &params.initial_confusion {
        Some(seed) => confusion::from_seed(seed, n, k)?,
        None if params.majority_vote_init => {
            confusion::from_majority_vote(&table, &majority_classes(&table, preference), &trust)
        }
        None => confusion::diagonal_biased(k, &trust),
    };

    let mut zero_support = BTreeSet::new();
    let mut collapse_seen = false;
    let mut monitor = ConvergenceMonitor::new(
        params.convergence_threshold(),
        params.max_iterations,
        params.cancel.as_ref(),
        &mut progress,
    );

    let stop_reason = loop {
        if let Some(reason) = monitor.stop_reason() {
            break reason;
        }

        let e = compute_posteriors(&table, &priors, &matrices, params.processing, params.block_size)?;
        collapse_seen |= e.collapsed > 0;

        let m = update_confusion(&table, &e.posteriors, &matrices, params.processing, params.block_size)?;
        for t in m.zero_support {
            if zero_support.is_empty() {
                warn!(class = t, "class has no expected support; keeping its confusion rows");
            }
            zero_support.insert(t);
        }

        let update = max_update(&matrices, &m.confusion);
        matrices = m.confusion;
        monitor.record(update);
    };
    let elapsed = monitor.elapsed();
    let last_update = monitor.last_update();
    drop(monitor);

    // Decide with posteriors from the final matrices.
    let e = compute_posteriors(&table, &priors, &matrices, params.processing, params.block_size)?;
    if collapse_seen || e.collapsed > 0 {
        warn!(
            pixels = e.collapsed,
            "all class weights vanished for some pixels; using the first observer there"
        );
    }

    match stop_reason {
        StopReason::Converged => info!(iterations = elapsed, "STAPLE converged"),
        StopReason::Cancelled => info!(iterations = elapsed, "STAPLE cancelled"),
        StopReason::MaxIterations if params.convergence_threshold().is_some() => warn!(
            iterations = elapsed,
            max_update = last_update,
            "STAPLE stopped at the iteration limit without converging"
        ),
        StopReason::MaxIterations => info!(iterations = elapsed, "STAPLE reached the iteration limit"),
    }

    let rule = DecisionRule {
        preference,
        tolerance: params.tie_tolerance,
    };
    let (labels, undecided_pixels) = match undecided {
        Some(undecided) => {
            let (volume, count) = assemble_labels(inputs, &table, &filter, &e.posteriors, &rule, undecided)?;
            (Some(volume), count)
        }
        None => (None, 0),
    };
    let probabilities = params
        .output
        .probabilities()
        .then(|| assemble_probabilities(inputs, &table, &filter, &e.posteriors));

    let report = StapleReport {
        observers: inputs.names().to_vec(),
        number_of_classes: k,
        undecided_label,
        priors: priors.global_probabilities(),
        confusion_matrices: confusion::to_matrices(&matrices),
        elapsed_iterations: elapsed,
        max_update: last_update,
        stop_reason,
        converged: stop_reason == StopReason::Converged,
        zero_support_classes: zero_support.into_iter().collect(),
        collapsed_pixels: e.collapsed,
        undecided_pixels,
        masked_pixels: filter.len(),
    };

    Ok(StapleResult {
        labels,
        probabilities,
        report,
    })
}

/// Largest number of `f64` values a run may hold at once (2 GiB).
const MAX_WORKING_VALUES: usize = 1 << 28;

/// Reject class counts whose matrices, per-block partial sums and
/// posteriors would not fit, before anything of that size is allocated.
fn check_working_set(observers: usize, classes: usize, pixels: usize, block_size: usize) -> Result<()> {
    let blocks = BlockIterator::new(pixels, block_size).block_count();
    let values = observers
        .checked_mul(classes)
        .and_then(|v| v.checked_mul(classes))
        .and_then(|matrix| matrix.checked_mul(blocks + 4))
        .and_then(|v| v.checked_add(pixels.checked_mul(classes)?.checked_mul(2)?));
    match values {
        Some(v) if v <= MAX_WORKING_VALUES => Ok(()),
        _ => Err(Error::invalid_parameter(
            "number_of_classes",
            classes,
            format!(
                "{} observers over {} pixels with {} classes need more than {} working values; \
                 relabel to consecutive classes",
                observers, pixels, classes, MAX_WORKING_VALUES
            ),
        )),
    }
}

/// Convert the undecided label to the output type. Only an error when the
/// label can actually be written, i.e. no preference breaks ties.
fn output_voxel<O: VoxelElement>(label: u64, required: bool) -> Result<O> {
    match usize::try_from(label).ok().and_then(O::from_label) {
        Some(v) => Ok(v),
        None if !required => Ok(O::zero()),
        None => Err(Error::invalid_parameter(
            "undecided_label",
            label,
            "does not fit the output voxel type; use a wider output type or set a prior preference",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::input::tests::volume;
    use crate::fusion::params::{OutputKind, PriorSource};
    use approx::assert_relative_eq;

    fn two_agreeing() -> ObserverSet<u8> {
        let a = volume(&[0, 0, 1, 1, 0, 1], &[2, 3]);
        ObserverSet::new(vec![a.clone(), a]).unwrap()
    }

    #[test]
    fn test_basic_run() {
        let result: StapleResult<u8> = staple(&two_agreeing(), &StapleParams::default()).unwrap();
        assert_eq!(result.labels.unwrap().values(), &[0, 0, 1, 1, 0, 1]);
        assert!(result.probabilities.is_none());

        let report = result.report;
        assert!(report.converged);
        assert_eq!(report.stop_reason, StopReason::Converged);
        assert_eq!(report.number_of_classes, 2);
        assert_eq!(report.undecided_label, 2);
        assert_eq!(report.masked_pixels, 6);
        assert_eq!(report.confusion_matrices.len(), 2);
        assert!(report.max_update.unwrap() < 1e-5);
        let priors = report.priors.unwrap();
        assert_relative_eq!(priors[0], 0.5, epsilon = 1e-12);
    }

    #[test]
    fn test_probabilities_only() {
        let params = StapleParams {
            output: OutputKind::Probabilities,
            ..Default::default()
        };
        let result: StapleResult<u8> = staple(&two_agreeing(), &params).unwrap();
        assert!(result.labels.is_none());
        let probs = result.probabilities.unwrap();
        assert_eq!(probs.len(), 2);
        for p in 0..6 {
            let sum = probs[0].values()[p] + probs[1].values()[p];
            assert_relative_eq!(sum, 1.0, epsilon = 1e-9);
        }
        assert!(probs[1].values()[2] > 0.99);
    }

    #[test]
    fn test_configuration_errors_fail_fast() {
        let set = two_agreeing();

        let params = StapleParams {
            termination_threshold: None,
            ..Default::default()
        };
        assert!(matches!(
            staple::<u8, u8>(&set, &params),
            Err(Error::NoStoppingCriterion)
        ));

        let params = StapleParams {
            termination_threshold: Some(0.0),
            ..Default::default()
        };
        assert!(matches!(
            staple::<u8, u8>(&set, &params),
            Err(Error::NoStoppingCriterion)
        ));

        let params = StapleParams {
            prior_preference: Some(vec![0, 0]),
            ..Default::default()
        };
        assert!(staple::<u8, u8>(&set, &params).is_err());

        let params = StapleParams {
            priors: PriorSource::Global(vec![1.0]),
            ..Default::default()
        };
        assert!(staple::<u8, u8>(&set, &params).is_err());
    }

    #[test]
    fn test_undecided_label_must_fit_output() {
        let set = two_agreeing();
        let params = StapleParams {
            undecided_label: Some(1000),
            ..Default::default()
        };
        assert!(staple::<u8, u8>(&set, &params).is_err());
        assert!(staple::<u8, u16>(&set, &params).is_ok());

        let params = StapleParams {
            undecided_label: Some(1000),
            prior_preference: Some(vec![1, 0]),
            ..Default::default()
        };
        assert!(staple::<u8, u8>(&set, &params).is_ok());
    }

    #[test]
    fn test_zero_threshold_runs_to_the_limit() {
        let params = StapleParams {
            termination_threshold: Some(0.0),
            max_iterations: Some(12),
            ..Default::default()
        };
        let result: StapleResult<u8> = staple(&two_agreeing(), &params).unwrap();
        assert_eq!(result.report.elapsed_iterations, 12);
        assert_eq!(result.report.stop_reason, StopReason::MaxIterations);
    }

    #[test]
    fn test_sparse_huge_label_is_rejected() {
        let a = Volume::from_vec(vec![0u16, 1, 60000, 1], &[2, 2]).unwrap();
        let set = ObserverSet::new(vec![a.clone(), a]).unwrap();
        assert!(matches!(
            staple::<u16, u16>(&set, &StapleParams::default()),
            Err(Error::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_working_set_estimate() {
        assert!(check_working_set(5, 4, 1 << 20, 65536).is_ok());
        assert!(check_working_set(3, 60001, 4, 65536).is_err());
        assert!(check_working_set(usize::MAX, 2, 4, 1).is_err());
    }

    #[test]
    fn test_majority_vote_initialization() {
        let a = volume(&[0, 0, 1, 1, 2, 2], &[6]);
        let b = volume(&[0, 0, 1, 1, 2, 1], &[6]);
        let c = volume(&[0, 1, 1, 1, 2, 2], &[6]);
        let set = ObserverSet::new(vec![a, b, c]).unwrap();
        let params = StapleParams {
            majority_vote_init: true,
            max_iterations: Some(50),
            ..Default::default()
        };
        let result: StapleResult<u8> = staple(&set, &params).unwrap();
        assert_eq!(result.labels.unwrap().values(), &[0, 0, 1, 1, 2, 2]);
    }
}
