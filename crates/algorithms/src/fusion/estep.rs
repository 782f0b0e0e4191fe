//! E-step: per-pixel true-label posteriors
//!
//! For masked pixel `p` and candidate label `t`:
//!
//! ```text
//! W(t) = Prior(t) * prod_i C_i[t][o_i(p)]
//! ```
//!
//! Products of many small probabilities underflow, so the weights are
//! accumulated as sums of logarithms and shifted by the per-pixel maximum
//! before exponentiating. A pixel whose every log weight is `-inf` is
//! *collapsed*: its posterior row is left all zero and it contributes
//! nothing to the M-step.

use super::input::LabelTable;
use super::prior::Priors;
use ndarray::{Array2, Array3, ArrayView1, ArrayViewMut1, ArrayViewMut2, Axis};
use segfuse_core::{Error, Result};
use segfuse_parallel::{Block, BlockIterator, ParallelStrategy, ProcessingMode};

/// Posteriors for all masked pixels, `(masked pixel, class)`
#[derive(Debug, Clone)]
pub(crate) struct EStepOutcome {
    pub(crate) posteriors: Array2<f64>,
    pub(crate) collapsed: usize,
}

/// Normalized posterior of one pixel, written into `out`.
///
/// Returns `false` if all weights vanished, leaving `out` zeroed.
pub(crate) fn pixel_posterior(
    observed: ArrayView1<'_, u32>,
    log_prior: ArrayView1<'_, f64>,
    log_confusion: &Array3<f64>,
    mut out: ArrayViewMut1<'_, f64>,
) -> bool {
    let mut max = f64::NEG_INFINITY;
    for (t, slot) in out.iter_mut().enumerate() {
        let mut log_w = log_prior[t];
        for (i, &o) in observed.iter().enumerate() {
            log_w += log_confusion[[i, t, o as usize]];
        }
        *slot = log_w;
        max = max.max(log_w);
    }

    if !max.is_finite() || out.iter().any(|w| w.is_nan()) {
        out.fill(0.0);
        return false;
    }

    let mut sum = 0.0;
    for slot in out.iter_mut() {
        *slot = (*slot - max).exp();
        sum += *slot;
    }
    // sum >= 1: the maximal class contributes exp(0).
    out.mapv_inplace(|w| w / sum);
    true
}

/// Run the E-step over all masked pixels, block by block.
pub(crate) fn compute_posteriors(
    table: &LabelTable,
    priors: &Priors,
    confusion: &Array3<f64>,
    mode: ProcessingMode,
    block_size: usize,
) -> Result<EStepOutcome> {
    let log_confusion = confusion.mapv(f64::ln);
    let mut posteriors = Array2::<f64>::zeros((table.pixels(), table.classes()));

    // Blocks and row chunks line up: both cut the masked pixels every `block_size`.
    let items: Vec<(Block, ArrayViewMut2<'_, f64>)> = BlockIterator::new(table.pixels(), block_size)
        .zip(posteriors.axis_chunks_iter_mut(Axis(0), block_size))
        .collect();

    let collapsed_per_block = mode
        .par_map(items, |(block, mut chunk)| {
            let mut collapsed = 0usize;
            for (local, row) in chunk.outer_iter_mut().enumerate() {
                let j = block.start + local;
                if !pixel_posterior(table.row(j), priors.log_row(j), &log_confusion, row) {
                    collapsed += 1;
                }
            }
            collapsed
        })
        .map_err(|e| Error::Algorithm(format!("cannot build thread pool: {}", e)))?;

    Ok(EStepOutcome {
        posteriors,
        collapsed: collapsed_per_block.into_iter().sum(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::confusion::diagonal_biased;
    use crate::fusion::input::{tests::volume, ObserverSet};
    use crate::fusion::mask::MaskFilter;
    use crate::fusion::params::PriorSource;
    use approx::assert_relative_eq;
    use ndarray::{array, Array1};

    #[test]
    fn test_single_pixel_posterior() {
        let observed = array![0u32, 0];
        let log_prior = array![0.5f64.ln(), 0.5f64.ln()];
        let log_confusion = diagonal_biased(2, &[0.8, 0.8]).mapv(f64::ln);
        let mut out = Array1::zeros(2);
        assert!(pixel_posterior(observed.view(), log_prior.view(), &log_confusion, out.view_mut()));

        // 0.5 * 0.8 * 0.8 vs 0.5 * 0.2 * 0.2
        assert_relative_eq!(out[0], 0.64 / 0.68, epsilon = 1e-12);
        assert_relative_eq!(out[1], 0.04 / 0.68, epsilon = 1e-12);
    }

    #[test]
    fn test_many_observers_do_not_underflow() {
        // 2000 observers all reporting 1 with trust 0.6: the direct product
        // 0.6^2000 underflows to 0 in f64.
        let n = 2000;
        let observed = Array1::from_elem(n, 1u32);
        let log_prior = array![0.5f64.ln(), 0.5f64.ln()];
        let log_confusion = diagonal_biased(2, &vec![0.6; n]).mapv(f64::ln);
        assert_eq!(0.6f64.powi(n as i32), 0.0);

        let mut out = Array1::zeros(2);
        assert!(pixel_posterior(observed.view(), log_prior.view(), &log_confusion, out.view_mut()));
        assert_relative_eq!(out.sum(), 1.0, epsilon = 1e-12);
        assert!(out[1] > 0.999);
    }

    #[test]
    fn test_collapsed_pixel() {
        let observed = array![0u32, 1];
        let log_prior = array![0.5f64.ln(), 0.5f64.ln()];
        // Perfect observers that disagree: every class has probability 0.
        let log_confusion = array![[[1.0, 0.0], [0.0, 1.0]], [[1.0, 0.0], [0.0, 1.0]]].mapv(f64::ln);
        let mut out = Array1::from_elem(2, 9.0);
        assert!(!pixel_posterior(observed.view(), log_prior.view(), &log_confusion, out.view_mut()));
        assert_eq!(out.to_vec(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_posteriors_sum_to_one_for_every_pixel() {
        let a = volume(&[0, 1, 2, 0, 1, 2, 2, 2, 0], &[3, 3]);
        let b = volume(&[0, 1, 1, 0, 2, 2, 2, 0, 0], &[3, 3]);
        let c = volume(&[1, 1, 2, 0, 1, 0, 2, 2, 1], &[3, 3]);
        let set = ObserverSet::new(vec![a, b, c]).unwrap();
        let filter = MaskFilter::new(None, 9).unwrap();
        let table = set.label_table(None, &filter).unwrap();
        let priors = Priors::estimate(&PriorSource::Frequency, &table, &set, &filter).unwrap();
        let confusion = diagonal_biased(3, &[0.9, 0.7, 0.5]);

        for (mode, block) in [
            (ProcessingMode::Sequential, 4),
            (ProcessingMode::Parallel, 2),
            (ProcessingMode::ParallelWith(2), 100),
        ] {
            let e = compute_posteriors(&table, &priors, &confusion, mode, block).unwrap();
            assert_eq!(e.collapsed, 0);
            assert_eq!(e.posteriors.dim(), (9, 3));
            for row in e.posteriors.outer_iter() {
                assert_relative_eq!(row.sum(), 1.0, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_blocking_does_not_change_results() {
        let a = volume(&[0, 1, 2, 0, 1, 2, 2, 2, 0], &[3, 3]);
        let b = volume(&[0, 1, 1, 0, 2, 2, 2, 0, 0], &[3, 3]);
        let set = ObserverSet::new(vec![a, b]).unwrap();
        let filter = MaskFilter::new(None, 9).unwrap();
        let table = set.label_table(None, &filter).unwrap();
        let priors = Priors::estimate(&PriorSource::Frequency, &table, &set, &filter).unwrap();
        let confusion = diagonal_biased(3, &[0.9, 0.7]);

        let whole = compute_posteriors(&table, &priors, &confusion, ProcessingMode::Sequential, 64).unwrap();
        let blocked = compute_posteriors(&table, &priors, &confusion, ProcessingMode::Parallel, 1).unwrap();
        assert_eq!(whole.posteriors, blocked.posteriors);
    }
}
