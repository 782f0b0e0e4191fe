//! M-step: confusion matrices from posteriors
//!
//! ```text
//! C_i[t][o] = sum_{p : o_i(p) = o} Post(p, t) / sum_p Post(p, t)
//! ```
//!
//! Each block accumulates private partial sums; the partials are merged in
//! block order afterwards, so the result does not depend on scheduling.

use super::input::LabelTable;
use ndarray::{Array1, Array2, Array3, Zip};
use segfuse_core::{Error, Result};
use segfuse_parallel::{Block, BlockIterator, ParallelStrategy, ProcessingMode};

/// Expected counts for one block of pixels
#[derive(Debug, Clone)]
pub(crate) struct PartialSums {
    /// `(observer, true label, observed label)` posterior mass
    counts: Array3<f64>,
    /// Posterior mass per true label
    mass: Array1<f64>,
}

impl PartialSums {
    fn zeros(observers: usize, classes: usize) -> Self {
        Self {
            counts: Array3::zeros((observers, classes, classes)),
            mass: Array1::zeros(classes),
        }
    }

    fn accumulate(table: &LabelTable, posteriors: &Array2<f64>, block: Block) -> Self {
        let mut sums = Self::zeros(table.observers(), table.classes());
        for j in block.range() {
            let observed = table.row(j);
            for (t, &post) in posteriors.row(j).iter().enumerate() {
                if post == 0.0 {
                    continue;
                }
                sums.mass[t] += post;
                for (i, &o) in observed.iter().enumerate() {
                    sums.counts[[i, t, o as usize]] += post;
                }
            }
        }
        sums
    }

    fn merge(mut self, other: &PartialSums) -> Self {
        self.counts += &other.counts;
        self.mass += &other.mass;
        self
    }
}

#[derive(Debug, Clone)]
pub(crate) struct MStepOutcome {
    pub(crate) confusion: Array3<f64>,
    /// Classes with no posterior mass; their rows were left unchanged
    pub(crate) zero_support: Vec<usize>,
}

/// Re-estimate every observer's confusion matrix.
pub(crate) fn update_confusion(
    table: &LabelTable,
    posteriors: &Array2<f64>,
    previous: &Array3<f64>,
    mode: ProcessingMode,
    block_size: usize,
) -> Result<MStepOutcome> {
    let blocks: Vec<Block> = BlockIterator::new(table.pixels(), block_size).collect();
    let partials = mode
        .par_map(blocks, |block| PartialSums::accumulate(table, posteriors, block))
        .map_err(|e| Error::Algorithm(format!("cannot build thread pool: {}", e)))?;

    let totals = partials
        .iter()
        .fold(PartialSums::zeros(table.observers(), table.classes()), PartialSums::merge);

    let mut confusion = previous.clone();
    let mut zero_support = Vec::new();
    for (t, &mass) in totals.mass.iter().enumerate() {
        if mass > 0.0 {
            for i in 0..table.observers() {
                for o in 0..table.classes() {
                    confusion[[i, t, o]] = totals.counts[[i, t, o]] / mass;
                }
            }
        } else {
            zero_support.push(t);
        }
    }

    Ok(MStepOutcome {
        confusion,
        zero_support,
    })
}

/// Largest absolute change of any confusion matrix entry
pub(crate) fn max_update(previous: &Array3<f64>, next: &Array3<f64>) -> f64 {
    Zip::from(previous)
        .and(next)
        .fold(0.0f64, |acc, &a, &b| acc.max((a - b).abs()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::confusion::diagonal_biased;
    use crate::fusion::estep::compute_posteriors;
    use crate::fusion::input::{tests::volume, ObserverSet};
    use crate::fusion::mask::MaskFilter;
    use crate::fusion::params::PriorSource;
    use crate::fusion::prior::Priors;
    use approx::assert_relative_eq;
    use ndarray::{array, Axis};

    fn table_of(observers: Vec<segfuse_core::Volume<u8>>, classes: Option<usize>) -> (ObserverSet<u8>, MaskFilter, LabelTable) {
        let set = ObserverSet::new(observers).unwrap();
        let filter = MaskFilter::new(None, set.pixel_count()).unwrap();
        let table = set.label_table(classes, &filter).unwrap();
        (set, filter, table)
    }

    #[test]
    fn test_hard_posteriors_give_empirical_rates() {
        let (_, _, table) = table_of(
            vec![volume(&[0, 0, 1, 1], &[4]), volume(&[0, 1, 1, 1], &[4])],
            None,
        );
        let posteriors = array![[1.0, 0.0], [1.0, 0.0], [0.0, 1.0], [0.0, 1.0]];
        let previous = diagonal_biased(2, &[0.9, 0.9]);
        let m = update_confusion(&table, &posteriors, &previous, ProcessingMode::Sequential, 3).unwrap();

        assert!(m.zero_support.is_empty());
        assert_eq!(m.confusion.index_axis(Axis(0), 0), array![[1.0, 0.0], [0.0, 1.0]]);
        assert_eq!(m.confusion.index_axis(Axis(0), 1), array![[0.5, 0.5], [0.0, 1.0]]);
    }

    #[test]
    fn test_zero_support_rows_are_kept() {
        let (_, _, table) = table_of(
            vec![volume(&[0, 1, 1], &[3]), volume(&[0, 1, 0], &[3])],
            Some(3),
        );
        let posteriors = array![[0.8, 0.2, 0.0], [0.1, 0.9, 0.0], [0.4, 0.6, 0.0]];
        let previous = diagonal_biased(3, &[0.7, 0.6]);
        let m = update_confusion(&table, &posteriors, &previous, ProcessingMode::Parallel, 1).unwrap();

        assert_eq!(m.zero_support, vec![2]);
        for i in 0..2 {
            assert_eq!(m.confusion.slice(ndarray::s![i, 2, ..]), previous.slice(ndarray::s![i, 2, ..]));
        }
        assert_relative_eq!(m.confusion[[0, 0, 0]], 0.8 / 1.3, epsilon = 1e-12);
        assert_relative_eq!(m.confusion[[1, 1, 0]], 0.8 / 1.7, epsilon = 1e-12);
    }

    #[test]
    fn test_rows_sum_to_one_after_em_steps() {
        let (set, filter, table) = table_of(
            vec![
                volume(&[0, 1, 2, 0, 1, 2, 2, 2, 0], &[3, 3]),
                volume(&[0, 1, 1, 0, 2, 2, 2, 0, 0], &[3, 3]),
                volume(&[1, 1, 2, 0, 1, 0, 2, 2, 1], &[3, 3]),
            ],
            None,
        );
        let priors = Priors::estimate(&PriorSource::Frequency, &table, &set, &filter).unwrap();
        let mut confusion = diagonal_biased(3, &[0.99, 0.99, 0.99]);

        for _ in 0..5 {
            let e = compute_posteriors(&table, &priors, &confusion, ProcessingMode::Parallel, 4).unwrap();
            let m = update_confusion(&table, &e.posteriors, &confusion, ProcessingMode::Parallel, 4).unwrap();
            assert!(m.zero_support.is_empty());
            for s in m.confusion.sum_axis(Axis(2)).iter() {
                assert_relative_eq!(*s, 1.0, epsilon = 1e-6);
            }
            assert!(max_update(&confusion, &m.confusion) >= 0.0);
            confusion = m.confusion;
        }
    }

    #[test]
    fn test_block_size_does_not_matter() {
        let (_, _, table) = table_of(
            vec![volume(&[0, 0, 1, 1, 0], &[5]), volume(&[0, 1, 1, 1, 1], &[5])],
            None,
        );
        let posteriors = array![[0.9, 0.1], [0.6, 0.4], [0.2, 0.8], [0.3, 0.7], [0.5, 0.5]];
        let previous = diagonal_biased(2, &[0.9, 0.9]);
        let a = update_confusion(&table, &posteriors, &previous, ProcessingMode::Sequential, 5).unwrap();
        let b = update_confusion(&table, &posteriors, &previous, ProcessingMode::Parallel, 2).unwrap();
        for (x, y) in a.confusion.iter().zip(b.confusion.iter()) {
            assert_relative_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_max_update() {
        let a = diagonal_biased(2, &[0.9, 0.8]);
        let b = diagonal_biased(2, &[0.9, 0.5]);
        assert_relative_eq!(max_update(&a, &b), 0.3, epsilon = 1e-12);
        assert_eq!(max_update(&a, &a), 0.0);
    }
}
