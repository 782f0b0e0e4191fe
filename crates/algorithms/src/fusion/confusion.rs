//! Confusion matrix initialization
//!
//! Matrices are held as one `(observer, true label, observed label)` array
//! internally; entry `[i, t, o]` is P(observer `i` reports `o` | truth `t`).

use super::input::LabelTable;
use ndarray::{Array2, Array3, ArrayViewMut1, Axis};
use segfuse_core::{Error, Result};

/// One observer's K×K table, rows indexed by true label
pub type ConfusionMatrix = Array2<f64>;

/// Diagonal value used when no observer trust is configured
pub const DEFAULT_OBSERVER_TRUST: f64 = 0.99;

/// Resolve per-observer trust, validating user values
pub(crate) fn resolve_trust(trust: Option<&[f64]>, observers: usize) -> Result<Vec<f64>> {
    match trust {
        None => Ok(vec![DEFAULT_OBSERVER_TRUST; observers]),
        Some(values) => {
            if values.len() != observers {
                return Err(Error::invalid_parameter(
                    "observer_trust",
                    values,
                    format!("expected {} entries, one per observer", observers),
                ));
            }
            if values.iter().any(|&v| !(v > 0.0 && v < 1.0)) {
                return Err(Error::invalid_parameter(
                    "observer_trust",
                    values,
                    "values must lie strictly between 0 and 1",
                ));
            }
            Ok(values.to_vec())
        }
    }
}

fn diagonal_row(mut row: ArrayViewMut1<'_, f64>, t: usize, trust: f64) {
    let k = row.len();
    let off = (1.0 - trust) / (k - 1) as f64;
    row.fill(off);
    row[t] = trust;
}

/// Every observer assumed mostly right: `trust` on the diagonal, the rest
/// spread evenly over the other labels.
pub(crate) fn diagonal_biased(classes: usize, trust: &[f64]) -> Array3<f64> {
    let mut matrices = Array3::zeros((trust.len(), classes, classes));
    for (mut matrix, &tr) in matrices.outer_iter_mut().zip(trust) {
        for (t, row) in matrix.outer_iter_mut().enumerate() {
            diagonal_row(row, t, tr);
        }
    }
    matrices
}

/// Seed each matrix with P(observer label | majority label) counts.
///
/// `majority` holds the voted class per masked pixel. Rows of classes that
/// never won a vote fall back to the diagonal-biased row.
pub(crate) fn from_majority_vote(table: &LabelTable, majority: &[u32], trust: &[f64]) -> Array3<f64> {
    let k = table.classes();
    let mut counts = Array3::<f64>::zeros((table.observers(), k, k));
    for (j, &truth) in majority.iter().enumerate() {
        for (i, &o) in table.row(j).iter().enumerate() {
            counts[[i, truth as usize, o as usize]] += 1.0;
        }
    }

    for (mut matrix, &tr) in counts.outer_iter_mut().zip(trust) {
        for (t, mut row) in matrix.outer_iter_mut().enumerate() {
            let support = row.sum();
            if support > 0.0 {
                row /= support;
            } else {
                diagonal_row(row, t, tr);
            }
        }
    }
    counts
}

/// Validate user-supplied matrices: one per observer, K×K, finite,
/// non-negative, rows summing to 1.
pub(crate) fn from_seed(seed: &[ConfusionMatrix], observers: usize, classes: usize) -> Result<Array3<f64>> {
    if seed.len() != observers {
        return Err(Error::invalid_parameter(
            "initial_confusion",
            format!("{} matrices", seed.len()),
            format!("expected {}, one per observer", observers),
        ));
    }
    let mut matrices = Array3::zeros((observers, classes, classes));
    for (i, (matrix, mut slot)) in seed.iter().zip(matrices.outer_iter_mut()).enumerate() {
        if matrix.dim() != (classes, classes) {
            return Err(Error::invalid_parameter(
                "initial_confusion",
                format!("matrix {} is {:?}", i, matrix.dim()),
                format!("expected {}x{}", classes, classes),
            ));
        }
        if matrix.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(Error::invalid_parameter(
                "initial_confusion",
                format!("matrix {}", i),
                "entries must be finite and non-negative",
            ));
        }
        if matrix
            .sum_axis(Axis(1))
            .iter()
            .any(|s| (s - 1.0).abs() > 1e-6)
        {
            return Err(Error::invalid_parameter(
                "initial_confusion",
                format!("matrix {}", i),
                "every row must sum to 1",
            ));
        }
        slot.assign(matrix);
    }
    Ok(matrices)
}

/// Split the internal array into one matrix per observer
pub(crate) fn to_matrices(matrices: &Array3<f64>) -> Vec<ConfusionMatrix> {
    matrices.outer_iter().map(|m| m.to_owned()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::input::{tests::volume, ObserverSet};
    use crate::fusion::mask::MaskFilter;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn test_trust_defaults_and_validation() {
        assert_eq!(resolve_trust(None, 3).unwrap(), vec![DEFAULT_OBSERVER_TRUST; 3]);
        assert!(resolve_trust(Some(&[0.9, 0.8]), 3).is_err());
        assert!(resolve_trust(Some(&[0.9, 1.0, 0.8]), 3).is_err());
        assert!(resolve_trust(Some(&[0.9, 0.0, 0.8]), 3).is_err());
        assert_eq!(resolve_trust(Some(&[0.9, 0.7]), 2).unwrap(), vec![0.9, 0.7]);
    }

    #[test]
    fn test_diagonal_biased_rows_sum_to_one() {
        let m = diagonal_biased(4, &[0.9, 0.6]);
        assert_eq!(m.dim(), (2, 4, 4));
        assert_relative_eq!(m[[0, 2, 2]], 0.9, epsilon = 1e-12);
        assert_relative_eq!(m[[1, 0, 3]], 0.4 / 3.0, epsilon = 1e-12);
        for s in m.sum_axis(Axis(2)).iter() {
            assert_relative_eq!(*s, 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_majority_vote_seeding() {
        let a = volume(&[0, 0, 1, 1], &[2, 2]);
        let b = volume(&[0, 1, 1, 1], &[2, 2]);
        let c = volume(&[0, 0, 1, 2], &[2, 2]);
        let set = ObserverSet::new(vec![a, b, c]).unwrap();
        let filter = MaskFilter::new(None, 4).unwrap();
        let table = set.label_table(None, &filter).unwrap();

        let majority = [0u32, 0, 1, 1];
        let m = from_majority_vote(&table, &majority, &[0.9, 0.9, 0.9]);

        // Observer 1 said 1 at one of the two majority-0 pixels.
        assert_relative_eq!(m[[1, 0, 0]], 0.5, epsilon = 1e-12);
        assert_relative_eq!(m[[1, 0, 1]], 0.5, epsilon = 1e-12);
        // Observer 2 said 2 at one of the two majority-1 pixels.
        assert_relative_eq!(m[[2, 1, 2]], 0.5, epsilon = 1e-12);
        // Class 2 never won: diagonal-biased row.
        assert_relative_eq!(m[[0, 2, 2]], 0.9, epsilon = 1e-12);
        assert_relative_eq!(m[[0, 2, 0]], 0.05, epsilon = 1e-12);
    }

    #[test]
    fn test_seed_validation() {
        let good = array![[0.9, 0.1], [0.2, 0.8]];
        let seeded = from_seed(&[good.clone(), good.clone()], 2, 2).unwrap();
        assert_relative_eq!(seeded[[1, 1, 0]], 0.2, epsilon = 1e-12);
        assert_eq!(to_matrices(&seeded), vec![good.clone(), good.clone()]);

        assert!(from_seed(&[good.clone()], 2, 2).is_err());
        let bad_rows = array![[0.5, 0.1], [0.2, 0.8]];
        assert!(from_seed(&[good.clone(), bad_rows], 2, 2).is_err());
        let bad_shape = array![[1.0]];
        assert!(from_seed(&[good, bad_shape], 2, 2).is_err());
    }
}
