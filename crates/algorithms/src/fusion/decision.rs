//! Hard labels and probability volumes from posteriors

use super::input::{LabelTable, ObserverSet};
use super::mask::MaskFilter;
use ndarray::{Array2, ArrayView1};
use segfuse_core::{Error, Result, Volume, VoxelElement};

/// Outcome for one masked pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PixelDecision {
    Label(usize),
    Undecided,
    /// Every class weight vanished; the reference observer decides
    Collapsed,
}

/// Among tied candidates, the one with the lowest preference rank
pub(crate) fn resolve_tie(candidates: &[usize], preference: &[usize]) -> Option<usize> {
    candidates.iter().copied().min_by_key(|&t| preference[t])
}

#[derive(Debug, Clone)]
pub(crate) struct DecisionRule<'a> {
    pub(crate) preference: Option<&'a [usize]>,
    pub(crate) tolerance: f64,
}

impl DecisionRule<'_> {
    pub(crate) fn decide(&self, posterior: ArrayView1<'_, f64>) -> PixelDecision {
        let max = posterior.fold(0.0f64, |m, &p| m.max(p));
        if max <= 0.0 {
            return PixelDecision::Collapsed;
        }

        let tied: Vec<usize> = posterior
            .iter()
            .enumerate()
            .filter(|(_, p)| max - **p <= self.tolerance)
            .map(|(t, _)| t)
            .collect();

        match (tied.as_slice(), self.preference) {
            ([t], _) => PixelDecision::Label(*t),
            (candidates, Some(preference)) => resolve_tie(candidates, preference)
                .map_or(PixelDecision::Undecided, PixelDecision::Label),
            _ => PixelDecision::Undecided,
        }
    }
}

fn output_label<O: VoxelElement>(class: usize) -> Result<O> {
    O::from_label(class).ok_or_else(|| {
        Error::UnsupportedDataType(format!("label {} does not fit the output voxel type", class))
    })
}

/// Build the combined label volume.
///
/// Pixels outside the mask and collapsed pixels take the first observer's
/// label. Returns the volume and the number of undecided pixels.
pub(crate) fn assemble_labels<T: VoxelElement, O: VoxelElement>(
    inputs: &ObserverSet<T>,
    table: &LabelTable,
    filter: &MaskFilter,
    posteriors: &Array2<f64>,
    rule: &DecisionRule<'_>,
    undecided: O,
) -> Result<(Volume<O>, usize)> {
    let mut output: Volume<O> = inputs.reference().with_same_meta();
    let values = output.values_mut();
    for (p, slot) in values.iter_mut().enumerate() {
        *slot = output_label(table.reference_class(p))?;
    }

    let mut undecided_count = 0usize;
    for (j, &p) in filter.indices().iter().enumerate() {
        match rule.decide(posteriors.row(j)) {
            PixelDecision::Label(t) => values[p] = output_label(t)?,
            PixelDecision::Undecided => {
                values[p] = undecided;
                undecided_count += 1;
            }
            PixelDecision::Collapsed => {}
        }
    }
    Ok((output, undecided_count))
}

/// One posterior volume per class.
///
/// Masked pixels carry their posterior; everything else is one-hot on the
/// first observer's label so every pixel sums to 1.
pub(crate) fn assemble_probabilities<T: VoxelElement>(
    inputs: &ObserverSet<T>,
    table: &LabelTable,
    filter: &MaskFilter,
    posteriors: &Array2<f64>,
) -> Vec<Volume<f64>> {
    let k = table.classes();
    let mut volumes: Vec<Volume<f64>> = (0..k).map(|_| inputs.reference().with_same_meta()).collect();

    for p in 0..filter.total() {
        volumes[table.reference_class(p)].values_mut()[p] = 1.0;
    }
    for (j, &p) in filter.indices().iter().enumerate() {
        let row = posteriors.row(j);
        if row.sum() <= 0.0 {
            continue;
        }
        for (t, volume) in volumes.iter_mut().enumerate() {
            volume.values_mut()[p] = row[t];
        }
    }
    volumes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fusion::input::tests::volume;
    use ndarray::array;

    #[test]
    fn test_unique_maximum() {
        let rule = DecisionRule {
            preference: None,
            tolerance: 1e-9,
        };
        assert_eq!(rule.decide(array![0.2, 0.7, 0.1].view()), PixelDecision::Label(1));
    }

    #[test]
    fn test_tie_without_preference_is_undecided() {
        let rule = DecisionRule {
            preference: None,
            tolerance: 1e-9,
        };
        let third = 1.0 / 3.0;
        assert_eq!(
            rule.decide(array![third, third + 1e-12, third - 1e-12].view()),
            PixelDecision::Undecided
        );
    }

    #[test]
    fn test_tie_resolved_by_preference() {
        let preference = [2, 0, 1];
        let rule = DecisionRule {
            preference: Some(&preference),
            tolerance: 1e-9,
        };
        // Classes 0 and 2 tie; class 2 has rank 1, class 0 rank 2.
        assert_eq!(rule.decide(array![0.45, 0.1, 0.45].view()), PixelDecision::Label(2));
    }

    #[test]
    fn test_collapsed_pixel() {
        let rule = DecisionRule {
            preference: None,
            tolerance: 1e-9,
        };
        assert_eq!(rule.decide(array![0.0, 0.0].view()), PixelDecision::Collapsed);
    }

    #[test]
    fn test_assembly_with_mask_and_collapse() {
        let a = volume(&[1, 0, 1, 0], &[2, 2]);
        let b = volume(&[0, 0, 1, 1], &[2, 2]);
        let mask = volume(&[1, 1, 1, 0], &[2, 2]);
        let set = ObserverSet::new(vec![a, b]).unwrap().with_mask(&mask).unwrap();
        let filter = MaskFilter::new(set.mask(), 4).unwrap();
        let table = set.label_table(None, &filter).unwrap();

        let posteriors = array![[0.5, 0.5], [0.9, 0.1], [0.0, 0.0]];
        let rule = DecisionRule {
            preference: None,
            tolerance: 1e-9,
        };
        let (labels, undecided) =
            assemble_labels::<u8, u16>(&set, &table, &filter, &posteriors, &rule, 7).unwrap();
        assert_eq!(labels.values(), &[7, 0, 1, 0]);
        assert_eq!(undecided, 1);

        let probs = assemble_probabilities(&set, &table, &filter, &posteriors);
        assert_eq!(probs.len(), 2);
        assert_eq!(probs[0].values(), &[0.5, 0.9, 0.0, 1.0]);
        assert_eq!(probs[1].values(), &[0.5, 0.1, 1.0, 0.0]);
    }
}
