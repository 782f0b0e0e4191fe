//! Per-pixel majority voting
//!
//! Used to seed the confusion matrices and available on its own as a
//! baseline fusion.

use super::decision::resolve_tie;
use super::input::{LabelTable, ObserverSet};
use super::mask::MaskFilter;
use super::params::validate_preference;
use ndarray::ArrayView1;
use segfuse_core::{Error, Result, Volume, VoxelElement};

/// Parameters for majority voting
#[derive(Debug, Clone, Default)]
pub struct MajorityVoteParams {
    /// Number of classes; detected as max label + 1 when unset
    pub number_of_classes: Option<usize>,
    /// Rank per class used to break ties; lower wins
    pub prior_preference: Option<Vec<usize>>,
    /// Label for tied pixels; defaults to max label + 1
    pub undecided_label: Option<u64>,
}

/// Classes that received the most votes at one pixel, ascending
fn winners(observed: ArrayView1<'_, u32>, counts: &mut [usize]) -> Vec<usize> {
    counts.fill(0);
    for &o in observed {
        counts[o as usize] += 1;
    }
    let best = counts.iter().copied().max().unwrap_or(0);
    counts
        .iter()
        .enumerate()
        .filter(|&(_, &c)| c == best)
        .map(|(t, _)| t)
        .collect()
}

/// Majority class per masked pixel; ties go to the preferred class, or the
/// lowest class index without a preference.
pub(crate) fn majority_classes(table: &LabelTable, preference: Option<&[usize]>) -> Vec<u32> {
    let mut counts = vec![0usize; table.classes()];
    (0..table.pixels())
        .map(|j| {
            let tied = winners(table.row(j), &mut counts);
            let chosen = match preference {
                Some(pref) => resolve_tie(&tied, pref),
                None => tied.first().copied(),
            };
            chosen.unwrap_or(0) as u32
        })
        .collect()
}

/// Plain majority-vote fusion.
///
/// Pixels outside the mask take the first observer's label; tied pixels
/// take the preferred class, or the undecided label without a preference.
pub fn majority_vote<T, O>(inputs: &ObserverSet<T>, params: &MajorityVoteParams) -> Result<Volume<O>>
where
    T: VoxelElement,
    O: VoxelElement,
{
    let filter = MaskFilter::new(inputs.mask(), inputs.pixel_count())?;
    let table = inputs.label_table(params.number_of_classes, &filter)?;
    if let Some(pref) = &params.prior_preference {
        validate_preference(pref, table.classes())?;
    }

    let undecided_label = params
        .undecided_label
        .unwrap_or(table.max_label() as u64 + 1);
    let convert = |label: u64| -> Result<O> {
        label_to_voxel(label).ok_or_else(|| {
            Error::UnsupportedDataType(format!("label {} does not fit the output voxel type", label))
        })
    };
    let undecided = convert(undecided_label)?;

    let mut output: Volume<O> = inputs.reference().with_same_meta();
    let values = output.values_mut();
    for (p, slot) in values.iter_mut().enumerate() {
        *slot = convert(table.reference_class(p) as u64)?;
    }

    let mut counts = vec![0usize; table.classes()];
    for (j, &p) in filter.indices().iter().enumerate() {
        let tied = winners(table.row(j), &mut counts);
        let chosen = match (tied.as_slice(), params.prior_preference.as_deref()) {
            ([t], _) => Some(*t),
            (candidates, Some(pref)) => resolve_tie(candidates, pref),
            _ => None,
        };
        values[p] = match chosen {
            Some(t) => convert(t as u64)?,
            None => undecided,
        };
    }
    Ok(output)
}

fn label_to_voxel<O: VoxelElement>(label: u64) -> Option<O> {
    usize::try_from(label).ok().and_then(O::from_label)
}
