//! Fixed class priors
//!
//! Priors are established once before the EM loop and never re-estimated.
//! They are stored as natural logarithms because the E-step works in the
//! log domain.

use super::input::{LabelTable, ObserverSet};
use super::mask::MaskFilter;
use super::params::PriorSource;
use ndarray::{Array1, Array2, ArrayView1};
use segfuse_core::{Error, Result, VoxelElement};

/// Log prior per class, either shared by every pixel or per masked pixel
#[derive(Debug, Clone)]
pub(crate) enum Priors {
    Global(Array1<f64>),
    /// `(masked pixel, class)`
    Spatial(Array2<f64>),
}

impl Priors {
    /// Resolve the configured prior source against the observations
    pub(crate) fn estimate<T: VoxelElement>(
        source: &PriorSource,
        table: &LabelTable,
        inputs: &ObserverSet<T>,
        filter: &MaskFilter,
    ) -> Result<Self> {
        let k = table.classes();
        match source {
            PriorSource::Frequency => Ok(Self::from_probabilities(&label_frequency(table))),
            PriorSource::Global(values) => {
                if values.len() != k {
                    return Err(Error::invalid_parameter(
                        "priors",
                        values,
                        format!("expected {} entries, one per class", k),
                    ));
                }
                if values.iter().any(|p| !p.is_finite() || *p < 0.0) {
                    return Err(Error::invalid_parameter(
                        "priors",
                        values,
                        "probabilities must be finite and non-negative",
                    ));
                }
                let sum: f64 = values.iter().sum();
                if sum <= 0.0 {
                    return Err(Error::invalid_parameter("priors", values, "sum must be positive"));
                }
                let normalized: Vec<f64> = values.iter().map(|p| p / sum).collect();
                Ok(Self::from_probabilities(&normalized))
            }
            PriorSource::Spatial(volumes) => {
                if volumes.len() != k {
                    return Err(Error::invalid_parameter(
                        "priors",
                        format!("{} probability volumes", volumes.len()),
                        format!("expected {} volumes, one per class", k),
                    ));
                }
                let reference = inputs.reference();
                for (t, volume) in volumes.iter().enumerate() {
                    if !reference.same_grid(volume) {
                        return Err(Error::GeometryMismatch(format!(
                            "prior probability volume {}",
                            t
                        )));
                    }
                    if volume.values().iter().any(|p| !p.is_finite() || *p < 0.0) {
                        return Err(Error::invalid_parameter(
                            "priors",
                            format!("volume {}", t),
                            "probabilities must be finite and non-negative",
                        ));
                    }
                }

                let mut log_priors = Array2::from_shape_fn((filter.len(), k), |(j, t)| {
                    volumes[t].values()[filter.pixel(j)]
                });
                for mut row in log_priors.rows_mut() {
                    let sum = row.sum();
                    if sum > 0.0 {
                        row.mapv_inplace(|p| (p / sum).ln());
                    } else {
                        // No admissible class: the pixel collapses in the E-step.
                        row.fill(f64::NEG_INFINITY);
                    }
                }
                Ok(Priors::Spatial(log_priors))
            }
        }
    }

    fn from_probabilities(probabilities: &[f64]) -> Self {
        Priors::Global(probabilities.iter().map(|p| p.ln()).collect())
    }

    /// Log priors for masked pixel `j`
    pub(crate) fn log_row(&self, j: usize) -> ArrayView1<'_, f64> {
        match self {
            Priors::Global(log) => log.view(),
            Priors::Spatial(log) => log.row(j),
        }
    }

    /// Prior probabilities when they are shared by all pixels
    pub(crate) fn global_probabilities(&self) -> Option<Vec<f64>> {
        match self {
            Priors::Global(log) => Some(log.iter().map(|l| l.exp()).collect()),
            Priors::Spatial(_) => None,
        }
    }
}

/// Relative frequency of every class over all observers and masked pixels
pub(crate) fn label_frequency(table: &LabelTable) -> Vec<f64> {
    let mut counts = vec![0usize; table.classes()];
    for &label in table.observed().iter() {
        counts[label as usize] += 1;
    }
    let total = table.observed().len() as f64;
    counts.iter().map(|&c| c as f64 / total).collect()
}
