//! Observer label volumes sharing one voxel grid

use super::mask::{Mask, MaskFilter};
use ndarray::{Array2, ArrayView1};
use segfuse_core::{Error, Geometry, Result, Volume, VoxelElement};

/// Upper bound on the number of classes; confusion matrices are K×K per observer.
pub const MAX_CLASSES: usize = 1 << 16;

/// A set of observer segmentations of the same scene, plus an optional mask.
///
/// All volumes share shape and geometry; this is checked on construction.
/// The set is read-only once built.
#[derive(Debug, Clone)]
pub struct ObserverSet<T: VoxelElement> {
    names: Vec<String>,
    observers: Vec<Volume<T>>,
    mask: Option<Mask>,
}

impl<T: VoxelElement> ObserverSet<T> {
    /// Build from unnamed volumes; observers are called `observer 0`, `observer 1`, ...
    pub fn new(observers: Vec<Volume<T>>) -> Result<Self> {
        let named = observers
            .into_iter()
            .enumerate()
            .map(|(i, v)| (format!("observer {}", i), v))
            .collect();
        Self::from_named(named)
    }

    /// Build from `(identifier, volume)` pairs, keeping their order
    pub fn from_named(observers: Vec<(String, Volume<T>)>) -> Result<Self> {
        if observers.len() < 2 {
            return Err(Error::TooFewObservers(observers.len()));
        }
        let (names, observers): (Vec<String>, Vec<Volume<T>>) = observers.into_iter().unzip();

        let reference = &observers[0];
        for (name, volume) in names.iter().zip(&observers).skip(1) {
            check_grid(reference, volume, name)?;
        }

        Ok(Self {
            names,
            observers,
            mask: None,
        })
    }

    /// Restrict estimation to the non-zero voxels of `mask`
    pub fn with_mask<M: VoxelElement>(mut self, mask: &Volume<M>) -> Result<Self> {
        check_grid(&self.observers[0], mask, "mask")?;
        self.mask = Some(Mask::from_volume(mask));
        Ok(self)
    }

    /// Number of observers
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    /// Observer identifiers in input order
    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn observer(&self, i: usize) -> Option<&Volume<T>> {
        self.observers.get(i)
    }

    pub fn observers(&self) -> &[Volume<T>] {
        &self.observers
    }

    pub fn mask(&self) -> Option<&Mask> {
        self.mask.as_ref()
    }

    pub fn shape(&self) -> &[usize] {
        self.observers[0].shape()
    }

    pub fn geometry(&self) -> &Geometry {
        self.observers[0].geometry()
    }

    /// Number of pixels per volume
    pub fn pixel_count(&self) -> usize {
        self.observers[0].len()
    }

    /// The first observer, whose labels fill pixels without an estimate
    pub(crate) fn reference(&self) -> &Volume<T> {
        &self.observers[0]
    }

    /// Convert every observation to a class index and lay out the masked
    /// pixels for estimation.
    pub(crate) fn label_table(
        &self,
        number_of_classes: Option<usize>,
        filter: &MaskFilter,
    ) -> Result<LabelTable> {
        let mut classes_per_observer: Vec<Vec<u32>> = Vec::with_capacity(self.len());
        let mut max_label = 0usize;

        for (name, volume) in self.names.iter().zip(&self.observers) {
            let mut labels = Vec::with_capacity(volume.len());
            for &v in volume.values() {
                let label = v
                    .to_label()
                    .filter(|&l| l < MAX_CLASSES)
                    .ok_or_else(|| Error::LabelOutOfRange {
                        what: name.clone(),
                        label: v.to_f64().unwrap_or(f64::NAN),
                        classes: number_of_classes.unwrap_or(MAX_CLASSES),
                    })?;
                if let Some(k) = number_of_classes {
                    if label >= k {
                        return Err(Error::LabelOutOfRange {
                            what: name.clone(),
                            label: label as f64,
                            classes: k,
                        });
                    }
                }
                max_label = max_label.max(label);
                labels.push(label as u32);
            }
            classes_per_observer.push(labels);
        }

        let classes = number_of_classes.unwrap_or(max_label + 1);
        if classes < 2 {
            return Err(Error::TooFewClasses(classes));
        }
        if classes > MAX_CLASSES {
            return Err(Error::invalid_parameter(
                "number_of_classes",
                classes,
                format!("at most {} classes are supported", MAX_CLASSES),
            ));
        }

        let observed = Array2::from_shape_fn((filter.len(), self.len()), |(j, i)| {
            classes_per_observer[i][filter.pixel(j)]
        });

        Ok(LabelTable {
            observed,
            reference: classes_per_observer.swap_remove(0),
            classes,
            max_label,
        })
    }
}

fn check_grid<T: VoxelElement, U: VoxelElement>(
    reference: &Volume<T>,
    other: &Volume<U>,
    what: &str,
) -> Result<()> {
    if reference.shape() != other.shape() {
        return Err(Error::ShapeMismatch {
            what: what.to_string(),
            expected: reference.shape().to_vec(),
            actual: other.shape().to_vec(),
        });
    }
    if !reference.geometry().matches(other.geometry()) {
        return Err(Error::GeometryMismatch(what.to_string()));
    }
    Ok(())
}

/// Class indices of every observation at the masked pixels.
#[derive(Debug, Clone)]
pub(crate) struct LabelTable {
    /// `(masked pixel, observer)` class indices
    observed: Array2<u32>,
    /// First observer's class index at every pixel of the full grid
    reference: Vec<u32>,
    classes: usize,
    max_label: usize,
}

impl LabelTable {
    pub(crate) fn classes(&self) -> usize {
        self.classes
    }

    pub(crate) fn observers(&self) -> usize {
        self.observed.ncols()
    }

    /// Number of masked pixels
    pub(crate) fn pixels(&self) -> usize {
        self.observed.nrows()
    }

    /// Largest label value seen in any observer, anywhere in the grid
    pub(crate) fn max_label(&self) -> usize {
        self.max_label
    }

    /// Observations at masked pixel `j`, one per observer
    pub(crate) fn row(&self, j: usize) -> ArrayView1<'_, u32> {
        self.observed.row(j)
    }

    pub(crate) fn observed(&self) -> &Array2<u32> {
        &self.observed
    }

    /// First observer's class at flat pixel `p`
    pub(crate) fn reference_class(&self, p: usize) -> usize {
        self.reference[p] as usize
    }
}
