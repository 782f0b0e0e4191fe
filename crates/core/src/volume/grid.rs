//! Main Volume type

use crate::error::{Error, Result};
use crate::volume::{Geometry, VoxelElement};
use ndarray::{Array2, ArrayD, ArrayViewD, IxDyn};

/// An N-dimensional voxel grid with physical geometry.
///
/// `Volume<T>` stores values of type `T` in row-major (C) order. Every
/// constructor normalizes the array to standard layout, so the flat index
/// of a voxel is stable and [`Volume::values`] always covers the whole grid.
///
/// # Example
///
/// ```ignore
/// use segfuse_core::Volume;
///
/// let mut labels: Volume<u8> = Volume::new(&[64, 64]);
/// labels.set(&[10, 20], 3)?;
/// assert_eq!(labels.get(&[10, 20])?, 3);
/// ```
#[derive(Debug, Clone)]
pub struct Volume<T: VoxelElement> {
    /// Voxel data in standard layout
    data: ArrayD<T>,
    /// Spacing and origin per axis
    geometry: Geometry,
}

impl<T: VoxelElement> Volume<T> {
    /// Create a new volume filled with zeros
    pub fn new(shape: &[usize]) -> Self {
        Self {
            data: ArrayD::zeros(IxDyn(shape)),
            geometry: Geometry::identity(shape.len()),
        }
    }

    /// Create a new volume filled with a specific value
    pub fn filled(shape: &[usize], value: T) -> Self {
        Self {
            data: ArrayD::from_elem(IxDyn(shape), value),
            geometry: Geometry::identity(shape.len()),
        }
    }

    /// Create a volume from row-major data
    pub fn from_vec(data: Vec<T>, shape: &[usize]) -> Result<Self> {
        if data.len() != shape.iter().product::<usize>() {
            return Err(Error::InvalidDimensions {
                shape: shape.to_vec(),
                len: data.len(),
            });
        }

        let array =
            ArrayD::from_shape_vec(IxDyn(shape), data).map_err(|e| Error::Other(e.to_string()))?;

        Ok(Self {
            geometry: Geometry::identity(shape.len()),
            data: array,
        })
    }

    /// Create a volume from an ndarray of any dimensionality
    pub fn from_array(data: ArrayD<T>) -> Self {
        let data = data.as_standard_layout().into_owned();
        Self {
            geometry: Geometry::identity(data.ndim()),
            data,
        }
    }

    /// Create a 2-D volume from a `(rows, cols)` array
    pub fn from_array2(data: Array2<T>) -> Self {
        Self::from_array(data.into_dyn())
    }

    /// Create a volume with the same shape and geometry but a different type
    pub fn with_same_meta<U: VoxelElement>(&self) -> Volume<U> {
        Volume {
            data: ArrayD::zeros(self.data.raw_dim()),
            geometry: self.geometry.clone(),
        }
    }

    // Dimensions

    /// Shape of the voxel grid
    pub fn shape(&self) -> &[usize] {
        self.data.shape()
    }

    /// Number of axes
    pub fn ndim(&self) -> usize {
        self.data.ndim()
    }

    /// Total number of voxels
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the volume is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    // Data access

    /// Get value at a multi-index
    pub fn get(&self, index: &[usize]) -> Result<T> {
        if index.len() != self.ndim() {
            return Err(self.out_of_bounds(index));
        }
        self.data
            .get(index)
            .copied()
            .ok_or_else(|| self.out_of_bounds(index))
    }

    /// Set value at a multi-index
    pub fn set(&mut self, index: &[usize], value: T) -> Result<()> {
        if index.len() != self.ndim() {
            return Err(self.out_of_bounds(index));
        }
        match self.data.get_mut(index) {
            Some(v) => {
                *v = value;
                Ok(())
            }
            None => Err(self.out_of_bounds(index)),
        }
    }

    fn out_of_bounds(&self, index: &[usize]) -> Error {
        Error::IndexOutOfBounds {
            index: index.to_vec(),
            shape: self.shape().to_vec(),
        }
    }

    /// All voxels in row-major order
    pub fn values(&self) -> &[T] {
        // Standard layout is established by every constructor.
        self.data.as_slice().unwrap_or_default()
    }

    /// All voxels in row-major order, mutable
    pub fn values_mut(&mut self) -> &mut [T] {
        self.data.as_slice_mut().unwrap_or_default()
    }

    /// Get a view of the underlying data
    pub fn view(&self) -> ArrayViewD<'_, T> {
        self.data.view()
    }

    /// Get a reference to the underlying array
    pub fn data(&self) -> &ArrayD<T> {
        &self.data
    }

    // Metadata

    /// Get the voxel geometry
    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Set the voxel geometry; it must describe as many axes as the volume has
    pub fn set_geometry(&mut self, geometry: Geometry) -> Result<()> {
        if geometry.spacing.len() != self.ndim() || geometry.origin.len() != self.ndim() {
            return Err(Error::invalid_parameter(
                "geometry",
                &geometry,
                format!("expected {} axes", self.ndim()),
            ));
        }
        self.geometry = geometry;
        Ok(())
    }

    /// Whether `other` lies on the same voxel grid (shape and geometry)
    pub fn same_grid<U: VoxelElement>(&self, other: &Volume<U>) -> bool {
        self.shape() == other.shape() && self.geometry.matches(other.geometry())
    }

    // Statistics

    /// Calculate basic statistics over all finite voxels
    pub fn statistics(&self) -> VolumeStatistics<T> {
        let mut min: Option<T> = None;
        let mut max: Option<T> = None;
        let mut sum: f64 = 0.0;
        let mut count: usize = 0;

        for &value in self.data.iter() {
            let Some(v) = value.to_f64().filter(|v| v.is_finite()) else {
                continue;
            };

            if min.map_or(true, |m| value < m) {
                min = Some(value);
            }
            if max.map_or(true, |m| value > m) {
                max = Some(value);
            }
            sum += v;
            count += 1;
        }

        let mean = if count > 0 {
            Some(sum / count as f64)
        } else {
            None
        };

        VolumeStatistics {
            min,
            max,
            mean,
            valid_count: count,
            invalid_count: self.len() - count,
        }
    }
}

/// Basic statistics for a volume
#[derive(Debug, Clone)]
pub struct VolumeStatistics<T> {
    pub min: Option<T>,
    pub max: Option<T>,
    pub mean: Option<f64>,
    pub valid_count: usize,
    pub invalid_count: usize,
}
