//! Voxel geometry (spacing and origin) for volumes

use serde::{Deserialize, Serialize};

/// Physical placement of a volume's voxel grid.
///
/// Index `i` along axis `a` maps to `origin[a] + i * spacing[a]`. Axes follow
/// the array order of the volume, so for a 3-D volume stored as
/// `(slice, row, col)` the first entry is the slice spacing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Voxel size along each axis
    pub spacing: Vec<f64>,
    /// Physical coordinate of voxel index 0 along each axis
    pub origin: Vec<f64>,
}

impl Geometry {
    /// Unit spacing and zero origin for the given dimensionality
    pub fn identity(ndim: usize) -> Self {
        Self {
            spacing: vec![1.0; ndim],
            origin: vec![0.0; ndim],
        }
    }

    /// Create a geometry from explicit spacing and origin
    pub fn new(spacing: Vec<f64>, origin: Vec<f64>) -> Self {
        Self { spacing, origin }
    }

    /// Number of axes described
    pub fn ndim(&self) -> usize {
        self.spacing.len()
    }

    /// Physical coordinate of a voxel index
    pub fn index_to_physical(&self, index: &[usize]) -> Vec<f64> {
        index
            .iter()
            .zip(self.spacing.iter().zip(&self.origin))
            .map(|(&i, (&s, &o))| o + i as f64 * s)
            .collect()
    }

    /// Whether two geometries describe the same grid.
    ///
    /// Spacing is compared relatively, origin absolutely scaled by spacing,
    /// both at `1e-6`.
    pub fn matches(&self, other: &Geometry) -> bool {
        if self.spacing.len() != other.spacing.len() || self.origin.len() != other.origin.len() {
            return false;
        }
        let tol = 1e-6;
        let spacing_ok = self
            .spacing
            .iter()
            .zip(&other.spacing)
            .all(|(&a, &b)| (a - b).abs() <= tol * a.abs().max(b.abs()).max(1.0));
        let origin_ok = self
            .origin
            .iter()
            .zip(&other.origin)
            .zip(&self.spacing)
            .all(|((&a, &b), &s)| (a - b).abs() <= tol * s.abs().max(1.0));
        spacing_ok && origin_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_index_to_physical() {
        let g = Geometry::new(vec![2.0, 0.5], vec![10.0, -1.0]);
        let p = g.index_to_physical(&[3, 4]);
        assert_relative_eq!(p[0], 16.0, epsilon = 1e-12);
        assert_relative_eq!(p[1], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn test_matches() {
        let a = Geometry::new(vec![1.0, 1.0], vec![0.0, 0.0]);
        let b = Geometry::new(vec![1.0 + 1e-9, 1.0], vec![1e-9, 0.0]);
        let c = Geometry::new(vec![2.0, 1.0], vec![0.0, 0.0]);
        assert!(a.matches(&b));
        assert!(!a.matches(&c));
        assert!(!a.matches(&Geometry::identity(3)));
    }
}
