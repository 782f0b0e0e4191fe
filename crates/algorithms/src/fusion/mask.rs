//! Admissible pixel subset for estimation

use segfuse_core::{Error, Result, Volume, VoxelElement};

/// Per-pixel inclusion flags; any non-zero mask voxel is inside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mask {
    inside: Vec<bool>,
}

impl Mask {
    /// Build a mask from a volume of any voxel type
    pub fn from_volume<M: VoxelElement>(volume: &Volume<M>) -> Self {
        Self {
            inside: volume
                .values()
                .iter()
                .map(|v| v.to_f64().map_or(false, |x| x != 0.0))
                .collect(),
        }
    }

    /// Number of pixels covered (inside or outside)
    pub fn len(&self) -> usize {
        self.inside.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inside.is_empty()
    }

    /// Number of pixels inside the mask
    pub fn count(&self) -> usize {
        self.inside.iter().filter(|&&b| b).count()
    }

    /// Whether flat pixel `p` is inside
    pub fn contains(&self, p: usize) -> bool {
        self.inside.get(p).copied().unwrap_or(false)
    }
}

/// Flat indices of the pixels that take part in estimation.
///
/// Estimation code addresses masked pixels densely as `j in 0..len()`;
/// `pixel(j)` maps back to the flat index in the full grid. Indices are
/// ascending.
#[derive(Debug, Clone)]
pub(crate) struct MaskFilter {
    indices: Vec<usize>,
    total: usize,
}

impl MaskFilter {
    pub(crate) fn new(mask: Option<&Mask>, total: usize) -> Result<Self> {
        let indices: Vec<usize> = match mask {
            Some(mask) => (0..total).filter(|&p| mask.contains(p)).collect(),
            None => (0..total).collect(),
        };
        if indices.is_empty() {
            return Err(Error::Algorithm(
                "no pixel is available for estimation (empty input or mask)".into(),
            ));
        }
        Ok(Self { indices, total })
    }

    /// Number of masked pixels
    pub(crate) fn len(&self) -> usize {
        self.indices.len()
    }

    /// Number of pixels in the full grid
    pub(crate) fn total(&self) -> usize {
        self.total
    }

    pub(crate) fn indices(&self) -> &[usize] {
        &self.indices
    }

    pub(crate) fn pixel(&self, j: usize) -> usize {
        self.indices[j]
    }
}
