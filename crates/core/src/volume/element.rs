//! Voxel element trait for generic label and probability values

use num_traits::{NumCast, Zero};
use std::fmt::Debug;

/// Trait for types that can be stored in a volume voxel.
///
/// Label volumes are usually unsigned integers, probability volumes are
/// floats. Both go through the same trait so the fusion code can be written
/// once for every pixel type.
pub trait VoxelElement:
    Copy + Clone + Debug + PartialOrd + PartialEq + NumCast + Zero + Send + Sync + 'static
{
    /// Minimum value representable by this type
    fn min_value() -> Self;

    /// Maximum value representable by this type
    fn max_value() -> Self;

    /// Whether this type is a floating point type
    fn is_float() -> bool;

    /// Convert self to f64
    fn to_f64(self) -> Option<f64> {
        NumCast::from(self)
    }

    /// Interpret the value as a class index.
    ///
    /// Returns `None` for negative, non-integral or non-finite values.
    fn to_label(self) -> Option<usize> {
        let v = self.to_f64()?;
        if !v.is_finite() || v < 0.0 || v.fract() != 0.0 {
            return None;
        }
        NumCast::from(v)
    }

    /// Build a value from a class index, `None` if it does not fit
    fn from_label(label: usize) -> Option<Self> {
        NumCast::from(label)
    }
}

macro_rules! impl_voxel_element_int {
    ($t:ty) => {
        impl VoxelElement for $t {
            fn min_value() -> Self {
                <$t>::MIN
            }

            fn max_value() -> Self {
                <$t>::MAX
            }

            fn is_float() -> bool {
                false
            }

            fn to_label(self) -> Option<usize> {
                usize::try_from(self).ok()
            }
        }
    };
}

macro_rules! impl_voxel_element_float {
    ($t:ty) => {
        impl VoxelElement for $t {
            fn min_value() -> Self {
                <$t>::MIN
            }

            fn max_value() -> Self {
                <$t>::MAX
            }

            fn is_float() -> bool {
                true
            }
        }
    };
}

impl_voxel_element_int!(i8);
impl_voxel_element_int!(i16);
impl_voxel_element_int!(i32);
impl_voxel_element_int!(i64);
impl_voxel_element_int!(u8);
impl_voxel_element_int!(u16);
impl_voxel_element_int!(u32);
impl_voxel_element_int!(u64);
impl_voxel_element_float!(f32);
impl_voxel_element_float!(f64);
