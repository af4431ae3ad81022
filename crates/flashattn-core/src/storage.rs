use std::ops::Range;
use std::sync::Arc;

use half::{bf16, f16};

use crate::DType;

/// Backing buffer for tensor data, one variant per storage dtype.
#[derive(Debug, Clone)]
enum StorageData {
    F32(Vec<f32>),
    F16(Vec<f16>),
    BF16(Vec<bf16>),
}

/// Shared, reference-counted tensor storage.
///
/// Clones share the same buffer; inputs are read-only once built, so the
/// same storage can be read concurrently by every worker.
#[derive(Debug, Clone)]
pub struct Storage {
    data: Arc<StorageData>,
}

/// Borrowed, typed view of storage contents.
///
/// Kernels read inputs through this view so that reduced-precision
/// elements are widened to `f32` at the point of load.
#[derive(Debug, Clone, Copy)]
pub enum Elements<'a> {
    F32(&'a [f32]),
    F16(&'a [f16]),
    BF16(&'a [bf16]),
}

impl Storage {
    /// Allocate zeroed storage for `numel` elements of the given dtype.
    pub fn zeros(dtype: DType, numel: usize) -> Self {
        let data = match dtype {
            DType::F32 => StorageData::F32(vec![0.0; numel]),
            DType::F16 => StorageData::F16(vec![f16::ZERO; numel]),
            DType::BF16 => StorageData::BF16(vec![bf16::ZERO; numel]),
        };
        Self {
            data: Arc::new(data),
        }
    }

    /// Create F32 storage from a slice of values.
    pub fn from_f32(data: &[f32]) -> Self {
        Self {
            data: Arc::new(StorageData::F32(data.to_vec())),
        }
    }

    /// Create storage in `dtype`, rounding each value to the nearest
    /// representable element.
    pub fn from_f32_cast(data: &[f32], dtype: DType) -> Self {
        let data = match dtype {
            DType::F32 => StorageData::F32(data.to_vec()),
            DType::F16 => StorageData::F16(data.iter().map(|&v| f16::from_f32(v)).collect()),
            DType::BF16 => StorageData::BF16(data.iter().map(|&v| bf16::from_f32(v)).collect()),
        };
        Self {
            data: Arc::new(data),
        }
    }

    /// Get the dtype of this storage.
    pub fn dtype(&self) -> DType {
        match self.data.as_ref() {
            StorageData::F32(_) => DType::F32,
            StorageData::F16(_) => DType::F16,
            StorageData::BF16(_) => DType::BF16,
        }
    }

    /// Number of logical elements.
    pub fn numel(&self) -> usize {
        self.elements().len()
    }

    /// Typed view of the contents.
    pub fn elements(&self) -> Elements<'_> {
        match self.data.as_ref() {
            StorageData::F32(v) => Elements::F32(v),
            StorageData::F16(v) => Elements::F16(v),
            StorageData::BF16(v) => Elements::BF16(v),
        }
    }

    /// Interpret storage as a slice of f32 values.
    /// Returns None if dtype is not F32.
    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        match self.data.as_ref() {
            StorageData::F32(v) => Some(v),
            _ => None,
        }
    }
}

impl<'a> Elements<'a> {
    pub fn len(&self) -> usize {
        match self {
            Elements::F32(v) => v.len(),
            Elements::F16(v) => v.len(),
            Elements::BF16(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn dtype(&self) -> DType {
        match self {
            Elements::F32(_) => DType::F32,
            Elements::F16(_) => DType::F16,
            Elements::BF16(_) => DType::BF16,
        }
    }

    /// Load element `i` widened to `f32`.
    #[inline]
    pub fn get(&self, i: usize) -> f32 {
        match self {
            Elements::F32(v) => v[i],
            Elements::F16(v) => v[i].to_f32(),
            Elements::BF16(v) => v[i].to_f32(),
        }
    }

    /// Widen the elements in `range` into `dst`.
    ///
    /// # Panics
    /// Panics if `dst.len() != range.len()`.
    pub fn load_into(&self, range: Range<usize>, dst: &mut [f32]) {
        assert_eq!(dst.len(), range.len(), "load_into: destination length mismatch");
        match self {
            Elements::F32(v) => dst.copy_from_slice(&v[range]),
            Elements::F16(v) => {
                for (d, s) in dst.iter_mut().zip(&v[range]) {
                    *d = s.to_f32();
                }
            }
            Elements::BF16(v) => {
                for (d, s) in dst.iter_mut().zip(&v[range]) {
                    *d = s.to_f32();
                }
            }
        }
    }

    /// Dot product of `self[a..a+len]` and `other[b..b+len]` in `f32`.
    #[inline]
    pub fn dot(&self, a: usize, other: &Elements<'_>, b: usize, len: usize) -> f32 {
        if let (Elements::F32(x), Elements::F32(y)) = (self, other) {
            return x[a..a + len]
                .iter()
                .zip(&y[b..b + len])
                .map(|(p, q)| p * q)
                .sum();
        }
        (0..len).map(|i| self.get(a + i) * other.get(b + i)).sum()
    }

    /// Copy every element out as `f32`.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        let mut out = vec![0.0; self.len()];
        self.load_into(0..self.len(), &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeros() {
        let s = Storage::zeros(DType::F32, 10);
        assert_eq!(s.dtype(), DType::F32);
        assert_eq!(s.numel(), 10);
        assert!(s.as_f32_slice().unwrap().iter().all(|&x| x == 0.0));

        let s = Storage::zeros(DType::BF16, 10);
        assert_eq!(s.dtype(), DType::BF16);
        assert!(s.elements().to_f32_vec().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_from_f32() {
        let s = Storage::from_f32(&[1.0, 2.0, 3.0]);
        assert_eq!(s.numel(), 3);
        assert_eq!(s.as_f32_slice().unwrap(), &[1.0, 2.0, 3.0]);
    }

    #[test]
    fn test_cast_widens_on_load() {
        let s = Storage::from_f32_cast(&[1.0, 0.5, -2.25], DType::F16);
        assert_eq!(s.dtype(), DType::F16);
        assert!(s.as_f32_slice().is_none());
        let e = s.elements();
        assert_eq!(e.get(1), 0.5);
        assert_eq!(e.to_f32_vec(), vec![1.0, 0.5, -2.25]);
    }

    #[test]
    fn test_bf16_rounding_is_bounded() {
        let data = [0.1f32, 0.3, 0.7, -1.9];
        let s = Storage::from_f32_cast(&data, DType::BF16);
        for (i, &x) in data.iter().enumerate() {
            assert!((s.elements().get(i) - x).abs() <= x.abs() * 1e-2);
        }
    }

    #[test]
    fn test_dot_mixed_dtypes() {
        let a = Storage::from_f32(&[1.0, 2.0, 3.0, 4.0]);
        let b = Storage::from_f32_cast(&[0.5, 0.5, 0.5, 0.5], DType::F16);
        let d = a.elements().dot(1, &b.elements(), 0, 3);
        assert!((d - 4.5).abs() < 1e-6);
    }

    #[test]
    fn test_shared_clone() {
        let s1 = Storage::from_f32(&[1.0, 2.0]);
        let s2 = s1.clone();
        assert_eq!(
            s1.as_f32_slice().unwrap().as_ptr(),
            s2.as_f32_slice().unwrap().as_ptr()
        );
        assert_eq!(s2.numel(), 2);
    }
}
