use smallvec::SmallVec;
use std::fmt;

/// Tensor shape with stack-allocated storage for ≤4 dimensions.
///
/// Attention tensors are 4D (`[B, H, N, D]`) and the log-sum-exp output is
/// 3D (`[B, H, N]`), so the inline capacity covers every shape we build.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: SmallVec<[usize; 4]>,
}

impl Shape {
    /// Create a new shape from dimensions.
    pub fn new(dims: &[usize]) -> Self {
        Self {
            dims: SmallVec::from_slice(dims),
        }
    }

    /// Number of dimensions (rank).
    pub fn ndim(&self) -> usize {
        self.dims.len()
    }

    /// Total number of elements. A rank-0 shape holds one element.
    pub fn numel(&self) -> usize {
        self.dims.iter().product()
    }

    /// Get dimension sizes as a slice.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Get size of a specific dimension.
    pub fn dim(&self, axis: usize) -> Option<usize> {
        self.dims.get(axis).copied()
    }

    /// Whether any dimension is zero.
    pub fn is_empty(&self) -> bool {
        self.dims.iter().any(|&d| d == 0)
    }

    /// Compute default strides for a contiguous row-major layout.
    pub fn contiguous_strides(&self) -> SmallVec<[usize; 4]> {
        let ndim = self.dims.len();
        if ndim == 0 {
            return SmallVec::new();
        }
        let mut strides = SmallVec::from_elem(0usize, ndim);
        strides[ndim - 1] = 1;
        for i in (0..ndim - 1).rev() {
            strides[i] = strides[i + 1] * self.dims[i + 1];
        }
        strides
    }
}

impl fmt::Debug for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shape({:?})", self.dims.as_slice())
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, d) in self.dims.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{d}")?;
        }
        write!(f, "]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_shape() {
        let s = Shape::new(&[2, 3, 4, 5]);
        assert_eq!(s.ndim(), 4);
        assert_eq!(s.numel(), 120);
        assert_eq!(s.dim(3), Some(5));
        assert_eq!(s.dim(4), None);
        assert!(!s.is_empty());
        assert!(Shape::new(&[2, 0, 4]).is_empty());
    }

    #[test]
    fn test_contiguous_strides() {
        let s = Shape::new(&[2, 3, 4, 5]);
        assert_eq!(s.contiguous_strides().as_slice(), &[60, 20, 5, 1]);
    }

    #[test]
    fn test_display() {
        let s = Shape::new(&[1, 2, 128, 64]);
        assert_eq!(s.to_string(), "[1, 2, 128, 64]");
        assert_eq!(format!("{:?}", s), "Shape([1, 2, 128, 64])");
    }
}
