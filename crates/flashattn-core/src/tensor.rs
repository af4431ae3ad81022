use std::fmt;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::dtype::DType;
use crate::shape::Shape;
use crate::storage::{Elements, Storage};

/// A dense, contiguous, row-major tensor.
///
/// Tensors are the inputs of the attention kernels. Storage is shared, so
/// cloning a tensor is cheap and never copies data.
///
/// # Examples
///
/// ```
/// use flashattn_core::{DType, Tensor};
///
/// let t = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 2, 2]);
/// assert_eq!(t.shape().dims(), &[1, 1, 2, 2]);
///
/// let h = t.to_dtype(DType::F16);
/// assert_eq!(h.dtype(), DType::F16);
/// assert_eq!(h.to_f32_vec(), vec![1.0, 2.0, 3.0, 4.0]);
/// ```
#[derive(Clone)]
pub struct Tensor {
    storage: Storage,
    shape: Shape,
}

impl Tensor {
    // =========================================================================
    // Constructors
    // =========================================================================

    /// Create a tensor from f32 data with the given shape.
    ///
    /// # Panics
    /// Panics if `data.len()` does not match the shape.
    pub fn from_f32(data: &[f32], shape: &[usize]) -> Self {
        let s = Shape::new(shape);
        assert_eq!(
            s.numel(),
            data.len(),
            "Shape {:?} requires {} elements, got {}",
            shape,
            s.numel(),
            data.len()
        );
        Self {
            storage: Storage::from_f32(data),
            shape: s,
        }
    }

    /// Create a tensor of zeros with the given shape and dtype.
    pub fn zeros(shape: &[usize], dtype: DType) -> Self {
        let s = Shape::new(shape);
        Self {
            storage: Storage::zeros(dtype, s.numel()),
            shape: s,
        }
    }

    /// Standard normal N(0,1) values from a seeded generator.
    pub fn randn_seeded(shape: &[usize], seed: u64) -> Self {
        let s = Shape::new(shape);
        let mut rng = StdRng::seed_from_u64(seed);
        // Box-Muller transform for normal distribution
        let data: Vec<f32> = (0..s.numel())
            .map(|_| {
                let u1: f32 = rng.gen_range(1e-7f32..1.0f32);
                let u2: f32 = rng.gen_range(0.0f32..std::f32::consts::TAU);
                (-2.0 * u1.ln()).sqrt() * u2.cos()
            })
            .collect();
        Self::from_f32(&data, shape)
    }

    /// Uniform values in `[low, high)` from a seeded generator.
    pub fn rand_uniform_seeded(shape: &[usize], low: f32, high: f32, seed: u64) -> Self {
        let s = Shape::new(shape);
        let mut rng = StdRng::seed_from_u64(seed);
        let data: Vec<f32> = (0..s.numel()).map(|_| rng.gen_range(low..high)).collect();
        Self::from_f32(&data, shape)
    }

    // =========================================================================
    // Properties
    // =========================================================================

    /// Shape of the tensor.
    pub fn shape(&self) -> &Shape {
        &self.shape
    }

    /// Storage dtype.
    pub fn dtype(&self) -> DType {
        self.storage.dtype()
    }

    /// Total number of elements.
    pub fn numel(&self) -> usize {
        self.shape.numel()
    }

    /// Typed view of the elements.
    pub fn elements(&self) -> Elements<'_> {
        self.storage.elements()
    }

    /// Borrow the data as f32. Returns None for reduced-precision storage.
    pub fn as_f32_slice(&self) -> Option<&[f32]> {
        self.storage.as_f32_slice()
    }

    // =========================================================================
    // Conversion
    // =========================================================================

    /// Copy the data out, widened to f32.
    pub fn to_f32_vec(&self) -> Vec<f32> {
        self.elements().to_f32_vec()
    }

    /// Re-store the tensor in another dtype. Returns a cheap clone when the
    /// dtype already matches.
    pub fn to_dtype(&self, dtype: DType) -> Self {
        if dtype == self.dtype() {
            return self.clone();
        }
        let values = self.to_f32_vec();
        Self {
            storage: Storage::from_f32_cast(&values, dtype),
            shape: self.shape.clone(),
        }
    }

    /// Copy with one element replaced; used to perturb inputs in tests.
    pub fn with_value(&self, index: usize, value: f32) -> Self {
        let mut values = self.to_f32_vec();
        values[index] = value;
        Self {
            storage: Storage::from_f32_cast(&values, self.dtype()),
            shape: self.shape.clone(),
        }
    }
}

impl fmt::Debug for Tensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Tensor(shape={}, dtype={})", self.shape, self.dtype())
    }
}
