//! Backend vs. reference comparison.

use std::fmt;

use serde::{Deserialize, Serialize};

use flashattn_core::{AttnShape, DType, FlashError, Result, Tensor};

use crate::config::AttentionConfig;
use crate::forward::forward_alloc;
use crate::reference::reference_forward_with_lse;

/// Largest elementwise absolute difference between two equal-length slices.
pub fn max_abs_diff(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(FlashError::ShapeMismatch {
            expected: vec![a.len()],
            got: vec![b.len()],
        });
    }
    // f32::max would drop NaN
    Ok(a.iter()
        .zip(b)
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, |m, d| if d > m || d.is_nan() { d } else { m }))
}

/// Pass threshold for a comparison against the f32 reference.
pub struct Tolerance;

impl Tolerance {
    pub const F32: f32 = 1e-4;
    pub const REDUCED: f32 = 5e-3;

    pub fn for_dtype(dtype: DType) -> f32 {
        if dtype.is_reduced_precision() {
            Self::REDUCED
        } else {
            Self::F32
        }
    }
}

/// Outcome of one backend-vs-reference comparison.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParityReport {
    /// Max |O_backend − O_reference|.
    pub max_abs_diff: f32,
    /// Max |L_backend − L_reference|, reported but not judged.
    pub lse_max_abs_diff: f32,
    pub tolerance: f32,
    pub passed: bool,
}

impl ParityReport {
    pub fn new(max_abs_diff: f32, lse_max_abs_diff: f32, tolerance: f32) -> Self {
        Self {
            max_abs_diff,
            lse_max_abs_diff,
            tolerance,
            // NaN never passes
            passed: max_abs_diff <= tolerance,
        }
    }
}

impl fmt::Display for ParityReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: max_abs_diff={:.3e} (tol {:.0e}), lse max_abs_diff={:.3e}",
            if self.passed { "PASS" } else { "FAIL" },
            self.max_abs_diff,
            self.tolerance,
            self.lse_max_abs_diff,
        )
    }
}

/// Seeded Q, K, V in f32, uniform in `[-1, 1)`.
pub fn random_qkv(shape: AttnShape, seed: u64) -> (Tensor, Tensor, Tensor) {
    let dims = shape.qkv_shape();
    let make = |offset: u64| {
        Tensor::rand_uniform_seeded(dims.dims(), -1.0, 1.0, seed.wrapping_add(offset))
    };
    (make(0), make(1), make(2))
}

/// Compare a backend run on `(q, k, v)` cast to `cfg.dtype` against the
/// reference on the f32 originals.
pub fn compare(q: &Tensor, k: &Tensor, v: &Tensor, cfg: &AttentionConfig) -> Result<ParityReport> {
    let expected = reference_forward_with_lse(q, k, v, cfg.causal)?;
    let got = forward_alloc(
        &q.to_dtype(cfg.dtype),
        &k.to_dtype(cfg.dtype),
        &v.to_dtype(cfg.dtype),
        cfg,
    )?;
    Ok(ParityReport::new(
        max_abs_diff(&got.o, &expected.o)?,
        max_abs_diff(&got.lse, &expected.lse)?,
        Tolerance::for_dtype(cfg.dtype),
    ))
}

/// Generate seeded inputs of `shape` and compare the configured backend
/// with the reference.
pub fn check_parity(shape: AttnShape, cfg: &AttentionConfig, seed: u64) -> Result<ParityReport> {
    shape.validate()?;
    let (q, k, v) = random_qkv(shape, seed);
    let report = compare(&q, &k, &v, cfg)?;
    tracing::debug!("parity {:?} {} {}: {}", shape, cfg.backend, cfg.dtype, report);
    Ok(report)
}
