//! Validated views of Q, K and V.

use flashattn_core::{AttnShape, Elements, FlashError, Result, Tensor};

/// Borrowed Q, K, V sharing one `[B, H, N, D]` shape.
#[derive(Debug, Clone, Copy)]
pub struct AttentionInputs<'a> {
    pub q: Elements<'a>,
    pub k: Elements<'a>,
    pub v: Elements<'a>,
    pub shape: AttnShape,
}

impl<'a> AttentionInputs<'a> {
    /// Check that Q, K and V are 4D, non-empty and share one shape.
    pub fn new(q: &'a Tensor, k: &'a Tensor, v: &'a Tensor) -> Result<Self> {
        let shape = AttnShape::from_shape(q.shape())?;
        for t in [k, v] {
            if t.shape() != q.shape() {
                return Err(FlashError::ShapeMismatch {
                    expected: q.shape().dims().to_vec(),
                    got: t.shape().dims().to_vec(),
                });
            }
        }
        Ok(Self {
            q: q.elements(),
            k: k.elements(),
            v: v.elements(),
            shape,
        })
    }

    /// Check caller-provided output buffers against the input shape.
    pub fn check_outputs(&self, o: &[f32], lse: &[f32]) -> Result<()> {
        AttnShape::check_buffer("o", o.len(), self.shape.qkv_len())?;
        AttnShape::check_buffer("lse", lse.len(), self.shape.lse_len())
    }
}

/// Allocate a defaulted buffer, reporting allocation failure as an error.
pub(crate) fn try_zeroed<T: Clone + Default>(what: &str, len: usize) -> Result<Vec<T>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len).map_err(|e| {
        FlashError::ResourceExhausted(format!("{what}: {len} elements: {e}"))
    })?;
    buf.resize(len, T::default());
    Ok(buf)
}
