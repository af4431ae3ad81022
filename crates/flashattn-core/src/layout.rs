//! Row-major attention layout.
//!
//! Q, K, V and O share the 4D layout `[batch, heads, seq_len, head_dim]`;
//! the log-sum-exp output uses the 3D layout `[batch, heads, seq_len]`.
//! Every backend addresses memory through these helpers.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::FlashError;
use crate::shape::Shape;
use crate::Result;

/// Dimensions of one attention call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AttnShape {
    pub batch: usize,
    pub heads: usize,
    pub seq_len: usize,
    pub head_dim: usize,
}

impl AttnShape {
    pub fn new(batch: usize, heads: usize, seq_len: usize, head_dim: usize) -> Self {
        Self {
            batch,
            heads,
            seq_len,
            head_dim,
        }
    }

    /// Read `[B, H, N, D]` out of a 4D shape.
    pub fn from_shape(shape: &Shape) -> Result<Self> {
        Self::from_dims(shape.dims())
    }

    /// Read `[B, H, N, D]` out of a dimension list.
    pub fn from_dims(dims: &[usize]) -> Result<Self> {
        match *dims {
            [batch, heads, seq_len, head_dim] => {
                let s = Self::new(batch, heads, seq_len, head_dim);
                s.validate()?;
                Ok(s)
            }
            _ => Err(FlashError::ShapeMismatch {
                expected: vec![0, 0, 0, 0],
                got: dims.to_vec(),
            }),
        }
    }

    /// Reject zero-sized dimensions.
    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("batch", self.batch),
            ("heads", self.heads),
            ("seq_len", self.seq_len),
            ("head_dim", self.head_dim),
        ];
        for (param, value) in checks {
            if value == 0 {
                return Err(FlashError::invalid(param, "must be > 0"));
            }
        }
        Ok(())
    }

    /// 4D shape shared by Q, K, V and O.
    pub fn qkv_shape(&self) -> Shape {
        Shape::new(&[self.batch, self.heads, self.seq_len, self.head_dim])
    }

    /// 3D shape of the log-sum-exp output.
    pub fn lse_shape(&self) -> Shape {
        Shape::new(&[self.batch, self.heads, self.seq_len])
    }

    /// Element count of Q, K, V and O.
    pub fn qkv_len(&self) -> usize {
        self.batch * self.heads * self.seq_len * self.head_dim
    }

    /// Element count of L.
    pub fn lse_len(&self) -> usize {
        self.batch * self.heads * self.seq_len
    }

    /// Number of independent (batch, head) pairs.
    pub fn head_count(&self) -> usize {
        self.batch * self.heads
    }

    /// Elements in one (batch, head) slice of Q, K, V or O.
    pub fn head_len(&self) -> usize {
        self.seq_len * self.head_dim
    }

    /// Softmax temperature `1/√D`.
    pub fn scale(&self) -> f32 {
        (self.head_dim as f32).sqrt().recip()
    }

    /// Flat index of element `[b, h, n, d]`.
    #[inline]
    pub fn idx4(&self, b: usize, h: usize, n: usize, d: usize) -> usize {
        ((b * self.heads + h) * self.seq_len + n) * self.head_dim + d
    }

    /// Flat index of log-sum-exp entry `[b, h, n]`.
    #[inline]
    pub fn idx_lse(&self, b: usize, h: usize, n: usize) -> usize {
        (b * self.heads + h) * self.seq_len + n
    }

    /// Offset of the first element of (batch, head) pair `bh` in Q, K, V or O.
    #[inline]
    pub fn head_offset(&self, bh: usize) -> usize {
        bh * self.head_len()
    }

    /// Element range of row `n` within the flattened (batch, head) pair `bh`.
    #[inline]
    pub fn row_range(&self, bh: usize, n: usize) -> Range<usize> {
        let start = self.head_offset(bh) + n * self.head_dim;
        start..start + self.head_dim
    }

    /// Check that a caller-provided buffer has exactly `expected` elements.
    pub fn check_buffer(name: &'static str, got: usize, expected: usize) -> Result<()> {
        if got != expected {
            return Err(FlashError::BufferSize {
                name,
                expected,
                got,
            });
        }
        Ok(())
    }
}
