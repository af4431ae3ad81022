//! Tile geometry and the blocked driver for one (batch, head) pair.
//!
//! The sequence axis is cut into query tiles of `Br` rows and key/value
//! tiles of `Bc` rows; the last tile on each axis may be short. Every query
//! tile streams over its key tiles in increasing order, merging each block
//! into the per-row softmax state, and is finalized into O and L once the
//! last key tile has been merged.

use std::ops::Range;

use flashattn_core::{FlashError, Result};

use crate::inputs::{try_zeroed, AttentionInputs};
use crate::mask::{masked_score, Score};
use crate::online_softmax::RowState;

/// Tile sizes over a sequence of `seq_len` positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    seq_len: usize,
    br: usize,
    bc: usize,
}

/// Iterator over consecutive, possibly short, ranges of one tile size.
#[derive(Debug, Clone)]
pub struct Tiles {
    next: usize,
    end: usize,
    size: usize,
}

impl Iterator for Tiles {
    type Item = Range<usize>;

    fn next(&mut self) -> Option<Range<usize>> {
        if self.next >= self.end {
            return None;
        }
        let start = self.next;
        self.next = (start + self.size).min(self.end);
        Some(start..self.next)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = self.end.saturating_sub(self.next).div_ceil(self.size);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Tiles {}

impl TileGeometry {
    pub fn new(seq_len: usize, br: usize, bc: usize) -> Result<Self> {
        if seq_len == 0 {
            return Err(FlashError::invalid("seq_len", "must be > 0"));
        }
        if br == 0 {
            return Err(FlashError::invalid("block_q", "must be > 0"));
        }
        if bc == 0 {
            return Err(FlashError::invalid("block_k", "must be > 0"));
        }
        Ok(Self { seq_len, br, bc })
    }

    pub fn seq_len(&self) -> usize {
        self.seq_len
    }

    /// Query tile size, clamped to the sequence length.
    pub fn br(&self) -> usize {
        self.br.min(self.seq_len)
    }

    /// Key tile size, clamped to the sequence length.
    pub fn bc(&self) -> usize {
        self.bc.min(self.seq_len)
    }

    /// Number of query tiles, `ceil(N / Br)`.
    pub fn tr(&self) -> usize {
        self.seq_len.div_ceil(self.br)
    }

    /// Number of key tiles, `ceil(N / Bc)`.
    pub fn tc(&self) -> usize {
        self.seq_len.div_ceil(self.bc)
    }

    pub fn query_tiles(&self) -> Tiles {
        Tiles {
            next: 0,
            end: self.seq_len,
            size: self.br,
        }
    }

    pub fn key_tiles(&self) -> Tiles {
        Tiles {
            next: 0,
            end: self.seq_len,
            size: self.bc,
        }
    }

    /// Key tiles that can hold a visible key for some row of `query`.
    ///
    /// Under a causal mask, tiles starting after the last row of `query`
    /// are entirely absent and merging them would be a no-op.
    pub fn key_tiles_for(&self, query: &Range<usize>, causal: bool) -> Tiles {
        let end = if causal {
            query.end.min(self.seq_len)
        } else {
            self.seq_len
        };
        Tiles {
            next: 0,
            end,
            size: self.bc,
        }
    }
}

/// Working memory for one query tile of one (batch, head) pair.
#[derive(Debug)]
pub(crate) struct TileScratch {
    q: Vec<f32>,
    k: Vec<f32>,
    v: Vec<f32>,
    acc: Vec<f32>,
    states: Vec<RowState>,
    scores: Vec<Score>,
}

impl TileScratch {
    /// Reserve everything a query tile needs before any output is written.
    pub(crate) fn try_new(geom: &TileGeometry, head_dim: usize) -> Result<Self> {
        let (br, bc) = (geom.br(), geom.bc());
        Ok(Self {
            q: try_zeroed("query tile", br * head_dim)?,
            k: try_zeroed("key tile", bc * head_dim)?,
            v: try_zeroed("value tile", bc * head_dim)?,
            acc: try_zeroed("row accumulators", br * head_dim)?,
            states: try_zeroed("row states", br)?,
            scores: try_zeroed("score block", bc)?,
        })
    }
}

/// Run every query tile of head `bh`, writing its rows of O and L.
///
/// `o_head` holds the head's `N·D` output elements and `lse_head` its `N`
/// log-sum-exp entries.
pub(crate) fn run_head(
    inputs: &AttentionInputs<'_>,
    bh: usize,
    geom: &TileGeometry,
    causal: bool,
    scratch: &mut TileScratch,
    o_head: &mut [f32],
    lse_head: &mut [f32],
) {
    let d = inputs.shape.head_dim;
    let base = inputs.shape.head_offset(bh);
    let scale = inputs.shape.scale();
    let TileScratch {
        q,
        k,
        v,
        acc,
        states,
        scores,
    } = scratch;

    for q_tile in geom.query_tiles() {
        let rows = q_tile.len();
        inputs
            .q
            .load_into(base + q_tile.start * d..base + q_tile.end * d, &mut q[..rows * d]);
        states[..rows].fill(RowState::new());
        acc[..rows * d].fill(0.0);

        for k_tile in geom.key_tiles_for(&q_tile, causal) {
            let cols = k_tile.len();
            let span = base + k_tile.start * d..base + k_tile.end * d;
            inputs.k.load_into(span.clone(), &mut k[..cols * d]);
            inputs.v.load_into(span, &mut v[..cols * d]);

            for r in 0..rows {
                let qi = q_tile.start + r;
                let q_row = &q[r * d..(r + 1) * d];
                for (c, score) in scores[..cols].iter_mut().enumerate() {
                    *score = masked_score(causal, qi, k_tile.start + c, || {
                        dot(q_row, &k[c * d..(c + 1) * d]) * scale
                    });
                }
                states[r].merge_block(&mut acc[r * d..(r + 1) * d], &scores[..cols], |c| {
                    &v[c * d..(c + 1) * d]
                });
            }
        }

        for r in 0..rows {
            let n = q_tile.start + r;
            let out = &mut o_head[n * d..(n + 1) * d];
            lse_head[n] = states[r].finalize(&acc[r * d..(r + 1) * d], out);
        }
    }
}

#[inline]
fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
