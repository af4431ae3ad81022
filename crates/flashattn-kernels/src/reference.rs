//! Unblocked reference attention.
//!
//! Each row materializes its full score vector, takes one whole-row
//! softmax and sums the weighted values. Quadratic in sequence length;
//! only used to check the tiled backends.

use flashattn_core::{AttnShape, Result, Tensor};

use crate::forward::AttentionOutput;
use crate::inputs::{try_zeroed, AttentionInputs};
use crate::mask::{masked_score, Score};

/// Reference `O` for Q, K, V of shape `[B, H, N, D]`.
pub fn reference_forward(q: &Tensor, k: &Tensor, v: &Tensor, causal: bool) -> Result<Vec<f32>> {
    Ok(reference_forward_with_lse(q, k, v, causal)?.o)
}

/// Reference `O` written into a caller buffer of `B·H·N·D` elements.
pub fn reference_forward_into(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    causal: bool,
    o: &mut [f32],
) -> Result<()> {
    let inputs = AttentionInputs::new(q, k, v)?;
    AttnShape::check_buffer("o", o.len(), inputs.shape.qkv_len())?;
    let mut lse: Vec<f32> = try_zeroed("lse", inputs.shape.lse_len())?;
    reference_rows(&inputs, causal, o, &mut lse)
}

/// Reference `O` and row log-sum-exp `L`.
pub fn reference_forward_with_lse(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    causal: bool,
) -> Result<AttentionOutput> {
    let inputs = AttentionInputs::new(q, k, v)?;
    let shape = inputs.shape;
    let mut o: Vec<f32> = try_zeroed("o", shape.qkv_len())?;
    let mut lse: Vec<f32> = try_zeroed("lse", shape.lse_len())?;
    reference_rows(&inputs, causal, &mut o, &mut lse)?;
    Ok(AttentionOutput { o, lse, shape })
}

fn reference_rows(
    inputs: &AttentionInputs<'_>,
    causal: bool,
    o: &mut [f32],
    lse: &mut [f32],
) -> Result<()> {
    let shape = inputs.shape;
    let (n_len, d) = (shape.seq_len, shape.head_dim);
    let scale = shape.scale();
    let mut scores: Vec<Score> = try_zeroed("score row", n_len)?;
    let mut weights: Vec<f32> = try_zeroed("weight row", n_len)?;

    for bh in 0..shape.head_count() {
        for i in 0..n_len {
            let q_at = shape.row_range(bh, i).start;
            for (j, s) in scores.iter_mut().enumerate() {
                let k_at = shape.row_range(bh, j).start;
                *s = masked_score(causal, i, j, || inputs.q.dot(q_at, &inputs.k, k_at, d) * scale);
            }

            let out = &mut o[shape.row_range(bh, i)];
            out.fill(0.0);
            let Some(m) = scores.iter().filter_map(|s| s.value()).reduce(f32::max) else {
                // no visible key
                lse[bh * n_len + i] = f32::NEG_INFINITY;
                continue;
            };

            let mut l = 0.0f32;
            for (w, s) in weights.iter_mut().zip(&scores) {
                *w = s.value().map_or(0.0, |s| (s - m).exp());
                l += *w;
            }
            let inv_l = l.recip();
            for (j, s) in scores.iter().enumerate() {
                if !s.is_present() {
                    continue;
                }
                let w = weights[j] * inv_l;
                let v_at = shape.row_range(bh, j).start;
                for (x, dd) in out.iter_mut().zip(0..d) {
                    *x += w * inputs.v.get(v_at + dd);
                }
            }
            lse[bh * n_len + i] = m + l.ln();
        }
    }
    Ok(())
}
