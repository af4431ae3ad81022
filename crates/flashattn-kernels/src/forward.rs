//! Entry points: validate, then run the configured backend.

use flashattn_core::{AttnShape, DType, FlashError, Result, Tensor};

use crate::config::{AttentionConfig, Backend};
use crate::group_parallel::group_parallel_forward;
use crate::inputs::{try_zeroed, AttentionInputs};
use crate::sequential::sequential_forward;

/// Owned result of a forward pass.
#[derive(Debug, Clone, PartialEq)]
pub struct AttentionOutput {
    /// `[B, H, N, D]`, row-major.
    pub o: Vec<f32>,
    /// `[B, H, N]` log-sum-exp per query row.
    pub lse: Vec<f32>,
    pub shape: AttnShape,
}

impl AttentionOutput {
    /// Output row `[b, h, n, :]`.
    pub fn o_row(&self, b: usize, h: usize, n: usize) -> &[f32] {
        let start = self.shape.idx4(b, h, n, 0);
        &self.o[start..start + self.shape.head_dim]
    }

    pub fn lse_at(&self, b: usize, h: usize, n: usize) -> f32 {
        self.lse[self.shape.idx_lse(b, h, n)]
    }

    /// Wrap O and L as f32 tensors.
    pub fn into_tensors(self) -> (Tensor, Tensor) {
        let o = Tensor::from_f32(&self.o, self.shape.qkv_shape().dims());
        let lse = Tensor::from_f32(&self.lse, self.shape.lse_shape().dims());
        (o, lse)
    }
}

/// Attention forward pass into caller-provided buffers.
///
/// `q`, `k`, `v` must share one `[B, H, N, D]` shape and be stored as
/// `cfg.dtype`. `o` must hold `B·H·N·D` elements and `lse` `B·H·N`; their
/// prior contents are ignored. Every configuration error is reported
/// before any output is written.
///
/// # Examples
///
/// ```
/// use flashattn_core::Tensor;
/// use flashattn_kernels::{forward, AttentionConfig};
///
/// let q = Tensor::randn_seeded(&[1, 2, 16, 8], 0);
/// let k = Tensor::randn_seeded(&[1, 2, 16, 8], 1);
/// let v = Tensor::randn_seeded(&[1, 2, 16, 8], 2);
/// let mut o = vec![0.0; 2 * 16 * 8];
/// let mut lse = vec![0.0; 2 * 16];
///
/// let cfg = AttentionConfig::default().with_blocks(4, 8).with_causal(true);
/// forward(&q, &k, &v, &mut o, &mut lse, &cfg).unwrap();
/// assert!(lse.iter().all(|l| l.is_finite()));
/// ```
pub fn forward(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    o: &mut [f32],
    lse: &mut [f32],
    cfg: &AttentionConfig,
) -> Result<()> {
    cfg.validate()?;
    let inputs = AttentionInputs::new(q, k, v)?;
    check_dtypes(&inputs, cfg.dtype)?;
    inputs.check_outputs(o, lse)?;

    match cfg.num_threads {
        Some(threads) => {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| FlashError::Backend(format!("thread pool of {threads}: {e}")))?;
            pool.install(|| dispatch(&inputs, o, lse, cfg))
        }
        None => dispatch(&inputs, o, lse, cfg),
    }
}

/// Attention forward pass allocating O and L.
pub fn forward_alloc(
    q: &Tensor,
    k: &Tensor,
    v: &Tensor,
    cfg: &AttentionConfig,
) -> Result<AttentionOutput> {
    let shape = AttnShape::from_shape(q.shape())?;
    let mut o: Vec<f32> = try_zeroed("o", shape.qkv_len())?;
    let mut lse: Vec<f32> = try_zeroed("lse", shape.lse_len())?;
    forward(q, k, v, &mut o, &mut lse, cfg)?;
    Ok(AttentionOutput { o, lse, shape })
}

fn dispatch(
    inputs: &AttentionInputs<'_>,
    o: &mut [f32],
    lse: &mut [f32],
    cfg: &AttentionConfig,
) -> Result<()> {
    tracing::debug!(
        "forward: backend={}, shape={:?}, dtype={}, threads={}",
        cfg.backend,
        inputs.shape,
        cfg.dtype,
        rayon::current_num_threads(),
    );
    match cfg.backend {
        Backend::Sequential => sequential_forward(inputs, o, lse, cfg),
        Backend::GroupParallel => group_parallel_forward(inputs, o, lse, cfg),
    }
}

fn check_dtypes(inputs: &AttentionInputs<'_>, dtype: DType) -> Result<()> {
    for (name, got) in [
        ("q", inputs.q.dtype()),
        ("k", inputs.k.dtype()),
        ("v", inputs.v.dtype()),
    ] {
        if got != dtype {
            return Err(FlashError::invalid(
                "dtype",
                format!("{name} is stored as {got}, configured {dtype}"),
            ));
        }
    }
    Ok(())
}
