//! Group-parallel backend.
//!
//! Every query row of every (batch, head) pair is an independent unit of
//! work handled by one cooperating [`LaneGroup`]. Lane `t` owns head
//! dimensions `t, t + lanes, …` for the dot products and the value
//! accumulation, and keys `t, t + lanes, …` of a tile for the normalizer
//! increment. Partial results meet in `all_reduce_sum`, the one
//! synchronization point per key. The running max and normalizer live on
//! lane 0.
//!
//! The unnormalized accumulator sits in the worker's scratch buffer; it is
//! normalized into O only when the row is finalized, so O does not have to
//! be zeroed by the caller.

use rayon::prelude::*;

use flashattn_core::Result;

use crate::config::AttentionConfig;
use crate::group::LaneGroup;
use crate::inputs::{try_zeroed, AttentionInputs};
use crate::mask::{block_max, masked_score, Score};
use crate::online_softmax::{Rescale, RowState};
use crate::scratch::ScratchSlots;
use crate::tiling::TileGeometry;

/// Working memory of one lane group for one row.
#[derive(Debug)]
struct RowScratch {
    /// Query row, widened to f32.
    q: Vec<f32>,
    /// Unnormalized output accumulator.
    acc: Vec<f32>,
    /// One register per lane.
    regs: Vec<f32>,
    scores: Vec<Score>,
    probs: Vec<f32>,
}

impl RowScratch {
    fn try_new(head_dim: usize, lanes: usize, bc: usize) -> Result<Self> {
        Ok(Self {
            q: try_zeroed("query row", head_dim)?,
            acc: try_zeroed("row accumulator", head_dim)?,
            regs: try_zeroed("lane registers", lanes)?,
            scores: try_zeroed("score block", bc)?,
            probs: try_zeroed("probability block", bc)?,
        })
    }
}

/// Forward pass with one lane group per query row.
///
/// Writes `o` (`B·H·N·D`) and `lse` (`B·H·N`); neither needs to be
/// initialized. Inputs stored as f16 or bf16 are widened on load and every
/// sum is carried in f32.
pub fn group_parallel_forward(
    inputs: &AttentionInputs<'_>,
    o: &mut [f32],
    lse: &mut [f32],
    cfg: &AttentionConfig,
) -> Result<()> {
    let workers = rayon::current_num_threads().min(inputs.shape.lse_len());
    run_with_workers(inputs, o, lse, cfg, workers)
}

fn run_with_workers(
    inputs: &AttentionInputs<'_>,
    o: &mut [f32],
    lse: &mut [f32],
    cfg: &AttentionConfig,
    workers: usize,
) -> Result<()> {
    inputs.check_outputs(o, lse)?;
    let shape = inputs.shape;
    let group = LaneGroup::new(cfg.lanes)?;
    let geom = TileGeometry::new(shape.seq_len, cfg.block_q, cfg.block_k)?;

    tracing::debug!(
        "group_parallel: {} rows, lanes={}, D={}, Bc={}, causal={}, workers={}",
        shape.lse_len(),
        group.lanes(),
        shape.head_dim,
        geom.bc(),
        cfg.causal,
        workers,
    );

    let scratch = ScratchSlots::try_new(workers, || {
        RowScratch::try_new(shape.head_dim, group.lanes(), geom.bc())
    })?;

    o.par_chunks_mut(shape.head_dim)
        .zip(lse.par_iter_mut())
        .enumerate()
        .for_each(|(row, (o_row, lse_slot))| {
            let (bh, n) = (row / shape.seq_len, row % shape.seq_len);
            *lse_slot =
                scratch.with(|s| run_row(inputs, &group, &geom, cfg.causal, bh, n, s, o_row));
        });
    Ok(())
}

/// Stream every key tile through query row `n` of head `bh` and finalize
/// it into `o_row`. Returns the row's log-sum-exp.
#[allow(clippy::too_many_arguments)]
fn run_row(
    inputs: &AttentionInputs<'_>,
    group: &LaneGroup,
    geom: &TileGeometry,
    causal: bool,
    bh: usize,
    n: usize,
    scratch: &mut RowScratch,
    o_row: &mut [f32],
) -> f32 {
    let shape = inputs.shape;
    let d = shape.head_dim;
    let scale = shape.scale();
    let RowScratch {
        q,
        acc,
        regs,
        scores,
        probs,
    } = scratch;

    inputs.q.load_into(shape.row_range(bh, n), q);
    acc.fill(0.0);
    // lane 0
    let mut state = RowState::new();

    for k_tile in geom.key_tiles_for(&(n..n + 1), causal) {
        let cols = k_tile.len();

        // scores: per-lane partial dot products, reduced across the group
        for (c, score) in scores[..cols].iter_mut().enumerate() {
            let key = k_tile.start + c;
            *score = masked_score(causal, n, key, || {
                let k_base = shape.row_range(bh, key).start;
                for (lane, reg) in regs.iter_mut().enumerate() {
                    *reg = group
                        .owned(lane, d)
                        .map(|i| q[i] * inputs.k.get(k_base + i))
                        .sum();
                }
                group.all_reduce_sum(regs) * scale
            });
        }

        let Some(Rescale { max, alpha }) = state.advance(block_max(&scores[..cols])) else {
            continue;
        };

        for (p, s) in probs[..cols].iter_mut().zip(&scores[..cols]) {
            *p = match s {
                Score::Present(s) => (s - max).exp(),
                Score::Absent => 0.0,
            };
        }

        // normalizer increment: each lane sums its strided share of keys
        for (lane, reg) in regs.iter_mut().enumerate() {
            *reg = group
                .owned(lane, cols)
                .filter(|&c| scores[c].is_present())
                .map(|c| probs[c])
                .sum();
        }
        state.add(group.all_reduce_sum(regs));

        // lane 0 hands the rescale factor to the group
        regs[0] = alpha;
        let alpha = group.broadcast(regs, 0);

        // value accumulation: each lane rescales and updates its own dims
        for lane in 0..group.lanes() {
            for i in group.owned(lane, d) {
                let mut a = acc[i] * alpha;
                for c in (0..cols).filter(|&c| scores[c].is_present()) {
                    let v_idx = shape.row_range(bh, k_tile.start + c).start + i;
                    a += probs[c] * inputs.v.get(v_idx);
                }
                acc[i] = a;
            }
        }
    }

    state.finalize(acc, o_row)
}
