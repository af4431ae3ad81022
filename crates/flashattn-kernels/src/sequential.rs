//! Sequential backend.
//!
//! Each (batch, head) pair runs the blocked driver on one thread of
//! control, query tile after query tile. Independent pairs are spread over
//! rayon once there are enough of them.

use rayon::prelude::*;

use flashattn_core::Result;

use crate::config::AttentionConfig;
use crate::inputs::AttentionInputs;
use crate::scratch::ScratchSlots;
use crate::tiling::{run_head, TileGeometry, TileScratch};

/// Minimum (batch, head) pairs before we use rayon parallelism.
const PAR_HEAD_THRESHOLD: usize = 2;

/// Tiled forward pass writing `o` (`B·H·N·D`) and `lse` (`B·H·N`).
///
/// Scratch is reserved before any output is touched, so an allocation
/// failure leaves `o` and `lse` unwritten.
pub fn sequential_forward(
    inputs: &AttentionInputs<'_>,
    o: &mut [f32],
    lse: &mut [f32],
    cfg: &AttentionConfig,
) -> Result<()> {
    let workers = rayon::current_num_threads().min(inputs.shape.head_count());
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
    let geom = TileGeometry::new(shape.seq_len, cfg.block_q, cfg.block_k)?;
    let heads = shape.head_count();

    tracing::debug!(
        "sequential: {} heads, N={}, D={}, Br={}, Bc={} ({}x{} tiles), causal={}, workers={}",
        heads,
        shape.seq_len,
        shape.head_dim,
        geom.br(),
        geom.bc(),
        geom.tr(),
        geom.tc(),
        cfg.causal,
        workers,
    );

    let scratch = ScratchSlots::try_new(workers, || TileScratch::try_new(&geom, shape.head_dim))?;

    if heads >= PAR_HEAD_THRESHOLD {
        o.par_chunks_mut(shape.head_len())
            .zip(lse.par_chunks_mut(shape.seq_len))
            .enumerate()
            .for_each(|(bh, (o_head, lse_head))| {
                scratch.with(|s| run_head(inputs, bh, &geom, cfg.causal, s, o_head, lse_head));
            });
    } else {
        scratch.with(|s| {
            for (bh, (o_head, lse_head)) in o
                .chunks_mut(shape.head_len())
                .zip(lse.chunks_mut(shape.seq_len))
                .enumerate()
            {
                run_head(inputs, bh, &geom, cfg.causal, s, o_head, lse_head);
            }
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use flashattn_core::{FlashError, Tensor};

    fn run(q: &Tensor, k: &Tensor, v: &Tensor, cfg: &AttentionConfig) -> (Vec<f32>, Vec<f32>) {
        let inputs = AttentionInputs::new(q, k, v).unwrap();
        let mut o = vec![0.0; inputs.shape.qkv_len()];
        let mut lse = vec![0.0; inputs.shape.lse_len()];
        sequential_forward(&inputs, &mut o, &mut lse, cfg).unwrap();
        (o, lse)
    }

    #[test]
    fn test_single_key_copies_value() {
        let q = Tensor::from_f32(&[0.5, -1.0], &[1, 1, 1, 2]);
        let k = Tensor::from_f32(&[2.0, 1.0], &[1, 1, 1, 2]);
        let v = Tensor::from_f32(&[3.0, 4.0], &[1, 1, 1, 2]);
        let (o, lse) = run(&q, &k, &v, &AttentionConfig::default());
        assert_eq!(o, vec![3.0, 4.0]);
        // (0.5·2 − 1·1) / √2 = 0
        assert!(lse[0].abs() < 1e-6);
    }

    #[test]
    fn test_uniform_scores_average_values() {
        // Zero queries give equal weight to every key.
        let q = Tensor::zeros(&[1, 1, 4, 1], flashattn_core::DType::F32);
        let k = Tensor::from_f32(&[1.0, 2.0, 3.0, 4.0], &[1, 1, 4, 1]);
        let v = Tensor::from_f32(&[1.0, 2.0, 3.0, 6.0], &[1, 1, 4, 1]);
        let cfg = AttentionConfig::default().with_blocks(3, 3);
        let (o, lse) = run(&q, &k, &v, &cfg);
        assert!(o.iter().all(|&x| (x - 3.0).abs() < 1e-6));
        assert!(lse.iter().all(|&l| (l - 4f32.ln()).abs() < 1e-6));

        let (o, _) = run(&q, &k, &v, &cfg.with_causal(true));
        let expected = [1.0, 1.5, 2.0, 3.0];
        for (a, b) in o.iter().zip(expected) {
            assert!((a - b).abs() < 1e-6, "{a} vs {b}");
        }
    }

    #[test]
    fn test_many_heads_match_one_at_a_time() {
        let q = Tensor::randn_seeded(&[2, 3, 9, 4], 1);
        let k = Tensor::randn_seeded(&[2, 3, 9, 4], 2);
        let v = Tensor::randn_seeded(&[2, 3, 9, 4], 3);
        let cfg = AttentionConfig::default().with_blocks(4, 2).with_causal(true);
        let (o, lse) = run(&q, &k, &v, &cfg);

        let (qs, ks, vs) = (q.to_f32_vec(), k.to_f32_vec(), v.to_f32_vec());
        for bh in 0..6 {
            let head = |xs: &[f32]| Tensor::from_f32(&xs[bh * 36..(bh + 1) * 36], &[1, 1, 9, 4]);
            let (oh, lh) = run(&head(&qs), &head(&ks), &head(&vs), &cfg);
            assert_eq!(&o[bh * 36..(bh + 1) * 36], oh.as_slice());
            assert_eq!(&lse[bh * 9..(bh + 1) * 9], lh.as_slice());
        }
    }

    #[test]
    fn test_scratch_failure_leaves_outputs_unwritten() {
        let q = Tensor::randn_seeded(&[1, 2, 4, 2], 5);
        let inputs = AttentionInputs::new(&q, &q, &q).unwrap();
        let mut o = vec![7.0; 16];
        let mut lse = vec![7.0; 8];
        let err = run_with_workers(&inputs, &mut o, &mut lse, &AttentionConfig::default(), usize::MAX)
            .unwrap_err();
        assert!(matches!(err, FlashError::ResourceExhausted(_)));
        assert!(o.iter().chain(&lse).all(|&x| x == 7.0));
    }

    #[test]
    fn test_fewer_slots_than_heads() {
        let q = Tensor::randn_seeded(&[2, 3, 6, 4], 8);
        let inputs = AttentionInputs::new(&q, &q, &q).unwrap();
        let cfg = AttentionConfig::default().with_blocks(4, 4);
        let (o, lse) = run(&q, &q, &q, &cfg);
        let mut o1 = vec![0.0; o.len()];
        let mut l1 = vec![0.0; lse.len()];
        run_with_workers(&inputs, &mut o1, &mut l1, &cfg, 1).unwrap();
        assert_eq!((o, lse), (o1, l1));
    }

    #[test]
    fn test_output_size_checked() {
        let q = Tensor::zeros(&[1, 1, 4, 2], flashattn_core::DType::F32);
        let inputs = AttentionInputs::new(&q, &q, &q).unwrap();
        let mut o = vec![0.0; 7];
        let mut lse = vec![0.0; 4];
        let err = sequential_forward(&inputs, &mut o, &mut lse, &AttentionConfig::default())
            .unwrap_err();
        assert!(matches!(err, FlashError::BufferSize { name: "o", expected: 8, got: 7 }));
    }
}
