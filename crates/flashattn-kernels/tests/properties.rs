//! Property tests: any shape, tiling and lane count agrees with the
//! reference.

use proptest::prelude::*;

use flashattn_core::AttnShape;
use flashattn_kernels::{
    forward_alloc, random_qkv, reference_forward_with_lse, AttentionConfig, Backend,
};

fn max_diff(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| (x - y).abs()).fold(0.0, f32::max)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_sequential_matches_reference(
        heads in 1usize..3,
        seq_len in 1usize..40,
        head_dim in 1usize..10,
        br in 1usize..20,
        bc in 1usize..20,
        causal in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let shape = AttnShape::new(1, heads, seq_len, head_dim);
        let (q, k, v) = random_qkv(shape, seed);
        let cfg = AttentionConfig::default().with_blocks(br, bc).with_causal(causal);

        let expected = reference_forward_with_lse(&q, &k, &v, causal).unwrap();
        let got = forward_alloc(&q, &k, &v, &cfg).unwrap();
        prop_assert!(max_diff(&got.o, &expected.o) <= 1e-4);
        prop_assert!(max_diff(&got.lse, &expected.lse) <= 1e-4);
    }

    #[test]
    fn prop_group_parallel_matches_sequential(
        seq_len in 1usize..33,
        head_dim in 1usize..18,
        bc in 1usize..12,
        lanes in prop::sample::select(vec![1usize, 2, 4, 8, 32]),
        causal in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let shape = AttnShape::new(1, 1, seq_len, head_dim);
        let (q, k, v) = random_qkv(shape, seed);
        let seq_cfg = AttentionConfig::default().with_blocks(7, bc).with_causal(causal);
        let par_cfg = seq_cfg.clone().with_backend(Backend::GroupParallel).with_lanes(lanes);

        let seq = forward_alloc(&q, &k, &v, &seq_cfg).unwrap();
        let par = forward_alloc(&q, &k, &v, &par_cfg).unwrap();
        prop_assert!(max_diff(&seq.o, &par.o) <= 1e-4);
        prop_assert!(max_diff(&seq.lse, &par.lse) <= 1e-4);
    }

    #[test]
    fn prop_tile_sizes_do_not_change_output(
        seq_len in 1usize..48,
        a in (1usize..24, 1usize..24),
        b in (1usize..24, 1usize..24),
        causal in any::<bool>(),
        seed in any::<u64>(),
    ) {
        let shape = AttnShape::new(1, 1, seq_len, 4);
        let (q, k, v) = random_qkv(shape, seed);
        let base = AttentionConfig::default().with_causal(causal);
        let x = forward_alloc(&q, &k, &v, &base.clone().with_blocks(a.0, a.1)).unwrap();
        let y = forward_alloc(&q, &k, &v, &base.with_blocks(b.0, b.1)).unwrap();
        prop_assert!(max_diff(&x.o, &y.o) <= 1e-4);
    }
}
