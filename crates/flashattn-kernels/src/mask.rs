//! Causal masking as an explicit present/absent score.

/// Score of one (query, key) pair after masking.
///
/// A masked key is `Absent`: it never enters the running maximum and
/// contributes nothing to the normalizer or the accumulator.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub enum Score {
    #[default]
    Absent,
    Present(f32),
}

impl Score {
    pub fn value(self) -> Option<f32> {
        match self {
            Score::Present(s) => Some(s),
            Score::Absent => None,
        }
    }

    pub fn is_present(self) -> bool {
        matches!(self, Score::Present(_))
    }
}

/// Whether query `q_idx` may attend to key `k_idx`.
#[inline]
pub fn is_visible(causal: bool, q_idx: usize, k_idx: usize) -> bool {
    !causal || k_idx <= q_idx
}

/// Mask a score. `dot` is only evaluated for visible keys.
#[inline]
pub fn masked_score(causal: bool, q_idx: usize, k_idx: usize, dot: impl FnOnce() -> f32) -> Score {
    if is_visible(causal, q_idx, k_idx) {
        Score::Present(dot())
    } else {
        Score::Absent
    }
}

/// Maximum over the present scores of a block, `None` if all are absent.
pub fn block_max(scores: &[Score]) -> Option<f32> {
    scores
        .iter()
        .filter_map(|s| s.value())
        .fold(None, |acc, s| Some(acc.map_or(s, |m: f32| m.max(s))))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_causal_visibility() {
        assert!(is_visible(true, 3, 0));
        assert!(is_visible(true, 3, 3));
        assert!(!is_visible(true, 3, 4));
        assert!(is_visible(false, 3, 4));
    }

    #[test]
    fn test_masked_score_skips_dot() {
        let s = masked_score(true, 0, 1, || panic!("masked key must not be scored"));
        assert_eq!(s, Score::Absent);
        assert_eq!(masked_score(true, 1, 1, || 2.5), Score::Present(2.5));
    }

    #[test]
    fn test_block_max() {
        assert_eq!(block_max(&[]), None);
        assert_eq!(block_max(&[Score::Absent, Score::Absent]), None);
        let scores = [Score::Present(-3.0), Score::Absent, Score::Present(-1.5)];
        assert_eq!(block_max(&scores), Some(-1.5));
    }
}
