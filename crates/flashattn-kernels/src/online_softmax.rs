//! Running softmax statistics for one query row.
//!
//! A row keeps its running maximum `m`, the normalizer `l` and an
//! unnormalized accumulator `acc` over the value rows seen so far. Merging
//! a block first moves `m` up to the block maximum, rescales `l` and `acc`
//! by `α = exp(m_old − m_new)`, then adds `exp(s − m_new)` for every present
//! score. The result does not depend on block size or block order.

use crate::mask::{block_max, Score};

/// Scalar part of the streaming state. The accumulator is kept by the
/// caller so that backends can place it wherever suits their layout.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RowState {
    /// Running maximum; `None` until the first present score.
    pub max: Option<f32>,
    /// Running normalizer, relative to `max`.
    pub sum: f32,
}

/// Outcome of moving the running maximum for a new block.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rescale {
    /// Maximum after the block.
    pub max: f32,
    /// Factor already applied to `sum`; the caller applies it to `acc`.
    pub alpha: f32,
}

impl Default for RowState {
    fn default() -> Self {
        Self::new()
    }
}

impl RowState {
    pub const fn new() -> Self {
        Self { max: None, sum: 0.0 }
    }

    /// Move the running maximum to cover `block_max` and rescale `sum`.
    ///
    /// Returns `None` when the block has no present score; the state is
    /// then left untouched.
    pub fn advance(&mut self, block_max: Option<f32>) -> Option<Rescale> {
        let bm = block_max?;
        let (max, alpha) = match self.max {
            Some(old) => {
                let new = old.max(bm);
                (new, (old - new).exp())
            }
            // first contribution: nothing accumulated to rescale
            None => (bm, 0.0),
        };
        self.sum *= alpha;
        self.max = Some(max);
        Some(Rescale { max, alpha })
    }

    /// Add an already-exponentiated normalizer increment.
    #[inline]
    pub fn add(&mut self, increment: f32) {
        self.sum += increment;
    }

    /// Merge one block of scores. `value_row(j)` yields the value row of
    /// the block's `j`-th key; it is only called for present scores.
    pub fn merge_block<'v>(
        &mut self,
        acc: &mut [f32],
        scores: &[Score],
        mut value_row: impl FnMut(usize) -> &'v [f32],
    ) {
        let Some(Rescale { max, alpha }) = self.advance(block_max(scores)) else {
            return;
        };
        scale_in_place(acc, alpha);
        for (j, score) in scores.iter().enumerate() {
            let Some(s) = score.value() else { continue };
            let p = (s - max).exp();
            self.sum += p;
            axpy(acc, p, value_row(j));
        }
    }

    /// Normalize `acc` into `out` and return the row's log-sum-exp.
    ///
    /// A row that never saw a present score is written as zeros with a
    /// log-sum-exp of `-inf`. Any other row is divided through as is, so a
    /// NaN picked up from the inputs reaches both O and L.
    pub fn finalize(&self, acc: &[f32], out: &mut [f32]) -> f32 {
        let Some(m) = self.max else {
            out.fill(0.0);
            return f32::NEG_INFINITY;
        };
        let inv = self.sum.recip();
        for (o, &a) in out.iter_mut().zip(acc) {
            *o = a * inv;
        }
        m + self.sum.ln()
    }
}

#[inline]
pub(crate) fn scale_in_place(xs: &mut [f32], alpha: f32) {
    for x in xs {
        *x *= alpha;
    }
}

/// `y += a · x`
#[inline]
pub(crate) fn axpy(y: &mut [f32], a: f32, x: &[f32]) {
    for (yi, &xi) in y.iter_mut().zip(x) {
        *yi += a * xi;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-5
    }

    #[test]
    fn test_first_block_is_not_rescaled() {
        let mut st = RowState::new();
        let r = st.advance(Some(3.0)).unwrap();
        assert_eq!(r, Rescale { max: 3.0, alpha: 0.0 });
        assert_eq!(st.sum, 0.0);
    }

    #[test]
    fn test_absent_block_leaves_state() {
        let mut st = RowState { max: Some(1.0), sum: 2.0 };
        let mut acc = vec![4.0, 5.0];
        st.merge_block(&mut acc, &[Score::Absent, Score::Absent], |_| unreachable!());
        assert_eq!(st, RowState { max: Some(1.0), sum: 2.0 });
        assert_eq!(acc, vec![4.0, 5.0]);
    }

    #[test]
    fn test_max_is_monotonic() {
        let mut st = RowState::new();
        st.advance(Some(2.0));
        let r = st.advance(Some(-5.0)).unwrap();
        assert_eq!(r.max, 2.0);
        assert_eq!(r.alpha, 1.0);
        st.advance(Some(7.0));
        assert_eq!(st.max, Some(7.0));
    }

    #[test]
    fn test_two_keys_one_at_a_time() {
        // scores 2 then 4 against values 10 and 20
        let values = [[10.0f32], [20.0f32]];
        let mut st = RowState::new();
        let mut acc = vec![0.0];
        st.merge_block(&mut acc, &[Score::Present(2.0)], |_| &values[0][..]);
        st.merge_block(&mut acc, &[Score::Present(4.0)], |_| &values[1][..]);

        let e = (-2.0f32).exp();
        assert_eq!(st.max, Some(4.0));
        assert!(close(st.sum, 1.0 + e));

        let mut out = [0.0];
        let lse = st.finalize(&acc, &mut out);
        assert!(close(out[0], (10.0 * e + 20.0) / (1.0 + e)));
        assert!(close(lse, 4.0 + (1.0 + e).ln()));
    }

    #[test]
    fn test_block_split_does_not_matter() {
        let scores = [0.3f32, -1.2, 2.4, 0.9, -0.1];
        let values: Vec<[f32; 2]> = (0..5).map(|j| [j as f32, 1.0 - j as f32]).collect();

        let mut whole = RowState::new();
        let mut acc_whole = vec![0.0; 2];
        let all: Vec<Score> = scores.iter().map(|&s| Score::Present(s)).collect();
        whole.merge_block(&mut acc_whole, &all, |j| &values[j][..]);

        let mut split = RowState::new();
        let mut acc_split = vec![0.0; 2];
        split.merge_block(&mut acc_split, &all[..2], |j| &values[j][..]);
        split.merge_block(&mut acc_split, &all[2..], |j| &values[j + 2][..]);

        let (mut a, mut b) = ([0.0; 2], [0.0; 2]);
        let la = whole.finalize(&acc_whole, &mut a);
        let lb = split.finalize(&acc_split, &mut b);
        assert!(close(la, lb));
        assert!(close(a[0], b[0]) && close(a[1], b[1]));
    }

    #[test]
    fn test_nan_score_is_not_an_empty_row() {
        let mut st = RowState::new();
        let mut acc = vec![0.0; 2];
        let values = [[1.0f32, 2.0]];
        st.merge_block(&mut acc, &[Score::Present(f32::NAN)], |_| &values[0][..]);
        assert!(st.max.is_some());

        let mut out = [0.0; 2];
        let lse = st.finalize(&acc, &mut out);
        assert!(lse.is_nan());
        assert!(out.iter().all(|x| x.is_nan()));
    }

    #[test]
    fn test_finalize_empty_row() {
        let st = RowState::new();
        let mut out = [1.0, 1.0];
        let lse = st.finalize(&[0.0, 0.0], &mut out);
        assert_eq!(out, [0.0, 0.0]);
        assert_eq!(lse, f32::NEG_INFINITY);
    }
}
