//! Cooperating lane groups.
//!
//! A group of `lanes` cooperating workers processes one query row. Each
//! lane keeps a partial value in its slot of a per-group register file;
//! `all_reduce_sum` combines the slots in butterfly (xor-shuffle) order so
//! that after `log2(lanes)` exchange rounds every slot holds the total.

use std::iter::StepBy;
use std::ops::Range;

use flashattn_core::{FlashError, Result};

/// Default lane count, the width of a warp.
pub const DEFAULT_LANES: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneGroup {
    lanes: usize,
}

impl Default for LaneGroup {
    fn default() -> Self {
        Self {
            lanes: DEFAULT_LANES,
        }
    }
}

impl LaneGroup {
    /// Build a group of `lanes` lanes; `lanes` must be a power of two.
    pub fn new(lanes: usize) -> Result<Self> {
        if !lanes.is_power_of_two() {
            return Err(FlashError::invalid(
                "lanes",
                format!("must be a power of two, got {lanes}"),
            ));
        }
        Ok(Self { lanes })
    }

    pub fn lanes(&self) -> usize {
        self.lanes
    }

    /// Indices owned by `lane` in an axis of length `len`:
    /// `lane, lane + lanes, lane + 2·lanes, …`
    #[inline]
    pub fn owned(&self, lane: usize, len: usize) -> StepBy<Range<usize>> {
        (lane.min(len)..len).step_by(self.lanes)
    }

    /// Sum `regs` across the group and leave the total in every slot.
    ///
    /// Round `k` pairs lane `t` with lane `t ^ (lanes >> k)`; both take the
    /// pair's sum, so no separate broadcast is needed. Returns lane 0's value.
    ///
    /// # Panics
    /// Panics if `regs.len() != self.lanes()`.
    pub fn all_reduce_sum(&self, regs: &mut [f32]) -> f32 {
        assert_eq!(regs.len(), self.lanes, "one register per lane");
        let mut offset = self.lanes >> 1;
        while offset > 0 {
            for t in 0..self.lanes {
                let peer = t ^ offset;
                if t < peer {
                    let s = regs[t] + regs[peer];
                    regs[t] = s;
                    regs[peer] = s;
                }
            }
            offset >>= 1;
        }
        regs[0]
    }

    /// Copy `src`'s register to every lane.
    pub fn broadcast(&self, regs: &mut [f32], src: usize) -> f32 {
        let v = regs[src];
        regs.fill(v);
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_non_power_of_two() {
        assert!(LaneGroup::new(0).is_err());
        assert!(LaneGroup::new(24).is_err());
        assert_eq!(LaneGroup::new(8).unwrap().lanes(), 8);
        assert_eq!(LaneGroup::default().lanes(), 32);
    }

    #[test]
    fn test_owned_partition_covers_axis_once() {
        let g = LaneGroup::new(4).unwrap();
        let mut seen = vec![0u32; 10];
        for lane in 0..4 {
            for d in g.owned(lane, 10) {
                seen[d] += 1;
            }
        }
        assert!(seen.iter().all(|&c| c == 1));
        assert_eq!(g.owned(1, 10).collect::<Vec<_>>(), vec![1, 5, 9]);
        // more lanes than elements: idle lanes own nothing
        assert_eq!(g.owned(3, 2).count(), 0);
    }

    #[test]
    fn test_all_reduce_sum_broadcasts() {
        for lanes in [1, 2, 4, 8, 32] {
            let g = LaneGroup::new(lanes).unwrap();
            let mut regs: Vec<f32> = (0..lanes).map(|t| t as f32 + 1.0).collect();
            let expected = (lanes * (lanes + 1) / 2) as f32;
            assert_eq!(g.all_reduce_sum(&mut regs), expected);
            assert!(regs.iter().all(|&r| r == expected));
        }
    }

    #[test]
    fn test_broadcast() {
        let g = LaneGroup::new(4).unwrap();
        let mut regs = vec![7.0, 1.0, 2.0, 3.0];
        assert_eq!(g.broadcast(&mut regs, 0), 7.0);
        assert_eq!(regs, vec![7.0; 4]);
    }
}
