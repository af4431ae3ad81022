//! Per-worker scratch buffers.

use parking_lot::Mutex;

use flashattn_core::{FlashError, Result};

/// One scratch buffer per rayon worker, all built before any output is
/// written.
///
/// A worker always takes the slot of its own thread index, so nothing is
/// allocated once the parallel loop has started. Slots are only shared
/// when there are fewer of them than threads; the lock then serializes
/// the workers that map to the same slot.
pub(crate) struct ScratchSlots<T> {
    slots: Vec<Mutex<T>>,
}

impl<T> ScratchSlots<T> {
    /// Build `count` slots (at least one) with `make`.
    pub(crate) fn try_new(count: usize, mut make: impl FnMut() -> Result<T>) -> Result<Self> {
        let count = count.max(1);
        let mut slots = Vec::new();
        slots.try_reserve_exact(count).map_err(|e| {
            FlashError::ResourceExhausted(format!("{count} scratch slots: {e}"))
        })?;
        for _ in 0..count {
            slots.push(Mutex::new(make()?));
        }
        Ok(Self { slots })
    }

    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// Run `f` on the calling worker's scratch.
    pub(crate) fn with<R>(&self, f: impl FnOnce(&mut T) -> R) -> R {
        let idx = rayon::current_thread_index().unwrap_or(0) % self.slots.len();
        f(&mut *self.slots[idx].lock())
    }
}
