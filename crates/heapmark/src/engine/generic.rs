use std::sync::atomic::{AtomicUsize, Ordering};

use crossbeam::utils::Backoff;

use super::{zero_linear, MarkEngine};
use crate::capability::EngineKind;

/// Portable engine built from a compare-exchange retry loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct Generic;

/// A word the portable engine can OR bits into.
///
/// Implemented for [`AtomicUsize`]. Other atomics, such as a model
/// checker's, can implement it to drive [`fetch_or_cas`] directly.
pub trait AtomicWord {
    /// Loads the word with `Acquire` ordering.
    fn load_acquire(&self) -> usize;

    /// Weak compare-exchange: `AcqRel` on success, `Acquire` on failure.
    ///
    /// # Errors
    ///
    /// Returns the observed value when it differs from `current`, or on a
    /// spurious failure.
    fn compare_exchange_weak_acq_rel(&self, current: usize, new: usize) -> Result<usize, usize>;
}

impl AtomicWord for AtomicUsize {
    #[inline]
    fn load_acquire(&self) -> usize {
        self.load(Ordering::Acquire)
    }

    #[inline]
    fn compare_exchange_weak_acq_rel(&self, current: usize, new: usize) -> Result<usize, usize> {
        self.compare_exchange_weak(current, new, Ordering::AcqRel, Ordering::Acquire)
    }
}

/// ORs `mask` into `cell` and returns the previous value.
///
/// Skips the store entirely when every bit in `mask` is already set, so a
/// cell that is fully marked is only ever read.
#[inline]
pub fn fetch_or_cas<W: AtomicWord + ?Sized>(cell: &W, mask: usize) -> usize {
    let backoff = Backoff::new();
    let mut current = cell.load_acquire();
    loop {
        if current & mask == mask {
            return current;
        }
        match cell.compare_exchange_weak_acq_rel(current, current | mask) {
            Ok(prev) => return prev,
            Err(actual) => {
                current = actual;
                backoff.spin();
            }
        }
    }
}

unsafe impl MarkEngine for Generic {
    const KIND: EngineKind = EngineKind::Generic;

    #[inline]
    fn is_supported() -> bool {
        true
    }

    #[inline]
    fn set_bits(cell: &AtomicUsize, mask: usize) {
        fetch_or_cas(cell, mask);
    }

    #[inline]
    fn test_and_set_bits(cell: &AtomicUsize, mask: usize) -> bool {
        fetch_or_cas(cell, mask) & mask != 0
    }

    unsafe fn zero(ptr: *mut u8, len: usize) {
        unsafe { zero_linear(ptr, len) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_or_cas_returns_previous() {
        let cell = AtomicUsize::new(0b0100);
        assert_eq!(fetch_or_cas(&cell, 0b0001), 0b0100);
        assert_eq!(fetch_or_cas(&cell, 0b0001), 0b0101);
        assert_eq!(cell.load(Ordering::Relaxed), 0b0101);
    }

    #[test]
    fn test_fetch_or_cas_preserves_neighbours_under_contention() {
        let cell = AtomicUsize::new(0);
        std::thread::scope(|s| {
            for bit in 0..usize::BITS {
                let cell = &cell;
                s.spawn(move || fetch_or_cas(cell, 1 << bit));
            }
        });
        assert_eq!(cell.load(Ordering::Relaxed), usize::MAX);
    }
}
