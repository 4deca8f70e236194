//! AArch64 engines built on load-acquire/store-release exclusive pairs.

use std::arch::aarch64::{vdupq_n_u8, vst1q_u8};
use std::arch::asm;
use std::sync::atomic::AtomicUsize;

use super::{zero_linear, MarkEngine, CLEAR_STRIDE};
use crate::capability::EngineKind;

/// Exclusive-monitor engine with a scalar clear.
#[derive(Debug, Clone, Copy, Default)]
pub struct Aarch64;

/// [`Aarch64`] marking with NEON stores for clearing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Neon;

/// ORs `mask` into `cell` with an `ldaxr`/`stlxr` retry loop and returns the
/// previous value.
#[inline(always)]
fn exclusive_or(cell: &AtomicUsize, mask: usize) -> usize {
    let old: usize;
    // SAFETY: `cell` is a valid, aligned atomic word.
    unsafe {
        asm!(
            "2:",
            "ldaxr {old}, [{cell}]",
            "orr {new}, {old}, {mask}",
            "stlxr {status:w}, {new}, [{cell}]",
            "cbnz {status:w}, 2b",
            cell = in(reg) cell.as_ptr(),
            mask = in(reg) mask,
            old = out(reg) old,
            new = out(reg) _,
            status = out(reg) _,
            options(nostack),
        );
    }
    old
}

unsafe impl MarkEngine for Aarch64 {
    const KIND: EngineKind = EngineKind::Aarch64;

    #[inline]
    fn set_bits(cell: &AtomicUsize, mask: usize) {
        exclusive_or(cell, mask);
    }

    #[inline]
    fn test_and_set_bits(cell: &AtomicUsize, mask: usize) -> bool {
        exclusive_or(cell, mask) & mask != 0
    }

    unsafe fn zero(ptr: *mut u8, len: usize) {
        unsafe { zero_linear(ptr, len) };
    }
}

unsafe impl MarkEngine for Neon {
    const KIND: EngineKind = EngineKind::Neon;

    #[inline]
    fn set_bits(cell: &AtomicUsize, mask: usize) {
        exclusive_or(cell, mask);
    }

    #[inline]
    fn test_and_set_bits(cell: &AtomicUsize, mask: usize) -> bool {
        exclusive_or(cell, mask) & mask != 0
    }

    unsafe fn zero(ptr: *mut u8, len: usize) {
        unsafe { zero_neon(ptr, len) };
    }
}

/// Clears 128 bytes per iteration with eight 16-byte vector stores.
#[target_feature(enable = "neon")]
unsafe fn zero_neon(ptr: *mut u8, len: usize) {
    debug_assert_eq!(ptr as usize % CLEAR_STRIDE, 0);
    debug_assert_eq!(len % CLEAR_STRIDE, 0);

    unsafe {
        let zero = vdupq_n_u8(0);
        let mut cur = ptr;
        let end = ptr.add(len);
        while cur < end {
            vst1q_u8(cur, zero);
            vst1q_u8(cur.add(16), zero);
            vst1q_u8(cur.add(32), zero);
            vst1q_u8(cur.add(48), zero);
            vst1q_u8(cur.add(64), zero);
            vst1q_u8(cur.add(80), zero);
            vst1q_u8(cur.add(96), zero);
            vst1q_u8(cur.add(112), zero);
            cur = cur.add(CLEAR_STRIDE);
        }
    }
}

#[cfg(all(test, not(miri)))]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn test_exclusive_or_returns_previous() {
        let cell = AtomicUsize::new(0b10);
        assert_eq!(exclusive_or(&cell, 0b01), 0b10);
        assert_eq!(exclusive_or(&cell, 0b01), 0b11);
        assert_eq!(cell.load(Ordering::Relaxed), 0b11);
    }
}
