//! x86 and x86-64 engines.
//!
//! Locked instructions have a single total order across all processors, so
//! `lock or` and `lock bts` give the read-modify-write guarantees directly,
//! and an ordinary load observes a value consistent with that order.

use std::arch::asm;
use std::sync::atomic::AtomicUsize;

#[cfg(target_arch = "x86")]
use std::arch::x86::{
    __m128i, __m256i, _mm256_setzero_si256, _mm256_stream_si256, _mm_setzero_si128, _mm_sfence,
    _mm_stream_si128,
};
#[cfg(target_arch = "x86_64")]
use std::arch::x86_64::{
    __m128i, __m256i, _mm256_setzero_si256, _mm256_stream_si256, _mm_setzero_si128, _mm_sfence,
    _mm_stream_si128,
};

use super::{zero_linear, MarkEngine, CLEAR_STRIDE};
use crate::capability::EngineKind;

/// `lock or` / `lock bts` engine with a scalar clear.
#[derive(Debug, Clone, Copy, Default)]
pub struct X86;

/// [`X86`] marking with SSE2 streaming stores for clearing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Sse2;

/// [`X86`] marking with AVX streaming stores for clearing.
#[derive(Debug, Clone, Copy, Default)]
pub struct Avx;

#[inline(always)]
fn lock_or(cell: &AtomicUsize, mask: usize) {
    // SAFETY: `cell` is a valid, aligned atomic word.
    unsafe {
        asm!(
            "lock or [{cell}], {mask}",
            cell = in(reg) cell.as_ptr(),
            mask = in(reg) mask,
            options(nostack),
        );
    }
}

#[inline(always)]
fn lock_bts(cell: &AtomicUsize, mask: usize) -> bool {
    let bit = mask.trailing_zeros() as usize;
    let carry: u8;
    // SAFETY: `cell` is a valid, aligned atomic word and `bit` is below the
    // word width, so the bit string never reaches past the cell.
    unsafe {
        asm!(
            "lock bts [{cell}], {bit}",
            "setc {carry}",
            cell = in(reg) cell.as_ptr(),
            bit = in(reg) bit,
            carry = out(reg_byte) carry,
            options(nostack),
        );
    }
    carry != 0
}

unsafe impl MarkEngine for X86 {
    const KIND: EngineKind = EngineKind::X86;

    #[inline]
    fn set_bits(cell: &AtomicUsize, mask: usize) {
        lock_or(cell, mask);
    }

    #[inline]
    fn test_and_set_bits(cell: &AtomicUsize, mask: usize) -> bool {
        lock_bts(cell, mask)
    }

    unsafe fn zero(ptr: *mut u8, len: usize) {
        unsafe { zero_linear(ptr, len) };
    }
}

unsafe impl MarkEngine for Sse2 {
    const KIND: EngineKind = EngineKind::Sse2;

    #[inline]
    fn set_bits(cell: &AtomicUsize, mask: usize) {
        lock_or(cell, mask);
    }

    #[inline]
    fn test_and_set_bits(cell: &AtomicUsize, mask: usize) -> bool {
        lock_bts(cell, mask)
    }

    unsafe fn zero(ptr: *mut u8, len: usize) {
        unsafe { zero_sse2(ptr, len) };
    }
}

unsafe impl MarkEngine for Avx {
    const KIND: EngineKind = EngineKind::Avx;

    #[inline]
    fn set_bits(cell: &AtomicUsize, mask: usize) {
        lock_or(cell, mask);
    }

    #[inline]
    fn test_and_set_bits(cell: &AtomicUsize, mask: usize) -> bool {
        lock_bts(cell, mask)
    }

    unsafe fn zero(ptr: *mut u8, len: usize) {
        unsafe { zero_avx(ptr, len) };
    }
}

/// Clears 128 bytes per iteration with eight 16-byte non-temporal stores.
#[target_feature(enable = "sse2")]
unsafe fn zero_sse2(ptr: *mut u8, len: usize) {
    debug_assert_eq!(ptr as usize % CLEAR_STRIDE, 0);
    debug_assert_eq!(len % CLEAR_STRIDE, 0);

    unsafe {
        let zero = _mm_setzero_si128();
        let mut cur = ptr.cast::<__m128i>();
        let end = ptr.add(len).cast::<__m128i>();
        while cur < end {
            _mm_stream_si128(cur, zero);
            _mm_stream_si128(cur.add(1), zero);
            _mm_stream_si128(cur.add(2), zero);
            _mm_stream_si128(cur.add(3), zero);
            _mm_stream_si128(cur.add(4), zero);
            _mm_stream_si128(cur.add(5), zero);
            _mm_stream_si128(cur.add(6), zero);
            _mm_stream_si128(cur.add(7), zero);
            cur = cur.add(8);
        }
        // Streaming stores are weakly ordered; fence before the bitmap is
        // handed back to markers.
        _mm_sfence();
    }
}

/// Clears 128 bytes per iteration with four 32-byte non-temporal stores.
#[target_feature(enable = "avx")]
unsafe fn zero_avx(ptr: *mut u8, len: usize) {
    debug_assert_eq!(ptr as usize % CLEAR_STRIDE, 0);
    debug_assert_eq!(len % CLEAR_STRIDE, 0);

    unsafe {
        let zero = _mm256_setzero_si256();
        let mut cur = ptr.cast::<__m256i>();
        let end = ptr.add(len).cast::<__m256i>();
        while cur < end {
            _mm256_stream_si256(cur, zero);
            _mm256_stream_si256(cur.add(1), zero);
            _mm256_stream_si256(cur.add(2), zero);
            _mm256_stream_si256(cur.add(3), zero);
            cur = cur.add(4);
        }
        _mm_sfence();
    }
}
