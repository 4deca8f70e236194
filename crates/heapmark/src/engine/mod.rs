//! Mark and clear engines.
//!
//! An engine is a zero-sized strategy type bundling the three single-bit
//! atomic operations with a bulk zero routine. Markers are generic over the
//! engine, so the choice is made once at construction and every call after
//! that is monomorphic.
//!
//! - [`Generic`]: portable compare-exchange loops, available everywhere.
//! - [`X86`], [`Sse2`], [`Avx`]: `lock`-prefixed instructions, with scalar,
//!   SSE2 or AVX non-temporal clearing.
//! - [`Aarch64`], [`Neon`]: exclusive-monitor loops, with scalar or NEON
//!   clearing.

use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::capability::EngineKind;

mod generic;
pub use generic::{fetch_or_cas, AtomicWord, Generic};

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
mod x86;
#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
pub use x86::{Avx, Sse2, X86};

#[cfg(target_arch = "aarch64")]
mod aarch64;
#[cfg(target_arch = "aarch64")]
pub use aarch64::{Aarch64, Neon};

/// Bytes written per iteration by the vector clear loops.
///
/// Bit storage is always a whole number of pages, hence a multiple of this.
pub const CLEAR_STRIDE: usize = 128;

/// Single-bit atomic operations plus a bulk zero routine.
///
/// # Safety
///
/// Implementations must make `set_bits` and `test_and_set_bits` single
/// indivisible read-modify-writes with respect to each other on the same
/// cell, and `test_bits` an atomic load. `zero` must leave every byte of the
/// range equal to zero before returning.
pub unsafe trait MarkEngine: Send + Sync + 'static {
    /// Which engine this is.
    const KIND: EngineKind;

    /// Whether the running CPU can execute this engine.
    fn is_supported() -> bool {
        Self::KIND.is_available()
    }

    /// Atomically ORs `mask` into `cell`.
    fn set_bits(cell: &AtomicUsize, mask: usize);

    /// Atomically reads `cell` and tests `mask`.
    #[inline]
    fn test_bits(cell: &AtomicUsize, mask: usize) -> bool {
        cell.load(Ordering::Acquire) & mask != 0
    }

    /// Atomically sets the single bit in `mask`, returning whether it was
    /// already set.
    fn test_and_set_bits(cell: &AtomicUsize, mask: usize) -> bool;

    /// Zeroes `len` bytes at `ptr`.
    ///
    /// # Safety
    ///
    /// - `ptr` must be valid for writes of `len` bytes and aligned to
    ///   [`CLEAR_STRIDE`]; `len` must be a multiple of [`CLEAR_STRIDE`].
    /// - Nothing else may access the range until this returns.
    /// - [`MarkEngine::is_supported`] must be `true`.
    unsafe fn zero(ptr: *mut u8, len: usize);
}

/// Plain forward zero fill, shared by the scalar engines.
///
/// # Safety
///
/// `ptr` must be valid for writes of `len` bytes with no concurrent access.
#[inline]
pub(crate) unsafe fn zero_linear(ptr: *mut u8, len: usize) {
    unsafe { ptr::write_bytes(ptr, 0, len) };
}
