//! Region index: the covered address range and its bit storage.
//!
//! One bit of storage stands for one alignment unit of the covered range.
//! Addresses are plain integers; they are never dereferenced here, only
//! turned into an offset from the start of the zone.

use std::mem;
use std::slice;
use std::sync::atomic::AtomicUsize;

use sys_alloc::{Advice, Mmap, MmapOptions};

use crate::error::{MarkerError, Result};

/// Bits in one storage cell.
pub const WORD_BITS: usize = usize::BITS as usize;

const LOG2_WORD_BITS: u32 = usize::BITS.trailing_zeros();

/// `log2` of [`ALIGNMENT`]: 3 on 64-bit targets, 2 on 32-bit targets.
pub const ALIGN_SHIFT: u32 = LOG2_WORD_BITS - 3;

/// Smallest distance between two objects, and so the span of one bit.
pub const ALIGNMENT: usize = 1 << ALIGN_SHIFT;

/// A half-open address interval `[begin, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Zone {
    begin: usize,
    end: usize,
}

impl Zone {
    /// First covered address.
    #[must_use]
    pub const fn begin(&self) -> usize {
        self.begin
    }

    /// First address past the zone.
    #[must_use]
    pub const fn end(&self) -> usize {
        self.end
    }

    /// Number of covered bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end - self.begin
    }

    /// Returns `true` if the zone covers no address.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// Whether `addr` lies in `[begin, end)`.
    #[inline]
    #[must_use]
    pub const fn contains(&self, addr: usize) -> bool {
        self.begin <= addr && addr < self.end
    }
}

/// Maps a byte offset within a zone to `(word_index, bit_mask)`.
///
/// Offsets that differ by less than [`ALIGNMENT`] map to the same bit.
#[inline]
#[must_use]
pub const fn bit_position(offset: usize) -> (usize, usize) {
    let unit = offset >> ALIGN_SHIFT;
    (unit >> LOG2_WORD_BITS, 1 << (unit % WORD_BITS))
}

/// Number of storage bytes needed to cover `region_len` bytes, before page
/// rounding.
#[must_use]
pub const fn bitmap_bytes(region_len: usize) -> usize {
    (region_len >> ALIGN_SHIFT).div_ceil(8)
}

/// Owns the bit storage for a zone and translates addresses into cells.
pub(crate) struct RegionIndex {
    zone: Zone,
    storage: Mmap,
}

impl RegionIndex {
    /// Maps storage covering `size` bytes from `begin`.
    ///
    /// The zone is `size` rounded up to the page size, and the storage is
    /// that zone's bitmap footprint rounded up to the page size again. The
    /// storage comes back zero filled and advised for random access.
    pub(crate) fn new(begin: usize, size: usize, populate: bool) -> Result<Self> {
        if begin == 0 {
            return Err(MarkerError::InvalidArgument("start address is null"));
        }
        if size == 0 {
            return Err(MarkerError::InvalidArgument("size is zero"));
        }

        let region_len = sys_alloc::round_up_to_page(size)
            .ok_or(MarkerError::InvalidArgument("size overflows the address space"))?;
        let end = begin
            .checked_add(region_len)
            .ok_or(MarkerError::InvalidArgument("region overflows the address space"))?;
        let storage_len = sys_alloc::round_up_to_page(bitmap_bytes(region_len))
            .ok_or(MarkerError::InvalidArgument("bitmap overflows the address space"))?;

        let storage = MmapOptions::new()
            .len(storage_len)
            .populate(populate)
            .map_anon()
            .map_err(|source| MarkerError::Allocation {
                len: storage_len,
                source,
            })?;

        let index = Self {
            zone: Zone { begin, end },
            storage,
        };
        index.advise(Advice::Random);
        Ok(index)
    }

    #[inline]
    pub(crate) const fn zone(&self) -> Zone {
        self.zone
    }

    #[inline]
    pub(crate) const fn is_in_zone(&self, addr: usize) -> bool {
        self.zone.contains(addr)
    }

    /// Returns the cell holding the bit for `addr` and the mask selecting it,
    /// or `None` if `addr` is outside the zone.
    #[inline]
    pub(crate) fn locate(&self, addr: usize) -> Option<(&AtomicUsize, usize)> {
        if !self.is_in_zone(addr) {
            return None;
        }
        let (word, mask) = bit_position(addr - self.zone.begin);
        self.words().get(word).map(|cell| (cell, mask))
    }

    /// The storage viewed as atomic cells.
    #[inline]
    pub(crate) fn words(&self) -> &[AtomicUsize] {
        let len = self.storage.len() / mem::size_of::<AtomicUsize>();
        // SAFETY: the mapping is page aligned, readable, writable and lives as
        // long as `self`. All shared access goes through atomics.
        unsafe { slice::from_raw_parts(self.storage.ptr().cast::<AtomicUsize>(), len) }
    }

    #[inline]
    pub(crate) fn storage_ptr(&self) -> *mut u8 {
        self.storage.ptr()
    }

    #[inline]
    pub(crate) fn storage_len(&self) -> usize {
        self.storage.len()
    }

    /// Passes an access-pattern hint to the OS. Failure only costs speed.
    pub(crate) fn advise(&self, advice: Advice) {
        if let Err(err) = self.storage.advise(advice) {
            #[cfg(feature = "tracing")]
            crate::tracing::log_advise_failed(advice, &err);
            let _ = err;
        }
    }
}

impl std::fmt::Debug for RegionIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegionIndex")
            .field("zone", &self.zone)
            .field("storage_len", &self.storage.len())
            .finish()
    }
}
