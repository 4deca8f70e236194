//! Low-level OS memory primitives for side-table allocations.
//!
//! Mark bitmaps and similar side tables want memory that is page aligned,
//! zero filled on first touch, and released straight back to the OS. This
//! crate wraps the platform calls that provide it and the access-pattern
//! hints that go with it.

use std::io;

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use unix as os;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use windows as os;

pub use os::page_size;

/// Rounds `len` up to the next multiple of [`page_size()`].
///
/// Returns `None` if the result does not fit in a `usize`.
#[must_use]
pub fn round_up_to_page(len: usize) -> Option<usize> {
    let mask = page_size() - 1;
    len.checked_add(mask).map(|n| n & !mask)
}

/// Expected access pattern for a mapping, passed to the kernel as a hint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advice {
    /// No special treatment.
    Normal,
    /// Pages will be touched at scattered offsets; read-ahead is wasted.
    Random,
    /// Pages will be touched in ascending order; read-ahead pays off.
    Sequential,
}

/// A handle to an anonymous memory mapping.
///
/// The region is unmapped when this handle is dropped.
pub struct Mmap {
    inner: os::MmapInner,
}

impl Mmap {
    /// Returns a pointer to the start of the mapping.
    ///
    /// The pointer is aligned to at least [`page_size()`].
    #[must_use]
    pub fn ptr(&self) -> *mut u8 {
        self.inner.ptr()
    }

    /// Returns the length of the mapping in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Returns `true` if the mapping covers no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.len() == 0
    }

    /// Tells the kernel how the whole mapping is about to be accessed.
    ///
    /// The hint never changes the contents of the mapping. Platforms without
    /// an equivalent call return `Ok(())`.
    pub fn advise(&self, advice: Advice) -> io::Result<()> {
        self.inner.advise(advice)
    }
}

impl std::fmt::Debug for Mmap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mmap")
            .field("ptr", &self.ptr())
            .field("len", &self.len())
            .finish()
    }
}

// SAFETY: the mapping is plain memory owned by this handle; synchronizing
// access to its contents is the responsibility of whoever holds the pointer.
unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

/// Configuration for creating an anonymous mapping.
#[derive(Debug, Clone, Default)]
pub struct MmapOptions {
    len: usize,
    populate: bool,
}

impl MmapOptions {
    /// Creates options with length 0. A length must be set before mapping.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            len: 0,
            populate: false,
        }
    }

    /// Sets the length of the mapping in bytes.
    #[must_use]
    pub const fn len(mut self, len: usize) -> Self {
        self.len = len;
        self
    }

    /// Sets whether to prefault the page tables.
    ///
    /// On Linux this adds `MAP_POPULATE`; elsewhere it is ignored.
    #[must_use]
    pub const fn populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    /// Creates an anonymous, private, read/write mapping.
    ///
    /// The returned memory is zero filled.
    ///
    /// # Errors
    ///
    /// Returns [`io::ErrorKind::InvalidInput`] if the length is zero, or the
    /// OS error reported by the mapping call.
    pub fn map_anon(&self) -> io::Result<Mmap> {
        if self.len == 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length must be greater than 0",
            ));
        }

        // SAFETY: we request a fresh mapping at an OS-chosen address, so no
        // existing memory is replaced.
        let inner = unsafe { os::MmapInner::map_anon(self.len, self.populate)? };
        Ok(Mmap { inner })
    }
}
