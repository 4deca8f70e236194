use std::io::{self, Error};
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::Advice;

#[cfg(any(target_os = "linux", target_os = "android"))]
const MAP_POPULATE: libc::c_int = libc::MAP_POPULATE;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const MAP_POPULATE: libc::c_int = 0;

/// Returns the system page size, cached atomically.
pub fn page_size() -> usize {
    static PAGE_SIZE: AtomicUsize = AtomicUsize::new(0);

    match PAGE_SIZE.load(Ordering::Relaxed) {
        0 => {
            #[cfg(miri)]
            let page_size = 4096;
            #[cfg(not(miri))]
            #[allow(clippy::cast_sign_loss)]
            let page_size = match unsafe { libc::sysconf(libc::_SC_PAGESIZE) } {
                n if n > 0 => n as usize,
                _ => 4096,
            };
            PAGE_SIZE.store(page_size, Ordering::Relaxed);
            page_size
        }
        page_size => page_size,
    }
}

pub struct MmapInner {
    ptr: *mut libc::c_void,
    len: usize,
}

impl MmapInner {
    /// Creates a new anonymous private read/write mapping.
    ///
    /// # Safety
    ///
    /// Calls `mmap`. The caller owns the returned region until drop.
    pub unsafe fn map_anon(len: usize, populate: bool) -> io::Result<Self> {
        #[cfg(miri)]
        {
            use std::alloc::{alloc_zeroed, Layout};
            let _ = populate;
            let layout = Layout::from_size_align(len, page_size())
                .map_err(|_| Error::from(io::ErrorKind::InvalidInput))?;
            let ptr = unsafe { alloc_zeroed(layout) };
            if ptr.is_null() {
                return Err(Error::from(io::ErrorKind::OutOfMemory));
            }
            Ok(Self {
                ptr: ptr.cast::<libc::c_void>(),
                len,
            })
        }
        #[cfg(not(miri))]
        {
            let populate = if populate { MAP_POPULATE } else { 0 };
            let flags = libc::MAP_PRIVATE | libc::MAP_ANON | populate;
            let prot = libc::PROT_READ | libc::PROT_WRITE;

            let ptr = unsafe { libc::mmap(std::ptr::null_mut(), len, prot, flags, -1, 0) };

            if ptr == libc::MAP_FAILED {
                return Err(Error::last_os_error());
            }

            Ok(Self { ptr, len })
        }
    }

    pub fn advise(&self, advice: Advice) -> io::Result<()> {
        #[cfg(miri)]
        {
            let _ = advice;
            Ok(())
        }
        #[cfg(not(miri))]
        {
            let advice = match advice {
                Advice::Normal => libc::MADV_NORMAL,
                Advice::Random => libc::MADV_RANDOM,
                Advice::Sequential => libc::MADV_SEQUENTIAL,
            };
            if unsafe { libc::madvise(self.ptr, self.len, advice) } != 0 {
                return Err(Error::last_os_error());
            }
            Ok(())
        }
    }

    pub const fn ptr(&self) -> *mut u8 {
        self.ptr.cast::<u8>()
    }

    pub const fn len(&self) -> usize {
        self.len
    }
}

impl Drop for MmapInner {
    fn drop(&mut self) {
        if self.len == 0 || self.ptr.is_null() {
            return;
        }
        #[cfg(miri)]
        unsafe {
            use std::alloc::{dealloc, Layout};
            let layout = Layout::from_size_align_unchecked(self.len, page_size());
            dealloc(self.ptr.cast::<u8>(), layout);
        }
        #[cfg(not(miri))]
        unsafe {
            libc::munmap(self.ptr, self.len);
        }
    }
}
