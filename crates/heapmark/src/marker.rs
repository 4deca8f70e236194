//! The mark bitmap itself.
//!
//! [`BitMapMarker`] joins a region index with one engine. [`AnyMarker`]
//! wraps whichever engine the host supports best, for callers that pick the
//! engine at runtime.

use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::Ordering;

use sys_alloc::Advice;

use crate::capability::EngineKind;
use crate::config::MarkerConfig;
use crate::engine::{Generic, MarkEngine};
use crate::error::{MarkerError, Result};
use crate::region::{RegionIndex, Zone};

#[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
use crate::engine::{Avx, Sse2, X86};

#[cfg(target_arch = "aarch64")]
use crate::engine::{Aarch64, Neon};

/// Operations a traversal uses to agree on which addresses it has visited.
///
/// Every address-taking operation treats addresses outside
/// [`Marker::zone`] as untracked: setting is a no-op and queries return
/// `false`.
pub trait Marker: Send + Sync {
    /// Marks `addr`.
    fn set_mark(&self, addr: usize);

    /// Returns whether `addr` is marked.
    fn is_marked(&self, addr: usize) -> bool;

    /// Marks `addr`, returning `true` if it was already marked.
    ///
    /// Among callers racing on the same address, exactly one sees `false`.
    fn check_and_mark(&self, addr: usize) -> bool;

    /// Unmarks every address.
    fn clear(&mut self);

    /// Whether `addr` is covered by this marker.
    fn is_in_zone(&self, addr: usize) -> bool;

    /// The covered address range.
    fn zone(&self) -> Zone;

    /// The engine doing the work.
    fn engine(&self) -> EngineKind;
}

/// A mark bitmap over one address zone, using engine `E`.
///
/// # Example
///
/// ```
/// use heapmark::{BitMapMarker, Generic};
///
/// let mut marker = BitMapMarker::<Generic>::new(0x1000, 0x1000).unwrap();
/// assert!(!marker.check_and_mark(0x1000));
/// assert!(marker.check_and_mark(0x1000));
///
/// marker.clear();
/// assert!(!marker.is_marked(0x1000));
/// ```
pub struct BitMapMarker<E: MarkEngine = Generic> {
    region: RegionIndex,
    _engine: PhantomData<E>,
}

impl<E: MarkEngine> BitMapMarker<E> {
    /// Creates a marker covering `size` bytes from `begin`.
    ///
    /// `size` is rounded up to the page size.
    ///
    /// # Errors
    ///
    /// - [`MarkerError::InvalidArgument`] if `begin` is null, `size` is zero,
    ///   or the zone would wrap around the address space.
    /// - [`MarkerError::UnsupportedEngine`] if the CPU cannot run `E`.
    /// - [`MarkerError::Allocation`] if the storage cannot be mapped.
    pub fn new(begin: usize, size: usize) -> Result<Self> {
        Self::build(begin, size, false)
    }

    pub(crate) fn build(begin: usize, size: usize, populate: bool) -> Result<Self> {
        if !E::is_supported() {
            return Err(MarkerError::UnsupportedEngine(E::KIND));
        }

        let mut marker = Self {
            region: RegionIndex::new(begin, size, populate)?,
            _engine: PhantomData,
        };
        marker.clear();

        #[cfg(feature = "tracing")]
        crate::tracing::log_marker_created(marker.zone(), marker.storage_len(), E::KIND);

        Ok(marker)
    }

    /// Marks `addr`. Repeated calls are harmless.
    #[inline]
    pub fn set_mark(&self, addr: usize) {
        if let Some((cell, mask)) = self.region.locate(addr) {
            E::set_bits(cell, mask);
        }
    }

    /// Returns whether `addr` is marked.
    #[inline]
    #[must_use]
    pub fn is_marked(&self, addr: usize) -> bool {
        self.region
            .locate(addr)
            .is_some_and(|(cell, mask)| E::test_bits(cell, mask))
    }

    /// Marks `addr`, returning `true` if it was already marked.
    ///
    /// A `false` return means this call made the transition and the caller
    /// owns processing `addr` for this pass. Out-of-zone addresses return
    /// `false` and are not recorded.
    #[inline]
    pub fn check_and_mark(&self, addr: usize) -> bool {
        self.region
            .locate(addr)
            .is_some_and(|(cell, mask)| E::test_and_set_bits(cell, mask))
    }

    /// Whether `addr` is covered by this marker.
    #[inline]
    #[must_use]
    pub const fn is_in_zone(&self, addr: usize) -> bool {
        self.region.is_in_zone(addr)
    }

    /// The covered address range.
    #[must_use]
    pub const fn zone(&self) -> Zone {
        self.region.zone()
    }

    /// Size of the bit storage in bytes.
    #[must_use]
    pub fn storage_len(&self) -> usize {
        self.region.storage_len()
    }

    /// Counts the marked bits.
    ///
    /// With concurrent marking in flight the result is only a snapshot.
    #[must_use]
    pub fn count_marked(&self) -> usize {
        self.region
            .words()
            .iter()
            .map(|cell| cell.load(Ordering::Relaxed).count_ones() as usize)
            .sum()
    }

    /// Unmarks every address.
    ///
    /// Taking `&mut self` guarantees no mark or query runs at the same time.
    pub fn clear(&mut self) {
        // SAFETY: the exclusive borrow rules out concurrent access.
        unsafe { self.clear_unsynchronized() };
    }

    /// Unmarks every address through a shared reference.
    ///
    /// # Safety
    ///
    /// No other thread may call any method on this marker until this
    /// returns. Callers typically guarantee this with a phase barrier
    /// between traversal passes.
    pub unsafe fn clear_unsynchronized(&self) {
        #[cfg(feature = "tracing")]
        let _span = crate::tracing::span_clear(E::KIND, self.storage_len()).entered();

        // The sweep is strictly sequential; marking goes back to scattered
        // access afterwards.
        self.region.advise(Advice::Sequential);
        // SAFETY: storage is page aligned, a page multiple long, exclusively
        // ours per the caller contract, and `E` was checked at construction.
        unsafe { E::zero(self.region.storage_ptr(), self.region.storage_len()) };
        self.region.advise(Advice::Random);
    }
}

impl<E: MarkEngine> Marker for BitMapMarker<E> {
    #[inline]
    fn set_mark(&self, addr: usize) {
        Self::set_mark(self, addr);
    }

    #[inline]
    fn is_marked(&self, addr: usize) -> bool {
        Self::is_marked(self, addr)
    }

    #[inline]
    fn check_and_mark(&self, addr: usize) -> bool {
        Self::check_and_mark(self, addr)
    }

    fn clear(&mut self) {
        Self::clear(self);
    }

    #[inline]
    fn is_in_zone(&self, addr: usize) -> bool {
        Self::is_in_zone(self, addr)
    }

    fn zone(&self) -> Zone {
        Self::zone(self)
    }

    fn engine(&self) -> EngineKind {
        E::KIND
    }
}

impl<E: MarkEngine> fmt::Debug for BitMapMarker<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BitMapMarker")
            .field("engine", &E::KIND)
            .field("region", &self.region)
            .finish()
    }
}

/// A marker whose engine is chosen at runtime.
///
/// Each variant holds a fully monomorphic [`BitMapMarker`]; the only
/// per-call cost is a match on the variant.
#[derive(Debug)]
pub enum AnyMarker {
    /// [`Generic`] engine.
    Generic(BitMapMarker<Generic>),
    /// [`X86`] engine.
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    X86(BitMapMarker<X86>),
    /// [`Sse2`] engine.
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    Sse2(BitMapMarker<Sse2>),
    /// [`Avx`] engine.
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    Avx(BitMapMarker<Avx>),
    /// [`Aarch64`] engine.
    #[cfg(target_arch = "aarch64")]
    Aarch64(BitMapMarker<Aarch64>),
    /// [`Neon`] engine.
    #[cfg(target_arch = "aarch64")]
    Neon(BitMapMarker<Neon>),
}

macro_rules! dispatch {
    ($self:expr, $marker:ident => $body:expr) => {
        match $self {
            AnyMarker::Generic($marker) => $body,
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            AnyMarker::X86($marker) => $body,
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            AnyMarker::Sse2($marker) => $body,
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            AnyMarker::Avx($marker) => $body,
            #[cfg(target_arch = "aarch64")]
            AnyMarker::Aarch64($marker) => $body,
            #[cfg(target_arch = "aarch64")]
            AnyMarker::Neon($marker) => $body,
        }
    };
}

impl AnyMarker {
    /// Creates a marker with the best engine for this CPU.
    ///
    /// # Errors
    ///
    /// See [`BitMapMarker::new`].
    pub fn new(begin: usize, size: usize) -> Result<Self> {
        Self::with_config(&MarkerConfig::new(), begin, size)
    }

    /// Creates a marker with the engine and options from `config`.
    ///
    /// # Errors
    ///
    /// See [`BitMapMarker::new`]. A forced engine the host cannot run
    /// yields [`MarkerError::UnsupportedEngine`].
    pub fn with_config(config: &MarkerConfig, begin: usize, size: usize) -> Result<Self> {
        let kind = config.selected_engine();
        let populate = config.is_populate();

        #[cfg(feature = "tracing")]
        crate::tracing::log_engine_selected(
            kind,
            if config.forced_engine().is_some() {
                "configured"
            } else {
                "detected"
            },
        );

        match kind {
            EngineKind::Generic => BitMapMarker::build(begin, size, populate).map(Self::Generic),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            EngineKind::X86 => BitMapMarker::build(begin, size, populate).map(Self::X86),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            EngineKind::Sse2 => BitMapMarker::build(begin, size, populate).map(Self::Sse2),
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            EngineKind::Avx => BitMapMarker::build(begin, size, populate).map(Self::Avx),
            #[cfg(target_arch = "aarch64")]
            EngineKind::Aarch64 => BitMapMarker::build(begin, size, populate).map(Self::Aarch64),
            #[cfg(target_arch = "aarch64")]
            EngineKind::Neon => BitMapMarker::build(begin, size, populate).map(Self::Neon),
            #[allow(unreachable_patterns)]
            _ => Err(MarkerError::UnsupportedEngine(kind)),
        }
    }

    /// Marks `addr`.
    #[inline]
    pub fn set_mark(&self, addr: usize) {
        dispatch!(self, m => m.set_mark(addr));
    }

    /// Returns whether `addr` is marked.
    #[inline]
    #[must_use]
    pub fn is_marked(&self, addr: usize) -> bool {
        dispatch!(self, m => m.is_marked(addr))
    }

    /// Marks `addr`, returning `true` if it was already marked.
    #[inline]
    pub fn check_and_mark(&self, addr: usize) -> bool {
        dispatch!(self, m => m.check_and_mark(addr))
    }

    /// Unmarks every address.
    pub fn clear(&mut self) {
        dispatch!(self, m => m.clear());
    }

    /// Unmarks every address through a shared reference.
    ///
    /// # Safety
    ///
    /// Same contract as [`BitMapMarker::clear_unsynchronized`].
    pub unsafe fn clear_unsynchronized(&self) {
        dispatch!(self, m => unsafe { m.clear_unsynchronized() });
    }

    /// Whether `addr` is covered by this marker.
    #[inline]
    #[must_use]
    pub fn is_in_zone(&self, addr: usize) -> bool {
        dispatch!(self, m => m.is_in_zone(addr))
    }

    /// The covered address range.
    #[must_use]
    pub fn zone(&self) -> Zone {
        dispatch!(self, m => m.zone())
    }

    /// The engine doing the work.
    #[must_use]
    pub const fn engine(&self) -> EngineKind {
        match self {
            Self::Generic(_) => EngineKind::Generic,
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Self::X86(_) => EngineKind::X86,
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Self::Sse2(_) => EngineKind::Sse2,
            #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
            Self::Avx(_) => EngineKind::Avx,
            #[cfg(target_arch = "aarch64")]
            Self::Aarch64(_) => EngineKind::Aarch64,
            #[cfg(target_arch = "aarch64")]
            Self::Neon(_) => EngineKind::Neon,
        }
    }

    /// Size of the bit storage in bytes.
    #[must_use]
    pub fn storage_len(&self) -> usize {
        dispatch!(self, m => m.storage_len())
    }

    /// Counts the marked bits. See [`BitMapMarker::count_marked`].
    #[must_use]
    pub fn count_marked(&self) -> usize {
        dispatch!(self, m => m.count_marked())
    }
}

impl Marker for AnyMarker {
    #[inline]
    fn set_mark(&self, addr: usize) {
        Self::set_mark(self, addr);
    }

    #[inline]
    fn is_marked(&self, addr: usize) -> bool {
        Self::is_marked(self, addr)
    }

    #[inline]
    fn check_and_mark(&self, addr: usize) -> bool {
        Self::check_and_mark(self, addr)
    }

    fn clear(&mut self) {
        Self::clear(self);
    }

    #[inline]
    fn is_in_zone(&self, addr: usize) -> bool {
        Self::is_in_zone(self, addr)
    }

    fn zone(&self) -> Zone {
        Self::zone(self)
    }

    fn engine(&self) -> EngineKind {
        Self::engine(self)
    }
}
