//! Pass control for a shared marker.
//!
//! A [`MarkSession`] owns one marker for the lifetime of a monitoring
//! session. Workers take a [`PassGuard`] to mark during a pass; the
//! controller calls [`MarkSession::reset`] between passes, which waits for
//! every outstanding guard before clearing. The "no marking while clearing"
//! rule is therefore enforced by the lock instead of by convention.
//!
//! # Example
//!
//! ```
//! use heapmark::MarkSession;
//!
//! let session = MarkSession::new(0x10_0000, 1 << 16).unwrap();
//!
//! std::thread::scope(|s| {
//!     for _ in 0..4 {
//!         s.spawn(|| {
//!             let pass = session.pass();
//!             pass.check_and_mark(0x10_0040);
//!         });
//!     }
//! });
//!
//! assert!(session.pass().is_marked(0x10_0040));
//! session.reset();
//! assert!(!session.pass().is_marked(0x10_0040));
//! ```

use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock, RwLockReadGuard};

use crate::capability::EngineKind;
use crate::config::MarkerConfig;
use crate::error::Result;
use crate::marker::AnyMarker;

/// Identifies one traversal pass within a session.
///
/// The first pass is 1; each [`MarkSession::reset`] starts the next one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PassId(pub u64);

/// Counters describing a session's clears.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionStats {
    /// Engine used by the session's marker.
    pub engine: EngineKind,
    /// The pass currently in progress.
    pub pass: PassId,
    /// Number of resets performed.
    pub resets: u64,
    /// Duration of the most recent clear.
    pub last_clear: Duration,
    /// Total time spent clearing.
    pub total_clear: Duration,
}

#[derive(Debug, Default)]
struct ClearTimes {
    last: Duration,
    total: Duration,
}

/// A marker shared by concurrent workers, reset between passes.
#[derive(Debug)]
pub struct MarkSession {
    marker: RwLock<AnyMarker>,
    engine: EngineKind,
    pass: AtomicU64,
    clear_times: Mutex<ClearTimes>,
}

impl MarkSession {
    /// Starts a session over `size` bytes from `begin` with the detected
    /// engine.
    ///
    /// # Errors
    ///
    /// See [`AnyMarker::with_config`].
    pub fn new(begin: usize, size: usize) -> Result<Self> {
        Self::with_config(&MarkerConfig::new(), begin, size)
    }

    /// Starts a session using `config`.
    ///
    /// # Errors
    ///
    /// See [`AnyMarker::with_config`].
    pub fn with_config(config: &MarkerConfig, begin: usize, size: usize) -> Result<Self> {
        config.build(begin, size).map(Self::from_marker)
    }

    /// Wraps an existing marker. Its current marks belong to pass 1.
    #[must_use]
    pub fn from_marker(marker: AnyMarker) -> Self {
        Self {
            engine: marker.engine(),
            marker: RwLock::new(marker),
            pass: AtomicU64::new(1),
            clear_times: Mutex::new(ClearTimes::default()),
        }
    }

    /// Joins the current pass.
    ///
    /// Any number of guards may be alive at once. Do not take a second guard
    /// on a thread that already holds one: a waiting [`MarkSession::reset`]
    /// blocks new guards and the thread would deadlock on itself.
    pub fn pass(&self) -> PassGuard<'_> {
        let guard = self.marker.read();
        PassGuard {
            pass: PassId(self.pass.load(Ordering::Acquire)),
            guard,
        }
    }

    /// Joins the current pass if no reset is pending.
    pub fn try_pass(&self) -> Option<PassGuard<'_>> {
        let guard = self.marker.try_read()?;
        Some(PassGuard {
            pass: PassId(self.pass.load(Ordering::Acquire)),
            guard,
        })
    }

    /// Ends the current pass: waits for every [`PassGuard`] to drop, clears
    /// the bitmap, and returns the id of the new pass.
    pub fn reset(&self) -> PassId {
        let mut marker = self.marker.write();

        let start = Instant::now();
        marker.clear();
        let elapsed = start.elapsed();

        let next = PassId(self.pass.fetch_add(1, Ordering::AcqRel) + 1);
        {
            let mut times = self.clear_times.lock();
            times.last = elapsed;
            times.total += elapsed;
        }
        drop(marker);

        #[cfg(feature = "tracing")]
        crate::tracing::log_clear_finished(next.0, elapsed);

        next
    }

    /// The pass currently in progress.
    #[must_use]
    pub fn pass_id(&self) -> PassId {
        PassId(self.pass.load(Ordering::Acquire))
    }

    /// Returns clear counters for this session. Never blocks on the marker.
    #[must_use]
    pub fn stats(&self) -> SessionStats {
        let pass = self.pass_id();
        let times = self.clear_times.lock();
        SessionStats {
            engine: self.engine,
            pass,
            resets: pass.0 - 1,
            last_clear: times.last,
            total_clear: times.total,
        }
    }

    /// Ends the session, handing back the marker.
    #[must_use]
    pub fn into_inner(self) -> AnyMarker {
        self.marker.into_inner()
    }
}

/// Shared access to a session's marker for the duration of one pass.
///
/// Derefs to [`AnyMarker`]. The session cannot be reset while any guard
/// is alive.
pub struct PassGuard<'a> {
    pass: PassId,
    guard: RwLockReadGuard<'a, AnyMarker>,
}

impl PassGuard<'_> {
    /// The pass this guard belongs to.
    #[must_use]
    pub const fn pass_id(&self) -> PassId {
        self.pass
    }
}

impl Deref for PassGuard<'_> {
    type Target = AnyMarker;

    fn deref(&self) -> &AnyMarker {
        &self.guard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::region::ALIGNMENT;
    use std::sync::atomic::AtomicUsize;

    const BEGIN: usize = 0x2000_0000;

    #[test]
    fn test_reset_advances_pass_and_clears() {
        let session = MarkSession::new(BEGIN, 1 << 16).unwrap();
        assert_eq!(session.pass_id(), PassId(1));

        {
            let pass = session.pass();
            assert_eq!(pass.pass_id(), PassId(1));
            assert!(!pass.check_and_mark(BEGIN));
            assert!(pass.check_and_mark(BEGIN));
        }

        assert_eq!(session.reset(), PassId(2));
        assert_eq!(session.pass_id(), PassId(2));
        let pass = session.pass();
        assert_eq!(pass.pass_id(), PassId(2));
        assert!(!pass.is_marked(BEGIN));
    }

    #[test]
    fn test_try_pass_fails_while_writer_holds_lock() {
        let session = MarkSession::new(BEGIN, 4096).unwrap();
        let writer = session.marker.write();
        assert!(session.try_pass().is_none());
        drop(writer);
        assert!(session.try_pass().is_some());
    }

    #[test]
    fn test_reset_waits_for_workers() {
        let session = MarkSession::new(BEGIN, 1 << 16).unwrap();
        let marked = AtomicUsize::new(0);

        std::thread::scope(|s| {
            let guard = session.pass();
            s.spawn(|| {
                // Blocks until the guard below is dropped.
                session.reset();
            });
            std::thread::sleep(Duration::from_millis(20));
            for i in 0..100 {
                if !guard.check_and_mark(BEGIN + i * ALIGNMENT) {
                    marked.fetch_add(1, Ordering::Relaxed);
                }
            }
            assert_eq!(session.pass_id(), PassId(1));
            drop(guard);
        });

        assert_eq!(marked.load(Ordering::Relaxed), 100);
        assert_eq!(session.pass_id(), PassId(2));
        assert_eq!(session.pass().count_marked(), 0);
    }

    #[test]
    fn test_stats() {
        let session = MarkSession::with_config(
            &MarkerConfig::new().engine(EngineKind::Generic),
            BEGIN,
            1 << 16,
        )
        .unwrap();
        session.reset();
        session.reset();

        let stats = session.stats();
        assert_eq!(stats.engine, EngineKind::Generic);
        assert_eq!(stats.pass, PassId(3));
        assert_eq!(stats.resets, 2);
        assert!(stats.total_clear >= stats.last_clear);
    }

    #[test]
    fn test_into_inner_keeps_marks() {
        let session = MarkSession::new(BEGIN, 4096).unwrap();
        session.pass().set_mark(BEGIN + ALIGNMENT);
        let marker = session.into_inner();
        assert!(marker.is_marked(BEGIN + ALIGNMENT));
    }
}
