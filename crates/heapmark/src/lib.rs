//! A concurrent mark bitmap for heap traversals.
//!
//! `heapmark` records, for every aligned address in a fixed region, whether a
//! traversal pass has already visited it. Any number of threads can mark and
//! query at once without a lock; exactly one of several threads racing on the
//! same address is told it got there first.
//!
//! # Layout
//!
//! - One bit per alignment unit ([`ALIGNMENT`]: 8 bytes on 64-bit targets,
//!   4 on 32-bit targets), stored in native machine words.
//! - Storage is a private anonymous mapping, a whole number of pages long,
//!   advised for random access while marking and sequential access while
//!   clearing.
//! - Addresses outside the zone are never recorded: `set_mark` ignores them
//!   and queries answer `false`.
//!
//! # Engines
//!
//! The single-bit atomics and the bulk clear come from an [`engine`]
//! chosen once per marker. [`BitMapMarker<E>`] fixes the engine at compile
//! time; [`AnyMarker`] picks the best one the running CPU supports.
//!
//! # Quick Start
//!
//! ```
//! use heapmark::AnyMarker;
//!
//! let mut marker = AnyMarker::new(0x1000, 0x1000).unwrap();
//!
//! assert!(!marker.check_and_mark(0x1000)); // first visit
//! assert!(marker.check_and_mark(0x1000)); // duplicate
//! assert!(!marker.is_marked(0x1008));
//! marker.set_mark(0x1008);
//! assert!(marker.is_marked(0x1008));
//!
//! marker.clear(); // between passes
//! assert!(!marker.is_marked(0x1000));
//! ```
//!
//! # Clearing
//!
//! Clearing must not overlap marking. [`BitMapMarker::clear`] takes
//! `&mut self` so the borrow checker enforces that; [`MarkSession`] enforces
//! it with a reader-writer lock for markers shared across threads.

#![warn(missing_docs)]
#![allow(clippy::module_name_repetitions)]

pub mod capability;
mod config;
pub mod engine;
mod error;
mod marker;
mod region;
mod session;

#[cfg(feature = "tracing")]
mod tracing;

pub use capability::{engine_kind, EngineKind, ParseEngineKindError};
pub use config::MarkerConfig;
pub use engine::{Generic, MarkEngine};
pub use error::{MarkerError, Result};
pub use marker::{AnyMarker, BitMapMarker, Marker};
pub use region::{bit_position, Zone, ALIGNMENT, ALIGN_SHIFT, WORD_BITS};
pub use session::{MarkSession, PassGuard, PassId, SessionStats};
