//! Construction errors.
//!
//! Every fallible operation in this crate happens while a marker is being
//! built. Once a marker exists its operations are total.

use std::io;

use crate::capability::EngineKind;

/// Why a marker could not be created.
#[derive(Debug, thiserror::Error)]
pub enum MarkerError {
    /// The region was null, empty, or does not fit in the address space.
    #[error("invalid marker region: {0}")]
    InvalidArgument(&'static str),

    /// The OS refused to map the bitmap storage.
    #[error("failed to map {len} bytes of mark bitmap storage: {source}")]
    Allocation {
        /// Number of bytes that were requested.
        len: usize,
        /// Error reported by the mapping call.
        #[source]
        source: io::Error,
    },

    /// The requested engine cannot run on this CPU or build target.
    #[error("mark engine `{}` is not available on this host", .0.name())]
    UnsupportedEngine(EngineKind),
}

impl MarkerError {
    /// Returns the raw OS error code behind an [`MarkerError::Allocation`].
    #[must_use]
    pub fn os_error_code(&self) -> Option<i32> {
        match self {
            Self::Allocation { source, .. } => source.raw_os_error(),
            _ => None,
        }
    }
}

/// Result alias for marker construction.
pub type Result<T> = std::result::Result<T, MarkerError>;
