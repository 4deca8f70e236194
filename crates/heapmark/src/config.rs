//! Marker configuration.

use crate::capability::{engine_kind, EngineKind};
use crate::error::Result;
use crate::marker::AnyMarker;

/// Options for building an [`AnyMarker`].
///
/// The covered region itself is passed to [`MarkerConfig::build`]; the
/// marker keeps no process-wide state about which region it covers.
///
/// # Example
///
/// ```
/// use heapmark::{EngineKind, Marker, MarkerConfig};
///
/// let marker = MarkerConfig::new()
///     .engine(EngineKind::Generic)
///     .build(0x10_0000, 1 << 20)
///     .unwrap();
/// assert_eq!(marker.engine(), EngineKind::Generic);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MarkerConfig {
    engine: Option<EngineKind>,
    populate: bool,
}

impl MarkerConfig {
    /// Auto-detected engine, lazily faulted storage.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            engine: None,
            populate: false,
        }
    }

    /// Forces a specific engine instead of the detected one.
    ///
    /// Building fails with [`MarkerError::UnsupportedEngine`] if the host
    /// cannot run it.
    ///
    /// [`MarkerError::UnsupportedEngine`]: crate::MarkerError::UnsupportedEngine
    #[must_use]
    pub const fn engine(mut self, kind: EngineKind) -> Self {
        self.engine = Some(kind);
        self
    }

    /// Goes back to the detected engine.
    #[must_use]
    pub const fn auto_engine(mut self) -> Self {
        self.engine = None;
        self
    }

    /// The engine forced with [`MarkerConfig::engine`], if any.
    #[must_use]
    pub const fn forced_engine(&self) -> Option<EngineKind> {
        self.engine
    }

    /// Prefaults the bit storage at construction.
    #[must_use]
    pub const fn populate(mut self, populate: bool) -> Self {
        self.populate = populate;
        self
    }

    /// Whether storage will be prefaulted.
    #[must_use]
    pub const fn is_populate(&self) -> bool {
        self.populate
    }

    /// The engine a marker built from this config will use.
    #[must_use]
    pub fn selected_engine(&self) -> EngineKind {
        self.engine.unwrap_or_else(engine_kind)
    }

    /// Builds a marker covering `size` bytes from `begin`.
    ///
    /// # Errors
    ///
    /// See [`AnyMarker::with_config`].
    pub fn build(&self, begin: usize, size: usize) -> Result<AnyMarker> {
        AnyMarker::with_config(self, begin, size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = MarkerConfig::default();
        assert_eq!(config, MarkerConfig::new());
        assert!(!config.is_populate());
        assert_eq!(config.selected_engine(), engine_kind());
        assert_eq!(config.forced_engine(), None);
    }

    #[test]
    fn test_forced_engine_round_trip() {
        let config = MarkerConfig::new().engine(EngineKind::Generic).populate(true);
        assert_eq!(config.selected_engine(), EngineKind::Generic);
        assert!(config.is_populate());
        assert_eq!(config.forced_engine(), Some(EngineKind::Generic));
        assert_eq!(config.clone().auto_engine().forced_engine(), None);
        assert_eq!(config.auto_engine().selected_engine(), engine_kind());
    }
}
