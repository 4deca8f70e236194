//! Host capability detection and engine selection.
//!
//! The engine is picked once, when a marker is built, and never changes for
//! that marker's lifetime. Detection results are cached process-wide.

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

static DETECTED: OnceLock<EngineKind> = OnceLock::new();

/// Identifies a mark/clear engine implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineKind {
    /// Portable compare-exchange loops and a plain zero fill.
    Generic,
    /// `lock`-prefixed x86 instructions, plain zero fill.
    X86,
    /// x86 mark operations with SSE2 non-temporal clearing.
    Sse2,
    /// x86 mark operations with AVX non-temporal clearing.
    Avx,
    /// AArch64 exclusive-monitor loops, plain zero fill.
    Aarch64,
    /// AArch64 mark operations with NEON vector clearing.
    Neon,
}

impl EngineKind {
    /// Every engine, in no particular order.
    pub const ALL: [Self; 6] = [
        Self::Generic,
        Self::X86,
        Self::Sse2,
        Self::Avx,
        Self::Aarch64,
        Self::Neon,
    ];

    /// Short lowercase name, also accepted by [`FromStr`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::X86 => "x86",
            Self::Sse2 => "sse2",
            Self::Avx => "avx",
            Self::Aarch64 => "aarch64",
            Self::Neon => "neon",
        }
    }

    /// Whether this engine was compiled in and the running CPU supports it.
    ///
    /// Under Miri only [`EngineKind::Generic`] is available, since the
    /// others rely on inline assembly or vendor intrinsics.
    #[must_use]
    pub fn is_available(self) -> bool {
        match self {
            Self::Generic => true,
            #[cfg(all(any(target_arch = "x86", target_arch = "x86_64"), not(miri)))]
            Self::X86 => true,
            #[cfg(all(any(target_arch = "x86", target_arch = "x86_64"), not(miri)))]
            Self::Sse2 => std::arch::is_x86_feature_detected!("sse2"),
            #[cfg(all(any(target_arch = "x86", target_arch = "x86_64"), not(miri)))]
            Self::Avx => std::arch::is_x86_feature_detected!("avx"),
            #[cfg(all(target_arch = "aarch64", not(miri)))]
            Self::Aarch64 => true,
            #[cfg(all(target_arch = "aarch64", not(miri)))]
            Self::Neon => std::arch::is_aarch64_feature_detected!("neon"),
            #[allow(unreachable_patterns)]
            _ => false,
        }
    }

    /// Detects the best engine for the running CPU.
    ///
    /// Vector clearing beats scalar clearing, and any architecture-specific
    /// engine beats [`EngineKind::Generic`].
    #[must_use]
    pub fn detect() -> Self {
        [Self::Avx, Self::Sse2, Self::X86, Self::Neon, Self::Aarch64]
            .into_iter()
            .find(|kind| kind.is_available())
            .unwrap_or(Self::Generic)
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error returned when parsing an unknown engine name.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown mark engine `{0}`")]
pub struct ParseEngineKindError(String);

impl FromStr for EngineKind {
    type Err = ParseEngineKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| ParseEngineKindError(s.to_owned()))
    }
}

/// Returns the engine detected for this process, computed on first use.
#[inline]
pub fn engine_kind() -> EngineKind {
    *DETECTED.get_or_init(|| {
        let kind = EngineKind::detect();
        #[cfg(feature = "tracing")]
        crate::tracing::log_engine_selected(kind, "detected");
        kind
    })
}
