//! Structured logging for marker lifecycle events.
//!
//! Compiled only with the `tracing` feature. Marking and querying never log;
//! only construction, engine selection and clears do.

use std::io;
use std::time::Duration;

use sys_alloc::Advice;
use tracing::Span;

use crate::capability::EngineKind;
use crate::region::Zone;

/// Log which engine was chosen and why.
pub fn log_engine_selected(kind: EngineKind, source: &str) {
    tracing::debug!(engine = kind.name(), source = source, "engine_selected");
}

/// Log a newly built marker.
pub fn log_marker_created(zone: Zone, storage_len: usize, kind: EngineKind) {
    tracing::debug!(
        begin = zone.begin(),
        end = zone.end(),
        storage_len = storage_len,
        engine = kind.name(),
        "marker_created"
    );
}

/// Create a span covering one bulk clear.
pub fn span_clear(kind: EngineKind, storage_len: usize) -> Span {
    tracing::debug_span!("mark_clear", engine = kind.name(), storage_len = storage_len)
}

/// Log the end of a session reset.
#[allow(clippy::cast_possible_truncation)]
pub fn log_clear_finished(pass: u64, elapsed: Duration) {
    tracing::debug!(
        pass = pass,
        elapsed_us = elapsed.as_micros() as u64,
        "clear_finished"
    );
}

/// Log an advisory hint the kernel rejected.
pub fn log_advise_failed(advice: Advice, err: &io::Error) {
    tracing::warn!(advice = ?advice, error = %err, "madvise_failed");
}
