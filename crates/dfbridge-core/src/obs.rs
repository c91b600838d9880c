//! Structured observability hooks for batch lifecycle events.
//!
//! Events are emitted at `info!` level, failures at `warn!`; filter with
//! `DFBRIDGE_LOG` (or `RUST_LOG`).

use tracing::{info, warn};

/// Span covering one batch; attach with `tracing::Instrument`.
///
/// Every event emitted inside carries `collection` and `verb`.
pub fn batch_span(collection: &str, verb: &str) -> tracing::Span {
    tracing::info_span!("dfbridge.batch", collection = %collection, verb = %verb)
}

/// Emit event: a batch of `units` started against `collection`.
pub fn emit_batch_started(collection: &str, verb: &str, units: usize, rollback: bool, cont: bool) {
    info!(
        event = "batch.started",
        collection = %collection,
        verb = %verb,
        units = units,
        rollback = rollback,
        continue_on_error = cont,
    );
}

/// Emit event: queued units were dispatched in one bulk call.
pub fn emit_batch_committed(collection: &str, verb: &str, records: usize) {
    info!(
        event = "batch.committed",
        collection = %collection,
        verb = %verb,
        records = records,
    );
}

/// Emit event: the batch finished with `failed` of `units` failing.
pub fn emit_batch_finished(collection: &str, verb: &str, units: usize, failed: usize) {
    info!(
        event = "batch.finished",
        collection = %collection,
        verb = %verb,
        units = units,
        failed = failed,
    );
}

/// Emit event: one unit failed (warning level).
pub fn emit_unit_failed(collection: &str, verb: &str, index: usize, error: &dyn std::fmt::Display) {
    warn!(
        event = "batch.unit_failed",
        collection = %collection,
        verb = %verb,
        index = index,
        error = %error,
    );
}

/// Emit event: completed units were undone.
pub fn emit_batch_rolled_back(collection: &str, verb: &str, records: usize, complete: bool) {
    info!(
        event = "batch.rolled_back",
        collection = %collection,
        verb = %verb,
        records = records,
        complete = complete,
    );
}

/// Emit event: an undo step failed and was skipped (warning level).
pub fn emit_rollback_failed(collection: &str, error: &dyn std::fmt::Display) {
    warn!(event = "batch.rollback_failed", collection = %collection, error = %error);
}
