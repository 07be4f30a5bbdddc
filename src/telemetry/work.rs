//! Span helpers for pushes and worker runs.
//!
//! Every span carries the emitting process id so interleaved output from
//! producers and the detached worker can be told apart.

use std::path::Path;

use tracing::Span;

use crate::model::{EntryId, WorkerState};

/// Span covering one `push` call.
pub fn start_push_span(path: &Path) -> Span {
    tracing::info_span!(
        "queue.push",
        pid = std::process::id(),
        db = %path.display(),
    )
}

/// Span covering a worker's whole lifetime.
///
/// The `worker.state` field is declared empty and updated via
/// [`record_transition`].
pub fn start_worker_span(path: &Path) -> Span {
    tracing::info_span!(
        "queue.worker",
        pid = std::process::id(),
        db = %path.display(),
        worker.state = tracing::field::Empty,
    )
}

/// Span covering the processing of one backlog entry.
pub fn start_item_span(id: EntryId) -> Span {
    tracing::info_span!("queue.item", entry = %id)
}

/// Record a lifecycle transition on the worker span.
pub fn record_transition(span: &Span, from: WorkerState, to: WorkerState) {
    span.record("worker.state", tracing::field::display(to));
    span.in_scope(|| {
        tracing::debug!(%from, %to, "state_transition");
    });
}
