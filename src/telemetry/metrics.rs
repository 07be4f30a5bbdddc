//! Metric instrument factories for lowq.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Instruments are no-ops until the embedding application installs one.

use opentelemetry::metrics::{Counter, Meter};

/// Returns the shared meter for lowq instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("lowq")
}

/// Counter: work items pushed.
/// Labels: `result` ("ok" | "duplicate").
pub fn work_pushed() -> Counter<u64> {
    meter()
        .u64_counter("lowq.work.pushed")
        .with_description("Number of work items pushed")
        .build()
}

/// Counter: backlog entries handed to the processor.
/// Labels: `result` ("ok" | "error").
pub fn work_processed() -> Counter<u64> {
    meter()
        .u64_counter("lowq.work.processed")
        .with_description("Number of backlog entries processed")
        .build()
}

/// Counter: status marker claim attempts.
/// Labels: `result` ("active" | "lost_race").
pub fn worker_claims() -> Counter<u64> {
    meter()
        .u64_counter("lowq.worker.claims")
        .with_description("Number of worker claim attempts")
        .build()
}

/// Counter: storage statements retried after a busy or locked failure.
/// Labels: `statement`.
pub fn storage_retries() -> Counter<u64> {
    meter()
        .u64_counter("lowq.storage.retries")
        .with_description("Number of storage retries after transient failures")
        .build()
}
