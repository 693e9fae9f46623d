//! Metric instrument factories for fieldwork.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"fieldwork"` meter.

use opentelemetry::metrics::{Counter, Meter};

/// Returns the shared meter for fieldwork instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("fieldwork")
}

/// Counter: work items dispatched to the capture pool.
/// Labels: `kind`.
pub fn work_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("fieldwork.work.dispatched")
        .with_description("Work items pushed to a dispatch queue")
        .build()
}

/// Counter: correlated results by final classification.
/// Labels: `kind`, `outcome`.
pub fn results_correlated() -> Counter<u64> {
    meter()
        .u64_counter("fieldwork.results.correlated")
        .with_description("Correlated results by outcome")
        .build()
}

/// Counter: dedup guard admissions.
/// Labels: `kind`, `result` ("admitted" | "rejected").
pub fn dedup_admissions() -> Counter<u64> {
    meter()
        .u64_counter("fieldwork.dedup.admissions")
        .with_description("Dedup guard admission attempts")
        .build()
}

/// Counter: queue-level operations (create, send, read, archive).
/// Labels: `queue`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("fieldwork.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Counter: orchestrator phase transitions.
/// Labels: `account`, `from`, `to`.
pub fn phase_transitions() -> Counter<u64> {
    meter()
        .u64_counter("fieldwork.orchestrator.phase_transitions")
        .with_description("Orchestrator state-machine transitions")
        .build()
}

/// Counter: work items finalized against their claim.
/// Labels: `kind`, `result` ("accepted" | "rejected").
pub fn items_finalized() -> Counter<u64> {
    meter()
        .u64_counter("fieldwork.items.finalized")
        .with_description("Work items submitted to the task source")
        .build()
}

/// Counter: work items abandoned (claim cancelled).
/// Labels: `kind`.
pub fn items_abandoned() -> Counter<u64> {
    meter()
        .u64_counter("fieldwork.items.abandoned")
        .with_description("Work items abandoned after sentinel or exhausted retries")
        .build()
}

/// Counter: in-session restarts after unexpected errors.
/// Labels: `account`.
pub fn session_restarts() -> Counter<u64> {
    meter()
        .u64_counter("fieldwork.orchestrator.session_restarts")
        .with_description("Account sessions restarted after unexpected errors")
        .build()
}

/// Counter: whole account loops restarted by the supervisor.
/// Labels: `account`.
pub fn account_restarts() -> Counter<u64> {
    meter()
        .u64_counter("fieldwork.supervisor.account_restarts")
        .with_description("Account loops restarted by the supervisor")
        .build()
}
