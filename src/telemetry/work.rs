//! Work item span helpers.
//!
//! One span wraps each work item from admission to its terminal decision;
//! phase transitions are recorded as events plus a counter.

use tracing::Span;

use super::metrics;
use crate::model::WorkKind;
use crate::orchestrator::Phase;
use opentelemetry::KeyValue;

/// Start a span covering one work item's life cycle.
pub fn start_item_span(account: &str, kind: WorkKind, identity: &str) -> Span {
    tracing::info_span!(
        "work.item",
        "work.account" = account,
        "work.kind" = %kind,
        "work.identity" = identity,
    )
}

/// Record an orchestrator phase transition.
pub fn record_phase(account: &str, from: Phase, to: Phase) {
    tracing::info!(account, %from, %to, "phase transition");
    metrics::phase_transitions().add(
        1,
        &[
            KeyValue::new("account", account.to_string()),
            KeyValue::new("from", from.to_string()),
            KeyValue::new("to", to.to_string()),
        ],
    );
}
