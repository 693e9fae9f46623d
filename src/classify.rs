//! Outcome classification.
//!
//! Pure function over a parsed payload — no I/O, no timing. The correlator
//! owns polling; this module only decides what a deposited payload means.
//!
//! Completeness is a pluggable structural predicate per kind, evaluated
//! over parsed JSON rather than substring search on the serialized blob.

use std::collections::HashMap;

use serde_json::Value;
use tracing::warn;

use crate::model::{Outcome, SENTINEL_ABANDON_CODE, UPSTREAM_ERROR_CODES, WorkKind};

/// Kind-specific structural completeness check. Owned by the collaborator
/// that knows the payload semantics; the classifier only evaluates it.
pub type CompletenessCheck = Box<dyn Fn(&Value) -> bool + Send + Sync>;

/// Assigns one of the fixed outcome kinds to a raw result payload.
pub struct OutcomeClassifier {
    checks: HashMap<WorkKind, CompletenessCheck>,
}

impl OutcomeClassifier {
    /// Classifier with no registered predicates. Payloads for unknown kinds
    /// soft-fail (retries stay bounded by the attempt ceiling).
    pub fn new() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    /// Classifier preloaded with the built-in detail and list predicates.
    pub fn with_default_checks() -> Self {
        let mut classifier = Self::new();
        classifier.register(WorkKind::Detail, Box::new(detail_complete));
        classifier.register(WorkKind::List, Box::new(list_complete));
        classifier
    }

    /// Register (or replace) the completeness check for a kind.
    pub fn register(&mut self, kind: WorkKind, check: CompletenessCheck) {
        self.checks.insert(kind, check);
    }

    /// Classify a raw payload.
    ///
    /// The sentinel check runs first: a sentinel code inside an otherwise
    /// complete-looking payload still means abandon. Explicit error markers
    /// and upstream error codes come next, then the kind predicate.
    pub fn classify(&self, kind: WorkKind, payload: &Value) -> Outcome {
        match status_code(payload) {
            Some(SENTINEL_ABANDON_CODE) => return Outcome::SentinelAbandon,
            Some(code) if UPSTREAM_ERROR_CODES.contains(&code) => return Outcome::SoftFail,
            _ => {}
        }

        // Explicit error/exception flag from the capture pool.
        if payload.get("error").is_some_and(|e| !e.is_null()) {
            return Outcome::SoftFail;
        }

        match self.checks.get(&kind) {
            Some(check) if check(payload) => Outcome::Success(payload.clone()),
            Some(_) => Outcome::SoftFail,
            None => {
                warn!(%kind, "no completeness check registered, treating result as incomplete");
                Outcome::SoftFail
            }
        }
    }
}

impl Default for OutcomeClassifier {
    fn default() -> Self {
        Self::with_default_checks()
    }
}

fn status_code(payload: &Value) -> Option<i64> {
    payload.get("code").and_then(Value::as_i64)
}

/// Detail capture is complete when the payload carries a non-empty room
/// list with at least one priced room, plus the aggregate price block.
/// An empty-but-present `rooms` array is incomplete.
fn detail_complete(payload: &Value) -> bool {
    let Some(rooms) = payload.get("rooms").and_then(Value::as_array) else {
        return false;
    };
    let priced = rooms
        .iter()
        .any(|room| room.get("priceInfo").is_some_and(|p| !p.is_null()));
    priced && payload.get("totalPriceInfo").is_some_and(Value::is_object)
}

/// List capture is complete when any room carries a post-tip price, or the
/// hotel is explicitly flagged sold out (an empty listing is then valid).
fn list_complete(payload: &Value) -> bool {
    if payload.get("soldOut").and_then(Value::as_bool) == Some(true) {
        return true;
    }
    payload
        .get("rooms")
        .and_then(Value::as_array)
        .is_some_and(|rooms| {
            rooms
                .iter()
                .any(|room| room.get("tipAfterPrice").is_some_and(|p| !p.is_null()))
        })
}
