//! In-flight admission guard.
//!
//! Process-wide registry of work-item identities currently in the dispatch
//! pipeline. At most one work item per `(kind, identity)` is admitted at any
//! instant. Owned by the supervisor and injected into each orchestrator —
//! no module-level globals.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use crate::model::WorkKind;
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Mutex-guarded set of in-flight `(kind, identity)` pairs. Safe for
/// concurrent calls from orchestrators on separate tasks. No cross-process
/// guarantee — each kind is owned by one orchestrating process.
#[derive(Debug, Default)]
pub struct DedupGuard {
    in_flight: Mutex<HashSet<(WorkKind, String)>>,
}

impl DedupGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically insert the key if absent. Returns whether insertion
    /// succeeded. A caller that fails to admit must not dispatch.
    pub fn try_admit(&self, kind: WorkKind, identity: &str) -> bool {
        let mut set = self.in_flight.lock().expect("dedup guard poisoned");
        let admitted = set.insert((kind, identity.to_string()));
        metrics::dedup_admissions().add(
            1,
            &[
                KeyValue::new("kind", kind.to_string()),
                KeyValue::new("result", if admitted { "admitted" } else { "rejected" }),
            ],
        );
        admitted
    }

    /// Remove the key unconditionally.
    pub fn release(&self, kind: WorkKind, identity: &str) {
        let mut set = self.in_flight.lock().expect("dedup guard poisoned");
        set.remove(&(kind, identity.to_string()));
    }

    /// Number of currently admitted identities.
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.lock().expect("dedup guard poisoned").len()
    }
}

/// RAII admission token. Dropping it releases the underlying entry.
#[derive(Debug)]
pub struct AdmitPermit {
    guard: Arc<DedupGuard>,
    kind: WorkKind,
    identity: String,
}

impl AdmitPermit {
    /// Try to admit, returning a permit that releases exactly once on
    /// drop. Covers the release invariant on early-return and panic paths.
    pub fn acquire(guard: &Arc<DedupGuard>, kind: WorkKind, identity: &str) -> Option<Self> {
        if guard.try_admit(kind, identity) {
            Some(Self {
                guard: Arc::clone(guard),
                kind,
                identity: identity.to_string(),
            })
        } else {
            None
        }
    }
}

impl Drop for AdmitPermit {
    fn drop(&mut self) {
        self.guard.release(self.kind, &self.identity);
    }
}
