//! Core data model.
//!
//! A work item is one claimed unit of survey work. It has identity
//! (kind + composite key), opaque parameters for the capture pool, the
//! platform claim reference, and bounded attempt state.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::{Error, Result};

/// Default attempt ceiling before a work item is abandoned.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 4;

/// Reserved status code meaning the capture pool itself failed in a way
/// retrying cannot fix. Short-circuits all remaining retries.
pub const SENTINEL_ABANDON_CODE: i64 = 305;

/// Upstream error codes that mark a payload incomplete. A payload carrying
/// one of these never classifies as success.
pub const UPSTREAM_ERROR_CODES: [i64; 5] = [301, 303, 304, 306, 307];

// ---------------------------------------------------------------------------
// Work Kind
// ---------------------------------------------------------------------------

/// Category of work. Determines which dispatch queue, which result
/// partition, and which completeness predicate apply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    /// Room-detail capture for one hotel and stay window.
    Detail,
    /// List-page capture.
    List,
}

impl WorkKind {
    /// Name of the pgmq queue carrying this kind.
    pub fn queue_name(self) -> &'static str {
        match self {
            WorkKind::Detail => "detail_dispatch",
            WorkKind::List => "list_dispatch",
        }
    }

    /// Result store partition for this kind.
    pub fn collection(self) -> &'static str {
        match self {
            WorkKind::Detail => "detail_results",
            WorkKind::List => "list_results",
        }
    }
}

impl std::fmt::Display for WorkKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkKind::Detail => "detail",
            WorkKind::List => "list",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for WorkKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "detail" => Ok(WorkKind::Detail),
            "list" => Ok(WorkKind::List),
            other => Err(Error::UnknownKind(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// Work Identity
// ---------------------------------------------------------------------------

/// Deterministic composite key for one unit of work: the surveyed subject
/// plus its stay window. Used for dedup admission and result correlation.
///
/// Being a struct (not a map), field order can never affect equality or
/// the rendered key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkIdentity {
    /// Subject of the survey (hotel name).
    pub subject: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

impl WorkIdentity {
    pub fn new(subject: impl Into<String>, period_start: NaiveDate, period_end: NaiveDate) -> Self {
        Self {
            subject: subject.into(),
            period_start,
            period_end,
        }
    }

    /// The rendered correlation key, e.g. `H1|2025-11-10|2025-11-11`.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

impl std::fmt::Display for WorkIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}|{}|{}",
            self.subject, self.period_start, self.period_end
        )
    }
}

// ---------------------------------------------------------------------------
// Work Item
// ---------------------------------------------------------------------------

/// A claimed unit of work flowing through the dispatch pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkItem {
    pub kind: WorkKind,
    pub identity: WorkIdentity,

    /// Semantic fields for the capture pool. Opaque to the orchestrator —
    /// passed through verbatim. A sorted map so the canonical encoding
    /// never depends on insertion order.
    pub parameters: BTreeMap<String, serde_json::Value>,

    /// Platform claim reference, required to finalize or cancel.
    pub claim_id: String,

    /// Dispatch attempts consumed so far. Starts at 0.
    pub attempt: u32,

    /// Attempt ceiling. Exceeding it forces a terminal abandon.
    pub max_attempts: u32,
}

impl WorkItem {
    pub fn new(
        kind: WorkKind,
        identity: WorkIdentity,
        parameters: BTreeMap<String, serde_json::Value>,
        claim_id: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            identity,
            parameters,
            claim_id: claim_id.into(),
            attempt: 0,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.max_attempts = n;
        self
    }

    /// Canonical wire encoding: struct fields in declaration order,
    /// parameter keys sorted. Two logically identical items always encode
    /// to identical bytes, so downstream content-hash dedup stays coherent.
    pub fn canonical_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// True once every allowed attempt has been consumed.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

// ---------------------------------------------------------------------------
// Result Record
// ---------------------------------------------------------------------------

/// One deposited result, keyed by `(kind, identity, observed_on)`. Written
/// by the capture pool; read-only from the orchestrator's side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub kind: WorkKind,
    /// Rendered correlation key of the originating work item.
    pub identity: String,
    /// Observation date — together with `produced_at` disambiguates
    /// same-day re-runs (the latest write wins).
    pub observed_on: NaiveDate,
    pub produced_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Classification of a raw result.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// Payload passed the kind's structural completeness check. Carries the
    /// payload for downstream finalization.
    Success(serde_json::Value),
    /// Payload carries the reserved sentinel code — the capture pool failed
    /// terminally for this item. Retrying will not help.
    SentinelAbandon,
    /// Payload present but malformed or incomplete. Retryable.
    SoftFail,
    /// No terminal result appeared before the correlation deadline.
    /// Produced only by the correlator, never by the classifier.
    Timeout,
}

impl Outcome {
    /// Terminal outcomes end the await loop immediately.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Outcome::Success(_) | Outcome::SentinelAbandon)
    }

    /// Short label for logs and metrics.
    pub fn label(&self) -> &'static str {
        match self {
            Outcome::Success(_) => "success",
            Outcome::SentinelAbandon => "sentinel_abandon",
            Outcome::SoftFail => "soft_fail",
            Outcome::Timeout => "timeout",
        }
    }
}
