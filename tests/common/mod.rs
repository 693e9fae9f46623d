//! Shared in-memory collaborators for integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::NaiveDate;
use serde_json::{Value, json};

use fieldwork::db::queue::DispatchQueue;
use fieldwork::db::results::ResultStore;
use fieldwork::error::{Error, Result};
use fieldwork::model::{ResultRecord, WorkIdentity, WorkItem, WorkKind};
use fieldwork::source::{
    AuthToken, Credentials, EligibleTask, FinalizeAck, Submission, TaskSource,
};

pub fn credentials(username: &str) -> Credentials {
    Credentials {
        username: username.to_string(),
        password: secrecy::SecretString::from("hunter2"),
    }
}

pub fn detail_item(subject: &str) -> WorkItem {
    let identity = WorkIdentity::new(
        subject,
        NaiveDate::from_ymd_opt(2025, 11, 10).unwrap(),
        NaiveDate::from_ymd_opt(2025, 11, 11).unwrap(),
    );
    WorkItem::new(WorkKind::Detail, identity, BTreeMap::new(), "claim-1")
}

/// A payload passing the detail completeness predicate.
pub fn complete_detail_payload() -> Value {
    json!({
        "rooms": [{"name": "Twin", "priceInfo": {"amount": 420}}],
        "totalPriceInfo": {"amount": 420},
        "artifacts": {"slot-1": ["oss/a.png"]}
    })
}

/// Present but structurally incomplete: rooms exist, none priced.
pub fn incomplete_detail_payload() -> Value {
    json!({ "rooms": [{"name": "Twin"}] })
}

pub fn sentinel_payload() -> Value {
    json!({ "code": 305, "msg": "upstream infrastructure failure" })
}

// ---------------------------------------------------------------------------
// Scripted task source
// ---------------------------------------------------------------------------

/// Hands out a fixed sequence of work items and records every cancel and
/// finalize call.
pub struct ScriptedSource {
    items: Mutex<VecDeque<WorkItem>>,
    pub cancelled: Mutex<Vec<(String, String)>>,
    pub finalized: Mutex<Vec<Submission>>,
    pub logins: AtomicUsize,
    /// Number of leading login attempts to reject.
    pub failing_logins: AtomicUsize,
    /// Number of leading `running_claims` calls that panic (supervisor
    /// crash-restart tests).
    pub panicking_polls: AtomicUsize,
    /// When set, only sessions for this account consume panics.
    pub panic_account: Mutex<Option<String>>,
    /// Finalize verdict to return.
    pub finalize_ack: Mutex<FinalizeAck>,
}

impl ScriptedSource {
    pub fn new(items: Vec<WorkItem>) -> Self {
        Self {
            items: Mutex::new(items.into()),
            cancelled: Mutex::new(Vec::new()),
            finalized: Mutex::new(Vec::new()),
            logins: AtomicUsize::new(0),
            failing_logins: AtomicUsize::new(0),
            panicking_polls: AtomicUsize::new(0),
            panic_account: Mutex::new(None),
            finalize_ack: Mutex::new(FinalizeAck::Accepted),
        }
    }

    fn pending(&self) -> usize {
        self.items.lock().unwrap().len()
    }
}

#[async_trait]
impl TaskSource for ScriptedSource {
    async fn login(&self, credentials: &Credentials) -> Result<AuthToken> {
        self.logins.fetch_add(1, Ordering::SeqCst);
        if self
            .failing_logins
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Auth("bad credentials".to_string()));
        }
        // Token carries the username so scripted behavior can target one
        // account when the source is shared by a fleet.
        Ok(AuthToken::new(credentials.username.clone()))
    }

    async fn list_eligible(&self, _token: &AuthToken) -> Result<Vec<EligibleTask>> {
        if self.pending() == 0 {
            return Ok(Vec::new());
        }
        Ok(vec![EligibleTask {
            task_set_id: "set-1".to_string(),
            name: "survey".to_string(),
            kind: WorkKind::Detail,
            remaining: self.pending() as u32,
            resuming: false,
        }])
    }

    async fn running_claims(&self, token: &AuthToken) -> Result<Vec<EligibleTask>> {
        let targeted = match self.panic_account.lock().unwrap().as_deref() {
            Some(account) => account == token.as_str(),
            None => true,
        };
        if targeted
            && self
                .panicking_polls
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            panic!("injected poll crash");
        }
        Ok(Vec::new())
    }

    async fn acquire(&self, _token: &AuthToken, _task: &EligibleTask) -> Result<Option<WorkItem>> {
        Ok(self.items.lock().unwrap().pop_front())
    }

    async fn cancel(&self, _token: &AuthToken, claim_id: &str, reason: &str) -> Result<()> {
        self.cancelled
            .lock()
            .unwrap()
            .push((claim_id.to_string(), reason.to_string()));
        Ok(())
    }

    async fn finalize(&self, _token: &AuthToken, submission: &Submission) -> Result<FinalizeAck> {
        self.finalized.lock().unwrap().push(submission.clone());
        Ok(self.finalize_ack.lock().unwrap().clone())
    }
}

// ---------------------------------------------------------------------------
// In-memory queue
// ---------------------------------------------------------------------------

/// Records pushed items; can reject a leading number of pushes.
pub struct MemoryQueue {
    pub pushed: Mutex<Vec<WorkItem>>,
    pub failing_pushes: AtomicUsize,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self {
            pushed: Mutex::new(Vec::new()),
            failing_pushes: AtomicUsize::new(0),
        }
    }

    pub fn push_count(&self) -> usize {
        self.pushed.lock().unwrap().len()
    }
}

#[async_trait]
impl DispatchQueue for MemoryQueue {
    async fn push(&self, item: &WorkItem) -> Result<i64> {
        if self
            .failing_pushes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Other("broker unavailable".to_string()));
        }
        let mut pushed = self.pushed.lock().unwrap();
        pushed.push(item.clone());
        Ok(pushed.len() as i64)
    }
}

// ---------------------------------------------------------------------------
// Scripted result store
// ---------------------------------------------------------------------------

/// Serves a fixed sequence of fetch responses, then a steady-state default.
pub struct ScriptedStore {
    script: Mutex<VecDeque<Option<Value>>>,
    default: Option<Value>,
    pub failing_fetches: AtomicUsize,
    pub fetches: AtomicUsize,
    /// Observation dates seen by `fetch`, in call order.
    pub fetched_dates: Mutex<Vec<NaiveDate>>,
}

impl ScriptedStore {
    /// `script` is served first, one entry per fetch; afterwards every
    /// fetch returns `default`.
    pub fn new(script: Vec<Option<Value>>, default: Option<Value>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            default,
            failing_fetches: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
            fetched_dates: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new(), None)
    }
}

#[async_trait]
impl ResultStore for ScriptedStore {
    async fn fetch(
        &self,
        kind: WorkKind,
        identity: &str,
        observed_on: NaiveDate,
    ) -> Result<Option<ResultRecord>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.fetched_dates.lock().unwrap().push(observed_on);
        if self
            .failing_fetches
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(Error::Other("store unavailable".to_string()));
        }
        let payload = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.default.clone());
        Ok(payload.map(|payload| ResultRecord {
            kind,
            identity: identity.to_string(),
            observed_on,
            produced_at: chrono::Utc::now(),
            payload,
        }))
    }
}
