//! Task source collaborator: the crowd-work platform that owns claims.
//!
//! The orchestrator only needs the trait; the HTTP client here speaks the
//! platform's JSON envelope. Eligibility filtering (quota, daily limits,
//! recognized kinds) is this module's responsibility — the orchestrator
//! treats the returned tasks as opaque eligible work.

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::NaiveDate;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::model::{WorkIdentity, WorkItem, WorkKind};

/// Login credentials for one worker account.
#[derive(Debug, Clone, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// Opaque session token returned by login.
#[derive(Debug, Clone)]
pub struct AuthToken(String);

impl AuthToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// One claimable task set, already filtered for eligibility.
#[derive(Debug, Clone)]
pub struct EligibleTask {
    pub task_set_id: String,
    pub name: String,
    pub kind: WorkKind,
    pub remaining: u32,
    /// True when this entry resumes an already-claimed task rather than
    /// claiming a fresh one.
    pub resuming: bool,
}

/// Finalization payload: claim reference plus artifact keys per slot.
#[derive(Debug, Clone)]
pub struct Submission {
    pub claim_id: String,
    pub artifacts: BTreeMap<String, Vec<String>>,
}

/// Platform verdict on a finalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FinalizeAck {
    Accepted,
    /// Submission rejected (stale claim, slot mismatch). The claim should
    /// be cancelled best-effort.
    Rejected { reason: String },
}

/// External owner of claims. All methods are fallible network calls;
/// transient failures surface as errors and are retried by the caller's
/// state machine, never inside this trait.
#[async_trait]
pub trait TaskSource: Send + Sync {
    async fn login(&self, credentials: &Credentials) -> Result<AuthToken>;

    /// Task sets this account could claim right now.
    async fn list_eligible(&self, token: &AuthToken) -> Result<Vec<EligibleTask>>;

    /// Claims already held by this account (resumed before new work).
    async fn running_claims(&self, token: &AuthToken) -> Result<Vec<EligibleTask>>;

    /// Claim one unit from a task set and resolve it into a work item.
    /// `None` when the set had nothing left to hand out today.
    async fn acquire(&self, token: &AuthToken, task: &EligibleTask) -> Result<Option<WorkItem>>;

    /// Best-effort claim cancellation.
    async fn cancel(&self, token: &AuthToken, claim_id: &str, reason: &str) -> Result<()>;

    /// Submit the finished work against its claim.
    async fn finalize(&self, token: &AuthToken, submission: &Submission) -> Result<FinalizeAck>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Platform JSON envelope: `{success, code, msg, data}`. Missing fields
/// deserialize as `None`; no `Default` bound on the payload type.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: Option<bool>,
    code: Option<i64>,
    msg: Option<String>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn ok(&self) -> bool {
        self.code == Some(200) || self.success == Some(true)
    }

    fn message(&self) -> String {
        self.msg.clone().unwrap_or_else(|| "no message".to_string())
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTaskSet {
    id: serde_json::Value,
    #[serde(default)]
    task_name: String,
    #[serde(default)]
    task_type: String,
    #[serde(default)]
    valid_task_num: u32,
    #[serde(default)]
    day_task_num_limit: u32,
    #[serde(default)]
    claim_task_num: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClaim {
    claim_id: Option<String>,
    subject: Option<String>,
    period_start: Option<NaiveDate>,
    period_end: Option<NaiveDate>,
    #[serde(default)]
    slots: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClaimRecord {
    task_set_id: serde_json::Value,
    #[serde(default)]
    task_name: String,
    #[serde(default)]
    task_type: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawClaimRecordPage {
    #[serde(default)]
    claim_records: Vec<RawClaimRecord>,
}

/// reqwest-backed [`TaskSource`] against the platform's `/task/*` API.
pub struct HttpTaskSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTaskSource {
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn map_kind(task_type: &str) -> Option<WorkKind> {
        match task_type {
            "ROOM_DETAIL_CAPTURE" => Some(WorkKind::Detail),
            "LIST_PAGE_CAPTURE" => Some(WorkKind::List),
            _ => None,
        }
    }
}

#[async_trait]
impl TaskSource for HttpTaskSource {
    async fn login(&self, credentials: &Credentials) -> Result<AuthToken> {
        let resp: Envelope<String> = self
            .client
            .post(self.url("/task/login"))
            .json(&json!({
                "username": credentials.username,
                "password": credentials.password.expose_secret(),
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if resp.ok() {
            match resp.data {
                Some(token) => Ok(AuthToken(token)),
                None => Err(Error::Auth("login returned no token".to_string())),
            }
        } else {
            Err(Error::Auth(resp.message()))
        }
    }

    async fn list_eligible(&self, token: &AuthToken) -> Result<Vec<EligibleTask>> {
        let resp: Envelope<Vec<RawTaskSet>> = self
            .client
            .get(self.url("/task/listTask"))
            .query(&[("token", token.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !resp.ok() {
            return Err(Error::TaskSource(resp.message()));
        }

        let eligible = resp
            .data
            .unwrap_or_default()
            .into_iter()
            .filter_map(|raw| {
                let kind = Self::map_kind(&raw.task_type)?;
                let under_daily_limit = raw.claim_task_num < raw.day_task_num_limit;
                if raw.valid_task_num > 0 && under_daily_limit {
                    Some(EligibleTask {
                        task_set_id: scalar_to_string(&raw.id),
                        name: raw.task_name,
                        kind,
                        remaining: raw.valid_task_num,
                        resuming: false,
                    })
                } else {
                    None
                }
            })
            .collect();
        Ok(eligible)
    }

    async fn running_claims(&self, token: &AuthToken) -> Result<Vec<EligibleTask>> {
        let resp: Envelope<RawClaimRecordPage> = self
            .client
            .get(self.url("/task/claimRecords"))
            .query(&[
                ("type", "today"),
                ("claimStatus", "CLAIMED"),
                ("pageSize", "10"),
                ("pageNo", "1"),
                ("token", token.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !resp.ok() {
            return Err(Error::TaskSource(resp.message()));
        }

        let running = resp
            .data
            .map(|page| page.claim_records)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|raw| {
                let kind = Self::map_kind(&raw.task_type)?;
                Some(EligibleTask {
                    task_set_id: scalar_to_string(&raw.task_set_id),
                    name: raw.task_name,
                    kind,
                    remaining: 1,
                    resuming: true,
                })
            })
            .collect();
        Ok(running)
    }

    async fn acquire(&self, token: &AuthToken, task: &EligibleTask) -> Result<Option<WorkItem>> {
        // Resuming re-queries the held claim instead of claiming again.
        let path = if task.resuming {
            "/task/queryClaimedTask"
        } else {
            "/task/claimTask"
        };
        let resp: Envelope<RawClaim> = self
            .client
            .get(self.url(path))
            .query(&[("taskSetId", task.task_set_id.as_str()), ("token", token.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !resp.ok() {
            // "nothing left to claim today" is an empty acquire, not an error
            if resp.message().contains("nothing to claim") {
                return Ok(None);
            }
            return Err(Error::TaskSource(resp.message()));
        }

        let raw = match resp.data {
            Some(raw) => raw,
            None => return Ok(None),
        };

        // Resolution: the claim must carry enough to build the composite
        // identity, otherwise the caller logs and re-acquires without
        // consuming the claim twice.
        let claim_id = raw
            .claim_id
            .ok_or_else(|| Error::Resolution("claim id missing".to_string()))?;
        let subject = raw
            .subject
            .filter(|s| !s.is_empty())
            .ok_or_else(|| Error::Resolution("subject missing".to_string()))?;
        let period_start = raw
            .period_start
            .ok_or_else(|| Error::Resolution("period start missing".to_string()))?;
        let period_end = raw
            .period_end
            .ok_or_else(|| Error::Resolution("period end missing".to_string()))?;

        let identity = WorkIdentity::new(subject.clone(), period_start, period_end);
        let mut parameters = BTreeMap::new();
        parameters.insert("subject".to_string(), json!(subject));
        parameters.insert("periodStart".to_string(), json!(period_start));
        parameters.insert("periodEnd".to_string(), json!(period_end));
        parameters.insert("slots".to_string(), json!(raw.slots));

        info!(%identity, claim_id, kind = %task.kind, "claim resolved");
        Ok(Some(WorkItem::new(task.kind, identity, parameters, claim_id)))
    }

    async fn cancel(&self, token: &AuthToken, claim_id: &str, reason: &str) -> Result<()> {
        let resp: Envelope<serde_json::Value> = self
            .client
            .get(self.url("/task/cancelTask"))
            .query(&[
                ("claimId", claim_id),
                ("reasonType", reason),
                ("token", token.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if resp.ok() {
            Ok(())
        } else {
            Err(Error::TaskSource(format!(
                "cancel rejected: {}",
                resp.message()
            )))
        }
    }

    async fn finalize(&self, token: &AuthToken, submission: &Submission) -> Result<FinalizeAck> {
        let resp: Envelope<serde_json::Value> = self
            .client
            .post(self.url("/task/submitTask"))
            .query(&[("token", token.as_str())])
            .json(&json!({
                "claimId": submission.claim_id,
                "submitTaskMap": submission.artifacts,
                "doSubmit": true,
            }))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if resp.ok() {
            Ok(FinalizeAck::Accepted)
        } else {
            warn!(claim_id = %submission.claim_id, "finalize rejected: {}", resp.message());
            Ok(FinalizeAck::Rejected {
                reason: resp.message(),
            })
        }
    }
}

/// Task set ids arrive as either a number or a string depending on the
/// endpoint; normalize to a string.
fn scalar_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
