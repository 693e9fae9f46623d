//! Per-account orchestration loop.
//!
//! Drives one worker account through the full life cycle: acquire a claim,
//! admit it past the dedup guard, dispatch to the capture pool, await the
//! correlated result, classify, then finalize, retry, or abandon. Strictly
//! serial — one work item per account at a time; the dedup guard is a
//! defense-in-depth check behind that structural guarantee.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{Instrument, error, info, warn};

use crate::correlate::ResultCorrelator;
use crate::db::queue::DispatchQueue;
use crate::db::results::ResultStore;
use crate::dedup::{AdmitPermit, DedupGuard};
use crate::error::{Error, Result};
use crate::model::{Outcome, WorkItem};
use crate::source::{AuthToken, Credentials, EligibleTask, FinalizeAck, Submission, TaskSource};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_phase, start_item_span};
use opentelemetry::KeyValue;

// ---------------------------------------------------------------------------
// Phases
// ---------------------------------------------------------------------------

/// State-machine phase of one account loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    LoggedOut,
    LoggingIn,
    AcquiringWork,
    Dispatching,
    AwaitingResult,
    Classifying,
    Finalizing,
    Idle,
    Abandoning,
    Restarting,
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Phase::LoggedOut => "logged_out",
            Phase::LoggingIn => "logging_in",
            Phase::AcquiringWork => "acquiring_work",
            Phase::Dispatching => "dispatching",
            Phase::AwaitingResult => "awaiting_result",
            Phase::Classifying => "classifying",
            Phase::Finalizing => "finalizing",
            Phase::Idle => "idle",
            Phase::Abandoning => "abandoning",
            Phase::Restarting => "restarting",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Timing and retry knobs for one account loop.
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Dispatch attempts per work item before abandoning.
    pub max_attempts: u32,
    /// Sleep when the task source reports no eligible work.
    pub idle_sleep: Duration,
    /// Backoff between login retries. Auth failure only blocks this
    /// account; it is retried indefinitely.
    pub login_backoff: Duration,
    /// Pause before re-dispatching after a soft fail or timeout.
    pub retry_pause: Duration,
    /// Cooldown after an unexpected error before re-entering the login
    /// phase.
    pub restart_cooldown: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: crate::model::DEFAULT_MAX_ATTEMPTS,
            idle_sleep: Duration::from_secs(2),
            login_backoff: Duration::from_secs(5),
            retry_pause: Duration::from_secs(5),
            restart_cooldown: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs one account's loop against its injected collaborators.
pub struct AccountOrchestrator<S, Q, R> {
    account: Credentials,
    source: Arc<S>,
    queue: Arc<Q>,
    dedup: Arc<DedupGuard>,
    correlator: Arc<ResultCorrelator<R>>,
    config: OrchestratorConfig,
    shutdown: watch::Receiver<bool>,
    phase: Phase,
}

impl<S, Q, R> AccountOrchestrator<S, Q, R>
where
    S: TaskSource,
    Q: DispatchQueue,
    R: ResultStore,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        account: Credentials,
        source: Arc<S>,
        queue: Arc<Q>,
        dedup: Arc<DedupGuard>,
        correlator: Arc<ResultCorrelator<R>>,
        config: OrchestratorConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            account,
            source,
            queue,
            dedup,
            correlator,
            config,
            shutdown,
            phase: Phase::LoggedOut,
        }
    }

    /// Run until shutdown. Login failures back off and retry forever;
    /// unexpected errors cool down and re-enter the login phase. Only
    /// shutdown returns.
    pub async fn run(&mut self) -> Result<()> {
        loop {
            if self.shutdown_requested() {
                return Ok(());
            }

            self.transition(Phase::LoggingIn);
            let token = match self.source.login(&self.account).await {
                Ok(token) => {
                    info!(account = %self.account.username, "logged in");
                    token
                }
                Err(e) => {
                    warn!(account = %self.account.username, "login failed: {e}");
                    self.transition(Phase::LoggedOut);
                    if self.sleep_or_shutdown(self.config.login_backoff).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            match self.session(&token).await {
                Ok(()) => return Ok(()), // clean shutdown
                Err(e) => {
                    error!(account = %self.account.username, "session error, restarting: {e}");
                    metrics::session_restarts().add(
                        1,
                        &[KeyValue::new("account", self.account.username.clone())],
                    );
                    self.transition(Phase::Restarting);
                    if self.sleep_or_shutdown(self.config.restart_cooldown).await {
                        return Ok(());
                    }
                    self.transition(Phase::LoggedOut);
                }
            }
        }
    }

    /// One logged-in session: acquire and process work items until shutdown
    /// or an unexpected error.
    async fn session(&mut self, token: &AuthToken) -> Result<()> {
        loop {
            if self.shutdown_requested() {
                return Ok(());
            }

            self.transition(Phase::AcquiringWork);
            let tasks = match self.eligible_tasks(token).await {
                Ok(tasks) => tasks,
                Err(Error::Auth(msg)) => {
                    // Session expired — surface to run() for a fresh login.
                    return Err(Error::Auth(msg));
                }
                Err(e) => {
                    // Transient source failure, retried next cycle.
                    warn!(account = %self.account.username, "task listing failed: {e}");
                    if self.sleep_or_shutdown(self.config.idle_sleep).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            let item = match self.resolve_one(token, &tasks).await {
                Some(item) => item,
                None => {
                    self.transition(Phase::Idle);
                    if self.sleep_or_shutdown(self.config.idle_sleep).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            let span = start_item_span(&self.account.username, item.kind, &item.identity.key());
            self.process_item(token, item).instrument(span).await?;
        }
    }

    /// Already-held claims take precedence over fresh ones.
    async fn eligible_tasks(&self, token: &AuthToken) -> Result<Vec<EligibleTask>> {
        let running = self.source.running_claims(token).await?;
        if !running.is_empty() {
            return Ok(running);
        }
        self.source.list_eligible(token).await
    }

    /// Claim and resolve one work item from the eligible sets. Resolution
    /// failures are logged and skipped without consuming the claim twice.
    async fn resolve_one(&self, token: &AuthToken, tasks: &[EligibleTask]) -> Option<WorkItem> {
        for task in tasks {
            match self.source.acquire(token, task).await {
                Ok(Some(item)) => {
                    return Some(item.max_attempts(self.config.max_attempts));
                }
                Ok(None) => continue,
                Err(Error::Resolution(msg)) => {
                    warn!(task = %task.name, "claim resolution failed, skipping: {msg}");
                    continue;
                }
                Err(e) => {
                    warn!(task = %task.name, "acquire failed: {e}");
                    break;
                }
            }
        }
        None
    }

    /// Drive one admitted work item to a terminal decision. The dedup
    /// permit releases exactly once on every exit path, including errors.
    async fn process_item(&mut self, token: &AuthToken, mut item: WorkItem) -> Result<()> {
        self.transition(Phase::Dispatching);
        let key = item.identity.key();

        let Some(_permit) = AdmitPermit::acquire(&self.dedup, item.kind, &key) else {
            // Overlapping dispatch for this identity elsewhere — never
            // dispatch anyway, skip this cycle.
            warn!(identity = %key, "already in flight, skipping cycle");
            self.transition(Phase::Idle);
            self.sleep_or_shutdown(self.config.idle_sleep).await;
            return Ok(());
        };

        loop {
            let outcome = match self.correlator.probe(&item).await {
                // A terminal result already deposited today short-circuits
                // the dispatch entirely.
                Ok(Some(existing)) if existing.is_terminal() => {
                    info!(identity = %key, "usable result already present, skipping dispatch");
                    self.transition(Phase::Classifying);
                    existing
                }
                _ => {
                    self.dispatch(&mut item).await?;
                    self.transition(Phase::AwaitingResult);
                    let outcome = self.correlator.await_result(&item).await;
                    self.transition(Phase::Classifying);
                    outcome
                }
            };

            info!(identity = %key, attempt = item.attempt, outcome = outcome.label(), "classified");

            match outcome {
                Outcome::Success(payload) => {
                    self.transition(Phase::Finalizing);
                    self.finalize(token, &item, &payload).await;
                    return Ok(());
                }
                Outcome::SentinelAbandon => {
                    // Terminal upstream failure: all remaining retries are
                    // short-circuited without consuming another attempt.
                    self.transition(Phase::Abandoning);
                    self.cancel_best_effort(token, &item, "upstream service failure")
                        .await;
                    return Ok(());
                }
                Outcome::SoftFail | Outcome::Timeout => {
                    if item.attempts_exhausted() {
                        warn!(
                            identity = %key,
                            attempts = item.attempt,
                            "attempts exhausted, abandoning"
                        );
                        self.transition(Phase::Abandoning);
                        self.cancel_best_effort(token, &item, "no usable result")
                            .await;
                        return Ok(());
                    }
                    info!(identity = %key, attempt = item.attempt, "re-dispatching");
                    self.transition(Phase::Dispatching);
                    if self.sleep_or_shutdown(self.config.retry_pause).await {
                        // Shutting down mid-item: abandon rather than leak
                        // the claim.
                        self.transition(Phase::Abandoning);
                        self.cancel_best_effort(token, &item, "orchestrator shutdown")
                            .await;
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Push with one short-backoff retry; broker hiccups are handled at the
    /// call site, not surfaced as a work-item failure.
    async fn dispatch(&mut self, item: &mut WorkItem) -> Result<()> {
        if let Err(e) = self.queue.push(item).await {
            warn!(identity = %item.identity, "queue push failed, retrying once: {e}");
            self.sleep_or_shutdown(self.config.retry_pause).await;
            self.queue.push(item).await?;
        }
        item.attempt += 1;
        metrics::work_dispatched().add(
            1,
            &[KeyValue::new("kind", item.kind.to_string())],
        );
        Ok(())
    }

    async fn finalize(&self, token: &AuthToken, item: &WorkItem, payload: &Value) {
        let submission = build_submission(item, payload);
        match self.source.finalize(token, &submission).await {
            Ok(FinalizeAck::Accepted) => {
                info!(identity = %item.identity, "finalized");
                metrics::items_finalized().add(
                    1,
                    &[
                        KeyValue::new("kind", item.kind.to_string()),
                        KeyValue::new("result", "accepted"),
                    ],
                );
            }
            Ok(FinalizeAck::Rejected { reason }) => {
                warn!(identity = %item.identity, "finalize rejected: {reason}");
                metrics::items_finalized().add(
                    1,
                    &[
                        KeyValue::new("kind", item.kind.to_string()),
                        KeyValue::new("result", "rejected"),
                    ],
                );
                self.cancel_best_effort(token, item, &reason).await;
            }
            Err(e) => {
                warn!(identity = %item.identity, "finalize failed: {e}");
                self.cancel_best_effort(token, item, "finalize failed").await;
            }
        }
    }

    /// Cancel the claim; failure is logged, not retried.
    async fn cancel_best_effort(&self, token: &AuthToken, item: &WorkItem, reason: &str) {
        if let Err(e) = self
            .source
            .cancel(token, &item.claim_id, reason)
            .await
        {
            warn!(claim_id = %item.claim_id, "cancel failed (ignored): {e}");
        }
        metrics::items_abandoned().add(
            1,
            &[KeyValue::new("kind", item.kind.to_string())],
        );
    }

    fn transition(&mut self, to: Phase) {
        if self.phase == to {
            return;
        }
        record_phase(&self.account.username, self.phase, to);
        self.phase = to;
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Sleep for `duration`, waking early on shutdown. Returns whether
    /// shutdown was requested.
    async fn sleep_or_shutdown(&mut self, duration: Duration) -> bool {
        if self.shutdown_requested() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.shutdown_requested(),
            _ = self.shutdown.changed() => true,
        }
    }
}

/// Forward the artifact keys the capture pool deposited in the payload.
/// Artifact production itself (rendering, upload) happens out of process.
fn build_submission(item: &WorkItem, payload: &Value) -> Submission {
    let mut artifacts = std::collections::BTreeMap::new();
    if let Some(map) = payload.get("artifacts").and_then(Value::as_object) {
        for (slot, keys) in map {
            let keys = keys
                .as_array()
                .map(|a| {
                    a.iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            artifacts.insert(slot.clone(), keys);
        }
    }
    Submission {
        claim_id: item.claim_id.clone(),
        artifacts,
    }
}
