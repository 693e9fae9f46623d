//! Result correlation.
//!
//! The capture pool runs out-of-process and there is no push channel back,
//! so correlation is bounded polling against the result store with a hard
//! deadline. The deadline is checked against the monotonic clock on every
//! iteration rather than delegated to a blocking wait primitive.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDate};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::classify::OutcomeClassifier;
use crate::db::results::ResultStore;
use crate::error::Result;
use crate::model::{Outcome, WorkItem};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Timing knobs for the await loop.
#[derive(Debug, Clone, Copy)]
pub struct CorrelatorConfig {
    /// Hard deadline for a result to appear.
    pub timeout: Duration,
    /// Fixed sleep between store probes.
    pub poll_interval: Duration,
}

impl Default for CorrelatorConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(240),
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Polls the result store for a dispatched work item until a terminal
/// outcome appears or the deadline elapses.
pub struct ResultCorrelator<R> {
    store: Arc<R>,
    classifier: Arc<OutcomeClassifier>,
    config: CorrelatorConfig,
    /// Observation-date source, re-read on every probe so an await
    /// spanning midnight rolls over to the new day's partition.
    today: Box<dyn Fn() -> NaiveDate + Send + Sync>,
}

impl<R: ResultStore> ResultCorrelator<R> {
    pub fn new(store: Arc<R>, classifier: Arc<OutcomeClassifier>, config: CorrelatorConfig) -> Self {
        Self {
            store,
            classifier,
            config,
            today: Box::new(|| Local::now().date_naive()),
        }
    }

    /// Replace the observation-date source (tests).
    pub fn with_today(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Box::new(today);
        self
    }

    /// Probe the store once for today's record and classify it if present.
    ///
    /// Used by the orchestrator as a pre-dispatch shortcut: a result already
    /// deposited today can be consumed without pushing at all.
    pub async fn probe(&self, item: &WorkItem) -> Result<Option<Outcome>> {
        let key = item.identity.key();
        let record = self.store.fetch(item.kind, &key, (self.today)()).await?;
        Ok(record.map(|r| self.classifier.classify(item.kind, &r.payload)))
    }

    /// Await a result for `item`.
    ///
    /// Terminal classifications (success, sentinel abandon) return
    /// immediately. A soft-fail keeps polling — a later write to the same
    /// key may replace the record before the deadline. Transient store
    /// errors are logged and treated as "not yet ready". Deadline
    /// exhaustion returns [`Outcome::Timeout`], never earlier than the
    /// timeout, never later than timeout + poll interval.
    pub async fn await_result(&self, item: &WorkItem) -> Outcome {
        let deadline = Instant::now() + self.config.timeout;
        let key = item.identity.key();

        loop {
            // Re-read the date each iteration: an await spanning midnight
            // must query the new day's partition, not the stale one.
            match self.store.fetch(item.kind, &key, (self.today)()).await {
                Ok(Some(record)) => {
                    let outcome = self.classifier.classify(item.kind, &record.payload);
                    if outcome.is_terminal() {
                        record_outcome(item, &outcome);
                        return outcome;
                    }
                    debug!(identity = %key, "result present but incomplete, still polling");
                }
                Ok(None) => {}
                Err(e) => {
                    // Transient store failure: retried on the next tick.
                    warn!(identity = %key, "result store probe failed: {e}");
                }
            }

            if Instant::now() + self.config.poll_interval > deadline {
                tokio::time::sleep_until(deadline).await;
                let outcome = Outcome::Timeout;
                record_outcome(item, &outcome);
                return outcome;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }
    }
}

fn record_outcome(item: &WorkItem, outcome: &Outcome) {
    metrics::results_correlated().add(
        1,
        &[
            KeyValue::new("kind", item.kind.to_string()),
            KeyValue::new("outcome", outcome.label()),
        ],
    );
}
