//! Account supervision.
//!
//! Runs one orchestrator loop per configured account, restarting any loop
//! that crashes after a fixed cooldown, until shutdown. Failure domains are
//! isolated per account: the only state shared across loops is the dedup
//! guard and the broker clients, all safe for concurrent access.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::classify::OutcomeClassifier;
use crate::correlate::{CorrelatorConfig, ResultCorrelator};
use crate::db::queue::DispatchQueue;
use crate::db::results::ResultStore;
use crate::dedup::DedupGuard;
use crate::error::Result;
use crate::orchestrator::{AccountOrchestrator, OrchestratorConfig};
use crate::source::{Credentials, TaskSource};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

/// Supervises the full account fleet.
pub struct Supervisor<S, Q, R> {
    source: Arc<S>,
    queue: Arc<Q>,
    dedup: Arc<DedupGuard>,
    correlator: Arc<ResultCorrelator<R>>,
    config: OrchestratorConfig,
    /// Cooldown before restarting a crashed account loop.
    restart_cooldown: Duration,
    shutdown_tx: watch::Sender<bool>,
}

impl<S, Q, R> Supervisor<S, Q, R>
where
    S: TaskSource + 'static,
    Q: DispatchQueue + 'static,
    R: ResultStore + 'static,
{
    pub fn new(
        source: Arc<S>,
        queue: Arc<Q>,
        store: Arc<R>,
        classifier: Arc<OutcomeClassifier>,
        correlator_config: CorrelatorConfig,
        config: OrchestratorConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            source,
            queue,
            dedup: Arc::new(DedupGuard::new()),
            correlator: Arc::new(ResultCorrelator::new(store, classifier, correlator_config)),
            restart_cooldown: config.restart_cooldown,
            config,
            shutdown_tx,
        }
    }

    /// Shared dedup guard (exposed for tests and diagnostics).
    pub fn dedup(&self) -> Arc<DedupGuard> {
        Arc::clone(&self.dedup)
    }

    /// Signal every account loop to exit after its current work item.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Run one supervised loop per account until all exit via shutdown.
    pub async fn run(&self, accounts: Vec<Credentials>) -> Result<()> {
        info!(accounts = accounts.len(), "supervisor starting");

        let mut handles = Vec::with_capacity(accounts.len());
        for account in accounts {
            handles.push(tokio::spawn(self.supervise_account(account)));
        }

        for handle in handles {
            // The per-account loop only returns on shutdown; a JoinError
            // here means the supervision wrapper itself panicked.
            if let Err(e) = handle.await {
                error!("account supervision task failed: {e}");
            }
        }
        info!("supervisor stopped");
        Ok(())
    }

    /// Future supervising a single account: run its orchestrator, restart
    /// on crash (error or panic) after the cooldown, exit on shutdown.
    fn supervise_account(
        &self,
        account: Credentials,
    ) -> impl Future<Output = ()> + Send + 'static {
        let source = Arc::clone(&self.source);
        let queue = Arc::clone(&self.queue);
        let dedup = Arc::clone(&self.dedup);
        let correlator = Arc::clone(&self.correlator);
        let config = self.config;
        let cooldown = self.restart_cooldown;
        let mut shutdown = self.shutdown_tx.subscribe();

        async move {
            loop {
                let mut orchestrator = AccountOrchestrator::new(
                    account.clone(),
                    Arc::clone(&source),
                    Arc::clone(&queue),
                    Arc::clone(&dedup),
                    Arc::clone(&correlator),
                    config,
                    shutdown.clone(),
                );

                // Inner spawn so a panic in the loop surfaces as a
                // JoinError instead of taking the supervisor down.
                let username = account.username.clone();
                let handle = tokio::spawn(async move { orchestrator.run().await });

                match handle.await {
                    Ok(Ok(())) => {
                        info!(account = %username, "account loop exited");
                        return;
                    }
                    Ok(Err(e)) => {
                        error!(account = %username, "account loop error: {e}");
                    }
                    Err(join_err) => {
                        error!(account = %username, "account loop crashed: {join_err}");
                    }
                }

                metrics::account_restarts()
                    .add(1, &[KeyValue::new("account", username.clone())]);

                if *shutdown.borrow() {
                    return;
                }
                tokio::select! {
                    _ = tokio::time::sleep(cooldown) => {}
                    _ = shutdown.changed() => return,
                }
            }
        }
    }
}
