//! Orchestrator state-machine scenarios with scripted collaborators.

mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use fieldwork::classify::OutcomeClassifier;
use fieldwork::correlate::{CorrelatorConfig, ResultCorrelator};
use fieldwork::dedup::DedupGuard;
use fieldwork::model::{WorkItem, WorkKind};
use fieldwork::orchestrator::{AccountOrchestrator, OrchestratorConfig};
use fieldwork::source::FinalizeAck;

use common::{
    MemoryQueue, ScriptedSource, ScriptedStore, complete_detail_payload, credentials,
    detail_item, incomplete_detail_payload, sentinel_payload,
};

struct Harness {
    source: Arc<ScriptedSource>,
    queue: Arc<MemoryQueue>,
    dedup: Arc<DedupGuard>,
    shutdown: watch::Sender<bool>,
    orchestrator: AccountOrchestrator<ScriptedSource, MemoryQueue, ScriptedStore>,
}

/// Fast timings so scenarios complete in real time.
fn harness(items: Vec<WorkItem>, store: ScriptedStore, max_attempts: u32) -> Harness {
    let source = Arc::new(ScriptedSource::new(items));
    let queue = Arc::new(MemoryQueue::new());
    let dedup = Arc::new(DedupGuard::new());
    let (shutdown, shutdown_rx) = watch::channel(false);

    let correlator = Arc::new(ResultCorrelator::new(
        Arc::new(store),
        Arc::new(OutcomeClassifier::with_default_checks()),
        CorrelatorConfig {
            timeout: Duration::from_millis(50),
            poll_interval: Duration::from_millis(10),
        },
    ));

    let orchestrator = AccountOrchestrator::new(
        credentials("sx001"),
        Arc::clone(&source),
        Arc::clone(&queue),
        Arc::clone(&dedup),
        correlator,
        OrchestratorConfig {
            max_attempts,
            idle_sleep: Duration::from_millis(5),
            login_backoff: Duration::from_millis(5),
            retry_pause: Duration::from_millis(5),
            restart_cooldown: Duration::from_millis(5),
        },
        shutdown_rx,
    );

    Harness {
        source,
        queue,
        dedup,
        shutdown,
        orchestrator,
    }
}

/// Happy path: dispatch, await, classify success, finalize, release.
#[tokio::test]
async fn success_path_finalizes_and_releases() {
    let store = ScriptedStore::new(vec![None, None], Some(complete_detail_payload()));
    let mut h = harness(vec![detail_item("H1")], store, 4);

    let shutdown = h.shutdown.clone();
    let source = Arc::clone(&h.source);
    tokio::spawn(async move {
        while source.finalized.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = shutdown.send(true);
    });

    h.orchestrator.run().await.expect("run");

    let finalized = h.source.finalized.lock().unwrap();
    assert_eq!(finalized.len(), 1);
    assert_eq!(finalized[0].claim_id, "claim-1");
    assert_eq!(
        finalized[0].artifacts.get("slot-1"),
        Some(&vec!["oss/a.png".to_string()])
    );
    assert_eq!(h.queue.push_count(), 1);
    assert!(h.source.cancelled.lock().unwrap().is_empty());
    assert_eq!(h.dedup.in_flight_count(), 0);
}

/// Scenario C: sentinel result cancels the claim immediately, without the
/// remaining retries.
#[tokio::test]
async fn sentinel_cancels_without_further_attempts() {
    // First probe sees nothing, the awaited result is the sentinel.
    let store = ScriptedStore::new(vec![None], Some(sentinel_payload()));
    let mut h = harness(vec![detail_item("H1")], store, 4);

    let shutdown = h.shutdown.clone();
    let source = Arc::clone(&h.source);
    tokio::spawn(async move {
        while source.cancelled.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = shutdown.send(true);
    });

    h.orchestrator.run().await.expect("run");

    assert_eq!(h.queue.push_count(), 1, "no retry dispatches after sentinel");
    let cancelled = h.source.cancelled.lock().unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].0, "claim-1");
    assert_eq!(cancelled[0].1, "upstream service failure");
    assert!(h.source.finalized.lock().unwrap().is_empty());
    assert_eq!(h.dedup.in_flight_count(), 0);
}

/// Scenario D: bounded retries — with max_attempts = 3 and a store that
/// never produces a usable result, exactly three dispatches happen, then
/// the claim is abandoned.
#[tokio::test]
async fn attempts_are_bounded_then_abandoned() {
    let store = ScriptedStore::new(Vec::new(), Some(incomplete_detail_payload()));
    let mut h = harness(vec![detail_item("H1")], store, 3);

    let shutdown = h.shutdown.clone();
    let source = Arc::clone(&h.source);
    tokio::spawn(async move {
        while source.cancelled.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = shutdown.send(true);
    });

    h.orchestrator.run().await.expect("run");

    assert_eq!(h.queue.push_count(), 3, "no fourth dispatch");
    let cancelled = h.source.cancelled.lock().unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].1, "no usable result");
    assert_eq!(h.dedup.in_flight_count(), 0);
}

/// A result already deposited today short-circuits dispatch entirely.
#[tokio::test]
async fn existing_result_skips_dispatch() {
    let store = ScriptedStore::new(vec![Some(complete_detail_payload())], None);
    let mut h = harness(vec![detail_item("H1")], store, 4);

    let shutdown = h.shutdown.clone();
    let source = Arc::clone(&h.source);
    tokio::spawn(async move {
        while source.finalized.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = shutdown.send(true);
    });

    h.orchestrator.run().await.expect("run");

    assert_eq!(h.queue.push_count(), 0);
    assert_eq!(h.source.finalized.lock().unwrap().len(), 1);
}

/// Release invariant: when the broker stays down and the session errors
/// out, the dedup entry is still released exactly once.
#[tokio::test]
async fn broker_outage_releases_dedup_entry() {
    let store = ScriptedStore::empty();
    let mut h = harness(vec![detail_item("H1")], store, 4);
    // Both the push and its one retry fail.
    h.queue
        .failing_pushes
        .store(2, std::sync::atomic::Ordering::SeqCst);

    let shutdown = h.shutdown.clone();
    let queue = Arc::clone(&h.queue);
    tokio::spawn(async move {
        // Wait until both failing pushes were consumed, then stop.
        while queue
            .failing_pushes
            .load(std::sync::atomic::Ordering::SeqCst)
            > 0
        {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        let _ = shutdown.send(true);
    });

    h.orchestrator.run().await.expect("run");
    assert_eq!(h.dedup.in_flight_count(), 0);
}

/// Rejected finalization cancels the claim best-effort.
#[tokio::test]
async fn rejected_finalize_cancels_claim() {
    let store = ScriptedStore::new(Vec::new(), Some(complete_detail_payload()));
    let mut h = harness(vec![detail_item("H1")], store, 4);
    *h.source.finalize_ack.lock().unwrap() = FinalizeAck::Rejected {
        reason: "slot mismatch".to_string(),
    };

    let shutdown = h.shutdown.clone();
    let source = Arc::clone(&h.source);
    tokio::spawn(async move {
        while source.cancelled.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = shutdown.send(true);
    });

    h.orchestrator.run().await.expect("run");

    let cancelled = h.source.cancelled.lock().unwrap();
    assert_eq!(cancelled.len(), 1);
    assert_eq!(cancelled[0].1, "slot mismatch");
    assert_eq!(h.dedup.in_flight_count(), 0);
}

/// Login failures back off and retry; the loop still makes progress once
/// authentication succeeds.
#[tokio::test]
async fn login_failures_are_retried_until_success() {
    let store = ScriptedStore::new(Vec::new(), Some(complete_detail_payload()));
    let mut h = harness(vec![detail_item("H1")], store, 4);
    h.source
        .failing_logins
        .store(3, std::sync::atomic::Ordering::SeqCst);

    let shutdown = h.shutdown.clone();
    let source = Arc::clone(&h.source);
    tokio::spawn(async move {
        while source.finalized.lock().unwrap().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = shutdown.send(true);
    });

    h.orchestrator.run().await.expect("run");

    assert!(h.source.logins.load(std::sync::atomic::Ordering::SeqCst) >= 4);
    assert_eq!(h.source.finalized.lock().unwrap().len(), 1);
}

/// An identity already admitted elsewhere is never double-dispatched;
/// the cycle is skipped.
#[tokio::test]
async fn admitted_identity_skips_dispatch_cycle() {
    let store = ScriptedStore::empty();
    let mut h = harness(vec![detail_item("H1")], store, 4);

    // Simulate an overlapping dispatch path holding the identity.
    let key = detail_item("H1").identity.key();
    assert!(h.dedup.try_admit(WorkKind::Detail, &key));

    let shutdown = h.shutdown.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        let _ = shutdown.send(true);
    });

    h.orchestrator.run().await.expect("run");

    assert_eq!(h.queue.push_count(), 0, "must not dispatch while in flight");
    assert_eq!(h.dedup.in_flight_count(), 1, "foreign entry left untouched");
}
