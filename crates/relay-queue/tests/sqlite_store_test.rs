//! Integration tests for the SQLite store on an on-disk database.

mod common;

use common::{plain, test_config, ScriptedTransport, TestQueue};
use relay_core::{BatchId, Clock, ManualClock};
use relay_queue::{
    JobFilter, JobStatus, NewEmailJob, Priority, QueueStore, Recipients, SqliteQueueStore,
    TemplateRef, TransportError,
};
use relay_resilience::RateLimits;
use relay_templates::TemplateKind;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn database_url(dir: &TempDir) -> String {
    format!("sqlite://{}", dir.path().join("queue.db").display())
}

#[tokio::test]
async fn test_jobs_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let url = database_url(&dir);
    let clock = Arc::new(ManualClock::starting_now());

    let store = SqliteQueueStore::connect(&url, clock.clone()).await.unwrap();
    let template = TemplateRef::new(TemplateKind::Welcome, json!({ "userName": "Ada" }))
        .with_theme(Some("dark".into()));
    let id = store
        .enqueue(
            NewEmailJob::deferred(Recipients::to("ada@example.com"), template.clone())
                .priority(Priority::High)
                .in_batch(BatchId::new()),
        )
        .await
        .unwrap();
    store.close().await;

    let store = SqliteQueueStore::connect(&url, clock.clone()).await.unwrap();
    let job = store.get(id).await.unwrap().expect("job persisted");
    assert_eq!(job.status, JobStatus::Pending);
    assert_eq!(job.priority, Priority::High);
    assert_eq!(job.template, Some(template));
    assert!(job.batch_id.is_some());
    assert!(job.needs_render());
}

#[tokio::test]
async fn test_enqueue_many_commits_whole_batch() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let store = SqliteQueueStore::connect(&database_url(&dir), clock.clone())
        .await
        .unwrap();

    let batch = BatchId::new();
    let jobs = ["ada", "grace", "alan"]
        .iter()
        .map(|name| {
            NewEmailJob::deferred(
                Recipients::to(format!("{}@example.com", name)),
                TemplateRef::new(TemplateKind::Welcome, json!({ "userName": name })),
            )
            .in_batch(batch)
        })
        .collect();
    let ids = store.enqueue_many(jobs).await.unwrap();

    let listed: Vec<_> = store
        .list(&JobFilter::batch(batch))
        .await
        .unwrap()
        .into_iter()
        .map(|job| job.id)
        .collect();
    assert_eq!(listed, ids);
    assert_eq!(store.stats().await.unwrap().pending_fresh, 3);
}

#[tokio::test]
async fn test_recover_in_flight_after_crash() {
    let dir = TempDir::new().unwrap();
    let url = database_url(&dir);
    let clock = Arc::new(ManualClock::starting_now());

    let store = SqliteQueueStore::connect(&url, clock.clone()).await.unwrap();
    for i in 0..3 {
        store.enqueue(plain(&format!("job {}", i))).await.unwrap();
    }
    let claimed = store.dequeue_batch(2, clock.now()).await.unwrap();
    assert_eq!(claimed.len(), 2);
    // Simulates a crash: claimed jobs are never finished.
    store.close().await;

    let q = TestQueue::sqlite(
        &url,
        clock.clone(),
        ScriptedTransport::accepting(),
        RateLimits::default(),
        test_config(),
    )
    .await;
    assert_eq!(q.store.stats().await.unwrap().processing, 2);
    assert_eq!(q.store.recover_in_flight().await.unwrap(), 2);

    let report = q.processor.tick().await;
    assert_eq!(report.sent, 3);
    assert_eq!(q.transport.delivered_subjects(), vec!["job 0", "job 1", "job 2"]);
}

#[tokio::test]
async fn test_processor_retries_and_fails_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let q = TestQueue::sqlite(
        &database_url(&dir),
        clock,
        ScriptedTransport::failing(TransportError::Io("connection refused".into())),
        RateLimits::default(),
        test_config(),
    )
    .await;
    let id = q.store.enqueue(plain("doomed")).await.unwrap();

    assert_eq!(q.processor.tick().await.retried, 1);
    q.clock.advance(Duration::from_secs(60));
    assert_eq!(q.processor.tick().await.retried, 1);
    q.clock.advance(Duration::from_secs(120));
    assert_eq!(q.processor.tick().await.failed, 1);

    let job = q.store.get(id).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.retry_count, 3);
    assert_eq!(q.transport.attempts(), 3);
}

#[tokio::test]
async fn test_priority_ordering_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let q = TestQueue::sqlite(
        &database_url(&dir),
        clock,
        ScriptedTransport::accepting(),
        RateLimits::default(),
        test_config(),
    )
    .await;

    q.store
        .enqueue(plain("low").priority(Priority::Low))
        .await
        .unwrap();
    q.clock.advance(Duration::from_secs(1));
    q.store
        .enqueue(plain("high").priority(Priority::High))
        .await
        .unwrap();
    q.clock.advance(Duration::from_secs(1));
    q.store.enqueue(plain("normal")).await.unwrap();

    q.processor.tick().await;
    assert_eq!(q.transport.delivered_subjects(), vec!["high", "normal", "low"]);
}

#[tokio::test]
async fn test_batch_listing_on_sqlite() {
    let dir = TempDir::new().unwrap();
    let clock = Arc::new(ManualClock::starting_now());
    let store = SqliteQueueStore::connect(&database_url(&dir), clock)
        .await
        .unwrap();

    let batch = BatchId::new();
    for i in 0..3 {
        store
            .enqueue(plain(&format!("member {}", i)).in_batch(batch))
            .await
            .unwrap();
    }
    store.enqueue(plain("outsider")).await.unwrap();

    let members = store.list(&JobFilter::batch(batch)).await.unwrap();
    assert_eq!(members.len(), 3);
    assert!(members.windows(2).all(|w| w[0].sequence < w[1].sequence));

    assert_eq!(store.clear().await.unwrap(), 4);
    assert_eq!(store.stats().await.unwrap().total, 0);
}
