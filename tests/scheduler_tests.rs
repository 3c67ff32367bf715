mod common;

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use common::{MockIndex, fixed_clock, shared_state, test_config};
use crawlgate::config::Config;
use crawlgate::domain::{JobKind, JobStatus, WorkerId};
use crawlgate::services::SchedulerError;
use crawlgate::state::SharedState;
use serde_json::json;

fn lease_config(lease_seconds: u64, max_retries: u32) -> Config {
    let mut config = test_config();
    config.scheduler.lease_seconds = lease_seconds;
    config.scheduler.max_retries = max_retries;
    config
}

#[tokio::test]
async fn test_claims_follow_priority_then_submission_order() {
    let state = shared_state(test_config(), MockIndex::new(Duration::ZERO), fixed_clock()).await;
    let scheduler = &state.scheduler;

    let low = scheduler
        .submit("https://a.test/low", 0, JobKind::Crawl)
        .await
        .unwrap();
    let high_first = scheduler
        .submit("https://a.test/high-1", 10, JobKind::Recrawl)
        .await
        .unwrap();
    let mid = scheduler
        .submit("https://a.test/mid", 5, JobKind::Recrawl)
        .await
        .unwrap();
    let high_second = scheduler
        .submit("https://a.test/high-2", 10, JobKind::Recrawl)
        .await
        .unwrap();

    let worker = WorkerId::from("w-1");
    let mut order = Vec::new();
    while let Some(claim) = scheduler.claim(&worker).await.unwrap() {
        order.push(claim.job.id);
    }

    assert_eq!(order, vec![high_first.id, high_second.id, mid.id, low.id]);
    assert_eq!(scheduler.queue_depth(), 0);
}

#[tokio::test]
async fn test_expired_lease_is_requeued_and_reclaimed() {
    let clock = fixed_clock();
    let state = shared_state(lease_config(30, 3), MockIndex::new(Duration::ZERO), clock.clone()).await;
    let scheduler = &state.scheduler;
    let (w1, w2) = (WorkerId::from("w-1"), WorkerId::from("w-2"));

    let job = scheduler
        .submit("https://a.test/page", 10, JobKind::Recrawl)
        .await
        .unwrap();
    let claim = scheduler.claim(&w1).await.unwrap().unwrap();
    assert_eq!(claim.job.status, JobStatus::InProgress);
    assert_eq!(claim.lease.expires_at - claim.lease.granted_at, ChronoDuration::seconds(30));

    clock.advance(ChronoDuration::seconds(31));
    let report = scheduler.sweep_expired().await;
    assert_eq!((report.expired, report.requeued, report.failed), (1, 1, 0));

    let snapshot = scheduler.get(job.id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Pending);
    assert_eq!(snapshot.retry_count, 1);

    let reclaimed = scheduler.claim(&w2).await.unwrap().unwrap();
    assert_eq!(reclaimed.job.id, job.id);

    let late = scheduler.complete(job.id, &w1, json!({})).await;
    assert_eq!(late, Err(SchedulerError::LeaseLost(job.id)));

    let done = scheduler.complete(job.id, &w2, json!({ "ok": true })).await.unwrap();
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.retry_count, 1);

    // Terminal jobs are served from the store
    let stored = state.store.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Completed);
    assert_eq!(stored.result, Some(json!({ "ok": true })));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sweep_and_late_completion_count_expiry_once() {
    let clock = fixed_clock();
    let state = shared_state(lease_config(30, 3), MockIndex::new(Duration::ZERO), clock.clone()).await;
    let scheduler = state.scheduler.clone();
    let worker = WorkerId::from("w-1");

    let job = scheduler
        .submit("https://a.test/race", 10, JobKind::Recrawl)
        .await
        .unwrap();
    scheduler.claim(&worker).await.unwrap().unwrap();
    clock.advance(ChronoDuration::seconds(45));

    let sweeper = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.sweep_expired().await })
    };
    let completer = {
        let scheduler = scheduler.clone();
        let worker = worker.clone();
        tokio::spawn(async move { scheduler.complete(job.id, &worker, json!({})).await })
    };

    let report = sweeper.await.unwrap();
    let completion = completer.await.unwrap();

    assert!(matches!(completion, Err(SchedulerError::LeaseLost(_))));
    assert!(report.expired <= 1);

    let snapshot = scheduler.get(job.id).await.unwrap();
    assert_eq!(snapshot.status, JobStatus::Pending);
    assert_eq!(snapshot.retry_count, 1);
    assert_eq!(scheduler.queue_depth(), 1);
}

#[tokio::test]
async fn test_retry_budget_ends_in_failure() {
    let clock = fixed_clock();
    let state = shared_state(lease_config(30, 1), MockIndex::new(Duration::ZERO), clock.clone()).await;
    let scheduler = &state.scheduler;
    let worker = WorkerId::from("w-1");

    let job = scheduler
        .submit("https://a.test/flaky", 5, JobKind::Recrawl)
        .await
        .unwrap();

    scheduler.claim(&worker).await.unwrap().unwrap();
    let retried = scheduler.fail(job.id, &worker, "HTTP 503").await.unwrap();
    assert_eq!(retried.status, JobStatus::Pending);
    assert_eq!(retried.retry_count, 1);
    assert_eq!(retried.error.as_deref(), Some("HTTP 503"));

    scheduler.claim(&worker).await.unwrap().unwrap();
    clock.advance(ChronoDuration::seconds(31));
    let report = scheduler.sweep_expired().await;
    assert_eq!(report.failed, 1);

    let failed = scheduler.get(job.id).await.unwrap();
    assert_eq!(failed.status, JobStatus::Failed);
    assert!(failed.completed_at.is_some());
    assert!(scheduler.claim(&worker).await.unwrap().is_none());

    let again = scheduler.fail(job.id, &worker, "again").await;
    assert!(matches!(again, Err(SchedulerError::Terminal { .. })));
}

#[tokio::test]
async fn test_restart_recovers_active_jobs_from_the_store() {
    let clock = fixed_clock();
    let config = lease_config(30, 3);
    let index = MockIndex::new(Duration::ZERO);
    let first = shared_state(config.clone(), index.clone(), clock.clone()).await;

    let waiting = first
        .scheduler
        .submit("https://a.test/waiting", 3, JobKind::Crawl)
        .await
        .unwrap();
    let running = first
        .scheduler
        .submit("https://a.test/running", 9, JobKind::Recrawl)
        .await
        .unwrap();
    let claim = first
        .scheduler
        .claim(&WorkerId::from("w-old"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claim.job.id, running.id);

    // A fresh process over the same database
    let second = Arc::new(SharedState::build(
        config,
        first.store.clone(),
        index,
        clock.clone(),
    ));
    assert_eq!(second.scheduler.queue_depth(), 0);

    let report = second.scheduler.recover().await.unwrap();
    assert_eq!((report.requeued, report.expired, report.failed), (2, 1, 0));

    let recovered = second.scheduler.get(running.id).await.unwrap();
    assert_eq!(recovered.status, JobStatus::Pending);
    assert_eq!(recovered.retry_count, 1);

    let worker = WorkerId::from("w-new");
    let next = second.scheduler.claim(&worker).await.unwrap().unwrap();
    assert_eq!(next.job.id, running.id);
    let after = second.scheduler.claim(&worker).await.unwrap().unwrap();
    assert_eq!(after.job.id, waiting.id);
}
