//! Priority/SLA job scheduler.
//!
//! The scheduler is the only writer of job state. Each non-terminal job owns
//! a slot guarded by its own async mutex, so claims, completions, renewals
//! and lease sweeps on the same job serialize while unrelated jobs proceed
//! in parallel. Every accepted transition is persisted before it becomes
//! visible in memory; a failed write leaves the slot untouched.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{Mutex, broadcast};
use tracing::{debug, info, warn};
use url::Url;

use crate::clock::SharedClock;
use crate::config::SchedulerConfig;
use crate::constants::jobs::{MAX_PRIORITY, MAX_URL_LENGTH, MIN_PRIORITY};
use crate::domain::events::NotificationEvent;
use crate::domain::job::InvalidTransition;
use crate::domain::{Job, JobId, JobKind, JobStatus, WorkerId, WorkerLease};
use crate::services::job_queue::{JobQueue, QueueEntry};
use crate::services::job_store::{JobStore, JobStoreError};
use crate::services::retry::{RetryPolicy, retry};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Job not found: {0}")]
    NotFound(JobId),

    #[error("Job {job_id} is already {status}")]
    Terminal { job_id: JobId, status: JobStatus },

    #[error("Lease on job {0} is not held by this worker or has expired")]
    LeaseLost(JobId),

    #[error("Job store unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },
}

impl From<InvalidTransition> for SchedulerError {
    fn from(err: InvalidTransition) -> Self {
        Self::Validation(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub recrawl_sla: Duration,
    pub crawl_sla: Duration,
    pub lease: Duration,
    pub max_retries: u32,
    pub sla_warning: Duration,
    pub store_retry: RetryPolicy,
}

impl SchedulerSettings {
    #[must_use]
    pub fn from_config(config: &SchedulerConfig) -> Self {
        Self {
            recrawl_sla: config.sla_window(JobKind::Recrawl),
            crawl_sla: config.sla_window(JobKind::Crawl),
            lease: config.lease(),
            max_retries: config.max_retries,
            sla_warning: config.sla_warning(),
            store_retry: RetryPolicy::new(
                config.store_max_attempts,
                config.store_retry_base_delay_ms,
            ),
        }
    }

    #[must_use]
    pub const fn sla_window(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::Recrawl => self.recrawl_sla,
            JobKind::Crawl => self.crawl_sla,
        }
    }
}

/// A job handed to a worker together with the lease it must hold.
#[derive(Debug, Clone)]
pub struct Claim {
    pub job: Job,
    pub lease: WorkerLease,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub expired: usize,
    pub requeued: usize,
    pub failed: usize,
    pub errors: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SlaReport {
    pub at_risk: usize,
    pub overdue: usize,
    pub newly_flagged: usize,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryReport {
    pub requeued: usize,
    pub expired: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum SlaFlag {
    None,
    AtRisk,
    Overdue,
}

struct JobSlot {
    job: Job,
    seq: u64,
    lease: Option<WorkerLease>,
    sla_flag: SlaFlag,
}

enum LeaseCheck {
    Valid,
    Expired,
    NotHeld,
}

struct Inner {
    store: Arc<dyn JobStore>,
    queue: JobQueue,
    slots: DashMap<JobId, Arc<Mutex<JobSlot>>>,
    clock: SharedClock,
    settings: SchedulerSettings,
    event_bus: broadcast::Sender<NotificationEvent>,
}

#[derive(Clone)]
pub struct JobScheduler {
    inner: Arc<Inner>,
}

/// Checks that `url` is an absolute http(s) URL with a host.
pub fn validate_url(url: &str) -> Result<(), SchedulerError> {
    if url.len() > MAX_URL_LENGTH {
        return Err(SchedulerError::Validation(format!(
            "URL exceeds {MAX_URL_LENGTH} characters"
        )));
    }
    let parsed =
        Url::parse(url).map_err(|e| SchedulerError::Validation(format!("Invalid URL: {e}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(SchedulerError::Validation(format!(
            "Unsupported URL scheme: {}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(SchedulerError::Validation("URL has no host".to_string()));
    }
    Ok(())
}

pub fn validate_priority(priority: i32) -> Result<(), SchedulerError> {
    if (MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        Ok(())
    } else {
        Err(SchedulerError::Validation(format!(
            "Priority must be between {MIN_PRIORITY} and {MAX_PRIORITY}"
        )))
    }
}

impl JobScheduler {
    #[must_use]
    pub fn new(
        store: Arc<dyn JobStore>,
        clock: SharedClock,
        settings: SchedulerSettings,
        event_bus: broadcast::Sender<NotificationEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                queue: JobQueue::new(),
                slots: DashMap::new(),
                clock,
                settings,
                event_bus,
            }),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &SchedulerSettings {
        &self.inner.settings
    }

    #[must_use]
    pub fn queue_depth(&self) -> usize {
        self.inner.queue.len()
    }

    /// Number of jobs the scheduler is tracking (pending or in progress).
    #[must_use]
    pub fn active_jobs(&self) -> usize {
        self.inner.slots.len()
    }

    /// Admits a new job. Nothing is persisted or queued when validation fails.
    pub async fn submit(
        &self,
        url: &str,
        priority: i32,
        kind: JobKind,
    ) -> Result<Job, SchedulerError> {
        let url = url.trim();
        validate_url(url)?;
        validate_priority(priority)?;

        let now = self.inner.clock.now();
        let job = Job::new(kind, url, priority, now, self.inner.settings.sla_window(kind));
        self.persist(&job).await?;

        let seq = self.inner.queue.next_seq();
        self.track(job.clone(), seq);

        metrics::counter!("jobs_submitted_total", "kind" => kind.as_str()).increment(1);
        info!(
            event = "job_submitted",
            job_id = %job.id,
            kind = %kind,
            priority,
            sla_deadline = %job.sla_deadline,
            url = %job.url,
            "Job submitted"
        );
        self.notify(NotificationEvent::JobSubmitted {
            job_id: job.id,
            kind,
            priority,
            sla_deadline: job.sla_deadline,
        });

        Ok(job)
    }

    /// Pops the most urgent pending job and leases it to `worker`.
    ///
    /// Returns `Ok(None)` when nothing is pending.
    pub async fn claim(&self, worker: &WorkerId) -> Result<Option<Claim>, SchedulerError> {
        loop {
            let Some(entry) = self.inner.queue.pop() else {
                self.sla_report().await;
                return Ok(None);
            };
            let Some(slot) = self.slot(entry.job_id) else {
                continue;
            };
            let mut slot = slot.lock().await;
            if slot.job.status != JobStatus::Pending {
                debug!(job_id = %entry.job_id, status = %slot.job.status, "Skipping stale queue entry");
                continue;
            }

            let now = self.inner.clock.now();
            let mut next = slot.job.clone();
            next.transition(JobStatus::InProgress)?;
            next.started_at = Some(now);

            if let Err(e) = self.persist(&next).await {
                self.inner.queue.push(entry);
                return Err(e);
            }

            let lease = WorkerLease::new(next.id, worker.clone(), now, self.inner.settings.lease);
            slot.job = next.clone();
            slot.lease = Some(lease.clone());

            metrics::counter!("jobs_claimed_total").increment(1);
            info!(
                event = "job_claimed",
                job_id = %next.id,
                worker_id = %worker,
                priority = next.priority,
                retry_count = next.retry_count,
                lease_expires_at = %lease.expires_at,
                "Job claimed"
            );
            self.notify(NotificationEvent::JobClaimed {
                job_id: next.id,
                worker_id: worker.clone(),
            });

            return Ok(Some(Claim { job: next, lease }));
        }
    }

    /// Extends a live lease by one lease window.
    pub async fn renew(
        &self,
        job_id: JobId,
        worker: &WorkerId,
    ) -> Result<WorkerLease, SchedulerError> {
        let slot = self.active_slot(job_id).await?;
        let mut slot = slot.lock().await;
        let now = self.inner.clock.now();
        self.check_holder(&mut slot, worker, now).await?;

        let lease_ttl = self.inner.settings.lease;
        let lease = slot
            .lease
            .as_mut()
            .ok_or(SchedulerError::LeaseLost(job_id))?;
        lease.renew(now, lease_ttl);
        debug!(job_id = %job_id, worker_id = %worker, expires_at = %lease.expires_at, "Lease renewed");
        Ok(lease.clone())
    }

    pub async fn complete(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        result: Value,
    ) -> Result<Job, SchedulerError> {
        let slot = self.active_slot(job_id).await?;
        let mut slot = slot.lock().await;
        let now = self.inner.clock.now();
        self.check_holder(&mut slot, worker, now).await?;

        let mut next = slot.job.clone();
        next.transition(JobStatus::Completed)?;
        next.completed_at = Some(now);
        next.result = Some(result);
        next.error = None;
        self.persist(&next).await?;

        slot.job = next.clone();
        slot.lease = None;
        self.inner.slots.remove(&job_id);

        let duration_ms = next
            .started_at
            .map_or(0, |started| (now - started).num_milliseconds());
        metrics::counter!("jobs_completed_total").increment(1);
        info!(
            event = "job_completed",
            job_id = %job_id,
            worker_id = %worker,
            duration_ms,
            within_sla = !next.is_past_deadline(now),
            "Job completed"
        );
        self.notify(NotificationEvent::JobCompleted { job_id });

        Ok(next)
    }

    /// Records a worker-side failure. The job goes back to the queue while
    /// retry budget remains, otherwise it becomes `failed`.
    pub async fn fail(
        &self,
        job_id: JobId,
        worker: &WorkerId,
        reason: &str,
    ) -> Result<Job, SchedulerError> {
        let slot = self.active_slot(job_id).await?;
        let mut slot = slot.lock().await;
        let now = self.inner.clock.now();
        self.check_holder(&mut slot, worker, now).await?;

        self.retire(&mut slot, now, reason, "worker_failure").await
    }

    /// Read-only snapshot of a job.
    pub async fn get(&self, job_id: JobId) -> Result<Job, SchedulerError> {
        if let Some(slot) = self.slot(job_id) {
            return Ok(slot.lock().await.job.clone());
        }
        self.load(job_id).await?.ok_or(SchedulerError::NotFound(job_id))
    }

    /// Returns every job whose lease ran out to the queue, or fails it when
    /// its retry budget is spent.
    pub async fn sweep_expired(&self) -> SweepReport {
        let mut report = SweepReport::default();
        for slot in self.snapshot_slots() {
            let mut slot = slot.lock().await;
            let now = self.inner.clock.now();
            let expired = slot.job.status == JobStatus::InProgress
                && slot.lease.as_ref().is_none_or(|l| l.is_expired(now));
            if !expired {
                continue;
            }

            report.expired += 1;
            match self.retire(&mut slot, now, "lease expired", "lease_expired").await {
                Ok(job) if job.status == JobStatus::Pending => report.requeued += 1,
                Ok(_) => report.failed += 1,
                Err(e) => {
                    report.errors += 1;
                    warn!(event = "lease_sweep_failed", job_id = %slot.job.id, error = %e, "Failed to expire lease");
                }
            }
        }

        if report.expired > 0 {
            info!(
                event = "lease_sweep_finished",
                expired = report.expired,
                requeued = report.requeued,
                failed = report.failed,
                errors = report.errors,
                "Expired leases swept"
            );
        }
        report
    }

    /// Flags jobs that are overdue or within the warning window of their
    /// deadline. Each job is reported once per severity.
    ///
    /// Purely observational: no job state changes.
    pub async fn sla_report(&self) -> SlaReport {
        let mut report = SlaReport::default();
        let warning = self.inner.settings.sla_warning;
        for slot in self.snapshot_slots() {
            // Busy slots are being transitioned; the next report catches them.
            let Ok(mut slot) = slot.try_lock() else {
                continue;
            };
            if slot.job.status.is_terminal() {
                continue;
            }
            let now = self.inner.clock.now();
            let flag = if slot.job.is_past_deadline(now) {
                report.overdue += 1;
                SlaFlag::Overdue
            } else if slot.job.time_to_deadline(now) <= warning {
                report.at_risk += 1;
                SlaFlag::AtRisk
            } else {
                continue;
            };
            if flag <= slot.sla_flag {
                continue;
            }

            slot.sla_flag = flag;
            report.newly_flagged += 1;
            let overdue = flag == SlaFlag::Overdue;
            metrics::counter!("sla_risk_total", "status" => slot.job.status.as_str()).increment(1);
            warn!(
                event = "sla_risk",
                job_id = %slot.job.id,
                status = %slot.job.status,
                sla_deadline = %slot.job.sla_deadline,
                overdue,
                retry_count = slot.job.retry_count,
                "Job is at risk of missing its SLA"
            );
            self.notify(NotificationEvent::SlaRisk {
                job_id: slot.job.id,
                status: slot.job.status,
                sla_deadline: slot.job.sla_deadline,
                overdue,
            });
        }
        report
    }

    /// Reloads non-terminal jobs after a restart. In-progress jobs lost their
    /// lease with the previous process and are expired immediately.
    pub async fn recover(&self) -> Result<RecoveryReport, SchedulerError> {
        let policy = self.inner.settings.store_retry;
        let store = &self.inner.store;
        let jobs = retry(
            &policy,
            "job_store_list_active",
            |e: &JobStoreError| matches!(e, JobStoreError::Unavailable(_)),
            |_| store.list_active(),
        )
        .await
        .map_err(|e| SchedulerError::Unavailable {
            attempts: e.attempts,
            message: e.error.to_string(),
        })?;

        let mut report = RecoveryReport::default();
        for job in jobs {
            if self.inner.slots.contains_key(&job.id) {
                continue;
            }
            let now = self.inner.clock.now();
            match job.status {
                JobStatus::Pending => {
                    if let Err(e) = validate_url(&job.url) {
                        let mut failed = job.clone();
                        failed.transition(JobStatus::Failed)?;
                        failed.completed_at = Some(now);
                        failed.error = Some(e.to_string());
                        self.persist(&failed).await?;
                        metrics::counter!("jobs_failed_total").increment(1);
                        warn!(event = "job_failed", job_id = %job.id, reason = %e, "Recovered job has an invalid URL");
                        report.failed += 1;
                        continue;
                    }
                    let seq = self.inner.queue.next_seq();
                    self.track(job, seq);
                    report.requeued += 1;
                }
                JobStatus::InProgress => {
                    let id = job.id;
                    let slot = Arc::new(Mutex::new(JobSlot {
                        job,
                        seq: self.inner.queue.next_seq(),
                        lease: None,
                        sla_flag: SlaFlag::None,
                    }));
                    self.inner.slots.insert(id, Arc::clone(&slot));

                    let mut slot = slot.lock().await;
                    let retired = self
                        .retire(&mut slot, now, "lease lost on restart", "lease_expired")
                        .await?;
                    report.expired += 1;
                    if retired.status == JobStatus::Failed {
                        report.failed += 1;
                    } else {
                        report.requeued += 1;
                    }
                }
                JobStatus::Completed | JobStatus::Failed => {}
            }
        }

        info!(
            event = "scheduler_recovered",
            requeued = report.requeued,
            expired = report.expired,
            failed = report.failed,
            "Recovered jobs from store"
        );
        Ok(report)
    }

    fn track(&self, job: Job, seq: u64) {
        let entry = QueueEntry {
            job_id: job.id,
            priority: job.priority,
            deadline: job.sla_deadline,
            seq,
        };
        self.inner.slots.insert(
            job.id,
            Arc::new(Mutex::new(JobSlot {
                job,
                seq,
                lease: None,
                sla_flag: SlaFlag::None,
            })),
        );
        self.inner.queue.push(entry);
    }

    fn slot(&self, job_id: JobId) -> Option<Arc<Mutex<JobSlot>>> {
        self.inner.slots.get(&job_id).map(|s| Arc::clone(s.value()))
    }

    fn snapshot_slots(&self) -> Vec<Arc<Mutex<JobSlot>>> {
        self.inner
            .slots
            .iter()
            .map(|s| Arc::clone(s.value()))
            .collect()
    }

    /// Slot of a job that is still pending or in progress. Terminal and
    /// unknown jobs map to `Terminal` and `NotFound`.
    async fn active_slot(&self, job_id: JobId) -> Result<Arc<Mutex<JobSlot>>, SchedulerError> {
        if let Some(slot) = self.slot(job_id) {
            return Ok(slot);
        }
        match self.load(job_id).await? {
            Some(job) if job.status.is_terminal() => Err(SchedulerError::Terminal {
                job_id,
                status: job.status,
            }),
            Some(_) => Err(SchedulerError::LeaseLost(job_id)),
            None => Err(SchedulerError::NotFound(job_id)),
        }
    }

    /// Confirms `worker` holds a live lease on the slot's job. A lease found
    /// expired here is retired on the spot so the sweep cannot count it again.
    async fn check_holder(
        &self,
        slot: &mut JobSlot,
        worker: &WorkerId,
        now: DateTime<Utc>,
    ) -> Result<(), SchedulerError> {
        let job_id = slot.job.id;
        if slot.job.status.is_terminal() {
            return Err(SchedulerError::Terminal {
                job_id,
                status: slot.job.status,
            });
        }

        let check = match &slot.lease {
            Some(lease) if slot.job.status == JobStatus::InProgress && lease.is_held_by(worker) => {
                if lease.is_expired(now) {
                    LeaseCheck::Expired
                } else {
                    LeaseCheck::Valid
                }
            }
            _ => LeaseCheck::NotHeld,
        };

        match check {
            LeaseCheck::Valid => Ok(()),
            LeaseCheck::NotHeld => Err(SchedulerError::LeaseLost(job_id)),
            LeaseCheck::Expired => {
                self.retire(slot, now, "lease expired", "lease_expired")
                    .await?;
                Err(SchedulerError::LeaseLost(job_id))
            }
        }
    }

    /// Takes an in-progress job out of its lease: back to `pending` with one
    /// more retry, or `failed` when the budget is spent.
    async fn retire(
        &self,
        slot: &mut JobSlot,
        now: DateTime<Utc>,
        reason: &str,
        cause: &'static str,
    ) -> Result<Job, SchedulerError> {
        let job_id = slot.job.id;
        let worker = slot.lease.as_ref().map(|l| l.worker_id.clone());
        let exhausted = slot.job.retry_count >= self.inner.settings.max_retries;

        let mut next = slot.job.clone();
        if exhausted {
            next.transition(JobStatus::Failed)?;
            next.completed_at = Some(now);
        } else {
            next.transition(JobStatus::Pending)?;
            next.retry_count += 1;
            next.started_at = None;
        }
        next.error = Some(reason.to_string());
        self.persist(&next).await?;

        slot.job = next.clone();
        slot.lease = None;

        if cause == "lease_expired" {
            metrics::counter!("lease_expirations_total").increment(1);
            if let Some(worker_id) = worker.clone() {
                self.notify(NotificationEvent::LeaseExpired { job_id, worker_id });
            }
        }

        if exhausted {
            self.inner.slots.remove(&job_id);
            metrics::counter!("jobs_failed_total").increment(1);
            warn!(
                event = "job_failed",
                job_id = %job_id,
                worker_id = ?worker,
                cause,
                reason,
                retry_count = next.retry_count,
                "Job failed, retry budget exhausted"
            );
            self.notify(NotificationEvent::JobFailed {
                job_id,
                reason: reason.to_string(),
            });
        } else {
            self.inner.queue.push(QueueEntry {
                job_id,
                priority: next.priority,
                deadline: next.sla_deadline,
                seq: slot.seq,
            });
            metrics::counter!("jobs_retried_total", "reason" => cause).increment(1);
            info!(
                event = "job_retried",
                job_id = %job_id,
                worker_id = ?worker,
                cause,
                reason,
                retry_count = next.retry_count,
                "Job returned to queue"
            );
            self.notify(NotificationEvent::JobRetried {
                job_id,
                retry_count: next.retry_count,
                reason: reason.to_string(),
            });
        }

        Ok(next)
    }

    async fn persist(&self, job: &Job) -> Result<(), SchedulerError> {
        let store = &self.inner.store;
        retry(
            &self.inner.settings.store_retry,
            "job_store_upsert",
            |e: &JobStoreError| matches!(e, JobStoreError::Unavailable(_)),
            |_| store.upsert(job),
        )
        .await
        .map_err(|e| {
            warn!(event = "job_store_unavailable", job_id = %job.id, attempts = e.attempts, error = %e.error, "Failed to persist job");
            SchedulerError::Unavailable {
                attempts: e.attempts,
                message: e.error.to_string(),
            }
        })
    }

    async fn load(&self, job_id: JobId) -> Result<Option<Job>, SchedulerError> {
        let store = &self.inner.store;
        retry(
            &self.inner.settings.store_retry,
            "job_store_get",
            |e: &JobStoreError| matches!(e, JobStoreError::Unavailable(_)),
            |_| store.get(job_id),
        )
        .await
        .map_err(|e| SchedulerError::Unavailable {
            attempts: e.attempts,
            message: e.error.to_string(),
        })
    }

    fn notify(&self, event: NotificationEvent) {
        let _ = self.inner.event_bus.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::services::job_store::MemoryJobStore;

    struct Harness {
        scheduler: JobScheduler,
        clock: ManualClock,
        store: Arc<MemoryJobStore>,
        events: broadcast::Receiver<NotificationEvent>,
    }

    fn harness(max_retries: u32) -> Harness {
        let clock = ManualClock::default();
        let store = Arc::new(MemoryJobStore::new());
        let (tx, rx) = broadcast::channel(256);
        let settings = SchedulerSettings {
            recrawl_sla: Duration::hours(1),
            crawl_sla: Duration::hours(24),
            lease: Duration::seconds(30),
            max_retries,
            sla_warning: Duration::minutes(10),
            store_retry: RetryPolicy::new(1, 0),
        };
        let scheduler = JobScheduler::new(store.clone(), Arc::new(clock.clone()), settings, tx);
        Harness {
            scheduler,
            clock,
            store,
            events: rx,
        }
    }

    fn worker(name: &str) -> WorkerId {
        WorkerId::from(name)
    }

    #[tokio::test]
    async fn test_submit_sets_deadline_and_persists() {
        let h = harness(3);
        let job = h
            .scheduler
            .submit("https://example.com/page", 10, JobKind::Recrawl)
            .await
            .unwrap();

        assert_eq!(job.status, JobStatus::Pending);
        assert_eq!(job.sla_deadline - job.created_at, Duration::hours(1));
        assert_eq!(h.store.get(job.id).await.unwrap().unwrap(), job);
        assert_eq!(h.scheduler.queue_depth(), 1);
    }

    #[tokio::test]
    async fn test_submit_rejects_bad_input_without_persisting() {
        let h = harness(3);
        for (url, priority) in [
            ("not a url", 5),
            ("ftp://example.com/file", 5),
            ("https://example.com", 11),
            ("https://example.com", -1),
        ] {
            let err = h.scheduler.submit(url, priority, JobKind::Recrawl).await;
            assert!(matches!(err, Err(SchedulerError::Validation(_))), "{url} {priority}");
        }

        let long = format!("https://example.com/{}", "a".repeat(MAX_URL_LENGTH));
        assert!(matches!(
            h.scheduler.submit(&long, 5, JobKind::Recrawl).await,
            Err(SchedulerError::Validation(_))
        ));
        assert!(h.store.list_active().await.unwrap().is_empty());
        assert_eq!(h.scheduler.queue_depth(), 0);
    }

    #[tokio::test]
    async fn test_claim_order_priority_then_deadline_then_fifo() {
        let h = harness(3);
        let crawl = h.scheduler.submit("https://a.test/crawl", 5, JobKind::Crawl).await.unwrap();
        let first = h.scheduler.submit("https://a.test/1", 5, JobKind::Recrawl).await.unwrap();
        h.clock.advance(Duration::seconds(1));
        let second = h.scheduler.submit("https://a.test/2", 5, JobKind::Recrawl).await.unwrap();
        let low = h.scheduler.submit("https://a.test/low", 1, JobKind::Recrawl).await.unwrap();
        let high = h.scheduler.submit("https://a.test/high", 9, JobKind::Crawl).await.unwrap();

        let w = worker("w1");
        let mut order = Vec::new();
        while let Some(claim) = h.scheduler.claim(&w).await.unwrap() {
            order.push(claim.job.id);
        }
        assert_eq!(order, vec![high.id, first.id, second.id, crawl.id, low.id]);
    }

    #[tokio::test]
    async fn test_equal_priority_and_deadline_is_fifo() {
        let h = harness(3);
        let mut submitted = Vec::new();
        for i in 0..5 {
            let job = h
                .scheduler
                .submit(&format!("https://a.test/{i}"), 7, JobKind::Recrawl)
                .await
                .unwrap();
            submitted.push(job.id);
        }

        let w = worker("w1");
        let mut claimed = Vec::new();
        while let Some(claim) = h.scheduler.claim(&w).await.unwrap() {
            claimed.push(claim.job.id);
        }
        assert_eq!(claimed, submitted);
    }

    #[tokio::test]
    async fn test_claim_transitions_and_leases() {
        let h = harness(3);
        let job = h.scheduler.submit("https://a.test", 5, JobKind::Recrawl).await.unwrap();
        let claim = h.scheduler.claim(&worker("w1")).await.unwrap().unwrap();

        assert_eq!(claim.job.id, job.id);
        assert_eq!(claim.job.status, JobStatus::InProgress);
        assert_eq!(claim.job.started_at, Some(h.clock.now()));
        assert_eq!(claim.lease.expires_at, h.clock.now() + Duration::seconds(30));
        assert!(h.scheduler.claim(&worker("w2")).await.unwrap().is_none());
        assert_eq!(
            h.store.get(job.id).await.unwrap().unwrap().status,
            JobStatus::InProgress
        );
    }

    #[tokio::test]
    async fn test_complete_is_terminal_and_idempotent() {
        let h = harness(3);
        let job = h.scheduler.submit("https://a.test", 5, JobKind::Recrawl).await.unwrap();
        let w = worker("w1");
        h.scheduler.claim(&w).await.unwrap().unwrap();

        let done = h
            .scheduler
            .complete(job.id, &w, serde_json::json!({"status_code": 200}))
            .await
            .unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert!(done.completed_at.is_some());

        assert_eq!(
            h.scheduler.complete(job.id, &w, Value::Null).await,
            Err(SchedulerError::Terminal {
                job_id: job.id,
                status: JobStatus::Completed
            })
        );
        assert!(matches!(
            h.scheduler.fail(job.id, &w, "late").await,
            Err(SchedulerError::Terminal { .. })
        ));
        assert_eq!(h.scheduler.get(job.id).await.unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_fail_requeues_until_budget_spent() {
        let h = harness(1);
        let job = h.scheduler.submit("https://a.test", 5, JobKind::Recrawl).await.unwrap();
        let w = worker("w1");

        h.scheduler.claim(&w).await.unwrap().unwrap();
        let retried = h.scheduler.fail(job.id, &w, "HTTP 503").await.unwrap();
        assert_eq!(retried.status, JobStatus::Pending);
        assert_eq!(retried.retry_count, 1);
        assert_eq!(retried.sla_deadline, job.sla_deadline);
        assert_eq!(retried.error.as_deref(), Some("HTTP 503"));

        h.scheduler.claim(&w).await.unwrap().unwrap();
        let failed = h.scheduler.fail(job.id, &w, "HTTP 503").await.unwrap();
        assert_eq!(failed.status, JobStatus::Failed);
        assert_eq!(failed.retry_count, 1);
        assert!(h.scheduler.claim(&w).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_wrong_worker_cannot_complete() {
        let h = harness(3);
        let job = h.scheduler.submit("https://a.test", 5, JobKind::Recrawl).await.unwrap();
        h.scheduler.claim(&worker("w1")).await.unwrap().unwrap();

        assert_eq!(
            h.scheduler.complete(job.id, &worker("w2"), Value::Null).await,
            Err(SchedulerError::LeaseLost(job.id))
        );
        assert_eq!(h.scheduler.get(job.id).await.unwrap().status, JobStatus::InProgress);
    }

    #[tokio::test]
    async fn test_renew_extends_lease() {
        let h = harness(3);
        let job = h.scheduler.submit("https://a.test", 5, JobKind::Recrawl).await.unwrap();
        let w = worker("w1");
        h.scheduler.claim(&w).await.unwrap().unwrap();

        h.clock.advance(Duration::seconds(20));
        let lease = h.scheduler.renew(job.id, &w).await.unwrap();
        assert_eq!(lease.expires_at, h.clock.now() + Duration::seconds(30));
        assert_eq!(lease.renewals, 1);

        h.clock.advance(Duration::seconds(20));
        assert_eq!(h.scheduler.sweep_expired().await.expired, 0);
        h.scheduler.complete(job.id, &w, Value::Null).await.unwrap();
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable_with_retry_increment() {
        let h = harness(3);
        let job = h.scheduler.submit("https://example.com/page", 5, JobKind::Recrawl).await.unwrap();
        let first = worker("w1");
        h.scheduler.claim(&first).await.unwrap().unwrap();

        h.clock.advance(Duration::seconds(30));
        let report = h.scheduler.sweep_expired().await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.requeued, 1);

        let second = worker("w2");
        let claim = h.scheduler.claim(&second).await.unwrap().unwrap();
        assert_eq!(claim.job.id, job.id);
        assert_eq!(claim.job.retry_count, 1);

        assert_eq!(
            h.scheduler.complete(job.id, &first, Value::Null).await,
            Err(SchedulerError::LeaseLost(job.id))
        );
        h.scheduler.complete(job.id, &second, Value::Null).await.unwrap();
    }

    #[tokio::test]
    async fn test_late_completion_applies_expiry_once() {
        let h = harness(3);
        let job = h.scheduler.submit("https://a.test", 5, JobKind::Recrawl).await.unwrap();
        let w = worker("w1");
        h.scheduler.claim(&w).await.unwrap().unwrap();
        h.clock.advance(Duration::seconds(31));

        assert_eq!(
            h.scheduler.complete(job.id, &w, Value::Null).await,
            Err(SchedulerError::LeaseLost(job.id))
        );
        assert_eq!(h.scheduler.sweep_expired().await.expired, 0);

        let snapshot = h.scheduler.get(job.id).await.unwrap();
        assert_eq!(snapshot.status, JobStatus::Pending);
        assert_eq!(snapshot.retry_count, 1);
    }

    #[tokio::test]
    async fn test_expiry_past_budget_fails_job() {
        let h = harness(0);
        let job = h.scheduler.submit("https://a.test", 5, JobKind::Recrawl).await.unwrap();
        h.scheduler.claim(&worker("w1")).await.unwrap().unwrap();
        h.clock.advance(Duration::minutes(5));

        let report = h.scheduler.sweep_expired().await;
        assert_eq!(report.failed, 1);
        assert_eq!(h.scheduler.get(job.id).await.unwrap().status, JobStatus::Failed);
        assert_eq!(h.scheduler.active_jobs(), 0);
    }

    #[tokio::test]
    async fn test_sla_report_flags_each_severity_once() {
        let mut h = harness(3);
        let job = h.scheduler.submit("https://a.test", 5, JobKind::Recrawl).await.unwrap();
        while h.events.try_recv().is_ok() {}

        assert_eq!(h.scheduler.sla_report().await, SlaReport::default());

        h.clock.advance(Duration::minutes(55));
        let report = h.scheduler.sla_report().await;
        assert_eq!((report.at_risk, report.newly_flagged), (1, 1));
        assert_eq!(h.scheduler.sla_report().await.newly_flagged, 0);

        h.clock.advance(Duration::minutes(5));
        let report = h.scheduler.sla_report().await;
        assert_eq!((report.overdue, report.newly_flagged), (1, 1));

        let mut overdue_events = 0;
        while let Ok(event) = h.events.try_recv() {
            if let NotificationEvent::SlaRisk { job_id, overdue: true, .. } = event {
                assert_eq!(job_id, job.id);
                overdue_events += 1;
            }
        }
        assert_eq!(overdue_events, 1);
        assert_eq!(h.scheduler.get(job.id).await.unwrap().status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn test_recover_requeues_and_expires() {
        let h = harness(3);
        let now = h.clock.now();
        let pending = Job::new(JobKind::Recrawl, "https://a.test/p", 5, now, Duration::hours(1));
        let mut running = Job::new(JobKind::Recrawl, "https://a.test/r", 5, now, Duration::hours(1));
        running.transition(JobStatus::InProgress).unwrap();
        running.started_at = Some(now);
        let broken = Job::new(JobKind::Crawl, "nonsense", 0, now, Duration::hours(1));
        for job in [&pending, &running, &broken] {
            h.store.upsert(job).await.unwrap();
        }

        let report = h.scheduler.recover().await.unwrap();
        assert_eq!(
            report,
            RecoveryReport {
                requeued: 2,
                expired: 1,
                failed: 1
            }
        );

        let recovered = h.scheduler.get(running.id).await.unwrap();
        assert_eq!(recovered.status, JobStatus::Pending);
        assert_eq!(recovered.retry_count, 1);
        assert_eq!(h.scheduler.get(broken.id).await.unwrap().status, JobStatus::Failed);
        assert_eq!(h.scheduler.queue_depth(), 2);
    }

    #[tokio::test]
    async fn test_get_unknown_job_is_not_found() {
        let h = harness(3);
        let id = JobId::new();
        assert_eq!(h.scheduler.get(id).await, Err(SchedulerError::NotFound(id)));
        assert_eq!(
            h.scheduler.complete(id, &worker("w"), Value::Null).await,
            Err(SchedulerError::NotFound(id))
        );
    }
}
