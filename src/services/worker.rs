//! In-process crawl workers.
//!
//! Each worker is an independent task that talks to the scheduler only
//! through `claim`, `renew`, `complete` and `fail`. While a job runs the
//! worker heartbeats its lease; if the lease is lost the result is dropped
//! and the job's fate is left to the scheduler.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::clients::CrawlExecutor;
use crate::config::{SchedulerConfig, WorkerConfig};
use crate::domain::WorkerId;
use crate::services::scheduler::{Claim, JobScheduler, SchedulerError};

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub count: usize,
    pub min_backoff: Duration,
    pub max_backoff: Duration,
    pub heartbeat: Duration,
}

impl WorkerSettings {
    #[must_use]
    pub fn from_config(workers: &WorkerConfig, scheduler: &SchedulerConfig) -> Self {
        let min_backoff = Duration::from_millis(workers.poll_min_backoff_ms.max(1));
        Self {
            count: workers.count,
            min_backoff,
            max_backoff: Duration::from_millis(workers.poll_max_backoff_ms).max(min_backoff),
            heartbeat: Duration::from_secs((scheduler.lease_seconds / 3).max(1)),
        }
    }
}

pub struct WorkerPool {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Starts `settings.count` workers named `{prefix}-{n}`.
    #[must_use]
    pub fn spawn(
        prefix: &str,
        scheduler: JobScheduler,
        executor: Arc<dyn CrawlExecutor>,
        settings: WorkerSettings,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        let handles = (0..settings.count)
            .map(|n| {
                let worker = Worker {
                    id: WorkerId::new(format!("{prefix}-{n}")),
                    scheduler: scheduler.clone(),
                    executor: Arc::clone(&executor),
                    settings: settings.clone(),
                    shutdown: shutdown.subscribe(),
                };
                tokio::spawn(worker.run())
            })
            .collect();

        info!(event = "workers_started", count = settings.count, "Worker pool started");
        Self { shutdown, handles }
    }

    #[must_use]
    pub fn size(&self) -> usize {
        self.handles.len()
    }

    /// Stops polling and waits for workers to finish the job they hold.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task ended abnormally");
            }
        }
        info!(event = "workers_stopped", "Worker pool stopped");
    }
}

struct Worker {
    id: WorkerId,
    scheduler: JobScheduler,
    executor: Arc<dyn CrawlExecutor>,
    settings: WorkerSettings,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        debug!(worker_id = %self.id, "Worker started");
        let mut backoff = self.settings.min_backoff;

        while !*self.shutdown.borrow() {
            match self.scheduler.claim(&self.id).await {
                Ok(Some(claim)) => {
                    backoff = self.settings.min_backoff;
                    self.process(claim).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(worker_id = %self.id, error = %e, "Claim failed");
                }
            }

            tokio::select! {
                () = tokio::time::sleep(backoff) => {}
                changed = self.shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
            backoff = (backoff * 2).min(self.settings.max_backoff);
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    async fn process(&self, claim: Claim) {
        let job_id = claim.job.id;
        let work = self.executor.execute(&claim.job);
        tokio::pin!(work);

        let period = self.settings.heartbeat;
        let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);

        let outcome = loop {
            tokio::select! {
                result = &mut work => break Some(result),
                _ = heartbeat.tick() => match self.scheduler.renew(job_id, &self.id).await {
                    Ok(_) | Err(SchedulerError::Unavailable { .. }) => {}
                    Err(e) => {
                        warn!(worker_id = %self.id, job_id = %job_id, error = %e, "Lease lost, abandoning job");
                        break None;
                    }
                },
            }
        };

        let report = match outcome {
            Some(Ok(result)) => self.scheduler.complete(job_id, &self.id, result).await,
            Some(Err(e)) => self.scheduler.fail(job_id, &self.id, &e.to_string()).await,
            None => return,
        };

        if let Err(e) = report {
            warn!(worker_id = %self.id, job_id = %job_id, error = %e, "Failed to report job outcome");
        }
    }
}
