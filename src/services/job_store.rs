//! Metadata store contract for job snapshots.
//!
//! Every write is a single-row upsert keyed by job id, so readers and the
//! scheduler need no locking beyond what the store gives.

use crate::db::Store;
use crate::domain::{Job, JobId, JobStatus};
use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum JobStoreError {
    #[error("Job store unavailable: {0}")]
    Unavailable(String),

    #[error("Stored job is corrupt: {0}")]
    Corrupt(String),
}

impl From<anyhow::Error> for JobStoreError {
    fn from(err: anyhow::Error) -> Self {
        if err.downcast_ref::<sea_orm::DbErr>().is_some() {
            Self::Unavailable(err.to_string())
        } else {
            Self::Corrupt(err.to_string())
        }
    }
}

#[async_trait]
pub trait JobStore: Send + Sync {
    async fn upsert(&self, job: &Job) -> Result<(), JobStoreError>;

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError>;

    /// Jobs still `pending` or `in_progress`, oldest first.
    async fn list_active(&self) -> Result<Vec<Job>, JobStoreError>;
}

#[derive(Default)]
pub struct MemoryJobStore {
    jobs: DashMap<JobId, Job>,
}

impl MemoryJobStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn upsert(&self, job: &Job) -> Result<(), JobStoreError> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.jobs.get(&id).map(|j| j.value().clone()))
    }

    async fn list_active(&self) -> Result<Vec<Job>, JobStoreError> {
        let mut jobs: Vec<Job> = self
            .jobs
            .iter()
            .filter(|j| !j.status.is_terminal())
            .map(|j| j.value().clone())
            .collect();
        jobs.sort_by_key(|j| j.created_at);
        Ok(jobs)
    }
}

pub struct SqlJobStore {
    store: Store,
}

impl SqlJobStore {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl JobStore for SqlJobStore {
    async fn upsert(&self, job: &Job) -> Result<(), JobStoreError> {
        Ok(self.store.upsert_job(job).await?)
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>, JobStoreError> {
        Ok(self.store.get_job(id).await?)
    }

    async fn list_active(&self) -> Result<Vec<Job>, JobStoreError> {
        Ok(self
            .store
            .list_jobs_by_status(&[JobStatus::Pending, JobStatus::InProgress])
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::JobKind;
    use chrono::{Duration, Utc};

    #[tokio::test]
    async fn test_memory_store_lists_only_active_jobs() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let pending = Job::new(JobKind::Recrawl, "https://a.test", 5, now, Duration::hours(1));
        let mut done = Job::new(JobKind::Crawl, "https://b.test", 0, now, Duration::hours(1));
        done.transition(JobStatus::InProgress).unwrap();
        done.transition(JobStatus::Completed).unwrap();

        store.upsert(&pending).await.unwrap();
        store.upsert(&done).await.unwrap();

        let active = store.list_active().await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, pending.id);
        assert_eq!(store.get(done.id).await.unwrap().unwrap().status, JobStatus::Completed);
    }

    #[tokio::test]
    async fn test_sql_store_upsert_overwrites_single_row() {
        let store = SqlJobStore::new(Store::new("sqlite::memory:").await.unwrap());
        let mut job = Job::new(
            JobKind::Recrawl,
            "https://example.com/page",
            10,
            Utc::now(),
            Duration::hours(1),
        );
        store.upsert(&job).await.unwrap();

        job.transition(JobStatus::InProgress).unwrap();
        job.transition(JobStatus::Failed).unwrap();
        job.error = Some("timeout".to_string());
        store.upsert(&job).await.unwrap();

        let loaded = store.get(job.id).await.unwrap().unwrap();
        assert_eq!(loaded.status, JobStatus::Failed);
        assert_eq!(loaded.error.as_deref(), Some("timeout"));
        assert!(store.list_active().await.unwrap().is_empty());
    }
}
