use crate::domain::{Job, JobId, JobStatus};
use anyhow::Result;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, Statement};
use std::path::Path;
use std::time::Duration;
use tracing::info;

pub mod migrator;
pub mod repositories;

pub use repositories::cache::CachedPayload;
pub use repositories::rate_limit::WindowCount;

#[derive(Clone)]
pub struct Store {
    pub conn: DatabaseConnection,
}

impl Store {
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::with_pool_options(db_url, 5, 1).await
    }

    pub async fn with_pool_options(
        db_url: &str,
        max_connections: u32,
        min_connections: u32,
    ) -> Result<Self> {
        use sea_orm_migration::MigratorTrait;

        let in_memory = db_url.contains(":memory:");
        if !in_memory {
            let path_str = db_url.trim_start_matches("sqlite:").trim_start_matches("//");
            let path_str = path_str.split('?').next().unwrap_or(path_str);
            if let Some(parent) = Path::new(path_str).parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if !Path::new(path_str).exists() {
                std::fs::File::create(path_str)?;
            }
        }

        // Every pooled connection to `sqlite::memory:` is its own database.
        let (max_connections, min_connections) = if in_memory {
            (1, 1)
        } else {
            (max_connections, min_connections)
        };

        let mut opt = ConnectOptions::new(db_url.to_string());
        opt.max_connections(max_connections)
            .min_connections(min_connections)
            .connect_timeout(Duration::from_secs(10))
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(600))
            .sqlx_logging(false);

        let conn = Database::connect(opt).await?;

        migrator::Migrator::up(&conn, None).await?;

        info!(
            "Database connected & migrations applied (pool: {}-{})",
            min_connections, max_connections
        );

        Ok(Self { conn })
    }

    pub async fn ping(&self) -> Result<()> {
        let backend = self.conn.get_database_backend();
        self.conn
            .query_one(Statement::from_string(backend, "SELECT 1".to_string()))
            .await?;
        Ok(())
    }

    fn job_repo(&self) -> repositories::job::JobRepository {
        repositories::job::JobRepository::new(self.conn.clone())
    }

    fn cache_repo(&self) -> repositories::cache::CacheRepository {
        repositories::cache::CacheRepository::new(self.conn.clone())
    }

    fn rate_limit_repo(&self) -> repositories::rate_limit::RateLimitRepository {
        repositories::rate_limit::RateLimitRepository::new(self.conn.clone())
    }

    pub async fn upsert_job(&self, job: &Job) -> Result<()> {
        self.job_repo().upsert(job).await
    }

    pub async fn get_job(&self, id: JobId) -> Result<Option<Job>> {
        self.job_repo().get(id).await
    }

    pub async fn list_jobs_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        self.job_repo().list_by_status(statuses).await
    }

    pub async fn get_cached_search(&self, fingerprint: &str) -> Result<Option<CachedPayload>> {
        self.cache_repo().get(fingerprint).await
    }

    pub async fn cache_search_results(&self, fingerprint: &str, payload: CachedPayload) -> Result<()> {
        self.cache_repo().set(fingerprint, payload).await
    }

    pub async fn purge_search_cache(&self, now_ms: i64) -> Result<u64> {
        self.cache_repo().purge_expired(now_ms).await
    }

    pub async fn try_acquire_inflight(
        &self,
        fingerprint: &str,
        token: &str,
        now_ms: i64,
        expires_at_ms: i64,
    ) -> Result<bool> {
        self.cache_repo()
            .try_acquire_inflight(fingerprint, token, now_ms, expires_at_ms)
            .await
    }

    pub async fn release_inflight(&self, fingerprint: &str, token: &str) -> Result<bool> {
        self.cache_repo().release_inflight(fingerprint, token).await
    }

    pub async fn purge_expired_inflight(&self, now_ms: i64) -> Result<u64> {
        self.cache_repo().purge_expired_inflight(now_ms).await
    }

    pub async fn increment_rate_window(
        &self,
        key: &str,
        window_start_ms: i64,
        cost: i64,
        limit: i64,
        now_ms: i64,
    ) -> Result<WindowCount> {
        self.rate_limit_repo()
            .increment_if_below(key, window_start_ms, cost, limit, now_ms)
            .await
    }

    pub async fn evict_idle_rate_windows(&self, cutoff_ms: i64) -> Result<u64> {
        self.rate_limit_repo().evict_idle(cutoff_ms).await
    }
}
