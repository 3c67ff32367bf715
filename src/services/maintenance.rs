use anyhow::Result;
use chrono::Duration;
use std::sync::Arc;
use tokio::sync::RwLock;
use tokio::time::interval;
use tokio_cron_scheduler::{Job as CronJob, JobScheduler as CronScheduler};
use tracing::{error, info};

use crate::config::Config;
use crate::services::cache::CacheStore;
use crate::services::rate_limiter::RateLimiter;
use crate::services::scheduler::{JobScheduler, SlaReport, SweepReport};

#[derive(Debug, Clone)]
pub struct MaintenanceSettings {
    pub interval: std::time::Duration,
    pub cron_expression: Option<String>,
    pub rate_key_idle: Duration,
}

impl MaintenanceSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            interval: std::time::Duration::from_secs(
                config.scheduler.sweep_interval_seconds.max(1),
            ),
            cron_expression: config.scheduler.cron_expression.clone(),
            rate_key_idle: Duration::seconds(
                i64::try_from(config.rate_limit.idle_eviction_seconds).unwrap_or(i64::MAX / 1000),
            ),
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MaintenanceReport {
    pub sweep: SweepReport,
    pub sla: SlaReport,
    pub cache_purged: u64,
    pub rate_keys_evicted: u64,
}

/// Periodic housekeeping: lease sweep, SLA report, cache purge and idle
/// rate-key eviction. Runs on the sweep interval or a cron expression.
#[derive(Clone)]
pub struct Maintenance {
    scheduler: JobScheduler,
    cache: Arc<dyn CacheStore>,
    rate_limiter: Arc<RateLimiter>,
    settings: MaintenanceSettings,
    running: Arc<RwLock<bool>>,
}

impl Maintenance {
    #[must_use]
    pub fn new(
        scheduler: JobScheduler,
        cache: Arc<dyn CacheStore>,
        rate_limiter: Arc<RateLimiter>,
        settings: MaintenanceSettings,
    ) -> Self {
        Self {
            scheduler,
            cache,
            rate_limiter,
            settings,
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub async fn start(&self) -> Result<()> {
        *self.running.write().await = true;
        info!("Starting maintenance tasks");

        if let Some(cron_expr) = self.settings.cron_expression.clone() {
            self.run_with_cron(&cron_expr).await
        } else {
            self.run_with_interval().await
        }
    }

    async fn run_with_cron(&self, cron_expr: &str) -> Result<()> {
        let mut sched = CronScheduler::new().await?;

        let maintenance = self.clone();
        let job = CronJob::new_async(cron_expr, move |_uuid, _lock| {
            let maintenance = maintenance.clone();
            Box::pin(async move {
                if !*maintenance.running.read().await {
                    return;
                }
                maintenance.run_once().await;
            })
        })?;

        sched.add(job).await?;
        sched.start().await?;
        info!("Maintenance running with cron: {}", cron_expr);

        loop {
            if !*self.running.read().await {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
        }

        sched.shutdown().await?;
        Ok(())
    }

    async fn run_with_interval(&self) -> Result<()> {
        info!(
            "Maintenance running every {}s",
            self.settings.interval.as_secs()
        );
        let mut ticker = interval(self.settings.interval);

        loop {
            ticker.tick().await;
            if !*self.running.read().await {
                break;
            }
            self.run_once().await;
        }

        Ok(())
    }

    pub async fn stop(&self) {
        info!("Stopping maintenance...");
        *self.running.write().await = false;
    }

    /// One maintenance pass. Each step logs its own failure and the pass
    /// carries on.
    pub async fn run_once(&self) -> MaintenanceReport {
        let start = std::time::Instant::now();
        info!(event = "job_started", job_name = "maintenance", "Starting maintenance pass");

        let sweep = self.scheduler.sweep_expired().await;
        let sla = self.scheduler.sla_report().await;

        let cache_purged = match self.cache.purge_expired().await {
            Ok(n) => n,
            Err(e) => {
                error!(event = "job_failed", job_name = "purge_cache", error = %e, "Cache purge failed");
                0
            }
        };

        let rate_keys_evicted = match self.rate_limiter.evict_idle(self.settings.rate_key_idle).await {
            Ok(n) => n,
            Err(e) => {
                error!(event = "job_failed", job_name = "evict_rate_keys", error = %e, "Rate key eviction failed");
                0
            }
        };

        info!(
            event = "job_finished",
            job_name = "maintenance",
            leases_expired = sweep.expired,
            sla_at_risk = sla.at_risk,
            sla_overdue = sla.overdue,
            cache_purged,
            rate_keys_evicted,
            duration_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Maintenance pass finished"
        );

        MaintenanceReport {
            sweep,
            sla,
            cache_purged,
            rate_keys_evicted,
        }
    }
}
