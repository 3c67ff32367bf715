use std::sync::Arc;

use chrono::Duration;
use tokio::sync::broadcast;

use crate::clients::elasticsearch::ElasticsearchClient;
use crate::clients::fetcher::HttpFetchExecutor;
use crate::clients::{CrawlExecutor, IndexClient};
use crate::clock::{SharedClock, system_clock};
use crate::config::{Backend, Config};
use crate::db::Store;
use crate::domain::events::NotificationEvent;
use crate::services::{
    CacheStore, JobScheduler, Maintenance, MaintenanceSettings, MemoryCacheStore,
    MemoryRateLimitStore, RateLimitStore, RateLimiter, SchedulerSettings, SearchOrchestrator,
    SearchSettings, SqlCacheStore, SqlJobStore, SqlRateLimitStore,
};

/// Everything the API, the workers and the maintenance loop share.
#[derive(Clone)]
pub struct SharedState {
    pub config: Arc<Config>,

    pub store: Store,

    pub clock: SharedClock,

    pub index: Arc<dyn IndexClient>,

    pub cache: Arc<dyn CacheStore>,

    pub search: SearchOrchestrator,

    pub rate_limiter: Arc<RateLimiter>,

    pub scheduler: JobScheduler,

    pub event_bus: broadcast::Sender<NotificationEvent>,
}

impl SharedState {
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        let store = Store::with_pool_options(
            &config.general.database_path,
            config.general.max_db_connections,
            config.general.min_db_connections,
        )
        .await?;
        let index = Arc::new(ElasticsearchClient::new(&config.index));
        Ok(Self::build(config, store, index, system_clock()))
    }

    /// Wires the services around an existing store and index. Tests use this
    /// with an in-memory database, a mock index and a manual clock.
    #[must_use]
    pub fn build(
        config: Config,
        store: Store,
        index: Arc<dyn IndexClient>,
        clock: SharedClock,
    ) -> Self {
        let (event_bus, _) = broadcast::channel(config.general.event_bus_buffer_size.max(1));

        let inflight_ttl = Duration::seconds(
            i64::try_from(config.cache.inflight_ttl_seconds).unwrap_or(i64::MAX / 1000),
        );
        let cache: Arc<dyn CacheStore> = match config.cache.backend {
            Backend::Memory => Arc::new(MemoryCacheStore::new(Arc::clone(&clock), inflight_ttl)),
            Backend::Database => Arc::new(SqlCacheStore::new(
                store.clone(),
                Arc::clone(&clock),
                inflight_ttl,
            )),
        };

        let rate_store: Arc<dyn RateLimitStore> = match config.rate_limit.backend {
            Backend::Memory => Arc::new(MemoryRateLimitStore::new()),
            Backend::Database => Arc::new(SqlRateLimitStore::new(store.clone())),
        };
        let rate_limiter = Arc::new(RateLimiter::new(
            rate_store,
            Arc::clone(&clock),
            config.rate_limit.failure_policy,
        ));

        let search = SearchOrchestrator::new(
            Arc::clone(&index),
            Arc::clone(&cache),
            Arc::clone(&clock),
            SearchSettings::from_config(&config),
        );

        let scheduler = JobScheduler::new(
            Arc::new(SqlJobStore::new(store.clone())),
            Arc::clone(&clock),
            SchedulerSettings::from_config(&config.scheduler),
            event_bus.clone(),
        );

        Self {
            config: Arc::new(config),
            store,
            clock,
            index,
            cache,
            search,
            rate_limiter,
            scheduler,
            event_bus,
        }
    }

    #[must_use]
    pub fn maintenance(&self) -> Maintenance {
        Maintenance::new(
            self.scheduler.clone(),
            Arc::clone(&self.cache),
            Arc::clone(&self.rate_limiter),
            MaintenanceSettings::from_config(&self.config),
        )
    }

    #[must_use]
    pub fn crawl_executor(&self) -> Arc<dyn CrawlExecutor> {
        Arc::new(HttpFetchExecutor::new(&self.config.workers))
    }
}
