#![allow(dead_code)]

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use chrono::{TimeZone, Utc};
use crawlgate::api;
use crawlgate::clients::{IndexClient, IndexError};
use crawlgate::clock::{ManualClock, SharedClock};
use crawlgate::config::Config;
use crawlgate::db::Store;
use crawlgate::domain::{SearchHit, SearchPage};
use crawlgate::state::SharedState;

pub const DEMO_KEY: &str = "demo-key-12345";
pub const TEST_KEY: &str = "test-key-67890";

/// Index double that counts calls and the peak number running at once.
pub struct MockIndex {
    calls: AtomicUsize,
    active: AtomicUsize,
    peak: AtomicUsize,
    delay: Duration,
    failure: Mutex<Option<IndexError>>,
}

impl MockIndex {
    pub fn new(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            delay,
            failure: Mutex::new(None),
        })
    }

    pub fn failing(delay: Duration, error: IndexError) -> Arc<Self> {
        let index = Self::new(delay);
        *index.failure.lock().unwrap() = Some(error);
        index
    }

    pub fn heal(&self) {
        *self.failure.lock().unwrap() = None;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl IndexClient for MockIndex {
    async fn query(&self, text: &str, limit: u32, offset: u64) -> Result<SearchPage, IndexError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_active, Ordering::SeqCst);

        tokio::time::sleep(self.delay).await;
        self.active.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }

        let hits = (0..limit.min(3))
            .map(|i| SearchHit {
                url: format!("https://example.com/{text}/{}", offset + u64::from(i)),
                title: format!("{text} result {i}"),
                snippet: format!("About {text}"),
                domain: "example.com".to_string(),
                crawl_date: None,
                score: 10.0 - f64::from(i),
            })
            .collect();
        Ok(SearchPage { total: 42, hits })
    }

    async fn ping(&self) -> bool {
        true
    }
}

pub fn test_config() -> Config {
    let mut config = Config::default();
    config.general.database_path = "sqlite::memory:".to_string();
    config.index.retry_base_delay_ms = 1;
    config.scheduler.store_retry_base_delay_ms = 1;
    config
}

pub fn fixed_clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(
        Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap(),
    ))
}

pub async fn shared_state(
    config: Config,
    index: Arc<dyn IndexClient>,
    clock: SharedClock,
) -> Arc<SharedState> {
    let store = Store::new(&config.general.database_path)
        .await
        .expect("Failed to open in-memory store");
    Arc::new(SharedState::build(config, store, index, clock))
}

pub async fn spawn_app(config: Config, index: Arc<dyn IndexClient>) -> (Router, Arc<SharedState>) {
    let shared = shared_state(config, index, fixed_clock()).await;
    let state = api::create_app_state(Arc::clone(&shared), None);
    (api::router(state), shared)
}
