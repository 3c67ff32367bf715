//! Cache-aside search with stampede protection.
//!
//! A request first checks the cache. On a miss it joins the single in-flight
//! resolution for its fingerprint, starting one if needed. The resolution
//! also takes the cache store's in-flight token, so instances sharing a
//! database cache collapse their misses too.

use std::sync::Arc;
use std::time::{Duration as StdDuration, Instant};

use chrono::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clients::{IndexClient, IndexError};
use crate::clock::SharedClock;
use crate::config::Config;
use crate::domain::search::QueryValidationError;
use crate::domain::{Fingerprint, SearchPage, SearchQuery};
use crate::services::cache::{CacheStore, InflightAcquire};
use crate::services::retry::{Exhausted, RetryPolicy, retry};
use crate::services::single_flight::{FromJoinError, SingleFlight};

#[derive(Debug, Error, Clone)]
pub enum SearchError {
    #[error(transparent)]
    Validation(#[from] QueryValidationError),

    #[error("Search index unavailable after {attempts} attempts: {message}")]
    Unavailable { attempts: u32, message: String },

    #[error("Malformed query: {0}")]
    MalformedQuery(String),

    #[error("Timed out waiting for search results")]
    Timeout,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl FromJoinError for SearchError {
    fn from_join_error(err: &tokio::task::JoinError) -> Self {
        Self::Internal(format!("search resolution aborted: {err}"))
    }
}

impl From<Exhausted<IndexError>> for SearchError {
    fn from(exhausted: Exhausted<IndexError>) -> Self {
        match exhausted.error {
            IndexError::Transient(message) => Self::Unavailable {
                attempts: exhausted.attempts,
                message,
            },
            IndexError::MalformedQuery(message) => Self::MalformedQuery(message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchSettings {
    pub ttl: Duration,
    pub max_page_size: u32,
    pub max_query_length: usize,
    /// Longest any caller waits on a resolution; also the wait when the
    /// caller names none.
    pub wait_timeout: StdDuration,
    /// How long to wait on another process's token before querying anyway.
    pub inflight_ttl: StdDuration,
    pub inflight_poll: StdDuration,
    pub retry: RetryPolicy,
}

impl SearchSettings {
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self {
            ttl: config.cache.ttl(),
            max_page_size: config.cache.max_page_size,
            max_query_length: config.cache.max_query_length,
            wait_timeout: config.cache.wait_timeout(),
            inflight_ttl: StdDuration::from_secs(config.cache.inflight_ttl_seconds),
            inflight_poll: StdDuration::from_millis(config.cache.inflight_poll_ms.max(1)),
            retry: RetryPolicy::new(config.index.max_attempts, config.index.retry_base_delay_ms),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SearchOutcome {
    pub query: SearchQuery,
    pub page: Arc<SearchPage>,
    pub cached: bool,
    pub elapsed: StdDuration,
}

impl SearchOutcome {
    #[must_use]
    pub fn search_time_ms(&self) -> f64 {
        (self.elapsed.as_secs_f64() * 100_000.0).round() / 100.0
    }
}

/// What a resolution hands its waiters. `cached` is set when the owner
/// found the page in the cache after all.
#[derive(Debug, Clone)]
struct Resolved {
    page: Arc<SearchPage>,
    cached: bool,
}

impl Resolved {
    const fn from_cache(page: Arc<SearchPage>) -> Self {
        Self { page, cached: true }
    }

    const fn from_index(page: Arc<SearchPage>) -> Self {
        Self {
            page,
            cached: false,
        }
    }
}

type Flights = SingleFlight<Fingerprint, Resolved, SearchError>;

#[derive(Clone)]
pub struct SearchOrchestrator {
    index: Arc<dyn IndexClient>,
    cache: Arc<dyn CacheStore>,
    flights: Arc<Flights>,
    clock: SharedClock,
    settings: Arc<SearchSettings>,
}

impl SearchOrchestrator {
    #[must_use]
    pub fn new(
        index: Arc<dyn IndexClient>,
        cache: Arc<dyn CacheStore>,
        clock: SharedClock,
        settings: SearchSettings,
    ) -> Self {
        Self {
            index,
            cache,
            flights: Flights::new(),
            clock,
            settings: Arc::new(settings),
        }
    }

    #[must_use]
    pub fn settings(&self) -> &SearchSettings {
        &self.settings
    }

    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.flights.in_flight()
    }

    /// Serves `query` from the cache or a single shared index lookup. The
    /// caller waits at most `timeout`, capped by the configured wait; giving
    /// up leaves the lookup running for everyone else.
    pub async fn search(
        &self,
        query: SearchQuery,
        timeout: Option<StdDuration>,
    ) -> Result<SearchOutcome, SearchError> {
        let started = Instant::now();
        query.validate(self.settings.max_page_size, self.settings.max_query_length)?;
        let fingerprint = query.fingerprint();

        if let Some(page) = self.fresh_entry(&fingerprint).await {
            metrics::counter!("search_cache_hits_total").increment(1);
            return Ok(SearchOutcome {
                query,
                page,
                cached: true,
                elapsed: started.elapsed(),
            });
        }
        metrics::counter!("search_cache_misses_total").increment(1);

        let resolver = self.clone();
        let resolve_query = query.clone();
        let resolve_key = fingerprint.clone();
        let joined = self.flights.join(fingerprint.clone(), move || async move {
            resolver.resolve(resolve_query, resolve_key).await
        });

        if !joined.owner {
            metrics::counter!("search_coalesced_waiters_total").increment(1);
            debug!(fingerprint = %fingerprint, "Attached to in-flight search");
        }

        let wait = timeout.map_or(self.settings.wait_timeout, |t| {
            t.min(self.settings.wait_timeout)
        });
        let resolved = tokio::time::timeout(wait, joined.call)
            .await
            .map_err(|_| {
                warn!(
                    event = "search_wait_timeout",
                    fingerprint = %fingerprint,
                    timeout_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                    "Gave up waiting for search resolution"
                );
                SearchError::Timeout
            })??;

        Ok(SearchOutcome {
            query,
            page: resolved.page,
            cached: resolved.cached,
            elapsed: started.elapsed(),
        })
    }

    /// Cache read that treats backend failures as a miss.
    async fn fresh_entry(&self, fingerprint: &Fingerprint) -> Option<Arc<SearchPage>> {
        match self.cache.get(fingerprint).await {
            Ok(Some(entry)) if entry.is_fresh(self.clock.now()) => {
                Some(entry.page)
            }
            Ok(_) => None,
            Err(e) => {
                warn!(event = "cache_read_failed", fingerprint = %fingerprint, error = %e, "Cache read failed, treating as miss");
                None
            }
        }
    }

    async fn resolve(
        self,
        query: SearchQuery,
        fingerprint: Fingerprint,
    ) -> Result<Resolved, SearchError> {
        // The cache may have been filled between the caller's miss and now.
        if let Some(page) = self.fresh_entry(&fingerprint).await {
            return Ok(Resolved::from_cache(page));
        }

        let token = match self.cache.acquire_inflight(&fingerprint).await {
            Ok(InflightAcquire::Acquired(token)) => Some(token),
            Ok(InflightAcquire::Busy) => {
                if let Some(page) = self.await_foreign_resolution(&fingerprint).await {
                    return Ok(Resolved::from_cache(page));
                }
                None
            }
            Err(e) => {
                warn!(event = "inflight_acquire_failed", fingerprint = %fingerprint, error = %e, "Could not take in-flight token");
                None
            }
        };

        let result = self.lookup(&query).await;

        if let Ok(page) = &result {
            if let Err(e) = self
                .cache
                .set(&fingerprint, Arc::clone(page), self.settings.ttl)
                .await
            {
                warn!(event = "cache_write_failed", fingerprint = %fingerprint, error = %e, "Failed to cache search results");
            }
        }

        if let Some(token) = token {
            if let Err(e) = self.cache.release_inflight(&token).await {
                warn!(event = "inflight_release_failed", fingerprint = %fingerprint, error = %e, "Failed to release in-flight token");
            }
        }

        result.map(Resolved::from_index)
    }

    /// Another process holds the token. Poll for its cache write until the
    /// token would have lapsed.
    async fn await_foreign_resolution(&self, fingerprint: &Fingerprint) -> Option<Arc<SearchPage>> {
        let deadline = Instant::now() + self.settings.inflight_ttl;
        while Instant::now() < deadline {
            tokio::time::sleep(self.settings.inflight_poll).await;
            if let Some(page) = self.fresh_entry(fingerprint).await {
                return Some(page);
            }
        }
        info!(fingerprint = %fingerprint, "Foreign in-flight token lapsed, querying index directly");
        None
    }

    async fn lookup(&self, query: &SearchQuery) -> Result<Arc<SearchPage>, SearchError> {
        let text = query.text.trim();
        let offset = query.offset();
        let result = retry(
            &self.settings.retry,
            "index_query",
            IndexError::is_retryable,
            |_| self.index.query(text, query.page_size, offset),
        )
        .await;

        match result {
            Ok(page) => {
                metrics::counter!("index_lookups_total", "outcome" => "ok").increment(1);
                Ok(Arc::new(page))
            }
            Err(exhausted) => {
                let outcome = if exhausted.error.is_retryable() {
                    "unavailable"
                } else {
                    "malformed"
                };
                metrics::counter!("index_lookups_total", "outcome" => outcome).increment(1);
                warn!(
                    event = "index_lookup_failed",
                    attempts = exhausted.attempts,
                    error = %exhausted.error,
                    "Index lookup failed"
                );
                Err(exhausted.into())
            }
        }
    }
}
