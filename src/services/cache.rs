use crate::clock::SharedClock;
use crate::db::{CachedPayload, Store};
use crate::domain::{Fingerprint, SearchPage};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone)]
pub enum CacheError {
    #[error("Cache backend unavailable: {0}")]
    Backend(String),

    #[error("Cache payload could not be decoded: {0}")]
    Serialization(String),
}

impl From<anyhow::Error> for CacheError {
    fn from(err: anyhow::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub page: Arc<SearchPage>,
    pub recorded_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheEntry {
    #[must_use]
    pub fn new(page: Arc<SearchPage>, recorded_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            page,
            recorded_at,
            expires_at: recorded_at + ttl,
        }
    }

    /// An entry is stale from the instant it expires.
    #[must_use]
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

/// Proof of ownership for an in-flight resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InflightToken {
    pub fingerprint: Fingerprint,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InflightAcquire {
    Acquired(InflightToken),
    Busy,
}

#[async_trait]
pub trait CacheStore: Send + Sync {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError>;

    /// Records `page` as of now; it expires `ttl` later.
    async fn set(
        &self,
        fingerprint: &Fingerprint,
        page: Arc<SearchPage>,
        ttl: Duration,
    ) -> Result<(), CacheError>;

    /// Compare-and-set on the fingerprint's token. An expired token counts
    /// as absent.
    async fn acquire_inflight(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<InflightAcquire, CacheError>;

    async fn release_inflight(&self, token: &InflightToken) -> Result<(), CacheError>;

    /// Removes expired entries and lapsed in-flight tokens.
    async fn purge_expired(&self) -> Result<u64, CacheError>;
}

struct HeldToken {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct MemoryCacheStore {
    entries: DashMap<Fingerprint, CacheEntry>,
    inflight: DashMap<Fingerprint, HeldToken>,
    clock: SharedClock,
    inflight_ttl: Duration,
}

impl MemoryCacheStore {
    #[must_use]
    pub fn new(clock: SharedClock, inflight_ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            inflight: DashMap::new(),
            clock,
            inflight_ttl,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.get(fingerprint).map(|e| e.value().clone()))
    }

    async fn set(
        &self,
        fingerprint: &Fingerprint,
        page: Arc<SearchPage>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::new(page, self.clock.now(), ttl);
        self.entries.insert(fingerprint.clone(), entry);
        Ok(())
    }

    async fn acquire_inflight(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<InflightAcquire, CacheError> {
        let now = self.clock.now();
        let fresh = || {
            let token = Uuid::new_v4().to_string();
            (
                HeldToken {
                    token: token.clone(),
                    expires_at: now + self.inflight_ttl,
                },
                InflightToken {
                    fingerprint: fingerprint.clone(),
                    token,
                },
            )
        };

        match self.inflight.entry(fingerprint.clone()) {
            Entry::Occupied(mut held) if held.get().expires_at <= now => {
                let (record, token) = fresh();
                held.insert(record);
                Ok(InflightAcquire::Acquired(token))
            }
            Entry::Occupied(_) => Ok(InflightAcquire::Busy),
            Entry::Vacant(slot) => {
                let (record, token) = fresh();
                slot.insert(record);
                Ok(InflightAcquire::Acquired(token))
            }
        }
    }

    async fn release_inflight(&self, token: &InflightToken) -> Result<(), CacheError> {
        self.inflight
            .remove_if(&token.fingerprint, |_, held| held.token == token.token);
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_fresh(now));
        self.inflight.retain(|_, held| held.expires_at > now);
        Ok(before.saturating_sub(self.entries.len()) as u64)
    }
}

/// Cache rows in `search_cache`, tokens in `search_inflight`. Lets several
/// processes share one cache and one in-flight table.
pub struct SqlCacheStore {
    store: Store,
    clock: SharedClock,
    inflight_ttl: Duration,
}

impl SqlCacheStore {
    #[must_use]
    pub fn new(store: Store, clock: SharedClock, inflight_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            inflight_ttl,
        }
    }
}

#[async_trait]
impl CacheStore for SqlCacheStore {
    async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let Some(row) = self.store.get_cached_search(fingerprint.as_str()).await? else {
            return Ok(None);
        };

        let page: SearchPage = serde_json::from_str(&row.payload_json)?;

        Ok(Some(CacheEntry {
            page: Arc::new(page),
            recorded_at: from_millis(row.recorded_at_ms, "recorded_at")?,
            expires_at: from_millis(row.expires_at_ms, "expires_at")?,
        }))
    }

    async fn set(
        &self,
        fingerprint: &Fingerprint,
        page: Arc<SearchPage>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = CacheEntry::new(page, self.clock.now(), ttl);
        let payload = CachedPayload {
            payload_json: serde_json::to_string(entry.page.as_ref())?,
            recorded_at_ms: entry.recorded_at.timestamp_millis(),
            expires_at_ms: entry.expires_at.timestamp_millis(),
        };
        self.store
            .cache_search_results(fingerprint.as_str(), payload)
            .await?;
        Ok(())
    }

    async fn acquire_inflight(
        &self,
        fingerprint: &Fingerprint,
    ) -> Result<InflightAcquire, CacheError> {
        let now = self.clock.now();
        let token = Uuid::new_v4().to_string();
        let acquired = self
            .store
            .try_acquire_inflight(
                fingerprint.as_str(),
                &token,
                now.timestamp_millis(),
                (now + self.inflight_ttl).timestamp_millis(),
            )
            .await?;

        Ok(if acquired {
            InflightAcquire::Acquired(InflightToken {
                fingerprint: fingerprint.clone(),
                token,
            })
        } else {
            InflightAcquire::Busy
        })
    }

    async fn release_inflight(&self, token: &InflightToken) -> Result<(), CacheError> {
        self.store
            .release_inflight(token.fingerprint.as_str(), &token.token)
            .await?;
        Ok(())
    }

    async fn purge_expired(&self) -> Result<u64, CacheError> {
        let now = self.clock.now();
        let purged = self
            .store
            .purge_search_cache(now.timestamp_millis())
            .await?;
        self.store
            .purge_expired_inflight(now.timestamp_millis())
            .await?;
        Ok(purged)
    }
}

fn from_millis(ms: i64, field: &str) -> Result<DateTime<Utc>, CacheError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| CacheError::Serialization(format!("invalid {field}")))
}
