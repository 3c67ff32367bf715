//! Per-credential admission control.
//!
//! Counters live behind [`RateLimitStore`] so that several handler
//! instances sharing one store see the same window. Every store must make
//! increment-and-compare a single atomic step.

use crate::clock::SharedClock;
use crate::db::Store;
use crate::domain::{FailurePolicy, RateDecision, RateKey};
use async_trait::async_trait;
use chrono::Duration;
use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error, Clone)]
pub enum RateLimitError {
    #[error("Rate limit backend unavailable: {0}")]
    Backend(String),
}

impl From<anyhow::Error> for RateLimitError {
    fn from(err: anyhow::Error) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Counter value after an increment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowUsage {
    pub admitted: bool,
    pub count: u64,
}

#[async_trait]
pub trait RateLimitStore: Send + Sync {
    /// Adds `cost` to the key's counter for the window starting at
    /// `window_start_ms` if the total stays within `limit`; otherwise leaves
    /// it untouched. A counter from an earlier window starts over.
    async fn increment_if_below(
        &self,
        key: &str,
        window_start_ms: i64,
        cost: u32,
        limit: u32,
        now_ms: i64,
    ) -> Result<WindowUsage, RateLimitError>;

    /// Drops keys not seen since `cutoff_ms`.
    async fn evict_idle(&self, cutoff_ms: i64) -> Result<u64, RateLimitError>;
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    window_start_ms: i64,
    count: u64,
    last_seen_ms: i64,
}

#[derive(Default)]
pub struct MemoryRateLimitStore {
    windows: DashMap<String, WindowState>,
}

impl MemoryRateLimitStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn increment_if_below(
        &self,
        key: &str,
        window_start_ms: i64,
        cost: u32,
        limit: u32,
        now_ms: i64,
    ) -> Result<WindowUsage, RateLimitError> {
        // The entry guard holds the shard lock for the whole compare-and-add.
        let mut state = self
            .windows
            .entry(key.to_string())
            .or_insert(WindowState {
                window_start_ms,
                count: 0,
                last_seen_ms: now_ms,
            });

        if state.window_start_ms != window_start_ms {
            state.window_start_ms = window_start_ms;
            state.count = 0;
        }
        state.last_seen_ms = now_ms;

        let admitted = state.count + u64::from(cost) <= u64::from(limit);
        if admitted {
            state.count += u64::from(cost);
        }

        Ok(WindowUsage {
            admitted,
            count: state.count,
        })
    }

    async fn evict_idle(&self, cutoff_ms: i64) -> Result<u64, RateLimitError> {
        let before = self.windows.len();
        self.windows.retain(|_, state| state.last_seen_ms >= cutoff_ms);
        Ok((before.saturating_sub(self.windows.len())) as u64)
    }
}

/// Counters in the `rate_limit_windows` table, shared across processes.
pub struct SqlRateLimitStore {
    store: Store,
}

impl SqlRateLimitStore {
    #[must_use]
    pub const fn new(store: Store) -> Self {
        Self { store }
    }
}

#[async_trait]
impl RateLimitStore for SqlRateLimitStore {
    async fn increment_if_below(
        &self,
        key: &str,
        window_start_ms: i64,
        cost: u32,
        limit: u32,
        now_ms: i64,
    ) -> Result<WindowUsage, RateLimitError> {
        let result = self
            .store
            .increment_rate_window(
                key,
                window_start_ms,
                i64::from(cost),
                i64::from(limit),
                now_ms,
            )
            .await?;

        Ok(WindowUsage {
            admitted: result.admitted,
            count: u64::try_from(result.count).unwrap_or(0),
        })
    }

    async fn evict_idle(&self, cutoff_ms: i64) -> Result<u64, RateLimitError> {
        Ok(self.store.evict_idle_rate_windows(cutoff_ms).await?)
    }
}

pub struct RateLimiter {
    store: std::sync::Arc<dyn RateLimitStore>,
    clock: SharedClock,
    policy: FailurePolicy,
}

impl RateLimiter {
    #[must_use]
    pub fn new(
        store: std::sync::Arc<dyn RateLimitStore>,
        clock: SharedClock,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            store,
            clock,
            policy,
        }
    }

    /// Admits or denies one operation of weight `cost` for `key`. The
    /// counter moves only when the call is admitted.
    pub async fn admit(&self, key: &RateKey, cost: u32) -> RateDecision {
        let cost = cost.max(1);
        let now = self.clock.now();
        let window_start_ms = key.window_start_ms(now);
        let reset_at = key.reset_at(window_start_ms);

        let decision = match self
            .store
            .increment_if_below(
                &key.id,
                window_start_ms,
                cost,
                key.limit,
                now.timestamp_millis(),
            )
            .await
        {
            Ok(usage) => RateDecision {
                allowed: usage.admitted,
                limit: key.limit,
                remaining: u32::try_from(u64::from(key.limit).saturating_sub(usage.count))
                    .unwrap_or(0),
                reset_at,
            },
            Err(e) => {
                let allowed = self.policy == FailurePolicy::Open;
                warn!(
                    event = "rate_limit_backend_unavailable",
                    key = %key.id,
                    policy = ?self.policy,
                    allowed,
                    error = %e,
                    "Rate limit store unavailable"
                );
                metrics::counter!("rate_limit_backend_errors_total").increment(1);
                RateDecision {
                    allowed,
                    limit: key.limit,
                    remaining: if allowed { key.limit } else { 0 },
                    reset_at,
                }
            }
        };

        let outcome = if decision.allowed { "allowed" } else { "denied" };
        metrics::counter!("rate_limit_decisions_total", "outcome" => outcome).increment(1);
        if !decision.allowed {
            debug!(key = %key.id, limit = key.limit, "Rate limit exceeded");
        }

        decision
    }

    /// Forgets keys idle for longer than `idle`.
    pub async fn evict_idle(&self, idle: Duration) -> Result<u64, RateLimitError> {
        let cutoff = self.clock.now() - idle;
        self.store.evict_idle(cutoff.timestamp_millis()).await
    }
}
