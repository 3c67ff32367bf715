use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A credential and the quota attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RateKey {
    pub id: String,
    pub limit: u32,
    pub window_seconds: u64,
}

impl RateKey {
    #[must_use]
    pub fn new(id: impl Into<String>, limit: u32, window_seconds: u64) -> Self {
        Self {
            id: id.into(),
            limit,
            window_seconds: window_seconds.max(1),
        }
    }

    #[must_use]
    pub fn window_ms(&self) -> i64 {
        i64::try_from(self.window_seconds.saturating_mul(1000)).unwrap_or(i64::MAX)
    }

    /// Start of the fixed window containing `now`, in epoch milliseconds.
    #[must_use]
    pub fn window_start_ms(&self, now: DateTime<Utc>) -> i64 {
        let window = self.window_ms();
        now.timestamp_millis().div_euclid(window) * window
    }

    #[must_use]
    pub fn reset_at(&self, window_start_ms: i64) -> DateTime<Utc> {
        let end = window_start_ms.saturating_add(self.window_ms());
        Utc.timestamp_millis_opt(end)
            .single()
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// What to do when the counter store cannot be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    #[default]
    Open,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateDecision {
    /// Whole seconds until the window resets, never below one.
    #[must_use]
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> i64 {
        let wait: Duration = self.reset_at - now;
        let secs = wait.num_seconds() + i64::from(wait.subsec_nanos() > 0);
        secs.max(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_start_aligns_to_window() {
        let key = RateKey::new("k", 10, 60);
        let now = Utc.timestamp_millis_opt(125_500).unwrap();
        assert_eq!(key.window_start_ms(now), 120_000);
        assert_eq!(key.reset_at(120_000).timestamp_millis(), 180_000);
    }

    #[test]
    fn test_zero_window_is_clamped() {
        let key = RateKey::new("k", 10, 0);
        assert_eq!(key.window_seconds, 1);
    }

    #[test]
    fn test_retry_after_rounds_up() {
        let now = Utc.timestamp_millis_opt(120_000).unwrap();
        let decision = RateDecision {
            allowed: false,
            limit: 1,
            remaining: 0,
            reset_at: now + Duration::milliseconds(1_500),
        };
        assert_eq!(decision.retry_after_secs(now), 2);
        assert_eq!(decision.retry_after_secs(now + Duration::seconds(5)), 1);
    }

    #[test]
    fn test_failure_policy_parses_lowercase() {
        let policy: FailurePolicy = serde_json::from_str("\"closed\"").unwrap();
        assert_eq!(policy, FailurePolicy::Closed);
        assert_eq!(FailurePolicy::default(), FailurePolicy::Open);
    }
}
