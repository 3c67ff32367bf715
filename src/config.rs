use anyhow::{Context, Result};
use chrono::Duration;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::constants::identity::ANONYMOUS;
use crate::domain::{FailurePolicy, JobKind, RateKey};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub general: GeneralConfig,

    pub server: ServerConfig,

    pub observability: ObservabilityConfig,

    pub auth: AuthConfig,

    pub rate_limit: RateLimitConfig,

    pub cache: CacheConfig,

    pub index: IndexConfig,

    pub scheduler: SchedulerConfig,

    pub workers: WorkerConfig,
}

/// Where a shared-state service keeps its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Memory,
    Database,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub database_path: String,

    pub log_level: String,

    /// Event bus buffer size (default: 100)
    pub event_bus_buffer_size: usize,

    /// Number of tokio worker threads (default: 2)
    /// Set to 0 to use the number of CPU cores
    pub worker_threads: usize,

    pub max_db_connections: u32,

    pub min_db_connections: u32,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            database_path: "sqlite:data/crawlgate.db".to_string(),
            log_level: "info".to_string(),
            event_bus_buffer_size: 100,
            worker_threads: 2,
            max_db_connections: 5,
            min_db_connections: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub enabled: bool,

    pub port: u16,

    pub cors_allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8000,
            cors_allowed_origins: vec!["*".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub metrics_enabled: bool,

    pub loki_enabled: bool,

    pub loki_url: String,

    pub loki_labels: std::collections::HashMap<String, String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        let mut labels = std::collections::HashMap::new();
        labels.insert("app".to_string(), "crawlgate".to_string());

        Self {
            metrics_enabled: true,
            loki_enabled: false,
            loki_url: "http://localhost:3100".to_string(),
            loki_labels: labels,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiKeyConfig {
    pub key: String,

    pub name: String,

    /// Requests admitted per window. Falls back to `rate_limit.default_limit`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<u32>,

    /// Overrides `rate_limit.window_seconds` for this key.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Requests without a key are admitted under the anonymous identity.
    pub allow_anonymous: bool,

    pub anonymous_rate_limit: u32,

    pub api_keys: Vec<ApiKeyConfig>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            allow_anonymous: true,
            anonymous_rate_limit: 10,
            api_keys: vec![
                ApiKeyConfig {
                    key: "demo-key-12345".to_string(),
                    name: "Demo Key".to_string(),
                    rate_limit: Some(1000),
                    window_seconds: None,
                },
                ApiKeyConfig {
                    key: "test-key-67890".to_string(),
                    name: "Test Key".to_string(),
                    rate_limit: Some(100),
                    window_seconds: None,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    pub backend: Backend,

    /// Applied to keys that do not carry their own limit.
    pub default_limit: u32,

    pub window_seconds: u64,

    /// `open` admits and logs when the counter store fails, `closed` denies.
    pub failure_policy: FailurePolicy,

    /// Keys unseen for this long are dropped from memory.
    pub idle_eviction_seconds: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: Backend::Memory,
            default_limit: 1000,
            window_seconds: 60,
            failure_policy: FailurePolicy::Open,
            idle_eviction_seconds: 600,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: Backend,

    pub ttl_seconds: u64,

    pub max_page_size: u32,

    pub max_query_length: usize,

    /// How long a search waits on a lookup, and the ceiling for a
    /// caller-supplied `timeout_ms`.
    pub wait_timeout_ms: u64,

    /// Lifetime of a database in-flight token; a crashed owner frees the
    /// fingerprint after this.
    pub inflight_ttl_seconds: u64,

    pub inflight_poll_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            ttl_seconds: 1800,
            max_page_size: 100,
            max_query_length: 500,
            wait_timeout_ms: 5000,
            inflight_ttl_seconds: 30,
            inflight_poll_ms: 50,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::seconds(i64::try_from(self.ttl_seconds).unwrap_or(i64::MAX / 1000))
    }

    #[must_use]
    pub const fn wait_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.wait_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexConfig {
    pub base_url: String,

    pub index_name: String,

    pub username: Option<String>,

    pub password: Option<String>,

    pub request_timeout_seconds: u64,

    pub max_attempts: u32,

    pub retry_base_delay_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:9200".to_string(),
            index_name: "web_pages".to_string(),
            username: None,
            password: None,
            request_timeout_seconds: 10,
            max_attempts: 3,
            retry_base_delay_ms: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// SLA window for re-crawl jobs.
    pub sla_window_minutes: u32,

    /// SLA window for ordinary crawl jobs.
    pub crawl_sla_window_minutes: u32,

    pub lease_seconds: u64,

    pub max_retries: u32,

    pub sweep_interval_seconds: u64,

    /// Runs maintenance on a cron schedule instead of the sweep interval.
    pub cron_expression: Option<String>,

    /// Jobs this close to their deadline are reported as at risk.
    pub sla_warning_minutes: u32,

    pub store_max_attempts: u32,

    pub store_retry_base_delay_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sla_window_minutes: 60,
            crawl_sla_window_minutes: 24 * 60,
            lease_seconds: 300,
            max_retries: 3,
            sweep_interval_seconds: 15,
            cron_expression: None,
            sla_warning_minutes: 10,
            store_max_attempts: 3,
            store_retry_base_delay_ms: 50,
        }
    }
}

impl SchedulerConfig {
    #[must_use]
    pub fn sla_window(&self, kind: JobKind) -> Duration {
        match kind {
            JobKind::Recrawl => Duration::minutes(i64::from(self.sla_window_minutes)),
            JobKind::Crawl => Duration::minutes(i64::from(self.crawl_sla_window_minutes)),
        }
    }

    #[must_use]
    pub fn lease(&self) -> Duration {
        Duration::seconds(i64::try_from(self.lease_seconds).unwrap_or(i64::MAX / 1000))
    }

    #[must_use]
    pub fn sla_warning(&self) -> Duration {
        Duration::minutes(i64::from(self.sla_warning_minutes))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub enabled: bool,

    pub count: usize,

    pub poll_min_backoff_ms: u64,

    pub poll_max_backoff_ms: u64,

    pub fetch_timeout_seconds: u64,

    pub user_agent: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            count: 4,
            poll_min_backoff_ms: 100,
            poll_max_backoff_ms: 5000,
            fetch_timeout_seconds: 30,
            user_agent: "CrawlgateBot/1.0".to_string(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self> {
        let paths = Self::config_paths();

        for path in &paths {
            if path.exists() {
                info!("Loading config from: {}", path.display());
                return Self::load_from_path(path);
            }
        }

        info!("No config file found, using defaults");
        Ok(Self::default())
    }

    pub fn load_from_path(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        info!("Config saved to: {}", path.display());
        Ok(())
    }

    fn config_paths() -> Vec<PathBuf> {
        let mut paths = vec![];

        paths.push(PathBuf::from("config.toml"));

        if let Some(config_dir) = dirs::config_dir() {
            paths.push(config_dir.join("crawlgate").join("config.toml"));
        }

        if let Some(home) = dirs::home_dir() {
            paths.push(home.join(".crawlgate").join("config.toml"));
        }

        paths
    }

    fn default_config_path() -> PathBuf {
        PathBuf::from("config.toml")
    }

    pub fn create_default_if_missing() -> Result<bool> {
        let path = Self::default_config_path();
        if path.exists() {
            Ok(false)
        } else {
            let config = Self::default();
            config.save_to_path(&path)?;
            info!("Created default config file: {}", path.display());
            Ok(true)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scheduler.sla_window_minutes == 0 || self.scheduler.crawl_sla_window_minutes == 0 {
            anyhow::bail!("SLA windows must be > 0");
        }

        if self.scheduler.lease_seconds == 0 {
            anyhow::bail!("Lease duration must be > 0");
        }

        if self.scheduler.sweep_interval_seconds == 0
            && self
                .scheduler
                .cron_expression
                .as_deref()
                .is_none_or(|c| c.trim().is_empty())
        {
            anyhow::bail!("Sweep interval must be > 0 or cron expression must be set");
        }

        if self.cache.max_page_size == 0 {
            anyhow::bail!("Maximum page size must be > 0");
        }

        if self.cache.ttl_seconds == 0 {
            anyhow::bail!("Cache TTL must be > 0");
        }

        if self.workers.enabled && self.workers.count == 0 {
            anyhow::bail!("Worker count must be > 0 when workers are enabled");
        }

        if self.index.base_url.trim().is_empty() {
            anyhow::bail!("Index URL cannot be empty");
        }

        let mut seen = HashSet::new();
        for key in &self.auth.api_keys {
            if !seen.insert(key.key.as_str()) {
                anyhow::bail!("Duplicate API key configured for '{}'", key.name);
            }
        }

        Ok(())
    }

    #[must_use]
    pub fn find_api_key(&self, key: &str) -> Option<&ApiKeyConfig> {
        self.auth.api_keys.iter().find(|k| k.key == key)
    }

    /// Rate limit bucket for a configured key: one per secret, named by a
    /// digest so the secret itself never reaches logs or storage.
    #[must_use]
    pub fn rate_key_for(&self, key: &ApiKeyConfig) -> RateKey {
        let digest = hex::encode(Sha256::digest(key.key.as_bytes()));
        RateKey::new(
            format!("key:{}", &digest[..16]),
            key.rate_limit.unwrap_or(self.rate_limit.default_limit),
            key.window_seconds.unwrap_or(self.rate_limit.window_seconds),
        )
    }

    #[must_use]
    pub fn anonymous_rate_key(&self) -> RateKey {
        RateKey::new(
            ANONYMOUS,
            self.auth.anonymous_rate_limit,
            self.rate_limit.window_seconds,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.cache.ttl_seconds, 1800);
        assert_eq!(config.scheduler.sla_window(JobKind::Recrawl), Duration::hours(1));
        assert_eq!(config.rate_limit.failure_policy, FailurePolicy::Open);
        assert_eq!(config.find_api_key("demo-key-12345").and_then(|k| k.rate_limit), Some(1000));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_serialization() {
        let config = Config::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[general]"));
        assert!(toml_str.contains("[scheduler]"));
        assert!(toml_str.contains("[[auth.api_keys]]"));
    }

    #[test]
    fn test_config_deserialization() {
        let toml_str = r#"
            [general]
            log_level = "debug"

            [rate_limit]
            backend = "database"
            failure_policy = "closed"

            [scheduler]
            lease_seconds = 60
        "#;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.rate_limit.backend, Backend::Database);
        assert_eq!(config.rate_limit.failure_policy, FailurePolicy::Closed);
        assert_eq!(config.scheduler.lease(), Duration::seconds(60));

        assert_eq!(config.index.index_name, "web_pages");
    }

    #[test]
    fn test_validate_rejects_duplicate_keys() {
        let mut config = Config::default();
        let dup = config.auth.api_keys[0].clone();
        config.auth.api_keys.push(dup);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rate_keys_fall_back_to_defaults() {
        let mut config = Config::default();
        config.rate_limit.default_limit = 42;
        config.auth.api_keys.push(ApiKeyConfig {
            key: "k".to_string(),
            name: "Bare".to_string(),
            rate_limit: None,
            window_seconds: Some(5),
        });

        let bare = config.rate_key_for(config.find_api_key("k").unwrap());
        assert!(bare.id.starts_with("key:"));
        assert!(!bare.id.contains("Bare"));
        assert_eq!(bare.limit, 42);
        assert_eq!(bare.window_seconds, 5);

        let test_key = config.rate_key_for(config.find_api_key("test-key-67890").unwrap());
        assert_eq!((test_key.limit, test_key.window_seconds), (100, 60));

        let anon = config.anonymous_rate_key();
        assert_eq!(anon.id, "anonymous");
        assert_eq!(anon.limit, 10);
    }

    #[test]
    fn test_same_named_keys_get_separate_buckets() {
        let mut config = Config::default();
        for secret in ["secret-a", "secret-b"] {
            config.auth.api_keys.push(ApiKeyConfig {
                key: secret.to_string(),
                name: "ci".to_string(),
                rate_limit: Some(2),
                window_seconds: None,
            });
        }
        assert!(config.validate().is_ok());

        let a = config.rate_key_for(config.find_api_key("secret-a").unwrap());
        let b = config.rate_key_for(config.find_api_key("secret-b").unwrap());
        assert_ne!(a.id, b.id);
        assert!(!a.id.contains("secret-a"));
        assert_eq!(a, config.rate_key_for(config.find_api_key("secret-a").unwrap()));
    }

    #[test]
    fn test_validate_rejects_zero_lease() {
        let mut config = Config::default();
        config.scheduler.lease_seconds = 0;
        assert!(config.validate().is_err());
    }
}
