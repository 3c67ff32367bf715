//! Boundaries to external collaborators: the full-text index and the web.

pub mod elasticsearch;
pub mod fetcher;

use crate::domain::{Job, SearchPage};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IndexError {
    /// Worth retrying: connection refused, timeout, 5xx.
    #[error("Index temporarily unavailable: {0}")]
    Transient(String),

    /// The index rejected the query itself. Retrying cannot help.
    #[error("Malformed query: {0}")]
    MalformedQuery(String),
}

impl IndexError {
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}

/// Ranked full-text lookup.
#[async_trait::async_trait]
pub trait IndexClient: Send + Sync {
    async fn query(&self, text: &str, limit: u32, offset: u64) -> Result<SearchPage, IndexError>;

    async fn ping(&self) -> bool;
}

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("Unexpected HTTP status {0}")]
    HttpStatus(u16),
}

/// Does the actual crawl work for one job and returns its result summary.
#[async_trait::async_trait]
pub trait CrawlExecutor: Send + Sync {
    async fn execute(&self, job: &Job) -> Result<serde_json::Value, ExecutorError>;
}
