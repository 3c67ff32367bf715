use chrono::Utc;
use reqwest::Client;
use serde_json::json;
use std::time::Duration;
use tracing::debug;

use super::{CrawlExecutor, ExecutorError};
use crate::config::WorkerConfig;
use crate::domain::Job;

/// Fetches the job's URL and reports what came back. Page parsing and
/// indexing happen downstream.
#[derive(Clone)]
pub struct HttpFetchExecutor {
    client: Client,
}

impl HttpFetchExecutor {
    #[must_use]
    pub fn new(config: &WorkerConfig) -> Self {
        Self {
            client: Client::builder()
                .user_agent(config.user_agent.clone())
                .timeout(Duration::from_secs(config.fetch_timeout_seconds))
                .build()
                .unwrap_or_else(|_| Client::new()),
        }
    }
}

#[async_trait::async_trait]
impl CrawlExecutor for HttpFetchExecutor {
    async fn execute(&self, job: &Job) -> Result<serde_json::Value, ExecutorError> {
        debug!(job_id = %job.id, url = %job.url, "Fetching page");

        let response = self
            .client
            .get(&job.url)
            .send()
            .await
            .map_err(|e| ExecutorError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ExecutorError::HttpStatus(status.as_u16()));
        }

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let body = response
            .bytes()
            .await
            .map_err(|e| ExecutorError::Request(e.to_string()))?;

        Ok(json!({
            "status_code": status.as_u16(),
            "content_length": body.len(),
            "content_type": content_type,
            "final_url": final_url,
            "fetched_at": Utc::now().to_rfc3339(),
        }))
    }
}
