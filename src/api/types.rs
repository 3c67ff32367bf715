use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::search::DEFAULT_PAGE_SIZE;
use crate::domain::{Job, JobId, JobKind, JobStatus, SearchHit, WorkerLease};
use crate::services::SearchOutcome;

#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub const fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

const fn default_page() -> u32 {
    1
}

const fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

#[derive(Debug, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    /// Longest this caller will wait on a shared lookup.
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl From<SearchParams> for SearchRequest {
    fn from(params: SearchParams) -> Self {
        Self {
            query: params.q,
            page: params.page,
            page_size: params.page_size,
            timeout_ms: params.timeout_ms,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub total_results: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u64,
    pub results: Vec<SearchHit>,
    pub search_time_ms: f64,
    pub cached: bool,
}

impl From<SearchOutcome> for SearchResponse {
    fn from(outcome: SearchOutcome) -> Self {
        let search_time_ms = outcome.search_time_ms();
        let page_size = outcome.query.page_size;
        Self {
            total_results: outcome.page.total,
            total_pages: outcome.page.total_pages(page_size),
            results: outcome.page.hits.clone(),
            query: outcome.query.text,
            page: outcome.query.page,
            page_size,
            search_time_ms,
            cached: outcome.cached,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct CrawlRequest {
    pub url: String,
    /// Defaults by job kind when omitted.
    pub priority: Option<i32>,
}

#[derive(Debug, Serialize)]
pub struct CrawlJobResponse {
    pub job_id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    pub priority: i32,
    pub created_at: DateTime<Utc>,
    pub sla_deadline: DateTime<Utc>,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct JobDto {
    pub job_id: JobId,
    pub kind: JobKind,
    pub url: String,
    pub priority: i32,
    pub status: JobStatus,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub sla_deadline: DateTime<Utc>,
    pub retry_count: u32,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl From<Job> for JobDto {
    fn from(job: Job) -> Self {
        Self {
            job_id: job.id,
            kind: job.kind,
            url: job.url,
            priority: job.priority,
            status: job.status,
            created_at: job.created_at,
            started_at: job.started_at,
            completed_at: job.completed_at,
            sla_deadline: job.sla_deadline,
            retry_count: job.retry_count,
            result: job.result,
            error: job.error,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct WorkerRequest {
    pub worker_id: String,
}

#[derive(Debug, Deserialize)]
pub struct CompleteRequest {
    pub worker_id: String,
    #[serde(default)]
    pub result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
pub struct FailRequest {
    pub worker_id: String,
    pub reason: String,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub job: JobDto,
    pub lease: WorkerLease,
}

#[derive(Debug, Serialize)]
pub struct DependencyHealth {
    pub database: &'static str,
    pub index: &'static str,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub dependencies: DependencyHealth,
    pub queue_depth: usize,
    pub active_jobs: usize,
    pub in_flight_searches: usize,
}

#[derive(Debug, Serialize)]
pub struct ServiceInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub endpoints: Vec<&'static str>,
}
