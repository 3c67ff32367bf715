use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

use super::{JobId, WorkerId};

/// Re-crawls carry the tight SLA; plain crawls share the same queue with a
/// relaxed window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Recrawl,
    Crawl,
}

impl JobKind {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Recrawl => "recrawl",
            Self::Crawl => "crawl",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "recrawl" => Ok(Self::Recrawl),
            "crawl" => Ok(Self::Crawl),
            other => Err(format!("unknown job kind '{other}'")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl JobStatus {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// The full edge set of the job state machine. Nothing leaves a terminal
    /// state.
    #[must_use]
    pub const fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::InProgress)
                | (Self::Pending, Self::Failed)
                | (Self::InProgress, Self::Completed)
                | (Self::InProgress, Self::Failed)
                | (Self::InProgress, Self::Pending)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "in_progress" => Ok(Self::InProgress),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown job status '{other}'")),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("illegal job transition {from} -> {to}")]
pub struct InvalidTransition {
    pub from: JobStatus,
    pub to: JobStatus,
}

/// One re-crawl request and everything known about its execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
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

impl Job {
    #[must_use]
    pub fn new(
        kind: JobKind,
        url: impl Into<String>,
        priority: i32,
        now: DateTime<Utc>,
        sla_window: Duration,
    ) -> Self {
        Self {
            id: JobId::new(),
            kind,
            url: url.into(),
            priority,
            status: JobStatus::Pending,
            created_at: now,
            started_at: None,
            completed_at: None,
            sla_deadline: now + sla_window,
            retry_count: 0,
            result: None,
            error: None,
        }
    }

    pub fn transition(&mut self, next: JobStatus) -> Result<(), InvalidTransition> {
        if !self.status.can_transition_to(next) {
            return Err(InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    #[must_use]
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        now >= self.sla_deadline
    }

    #[must_use]
    pub fn time_to_deadline(&self, now: DateTime<Utc>) -> Duration {
        self.sla_deadline - now
    }
}

/// Binds one in-progress job to one worker until `expires_at`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerLease {
    pub lease_id: Uuid,
    pub job_id: JobId,
    pub worker_id: WorkerId,
    pub granted_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub renewals: u32,
}

impl WorkerLease {
    #[must_use]
    pub fn new(job_id: JobId, worker_id: WorkerId, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            lease_id: Uuid::new_v4(),
            job_id,
            worker_id,
            granted_at: now,
            expires_at: now + ttl,
            renewals: 0,
        }
    }

    /// A lease is dead at its expiry instant, not one tick after.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    #[must_use]
    pub fn is_held_by(&self, worker: &WorkerId) -> bool {
        &self.worker_id == worker
    }

    pub fn renew(&mut self, now: DateTime<Utc>, ttl: Duration) {
        self.expires_at = now + ttl;
        self.renewals += 1;
    }
}
