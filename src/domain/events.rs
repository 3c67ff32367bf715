//! Scheduler and cache notifications.
//!
//! These are broadcast over the event bus and streamed to `/api/v1/events`
//! subscribers. They mirror the structured log events so an operator can
//! watch SLA risk live instead of tailing logs.

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::{JobId, JobKind, JobStatus, WorkerId};

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", content = "payload")]
pub enum NotificationEvent {
    JobSubmitted {
        job_id: JobId,
        kind: JobKind,
        priority: i32,
        sla_deadline: DateTime<Utc>,
    },
    JobClaimed {
        job_id: JobId,
        worker_id: WorkerId,
    },
    JobCompleted {
        job_id: JobId,
    },
    JobFailed {
        job_id: JobId,
        reason: String,
    },
    JobRetried {
        job_id: JobId,
        retry_count: u32,
        reason: String,
    },
    LeaseExpired {
        job_id: JobId,
        worker_id: WorkerId,
    },
    SlaRisk {
        job_id: JobId,
        status: JobStatus,
        sla_deadline: DateTime<Utc>,
        overdue: bool,
    },

    Error {
        message: String,
    },
    Info {
        message: String,
    },
}

impl NotificationEvent {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JobSubmitted { .. } => "job_submitted",
            Self::JobClaimed { .. } => "job_claimed",
            Self::JobCompleted { .. } => "job_completed",
            Self::JobFailed { .. } => "job_failed",
            Self::JobRetried { .. } => "job_retried",
            Self::LeaseExpired { .. } => "lease_expired",
            Self::SlaRisk { .. } => "sla_risk",
            Self::Error { .. } => "error",
            Self::Info { .. } => "info",
        }
    }
}
