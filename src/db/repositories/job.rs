use crate::domain::{Job, JobId, JobKind, JobStatus};
use crate::entities::{crawl_jobs, prelude::*};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};

pub struct JobRepository {
    conn: DatabaseConnection,
}

impl JobRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Single-row write keyed by job id.
    pub async fn upsert(&self, job: &Job) -> Result<()> {
        let result_json = job
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let active_model = crawl_jobs::ActiveModel {
            id: Set(job.id.to_string()),
            kind: Set(job.kind.as_str().to_string()),
            url: Set(job.url.clone()),
            priority: Set(job.priority),
            status: Set(job.status.as_str().to_string()),
            created_at: Set(job.created_at.to_rfc3339()),
            started_at: Set(job.started_at.map(|t| t.to_rfc3339())),
            completed_at: Set(job.completed_at.map(|t| t.to_rfc3339())),
            sla_deadline: Set(job.sla_deadline.to_rfc3339()),
            retry_count: Set(i32::try_from(job.retry_count).unwrap_or(i32::MAX)),
            result_json: Set(result_json),
            error: Set(job.error.clone()),
            updated_at: Set(Utc::now().to_rfc3339()),
        };

        CrawlJobs::insert(active_model)
            .on_conflict(
                sea_orm::sea_query::OnConflict::column(crawl_jobs::Column::Id)
                    .update_columns([
                        crawl_jobs::Column::Status,
                        crawl_jobs::Column::StartedAt,
                        crawl_jobs::Column::CompletedAt,
                        crawl_jobs::Column::RetryCount,
                        crawl_jobs::Column::ResultJson,
                        crawl_jobs::Column::Error,
                        crawl_jobs::Column::UpdatedAt,
                    ])
                    .to_owned(),
            )
            .exec_without_returning(&self.conn)
            .await?;

        Ok(())
    }

    pub async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let row = CrawlJobs::find_by_id(id.to_string()).one(&self.conn).await?;
        row.map(Self::map_model_to_job).transpose()
    }

    pub async fn list_by_status(&self, statuses: &[JobStatus]) -> Result<Vec<Job>> {
        let names: Vec<&str> = statuses.iter().map(JobStatus::as_str).collect();
        let rows = CrawlJobs::find()
            .filter(crawl_jobs::Column::Status.is_in(names))
            .order_by_asc(crawl_jobs::Column::CreatedAt)
            .all(&self.conn)
            .await?;

        rows.into_iter().map(Self::map_model_to_job).collect()
    }

    fn map_model_to_job(model: crawl_jobs::Model) -> Result<Job> {
        let id = model
            .id
            .parse::<JobId>()
            .with_context(|| format!("Invalid job id in store: {}", model.id))?;
        let kind = model
            .kind
            .parse::<JobKind>()
            .map_err(anyhow::Error::msg)?;
        let status = model
            .status
            .parse::<JobStatus>()
            .map_err(anyhow::Error::msg)?;
        let result = model
            .result_json
            .as_deref()
            .map(serde_json::from_str)
            .transpose()?;

        Ok(Job {
            id,
            kind,
            url: model.url,
            priority: model.priority,
            status,
            created_at: parse_timestamp(&model.created_at)?,
            started_at: model.started_at.as_deref().map(parse_timestamp).transpose()?,
            completed_at: model
                .completed_at
                .as_deref()
                .map(parse_timestamp)
                .transpose()?,
            sla_deadline: parse_timestamp(&model.sla_deadline)?,
            retry_count: u32::try_from(model.retry_count).unwrap_or(0),
            result,
            error: model.error,
        })
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("Invalid timestamp in store: {raw}"))
}
