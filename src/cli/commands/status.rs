use crate::config::Config;
use crate::db::Store;
use crate::domain::JobId;

pub async fn cmd_status(config: &Config, job_id: &str) -> anyhow::Result<()> {
    let Ok(id) = job_id.parse::<JobId>() else {
        println!("Invalid job ID: {job_id}");
        return Ok(());
    };

    let store = Store::new(&config.general.database_path).await?;
    let Some(job) = store.get_job(id).await? else {
        println!("Job {id} not found.");
        return Ok(());
    };

    println!("Job {} ({})", job.id, job.kind);
    println!("{:-<70}", "");
    println!("  URL:       {}", job.url);
    println!("  Status:    {}", job.status);
    println!("  Priority:  {}", job.priority);
    println!("  Retries:   {}", job.retry_count);
    println!("  Created:   {}", job.created_at);
    println!("  Deadline:  {}", job.sla_deadline);
    if let Some(started) = job.started_at {
        println!("  Started:   {started}");
    }
    if let Some(completed) = job.completed_at {
        println!("  Completed: {completed}");
    }
    if let Some(error) = &job.error {
        println!("  Error:     {error}");
    }
    if let Some(result) = &job.result {
        println!("  Result:    {result}");
    }

    Ok(())
}
