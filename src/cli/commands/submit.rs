use crate::config::Config;
use crate::constants::jobs::{DEFAULT_CRAWL_PRIORITY, DEFAULT_RECRAWL_PRIORITY};
use crate::domain::JobKind;
use crate::state::SharedState;

pub async fn cmd_submit(
    config: Config,
    url: &str,
    priority: Option<i32>,
    crawl: bool,
) -> anyhow::Result<()> {
    let kind = if crawl { JobKind::Crawl } else { JobKind::Recrawl };
    let priority = priority.unwrap_or(match kind {
        JobKind::Recrawl => DEFAULT_RECRAWL_PRIORITY,
        JobKind::Crawl => DEFAULT_CRAWL_PRIORITY,
    });

    let state = SharedState::new(config).await?;
    let job = state.scheduler.submit(url, priority, kind).await?;

    println!("✓ Submitted {} job {}", job.kind, job.id);
    println!("  URL: {}", job.url);
    println!("  Priority: {} | SLA deadline: {}", job.priority, job.sla_deadline);
    println!();
    println!("The job is persisted; a serving instance queues it when it next starts.");
    println!("Track it with: crawlgate status {}", job.id);

    Ok(())
}
