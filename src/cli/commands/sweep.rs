use crate::config::Config;
use crate::state::SharedState;

pub async fn cmd_sweep(config: Config, recover: bool) -> anyhow::Result<()> {
    let state = SharedState::new(config).await?;

    if recover {
        let recovered = state.scheduler.recover().await?;
        println!(
            "Recovered jobs: {} re-queued, {} leases expired, {} failed",
            recovered.requeued, recovered.expired, recovered.failed
        );
    }

    let report = state.maintenance().run_once().await;

    println!("Maintenance pass complete");
    println!(
        "  Leases expired: {} ({} re-queued, {} failed)",
        report.sweep.expired, report.sweep.requeued, report.sweep.failed
    );
    println!(
        "  SLA: {} at risk, {} overdue",
        report.sla.at_risk, report.sla.overdue
    );
    println!("  Cache rows purged: {}", report.cache_purged);
    println!("  Idle rate keys evicted: {}", report.rate_keys_evicted);

    Ok(())
}
