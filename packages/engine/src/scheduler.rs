//! Scheduled background tasks using tokio-cron-scheduler.
//!
//! The reconciliation sweep runs on a cron schedule independently of
//! the poll chains. It only reads the task runtime and writes records;
//! failures are logged and the next tick tries again.

use std::sync::Arc;

use anyhow::Result;
use tokio_cron_scheduler::{Job, JobScheduler};

use crate::deps::EngineDeps;
use crate::jobs::scanner;

/// Start all scheduled tasks.
pub async fn start_scheduler(deps: Arc<EngineDeps>) -> Result<JobScheduler> {
    let scheduler = JobScheduler::new().await?;

    let cron = deps.config.scanner.cron.clone();
    let sweep_deps = deps.clone();
    let sweep_job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let deps = sweep_deps.clone();
        Box::pin(async move {
            match scanner::scan(&deps).await {
                Ok(stats) => {
                    if stats.updated > 0 {
                        tracing::info!(updated = stats.updated, "Reconciliation repaired records");
                    }
                }
                Err(e) => {
                    tracing::error!("Reconciliation sweep failed: {}", e);
                }
            }
        })
    })?;

    scheduler.add(sweep_job).await?;
    scheduler.start().await?;

    tracing::info!(cron = %cron, "Scheduled tasks started (reconciliation sweep)");
    Ok(scheduler)
}
