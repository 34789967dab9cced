//! Reconciliation scanner.
//!
//! Poll chains can be severed by restarts: a unit finishes but the
//! record write is lost, or the handle pointing at the successor never
//! lands. The scanner walks recent active records, asks the task
//! runtime (not the provider) what their unit concluded, and mirrors
//! that conclusion into the record. One misbehaving record never
//! aborts the sweep.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;

use super::poller::PollUnitValue;
use super::record::{JobRecord, JobStatus};
use super::store::StoreError;
use crate::deps::EngineDeps;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanStats {
    pub scanned: usize,
    pub completed: usize,
    pub failed: usize,
    pub still_processing: usize,
    /// Records actually written this sweep. Zero on a quiet re-scan.
    pub updated: usize,
}

/// One reconciliation sweep over the configured lookback window.
pub async fn scan(deps: &Arc<EngineDeps>) -> Result<ScanStats> {
    let lookback = chrono::Duration::from_std(deps.config.scanner.lookback)
        .map_err(|e| anyhow!("scanner lookback out of range: {}", e))?;
    let cutoff = Utc::now() - lookback;

    let records = deps.store.find_active_since(cutoff).await?;
    let mut stats = ScanStats::default();

    for mut record in records {
        stats.scanned += 1;
        if let Err(e) = reconcile_record(&mut record, deps, &mut stats).await {
            tracing::warn!(
                job_id = %record.id,
                kind = %record.kind,
                error = %e,
                "Reconciliation skipped record"
            );
        }
    }

    tracing::info!(
        scanned = stats.scanned,
        completed = stats.completed,
        failed = stats.failed,
        still_processing = stats.still_processing,
        updated = stats.updated,
        "Reconciliation sweep finished"
    );
    Ok(stats)
}

async fn reconcile_record(
    record: &mut JobRecord,
    deps: &Arc<EngineDeps>,
    stats: &mut ScanStats,
) -> Result<()> {
    let Some(task_id) = record.runtime_task_id.clone() else {
        // Submitted but no poll unit recorded; the next submit or a
        // manual resubmit has to pick this up.
        stats.still_processing += 1;
        return Ok(());
    };

    let outcome = deps.runtime.lookup(&task_id).await?;

    if !outcome.ready {
        stats.still_processing += 1;
        if let Some((progress, message)) = outcome.progress {
            if progress != record.progress || message != record.message {
                record.progress = progress;
                record.message = message;
                if write_back(deps, record).await? {
                    stats.updated += 1;
                }
            }
        }
        return Ok(());
    }

    if !outcome.successful {
        stats.failed += 1;
        if record.status != JobStatus::Failed {
            record.fail(
                outcome
                    .error
                    .unwrap_or_else(|| "poll unit failed".to_string()),
            );
            if write_back(deps, record).await? {
                stats.updated += 1;
            }
        }
        return Ok(());
    }

    let Some(value) = outcome.value else {
        // Finished without recording anything; nothing to mirror.
        stats.still_processing += 1;
        return Ok(());
    };

    match serde_json::from_value::<PollUnitValue>(value) {
        Ok(PollUnitValue::Rescheduled { next_task_id }) => {
            stats.still_processing += 1;
            // The successor was scheduled but the handle write was
            // lost; repair it so the next sweep follows the chain.
            if record.runtime_task_id.as_deref() != Some(next_task_id.as_str()) {
                record.runtime_task_id = Some(next_task_id);
                if write_back(deps, record).await? {
                    stats.updated += 1;
                }
            }
        }
        Ok(PollUnitValue::Terminal(summary)) => {
            match summary.status {
                JobStatus::Completed => stats.completed += 1,
                JobStatus::Failed | JobStatus::Timeout => stats.failed += 1,
                _ => {}
            }

            // Idempotence: a record that already reflects the summary
            // is left untouched.
            if record.status == summary.status {
                return Ok(());
            }

            record.status = summary.status;
            record.progress = summary.progress;
            record.message = summary.message;
            record.error = summary.error;
            record.artifacts = summary.artifacts;
            if record.completed_at.is_none() {
                record.completed_at = Some(Utc::now());
            }
            if write_back(deps, record).await? {
                stats.updated += 1;
            }
        }
        Ok(PollUnitValue::Skipped { .. }) => {
            // The unit stood down (cancel or supersede); the record
            // already says why.
        }
        Err(e) => {
            return Err(anyhow!("unreadable poll unit value: {}", e));
        }
    }

    Ok(())
}

/// Update with one retry on version conflict. If the re-read shows the
/// record already moved to where we wanted it, there is nothing to do.
async fn write_back(deps: &Arc<EngineDeps>, record: &mut JobRecord) -> Result<bool> {
    match deps.store.update(record).await {
        Ok(stored) => {
            *record = stored;
            Ok(true)
        }
        Err(StoreError::VersionConflict { .. }) => {
            let Some(latest) = deps.store.get(record.owner_ref, record.kind).await? else {
                return Ok(false);
            };
            if latest.status == record.status && latest.progress == record.progress {
                *record = latest;
                return Ok(false);
            }
            // The active writer moved the record elsewhere; it wins,
            // the next sweep re-evaluates.
            tracing::debug!(
                job_id = %record.id,
                "Version conflict during reconciliation, leaving record for next sweep"
            );
            *record = latest;
            Ok(false)
        }
        Err(e) => Err(e.into()),
    }
}
