//! Self-rescheduling poll loop.
//!
//! One poll unit performs exactly one provider round trip and decides
//! what happens next as a value, never by throwing: continue on the
//! steady interval, retry with backoff after a transient error, or
//! stop at a terminal state. The runtime handler consumes that
//! decision, schedules the successor unit, and records a terminal
//! summary the reconciliation scanner can mirror later.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use imagegen_client::PollOutcome;

use super::events::JobEvent;
use super::record::{JobKind, JobRecord, JobStatus};
use super::store::StoreError;
use crate::deps::EngineDeps;
use crate::runtime::{TaskContext, TaskRegistry, TaskSpec};

pub const POLL_TASK_TYPE: &str = "poll_generation_job";

/// Payload carried by every poll unit.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PollTaskPayload {
    pub owner_ref: Uuid,
    pub kind: JobKind,
}

/// Decision produced by one poll round trip.
#[derive(Debug, Clone, PartialEq)]
pub enum PollStep {
    /// Not finished; poll again after the steady interval.
    Continue { delay: Duration },
    /// Transient provider error; poll again after backoff without
    /// consuming the poll budget.
    TransientRetry { delay: Duration },
    Completed,
    Failed,
    TimedOut,
    /// Nothing to do (cancelled, superseded, or already terminal).
    Skipped { reason: String },
}

/// Value recorded by a finished poll unit.
///
/// `Rescheduled` lets the scanner repair a record whose handle write
/// was lost between scheduling the successor and persisting it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PollUnitValue {
    Rescheduled { next_task_id: String },
    Terminal(TerminalSummary),
    Skipped { reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminalSummary {
    pub status: JobStatus,
    pub progress: i32,
    pub message: String,
    pub error: Option<String>,
    pub artifacts: Vec<String>,
}

impl TerminalSummary {
    pub fn from_record(record: &JobRecord) -> Self {
        Self {
            status: record.status,
            progress: record.progress,
            message: record.message.clone(),
            error: record.error.clone(),
            artifacts: record.artifacts.clone(),
        }
    }
}

/// Register the poll handler on a task registry.
pub fn register(registry: &mut TaskRegistry) {
    registry.register::<PollTaskPayload, _, _>(POLL_TASK_TYPE, |payload, ctx, deps| async move {
        run_poll_unit(payload, ctx, deps).await
    });
}

/// Schedule a poll unit for an owner/kind pair.
pub async fn schedule_poll(
    deps: &Arc<EngineDeps>,
    owner_ref: Uuid,
    kind: JobKind,
    delay: Duration,
) -> anyhow::Result<String> {
    let payload = PollTaskPayload { owner_ref, kind };
    let task = TaskSpec::new(POLL_TASK_TYPE, serde_json::to_value(payload)?);
    let task_id = deps.runtime.schedule(task, delay).await?;
    Ok(task_id)
}

/// Heuristic progress while the provider is working: the submit phase
/// accounts for 30, each observed poll adds 2, capped at 80 total.
pub(crate) fn heuristic_progress(poll_attempts: i32) -> i32 {
    30 + (poll_attempts * 2).min(50)
}

/// One provider round trip. Mutates the record in memory and returns
/// the decision; persistence stays with the caller.
pub async fn advance(record: &mut JobRecord, deps: &EngineDeps) -> PollStep {
    // Lazy cancellation: a cancel between polls is honored here.
    if record.status == JobStatus::Cancelled {
        return PollStep::Skipped {
            reason: "job cancelled".to_string(),
        };
    }
    if !record.is_active() {
        return PollStep::Skipped {
            reason: format!("record not active ({:?})", record.status),
        };
    }

    let Some(external_job_id) = record.external_job_id.clone() else {
        record.fail("missing provider job handle");
        return PollStep::Failed;
    };

    let config = &deps.config.poller;

    let outcome = {
        let permit = match deps.provider_limiter.acquire().await {
            Ok(permit) => permit,
            Err(_) => {
                // Closed only while shutting down; the provider may
                // still finish the job, so defer instead of failing.
                tracing::warn!(job_id = %record.id, "Provider limiter closed, deferring poll");
                return PollStep::TransientRetry {
                    delay: config.transient_backoff_base,
                };
            }
        };
        let outcome = deps.provider.poll(&external_job_id).await;
        drop(permit);
        outcome
    };

    match outcome {
        Err(e) if e.is_transient() => {
            record.transient_retry_attempts += 1;
            if record.transient_retry_attempts > config.transient_retry_budget {
                tracing::error!(
                    job_id = %record.id,
                    attempts = record.transient_retry_attempts,
                    "Transient retry budget exhausted"
                );
                record.fail("polling rate-limited, exceeded retry budget");
                PollStep::Failed
            } else {
                let delay =
                    config.transient_backoff_base * record.transient_retry_attempts as u32;
                record.message = format!(
                    "provider busy, retry {} of {}",
                    record.transient_retry_attempts, config.transient_retry_budget
                );
                tracing::warn!(
                    job_id = %record.id,
                    retry = record.transient_retry_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient poll error, backing off"
                );
                PollStep::TransientRetry { delay }
            }
        }
        Err(e) => {
            // Permanent and decode errors fail closed.
            record.fail(e.to_string());
            PollStep::Failed
        }
        Ok(PollOutcome::Done { artifacts }) => {
            record.transient_retry_attempts = 0;
            match persist_artifacts(record, &artifacts, deps).await {
                Ok(paths) => {
                    tracing::info!(
                        job_id = %record.id,
                        kind = %record.kind,
                        count = paths.len(),
                        "Generation complete, artifacts stored"
                    );
                    record.complete(paths);
                    PollStep::Completed
                }
                Err(e) => {
                    record.fail(format!("artifact persist failed: {}", e));
                    PollStep::Failed
                }
            }
        }
        Ok(PollOutcome::Failed { reason }) => {
            record.transient_retry_attempts = 0;
            record.fail(reason);
            PollStep::Failed
        }
        Ok(PollOutcome::Pending | PollOutcome::Running) => {
            record.transient_retry_attempts = 0;
            record.poll_attempts += 1;
            if record.poll_attempts > config.max_poll_attempts {
                record.time_out("poll budget exhausted");
                PollStep::TimedOut
            } else {
                record.status = JobStatus::Processing;
                record.progress = heuristic_progress(record.poll_attempts);
                record.message = "generation in progress".to_string();
                PollStep::Continue {
                    delay: config.poll_interval,
                }
            }
        }
    }
}

async fn persist_artifacts(
    record: &JobRecord,
    artifacts: &[Vec<u8>],
    deps: &EngineDeps,
) -> anyhow::Result<Vec<String>> {
    if artifacts.is_empty() {
        return Err(anyhow!("provider reported done with no artifacts"));
    }

    let mut paths = Vec::with_capacity(artifacts.len());
    for (index, bytes) in artifacts.iter().enumerate() {
        let path = deps
            .artifacts
            .write(record.owner_ref, record.kind, index, bytes)
            .await?;
        paths.push(path);
    }
    Ok(paths)
}

/// Runtime handler for one poll unit.
async fn run_poll_unit(
    payload: PollTaskPayload,
    ctx: TaskContext,
    deps: Arc<EngineDeps>,
) -> anyhow::Result<Option<serde_json::Value>> {
    let Some(mut record) = deps.store.get(payload.owner_ref, payload.kind).await? else {
        return skipped_value("record missing");
    };

    // A resubmission replaces the chain; stale units stand down.
    if record.runtime_task_id.as_deref() != Some(ctx.task_id.as_str()) {
        return skipped_value("superseded by a newer poll chain");
    }

    let step = advance(&mut record, &deps).await;

    // Publish in-flight progress so the scanner can refresh records
    // whose chain is still running.
    deps.runtime
        .report_progress(&ctx.task_id, record.progress, &record.message);

    match step {
        PollStep::Continue { delay } | PollStep::TransientRetry { delay } => {
            let next_task_id =
                schedule_poll(&deps, payload.owner_ref, payload.kind, delay).await?;
            record.runtime_task_id = Some(next_task_id.clone());
            persist(&deps, &mut record).await?;
            deps.emit(JobEvent::PollScheduled {
                job_id: record.id,
                kind: record.kind,
                runtime_task_id: next_task_id.clone(),
                delay_ms: delay.as_millis() as u64,
            });
            Ok(Some(serde_json::to_value(PollUnitValue::Rescheduled {
                next_task_id,
            })?))
        }
        PollStep::Completed => {
            persist(&deps, &mut record).await?;
            deps.emit(JobEvent::Completed {
                job_id: record.id,
                kind: record.kind,
                artifact_count: record.artifacts.len(),
            });
            terminal_value(&record)
        }
        PollStep::Failed => {
            persist(&deps, &mut record).await?;
            deps.emit(JobEvent::Failed {
                job_id: record.id,
                kind: record.kind,
                error: record.error.clone().unwrap_or_default(),
            });
            terminal_value(&record)
        }
        PollStep::TimedOut => {
            persist(&deps, &mut record).await?;
            deps.emit(JobEvent::TimedOut {
                job_id: record.id,
                kind: record.kind,
                poll_attempts: record.poll_attempts,
            });
            terminal_value(&record)
        }
        PollStep::Skipped { reason } => skipped_value(&reason),
    }
}

fn terminal_value(record: &JobRecord) -> anyhow::Result<Option<serde_json::Value>> {
    Ok(Some(serde_json::to_value(PollUnitValue::Terminal(
        TerminalSummary::from_record(record),
    ))?))
}

fn skipped_value(reason: &str) -> anyhow::Result<Option<serde_json::Value>> {
    Ok(Some(serde_json::to_value(PollUnitValue::Skipped {
        reason: reason.to_string(),
    })?))
}

/// Write back with one re-read on version conflict. A concurrent
/// cancel wins outright; any other concurrent writer loses to us once.
async fn persist(deps: &EngineDeps, record: &mut JobRecord) -> anyhow::Result<()> {
    match deps.store.update(record).await {
        Ok(stored) => {
            *record = stored;
            Ok(())
        }
        Err(StoreError::VersionConflict { .. }) => {
            let latest = deps
                .store
                .get(record.owner_ref, record.kind)
                .await?
                .ok_or_else(|| anyhow!("record vanished during poll"))?;
            if latest.status == JobStatus::Cancelled {
                *record = latest;
                return Ok(());
            }
            record.version = latest.version;
            let stored = deps.store.update(record).await?;
            *record = stored;
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}
