//! Provider submission.
//!
//! Owns the idempotency guard, the bounded submit retry, and the
//! handoff to the poll loop. A submission that the provider rejects is
//! still a durable outcome: the record ends up Failed and the caller
//! gets it back, not an error.

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::Utc;
use thiserror::Error;
use typed_builder::TypedBuilder;
use uuid::Uuid;

use imagegen_client::GenerationRequest;

use super::events::JobEvent;
use super::poller;
use super::record::{JobKind, JobRecord, JobStatus};
use super::store::StoreError;
use crate::config::SubmitterConfig;
use crate::deps::EngineDeps;
use crate::runtime::RuntimeError;

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("an active generation job already exists for owner {owner_ref} kind {kind}")]
    AlreadyActive { owner_ref: Uuid, kind: JobKind },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Runtime(#[from] RuntimeError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Everything needed to start one generation job.
#[derive(Debug, Clone, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct SubmitRequest {
    pub owner_ref: Uuid,
    pub kind: JobKind,
    pub prompt: String,
    /// Raw reference image bytes; encoded for the wire here.
    #[builder(default)]
    pub reference_assets: Vec<Vec<u8>>,
    #[builder(default, setter(strip_option))]
    pub style: Option<String>,
    #[builder(default = 1u32)]
    pub image_count: u32,
    /// Regenerate even when artifacts already exist on disk.
    #[builder(default = false)]
    pub force: bool,
}

/// Linear backoff between submit attempts.
pub(crate) fn submit_backoff(config: &SubmitterConfig, attempt: u32) -> Duration {
    config.retry_backoff_base * attempt
}

/// Submit a generation job for `(owner_ref, kind)`.
///
/// Returns the persisted record: Pending on acceptance, Completed on a
/// skip (artifacts already on disk), Failed when the provider refused.
/// `AlreadyActive` is the only constraint failure surfaced as an error.
pub async fn submit(
    request: SubmitRequest,
    deps: &Arc<EngineDeps>,
) -> Result<JobRecord, SubmitError> {
    let owner_ref = request.owner_ref;
    let kind = request.kind;

    let mut record = match deps.store.get(owner_ref, kind).await? {
        Some(mut existing) if existing.status == JobStatus::Submitting => {
            let age = (Utc::now() - existing.updated_at).to_std().unwrap_or_default();
            if age < deps.config.submitter.claim_timeout {
                return Err(SubmitError::AlreadyActive { owner_ref, kind });
            }
            // Claim left behind by a dead worker; take the row over.
            tracing::warn!(
                job_id = %existing.id,
                kind = %kind,
                "Reclaiming stale submission claim"
            );
            existing.reset_for_resubmit();
            existing
        }
        Some(existing) if existing.is_active() => {
            return Err(SubmitError::AlreadyActive { owner_ref, kind });
        }
        Some(existing) if existing.status == JobStatus::Completed && !request.force => {
            tracing::debug!(job_id = %existing.id, kind = %kind, "Job already completed, nothing to do");
            return Ok(existing);
        }
        Some(mut existing) => {
            if existing.is_terminal() {
                existing.reset_for_resubmit();
            }
            existing
        }
        None => JobRecord::new(owner_ref, kind),
    };

    // Prior output on disk makes the submission a no-op.
    if !request.force && deps.artifacts.exists(owner_ref, kind).await {
        let paths = deps.artifacts.existing_paths(owner_ref, kind).await;
        tracing::info!(
            owner_ref = %owner_ref,
            kind = %kind,
            count = paths.len(),
            "Artifacts already exist, skipping provider submission"
        );
        record.complete(paths);
        record.message = "artifacts already exist".to_string();
        let record = deps.store.upsert(record).await?;
        deps.emit(JobEvent::Completed {
            job_id: record.id,
            kind: record.kind,
            artifact_count: record.artifacts.len(),
        });
        return Ok(record);
    }

    // Claim the row before talking to the provider. Submitting counts
    // as active, so a concurrent submit for the same pair hits the
    // guard above even while this one backs off between attempts.
    record.status = JobStatus::Submitting;
    record.message = "submitting".to_string();
    let mut record = deps.store.upsert(record).await?;

    let mut generation = GenerationRequest::new(request.prompt.clone());
    generation.reference_images_base64 = request
        .reference_assets
        .iter()
        .map(|bytes| BASE64.encode(bytes))
        .collect();
    generation.style = request.style.clone();
    generation.image_count = request.image_count;

    let config = deps.config.submitter.clone();
    let mut attempt = 0u32;
    let external_job_id = loop {
        attempt += 1;

        let permit = deps
            .provider_limiter
            .acquire()
            .await
            .map_err(|_| anyhow!("provider limiter closed"))?;
        let result = deps.provider.submit(&generation).await;
        drop(permit);

        match result {
            Ok(id) => break id,
            Err(e) if e.is_transient() && attempt < config.max_attempts => {
                let delay = submit_backoff(&config, attempt);
                tracing::warn!(
                    owner_ref = %owner_ref,
                    kind = %kind,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Provider submit failed transiently, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => {
                let error = if e.is_transient() {
                    format!(
                        "submission rate-limited after {} attempts",
                        config.max_attempts
                    )
                } else {
                    e.to_string()
                };
                tracing::error!(owner_ref = %owner_ref, kind = %kind, error = %error, "Provider submit failed");
                record.fail(error.clone());
                let record = write_submission(deps, &record).await?;
                if record.status != JobStatus::Failed {
                    // A concurrent cancel won the row.
                    return Ok(record);
                }
                deps.emit(JobEvent::Failed {
                    job_id: record.id,
                    kind: record.kind,
                    error,
                });
                return Ok(record);
            }
        }
    };

    // Persist the provider handle before scheduling anything; a crash
    // here leaves a pollable Pending record for the scanner.
    record.external_job_id = Some(external_job_id.clone());
    record.status = JobStatus::Pending;
    record.progress = 0;
    record.message = "submitted to provider".to_string();
    record.started_at = Some(Utc::now());
    let mut record = write_submission(deps, &record).await?;
    if record.status != JobStatus::Pending {
        // A cancel landed while we were talking to the provider; the
        // accepted provider job is abandoned lazily.
        return Ok(record);
    }

    tracing::info!(
        job_id = %record.id,
        owner_ref = %owner_ref,
        kind = %kind,
        external_job_id = %external_job_id,
        "Generation job submitted"
    );
    deps.emit(JobEvent::Submitted {
        job_id: record.id,
        owner_ref,
        kind,
        external_job_id,
    });

    let delay = deps.config.poller.settle_delay;
    let runtime_task_id = poller::schedule_poll(deps, owner_ref, kind, delay).await?;
    record.runtime_task_id = Some(runtime_task_id.clone());
    let record = write_submission(deps, &record).await?;

    deps.emit(JobEvent::PollScheduled {
        job_id: record.id,
        kind,
        runtime_task_id,
        delay_ms: delay.as_millis() as u64,
    });

    Ok(record)
}

/// Write back a submission-phase record. A concurrent cancel wins and
/// its record is returned unchanged; any other conflicting writer means
/// a second submitter took the row over.
async fn write_submission(
    deps: &Arc<EngineDeps>,
    record: &JobRecord,
) -> Result<JobRecord, SubmitError> {
    match deps.store.update(record).await {
        Ok(stored) => Ok(stored),
        Err(StoreError::VersionConflict { .. }) => {
            let latest = deps
                .store
                .get(record.owner_ref, record.kind)
                .await?
                .ok_or_else(|| anyhow!("record vanished during submit"))?;
            if latest.status == JobStatus::Cancelled {
                Ok(latest)
            } else {
                Err(SubmitError::AlreadyActive {
                    owner_ref: record.owner_ref,
                    kind: record.kind,
                })
            }
        }
        Err(e) => Err(e.into()),
    }
}
