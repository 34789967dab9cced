//! Engine facade.
//!
//! The `GenerationService` is the API other code talks to: submit,
//! inspect, cancel, resubmit, subscribe. Everything else in this
//! module tree is plumbing behind it.

use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::Utc;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::JobEvent;
use super::record::{JobKind, JobRecord, JobStatus};
use super::store::StoreError;
use super::submitter::{self, SubmitError, SubmitRequest};
use crate::deps::EngineDeps;

#[derive(Clone)]
pub struct GenerationService {
    deps: Arc<EngineDeps>,
}

impl GenerationService {
    pub fn new(deps: Arc<EngineDeps>) -> Self {
        Self { deps }
    }

    /// Submit a generation job. See [`submitter::submit`] for the
    /// outcome contract.
    pub async fn submit_job(&self, request: SubmitRequest) -> Result<JobRecord, SubmitError> {
        submitter::submit(request, &self.deps).await
    }

    /// Current snapshot of the record for an owner/kind pair.
    pub async fn get_job_status(
        &self,
        owner_ref: Uuid,
        kind: JobKind,
    ) -> Result<Option<JobRecord>, StoreError> {
        self.deps.store.get(owner_ref, kind).await
    }

    /// Request cancellation of an active job.
    ///
    /// Takes effect lazily: the in-flight poll unit notices the status
    /// at its next run and stands down. Cancelling a terminal record
    /// is a no-op that returns it unchanged.
    pub async fn cancel_job(&self, owner_ref: Uuid, kind: JobKind) -> Result<JobRecord> {
        let mut record = self
            .deps
            .store
            .get(owner_ref, kind)
            .await?
            .ok_or_else(|| anyhow!("no job record for owner {} kind {}", owner_ref, kind))?;

        if record.is_terminal() {
            return Ok(record);
        }

        record.status = JobStatus::Cancelled;
        record.message = "cancelled".to_string();
        record.external_job_id = None;
        record.completed_at = Some(Utc::now());

        let record = match self.deps.store.update(&record).await {
            Ok(stored) => stored,
            Err(StoreError::VersionConflict { .. }) => {
                // Re-read and reapply over whatever the poller wrote.
                let latest = self
                    .deps
                    .store
                    .get(owner_ref, kind)
                    .await?
                    .ok_or_else(|| anyhow!("record vanished during cancel"))?;
                if latest.is_terminal() {
                    latest
                } else {
                    let mut retry = latest;
                    retry.status = JobStatus::Cancelled;
                    retry.message = "cancelled".to_string();
                    retry.external_job_id = None;
                    retry.completed_at = Some(Utc::now());
                    self.deps.store.update(&retry).await?
                }
            }
            Err(e) => return Err(e.into()),
        };

        self.deps.emit(JobEvent::Cancelled {
            job_id: record.id,
            kind: record.kind,
        });
        Ok(record)
    }

    /// Reset a settled job and submit it again, regenerating artifacts
    /// even when they already exist. Fails with `AlreadyActive` while
    /// a chain is running; cancel first.
    pub async fn resubmit_job(&self, request: SubmitRequest) -> Result<JobRecord, SubmitError> {
        if let Some(existing) = self
            .deps
            .store
            .get(request.owner_ref, request.kind)
            .await?
        {
            if existing.is_active() {
                return Err(SubmitError::AlreadyActive {
                    owner_ref: request.owner_ref,
                    kind: request.kind,
                });
            }
        }

        let mut request = request;
        request.force = true;
        submitter::submit(request, &self.deps).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.deps.subscribe()
    }
}
