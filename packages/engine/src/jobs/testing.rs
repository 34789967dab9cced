//! Job testing utilities.
//!
//! In-memory implementations of the engine's trait seams so tests run
//! without Postgres or a live provider.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use imagegen_client::{GenerationRequest, PollOutcome, ProviderError};

use super::record::{JobKind, JobRecord, JobStatus};
use super::store::{JobStore, StoreError};
use crate::deps::GenerationProvider;

// =============================================================================
// MemoryJobStore
// =============================================================================

/// In-memory job store with the same version-check semantics as the
/// Postgres store.
#[derive(Default)]
pub struct MemoryJobStore {
    records: RwLock<HashMap<(Uuid, JobKind), JobRecord>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot every stored record.
    pub fn records(&self) -> Vec<JobRecord> {
        self.records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .cloned()
            .collect()
    }

    /// Overwrite a record without a version check. For test setup that
    /// simulates lost writes.
    pub fn put_raw(&self, record: JobRecord) {
        self.records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert((record.owner_ref, record.kind), record);
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn get(&self, owner_ref: Uuid, kind: JobKind) -> Result<Option<JobRecord>, StoreError> {
        Ok(self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(owner_ref, kind))
            .cloned())
    }

    async fn upsert(&self, record: JobRecord) -> Result<JobRecord, StoreError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let key = (record.owner_ref, record.kind);
        let stored = match records.get(&key) {
            Some(existing) => {
                let mut stored = record;
                stored.id = existing.id;
                stored.created_at = existing.created_at;
                stored.version = existing.version + 1;
                stored.updated_at = Utc::now();
                stored
            }
            None => record,
        };
        records.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, record: &JobRecord) -> Result<JobRecord, StoreError> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        let key = (record.owner_ref, record.kind);
        match records.get(&key) {
            None => Err(StoreError::NotFound {
                owner_ref: record.owner_ref,
                kind: record.kind,
            }),
            Some(existing) if existing.version != record.version => {
                Err(StoreError::VersionConflict {
                    id: record.id,
                    expected: record.version,
                })
            }
            Some(_) => {
                let mut stored = record.clone();
                stored.version += 1;
                stored.updated_at = Utc::now();
                records.insert(key, stored.clone());
                Ok(stored)
            }
        }
    }

    async fn find_active_since(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<JobRecord>, StoreError> {
        let mut records: Vec<_> = self
            .records
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            // Mirrors the SQL predicate: Submitting rows have no poll
            // chain to reconcile.
            .filter(|r| matches!(r.status, JobStatus::Pending | JobStatus::Processing))
            .filter(|r| r.started_at.is_some_and(|t| t >= cutoff))
            .cloned()
            .collect();
        records.sort_by_key(|r| r.started_at);
        Ok(records)
    }
}

// =============================================================================
// ScriptedProvider
// =============================================================================

/// Provider double driven by queued responses.
///
/// Submit and poll each pop from their own queue; when a queue runs
/// dry the default kicks in (auto-generated task ids for submit, a
/// configurable outcome for poll). All calls are recorded.
pub struct ScriptedProvider {
    submit_results: Mutex<VecDeque<imagegen_client::Result<String>>>,
    poll_results: Mutex<VecDeque<imagegen_client::Result<PollOutcome>>>,
    default_poll: Mutex<PollOutcome>,
    submit_requests: Mutex<Vec<GenerationRequest>>,
    poll_requests: Mutex<Vec<String>>,
}

impl Default for ScriptedProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self {
            submit_results: Mutex::new(VecDeque::new()),
            poll_results: Mutex::new(VecDeque::new()),
            default_poll: Mutex::new(PollOutcome::Running),
            submit_requests: Mutex::new(Vec::new()),
            poll_requests: Mutex::new(Vec::new()),
        }
    }

    pub fn push_submit(&self, result: imagegen_client::Result<String>) {
        self.submit_results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    pub fn push_poll(&self, result: imagegen_client::Result<PollOutcome>) {
        self.poll_results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(result);
    }

    pub fn set_default_poll(&self, outcome: PollOutcome) {
        *self.default_poll.lock().unwrap_or_else(|e| e.into_inner()) = outcome;
    }

    pub fn submit_calls(&self) -> usize {
        self.submit_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn poll_calls(&self) -> usize {
        self.poll_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    pub fn submit_requests(&self) -> Vec<GenerationRequest> {
        self.submit_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn polled_job_ids(&self) -> Vec<String> {
        self.poll_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    async fn submit(&self, request: &GenerationRequest) -> imagegen_client::Result<String> {
        let mut requests = self
            .submit_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        requests.push(request.clone());
        let n = requests.len();
        drop(requests);

        self.submit_results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| Ok(format!("prov-{}", n)))
    }

    async fn poll(&self, external_job_id: &str) -> imagegen_client::Result<PollOutcome> {
        self.poll_requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(external_job_id.to_string());

        self.poll_results
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or_else(|| {
                Ok(self
                    .default_poll
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .clone())
            })
    }
}

/// Convenience constructor for a transient error.
pub fn transient(message: &str) -> ProviderError {
    ProviderError::Transient(message.to_string())
}

/// Convenience constructor for a permanent error.
pub fn permanent(message: &str) -> ProviderError {
    ProviderError::Permanent(message.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::record::JobStatus;

    #[tokio::test]
    async fn memory_store_upsert_bumps_version() {
        let store = MemoryJobStore::new();
        let record = JobRecord::new(Uuid::new_v4(), JobKind::NarrationImage);

        let stored = store.upsert(record.clone()).await.unwrap();
        assert_eq!(stored.version, 1);

        let stored = store.upsert(stored).await.unwrap();
        assert_eq!(stored.version, 2);
    }

    #[tokio::test]
    async fn memory_store_update_rejects_stale_version() {
        let store = MemoryJobStore::new();
        let record = JobRecord::new(Uuid::new_v4(), JobKind::NarrationImage);
        let stored = store.upsert(record).await.unwrap();

        // First writer succeeds and bumps the version.
        let mut first = stored.clone();
        first.status = JobStatus::Pending;
        first.started_at = Some(Utc::now());
        store.update(&first).await.unwrap();

        // Second writer still holds the old version.
        let mut second = stored;
        second.progress = 50;
        let err = store.update(&second).await.unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn memory_store_filters_by_cutoff() {
        let store = MemoryJobStore::new();

        let mut recent = JobRecord::new(Uuid::new_v4(), JobKind::NarrationImage);
        recent.status = JobStatus::Processing;
        recent.started_at = Some(Utc::now());
        store.put_raw(recent);

        let mut stale = JobRecord::new(Uuid::new_v4(), JobKind::NarrationImage);
        stale.status = JobStatus::Processing;
        stale.started_at = Some(Utc::now() - chrono::Duration::hours(25));
        store.put_raw(stale);

        let cutoff = Utc::now() - chrono::Duration::hours(24);
        let active = store.find_active_since(cutoff).await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn scripted_provider_defaults_after_queue_drains() {
        let provider = ScriptedProvider::new();
        provider.push_poll(Ok(PollOutcome::Pending));

        let first = provider.poll("p-1").await.unwrap();
        let second = provider.poll("p-1").await.unwrap();

        assert_eq!(first, PollOutcome::Pending);
        assert_eq!(second, PollOutcome::Running);
        assert_eq!(provider.poll_calls(), 2);
    }
}
