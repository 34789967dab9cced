//! Reconciliation scanner tests: mirroring lost writes, refreshing
//! progress, repairing severed chains, and sweep idempotence.

mod common;

use chrono::Utc;
use uuid::Uuid;

use common::test_env;
use engine_core::jobs::testing::permanent;
use engine_core::jobs::{scanner, submitter, JobKind, JobStatus, JobStore, SubmitRequest};
use engine_core::runtime::TaskRuntime;
use imagegen_client::PollOutcome;

fn request(owner: Uuid, kind: JobKind) -> SubmitRequest {
    SubmitRequest::builder()
        .owner_ref(owner)
        .kind(kind)
        .prompt("a lighthouse at dusk")
        .build()
}

#[tokio::test]
async fn scan_mirrors_lost_terminal_write() {
    let env = test_env();
    let owner = Uuid::new_v4();
    let kind = JobKind::NarrationImage;

    env.provider.push_poll(Ok(PollOutcome::Done {
        artifacts: vec![b"png".to_vec()],
    }));
    submitter::submit(request(owner, kind), &env.deps).await.unwrap();
    env.runtime.run_next(env.deps.clone()).await.unwrap();

    // Simulate a worker dying between the terminal poll and the final
    // record write: regress the record while the runtime still holds
    // the unit's terminal summary.
    let mut regressed = env.store.get(owner, kind).await.unwrap().unwrap();
    regressed.status = JobStatus::Processing;
    regressed.progress = 50;
    regressed.artifacts = Vec::new();
    regressed.completed_at = None;
    env.store.put_raw(regressed);

    let stats = scanner::scan(&env.deps).await.unwrap();
    assert_eq!(stats.scanned, 1);
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.failed, 0);
    assert_eq!(stats.updated, 1);

    let record = env.store.get(owner, kind).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.progress, 100);
    assert_eq!(record.artifacts.len(), 1);
    assert!(record.completed_at.is_some());

    // Terminal records leave the active set; nothing to scan again.
    let stats = scanner::scan(&env.deps).await.unwrap();
    assert_eq!(stats.scanned, 0);
    assert_eq!(stats.updated, 0);
}

#[tokio::test]
async fn scan_mirrors_failed_outcome() {
    let env = test_env();
    let owner = Uuid::new_v4();
    let kind = JobKind::CharacterImage;

    env.provider.push_poll(Err(permanent("400: task rejected")));
    submitter::submit(request(owner, kind), &env.deps).await.unwrap();
    env.runtime.run_next(env.deps.clone()).await.unwrap();

    let mut regressed = env.store.get(owner, kind).await.unwrap().unwrap();
    regressed.status = JobStatus::Processing;
    regressed.error = None;
    regressed.completed_at = None;
    env.store.put_raw(regressed);

    let stats = scanner::scan(&env.deps).await.unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.updated, 1);

    let record = env.store.get(owner, kind).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.error.as_deref().unwrap().contains("task rejected"));
}

#[tokio::test]
async fn scan_refreshes_progress_from_running_unit() {
    let env = test_env();
    let owner = Uuid::new_v4();
    let kind = JobKind::NarrationImage;

    let record = submitter::submit(request(owner, kind), &env.deps).await.unwrap();
    let task_id = record.runtime_task_id.clone().unwrap();

    // The unit is in flight and has published progress.
    env.runtime.report_progress(&task_id, 55, "halfway");

    let stats = scanner::scan(&env.deps).await.unwrap();
    assert_eq!(stats.still_processing, 1);
    assert_eq!(stats.updated, 1);

    let record = env.store.get(owner, kind).await.unwrap().unwrap();
    assert_eq!(record.progress, 55);
    assert_eq!(record.message, "halfway");

    // Same payload again: nothing left to write.
    let stats = scanner::scan(&env.deps).await.unwrap();
    assert_eq!(stats.still_processing, 1);
    assert_eq!(stats.updated, 0);
}

#[tokio::test]
async fn scan_repairs_severed_chain_handle() {
    let env = test_env();
    let owner = Uuid::new_v4();
    let kind = JobKind::NarrationImage;

    // First poll reschedules: unit task-0 records its successor.
    submitter::submit(request(owner, kind), &env.deps).await.unwrap();
    env.runtime.run_next(env.deps.clone()).await.unwrap();

    let current = env.store.get(owner, kind).await.unwrap().unwrap();
    let next_task_id = current.runtime_task_id.clone().unwrap();
    assert_ne!(next_task_id, "task-0");

    // Simulate the handle write being lost.
    let mut regressed = current;
    regressed.runtime_task_id = Some("task-0".to_string());
    env.store.put_raw(regressed);

    let stats = scanner::scan(&env.deps).await.unwrap();
    assert_eq!(stats.still_processing, 1);
    assert_eq!(stats.updated, 1);

    let record = env.store.get(owner, kind).await.unwrap().unwrap();
    assert_eq!(record.runtime_task_id.as_deref(), Some(next_task_id.as_str()));
}

#[tokio::test]
async fn scan_skips_record_with_unknown_handle() {
    let env = test_env();
    let owner = Uuid::new_v4();
    let kind = JobKind::NarrationImage;

    let mut orphan = engine_core::jobs::JobRecord::new(owner, kind);
    orphan.status = JobStatus::Processing;
    orphan.external_job_id = Some("prov-9".to_string());
    orphan.runtime_task_id = Some("task-404".to_string());
    orphan.started_at = Some(Utc::now());
    env.store.put_raw(orphan);

    // Lookup fails; the sweep moves on without touching the record.
    let stats = scanner::scan(&env.deps).await.unwrap();
    assert_eq!(stats.scanned, 1);
    assert_eq!(stats.updated, 0);

    let record = env.store.get(owner, kind).await.unwrap().unwrap();
    assert_eq!(record.status, JobStatus::Processing);
}

#[tokio::test]
async fn scan_ignores_records_outside_lookback() {
    let env = test_env();
    let owner = Uuid::new_v4();
    let kind = JobKind::NarrationImage;

    let mut stale = engine_core::jobs::JobRecord::new(owner, kind);
    stale.status = JobStatus::Processing;
    stale.external_job_id = Some("prov-9".to_string());
    stale.runtime_task_id = Some("task-0".to_string());
    stale.started_at = Some(Utc::now() - chrono::Duration::hours(25));
    env.store.put_raw(stale);

    let stats = scanner::scan(&env.deps).await.unwrap();
    assert_eq!(stats.scanned, 0);
}

#[tokio::test]
async fn quiet_sweep_over_in_flight_chain_writes_nothing() {
    let env = test_env();
    let owner = Uuid::new_v4();
    let kind = JobKind::CharacterImage;

    submitter::submit(request(owner, kind), &env.deps).await.unwrap();
    let before = env.store.get(owner, kind).await.unwrap().unwrap();

    // No runtime activity since the submit: two sweeps, zero writes.
    for _ in 0..2 {
        let stats = scanner::scan(&env.deps).await.unwrap();
        assert_eq!(stats.scanned, 1);
        assert_eq!(stats.still_processing, 1);
        assert_eq!(stats.updated, 0);
    }

    let after = env.store.get(owner, kind).await.unwrap().unwrap();
    assert_eq!(after.version, before.version);
    assert_eq!(after.status, before.status);
}
