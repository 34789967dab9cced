//! Shared test harness: in-memory store, scripted provider, manual
//! task runtime, and a temp artifact directory.

// Each test binary uses a different slice of the harness.
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use engine_core::artifacts::FsArtifactStore;
use engine_core::config::EngineConfig;
use engine_core::deps::EngineDeps;
use engine_core::jobs::poller;
use engine_core::jobs::testing::{MemoryJobStore, ScriptedProvider};
use engine_core::runtime::{ManualRuntime, TaskRegistry, TaskRuntime};

pub struct TestEnv {
    pub deps: Arc<EngineDeps>,
    pub store: Arc<MemoryJobStore>,
    pub provider: Arc<ScriptedProvider>,
    pub runtime: Arc<ManualRuntime>,
    pub artifact_dir: tempfile::TempDir,
}

pub fn test_env() -> TestEnv {
    let mut config = EngineConfig::default();
    // Submit backoff actually sleeps; keep it invisible in tests.
    config.submitter.retry_backoff_base = Duration::from_millis(1);
    test_env_with(config)
}

/// Harness with a caller-supplied config, for tests that need real
/// backoff windows.
pub fn test_env_with(config: EngineConfig) -> TestEnv {
    let mut registry = TaskRegistry::new();
    poller::register(&mut registry);

    let store = Arc::new(MemoryJobStore::new());
    let provider = Arc::new(ScriptedProvider::new());
    let runtime = Arc::new(ManualRuntime::new(registry));
    let artifact_dir = tempfile::tempdir().expect("tempdir");

    let deps = EngineDeps::new(
        store.clone(),
        Arc::new(FsArtifactStore::new(artifact_dir.path())),
        provider.clone(),
        runtime.clone() as Arc<dyn TaskRuntime>,
        config,
    );

    TestEnv {
        deps,
        store,
        provider,
        runtime,
        artifact_dir,
    }
}
