//! Engine dependencies (using traits for testability).
//!
//! The central dependency container handed to every handler. All
//! external collaborators sit behind trait objects so tests can swap
//! in in-memory implementations.

use std::sync::Arc;

use async_trait::async_trait;
use imagegen_client::{GenerationRequest, ImageGenClient, ImageGenConfig, PollOutcome};
use tokio::sync::{broadcast, Semaphore};

use crate::artifacts::ArtifactStore;
use crate::config::EngineConfig;
use crate::jobs::events::JobEvent;
use crate::jobs::store::JobStore;
use crate::runtime::TaskRuntime;

// =============================================================================
// GenerationProvider (trait seam over the REST client)
// =============================================================================

#[async_trait]
pub trait GenerationProvider: Send + Sync {
    async fn submit(&self, request: &GenerationRequest) -> imagegen_client::Result<String>;

    async fn poll(&self, external_job_id: &str) -> imagegen_client::Result<PollOutcome>;
}

/// Production provider. Builds a short-lived client per call; the
/// provider rotates endpoints, so nothing caches a connection choice.
pub struct HttpGenerationProvider {
    config: ImageGenConfig,
}

impl HttpGenerationProvider {
    pub fn new(config: ImageGenConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl GenerationProvider for HttpGenerationProvider {
    async fn submit(&self, request: &GenerationRequest) -> imagegen_client::Result<String> {
        ImageGenClient::new(self.config.clone()).submit(request).await
    }

    async fn poll(&self, external_job_id: &str) -> imagegen_client::Result<PollOutcome> {
        ImageGenClient::new(self.config.clone())
            .poll(external_job_id)
            .await
    }
}

// =============================================================================
// EngineDeps
// =============================================================================

pub struct EngineDeps {
    pub store: Arc<dyn JobStore>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub provider: Arc<dyn GenerationProvider>,
    pub runtime: Arc<dyn TaskRuntime>,
    /// Bounds concurrent provider calls across submit and poll.
    pub provider_limiter: Arc<Semaphore>,
    pub events: broadcast::Sender<JobEvent>,
    pub config: EngineConfig,
}

impl EngineDeps {
    pub fn new(
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        provider: Arc<dyn GenerationProvider>,
        runtime: Arc<dyn TaskRuntime>,
        config: EngineConfig,
    ) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        let provider_limiter = Arc::new(Semaphore::new(config.provider_limits.max_in_flight));

        Arc::new(Self {
            store,
            artifacts,
            provider,
            runtime,
            provider_limiter,
            events,
            config,
        })
    }

    /// Emit a lifecycle event. Best-effort; no subscribers is fine.
    pub fn emit(&self, event: JobEvent) {
        let _ = self.events.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }
}
