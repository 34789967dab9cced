//! Generation worker.
//!
//! Wires Postgres, the filesystem artifact store, the provider client,
//! the in-process task runtime, and the reconciliation cron together,
//! then runs until ctrl-c.

use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::PgPool;
use tracing_subscriber::EnvFilter;

use engine_core::artifacts::FsArtifactStore;
use engine_core::config::EngineConfig;
use engine_core::deps::{EngineDeps, HttpGenerationProvider};
use engine_core::jobs::{poller, PgJobStore};
use engine_core::runtime::{InProcessRuntime, TaskRegistry, TaskRuntime};
use engine_core::scheduler;
use imagegen_client::ImageGenConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let database_url =
        std::env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let pool = PgPool::connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let provider_config = ImageGenConfig {
        base_url: std::env::var("IMAGEGEN_BASE_URL")
            .context("IMAGEGEN_BASE_URL must be set")?,
        api_key: std::env::var("IMAGEGEN_API_KEY").context("IMAGEGEN_API_KEY must be set")?,
    };
    let artifact_root =
        std::env::var("ARTIFACT_ROOT").unwrap_or_else(|_| "artifacts".to_string());

    let mut registry = TaskRegistry::new();
    poller::register(&mut registry);

    let runtime = Arc::new(InProcessRuntime::new(registry));
    let deps = EngineDeps::new(
        Arc::new(PgJobStore::new(pool.clone())),
        Arc::new(FsArtifactStore::new(artifact_root)),
        Arc::new(HttpGenerationProvider::new(provider_config)),
        runtime.clone() as Arc<dyn TaskRuntime>,
        EngineConfig::default(),
    );
    runtime.bind_deps(deps.clone());

    let mut cron = scheduler::start_scheduler(deps.clone()).await?;

    tracing::info!("Generation worker running");
    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");

    runtime.shutdown();
    cron.shutdown().await?;

    Ok(())
}
