//! In-process task runtime backed by tokio.
//!
//! Scheduled units sleep on the tokio timer, then run their registered
//! handler. Outcomes are retained in memory for the lifetime of the
//! process; a restart loses them, which is exactly the situation the
//! reconciliation scanner exists to repair.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{RuntimeError, TaskContext, TaskOutcome, TaskRegistry, TaskRuntime, TaskSpec, UnitState};
use crate::deps::EngineDeps;

pub struct InProcessRuntime {
    registry: Arc<TaskRegistry>,
    units: Arc<RwLock<HashMap<String, UnitState>>>,
    // Bound after construction; the deps container holds this runtime too.
    deps: Arc<OnceLock<Arc<EngineDeps>>>,
    shutdown: CancellationToken,
}

impl InProcessRuntime {
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            units: Arc::new(RwLock::new(HashMap::new())),
            deps: Arc::new(OnceLock::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Wire in the dependency container. Must happen before the first
    /// scheduled unit fires.
    pub fn bind_deps(&self, deps: Arc<EngineDeps>) {
        let _ = self.deps.set(deps);
    }

    /// Stop executing scheduled units. Pending sleeps are abandoned.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    fn set_state(units: &RwLock<HashMap<String, UnitState>>, task_id: &str, state: UnitState) {
        units
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.to_string(), state);
    }
}

#[async_trait]
impl TaskRuntime for InProcessRuntime {
    async fn schedule(&self, task: TaskSpec, delay: Duration) -> Result<String, RuntimeError> {
        let task_id = format!("task-{}", Uuid::new_v4());
        Self::set_state(&self.units, &task_id, UnitState::Scheduled);

        let registry = self.registry.clone();
        let units = self.units.clone();
        let deps_cell = self.deps.clone();
        let token = self.shutdown.clone();
        let id = task_id.clone();

        tokio::spawn(async move {
            tokio::select! {
                _ = token.cancelled() => {
                    tracing::debug!(task_id = %id, "Runtime shut down before unit fired");
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }

            let Some(deps) = deps_cell.get().cloned() else {
                Self::set_state(
                    &units,
                    &id,
                    UnitState::Finished {
                        successful: false,
                        value: None,
                        error: Some("runtime has no dependencies bound".to_string()),
                    },
                );
                return;
            };

            Self::set_state(&units, &id, UnitState::Running { progress: None });

            let ctx = TaskContext {
                task_id: id.clone(),
            };
            match registry.execute(&task, ctx, deps).await {
                Ok(value) => {
                    Self::set_state(
                        &units,
                        &id,
                        UnitState::Finished {
                            successful: true,
                            value,
                            error: None,
                        },
                    );
                }
                Err(e) => {
                    tracing::error!(task_id = %id, task_type = %task.task_type, error = %e, "Task unit failed");
                    Self::set_state(
                        &units,
                        &id,
                        UnitState::Finished {
                            successful: false,
                            value: None,
                            error: Some(e.to_string()),
                        },
                    );
                }
            }
        });

        Ok(task_id)
    }

    async fn lookup(&self, task_id: &str) -> Result<TaskOutcome, RuntimeError> {
        self.units
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(task_id)
            .map(UnitState::outcome)
            .ok_or_else(|| RuntimeError::UnknownTask(task_id.to_string()))
    }

    fn report_progress(&self, task_id: &str, progress: i32, message: &str) {
        let mut units = self.units.write().unwrap_or_else(|e| e.into_inner());
        match units.get_mut(task_id) {
            Some(state @ (UnitState::Scheduled | UnitState::Running { .. })) => {
                *state = UnitState::Running {
                    progress: Some((progress, message.to_string())),
                };
            }
            _ => {}
        }
    }
}
