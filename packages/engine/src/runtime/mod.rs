//! Task runtime abstraction.
//!
//! The engine never sleeps between polls; it hands each delayed poll
//! unit to a `TaskRuntime` and forgets about it. The runtime retains
//! the outcome of every finished unit so the reconciliation scanner
//! can later answer "what did that unit conclude?" even if the record
//! write was lost.

mod in_process;
mod manual;

pub use in_process::InProcessRuntime;
pub use manual::ManualRuntime;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::deps::EngineDeps;

/// A unit of deferred work: a registered task type plus its payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskSpec {
    pub task_type: String,
    pub payload: serde_json::Value,
}

impl TaskSpec {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            task_type: task_type.into(),
            payload,
        }
    }
}

/// What the runtime knows about a scheduled unit.
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    /// The unit finished (successfully or not).
    pub ready: bool,
    /// Only meaningful when `ready`.
    pub successful: bool,
    /// Value returned by the handler, if any.
    pub value: Option<serde_json::Value>,
    /// Handler error, when `ready && !successful`.
    pub error: Option<String>,
    /// In-flight progress published by the handler, when not ready.
    pub progress: Option<(i32, String)>,
}

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("unknown task handle: {0}")]
    UnknownTask(String),

    #[error("no handler registered for task type: {0}")]
    UnknownTaskType(String),

    #[error("task runtime unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait TaskRuntime: Send + Sync {
    /// Schedule a unit to run after `delay`. Returns the runtime task id.
    async fn schedule(&self, task: TaskSpec, delay: Duration) -> Result<String, RuntimeError>;

    /// Look up a previously scheduled unit by handle.
    async fn lookup(&self, task_id: &str) -> Result<TaskOutcome, RuntimeError>;

    /// Publish in-flight progress for a running unit. Best-effort.
    fn report_progress(&self, task_id: &str, progress: i32, message: &str);
}

/// Handed to handlers so they can identify their own unit.
pub struct TaskContext {
    pub task_id: String,
}

// ============================================================================
// Registry
// ============================================================================

/// Type alias for the boxed async handler.
///
/// Handlers receive the deserialized payload, their task context, and
/// the engine dependencies; they may return a value that the runtime
/// records as the unit's outcome.
type BoxedHandler = Box<
    dyn Fn(
            serde_json::Value,
            TaskContext,
            Arc<EngineDeps>,
        ) -> Pin<Box<dyn Future<Output = Result<Option<serde_json::Value>>> + Send>>
        + Send
        + Sync,
>;

/// Maps task type strings to handlers.
///
/// Each concern registers its task types at startup; the runtime uses
/// the registry to deserialize and execute units in one step.
#[derive(Default)]
pub struct TaskRegistry {
    registrations: HashMap<&'static str, BoxedHandler>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            registrations: HashMap::new(),
        }
    }

    pub fn register<P, F, Fut>(&mut self, task_type: &'static str, handler: F)
    where
        P: DeserializeOwned + Send + 'static,
        F: Fn(P, TaskContext, Arc<EngineDeps>) -> Fut + Send + Sync + Clone + 'static,
        Fut: Future<Output = Result<Option<serde_json::Value>>> + Send + 'static,
    {
        let boxed: BoxedHandler = Box::new(move |value, ctx, deps| {
            let handler = handler.clone();
            Box::pin(async move {
                let payload: P = serde_json::from_value(value)
                    .map_err(|e| anyhow!("failed to deserialize {}: {}", task_type, e))?;
                handler(payload, ctx, deps).await
            })
        });

        self.registrations.insert(task_type, boxed);
    }

    pub async fn execute(
        &self,
        task: &TaskSpec,
        ctx: TaskContext,
        deps: Arc<EngineDeps>,
    ) -> Result<Option<serde_json::Value>> {
        let handler = self
            .registrations
            .get(task.task_type.as_str())
            .ok_or_else(|| anyhow!("unknown task type: {}", task.task_type))?;

        handler(task.payload.clone(), ctx, deps).await
    }

    pub fn is_registered(&self, task_type: &str) -> bool {
        self.registrations.contains_key(task_type)
    }
}

// ============================================================================
// Shared unit state
// ============================================================================

/// Execution state of one scheduled unit, shared by runtime impls.
#[derive(Debug, Clone)]
pub(crate) enum UnitState {
    Scheduled,
    Running {
        progress: Option<(i32, String)>,
    },
    Finished {
        successful: bool,
        value: Option<serde_json::Value>,
        error: Option<String>,
    },
}

impl UnitState {
    pub(crate) fn outcome(&self) -> TaskOutcome {
        match self {
            UnitState::Scheduled => TaskOutcome::default(),
            UnitState::Running { progress } => TaskOutcome {
                progress: progress.clone(),
                ..TaskOutcome::default()
            },
            UnitState::Finished {
                successful,
                value,
                error,
            } => TaskOutcome {
                ready: true,
                successful: *successful,
                value: value.clone(),
                error: error.clone(),
                progress: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Serialize, Deserialize)]
    struct TestPayload {
        name: String,
    }

    #[test]
    fn register_and_check() {
        let mut registry = TaskRegistry::new();
        registry.register::<TestPayload, _, _>("test_task", |_payload, _ctx, _deps| async move {
            Ok(None)
        });

        assert!(registry.is_registered("test_task"));
        assert!(!registry.is_registered("unknown_task"));
    }

    #[test]
    fn scheduled_outcome_is_not_ready() {
        let outcome = UnitState::Scheduled.outcome();
        assert!(!outcome.ready);
        assert!(outcome.progress.is_none());
    }

    #[test]
    fn running_outcome_carries_progress() {
        let state = UnitState::Running {
            progress: Some((42, "working".to_string())),
        };
        let outcome = state.outcome();
        assert!(!outcome.ready);
        assert_eq!(outcome.progress, Some((42, "working".to_string())));
    }

    #[test]
    fn finished_outcome_is_ready() {
        let state = UnitState::Finished {
            successful: true,
            value: Some(serde_json::json!({"ok": true})),
            error: None,
        };
        let outcome = state.outcome();
        assert!(outcome.ready);
        assert!(outcome.successful);
        assert!(outcome.value.is_some());
    }
}
