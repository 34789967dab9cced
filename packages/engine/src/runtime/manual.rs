//! Deterministic task runtime for tests.
//!
//! Nothing runs on its own. Scheduled units queue up with their
//! requested delays recorded, and the test drives execution one unit
//! at a time with `run_next`. This makes delay assertions and crash
//! simulations exact instead of timing-dependent.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::{RuntimeError, TaskContext, TaskOutcome, TaskRegistry, TaskRuntime, TaskSpec, UnitState};
use crate::deps::EngineDeps;

pub struct ManualRuntime {
    registry: Arc<TaskRegistry>,
    queue: Mutex<VecDeque<(String, TaskSpec)>>,
    units: RwLock<HashMap<String, UnitState>>,
    delays: Mutex<Vec<Duration>>,
    counter: AtomicU64,
}

impl ManualRuntime {
    pub fn new(registry: TaskRegistry) -> Self {
        Self {
            registry: Arc::new(registry),
            queue: Mutex::new(VecDeque::new()),
            units: RwLock::new(HashMap::new()),
            delays: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Every delay ever requested, in schedule order.
    pub fn scheduled_delays(&self) -> Vec<Duration> {
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Units scheduled but not yet run.
    pub fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Execute the oldest pending unit. Returns its task id, or `None`
    /// when the queue is empty. Handler failures are recorded in the
    /// unit outcome, not returned.
    pub async fn run_next(&self, deps: Arc<EngineDeps>) -> Result<Option<String>> {
        let next = self
            .queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let Some((task_id, task)) = next else {
            return Ok(None);
        };

        self.set_state(&task_id, UnitState::Running { progress: None });

        let ctx = TaskContext {
            task_id: task_id.clone(),
        };
        match self.registry.execute(&task, ctx, deps).await {
            Ok(value) => {
                self.set_state(
                    &task_id,
                    UnitState::Finished {
                        successful: true,
                        value,
                        error: None,
                    },
                );
            }
            Err(e) => {
                self.set_state(
                    &task_id,
                    UnitState::Finished {
                        successful: false,
                        value: None,
                        error: Some(e.to_string()),
                    },
                );
            }
        }

        Ok(Some(task_id))
    }

    /// Run pending units until the queue drains or `max` is reached.
    /// Returns how many units ran.
    pub async fn drain(&self, deps: Arc<EngineDeps>, max: usize) -> Result<usize> {
        let mut ran = 0;
        while ran < max {
            if self.run_next(deps.clone()).await?.is_none() {
                break;
            }
            ran += 1;
        }
        Ok(ran)
    }

    fn set_state(&self, task_id: &str, state: UnitState) {
        self.units
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(task_id.to_string(), state);
    }
}

#[async_trait]
impl TaskRuntime for ManualRuntime {
    async fn schedule(&self, task: TaskSpec, delay: Duration) -> Result<String, RuntimeError> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        let task_id = format!("task-{}", n);

        self.set_state(&task_id, UnitState::Scheduled);
        self.delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(delay);
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back((task_id.clone(), task));

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
        if let Some(state @ (UnitState::Scheduled | UnitState::Running { .. })) =
            units.get_mut(task_id)
        {
            *state = UnitState::Running {
                progress: Some((progress, message.to_string())),
            };
        }
    }
}
