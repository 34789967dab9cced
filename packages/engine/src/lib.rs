//! Asynchronous generation-job engine.
//!
//! Tracks image generation delegated to an external asynchronous
//! provider: submit, persist the handle, poll through self-rescheduling
//! task units, store artifacts, and reconcile records against the task
//! runtime after interruptions.

pub mod artifacts;
pub mod config;
pub mod deps;
pub mod jobs;
pub mod runtime;
pub mod scheduler;

pub use config::EngineConfig;
pub use deps::{EngineDeps, GenerationProvider, HttpGenerationProvider};
pub use jobs::{GenerationService, JobKind, JobRecord, JobStatus, SubmitRequest};
pub use runtime::{InProcessRuntime, ManualRuntime, TaskRegistry, TaskRuntime};
