//! External generation job tracking.
//!
//! Lifecycle: submit hands the prompt to the provider and persists the
//! returned handle; a chain of self-rescheduling poll units watches the
//! provider until a terminal state; the reconciliation scanner repairs
//! records whose chain was severed by a restart.

pub mod events;
pub mod poller;
pub mod record;
pub mod scanner;
pub mod service;
pub mod store;
pub mod submitter;
pub mod testing;

pub use events::JobEvent;
pub use poller::{PollStep, PollTaskPayload, PollUnitValue, TerminalSummary, POLL_TASK_TYPE};
pub use record::{JobKind, JobRecord, JobStatus};
pub use scanner::{scan, ScanStats};
pub use service::GenerationService;
pub use store::{JobStore, PgJobStore, StoreError};
pub use submitter::{SubmitError, SubmitRequest};
