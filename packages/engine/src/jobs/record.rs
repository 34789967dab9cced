//! Job record model for external generation tracking.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use typed_builder::TypedBuilder;
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// What kind of artifact the job produces. Kinds are tracked uniformly;
/// they only affect artifact layout and record identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "generation_job_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    NarrationImage,
    CharacterImage,
    ChapterBatchImage,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::NarrationImage => "narration_image",
            JobKind::CharacterImage => "character_image",
            JobKind::ChapterBatchImage => "chapter_batch_image",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type, Default)]
#[sqlx(type_name = "generation_job_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, nothing submitted yet.
    #[default]
    Idle,
    /// Row claimed by a submitter; provider acceptance pending.
    Submitting,
    /// Accepted by the provider, not yet observed running.
    Pending,
    /// Observed in progress at the provider.
    Processing,
    Completed,
    Failed,
    /// Poll budget exhausted without a terminal provider answer.
    Timeout,
    Cancelled,
}

impl JobStatus {
    /// Statuses that block a new submission: a submission claim or a
    /// live poll chain.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            JobStatus::Submitting | JobStatus::Pending | JobStatus::Processing
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Timeout | JobStatus::Cancelled
        )
    }
}

// ============================================================================
// JobRecord
// ============================================================================

/// Durable record of one external generation job.
///
/// One record exists per `(owner_ref, kind)` pair; resubmission reuses
/// the row rather than inserting a sibling. The `version` column is an
/// optimistic lock bumped on every update.
#[derive(FromRow, Debug, Clone, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct JobRecord {
    #[builder(default = Uuid::new_v4())]
    pub id: Uuid,

    // Identity
    pub owner_ref: Uuid,
    pub kind: JobKind,

    // External handles
    #[builder(default, setter(strip_option))]
    pub external_job_id: Option<String>,
    #[builder(default, setter(strip_option))]
    pub runtime_task_id: Option<String>,

    // State
    #[builder(default)]
    pub status: JobStatus,
    #[builder(default = 0)]
    pub progress: i32,
    #[builder(default)]
    pub message: String,
    #[builder(default, setter(strip_option))]
    pub error: Option<String>,

    /// Ordered stored artifact paths. Non-empty exactly when Completed.
    #[builder(default)]
    pub artifacts: Vec<String>,

    // Timestamps
    #[builder(default, setter(strip_option))]
    pub started_at: Option<DateTime<Utc>>,
    #[builder(default, setter(strip_option))]
    pub completed_at: Option<DateTime<Utc>>,

    // Budgets
    #[builder(default = 0)]
    pub poll_attempts: i32,
    #[builder(default = 0)]
    pub transient_retry_attempts: i32,

    #[builder(default = 1)]
    pub version: i32,

    #[builder(default = Utc::now())]
    pub created_at: DateTime<Utc>,
    #[builder(default = Utc::now())]
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    /// Fresh idle record for an owner/kind pair.
    pub fn new(owner_ref: Uuid, kind: JobKind) -> Self {
        Self::builder().owner_ref(owner_ref).kind(kind).build()
    }

    pub fn is_active(&self) -> bool {
        self.status.is_active()
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Mark completed with the stored artifact paths.
    pub fn complete(&mut self, artifacts: Vec<String>) {
        self.status = JobStatus::Completed;
        self.artifacts = artifacts;
        self.progress = 100;
        self.message = "generation complete".to_string();
        self.error = None;
        self.completed_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        self.status = JobStatus::Failed;
        self.message = "generation failed".to_string();
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }

    pub fn time_out(&mut self, reason: impl Into<String>) {
        self.status = JobStatus::Timeout;
        self.message = "generation timed out".to_string();
        self.error = Some(reason.into());
        self.completed_at = Some(Utc::now());
    }

    /// Clear handles and counters for a fresh submission attempt.
    ///
    /// The only sanctioned way out of a terminal state.
    pub fn reset_for_resubmit(&mut self) {
        self.external_job_id = None;
        self.runtime_task_id = None;
        self.status = JobStatus::Idle;
        self.progress = 0;
        self.message = String::new();
        self.error = None;
        self.artifacts = Vec::new();
        self.started_at = None;
        self.completed_at = None;
        self.poll_attempts = 0;
        self.transient_retry_attempts = 0;
    }
}
