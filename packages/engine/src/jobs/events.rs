use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::record::JobKind;

/// Job lifecycle events.
///
/// Facts about the lifecycle, not commands. Broadcast best-effort to
/// any observer that subscribed; lagging receivers miss events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// A provider submission was accepted.
    Submitted {
        job_id: Uuid,
        owner_ref: Uuid,
        kind: JobKind,
        external_job_id: String,
    },

    /// A poll unit was handed to the task runtime.
    PollScheduled {
        job_id: Uuid,
        kind: JobKind,
        runtime_task_id: String,
        delay_ms: u64,
    },

    /// Artifacts stored, record completed.
    Completed {
        job_id: Uuid,
        kind: JobKind,
        artifact_count: usize,
    },

    /// Provider or persistence failure ended the job.
    Failed {
        job_id: Uuid,
        kind: JobKind,
        error: String,
    },

    /// Poll budget exhausted without a terminal provider answer.
    TimedOut {
        job_id: Uuid,
        kind: JobKind,
        poll_attempts: i32,
    },

    /// Cancellation requested; takes effect at the next poll.
    Cancelled { job_id: Uuid, kind: JobKind },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_submitted_serializes() {
        let event = JobEvent::Submitted {
            job_id: Uuid::new_v4(),
            owner_ref: Uuid::new_v4(),
            kind: JobKind::NarrationImage,
            external_job_id: "prov-1".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("Submitted"));
        assert!(json.contains("prov-1"));
        assert!(json.contains("narration_image"));
    }

    #[test]
    fn event_poll_scheduled_serializes() {
        let event = JobEvent::PollScheduled {
            job_id: Uuid::new_v4(),
            kind: JobKind::CharacterImage,
            runtime_task_id: "task-7".to_string(),
            delay_ms: 30_000,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("PollScheduled"));
        assert!(json.contains("task-7"));
        assert!(json.contains("30000"));
    }

    #[test]
    fn event_failed_serializes() {
        let event = JobEvent::Failed {
            job_id: Uuid::new_v4(),
            kind: JobKind::NarrationImage,
            error: "provider said no".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("Failed"));
        assert!(json.contains("provider said no"));
    }

    #[test]
    fn events_roundtrip_serialize() {
        let events = vec![
            JobEvent::Submitted {
                job_id: Uuid::new_v4(),
                owner_ref: Uuid::new_v4(),
                kind: JobKind::ChapterBatchImage,
                external_job_id: "p".to_string(),
            },
            JobEvent::Completed {
                job_id: Uuid::new_v4(),
                kind: JobKind::NarrationImage,
                artifact_count: 3,
            },
            JobEvent::TimedOut {
                job_id: Uuid::new_v4(),
                kind: JobKind::NarrationImage,
                poll_attempts: 31,
            },
            JobEvent::Cancelled {
                job_id: Uuid::new_v4(),
                kind: JobKind::CharacterImage,
            },
        ];

        for event in events {
            let json = serde_json::to_string(&event).unwrap();
            let _: JobEvent = serde_json::from_str(&json).unwrap();
        }
    }
}
