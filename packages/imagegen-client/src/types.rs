use serde::{Deserialize, Serialize};

use crate::error::ProviderError;

/// Input for an asynchronous image generation task.
#[derive(Debug, Clone, Serialize)]
pub struct GenerationRequest {
    pub prompt: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub reference_images_base64: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    pub image_count: u32,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            reference_images_base64: Vec::new(),
            style: None,
            image_count: 1,
        }
    }
}

/// Result of polling a generation task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// Accepted, still queued.
    Pending,
    /// Generation in progress.
    Running,
    /// Finished; artifacts decoded from `data.binary_data_base64`.
    Done { artifacts: Vec<Vec<u8>> },
    /// Provider reported failure.
    Failed { reason: String },
}

/// Poll response envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct PollResponse {
    pub status: String,
    #[serde(default)]
    pub data: Option<PollData>,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PollData {
    #[serde(default)]
    pub binary_data_base64: Vec<String>,
}

/// Extract the task id from a submit response.
///
/// The provider has been observed returning the id in three places
/// depending on deployment: `data.task_id`, top-level `task_id`, and
/// `data.id`. Each known location is tried in order; anything else is
/// a decode failure, never a guess.
pub fn extract_task_id(body: &serde_json::Value) -> Result<String, ProviderError> {
    let candidates = [
        body.pointer("/data/task_id"),
        body.get("task_id"),
        body.pointer("/data/id"),
    ];

    for candidate in candidates.into_iter().flatten() {
        if let Some(id) = candidate.as_str() {
            if !id.is_empty() {
                return Ok(id.to_string());
            }
        }
        if let Some(id) = candidate.as_i64() {
            return Ok(id.to_string());
        }
    }

    Err(ProviderError::Decode(format!(
        "no task id in submit response: {}",
        body
    )))
}
