//! Pure REST client for the asynchronous image generation provider.
//!
//! A minimal client for the provider's task API. Supports submitting
//! generation tasks and polling them; it carries no job-tracking logic.
//! Clients are cheap to build and meant to be short-lived values.
//!
//! # Example
//!
//! ```rust,ignore
//! use imagegen_client::{GenerationRequest, ImageGenClient, ImageGenConfig};
//!
//! let client = ImageGenClient::new(ImageGenConfig {
//!     base_url: "https://api.example.com".into(),
//!     api_key: "key".into(),
//! });
//!
//! let task_id = client.submit(&GenerationRequest::new("a lighthouse at dusk")).await?;
//! let outcome = client.poll(&task_id).await?;
//! ```

pub mod error;
pub mod types;

pub use error::{ProviderError, Result};
pub use types::{extract_task_id, GenerationRequest, PollOutcome, PollResponse};

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Connection settings for one provider deployment.
#[derive(Debug, Clone)]
pub struct ImageGenConfig {
    pub base_url: String,
    pub api_key: String,
}

pub struct ImageGenClient {
    client: reqwest::Client,
    config: ImageGenConfig,
}

impl ImageGenClient {
    pub fn new(config: ImageGenConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Submit a generation task. Returns the provider's task id.
    pub async fn submit(&self, request: &GenerationRequest) -> Result<String> {
        let url = format!("{}/api/v1/images/generations/tasks", self.config.base_url);
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let body: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;
        let task_id = extract_task_id(&body)?;

        tracing::debug!(task_id = %task_id, "Generation task submitted");
        Ok(task_id)
    }

    /// Check a generation task. One round trip, no waiting.
    pub async fn poll(&self, task_id: &str) -> Result<PollOutcome> {
        let url = format!(
            "{}/api/v1/images/generations/tasks/{}",
            self.config.base_url, task_id
        );
        let resp = self
            .client
            .get(&url)
            .bearer_auth(&self.config.api_key)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), body));
        }

        let body: PollResponse = resp
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        map_poll_response(body)
    }
}

/// Translate the provider's status strings into a [`PollOutcome`].
///
/// Unknown statuses are a decode error rather than a silent retry.
fn map_poll_response(body: PollResponse) -> Result<PollOutcome> {
    match body.status.as_str() {
        "pending" | "queued" | "in_queue" => Ok(PollOutcome::Pending),
        "running" | "generating" | "processing" => Ok(PollOutcome::Running),
        "done" | "succeeded" => {
            let encoded = body.data.unwrap_or_default().binary_data_base64;
            let mut artifacts = Vec::with_capacity(encoded.len());
            for item in &encoded {
                let bytes = BASE64
                    .decode(item)
                    .map_err(|e| ProviderError::Decode(format!("bad artifact payload: {}", e)))?;
                artifacts.push(bytes);
            }
            Ok(PollOutcome::Done { artifacts })
        }
        "failed" | "error" => Ok(PollOutcome::Failed {
            reason: body
                .message
                .unwrap_or_else(|| "provider reported failure".to_string()),
        }),
        other => Err(ProviderError::Decode(format!(
            "unknown task status: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn poll_body(json: serde_json::Value) -> PollResponse {
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn queued_maps_to_pending() {
        let outcome = map_poll_response(poll_body(serde_json::json!({"status": "in_queue"})));
        assert_eq!(outcome.unwrap(), PollOutcome::Pending);
    }

    #[test]
    fn generating_maps_to_running() {
        let outcome = map_poll_response(poll_body(serde_json::json!({"status": "generating"})));
        assert_eq!(outcome.unwrap(), PollOutcome::Running);
    }

    #[test]
    fn done_decodes_artifacts() {
        let payload = BASE64.encode(b"png-bytes");
        let outcome = map_poll_response(poll_body(serde_json::json!({
            "status": "done",
            "data": {"binary_data_base64": [payload]}
        })))
        .unwrap();
        match outcome {
            PollOutcome::Done { artifacts } => {
                assert_eq!(artifacts, vec![b"png-bytes".to_vec()]);
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[test]
    fn done_with_bad_base64_fails_closed() {
        let outcome = map_poll_response(poll_body(serde_json::json!({
            "status": "done",
            "data": {"binary_data_base64": ["%%not-base64%%"]}
        })));
        assert!(matches!(outcome, Err(ProviderError::Decode(_))));
    }

    #[test]
    fn failed_carries_provider_message() {
        let outcome = map_poll_response(poll_body(serde_json::json!({
            "status": "failed",
            "message": "content policy"
        })))
        .unwrap();
        assert_eq!(
            outcome,
            PollOutcome::Failed {
                reason: "content policy".to_string()
            }
        );
    }

    #[test]
    fn unknown_status_is_decode_error() {
        let outcome = map_poll_response(poll_body(serde_json::json!({"status": "paused"})));
        assert!(matches!(outcome, Err(ProviderError::Decode(_))));
    }
}
