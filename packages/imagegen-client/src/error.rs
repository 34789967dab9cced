//! Error types for the image generation client.

use thiserror::Error;

/// Result type for provider operations.
pub type Result<T> = std::result::Result<T, ProviderError>;

/// Provider errors, tagged by retry semantics.
///
/// Callers branch on the tag, not on message contents: `Transient`
/// is worth retrying with backoff, everything else is final.
#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    /// Transport failure, rate limit (429), or provider-side fault (5xx).
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Rejected request (other 4xx): auth, validation, bad input.
    #[error("permanent provider error: {0}")]
    Permanent(String),

    /// Response did not match any known shape. Fails closed.
    #[error("undecodable provider response: {0}")]
    Decode(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }

    /// Map an HTTP error status to the right tag.
    pub(crate) fn from_status(status: u16, body: String) -> Self {
        if status == 429 || status >= 500 {
            ProviderError::Transient(format!("HTTP {}: {}", status, body))
        } else {
            ProviderError::Permanent(format!("HTTP {}: {}", status, body))
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        // Connection failures and timeouts are retryable by nature.
        ProviderError::Transient(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_is_transient() {
        assert!(ProviderError::from_status(429, "slow down".into()).is_transient());
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(ProviderError::from_status(500, "".into()).is_transient());
        assert!(ProviderError::from_status(503, "".into()).is_transient());
    }

    #[test]
    fn client_errors_are_permanent() {
        assert!(!ProviderError::from_status(400, "bad prompt".into()).is_transient());
        assert!(!ProviderError::from_status(401, "".into()).is_transient());
        assert!(!ProviderError::from_status(404, "".into()).is_transient());
    }
}
