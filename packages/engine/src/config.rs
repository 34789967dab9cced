//! Engine configuration.
//!
//! Every tunable lives in a config struct with production defaults.
//! Tests shrink the durations; nothing reads the clock settings from
//! more than one place.

use std::time::Duration;

/// Provider submission settings.
#[derive(Debug, Clone)]
pub struct SubmitterConfig {
    /// Total attempts before giving up on a transiently failing submit.
    pub max_attempts: u32,
    /// Linear backoff base between submit attempts (base * attempt).
    pub retry_backoff_base: Duration,
    /// Age after which an unfinished submission claim is treated as
    /// abandoned and can be taken over.
    pub claim_timeout: Duration,
}

impl Default for SubmitterConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_backoff_base: Duration::from_secs(30),
            claim_timeout: Duration::from_secs(300),
        }
    }
}

/// Poll-loop settings.
#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Delay before the first poll; providers rarely finish sooner.
    pub settle_delay: Duration,
    /// Steady-state delay between polls.
    pub poll_interval: Duration,
    /// Polls before the job is declared timed out.
    pub max_poll_attempts: i32,
    /// Consecutive transient errors tolerated before failing.
    pub transient_retry_budget: i32,
    /// Linear backoff base for transient retries (base * attempt).
    pub transient_backoff_base: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            settle_delay: Duration::from_secs(30),
            poll_interval: Duration::from_secs(60),
            max_poll_attempts: 30,
            transient_retry_budget: 5,
            transient_backoff_base: Duration::from_secs(30),
        }
    }
}

/// Reconciliation sweep settings.
#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Only records started within this window are reconciled.
    pub lookback: Duration,
    /// Cron expression for the periodic sweep.
    pub cron: String,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            lookback: Duration::from_secs(24 * 60 * 60),
            cron: "0 */10 * * * *".to_string(),
        }
    }
}

/// Caps on concurrent provider traffic.
#[derive(Debug, Clone)]
pub struct ProviderLimits {
    /// Provider calls allowed in flight at once.
    pub max_in_flight: usize,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self { max_in_flight: 8 }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub submitter: SubmitterConfig,
    pub poller: PollerConfig,
    pub scanner: ScannerConfig,
    pub provider_limits: ProviderLimits,
}
