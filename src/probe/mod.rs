//! Black-box operational probes against a running pulsegate deployment.
//!
//! These are consumers of the HTTP contract, not part of the pipeline:
//! burn-in endpoint checks, a live rollout watch loop, and a scripted
//! incident rehearsal.

mod burnin;
mod rehearsal;
mod watch;

pub use burnin::*;
pub use rehearsal::*;
pub use watch::*;

use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {0}")]
    Network(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("report error: {0}")]
    Report(String),
}

/// Deployment a probe runs against.
#[derive(Debug, Clone)]
pub struct ProbeTarget {
    pub base_url: String,
    pub secret: Option<String>,
    pub timeout: Duration,
}

impl ProbeTarget {
    pub fn new(base_url: &str, secret: Option<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            secret,
            timeout,
        }
    }

    /// Read the target from environment variables.
    ///
    /// - `PULSEGATE_PROBE_BASE_URL`: deployment base URL (required)
    /// - `PULSEGATE_OPERATOR_SECRET`: operator secret for /internal checks
    /// - `PULSEGATE_PROBE_TIMEOUT_MS`: per-request timeout (default: 5000)
    pub fn from_env() -> Result<Self, ProbeError> {
        let base_url = std::env::var("PULSEGATE_PROBE_BASE_URL")
            .map_err(|_| ProbeError::Config("PULSEGATE_PROBE_BASE_URL is required".to_string()))?;
        let secret = std::env::var("PULSEGATE_OPERATOR_SECRET").ok();
        let timeout_ms = std::env::var("PULSEGATE_PROBE_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(5000u64);
        Ok(Self::new(
            &base_url,
            secret,
            Duration::from_millis(timeout_ms),
        ))
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

pub(crate) fn probe_client(timeout: Duration) -> Result<reqwest::Client, ProbeError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| ProbeError::Network(e.to_string()))
}

pub(crate) fn map_send_error(e: reqwest::Error, timeout: Duration) -> ProbeError {
    if e.is_timeout() {
        ProbeError::Timeout(timeout)
    } else {
        ProbeError::Network(e.to_string())
    }
}
