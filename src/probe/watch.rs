//! Live rollout watch: polls the operator status endpoint on an interval
//! and aborts after consecutive failures.

use super::{probe_client, ProbeError, ProbeTarget};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub interval: Duration,
    pub max_samples: u32,
    pub max_consecutive_failures: u32,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            max_samples: 20,
            max_consecutive_failures: 3,
        }
    }
}

impl WatchConfig {
    /// Overrides: `PULSEGATE_WATCH_INTERVAL_SECS`, `PULSEGATE_WATCH_SAMPLES`,
    /// `PULSEGATE_WATCH_MAX_FAILURES`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Some(secs) = env_u64("PULSEGATE_WATCH_INTERVAL_SECS") {
            cfg.interval = Duration::from_secs(secs.max(1));
        }
        if let Some(samples) = env_u64("PULSEGATE_WATCH_SAMPLES") {
            cfg.max_samples = samples.clamp(1, 10_000) as u32;
        }
        if let Some(failures) = env_u64("PULSEGATE_WATCH_MAX_FAILURES") {
            cfg.max_consecutive_failures = failures.clamp(1, 100) as u32;
        }
        cfg
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchSample {
    pub at: DateTime<Utc>,
    pub ok: bool,
    pub summary_status: Option<String>,
    pub alert_count: Option<u64>,
    pub detail: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchOutcome {
    pub aborted: bool,
    pub samples: Vec<WatchSample>,
}

/// Poll rollout-status until the sample budget is spent or failures
/// accumulate past the abort threshold.
pub async fn run_watch(
    target: &ProbeTarget,
    cfg: &WatchConfig,
) -> Result<WatchOutcome, ProbeError> {
    let secret = target
        .secret
        .as_deref()
        .ok_or_else(|| ProbeError::Config("watch requires PULSEGATE_OPERATOR_SECRET".to_string()))?;
    let http = probe_client(target.timeout)?;

    let mut samples = Vec::new();
    let mut consecutive_failures = 0u32;

    for i in 0..cfg.max_samples {
        if i > 0 {
            // Jitter keeps parallel watchers from aligning on the endpoint.
            let jitter = rand::random::<u64>() % 250;
            tokio::time::sleep(cfg.interval + Duration::from_millis(jitter)).await;
        }

        let sample = fetch_sample(&http, target, secret).await;
        if sample.ok {
            consecutive_failures = 0;
            tracing::info!(
                "Watch sample {}: status={} alerts={}",
                i + 1,
                sample.summary_status.as_deref().unwrap_or("?"),
                sample.alert_count.unwrap_or(0)
            );
        } else {
            consecutive_failures += 1;
            tracing::warn!(
                "Watch sample {} failed ({} consecutive): {}",
                i + 1,
                consecutive_failures,
                sample.detail.as_deref().unwrap_or("unknown")
            );
        }
        samples.push(sample);

        if consecutive_failures >= cfg.max_consecutive_failures {
            tracing::error!(
                "Watch aborting after {} consecutive failures",
                consecutive_failures
            );
            return Ok(WatchOutcome {
                aborted: true,
                samples,
            });
        }
    }

    Ok(WatchOutcome {
        aborted: false,
        samples,
    })
}

async fn fetch_sample(
    http: &reqwest::Client,
    target: &ProbeTarget,
    secret: &str,
) -> WatchSample {
    let url = target.url("/internal/rollout-status");
    let at = Utc::now();

    let response = match http.get(&url).bearer_auth(secret).send().await {
        Ok(r) => r,
        Err(e) => {
            return WatchSample {
                at,
                ok: false,
                summary_status: None,
                alert_count: None,
                detail: Some(e.to_string()),
            };
        }
    };

    if !response.status().is_success() {
        return WatchSample {
            at,
            ok: false,
            summary_status: None,
            alert_count: None,
            detail: Some(format!("unexpected status {}", response.status().as_u16())),
        };
    }

    match response.json::<serde_json::Value>().await {
        Ok(body) => WatchSample {
            at,
            ok: true,
            summary_status: body
                .pointer("/summary/status")
                .and_then(|v| v.as_str())
                .map(String::from),
            alert_count: body
                .pointer("/summary/alerts")
                .and_then(|v| v.as_array())
                .map(|a| a.len() as u64),
            detail: None,
        },
        Err(e) => WatchSample {
            at,
            ok: false,
            summary_status: None,
            alert_count: None,
            detail: Some(format!("unparseable body: {}", e)),
        },
    }
}
