//! Alert dispatch: fingerprinting, cooldown dedup, webhook delivery.
//!
//! One `run` call is one alert-check cycle. Every branch persists exactly
//! one dispatch record; that audit trail is the sole dedup memory and it
//! survives restarts. The dedup check is read-then-write: two concurrent
//! cycles with the same fingerprint can both pass the lookup before either
//! inserts, so a duplicate notification is possible. Accepted — a stronger
//! design would upsert against a unique (fingerprint, sent) constraint.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::time::Duration;
use thiserror::Error;

use crate::config::{AlertConfig, SloThresholds};
use crate::db::{DispatchRecord, DispatchStatus, Store};
use crate::telemetry::ephemeral::EphemeralStore;
use crate::telemetry::summary::{SummarizeOptions, SummaryStatus, TelemetrySummary};
use crate::telemetry::{load_summary, DurableEvents, SummarySource, TelemetrySource};

/// Webhook delivery error types.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("webhook timed out after {0}ms")]
    Timeout(u64),
    #[error("webhook returned status {0}")]
    Status(u16),
    #[error("network error: {0}")]
    Network(String),
}

/// Coarse outcome of one alert-check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Sent,
    Skipped,
    Error,
}

/// Echoed by the alert-check endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertRunResult {
    pub ok: bool,
    pub status: RunStatus,
    pub reason: String,
    pub fingerprint: String,
    pub alert_count: usize,
    pub summary_status: SummaryStatus,
    pub source: SummarySource,
}

/// Retention windows applied at the end of each cycle.
#[derive(Debug, Clone, Copy)]
pub struct RetentionWindows {
    pub event_days: i64,
    pub dispatch_days: i64,
}

pub struct AlertDispatcher {
    config: AlertConfig,
    retention: RetentionWindows,
    client: reqwest::Client,
}

impl AlertDispatcher {
    pub fn new(config: AlertConfig, retention: RetentionWindows) -> Self {
        Self {
            config,
            retention,
            client: reqwest::Client::new(),
        }
    }

    /// Run one alert-check cycle, then the retention sweep.
    #[allow(clippy::too_many_arguments)]
    pub async fn run(
        &self,
        store: &Store,
        durable: &DurableEvents,
        ephemeral: &EphemeralStore,
        thresholds: &SloThresholds,
        opts: &SummarizeOptions,
        force: bool,
        actor: &str,
        now: DateTime<Utc>,
    ) -> AlertRunResult {
        let result = self
            .run_cycle(store, durable, ephemeral, thresholds, opts, force, actor, now)
            .await;

        match store.cleanup_retention(now, self.retention.event_days, self.retention.dispatch_days)
        {
            Ok(outcome) => tracing::debug!(
                "Retention sweep removed {} events, {} dispatches",
                outcome.events_deleted,
                outcome.dispatches_deleted
            ),
            Err(e) => tracing::warn!("Retention sweep failed: {}", e),
        }

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_cycle(
        &self,
        store: &Store,
        durable: &DurableEvents,
        ephemeral: &EphemeralStore,
        thresholds: &SloThresholds,
        opts: &SummarizeOptions,
        force: bool,
        actor: &str,
        now: DateTime<Utc>,
    ) -> AlertRunResult {
        let sources: [&dyn TelemetrySource; 2] = [durable, ephemeral];
        let (summary, source) = load_summary(&sources, opts, thresholds, now);
        let fp = fingerprint(&summary);
        let payload = build_payload(&summary, source);
        let payload_text =
            serde_json::to_string(&payload).unwrap_or_else(|_| "{}".to_string());

        let record = |status: DispatchStatus, error: Option<String>| DispatchRecord {
            id: 0,
            created_at: now,
            fingerprint: fp.clone(),
            delivery_status: status,
            summary_status: summary.status.as_str().to_string(),
            alert_count: summary.alerts.len() as i64,
            window_minutes: summary.window_minutes,
            display_mode: summary.display_mode.as_str().to_string(),
            path_prefix: summary.path_prefix.clone(),
            payload: payload_text.clone(),
            triggered_by: actor.to_string(),
            delivery_error: error,
        };
        let result = |ok, status, reason: &str| AlertRunResult {
            ok,
            status,
            reason: reason.to_string(),
            fingerprint: fp.clone(),
            alert_count: summary.alerts.len(),
            summary_status: summary.status,
            source,
        };

        if summary.status == SummaryStatus::Pass || summary.alerts.is_empty() {
            persist(store, record(DispatchStatus::SkippedPass, None));
            return result(true, RunStatus::Skipped, "status_pass");
        }

        let Some(webhook_url) = self.config.webhook_url.as_deref() else {
            // An active alert with no delivery channel is an operational
            // failure, not a quiet skip.
            persist(store, record(DispatchStatus::SkippedConfig, None));
            return result(false, RunStatus::Error, "webhook_not_configured");
        };

        if !force {
            let since = now - ChronoDuration::minutes(self.config.cooldown_minutes);
            match store.find_sent_dispatch(&fp, since) {
                Ok(Some(_)) => {
                    persist(store, record(DispatchStatus::SkippedDuplicate, None));
                    return result(true, RunStatus::Skipped, "duplicate_within_cooldown");
                }
                Ok(None) => {}
                Err(e) => {
                    // A broken dedup lookup must not silence alerting.
                    tracing::warn!("Dedup lookup failed, sending anyway: {}", e);
                }
            }
        }

        match self.deliver(webhook_url, &payload).await {
            Ok(()) => {
                persist(store, record(DispatchStatus::Sent, None));
                tracing::info!(
                    "Alert webhook delivered: {} alert(s), status {}",
                    summary.alerts.len(),
                    summary.status.as_str()
                );
                result(true, RunStatus::Sent, "delivered")
            }
            Err(e) => {
                persist(store, record(DispatchStatus::Failed, Some(e.to_string())));
                tracing::error!("Alert webhook delivery failed: {}", e);
                result(false, RunStatus::Error, "delivery_failed")
            }
        }
    }

    async fn deliver(
        &self,
        url: &str,
        payload: &serde_json::Value,
    ) -> Result<(), DispatchError> {
        let timeout_ms = self.config.webhook_timeout_ms;
        let response = self
            .client
            .post(url)
            .timeout(Duration::from_millis(timeout_ms))
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DispatchError::Timeout(timeout_ms)
                } else {
                    DispatchError::Network(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(DispatchError::Status(response.status().as_u16()));
        }
        Ok(())
    }
}

fn persist(store: &Store, record: DispatchRecord) {
    if let Err(e) = store.insert_dispatch(&record) {
        tracing::error!("Failed to persist dispatch record: {}", e);
    }
}

/// Stable fingerprint over window, filters, status and the alert set.
///
/// Alerts are sorted by key and numeric fields rounded to 4 decimals so
/// evaluator ordering and float jitter cannot change the hash.
pub fn fingerprint(summary: &TelemetrySummary) -> String {
    let mut alerts: Vec<_> = summary.alerts.iter().collect();
    alerts.sort_by(|a, b| a.key.cmp(&b.key));

    let canonical = json!({
        "windowMinutes": summary.window_minutes,
        "displayMode": summary.display_mode,
        "pathPrefix": summary.path_prefix,
        "status": summary.status,
        "alerts": alerts
            .iter()
            .map(|a| {
                json!({
                    "key": a.key,
                    "severity": a.severity,
                    "current": round4(a.current),
                    "target": round4(a.target),
                    "comparator": a.comparator,
                })
            })
            .collect::<Vec<_>>(),
    });

    let mut hasher = Sha256::new();
    hasher.update(canonical.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Webhook body: a human-readable line plus the structured fields.
fn build_payload(summary: &TelemetrySummary, source: SummarySource) -> serde_json::Value {
    let mut lines: Vec<String> = summary
        .alerts
        .iter()
        .map(|a| {
            let sign = match a.comparator {
                crate::telemetry::alerts::Comparator::Lte => "<=",
                crate::telemetry::alerts::Comparator::Gte => ">=",
            };
            format!(
                "{}: {:.4} (target {} {:.4})",
                a.label, a.current, sign, a.target
            )
        })
        .collect();
    lines.sort();

    let text = format!(
        "[pulsegate] SLO {} - {} alert(s) over last {}m ({}){}{}",
        summary.status.as_str().to_uppercase(),
        summary.alerts.len(),
        summary.window_minutes,
        summary.display_mode.as_str(),
        if lines.is_empty() { "" } else { "\n" },
        lines.join("\n"),
    );

    json!({
        "text": text,
        "status": summary.status,
        "windowMinutes": summary.window_minutes,
        "displayMode": summary.display_mode,
        "pathPrefix": summary.path_prefix,
        "generatedAt": summary.generated_at.to_rfc3339(),
        "source": source,
        "alerts": summary.alerts,
        "totals": summary.totals,
    })
}
