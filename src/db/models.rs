//! Database model types.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Delivery outcome of one alert-check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    Sent,
    Failed,
    SkippedPass,
    SkippedDuplicate,
    SkippedConfig,
}

impl DispatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DispatchStatus::Sent => "sent",
            DispatchStatus::Failed => "failed",
            DispatchStatus::SkippedPass => "skipped_pass",
            DispatchStatus::SkippedDuplicate => "skipped_duplicate",
            DispatchStatus::SkippedConfig => "skipped_config",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sent" => Some(DispatchStatus::Sent),
            "failed" => Some(DispatchStatus::Failed),
            "skipped_pass" => Some(DispatchStatus::SkippedPass),
            "skipped_duplicate" => Some(DispatchStatus::SkippedDuplicate),
            "skipped_config" => Some(DispatchStatus::SkippedConfig),
            _ => None,
        }
    }
}

/// One persisted alert-check outcome. Created once per invocation, never
/// mutated; read back for dedup lookups and audit history.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchRecord {
    pub id: i64,
    pub created_at: DateTime<Utc>,
    pub fingerprint: String,
    pub delivery_status: DispatchStatus,
    pub summary_status: String,
    pub alert_count: i64,
    pub window_minutes: i64,
    pub display_mode: String,
    pub path_prefix: Option<String>,
    /// Serialized webhook payload, kept for audit even when not sent.
    pub payload: String,
    pub triggered_by: String,
    pub delivery_error: Option<String>,
}

/// Result of a retention cleanup pass.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RetentionOutcome {
    pub events_deleted: usize,
    pub dispatches_deleted: usize,
    pub events_cutoff: DateTime<Utc>,
    pub dispatches_cutoff: DateTime<Utc>,
}
