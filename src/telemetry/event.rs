//! Telemetry event types and normalization.
//!
//! `normalize` is a pure function; both the in-process buffer and the
//! durable store receive its output, so the two code paths share a single
//! normalization contract.

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Event names are lower-cased and truncated to this length.
pub const MAX_NAME_LEN: usize = 64;
/// Paths are truncated to this length after slash normalization.
pub const MAX_PATH_LEN: usize = 180;
pub const MAX_META_KEY_LEN: usize = 48;
pub const MAX_META_STRING_LEN: usize = 160;

/// Events older than this at normalization time are dropped.
pub const MAX_EVENT_AGE_MS: i64 = 24 * 60 * 60 * 1000;
/// Allowance for client clock skew into the future.
pub const MAX_FUTURE_SKEW_MS: i64 = 120_000;

/// Kind of telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    WebVital,
    PwaLifecycle,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::WebVital => "web_vital",
            EventType::PwaLifecycle => "pwa_lifecycle",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "web_vital" => Some(EventType::WebVital),
            "pwa_lifecycle" => Some(EventType::PwaLifecycle),
            _ => None,
        }
    }
}

/// Web-vital rating as reported by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rating {
    Good,
    NeedsImprovement,
    Poor,
}

impl Rating {
    pub fn as_str(&self) -> &'static str {
        match self {
            Rating::Good => "good",
            Rating::NeedsImprovement => "needs-improvement",
            Rating::Poor => "poor",
        }
    }

    /// Only the three known literals pass through; anything else is None.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "good" => Some(Rating::Good),
            "needs-improvement" => Some(Rating::NeedsImprovement),
            "poor" => Some(Rating::Poor),
            _ => None,
        }
    }
}

/// Display mode the page was running under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayMode {
    Standalone,
    Browser,
    Unknown,
}

impl DisplayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayMode::Standalone => "standalone",
            DisplayMode::Browser => "browser",
            DisplayMode::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "standalone" => DisplayMode::Standalone,
            "browser" => DisplayMode::Browser,
            _ => DisplayMode::Unknown,
        }
    }
}

/// A telemetry event as submitted by the client runtime.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawTelemetryEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub name: String,
    /// Client timestamp, epoch milliseconds.
    pub ts: i64,
    pub path: String,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub unit: Option<String>,
    #[serde(default)]
    pub rating: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub meta: Option<BTreeMap<String, Value>>,
}

/// Batch-level context submitted alongside events.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct IngestContext {
    #[serde(default)]
    pub display_mode: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub tz_offset_minutes: Option<i32>,
}

/// Canonical internal event shape, immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NormalizedEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub name: String,
    pub ts: DateTime<Utc>,
    pub path: String,
    pub value: Option<f64>,
    pub rating: Option<Rating>,
    pub display_mode: DisplayMode,
}

/// Canonicalize a raw event, or drop it when the timestamp falls outside
/// `[now - 24h, now + 120s]`. Pure; no I/O.
pub fn normalize(
    raw: &RawTelemetryEvent,
    context: Option<&IngestContext>,
    now: DateTime<Utc>,
) -> Option<NormalizedEvent> {
    let ts = Utc.timestamp_millis_opt(raw.ts).single()?;
    if ts < now - Duration::milliseconds(MAX_EVENT_AGE_MS)
        || ts > now + Duration::milliseconds(MAX_FUTURE_SKEW_MS)
    {
        return None;
    }

    let display_mode = context
        .and_then(|c| c.display_mode.as_deref())
        .map(DisplayMode::parse)
        .unwrap_or(DisplayMode::Unknown);

    Some(NormalizedEvent {
        event_type: raw.event_type,
        name: truncate_chars(&raw.name.trim().to_lowercase(), MAX_NAME_LEN),
        ts,
        path: normalize_path(&raw.path),
        value: raw.value.filter(|v| v.is_finite()),
        rating: raw.rating.as_deref().and_then(Rating::parse),
        display_mode,
    })
}

/// Boundary validation serde cannot express: non-empty name, finite value,
/// flat scalar meta within key/value length limits.
pub fn validate_raw(raw: &RawTelemetryEvent) -> Result<(), &'static str> {
    if raw.name.trim().is_empty() {
        return Err("name must not be empty");
    }
    if let Some(v) = raw.value {
        if !v.is_finite() {
            return Err("value must be finite");
        }
    }
    if let Some(meta) = &raw.meta {
        for (key, value) in meta {
            if key.chars().count() > MAX_META_KEY_LEN {
                return Err("meta key too long");
            }
            match value {
                Value::String(s) if s.chars().count() > MAX_META_STRING_LEN => {
                    return Err("meta string value too long");
                }
                Value::String(_) | Value::Number(_) | Value::Bool(_) | Value::Null => {}
                _ => return Err("meta values must be scalar"),
            }
        }
    }
    Ok(())
}

fn normalize_path(path: &str) -> String {
    let trimmed = path.trim();
    let slashed = if trimmed.starts_with('/') {
        trimmed.to_string()
    } else {
        format!("/{}", trimmed)
    };
    truncate_chars(&slashed, MAX_PATH_LEN)
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        s.chars().take(max).collect()
    }
}
