//! Configuration module for pulsegate.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Everything is read once at startup and passed by value into the pure
//! summarizer/evaluator code; nothing below reads the environment at call
//! time. Numeric keys are clamped to their documented ranges and garbage
//! values fall back to defaults.

use serde::Serialize;
use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 8080)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "pulsegate.db")
    pub db_path: String,
    /// Whether normalized events are persisted to SQLite in addition to the
    /// in-process buffer. Dispatch audit rows persist regardless.
    pub durable_events_enabled: bool,
    /// Shared secret gating the /internal endpoints. None disables them.
    pub operator_secret: Option<String>,
    /// Days of telemetry events kept in SQLite.
    pub retention_days: i64,
    /// Days of alert dispatch audit rows kept in SQLite.
    pub dispatch_retention_days: i64,
    /// Per-IP ingestion request budget per minute.
    pub ingest_rate_limit_per_minute: usize,
    pub thresholds: SloThresholds,
    pub alerting: AlertConfig,
    pub rollout: RolloutFlags,
}

/// SLO thresholds embedded in every summary and consumed by the evaluator.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SloThresholds {
    /// Largest Contentful Paint p75 target, milliseconds.
    pub lcp_p75_ms: f64,
    /// Interaction to Next Paint p75 target, milliseconds.
    pub inp_p75_ms: f64,
    /// Cumulative Layout Shift p75 target, unitless score.
    pub cls_p75: f64,
    /// First Contentful Paint p75 target, milliseconds.
    pub fcp_p75_ms: f64,
    /// Time To First Byte p75 target, milliseconds.
    pub ttfb_p75_ms: f64,
    /// Ceiling on the share of rated vitals that are "poor".
    pub poor_vitals_rate_max: f64,
    /// Floor on install-prompt acceptance.
    pub install_accept_rate_min: f64,
    /// Floor on push-permission grants.
    pub push_grant_rate_min: f64,
    /// Ceiling on service-worker registration failures.
    pub sw_failure_rate_max: f64,
    /// No check fires below this sample count.
    pub min_samples: u64,
}

/// Webhook delivery settings for the alert dispatcher.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    /// Alert webhook URL. None records skipped_config on active alerts.
    pub webhook_url: Option<String>,
    /// Webhook request timeout, milliseconds.
    pub webhook_timeout_ms: u64,
    /// A fingerprint already sent within this many minutes is not resent.
    pub cooldown_minutes: i64,
}

/// PWA rollout gate flags, snapshotted into the rollout-status response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutFlags {
    /// Kill switch; false disables the gate regardless of percent.
    pub pwa_enabled: bool,
    /// Percentage of clients bucketed into the rollout, 0-100.
    pub rollout_percent: u8,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 8080,
            db_path: "pulsegate.db".to_string(),
            durable_events_enabled: false,
            operator_secret: None,
            retention_days: 14,
            dispatch_retention_days: 90,
            ingest_rate_limit_per_minute: 120,
            thresholds: SloThresholds::default(),
            alerting: AlertConfig::default(),
            rollout: RolloutFlags::default(),
        }
    }
}

impl Default for SloThresholds {
    fn default() -> Self {
        Self {
            lcp_p75_ms: 2500.0,
            inp_p75_ms: 200.0,
            cls_p75: 0.1,
            fcp_p75_ms: 1800.0,
            ttfb_p75_ms: 800.0,
            poor_vitals_rate_max: 0.15,
            install_accept_rate_min: 0.05,
            push_grant_rate_min: 0.2,
            sw_failure_rate_max: 0.05,
            min_samples: 30,
        }
    }
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_timeout_ms: 5000,
            cooldown_minutes: 120,
        }
    }
}

impl Default for RolloutFlags {
    fn default() -> Self {
        Self {
            pwa_enabled: true,
            rollout_percent: 100,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `PULSEGATE_HTTP_PORT`: HTTP port (default: 8080)
    /// - `PULSEGATE_DB_PATH`: database file path (default: "pulsegate.db")
    /// - `PULSEGATE_DURABLE_EVENTS`: persist events to SQLite (default: false)
    /// - `PULSEGATE_OPERATOR_SECRET`: secret for /internal endpoints
    /// - `PULSEGATE_RETENTION_DAYS`: event retention (default: 14, 1-90)
    /// - `PULSEGATE_DISPATCH_RETENTION_DAYS`: audit retention (default: 90, 7-365)
    /// - `PULSEGATE_INGEST_RATE_LIMIT`: requests/min/IP (default: 120, 10-10000)
    /// - `PULSEGATE_ALERT_WEBHOOK_URL`, `PULSEGATE_ALERT_WEBHOOK_TIMEOUT_MS`,
    ///   `PULSEGATE_ALERT_COOLDOWN_MINUTES`
    /// - `PULSEGATE_SLO_*`: threshold overrides (see `SloThresholds::load`)
    /// - `PULSEGATE_PWA_ENABLED`, `PULSEGATE_PWA_ROLLOUT_PERCENT`
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("PULSEGATE_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }
        if let Ok(db_path) = env::var("PULSEGATE_DB_PATH") {
            cfg.db_path = db_path;
        }
        cfg.durable_events_enabled = env_bool("PULSEGATE_DURABLE_EVENTS", false);
        cfg.operator_secret = env_string("PULSEGATE_OPERATOR_SECRET");
        cfg.retention_days = env_i64("PULSEGATE_RETENTION_DAYS", 14, 1, 90);
        cfg.dispatch_retention_days = env_i64("PULSEGATE_DISPATCH_RETENTION_DAYS", 90, 7, 365);
        cfg.ingest_rate_limit_per_minute =
            env_i64("PULSEGATE_INGEST_RATE_LIMIT", 120, 10, 10_000) as usize;
        cfg.thresholds = SloThresholds::load();
        cfg.alerting = AlertConfig::load();
        cfg.rollout = RolloutFlags::load();

        cfg
    }
}

impl SloThresholds {
    /// Load thresholds from `PULSEGATE_SLO_*` with per-key clamps.
    pub fn load() -> Self {
        Self {
            lcp_p75_ms: env_f64("PULSEGATE_SLO_LCP_P75_MS", 2500.0, 500.0, 10_000.0),
            inp_p75_ms: env_f64("PULSEGATE_SLO_INP_P75_MS", 200.0, 50.0, 2000.0),
            cls_p75: env_f64("PULSEGATE_SLO_CLS_P75", 0.1, 0.01, 1.0),
            fcp_p75_ms: env_f64("PULSEGATE_SLO_FCP_P75_MS", 1800.0, 500.0, 10_000.0),
            ttfb_p75_ms: env_f64("PULSEGATE_SLO_TTFB_P75_MS", 800.0, 100.0, 5000.0),
            poor_vitals_rate_max: env_f64("PULSEGATE_SLO_POOR_RATE_MAX", 0.15, 0.01, 1.0),
            install_accept_rate_min: env_f64("PULSEGATE_SLO_INSTALL_RATE_MIN", 0.05, 0.0, 1.0),
            push_grant_rate_min: env_f64("PULSEGATE_SLO_PUSH_RATE_MIN", 0.2, 0.0, 1.0),
            sw_failure_rate_max: env_f64("PULSEGATE_SLO_SW_FAILURE_RATE_MAX", 0.05, 0.0, 1.0),
            min_samples: env_i64("PULSEGATE_SLO_MIN_SAMPLES", 30, 1, 10_000) as u64,
        }
    }
}

impl AlertConfig {
    pub fn load() -> Self {
        Self {
            webhook_url: env_string("PULSEGATE_ALERT_WEBHOOK_URL"),
            webhook_timeout_ms: env_i64("PULSEGATE_ALERT_WEBHOOK_TIMEOUT_MS", 5000, 1000, 30_000)
                as u64,
            cooldown_minutes: env_i64("PULSEGATE_ALERT_COOLDOWN_MINUTES", 120, 5, 1440),
        }
    }
}

impl RolloutFlags {
    pub fn load() -> Self {
        Self {
            pwa_enabled: env_bool("PULSEGATE_PWA_ENABLED", true),
            rollout_percent: env_i64("PULSEGATE_PWA_ROLLOUT_PERCENT", 100, 0, 100) as u8,
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => default,
    }
}

fn env_f64(key: &str, default: f64, min: f64, max: f64) -> f64 {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<f64>() {
            Ok(v) if v.is_finite() => v.clamp(min, max),
            _ => default,
        },
        Err(_) => default,
    }
}

fn env_i64(key: &str, default: i64, min: i64, max: i64) -> i64 {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<i64>() {
            Ok(v) => v.clamp(min, max),
            Err(_) => default,
        },
        Err(_) => default,
    }
}
