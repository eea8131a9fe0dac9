//! HTTP request handlers.

use super::AppState;
use crate::telemetry::event::{
    normalize, validate_raw, IngestContext, NormalizedEvent, RawTelemetryEvent,
};
use crate::telemetry::rollout::{self, OverrideAction};
use crate::telemetry::summary::{DisplayModeFilter, SummarizeOptions};
use crate::telemetry::{load_summary, TelemetrySource};

use axum::{
    body::Bytes,
    extract::{ConnectInfo, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;

// ============================================================================
// Ingestion
// ============================================================================

/// Largest accepted event batch.
const MAX_BATCH: usize = 20;

/// User-agent substrings identifying automated traffic. Matching requests
/// are accepted but their events are discarded so summaries only ever see
/// real visitors.
const SYNTHETIC_UA_MARKERS: &[&str] = &[
    "headlesschrome",
    "lighthouse",
    "chrome-lighthouse",
    "pagespeed",
    "gtmetrix",
    "pingdom",
    "phantomjs",
    "puppeteer",
    "playwright",
    "selenium",
    "bot",
    "spider",
    "crawler",
];

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IngestRequest {
    pub events: Vec<RawTelemetryEvent>,
    #[serde(default)]
    pub context: Option<IngestContext>,
}

pub async fn handle_ingest(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Rate limit before any parsing happens.
    if !state.rate_limiter.allow(addr.ip()) {
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({"error": "rate_limited"})),
        )
            .into_response();
    }

    let req: IngestRequest = match serde_json::from_slice(&body) {
        Ok(r) => r,
        Err(e) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_payload", "detail": e.to_string()})),
            )
                .into_response();
        }
    };

    if req.events.is_empty() || req.events.len() > MAX_BATCH {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "batch_size", "detail": "expected 1-20 events"})),
        )
            .into_response();
    }

    // Synthetic traffic is acknowledged but never recorded.
    let user_agent = req
        .context
        .as_ref()
        .and_then(|c| c.user_agent.as_deref())
        .or_else(|| {
            headers
                .get(header::USER_AGENT)
                .and_then(|v| v.to_str().ok())
        });
    if user_agent.map(is_synthetic_user_agent).unwrap_or(false) {
        return Json(json!({"skipped": "synthetic_traffic"})).into_response();
    }

    for event in &req.events {
        if let Err(reason) = validate_raw(event) {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "invalid_event", "detail": reason})),
            )
                .into_response();
        }
    }

    let now = Utc::now();
    let context = req.context.as_ref();
    let normalized: Vec<NormalizedEvent> = req
        .events
        .iter()
        .filter_map(|e| normalize(e, context, now))
        .collect();

    // Timestamp-filtering every event means the caller sent nothing usable.
    if normalized.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "no_valid_events"})),
        )
            .into_response();
    }

    state.ephemeral.record(&normalized, now);
    let outcome = state.durable.persist_batch(&normalized);

    Json(json!({
        "ok": true,
        "accepted": normalized.len(),
        "durablePersisted": outcome.persisted,
        "durableEnabled": state.durable.enabled(),
    }))
    .into_response()
}

fn is_synthetic_user_agent(user_agent: &str) -> bool {
    let ua = user_agent.to_ascii_lowercase();
    SYNTHETIC_UA_MARKERS.iter().any(|marker| ua.contains(marker))
}

// ============================================================================
// Rollout gate
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutQuery {
    #[serde(default)]
    pub client_id: Option<String>,
    /// Manual override token: on/off/clear.
    #[serde(default)]
    pub pwa: Option<String>,
}

pub async fn handle_rollout_decide(
    State(state): State<AppState>,
    Query(query): Query<RolloutQuery>,
) -> impl IntoResponse {
    let (client_id, created) = rollout::ensure_client_id(query.client_id.as_deref());
    let manual_override = query
        .pwa
        .as_deref()
        .and_then(rollout::parse_override)
        .and_then(|action| match action {
            OverrideAction::Enable => Some(true),
            OverrideAction::Disable => Some(false),
            OverrideAction::Clear => None,
        });

    let decision = rollout::decide(&state.config.rollout, manual_override, &client_id);
    Json(json!({
        "ok": true,
        "clientId": client_id,
        "newClient": created,
        "decision": decision,
    }))
}

// ============================================================================
// Operator endpoints
// ============================================================================

enum AuthOutcome {
    Authorized,
    Disabled,
    Unauthorized,
}

fn check_operator_auth(state: &AppState, headers: &HeaderMap) -> AuthOutcome {
    let Some(secret) = state.config.operator_secret.as_deref() else {
        return AuthOutcome::Disabled;
    };

    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    let custom = headers
        .get("x-operator-secret")
        .and_then(|v| v.to_str().ok());

    if bearer == Some(secret) || custom == Some(secret) {
        AuthOutcome::Authorized
    } else {
        AuthOutcome::Unauthorized
    }
}

fn auth_failure(outcome: AuthOutcome) -> Option<Response> {
    match outcome {
        AuthOutcome::Authorized => None,
        AuthOutcome::Disabled => Some(
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({"error": "alerting_disabled"})),
            )
                .into_response(),
        ),
        AuthOutcome::Unauthorized => Some(
            (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "unauthorized"})),
            )
                .into_response(),
        ),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusQuery {
    #[serde(default)]
    pub window_minutes: Option<i64>,
    #[serde(default)]
    pub display_mode: Option<String>,
    #[serde(default)]
    pub path_prefix: Option<String>,
    #[serde(default)]
    pub dispatch_limit: Option<i64>,
}

fn summarize_options(
    window_minutes: Option<i64>,
    display_mode: Option<&str>,
    path_prefix: Option<String>,
) -> SummarizeOptions {
    SummarizeOptions::new(
        window_minutes.unwrap_or(crate::telemetry::summary::DEFAULT_WINDOW_MINUTES),
        display_mode
            .map(DisplayModeFilter::parse)
            .unwrap_or(DisplayModeFilter::All),
        path_prefix,
    )
}

pub async fn handle_rollout_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<StatusQuery>,
) -> Response {
    if let Some(failure) = auth_failure(check_operator_auth(&state, &headers)) {
        return failure;
    }

    let opts = summarize_options(
        query.window_minutes,
        query.display_mode.as_deref(),
        query.path_prefix.clone(),
    );
    let now = Utc::now();
    let sources: [&dyn TelemetrySource; 2] = [state.durable.as_ref(), state.ephemeral.as_ref()];
    let (summary, source) = load_summary(&sources, &opts, &state.config.thresholds, now);

    let limit = query.dispatch_limit.unwrap_or(20).clamp(1, 50);
    let dispatches = match state.store.recent_dispatches(limit) {
        Ok(records) => records,
        Err(e) => {
            tracing::warn!("Failed to load dispatch history: {}", e);
            Vec::new()
        }
    };

    Json(json!({
        "ok": true,
        "source": source,
        "summary": summary,
        "recentDispatches": dispatches,
        "durableEnabled": state.durable.enabled(),
        "rollout": state.config.rollout,
    }))
    .into_response()
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertCheckQuery {
    #[serde(default)]
    pub window_minutes: Option<i64>,
    #[serde(default)]
    pub display_mode: Option<String>,
    #[serde(default)]
    pub path_prefix: Option<String>,
    /// Bypass cooldown dedup: 1/true/yes.
    #[serde(default)]
    pub force: Option<String>,
    #[serde(default)]
    pub actor: Option<String>,
}

pub async fn handle_alert_check(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<AlertCheckQuery>,
) -> Response {
    if let Some(failure) = auth_failure(check_operator_auth(&state, &headers)) {
        return failure;
    }

    let opts = summarize_options(
        query.window_minutes,
        query.display_mode.as_deref(),
        query.path_prefix.clone(),
    );
    let force = query
        .force
        .as_deref()
        .map(|s| matches!(s, "1" | "true" | "yes"))
        .unwrap_or(false);
    let actor = query.actor.as_deref().unwrap_or("operator");

    let result = state
        .dispatcher
        .run(
            &state.store,
            state.durable.as_ref(),
            state.ephemeral.as_ref(),
            &state.config.thresholds,
            &opts,
            force,
            actor,
            Utc::now(),
        )
        .await;

    let code = if result.ok {
        StatusCode::OK
    } else if result.reason == "webhook_not_configured" {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    (code, Json(result)).into_response()
}

// ============================================================================
// Health
// ============================================================================

pub async fn handle_healthz(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "ok": true,
        "version": env!("CARGO_PKG_VERSION"),
        "durableEnabled": state.durable.enabled(),
        "bufferedEvents": state.ephemeral.len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_synthetic_user_agent_detection() {
        assert!(is_synthetic_user_agent(
            "Mozilla/5.0 (X11; Linux x86_64) HeadlessChrome/120.0"
        ));
        assert!(is_synthetic_user_agent("Chrome-Lighthouse"));
        assert!(is_synthetic_user_agent("Googlebot/2.1"));
        assert!(!is_synthetic_user_agent(
            "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Safari/604.1"
        ));
    }

    #[test]
    fn test_summarize_options_from_query() {
        let opts = summarize_options(Some(30), Some("standalone"), Some("/shop".to_string()));
        assert_eq!(opts.window_minutes, 30);
        assert_eq!(opts.display_mode, DisplayModeFilter::Standalone);
        assert_eq!(opts.path_prefix.as_deref(), Some("/shop"));

        // Defaults and clamping.
        let opts = summarize_options(None, None, None);
        assert_eq!(opts.window_minutes, 60);
        assert_eq!(opts.display_mode, DisplayModeFilter::All);

        let opts = summarize_options(Some(1_000_000), Some("bogus"), Some("  ".to_string()));
        assert_eq!(opts.window_minutes, 1440);
        assert_eq!(opts.display_mode, DisplayModeFilter::All);
        assert_eq!(opts.path_prefix, None);
    }
}
