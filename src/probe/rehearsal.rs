//! Incident rehearsal: a scripted drill against a deployment that writes a
//! JSON report with step outcomes and rollback guidance.

use super::{map_send_error, probe_client, ProbeError, ProbeTarget};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::PathBuf;

const ROLLBACK_GUIDANCE: &[&str] = &[
    "Set PULSEGATE_PWA_ROLLOUT_PERCENT=0 to stop new clients enabling the PWA.",
    "Set PULSEGATE_PWA_ENABLED=false to disable the gate outright.",
    "Re-run the burn-in probe after any flag change to confirm the surface.",
    "Alert dedup survives restarts; use force=true on /internal/alert-check to re-test delivery.",
];

#[derive(Debug, Clone)]
pub struct RehearsalConfig {
    /// Also trigger a forced alert dispatch as part of the drill.
    pub force_dispatch: bool,
    pub report_path: PathBuf,
}

impl Default for RehearsalConfig {
    fn default() -> Self {
        Self {
            force_dispatch: false,
            report_path: PathBuf::from("pulsegate-rehearsal.json"),
        }
    }
}

impl RehearsalConfig {
    /// Overrides: `PULSEGATE_REHEARSAL_FORCE`, `PULSEGATE_REHEARSAL_REPORT`.
    pub fn from_env() -> Self {
        let mut cfg = Self::default();
        if let Ok(v) = std::env::var("PULSEGATE_REHEARSAL_FORCE") {
            cfg.force_dispatch = matches!(v.trim(), "1" | "true" | "yes");
        }
        if let Ok(path) = std::env::var("PULSEGATE_REHEARSAL_REPORT") {
            if !path.trim().is_empty() {
                cfg.report_path = PathBuf::from(path);
            }
        }
        cfg
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RehearsalStep {
    pub name: String,
    pub ok: bool,
    pub status: Option<u16>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RehearsalReport {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub ok: bool,
    pub steps: Vec<RehearsalStep>,
    pub rollback_guidance: Vec<String>,
}

/// Run the drill and write the report.
pub async fn run_rehearsal(
    target: &ProbeTarget,
    cfg: &RehearsalConfig,
) -> Result<RehearsalReport, ProbeError> {
    let secret = target.secret.as_deref().ok_or_else(|| {
        ProbeError::Config("rehearsal requires PULSEGATE_OPERATOR_SECRET".to_string())
    })?;
    let http = probe_client(target.timeout)?;
    let started_at = Utc::now();
    let mut steps = Vec::new();

    // 1. Anonymous access to the alert endpoint must be rejected.
    steps.push(
        match http
            .post(target.url("/internal/alert-check"))
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status().as_u16();
                let ok = status == 401;
                RehearsalStep {
                    name: "unauthorized-access-rejected".to_string(),
                    ok,
                    status: Some(status),
                    detail: if ok {
                        None
                    } else {
                        Some(format!("expected 401, got {}", status))
                    },
                }
            }
            Err(e) => RehearsalStep {
                name: "unauthorized-access-rejected".to_string(),
                ok: false,
                status: None,
                detail: Some(map_send_error(e, target.timeout).to_string()),
            },
        },
    );

    // 2. Authenticated status fetch.
    steps.push(
        match http
            .get(target.url("/internal/rollout-status"))
            .bearer_auth(secret)
            .send()
            .await
        {
            Ok(response) => {
                let status = response.status().as_u16();
                let ok = response.status().is_success();
                let detail = if ok {
                    response
                        .json::<serde_json::Value>()
                        .await
                        .ok()
                        .and_then(|b| {
                            b.pointer("/summary/status")
                                .and_then(|v| v.as_str())
                                .map(|s| format!("summary status: {}", s))
                        })
                } else {
                    Some(format!("expected success, got {}", status))
                };
                RehearsalStep {
                    name: "authenticated-status-fetch".to_string(),
                    ok,
                    status: Some(status),
                    detail,
                }
            }
            Err(e) => RehearsalStep {
                name: "authenticated-status-fetch".to_string(),
                ok: false,
                status: None,
                detail: Some(map_send_error(e, target.timeout).to_string()),
            },
        },
    );

    // 3. Optional forced alert dispatch.
    if cfg.force_dispatch {
        steps.push(
            match http
                .post(target.url("/internal/alert-check?force=true&actor=rehearsal"))
                .bearer_auth(secret)
                .send()
                .await
            {
                Ok(response) => {
                    let status = response.status().as_u16();
                    let ok = response.status().is_success();
                    RehearsalStep {
                        name: "forced-alert-dispatch".to_string(),
                        ok,
                        status: Some(status),
                        detail: if ok {
                            None
                        } else {
                            Some(format!("dispatch returned {}", status))
                        },
                    }
                }
                Err(e) => RehearsalStep {
                    name: "forced-alert-dispatch".to_string(),
                    ok: false,
                    status: None,
                    detail: Some(map_send_error(e, target.timeout).to_string()),
                },
            },
        );
    }

    let report = RehearsalReport {
        started_at,
        finished_at: Utc::now(),
        ok: steps.iter().all(|s| s.ok),
        steps,
        rollback_guidance: ROLLBACK_GUIDANCE.iter().map(|s| s.to_string()).collect(),
    };

    write_report(&cfg.report_path, &report)?;
    tracing::info!(
        "Rehearsal report written to {}",
        cfg.report_path.display()
    );
    Ok(report)
}

fn write_report(path: &std::path::Path, report: &RehearsalReport) -> Result<(), ProbeError> {
    let json =
        serde_json::to_string_pretty(report).map_err(|e| ProbeError::Report(e.to_string()))?;
    std::fs::write(path, json).map_err(|e| ProbeError::Report(e.to_string()))
}
