//! Burn-in check: verifies the deployment's PWA surface and the alert
//! endpoints' auth behavior before a rollout proceeds.

use super::{probe_client, ProbeError, ProbeTarget};
use reqwest::Method;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BurninCheck {
    pub name: String,
    pub path: String,
    pub ok: bool,
    pub status: Option<u16>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BurninReport {
    pub ok: bool,
    pub checks: Vec<BurninCheck>,
}

enum Expect {
    Success,
    Status(u16),
}

/// Run the full burn-in check set against the target.
pub async fn run_burnin(target: &ProbeTarget) -> Result<BurninReport, ProbeError> {
    let http = probe_client(target.timeout)?;
    let mut checks = Vec::new();

    // PWA surface must serve.
    for (name, path) in [
        ("health", "/healthz"),
        ("manifest", "/manifest.webmanifest"),
        ("service-worker", "/sw.js"),
        ("offline-page", "/offline"),
    ] {
        checks.push(run_check(&http, target, name, Method::GET, path, None, Expect::Success).await);
    }

    // The alert endpoint must reject anonymous callers.
    checks.push(
        run_check(
            &http,
            target,
            "alert-check-unauthenticated",
            Method::POST,
            "/internal/alert-check",
            None,
            Expect::Status(401),
        )
        .await,
    );

    // And answer authenticated status queries.
    match target.secret.as_deref() {
        Some(secret) => checks.push(
            run_check(
                &http,
                target,
                "rollout-status-authenticated",
                Method::GET,
                "/internal/rollout-status",
                Some(secret),
                Expect::Success,
            )
            .await,
        ),
        None => checks.push(BurninCheck {
            name: "rollout-status-authenticated".to_string(),
            path: "/internal/rollout-status".to_string(),
            ok: false,
            status: None,
            detail: Some("PULSEGATE_OPERATOR_SECRET not set".to_string()),
        }),
    }

    let ok = checks.iter().all(|c| c.ok);
    Ok(BurninReport { ok, checks })
}

async fn run_check(
    http: &reqwest::Client,
    target: &ProbeTarget,
    name: &str,
    method: Method,
    path: &str,
    bearer: Option<&str>,
    expect: Expect,
) -> BurninCheck {
    let url = target.url(path);
    let mut request = http.request(method, &url);
    if let Some(secret) = bearer {
        request = request.bearer_auth(secret);
    }

    match request.send().await {
        Ok(response) => {
            let status = response.status().as_u16();
            let ok = match expect {
                Expect::Success => response.status().is_success(),
                Expect::Status(want) => status == want,
            };
            BurninCheck {
                name: name.to_string(),
                path: path.to_string(),
                ok,
                status: Some(status),
                detail: if ok {
                    None
                } else {
                    Some(format!("unexpected status {}", status))
                },
            }
        }
        Err(e) => BurninCheck {
            name: name.to_string(),
            path: path.to_string(),
            ok: false,
            status: None,
            detail: Some(e.to_string()),
        },
    }
}
