//! Web server module.

mod handlers;
mod ratelimit;

pub use handlers::*;
pub use ratelimit::RateLimiter;

use crate::config::ServerConfig;
use crate::db::Store;
use crate::telemetry::dispatch::{AlertDispatcher, RetentionWindows};
use crate::telemetry::ephemeral::EphemeralStore;
use crate::telemetry::DurableEvents;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{Any, CorsLayer};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub store: Arc<Store>,
    pub ephemeral: Arc<EphemeralStore>,
    pub durable: Arc<DurableEvents>,
    pub dispatcher: Arc<AlertDispatcher>,
    pub rate_limiter: Arc<RateLimiter>,
}

/// Web server for pulsegate.
pub struct Server {
    state: AppState,
}

impl Server {
    /// Create a new server with the given dependencies.
    pub fn new(config: ServerConfig, store: Arc<Store>, ephemeral: Arc<EphemeralStore>) -> Self {
        let durable = Arc::new(DurableEvents::new(
            store.clone(),
            config.durable_events_enabled,
        ));
        let dispatcher = Arc::new(AlertDispatcher::new(
            config.alerting.clone(),
            RetentionWindows {
                event_days: config.retention_days,
                dispatch_days: config.dispatch_retention_days,
            },
        ));
        let rate_limiter = Arc::new(RateLimiter::new(
            config.ingest_rate_limit_per_minute,
            Duration::from_secs(60),
        ));

        Self {
            state: AppState {
                config: Arc::new(config),
                store,
                ephemeral,
                durable,
                dispatcher,
                rate_limiter,
            },
        }
    }

    /// Build the router with all routes.
    pub fn router(&self) -> Router {
        let cors = CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any);

        Router::new()
            // Health
            .route("/healthz", get(handlers::handle_healthz))
            // Client-facing API
            .route("/api/events", post(handlers::handle_ingest))
            .route("/api/rollout", get(handlers::handle_rollout_decide))
            // Operator endpoints
            .route("/internal/rollout-status", get(handlers::handle_rollout_status))
            .route("/internal/alert-check", post(handlers::handle_alert_check))
            .layer(cors)
            .layer(DefaultBodyLimit::max(1024 * 1024)) // 1MB
            .with_state(self.state.clone())
    }

    /// Start the server on the configured port.
    pub async fn start(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.state.config.http_port));
        let router = self.router();

        tracing::info!("Web server listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use tempfile::NamedTempFile;

    async fn spawn_server(config: ServerConfig) -> SocketAddr {
        let store = Arc::new(Store::new(&config.db_path).unwrap());
        let ephemeral = Arc::new(EphemeralStore::new(Utc::now()));
        let server = Server::new(config, store, ephemeral);
        let router = server.router();

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(
                listener,
                router.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .await
            .unwrap();
        });
        addr
    }

    fn test_config(db: &NamedTempFile, secret: Option<&str>) -> ServerConfig {
        let mut config = ServerConfig::default();
        config.db_path = db.path().to_string_lossy().to_string();
        config.operator_secret = secret.map(String::from);
        config
    }

    fn vital_batch(count: usize) -> serde_json::Value {
        let now_ms = Utc::now().timestamp_millis();
        let events: Vec<serde_json::Value> = (0..count)
            .map(|_| {
                json!({
                    "type": "web_vital",
                    "name": "lcp",
                    "ts": now_ms,
                    "path": "/shop",
                    "value": 1200.0,
                    "rating": "good"
                })
            })
            .collect();
        json!({"events": events, "context": {"displayMode": "standalone"}})
    }

    #[tokio::test]
    async fn test_ingest_then_status_roundtrip() {
        let db = NamedTempFile::new().unwrap();
        let addr = spawn_server(test_config(&db, Some("s3cret"))).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/api/events", addr))
            .json(&vital_batch(2))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["accepted"], 2);
        assert_eq!(body["durableEnabled"], false);

        let response = client
            .get(format!("http://{}/internal/rollout-status", addr))
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["summary"]["totals"]["eventCount"], 2);
        assert_eq!(body["summary"]["status"], "pass");
        assert_eq!(body["source"], "ephemeral");
        assert_eq!(body["rollout"]["rolloutPercent"], 100);
    }

    #[tokio::test]
    async fn test_ingest_rejects_bad_batches() {
        let db = NamedTempFile::new().unwrap();
        let addr = spawn_server(test_config(&db, None)).await;
        let client = reqwest::Client::new();
        let url = format!("http://{}/api/events", addr);

        // Empty batch.
        let response = client
            .post(&url)
            .json(&json!({"events": []}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        // Unknown top-level field.
        let response = client
            .post(&url)
            .json(&json!({"events": [], "extra": 1}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);

        // Every event outside the retention window.
        let response = client
            .post(&url)
            .json(&json!({"events": [{
                "type": "web_vital",
                "name": "lcp",
                "ts": Utc::now().timestamp_millis() - 48 * 3600 * 1000,
                "path": "/"
            }]}))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400);
    }

    #[tokio::test]
    async fn test_ingest_discards_synthetic_traffic() {
        let db = NamedTempFile::new().unwrap();
        let addr = spawn_server(test_config(&db, Some("s3cret"))).await;
        let client = reqwest::Client::new();

        let mut batch = vital_batch(1);
        batch["context"]["userAgent"] = json!("Chrome-Lighthouse");
        let response = client
            .post(format!("http://{}/api/events", addr))
            .json(&batch)
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["skipped"], "synthetic_traffic");

        // Nothing recorded.
        let response = client
            .get(format!("http://{}/internal/rollout-status", addr))
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["summary"]["totals"]["eventCount"], 0);
    }

    #[tokio::test]
    async fn test_operator_endpoints_auth() {
        let db = NamedTempFile::new().unwrap();
        let addr = spawn_server(test_config(&db, Some("s3cret"))).await;
        let client = reqwest::Client::new();
        let url = format!("http://{}/internal/rollout-status", addr);

        let response = client.get(&url).send().await.unwrap();
        assert_eq!(response.status(), 401);

        let response = client.get(&url).bearer_auth("wrong").send().await.unwrap();
        assert_eq!(response.status(), 401);

        // Header variant of the secret.
        let response = client
            .get(&url)
            .header("x-operator-secret", "s3cret")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
    }

    #[tokio::test]
    async fn test_operator_endpoints_disabled_without_secret() {
        let db = NamedTempFile::new().unwrap();
        let addr = spawn_server(test_config(&db, None)).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://{}/internal/rollout-status", addr))
            .bearer_auth("anything")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 503);
    }

    #[tokio::test]
    async fn test_alert_check_records_pass_run() {
        let db = NamedTempFile::new().unwrap();
        let addr = spawn_server(test_config(&db, Some("s3cret"))).await;
        let client = reqwest::Client::new();

        let response = client
            .post(format!("http://{}/internal/alert-check?actor=cron", addr))
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["status"], "skipped");
        assert_eq!(body["reason"], "status_pass");

        // The run left exactly one audit row.
        let response = client
            .get(format!("http://{}/internal/rollout-status", addr))
            .bearer_auth("s3cret")
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        let dispatches = body["recentDispatches"].as_array().unwrap();
        assert_eq!(dispatches.len(), 1);
        assert_eq!(dispatches[0]["deliveryStatus"], "skipped_pass");
        assert_eq!(dispatches[0]["triggeredBy"], "cron");
    }

    #[tokio::test]
    async fn test_rollout_decision_endpoint() {
        let db = NamedTempFile::new().unwrap();
        let addr = spawn_server(test_config(&db, None)).await;
        let client = reqwest::Client::new();

        let response = client
            .get(format!("http://{}/api/rollout?clientId=abc123", addr))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["decision"]["enabled"], true);
        assert_eq!(body["decision"]["reason"], "percent_hundred");
        assert_eq!(body["clientId"], "abc123");
        assert_eq!(body["newClient"], false);

        // Manual override wins over the bucket.
        let response = client
            .get(format!("http://{}/api/rollout?clientId=abc123&pwa=off", addr))
            .send()
            .await
            .unwrap();
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["decision"]["enabled"], false);
        assert_eq!(body["decision"]["reason"], "manual_override");
    }

    #[tokio::test]
    async fn test_healthz() {
        let db = NamedTempFile::new().unwrap();
        let addr = spawn_server(test_config(&db, None)).await;

        let response = reqwest::get(format!("http://{}/healthz", addr))
            .await
            .unwrap();
        assert_eq!(response.status(), 200);
        let body: serde_json::Value = response.json().await.unwrap();
        assert_eq!(body["ok"], true);
        assert_eq!(body["bufferedEvents"], 0);
    }
}
