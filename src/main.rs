//! pulsegate - PWA Telemetry SLO Monitor
//!
//! Ingests web-vital and PWA lifecycle events, aggregates them, evaluates
//! SLO thresholds and delivers deduplicated webhook alerts.

use pulsegate::config::ServerConfig;
use pulsegate::db::Store;
use pulsegate::telemetry::ephemeral::EphemeralStore;
use pulsegate::web::Server;

use chrono::Utc;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("pulsegate=info".parse()?))
        .init();

    // Load configuration
    let cfg = ServerConfig::load();
    tracing::info!("Starting pulsegate on port {}...", cfg.http_port);
    tracing::info!("Using database at {}", cfg.db_path);
    tracing::info!(
        "Durable event persistence {}",
        if cfg.durable_events_enabled { "enabled" } else { "disabled" }
    );
    if cfg.operator_secret.is_none() {
        tracing::warn!("No operator secret configured; /internal endpoints are disabled");
    }
    if cfg.alerting.webhook_url.is_none() {
        tracing::warn!("No alert webhook configured; alert checks will record skipped_config");
    }

    // Initialize database
    let store = Arc::new(Store::new(&cfg.db_path)?);
    tracing::info!("Database initialized successfully");

    // In-process event buffer; reset on restart by design
    let ephemeral = Arc::new(EphemeralStore::new(Utc::now()));

    // Start web server
    let server = Server::new(cfg, store, ephemeral);
    server.start().await?;

    Ok(())
}
