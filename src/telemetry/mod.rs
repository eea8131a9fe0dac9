//! Telemetry pipeline: normalization, storage backends, summarization,
//! alert evaluation and dispatch, rollout gating.

pub mod alerts;
pub mod dispatch;
pub mod ephemeral;
pub mod event;
pub mod rollout;
pub mod summary;

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

use crate::config::SloThresholds;
use crate::db::Store;
use ephemeral::EphemeralStore;
use event::NormalizedEvent;
use summary::{summarize, SummarizeOptions, TelemetrySummary};

/// Which backend served a summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarySource {
    Durable,
    Ephemeral,
}

/// One capability shared by both backends: hand back the normalized events
/// for a summary window, or None when this source cannot serve it.
pub trait TelemetrySource: Send + Sync {
    fn source(&self) -> SummarySource;
    fn events_for_window(
        &self,
        opts: &SummarizeOptions,
        now: DateTime<Utc>,
    ) -> Option<Vec<NormalizedEvent>>;
}

/// Outcome of a durable persist attempt.
#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistOutcome {
    pub persisted: usize,
    pub skipped: bool,
}

/// Feature-flagged durable event adapter over the SQLite store. Write and
/// read failures are logged and absorbed here; telemetry must never break
/// the requesting page, and summary reads fall back to the in-process
/// buffer instead.
pub struct DurableEvents {
    store: Arc<Store>,
    enabled: bool,
}

impl DurableEvents {
    pub fn new(store: Arc<Store>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn persist_batch(&self, events: &[NormalizedEvent]) -> PersistOutcome {
        if !self.enabled {
            return PersistOutcome {
                persisted: 0,
                skipped: true,
            };
        }
        match self.store.persist_events(events) {
            Ok(persisted) => PersistOutcome {
                persisted,
                skipped: false,
            },
            Err(e) => {
                tracing::error!("Durable event insert failed: {}", e);
                PersistOutcome {
                    persisted: 0,
                    skipped: false,
                }
            }
        }
    }
}

impl TelemetrySource for DurableEvents {
    fn source(&self) -> SummarySource {
        SummarySource::Durable
    }

    fn events_for_window(
        &self,
        opts: &SummarizeOptions,
        now: DateTime<Utc>,
    ) -> Option<Vec<NormalizedEvent>> {
        if !self.enabled {
            return None;
        }
        match self.store.events_in_window(opts, now) {
            Ok(events) => Some(events),
            Err(e) => {
                tracing::warn!("Durable summary query failed, falling back: {}", e);
                None
            }
        }
    }
}

impl TelemetrySource for EphemeralStore {
    fn source(&self) -> SummarySource {
        SummarySource::Ephemeral
    }

    fn events_for_window(
        &self,
        _opts: &SummarizeOptions,
        _now: DateTime<Utc>,
    ) -> Option<Vec<NormalizedEvent>> {
        Some(self.snapshot())
    }
}

/// Summarize from the first source able to serve the window; sources are
/// tried in order (durable preferred) and partial results are never merged.
pub fn load_summary(
    sources: &[&dyn TelemetrySource],
    opts: &SummarizeOptions,
    thresholds: &SloThresholds,
    now: DateTime<Utc>,
) -> (TelemetrySummary, SummarySource) {
    for src in sources {
        if let Some(events) = src.events_for_window(opts, now) {
            return (summarize(&events, opts, thresholds, now), src.source());
        }
    }
    // The ephemeral store always answers; an empty source list still yields
    // a well-formed (empty) summary.
    (summarize(&[], opts, thresholds, now), SummarySource::Ephemeral)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::event::{DisplayMode, EventType};
    use tempfile::NamedTempFile;

    fn vital(name: &str, ts: DateTime<Utc>) -> NormalizedEvent {
        NormalizedEvent {
            event_type: EventType::WebVital,
            name: name.to_string(),
            ts,
            path: "/".to_string(),
            value: Some(100.0),
            rating: None,
            display_mode: DisplayMode::Unknown,
        }
    }

    #[test]
    fn test_disabled_durable_falls_back_to_ephemeral() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let now = Utc::now();

        let durable = DurableEvents::new(store, false);
        let ephemeral = EphemeralStore::new(now);
        ephemeral.record(&[vital("lcp", now)], now);

        let sources: [&dyn TelemetrySource; 2] = [&durable, &ephemeral];
        let opts = SummarizeOptions::default();
        let (summary, source) = load_summary(&sources, &opts, &SloThresholds::default(), now);

        assert_eq!(source, SummarySource::Ephemeral);
        assert_eq!(summary.totals.event_count, 1);
    }

    #[test]
    fn test_enabled_durable_is_preferred() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let now = Utc::now();

        let durable = DurableEvents::new(store, true);
        let outcome = durable.persist_batch(&[vital("lcp", now), vital("inp", now)]);
        assert_eq!(outcome.persisted, 2);
        assert!(!outcome.skipped);

        // Ephemeral holds different data; it must not be consulted.
        let ephemeral = EphemeralStore::new(now);
        ephemeral.record(&[vital("cls", now)], now);

        let sources: [&dyn TelemetrySource; 2] = [&durable, &ephemeral];
        let opts = SummarizeOptions::default();
        let (summary, source) = load_summary(&sources, &opts, &SloThresholds::default(), now);

        assert_eq!(source, SummarySource::Durable);
        assert_eq!(summary.totals.event_count, 2);
        assert_eq!(summary.vitals["cls"].count, 0);
    }

    #[test]
    fn test_disabled_persist_reports_skipped() {
        let tmp = NamedTempFile::new().unwrap();
        let store = Arc::new(Store::new(tmp.path()).unwrap());
        let durable = DurableEvents::new(store, false);

        let outcome = durable.persist_batch(&[vital("lcp", Utc::now())]);
        assert!(outcome.skipped);
        assert_eq!(outcome.persisted, 0);
    }
}
