//! Pure summarization of normalized telemetry events.
//!
//! `summarize` is deterministic given identical inputs: windowing and
//! filters, nearest-rank percentiles per web vital, lifecycle histograms,
//! funnel conversion rates, and the threshold verdict via the evaluator.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::SloThresholds;
use crate::telemetry::alerts::{evaluate, Alert};
use crate::telemetry::event::{DisplayMode, EventType, NormalizedEvent, Rating};

/// The five tracked web-vital names.
pub const VITAL_NAMES: [&str; 5] = ["lcp", "inp", "cls", "fcp", "ttfb"];

pub const MIN_WINDOW_MINUTES: i64 = 5;
pub const MAX_WINDOW_MINUTES: i64 = 1440;
pub const DEFAULT_WINDOW_MINUTES: i64 = 60;

// Lifecycle event names feeding the funnels; looked up by exact key.
const INSTALL_PROMPT_SHOWN: &str = "install_prompt_shown";
const INSTALL_ACCEPTED: &str = "install_accepted";
const INSTALL_DISMISSED: &str = "install_prompt_dismissed";
const APP_INSTALLED: &str = "app_installed";
const PUSH_PROMPTED: &str = "push_permission_prompted";
const PUSH_GRANTED: &str = "push_permission_granted";
const PUSH_DENIED: &str = "push_permission_denied";
const SW_REGISTERED: &str = "sw_registered";
const SW_REGISTER_FAILED: &str = "sw_register_failed";
const SW_UPDATED: &str = "sw_updated";

/// Display-mode filter applied to a summary query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayModeFilter {
    All,
    Standalone,
    Browser,
    Unknown,
}

impl DisplayModeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayModeFilter::All => "all",
            DisplayModeFilter::Standalone => "standalone",
            DisplayModeFilter::Browser => "browser",
            DisplayModeFilter::Unknown => "unknown",
        }
    }

    /// Concrete mode to match in queries, None for `All`.
    pub fn as_mode_str(&self) -> Option<&'static str> {
        match self {
            DisplayModeFilter::All => None,
            other => Some(other.as_str()),
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "standalone" => DisplayModeFilter::Standalone,
            "browser" => DisplayModeFilter::Browser,
            "unknown" => DisplayModeFilter::Unknown,
            _ => DisplayModeFilter::All,
        }
    }

    fn matches(&self, mode: DisplayMode) -> bool {
        match self {
            DisplayModeFilter::All => true,
            DisplayModeFilter::Standalone => mode == DisplayMode::Standalone,
            DisplayModeFilter::Browser => mode == DisplayMode::Browser,
            DisplayModeFilter::Unknown => mode == DisplayMode::Unknown,
        }
    }
}

/// Window and filter options for one summary query.
#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    pub window_minutes: i64,
    pub display_mode: DisplayModeFilter,
    pub path_prefix: Option<String>,
}

impl SummarizeOptions {
    pub fn new(
        window_minutes: i64,
        display_mode: DisplayModeFilter,
        path_prefix: Option<String>,
    ) -> Self {
        Self {
            window_minutes: window_minutes.clamp(MIN_WINDOW_MINUTES, MAX_WINDOW_MINUTES),
            display_mode,
            path_prefix: path_prefix.filter(|p| !p.trim().is_empty()),
        }
    }
}

impl Default for SummarizeOptions {
    fn default() -> Self {
        Self {
            window_minutes: DEFAULT_WINDOW_MINUTES,
            display_mode: DisplayModeFilter::All,
            path_prefix: None,
        }
    }
}

/// Overall verdict of a summary. Ordering: Pass < Warn < Fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryStatus {
    Pass,
    Warn,
    Fail,
}

impl SummaryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SummaryStatus::Pass => "pass",
            SummaryStatus::Warn => "warn",
            SummaryStatus::Fail => "fail",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RatingHistogram {
    pub good: u64,
    pub needs_improvement: u64,
    pub poor: u64,
}

impl RatingHistogram {
    pub fn rated(&self) -> u64 {
        self.good + self.needs_improvement + self.poor
    }
}

/// Statistics for one web-vital name within the window.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VitalStats {
    pub count: u64,
    pub p75: Option<f64>,
    pub p95: Option<f64>,
    pub average: Option<f64>,
    pub poor_rate: Option<f64>,
    pub ratings: RatingHistogram,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummaryTotals {
    pub event_count: u64,
    pub web_vital_count: u64,
    pub lifecycle_count: u64,
    pub rated_vital_count: u64,
    pub events_per_minute: f64,
    pub poor_vitals_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallFunnel {
    pub prompt_shown: u64,
    pub accepted: u64,
    pub dismissed: u64,
    pub installed: u64,
    pub accept_rate: Option<f64>,
    pub install_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PushFunnel {
    pub prompted: u64,
    pub granted: u64,
    pub denied: u64,
    pub grant_rate: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceWorkerFunnel {
    pub registered: u64,
    pub failed: u64,
    pub updated: u64,
    pub failure_rate: Option<f64>,
}

impl ServiceWorkerFunnel {
    /// Registration attempts backing the failure rate.
    pub fn attempts(&self) -> u64 {
        self.registered + self.failed
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FunnelSummaries {
    pub install: InstallFunnel,
    pub push: PushFunnel,
    pub service_worker: ServiceWorkerFunnel,
}

/// Derived snapshot of the window; recomputed per query, never persisted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySummary {
    pub generated_at: DateTime<Utc>,
    pub window_minutes: i64,
    pub display_mode: DisplayModeFilter,
    pub path_prefix: Option<String>,
    pub totals: SummaryTotals,
    pub vitals: BTreeMap<String, VitalStats>,
    pub lifecycle: BTreeMap<String, u64>,
    pub funnels: FunnelSummaries,
    pub thresholds: SloThresholds,
    pub alerts: Vec<Alert>,
    pub status: SummaryStatus,
}

/// Summarize events against the window/filter options. Pure.
pub fn summarize(
    events: &[NormalizedEvent],
    opts: &SummarizeOptions,
    thresholds: &SloThresholds,
    now: DateTime<Utc>,
) -> TelemetrySummary {
    let window_start = now - Duration::minutes(opts.window_minutes);
    let filtered: Vec<&NormalizedEvent> = events
        .iter()
        .filter(|e| e.ts >= window_start)
        .filter(|e| opts.display_mode.matches(e.display_mode))
        .filter(|e| match opts.path_prefix.as_deref() {
            Some(prefix) => e.path.starts_with(prefix),
            None => true,
        })
        .collect();

    let mut vitals = BTreeMap::new();
    let mut total_ratings = RatingHistogram::default();
    for name in VITAL_NAMES {
        let stats = vital_stats(&filtered, name);
        total_ratings.good += stats.ratings.good;
        total_ratings.needs_improvement += stats.ratings.needs_improvement;
        total_ratings.poor += stats.ratings.poor;
        vitals.insert(name.to_string(), stats);
    }

    let mut lifecycle: BTreeMap<String, u64> = BTreeMap::new();
    for e in filtered.iter().filter(|e| e.event_type == EventType::PwaLifecycle) {
        *lifecycle.entry(e.name.clone()).or_insert(0) += 1;
    }

    let web_vital_count = filtered
        .iter()
        .filter(|e| e.event_type == EventType::WebVital)
        .count() as u64;
    let lifecycle_count = filtered.len() as u64 - web_vital_count;

    let totals = SummaryTotals {
        event_count: filtered.len() as u64,
        web_vital_count,
        lifecycle_count,
        rated_vital_count: total_ratings.rated(),
        events_per_minute: filtered.len() as f64 / opts.window_minutes as f64,
        poor_vitals_rate: safe_rate(total_ratings.poor as f64, total_ratings.rated() as f64),
    };

    let funnels = derive_funnels(&lifecycle);
    let (alerts, status) = evaluate(&totals, &vitals, &funnels, thresholds);

    TelemetrySummary {
        generated_at: now,
        window_minutes: opts.window_minutes,
        display_mode: opts.display_mode,
        path_prefix: opts.path_prefix.clone(),
        totals,
        vitals,
        lifecycle,
        funnels,
        thresholds: thresholds.clone(),
        alerts,
        status,
    }
}

fn vital_stats(filtered: &[&NormalizedEvent], name: &str) -> VitalStats {
    let mut values: Vec<f64> = Vec::new();
    let mut ratings = RatingHistogram::default();
    let mut count = 0u64;

    for e in filtered {
        if e.event_type != EventType::WebVital || e.name != name {
            continue;
        }
        count += 1;
        if let Some(v) = e.value {
            values.push(v);
        }
        match e.rating {
            Some(Rating::Good) => ratings.good += 1,
            Some(Rating::NeedsImprovement) => ratings.needs_improvement += 1,
            Some(Rating::Poor) => ratings.poor += 1,
            None => {}
        }
    }

    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let average = if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    };

    VitalStats {
        count,
        p75: percentile(&values, 75.0),
        p95: percentile(&values, 95.0),
        average,
        poor_rate: safe_rate(ratings.poor as f64, ratings.rated() as f64),
        ratings,
    }
}

fn derive_funnels(lifecycle: &BTreeMap<String, u64>) -> FunnelSummaries {
    let count = |name: &str| lifecycle.get(name).copied().unwrap_or(0);

    let prompt_shown = count(INSTALL_PROMPT_SHOWN);
    let accepted = count(INSTALL_ACCEPTED);
    let installed = count(APP_INSTALLED);
    let install = InstallFunnel {
        prompt_shown,
        accepted,
        dismissed: count(INSTALL_DISMISSED),
        installed,
        accept_rate: safe_rate(accepted as f64, prompt_shown as f64),
        install_rate: safe_rate(installed as f64, prompt_shown as f64),
    };

    let prompted = count(PUSH_PROMPTED);
    let granted = count(PUSH_GRANTED);
    let push = PushFunnel {
        prompted,
        granted,
        denied: count(PUSH_DENIED),
        grant_rate: safe_rate(granted as f64, prompted as f64),
    };

    let registered = count(SW_REGISTERED);
    let failed = count(SW_REGISTER_FAILED);
    let service_worker = ServiceWorkerFunnel {
        registered,
        failed,
        updated: count(SW_UPDATED),
        failure_rate: safe_rate(failed as f64, (registered + failed) as f64),
    };

    FunnelSummaries {
        install,
        push,
        service_worker,
    }
}

/// Nearest-rank percentile over an ascending-sorted slice:
/// `idx = ceil(p/100 * n) - 1`, clamped to `[0, n-1]`.
pub fn percentile(sorted: &[f64], p: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let rank = ((p / 100.0) * n as f64).ceil() as usize;
    let idx = rank.saturating_sub(1).min(n - 1);
    Some(sorted[idx])
}

/// Division that yields None instead of NaN/Infinity on an empty denominator.
pub fn safe_rate(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator <= 0.0 {
        None
    } else {
        Some(numerator / denominator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::event::DisplayMode;

    fn vital(name: &str, value: f64, rating: Rating, ts: DateTime<Utc>) -> NormalizedEvent {
        NormalizedEvent {
            event_type: EventType::WebVital,
            name: name.to_string(),
            ts,
            path: "/".to_string(),
            value: Some(value),
            rating: Some(rating),
            display_mode: DisplayMode::Standalone,
        }
    }

    fn lifecycle(name: &str, ts: DateTime<Utc>) -> NormalizedEvent {
        NormalizedEvent {
            event_type: EventType::PwaLifecycle,
            name: name.to_string(),
            ts,
            path: "/".to_string(),
            value: None,
            rating: None,
            display_mode: DisplayMode::Standalone,
        }
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let values = [1.0, 2.0, 3.0, 4.0];
        // ceil(0.75*4)-1 = 2 -> 3.0; ceil(0.95*4)-1 = 3 -> 4.0
        assert_eq!(percentile(&values, 75.0), Some(3.0));
        assert_eq!(percentile(&values, 95.0), Some(4.0));
        assert_eq!(percentile(&values, 0.0), Some(1.0));
        assert_eq!(percentile(&values, 100.0), Some(4.0));
        assert_eq!(percentile(&[], 75.0), None);
        assert_eq!(percentile(&[42.0], 95.0), Some(42.0));
    }

    #[test]
    fn test_percentile_monotonicity() {
        let values = [12.0, 90.0, 3.0, 55.0, 55.0, 7.0, 120.0];
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let p75 = percentile(&sorted, 75.0).unwrap();
        let p95 = percentile(&sorted, 95.0).unwrap();
        assert!(p75 <= p95);
    }

    #[test]
    fn test_safe_rate_zero_denominator() {
        assert_eq!(safe_rate(5.0, 0.0), None);
        assert_eq!(safe_rate(-3.0, 0.0), None);
        assert_eq!(safe_rate(0.0, -1.0), None);
        assert_eq!(safe_rate(25.0, 100.0), Some(0.25));
    }

    #[test]
    fn test_funnel_acceptance_rate() {
        let now = Utc::now();
        let mut events = Vec::new();
        for _ in 0..100 {
            events.push(lifecycle("install_prompt_shown", now));
        }
        for _ in 0..25 {
            events.push(lifecycle("install_accepted", now));
        }
        let summary = summarize(
            &events,
            &SummarizeOptions::default(),
            &SloThresholds::default(),
            now,
        );
        assert_eq!(summary.funnels.install.accept_rate, Some(0.25));
        assert_eq!(summary.funnels.install.prompt_shown, 100);
    }

    #[test]
    fn test_window_and_filters() {
        let now = Utc::now();
        let mut events = vec![
            vital("lcp", 1000.0, Rating::Good, now),
            vital("lcp", 1100.0, Rating::Good, now - Duration::minutes(120)),
        ];
        events[0].path = "/shop/cart".to_string();

        let opts = SummarizeOptions::new(60, DisplayModeFilter::All, None);
        let summary = summarize(&events, &opts, &SloThresholds::default(), now);
        assert_eq!(summary.totals.event_count, 1);

        // Display-mode equality filter drops standalone events.
        let opts = SummarizeOptions::new(60, DisplayModeFilter::Browser, None);
        let summary = summarize(&events, &opts, &SloThresholds::default(), now);
        assert_eq!(summary.totals.event_count, 0);

        // Path prefix filter.
        let opts = SummarizeOptions::new(60, DisplayModeFilter::All, Some("/shop".to_string()));
        let summary = summarize(&events, &opts, &SloThresholds::default(), now);
        assert_eq!(summary.totals.event_count, 1);

        let opts = SummarizeOptions::new(60, DisplayModeFilter::All, Some("/blog".to_string()));
        let summary = summarize(&events, &opts, &SloThresholds::default(), now);
        assert_eq!(summary.totals.event_count, 0);
    }

    #[test]
    fn test_window_minutes_clamped() {
        let opts = SummarizeOptions::new(2, DisplayModeFilter::All, None);
        assert_eq!(opts.window_minutes, MIN_WINDOW_MINUTES);
        let opts = SummarizeOptions::new(100_000, DisplayModeFilter::All, None);
        assert_eq!(opts.window_minutes, MAX_WINDOW_MINUTES);
    }

    #[test]
    fn test_poor_lcp_breach_fails() {
        // 40 poor LCP samples at 3000ms: p75 = 3000, poor rate = 1.0, and the
        // evaluator escalates past the 2500 * 1.1 fail boundary.
        let now = Utc::now();
        let events: Vec<NormalizedEvent> = (0..40)
            .map(|_| vital("lcp", 3000.0, Rating::Poor, now))
            .collect();
        let summary = summarize(
            &events,
            &SummarizeOptions::default(),
            &SloThresholds::default(),
            now,
        );

        let lcp = &summary.vitals["lcp"];
        assert_eq!(lcp.count, 40);
        assert_eq!(lcp.p75, Some(3000.0));
        assert_eq!(lcp.poor_rate, Some(1.0));

        let alert = summary
            .alerts
            .iter()
            .find(|a| a.key == "lcp-p75")
            .expect("lcp-p75 alert");
        assert_eq!(alert.severity, crate::telemetry::alerts::AlertSeverity::Fail);
        assert_eq!(summary.status, SummaryStatus::Fail);
    }

    #[test]
    fn test_small_sample_never_alerts() {
        // 10 terrible LCP samples stay below min_samples = 30.
        let now = Utc::now();
        let events: Vec<NormalizedEvent> = (0..10)
            .map(|_| vital("lcp", 5000.0, Rating::Poor, now))
            .collect();
        let summary = summarize(
            &events,
            &SummarizeOptions::default(),
            &SloThresholds::default(),
            now,
        );
        assert!(summary.alerts.iter().all(|a| a.key != "lcp-p75"));
        assert_eq!(summary.status, SummaryStatus::Pass);
    }

    #[test]
    fn test_lifecycle_histogram_and_sw_funnel() {
        let now = Utc::now();
        let mut events = Vec::new();
        for _ in 0..8 {
            events.push(lifecycle("sw_registered", now));
        }
        for _ in 0..2 {
            events.push(lifecycle("sw_register_failed", now));
        }
        let summary = summarize(
            &events,
            &SummarizeOptions::default(),
            &SloThresholds::default(),
            now,
        );
        assert_eq!(summary.lifecycle.get("sw_registered"), Some(&8));
        assert_eq!(summary.funnels.service_worker.failure_rate, Some(0.2));
        assert_eq!(summary.funnels.service_worker.attempts(), 10);
        assert_eq!(summary.totals.lifecycle_count, 10);
    }
}
