//! Threshold evaluation over summary statistics.
//!
//! Nine fixed checks: five web-vital p75 upper bounds, the poor-vitals-rate
//! upper bound, install/push funnel lower bounds, and the service-worker
//! failure-rate upper bound. A check only fires once its sample count
//! reaches `min_samples`.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::config::SloThresholds;
use crate::telemetry::summary::{FunnelSummaries, SummaryStatus, SummaryTotals, VitalStats};

/// Upper-bound breaches escalate to fail past `target * 1.1`.
const FAIL_OVERSHOOT: f64 = 1.1;
/// Lower-bound breaches escalate to fail below `target * 0.9`.
const FAIL_UNDERSHOOT: f64 = 0.9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Warn,
    Fail,
}

/// Direction of the threshold the current value is compared against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Comparator {
    /// Value should stay at or below the target.
    #[serde(rename = "<=")]
    Lte,
    /// Value should stay at or above the target.
    #[serde(rename = ">=")]
    Gte,
}

/// One threshold breach. Alerts exist only inside a summary and inside
/// persisted dispatch payloads.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Alert {
    pub key: String,
    pub label: String,
    pub severity: AlertSeverity,
    pub current: f64,
    pub target: f64,
    pub comparator: Comparator,
}

impl AlertSeverity {
    fn status(self) -> SummaryStatus {
        match self {
            AlertSeverity::Warn => SummaryStatus::Warn,
            AlertSeverity::Fail => SummaryStatus::Fail,
        }
    }
}

/// Run the fixed check set against the aggregates. Pure.
pub fn evaluate(
    totals: &SummaryTotals,
    vitals: &BTreeMap<String, VitalStats>,
    funnels: &FunnelSummaries,
    thresholds: &SloThresholds,
) -> (Vec<Alert>, SummaryStatus) {
    let mut alerts = Vec::new();
    let min_samples = thresholds.min_samples;

    let vital_checks = [
        ("lcp", "LCP p75 (ms)", thresholds.lcp_p75_ms),
        ("inp", "INP p75 (ms)", thresholds.inp_p75_ms),
        ("cls", "CLS p75", thresholds.cls_p75),
        ("fcp", "FCP p75 (ms)", thresholds.fcp_p75_ms),
        ("ttfb", "TTFB p75 (ms)", thresholds.ttfb_p75_ms),
    ];
    for (name, label, target) in vital_checks {
        if let Some(stats) = vitals.get(name) {
            push_upper_bound_alert(
                &mut alerts,
                &format!("{}-p75", name),
                label,
                stats.p75,
                stats.count,
                target,
                min_samples,
            );
        }
    }

    push_upper_bound_alert(
        &mut alerts,
        "poor-vitals-rate",
        "Poor web-vitals rate",
        totals.poor_vitals_rate,
        totals.rated_vital_count,
        thresholds.poor_vitals_rate_max,
        min_samples,
    );

    push_lower_bound_alert(
        &mut alerts,
        "install-accept-rate",
        "Install prompt acceptance rate",
        funnels.install.accept_rate,
        funnels.install.prompt_shown,
        thresholds.install_accept_rate_min,
        min_samples,
    );

    push_lower_bound_alert(
        &mut alerts,
        "push-grant-rate",
        "Push permission grant rate",
        funnels.push.grant_rate,
        funnels.push.prompted,
        thresholds.push_grant_rate_min,
        min_samples,
    );

    push_upper_bound_alert(
        &mut alerts,
        "sw-failure-rate",
        "Service worker registration failure rate",
        funnels.service_worker.failure_rate,
        funnels.service_worker.attempts(),
        thresholds.sw_failure_rate_max,
        min_samples,
    );

    let status = alerts
        .iter()
        .map(|a| a.severity.status())
        .max()
        .unwrap_or(SummaryStatus::Pass);

    (alerts, status)
}

/// Alert when the value exceeds the target; fail past `target * 1.1`.
fn push_upper_bound_alert(
    alerts: &mut Vec<Alert>,
    key: &str,
    label: &str,
    current: Option<f64>,
    sample_count: u64,
    target: f64,
    min_samples: u64,
) {
    let Some(current) = current else { return };
    if sample_count < min_samples || current <= target {
        return;
    }
    let severity = if current > target * FAIL_OVERSHOOT {
        AlertSeverity::Fail
    } else {
        AlertSeverity::Warn
    };
    alerts.push(Alert {
        key: key.to_string(),
        label: label.to_string(),
        severity,
        current,
        target,
        comparator: Comparator::Lte,
    });
}

/// Alert when the value undershoots the target; fail below `target * 0.9`.
fn push_lower_bound_alert(
    alerts: &mut Vec<Alert>,
    key: &str,
    label: &str,
    current: Option<f64>,
    sample_count: u64,
    target: f64,
    min_samples: u64,
) {
    let Some(current) = current else { return };
    if sample_count < min_samples || current >= target {
        return;
    }
    let severity = if current < target * FAIL_UNDERSHOOT {
        AlertSeverity::Fail
    } else {
        AlertSeverity::Warn
    };
    alerts.push(Alert {
        key: key.to_string(),
        label: label.to_string(),
        severity,
        current,
        target,
        comparator: Comparator::Gte,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::summary::{
        InstallFunnel, PushFunnel, RatingHistogram, ServiceWorkerFunnel,
    };

    fn empty_totals() -> SummaryTotals {
        SummaryTotals {
            event_count: 0,
            web_vital_count: 0,
            lifecycle_count: 0,
            rated_vital_count: 0,
            events_per_minute: 0.0,
            poor_vitals_rate: None,
        }
    }

    fn empty_funnels() -> FunnelSummaries {
        FunnelSummaries {
            install: InstallFunnel {
                prompt_shown: 0,
                accepted: 0,
                dismissed: 0,
                installed: 0,
                accept_rate: None,
                install_rate: None,
            },
            push: PushFunnel {
                prompted: 0,
                granted: 0,
                denied: 0,
                grant_rate: None,
            },
            service_worker: ServiceWorkerFunnel {
                registered: 0,
                failed: 0,
                updated: 0,
                failure_rate: None,
            },
        }
    }

    fn lcp_stats(count: u64, p75: f64) -> BTreeMap<String, VitalStats> {
        let mut vitals = BTreeMap::new();
        vitals.insert(
            "lcp".to_string(),
            VitalStats {
                count,
                p75: Some(p75),
                p95: Some(p75),
                average: Some(p75),
                poor_rate: None,
                ratings: RatingHistogram::default(),
            },
        );
        vitals
    }

    #[test]
    fn test_no_alert_below_min_samples() {
        // 5 samples at 9000ms: far past the target, but statistically thin.
        let thresholds = SloThresholds::default();
        let (alerts, status) = evaluate(
            &empty_totals(),
            &lcp_stats(5, 9000.0),
            &empty_funnels(),
            &thresholds,
        );
        assert!(alerts.is_empty());
        assert_eq!(status, SummaryStatus::Pass);
    }

    #[test]
    fn test_upper_bound_warn_then_fail() {
        let thresholds = SloThresholds::default();

        // 2600 > 2500 but <= 2750: warn.
        let (alerts, status) = evaluate(
            &empty_totals(),
            &lcp_stats(40, 2600.0),
            &empty_funnels(),
            &thresholds,
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].severity, AlertSeverity::Warn);
        assert_eq!(alerts[0].comparator, Comparator::Lte);
        assert_eq!(status, SummaryStatus::Warn);

        // 3000 > 2750: fail.
        let (alerts, status) = evaluate(
            &empty_totals(),
            &lcp_stats(40, 3000.0),
            &empty_funnels(),
            &thresholds,
        );
        assert_eq!(alerts[0].severity, AlertSeverity::Fail);
        assert_eq!(status, SummaryStatus::Fail);

        // At the target exactly: no alert.
        let (alerts, _) = evaluate(
            &empty_totals(),
            &lcp_stats(40, 2500.0),
            &empty_funnels(),
            &thresholds,
        );
        assert!(alerts.is_empty());
    }

    #[test]
    fn test_lower_bound_funnel_alert() {
        let thresholds = SloThresholds::default();
        let mut funnels = empty_funnels();
        funnels.install.prompt_shown = 100;
        funnels.install.accepted = 4;
        funnels.install.accept_rate = Some(0.04);

        // 0.04 < 0.05 and < 0.05 * 0.9 = 0.045: fail.
        let (alerts, status) = evaluate(
            &empty_totals(),
            &BTreeMap::new(),
            &funnels,
            &thresholds,
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].key, "install-accept-rate");
        assert_eq!(alerts[0].severity, AlertSeverity::Fail);
        assert_eq!(alerts[0].comparator, Comparator::Gte);
        assert_eq!(status, SummaryStatus::Fail);

        // 0.047 sits between 0.045 and 0.05: warn.
        funnels.install.accept_rate = Some(0.047);
        let (alerts, status) = evaluate(
            &empty_totals(),
            &BTreeMap::new(),
            &funnels,
            &thresholds,
        );
        assert_eq!(alerts[0].severity, AlertSeverity::Warn);
        assert_eq!(status, SummaryStatus::Warn);
    }

    #[test]
    fn test_status_takes_worst_severity() {
        let thresholds = SloThresholds::default();
        let mut funnels = empty_funnels();
        // Push grant slightly under target: warn.
        funnels.push.prompted = 50;
        funnels.push.granted = 9;
        funnels.push.grant_rate = Some(0.19);

        // LCP far over target: fail.
        let (alerts, status) = evaluate(
            &empty_totals(),
            &lcp_stats(40, 9000.0),
            &funnels,
            &thresholds,
        );
        assert_eq!(alerts.len(), 2);
        assert_eq!(status, SummaryStatus::Fail);
    }

    #[test]
    fn test_poor_rate_check_uses_rated_sample_count() {
        let thresholds = SloThresholds::default();
        let mut totals = empty_totals();
        totals.poor_vitals_rate = Some(0.5);
        totals.rated_vital_count = 10;

        let (alerts, _) = evaluate(&totals, &BTreeMap::new(), &empty_funnels(), &thresholds);
        assert!(alerts.is_empty());

        totals.rated_vital_count = 40;
        let (alerts, _) = evaluate(&totals, &BTreeMap::new(), &empty_funnels(), &thresholds);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].key, "poor-vitals-rate");
        assert_eq!(alerts[0].severity, AlertSeverity::Fail);
    }
}
