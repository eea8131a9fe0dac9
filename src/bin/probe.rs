//! pulsegate-probe - operational probes for a pulsegate deployment.
//!
//! Usage: `pulsegate-probe <burnin|watch|rehearse>`, configured through
//! `PULSEGATE_PROBE_*` environment variables.

use pulsegate::probe::{
    run_burnin, run_rehearsal, run_watch, ProbeTarget, RehearsalConfig, WatchConfig,
};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mode = std::env::args().nth(1).unwrap_or_default();
    if mode.is_empty() {
        eprintln!("usage: pulsegate-probe <burnin|watch|rehearse>");
        std::process::exit(2);
    }

    let target = match ProbeTarget::from_env() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{}", e);
            std::process::exit(2);
        }
    };

    let code = match mode.as_str() {
        "burnin" => match run_burnin(&target).await {
            Ok(report) => {
                for check in &report.checks {
                    println!(
                        "{} {} ({}) {}",
                        if check.ok { "PASS" } else { "FAIL" },
                        check.name,
                        check
                            .status
                            .map(|s| s.to_string())
                            .unwrap_or_else(|| "-".to_string()),
                        check.detail.as_deref().unwrap_or(""),
                    );
                }
                if report.ok {
                    println!("burn-in passed");
                    0
                } else {
                    println!("burn-in FAILED");
                    1
                }
            }
            Err(e) => {
                eprintln!("burn-in error: {}", e);
                2
            }
        },
        "watch" => match run_watch(&target, &WatchConfig::from_env()).await {
            Ok(outcome) => {
                println!(
                    "watch finished: {} samples, aborted={}",
                    outcome.samples.len(),
                    outcome.aborted
                );
                if outcome.aborted {
                    1
                } else {
                    0
                }
            }
            Err(e) => {
                eprintln!("watch error: {}", e);
                2
            }
        },
        "rehearse" => match run_rehearsal(&target, &RehearsalConfig::from_env()).await {
            Ok(report) => {
                for step in &report.steps {
                    println!(
                        "{} {} {}",
                        if step.ok { "PASS" } else { "FAIL" },
                        step.name,
                        step.detail.as_deref().unwrap_or(""),
                    );
                }
                if report.ok {
                    0
                } else {
                    1
                }
            }
            Err(e) => {
                eprintln!("rehearsal error: {}", e);
                2
            }
        },
        other => {
            eprintln!("unknown mode: {}", other);
            eprintln!("usage: pulsegate-probe <burnin|watch|rehearse>");
            2
        }
    };

    std::process::exit(code);
}
