//! PWA telemetry SLO monitoring: event ingestion, dual-backend aggregation
//! with percentile statistics, threshold alert evaluation, deduplicated
//! webhook dispatch, rollout gating, and black-box operational probes.

pub mod config;
pub mod db;
pub mod probe;
pub mod telemetry;
pub mod web;
