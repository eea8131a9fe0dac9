//! SQLite database store implementation.

use chrono::{DateTime, Duration as ChronoDuration, NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Result as SqlResult};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;

use super::models::*;
use crate::telemetry::event::{DisplayMode, EventType, NormalizedEvent, Rating};
use crate::telemetry::summary::SummarizeOptions;

/// Database error types.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Migration error: {0}")]
    Migration(String),
}

/// Upper bound on rows fetched for one summary query.
pub const MAX_EVENT_FETCH: i64 = 50_000;

const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.9f";

/// Thread-safe database store.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    /// Create a new store with the given database path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DbError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init()?;
        Ok(store)
    }

    /// Initialize the database with migrations.
    fn init(&self) -> Result<(), DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(include_str!("../../migrations/000001_init.up.sql"))
            .map_err(|e| DbError::Migration(format!("Migration 1 failed: {}", e)))?;
        Ok(())
    }

    // --- Telemetry events ---

    /// Insert normalized events in one transaction.
    pub fn persist_events(&self, events: &[NormalizedEvent]) -> Result<usize, DbError> {
        if events.is_empty() {
            return Ok(0);
        }

        let conn = self.conn.lock().unwrap();
        let tx = conn.unchecked_transaction()?;

        {
            let mut stmt = tx.prepare(
                "INSERT INTO telemetry_events (time, event_type, name, path, value, rating, display_mode)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;

            for e in events {
                stmt.execute(params![
                    e.ts.format(TIME_FORMAT).to_string(),
                    e.event_type.as_str(),
                    e.name,
                    e.path,
                    e.value,
                    e.rating.map(|r| r.as_str()),
                    e.display_mode.as_str(),
                ])?;
            }
        }

        tx.commit()?;
        Ok(events.len())
    }

    /// Events within the summary window, display-mode filtered in SQL and
    /// path-prefix filtered after mapping, bounded by `MAX_EVENT_FETCH`.
    pub fn events_in_window(
        &self,
        opts: &SummarizeOptions,
        now: DateTime<Utc>,
    ) -> Result<Vec<NormalizedEvent>, DbError> {
        let start = now - ChronoDuration::minutes(opts.window_minutes);
        let start_str = start.format(TIME_FORMAT).to_string();

        let conn = self.conn.lock().unwrap();
        let mut events = if let Some(mode) = opts.display_mode.as_mode_str() {
            let mut stmt = conn.prepare(
                "SELECT time, event_type, name, path, value, rating, display_mode
                 FROM telemetry_events
                 WHERE time >= ?1 AND display_mode = ?2
                 ORDER BY time ASC LIMIT ?3",
            )?;
            let rows = stmt
                .query_map(params![start_str, mode, MAX_EVENT_FETCH], row_to_event)?
                .collect::<SqlResult<Vec<_>>>()?;
            rows
        } else {
            let mut stmt = conn.prepare(
                "SELECT time, event_type, name, path, value, rating, display_mode
                 FROM telemetry_events
                 WHERE time >= ?1
                 ORDER BY time ASC LIMIT ?2",
            )?;
            let rows = stmt
                .query_map(params![start_str, MAX_EVENT_FETCH], row_to_event)?
                .collect::<SqlResult<Vec<_>>>()?;
            rows
        };

        if let Some(prefix) = opts.path_prefix.as_deref() {
            events.retain(|e| e.path.starts_with(prefix));
        }

        Ok(events)
    }

    // --- Alert dispatches ---

    /// Insert a dispatch record and return its ID.
    pub fn insert_dispatch(&self, record: &DispatchRecord) -> Result<i64, DbError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO alert_dispatches
             (created_at, fingerprint, delivery_status, summary_status, alert_count,
              window_minutes, display_mode, path_prefix, payload, triggered_by, delivery_error)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                record.created_at.format(TIME_FORMAT).to_string(),
                record.fingerprint,
                record.delivery_status.as_str(),
                record.summary_status,
                record.alert_count,
                record.window_minutes,
                record.display_mode,
                record.path_prefix,
                record.payload,
                record.triggered_by,
                record.delivery_error,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Most recent successful dispatch for a fingerprint since the cutoff.
    pub fn find_sent_dispatch(
        &self,
        fingerprint: &str,
        since: DateTime<Utc>,
    ) -> Result<Option<DispatchRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let record = conn
            .query_row(
                "SELECT id, created_at, fingerprint, delivery_status, summary_status, alert_count,
                        window_minutes, display_mode, path_prefix, payload, triggered_by, delivery_error
                 FROM alert_dispatches
                 WHERE fingerprint = ?1 AND delivery_status = 'sent' AND created_at >= ?2
                 ORDER BY created_at DESC LIMIT 1",
                params![fingerprint, since.format(TIME_FORMAT).to_string()],
                row_to_dispatch,
            )
            .optional()?;
        Ok(record)
    }

    /// Dispatch history, newest first.
    pub fn recent_dispatches(&self, limit: i64) -> Result<Vec<DispatchRecord>, DbError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, created_at, fingerprint, delivery_status, summary_status, alert_count,
                    window_minutes, display_mode, path_prefix, payload, triggered_by, delivery_error
             FROM alert_dispatches
             ORDER BY created_at DESC, id DESC LIMIT ?1",
        )?;
        let records = stmt
            .query_map(params![limit], row_to_dispatch)?
            .collect::<SqlResult<Vec<_>>>()?;
        Ok(records)
    }

    // --- Retention ---

    /// Delete events and dispatch rows past their retention windows. Runs
    /// from the alert-check cycle rather than a scheduler of its own.
    pub fn cleanup_retention(
        &self,
        now: DateTime<Utc>,
        event_days: i64,
        dispatch_days: i64,
    ) -> Result<RetentionOutcome, DbError> {
        let events_cutoff = now - ChronoDuration::days(event_days);
        let dispatches_cutoff = now - ChronoDuration::days(dispatch_days);

        let conn = self.conn.lock().unwrap();
        let events_deleted = conn.execute(
            "DELETE FROM telemetry_events WHERE time < ?1",
            params![events_cutoff.format(TIME_FORMAT).to_string()],
        )?;
        let dispatches_deleted = conn.execute(
            "DELETE FROM alert_dispatches WHERE created_at < ?1",
            params![dispatches_cutoff.format(TIME_FORMAT).to_string()],
        )?;

        Ok(RetentionOutcome {
            events_deleted,
            dispatches_deleted,
            events_cutoff,
            dispatches_cutoff,
        })
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> SqlResult<NormalizedEvent> {
    let time_str: String = row.get(0)?;
    let type_str: String = row.get(1)?;
    let rating_str: Option<String> = row.get(5)?;
    let mode_str: String = row.get(6)?;

    Ok(NormalizedEvent {
        event_type: EventType::parse(&type_str).unwrap_or(EventType::PwaLifecycle),
        name: row.get(2)?,
        ts: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        path: row.get(3)?,
        value: row.get(4)?,
        rating: rating_str.as_deref().and_then(Rating::parse),
        display_mode: DisplayMode::parse(&mode_str),
    })
}

fn row_to_dispatch(row: &rusqlite::Row<'_>) -> SqlResult<DispatchRecord> {
    let time_str: String = row.get(1)?;
    let status_str: String = row.get(3)?;

    Ok(DispatchRecord {
        id: row.get(0)?,
        created_at: parse_db_time(&time_str).unwrap_or_else(Utc::now),
        fingerprint: row.get(2)?,
        delivery_status: DispatchStatus::parse(&status_str).unwrap_or(DispatchStatus::Failed),
        summary_status: row.get(4)?,
        alert_count: row.get(5)?,
        window_minutes: row.get(6)?,
        display_mode: row.get(7)?,
        path_prefix: row.get(8)?,
        payload: row.get(9)?,
        triggered_by: row.get(10)?,
        delivery_error: row.get(11)?,
    })
}

/// Parse a datetime string from the database.
fn parse_db_time(s: &str) -> Option<DateTime<Utc>> {
    // Try various formats
    let formats = [
        "%Y-%m-%d %H:%M:%S%.9f",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%dT%H:%M:%S%.9fZ",
        "%Y-%m-%dT%H:%M:%SZ",
    ];

    for fmt in &formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(DateTime::from_naive_utc_and_offset(dt, Utc));
        }
    }

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }

    None
}
