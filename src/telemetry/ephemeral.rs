//! In-process telemetry event buffer.
//!
//! Process-wide, time-bounded buffer of normalized events. Reset on restart;
//! the durable store is the system of record when enabled and this buffer is
//! the fallback. Callers supply `now` so tests control the clock.

use chrono::{DateTime, Duration, Utc};
use std::sync::Mutex;

use crate::telemetry::event::NormalizedEvent;

/// Hard cap on buffered events; pruning trims oldest-first past this.
pub const MAX_BUFFERED_EVENTS: usize = 60_000;
/// Events older than this are dropped when pruning runs.
pub const RETENTION_HOURS: i64 = 24;
/// Minimum spacing between age-based prunes on the write path.
pub const PRUNE_INTERVAL_SECS: i64 = 10;

/// Bounded in-memory event store. The server runtime is multi-threaded, so
/// the buffer and its prune timestamp sit behind a mutex.
pub struct EphemeralStore {
    inner: Mutex<Inner>,
}

struct Inner {
    events: Vec<NormalizedEvent>,
    last_prune: DateTime<Utc>,
}

impl EphemeralStore {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            inner: Mutex::new(Inner {
                events: Vec::new(),
                last_prune: now,
            }),
        }
    }

    /// Append a batch, then prune if the prune interval elapsed or the
    /// buffer is over cap.
    pub fn record(&self, events: &[NormalizedEvent], now: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        inner.events.extend_from_slice(events);

        let interval_elapsed =
            now - inner.last_prune > Duration::seconds(PRUNE_INTERVAL_SECS);
        if interval_elapsed || inner.events.len() > MAX_BUFFERED_EVENTS {
            prune(&mut inner, now);
        }
    }

    /// Snapshot of the retained events. The summarizer applies the tighter
    /// query window itself.
    pub fn snapshot(&self) -> Vec<NormalizedEvent> {
        self.inner.lock().unwrap().events.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn prune(inner: &mut Inner, now: DateTime<Utc>) {
    let cutoff = now - Duration::hours(RETENTION_HOURS);
    inner.events.retain(|e| e.ts >= cutoff);

    if inner.events.len() > MAX_BUFFERED_EVENTS {
        let excess = inner.events.len() - MAX_BUFFERED_EVENTS;
        inner.events.drain(..excess);
    }
    inner.last_prune = now;
}
