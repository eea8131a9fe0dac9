//! Database module for pulsegate.
//!
//! SQLite storage for durable telemetry events and the alert dispatch
//! audit trail, with an embedded migration applied at startup.

mod models;
mod store;

pub use models::*;
pub use store::*;
