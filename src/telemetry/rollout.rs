//! Deterministic percentage rollout gating.
//!
//! Independent of the telemetry pipeline: a pure decision function plus
//! small helpers for the persisted client state. Stability is the
//! correctness property: the same client identifier always lands in the
//! same bucket.

use rand::RngCore;
use serde::Serialize;

use crate::config::RolloutFlags;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloutReason {
    DisabledFlag,
    PercentZero,
    ManualOverride,
    PercentHundred,
    BucketIn,
    BucketOut,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RolloutDecision {
    pub enabled: bool,
    pub reason: RolloutReason,
    pub percent: u8,
    pub bucket: Option<u8>,
}

/// What an override token asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverrideAction {
    Enable,
    Disable,
    Clear,
}

/// Gate decision. Precedence: disable flag, percent zero, manual override,
/// percent hundred, hash bucket.
pub fn decide(
    flags: &RolloutFlags,
    manual_override: Option<bool>,
    client_id: &str,
) -> RolloutDecision {
    let percent = flags.rollout_percent.min(100);

    if !flags.pwa_enabled {
        return RolloutDecision {
            enabled: false,
            reason: RolloutReason::DisabledFlag,
            percent,
            bucket: None,
        };
    }
    if percent == 0 {
        return RolloutDecision {
            enabled: false,
            reason: RolloutReason::PercentZero,
            percent,
            bucket: None,
        };
    }
    if let Some(enabled) = manual_override {
        return RolloutDecision {
            enabled,
            reason: RolloutReason::ManualOverride,
            percent,
            bucket: None,
        };
    }
    if percent >= 100 {
        return RolloutDecision {
            enabled: true,
            reason: RolloutReason::PercentHundred,
            percent,
            bucket: None,
        };
    }

    let bucket = (fnv1a32(client_id.as_bytes()) % 100) as u8;
    let enabled = bucket < percent;
    RolloutDecision {
        enabled,
        reason: if enabled {
            RolloutReason::BucketIn
        } else {
            RolloutReason::BucketOut
        },
        percent,
        bucket: Some(bucket),
    }
}

/// 32-bit FNV-1a.
pub fn fnv1a32(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 0x811c_9dc5;
    for &b in bytes {
        hash ^= u32::from(b);
        hash = hash.wrapping_mul(0x0100_0193);
    }
    hash
}

/// Reuse a persisted client id, or mint a 16-hex-char one. Returns the id
/// and whether it was newly created; the caller owns persisting it.
pub fn ensure_client_id(existing: Option<&str>) -> (String, bool) {
    match existing {
        Some(id) if !id.trim().is_empty() => (id.trim().to_string(), false),
        _ => {
            let mut bytes = [0u8; 8];
            rand::thread_rng().fill_bytes(&mut bytes);
            (hex::encode(bytes), true)
        }
    }
}

/// Interpret a `pwa` override token from a query string.
pub fn parse_override(token: &str) -> Option<OverrideAction> {
    match token.trim().to_ascii_lowercase().as_str() {
        "on" | "1" | "true" => Some(OverrideAction::Enable),
        "off" | "0" | "false" => Some(OverrideAction::Disable),
        "clear" | "reset" => Some(OverrideAction::Clear),
        _ => None,
    }
}
