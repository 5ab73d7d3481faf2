//! Live update frames fanned out to WebSocket subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Taxonomy of live update frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateKind {
    FloodUpdate,
    RiskUpdate,
    CriticalAlert,
    SystemStatus,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdateKind::FloodUpdate => write!(f, "flood_update"),
            UpdateKind::RiskUpdate => write!(f, "risk_update"),
            UpdateKind::CriticalAlert => write!(f, "critical_alert"),
            UpdateKind::SystemStatus => write!(f, "system_status"),
        }
    }
}

/// One frame on the live channel. Ephemeral: no per-subscriber queueing
/// beyond the broadcast buffer bound.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveUpdate {
    pub kind: UpdateKind,
    pub data: serde_json::Value,
    pub emitted_at: DateTime<Utc>,
}

impl LiveUpdate {
    pub fn new(kind: UpdateKind, data: serde_json::Value) -> Self {
        Self {
            kind,
            data,
            emitted_at: Utc::now(),
        }
    }
}
