//! Mission records for the orchestrator state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{Coord, RouteMode};

/// Typed mission request. A natural-language chat goes through an external
/// interpreter that returns one of these; an interpreter that cannot fill
/// the parameters yields a mission that fails with reason `underspecified`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "params", rename_all = "snake_case")]
pub enum MissionRequest {
    AssessRisk {
        location: String,
    },
    RouteCalculation {
        start: Coord,
        end: Coord,
        mode: RouteMode,
    },
    CoordinatedEvacuation {
        user_coord: Coord,
    },
    CascadeRiskUpdate,
}

impl MissionRequest {
    pub fn mission_type(&self) -> MissionType {
        match self {
            MissionRequest::AssessRisk { .. } => MissionType::AssessRisk,
            MissionRequest::RouteCalculation { .. } => MissionType::RouteCalculation,
            MissionRequest::CoordinatedEvacuation { .. } => MissionType::CoordinatedEvacuation,
            MissionRequest::CascadeRiskUpdate => MissionType::CascadeRiskUpdate,
        }
    }
}

/// Mission type discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissionType {
    AssessRisk,
    RouteCalculation,
    CoordinatedEvacuation,
    CascadeRiskUpdate,
}

impl fmt::Display for MissionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MissionType::AssessRisk => write!(f, "assess_risk"),
            MissionType::RouteCalculation => write!(f, "route_calculation"),
            MissionType::CoordinatedEvacuation => write!(f, "coordinated_evacuation"),
            MissionType::CascadeRiskUpdate => write!(f, "cascade_risk_update"),
        }
    }
}

/// Mission FSM states. Each `Awaiting*` state has a per-state timeout;
/// FAILURE or timeout in any of them transitions to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MissionState {
    Created,
    AwaitingScout,
    AwaitingFlood,
    AwaitingHazard,
    AwaitingRouting,
    AwaitingEvacuation,
    Completed,
    Failed,
}

impl MissionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, MissionState::Completed | MissionState::Failed)
    }
}

impl fmt::Display for MissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MissionState::Created => "CREATED",
            MissionState::AwaitingScout => "AWAITING_SCOUT",
            MissionState::AwaitingFlood => "AWAITING_FLOOD",
            MissionState::AwaitingHazard => "AWAITING_HAZARD",
            MissionState::AwaitingRouting => "AWAITING_ROUTING",
            MissionState::AwaitingEvacuation => "AWAITING_EVACUATION",
            MissionState::Completed => "COMPLETED",
            MissionState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// One mission owned by the orchestrator. Retained in a bounded ring
/// buffer after completion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MissionRecord {
    /// Short opaque id
    pub mission_id: String,
    pub mission_type: MissionType,
    pub state: MissionState,
    pub request: MissionRequest,
    /// Accumulated results per completed step (e.g. `locations_processed`,
    /// `data_points`, `edges_updated`, `route`, `shelter`)
    pub partial_results: serde_json::Map<String, serde_json::Value>,
    /// Structured reason, set when `state == Failed`
    pub reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MissionRecord {
    pub fn new(mission_id: String, request: MissionRequest) -> Self {
        Self {
            mission_id,
            mission_type: request.mission_type(),
            state: MissionState::Created,
            request,
            partial_results: serde_json::Map::new(),
            reason: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}
