//! FIPA-ACL-shaped message envelopes exchanged between agents.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{
    Coord, EvacuationPlan, HydroSample, ReturnPeriod, RouteMode, RoutePlan, ScoutReport,
    StationStatus,
};

/// Speech act of an envelope.
///
/// INFORM is a unidirectional notification, REQUEST asks for an action,
/// CONFIRM/FAILURE are the positive and negative replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Performative {
    Inform,
    Request,
    Confirm,
    Failure,
}

impl fmt::Display for Performative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Performative::Inform => write!(f, "INFORM"),
            Performative::Request => write!(f, "REQUEST"),
            Performative::Confirm => write!(f, "CONFIRM"),
            Performative::Failure => write!(f, "FAILURE"),
        }
    }
}

/// Typed payload of an envelope. The bus never matches on this; only the
/// receiving agent does.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Payload {
    /// Latest hydrological telemetry from the flood collector
    FloodDataBatch { samples: Vec<HydroSample> },
    /// Classified crowdsourced reports from the scout collector
    ScoutReportBatch {
        reports: Vec<ScoutReport>,
        has_coordinates: bool,
    },
    /// Run a collection round immediately
    CollectNow,
    /// Poll the scout feed immediately
    ScoutPollNow,
    /// Run a fusion pass immediately
    FuseNow,
    /// Fuse with attention on one named location (mission assess_risk)
    AssessLocation { location: String },
    /// Switch the active flood scenario
    SetScenario {
        return_period: ReturnPeriod,
        time_step: u8,
    },
    /// Toggle the GeoTIFF contribution
    SetGeotiffEnabled { enabled: bool },
    /// Begin a mission (HTTP surface → orchestrator)
    StartMission {
        mission_id: String,
        request: crate::types::MissionRequest,
    },
    /// Compute a route between two coordinates
    RouteRequest {
        start: Coord,
        end: Coord,
        mode: RouteMode,
    },
    /// Routing outcome
    RouteResult { plan: RoutePlan },
    /// Select the best reachable shelter for a user location
    EvacuationRequest { user_coord: Coord },
    /// Evacuation outcome; `None` when no shelter is reachable
    EvacuationResult { plan: Option<EvacuationPlan> },
    /// Positive reply with a step summary
    Confirm { summary: serde_json::Value },
    /// Negative reply with a structured reason
    Failure { reason: String },
}

impl Payload {
    /// Wire name of the payload variant.
    pub fn content_type(&self) -> &'static str {
        match self {
            Payload::FloodDataBatch { .. } => "flood_data_batch",
            Payload::ScoutReportBatch { .. } => "scout_report_batch",
            Payload::CollectNow => "collect_now",
            Payload::ScoutPollNow => "scout_poll_now",
            Payload::FuseNow => "fuse_now",
            Payload::StartMission { .. } => "start_mission",
            Payload::AssessLocation { .. } => "assess_location",
            Payload::SetScenario { .. } => "set_scenario",
            Payload::SetGeotiffEnabled { .. } => "set_geotiff_enabled",
            Payload::RouteRequest { .. } => "route_request",
            Payload::RouteResult { .. } => "route_result",
            Payload::EvacuationRequest { .. } => "evacuation_request",
            Payload::EvacuationResult { .. } => "evacuation_result",
            Payload::Confirm { .. } => "confirm",
            Payload::Failure { .. } => "failure",
        }
    }
}

/// One message on the bus. Created by senders; consumed exactly once by
/// the receiver's loop. The bus stamps `seq` at send time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub performative: Performative,
    pub sender_id: String,
    pub receiver_id: String,
    pub payload: Payload,
    /// Correlates a CONFIRM/FAILURE with its REQUEST
    pub conversation_id: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Monotone per-bus sequence number, stamped at send
    #[serde(default)]
    pub seq: u64,
}

impl Envelope {
    pub fn inform(sender: &str, receiver: &str, payload: Payload) -> Self {
        Self::new(Performative::Inform, sender, receiver, payload, None)
    }

    pub fn request(
        sender: &str,
        receiver: &str,
        payload: Payload,
        conversation_id: impl Into<String>,
    ) -> Self {
        Self::new(
            Performative::Request,
            sender,
            receiver,
            payload,
            Some(conversation_id.into()),
        )
    }

    /// CONFIRM reply to a REQUEST, carrying its conversation id back.
    pub fn confirm_to(request: &Envelope, sender: &str, summary: serde_json::Value) -> Self {
        Self::new(
            Performative::Confirm,
            sender,
            &request.sender_id,
            Payload::Confirm { summary },
            request.conversation_id.clone(),
        )
    }

    /// CONFIRM reply carrying a typed payload (route/evacuation results).
    pub fn reply_to(request: &Envelope, sender: &str, payload: Payload) -> Self {
        Self::new(
            Performative::Confirm,
            sender,
            &request.sender_id,
            payload,
            request.conversation_id.clone(),
        )
    }

    /// FAILURE reply to a REQUEST, carrying its conversation id back.
    pub fn failure_to(request: &Envelope, sender: &str, reason: impl Into<String>) -> Self {
        Self::new(
            Performative::Failure,
            sender,
            &request.sender_id,
            Payload::Failure {
                reason: reason.into(),
            },
            request.conversation_id.clone(),
        )
    }

    fn new(
        performative: Performative,
        sender: &str,
        receiver: &str,
        payload: Payload,
        conversation_id: Option<String>,
    ) -> Self {
        Self {
            performative,
            sender_id: sender.to_string(),
            receiver_id: receiver.to_string(),
            payload,
            conversation_id,
            created_at: Utc::now(),
            seq: 0,
        }
    }

    /// Whether the mailbox soft cap may discard this envelope. Only plain
    /// INFORMs are droppable; batches carrying a CRITICAL station survive.
    pub fn droppable(&self) -> bool {
        if self.performative != Performative::Inform {
            return false;
        }
        match &self.payload {
            Payload::FloodDataBatch { samples } => {
                !samples.iter().any(|s| s.status == StationStatus::Critical)
            }
            _ => true,
        }
    }
}
