//! API route handlers
//!
//! Request handling logic for the routing surface: route and evacuation
//! queries, feedback intake, health/stats, GeoTIFF scenario admin, and
//! mission submission. Handlers stay thin: they validate, delegate to the
//! components, and wrap the result in the response envelope.

use std::sync::{Arc, Mutex};

use axum::extract::{Path, State};
use axum::response::Response;
use axum::Json;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::envelope::{ApiErrorResponse, ApiResponse};
use crate::broadcast::Broadcaster;
use crate::bus::{agent_ids, Envelope, MessageBus, Payload};
use crate::collectors::{FloodCollectorStats, ScoutCollectorStats};
use crate::graph::RoadGraph;
use crate::hazard::{HazardStats, ScenarioHandle};
use crate::orchestrator::{new_mission_id, MissionStore};
use crate::routing::{EvacuationPlanner, RouteError, Router};
use crate::scheduler::{SchedulerHandle, SchedulerStats};
use crate::types::{
    Coord, MissionRequest, ReportType, RouteMode, Scenario, ScoutReport,
};

/// Sender id used by the HTTP surface on the bus.
const API_SENDER: &str = "api";

// ============================================================================
// API State
// ============================================================================

/// Aggregated per-component statistics handles.
#[derive(Clone)]
pub struct SystemStats {
    pub hazard: Arc<Mutex<HazardStats>>,
    pub flood: Arc<Mutex<FloodCollectorStats>>,
    pub scout: Arc<Mutex<ScoutCollectorStats>>,
    pub scheduler: Arc<Mutex<SchedulerStats>>,
}

impl SystemStats {
    pub fn new() -> Self {
        Self {
            hazard: Arc::new(Mutex::new(HazardStats::default())),
            flood: Arc::new(Mutex::new(FloodCollectorStats::default())),
            scout: Arc::new(Mutex::new(ScoutCollectorStats::default())),
            scheduler: Arc::new(Mutex::new(SchedulerStats::default())),
        }
    }
}

impl Default for SystemStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub graph: Arc<RoadGraph>,
    pub router: Router,
    pub evacuation: Arc<EvacuationPlanner>,
    pub bus: Arc<MessageBus>,
    pub broadcaster: Broadcaster,
    pub scenario: Arc<ScenarioHandle>,
    pub missions: Arc<Mutex<MissionStore>>,
    pub scheduler: SchedulerHandle,
    pub stats: SystemStats,
}

// ============================================================================
// Route Endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct RouteRequestBody {
    pub start: [f64; 2],
    pub end: [f64; 2],
    #[serde(default)]
    pub preferences: RoutePreferences,
    /// Explicit mode wins over preferences when present
    #[serde(default)]
    pub mode: Option<RouteMode>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RoutePreferences {
    #[serde(default)]
    pub avoid_floods: bool,
    #[serde(default)]
    pub fastest: bool,
}

impl RoutePreferences {
    /// Preference flags → objective preset.
    fn mode(&self) -> RouteMode {
        if self.avoid_floods {
            RouteMode::Safest
        } else if self.fastest {
            RouteMode::Fastest
        } else {
            RouteMode::Balanced
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RouteResponseBody {
    pub route_id: String,
    #[serde(flatten)]
    pub plan: crate::types::RoutePlan,
    /// Freshness of the risk field the route was computed against
    pub risk_last_updated: Option<chrono::DateTime<Utc>>,
}

/// POST /route - Risk-aware route between two coordinates
pub async fn post_route(
    State(state): State<ApiState>,
    Json(body): Json<RouteRequestBody>,
) -> Response {
    let start = Coord::from(body.start);
    let end = Coord::from(body.end);
    if !start.is_finite() || !end.is_finite() {
        return ApiErrorResponse::bad_request("coordinates must be finite numbers");
    }
    let mode = body.mode.unwrap_or_else(|| body.preferences.mode());

    match state.router.route(&start, &end, mode) {
        Ok(plan) => ApiResponse::ok(RouteResponseBody {
            route_id: new_mission_id(),
            plan,
            risk_last_updated: state.graph.risk_last_updated(),
        }),
        Err(e @ RouteError::OutsideServiceArea { .. }) => {
            ApiErrorResponse::bad_request(e.to_string())
        }
        Err(RouteError::Graph(e)) => ApiErrorResponse::bad_request(e.to_string()),
    }
}

// ============================================================================
// Evacuation Endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct EvacuationRequestBody {
    pub location: [f64; 2],
}

/// POST /evacuation-center - Best reachable shelter plus the route to it
pub async fn post_evacuation_center(
    State(state): State<ApiState>,
    Json(body): Json<EvacuationRequestBody>,
) -> Response {
    let location = Coord::from(body.location);
    if !location.is_finite() {
        return ApiErrorResponse::bad_request("coordinates must be finite numbers");
    }

    match state.evacuation.plan(&location) {
        Ok(Some(plan)) => ApiResponse::ok(serde_json::json!({
            "status": "success",
            "shelter": plan.shelter,
            "route": plan.route,
            "score": plan.score,
        })),
        Ok(None) => ApiResponse::ok(serde_json::json!({
            "status": "no_safe_shelter",
        })),
        Err(e @ RouteError::OutsideServiceArea { .. }) => {
            ApiErrorResponse::bad_request(e.to_string())
        }
        Err(RouteError::Graph(e)) => ApiErrorResponse::bad_request(e.to_string()),
    }
}

// ============================================================================
// Feedback Endpoint
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct FeedbackBody {
    pub route_id: String,
    pub feedback_type: String,
    pub location: [f64; 2],
    pub severity: f64,
    #[serde(default)]
    pub description: Option<String>,
}

/// POST /feedback - User feedback on a route, folded into the scout intake
pub async fn post_feedback(
    State(state): State<ApiState>,
    Json(body): Json<FeedbackBody>,
) -> Response {
    let report_type = match body.feedback_type.as_str() {
        "clear" => ReportType::Clear,
        "blocked" => ReportType::Blocked,
        "flooded" => ReportType::Flood,
        "traffic" => ReportType::Traffic,
        other => {
            return ApiErrorResponse::unprocessable(format!(
                "unknown feedback_type '{other}', expected clear|blocked|flooded|traffic"
            ))
        }
    };
    let location = Coord::from(body.location);
    if !location.is_finite() || !(0.0..=1.0).contains(&body.severity) {
        return ApiErrorResponse::unprocessable("location must be finite and severity in [0,1]");
    }

    let area = &crate::config::get().service_area;
    let coord = area.contains(location.lat, location.lon).then_some(location);

    let is_flood_related = matches!(report_type, ReportType::Flood | ReportType::Blocked);
    let report = ScoutReport {
        text: body
            .description
            .unwrap_or_else(|| format!("route feedback: {}", body.feedback_type)),
        location_name: None,
        coord,
        severity: if is_flood_related { body.severity } else { 0.0 },
        // Direct user feedback outranks scraped chatter
        confidence: 0.9,
        report_type,
        is_flood_related,
        observed_at: Utc::now(),
    }
    .clamped();

    let has_coordinates = report.coord.is_some();
    let envelope = Envelope::inform(
        API_SENDER,
        agent_ids::HAZARD,
        Payload::ScoutReportBatch {
            reports: vec![report],
            has_coordinates,
        },
    );
    if let Err(e) = state.bus.send(envelope) {
        warn!(error = %e, "Failed to forward feedback to hazard core");
        return ApiErrorResponse::internal("feedback could not be queued");
    }

    ApiResponse::ok(serde_json::json!({
        "accepted": true,
        "route_id": body.route_id,
    }))
}

// ============================================================================
// Health / Stats Endpoints
// ============================================================================

/// GET /health - Agent statuses and graph load state
pub async fn get_health(State(state): State<ApiState>) -> Response {
    let hazard = state.stats.hazard.lock().expect("stats poisoned").clone();
    let flood = state.stats.flood.lock().expect("stats poisoned").clone();
    let scout = state.stats.scout.lock().expect("stats poisoned").clone();
    let missions = state.missions.lock().expect("mission store poisoned");

    ApiResponse::ok(serde_json::json!({
        "status": "ok",
        "graph": {
            "nodes": state.graph.node_count(),
            "edges": state.graph.edge_count(),
            "risk_last_updated": state.graph.risk_last_updated(),
            "histogram": state.graph.risk_histogram(),
        },
        "agents": {
            "hazard": { "passes": hazard.passes, "failures": hazard.failures },
            "flood_collector": { "runs": flood.total_runs, "failed": flood.failed_runs },
            "scout_collector": { "polls": scout.polls },
            "orchestrator": {
                "active_missions": missions.active_count(),
                "completed_missions": missions.history_count(),
            },
        },
        "broadcast_subscribers": state.broadcaster.subscriber_count(),
        "shelters": state.evacuation.shelter_count(),
    }))
}

/// GET /admin/stats - Full per-component counters
pub async fn get_admin_stats(State(state): State<ApiState>) -> Response {
    let hazard = state.stats.hazard.lock().expect("stats poisoned").clone();
    let flood = state.stats.flood.lock().expect("stats poisoned").clone();
    let scout = state.stats.scout.lock().expect("stats poisoned").clone();
    let scheduler = state.stats.scheduler.lock().expect("stats poisoned").clone();

    ApiResponse::ok(serde_json::json!({
        "hazard": hazard,
        "flood_collector": flood,
        "scout_collector": scout,
        "scheduler": scheduler,
        "bus_dropped": state.bus.dropped_count(),
        "broadcast_published": state.broadcaster.published_count(),
    }))
}

/// POST /admin/collect-flood-data - Fire one collection round now
pub async fn post_collect_now(State(state): State<ApiState>) -> Response {
    state.scheduler.trigger_now();
    let flood = state.stats.flood.lock().expect("stats poisoned").clone();
    ApiResponse::ok(serde_json::json!({
        "triggered": true,
        "collector": flood,
    }))
}

// ============================================================================
// GeoTIFF Scenario Admin
// ============================================================================

fn scenario_json(scenario: &Scenario) -> serde_json::Value {
    serde_json::json!({
        "return_period": scenario.return_period,
        "time_step": scenario.time_step,
        "geotiff_enabled": scenario.geotiff_enabled,
    })
}

fn send_hazard_request(state: &ApiState, payload: Payload) -> Result<(), Response> {
    let envelope = Envelope::request(
        API_SENDER,
        agent_ids::HAZARD,
        payload,
        format!("admin-{}", new_mission_id()),
    );
    state.bus.send(envelope).map_err(|e| {
        warn!(error = %e, "Failed to queue hazard admin request");
        ApiErrorResponse::internal("hazard agent unavailable")
    })
}

/// POST /admin/geotiff/enable
pub async fn post_geotiff_enable(State(state): State<ApiState>) -> Response {
    if let Err(resp) = send_hazard_request(&state, Payload::SetGeotiffEnabled { enabled: true }) {
        return resp;
    }
    let mut scenario = state.scenario.get();
    scenario.geotiff_enabled = true;
    ApiResponse::ok(scenario_json(&scenario))
}

/// POST /admin/geotiff/disable
pub async fn post_geotiff_disable(State(state): State<ApiState>) -> Response {
    if let Err(resp) = send_hazard_request(&state, Payload::SetGeotiffEnabled { enabled: false }) {
        return resp;
    }
    let mut scenario = state.scenario.get();
    scenario.geotiff_enabled = false;
    ApiResponse::ok(scenario_json(&scenario))
}

/// GET /admin/geotiff/status
pub async fn get_geotiff_status(State(state): State<ApiState>) -> Response {
    ApiResponse::ok(scenario_json(&state.scenario.get()))
}

#[derive(Debug, Deserialize)]
pub struct SetScenarioBody {
    pub rp: String,
    pub ts: u8,
}

/// POST /admin/geotiff/set-scenario
pub async fn post_set_scenario(
    State(state): State<ApiState>,
    Json(body): Json<SetScenarioBody>,
) -> Response {
    let (return_period, time_step) = match Scenario::validate(&body.rp, body.ts) {
        Ok(pair) => pair,
        Err(msg) => return ApiErrorResponse::bad_request(msg),
    };

    if let Err(resp) = send_hazard_request(
        &state,
        Payload::SetScenario {
            return_period,
            time_step,
        },
    ) {
        return resp;
    }

    let mut scenario = state.scenario.get();
    scenario.return_period = return_period;
    scenario.time_step = time_step;
    ApiResponse::ok(scenario_json(&scenario))
}

// ============================================================================
// Scout Injection (test / ops)
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct InjectScoutBody {
    pub text: String,
    #[serde(default)]
    pub location_name: Option<String>,
    #[serde(default)]
    pub coord: Option<[f64; 2]>,
    pub severity: f64,
    pub confidence: f64,
}

/// POST /admin/scout/inject - Inject a synthetic scout report
pub async fn post_scout_inject(
    State(state): State<ApiState>,
    Json(body): Json<InjectScoutBody>,
) -> Response {
    let coord = body.coord.map(Coord::from);
    if let Some(c) = &coord {
        let area = &crate::config::get().service_area;
        if !c.is_finite() || !area.contains(c.lat, c.lon) {
            return ApiErrorResponse::bad_request("coord outside service area");
        }
    }

    let report = ScoutReport {
        text: body.text,
        location_name: body.location_name,
        coord,
        severity: body.severity,
        confidence: body.confidence,
        report_type: ReportType::Flood,
        is_flood_related: true,
        observed_at: Utc::now(),
    }
    .clamped();

    let has_coordinates = report.coord.is_some();
    let envelope = Envelope::inform(
        API_SENDER,
        agent_ids::HAZARD,
        Payload::ScoutReportBatch {
            reports: vec![report],
            has_coordinates,
        },
    );
    if let Err(e) = state.bus.send(envelope) {
        warn!(error = %e, "Failed to queue injected scout report");
        return ApiErrorResponse::internal("hazard agent unavailable");
    }
    ApiResponse::ok(serde_json::json!({ "accepted": true }))
}

// ============================================================================
// Missions
// ============================================================================

/// POST /orchestrator/mission - Submit a mission (non-blocking)
pub async fn post_mission(
    State(state): State<ApiState>,
    Json(request): Json<MissionRequest>,
) -> Response {
    let mission_id = new_mission_id();
    let envelope = Envelope::request(
        API_SENDER,
        agent_ids::ORCHESTRATOR,
        Payload::StartMission {
            mission_id: mission_id.clone(),
            request,
        },
        mission_id.clone(),
    );
    if let Err(e) = state.bus.send(envelope) {
        warn!(error = %e, "Failed to queue mission");
        return ApiErrorResponse::internal("orchestrator unavailable");
    }
    ApiResponse::ok(serde_json::json!({ "mission_id": mission_id }))
}

/// GET /orchestrator/mission/{id} - Mission record with partial results
pub async fn get_mission(
    State(state): State<ApiState>,
    Path(mission_id): Path<String>,
) -> Response {
    let store = state.missions.lock().expect("mission store poisoned");
    match store.get(&mission_id) {
        Some(record) => ApiResponse::ok(record),
        None => ApiErrorResponse::not_found(format!("unknown mission '{mission_id}'")),
    }
}
