//! API route definitions
//!
//! Organizes the routing-service endpoints:
//! - /route, /evacuation-center, /feedback - client queries
//! - /health - agent statuses and graph state
//! - /admin/* - collection trigger, GeoTIFF scenario, stats, scout injection
//! - /orchestrator/mission - mission submission and inspection
//! - /ws/route-updates - live update stream

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, ApiState};
use super::ws;

/// Create all service routes.
pub fn api_routes(state: ApiState) -> Router {
    Router::new()
        .route("/route", post(handlers::post_route))
        .route("/evacuation-center", post(handlers::post_evacuation_center))
        .route("/feedback", post(handlers::post_feedback))
        .route("/health", get(handlers::get_health))
        // Admin surface
        .route("/admin/collect-flood-data", post(handlers::post_collect_now))
        .route("/admin/geotiff/enable", post(handlers::post_geotiff_enable))
        .route("/admin/geotiff/disable", post(handlers::post_geotiff_disable))
        .route("/admin/geotiff/status", get(handlers::get_geotiff_status))
        .route("/admin/geotiff/set-scenario", post(handlers::post_set_scenario))
        .route("/admin/scout/inject", post(handlers::post_scout_inject))
        .route("/admin/stats", get(handlers::get_admin_stats))
        // Missions
        .route("/orchestrator/mission", post(handlers::post_mission))
        .route("/orchestrator/mission/:id", get(handlers::get_mission))
        // Live updates
        .route("/ws/route-updates", get(ws::ws_route_updates))
        .with_state(state)
}
