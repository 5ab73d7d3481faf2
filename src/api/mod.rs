//! HTTP/WebSocket surface using Axum
//!
//! Exposes the routing queries, evacuation planning, feedback intake,
//! scenario administration, mission orchestration, and the live update
//! stream. Transport only: every decision is delegated to the components.

pub mod envelope;
pub mod handlers;
mod routes;
mod ws;

pub use handlers::{ApiState, SystemStats};

use axum::Router;
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};

/// Create the complete application router.
pub fn create_app(state: ApiState) -> Router {
    // CORS configuration (permissive for development)
    let cors = CorsLayer::permissive();

    routes::api_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(cors)
}
