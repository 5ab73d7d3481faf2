//! AGOS: Flood-Aware Route Optimization for the Marikina Road Network
//!
//! Multi-agent architecture for hazard fusion and risk-aware routing.
//!
//! ## Architecture
//!
//! - **Graph**: immutable street topology with an atomically swappable
//!   per-edge risk field and spatial indexes
//! - **Raster catalog**: lazily loaded GeoTIFF flood-depth tiles
//! - **Hazard core**: fuses official telemetry, flood rasters, and
//!   crowdsourced reports into the risk field
//! - **Collectors**: flood telemetry and scout report ingestion
//! - **Router / Evacuation**: risk-aware A* and shelter selection
//! - **Bus / Scheduler / Orchestrator / Broadcaster**: typed mailboxes,
//!   periodic collection, mission workflows, and the live update channel

pub mod api;
pub mod broadcast;
pub mod bus;
pub mod collectors;
pub mod config;
pub mod graph;
pub mod hazard;
pub mod orchestrator;
pub mod raster;
pub mod risk;
pub mod routing;
pub mod scheduler;
pub mod types;

// Re-export the service configuration
pub use config::AgosConfig;

// Re-export commonly used types
pub use types::{
    Coord, EvacuationPlan, FusedLocationRisk, HydroKind, HydroSample, LiveUpdate, MissionRecord,
    MissionRequest, MissionState, MissionType, ReturnPeriod, RiskHistogram, RoadClass, RouteMode,
    RoutePlan, RouteStatus, Scenario, ScoutReport, Shelter, StationStatus, UpdateKind,
};

// Re-export the core components
pub use broadcast::Broadcaster;
pub use bus::{agent_ids, Envelope, MessageBus, Payload, Performative};
pub use graph::{EdgeId, GraphError, RoadGraph};
pub use hazard::{HazardAgent, ScenarioHandle};
pub use raster::FloodCatalog;
pub use routing::{EvacuationPlanner, RouteError, Router};
