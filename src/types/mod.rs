//! Shared data structures for the flood-aware routing pipeline
//!
//! This module defines the core types exchanged between the agents:
//! - Geographic primitives (coordinates, haversine distance)
//! - Hazard signals (hydrological samples, scout reports, scenarios)
//! - Fused risk records and histograms
//! - Route plans, evacuation results, and their status taxonomy
//! - Mission records for the orchestrator FSM
//! - Live updates fanned out on the broadcast channel

mod geo;
mod hazard;
mod live;
mod mission;
mod network;
mod route;

pub use geo::*;
pub use hazard::*;
pub use live::*;
pub use mission::*;
pub use network::*;
pub use route::*;
