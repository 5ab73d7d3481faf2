//! Risk-aware routing: A* over the edge-risk field and evacuation
//! shelter selection.

mod evacuation;
mod router;

pub use evacuation::{load_shelters, EvacuationAgent, EvacuationPlanner};
pub use router::{Router, RouterAgent, FALLBACK_WARNING};

use thiserror::Error;

use crate::graph::GraphError;

/// Routing failures surfaced to callers with a 4xx status.
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("coordinate ({lat:.5}, {lon:.5}) is outside the service area")]
    OutsideServiceArea { lat: f64, lon: f64 },
    #[error(transparent)]
    Graph(#[from] GraphError),
}
