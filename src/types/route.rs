//! Route planning types: request modes, plans, totals, and the evacuation
//! selection result.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Coord;

/// Objective profile for a routing query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RouteMode {
    Safest,
    #[default]
    Balanced,
    Fastest,
}

impl fmt::Display for RouteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMode::Safest => write!(f, "safest"),
            RouteMode::Balanced => write!(f, "balanced"),
            RouteMode::Fastest => write!(f, "fastest"),
        }
    }
}

/// Outcome discriminator carried on every routing response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteStatus {
    /// A path satisfying the requested mode's risk filter was found
    Success,
    /// The safest filter failed but the looser fallback found a path
    NoSafeRoute,
    /// No path exists below the impassability cap
    Impassable,
}

/// Aggregate metrics of a computed route.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RouteTotals {
    pub distance_m: f64,
    /// Fixed 30 km/h urban assumption; not traffic-aware
    pub estimated_time_min: f64,
    pub max_risk: f64,
    pub mean_risk_length_weighted: f64,
}

/// A computed route: node sequence, drawable geometry, totals, warnings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutePlan {
    pub status: RouteStatus,
    pub mode: RouteMode,
    /// Node ids from start snap to end snap; empty unless `Success`/`NoSafeRoute`
    pub nodes: Vec<i64>,
    /// Concatenated edge geometry as (lat, lon) points
    pub geometry: Vec<Coord>,
    pub totals: Option<RouteTotals>,
    pub warnings: Vec<String>,
}

impl RoutePlan {
    /// An impassable result with an explanatory warning.
    pub fn impassable(mode: RouteMode, reason: impl Into<String>) -> Self {
        Self {
            status: RouteStatus::Impassable,
            mode,
            nodes: Vec::new(),
            geometry: Vec::new(),
            totals: None,
            warnings: vec![reason.into()],
        }
    }
}

/// One evacuation center from the static shelter registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Shelter {
    pub name: String,
    pub coord: Coord,
    pub capacity: u32,
    #[serde(rename = "type")]
    pub shelter_type: String,
    pub barangay: String,
}

/// Result of evacuation planning: the chosen shelter and the safest route
/// to it, or `None` when every candidate is impassable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvacuationPlan {
    pub shelter: Shelter,
    pub route: RoutePlan,
    /// `distance_m + λ · max_risk` — lower is better
    pub score: f64,
}
