//! Street network schema: road classes and the serialized graph file format.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Coord;

/// Functional class of a road segment. Drives the risk multiplier table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RoadClass {
    Primary,
    Secondary,
    Tertiary,
    Residential,
    Service,
    Bridge,
    Highway,
}

impl RoadClass {
    pub const ALL: [RoadClass; 7] = [
        RoadClass::Primary,
        RoadClass::Secondary,
        RoadClass::Tertiary,
        RoadClass::Residential,
        RoadClass::Service,
        RoadClass::Bridge,
        RoadClass::Highway,
    ];
}

impl fmt::Display for RoadClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoadClass::Primary => "primary",
            RoadClass::Secondary => "secondary",
            RoadClass::Tertiary => "tertiary",
            RoadClass::Residential => "residential",
            RoadClass::Service => "service",
            RoadClass::Bridge => "bridge",
            RoadClass::Highway => "highway",
        };
        f.write_str(s)
    }
}

/// One node row of the serialized street network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    pub id: i64,
    pub lat: f64,
    pub lon: f64,
}

/// One edge row of the serialized street network. `(u, v, k)` identifies
/// the edge; `k` disambiguates parallel edges between the same endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeRecord {
    pub u: i64,
    pub v: i64,
    pub k: u32,
    pub length_m: f64,
    pub road_class: RoadClass,
    /// Optional polyline; a straight line between endpoints when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub geometry: Option<Vec<Coord>>,
}

/// The on-disk street network file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkFile {
    pub nodes: Vec<NodeRecord>,
    pub edges: Vec<EdgeRecord>,
}
