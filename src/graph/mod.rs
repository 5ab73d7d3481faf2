//! Street graph with a mutable per-edge risk field and spatial indexes.
//!
//! Topology is immutable after load. The risk field lives beside the
//! topology in an [`ArcSwap`] so a fusion pass can replace the whole field
//! atomically: readers either see the pre-pass field or the post-pass
//! field, never a partial mix, and are never blocked.
//!
//! Only the hazard core writes risk; the router and evacuation planner are
//! read-only consumers.

mod loader;
mod spatial;

pub use loader::load_network;
pub use spatial::GridIndex;

use arc_swap::ArcSwap;
use chrono::{DateTime, Utc};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

use crate::config;
use crate::config::defaults;
use crate::types::{Coord, NetworkFile, RiskHistogram, RoadClass};

/// Dense edge identifier: index into the edge table and the risk field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EdgeId(pub usize);

/// Immutable attributes of one directed edge.
#[derive(Debug, Clone)]
pub struct EdgeInfo {
    pub id: EdgeId,
    /// External key `(u, v, k)`; `k` disambiguates parallel edges
    pub u: i64,
    pub v: i64,
    pub k: u32,
    pub from: NodeIndex,
    pub to: NodeIndex,
    pub length_m: f64,
    pub road_class: RoadClass,
    /// Polyline when the source network carries one
    pub geometry: Option<Vec<Coord>>,
    pub midpoint: Coord,
}

impl EdgeInfo {
    /// Drawable geometry: the stored polyline, or the straight segment
    /// between the endpoints.
    pub fn polyline(&self, graph: &RoadGraph) -> Vec<Coord> {
        match &self.geometry {
            Some(g) => g.clone(),
            None => vec![graph.node_coord_by_index(self.from), graph.node_coord_by_index(self.to)],
        }
    }
}

/// Mutable risk state of one edge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RiskCell {
    /// In `[0, 1]`; writes are total overwrites by the hazard core
    pub risk: f64,
    pub last_updated: DateTime<Utc>,
}

/// The complete per-edge risk field, swapped atomically by fusion passes.
pub type RiskField = Vec<RiskCell>;

/// Graph operation failures.
#[derive(Debug, Error)]
pub enum GraphError {
    #[error("no node within {cap_m:.0} m of ({lat:.5}, {lon:.5})")]
    NoNearbyNode { lat: f64, lon: f64, cap_m: f64 },
    #[error("unknown node {0}")]
    UnknownNode(i64),
    #[error("unknown edge ({0}, {1}, {2})")]
    UnknownEdge(i64, i64, u32),
    #[error("edge index {0} out of range")]
    UnknownEdgeId(usize),
    #[error("edge ({u}, {v}, {k}) references missing node {missing}")]
    MissingEndpoint { u: i64, v: i64, k: u32, missing: i64 },
    #[error("duplicate edge key ({0}, {1}, {2})")]
    DuplicateEdge(i64, i64, u32),
    #[error("duplicate node id {0}")]
    DuplicateNode(i64),
    #[error("node {id} has non-finite coordinate ({lat}, {lon})")]
    BadCoordinate { id: i64, lat: f64, lon: f64 },
}

/// The street network: immutable topology, spatial indexes, and the
/// atomically swappable risk field.
pub struct RoadGraph {
    topo: DiGraph<Coord, EdgeId>,
    node_ids: Vec<i64>,
    node_index: HashMap<i64, NodeIndex>,
    edges: Vec<EdgeInfo>,
    edge_index: HashMap<(i64, i64, u32), EdgeId>,
    node_grid: GridIndex,
    edge_grid: GridIndex,
    risk: ArcSwap<RiskField>,
}

impl RoadGraph {
    /// Build the graph from parsed network records.
    pub fn from_records(file: NetworkFile) -> Result<Self, GraphError> {
        let grid_origin = Coord::new(
            config::get().service_area.lat_min,
            config::get().service_area.lon_min,
        );

        let mut topo = DiGraph::with_capacity(file.nodes.len(), file.edges.len());
        let mut node_ids = Vec::with_capacity(file.nodes.len());
        let mut node_index = HashMap::with_capacity(file.nodes.len());
        let mut node_grid = GridIndex::new(grid_origin, defaults::SPATIAL_GRID_CELL_M);

        for node in &file.nodes {
            if !node.lat.is_finite() || !node.lon.is_finite() {
                return Err(GraphError::BadCoordinate {
                    id: node.id,
                    lat: node.lat,
                    lon: node.lon,
                });
            }
            let coord = Coord::new(node.lat, node.lon);
            let idx = topo.add_node(coord);
            if node_index.insert(node.id, idx).is_some() {
                return Err(GraphError::DuplicateNode(node.id));
            }
            node_grid.insert(idx.index(), coord);
            node_ids.push(node.id);
        }

        let mut edges = Vec::with_capacity(file.edges.len());
        let mut edge_index = HashMap::with_capacity(file.edges.len());
        let mut edge_grid = GridIndex::new(grid_origin, defaults::SPATIAL_GRID_CELL_M);

        for record in &file.edges {
            let from = *node_index.get(&record.u).ok_or(GraphError::MissingEndpoint {
                u: record.u,
                v: record.v,
                k: record.k,
                missing: record.u,
            })?;
            let to = *node_index.get(&record.v).ok_or(GraphError::MissingEndpoint {
                u: record.u,
                v: record.v,
                k: record.k,
                missing: record.v,
            })?;

            let id = EdgeId(edges.len());
            if edge_index.insert((record.u, record.v, record.k), id).is_some() {
                return Err(GraphError::DuplicateEdge(record.u, record.v, record.k));
            }

            // Midpoint: central polyline vertex when geometry exists, else
            // the chord midpoint. Feeds the radius index and raster sampling.
            let midpoint = match &record.geometry {
                Some(g) if !g.is_empty() => g[g.len() / 2],
                _ => topo[from].midpoint(&topo[to]),
            };

            topo.add_edge(from, to, id);
            edge_grid.insert(id.0, midpoint);
            edges.push(EdgeInfo {
                id,
                u: record.u,
                v: record.v,
                k: record.k,
                from,
                to,
                length_m: record.length_m,
                road_class: record.road_class,
                geometry: record.geometry.clone(),
                midpoint,
            });
        }

        let now = Utc::now();
        let risk_field: RiskField = (0..edges.len())
            .map(|_| RiskCell {
                risk: 0.0,
                last_updated: now,
            })
            .collect();

        Ok(Self {
            topo,
            node_ids,
            node_index,
            edges,
            edge_index,
            node_grid,
            edge_grid,
            risk: ArcSwap::from_pointee(risk_field),
        })
    }

    pub fn node_count(&self) -> usize {
        self.topo.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// External node id for a topology index.
    pub fn node_id(&self, idx: NodeIndex) -> i64 {
        self.node_ids[idx.index()]
    }

    /// Topology index for an external node id.
    pub fn node_by_id(&self, id: i64) -> Result<NodeIndex, GraphError> {
        self.node_index.get(&id).copied().ok_or(GraphError::UnknownNode(id))
    }

    pub fn node_coord(&self, id: i64) -> Result<Coord, GraphError> {
        Ok(self.topo[self.node_by_id(id)?])
    }

    pub fn node_coord_by_index(&self, idx: NodeIndex) -> Coord {
        self.topo[idx]
    }

    /// Edge attributes by dense id.
    pub fn edge(&self, id: EdgeId) -> &EdgeInfo {
        &self.edges[id.0]
    }

    /// Dense id for an external `(u, v, k)` key.
    pub fn edge_by_key(&self, u: i64, v: i64, k: u32) -> Result<EdgeId, GraphError> {
        self.edge_index
            .get(&(u, v, k))
            .copied()
            .ok_or(GraphError::UnknownEdge(u, v, k))
    }

    /// Outgoing edges of a node, sorted by edge id for deterministic
    /// expansion order.
    pub fn out_edges(&self, node: NodeIndex) -> Vec<EdgeId> {
        let mut out: Vec<EdgeId> = self.topo.edges(node).map(|e| *e.weight()).collect();
        out.sort_unstable();
        out
    }

    /// Nearest node to a free coordinate, by haversine distance.
    ///
    /// Fails with [`GraphError::NoNearbyNode`] beyond the configured cap.
    pub fn snap(&self, coord: &Coord) -> Result<i64, GraphError> {
        self.snap_index(coord).map(|idx| self.node_id(idx))
    }

    /// As [`snap`](Self::snap), returning the topology index.
    pub fn snap_index(&self, coord: &Coord) -> Result<NodeIndex, GraphError> {
        let cap = config::get().service_area.snap_max_distance_m;
        self.node_grid
            .nearest(coord, cap)
            .map(|(idx, _)| NodeIndex::new(idx))
            .ok_or(GraphError::NoNearbyNode {
                lat: coord.lat,
                lon: coord.lon,
                cap_m: cap,
            })
    }

    /// Edges whose midpoint lies within `radius_m` of `center`, sorted by
    /// edge id.
    pub fn edges_within(&self, center: &Coord, radius_m: f64) -> Vec<EdgeId> {
        self.edge_grid
            .within(center, radius_m)
            .into_iter()
            .map(EdgeId)
            .collect()
    }

    /// Current risk of one edge.
    pub fn risk(&self, id: EdgeId) -> f64 {
        self.risk.load()[id.0].risk
    }

    /// Snapshot handle of the whole risk field. The snapshot stays
    /// consistent for as long as the guard is held, regardless of
    /// concurrent fusion swaps.
    pub fn risk_field(&self) -> Arc<RiskField> {
        self.risk.load_full()
    }

    /// Overwrite one edge's risk with the clamped value and stamp
    /// `last_updated`. Idempotent.
    pub fn set_risk(&self, id: EdgeId, value: f64) -> Result<(), GraphError> {
        if id.0 >= self.edges.len() {
            return Err(GraphError::UnknownEdgeId(id.0));
        }
        let mut field: RiskField = (**self.risk.load()).clone();
        field[id.0] = RiskCell {
            risk: value.clamp(0.0, 1.0),
            last_updated: Utc::now(),
        };
        self.risk.store(Arc::new(field));
        Ok(())
    }

    /// Replace the entire risk field in one atomic swap. Values are
    /// clamped; every cell is stamped with `at`.
    pub fn swap_risk_field(&self, risks: Vec<f64>, at: DateTime<Utc>) -> Result<(), GraphError> {
        debug_assert_eq!(risks.len(), self.edges.len());
        let field: RiskField = risks
            .into_iter()
            .map(|r| RiskCell {
                risk: r.clamp(0.0, 1.0),
                last_updated: at,
            })
            .collect();
        self.risk.store(Arc::new(field));
        Ok(())
    }

    /// Timestamp of the most recent risk write.
    pub fn risk_last_updated(&self) -> Option<DateTime<Utc>> {
        self.risk.load().iter().map(|c| c.last_updated).max()
    }

    /// Band counts over the current risk field.
    pub fn risk_histogram(&self) -> RiskHistogram {
        let field = self.risk.load();
        let mut hist = RiskHistogram::default();
        for cell in field.iter() {
            if cell.risk < defaults::HISTOGRAM_LOW_BELOW {
                hist.low += 1;
            } else if cell.risk < defaults::HISTOGRAM_MODERATE_BELOW {
                hist.moderate += 1;
            } else if cell.risk < defaults::HISTOGRAM_HIGH_BELOW {
                hist.high += 1;
            } else {
                hist.critical += 1;
            }
        }
        hist
    }
}
