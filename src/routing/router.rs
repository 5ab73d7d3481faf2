//! Risk-aware A* router with three objective profiles.
//!
//! Edge cost is `length_m · (W_dist + W_risk · risk)`; the haversine
//! heuristic scaled by `W_dist` is a lower bound on remaining cost (risk
//! is non-negative), so A* stays admissible. The hard risk filter is
//! applied as edge suppression during expansion. Expansion order and the
//! predecessor tie-break both go by smaller edge id, so identical inputs
//! always yield the identical path.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use petgraph::graph::NodeIndex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::RouteError;
use crate::bus::{agent_ids, Envelope, MessageBus, Payload, Performative};
use crate::config;
use crate::config::defaults;
use crate::graph::{EdgeId, RiskField, RoadGraph};
use crate::types::{Coord, RouteMode, RoutePlan, RouteStatus, RouteTotals};

/// Warning emitted when the safest filter found nothing and the looser
/// fallback profile was used instead.
pub const FALLBACK_WARNING: &str = "FASTEST MODE FALLBACK";

/// Resolved weight/filter profile for one query.
#[derive(Debug, Clone, Copy)]
struct ModeProfile {
    w_dist: f64,
    w_risk: f64,
    /// Edge suppressed when `risk > cap` (safest) or `risk >= cap` (others)
    risk_cap: f64,
    cap_exclusive: bool,
}

impl ModeProfile {
    fn for_mode(mode: RouteMode) -> Self {
        let cfg = &config::get().router;
        match mode {
            RouteMode::Safest => Self {
                w_dist: cfg.safest_w_dist,
                w_risk: cfg.safest_w_risk,
                risk_cap: cfg.safest_risk_cap,
                cap_exclusive: false,
            },
            RouteMode::Balanced => Self {
                w_dist: cfg.balanced_w_dist,
                w_risk: cfg.balanced_w_risk,
                risk_cap: defaults::IMPASSABLE_RISK,
                cap_exclusive: true,
            },
            RouteMode::Fastest => Self {
                w_dist: cfg.fastest_w_dist,
                w_risk: cfg.fastest_w_risk,
                risk_cap: defaults::IMPASSABLE_RISK,
                cap_exclusive: true,
            },
        }
    }

    fn passes(&self, risk: f64) -> bool {
        if self.cap_exclusive {
            risk < self.risk_cap
        } else {
            risk <= self.risk_cap
        }
    }

    fn edge_cost(&self, length_m: f64, risk: f64) -> f64 {
        length_m * (self.w_dist + self.w_risk * risk)
    }
}

/// Open-set entry. Ordered by f-score ascending (the heap is a max-heap,
/// so comparisons are reversed), with node index as the final tie-break.
struct OpenEntry {
    f: f64,
    node: NodeIndex,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f == other.f && self.node == other.node
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f
            .partial_cmp(&self.f)
            .unwrap_or(Ordering::Equal)
            .then_with(|| other.node.index().cmp(&self.node.index()))
    }
}

/// The routing engine. Cheap to clone; shared by the HTTP layer, the
/// router agent, and the evacuation planner.
#[derive(Clone)]
pub struct Router {
    graph: Arc<RoadGraph>,
}

impl Router {
    pub fn new(graph: Arc<RoadGraph>) -> Self {
        Self { graph }
    }

    /// Route between two free coordinates under the given mode.
    ///
    /// Both endpoints must fall inside the service-area bounding box and
    /// snap to the network. A safest-mode query with no admissible path is
    /// retried once under the fastest profile and tagged; if that also
    /// fails the result is `impassable`.
    pub fn route(&self, start: &Coord, end: &Coord, mode: RouteMode) -> Result<RoutePlan, RouteError> {
        let area = &config::get().service_area;
        for coord in [start, end] {
            if !coord.is_finite() || !area.contains(coord.lat, coord.lon) {
                return Err(RouteError::OutsideServiceArea {
                    lat: coord.lat,
                    lon: coord.lon,
                });
            }
        }

        let from = self.graph.snap_index(start)?;
        let to = self.graph.snap_index(end)?;
        Ok(self.route_between(from, to, mode))
    }

    /// Route between two already-snapped nodes. A single risk-field
    /// snapshot backs the whole query, so a concurrent fusion pass cannot
    /// produce a mixed view.
    pub fn route_between(&self, from: NodeIndex, to: NodeIndex, mode: RouteMode) -> RoutePlan {
        let field = self.graph.risk_field();

        if let Some(edges) = self.astar(&field, from, to, ModeProfile::for_mode(mode)) {
            return self.assemble(mode, RouteStatus::Success, &field, from, &edges, Vec::new());
        }

        if mode == RouteMode::Safest {
            // One retry under the loosest profile; the impassability gate
            // (risk ≥ 1.0) still applies.
            if let Some(edges) = self.astar(
                &field,
                from,
                to,
                ModeProfile::for_mode(RouteMode::Fastest),
            ) {
                warn!("Safest profile exhausted, falling back to fastest");
                return self.assemble(
                    mode,
                    RouteStatus::NoSafeRoute,
                    &field,
                    from,
                    &edges,
                    vec![FALLBACK_WARNING.to_string()],
                );
            }
        }

        RoutePlan::impassable(mode, "IMPASSABLE: no route found below risk cap")
    }

    /// Deterministic A* over the adjacency lists. Returns the edge
    /// sequence of the optimal path, or `None` when the goal is
    /// unreachable under the profile's filter.
    fn astar(
        &self,
        field: &RiskField,
        from: NodeIndex,
        to: NodeIndex,
        profile: ModeProfile,
    ) -> Option<Vec<EdgeId>> {
        let goal = self.graph.node_coord_by_index(to);

        let mut g_score: HashMap<NodeIndex, f64> = HashMap::new();
        let mut came_from: HashMap<NodeIndex, (NodeIndex, EdgeId)> = HashMap::new();
        let mut open = BinaryHeap::new();

        g_score.insert(from, 0.0);
        open.push(OpenEntry {
            f: self.heuristic(from, &goal, profile),
            node: from,
        });

        while let Some(OpenEntry { f, node }) = open.pop() {
            if node == to {
                return Some(self.reconstruct(&came_from, from, to));
            }
            // Stale heap entry: a better g-score was found after this push
            let g = g_score[&node];
            if f > g + self.heuristic(node, &goal, profile) + 1e-9 {
                continue;
            }

            for edge_id in self.graph.out_edges(node) {
                let edge = self.graph.edge(edge_id);
                let risk = field[edge_id.0].risk;
                if !profile.passes(risk) {
                    continue;
                }

                let tentative = g + profile.edge_cost(edge.length_m, risk);
                let next = edge.to;
                let improves = match g_score.get(&next) {
                    None => true,
                    Some(&existing) => {
                        tentative < existing
                            || (tentative == existing
                                && came_from.get(&next).is_some_and(|(_, e)| edge_id < *e))
                    }
                };
                if improves {
                    g_score.insert(next, tentative);
                    came_from.insert(next, (node, edge_id));
                    open.push(OpenEntry {
                        f: tentative + self.heuristic(next, &goal, profile),
                        node: next,
                    });
                }
            }
        }

        None
    }

    fn heuristic(&self, node: NodeIndex, goal: &Coord, profile: ModeProfile) -> f64 {
        self.graph.node_coord_by_index(node).haversine_m(goal) * profile.w_dist
    }

    fn reconstruct(
        &self,
        came_from: &HashMap<NodeIndex, (NodeIndex, EdgeId)>,
        from: NodeIndex,
        to: NodeIndex,
    ) -> Vec<EdgeId> {
        let mut edges = Vec::new();
        let mut cursor = to;
        while cursor != from {
            let (prev, edge) = came_from[&cursor];
            edges.push(edge);
            cursor = prev;
        }
        edges.reverse();
        edges
    }

    /// Build the full plan: node sequence, concatenated geometry, totals,
    /// and risk warnings.
    fn assemble(
        &self,
        mode: RouteMode,
        status: RouteStatus,
        field: &RiskField,
        from: NodeIndex,
        edges: &[EdgeId],
        mut warnings: Vec<String>,
    ) -> RoutePlan {
        let mut nodes = vec![self.graph.node_id(from)];
        let mut geometry: Vec<Coord> = vec![self.graph.node_coord_by_index(from)];
        let mut distance_m = 0.0;
        let mut max_risk: f64 = 0.0;
        let mut risk_length = 0.0;

        for &edge_id in edges {
            let edge = self.graph.edge(edge_id);
            let risk = field[edge_id.0].risk;
            nodes.push(self.graph.node_id(edge.to));
            distance_m += edge.length_m;
            max_risk = max_risk.max(risk);
            risk_length += risk * edge.length_m;

            let polyline = edge.polyline(&self.graph);
            // Skip the joint point shared with the previous segment
            let skip = usize::from(!geometry.is_empty() && !polyline.is_empty());
            geometry.extend(polyline.into_iter().skip(skip));
        }

        if max_risk >= defaults::CRITICAL_RISK_THRESHOLD {
            warnings.push(format!(
                "CRITICAL: route traverses a {:.2} risk segment",
                max_risk
            ));
        } else if max_risk >= defaults::WARN_HIGH_RISK {
            warnings.push(format!(
                "WARNING: route traverses HIGH risk segment ({:.2} >= 0.7)",
                max_risk
            ));
        }

        let totals = RouteTotals {
            distance_m,
            estimated_time_min: distance_m / defaults::URBAN_SPEED_M_PER_MIN,
            max_risk,
            mean_risk_length_weighted: if distance_m > 0.0 {
                risk_length / distance_m
            } else {
                0.0
            },
        };

        RoutePlan {
            status,
            mode,
            nodes,
            geometry,
            totals: Some(totals),
            warnings,
        }
    }
}

/// Bus-facing wrapper: answers `route_request` REQUESTs from the
/// orchestrator with typed `route_result` CONFIRMs.
pub struct RouterAgent {
    router: Router,
    bus: Arc<MessageBus>,
}

impl RouterAgent {
    pub fn new(router: Router, bus: Arc<MessageBus>) -> Self {
        Self { router, bus }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("[Router] Agent starting");
        let poll = Duration::from_secs(defaults::MAILBOX_POLL_TIMEOUT_SECS);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Router] Received shutdown signal");
                    return;
                }
                received = self.bus.receive(agent_ids::ROUTER, poll) => {
                    match received {
                        Ok(Some(envelope)) => self.handle(envelope),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "Router mailbox error");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn handle(&self, envelope: Envelope) {
        let (Performative::Request, Payload::RouteRequest { start, end, mode }) =
            (&envelope.performative, &envelope.payload)
        else {
            warn!(
                content_type = envelope.payload.content_type(),
                "Unexpected envelope at router agent, ignoring"
            );
            return;
        };

        let reply = match self.router.route(start, end, *mode) {
            Ok(plan) => Envelope::reply_to(&envelope, agent_ids::ROUTER, Payload::RouteResult { plan }),
            Err(e) => Envelope::failure_to(&envelope, agent_ids::ROUTER, e.to_string()),
        };
        if let Err(e) = self.bus.send(reply) {
            warn!(error = %e, "Failed to reply to route request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EdgeRecord, NetworkFile, NodeRecord, RoadClass};
    use chrono::Utc;

    /// 3×3 block grid, 500 m spacing, bidirectional residential streets:
    ///
    /// ```text
    ///   1 — 2 — 3
    ///   |   |   |
    ///   4 — 5 — 6
    ///   |   |   |
    ///   7 — 8 — 9
    /// ```
    fn grid_graph() -> Arc<RoadGraph> {
        let coords = [
            (1, 14.6540, 121.1000),
            (2, 14.6540, 121.1046),
            (3, 14.6540, 121.1092),
            (4, 14.6495, 121.1000),
            (5, 14.6495, 121.1046),
            (6, 14.6495, 121.1092),
            (7, 14.6450, 121.1000),
            (8, 14.6450, 121.1046),
            (9, 14.6450, 121.1092),
        ];
        let nodes = coords
            .iter()
            .map(|&(id, lat, lon)| NodeRecord { id, lat, lon })
            .collect();

        let links = [
            (1, 2), (2, 3), (4, 5), (5, 6), (7, 8), (8, 9), // rows
            (1, 4), (4, 7), (2, 5), (5, 8), (3, 6), (6, 9), // columns
        ];
        let mut edges = Vec::new();
        for &(u, v) in &links {
            for (a, b) in [(u, v), (v, u)] {
                edges.push(EdgeRecord {
                    u: a,
                    v: b,
                    k: 0,
                    length_m: 500.0,
                    road_class: RoadClass::Residential,
                    geometry: None,
                });
            }
        }
        Arc::new(RoadGraph::from_records(NetworkFile { nodes, edges }).unwrap())
    }

    fn set_edge_risk(graph: &RoadGraph, u: i64, v: i64, risk: f64) {
        for (a, b) in [(u, v), (v, u)] {
            let id = graph.edge_by_key(a, b, 0).unwrap();
            graph.set_risk(id, risk).unwrap();
        }
    }

    fn coord_of(graph: &RoadGraph, id: i64) -> Coord {
        graph.node_coord(id).unwrap()
    }

    #[test]
    fn test_clear_weather_route_straight() {
        let graph = grid_graph();
        let router = Router::new(graph.clone());
        let plan = router
            .route(&coord_of(&graph, 1), &coord_of(&graph, 3), RouteMode::Balanced)
            .unwrap();

        assert_eq!(plan.status, RouteStatus::Success);
        assert_eq!(plan.nodes, vec![1, 2, 3]);
        let totals = plan.totals.unwrap();
        assert!((totals.distance_m - 1000.0).abs() < 1e-9);
        assert_eq!(totals.max_risk, 0.0);
        assert!((totals.estimated_time_min - 2.0).abs() < 1e-9);
        assert!(plan.warnings.is_empty());
    }

    #[test]
    fn test_risky_corridor_forces_detour() {
        let graph = grid_graph();
        // Block the middle of the top row hard for safest mode
        set_edge_risk(&graph, 2, 3, 0.95);
        let router = Router::new(graph.clone());

        let plan = router
            .route(&coord_of(&graph, 1), &coord_of(&graph, 3), RouteMode::Safest)
            .unwrap();
        assert_eq!(plan.status, RouteStatus::Success);
        assert!(!plan.nodes.windows(2).any(|w| w == [2, 3]), "must avoid 2→3: {:?}", plan.nodes);
        let totals = plan.totals.unwrap();
        assert!(totals.max_risk <= 0.9);
        assert!(totals.distance_m >= 1000.0 * 1.1, "detour must be longer");
    }

    #[test]
    fn test_balanced_tolerates_high_risk_edge() {
        let graph = grid_graph();
        set_edge_risk(&graph, 2, 3, 0.95);
        let router = Router::new(graph.clone());

        // Balanced only excludes risk ≥ 1.0; crossing may still win if shorter,
        // but the cost model makes the detour cheaper here. Either way the
        // mode's own filter must hold.
        let plan = router
            .route(&coord_of(&graph, 1), &coord_of(&graph, 3), RouteMode::Balanced)
            .unwrap();
        assert_eq!(plan.status, RouteStatus::Success);
        assert!(plan.totals.unwrap().max_risk < 1.0);
    }

    #[test]
    fn test_safest_fallback_when_cut() {
        let graph = grid_graph();
        // Sever node 3 for safest (risk 0.95 > 0.9) but leave it passable
        // for the fallback profile (< 1.0)
        set_edge_risk(&graph, 2, 3, 0.95);
        set_edge_risk(&graph, 6, 3, 0.95);
        let router = Router::new(graph.clone());

        let plan = router
            .route(&coord_of(&graph, 1), &coord_of(&graph, 3), RouteMode::Safest)
            .unwrap();
        assert_eq!(plan.status, RouteStatus::NoSafeRoute);
        assert!(plan.warnings.iter().any(|w| w == FALLBACK_WARNING));
        assert!(plan.totals.unwrap().max_risk >= 0.9);
    }

    #[test]
    fn test_impassable_when_fully_cut() {
        let graph = grid_graph();
        set_edge_risk(&graph, 2, 3, 1.0);
        set_edge_risk(&graph, 6, 3, 1.0);
        let router = Router::new(graph.clone());

        let plan = router
            .route(&coord_of(&graph, 1), &coord_of(&graph, 3), RouteMode::Safest)
            .unwrap();
        assert_eq!(plan.status, RouteStatus::Impassable);
        assert!(plan.nodes.is_empty());
        assert!(plan.warnings.iter().any(|w| w.starts_with("IMPASSABLE")));
    }

    #[test]
    fn test_outside_service_area_rejected() {
        let graph = grid_graph();
        let router = Router::new(graph.clone());
        let err = router
            .route(&Coord::new(13.0, 121.1046), &coord_of(&graph, 3), RouteMode::Balanced)
            .unwrap_err();
        assert!(matches!(err, RouteError::OutsideServiceArea { .. }));
    }

    #[test]
    fn test_deterministic_across_runs() {
        let graph = grid_graph();
        set_edge_risk(&graph, 2, 5, 0.4);
        set_edge_risk(&graph, 4, 5, 0.2);
        let router = Router::new(graph.clone());

        let a = router
            .route(&coord_of(&graph, 1), &coord_of(&graph, 9), RouteMode::Balanced)
            .unwrap();
        for _ in 0..5 {
            let b = router
                .route(&coord_of(&graph, 1), &coord_of(&graph, 9), RouteMode::Balanced)
                .unwrap();
            assert_eq!(a.nodes, b.nodes);
        }
    }

    #[test]
    fn test_monotone_in_risk() {
        let graph = grid_graph();
        let router = Router::new(graph.clone());
        let start = coord_of(&graph, 1);
        let end = coord_of(&graph, 9);

        let baseline = router.route(&start, &end, RouteMode::Balanced).unwrap();
        let base_cost = baseline.totals.unwrap();

        // Raise risk on an edge of the chosen path (still passable)
        let first_pair = [baseline.nodes[0], baseline.nodes[1]];
        set_edge_risk(&graph, first_pair[0], first_pair[1], 0.5);

        let after = router.route(&start, &end, RouteMode::Balanced).unwrap();
        let after_totals = after.totals.unwrap();
        // Total weighted cost cannot decrease when an edge's risk rises
        let cost = |t: &RouteTotals| {
            t.distance_m * 0.5 + 0.5 * t.mean_risk_length_weighted * t.distance_m
        };
        assert!(cost(&after_totals) >= cost(&base_cost) - 1e-9);
    }

    #[test]
    fn test_warning_bands() {
        let graph = grid_graph();
        set_edge_risk(&graph, 1, 2, 0.75);
        let router = Router::new(graph.clone());
        let plan = router
            .route(&coord_of(&graph, 1), &coord_of(&graph, 2), RouteMode::Fastest)
            .unwrap();
        assert!(plan.warnings.iter().any(|w| w.starts_with("WARNING")));

        set_edge_risk(&graph, 1, 2, 0.88);
        let plan = router
            .route(&coord_of(&graph, 1), &coord_of(&graph, 2), RouteMode::Fastest)
            .unwrap();
        assert!(plan.warnings.iter().any(|w| w.starts_with("CRITICAL")));
    }

    #[tokio::test]
    async fn test_router_agent_replies() {
        let graph = grid_graph();
        let bus = Arc::new(MessageBus::with_soft_cap(100));
        bus.register(agent_ids::ROUTER).unwrap();
        bus.register(agent_ids::ORCHESTRATOR).unwrap();
        let agent = RouterAgent::new(Router::new(graph.clone()), bus.clone());

        agent.handle(Envelope::request(
            agent_ids::ORCHESTRATOR,
            agent_ids::ROUTER,
            Payload::RouteRequest {
                start: coord_of(&graph, 1),
                end: coord_of(&graph, 3),
                mode: RouteMode::Balanced,
            },
            "m-route",
        ));

        let reply = bus.try_receive(agent_ids::ORCHESTRATOR).unwrap().unwrap();
        assert_eq!(reply.performative, Performative::Confirm);
        match reply.payload {
            Payload::RouteResult { plan } => assert_eq!(plan.status, RouteStatus::Success),
            other => panic!("expected route result, got {}", other.content_type()),
        }
    }
}
