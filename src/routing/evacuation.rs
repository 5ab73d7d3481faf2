//! Evacuation planner: choose the best reachable shelter under the
//! current risk field.
//!
//! Every shelter in the static registry is scored by routing to it with
//! the safest preset and weighing `distance_m + λ · max_risk`. The
//! shelter→node snap table is computed once at construction; the graph
//! never changes topologically within a process lifetime.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use petgraph::graph::NodeIndex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::router::Router;
use super::RouteError;
use crate::bus::{agent_ids, Envelope, MessageBus, Payload, Performative};
use crate::config;
use crate::config::defaults;
use crate::graph::RoadGraph;
use crate::types::{Coord, EvacuationPlan, RouteMode, RouteStatus, Shelter};

/// Load the shelter registry CSV (`name, lat, lon, capacity, type,
/// barangay`). Rows with non-finite coordinates are skipped.
pub fn load_shelters(path: &Path) -> anyhow::Result<Vec<Shelter>> {
    #[derive(serde::Deserialize)]
    struct ShelterRow {
        name: String,
        lat: f64,
        lon: f64,
        #[serde(default)]
        capacity: u32,
        #[serde(rename = "type", default)]
        shelter_type: String,
        #[serde(default)]
        barangay: String,
    }

    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open shelter registry {}", path.display()))?;

    let mut shelters = Vec::new();
    for row in reader.deserialize::<ShelterRow>() {
        let Ok(row) = row else {
            warn!("Skipping malformed shelter row");
            continue;
        };
        if !row.lat.is_finite() || !row.lon.is_finite() {
            warn!(name = %row.name, "Skipping shelter with non-finite coordinates");
            continue;
        }
        shelters.push(Shelter {
            name: row.name,
            coord: Coord::new(row.lat, row.lon),
            capacity: row.capacity,
            shelter_type: row.shelter_type,
            barangay: row.barangay,
        });
    }

    info!(shelters = shelters.len(), "Shelter registry loaded");
    Ok(shelters)
}

/// The evacuation planner.
pub struct EvacuationPlanner {
    router: Router,
    graph: Arc<RoadGraph>,
    /// Shelters paired with their cached snap node, unreachable ones dropped
    snapped: Vec<(Shelter, NodeIndex)>,
}

impl EvacuationPlanner {
    pub fn new(router: Router, graph: Arc<RoadGraph>, shelters: Vec<Shelter>) -> Self {
        let mut snapped = Vec::with_capacity(shelters.len());
        for shelter in shelters {
            match graph.snap_index(&shelter.coord) {
                Ok(node) => snapped.push((shelter, node)),
                Err(e) => {
                    warn!(shelter = %shelter.name, error = %e, "Shelter does not snap to the network, excluded");
                }
            }
        }
        info!(usable = snapped.len(), "Shelter snap table built");
        Self {
            router,
            graph,
            snapped,
        }
    }

    /// Best reachable shelter for a user coordinate, or `None` when every
    /// candidate is impassable.
    pub fn plan(&self, user_coord: &Coord) -> Result<Option<EvacuationPlan>, RouteError> {
        let area = &config::get().service_area;
        if !user_coord.is_finite() || !area.contains(user_coord.lat, user_coord.lon) {
            return Err(RouteError::OutsideServiceArea {
                lat: user_coord.lat,
                lon: user_coord.lon,
            });
        }
        let from = self.graph.snap_index(user_coord)?;
        let lambda = config::get().evacuation.risk_lambda;

        let mut best: Option<EvacuationPlan> = None;
        for (shelter, node) in &self.snapped {
            let route = self.router.route_between(from, *node, RouteMode::Safest);
            if route.status == RouteStatus::Impassable {
                continue;
            }
            let Some(totals) = route.totals else {
                continue;
            };
            let score = totals.distance_m + lambda * totals.max_risk;

            let better = match &best {
                None => true,
                Some(current) => {
                    score < current.score
                        || (score == current.score && shelter.name < current.shelter.name)
                }
            };
            if better {
                best = Some(EvacuationPlan {
                    shelter: shelter.clone(),
                    route,
                    score,
                });
            }
        }

        if let Some(plan) = &best {
            info!(
                shelter = %plan.shelter.name,
                score = plan.score,
                "Evacuation shelter selected"
            );
        } else {
            warn!("No reachable shelter for evacuation request");
        }
        Ok(best)
    }

    pub fn shelter_count(&self) -> usize {
        self.snapped.len()
    }
}

/// Bus-facing wrapper answering `evacuation_request` REQUESTs.
pub struct EvacuationAgent {
    planner: Arc<EvacuationPlanner>,
    bus: Arc<MessageBus>,
}

impl EvacuationAgent {
    pub fn new(planner: Arc<EvacuationPlanner>, bus: Arc<MessageBus>) -> Self {
        Self { planner, bus }
    }

    pub async fn run(self, cancel: CancellationToken) {
        info!("[Evacuation] Agent starting");
        let poll = Duration::from_secs(defaults::MAILBOX_POLL_TIMEOUT_SECS);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Evacuation] Received shutdown signal");
                    return;
                }
                received = self.bus.receive(agent_ids::EVACUATION, poll) => {
                    match received {
                        Ok(Some(envelope)) => self.handle(envelope),
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "Evacuation mailbox error");
                            return;
                        }
                    }
                }
            }
        }
    }

    fn handle(&self, envelope: Envelope) {
        let (Performative::Request, Payload::EvacuationRequest { user_coord }) =
            (&envelope.performative, &envelope.payload)
        else {
            warn!(
                content_type = envelope.payload.content_type(),
                "Unexpected envelope at evacuation agent, ignoring"
            );
            return;
        };

        let reply = match self.planner.plan(user_coord) {
            Ok(plan) => {
                Envelope::reply_to(&envelope, agent_ids::EVACUATION, Payload::EvacuationResult { plan })
            }
            Err(e) => Envelope::failure_to(&envelope, agent_ids::EVACUATION, e.to_string()),
        };
        if let Err(e) = self.bus.send(reply) {
            warn!(error = %e, "Failed to reply to evacuation request");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{EdgeRecord, NetworkFile, NodeRecord, RoadClass};

    /// Line of nodes west→east, 500 m apart, with shelters near both ends.
    fn line_graph() -> Arc<RoadGraph> {
        let coords = [
            (1, 14.6500, 121.1000),
            (2, 14.6500, 121.1046),
            (3, 14.6500, 121.1092),
            (4, 14.6500, 121.1138),
        ];
        let nodes = coords
            .iter()
            .map(|&(id, lat, lon)| NodeRecord { id, lat, lon })
            .collect();
        let mut edges = Vec::new();
        for w in [(1, 2), (2, 3), (3, 4)] {
            for (a, b) in [(w.0, w.1), (w.1, w.0)] {
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

    fn shelter(name: &str, lat: f64, lon: f64) -> Shelter {
        Shelter {
            name: name.to_string(),
            coord: Coord::new(lat, lon),
            capacity: 200,
            shelter_type: "school".to_string(),
            barangay: "Test".to_string(),
        }
    }

    #[test]
    fn test_closest_shelter_wins_without_risk() {
        let graph = line_graph();
        let planner = EvacuationPlanner::new(
            Router::new(graph.clone()),
            graph.clone(),
            vec![
                shelter("Near", 14.6500, 121.1046),
                shelter("Far", 14.6500, 121.1138),
            ],
        );

        let plan = planner
            .plan(&Coord::new(14.6500, 121.1000))
            .unwrap()
            .unwrap();
        assert_eq!(plan.shelter.name, "Near");
        assert!((plan.route.totals.unwrap().distance_m - 500.0).abs() < 1e-9);
    }

    #[test]
    fn test_risk_crossing_outweighs_distance() {
        let graph = line_graph();
        // Path to the near shelter crosses a 0.9-risk edge; the far shelter
        // is 1 km further but clean. λ = 2500 makes the far one win.
        for (a, b) in [(1, 2), (2, 1)] {
            let id = graph.edge_by_key(a, b, 0).unwrap();
            // 0.9 exactly passes the safest filter (excludes only > 0.9)
            graph.set_risk(id, 0.9).unwrap();
        }
        let planner = EvacuationPlanner::new(
            Router::new(graph.clone()),
            graph.clone(),
            vec![shelter("Near", 14.6500, 121.1046)],
        );
        let plan = planner
            .plan(&Coord::new(14.6500, 121.1000))
            .unwrap()
            .unwrap();
        // score = 500 + 2500·0.9 = 2750
        assert!((plan.score - 2750.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_safe_shelter_when_cut_off() {
        let graph = line_graph();
        for (a, b) in [(1, 2), (2, 1)] {
            let id = graph.edge_by_key(a, b, 0).unwrap();
            graph.set_risk(id, 1.0).unwrap();
        }
        let planner = EvacuationPlanner::new(
            Router::new(graph.clone()),
            graph.clone(),
            vec![shelter("OnlyOne", 14.6500, 121.1138)],
        );
        let plan = planner.plan(&Coord::new(14.6500, 121.1000)).unwrap();
        assert!(plan.is_none());
    }

    #[test]
    fn test_outside_service_area() {
        let graph = line_graph();
        let planner = EvacuationPlanner::new(Router::new(graph.clone()), graph, vec![]);
        assert!(matches!(
            planner.plan(&Coord::new(10.0, 121.0)),
            Err(RouteError::OutsideServiceArea { .. })
        ));
    }

    #[test]
    fn test_unsnappable_shelter_excluded() {
        let graph = line_graph();
        let planner = EvacuationPlanner::new(
            Router::new(graph.clone()),
            graph,
            vec![
                shelter("Good", 14.6500, 121.1046),
                shelter("Nowhere", 14.7390, 121.1490),
            ],
        );
        assert_eq!(planner.shelter_count(), 1);
    }
}
