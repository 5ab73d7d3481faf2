//! Shared fixtures for the integration suites: a synthetic Marikina street
//! grid around the reference coordinates, and a fully wired agent stack.

#![allow(dead_code)]

use std::io::Write;
use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use agos::api::{ApiState, SystemStats};
use agos::broadcast::Broadcaster;
use agos::bus::{agent_ids, MessageBus};
use agos::collectors::flood::{FloodCollector, SimulatedHydroSource};
use agos::collectors::scout::{Gazetteer, ScoutCollector};
use agos::hazard::{HazardAgent, ScenarioHandle};
use agos::orchestrator::{MissionStore, Orchestrator};
use agos::raster::FloodCatalog;
use agos::routing::{EvacuationAgent, EvacuationPlanner, Router, RouterAgent};
use agos::scheduler::Scheduler;
use agos::types::{Coord, EdgeRecord, NetworkFile, NodeRecord, RoadClass, Shelter};
use agos::RoadGraph;

/// Grid origin and spacing. 11 rows × 7 columns of nodes spanning
/// lat 14.6300..14.6600, lon 121.0980..121.1160 — wide enough that the
/// reference endpoints and shelters all snap.
pub const GRID_LAT0: f64 = 14.6300;
pub const GRID_LON0: f64 = 121.0980;
pub const GRID_STEP: f64 = 0.0030;
pub const GRID_ROWS: i64 = 11;
pub const GRID_COLS: i64 = 7;

pub fn node_id(row: i64, col: i64) -> i64 {
    row * 100 + col + 1
}

pub fn node_coord(row: i64, col: i64) -> Coord {
    Coord::new(
        GRID_LAT0 + row as f64 * GRID_STEP,
        GRID_LON0 + col as f64 * GRID_STEP,
    )
}

/// Build the synthetic street grid with bidirectional residential edges.
pub fn grid_network() -> NetworkFile {
    let mut nodes = Vec::new();
    for row in 0..GRID_ROWS {
        for col in 0..GRID_COLS {
            let coord = node_coord(row, col);
            nodes.push(NodeRecord {
                id: node_id(row, col),
                lat: coord.lat,
                lon: coord.lon,
            });
        }
    }

    let mut edges = Vec::new();
    let mut link = |a: (i64, i64), b: (i64, i64)| {
        let length_m = node_coord(a.0, a.1).haversine_m(&node_coord(b.0, b.1));
        for (u, v) in [(a, b), (b, a)] {
            edges.push(EdgeRecord {
                u: node_id(u.0, u.1),
                v: node_id(v.0, v.1),
                k: 0,
                length_m,
                road_class: RoadClass::Residential,
                geometry: None,
            });
        }
    };
    for row in 0..GRID_ROWS {
        for col in 0..GRID_COLS {
            if col + 1 < GRID_COLS {
                link((row, col), (row, col + 1));
            }
            if row + 1 < GRID_ROWS {
                link((row, col), (row + 1, col));
            }
        }
    }

    NetworkFile { nodes, edges }
}

pub fn grid_graph() -> Arc<RoadGraph> {
    Arc::new(RoadGraph::from_records(grid_network()).unwrap())
}

/// Reference endpoints in central Marikina.
pub fn start_coord() -> Coord {
    Coord::new(14.6507, 121.1029)
}

pub fn end_coord() -> Coord {
    Coord::new(14.6545, 121.1089)
}

/// The three reference shelters.
pub fn reference_shelters() -> Vec<Shelter> {
    let mk = |name: &str, lat: f64, lon: f64| Shelter {
        name: name.to_string(),
        coord: Coord::new(lat, lon),
        capacity: 300,
        shelter_type: "school".to_string(),
        barangay: name.to_string(),
    };
    vec![
        mk("South Center", 14.6395, 121.1067),
        mk("North Center", 14.6600, 121.1000),
        mk("East Center", 14.6300, 121.1150),
    ]
}

pub fn test_gazetteer() -> Arc<Gazetteer> {
    Arc::new(Gazetteer::from_entries(vec![
        ("Sto. Nino".to_string(), Coord::new(14.6390, 121.1010)),
        ("Tumana".to_string(), Coord::new(14.6570, 121.0990)),
        ("Malanday".to_string(), Coord::new(14.6540, 121.1040)),
    ]))
}

/// A fully wired stack with every agent running, ready for end-to-end
/// scenarios. Dropping the fixture cancels the agents.
pub struct TestStack {
    pub graph: Arc<RoadGraph>,
    pub bus: Arc<MessageBus>,
    pub broadcaster: Broadcaster,
    pub scenario: Arc<ScenarioHandle>,
    pub missions: Arc<Mutex<MissionStore>>,
    pub stats: SystemStats,
    pub api: ApiState,
    pub cancel: CancellationToken,
    _replay_file: tempfile::NamedTempFile,
}

impl Drop for TestStack {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub async fn spawn_stack() -> TestStack {
    let graph = grid_graph();
    let bus = Arc::new(MessageBus::with_soft_cap(1_000));
    for id in [
        agent_ids::HAZARD,
        agent_ids::FLOOD_COLLECTOR,
        agent_ids::SCOUT_COLLECTOR,
        agent_ids::ROUTER,
        agent_ids::EVACUATION,
        agent_ids::ORCHESTRATOR,
        agent_ids::SCHEDULER,
        "api",
    ] {
        bus.register(id).unwrap();
    }

    let broadcaster = Broadcaster::with_buffer(64);
    let scenario = Arc::new(ScenarioHandle::default());
    let stats = SystemStats::new();
    let missions = Arc::new(Mutex::new(MissionStore::new(1_024)));
    let catalog = Arc::new(FloodCatalog::new(std::path::PathBuf::from("/nonexistent")));

    let router = Router::new(graph.clone());
    let evacuation = Arc::new(EvacuationPlanner::new(
        router.clone(),
        graph.clone(),
        reference_shelters(),
    ));

    // Replay file with a couple of classifiable posts
    let mut replay_file = tempfile::NamedTempFile::new().unwrap();
    writeln!(replay_file, r#"{{"text": "Baha sa Malanday, hanggang tuhod na"}}"#).unwrap();
    writeln!(replay_file, r#"{{"text": "ganda ng panahon ngayon"}}"#).unwrap();

    let cancel = CancellationToken::new();

    let hazard = HazardAgent::new(
        graph.clone(),
        catalog,
        bus.clone(),
        broadcaster.clone(),
        scenario.clone(),
        stats.hazard.clone(),
    );
    let flood = FloodCollector::new(
        bus.clone(),
        SimulatedHydroSource::standard_set(),
        stats.flood.clone(),
    );
    let scout = ScoutCollector::new(bus.clone(), test_gazetteer(), stats.scout.clone())
        .with_replay_file(replay_file.path().to_path_buf());
    let router_agent = RouterAgent::new(router.clone(), bus.clone());
    let evacuation_agent = EvacuationAgent::new(evacuation.clone(), bus.clone());
    let orchestrator = Orchestrator::new(bus.clone(), missions.clone());
    let scheduler = Scheduler::new(bus.clone(), stats.scheduler.clone(), true);
    let scheduler_handle = scheduler.handle();

    tokio::spawn(hazard.run(cancel.clone()));
    tokio::spawn(flood.run(cancel.clone()));
    tokio::spawn(scout.run(cancel.clone()));
    tokio::spawn(router_agent.run(cancel.clone()));
    tokio::spawn(evacuation_agent.run(cancel.clone()));
    tokio::spawn(orchestrator.run(cancel.clone()));
    tokio::spawn(scheduler.run(cancel.clone()));

    // Drain replies addressed to the HTTP surface
    {
        let bus = bus.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = bus.receive("api", std::time::Duration::from_secs(5)) => {}
                }
            }
        });
    }

    let api = ApiState {
        graph: graph.clone(),
        router,
        evacuation,
        bus: bus.clone(),
        broadcaster: broadcaster.clone(),
        scenario: scenario.clone(),
        missions: missions.clone(),
        scheduler: scheduler_handle,
        stats: stats.clone(),
    };

    TestStack {
        graph,
        bus,
        broadcaster,
        scenario,
        missions,
        stats,
        api,
        cancel,
        _replay_file: replay_file,
    }
}
