//! End-to-end routing scenarios over the synthetic street grid:
//! clear-weather routing, risk-forced detours, impassability, and
//! evacuation shelter selection.

mod common;

use agos::routing::{EvacuationPlanner, Router, FALLBACK_WARNING};
use agos::types::{RouteMode, RouteStatus};

use common::*;

/// All risk zero, balanced mode: a clean route with empty warnings.
#[test]
fn clear_weather_routing_succeeds() {
    let graph = grid_graph();
    let router = Router::new(graph.clone());

    let plan = router
        .route(&start_coord(), &end_coord(), RouteMode::Balanced)
        .unwrap();

    assert_eq!(plan.status, RouteStatus::Success);
    let totals = plan.totals.unwrap();
    assert!(totals.distance_m > 0.0);
    assert_eq!(totals.max_risk, 0.0);
    assert!(plan.warnings.is_empty());
    assert!(!plan.nodes.is_empty());
    assert!(!plan.geometry.is_empty());
    // 30 km/h fixed speed assumption
    assert!((totals.estimated_time_min - totals.distance_m / 500.0).abs() < 1e-9);
}

/// Flooding the direct corridor forces a measurably longer detour in
/// safest mode, and every edge on the result satisfies the filter.
#[test]
fn severe_risk_forces_detour() {
    let graph = grid_graph();
    let router = Router::new(graph.clone());

    let baseline = router
        .route(&start_coord(), &end_coord(), RouteMode::Safest)
        .unwrap();
    let baseline_distance = baseline.totals.unwrap().distance_m;

    // Flood a wall of crossings between columns 2 and 3 over the upper
    // rows; the only clean crossing left is far to the south.
    for row in 4..GRID_ROWS {
        for (u, v) in [
            (node_id(row, 2), node_id(row, 3)),
            (node_id(row, 3), node_id(row, 2)),
        ] {
            if let Ok(edge) = graph.edge_by_key(u, v, 0) {
                graph.set_risk(edge, 0.95).unwrap();
            }
        }
    }

    let detour = router
        .route(&start_coord(), &end_coord(), RouteMode::Safest)
        .unwrap();
    assert_eq!(detour.status, RouteStatus::Success);
    let totals = detour.totals.unwrap();
    assert!(totals.max_risk <= 0.9, "safest filter must hold");
    assert!(
        totals.distance_m >= baseline_distance * 1.1,
        "detour {} not ≥ 10% over baseline {}",
        totals.distance_m,
        baseline_distance
    );
}

/// Cutting every edge around the destination leaves the safest query with
/// a fallback result first, then full impassability at risk 1.0.
#[test]
fn impassable_destination() {
    let graph = grid_graph();
    let router = Router::new(graph.clone());

    // The end coordinate snaps to row 8, col 4; sever that node at 0.95
    // (blocks safest, passable for the fallback).
    let (row, col) = (8, 4);
    let neighbors = [(row - 1, col), (row + 1, col), (row, col - 1), (row, col + 1)];
    for (nr, nc) in neighbors {
        for (u, v) in [
            (node_id(row, col), node_id(nr, nc)),
            (node_id(nr, nc), node_id(row, col)),
        ] {
            if let Ok(edge) = graph.edge_by_key(u, v, 0) {
                graph.set_risk(edge, 0.95).unwrap();
            }
        }
    }

    let fallback = router
        .route(&start_coord(), &end_coord(), RouteMode::Safest)
        .unwrap();
    assert_eq!(fallback.status, RouteStatus::NoSafeRoute);
    assert!(fallback.warnings.iter().any(|w| w == FALLBACK_WARNING));

    // Now fully impassable
    for (nr, nc) in neighbors {
        for (u, v) in [
            (node_id(row, col), node_id(nr, nc)),
            (node_id(nr, nc), node_id(row, col)),
        ] {
            if let Ok(edge) = graph.edge_by_key(u, v, 0) {
                graph.set_risk(edge, 1.0).unwrap();
            }
        }
    }
    let blocked = router
        .route(&start_coord(), &end_coord(), RouteMode::Safest)
        .unwrap();
    assert_eq!(blocked.status, RouteStatus::Impassable);
}

/// With no risk anywhere, the planner picks the closest shelter by road
/// distance.
#[test]
fn evacuation_selects_closest_shelter() {
    let graph = grid_graph();
    let router = Router::new(graph.clone());
    let planner = EvacuationPlanner::new(router, graph.clone(), reference_shelters());

    let plan = planner.plan(&start_coord()).unwrap().unwrap();
    assert_eq!(plan.shelter.name, "North Center");
    assert_eq!(plan.route.status, RouteStatus::Success);

    // Score equals road distance when max risk is zero
    let totals = plan.route.totals.unwrap();
    assert!((plan.score - totals.distance_m).abs() < 1e-9);
}

/// Mode filter invariant: every edge of a successful route passes its
/// mode's hard filter.
#[test]
fn successful_routes_respect_mode_filters() {
    let graph = grid_graph();
    let router = Router::new(graph.clone());

    // Scatter risk over the grid
    for (idx, level) in [(3usize, 0.95), (10, 0.8), (17, 0.99), (24, 0.5), (31, 0.3)] {
        graph.set_risk(agos::EdgeId(idx), level).unwrap();
    }

    for mode in [RouteMode::Safest, RouteMode::Balanced, RouteMode::Fastest] {
        let plan = router.route(&start_coord(), &end_coord(), mode).unwrap();
        if plan.status != RouteStatus::Success {
            continue;
        }
        let cap = match mode {
            RouteMode::Safest => 0.9,
            _ => 1.0,
        };
        for pair in plan.nodes.windows(2) {
            let edge = graph.edge_by_key(pair[0], pair[1], 0).unwrap();
            let risk = graph.risk(edge);
            match mode {
                RouteMode::Safest => assert!(risk <= cap, "{mode}: edge risk {risk} > {cap}"),
                _ => assert!(risk < cap, "{mode}: edge risk {risk} >= {cap}"),
            }
        }
    }
}

/// Snapping a node's own coordinate returns that node.
#[test]
fn snap_roundtrip_on_node_coord() {
    let graph = grid_graph();
    let coord = node_coord(5, 2);
    assert_eq!(graph.snap(&coord).unwrap(), node_id(5, 2));
}

/// The histogram always partitions the full edge set.
#[test]
fn histogram_partitions_edges() {
    let graph = grid_graph();
    graph.set_risk(agos::EdgeId(0), 0.5).unwrap();
    graph.set_risk(agos::EdgeId(1), 0.95).unwrap();
    let hist = graph.risk_histogram();
    assert_eq!(hist.total(), graph.edge_count());
}
