//! One fusion pass: caches + scenario in, a complete per-edge risk field out.
//!
//! The pass is a pure function of its inputs. Locations iterate in sorted
//! (BTreeMap) order and per-edge sums are capped after accumulation, so two
//! passes over identical inputs produce bit-identical risk arrays.

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use tracing::{debug, warn};

use crate::config;
use crate::config::defaults;
use crate::graph::RoadGraph;
use crate::raster::FloodCatalog;
use crate::risk;
use crate::types::{
    FusedLocationRisk, HydroKind, HydroSample, Scenario, ScoutReport, StationStatus,
};

/// Everything a pass reads. Caches are borrowed; the pass never mutates them.
pub struct FusionInputs<'a> {
    pub graph: &'a RoadGraph,
    pub catalog: &'a FloodCatalog,
    pub flood_cache: &'a BTreeMap<String, HydroSample>,
    pub scout_cache: &'a BTreeMap<String, ScoutReport>,
    pub scenario: Scenario,
}

/// Everything a pass produces. `risks` is the complete new field, one slot
/// per edge, ready for the atomic swap.
pub struct FusionOutcome {
    pub risks: Vec<f64>,
    pub locations: Vec<FusedLocationRisk>,
    /// Locations lacking a geocodable coordinate (global fallback applied)
    pub degraded_locations: usize,
    /// Stations/locations at or above the critical threshold this pass
    pub critical_locations: Vec<String>,
    /// Edge-depth queries that failed (missing raster / projection)
    pub raster_failures: usize,
}

/// Risk floor implied by a station's official alert status. Measured depth
/// dominates when higher; the floor keeps an ALARM/CRITICAL station visible
/// even when its depth reading lags.
fn status_floor(status: StationStatus) -> f64 {
    match status {
        StationStatus::Normal => 0.0,
        StationStatus::Alert => 0.4,
        StationStatus::Alarm => 0.65,
        StationStatus::Critical => 0.9,
    }
}

#[derive(Default)]
struct LocationAccum {
    coord: Option<crate::types::Coord>,
    depth_risk: f64,
    rain_risk: f64,
    status_risk: f64,
    scout_weight: f64,
    sources: BTreeSet<String>,
    station_critical: bool,
}

/// Run one complete fusion pass.
pub fn compute_pass(inputs: &FusionInputs<'_>) -> FusionOutcome {
    let cfg = &config::get().fusion;
    let now = Utc::now();
    let edge_count = inputs.graph.edge_count();

    // -- Step 1: fuse caches into per-location risk ------------------------

    let mut accums: BTreeMap<String, LocationAccum> = BTreeMap::new();

    for (station_id, sample) in inputs.flood_cache {
        let acc = accums.entry(station_id.clone()).or_default();
        acc.coord = Some(sample.coord);
        match sample.kind {
            HydroKind::River => {
                acc.depth_risk = acc.depth_risk.max(risk::depth_risk(sample.value));
                acc.sources.insert("hydro".to_string());
            }
            HydroKind::Rainfall => {
                acc.rain_risk = acc.rain_risk.max(risk::rainfall_risk(sample.value));
                acc.sources.insert("rain".to_string());
            }
            HydroKind::Dam => {
                // Spillway level has no depth semantics; the official
                // status is the only usable signal.
                acc.sources.insert("hydro".to_string());
            }
        }
        acc.status_risk = acc.status_risk.max(status_floor(sample.status));
        if sample.status == StationStatus::Critical {
            acc.station_critical = true;
        }
    }

    for (name, report) in inputs.scout_cache {
        let acc = accums.entry(name.clone()).or_default();
        if acc.coord.is_none() {
            acc.coord = report.coord;
        }
        acc.scout_weight = acc.scout_weight.max(report.weight());
        acc.sources.insert("scout".to_string());
    }

    let mut locations = Vec::with_capacity(accums.len());
    let mut critical_locations = Vec::new();
    for (name, acc) in &accums {
        let hydro = acc
            .depth_risk
            .max(defaults::RAIN_RISK_DISCOUNT * acc.rain_risk)
            .max(acc.status_risk);
        let fused = hydro.max(acc.scout_weight).clamp(0.0, 1.0);

        if acc.station_critical || fused >= defaults::CRITICAL_RISK_THRESHOLD {
            critical_locations.push(name.clone());
        }
        locations.push(FusedLocationRisk {
            location_name: name.clone(),
            coord: acc.coord,
            risk_level: fused,
            sources: acc.sources.clone(),
            last_updated: now,
        });
    }

    // -- Step 2: GeoTIFF contribution per edge -----------------------------

    let mut geo = vec![0.0_f64; edge_count];
    let mut raster_failures = 0usize;

    if inputs.scenario.geotiff_enabled {
        match inputs
            .catalog
            .tile(inputs.scenario.return_period, inputs.scenario.time_step)
        {
            Ok(tile) => {
                for idx in 0..edge_count {
                    let edge = inputs.graph.edge(crate::graph::EdgeId(idx));
                    let sampled = sample_edge(&tile, edge, inputs.graph);
                    match sampled {
                        Ok(Some(depth)) => {
                            geo[idx] =
                                risk::road_risk(depth, 0.0, edge.road_class) * cfg.w_flood;
                        }
                        Ok(None) => {}
                        Err(_) => raster_failures += 1,
                    }
                }
            }
            Err(e) => {
                // Degraded pass: no GeoTIFF contribution for any edge.
                warn!(
                    scenario = %inputs.scenario.return_period,
                    time_step = inputs.scenario.time_step,
                    error = %e,
                    "Flood raster unavailable, GeoTIFF contribution skipped"
                );
                raster_failures = edge_count;
            }
        }
    }

    // -- Step 3: environmental contribution with radius-bounded diffusion --

    let env_weight = cfg.w_crowd + cfg.w_hist;
    let mut env = vec![0.0_f64; edge_count];
    let mut global = 0.0_f64;
    let mut degraded = 0usize;

    for loc in &locations {
        match loc.coord {
            Some(coord) => {
                for edge in inputs.graph.edges_within(&coord, cfg.diffusion_radius_m) {
                    env[edge.0] += loc.risk_level * env_weight;
                }
            }
            None => {
                // No geocode: weakened graph-wide contribution.
                global += loc.risk_level * env_weight * cfg.global_fallback_factor;
                degraded += 1;
                debug!(location = %loc.location_name, "Location not geocodable, global fallback applied");
            }
        }
    }

    // -- Step 4: combine ---------------------------------------------------

    let risks: Vec<f64> = (0..edge_count)
        .map(|idx| {
            let environmental = (env[idx] + global).min(env_weight);
            (geo[idx] + environmental).min(1.0)
        })
        .collect();

    FusionOutcome {
        risks,
        locations,
        degraded_locations: degraded,
        critical_locations,
        raster_failures,
    }
}

/// Depth along one edge: midpoint sample, max over polyline vertices when
/// geometry exists (strictly-safer reading for long crossings).
fn sample_edge(
    tile: &crate::raster::FloodTile,
    edge: &crate::graph::EdgeInfo,
    graph: &RoadGraph,
) -> Result<Option<f64>, crate::raster::RasterError> {
    let mut max_depth: Option<f64> = None;
    let mut consider = |d: Option<f64>| {
        if let Some(d) = d {
            max_depth = Some(max_depth.map_or(d, |m: f64| m.max(d)));
        }
    };

    consider(tile.depth_at(&edge.midpoint)?);
    match &edge.geometry {
        Some(points) => {
            for p in points {
                consider(tile.depth_at(p)?);
            }
        }
        None => {
            consider(tile.depth_at(&graph.node_coord_by_index(edge.from))?);
            consider(tile.depth_at(&graph.node_coord_by_index(edge.to))?);
        }
    }
    Ok(max_depth)
}
