//! Hazard fusion core: maintains the per-edge risk field.
//!
//! The agent owns three inputs — the hydrological cache, the scout cache,
//! and the active scenario — and rebuilds the whole risk field in one
//! fusion pass whenever any of them changes. Triggers arriving while a
//! pass is pending are drained from the mailbox first, so bursts collapse
//! into a single pass. After each pass the agent emits a `risk_update`
//! frame, and a debounced `critical_alert` when a station or location
//! newly crosses the critical threshold.

pub mod fusion;

pub use fusion::{compute_pass, FusionInputs, FusionOutcome};

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::broadcast::Broadcaster;
use crate::bus::{agent_ids, Envelope, MessageBus, Payload, Performative};
use crate::config;
use crate::config::defaults;
use crate::graph::RoadGraph;
use crate::raster::FloodCatalog;
use crate::types::{HydroSample, Scenario, ScoutReport};

/// Shared, read-only view of the active scenario. Only the hazard agent
/// mutates it, and only through typed bus messages.
#[derive(Debug, Default)]
pub struct ScenarioHandle(RwLock<Scenario>);

impl ScenarioHandle {
    pub fn get(&self) -> Scenario {
        *self.0.read().expect("scenario handle poisoned")
    }

    fn set(&self, update: impl FnOnce(&mut Scenario)) -> Scenario {
        let mut guard = self.0.write().expect("scenario handle poisoned");
        update(&mut guard);
        *guard
    }
}

/// Fusion statistics surfaced by `/health` and `/admin/stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct HazardStats {
    pub passes: u64,
    pub failures: u64,
    pub consecutive_failures: u32,
    pub last_pass_ms: u64,
    pub last_pass_at: Option<DateTime<Utc>>,
    pub locations_last_pass: usize,
    pub edges_updated_last_pass: usize,
    pub degraded_locations: u64,
    pub raster_failures: u64,
    pub critical_alerts_emitted: u64,
}

/// The hazard fusion agent.
pub struct HazardAgent {
    graph: Arc<RoadGraph>,
    catalog: Arc<FloodCatalog>,
    bus: Arc<MessageBus>,
    broadcaster: Broadcaster,
    scenario: Arc<ScenarioHandle>,
    stats: Arc<Mutex<HazardStats>>,
    flood_cache: BTreeMap<String, HydroSample>,
    scout_cache: BTreeMap<String, ScoutReport>,
    alert_debounce: HashMap<String, Instant>,
}

impl HazardAgent {
    pub fn new(
        graph: Arc<RoadGraph>,
        catalog: Arc<FloodCatalog>,
        bus: Arc<MessageBus>,
        broadcaster: Broadcaster,
        scenario: Arc<ScenarioHandle>,
        stats: Arc<Mutex<HazardStats>>,
    ) -> Self {
        Self {
            graph,
            catalog,
            bus,
            broadcaster,
            scenario,
            stats,
            flood_cache: BTreeMap::new(),
            scout_cache: BTreeMap::new(),
            alert_debounce: HashMap::new(),
        }
    }

    /// Agent loop. Returns an error only on unrecoverable fusion failure,
    /// which the supervisor treats as fatal (exit non-zero, restart).
    pub async fn run(mut self, cancel: CancellationToken) -> Result<()> {
        info!("[Hazard] Agent starting");
        let poll = Duration::from_secs(defaults::MAILBOX_POLL_TIMEOUT_SECS);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[Hazard] Received shutdown signal");
                    return Ok(());
                }
                received = self.bus.receive(agent_ids::HAZARD, poll) => {
                    let Some(first) = received.map_err(|e| anyhow!("bus receive: {e}"))? else {
                        continue;
                    };

                    // Drain the whole mailbox before fusing: bursts of
                    // INFORMs and overlapping triggers collapse into one pass.
                    let mut fuse_needed = false;
                    let mut pending_replies = Vec::new();
                    fuse_needed |= self.handle(first, &mut pending_replies);
                    while let Ok(Some(envelope)) = self.bus.try_receive(agent_ids::HAZARD) {
                        fuse_needed |= self.handle(envelope, &mut pending_replies);
                    }

                    if fuse_needed {
                        match self.fuse() {
                            Ok(summary) => {
                                for request in &pending_replies {
                                    let reply = Envelope::confirm_to(
                                        request,
                                        agent_ids::HAZARD,
                                        summary.clone(),
                                    );
                                    if let Err(e) = self.bus.send(reply) {
                                        warn!(error = %e, "Failed to confirm fusion request");
                                    }
                                }
                            }
                            Err(e) => {
                                error!(error = %e, "Fusion pass failed");
                                for request in &pending_replies {
                                    let reply = Envelope::failure_to(
                                        request,
                                        agent_ids::HAZARD,
                                        format!("fusion failed: {e}"),
                                    );
                                    let _ = self.bus.send(reply);
                                }
                                let consecutive = {
                                    let stats = self.stats.lock().expect("hazard stats poisoned");
                                    stats.consecutive_failures
                                };
                                if consecutive >= config::get().fusion.max_consecutive_failures {
                                    return Err(anyhow!(
                                        "{consecutive} consecutive fusion failures, giving up"
                                    ));
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    /// Apply one envelope to the caches/scenario. Returns whether the
    /// envelope demands a fusion pass; accepted REQUESTs are queued for a
    /// reply after that pass.
    fn handle(&mut self, envelope: Envelope, pending_replies: &mut Vec<Envelope>) -> bool {
        match envelope.performative {
            Performative::Inform => self.apply_inform(&envelope),
            Performative::Request => {
                if self.apply_request(&envelope) {
                    pending_replies.push(envelope);
                    true
                } else {
                    false
                }
            }
            _ => {
                warn!(
                    performative = %envelope.performative,
                    content_type = envelope.payload.content_type(),
                    sender = %envelope.sender_id,
                    "Unexpected envelope at hazard agent, ignoring"
                );
                false
            }
        }
    }

    fn apply_inform(&mut self, envelope: &Envelope) -> bool {
        match &envelope.payload {
            Payload::FloodDataBatch { samples } => {
                let mut applied = 0usize;
                for sample in samples {
                    let newer = self
                        .flood_cache
                        .get(&sample.station_id)
                        .map_or(true, |prev| sample.observed_at >= prev.observed_at);
                    if newer {
                        self.flood_cache
                            .insert(sample.station_id.clone(), sample.clone());
                        applied += 1;
                    }
                }
                info!(samples = samples.len(), applied, "Flood batch received");
                true
            }
            Payload::ScoutReportBatch { reports, .. } => {
                let mut applied = 0usize;
                for report in reports {
                    // Cache key: the geocoded name, falling back to the raw
                    // text so unresolved reports still participate.
                    let key = report
                        .location_name
                        .clone()
                        .unwrap_or_else(|| report.text.clone());
                    let newer = self
                        .scout_cache
                        .get(&key)
                        .map_or(true, |prev| report.observed_at >= prev.observed_at);
                    if newer {
                        self.scout_cache.insert(key, report.clone());
                        applied += 1;
                    }
                }
                info!(reports = reports.len(), applied, "Scout batch received");
                true
            }
            other => {
                warn!(
                    content_type = other.content_type(),
                    "Unexpected INFORM at hazard agent, ignoring"
                );
                false
            }
        }
    }

    /// Returns whether the REQUEST is one this agent answers with a pass.
    fn apply_request(&mut self, envelope: &Envelope) -> bool {
        match &envelope.payload {
            Payload::FuseNow | Payload::AssessLocation { .. } => true,
            Payload::SetScenario { return_period, time_step } => {
                let (rp, ts) = (*return_period, *time_step);
                let scenario = self.scenario.set(|s| {
                    s.return_period = rp;
                    s.time_step = ts;
                });
                info!(scenario = %scenario.return_period, time_step = scenario.time_step, "Scenario changed");
                true
            }
            Payload::SetGeotiffEnabled { enabled } => {
                let enabled = *enabled;
                self.scenario.set(|s| s.geotiff_enabled = enabled);
                info!(enabled, "GeoTIFF contribution toggled");
                true
            }
            other => {
                warn!(
                    content_type = other.content_type(),
                    "Unexpected REQUEST at hazard agent, ignoring"
                );
                false
            }
        }
    }

    /// Run one fusion pass and publish its updates. The step summary in
    /// the returned value becomes the CONFIRM payload.
    fn fuse(&mut self) -> Result<serde_json::Value> {
        let started = Instant::now();
        let scenario = self.scenario.get();
        let previous = self.graph.risk_field();

        let outcome = compute_pass(&FusionInputs {
            graph: &self.graph,
            catalog: &self.catalog,
            flood_cache: &self.flood_cache,
            scout_cache: &self.scout_cache,
            scenario,
        });

        let pass_stamp = Utc::now();
        if let Err(e) = self.graph.swap_risk_field(outcome.risks.clone(), pass_stamp) {
            let mut stats = self.stats.lock().expect("hazard stats poisoned");
            stats.failures += 1;
            stats.consecutive_failures += 1;
            return Err(anyhow!("risk field write failed: {e}"));
        }

        let edges_updated = outcome
            .risks
            .iter()
            .zip(previous.iter())
            .filter(|(new, old)| (**new - old.risk).abs() > f64::EPSILON)
            .count();

        let histogram = self.graph.risk_histogram();
        self.broadcaster.publish_risk_update(&histogram, &scenario);

        let fresh_critical = self.debounced_critical(&outcome.critical_locations);
        let mut alerts_emitted = 0u64;
        if !fresh_critical.is_empty() {
            self.broadcaster.publish_critical_alert(&fresh_critical);
            alerts_emitted = 1;
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        {
            let mut stats = self.stats.lock().expect("hazard stats poisoned");
            stats.passes += 1;
            stats.consecutive_failures = 0;
            stats.last_pass_ms = elapsed_ms;
            stats.last_pass_at = Some(pass_stamp);
            stats.locations_last_pass = outcome.locations.len();
            stats.edges_updated_last_pass = edges_updated;
            stats.degraded_locations += outcome.degraded_locations as u64;
            stats.raster_failures += outcome.raster_failures as u64;
            stats.critical_alerts_emitted += alerts_emitted;
        }

        info!(
            locations = outcome.locations.len(),
            edges_updated,
            critical = outcome.critical_locations.len(),
            degraded = outcome.degraded_locations,
            elapsed_ms,
            "Fusion pass complete"
        );

        Ok(serde_json::json!({
            "locations_processed": outcome.locations.len(),
            "edges_updated": edges_updated,
            "degraded_locations": outcome.degraded_locations,
            "histogram": histogram,
            "scenario": {
                "return_period": scenario.return_period,
                "time_step": scenario.time_step,
                "geotiff_enabled": scenario.geotiff_enabled,
            },
        }))
    }

    /// Filter critical locations through the per-station debounce window.
    fn debounced_critical(&mut self, critical: &[String]) -> Vec<String> {
        let window = Duration::from_secs(config::get().fusion.critical_alert_debounce_secs);
        let now = Instant::now();
        let mut fresh = Vec::new();
        for name in critical {
            let recently_alerted = self
                .alert_debounce
                .get(name)
                .is_some_and(|at| now.duration_since(*at) < window);
            if !recently_alerted {
                self.alert_debounce.insert(name.clone(), now);
                fresh.push(name.clone());
            }
        }
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        Coord, EdgeRecord, HydroKind, NetworkFile, NodeRecord, ReportType, RoadClass,
        StationStatus,
    };
    use std::path::PathBuf;

    fn test_graph() -> Arc<RoadGraph> {
        let nodes = vec![
            NodeRecord { id: 1, lat: 14.6500, lon: 121.1000 },
            NodeRecord { id: 2, lat: 14.6500, lon: 121.1050 },
        ];
        let edges = vec![
            EdgeRecord { u: 1, v: 2, k: 0, length_m: 540.0, road_class: RoadClass::Primary, geometry: None },
            EdgeRecord { u: 2, v: 1, k: 0, length_m: 540.0, road_class: RoadClass::Primary, geometry: None },
        ];
        Arc::new(RoadGraph::from_records(NetworkFile { nodes, edges }).unwrap())
    }

    fn agent_fixture() -> (HazardAgent, Arc<MessageBus>, Broadcaster, Arc<ScenarioHandle>, Arc<Mutex<HazardStats>>) {
        let bus = Arc::new(MessageBus::with_soft_cap(100));
        bus.register(agent_ids::HAZARD).unwrap();
        bus.register(agent_ids::ORCHESTRATOR).unwrap();
        let broadcaster = Broadcaster::with_buffer(16);
        let scenario = Arc::new(ScenarioHandle::default());
        let stats = Arc::new(Mutex::new(HazardStats::default()));
        let agent = HazardAgent::new(
            test_graph(),
            Arc::new(FloodCatalog::new(PathBuf::from("/nonexistent"))),
            bus.clone(),
            broadcaster.clone(),
            scenario.clone(),
            stats.clone(),
        );
        (agent, bus, broadcaster, scenario, stats)
    }

    fn critical_sample() -> HydroSample {
        HydroSample {
            station_id: "sto-nino".to_string(),
            kind: HydroKind::River,
            coord: Coord::new(14.6500, 121.1025),
            value: 1.5,
            unit: "m".to_string(),
            status: StationStatus::Critical,
            observed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_inform_updates_cache_and_fuses() {
        let (mut agent, _bus, broadcaster, _scenario, stats) = agent_fixture();
        let mut sub = broadcaster.subscribe();

        let envelope = Envelope::inform(
            agent_ids::FLOOD_COLLECTOR,
            agent_ids::HAZARD,
            Payload::FloodDataBatch { samples: vec![critical_sample()] },
        );
        let mut replies = Vec::new();
        assert!(agent.handle(envelope, &mut replies));
        assert!(replies.is_empty());
        agent.fuse().unwrap();

        assert_eq!(stats.lock().unwrap().passes, 1);
        // risk_update then critical_alert
        let first = sub.recv().await.unwrap();
        assert_eq!(first.kind, crate::types::UpdateKind::RiskUpdate);
        let second = sub.recv().await.unwrap();
        assert_eq!(second.kind, crate::types::UpdateKind::CriticalAlert);
        assert_eq!(second.data["locations"][0], "sto-nino");
    }

    #[tokio::test]
    async fn test_critical_alert_debounced() {
        let (mut agent, _bus, broadcaster, _scenario, stats) = agent_fixture();
        let mut sub = broadcaster.subscribe();

        for _ in 0..3 {
            let envelope = Envelope::inform(
                agent_ids::FLOOD_COLLECTOR,
                agent_ids::HAZARD,
                Payload::FloodDataBatch { samples: vec![critical_sample()] },
            );
            let mut replies = Vec::new();
            agent.handle(envelope, &mut replies);
            agent.fuse().unwrap();
        }

        assert_eq!(stats.lock().unwrap().critical_alerts_emitted, 1);
        let mut alert_frames = 0;
        while let Ok(frame) = sub.try_recv() {
            if frame.kind == crate::types::UpdateKind::CriticalAlert {
                alert_frames += 1;
            }
        }
        assert_eq!(alert_frames, 1, "repeated criticals within the window must alert once");
    }

    #[tokio::test]
    async fn test_stale_sample_does_not_overwrite() {
        let (mut agent, _bus, _broadcaster, _scenario, _stats) = agent_fixture();
        let fresh = critical_sample();
        let mut stale = critical_sample();
        stale.observed_at = fresh.observed_at - chrono::Duration::minutes(10);
        stale.status = StationStatus::Normal;

        let mut replies = Vec::new();
        agent.handle(
            Envelope::inform(agent_ids::FLOOD_COLLECTOR, agent_ids::HAZARD,
                Payload::FloodDataBatch { samples: vec![fresh] }),
            &mut replies,
        );
        agent.handle(
            Envelope::inform(agent_ids::FLOOD_COLLECTOR, agent_ids::HAZARD,
                Payload::FloodDataBatch { samples: vec![stale] }),
            &mut replies,
        );

        assert_eq!(
            agent.flood_cache.get("sto-nino").unwrap().status,
            StationStatus::Critical
        );
    }

    #[tokio::test]
    async fn test_set_scenario_via_message() {
        let (mut agent, _bus, _broadcaster, scenario, _stats) = agent_fixture();
        let mut replies = Vec::new();
        let fuse = agent.handle(
            Envelope::request(
                agent_ids::ORCHESTRATOR,
                agent_ids::HAZARD,
                Payload::SetScenario {
                    return_period: crate::types::ReturnPeriod::Rr04,
                    time_step: 18,
                },
                "m-1",
            ),
            &mut replies,
        );
        assert!(fuse);
        assert_eq!(replies.len(), 1);
        let s = scenario.get();
        assert_eq!(s.return_period, crate::types::ReturnPeriod::Rr04);
        assert_eq!(s.time_step, 18);
    }

    #[tokio::test]
    async fn test_scout_report_cache_keyed_by_location() {
        let (mut agent, _bus, _broadcaster, _scenario, _stats) = agent_fixture();
        let report = ScoutReport {
            text: "tubig hanggang tuhod sa Malanday".to_string(),
            location_name: Some("Malanday".to_string()),
            coord: Some(Coord::new(14.6500, 121.1010)),
            severity: 0.5,
            confidence: 0.8,
            report_type: ReportType::Flood,
            is_flood_related: true,
            observed_at: Utc::now(),
        };
        let mut replies = Vec::new();
        agent.handle(
            Envelope::inform(
                agent_ids::SCOUT_COLLECTOR,
                agent_ids::HAZARD,
                Payload::ScoutReportBatch { reports: vec![report], has_coordinates: true },
            ),
            &mut replies,
        );
        assert!(agent.scout_cache.contains_key("Malanday"));
    }
}
