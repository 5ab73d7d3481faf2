//! Flood collector: periodic pull of river-gauge, rainfall, and dam
//! telemetry, batched into one INFORM to the hazard core.
//!
//! Each source fetches independently with its own timeout and retry
//! policy (3 attempts, exponential backoff 1/2/4 s, full jitter ≤ 500 ms).
//! Per-source failures degrade the round — the successful subset is still
//! emitted; only an all-source failure is a FAILURE outcome.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::bus::{agent_ids, Envelope, MessageBus, Payload, Performative};
use crate::config;
use crate::config::defaults;
use crate::types::{Coord, HydroKind, HydroSample, StationStatus};

/// Collection failures. Absorbed locally; a round only fails outright when
/// every source does.
#[derive(Debug, Error)]
pub enum CollectError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("source timed out after {0:?}")]
    Timeout(Duration),
    #[error("malformed source payload: {0}")]
    BadSchema(String),
    #[error("all sources failed")]
    AllSourcesFailed,
}

/// One external telemetry source.
#[async_trait]
pub trait HydroSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self) -> Result<Vec<HydroSample>, CollectError>;
}

/// Collector statistics, surfaced by `/health` and `/admin/stats`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FloodCollectorStats {
    pub total_runs: u64,
    pub successful_runs: u64,
    pub failed_runs: u64,
    pub last_duration_ms: u64,
    pub data_points_collected: u64,
    pub last_run_at: Option<DateTime<Utc>>,
}

/// The flood collection agent.
pub struct FloodCollector {
    bus: Arc<MessageBus>,
    sources: Vec<Box<dyn HydroSource>>,
    stats: Arc<Mutex<FloodCollectorStats>>,
    period: Duration,
    retry_attempts: u32,
}

impl FloodCollector {
    pub fn new(
        bus: Arc<MessageBus>,
        sources: Vec<Box<dyn HydroSource>>,
        stats: Arc<Mutex<FloodCollectorStats>>,
    ) -> Self {
        let cfg = &config::get().collectors;
        Self {
            bus,
            sources,
            stats,
            period: Duration::from_secs(cfg.period_secs),
            retry_attempts: cfg.retry_attempts,
        }
    }

    /// Agent loop: a fixed-period tick plus immediate rounds for
    /// `collect_now` REQUESTs.
    pub async fn run(self, cancel: CancellationToken) {
        info!(
            period_secs = self.period.as_secs(),
            sources = self.sources.len(),
            "[FloodCollector] Agent starting"
        );
        let mut next_tick = Instant::now() + self.period;
        let poll = Duration::from_secs(defaults::MAILBOX_POLL_TIMEOUT_SECS);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("[FloodCollector] Received shutdown signal");
                    return;
                }
                _ = tokio::time::sleep_until(next_tick) => {
                    next_tick = Instant::now() + self.period;
                    self.collect_round(None).await;
                }
                received = self.bus.receive(agent_ids::FLOOD_COLLECTOR, poll) => {
                    match received {
                        Ok(Some(envelope)) => {
                            if matches!(
                                (&envelope.performative, &envelope.payload),
                                (Performative::Request, Payload::CollectNow)
                            ) {
                                self.collect_round(Some(&envelope)).await;
                            } else {
                                warn!(
                                    content_type = envelope.payload.content_type(),
                                    "Unexpected envelope at flood collector, ignoring"
                                );
                            }
                        }
                        Ok(None) => {}
                        Err(e) => {
                            warn!(error = %e, "Flood collector mailbox error");
                            return;
                        }
                    }
                }
            }
        }
    }

    /// One collection round: fetch every source concurrently, emit the
    /// successful subset, reply to the requester when present.
    pub async fn collect_round(&self, request: Option<&Envelope>) {
        let started = Instant::now();
        let fetches = self
            .sources
            .iter()
            .map(|s| fetch_with_retry(s.as_ref(), self.retry_attempts));
        let results = futures::future::join_all(fetches).await;

        let mut samples = Vec::new();
        let mut failures = 0usize;
        for (source, result) in self.sources.iter().zip(results) {
            match result {
                Ok(batch) => {
                    info!(source = source.name(), samples = batch.len(), "Source collected");
                    samples.extend(batch);
                }
                Err(e) => {
                    failures += 1;
                    warn!(source = source.name(), error = %e, "Source failed after retries");
                }
            }
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        let all_failed = !self.sources.is_empty() && failures == self.sources.len();

        {
            let mut stats = self.stats.lock().expect("collector stats poisoned");
            stats.total_runs += 1;
            stats.last_duration_ms = elapsed_ms;
            stats.last_run_at = Some(Utc::now());
            if all_failed {
                stats.failed_runs += 1;
            } else {
                stats.successful_runs += 1;
                stats.data_points_collected += samples.len() as u64;
            }
        }

        if all_failed {
            warn!(elapsed_ms, "Collection round failed: no source responded");
            if let Some(request) = request {
                let _ = self.bus.send(Envelope::failure_to(
                    request,
                    agent_ids::FLOOD_COLLECTOR,
                    CollectError::AllSourcesFailed.to_string(),
                ));
            }
            return;
        }

        let data_points = samples.len();
        let batch = Envelope::inform(
            agent_ids::FLOOD_COLLECTOR,
            agent_ids::HAZARD,
            Payload::FloodDataBatch { samples },
        );
        if let Err(e) = self.bus.send(batch) {
            warn!(error = %e, "Failed to deliver flood batch");
        }

        if let Some(request) = request {
            let _ = self.bus.send(Envelope::confirm_to(
                request,
                agent_ids::FLOOD_COLLECTOR,
                serde_json::json!({
                    "data_points": data_points,
                    "sources_failed": failures,
                    "duration_ms": elapsed_ms,
                }),
            ));
        }

        info!(data_points, failures, elapsed_ms, "Collection round complete");
    }
}

/// Retry a source with exponential backoff (1/2/4 s) and full jitter.
async fn fetch_with_retry(
    source: &dyn HydroSource,
    attempts: u32,
) -> Result<Vec<HydroSample>, CollectError> {
    let mut last_err = CollectError::AllSourcesFailed;
    for attempt in 0..attempts.max(1) {
        if attempt > 0 {
            let backoff =
                Duration::from_secs(defaults::SOURCE_BACKOFF_BASE_SECS << (attempt - 1));
            let jitter = Duration::from_millis(
                rand::thread_rng().gen_range(0..=defaults::SOURCE_BACKOFF_JITTER_MS),
            );
            tokio::time::sleep(backoff + jitter).await;
        }
        match source.fetch().await {
            Ok(samples) => return Ok(samples),
            Err(e) => {
                warn!(source = source.name(), attempt = attempt + 1, error = %e, "Fetch attempt failed");
                last_err = e;
            }
        }
    }
    Err(last_err)
}

// ============================================================================
// HTTP sources
// ============================================================================

fn parse_status(s: &str) -> StationStatus {
    match s.to_ascii_uppercase().as_str() {
        "ALERT" => StationStatus::Alert,
        "ALARM" => StationStatus::Alarm,
        "CRITICAL" => StationStatus::Critical,
        _ => StationStatus::Normal,
    }
}

fn http_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

/// River-gauge telemetry endpoint.
///
/// Expected payload: `[{"station", "lat", "lon", "flood_depth_m",
/// "alert_level", "observed_at"}]`.
pub struct RiverGaugeSource {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct RiverRow {
    station: String,
    lat: f64,
    lon: f64,
    flood_depth_m: f64,
    #[serde(default)]
    alert_level: String,
    observed_at: Option<DateTime<Utc>>,
}

impl RiverGaugeSource {
    pub fn new(endpoint: String) -> Self {
        let timeout = Duration::from_secs(config::get().collectors.source_timeout_secs);
        Self {
            http: http_client(timeout),
            endpoint,
        }
    }
}

#[async_trait]
impl HydroSource for RiverGaugeSource {
    fn name(&self) -> &str {
        "river_gauges"
    }

    async fn fetch(&self) -> Result<Vec<HydroSample>, CollectError> {
        let rows: Vec<RiverRow> = self
            .http
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(rows
            .into_iter()
            .map(|row| HydroSample {
                station_id: row.station,
                kind: HydroKind::River,
                coord: Coord::new(row.lat, row.lon),
                value: row.flood_depth_m.max(0.0),
                unit: "m".to_string(),
                status: parse_status(&row.alert_level),
                observed_at: row.observed_at.unwrap_or_else(Utc::now),
            })
            .collect())
    }
}

/// Weather-station rainfall endpoint (hourly rate per station).
///
/// Expected payload: `{"list": [{"station_id", "coord": {"lat", "lon"},
/// "rain_1h"}]}`; the API key goes in the query string.
pub struct RainfallSource {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

#[derive(Deserialize)]
struct RainfallEnvelope {
    list: Vec<RainfallRow>,
}

#[derive(Deserialize)]
struct RainfallRow {
    station_id: String,
    coord: RainfallCoord,
    #[serde(default)]
    rain_1h: f64,
}

#[derive(Deserialize)]
struct RainfallCoord {
    lat: f64,
    lon: f64,
}

impl RainfallSource {
    pub fn new(endpoint: String, api_key: String) -> Self {
        let timeout = Duration::from_secs(config::get().collectors.source_timeout_secs);
        Self {
            http: http_client(timeout),
            endpoint,
            api_key,
        }
    }
}

#[async_trait]
impl HydroSource for RainfallSource {
    fn name(&self) -> &str {
        "weather_rainfall"
    }

    async fn fetch(&self) -> Result<Vec<HydroSample>, CollectError> {
        let body: RainfallEnvelope = self
            .http
            .get(&self.endpoint)
            .query(&[("appid", self.api_key.as_str())])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let now = Utc::now();
        Ok(body
            .list
            .into_iter()
            .map(|row| HydroSample {
                station_id: row.station_id,
                kind: HydroKind::Rainfall,
                coord: Coord::new(row.coord.lat, row.coord.lon),
                value: row.rain_1h.max(0.0),
                unit: "mm/h".to_string(),
                status: StationStatus::Normal,
                observed_at: now,
            })
            .collect())
    }
}

/// Dam spillway status endpoint.
///
/// Expected payload: `[{"dam", "lat", "lon", "spillway_level_m", "status"}]`.
pub struct DamStatusSource {
    http: reqwest::Client,
    endpoint: String,
}

#[derive(Deserialize)]
struct DamRow {
    dam: String,
    lat: f64,
    lon: f64,
    #[serde(default)]
    spillway_level_m: f64,
    #[serde(default)]
    status: String,
}

impl DamStatusSource {
    pub fn new(endpoint: String) -> Self {
        let timeout = Duration::from_secs(config::get().collectors.source_timeout_secs);
        Self {
            http: http_client(timeout),
            endpoint,
        }
    }
}

#[async_trait]
impl HydroSource for DamStatusSource {
    fn name(&self) -> &str {
        "dam_status"
    }

    async fn fetch(&self) -> Result<Vec<HydroSample>, CollectError> {
        let rows: Vec<DamRow> = self
            .http
            .get(&self.endpoint)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let now = Utc::now();
        Ok(rows
            .into_iter()
            .map(|row| HydroSample {
                station_id: row.dam,
                kind: HydroKind::Dam,
                coord: Coord::new(row.lat, row.lon),
                value: row.spillway_level_m,
                unit: "m".to_string(),
                status: parse_status(&row.status),
                observed_at: now,
            })
            .collect())
    }
}

// ============================================================================
// Simulated sources (no API credentials configured)
// ============================================================================

/// Synthetic telemetry for running the service cold: plausible readings
/// for the Marikina river stations and Wawa dam.
pub struct SimulatedHydroSource {
    kind: HydroKind,
}

impl SimulatedHydroSource {
    pub fn new(kind: HydroKind) -> Self {
        Self { kind }
    }

    /// The standard simulated source set: one of each kind.
    pub fn standard_set() -> Vec<Box<dyn HydroSource>> {
        vec![
            Box::new(SimulatedHydroSource::new(HydroKind::River)),
            Box::new(SimulatedHydroSource::new(HydroKind::Rainfall)),
            Box::new(SimulatedHydroSource::new(HydroKind::Dam)),
        ]
    }
}

#[async_trait]
impl HydroSource for SimulatedHydroSource {
    fn name(&self) -> &str {
        match self.kind {
            HydroKind::River => "sim_river_gauges",
            HydroKind::Rainfall => "sim_weather_rainfall",
            HydroKind::Dam => "sim_dam_status",
        }
    }

    async fn fetch(&self) -> Result<Vec<HydroSample>, CollectError> {
        let now = Utc::now();
        let mut rng = rand::thread_rng();
        let samples = match self.kind {
            HydroKind::River => {
                let stations = [
                    ("Sto Nino", 14.6330, 121.0970),
                    ("Nangka", 14.6730, 121.1090),
                    ("Tumana", 14.6570, 121.0960),
                ];
                stations
                    .iter()
                    .map(|&(name, lat, lon)| HydroSample {
                        station_id: name.to_string(),
                        kind: HydroKind::River,
                        coord: Coord::new(lat, lon),
                        value: rng.gen_range(0.0..0.3),
                        unit: "m".to_string(),
                        status: StationStatus::Normal,
                        observed_at: now,
                    })
                    .collect()
            }
            HydroKind::Rainfall => vec![HydroSample {
                station_id: "Science Garden".to_string(),
                kind: HydroKind::Rainfall,
                coord: Coord::new(14.6440, 121.0440),
                value: rng.gen_range(0.0..5.0),
                unit: "mm/h".to_string(),
                status: StationStatus::Normal,
                observed_at: now,
            }],
            HydroKind::Dam => vec![HydroSample {
                station_id: "Wawa Dam".to_string(),
                kind: HydroKind::Dam,
                coord: Coord::new(14.7280, 121.1910),
                value: rng.gen_range(0.0..1.0),
                unit: "m".to_string(),
                status: StationStatus::Normal,
                observed_at: now,
            }],
        };
        Ok(samples)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakySource {
        fails_before: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl HydroSource for FlakySource {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn fetch(&self) -> Result<Vec<HydroSample>, CollectError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fails_before {
                Err(CollectError::BadSchema("boom".to_string()))
            } else {
                Ok(vec![HydroSample {
                    station_id: "s".to_string(),
                    kind: HydroKind::River,
                    coord: Coord::new(14.65, 121.10),
                    value: 0.2,
                    unit: "m".to_string(),
                    status: StationStatus::Normal,
                    observed_at: Utc::now(),
                }])
            }
        }
    }

    struct DeadSource;

    #[async_trait]
    impl HydroSource for DeadSource {
        fn name(&self) -> &str {
            "dead"
        }

        async fn fetch(&self) -> Result<Vec<HydroSample>, CollectError> {
            Err(CollectError::BadSchema("always down".to_string()))
        }
    }

    fn fixture(sources: Vec<Box<dyn HydroSource>>) -> (FloodCollector, Arc<MessageBus>, Arc<Mutex<FloodCollectorStats>>) {
        let bus = Arc::new(MessageBus::with_soft_cap(100));
        bus.register(agent_ids::HAZARD).unwrap();
        bus.register(agent_ids::FLOOD_COLLECTOR).unwrap();
        bus.register(agent_ids::SCHEDULER).unwrap();
        let stats = Arc::new(Mutex::new(FloodCollectorStats::default()));
        let collector = FloodCollector::new(bus.clone(), sources, stats.clone());
        (collector, bus, stats)
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_recovers_flaky_source() {
        let source = FlakySource {
            fails_before: 2,
            calls: AtomicU32::new(0),
        };
        let result = fetch_with_retry(&source, 3).await;
        assert_eq!(result.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_gives_up() {
        let source = FlakySource {
            fails_before: 10,
            calls: AtomicU32::new(0),
        };
        assert!(fetch_with_retry(&source, 3).await.is_err());
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_partial_failure_still_emits_batch() {
        let (collector, bus, stats) = fixture(vec![
            Box::new(FlakySource { fails_before: 0, calls: AtomicU32::new(0) }),
            Box::new(DeadSource),
        ]);

        collector.collect_round(None).await;

        let batch = bus.try_receive(agent_ids::HAZARD).unwrap().unwrap();
        match batch.payload {
            Payload::FloodDataBatch { samples } => assert_eq!(samples.len(), 1),
            other => panic!("expected flood batch, got {}", other.content_type()),
        }
        let s = stats.lock().unwrap();
        assert_eq!(s.successful_runs, 1);
        assert_eq!(s.data_points_collected, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_sources_failed_is_failure_outcome() {
        let (collector, bus, stats) = fixture(vec![Box::new(DeadSource), Box::new(DeadSource)]);

        let request = Envelope::request(
            agent_ids::SCHEDULER,
            agent_ids::FLOOD_COLLECTOR,
            Payload::CollectNow,
            "tick-1",
        );
        collector.collect_round(Some(&request)).await;

        // No batch reaches hazard
        assert!(bus.try_receive(agent_ids::HAZARD).unwrap().is_none());
        // The requester gets a FAILURE
        let reply = bus.try_receive(agent_ids::SCHEDULER).unwrap().unwrap();
        assert_eq!(reply.performative, Performative::Failure);
        assert_eq!(stats.lock().unwrap().failed_runs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_collect_now_confirms_with_stats() {
        let (collector, bus, _stats) = fixture(vec![Box::new(FlakySource {
            fails_before: 0,
            calls: AtomicU32::new(0),
        })]);

        let request = Envelope::request(
            agent_ids::SCHEDULER,
            agent_ids::FLOOD_COLLECTOR,
            Payload::CollectNow,
            "tick-2",
        );
        collector.collect_round(Some(&request)).await;

        let reply = bus.try_receive(agent_ids::SCHEDULER).unwrap().unwrap();
        assert_eq!(reply.performative, Performative::Confirm);
        assert_eq!(reply.conversation_id.as_deref(), Some("tick-2"));
        match reply.payload {
            Payload::Confirm { summary } => assert_eq!(summary["data_points"], 1),
            other => panic!("expected confirm, got {}", other.content_type()),
        }
    }

    #[test]
    fn test_parse_status() {
        assert_eq!(parse_status("alert"), StationStatus::Alert);
        assert_eq!(parse_status("CRITICAL"), StationStatus::Critical);
        assert_eq!(parse_status("whatever"), StationStatus::Normal);
    }
}
