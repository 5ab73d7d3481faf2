//! AGOS - Flood-Aware Route Optimization Service
//!
//! Real-time hazard fusion and risk-aware routing for the Marikina City
//! road network.
//!
//! # Usage
//!
//! ```bash
//! # Run with the default asset layout under ./data
//! cargo run --release
//!
//! # Override the bind address
//! cargo run --release -- --addr 0.0.0.0:9090
//! ```
//!
//! # Environment Variables
//!
//! - `AGOS_CONFIG`: Path to a TOML config file (default: ./agos.toml)
//! - `AGOS_WEATHER_API_KEY`: Weather API key; simulated telemetry when unset
//! - `AGOS_FEED_TOKEN`: Social feed credential; replay mode when unset
//! - `RUST_LOG`: Logging level (default: info)

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use agos::api::{create_app, ApiState, SystemStats};
use agos::broadcast::Broadcaster;
use agos::bus::{agent_ids, MessageBus};
use agos::collectors::flood::{
    DamStatusSource, FloodCollector, HydroSource, RainfallSource, RiverGaugeSource,
    SimulatedHydroSource,
};
use agos::collectors::scout::{Gazetteer, ScoutCollector};
use agos::config::{self, AgosConfig};
use agos::graph::load_network;
use agos::hazard::{HazardAgent, ScenarioHandle};
use agos::orchestrator::{MissionStore, Orchestrator};
use agos::raster::FloodCatalog;
use agos::routing::{load_shelters, EvacuationAgent, EvacuationPlanner, Router, RouterAgent};
use agos::scheduler::Scheduler;

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(name = "agos")]
#[command(about = "Flood-aware route optimization service for Marikina City")]
#[command(version)]
struct CliArgs {
    /// Override the server bind address (default from config: "0.0.0.0:8080")
    #[arg(short, long)]
    addr: Option<String>,

    /// Disable scout collection entirely (flood telemetry only)
    #[arg(long)]
    no_scout: bool,
}

/// Task identification for supervisor logging
#[derive(Debug, Clone, Copy)]
enum TaskName {
    HttpServer,
    HazardAgent,
    FloodCollector,
    ScoutCollector,
    RouterAgent,
    EvacuationAgent,
    Orchestrator,
    Scheduler,
    Heartbeat,
    ApiDrain,
}

impl std::fmt::Display for TaskName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskName::HttpServer => write!(f, "HttpServer"),
            TaskName::HazardAgent => write!(f, "HazardAgent"),
            TaskName::FloodCollector => write!(f, "FloodCollector"),
            TaskName::ScoutCollector => write!(f, "ScoutCollector"),
            TaskName::RouterAgent => write!(f, "RouterAgent"),
            TaskName::EvacuationAgent => write!(f, "EvacuationAgent"),
            TaskName::Orchestrator => write!(f, "Orchestrator"),
            TaskName::Scheduler => write!(f, "Scheduler"),
            TaskName::Heartbeat => write!(f, "Heartbeat"),
            TaskName::ApiDrain => write!(f, "ApiDrain"),
        }
    }
}

/// Pick the flood telemetry sources: live endpoints when a weather API key
/// is configured, synthetic readings otherwise.
fn build_hydro_sources() -> Vec<Box<dyn HydroSource>> {
    match std::env::var("AGOS_WEATHER_API_KEY") {
        Ok(key) if !key.is_empty() => {
            info!("Weather API key present, using live telemetry endpoints");
            vec![
                Box::new(RiverGaugeSource::new(
                    "https://pasig-marikina.example/api/river-gauges".to_string(),
                )),
                Box::new(RainfallSource::new(
                    "https://api.openweathermap.org/data/2.5/group".to_string(),
                    key,
                )),
                Box::new(DamStatusSource::new(
                    "https://pasig-marikina.example/api/dam-status".to_string(),
                )),
            ]
        }
        _ => {
            info!("No weather API key, using simulated telemetry");
            SimulatedHydroSource::standard_set()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    config::init(AgosConfig::load());
    let cfg = config::get();
    let server_addr = args.addr.clone().unwrap_or_else(|| cfg.server.bind_addr.clone());

    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("  AGOS - Flood-Aware Route Optimization");
    info!("  Marikina City road network");
    info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    info!("");

    // ------------------------------------------------------------------
    // Load persistent assets
    // ------------------------------------------------------------------

    info!("🗺️  Loading road network...");
    let graph = Arc::new(
        load_network(&cfg.assets.road_network).context("road network load failed")?,
    );

    info!("🌊 Opening flood raster catalog...");
    let catalog = Arc::new(FloodCatalog::with_capacity(
        cfg.assets.floodmaps_dir.clone(),
        cfg.assets.raster_cache_tiles,
    ));

    info!("🏫 Loading shelter registry...");
    let shelters =
        load_shelters(&cfg.assets.shelters).context("shelter registry load failed")?;

    info!("📍 Loading location gazetteer...");
    let gazetteer = Arc::new(
        Gazetteer::load(&cfg.assets.gazetteer).context("gazetteer load failed")?,
    );

    // ------------------------------------------------------------------
    // Wire the components
    // ------------------------------------------------------------------

    let bus = Arc::new(MessageBus::new());
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
        bus.register(id)
            .map_err(|e| anyhow::anyhow!("bus setup: {e}"))?;
    }

    let broadcaster = Broadcaster::new();
    let scenario = Arc::new(ScenarioHandle::default());
    let stats = SystemStats::new();
    let missions = Arc::new(std::sync::Mutex::new(MissionStore::new(
        config::defaults::MISSION_HISTORY_SIZE,
    )));

    let router = Router::new(graph.clone());
    let evacuation = Arc::new(EvacuationPlanner::new(
        router.clone(),
        graph.clone(),
        shelters,
    ));

    let hazard_agent = HazardAgent::new(
        graph.clone(),
        catalog.clone(),
        bus.clone(),
        broadcaster.clone(),
        scenario.clone(),
        stats.hazard.clone(),
    );
    let flood_collector = FloodCollector::new(bus.clone(), build_hydro_sources(), stats.flood.clone());
    let scout_collector = ScoutCollector::new(bus.clone(), gazetteer, stats.scout.clone());
    let router_agent = RouterAgent::new(router.clone(), bus.clone());
    let evacuation_agent = EvacuationAgent::new(evacuation.clone(), bus.clone());
    let orchestrator = Orchestrator::new(bus.clone(), missions.clone());
    let scout_enabled = !args.no_scout;
    let scheduler = Scheduler::new(bus.clone(), stats.scheduler.clone(), scout_enabled);
    let scheduler_handle = scheduler.handle();

    let api_state = ApiState {
        graph: graph.clone(),
        router,
        evacuation,
        bus: bus.clone(),
        broadcaster: broadcaster.clone(),
        scenario,
        missions,
        scheduler: scheduler_handle.clone(),
        stats,
    };
    let app = create_app(api_state);

    let listener = tokio::net::TcpListener::bind(&server_addr)
        .await
        .with_context(|| format!("Failed to bind to {server_addr}"))?;
    info!("✓ HTTP server listening on {}", server_addr);
    info!("");

    // ------------------------------------------------------------------
    // Spawn the agent tasks under the supervisor
    // ------------------------------------------------------------------

    let cancel_token = CancellationToken::new();
    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("🛑 Shutdown signal received, stopping...");
        shutdown_token.cancel();
    });

    info!("🔒 Supervisor: Initializing task monitoring");
    let mut task_set: JoinSet<Result<TaskName>> = JoinSet::new();

    // Task: HTTP server
    let http_cancel = cancel_token.clone();
    task_set.spawn(async move {
        info!("[HttpServer] Task starting");
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                http_cancel.cancelled().await;
                info!("[HttpServer] Received shutdown signal");
            })
            .await;
        match result {
            Ok(()) => Ok(TaskName::HttpServer),
            Err(e) => Err(anyhow::anyhow!("HTTP server error: {e}")),
        }
    });

    // Task: hazard fusion agent (fatal on unrecoverable failure)
    let hazard_cancel = cancel_token.clone();
    task_set.spawn(async move {
        hazard_agent.run(hazard_cancel).await?;
        Ok(TaskName::HazardAgent)
    });

    // Tasks: collectors, router, evacuation, orchestrator, scheduler
    let c = cancel_token.clone();
    task_set.spawn(async move {
        flood_collector.run(c).await;
        Ok(TaskName::FloodCollector)
    });
    let c = cancel_token.clone();
    task_set.spawn(async move {
        scout_collector.run(c).await;
        Ok(TaskName::ScoutCollector)
    });
    let c = cancel_token.clone();
    task_set.spawn(async move {
        router_agent.run(c).await;
        Ok(TaskName::RouterAgent)
    });
    let c = cancel_token.clone();
    task_set.spawn(async move {
        evacuation_agent.run(c).await;
        Ok(TaskName::EvacuationAgent)
    });
    let c = cancel_token.clone();
    task_set.spawn(async move {
        orchestrator.run(c).await;
        Ok(TaskName::Orchestrator)
    });
    let c = cancel_token.clone();
    task_set.spawn(async move {
        scheduler.run(c).await;
        Ok(TaskName::Scheduler)
    });

    // Task: broadcast heartbeat
    let c = cancel_token.clone();
    let heartbeat = broadcaster.clone();
    task_set.spawn(async move {
        heartbeat.run_heartbeat(c).await;
        Ok(TaskName::Heartbeat)
    });

    // Task: drain replies addressed to the HTTP surface (admin CONFIRMs)
    let c = cancel_token.clone();
    let drain_bus = bus.clone();
    task_set.spawn(async move {
        loop {
            tokio::select! {
                _ = c.cancelled() => return Ok(TaskName::ApiDrain),
                received = drain_bus.receive("api", Duration::from_secs(5)) => {
                    if received.is_err() {
                        return Ok(TaskName::ApiDrain);
                    }
                }
            }
        }
    });

    // Prime the pipeline: one collection round at startup
    scheduler_handle.trigger_now();

    // ------------------------------------------------------------------
    // Supervisor loop
    // ------------------------------------------------------------------

    info!("🔒 Supervisor: All tasks spawned, monitoring...");
    let mut exit_result: Result<()> = Ok(());

    loop {
        tokio::select! {
            _ = cancel_token.cancelled() => {
                info!("🛑 Supervisor: Shutdown signal received");
                break;
            }
            result = task_set.join_next() => {
                match result {
                    Some(Ok(Ok(task_name))) => {
                        info!("🔒 Supervisor: Task {} completed normally", task_name);
                    }
                    Some(Ok(Err(e))) => {
                        error!("🔒 Supervisor: Task failed with error: {e}");
                        cancel_token.cancel();
                        exit_result = Err(e);
                        break;
                    }
                    Some(Err(e)) => {
                        error!("🔒 Supervisor: Task panicked: {e}");
                        cancel_token.cancel();
                        exit_result = Err(anyhow::anyhow!("Task panicked: {e}"));
                        break;
                    }
                    None => {
                        info!("🔒 Supervisor: All tasks completed");
                        break;
                    }
                }
            }
        }
    }

    // Cooperative drain: flush the broadcaster, then give the remaining
    // tasks a bounded window
    broadcaster.flush().await;
    let drain = tokio::time::timeout(Duration::from_secs(5), async {
        while task_set.join_next().await.is_some() {}
    })
    .await;
    if drain.is_err() {
        warn!("Drain window elapsed, abandoning remaining tasks");
        task_set.abort_all();
    }

    info!("");
    info!("✓ AGOS shutdown complete");
    exit_result
}

/// Wait for Ctrl+C or SIGTERM.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(s) => s,
            Err(_) => {
                tokio::signal::ctrl_c().await.ok();
                return;
            }
        };
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.ok();
    }
}
