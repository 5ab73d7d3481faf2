//! Service Configuration - risk, fusion, and routing tables as operator-tunable TOML values
//!
//! Every threshold that drives risk, fusion, or routing behavior is a field
//! in this module. Each struct implements `Default` with values matching the
//! pinned constants in [`super::defaults`], ensuring zero-change behavior when
//! no config file is present.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::defaults;
use crate::types::RoadClass;

// ============================================================================
// Top-Level Config
// ============================================================================

/// Root configuration for a deployment.
///
/// Load with `AgosConfig::load()` which searches:
/// 1. `$AGOS_CONFIG` env var
/// 2. `./agos.toml`
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgosConfig {
    /// HTTP server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Paths to persistent input assets
    #[serde(default)]
    pub assets: AssetConfig,

    /// Service-area bounding box and snap limits
    #[serde(default)]
    pub service_area: ServiceAreaConfig,

    /// Risk calculator tables
    #[serde(default)]
    pub risk: RiskConfig,

    /// Hazard fusion weights and radii
    #[serde(default)]
    pub fusion: FusionConfig,

    /// Collector periods, timeouts, and retry policy
    #[serde(default)]
    pub collectors: CollectorConfig,

    /// Router mode presets
    #[serde(default)]
    pub router: RouterConfig,

    /// Evacuation planner tuning
    #[serde(default)]
    pub evacuation: EvacuationConfig,

    /// Message bus limits
    #[serde(default)]
    pub bus: BusConfig,

    /// Live broadcast channel limits
    #[serde(default)]
    pub broadcast: BroadcastConfig,
}

impl Default for AgosConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            assets: AssetConfig::default(),
            service_area: ServiceAreaConfig::default(),
            risk: RiskConfig::default(),
            fusion: FusionConfig::default(),
            collectors: CollectorConfig::default(),
            router: RouterConfig::default(),
            evacuation: EvacuationConfig::default(),
            bus: BusConfig::default(),
            broadcast: BroadcastConfig::default(),
        }
    }
}

impl AgosConfig {
    /// Load configuration using the standard search order:
    /// 1. `$AGOS_CONFIG` environment variable
    /// 2. `./agos.toml` in the current working directory
    /// 3. Built-in defaults
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("AGOS_CONFIG") {
            let p = PathBuf::from(&path);
            if p.exists() {
                match Self::load_from_file(&p) {
                    Ok(config) => {
                        info!(path = %p.display(), "Loaded service config from AGOS_CONFIG");
                        return config;
                    }
                    Err(e) => {
                        warn!(path = %p.display(), error = %e, "Failed to load config from AGOS_CONFIG, falling back");
                    }
                }
            } else {
                warn!(path = %path, "AGOS_CONFIG points to non-existent file, falling back");
            }
        }

        let local = PathBuf::from("agos.toml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => {
                    info!("Loaded service config from ./agos.toml");
                    return config;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to load ./agos.toml, using defaults");
                }
            }
        }

        info!("No agos.toml found — using built-in defaults");
        Self::default()
    }

    /// Load from a specific TOML file path.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Io(path.display().to_string(), e))?;
        let config: Self = toml::from_str(&contents)
            .map_err(|e| ConfigError::Parse(path.display().to_string(), e))?;
        Ok(config)
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {0}: {1}")]
    Io(String, #[source] std::io::Error),
    #[error("failed to parse config file {0}: {1}")]
    Parse(String, #[source] toml::de::Error),
}

// ============================================================================
// Sections
// ============================================================================

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Bind address for the HTTP/WS surface
    #[serde(default = "ServerConfig::default_bind_addr")]
    pub bind_addr: String,
}

impl ServerConfig {
    fn default_bind_addr() -> String {
        "0.0.0.0:8080".to_string()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: Self::default_bind_addr(),
        }
    }
}

/// Paths to the persistent input assets on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetConfig {
    /// Serialized street network (JSON: nodes + edges)
    pub road_network: PathBuf,
    /// Root of the flood raster tree: `<root>/<rp>/<rp>-<ts>.tif`
    pub floodmaps_dir: PathBuf,
    /// Maximum resident flood tiles (LRU eviction beyond this)
    #[serde(default = "AssetConfig::default_raster_cache_tiles")]
    pub raster_cache_tiles: usize,
    /// Shelter registry CSV: name, lat, lon, capacity, type, barangay
    pub shelters: PathBuf,
    /// Location gazetteer CSV: name, lat, lon
    pub gazetteer: PathBuf,
    /// Optional scout replay file (JSONL) for simulation mode
    pub scout_replay: Option<PathBuf>,
}

impl AssetConfig {
    fn default_raster_cache_tiles() -> usize {
        defaults::RASTER_CACHE_TILES
    }
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            road_network: PathBuf::from("data/marikina_graph.json"),
            floodmaps_dir: PathBuf::from("data/floodmaps"),
            raster_cache_tiles: defaults::RASTER_CACHE_TILES,
            shelters: PathBuf::from("data/evacuation_centers.csv"),
            gazetteer: PathBuf::from("data/locations.csv"),
            scout_replay: Some(PathBuf::from("data/scout_replay.jsonl")),
        }
    }
}

/// Service-area bounding box and snap limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ServiceAreaConfig {
    pub lat_min: f64,
    pub lat_max: f64,
    pub lon_min: f64,
    pub lon_max: f64,
    /// Maximum distance a free coordinate may be from the nearest node (meters)
    pub snap_max_distance_m: f64,
}

impl Default for ServiceAreaConfig {
    fn default() -> Self {
        Self {
            lat_min: defaults::SERVICE_AREA_LAT_MIN,
            lat_max: defaults::SERVICE_AREA_LAT_MAX,
            lon_min: defaults::SERVICE_AREA_LON_MIN,
            lon_max: defaults::SERVICE_AREA_LON_MAX,
            snap_max_distance_m: defaults::SNAP_MAX_DISTANCE_M,
        }
    }
}

impl ServiceAreaConfig {
    /// Check whether a (lat, lon) pair falls inside the service area.
    pub fn contains(&self, lat: f64, lon: f64) -> bool {
        lat >= self.lat_min && lat <= self.lat_max && lon >= self.lon_min && lon <= self.lon_max
    }
}

/// Risk calculator tables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Road-class risk multipliers applied after the energy-head curve.
    /// Higher for bridges and low-lying service roads; 1.0 for primary.
    #[serde(default = "RiskConfig::default_multipliers")]
    pub road_class_multipliers: HashMap<RoadClass, f64>,
}

impl RiskConfig {
    fn default_multipliers() -> HashMap<RoadClass, f64> {
        HashMap::from([
            (RoadClass::Primary, 1.0),
            (RoadClass::Secondary, 1.0),
            (RoadClass::Tertiary, 1.05),
            (RoadClass::Residential, 1.1),
            (RoadClass::Service, 1.2),
            (RoadClass::Bridge, 1.3),
            (RoadClass::Highway, 0.95),
        ])
    }

    /// Multiplier for a road class, 1.0 when unconfigured.
    pub fn multiplier(&self, class: RoadClass) -> f64 {
        self.road_class_multipliers.get(&class).copied().unwrap_or(1.0)
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            road_class_multipliers: Self::default_multipliers(),
        }
    }
}

/// Hazard fusion weights and radii.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FusionConfig {
    pub w_flood: f64,
    pub w_crowd: f64,
    pub w_hist: f64,
    pub diffusion_radius_m: f64,
    pub global_fallback_factor: f64,
    pub critical_alert_debounce_secs: u64,
    pub max_consecutive_failures: u32,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            w_flood: defaults::W_FLOOD,
            w_crowd: defaults::W_CROWD,
            w_hist: defaults::W_HIST,
            diffusion_radius_m: defaults::DIFFUSION_RADIUS_M,
            global_fallback_factor: defaults::GLOBAL_FALLBACK_FACTOR,
            critical_alert_debounce_secs: defaults::CRITICAL_ALERT_DEBOUNCE_SECS,
            max_consecutive_failures: defaults::MAX_CONSECUTIVE_FUSION_FAILURES,
        }
    }
}

/// Collector periods, timeouts, and retry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectorConfig {
    /// Scheduler tick period (seconds)
    pub period_secs: u64,
    /// Per-source fetch timeout (seconds)
    pub source_timeout_secs: u64,
    /// Retry attempts per source per round
    pub retry_attempts: u32,
    /// Drop scout reports whose location cannot be resolved
    pub strict_scout_locations: bool,
    /// Poll the social feed instead of replaying the scenario file
    pub scout_feed_enabled: bool,
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            period_secs: defaults::COLLECTION_PERIOD_SECS,
            source_timeout_secs: defaults::SOURCE_TIMEOUT_SECS,
            retry_attempts: defaults::SOURCE_RETRY_ATTEMPTS,
            strict_scout_locations: false,
            scout_feed_enabled: false,
        }
    }
}

/// Router mode presets. The numeric pairs are pinned by tests; changing
/// them is a breaking behavioral change.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RouterConfig {
    pub safest_w_dist: f64,
    pub safest_w_risk: f64,
    pub safest_risk_cap: f64,
    pub balanced_w_dist: f64,
    pub balanced_w_risk: f64,
    pub fastest_w_dist: f64,
    pub fastest_w_risk: f64,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            safest_w_dist: defaults::SAFEST_W_DIST,
            safest_w_risk: defaults::SAFEST_W_RISK,
            safest_risk_cap: defaults::SAFEST_RISK_CAP,
            balanced_w_dist: defaults::BALANCED_W_DIST,
            balanced_w_risk: defaults::BALANCED_W_RISK,
            fastest_w_dist: defaults::FASTEST_W_DIST,
            fastest_w_risk: defaults::FASTEST_W_RISK,
        }
    }
}

/// Evacuation planner tuning.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvacuationConfig {
    /// Meters of penalty per unit of route max risk
    pub risk_lambda: f64,
}

impl Default for EvacuationConfig {
    fn default() -> Self {
        Self {
            risk_lambda: defaults::EVACUATION_RISK_LAMBDA,
        }
    }
}

/// Message bus limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BusConfig {
    pub mailbox_soft_cap: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            mailbox_soft_cap: defaults::MAILBOX_SOFT_CAP,
        }
    }
}

/// Live broadcast channel limits.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BroadcastConfig {
    pub subscriber_buffer: usize,
    pub heartbeat_secs: u64,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            subscriber_buffer: defaults::BROADCAST_SUBSCRIBER_BUFFER,
            heartbeat_secs: defaults::BROADCAST_HEARTBEAT_SECS,
        }
    }
}
