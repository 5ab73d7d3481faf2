//! System-wide default constants.
//!
//! Centralises the behavioral tables of the risk and routing engines.
//! Changing any value here is a breaking behavioral change; the tables
//! are pinned by unit tests. Grouped by subsystem for easy discovery.

// ============================================================================
// Service area (Marikina City)
// ============================================================================

/// Southern edge of the service-area bounding box (degrees latitude).
pub const SERVICE_AREA_LAT_MIN: f64 = 14.60;

/// Northern edge of the service-area bounding box (degrees latitude).
pub const SERVICE_AREA_LAT_MAX: f64 = 14.74;

/// Western edge of the service-area bounding box (degrees longitude).
pub const SERVICE_AREA_LON_MIN: f64 = 121.05;

/// Eastern edge of the service-area bounding box (degrees longitude).
pub const SERVICE_AREA_LON_MAX: f64 = 121.15;

// ============================================================================
// Graph & spatial index
// ============================================================================

/// Maximum snap distance from a free coordinate to the nearest node (meters).
pub const SNAP_MAX_DISTANCE_M: f64 = 2_000.0;

/// Cell size of the uniform spatial grid used for nearest-node and
/// edge-midpoint queries (meters). ~250 m keeps ring searches short at
/// Marikina's node density.
pub const SPATIAL_GRID_CELL_M: f64 = 250.0;

// ============================================================================
// Flood rasters
// ============================================================================

/// Depths at or below this value are treated as dry ground (meters).
pub const FLOOD_EPS: f64 = 0.01;

/// Maximum number of flood raster tiles kept resident (LRU eviction).
pub const RASTER_CACHE_TILES: usize = 16;

// ============================================================================
// Risk calculator
// ============================================================================

/// Gravitational acceleration used by the energy-head formula (m/s²).
pub const GRAVITY_MS2: f64 = 9.81;

/// Energy-head breakpoints (meters) of the depth→risk piecewise curve.
pub const ENERGY_HEAD_DRY_M: f64 = 0.1;
pub const ENERGY_HEAD_LOW_M: f64 = 0.3;
pub const ENERGY_HEAD_MODERATE_M: f64 = 0.6;
pub const ENERGY_HEAD_HIGH_M: f64 = 1.0;

/// Base risk at each breakpoint of the piecewise curve.
pub const RISK_AT_LOW: f64 = 0.4;
pub const RISK_AT_MODERATE: f64 = 0.7;
pub const RISK_AT_HIGH: f64 = 0.9;

/// Slope of the residual linear segment above the last breakpoint.
pub const RISK_TAIL_SLOPE: f64 = 0.1;

// ============================================================================
// Hazard fusion
// ============================================================================

/// Weight of the GeoTIFF depth contribution in the combined edge risk.
pub const W_FLOOD: f64 = 0.5;

/// Weight of crowdsourced reports in the environmental contribution.
pub const W_CROWD: f64 = 0.3;

/// Weight of hydrological/historical risk in the environmental contribution.
pub const W_HIST: f64 = 0.2;

/// Radius of environmental risk diffusion around a fused location (meters).
pub const DIFFUSION_RADIUS_M: f64 = 800.0;

/// Fraction of the normal contribution applied graph-wide when a location
/// cannot be geocoded.
pub const GLOBAL_FALLBACK_FACTOR: f64 = 0.1;

/// Rainfall-rate thresholds (mm/h) and the risks they map to.
pub const RAIN_MM_EXTREME: f64 = 30.0;
pub const RAIN_MM_INTENSE: f64 = 15.0;
pub const RAIN_MM_HEAVY: f64 = 7.5;
pub const RAIN_MM_MODERATE: f64 = 2.5;
pub const RAIN_RISK_EXTREME: f64 = 0.8;
pub const RAIN_RISK_INTENSE: f64 = 0.6;
pub const RAIN_RISK_HEAVY: f64 = 0.4;
pub const RAIN_RISK_MODERATE: f64 = 0.2;

/// Rainfall is predictive rather than observed depth, so it enters the
/// hydro risk at half weight.
pub const RAIN_RISK_DISCOUNT: f64 = 0.5;

/// Edge risk at or above this level is classified critical.
pub const CRITICAL_RISK_THRESHOLD: f64 = 0.85;

/// Risk-histogram band edges.
pub const HISTOGRAM_LOW_BELOW: f64 = 0.3;
pub const HISTOGRAM_MODERATE_BELOW: f64 = 0.6;
pub const HISTOGRAM_HIGH_BELOW: f64 = 0.85;

/// Minimum spacing between critical alerts for the same station (seconds).
pub const CRITICAL_ALERT_DEBOUNCE_SECS: u64 = 60;

/// Consecutive failed fusion passes before the process gives up and exits
/// non-zero for the supervisor to restart.
pub const MAX_CONSECUTIVE_FUSION_FAILURES: u32 = 5;

// ============================================================================
// Collectors
// ============================================================================

/// Period between scheduled collection rounds (seconds).
pub const COLLECTION_PERIOD_SECS: u64 = 300;

/// Per-source fetch timeout (seconds).
pub const SOURCE_TIMEOUT_SECS: u64 = 15;

/// Retry attempts per source per round.
pub const SOURCE_RETRY_ATTEMPTS: u32 = 3;

/// Exponential backoff base between retries (seconds): 1, 2, 4.
pub const SOURCE_BACKOFF_BASE_SECS: u64 = 1;

/// Upper bound on the full jitter added to each backoff (milliseconds).
pub const SOURCE_BACKOFF_JITTER_MS: u64 = 500;

// ============================================================================
// Router
// ============================================================================

/// Mode weight pairs (W_dist, W_risk).
pub const SAFEST_W_DIST: f64 = 0.1;
pub const SAFEST_W_RISK: f64 = 0.9;
pub const BALANCED_W_DIST: f64 = 0.5;
pub const BALANCED_W_RISK: f64 = 0.5;
pub const FASTEST_W_DIST: f64 = 0.8;
pub const FASTEST_W_RISK: f64 = 0.2;

/// Safest mode suppresses edges strictly above this risk.
pub const SAFEST_RISK_CAP: f64 = 0.9;

/// Balanced/fastest modes suppress edges at or above this risk.
pub const IMPASSABLE_RISK: f64 = 1.0;

/// Route warnings trigger at these risk levels.
pub const WARN_HIGH_RISK: f64 = 0.7;

/// Fixed urban travel speed for ETA estimation: 30 km/h = 500 m/min.
pub const URBAN_SPEED_M_PER_MIN: f64 = 500.0;

// ============================================================================
// Evacuation
// ============================================================================

/// Risk penalty (meters per unit of max risk) in shelter scoring.
/// Sized so a single 0.9-risk crossing (2 250 m) outweighs 2 km of safe road.
pub const EVACUATION_RISK_LAMBDA: f64 = 2_500.0;

// ============================================================================
// Message bus
// ============================================================================

/// Soft cap on mailbox depth before the oldest non-critical INFORM is dropped.
pub const MAILBOX_SOFT_CAP: usize = 10_000;

/// Default receive timeout when an agent loop polls its mailbox (seconds).
pub const MAILBOX_POLL_TIMEOUT_SECS: u64 = 1;

// ============================================================================
// Orchestrator
// ============================================================================

/// Per-state mission timeouts (seconds).
pub const MISSION_SCOUT_TIMEOUT_SECS: u64 = 30;
pub const MISSION_FLOOD_TIMEOUT_SECS: u64 = 60;
pub const MISSION_HAZARD_TIMEOUT_SECS: u64 = 30;
pub const MISSION_ROUTING_TIMEOUT_SECS: u64 = 30;
pub const MISSION_EVACUATION_TIMEOUT_SECS: u64 = 30;

/// Completed missions retained for inspection.
pub const MISSION_HISTORY_SIZE: usize = 1_024;

// ============================================================================
// Live broadcaster
// ============================================================================

/// Per-subscriber buffered messages before a slow consumer is dropped.
pub const BROADCAST_SUBSCRIBER_BUFFER: usize = 64;

/// Idle heartbeat interval on the live channel (seconds).
pub const BROADCAST_HEARTBEAT_SECS: u64 = 30;

/// Broadcaster flush window at shutdown (seconds).
pub const BROADCAST_FLUSH_SECS: u64 = 2;
