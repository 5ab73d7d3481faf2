//! Hazard signal types: scenarios, hydrological samples, scout reports,
//! and the fused per-location risk records rebuilt on every fusion pass.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::Coord;

// ============================================================================
// Scenario
// ============================================================================

/// Flood-map return period: the storm magnitude a raster set models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReturnPeriod {
    /// 2-year flood
    Rr01,
    /// 5-year flood
    Rr02,
    /// 10-year flood
    Rr03,
    /// 25-year flood
    Rr04,
}

impl ReturnPeriod {
    pub const ALL: [ReturnPeriod; 4] = [
        ReturnPeriod::Rr01,
        ReturnPeriod::Rr02,
        ReturnPeriod::Rr03,
        ReturnPeriod::Rr04,
    ];

    /// Directory / file stem used by the raster tree (`rr01`..`rr04`).
    pub fn stem(&self) -> &'static str {
        match self {
            ReturnPeriod::Rr01 => "rr01",
            ReturnPeriod::Rr02 => "rr02",
            ReturnPeriod::Rr03 => "rr03",
            ReturnPeriod::Rr04 => "rr04",
        }
    }

    /// Parse the `rr01`..`rr04` form used by admin requests.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rr01" => Some(ReturnPeriod::Rr01),
            "rr02" => Some(ReturnPeriod::Rr02),
            "rr03" => Some(ReturnPeriod::Rr03),
            "rr04" => Some(ReturnPeriod::Rr04),
            _ => None,
        }
    }
}

impl fmt::Display for ReturnPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.stem())
    }
}

/// Number of hourly time steps modeled per return period.
pub const TIME_STEPS: u8 = 18;

/// The active flood scenario: which raster the GeoTIFF contribution samples.
///
/// Owned by the hazard core; admin endpoints mutate it via a typed message,
/// and every change triggers exactly one fusion pass.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    pub return_period: ReturnPeriod,
    /// Hour index within the modeled storm, 1..=18
    pub time_step: u8,
    pub geotiff_enabled: bool,
}

impl Default for Scenario {
    fn default() -> Self {
        Self {
            return_period: ReturnPeriod::Rr01,
            time_step: 1,
            geotiff_enabled: false,
        }
    }
}

impl Scenario {
    /// Validate a (return period, time step) pair from an admin request.
    pub fn validate(rp: &str, ts: u8) -> Result<(ReturnPeriod, u8), String> {
        let rp = ReturnPeriod::parse(rp)
            .ok_or_else(|| format!("unknown return period '{}', expected rr01..rr04", rp))?;
        if !(1..=TIME_STEPS).contains(&ts) {
            return Err(format!("time step {} outside 1..={}", ts, TIME_STEPS));
        }
        Ok((rp, ts))
    }
}

// ============================================================================
// Hydrological telemetry
// ============================================================================

/// Kind of station a hydrological sample originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HydroKind {
    River,
    Rainfall,
    Dam,
}

impl fmt::Display for HydroKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HydroKind::River => write!(f, "river"),
            HydroKind::Rainfall => write!(f, "rainfall"),
            HydroKind::Dam => write!(f, "dam"),
        }
    }
}

/// Official alert level attached to a station reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StationStatus {
    Normal,
    Alert,
    Alarm,
    Critical,
}

impl fmt::Display for StationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StationStatus::Normal => write!(f, "NORMAL"),
            StationStatus::Alert => write!(f, "ALERT"),
            StationStatus::Alarm => write!(f, "ALARM"),
            StationStatus::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// One reading from an official river / weather / dam telemetry source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HydroSample {
    pub station_id: String,
    pub kind: HydroKind,
    pub coord: Coord,
    /// Water depth (m) for river stations, rainfall rate (mm/h) for weather
    /// stations, spillway level (m) for dams. `unit` names the coercion.
    pub value: f64,
    pub unit: String,
    pub status: StationStatus,
    pub observed_at: DateTime<Utc>,
}

// ============================================================================
// Scout reports
// ============================================================================

/// Classified category of a crowdsourced report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportType {
    Flood,
    Blocked,
    Traffic,
    Clear,
    Other,
}

/// One crowdsourced flood observation after classification and geocoding.
///
/// `severity` and `confidence` are clamped to [0,1] at construction; a
/// present `coord` is guaranteed inside the service-area bounding box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoutReport {
    pub text: String,
    pub location_name: Option<String>,
    pub coord: Option<Coord>,
    pub severity: f64,
    pub confidence: f64,
    pub report_type: ReportType,
    pub is_flood_related: bool,
    pub observed_at: DateTime<Utc>,
}

impl ScoutReport {
    /// Clamp severity and confidence into [0,1].
    pub fn clamped(mut self) -> Self {
        self.severity = self.severity.clamp(0.0, 1.0);
        self.confidence = self.confidence.clamp(0.0, 1.0);
        self
    }

    /// Weight this report contributes to fusion.
    pub fn weight(&self) -> f64 {
        self.severity * self.confidence
    }
}

// ============================================================================
// Fused risk
// ============================================================================

/// Per-location risk record produced by one fusion pass. Rebuilt from
/// scratch every pass; lifetime is exactly one pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FusedLocationRisk {
    pub location_name: String,
    pub coord: Option<Coord>,
    pub risk_level: f64,
    /// Which signal families contributed (`geotiff`, `hydro`, `rain`, `scout`)
    pub sources: BTreeSet<String>,
    pub last_updated: DateTime<Utc>,
}

/// Risk-band counts over all edges. Bands: `< 0.3`, `< 0.6`, `< 0.85`, `≥ 0.85`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RiskHistogram {
    pub low: usize,
    pub moderate: usize,
    pub high: usize,
    pub critical: usize,
}

impl RiskHistogram {
    pub fn total(&self) -> usize {
        self.low + self.moderate + self.high + self.critical
    }
}
