//! Depth → risk mapping via the energy-head curve.
//!
//! Pure functions, no state. The curve and the road-class multiplier table
//! are pinned by the tests below; changing either is a breaking behavioral
//! change.

use crate::config;
use crate::config::defaults;
use crate::types::RoadClass;

/// Hydraulic energy head: `E = depth + v²/(2g)` (meters).
///
/// Velocity defaults to 0 when unknown, collapsing E to the depth.
pub fn energy_head(depth_m: f64, velocity_ms: f64) -> f64 {
    depth_m + velocity_ms * velocity_ms / (2.0 * defaults::GRAVITY_MS2)
}

/// Base risk from energy head, before the road-class multiplier.
///
/// Piecewise curve:
/// - `E ≤ 0.1` → 0
/// - `E ≤ 0.3` → linear 0 → 0.4
/// - `E ≤ 0.6` → linear 0.4 → 0.7
/// - `E ≤ 1.0` → linear 0.7 → 0.9
/// - `E > 1.0` → `min(0.9 + (E − 1.0)·0.1, 1.0)`
pub fn base_risk(energy_head_m: f64) -> f64 {
    let e = energy_head_m;
    if e <= defaults::ENERGY_HEAD_DRY_M {
        0.0
    } else if e <= defaults::ENERGY_HEAD_LOW_M {
        let span = defaults::ENERGY_HEAD_LOW_M - defaults::ENERGY_HEAD_DRY_M;
        defaults::RISK_AT_LOW * (e - defaults::ENERGY_HEAD_DRY_M) / span
    } else if e <= defaults::ENERGY_HEAD_MODERATE_M {
        let span = defaults::ENERGY_HEAD_MODERATE_M - defaults::ENERGY_HEAD_LOW_M;
        defaults::RISK_AT_LOW
            + (defaults::RISK_AT_MODERATE - defaults::RISK_AT_LOW)
                * (e - defaults::ENERGY_HEAD_LOW_M)
                / span
    } else if e <= defaults::ENERGY_HEAD_HIGH_M {
        let span = defaults::ENERGY_HEAD_HIGH_M - defaults::ENERGY_HEAD_MODERATE_M;
        defaults::RISK_AT_MODERATE
            + (defaults::RISK_AT_HIGH - defaults::RISK_AT_MODERATE)
                * (e - defaults::ENERGY_HEAD_MODERATE_M)
                / span
    } else {
        (defaults::RISK_AT_HIGH + (e - defaults::ENERGY_HEAD_HIGH_M) * defaults::RISK_TAIL_SLOPE)
            .min(1.0)
    }
}

/// Full risk for a flooded road segment: energy-head curve scaled by the
/// road-class multiplier, clamped to [0,1].
pub fn road_risk(depth_m: f64, velocity_ms: f64, road_class: RoadClass) -> f64 {
    let base = base_risk(energy_head(depth_m, velocity_ms));
    let multiplier = config::get().risk.multiplier(road_class);
    (base * multiplier).clamp(0.0, 1.0)
}

/// Depth-only risk with zero velocity and no road-class scaling. Used for
/// station depth readings where no road segment is involved.
pub fn depth_risk(depth_m: f64) -> f64 {
    base_risk(energy_head(depth_m, 0.0))
}

/// Hourly rainfall rate (mm/h) → predictive risk, by threshold bands.
pub fn rainfall_risk(rate_mm_h: f64) -> f64 {
    if rate_mm_h > defaults::RAIN_MM_EXTREME {
        defaults::RAIN_RISK_EXTREME
    } else if rate_mm_h > defaults::RAIN_MM_INTENSE {
        defaults::RAIN_RISK_INTENSE
    } else if rate_mm_h > defaults::RAIN_MM_HEAVY {
        defaults::RAIN_RISK_HEAVY
    } else if rate_mm_h > defaults::RAIN_MM_MODERATE {
        defaults::RAIN_RISK_MODERATE
    } else {
        0.0
    }
}
