//! Coordinate reference systems used by the flood raster set.
//!
//! The hazard maps are published either in geographic WGS84 or projected
//! UTM zone 51N (EPSG:32651, which covers Metro Manila). The transverse
//! Mercator forward projection below follows the standard series expansion
//! on the WGS84 ellipsoid; residual error is well under a meter inside the
//! service area, far below raster cell size.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::Coord;

/// WGS84 semi-major axis (m).
const WGS84_A: f64 = 6_378_137.0;

/// WGS84 flattening.
const WGS84_F: f64 = 1.0 / 298.257_223_563;

/// UTM scale factor at the central meridian.
const UTM_K0: f64 = 0.9996;

/// UTM false easting (m).
const UTM_FALSE_EASTING: f64 = 500_000.0;

/// Central meridian of UTM zone 51 (degrees).
const UTM51_CENTRAL_MERIDIAN_DEG: f64 = 123.0;

/// Projection failures surface as a degraded GeoTIFF contribution.
#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("unsupported raster CRS (EPSG:{0})")]
    UnsupportedCrs(u16),
}

/// Coordinate reference system tag read from a raster's geo keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Crs {
    /// EPSG:4326 — geographic, raster axes are degrees
    Wgs84,
    /// EPSG:32651 — UTM zone 51N, raster axes are meters
    Utm51N,
    /// Anything else; sampling fails with [`ProjectionError`]
    Other(u16),
}

impl Crs {
    pub fn from_epsg(code: u16) -> Self {
        match code {
            4326 => Crs::Wgs84,
            32651 => Crs::Utm51N,
            other => Crs::Other(other),
        }
    }

    /// Project a geographic coordinate into this CRS's raster axes.
    pub fn project(&self, coord: &Coord) -> Result<(f64, f64), ProjectionError> {
        match self {
            Crs::Wgs84 => Ok((coord.lon, coord.lat)),
            Crs::Utm51N => Ok(utm51n_forward(coord)),
            Crs::Other(code) => Err(ProjectionError::UnsupportedCrs(*code)),
        }
    }
}

/// Forward transverse Mercator for UTM zone 51N: (lat, lon) → (easting, northing).
fn utm51n_forward(coord: &Coord) -> (f64, f64) {
    let e2 = WGS84_F * (2.0 - WGS84_F);
    let ep2 = e2 / (1.0 - e2);

    let phi = coord.lat.to_radians();
    let lambda = coord.lon.to_radians();
    let lambda0 = UTM51_CENTRAL_MERIDIAN_DEG.to_radians();

    let sin_phi = phi.sin();
    let cos_phi = phi.cos();
    let tan_phi = phi.tan();

    let n = WGS84_A / (1.0 - e2 * sin_phi * sin_phi).sqrt();
    let t = tan_phi * tan_phi;
    let c = ep2 * cos_phi * cos_phi;
    let a_term = cos_phi * (lambda - lambda0);

    // Meridian arc length from the equator
    let m = WGS84_A
        * ((1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2 * e2 * e2 / 256.0) * phi
            - (3.0 * e2 / 8.0 + 3.0 * e2 * e2 / 32.0 + 45.0 * e2 * e2 * e2 / 1024.0)
                * (2.0 * phi).sin()
            + (15.0 * e2 * e2 / 256.0 + 45.0 * e2 * e2 * e2 / 1024.0) * (4.0 * phi).sin()
            - (35.0 * e2 * e2 * e2 / 3072.0) * (6.0 * phi).sin());

    let easting = UTM_K0
        * n
        * (a_term
            + (1.0 - t + c) * a_term.powi(3) / 6.0
            + (5.0 - 18.0 * t + t * t + 72.0 * c - 58.0 * ep2) * a_term.powi(5) / 120.0)
        + UTM_FALSE_EASTING;

    let northing = UTM_K0
        * (m + n
            * tan_phi
            * (a_term * a_term / 2.0
                + (5.0 - t + 9.0 * c + 4.0 * c * c) * a_term.powi(4) / 24.0
                + (61.0 - 58.0 * t + t * t + 600.0 * c - 330.0 * ep2) * a_term.powi(6) / 720.0));

    (easting, northing)
}

/// Affine geotransform mapping pixel `(col, row)` to CRS `(x, y)`:
///
/// ```text
/// x = x0 + col·px + row·rx
/// y = y0 + col·ry + row·py
/// ```
///
/// North-up rasters have `rx = ry = 0` and `py < 0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub x0: f64,
    pub px: f64,
    pub rx: f64,
    pub y0: f64,
    pub ry: f64,
    pub py: f64,
}

impl GeoTransform {
    /// North-up transform from an origin and pixel sizes.
    pub fn north_up(x0: f64, y0: f64, pixel_w: f64, pixel_h: f64) -> Self {
        Self {
            x0,
            px: pixel_w,
            rx: 0.0,
            y0,
            ry: 0.0,
            py: -pixel_h.abs(),
        }
    }

    /// Pixel → CRS.
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.x0 + col * self.px + row * self.rx,
            self.y0 + col * self.ry + row * self.py,
        )
    }

    /// CRS → fractional pixel. `None` for a degenerate (non-invertible)
    /// transform.
    pub fn invert(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let det = self.px * self.py - self.rx * self.ry;
        if det.abs() < f64::EPSILON {
            return None;
        }
        let dx = x - self.x0;
        let dy = y - self.y0;
        let col = (dx * self.py - dy * self.rx) / det;
        let row = (dy * self.px - dx * self.ry) / det;
        Some((col, row))
    }
}
