//! Geographic primitives: coordinates and great-circle distance.

use serde::{Deserialize, Serialize};

/// Mean Earth radius (meters).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// A geographic coordinate in WGS84 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub lat: f64,
    pub lon: f64,
}

impl Coord {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Great-circle distance to another coordinate (meters).
    pub fn haversine_m(&self, other: &Coord) -> f64 {
        let phi1 = self.lat.to_radians();
        let phi2 = other.lat.to_radians();
        let d_phi = (other.lat - self.lat).to_radians();
        let d_lambda = (other.lon - self.lon).to_radians();

        let a = (d_phi / 2.0).sin().powi(2)
            + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
        let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

        EARTH_RADIUS_M * c
    }

    /// Midpoint of the segment to another coordinate. Adequate at city
    /// scale where the segment subtends well under a degree.
    pub fn midpoint(&self, other: &Coord) -> Coord {
        Coord {
            lat: (self.lat + other.lat) / 2.0,
            lon: (self.lon + other.lon) / 2.0,
        }
    }

    /// Both components are finite numbers.
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }
}

impl From<[f64; 2]> for Coord {
    /// Client payloads carry coordinates as `[lat, lon]` pairs.
    fn from(pair: [f64; 2]) -> Self {
        Coord {
            lat: pair[0],
            lon: pair[1],
        }
    }
}

impl From<Coord> for [f64; 2] {
    fn from(c: Coord) -> Self {
        [c.lat, c.lon]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_distance() {
        let p = Coord::new(14.6507, 121.1029);
        assert!(p.haversine_m(&p) < 1e-9);
    }

    #[test]
    fn test_haversine_known_distance() {
        // One degree of latitude is ~111.2 km
        let a = Coord::new(14.0, 121.0);
        let b = Coord::new(15.0, 121.0);
        let d = a.haversine_m(&b);
        assert!((d - 111_195.0).abs() < 200.0, "got {}", d);
    }

    #[test]
    fn test_haversine_symmetric() {
        let a = Coord::new(14.6507, 121.1029);
        let b = Coord::new(14.6545, 121.1089);
        assert!((a.haversine_m(&b) - b.haversine_m(&a)).abs() < 1e-9);
    }

    #[test]
    fn test_midpoint() {
        let a = Coord::new(14.0, 121.0);
        let b = Coord::new(15.0, 122.0);
        let m = a.midpoint(&b);
        assert_eq!(m.lat, 14.5);
        assert_eq!(m.lon, 121.5);
    }
}
