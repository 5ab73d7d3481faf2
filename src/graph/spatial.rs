//! Uniform-grid spatial index over the service area.
//!
//! Backs both the nearest-node lookup and the edge-midpoint radius query.
//! Cells are addressed in approximate meters from a local origin; queries
//! iterate cells in sorted order and tie-break by item id so results are
//! deterministic across runs.

use std::collections::HashMap;

use crate::types::Coord;

/// Meters per degree of latitude (spherical approximation).
const METERS_PER_DEG_LAT: f64 = 111_320.0;

/// A grid of id buckets keyed by (col, row) cell.
#[derive(Debug)]
pub struct GridIndex {
    cell_m: f64,
    /// cos(latitude) at the grid origin, fixing the lon → meters scale
    lon_scale: f64,
    origin: Coord,
    cells: HashMap<(i32, i32), Vec<usize>>,
    /// Item positions by id, for distance filtering
    positions: Vec<Coord>,
}

impl GridIndex {
    /// Build an empty grid anchored at `origin` with `cell_m` cell size.
    pub fn new(origin: Coord, cell_m: f64) -> Self {
        Self {
            cell_m,
            lon_scale: origin.lat.to_radians().cos(),
            origin,
            cells: HashMap::new(),
            positions: Vec::new(),
        }
    }

    /// Insert item `id` at `pos`. Ids must be dense and inserted in order.
    pub fn insert(&mut self, id: usize, pos: Coord) {
        debug_assert_eq!(id, self.positions.len(), "grid ids must be dense");
        let cell = self.cell_of(&pos);
        self.cells.entry(cell).or_default().push(id);
        self.positions.push(pos);
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn cell_of(&self, pos: &Coord) -> (i32, i32) {
        let dx = (pos.lon - self.origin.lon) * METERS_PER_DEG_LAT * self.lon_scale;
        let dy = (pos.lat - self.origin.lat) * METERS_PER_DEG_LAT;
        ((dx / self.cell_m).floor() as i32, (dy / self.cell_m).floor() as i32)
    }

    /// Nearest item to `query` within `max_distance_m`, as `(id, meters)`.
    ///
    /// Expanding ring search: the ring at radius `r` cannot contain a point
    /// closer than `(r - 1) · cell_m`, so the search stops as soon as the
    /// best hit beats the next ring's lower bound. Ties go to the smaller id.
    pub fn nearest(&self, query: &Coord, max_distance_m: f64) -> Option<(usize, f64)> {
        if self.positions.is_empty() {
            return None;
        }

        let center = self.cell_of(query);
        let max_ring = (max_distance_m / self.cell_m).ceil() as i32 + 1;
        let mut best: Option<(usize, f64)> = None;

        for ring in 0..=max_ring {
            if let Some((_, d)) = best {
                if d <= (ring - 1).max(0) as f64 * self.cell_m {
                    break;
                }
            }
            for &(cx, cy) in Self::ring_cells(center, ring).iter() {
                let Some(bucket) = self.cells.get(&(cx, cy)) else {
                    continue;
                };
                for &id in bucket {
                    let d = query.haversine_m(&self.positions[id]);
                    let better = match best {
                        None => d <= max_distance_m,
                        Some((bid, bd)) => d < bd || (d == bd && id < bid),
                    };
                    if better && d <= max_distance_m {
                        best = Some((id, d));
                    }
                }
            }
        }

        best
    }

    /// All items within `radius_m` of `center`, sorted by id.
    pub fn within(&self, center: &Coord, radius_m: f64) -> Vec<usize> {
        if self.positions.is_empty() {
            return Vec::new();
        }

        let (ccx, ccy) = self.cell_of(center);
        let span = (radius_m / self.cell_m).ceil() as i32 + 1;
        let mut hits = Vec::new();

        for cx in (ccx - span)..=(ccx + span) {
            for cy in (ccy - span)..=(ccy + span) {
                let Some(bucket) = self.cells.get(&(cx, cy)) else {
                    continue;
                };
                for &id in bucket {
                    if center.haversine_m(&self.positions[id]) <= radius_m {
                        hits.push(id);
                    }
                }
            }
        }

        hits.sort_unstable();
        hits
    }

    /// Cells forming the square ring at Chebyshev distance `ring` from `center`.
    fn ring_cells(center: (i32, i32), ring: i32) -> Vec<(i32, i32)> {
        let (cx, cy) = center;
        if ring == 0 {
            return vec![(cx, cy)];
        }
        let mut cells = Vec::with_capacity((8 * ring) as usize);
        for dx in -ring..=ring {
            cells.push((cx + dx, cy - ring));
            cells.push((cx + dx, cy + ring));
        }
        for dy in (-ring + 1)..=(ring - 1) {
            cells.push((cx - ring, cy + dy));
            cells.push((cx + ring, cy + dy));
        }
        cells
    }
}
