//! Flood raster catalog: 72 depth tiles indexed by (return period, time step).
//!
//! Tiles load lazily on first access and stay resident under an LRU cap.
//! Sampling transforms a geographic coordinate through the tile's CRS and
//! geotransform, then bilinearly interpolates the depth surface. Depths at
//! or below [`defaults::FLOOD_EPS`] read as dry.

mod geotiff;
pub mod projection;

pub use projection::{Crs, GeoTransform, ProjectionError};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::debug;

use crate::config::defaults;
use crate::graph::{EdgeInfo, RoadGraph};
use crate::types::{Coord, ReturnPeriod};

/// One decoded flood-depth raster.
#[derive(Debug, Clone)]
pub struct FloodTile {
    pub width: usize,
    pub height: usize,
    /// Row-major depths in meters; non-finite and negative cells read as dry
    pub depths: Vec<f32>,
    pub transform: GeoTransform,
    pub crs: Crs,
}

impl FloodTile {
    /// Bilinear depth at a geographic coordinate, `None` outside the tile
    /// or where the surface is dry (≤ `FLOOD_EPS`).
    pub fn depth_at(&self, coord: &Coord) -> Result<Option<f64>, RasterError> {
        let (x, y) = self.crs.project(coord).map_err(RasterError::Projection)?;
        let Some((col, row)) = self.transform.invert(x, y) else {
            return Err(RasterError::DegenerateTransform);
        };

        if col < 0.0 || row < 0.0 || col > (self.width - 1) as f64 || row > (self.height - 1) as f64
        {
            return Ok(None);
        }

        // Clamping the neighborhood at the borders degrades bilinear to
        // nearest, which is the permitted edge behavior.
        let c0 = col.floor() as usize;
        let r0 = row.floor() as usize;
        let c1 = (c0 + 1).min(self.width - 1);
        let r1 = (r0 + 1).min(self.height - 1);
        let fc = col - c0 as f64;
        let fr = row - r0 as f64;

        let d00 = self.cell(c0, r0);
        let d10 = self.cell(c1, r0);
        let d01 = self.cell(c0, r1);
        let d11 = self.cell(c1, r1);

        let depth = d00 * (1.0 - fc) * (1.0 - fr)
            + d10 * fc * (1.0 - fr)
            + d01 * (1.0 - fc) * fr
            + d11 * fc * fr;

        if depth > defaults::FLOOD_EPS {
            Ok(Some(depth))
        } else {
            Ok(None)
        }
    }

    fn cell(&self, col: usize, row: usize) -> f64 {
        let v = self.depths[row * self.width + col];
        if v.is_finite() && v > 0.0 {
            v as f64
        } else {
            0.0
        }
    }
}

/// Raster catalog failures. Callers treat any of these as "no GeoTIFF
/// contribution" for the affected query.
#[derive(Debug, Error)]
pub enum RasterError {
    #[error("missing flood raster {path}")]
    MissingRaster { path: String },
    #[error("failed to decode flood raster {path}: {detail}")]
    Decode { path: String, detail: String },
    #[error(transparent)]
    Projection(#[from] ProjectionError),
    #[error("raster geotransform is not invertible")]
    DegenerateTransform,
}

/// Lazily loading, LRU-bounded catalog of the 4×18 flood tiles.
pub struct FloodCatalog {
    root: PathBuf,
    max_resident: usize,
    cache: Mutex<TileCache>,
}

struct TileCache {
    tiles: HashMap<(ReturnPeriod, u8), Arc<FloodTile>>,
    /// Access order, least recent first
    recency: Vec<(ReturnPeriod, u8)>,
}

impl FloodCatalog {
    /// Catalog rooted at `floodmaps/<rp>/<rp>-<ts>.tif`.
    pub fn new(root: PathBuf) -> Self {
        Self::with_capacity(root, defaults::RASTER_CACHE_TILES)
    }

    pub fn with_capacity(root: PathBuf, max_resident: usize) -> Self {
        Self {
            root,
            max_resident: max_resident.max(1),
            cache: Mutex::new(TileCache {
                tiles: HashMap::new(),
                recency: Vec::new(),
            }),
        }
    }

    /// Depth at a geographic coordinate for the given scenario tile.
    pub fn depth(
        &self,
        coord: &Coord,
        rp: ReturnPeriod,
        ts: u8,
    ) -> Result<Option<f64>, RasterError> {
        let tile = self.tile(rp, ts)?;
        tile.depth_at(coord)
    }

    /// Depth along an edge for the given scenario tile: the midpoint sample,
    /// or the max over polyline vertices when the edge carries geometry —
    /// a strictly-safer reading for long crossings.
    pub fn edge_depth(
        &self,
        edge: &EdgeInfo,
        graph: &RoadGraph,
        rp: ReturnPeriod,
        ts: u8,
    ) -> Result<Option<f64>, RasterError> {
        let tile = self.tile(rp, ts)?;

        let mut max_depth: Option<f64> = None;
        let mut consider = |d: Option<f64>| {
            if let Some(d) = d {
                max_depth = Some(max_depth.map_or(d, |m: f64| m.max(d)));
            }
        };

        consider(tile.depth_at(&edge.midpoint)?);
        if let Some(geometry) = &edge.geometry {
            for point in geometry {
                consider(tile.depth_at(point)?);
            }
        } else {
            consider(tile.depth_at(&graph.node_coord_by_index(edge.from))?);
            consider(tile.depth_at(&graph.node_coord_by_index(edge.to))?);
        }

        Ok(max_depth)
    }

    /// Fetch a tile, loading and caching it on first access.
    ///
    /// The load happens outside the cache lock; two tasks racing on a cold
    /// tile may both decode it, which is wasteful but harmless.
    pub fn tile(&self, rp: ReturnPeriod, ts: u8) -> Result<Arc<FloodTile>, RasterError> {
        if let Some(tile) = self.cache_hit(rp, ts) {
            return Ok(tile);
        }

        let path = self.tile_path(rp, ts);
        debug!(path = %path.display(), "Loading flood raster");
        let tile = Arc::new(geotiff::decode_tile(&path)?);
        self.cache_insert(rp, ts, tile.clone());
        Ok(tile)
    }

    /// Number of currently resident tiles.
    pub fn resident_tiles(&self) -> usize {
        self.cache.lock().expect("raster cache poisoned").tiles.len()
    }

    fn tile_path(&self, rp: ReturnPeriod, ts: u8) -> PathBuf {
        self.root
            .join(rp.stem())
            .join(format!("{}-{}.tif", rp.stem(), ts))
    }

    fn cache_hit(&self, rp: ReturnPeriod, ts: u8) -> Option<Arc<FloodTile>> {
        let mut cache = self.cache.lock().expect("raster cache poisoned");
        let tile = cache.tiles.get(&(rp, ts)).cloned()?;
        cache.touch((rp, ts));
        Some(tile)
    }

    fn cache_insert(&self, rp: ReturnPeriod, ts: u8, tile: Arc<FloodTile>) {
        let mut cache = self.cache.lock().expect("raster cache poisoned");
        cache.tiles.insert((rp, ts), tile);
        cache.touch((rp, ts));
        while cache.tiles.len() > self.max_resident {
            let oldest = cache.recency.remove(0);
            cache.tiles.remove(&oldest);
        }
    }
}

impl TileCache {
    fn touch(&mut self, key: (ReturnPeriod, u8)) {
        self.recency.retain(|k| *k != key);
        self.recency.push(key);
    }
}
