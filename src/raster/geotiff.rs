//! Single-band GeoTIFF decoding for the flood-depth tiles.
//!
//! The flood maps are plain single-band float TIFFs with the standard
//! GeoTIFF georeferencing tags. Only what the catalog needs is read:
//! dimensions, the pixel-scale/tiepoint pair forming the geotransform,
//! and the EPSG code from the geo-key directory.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use tiff::decoder::{Decoder, DecodingResult};
use tiff::tags::Tag;

use super::projection::{Crs, GeoTransform};
use super::{FloodTile, RasterError};

/// GeoTIFF tag: pixel size in CRS units per axis.
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;

/// GeoTIFF tag: raster → CRS tiepoints.
const TAG_MODEL_TIEPOINT: u16 = 33922;

/// GeoTIFF tag: geo-key directory.
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;

/// Geo key: geographic CRS EPSG code.
const KEY_GEOGRAPHIC_TYPE: u64 = 2048;

/// Geo key: projected CRS EPSG code.
const KEY_PROJECTED_CS_TYPE: u64 = 3072;

/// Decode one flood tile from disk.
pub fn decode_tile(path: &Path) -> Result<FloodTile, RasterError> {
    let file = File::open(path).map_err(|_| RasterError::MissingRaster {
        path: path.display().to_string(),
    })?;

    let mut decoder = Decoder::new(BufReader::new(file))
        .map_err(|e| RasterError::Decode {
            path: path.display().to_string(),
            detail: e.to_string(),
        })?;

    let (width, height) = decoder.dimensions().map_err(|e| RasterError::Decode {
        path: path.display().to_string(),
        detail: e.to_string(),
    })?;

    let transform = read_geotransform(&mut decoder, path)?;
    let crs = read_crs(&mut decoder);

    let depths = match decoder.read_image().map_err(|e| RasterError::Decode {
        path: path.display().to_string(),
        detail: e.to_string(),
    })? {
        DecodingResult::F32(v) => v,
        DecodingResult::F64(v) => v.into_iter().map(|d| d as f32).collect(),
        DecodingResult::U8(v) => v.into_iter().map(|d| d as f32).collect(),
        DecodingResult::U16(v) => v.into_iter().map(|d| d as f32).collect(),
        DecodingResult::U32(v) => v.into_iter().map(|d| d as f32).collect(),
        DecodingResult::I16(v) => v.into_iter().map(|d| d as f32).collect(),
        DecodingResult::I32(v) => v.into_iter().map(|d| d as f32).collect(),
        _ => {
            return Err(RasterError::Decode {
                path: path.display().to_string(),
                detail: "unsupported sample format".to_string(),
            })
        }
    };

    if depths.len() != (width as usize) * (height as usize) {
        return Err(RasterError::Decode {
            path: path.display().to_string(),
            detail: format!(
                "sample count {} does not match {}x{}",
                depths.len(),
                width,
                height
            ),
        });
    }

    Ok(FloodTile {
        width: width as usize,
        height: height as usize,
        depths,
        transform,
        crs,
    })
}

/// Assemble the affine geotransform from pixel scale + first tiepoint.
fn read_geotransform(
    decoder: &mut Decoder<BufReader<File>>,
    path: &Path,
) -> Result<GeoTransform, RasterError> {
    let scale = decoder
        .get_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE))
        .ok()
        .and_then(|v| v.into_f64_vec().ok())
        .filter(|v| v.len() >= 2);
    let tiepoint = decoder
        .get_tag(Tag::Unknown(TAG_MODEL_TIEPOINT))
        .ok()
        .and_then(|v| v.into_f64_vec().ok())
        .filter(|v| v.len() >= 6);

    match (scale, tiepoint) {
        (Some(scale), Some(tp)) => {
            // tp = [col, row, _, x, y, _]: the raster point (col,row) maps to (x,y)
            let x0 = tp[3] - tp[0] * scale[0];
            let y0 = tp[4] + tp[1] * scale[1];
            Ok(GeoTransform::north_up(x0, y0, scale[0], scale[1]))
        }
        _ => Err(RasterError::Decode {
            path: path.display().to_string(),
            detail: "missing ModelPixelScale/ModelTiepoint georeferencing".to_string(),
        }),
    }
}

/// Read the EPSG code out of the geo-key directory. Missing or malformed
/// keys fall back to WGS84, matching how the flood-map set is published.
fn read_crs(decoder: &mut Decoder<BufReader<File>>) -> Crs {
    let Some(keys) = decoder
        .get_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY))
        .ok()
        .and_then(|v| v.into_u64_vec().ok())
    else {
        return Crs::Wgs84;
    };

    // Directory layout: 4-short header, then 4 shorts per key:
    // [key id, tag location, count, value]
    let mut geographic = None;
    let mut projected = None;
    for entry in keys[4.min(keys.len())..].chunks_exact(4) {
        let (key_id, tag_loc, value) = (entry[0], entry[1], entry[3]);
        if tag_loc != 0 {
            continue;
        }
        match key_id {
            KEY_GEOGRAPHIC_TYPE => geographic = Some(value as u16),
            KEY_PROJECTED_CS_TYPE => projected = Some(value as u16),
            _ => {}
        }
    }

    match (projected, geographic) {
        (Some(code), _) => Crs::from_epsg(code),
        (None, Some(code)) => Crs::from_epsg(code),
        (None, None) => Crs::Wgs84,
    }
}
