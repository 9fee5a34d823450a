//! GeoTIFF key extraction from IFD entries.
//!
//! Reads tags 33550 (ModelPixelScale), 33922 (ModelTiepoint),
//! 34264 (ModelTransformation), 34735 (GeoKeyDirectory), and
//! 42113 (GDAL_NODATA) to produce a `GeoTransform`, optional `CRS`,
//! and optional nodata value.

use hexchange_core::crs::CRS;
use hexchange_core::raster::GeoTransform;

use crate::ifd::{tags, TagSet};

/// Tags that carry georeferencing.
pub const GEO_TAGS: &[u16] = &[
    tags::MODEL_PIXEL_SCALE,
    tags::MODEL_TIEPOINT,
    tags::MODEL_TRANSFORMATION,
    tags::GEO_KEY_DIRECTORY,
    tags::GDAL_NODATA,
];

const GEOGRAPHIC_TYPE_KEY: u64 = 2048;
const PROJECTED_CS_TYPE_KEY: u64 = 3072;
const USER_DEFINED: u64 = 32767;

/// GeoTIFF metadata extracted from IFD entries.
#[derive(Debug, Clone)]
pub struct GeoTiffMeta {
    pub geo_transform: GeoTransform,
    pub crs: Option<CRS>,
    pub nodata: Option<f64>,
}

impl GeoTiffMeta {
    /// Extract GeoTIFF metadata from the tags of the full-resolution IFD.
    pub fn from_tags(tags_: &TagSet) -> Self {
        Self {
            geo_transform: extract_geotransform(tags_),
            crs: extract_crs(tags_),
            nodata: extract_nodata(tags_),
        }
    }
}

/// GeoTransform from ModelPixelScale + ModelTiepoint, or from the
/// ModelTransformation matrix.
fn extract_geotransform(tags_: &TagSet) -> GeoTransform {
    let scale = tags_.f64s(tags::MODEL_PIXEL_SCALE);
    let tiepoint = tags_.f64s(tags::MODEL_TIEPOINT);

    if let (Some(scale), Some(tiepoint)) = (&scale, &tiepoint) {
        if scale.len() >= 2 && tiepoint.len() >= 6 {
            let origin_x = tiepoint[3] - tiepoint[0] * scale[0];
            let origin_y = tiepoint[4] + tiepoint[1] * scale[1];
            return GeoTransform::new(origin_x, origin_y, scale[0], -scale[1]);
        }
    }

    // 4x4 row-major matrix
    if let Some(t) = tags_.f64s(tags::MODEL_TRANSFORMATION) {
        if t.len() >= 16 {
            return GeoTransform {
                origin_x: t[3],
                origin_y: t[7],
                pixel_width: t[0],
                pixel_height: t[5],
                row_rotation: t[1],
                col_rotation: t[4],
            };
        }
    }

    GeoTransform::default()
}

/// EPSG code from the GeoKeyDirectory.
///
/// Header is `[version, revision, minor, count]`, followed by `count`
/// entries of `[key_id, location, count, value]`. Only keys stored
/// directly in the directory (location 0) are read.
fn extract_crs(tags_: &TagSet) -> Option<CRS> {
    let dir = tags_.u64s(tags::GEO_KEY_DIRECTORY)?;
    if dir.len() < 4 {
        return None;
    }
    let num_keys = dir[3] as usize;

    let mut geographic = None;
    for key in dir[4..].chunks_exact(4).take(num_keys) {
        let (key_id, location, value) = (key[0], key[1], key[3]);
        if location != 0 || value == 0 || value == USER_DEFINED {
            continue;
        }
        match key_id {
            PROJECTED_CS_TYPE_KEY => return Some(CRS::from_epsg(value as u32)),
            GEOGRAPHIC_TYPE_KEY => geographic = Some(CRS::from_epsg(value as u32)),
            _ => {}
        }
    }
    geographic
}

/// Nodata from the GDAL_NODATA ASCII tag.
fn extract_nodata(tags_: &TagSet) -> Option<f64> {
    tags_
        .ascii(tags::GDAL_NODATA)?
        .trim()
        .parse::<f64>()
        .ok()
}
