//! Tile grid math for COG files.
//!
//! Maps bounding boxes to pixel windows, pixel windows to tile indices,
//! and picks the overview level matching a target pixel size.

use hexchange_core::raster::GeoTransform;
use serde::{Deserialize, Serialize};

/// An axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl BBox {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Check if two bboxes intersect.
    pub fn intersects(&self, other: &BBox) -> bool {
        self.min_x < other.max_x
            && self.max_x > other.min_x
            && self.min_y < other.max_y
            && self.max_y > other.min_y
    }

    /// `[min_x, min_y, max_x, max_y]`, the order STAC expects.
    pub fn to_array(&self) -> [f64; 4] {
        [self.min_x, self.min_y, self.max_x, self.max_y]
    }

    pub fn is_valid(&self) -> bool {
        self.to_array().iter().all(|v| v.is_finite())
            && self.min_x <= self.max_x
            && self.min_y <= self.max_y
    }
}

/// A rectangular block of pixels: `[col_off, col_off + cols) x [row_off, row_off + rows)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub cols: usize,
    pub rows: usize,
}

impl PixelWindow {
    /// Pixels of an image touched by `bbox`, grown by `margin` pixels on
    /// every side and clamped to the image. `None` when they do not overlap.
    pub fn from_bbox(
        bbox: &BBox,
        geo_transform: &GeoTransform,
        image_width: u32,
        image_height: u32,
        margin: usize,
    ) -> Option<Self> {
        let iw = image_width as isize;
        let ih = image_height as isize;
        let m = margin as isize;

        let (col_a, row_a) = geo_transform.geo_to_pixel(bbox.min_x, bbox.max_y);
        let (col_b, row_b) = geo_transform.geo_to_pixel(bbox.max_x, bbox.min_y);
        if !(col_a.is_finite() && col_b.is_finite() && row_a.is_finite() && row_b.is_finite()) {
            return None;
        }

        let min_col = (col_a.min(col_b).floor() as isize - m).clamp(0, iw);
        let max_col = (col_a.max(col_b).ceil() as isize + m).clamp(0, iw);
        let min_row = (row_a.min(row_b).floor() as isize - m).clamp(0, ih);
        let max_row = (row_a.max(row_b).ceil() as isize + m).clamp(0, ih);

        if min_col >= max_col || min_row >= max_row {
            return None;
        }

        Some(Self {
            col_off: min_col as usize,
            row_off: min_row as usize,
            cols: (max_col - min_col) as usize,
            rows: (max_row - min_row) as usize,
        })
    }

    /// Transform of the window's own pixel grid.
    pub fn transform(&self, image_transform: &GeoTransform) -> GeoTransform {
        let (x, y) = image_transform.pixel_to_geo_corner(self.col_off, self.row_off);
        GeoTransform {
            origin_x: x,
            origin_y: y,
            ..*image_transform
        }
    }

    pub fn contains(&self, col: usize, row: usize) -> bool {
        col >= self.col_off
            && col < self.col_off + self.cols
            && row >= self.row_off
            && row < self.row_off + self.rows
    }
}

/// Descriptor for a tile that needs to be fetched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileRequest {
    /// Linear tile index in the TIFF tile array.
    pub tile_idx: usize,
    /// Tile column in the tile grid.
    pub tile_col: usize,
    /// Tile row in the tile grid.
    pub tile_row: usize,
}

/// Tiles of a `tile_width` x `tile_height` grid that intersect `window`.
pub fn tiles_for_window(
    window: &PixelWindow,
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32,
) -> Vec<TileRequest> {
    let tw = tile_width as usize;
    let th = tile_height as usize;
    let tiles_across = (image_width as usize).div_ceil(tw);
    let tiles_down = (image_height as usize).div_ceil(th);

    let tile_col_min = window.col_off / tw;
    let tile_col_max = (window.col_off + window.cols).div_ceil(tw).min(tiles_across);
    let tile_row_min = window.row_off / th;
    let tile_row_max = (window.row_off + window.rows).div_ceil(th).min(tiles_down);

    let mut tiles = Vec::new();
    for tr in tile_row_min..tile_row_max {
        for tc in tile_col_min..tile_col_max {
            tiles.push(TileRequest {
                tile_idx: tr * tiles_across + tc,
                tile_col: tc,
                tile_row: tr,
            });
        }
    }
    tiles
}

/// Select the overview level to sample at `target_pixel_size` map units.
///
/// Picks the coarsest level whose pixels are no larger than the target, so
/// sampling never reads coarser data than requested. `pixel_sizes` lists
/// the pixel size of each level, full resolution first.
pub fn select_overview(pixel_sizes: &[f64], target_pixel_size: f64) -> usize {
    let tolerance = 1e-6 * target_pixel_size.abs();
    pixel_sizes
        .iter()
        .enumerate()
        .filter(|(_, &size)| size <= target_pixel_size + tolerance)
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map_or(0, |(i, _)| i)
}
