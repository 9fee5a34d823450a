//! Seams between the change-detection pipeline and the imagery backend.
//!
//! The pipeline only sees [`SceneCatalog`] and [`SceneStacker`]; the STAC
//! and COG implementations live in [`crate::sync_api`], and tests plug in
//! in-memory fakes.

use crate::error::Result;
use crate::stac_models::{StacItem, StacSearchParams};
use crate::stacker::{SceneStack, TargetGrid};
use crate::tile_index::BBox;

/// Catalog-level scene filter.
///
/// This is the coarse cloud screen; residual cloud is left to the
/// temporal median.
#[derive(Debug, Clone, PartialEq)]
pub struct SceneFilter {
    /// Collection identifier (default `sentinel-2-l2a`).
    pub collection: String,
    /// Scenes must have `eo:cloud_cover` below this percentage (default 25).
    pub max_cloud_cover: f64,
    /// Scenes must have `s2:nodata_pixel_percentage` below this percentage
    /// (default 10). `None` disables the filter.
    pub max_nodata_pixels: Option<f64>,
}

impl Default for SceneFilter {
    fn default() -> Self {
        Self {
            collection: "sentinel-2-l2a".to_string(),
            max_cloud_cover: 25.0,
            max_nodata_pixels: Some(10.0),
        }
    }
}

impl SceneFilter {
    /// Search parameters for a geographic bounding box and an ISO
    /// `start/end` date range. Results are sorted by acquisition time.
    pub fn search_params(&self, bbox: &BBox, datetime: &str) -> StacSearchParams {
        let params = StacSearchParams::new()
            .collections(&[self.collection.as_str()])
            .bbox(bbox.min_x, bbox.min_y, bbox.max_x, bbox.max_y)
            .datetime(datetime)
            .less_than("eo:cloud_cover", self.max_cloud_cover)
            .sort_ascending("properties.datetime");
        match self.max_nodata_pixels {
            Some(max) => params.less_than("s2:nodata_pixel_percentage", max),
            None => params,
        }
    }
}

/// Scene search over a geographic (EPSG:4326) bounding box.
pub trait SceneCatalog {
    /// Number of scenes matching the filter.
    fn count(&self, bbox: &BBox, datetime: &str) -> Result<u64>;

    /// Matching scenes in acquisition order.
    fn search(&self, bbox: &BBox, datetime: &str) -> Result<Vec<StacItem>>;
}

/// Resamples scenes onto a common grid.
pub trait SceneStacker {
    /// Band names, in stack order.
    fn bands(&self) -> Vec<String>;

    fn stack(&self, items: &[StacItem], grid: &TargetGrid) -> Result<SceneStack>;
}
