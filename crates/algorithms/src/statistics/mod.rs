//! Statistical analysis algorithms for raster data
//!
//! - **zonal**: Per-polygon statistics by cell-centre assignment

pub mod zonal;

pub use zonal::{hexagon_means, rasterize_zones, zonal_statistics, ZonalResult, NO_ZONE};
