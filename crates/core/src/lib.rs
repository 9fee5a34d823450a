//! # hexchange core
//!
//! Core types and I/O shared by the hexchange crates.
//!
//! This crate provides:
//! - `Raster<T>`: Generic georeferenced raster grid
//! - `GeoTransform`: Affine transformation for georeferencing
//! - `CRS` and `Projection`: EPSG-coded coordinate systems with pure-Rust
//!   forward/inverse projections
//! - `Feature` / `FeatureCollection`: vector features with typed attributes
//! - I/O for GeoJSON vectors and multi-band GeoTIFF rasters

pub mod crs;
pub mod error;
pub mod io;
pub mod raster;
pub mod vector;

pub use crs::{Projection, Transformer, CRS};
pub use error::{Error, Result};
pub use raster::{GeoTransform, Raster, RasterElement};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::crs::{Projection, Transformer, CRS};
    pub use crate::error::{Error, Result};
    pub use crate::raster::{GeoTransform, Raster, RasterElement};
    pub use crate::vector::{AttributeValue, Feature, FeatureCollection};
}
