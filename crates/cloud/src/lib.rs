//! # hexchange cloud
//!
//! Imagery access for the change-detection pipeline: STAC item search,
//! Cloud Optimized GeoTIFF reading over HTTP Range requests, and stacking
//! of many scenes onto one target grid.
//!
//! Only the tiles covering the requested window are fetched, from the
//! overview level closest to the target pixel size. Every request is made
//! once; [`RetryPolicy`] decides what is retried.

pub mod catalog;
pub mod cog_reader;
pub mod decompress;
pub mod error;
pub mod geotiff_keys;
pub mod http;
pub mod ifd;
pub mod retry;
pub mod stac_client;
pub mod stac_models;
pub mod stacker;
pub mod tile_index;

pub mod sync_api;

pub use catalog::{SceneCatalog, SceneFilter, SceneStacker};
pub use cog_reader::{CogMetadata, CogReader, CogReaderOptions, MemorySource, RangeSource, RemoteSource};
pub use error::{CloudError, Result};
pub use retry::RetryPolicy;
pub use stac_client::{StacCatalog, StacClient, StacClientOptions};
pub use stac_models::{StacItem, StacItemCollection, StacSearchParams};
pub use stacker::{CogStacker, SceneStack, StackOptions, TargetGrid};
pub use tile_index::{BBox, PixelWindow};

/// Blocking API re-exported as `blocking` module.
pub mod blocking {
    pub use crate::sync_api::*;
}
