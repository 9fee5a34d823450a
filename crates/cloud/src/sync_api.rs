//! Blocking (synchronous) API.
//!
//! Wraps the async [`StacClient`] and [`CogStacker`] with a Tokio runtime
//! so callers don't need to manage their own async runtime, and implements
//! the pipeline seams on top of them.

use std::path::Path;

use hexchange_core::Raster;
use tokio::runtime::Runtime;

use crate::catalog::{SceneCatalog, SceneFilter, SceneStacker};
use crate::cog_reader::{CogReader, CogReaderOptions, MemorySource};
use crate::error::{CloudError, Result};
use crate::stac_client::{StacCatalog, StacClient, StacClientOptions};
use crate::stac_models::{StacItem, StacSearchParams};
use crate::tile_index::PixelWindow;
use crate::stacker::{CogStacker, SceneStack, StackOptions, TargetGrid};
use crate::tile_index::BBox;

fn runtime() -> Result<Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| CloudError::Network(e.to_string()))
}

/// Blocking wrapper around [`StacClient`].
///
/// Uses an internal single-threaded Tokio runtime.
pub struct StacClientBlocking {
    rt: Runtime,
    inner: StacClient,
    filter: SceneFilter,
}

impl StacClientBlocking {
    /// Create a new blocking STAC client applying `filter` to every search.
    pub fn new(catalog: StacCatalog, options: StacClientOptions, filter: SceneFilter) -> Result<Self> {
        Ok(Self {
            rt: runtime()?,
            inner: StacClient::new(catalog, options)?,
            filter,
        })
    }

    /// The underlying async client.
    pub fn client(&self) -> &StacClient {
        &self.inner
    }

    /// Search with automatic pagination (blocking).
    pub fn search_all(&self, params: &StacSearchParams) -> Result<Vec<StacItem>> {
        self.rt.block_on(self.inner.search_all(params))
    }
}

impl SceneCatalog for StacClientBlocking {
    fn count(&self, bbox: &BBox, datetime: &str) -> Result<u64> {
        let params = self.filter.search_params(bbox, datetime);
        self.rt.block_on(self.inner.count_matches(&params))
    }

    fn search(&self, bbox: &BBox, datetime: &str) -> Result<Vec<StacItem>> {
        self.search_all(&self.filter.search_params(bbox, datetime))
    }
}

/// Blocking wrapper around [`CogStacker`].
pub struct CogStackerBlocking {
    rt: Runtime,
    inner: CogStacker,
}

impl CogStackerBlocking {
    pub fn new(client: StacClient, options: StackOptions) -> Result<Self> {
        Ok(Self {
            rt: runtime()?,
            inner: CogStacker::new(client, options),
        })
    }
}

impl SceneStacker for CogStackerBlocking {
    fn bands(&self) -> Vec<String> {
        self.inner.options().assets.clone()
    }

    fn stack(&self, items: &[StacItem], grid: &TargetGrid) -> Result<SceneStack> {
        self.rt.block_on(self.inner.stack(items, grid))
    }
}

/// Read every band of a local GeoTIFF at full resolution.
pub fn read_bands<P: AsRef<Path>>(path: P) -> Result<Vec<Raster<f64>>> {
    let bytes = std::fs::read(path.as_ref()).map_err(hexchange_core::Error::from)?;
    read_bands_from_buffer(bytes)
}

/// Same as [`read_bands`] but from an in-memory file.
pub fn read_bands_from_buffer(bytes: Vec<u8>) -> Result<Vec<Raster<f64>>> {
    runtime()?.block_on(async {
        let reader =
            CogReader::open(MemorySource::new("buffer", bytes), CogReaderOptions::default()).await?;
        let meta = reader.metadata();
        let window = PixelWindow {
            col_off: 0,
            row_off: 0,
            cols: meta.width as usize,
            rows: meta.height as usize,
        };
        let mut bands = Vec::with_capacity(meta.samples_per_pixel as usize);
        for sample in 0..meta.samples_per_pixel.max(1) as usize {
            bands.push(reader.read_window(0, window, sample).await?);
        }
        Ok(bands)
    })
}
