//! Scene stacking: turn catalog items into an aligned
//! (band, time, y, x) array on a common target grid.
//!
//! Each scene asset is read from the overview level closest to (but not
//! coarser than) the target pixel size and nearest-neighbour resampled
//! onto the target grid. Pixels outside a scene's footprint or equal to
//! the asset nodata value are NaN.

use std::time::Duration;

use futures::stream::{self, StreamExt};
use hexchange_core::crs::{Transformer, CRS};
use hexchange_core::raster::GeoTransform;
use ndarray::{s, Array2, Array4};
use tracing::{debug, info};

use crate::cog_reader::{CogReader, CogReaderOptions, RangeSource, RemoteSource};
use crate::error::{CloudError, Result};
use crate::stac_client::StacClient;
use crate::stac_models::{StacAsset, StacItem};
use crate::tile_index::{BBox, PixelWindow};

/// Points sampled per edge when projecting the grid bounds into a scene CRS.
const BOUNDS_DENSIFY: usize = 21;

/// Options for [`CogStacker`].
#[derive(Debug, Clone)]
pub struct StackOptions {
    /// Asset keys stacked as bands, in band order.
    pub assets: Vec<String>,
    /// Target pixel size in target CRS units (default 100).
    pub pixel_size: f64,
    /// Scenes fetched concurrently (default 4).
    pub max_concurrent_scenes: usize,
    /// Per-request timeout (default 60 s).
    pub request_timeout: Duration,
    /// Apply the asset `raster:bands` scale and offset (default true).
    pub rescale: bool,
    pub reader: CogReaderOptions,
}

impl Default for StackOptions {
    fn default() -> Self {
        Self {
            assets: vec!["red".to_string(), "nir".to_string()],
            pixel_size: 100.0,
            max_concurrent_scenes: 4,
            request_timeout: Duration::from_secs(60),
            rescale: true,
            reader: CogReaderOptions::default(),
        }
    }
}

/// North-up pixel grid every scene is resampled onto.
#[derive(Debug, Clone, PartialEq)]
pub struct TargetGrid {
    pub crs: CRS,
    pub transform: GeoTransform,
    pub rows: usize,
    pub cols: usize,
}

impl TargetGrid {
    /// Grid of `pixel_size` cells covering `bounds`, snapped outward to
    /// multiples of the pixel size.
    pub fn covering(crs: CRS, bounds: &BBox, pixel_size: f64) -> Result<Self> {
        let (transform, rows, cols) = GeoTransform::covering(
            bounds.min_x,
            bounds.min_y,
            bounds.max_x,
            bounds.max_y,
            pixel_size,
        )?;
        Ok(Self {
            crs,
            transform,
            rows,
            cols,
        })
    }

    pub fn bounds(&self) -> BBox {
        let (min_x, min_y, max_x, max_y) = self.transform.bounds(self.cols, self.rows);
        BBox::new(min_x, min_y, max_x, max_y)
    }
}

/// Scenes resampled onto one grid, indexed `(band, time, row, col)`.
#[derive(Debug, Clone)]
pub struct SceneStack {
    pub bands: Vec<String>,
    pub scene_ids: Vec<String>,
    pub data: Array4<f64>,
    pub grid: TargetGrid,
}

impl SceneStack {
    pub fn scene_count(&self) -> usize {
        self.data.dim().1
    }

    pub fn band_index(&self, name: &str) -> Option<usize> {
        self.bands.iter().position(|b| b == name)
    }
}

/// Reads catalog items from their COG assets and stacks them.
pub struct CogStacker {
    client: StacClient,
    options: StackOptions,
}

impl CogStacker {
    /// `client` signs asset hrefs where the catalog requires it and
    /// provides the HTTP connection pool.
    pub fn new(client: StacClient, options: StackOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> &StackOptions {
        &self.options
    }

    /// Stack `items` onto `grid`, preserving item order along the time axis.
    ///
    /// Fails as a whole if any scene fails; no partial stack is returned.
    pub async fn stack(&self, items: &[StacItem], grid: &TargetGrid) -> Result<SceneStack> {
        let n_bands = self.options.assets.len();
        let mut data = Array4::from_elem((n_bands, items.len(), grid.rows, grid.cols), f64::NAN);

        info!(
            scenes = items.len(),
            rows = grid.rows,
            cols = grid.cols,
            "stacking scenes"
        );

        let mut results = stream::iter(items.iter().enumerate())
            .map(|(t, item)| async move { (t, self.read_scene(item, grid).await) })
            .buffer_unordered(self.options.max_concurrent_scenes.max(1));

        while let Some((t, bands)) = results.next().await {
            for (b, band) in bands?.into_iter().enumerate() {
                data.slice_mut(s![b, t, .., ..]).assign(&band);
            }
        }

        Ok(SceneStack {
            bands: self.options.assets.clone(),
            scene_ids: items.iter().map(|i| i.id.clone()).collect(),
            data,
            grid: grid.clone(),
        })
    }

    async fn read_scene(&self, item: &StacItem, grid: &TargetGrid) -> Result<Vec<Array2<f64>>> {
        let mut bands = Vec::with_capacity(self.options.assets.len());
        for key in &self.options.assets {
            let asset = item.asset(key).ok_or_else(|| CloudError::MissingAsset {
                item: item.id.clone(),
                asset: key.clone(),
            })?;
            let href = self.client.sign_asset_href(&asset.href).await?;
            let source = RemoteSource::new(self.client.http().clone(), href);
            let reader = CogReader::open(source, self.options.reader.clone()).await?;

            let crs = reader
                .metadata()
                .crs
                .or_else(|| item.epsg().map(CRS::from_epsg))
                .ok_or_else(|| CloudError::InvalidTiff {
                    reason: format!("{}/{} carries no CRS", item.id, key),
                })?;

            bands.push(resample_onto(&reader, &crs, asset, grid, &self.options).await?);
        }
        match item.acquired() {
            Some(acquired) => debug!(scene = %item.id, %acquired, "scene read"),
            None => debug!(scene = %item.id, "scene read"),
        }
        Ok(bands)
    }
}

/// Nearest-neighbour resample one COG asset onto `grid`.
pub async fn resample_onto<S: RangeSource>(
    reader: &CogReader<S>,
    source_crs: &CRS,
    asset: &StacAsset,
    grid: &TargetGrid,
    options: &StackOptions,
) -> Result<Array2<f64>> {
    let mut out = Array2::from_elem((grid.rows, grid.cols), f64::NAN);

    let to_source = Transformer::new(&grid.crs, source_crs)?;
    let b = grid.bounds();
    let (min_x, min_y, max_x, max_y) =
        to_source.transform_bounds(b.min_x, b.min_y, b.max_x, b.max_y, BOUNDS_DENSIFY)?;

    let level = reader.level_for_pixel_size(options.pixel_size);
    let (width, height) = reader.level_size(level)?;
    let level_gt = reader.level_transform(level)?;
    let Some(window) = PixelWindow::from_bbox(
        &BBox::new(min_x, min_y, max_x, max_y),
        &level_gt,
        width,
        height,
        1,
    ) else {
        return Ok(out);
    };

    let source = reader.read_window(level, window, 0).await?;
    let nodata = asset.nodata().or(source.nodata());
    let (scale, offset) = if options.rescale {
        asset.scaling()
    } else {
        (1.0, 0.0)
    };
    let (src_rows, src_cols) = source.shape();

    for ((row, col), cell) in out.indexed_iter_mut() {
        let (x, y) = grid.transform.pixel_to_geo(col, row);
        let Ok((sx, sy)) = to_source.transform_point(x, y) else {
            continue;
        };
        let (c, r) = source.geo_to_pixel(sx, sy);
        if !(c >= 0.0 && r >= 0.0) {
            continue;
        }
        let (c, r) = (c as usize, r as usize);
        if r >= src_rows || c >= src_cols {
            continue;
        }
        let v = source.data()[(r, c)];
        if v.is_nan() || nodata == Some(v) {
            continue;
        }
        *cell = v * scale + offset;
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cog_reader::MemorySource;
    use hexchange_core::io::write_two_band_u16_to_buffer;
    use hexchange_core::Raster;

    #[test]
    fn target_grid_snaps_outward() {
        let grid = TargetGrid::covering(
            CRS::from_epsg(3577),
            &BBox::new(1_000_050.0, -3_000_020.0, 1_000_420.0, -2_999_710.0),
            100.0,
        )
        .unwrap();
        assert_eq!(grid.transform.origin_x, 1_000_000.0);
        assert_eq!(grid.transform.origin_y, -2_999_700.0);
        assert_eq!((grid.rows, grid.cols), (4, 5));
        let b = grid.bounds();
        assert_eq!((b.min_x, b.min_y), (1_000_000.0, -3_000_100.0));
    }

    fn asset(json: &str) -> StacAsset {
        serde_json::from_str(json).unwrap()
    }

    /// 10 m source scene, value = 100 * row + col, with one nodata pixel.
    fn source_tiff() -> Vec<u8> {
        let mut band = Raster::<u16>::new(20, 20);
        for r in 0..20 {
            for c in 0..20 {
                band.set(r, c, (100 * r + c) as u16 + 1).unwrap();
            }
        }
        band.set(0, 0, 0).unwrap();
        band.set_transform(GeoTransform::new(500_000.0, 6_000_200.0, 10.0, -10.0));
        band.set_crs(Some(CRS::from_epsg(32755)));
        band.set_nodata(Some(0));
        write_two_band_u16_to_buffer([&band, &band]).unwrap()
    }

    #[test]
    fn nearest_neighbour_resampling_applies_scaling_and_nodata() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let reader = rt
            .block_on(CogReader::open(
                MemorySource::new("scene", source_tiff()),
                CogReaderOptions::default(),
            ))
            .unwrap();

        // Same CRS, 50 m pixels, extending 50 m west of the scene
        let grid = TargetGrid {
            crs: CRS::from_epsg(32755),
            transform: GeoTransform::new(499_950.0, 6_000_200.0, 50.0, -50.0),
            rows: 4,
            cols: 5,
        };
        let red = asset(
            r#"{"href": "mem", "raster:bands": [{"nodata": 0, "scale": 0.5, "offset": -1.0}]}"#,
        );
        let options = StackOptions {
            pixel_size: 50.0,
            ..Default::default()
        };

        let out = rt
            .block_on(resample_onto(&reader, &CRS::from_epsg(32755), &red, &grid, &options))
            .unwrap();

        // First column lies outside the scene
        assert!(out.column(0).iter().all(|v| v.is_nan()));
        // Centre (500025, 6000175) -> source pixel (row 2, col 2)
        assert_eq!(out[(0, 1)], (203.0 * 0.5) - 1.0);
        // Centre (500175, 6000025) -> source pixel (row 17, col 17)
        assert_eq!(out[(3, 4)], (1718.0 * 0.5) - 1.0);
    }

    #[test]
    fn scene_stack_band_lookup() {
        let grid =
            TargetGrid::covering(CRS::from_epsg(3577), &BBox::new(0.0, 0.0, 200.0, 100.0), 100.0)
                .unwrap();
        let stack = SceneStack {
            bands: vec!["red".into(), "nir".into()],
            scene_ids: vec!["a".into(), "b".into(), "c".into()],
            data: Array4::zeros((2, 3, grid.rows, grid.cols)),
            grid,
        };
        assert_eq!(stack.scene_count(), 3);
        assert_eq!(stack.band_index("nir"), Some(1));
        assert_eq!(stack.band_index("swir"), None);
    }
}
