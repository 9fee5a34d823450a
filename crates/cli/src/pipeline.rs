//! Two-pass disturbance pipeline.
//!
//! Grid, then a pre-flight scene count, then reference and analysis passes
//! (search, stack, composite, index, hexagon means), then classification.
//! Catalog and stacker are injected so the whole flow runs without a
//! network in tests.

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use hexchange_algorithms::grid::{HexGrid, HexGridParams};
use hexchange_algorithms::imagery::{
    classify, median_composite, ndvi, DisturbanceParams, DisturbanceSummary, IndexConfig,
};
use hexchange_algorithms::statistics::hexagon_means;
use hexchange_algorithms::temporal::{DateWindow, DateWindowParams, DateWindows};
use hexchange_cloud::catalog::{SceneCatalog, SceneStacker};
use hexchange_cloud::retry::RetryPolicy;
use hexchange_cloud::stacker::TargetGrid;
use hexchange_cloud::tile_index::BBox;
use hexchange_core::io::{write_geojson, write_two_band_u16};
use hexchange_core::vector::FeatureCollection;
use hexchange_core::{Raster, Transformer, CRS};
use std::path::Path;
use tracing::info;

use crate::spinner;

/// Points sampled per edge when projecting the grid extent to lon/lat
const BOUNDS_DENSIFY: usize = 21;

/// Column holding the 0/1 disturbance flag
pub const DISTURBANCE_COLUMN: &str = "Disturbance";

/// Raised before any raster I/O when either window has too few scenes.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(
        "insufficient imagery: {reference} reference and {analysis} analysis scenes found, \
         at least {minimum} needed in each window; widen the search window with --buffer"
    )]
    InsufficientData {
        reference: u64,
        analysis: u64,
        minimum: u64,
    },
}

/// Everything one run needs besides the AOI and the backends.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub anchor: NaiveDate,
    pub windows: DateWindowParams,
    pub target_crs: CRS,
    pub grid: HexGridParams,
    /// Composite pixel size in target CRS units
    pub pixel_size: f64,
    pub min_scenes: u64,
    pub index: IndexConfig,
    pub disturbance: DisturbanceParams,
    pub retry: RetryPolicy,
}

impl PipelineConfig {
    pub fn new(anchor: NaiveDate) -> Self {
        Self {
            anchor,
            windows: DateWindowParams::default(),
            target_crs: CRS::from_epsg(3577),
            grid: HexGridParams::default(),
            pixel_size: 100.0,
            min_scenes: 20,
            index: IndexConfig::default(),
            disturbance: DisturbanceParams::default(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Index raster and hexagon means of one date window.
#[derive(Debug, Clone)]
pub struct PassResult {
    pub window: DateWindow,
    pub scenes: usize,
    pub index: Raster<u16>,
    pub means: Vec<Option<f64>>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Hexagons with `index`, `h3`, both mean columns and the flag
    pub features: FeatureCollection,
    pub reference: PassResult,
    pub analysis: PassResult,
    pub summary: DisturbanceSummary,
}

/// Run both passes over `aoi` and classify every hexagon.
pub fn run<C, S>(
    aoi: &FeatureCollection,
    config: &PipelineConfig,
    catalog: &C,
    stacker: &S,
) -> Result<PipelineOutput>
where
    C: SceneCatalog,
    S: SceneStacker,
{
    let windows = DateWindows::new(config.anchor, config.windows)?;
    let (reference_column, analysis_column) =
        (windows.reference.mean_column(), windows.analysis.mean_column());
    if reference_column == analysis_column {
        bail!(
            "reference and analysis anchors fall in the same month ({reference_column}); \
             use a longer --lag-weeks"
        );
    }
    if windows.overlap() {
        info!(
            reference = %windows.reference.range(),
            analysis = %windows.analysis.range(),
            "date windows overlap"
        );
    }

    let aoi_crs = aoi
        .crs
        .clone()
        .context("AOI has no coordinate reference system")?;
    let aoi_polygons = aoi.polygons().context("AOI has no polygons")?;

    let grid = HexGrid::generate(&aoi_polygons, &aoi_crs, &config.target_crs, &config.grid)
        .context("failed to build hexagon grid")?;

    // Imagery covers every hexagon, buffer ring included
    let extent = grid.bounds().context("hexagon grid has no extent")?;
    let target_bbox = BBox::new(extent.min().x, extent.min().y, extent.max().x, extent.max().y);
    let geographic_bbox = geographic_bounds(&target_bbox, &config.target_crs)?;
    let target_grid = TargetGrid::covering(config.target_crs.clone(), &target_bbox, config.pixel_size)
        .context("invalid composite grid")?;

    preflight(catalog, &geographic_bbox, &windows, config.min_scenes)?;

    let reference = run_pass(
        &windows.reference,
        "reference",
        &geographic_bbox,
        &target_grid,
        &grid,
        config,
        catalog,
        stacker,
    )?;
    let analysis = run_pass(
        &windows.analysis,
        "analysis",
        &geographic_bbox,
        &target_grid,
        &grid,
        config,
        catalog,
        stacker,
    )?;
    reference
        .index
        .ensure_same_grid(&analysis.index)
        .context("reference and analysis rasters are not aligned")?;

    let flags = classify(&reference.means, &analysis.means, &config.disturbance)?;
    let summary = DisturbanceSummary::new(&flags, grid.cell_area_m2());

    let mut features = grid.to_features();
    for (i, feature) in features.features.iter_mut().enumerate() {
        feature.set_property(reference_column.as_str(), reference.means[i]);
        feature.set_property(analysis_column.as_str(), analysis.means[i]);
        feature.set_property(DISTURBANCE_COLUMN, i64::from(flags[i]));
    }

    Ok(PipelineOutput {
        features,
        reference,
        analysis,
        summary,
    })
}

/// Abort unless both windows hold at least `minimum` scenes.
pub fn preflight<C: SceneCatalog>(
    catalog: &C,
    bbox: &BBox,
    windows: &DateWindows,
    minimum: u64,
) -> Result<()> {
    let pb = spinner("Counting scenes...");
    let reference = catalog
        .count(bbox, &windows.reference.range())
        .context("scene count failed")?;
    let analysis = catalog
        .count(bbox, &windows.analysis.range())
        .context("scene count failed")?;
    pb.finish_and_clear();

    info!(reference, analysis, minimum, "scene counts");
    if reference.min(analysis) < minimum {
        return Err(PipelineError::InsufficientData {
            reference,
            analysis,
            minimum,
        }
        .into());
    }
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn run_pass<C, S>(
    window: &DateWindow,
    label: &str,
    bbox: &BBox,
    target: &TargetGrid,
    grid: &HexGrid,
    config: &PipelineConfig,
    catalog: &C,
    stacker: &S,
) -> Result<PassResult>
where
    C: SceneCatalog,
    S: SceneStacker,
{
    let range = window.range();
    let pb = spinner(&format!("Compositing {label} imagery {range}..."));
    let stack = config
        .retry
        .run(&format!("{label} search and stack"), |_| {
            let items = catalog.search(bbox, &range)?;
            stacker.stack(&items, target)
        })
        .with_context(|| format!("{label} imagery for {range} could not be stacked"))?;
    pb.finish_and_clear();

    if stack.scene_count() == 0 {
        bail!("no {label} scenes found for {range}");
    }
    info!(
        pass = label,
        range = %range,
        scenes = stack.scene_count(),
        bands = ?stack.bands,
        "scenes stacked"
    );

    let composite = median_composite(stack.data.view(), target.transform, target.crs.clone())?;
    let index = ndvi(&composite, 0, 1, &config.index)?;
    let means = hexagon_means(grid, &index)?;
    info!(
        pass = label,
        valid_pixels = composite.valid_count(),
        hexagons_with_data = means.iter().filter(|m| m.is_some()).count(),
        "pass complete"
    );

    Ok(PassResult {
        window: *window,
        scenes: stack.scene_count(),
        index,
        means,
    })
}

/// Write the hexagon GeoJSON and, optionally, the two-band index raster.
///
/// Files are written into a scratch directory beside `geojson_path` and
/// moved into place only once every write has succeeded, so a failed run
/// leaves no partial output. The scratch directory is always removed.
pub fn write_outputs(
    output: &PipelineOutput,
    geojson_path: &Path,
    raster_path: Option<&Path>,
) -> Result<()> {
    let parent = match geojson_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let scratch = tempfile::Builder::new()
        .prefix("zstats")
        .tempdir_in(parent)
        .with_context(|| format!("cannot create scratch directory in {}", parent.display()))?;

    let staged_geojson = scratch.path().join("hexagons.geojson");
    write_geojson(&output.features, &staged_geojson)
        .with_context(|| format!("failed to write {}", geojson_path.display()))?;

    let staged_raster = match raster_path {
        Some(path) => {
            let staged = scratch.path().join("index.tif");
            write_two_band_u16([&output.reference.index, &output.analysis.index], &staged)
                .with_context(|| format!("failed to write {}", path.display()))?;
            Some((staged, path))
        }
        None => None,
    };

    // Raster first: the GeoJSON marks a finished run
    if let Some((staged, path)) = &staged_raster {
        std::fs::rename(staged, path)
            .with_context(|| format!("cannot move output to {}", path.display()))?;
    }
    if let Err(e) = std::fs::rename(&staged_geojson, geojson_path) {
        if let Some((_, path)) = staged_raster {
            let _ = std::fs::remove_file(path);
        }
        return Err(e).with_context(|| format!("cannot move output to {}", geojson_path.display()));
    }
    info!(output = %geojson_path.display(), "outputs written");
    Ok(())
}

/// Lon/lat envelope of a target-CRS box, for catalog searches.
fn geographic_bounds(bbox: &BBox, crs: &CRS) -> Result<BBox> {
    let (min_x, min_y, max_x, max_y) = Transformer::new(crs, &CRS::wgs84())?.transform_bounds(
        bbox.min_x,
        bbox.min_y,
        bbox.max_x,
        bbox.max_y,
        BOUNDS_DENSIFY,
    )?;
    Ok(BBox::new(min_x, min_y, max_x, max_y))
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Geometry};
    use hexchange_cloud::error::{CloudError, Result as CloudResult};
    use hexchange_cloud::stac_models::StacItem;
    use hexchange_cloud::stacker::SceneStack;
    use hexchange_core::io::to_geojson;
    use hexchange_core::vector::Feature;
    use ndarray::Array4;
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::time::Duration;

    const X0: f64 = 1_400_000.0;
    const Y0: f64 = -3_960_000.0;

    fn aoi() -> FeatureCollection {
        let mut fc = FeatureCollection::with_crs(CRS::from_epsg(3577));
        fc.push(Feature::new(Geometry::Polygon(polygon![
            (x: X0, y: Y0),
            (x: X0 + 3_000.0, y: Y0),
            (x: X0 + 3_000.0, y: Y0 + 3_000.0),
            (x: X0, y: Y0 + 3_000.0),
        ])));
        fc
    }

    fn config() -> PipelineConfig {
        let mut c = PipelineConfig::new(NaiveDate::from_ymd_opt(2023, 9, 9).unwrap());
        c.retry = RetryPolicy::new(3, Duration::ZERO);
        c
    }

    fn item(id: String) -> StacItem {
        serde_json::from_value(serde_json::json!({
            "type": "Feature",
            "id": id,
            "properties": { "datetime": "2023-01-01T00:00:00Z" },
            "assets": {}
        }))
        .unwrap()
    }

    /// Scene counts per date range; `search` returns that many items.
    struct FakeCatalog {
        counts: HashMap<String, u64>,
    }

    impl FakeCatalog {
        fn new(reference: u64, analysis: u64) -> Self {
            let w = DateWindows::new(config().anchor, DateWindowParams::default()).unwrap();
            Self {
                counts: HashMap::from([
                    (w.reference.range(), reference),
                    (w.analysis.range(), analysis),
                ]),
            }
        }
    }

    impl SceneCatalog for FakeCatalog {
        fn count(&self, _bbox: &BBox, datetime: &str) -> CloudResult<u64> {
            Ok(self.counts.get(datetime).copied().unwrap_or(0))
        }

        fn search(&self, _bbox: &BBox, datetime: &str) -> CloudResult<Vec<StacItem>> {
            let n = self.counts.get(datetime).copied().unwrap_or(0);
            Ok((0..n).map(|i| item(format!("{datetime}#{i}"))).collect())
        }
    }

    /// Vegetated everywhere, except the western half of analysis scenes.
    /// Every fifth scene is cloudy. The first `failures` calls fail.
    struct FakeStacker {
        calls: Cell<u32>,
        failures: u32,
    }

    impl FakeStacker {
        fn new(failures: u32) -> Self {
            Self {
                calls: Cell::new(0),
                failures,
            }
        }
    }

    impl SceneStacker for FakeStacker {
        fn bands(&self) -> Vec<String> {
            vec!["red".into(), "nir".into()]
        }

        fn stack(&self, items: &[StacItem], grid: &TargetGrid) -> CloudResult<SceneStack> {
            self.calls.set(self.calls.get() + 1);
            if self.calls.get() <= self.failures {
                return Err(CloudError::Network("connection reset".into()));
            }
            let cleared = items.first().map_or(false, |i| i.id.starts_with("2023-06"));
            let data = Array4::from_shape_fn(
                (2, items.len(), grid.rows, grid.cols),
                |(band, t, _row, col)| {
                    if t % 5 == 4 {
                        return 0.9;
                    }
                    let bare = cleared && col < grid.cols / 2;
                    match (band, bare) {
                        (0, false) => 0.05,
                        (1, false) => 0.40,
                        (0, true) => 0.15,
                        _ => 0.20,
                    }
                },
            );
            Ok(SceneStack {
                bands: self.bands(),
                scene_ids: items.iter().map(|i| i.id.clone()).collect(),
                data,
                grid: grid.clone(),
            })
        }
    }

    #[test]
    fn test_preflight_aborts_before_stacking() {
        let stacker = FakeStacker::new(0);
        let err = run(&aoi(), &config(), &FakeCatalog::new(15, 30), &stacker).unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::InsufficientData {
                reference,
                analysis,
                minimum,
            }) => assert_eq!((*reference, *analysis, *minimum), (15, 30, 20)),
            None => panic!("unexpected error: {err:#}"),
        }
        assert!(err.to_string().contains("--buffer"));
        assert_eq!(stacker.calls.get(), 0);
    }

    #[test]
    fn test_preflight_threshold_is_inclusive() {
        let stacker = FakeStacker::new(0);
        let out = run(&aoi(), &config(), &FakeCatalog::new(20, 25), &stacker).unwrap();
        assert_eq!(stacker.calls.get(), 2);
        assert_eq!(out.reference.scenes, 20);
        assert_eq!(out.analysis.scenes, 25);
    }

    #[test]
    fn test_output_columns_and_flags() {
        let out = run(&aoi(), &config(), &FakeCatalog::new(20, 20), &FakeStacker::new(0)).unwrap();

        let first = &out.features.features[0];
        let columns: Vec<&str> = first.properties.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(columns, ["index", "h3", "2022_9_mean", "2023_9_mean", "Disturbance"]);
        assert!(first.get_property("trigger").is_none());

        let flags: Vec<i64> = out
            .features
            .iter()
            .filter_map(|f| f.get_property(DISTURBANCE_COLUMN)?.as_i64())
            .collect();
        assert_eq!(flags.len(), out.features.len());
        assert!(flags.contains(&1) && flags.contains(&0));
        assert_eq!(out.summary.disturbed, flags.iter().filter(|&&f| f == 1).count());

        assert_eq!(out.features.crs.as_ref().and_then(CRS::epsg), Some(3577));
    }

    #[test]
    fn test_clean_imagery_reaches_every_hexagon() {
        let out = run(&aoi(), &config(), &FakeCatalog::new(20, 20), &FakeStacker::new(0)).unwrap();
        assert!(out.reference.means.iter().all(Option::is_some));
        assert!(out.analysis.means.iter().all(Option::is_some));
        for f in out.features.iter() {
            assert!(f.get_property("2022_9_mean").and_then(|v| v.as_f64()).is_some());
            assert!(f.get_property("2023_9_mean").and_then(|v| v.as_f64()).is_some());
        }

        // The composite grid spans the buffer ring, not just the AOI
        let gt = out.reference.index.transform();
        let (rows, cols) = out.reference.index.shape();
        assert!(gt.origin_x < X0 - 500.0);
        assert!(gt.origin_x + cols as f64 * gt.pixel_width > X0 + 3_500.0);
        assert!(gt.origin_y > Y0 + 3_500.0);
        assert!(gt.origin_y + rows as f64 * gt.pixel_height < Y0 - 500.0);
    }

    #[test]
    fn test_runs_are_idempotent() {
        let a = run(&aoi(), &config(), &FakeCatalog::new(21, 22), &FakeStacker::new(0)).unwrap();
        let b = run(&aoi(), &config(), &FakeCatalog::new(21, 22), &FakeStacker::new(0)).unwrap();
        assert_eq!(
            to_geojson(&a.features).to_string(),
            to_geojson(&b.features).to_string()
        );
        assert_eq!(a.analysis.index.data(), b.analysis.index.data());
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let stacker = FakeStacker::new(2);
        run(&aoi(), &config(), &FakeCatalog::new(20, 20), &stacker).unwrap();
        // Two failures, then one call per pass
        assert_eq!(stacker.calls.get(), 4);
    }

    #[test]
    fn test_retry_exhaustion_is_fatal() {
        let mut cfg = config();
        cfg.retry = RetryPolicy::new(2, Duration::ZERO);
        let err = run(&aoi(), &cfg, &FakeCatalog::new(20, 20), &FakeStacker::new(5)).unwrap_err();
        let cloud = err.downcast_ref::<CloudError>();
        assert!(matches!(cloud, Some(CloudError::TransientFetch { attempts: 2, .. })));
    }

    #[test]
    fn test_colliding_columns_rejected() {
        let mut cfg = config();
        cfg.windows.lag_weeks = 1;
        assert!(run(&aoi(), &cfg, &FakeCatalog::new(20, 20), &FakeStacker::new(0)).is_err());
    }

    fn scratch_dirs(dir: &Path) -> usize {
        std::fs::read_dir(dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("zstats"))
            .count()
    }

    #[test]
    fn test_write_outputs_moves_files_into_place() {
        let out = run(&aoi(), &config(), &FakeCatalog::new(20, 20), &FakeStacker::new(0)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let geojson = dir.path().join("hexagons.geojson");
        let raster = dir.path().join("ndvi.tif");

        write_outputs(&out, &geojson, Some(&raster)).unwrap();

        let fc = hexchange_core::io::read_geojson(&geojson, &CRS::from_epsg(3577)).unwrap();
        assert_eq!(fc.len(), out.features.len());
        let bands = hexchange_cloud::blocking::read_bands(&raster).unwrap();
        assert_eq!(bands.len(), 2);
        assert_eq!(&bands[0].data().mapv(|v| v as u16), out.reference.index.data());
        assert_eq!(&bands[1].data().mapv(|v| v as u16), out.analysis.index.data());
        assert_eq!(bands[1].nodata(), Some(65535.0));
        assert!(bands[0].transform().approx_eq(out.analysis.index.transform(), 1e-9));
        assert_eq!(scratch_dirs(dir.path()), 0);
    }

    #[test]
    fn test_failed_write_leaves_no_output() {
        let mut out =
            run(&aoi(), &config(), &FakeCatalog::new(20, 20), &FakeStacker::new(0)).unwrap();
        let mut shifted = *out.analysis.index.transform();
        shifted.origin_x += 50.0;
        out.analysis.index.set_transform(shifted);

        let dir = tempfile::tempdir().unwrap();
        let geojson = dir.path().join("hexagons.geojson");
        let raster = dir.path().join("ndvi.tif");

        assert!(write_outputs(&out, &geojson, Some(&raster)).is_err());
        assert!(!geojson.exists());
        assert!(!raster.exists());
        assert_eq!(scratch_dirs(dir.path()), 0);
    }

    #[test]
    fn test_blocked_geojson_move_removes_raster() {
        let out = run(&aoi(), &config(), &FakeCatalog::new(20, 20), &FakeStacker::new(0)).unwrap();
        let dir = tempfile::tempdir().unwrap();
        // A non-empty directory where the GeoJSON should go
        let geojson = dir.path().join("hexagons.geojson");
        std::fs::create_dir(&geojson).unwrap();
        std::fs::write(geojson.join("keep"), b"x").unwrap();
        let raster = dir.path().join("ndvi.tif");

        assert!(write_outputs(&out, &geojson, Some(&raster)).is_err());
        assert!(!raster.exists());
        assert!(geojson.join("keep").exists());
        assert_eq!(scratch_dirs(dir.path()), 0);
    }

    #[test]
    fn test_bad_pixel_size_is_rejected_before_any_request() {
        for size in [0.0, -100.0, f64::NAN] {
            let mut cfg = config();
            cfg.pixel_size = size;
            let stacker = FakeStacker::new(0);
            let err = run(&aoi(), &cfg, &FakeCatalog::new(20, 20), &stacker).unwrap_err();
            let cloud = err.downcast_ref::<CloudError>();
            assert!(matches!(
                cloud,
                Some(CloudError::Core(hexchange_core::Error::InvalidParameter { name: "pixel_size", .. }))
            ));
            assert_eq!(stacker.calls.get(), 0);
        }
    }

    #[test]
    fn test_empty_aoi_is_a_geometry_error() {
        let fc = FeatureCollection::with_crs(CRS::from_epsg(3577));
        let stacker = FakeStacker::new(0);
        assert!(run(&fc, &config(), &FakeCatalog::new(20, 20), &stacker).is_err());
        assert_eq!(stacker.calls.get(), 0);
    }
}
