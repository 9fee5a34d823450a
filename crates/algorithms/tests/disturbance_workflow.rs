//! End-to-end workflow on synthetic imagery:
//! grid -> composite -> index -> hexagon means -> classification.
//!
//! A 4 km AOI is fully vegetated in the reference period; in the analysis
//! period its western half has been cleared. Some scenes carry cloud
//! (saturated values) or sensor nodata, which the median must suppress.

use geo::{polygon, MultiPolygon};
use hexchange_algorithms::grid::{HexGrid, HexGridParams};
use hexchange_algorithms::imagery::{
    classify, median_composite, ndvi, DisturbanceParams, DisturbanceSummary, IndexConfig,
};
use hexchange_algorithms::statistics::hexagon_means;
use hexchange_algorithms::temporal::{parse_anchor, DateWindowParams, DateWindows};
use hexchange_cloud::blocking::read_bands_from_buffer;
use hexchange_core::io::write_two_band_u16_to_buffer;
use hexchange_core::{GeoTransform, Raster, CRS};
use ndarray::Array4;

const X0: f64 = 1_400_000.0;
const Y0: f64 = -3_960_000.0;
const SIZE: f64 = 4_000.0;
const PIXEL: f64 = 100.0;

fn albers() -> CRS {
    CRS::from_epsg(3577)
}

fn aoi() -> MultiPolygon<f64> {
    MultiPolygon(vec![polygon![
        (x: X0, y: Y0),
        (x: X0 + SIZE, y: Y0),
        (x: X0 + SIZE, y: Y0 + SIZE),
        (x: X0, y: Y0 + SIZE),
    ]])
}

fn transform() -> GeoTransform {
    GeoTransform::new(X0, Y0 + SIZE, PIXEL, -PIXEL)
}

/// Red/NIR reflectance stack over the AOI bounding box.
fn scenes(cleared_west: bool) -> Array4<f64> {
    let n = (SIZE / PIXEL) as usize;
    let times = 7;
    Array4::from_shape_fn((2, times, n, n), |(band, t, row, col)| {
        // Two cloudy scenes, one scene with a nodata stripe
        if t == 1 || (t == 4 && row % 3 == 0) {
            return 0.9;
        }
        if t == 5 && col < 5 {
            return 0.0;
        }
        let bare = cleared_west && col < n / 2;
        match (band, bare) {
            (0, false) => 0.05,
            (1, false) => 0.40,
            (0, true) => 0.15,
            _ => 0.20,
        }
    })
}

fn run_pass(grid: &HexGrid, cleared_west: bool) -> (Raster<u16>, Vec<Option<f64>>) {
    let stack = scenes(cleared_west);
    let composite = median_composite(stack.view(), transform(), albers()).unwrap();
    let index = ndvi(&composite, 0, 1, &IndexConfig::default()).unwrap();
    let means = hexagon_means(grid, &index).unwrap();
    (index, means)
}

#[test]
fn disturbance_workflow_flags_cleared_half() {
    let windows = DateWindows::new(parse_anchor("2023-09-09").unwrap(), DateWindowParams::default())
        .unwrap();
    assert_eq!(windows.reference.mean_column(), "2022_9_mean");
    assert_eq!(windows.analysis.mean_column(), "2023_9_mean");

    let grid = HexGrid::generate(&aoi(), &albers(), &albers(), &HexGridParams::default()).unwrap();
    let (reference_index, reference) = run_pass(&grid, false);
    let (analysis_index, analysis) = run_pass(&grid, true);
    reference_index.ensure_same_grid(&analysis_index).unwrap();

    // Median removes cloud: vegetated pixels are round(10000 + 10000 * 0.35 / 0.45)
    assert_eq!(reference_index.get(0, 0).unwrap(), 17778);
    assert_eq!(analysis_index.get(0, 0).unwrap(), 11429);
    assert_eq!(analysis_index.get(0, 39).unwrap(), 17778);

    let flags = classify(&reference, &analysis, &DisturbanceParams::default()).unwrap();
    assert_eq!(flags.len(), grid.len());

    let mid = X0 + SIZE / 2.0;
    for (i, cell) in grid.cells().iter().enumerate() {
        let inside = cell.centre.x > X0 + 500.0
            && cell.centre.x < X0 + SIZE - 500.0
            && cell.centre.y > Y0 + 500.0
            && cell.centre.y < Y0 + SIZE - 500.0;
        if inside && cell.centre.x < mid - 600.0 {
            assert_eq!(flags[i], 1, "western hexagon {i} should be disturbed");
        }
        if cell.centre.x > mid + 600.0 {
            assert_eq!(flags[i], 0, "eastern hexagon {i} should be undisturbed");
        }
        if reference[i].is_none() || analysis[i].is_none() {
            assert_eq!(flags[i], 0, "hexagon {i} without data must be undisturbed");
        }
    }

    let summary = DisturbanceSummary::new(&flags, grid.cell_area_m2());
    assert!(summary.disturbed > 0);
    assert!(summary.disturbed < summary.hexagons);
    assert!((summary.disturbed_area_ha() - summary.disturbed as f64 * 73.73).abs() < 0.01 * summary.disturbed as f64);
}

#[test]
fn disturbance_workflow_is_deterministic() {
    let grid = HexGrid::generate(&aoi(), &albers(), &albers(), &HexGridParams::default()).unwrap();
    let (_, first_ref) = run_pass(&grid, false);
    let (_, first_ana) = run_pass(&grid, true);
    let (_, second_ref) = run_pass(&grid, false);
    let (_, second_ana) = run_pass(&grid, true);
    assert_eq!(first_ref, second_ref);
    assert_eq!(first_ana, second_ana);

    let params = DisturbanceParams::default();
    assert_eq!(
        classify(&first_ref, &first_ana, &params).unwrap(),
        classify(&second_ref, &second_ana, &params).unwrap()
    );
}

#[test]
fn index_rasters_survive_two_band_geotiff() {
    let grid = HexGrid::generate(&aoi(), &albers(), &albers(), &HexGridParams::default()).unwrap();
    let (mut reference, _) = run_pass(&grid, false);
    let (analysis, _) = run_pass(&grid, true);
    reference.set(3, 3, 65535).unwrap();

    let bytes = write_two_band_u16_to_buffer([&reference, &analysis]).unwrap();
    let bands = read_bands_from_buffer(bytes).unwrap();
    assert_eq!(bands.len(), 2);
    assert_eq!(bands[0].get(3, 3).unwrap(), 65535.0);
    assert_eq!(bands[0].nodata(), Some(65535.0));
    assert_eq!(&bands[1].data().mapv(|v| v as u16), analysis.data());
    assert!(bands[1].transform().approx_eq(analysis.transform(), 1e-9));
}
