//! Zonal statistics
//!
//! Polygons are burned into a zone raster on the value raster's grid by
//! cell centre: a cell belongs to the first polygon that contains (or
//! touches) its centre, so no cell is counted twice. Means are then taken
//! over each zone's non-nodata cells.

use geo::{Coord, Intersects, Polygon};
use hexchange_core::raster::{Raster, RasterElement};
use hexchange_core::{Error, Result};
use tracing::debug;

use crate::grid::HexGrid;

/// Zone id of cells outside every polygon
pub const NO_ZONE: u32 = 0;

/// Accumulated values for one zone
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ZonalResult {
    pub count: usize,
    pub sum: f64,
}

impl ZonalResult {
    /// Mean of the valid cells, `None` when there are none.
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum / self.count as f64)
    }
}

/// Burn polygons into a zone raster aligned with `like`.
///
/// Polygon `i` gets zone id `i + 1`; cells outside every polygon are
/// [`NO_ZONE`].
pub fn rasterize_zones<'a, T, I>(polygons: I, like: &Raster<T>) -> Result<Raster<u32>>
where
    T: RasterElement,
    I: IntoIterator<Item = &'a Polygon<f64>>,
{
    let (rows, cols) = like.shape();
    let mut zones = like.with_same_meta(ndarray::Array2::from_elem((rows, cols), NO_ZONE))?;
    zones.set_nodata(Some(NO_ZONE));
    let gt = *like.transform();

    for (i, polygon) in polygons.into_iter().enumerate() {
        let id = u32::try_from(i + 1).map_err(|_| Error::Algorithm("too many zones".into()))?;
        let Some(rect) = geo::BoundingRect::bounding_rect(polygon) else {
            continue;
        };

        let (c0, r0) = gt.geo_to_pixel(rect.min().x, rect.max().y);
        let (c1, r1) = gt.geo_to_pixel(rect.max().x, rect.min().y);
        let Some((col_start, col_end)) = pixel_span(c0, c1, cols) else {
            continue;
        };
        let Some((row_start, row_end)) = pixel_span(r0, r1, rows) else {
            continue;
        };

        let data = zones.data_mut();
        for row in row_start..row_end {
            for col in col_start..col_end {
                if data[(row, col)] != NO_ZONE {
                    continue;
                }
                let (x, y) = gt.pixel_to_geo(col, row);
                if polygon.intersects(&Coord { x, y }) {
                    data[(row, col)] = id;
                }
            }
        }
    }

    Ok(zones)
}

/// Cell indices whose centres may fall between fractional pixel
/// coordinates `a` and `b`, clamped to `[0, len)`.
fn pixel_span(a: f64, b: f64, len: usize) -> Option<(usize, usize)> {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    if !(lo.is_finite() && hi.is_finite()) || hi < 0.0 || lo > len as f64 {
        return None;
    }
    let start = (lo - 0.5).floor().max(0.0) as usize;
    let end = ((hi + 0.5).ceil() as usize).min(len);
    (start < end).then_some((start, end))
}

/// Per-zone sums and counts of `values`, skipping its nodata cells.
///
/// The result has one entry per zone id `1..=n_zones`. Fails unless both
/// rasters share one pixel grid.
pub fn zonal_statistics<T: RasterElement>(
    values: &Raster<T>,
    zones: &Raster<u32>,
    n_zones: usize,
) -> Result<Vec<ZonalResult>> {
    values.ensure_same_grid(zones)?;

    let mut results = vec![ZonalResult::default(); n_zones];
    for (&zone, &value) in zones.data().iter().zip(values.data().iter()) {
        if zone == NO_ZONE || values.is_nodata(value) {
            continue;
        }
        let Some(slot) = results.get_mut(zone as usize - 1) else {
            continue;
        };
        if let Some(v) = value.to_f64() {
            slot.count += 1;
            slot.sum += v;
        }
    }
    Ok(results)
}

/// Mean of `values` within every hexagon of `grid`, in grid row order.
///
/// The raster must be in the grid's CRS; its own transform locates cells.
pub fn hexagon_means<T: RasterElement>(grid: &HexGrid, values: &Raster<T>) -> Result<Vec<Option<f64>>> {
    match values.crs() {
        Some(crs) if crs.is_equivalent(grid.crs()) => {}
        other => {
            return Err(Error::CrsMismatch(
                other.map_or_else(|| "none".to_string(), |c| c.identifier()),
                grid.crs().identifier(),
            ))
        }
    }

    let zones = rasterize_zones(grid.polygons(), values)?;
    let stats = zonal_statistics(values, &zones, grid.len())?;
    let means: Vec<Option<f64>> = stats.iter().map(ZonalResult::mean).collect();
    debug!(
        hexagons = grid.len(),
        with_data = means.iter().filter(|m| m.is_some()).count(),
        "hexagon means"
    );
    Ok(means)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::HexGridParams;
    use geo::{polygon, MultiPolygon};
    use hexchange_core::{GeoTransform, CRS};

    /// 4x4 raster of 1 m cells with origin (0, 4)
    fn make_values(values: [[u16; 4]; 4]) -> Raster<u16> {
        let flat: Vec<u16> = values.iter().flatten().copied().collect();
        let mut r = Raster::from_vec(flat, 4, 4).unwrap();
        r.set_transform(GeoTransform::new(0.0, 4.0, 1.0, -1.0));
        r.set_crs(Some(CRS::from_epsg(3577)));
        r.set_nodata(Some(65535));
        r
    }

    fn square(x0: f64, y0: f64, size: f64) -> Polygon<f64> {
        polygon![
            (x: x0, y: y0),
            (x: x0 + size, y: y0),
            (x: x0 + size, y: y0 + size),
            (x: x0, y: y0 + size),
        ]
    }

    #[test]
    fn test_rasterize_by_cell_centre() {
        let values = make_values([[0; 4]; 4]);
        // Left half and right half of the raster
        let zones = rasterize_zones([&square(0.0, 0.0, 2.0), &square(2.0, 0.0, 2.0)], &values).unwrap();
        let z = zones.data();
        assert_eq!(z[(3, 0)], 1);
        assert_eq!(z[(3, 1)], 1);
        assert_eq!(z[(3, 2)], 2);
        assert_eq!(z[(0, 0)], NO_ZONE);
        assert_eq!(z.iter().filter(|&&v| v == 1).count(), 4);
    }

    #[test]
    fn test_shared_boundary_goes_to_first_polygon() {
        let values = make_values([[0; 4]; 4]);
        // Both squares touch the centre (1.5, 2.5) of cell (1, 1)
        let a = square(0.5, 1.5, 1.0);
        let b = square(1.5, 1.5, 1.0);
        let zones = rasterize_zones([&a, &b], &values).unwrap();
        assert_eq!(zones.data()[(1, 1)], 1);
        assert_eq!(zones.data()[(1, 2)], 2);
    }

    #[test]
    fn test_means_exclude_nodata() {
        let values = make_values([
            [10, 20, 30, 40],
            [10, 65535, 30, 40],
            [10, 20, 65535, 65535],
            [10, 20, 65535, 65535],
        ]);
        let zones = rasterize_zones(
            [&square(0.0, 2.0, 2.0), &square(2.0, 0.0, 2.0), &square(10.0, 10.0, 1.0)],
            &values,
        )
        .unwrap();
        let stats = zonal_statistics(&values, &zones, 3).unwrap();
        // Top-left block: 10, 20, 10 (one nodata)
        assert_eq!(stats[0].count, 3);
        assert_eq!(stats[0].mean(), Some(40.0 / 3.0));
        // All-nodata block is missing, not zero
        assert_eq!(stats[1].count, 0);
        assert_eq!(stats[1].mean(), None);
        // Polygon off the raster
        assert_eq!(stats[2].mean(), None);
    }

    #[test]
    fn test_mismatched_grid_is_rejected() {
        let values = make_values([[1; 4]; 4]);
        let mut zones = rasterize_zones([&square(0.0, 0.0, 4.0)], &values).unwrap();
        zones.set_transform(GeoTransform::new(100.0, 4.0, 1.0, -1.0));
        assert!(matches!(
            zonal_statistics(&values, &zones, 1),
            Err(Error::TransformMismatch(..))
        ));
    }

    fn albers_grid() -> HexGrid {
        let aoi = MultiPolygon(vec![square(1_200_000.0, -3_950_000.0, 3_000.0)]);
        let albers = CRS::from_epsg(3577);
        HexGrid::generate(&aoi, &albers, &albers, &HexGridParams::default()).unwrap()
    }

    #[test]
    fn test_hexagons_off_the_raster_are_missing() {
        let grid = albers_grid();
        // 100 m raster covering only the un-buffered AOI
        let mut values = Raster::filled(30, 30, 12_000u16);
        values.set_transform(GeoTransform::new(1_200_000.0, -3_947_000.0, 100.0, -100.0));
        values.set_crs(Some(CRS::from_epsg(3577)));
        values.set_nodata(Some(65535));

        let means = hexagon_means(&grid, &values).unwrap();
        assert_eq!(means.len(), grid.len());
        assert!(means.iter().flatten().all(|&m| m == 12_000.0));
        assert!(means.iter().any(|m| m.is_none()));
        assert!(means.iter().any(|m| m.is_some()));
    }

    #[test]
    fn test_raster_over_grid_bounds_reaches_every_hexagon() {
        let grid = albers_grid();
        let b = grid.bounds().unwrap();
        let x0 = (b.min().x / 100.0).floor() * 100.0;
        let y1 = (b.max().y / 100.0).ceil() * 100.0;
        let cols = ((b.max().x - x0) / 100.0).ceil() as usize;
        let rows = ((y1 - b.min().y) / 100.0).ceil() as usize;
        let mut values = Raster::filled(rows, cols, 12_000u16);
        values.set_transform(GeoTransform::new(x0, y1, 100.0, -100.0));
        values.set_crs(Some(CRS::from_epsg(3577)));
        values.set_nodata(Some(65535));

        let means = hexagon_means(&grid, &values).unwrap();
        assert!(means.iter().all(|&m| m == Some(12_000.0)));
    }

    #[test]
    fn test_hexagon_means_need_matching_crs() {
        let grid = albers_grid();
        let mut values = Raster::filled(3, 3, 1u16);
        values.set_crs(Some(CRS::from_epsg(32755)));
        assert!(matches!(hexagon_means(&grid, &values), Err(Error::CrsMismatch(..))));
        values.set_crs(None);
        assert!(matches!(hexagon_means(&grid, &values), Err(Error::CrsMismatch(..))));
    }
}
