//! H3 hexagon sampling grid
//!
//! The AOI is projected to the target CRS and grown by a buffer distance in
//! that CRS's units. A cell belongs to the grid when its centre lies inside
//! the buffered AOI. Cell outlines are returned in the target CRS.

use geo::{Area, BoundingRect, Coord, EuclideanDistance, LineString, MultiPolygon, Point, Polygon, Rect};
use h3o::geom::{PolyfillConfig, ToCells};
use h3o::{CellIndex, LatLng, Resolution};
use hexchange_core::vector::{Feature, FeatureCollection};
use hexchange_core::{Error, Result, Transformer, CRS};
use tracing::{debug, info};

/// Points sampled per edge when projecting the search envelope.
const ENVELOPE_DENSIFY: usize = 21;

/// Parameters for hexagon grid generation
#[derive(Debug, Clone)]
pub struct HexGridParams {
    /// H3 resolution level, 0-15 (default: 8)
    pub resolution: u8,
    /// Outward buffer around the AOI, in target CRS units (default: 1000)
    pub buffer: f64,
}

impl Default for HexGridParams {
    fn default() -> Self {
        Self {
            resolution: 8,
            buffer: 1000.0,
        }
    }
}

/// One grid cell, in the grid's CRS.
#[derive(Debug, Clone, PartialEq)]
pub struct HexCell {
    /// Contiguous row index, starting at 0
    pub index: usize,
    pub id: CellIndex,
    pub centre: Coord<f64>,
    pub polygon: Polygon<f64>,
}

/// Hexagonal sampling grid covering a buffered AOI.
///
/// Cells are ordered by H3 index, so two grids built from the same inputs
/// are identical row for row.
#[derive(Debug, Clone)]
pub struct HexGrid {
    crs: CRS,
    resolution: Resolution,
    cells: Vec<HexCell>,
}

impl HexGrid {
    /// Tessellate `aoi` (in `aoi_crs`) into hexagons, returned in `target_crs`.
    ///
    /// Fails with [`Error::Geometry`] for an empty or degenerate AOI and
    /// with [`Error::UnsupportedCrs`] when either CRS has no projection.
    pub fn generate(
        aoi: &MultiPolygon<f64>,
        aoi_crs: &CRS,
        target_crs: &CRS,
        params: &HexGridParams,
    ) -> Result<Self> {
        let resolution =
            Resolution::try_from(params.resolution).map_err(|e| Error::InvalidParameter {
                name: "resolution",
                value: params.resolution.to_string(),
                reason: e.to_string(),
            })?;
        if !(params.buffer.is_finite() && params.buffer >= 0.0) {
            return Err(Error::InvalidParameter {
                name: "buffer",
                value: params.buffer.to_string(),
                reason: "must be a non-negative distance".into(),
            });
        }

        validate_aoi(aoi)?;
        let projected = Transformer::new(aoi_crs, target_crs)?.transform_geometry(aoi)?;
        validate_aoi(&projected)?;

        let to_geographic = Transformer::new(target_crs, &CRS::wgs84())?;
        let from_geographic = Transformer::new(&CRS::wgs84(), target_crs)?;

        let envelope = search_envelope(&projected, params.buffer, &to_geographic)?;
        let candidates = h3o::geom::Polygon::from_degrees(envelope.to_polygon())
            .map_err(|e| Error::Geometry(e.to_string()))?;

        let mut ids: Vec<CellIndex> = candidates.to_cells(PolyfillConfig::new(resolution)).collect();
        ids.sort_unstable();
        ids.dedup();
        debug!(candidates = ids.len(), "hexagon candidates");

        let mut cells = Vec::new();
        for id in ids {
            let ll = LatLng::from(id);
            let centre = from_geographic.transform_coord(Coord {
                x: ll.lng(),
                y: ll.lat(),
            })?;
            if distance_to(&projected, centre) > params.buffer {
                continue;
            }
            cells.push(HexCell {
                index: cells.len(),
                id,
                centre,
                polygon: cell_polygon(id, &from_geographic)?,
            });
        }

        if cells.is_empty() {
            return Err(Error::Geometry(format!(
                "no resolution {} hexagon centre falls inside the buffered AOI",
                params.resolution
            )));
        }
        info!(
            hexagons = cells.len(),
            resolution = params.resolution,
            "hexagon grid generated"
        );

        Ok(Self {
            crs: target_crs.clone(),
            resolution,
            cells,
        })
    }

    pub fn crs(&self) -> &CRS {
        &self.crs
    }

    pub fn resolution(&self) -> u8 {
        u8::from(self.resolution)
    }

    pub fn cells(&self) -> &[HexCell] {
        &self.cells
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn polygons(&self) -> impl Iterator<Item = &Polygon<f64>> {
        self.cells.iter().map(|c| &c.polygon)
    }

    /// Envelope of every hexagon outline, in the grid CRS.
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.polygons()
            .filter_map(|p| p.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    Coord {
                        x: a.min().x.min(b.min().x),
                        y: a.min().y.min(b.min().y),
                    },
                    Coord {
                        x: a.max().x.max(b.max().x),
                        y: a.max().y.max(b.max().y),
                    },
                )
            })
    }

    /// Average hexagon area at the grid resolution, in square metres.
    pub fn cell_area_m2(&self) -> f64 {
        self.resolution.area_m2()
    }

    /// One feature per cell with `index` and `h3` columns.
    pub fn to_features(&self) -> FeatureCollection {
        let mut fc = FeatureCollection::with_crs(self.crs.clone());
        for cell in &self.cells {
            let mut feature = Feature::new(cell.polygon.clone().into());
            feature.set_property("index", cell.index as i64);
            feature.set_property("h3", cell.id.to_string());
            fc.push(feature);
        }
        fc
    }
}

fn validate_aoi(aoi: &MultiPolygon<f64>) -> Result<()> {
    if aoi.0.is_empty() {
        return Err(Error::Geometry("AOI has no polygons".into()));
    }
    let finite = aoi
        .0
        .iter()
        .flat_map(|p| p.exterior().coords())
        .all(|c| c.x.is_finite() && c.y.is_finite());
    if !finite {
        return Err(Error::Geometry("AOI has non-finite coordinates".into()));
    }
    if aoi.unsigned_area() <= 0.0 {
        return Err(Error::Geometry("AOI has zero area".into()));
    }
    Ok(())
}

/// Lon/lat rectangle enclosing the buffered AOI, padded slightly so cells
/// whose centre sits on the envelope edge are still candidates.
fn search_envelope(
    projected: &MultiPolygon<f64>,
    buffer: f64,
    to_geographic: &Transformer,
) -> Result<Rect<f64>> {
    let b = projected
        .bounding_rect()
        .ok_or_else(|| Error::Geometry("AOI has no extent".into()))?;
    let (min_x, min_y, max_x, max_y) = to_geographic.transform_bounds(
        b.min().x - buffer,
        b.min().y - buffer,
        b.max().x + buffer,
        b.max().y + buffer,
        ENVELOPE_DENSIFY,
    )?;
    let pad_x = 0.01 + (max_x - min_x) * 0.01;
    let pad_y = 0.01 + (max_y - min_y) * 0.01;
    Ok(Rect::new(
        Coord {
            x: (min_x - pad_x).max(-180.0),
            y: (min_y - pad_y).max(-90.0),
        },
        Coord {
            x: (max_x + pad_x).min(180.0),
            y: (max_y + pad_y).min(90.0),
        },
    ))
}

/// Planar distance from `point` to the AOI; zero inside it.
fn distance_to(aoi: &MultiPolygon<f64>, point: Coord<f64>) -> f64 {
    let p = Point::from(point);
    aoi.0
        .iter()
        .map(|poly| p.euclidean_distance(poly))
        .fold(f64::INFINITY, f64::min)
}

fn cell_polygon(id: CellIndex, from_geographic: &Transformer) -> Result<Polygon<f64>> {
    let ring = id
        .boundary()
        .iter()
        .map(|ll| {
            from_geographic.transform_coord(Coord {
                x: ll.lng(),
                y: ll.lat(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(LineString::from(ring), vec![]))
}
