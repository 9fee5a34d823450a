//! Coordinate transformation between two CRS

use super::{Projection, CRS};
use crate::error::Result;
use geo::MapCoords;
use geo_types::Coord;

/// Transforms coordinates from one CRS to another through geographic lon/lat.
#[derive(Debug, Clone)]
pub struct Transformer {
    from: Projection,
    to: Projection,
    identity: bool,
}

impl Transformer {
    pub fn new(from: &CRS, to: &CRS) -> Result<Self> {
        let from_proj = from.projection()?;
        let to_proj = to.projection()?;
        let identity = from.is_equivalent(to) || (from_proj.is_geographic() && to_proj.is_geographic());
        Ok(Self {
            from: from_proj,
            to: to_proj,
            identity,
        })
    }

    /// Whether the transform leaves coordinates unchanged
    pub fn is_identity(&self) -> bool {
        self.identity
    }

    /// Transform a single (x, y) pair
    pub fn transform_point(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        if self.identity {
            return Ok((x, y));
        }
        let (lon, lat) = self.from.inverse(x, y)?;
        self.to.forward(lon, lat)
    }

    pub fn transform_coord(&self, c: Coord<f64>) -> Result<Coord<f64>> {
        let (x, y) = self.transform_point(c.x, c.y)?;
        Ok(Coord { x, y })
    }

    /// Transform every vertex of a geometry.
    pub fn transform_geometry<G>(&self, geometry: &G) -> Result<G::Output>
    where
        G: MapCoords<f64, f64>,
    {
        geometry.try_map_coords(|c| self.transform_coord(c))
    }

    /// Transform a bounding box, sampling `densify` points along each edge.
    ///
    /// Returns the envelope (min_x, min_y, max_x, max_y) of the transformed edges.
    pub fn transform_bounds(
        &self,
        min_x: f64,
        min_y: f64,
        max_x: f64,
        max_y: f64,
        densify: usize,
    ) -> Result<(f64, f64, f64, f64)> {
        if self.identity {
            return Ok((min_x, min_y, max_x, max_y));
        }

        let steps = densify.max(1) + 1;
        let mut out = (f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for i in 0..=steps {
            let t = i as f64 / steps as f64;
            let x = min_x + t * (max_x - min_x);
            let y = min_y + t * (max_y - min_y);
            for (px, py) in [(x, min_y), (x, max_y), (min_x, y), (max_x, y)] {
                let (tx, ty) = self.transform_point(px, py)?;
                out.0 = out.0.min(tx);
                out.1 = out.1.min(ty);
                out.2 = out.2.max(tx);
                out.3 = out.3.max(ty);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use geo_types::polygon;

    #[test]
    fn geographic_datums_are_identity() {
        let t = Transformer::new(&CRS::from_epsg(4283), &CRS::wgs84()).unwrap();
        assert!(t.is_identity());
        assert_eq!(t.transform_point(150.0, -30.0).unwrap(), (150.0, -30.0));
    }

    #[test]
    fn albers_to_utm_through_geographic() {
        let t = Transformer::new(&CRS::from_epsg(3577), &CRS::from_epsg(32755)).unwrap();
        let albers = Projection::from_epsg(3577).unwrap();
        let utm = Projection::from_epsg(32755).unwrap();

        let (ax, ay) = albers.forward(146.0, -36.0).unwrap();
        let (ux, uy) = utm.forward(146.0, -36.0).unwrap();
        let (x, y) = t.transform_point(ax, ay).unwrap();
        assert_abs_diff_eq!(x, ux, epsilon = 1e-3);
        assert_abs_diff_eq!(y, uy, epsilon = 1e-3);
    }

    #[test]
    fn polygon_vertices_are_projected() {
        let t = Transformer::new(&CRS::wgs84(), &CRS::from_epsg(3577)).unwrap();
        let poly = polygon![
            (x: 131.9, y: -0.1),
            (x: 132.1, y: -0.1),
            (x: 132.1, y: 0.1),
            (x: 131.9, y: 0.1),
        ];
        let projected = t.transform_geometry(&poly).unwrap();
        let first = projected.exterior().0[0];
        assert!(first.x < 0.0);
        assert!(first.y < 0.0);
        assert_eq!(projected.exterior().0.len(), poly.exterior().0.len());
    }

    #[test]
    fn densified_bounds_contain_corners() {
        let t = Transformer::new(&CRS::wgs84(), &CRS::from_epsg(3577)).unwrap();
        let (min_x, min_y, max_x, max_y) = t.transform_bounds(145.0, -38.0, 147.0, -36.0, 16).unwrap();
        let albers = Projection::from_epsg(3577).unwrap();
        for (lon, lat) in [(145.0, -38.0), (147.0, -36.0), (145.0, -36.0), (147.0, -38.0)] {
            let (x, y) = albers.forward(lon, lat).unwrap();
            assert!(x >= min_x - 1e-6 && x <= max_x + 1e-6);
            assert!(y >= min_y - 1e-6 && y <= max_y + 1e-6);
        }
    }
}
