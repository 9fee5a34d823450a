//! Temporal median compositing
//!
//! Reduces a `(band, time, row, col)` scene stack to one observation per
//! band and pixel. Values `<= 0` are sensor nodata and are skipped, so each
//! pixel's median is taken over its available samples only.

use hexchange_core::raster::Raster;
use hexchange_core::{Error, GeoTransform, Result, CRS};
use ndarray::{s, Array2, Array3, ArrayView2, ArrayView4};
use rayon::prelude::*;
use tracing::debug;

/// A reduced multi-band raster plus its validity mask.
///
/// `valid` is the single nodata predicate for everything downstream: a
/// pixel is valid when every band has at least one observation.
#[derive(Debug, Clone)]
pub struct Composite {
    /// Band values indexed `(band, row, col)`; NaN where unobserved
    pub bands: Array3<f64>,
    pub valid: Array2<bool>,
    pub transform: GeoTransform,
    pub crs: CRS,
}

impl Composite {
    pub fn band_count(&self) -> usize {
        self.bands.dim().0
    }

    pub fn shape(&self) -> (usize, usize) {
        self.valid.dim()
    }

    pub fn band(&self, band: usize) -> Result<ArrayView2<'_, f64>> {
        if band >= self.band_count() {
            return Err(Error::InvalidParameter {
                name: "band",
                value: band.to_string(),
                reason: format!("composite has {} bands", self.band_count()),
            });
        }
        Ok(self.bands.slice(s![band, .., ..]))
    }

    /// One band as a georeferenced raster with NaN nodata.
    pub fn band_raster(&self, band: usize) -> Result<Raster<f64>> {
        let mut raster = Raster::from_array(self.band(band)?.to_owned());
        raster.set_transform(self.transform);
        raster.set_crs(Some(self.crs.clone()));
        raster.set_nodata(Some(f64::NAN));
        Ok(raster)
    }

    pub fn valid_count(&self) -> usize {
        self.valid.iter().filter(|&&v| v).count()
    }
}

/// Whether a sensor value is a real observation.
#[inline]
pub fn is_observation(value: f64) -> bool {
    value.is_finite() && value > 0.0
}

/// Median of `samples`, NaN when empty. Reorders `samples`.
fn median(samples: &mut [f64]) -> f64 {
    let n = samples.len();
    if n == 0 {
        return f64::NAN;
    }
    samples.sort_unstable_by(f64::total_cmp);
    if n % 2 == 1 {
        samples[n / 2]
    } else {
        (samples[n / 2 - 1] + samples[n / 2]) / 2.0
    }
}

/// Reduce `stack` along its time axis with a NaN-aware median.
///
/// # Arguments
/// * `stack` - Scene values indexed `(band, time, row, col)`
/// * `transform` - Pixel grid shared by every scene
/// * `crs` - CRS of `transform`
pub fn median_composite(
    stack: ArrayView4<'_, f64>,
    transform: GeoTransform,
    crs: CRS,
) -> Result<Composite> {
    let (n_bands, n_time, rows, cols) = stack.dim();
    if n_bands == 0 || n_time == 0 {
        return Err(Error::InvalidParameter {
            name: "stack",
            value: format!("{n_bands} bands x {n_time} scenes"),
            reason: "needs at least one band and one scene".into(),
        });
    }
    if rows == 0 || cols == 0 {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let row_blocks: Vec<Vec<f64>> = (0..rows)
        .into_par_iter()
        .map(|row| {
            let mut out = vec![f64::NAN; n_bands * cols];
            let mut samples = Vec::with_capacity(n_time);
            for band in 0..n_bands {
                for col in 0..cols {
                    samples.clear();
                    samples.extend(
                        stack
                            .slice(s![band, .., row, col])
                            .iter()
                            .copied()
                            .filter(|&v| is_observation(v)),
                    );
                    out[band * cols + col] = median(&mut samples);
                }
            }
            out
        })
        .collect();

    let mut bands = Array3::from_elem((n_bands, rows, cols), f64::NAN);
    for (row, block) in row_blocks.iter().enumerate() {
        for band in 0..n_bands {
            bands
                .slice_mut(s![band, row, ..])
                .iter_mut()
                .zip(&block[band * cols..(band + 1) * cols])
                .for_each(|(dst, &v)| *dst = v);
        }
    }

    let valid = Array2::from_shape_fn((rows, cols), |(r, c)| {
        (0..n_bands).all(|b| bands[(b, r, c)].is_finite())
    });

    let composite = Composite {
        bands,
        valid,
        transform,
        crs,
    };
    debug!(
        scenes = n_time,
        rows,
        cols,
        valid = composite.valid_count(),
        "median composite"
    );
    Ok(composite)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array4;

    fn grid() -> (GeoTransform, CRS) {
        (GeoTransform::new(0.0, 200.0, 100.0, -100.0), CRS::from_epsg(3577))
    }

    /// 2 bands x `red.len()` scenes x 1 x 1
    fn single_pixel(red: &[f64], nir: &[f64]) -> Array4<f64> {
        let t = red.len();
        let mut stack = Array4::from_elem((2, t, 1, 1), f64::NAN);
        for i in 0..t {
            stack[(0, i, 0, 0)] = red[i];
            stack[(1, i, 0, 0)] = nir[i];
        }
        stack
    }

    #[test]
    fn test_odd_and_even_medians() {
        let (gt, crs) = grid();
        let stack = single_pixel(&[0.3, 0.1, 0.2], &[0.4, 0.6, 0.5]);
        let c = median_composite(stack.view(), gt, crs.clone()).unwrap();
        assert_eq!(c.bands[(0, 0, 0)], 0.2);
        assert_eq!(c.bands[(1, 0, 0)], 0.5);

        let stack = single_pixel(&[0.4, 0.1, 0.2, 0.3], &[1.0, 1.0, 1.0, 1.0]);
        let c = median_composite(stack.view(), gt, crs).unwrap();
        assert!((c.bands[(0, 0, 0)] - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_sensor_nodata_is_skipped() {
        let (gt, crs) = grid();
        // Zeros, negatives and NaN are not observations
        let stack = single_pixel(&[0.0, -0.05, f64::NAN, 0.2, 0.4], &[0.5, 0.5, 0.5, 0.0, 0.7]);
        let c = median_composite(stack.view(), gt, crs).unwrap();
        assert!((c.bands[(0, 0, 0)] - 0.3).abs() < 1e-12);
        assert_eq!(c.bands[(1, 0, 0)], 0.5);
        assert!(c.valid[(0, 0)]);
    }

    #[test]
    fn test_unobserved_pixel_is_nan_and_invalid() {
        let (gt, crs) = grid();
        let mut stack = Array4::from_elem((2, 3, 2, 2), 0.25);
        for t in 0..3 {
            stack[(0, t, 1, 1)] = 0.0;
            stack[(1, t, 0, 1)] = f64::NAN;
        }
        let c = median_composite(stack.view(), gt, crs).unwrap();
        assert!(c.bands[(0, 1, 1)].is_nan());
        assert_eq!(c.bands[(1, 1, 1)], 0.25);
        assert!(!c.valid[(1, 1)]);
        assert!(!c.valid[(0, 1)]);
        assert!(c.valid[(0, 0)]);
        assert_eq!(c.valid_count(), 2);
    }

    #[test]
    fn test_metadata_is_carried() {
        let (gt, crs) = grid();
        let stack = Array4::from_elem((2, 1, 2, 3), 0.5);
        let c = median_composite(stack.view(), gt, crs).unwrap();
        assert_eq!(c.shape(), (2, 3));
        let red = c.band_raster(0).unwrap();
        assert_eq!(red.transform(), &gt);
        assert_eq!(red.crs().and_then(|c| c.epsg()), Some(3577));
        assert!(c.band(2).is_err());
    }

    #[test]
    fn test_empty_stack_rejected() {
        let (gt, crs) = grid();
        let stack = Array4::<f64>::zeros((2, 0, 4, 4));
        assert!(median_composite(stack.view(), gt, crs).is_err());
    }

    #[test]
    fn test_deterministic() {
        let (gt, crs) = grid();
        let stack = Array4::from_shape_fn((2, 7, 8, 9), |(b, t, r, c)| {
            ((b * 31 + t * 17 + r * 7 + c * 3) % 11) as f64 / 10.0
        });
        let a = median_composite(stack.view(), gt, crs.clone()).unwrap();
        let b = median_composite(stack.view(), gt, crs).unwrap();
        assert_eq!(a.valid, b.valid);
        assert!(a
            .bands
            .iter()
            .zip(b.bands.iter())
            .all(|(x, y)| x.to_bits() == y.to_bits()));
    }
}
