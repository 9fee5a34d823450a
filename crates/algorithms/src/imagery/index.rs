//! Scaled NDVI
//!
//! `NDVI = (NIR - Red) / (NIR + Red)` is stored as an unsigned 16-bit value
//! `round(offset + scale * NDVI)`. With the defaults, valid values occupy
//! `[0, 20000]` and `65535` marks nodata.

use hexchange_core::raster::Raster;
use hexchange_core::{Error, Result};
use ndarray::{Array2, ArrayView2, Zip};
use rayon::prelude::*;

use super::composite::Composite;

/// Fixed-point encoding of the index
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexConfig {
    /// Multiplier applied to the raw index (default: 10000)
    pub scale: f64,
    /// Added after scaling (default: 10000)
    pub offset: f64,
    /// Sentinel for pixels without a valid index (default: 65535)
    pub nodata: u16,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            scale: 10_000.0,
            offset: 10_000.0,
            nodata: u16::MAX,
        }
    }
}

impl IndexConfig {
    /// Scaled value of index -1
    pub fn min_valid(&self) -> f64 {
        self.offset - self.scale
    }

    /// Scaled value of index +1
    pub fn max_valid(&self) -> f64 {
        self.offset + self.scale
    }

    /// Reject encodings whose valid range leaves u16 or reaches the sentinel.
    pub fn validate(&self) -> Result<()> {
        let ok = self.scale.is_finite()
            && self.scale > 0.0
            && self.min_valid() >= 0.0
            && self.max_valid().round() < f64::from(self.nodata);
        if ok {
            Ok(())
        } else {
            Err(Error::InvalidParameter {
                name: "index",
                value: format!("scale={} offset={} nodata={}", self.scale, self.offset, self.nodata),
                reason: "scaled range must fit in u16 below the nodata sentinel".into(),
            })
        }
    }
}

/// Scaled NDVI of one pixel.
///
/// A zero band is nodata, and takes precedence over the `0/0` case.
/// Non-finite or out-of-range results also resolve to nodata.
#[inline]
pub fn scaled_ndvi(red: f64, nir: f64, config: &IndexConfig) -> u16 {
    if red == 0.0 || nir == 0.0 {
        return config.nodata;
    }
    let index = (nir - red) / (nir + red);
    if !index.is_finite() || index.abs() > 1.0 {
        return config.nodata;
    }
    let scaled = (config.offset + config.scale * index).round();
    if scaled < config.min_valid() || scaled > config.max_valid() {
        return config.nodata;
    }
    scaled as u16
}

/// Scaled NDVI over two bands, honouring an explicit validity mask.
pub fn ndvi_array(
    red: ArrayView2<'_, f64>,
    nir: ArrayView2<'_, f64>,
    valid: ArrayView2<'_, bool>,
    config: &IndexConfig,
) -> Result<Array2<u16>> {
    config.validate()?;
    let (rows, cols) = red.dim();
    for other in [nir.dim(), valid.dim()] {
        if other != (rows, cols) {
            return Err(Error::SizeMismatch {
                er: rows,
                ec: cols,
                ar: other.0,
                ac: other.1,
            });
        }
    }

    let data: Vec<u16> = (0..rows)
        .into_par_iter()
        .flat_map(|row| {
            let mut row_data = vec![config.nodata; cols];
            Zip::from(&mut row_data[..])
                .and(red.row(row))
                .and(nir.row(row))
                .and(valid.row(row))
                .for_each(|out, &r, &n, &ok| {
                    if ok {
                        *out = scaled_ndvi(r, n, config);
                    }
                });
            row_data
        })
        .collect();

    Array2::from_shape_vec((rows, cols), data).map_err(|e| Error::Other(e.to_string()))
}

/// Scaled NDVI raster of a composite, on the composite's grid.
pub fn ndvi(
    composite: &Composite,
    red_band: usize,
    nir_band: usize,
    config: &IndexConfig,
) -> Result<Raster<u16>> {
    let data = ndvi_array(
        composite.band(red_band)?,
        composite.band(nir_band)?,
        composite.valid.view(),
        config,
    )?;
    let mut raster = Raster::from_array(data);
    raster.set_transform(composite.transform);
    raster.set_crs(Some(composite.crs.clone()));
    raster.set_nodata(Some(config.nodata));
    Ok(raster)
}
