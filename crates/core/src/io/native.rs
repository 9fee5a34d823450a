//! Native multi-band GeoTIFF writing
//!
//! Uses the `tiff` crate. Bands are stored pixel-interleaved as unsigned
//! 16-bit samples with the georeferencing tags GDAL and QGIS understand:
//! ModelPixelScale, ModelTiepoint, a GeoKeyDirectory carrying the EPSG code,
//! and GDAL_NODATA.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::raster::{GeoTransform, Raster};
use std::fs::File;
use std::io::{BufWriter, Cursor};
use std::path::Path;
use tiff::encoder::colortype::ColorType;
use tiff::encoder::TiffEncoder;
use tiff::tags::{PhotometricInterpretation, SampleFormat, Tag};

const TAG_EXTRA_SAMPLES: u16 = 338;
const TAG_MODEL_PIXEL_SCALE: u16 = 33550;
const TAG_MODEL_TIEPOINT: u16 = 33922;
const TAG_GEO_KEY_DIRECTORY: u16 = 34735;
const TAG_GDAL_NODATA: u16 = 42113;

const KEY_MODEL_TYPE: u16 = 1024;
const KEY_RASTER_TYPE: u16 = 1025;
const KEY_GEOGRAPHIC_TYPE: u16 = 2048;
const KEY_PROJECTED_CS_TYPE: u16 = 3072;

const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

/// Two unsigned 16-bit samples per pixel
struct TwoBand16;

impl ColorType for TwoBand16 {
    type Inner = u16;
    const TIFF_VALUE: PhotometricInterpretation = PhotometricInterpretation::BlackIsZero;
    const BITS_PER_SAMPLE: &'static [u16] = &[16, 16];
    const SAMPLE_FORMAT: &'static [SampleFormat] = &[SampleFormat::Uint, SampleFormat::Uint];
}

/// Write two co-registered `u16` rasters as a 2-band GeoTIFF.
///
/// Band order follows the slice order. Both bands must share the same pixel
/// grid; georeferencing and nodata come from the first band.
pub fn write_two_band_u16<P: AsRef<Path>>(bands: [&Raster<u16>; 2], path: P) -> Result<()> {
    let file = BufWriter::new(File::create(path.as_ref())?);
    encode_two_band(bands, file)
}

/// Same as [`write_two_band_u16`] but into an in-memory buffer
pub fn write_two_band_u16_to_buffer(bands: [&Raster<u16>; 2]) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_two_band(bands, Cursor::new(&mut buf))?;
    Ok(buf)
}

fn encode_two_band<W>(bands: [&Raster<u16>; 2], writer: W) -> Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    let [first, second] = bands;
    first.ensure_same_grid(second)?;

    let (rows, cols) = first.shape();
    if rows == 0 || cols == 0 {
        return Err(Error::InvalidDimensions {
            width: cols,
            height: rows,
        });
    }

    let mut data = Vec::with_capacity(rows * cols * 2);
    for (a, b) in first.data().iter().zip(second.data().iter()) {
        data.push(*a);
        data.push(*b);
    }

    let mut encoder = TiffEncoder::new(writer)
        .map_err(|e| Error::Other(format!("TIFF encoder error: {}", e)))?;
    let mut image = encoder
        .new_image::<TwoBand16>(cols as u32, rows as u32)
        .map_err(|e| Error::Other(format!("Cannot create TIFF image: {}", e)))?;

    // Unspecified extra sample
    image
        .encoder()
        .write_tag(Tag::Unknown(TAG_EXTRA_SAMPLES), &[0u16][..])
        .map_err(|e| Error::Other(format!("Cannot write extra samples tag: {}", e)))?;

    let gt = first.transform();
    let scale = [gt.pixel_width, gt.pixel_height.abs(), 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(TAG_MODEL_PIXEL_SCALE), &scale[..])
        .map_err(|e| Error::Other(format!("Cannot write scale tag: {}", e)))?;

    let tiepoint = [0.0, 0.0, 0.0, gt.origin_x, gt.origin_y, 0.0];
    image
        .encoder()
        .write_tag(Tag::Unknown(TAG_MODEL_TIEPOINT), &tiepoint[..])
        .map_err(|e| Error::Other(format!("Cannot write tiepoint tag: {}", e)))?;

    let geokeys = geo_key_directory(first.crs())?;
    image
        .encoder()
        .write_tag(Tag::Unknown(TAG_GEO_KEY_DIRECTORY), geokeys.as_slice())
        .map_err(|e| Error::Other(format!("Cannot write geokey tag: {}", e)))?;

    if let Some(nodata) = first.nodata() {
        let text = nodata.to_string();
        image
            .encoder()
            .write_tag(Tag::Unknown(TAG_GDAL_NODATA), text.as_str())
            .map_err(|e| Error::Other(format!("Cannot write nodata tag: {}", e)))?;
    }

    image
        .write_data(&data)
        .map_err(|e| Error::Other(format!("Cannot write image data: {}", e)))?;

    Ok(())
}

/// GeoKeyDirectory for an EPSG-coded CRS
fn geo_key_directory(crs: Option<&CRS>) -> Result<Vec<u16>> {
    let Some(code) = crs.and_then(CRS::epsg) else {
        // Georeferenced but CRS unknown: model and raster type only
        return Ok(vec![
            1, 1, 0, 2,
            KEY_MODEL_TYPE, 0, 1, MODEL_TYPE_PROJECTED,
            KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        ]);
    };
    let code16 = u16::try_from(code).map_err(|_| Error::UnsupportedCrs(code))?;
    let geographic = crs
        .and_then(|c| c.projection().ok())
        .map_or(false, |p| p.is_geographic());

    let (model, key) = if geographic {
        (MODEL_TYPE_GEOGRAPHIC, KEY_GEOGRAPHIC_TYPE)
    } else {
        (MODEL_TYPE_PROJECTED, KEY_PROJECTED_CS_TYPE)
    };
    Ok(vec![
        1, 1, 0, 3,
        KEY_MODEL_TYPE, 0, 1, model,
        KEY_RASTER_TYPE, 0, 1, RASTER_PIXEL_IS_AREA,
        key, 0, 1, code16,
    ])
}
