//! Core COG reader: open a remote COG, pick an overview level and read a
//! pixel window from it.

use std::collections::HashSet;

use futures::stream::{self, StreamExt};
use hexchange_core::crs::CRS;
use hexchange_core::raster::{GeoTransform, Raster};
use ndarray::Array2;
use tracing::debug;

use crate::decompress::{self, predictor};
use crate::error::{CloudError, Result};
use crate::geotiff_keys::{GeoTiffMeta, GEO_TAGS};
use crate::http::HttpClient;
use crate::ifd::{self, IfdInfo, TagSet, TiffByteOrder, STRUCTURE_TAGS};
use crate::tile_index::{self, PixelWindow};

/// Upper bound on IFDs followed, guarding against offset cycles.
const MAX_IFDS: usize = 64;

// ---------------------------------------------------------------------------
// Byte sources
// ---------------------------------------------------------------------------

/// Random-access byte source backing a [`CogReader`].
#[allow(async_fn_in_trait)]
pub trait RangeSource {
    /// Bytes `[offset .. offset + length)`; may be shorter at end of file.
    async fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>>;

    /// Name used in log messages.
    fn name(&self) -> &str;
}

/// A COG served over HTTP with Range support.
pub struct RemoteSource {
    client: HttpClient,
    url: String,
}

impl RemoteSource {
    pub fn new(client: HttpClient, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

impl RangeSource for RemoteSource {
    async fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        self.client.fetch_range(&self.url, offset, length).await
    }

    fn name(&self) -> &str {
        &self.url
    }
}

/// A TIFF file already held in memory.
pub struct MemorySource {
    name: String,
    bytes: Vec<u8>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }
}

impl RangeSource for MemorySource {
    async fn read_range(&self, offset: u64, length: u64) -> Result<Vec<u8>> {
        let len = self.bytes.len() as u64;
        let start = offset.min(len) as usize;
        let end = offset.saturating_add(length).min(len) as usize;
        Ok(self.bytes[start..end].to_vec())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Options for configuring a [`CogReader`].
#[derive(Debug, Clone)]
pub struct CogReaderOptions {
    /// Bytes fetched up front for the header and IFDs (default: 64 KiB).
    pub header_bytes: u64,
    /// Maximum number of concurrent tile fetches (default: 8).
    pub max_concurrent_fetches: usize,
}

impl Default for CogReaderOptions {
    fn default() -> Self {
        Self {
            header_bytes: 64 * 1024,
            max_concurrent_fetches: 8,
        }
    }
}

/// Metadata exposed by [`CogReader::metadata`].
#[derive(Debug, Clone)]
pub struct CogMetadata {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub bits_per_sample: u16,
    pub sample_format: u16,
    pub compression: u16,
    pub samples_per_pixel: u16,
    pub geo_transform: GeoTransform,
    pub crs: Option<CRS>,
    pub nodata: Option<f64>,
    pub num_overviews: usize,
}

/// Cloud Optimized GeoTIFF reader.
///
/// Reads only the tiles covering a requested window, at full resolution
/// or from one of the internal overviews.
pub struct CogReader<S: RangeSource> {
    source: S,
    byte_order: TiffByteOrder,
    levels: Vec<IfdInfo>,
    geo_meta: GeoTiffMeta,
    options: CogReaderOptions,
}

// ---------------------------------------------------------------------------
// Implementation
// ---------------------------------------------------------------------------

impl<S: RangeSource> CogReader<S> {
    /// Open a COG.
    ///
    /// Fetches the TIFF header and the whole IFD chain (full resolution +
    /// overviews), slicing from the initial fetch where possible.
    pub async fn open(source: S, options: CogReaderOptions) -> Result<Self> {
        let prefix = source.read_range(0, options.header_bytes).await?;
        let header = ifd::parse_header(&prefix)?;
        let byte_order = header.byte_order;

        let mut levels = Vec::new();
        let mut geo_meta = None;
        let mut seen = HashSet::new();
        let mut offset = header.first_ifd_offset;

        while offset > 0 && seen.insert(offset) && seen.len() <= MAX_IFDS {
            let count_bytes = bytes_at(&source, &prefix, offset, 2).await?;
            let entry_count = ifd::ifd_entry_count(byte_order, &count_bytes)?;
            let ifd_bytes =
                bytes_at(&source, &prefix, offset, ifd::ifd_byte_len(entry_count) as u64).await?;
            let raw = ifd::parse_ifd(byte_order, &ifd_bytes)?;

            let mut tags = TagSet::new(byte_order, raw.entries);
            let mut wanted = STRUCTURE_TAGS.to_vec();
            if geo_meta.is_none() {
                wanted.extend_from_slice(GEO_TAGS);
            }
            for (tag, value_offset, len) in tags.pending(&wanted) {
                let bytes = bytes_at(&source, &prefix, value_offset, len).await?;
                tags.resolve(tag, bytes);
            }

            let info = IfdInfo::from_tags(&tags)?;
            if geo_meta.is_none() {
                geo_meta = Some(GeoTiffMeta::from_tags(&tags));
            }
            if !info.is_mask {
                levels.push(info);
            }
            offset = raw.next_ifd_offset;
        }

        let geo_meta = geo_meta.ok_or(CloudError::NoIfd)?;
        let first = levels.first().ok_or(CloudError::NoIfd)?;
        if first.planar_config != 1 && first.samples_per_pixel > 1 {
            return Err(CloudError::UnsupportedPlanarConfig(first.planar_config));
        }

        debug!(
            source = source.name(),
            width = first.width,
            height = first.height,
            overviews = levels.len() - 1,
            "opened COG"
        );

        Ok(Self {
            source,
            byte_order,
            levels,
            geo_meta,
            options,
        })
    }

    /// Return metadata about the full-resolution image.
    pub fn metadata(&self) -> CogMetadata {
        let ifd = &self.levels[0];
        CogMetadata {
            width: ifd.width,
            height: ifd.height,
            tile_width: ifd.tile_width,
            tile_height: ifd.tile_height,
            bits_per_sample: ifd.bits_per_sample,
            sample_format: ifd.sample_format,
            compression: ifd.compression,
            samples_per_pixel: ifd.samples_per_pixel,
            geo_transform: self.geo_meta.geo_transform,
            crs: self.geo_meta.crs.clone(),
            nodata: self.geo_meta.nodata,
            num_overviews: self.levels.len().saturating_sub(1),
        }
    }

    /// Number of resolution levels, full resolution included.
    pub fn level_count(&self) -> usize {
        self.levels.len()
    }

    /// Image size `(width, height)` of a level.
    pub fn level_size(&self, level: usize) -> Result<(u32, u32)> {
        let ifd = self.level(level)?;
        Ok((ifd.width, ifd.height))
    }

    /// GeoTransform of a level; overviews share the origin of the full image.
    pub fn level_transform(&self, level: usize) -> Result<GeoTransform> {
        let full_gt = self.geo_meta.geo_transform;
        if level == 0 {
            return Ok(full_gt);
        }
        let full = &self.levels[0];
        let ovr = self.level(level)?;
        let sx = full.width as f64 / ovr.width as f64;
        let sy = full.height as f64 / ovr.height as f64;
        Ok(GeoTransform::new(
            full_gt.origin_x,
            full_gt.origin_y,
            full_gt.pixel_width * sx,
            full_gt.pixel_height * sy,
        ))
    }

    /// Coarsest level whose pixels are no larger than `pixel_size`.
    pub fn level_for_pixel_size(&self, pixel_size: f64) -> usize {
        let sizes: Vec<f64> = (0..self.levels.len())
            .map(|i| self.level_transform(i).map_or(f64::INFINITY, |gt| gt.cell_size()))
            .collect();
        tile_index::select_overview(&sizes, pixel_size)
    }

    /// Read sample `sample` of a pixel window at `level` into a `Raster<f64>`.
    ///
    /// Pixels in sparse (unwritten) tiles are NaN.
    pub async fn read_window(
        &self,
        level: usize,
        window: PixelWindow,
        sample: usize,
    ) -> Result<Raster<f64>> {
        let ifd = self.level(level)?;
        let spp = ifd.samples_per_pixel.max(1) as usize;
        if sample >= spp {
            return Err(CloudError::InvalidTiff {
                reason: format!("sample {} requested from {}-sample image", sample, spp),
            });
        }

        let tw = ifd.tile_width as usize;
        let th = ifd.tile_height as usize;
        let bytes_per_value = (ifd.bits_per_sample as usize).div_ceil(8);
        let raw_tile_size = tw * th * spp * bytes_per_value;

        let tiles =
            tile_index::tiles_for_window(&window, ifd.width, ifd.height, ifd.tile_width, ifd.tile_height);
        for t in &tiles {
            if t.tile_idx >= ifd.tile_offsets.len() {
                return Err(CloudError::TileOutOfRange {
                    tile_idx: t.tile_idx,
                    max: ifd.tile_offsets.len(),
                });
            }
        }

        let fetched: Vec<Result<Option<Vec<u8>>>> = stream::iter(tiles.iter())
            .map(|t| async move {
                let offset = ifd.tile_offsets[t.tile_idx];
                let length = ifd.tile_byte_counts[t.tile_idx];
                if length == 0 {
                    return Ok(None);
                }
                self.source.read_range(offset, length).await.map(Some)
            })
            .buffered(self.options.max_concurrent_fetches.max(1))
            .collect()
            .await;

        let mut output = Array2::<f64>::from_elem((window.rows, window.cols), f64::NAN);

        for (t, data) in tiles.iter().zip(fetched) {
            let Some(data) = data? else { continue };
            let mut raw = decompress::decompress_tile(&data, ifd.compression, raw_tile_size)?;
            match ifd.predictor {
                predictor::NONE => {}
                predictor::HORIZONTAL => decompress::undo_horizontal_predictor(
                    &mut raw,
                    self.byte_order,
                    ifd.bits_per_sample,
                    spp,
                    tw,
                )?,
                other => {
                    return Err(CloudError::Decompress(format!("unsupported predictor {}", other)))
                }
            }
            let values =
                decompress::bytes_to_f64(&raw, self.byte_order, ifd.bits_per_sample, ifd.sample_format)?;

            let tile_px_col = t.tile_col * tw;
            let tile_px_row = t.tile_row * th;

            for local_row in 0..th {
                let img_row = tile_px_row + local_row;
                if img_row < window.row_off || img_row >= window.row_off + window.rows {
                    continue;
                }
                for local_col in 0..tw {
                    let img_col = tile_px_col + local_col;
                    if !window.contains(img_col, img_row) {
                        continue;
                    }
                    let idx = (local_row * tw + local_col) * spp + sample;
                    if let Some(&v) = values.get(idx) {
                        output[(img_row - window.row_off, img_col - window.col_off)] = v;
                    }
                }
            }
        }

        let mut raster = Raster::from_array(output);
        raster.set_transform(window.transform(&self.level_transform(level)?));
        raster.set_crs(self.geo_meta.crs.clone());
        raster.set_nodata(self.geo_meta.nodata);
        Ok(raster)
    }

    fn level(&self, level: usize) -> Result<&IfdInfo> {
        self.levels.get(level).ok_or_else(|| CloudError::InvalidTiff {
            reason: format!("level {} out of range (have {})", level, self.levels.len()),
        })
    }
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

/// Bytes `[offset .. offset + length)`, sliced from the initial fetch when
/// it covers them, otherwise read from the source.
async fn bytes_at<S: RangeSource>(
    source: &S,
    prefix: &[u8],
    offset: u64,
    length: u64,
) -> Result<Vec<u8>> {
    let end = offset.saturating_add(length);
    if end <= prefix.len() as u64 {
        return Ok(prefix[offset as usize..end as usize].to_vec());
    }
    let bytes = source.read_range(offset, length).await?;
    if (bytes.len() as u64) < length {
        return Err(CloudError::InvalidTiff {
            reason: format!(
                "{}: wanted {} bytes at offset {}, got {}",
                source.name(),
                length,
                offset,
                bytes.len()
            ),
        });
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexchange_core::io::write_two_band_u16_to_buffer;

    fn sample_tiff() -> Vec<u8> {
        let mut red = Raster::<u16>::new(4, 5);
        let mut nir = Raster::<u16>::new(4, 5);
        for r in 0..4 {
            for c in 0..5 {
                red.set(r, c, (r * 10 + c) as u16).unwrap();
                nir.set(r, c, (1000 + r * 10 + c) as u16).unwrap();
            }
        }
        let gt = GeoTransform::new(500_000.0, 6_000_000.0, 100.0, -100.0);
        red.set_transform(gt);
        nir.set_transform(gt);
        red.set_crs(Some(CRS::from_epsg(32755)));
        nir.set_crs(Some(CRS::from_epsg(32755)));
        red.set_nodata(Some(65535));
        nir.set_nodata(Some(65535));
        write_two_band_u16_to_buffer([&red, &nir]).unwrap()
    }

    fn block_on<F: std::future::Future>(fut: F) -> F::Output {
        tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap()
            .block_on(fut)
    }

    #[test]
    fn reads_metadata_from_memory() {
        let reader = block_on(CogReader::open(
            MemorySource::new("mem", sample_tiff()),
            CogReaderOptions::default(),
        ))
        .unwrap();

        let meta = reader.metadata();
        assert_eq!((meta.width, meta.height), (5, 4));
        assert_eq!(meta.samples_per_pixel, 2);
        assert_eq!(meta.geo_transform.origin_x, 500_000.0);
        assert_eq!(meta.crs.and_then(|c| c.epsg()), Some(32755));
        assert_eq!(meta.nodata, Some(65535.0));
        assert_eq!(reader.level_count(), 1);
        assert_eq!(reader.level_for_pixel_size(1000.0), 0);
    }

    #[test]
    fn reads_window_of_second_sample() {
        let reader = block_on(CogReader::open(
            MemorySource::new("mem", sample_tiff()),
            CogReaderOptions::default(),
        ))
        .unwrap();

        let window = PixelWindow { col_off: 1, row_off: 2, cols: 3, rows: 2 };
        let nir = block_on(reader.read_window(0, window, 1)).unwrap();
        assert_eq!(nir.shape(), (2, 3));
        assert_eq!(nir.get(0, 0).unwrap(), 1021.0);
        assert_eq!(nir.get(1, 2).unwrap(), 1033.0);
        assert_eq!(nir.transform().origin_x, 500_100.0);
        assert_eq!(nir.transform().origin_y, 5_999_800.0);

        let red = block_on(reader.read_window(0, window, 0)).unwrap();
        assert_eq!(red.get(0, 0).unwrap(), 21.0);
        assert!(block_on(reader.read_window(0, window, 2)).is_err());
    }

    #[test]
    fn rejects_non_tiff() {
        let result = block_on(CogReader::open(
            MemorySource::new("mem", b"not a tiff at all".to_vec()),
            CogReaderOptions::default(),
        ));
        assert!(matches!(result, Err(CloudError::InvalidTiff { .. })));
    }

    #[test]
    fn truncated_header_fetch_is_extended() {
        let options = CogReaderOptions {
            header_bytes: 16,
            ..Default::default()
        };
        let reader = block_on(CogReader::open(MemorySource::new("mem", sample_tiff()), options)).unwrap();
        assert_eq!(reader.metadata().width, 5);
    }
}
