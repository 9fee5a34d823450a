//! Tile decompression for COG tiles.
//!
//! Supports DEFLATE (via `flate2`), LZW (via `weezl`), and uncompressed
//! tiles, plus the horizontal differencing predictor.

use crate::error::{CloudError, Result};
use crate::ifd::{self, TiffByteOrder};

/// TIFF compression codes.
pub mod compression {
    pub const NONE: u16 = 1;
    pub const LZW: u16 = 5;
    pub const DEFLATE: u16 = 8;
    pub const ADOBE_DEFLATE: u16 = 32946;
}

/// TIFF sample format codes.
pub mod sample_format {
    pub const UNSIGNED_INT: u16 = 1;
    pub const SIGNED_INT: u16 = 2;
    pub const FLOAT: u16 = 3;
}

/// TIFF predictor codes.
pub mod predictor {
    pub const NONE: u16 = 1;
    pub const HORIZONTAL: u16 = 2;
}

/// Decompress raw tile bytes according to the compression method.
pub fn decompress_tile(
    data: &[u8],
    compression_code: u16,
    expected_raw_size: usize,
) -> Result<Vec<u8>> {
    match compression_code {
        compression::NONE => Ok(data.to_vec()),

        compression::DEFLATE | compression::ADOBE_DEFLATE => {
            use std::io::Read;
            // TIFF DEFLATE tiles are normally zlib-wrapped; fall back to raw deflate.
            let mut decoder = flate2::read::ZlibDecoder::new(data);
            let mut out = Vec::with_capacity(expected_raw_size);
            match decoder.read_to_end(&mut out) {
                Ok(_) => Ok(out),
                Err(_) => {
                    out.clear();
                    let mut decoder = flate2::read::DeflateDecoder::new(data);
                    decoder
                        .read_to_end(&mut out)
                        .map_err(|e| CloudError::Decompress(format!("DEFLATE: {}", e)))?;
                    Ok(out)
                }
            }
        }

        compression::LZW => {
            let mut decoder =
                weezl::decode::Decoder::with_tiff_size_switch(weezl::BitOrder::Msb, 8);
            decoder
                .decode(data)
                .map_err(|e| CloudError::Decompress(format!("LZW: {}", e)))
        }

        _ => Err(CloudError::UnsupportedCompression(compression_code)),
    }
}

/// Reverse the horizontal differencing predictor in place.
///
/// Each row of `tile_width * samples` values stores differences from the
/// previous value of the same sample; accumulation wraps like the encoder.
pub fn undo_horizontal_predictor(
    data: &mut [u8],
    byte_order: TiffByteOrder,
    bits_per_sample: u16,
    samples: usize,
    tile_width: usize,
) -> Result<()> {
    let bytes_per_value = (bits_per_sample / 8) as usize;
    let row_len = tile_width * samples * bytes_per_value;
    if row_len == 0 {
        return Ok(());
    }

    for row in data.chunks_exact_mut(row_len) {
        match bits_per_sample {
            8 => {
                for i in samples..row.len() {
                    row[i] = row[i].wrapping_add(row[i - samples]);
                }
            }
            16 => {
                for i in samples..tile_width * samples {
                    let prev = ifd::read_u16(byte_order, &row[(i - samples) * 2..]);
                    let cur = ifd::read_u16(byte_order, &row[i * 2..]);
                    let sum = cur.wrapping_add(prev);
                    let bytes = match byte_order {
                        TiffByteOrder::LittleEndian => sum.to_le_bytes(),
                        TiffByteOrder::BigEndian => sum.to_be_bytes(),
                    };
                    row[i * 2..i * 2 + 2].copy_from_slice(&bytes);
                }
            }
            32 => {
                for i in samples..tile_width * samples {
                    let prev = ifd::read_u32(byte_order, &row[(i - samples) * 4..]);
                    let cur = ifd::read_u32(byte_order, &row[i * 4..]);
                    let sum = cur.wrapping_add(prev);
                    let bytes = match byte_order {
                        TiffByteOrder::LittleEndian => sum.to_le_bytes(),
                        TiffByteOrder::BigEndian => sum.to_be_bytes(),
                    };
                    row[i * 4..i * 4 + 4].copy_from_slice(&bytes);
                }
            }
            bps => {
                return Err(CloudError::Decompress(format!(
                    "horizontal predictor on {}-bit samples",
                    bps
                )))
            }
        }
    }
    Ok(())
}

/// Convert raw decompressed bytes into `f64` sample values.
///
/// Interprets `raw` according to `bits_per_sample`, `sample_format` and
/// the file byte order.
pub fn bytes_to_f64(
    raw: &[u8],
    byte_order: TiffByteOrder,
    bits_per_sample: u16,
    sample_format: u16,
) -> Result<Vec<f64>> {
    let bps = bits_per_sample;
    let sf = sample_format;

    let values = match (bps, sf) {
        (8, sample_format::UNSIGNED_INT) => raw.iter().map(|&b| b as f64).collect(),
        (8, sample_format::SIGNED_INT) => raw.iter().map(|&b| b as i8 as f64).collect(),
        (16, sample_format::UNSIGNED_INT) => raw
            .chunks_exact(2)
            .map(|c| ifd::read_u16(byte_order, c) as f64)
            .collect(),
        (16, sample_format::SIGNED_INT) => raw
            .chunks_exact(2)
            .map(|c| ifd::read_u16(byte_order, c) as i16 as f64)
            .collect(),
        (32, sample_format::UNSIGNED_INT) => raw
            .chunks_exact(4)
            .map(|c| ifd::read_u32(byte_order, c) as f64)
            .collect(),
        (32, sample_format::SIGNED_INT) => raw
            .chunks_exact(4)
            .map(|c| ifd::read_u32(byte_order, c) as i32 as f64)
            .collect(),
        (32, sample_format::FLOAT) => raw
            .chunks_exact(4)
            .map(|c| ifd::read_f32(byte_order, c) as f64)
            .collect(),
        (64, sample_format::FLOAT) => raw
            .chunks_exact(8)
            .map(|c| ifd::read_f64(byte_order, c))
            .collect(),
        _ => return Err(CloudError::UnsupportedDataType { bps, sf }),
    };
    Ok(values)
}
