//! TIFF IFD (Image File Directory) parser for COG files.
//!
//! Parses IFD entries from raw bytes fetched via HTTP Range requests,
//! without requiring `Read + Seek`. Out-of-line tag values are resolved
//! separately and attached to a [`TagSet`]. Supports IFD chains (overviews).

use byteorder::{BigEndian, ByteOrder, LittleEndian};
use std::collections::HashMap;

use crate::error::{CloudError, Result};

/// Byte order of the TIFF file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TiffByteOrder {
    LittleEndian,
    BigEndian,
}

/// Well-known TIFF tag IDs.
pub mod tags {
    pub const NEW_SUBFILE_TYPE: u16 = 254;
    pub const IMAGE_WIDTH: u16 = 256;
    pub const IMAGE_LENGTH: u16 = 257;
    pub const BITS_PER_SAMPLE: u16 = 258;
    pub const COMPRESSION: u16 = 259;
    pub const STRIP_OFFSETS: u16 = 273;
    pub const SAMPLES_PER_PIXEL: u16 = 277;
    pub const ROWS_PER_STRIP: u16 = 278;
    pub const STRIP_BYTE_COUNTS: u16 = 279;
    pub const PLANAR_CONFIG: u16 = 284;
    pub const PREDICTOR: u16 = 317;
    pub const TILE_WIDTH: u16 = 322;
    pub const TILE_LENGTH: u16 = 323;
    pub const TILE_OFFSETS: u16 = 324;
    pub const TILE_BYTE_COUNTS: u16 = 325;
    pub const SAMPLE_FORMAT: u16 = 339;
    pub const MODEL_PIXEL_SCALE: u16 = 33550;
    pub const MODEL_TIEPOINT: u16 = 33922;
    pub const MODEL_TRANSFORMATION: u16 = 34264;
    pub const GEO_KEY_DIRECTORY: u16 = 34735;
    pub const GDAL_NODATA: u16 = 42113;
}

/// NewSubfileType bit marking a transparency mask
const SUBFILE_MASK: u64 = 4;

/// TIFF data type IDs and their byte sizes.
fn type_byte_size(type_id: u16) -> Option<u64> {
    match type_id {
        1 | 2 | 6 | 7 => Some(1), // BYTE, ASCII, SBYTE, UNDEFINED
        3 | 8 => Some(2),         // SHORT, SSHORT
        4 | 9 | 11 => Some(4),    // LONG, SLONG, FLOAT
        5 | 10 | 12 | 16 => Some(8), // RATIONAL, SRATIONAL, DOUBLE, LONG8
        _ => None,
    }
}

/// One 12-byte IFD entry before value resolution.
#[derive(Debug, Clone)]
pub struct IfdEntry {
    pub tag: u16,
    pub type_id: u16,
    pub count: u32,
    /// The 4 value bytes exactly as stored in the file.
    pub raw: [u8; 4],
}

impl IfdEntry {
    /// Total size of the value in bytes.
    pub fn byte_len(&self) -> u64 {
        type_byte_size(self.type_id).unwrap_or(1) * self.count as u64
    }

    /// Whether the value fits in the entry itself.
    pub fn is_inline(&self) -> bool {
        self.byte_len() <= 4
    }

    /// File offset of an out-of-line value.
    pub fn offset(&self, order: TiffByteOrder) -> u64 {
        read_u32(order, &self.raw) as u64
    }
}

/// Parsed TIFF header.
#[derive(Debug, Clone)]
pub struct TiffHeader {
    pub byte_order: TiffByteOrder,
    pub first_ifd_offset: u64,
}

/// A single parsed IFD with its entries and the offset to the next IFD.
#[derive(Debug, Clone)]
pub struct RawIfd {
    pub entries: Vec<IfdEntry>,
    pub next_ifd_offset: u64,
}

/// Parse the 8-byte TIFF header.
pub fn parse_header(data: &[u8]) -> Result<TiffHeader> {
    if data.len() < 8 {
        return Err(CloudError::InvalidTiff {
            reason: "header too short".into(),
        });
    }

    let byte_order = match (data[0], data[1]) {
        (b'I', b'I') => TiffByteOrder::LittleEndian,
        (b'M', b'M') => TiffByteOrder::BigEndian,
        _ => {
            return Err(CloudError::InvalidTiff {
                reason: "invalid byte order marker".into(),
            });
        }
    };

    match read_u16(byte_order, &data[2..4]) {
        42 => {}
        43 => {
            return Err(CloudError::InvalidTiff {
                reason: "BigTIFF is not supported".into(),
            })
        }
        magic => {
            return Err(CloudError::InvalidTiff {
                reason: format!("expected magic 42, got {}", magic),
            })
        }
    }

    Ok(TiffHeader {
        byte_order,
        first_ifd_offset: read_u32(byte_order, &data[4..8]) as u64,
    })
}

/// Number of bytes an IFD with `entry_count` entries occupies.
pub fn ifd_byte_len(entry_count: usize) -> usize {
    2 + entry_count * 12 + 4
}

/// Read the entry count at the start of an IFD.
pub fn ifd_entry_count(byte_order: TiffByteOrder, data: &[u8]) -> Result<usize> {
    if data.len() < 2 {
        return Err(CloudError::InvalidTiff {
            reason: "IFD too short".into(),
        });
    }
    Ok(read_u16(byte_order, &data[0..2]) as usize)
}

/// Parse one IFD from raw bytes.
///
/// `data` must start at the IFD offset and contain enough bytes to parse
/// all entries plus the 4-byte next-IFD pointer.
pub fn parse_ifd(byte_order: TiffByteOrder, data: &[u8]) -> Result<RawIfd> {
    let entry_count = ifd_entry_count(byte_order, data)?;
    let needed = ifd_byte_len(entry_count);

    if data.len() < needed {
        return Err(CloudError::InvalidTiff {
            reason: format!(
                "IFD needs {} bytes but only {} available",
                needed,
                data.len()
            ),
        });
    }

    let entries = data[2..2 + entry_count * 12]
        .chunks_exact(12)
        .map(|e| IfdEntry {
            tag: read_u16(byte_order, &e[0..2]),
            type_id: read_u16(byte_order, &e[2..4]),
            count: read_u32(byte_order, &e[4..8]),
            raw: [e[8], e[9], e[10], e[11]],
        })
        .collect();

    let next_pos = 2 + entry_count * 12;
    let next_ifd_offset = read_u32(byte_order, &data[next_pos..next_pos + 4]) as u64;

    Ok(RawIfd {
        entries,
        next_ifd_offset,
    })
}

/// The entries of one IFD together with their resolved out-of-line values.
#[derive(Debug, Clone)]
pub struct TagSet {
    byte_order: TiffByteOrder,
    entries: Vec<IfdEntry>,
    external: HashMap<u16, Vec<u8>>,
}

impl TagSet {
    pub fn new(byte_order: TiffByteOrder, entries: Vec<IfdEntry>) -> Self {
        Self {
            byte_order,
            entries,
            external: HashMap::new(),
        }
    }

    pub fn byte_order(&self) -> TiffByteOrder {
        self.byte_order
    }

    /// Out-of-line values that still need fetching: `(tag, offset, length)`.
    pub fn pending(&self, wanted: &[u16]) -> Vec<(u16, u64, u64)> {
        self.entries
            .iter()
            .filter(|e| wanted.contains(&e.tag) && !e.is_inline())
            .filter(|e| !self.external.contains_key(&e.tag))
            .map(|e| (e.tag, e.offset(self.byte_order), e.byte_len()))
            .collect()
    }

    /// Attach the fetched bytes of an out-of-line value.
    pub fn resolve(&mut self, tag: u16, bytes: Vec<u8>) {
        self.external.insert(tag, bytes);
    }

    fn entry(&self, tag: u16) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }

    /// Raw value bytes of a tag, inline or resolved.
    fn value_bytes(&self, tag: u16) -> Option<(&IfdEntry, &[u8])> {
        let entry = self.entry(tag)?;
        if entry.is_inline() {
            Some((entry, &entry.raw[..entry.byte_len() as usize]))
        } else {
            self.external.get(&tag).map(|b| (entry, b.as_slice()))
        }
    }

    /// Integer values of a BYTE/SHORT/LONG/LONG8 tag.
    pub fn u64s(&self, tag: u16) -> Option<Vec<u64>> {
        let (entry, data) = self.value_bytes(tag)?;
        let order = self.byte_order;
        let values = match entry.type_id {
            1 => data.iter().map(|&b| b as u64).collect(),
            3 => data.chunks_exact(2).map(|c| read_u16(order, c) as u64).collect(),
            4 => data.chunks_exact(4).map(|c| read_u32(order, c) as u64).collect(),
            16 => data.chunks_exact(8).map(|c| read_u64(order, c)).collect(),
            _ => return None,
        };
        Some(values)
    }

    /// First integer value of a tag.
    pub fn u64(&self, tag: u16) -> Option<u64> {
        self.u64s(tag)?.first().copied()
    }

    /// Floating point values of a FLOAT/DOUBLE tag.
    pub fn f64s(&self, tag: u16) -> Option<Vec<f64>> {
        let (entry, data) = self.value_bytes(tag)?;
        let order = self.byte_order;
        let values: Vec<f64> = match entry.type_id {
            11 => data.chunks_exact(4).map(|c| read_f32(order, c) as f64).collect(),
            12 => data.chunks_exact(8).map(|c| read_f64(order, c)).collect(),
            _ => return None,
        };
        Some(values)
    }

    /// ASCII value of a tag, without the trailing NUL.
    pub fn ascii(&self, tag: u16) -> Option<String> {
        let (_, data) = self.value_bytes(tag)?;
        let end = data.iter().position(|&b| b == 0).unwrap_or(data.len());
        Some(String::from_utf8_lossy(&data[..end]).into_owned())
    }
}

/// Structural information of one image in the IFD chain.
///
/// Stripped images are described as tiles spanning the full width.
#[derive(Debug, Clone)]
pub struct IfdInfo {
    pub width: u32,
    pub height: u32,
    pub tile_width: u32,
    pub tile_height: u32,
    pub tile_offsets: Vec<u64>,
    pub tile_byte_counts: Vec<u64>,
    pub bits_per_sample: u16,
    pub sample_format: u16,
    pub compression: u16,
    pub predictor: u16,
    pub samples_per_pixel: u16,
    pub planar_config: u16,
    pub is_mask: bool,
}

/// Tags needed to build an [`IfdInfo`].
pub const STRUCTURE_TAGS: &[u16] = &[
    tags::BITS_PER_SAMPLE,
    tags::SAMPLE_FORMAT,
    tags::TILE_OFFSETS,
    tags::TILE_BYTE_COUNTS,
    tags::STRIP_OFFSETS,
    tags::STRIP_BYTE_COUNTS,
];

impl IfdInfo {
    pub fn from_tags(tags_: &TagSet) -> Result<Self> {
        let missing = |name: &str| CloudError::InvalidTiff {
            reason: format!("missing {} tag", name),
        };

        let width = tags_.u64(tags::IMAGE_WIDTH).ok_or_else(|| missing("ImageWidth"))? as u32;
        let height = tags_.u64(tags::IMAGE_LENGTH).ok_or_else(|| missing("ImageLength"))? as u32;

        let (tile_width, tile_height, tile_offsets, tile_byte_counts) =
            match tags_.u64s(tags::TILE_OFFSETS) {
                Some(offsets) => (
                    tags_.u64(tags::TILE_WIDTH).ok_or_else(|| missing("TileWidth"))? as u32,
                    tags_.u64(tags::TILE_LENGTH).ok_or_else(|| missing("TileLength"))? as u32,
                    offsets,
                    tags_
                        .u64s(tags::TILE_BYTE_COUNTS)
                        .ok_or_else(|| missing("TileByteCounts"))?,
                ),
                None => (
                    width,
                    tags_
                        .u64(tags::ROWS_PER_STRIP)
                        .map_or(height, |r| (r as u32).min(height)),
                    tags_
                        .u64s(tags::STRIP_OFFSETS)
                        .ok_or_else(|| missing("StripOffsets"))?,
                    tags_
                        .u64s(tags::STRIP_BYTE_COUNTS)
                        .ok_or_else(|| missing("StripByteCounts"))?,
                ),
            };

        if tile_width == 0 || tile_height == 0 {
            return Err(CloudError::InvalidTiff {
                reason: "zero tile size".into(),
            });
        }
        if tile_offsets.len() != tile_byte_counts.len() {
            return Err(CloudError::InvalidTiff {
                reason: "tile offsets and byte counts differ in length".into(),
            });
        }

        Ok(Self {
            width,
            height,
            tile_width,
            tile_height,
            tile_offsets,
            tile_byte_counts,
            bits_per_sample: tags_.u64(tags::BITS_PER_SAMPLE).unwrap_or(1) as u16,
            sample_format: tags_.u64(tags::SAMPLE_FORMAT).unwrap_or(1) as u16,
            compression: tags_.u64(tags::COMPRESSION).unwrap_or(1) as u16,
            predictor: tags_.u64(tags::PREDICTOR).unwrap_or(1) as u16,
            samples_per_pixel: tags_.u64(tags::SAMPLES_PER_PIXEL).unwrap_or(1) as u16,
            planar_config: tags_.u64(tags::PLANAR_CONFIG).unwrap_or(1) as u16,
            is_mask: tags_.u64(tags::NEW_SUBFILE_TYPE).map_or(false, |t| t & SUBFILE_MASK != 0),
        })
    }

    /// Number of tile columns in the tile grid.
    pub fn tiles_across(&self) -> usize {
        (self.width as usize).div_ceil(self.tile_width as usize)
    }
}

// ---- Byte order helpers ----

pub(crate) fn read_u16(order: TiffByteOrder, data: &[u8]) -> u16 {
    match order {
        TiffByteOrder::LittleEndian => LittleEndian::read_u16(data),
        TiffByteOrder::BigEndian => BigEndian::read_u16(data),
    }
}

pub(crate) fn read_u32(order: TiffByteOrder, data: &[u8]) -> u32 {
    match order {
        TiffByteOrder::LittleEndian => LittleEndian::read_u32(data),
        TiffByteOrder::BigEndian => BigEndian::read_u32(data),
    }
}

fn read_u64(order: TiffByteOrder, data: &[u8]) -> u64 {
    match order {
        TiffByteOrder::LittleEndian => LittleEndian::read_u64(data),
        TiffByteOrder::BigEndian => BigEndian::read_u64(data),
    }
}

pub(crate) fn read_f32(order: TiffByteOrder, data: &[u8]) -> f32 {
    match order {
        TiffByteOrder::LittleEndian => LittleEndian::read_f32(data),
        TiffByteOrder::BigEndian => BigEndian::read_f32(data),
    }
}

pub(crate) fn read_f64(order: TiffByteOrder, data: &[u8]) -> f64 {
    match order {
        TiffByteOrder::LittleEndian => LittleEndian::read_f64(data),
        TiffByteOrder::BigEndian => BigEndian::read_f64(data),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry_le(tag: u16, type_id: u16, count: u32, value: u32) -> Vec<u8> {
        let mut e = Vec::new();
        e.extend_from_slice(&tag.to_le_bytes());
        e.extend_from_slice(&type_id.to_le_bytes());
        e.extend_from_slice(&count.to_le_bytes());
        e.extend_from_slice(&value.to_le_bytes());
        e
    }

    #[test]
    fn header_byte_orders() {
        let header = parse_header(&[b'I', b'I', 42, 0, 8, 0, 0, 0]).unwrap();
        assert_eq!(header.byte_order, TiffByteOrder::LittleEndian);
        assert_eq!(header.first_ifd_offset, 8);

        let header = parse_header(&[b'M', b'M', 0, 42, 0, 0, 0, 8]).unwrap();
        assert_eq!(header.byte_order, TiffByteOrder::BigEndian);
        assert_eq!(header.first_ifd_offset, 8);

        assert!(parse_header(&[b'I', b'I', 43, 0, 8, 0, 0, 0]).is_err());
    }

    #[test]
    fn inline_short_pairs_are_decoded() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_le_bytes());
        // BitsPerSample = [16, 16], two SHORTs packed inline
        data.extend_from_slice(&entry_le(tags::BITS_PER_SAMPLE, 3, 2, 16 | (16 << 16)));
        data.extend_from_slice(&0u32.to_le_bytes());

        let ifd = parse_ifd(TiffByteOrder::LittleEndian, &data).unwrap();
        assert_eq!(ifd.next_ifd_offset, 0);
        let set = TagSet::new(TiffByteOrder::LittleEndian, ifd.entries);
        assert_eq!(set.u64s(tags::BITS_PER_SAMPLE), Some(vec![16, 16]));
    }

    #[test]
    fn big_endian_inline_short() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_be_bytes());
        data.extend_from_slice(&tags::IMAGE_WIDTH.to_be_bytes());
        data.extend_from_slice(&3u16.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        // SHORT value left-justified in the 4-byte field
        data.extend_from_slice(&[0x02, 0x00, 0x00, 0x00]);
        data.extend_from_slice(&0u32.to_be_bytes());

        let ifd = parse_ifd(TiffByteOrder::BigEndian, &data).unwrap();
        let set = TagSet::new(TiffByteOrder::BigEndian, ifd.entries);
        assert_eq!(set.u64(tags::IMAGE_WIDTH), Some(512));
    }

    #[test]
    fn external_values_are_pending_until_resolved() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u16.to_le_bytes());
        data.extend_from_slice(&entry_le(tags::TILE_OFFSETS, 4, 3, 400));
        data.extend_from_slice(&0u32.to_le_bytes());

        let ifd = parse_ifd(TiffByteOrder::LittleEndian, &data).unwrap();
        let mut set = TagSet::new(TiffByteOrder::LittleEndian, ifd.entries);
        assert_eq!(set.pending(STRUCTURE_TAGS), vec![(tags::TILE_OFFSETS, 400, 12)]);
        assert_eq!(set.u64s(tags::TILE_OFFSETS), None);

        let bytes: Vec<u8> = [1000u32, 2000, 3000].iter().flat_map(|v| v.to_le_bytes()).collect();
        set.resolve(tags::TILE_OFFSETS, bytes);
        assert!(set.pending(STRUCTURE_TAGS).is_empty());
        assert_eq!(set.u64s(tags::TILE_OFFSETS), Some(vec![1000, 2000, 3000]));
    }

    #[test]
    fn truncated_ifd_is_rejected() {
        let data = [3u8, 0, 0, 0];
        assert!(parse_ifd(TiffByteOrder::LittleEndian, &data).is_err());
    }
}
