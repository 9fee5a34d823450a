//! I/O operations for reading and writing geospatial data

mod geojson_io;
mod native;

pub use geojson_io::{parse_geojson, read_geojson, to_geojson, write_geojson};
pub use native::{write_two_band_u16, write_two_band_u16_to_buffer};
