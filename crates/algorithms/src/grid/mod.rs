//! Sampling grids
//!
//! - **hexgrid**: H3 hexagons covering a buffered AOI

pub mod hexgrid;

pub use hexgrid::{HexCell, HexGrid, HexGridParams};
