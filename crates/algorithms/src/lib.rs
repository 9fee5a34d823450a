//! # hexchange algorithms
//!
//! Vegetation disturbance detection on an H3 hexagon grid.
//!
//! ## Available Algorithm Categories
//!
//! - **grid**: H3 hexagon grid over a buffered AOI
//! - **temporal**: Reference and analysis date windows
//! - **imagery**: Median compositing, scaled NDVI, disturbance classification
//! - **statistics**: Hexagon zonal means

pub mod grid;
pub mod imagery;
pub mod statistics;
pub mod temporal;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::grid::{HexCell, HexGrid, HexGridParams};
    pub use crate::imagery::{
        classify, median_composite, ndvi, scaled_ndvi, Composite, DisturbanceParams,
        DisturbanceSummary, IndexConfig,
    };
    pub use crate::statistics::{hexagon_means, zonal_statistics, ZonalResult};
    pub use crate::temporal::{parse_anchor, DateWindow, DateWindowParams, DateWindows};
    pub use hexchange_core::prelude::*;
}
