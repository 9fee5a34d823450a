//! Imagery analysis algorithms
//!
//! Algorithms for multi-temporal remote sensing:
//! - Composite: NaN-aware temporal median over a scene stack
//! - Index: NDVI in a fixed-point u16 encoding with a nodata sentinel
//! - Change detection: threshold rule on per-hexagon means

mod change_detection;
mod composite;
mod index;

pub use change_detection::{classify, is_disturbed, DisturbanceParams, DisturbanceSummary};
pub use composite::{is_observation, median_composite, Composite};
pub use index::{ndvi, ndvi_array, scaled_ndvi, IndexConfig};
