//! Disturbance classification
//!
//! Compares per-hexagon mean index values from a reference period and an
//! analysis period. A hexagon is disturbed when its analysis mean drops
//! more than a fixed trigger offset below its reference mean.

use hexchange_core::{Error, Result};

/// Square metres per hectare
const M2_PER_HA: f64 = 10_000.0;

/// Parameters for disturbance classification
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisturbanceParams {
    /// Absolute drop in scaled index units (default: 2500, i.e. 0.25 NDVI)
    pub trigger: f64,
}

impl Default for DisturbanceParams {
    fn default() -> Self {
        Self { trigger: 2500.0 }
    }
}

/// Disturbed when `analysis < reference - trigger`.
///
/// A missing mean in either period is never disturbed.
#[inline]
pub fn is_disturbed(reference: Option<f64>, analysis: Option<f64>, params: &DisturbanceParams) -> bool {
    match (reference, analysis) {
        (Some(r), Some(a)) => a < r - params.trigger,
        _ => false,
    }
}

/// Classify every hexagon; returns one `0`/`1` flag per row.
///
/// # Arguments
/// * `reference` - Reference-period mean per hexagon
/// * `analysis` - Analysis-period mean per hexagon, in the same row order
pub fn classify(
    reference: &[Option<f64>],
    analysis: &[Option<f64>],
    params: &DisturbanceParams,
) -> Result<Vec<u8>> {
    if reference.len() != analysis.len() {
        return Err(Error::SizeMismatch {
            er: reference.len(),
            ec: 1,
            ar: analysis.len(),
            ac: 1,
        });
    }
    if !params.trigger.is_finite() {
        return Err(Error::InvalidParameter {
            name: "trigger",
            value: params.trigger.to_string(),
            reason: "must be finite".into(),
        });
    }

    Ok(reference
        .iter()
        .zip(analysis)
        .map(|(&r, &a)| u8::from(is_disturbed(r, a, params)))
        .collect())
}

/// Run totals for the final report
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisturbanceSummary {
    pub hexagons: usize,
    pub disturbed: usize,
    /// `disturbed * hexagon area`, in square metres
    pub disturbed_area_m2: f64,
}

impl DisturbanceSummary {
    /// `cell_area_m2` is the average hexagon area at the grid resolution.
    pub fn new(flags: &[u8], cell_area_m2: f64) -> Self {
        let disturbed = flags.iter().filter(|&&f| f == 1).count();
        Self {
            hexagons: flags.len(),
            disturbed,
            disturbed_area_m2: disturbed as f64 * cell_area_m2,
        }
    }

    pub fn disturbed_area_ha(&self) -> f64 {
        self.disturbed_area_m2 / M2_PER_HA
    }
}
