//! Coordinate Reference System handling

mod projection;
mod transform;

pub use projection::{Ellipsoid, Projection};
pub use transform::Transformer;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Coordinate Reference System representation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CRS {
    /// WKT representation
    wkt: Option<String>,
    /// EPSG code if known
    epsg: Option<u32>,
}

impl CRS {
    /// Create a CRS from an EPSG code
    pub fn from_epsg(code: u32) -> Self {
        Self {
            wkt: None,
            epsg: Some(code),
        }
    }

    /// Create a CRS from a WKT string
    pub fn from_wkt(wkt: impl Into<String>) -> Self {
        Self {
            wkt: Some(wkt.into()),
            epsg: None,
        }
    }

    /// WGS84 geographic CRS (EPSG:4326)
    pub fn wgs84() -> Self {
        Self::from_epsg(4326)
    }

    /// Parse `EPSG:3577`, `epsg:3577`, `urn:ogc:def:crs:EPSG::3577` or a bare code.
    pub fn parse(s: &str) -> Result<Self> {
        let trimmed = s.trim();
        let code = trimmed
            .rsplit(':')
            .next()
            .unwrap_or(trimmed)
            .trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.contains("crs84") {
            return Ok(Self::wgs84());
        }
        if !(lower.starts_with("epsg:")
            || lower.starts_with("urn:ogc:def:crs:epsg:")
            || trimmed.chars().all(|c| c.is_ascii_digit()))
        {
            return Err(Error::InvalidParameter {
                name: "crs",
                value: s.to_string(),
                reason: "expected an EPSG identifier".into(),
            });
        }
        code.parse::<u32>()
            .map(Self::from_epsg)
            .map_err(|_| Error::InvalidParameter {
                name: "crs",
                value: s.to_string(),
                reason: "EPSG code is not a number".into(),
            })
    }

    /// Get EPSG code if known
    pub fn epsg(&self) -> Option<u32> {
        self.epsg
    }

    /// Get WKT representation
    pub fn wkt(&self) -> Option<&str> {
        self.wkt.as_deref()
    }

    /// Resolve the map projection for this CRS.
    ///
    /// Only EPSG-coded systems can be resolved.
    pub fn projection(&self) -> Result<Projection> {
        match self.epsg {
            Some(code) => Projection::from_epsg(code),
            None => Err(Error::Other(format!(
                "cannot resolve a projection for {}",
                self.identifier()
            ))),
        }
    }

    /// Check if two CRS are equivalent
    pub fn is_equivalent(&self, other: &CRS) -> bool {
        if let (Some(a), Some(b)) = (self.epsg, other.epsg) {
            return a == b;
        }

        if let (Some(a), Some(b)) = (&self.wkt, &other.wkt) {
            return a == b;
        }

        false
    }

    /// Get a string identifier for this CRS
    pub fn identifier(&self) -> String {
        if let Some(code) = self.epsg {
            return format!("EPSG:{}", code);
        }
        if let Some(wkt) = &self.wkt {
            return format!("WKT:{}", &wkt[..wkt.len().min(50)]);
        }
        "Unknown".to_string()
    }

    /// OGC URN form used by the GeoJSON `crs` member.
    pub fn urn(&self) -> Option<String> {
        self.epsg.map(|code| format!("urn:ogc:def:crs:EPSG::{}", code))
    }
}

impl fmt::Display for CRS {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier())
    }
}

impl Default for CRS {
    fn default() -> Self {
        Self::wgs84()
    }
}
