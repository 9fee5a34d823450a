//! STAC (SpatioTemporal Asset Catalog) data types.
//!
//! Serde models for STAC Item Search (`POST /search`) requests and
//! responses: bbox/datetime/collection filters, the `query` extension used
//! for scene-quality filtering, match counts, pagination via `links`, and
//! asset access.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ---------------------------------------------------------------------------
// Search request
// ---------------------------------------------------------------------------

/// Body for `POST /search` (STAC API – Item Search).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StacSearchParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collections: Option<Vec<String>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,

    /// Query extension: `{"eo:cloud_cover": {"lt": 25}}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<serde_json::Map<String, serde_json::Value>>,

    /// Sort extension, e.g. `[{"field": "properties.datetime", "direction": "asc"}]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sortby: Option<Vec<serde_json::Value>>,
}

impl StacSearchParams {
    /// Create empty search params.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bounding box `[west, south, east, north]`.
    pub fn bbox(mut self, west: f64, south: f64, east: f64, north: f64) -> Self {
        self.bbox = Some(vec![west, south, east, north]);
        self
    }

    /// Set datetime or datetime range (e.g. `"2023-06-11/2023-09-09"`).
    pub fn datetime(mut self, dt: &str) -> Self {
        self.datetime = Some(dt.to_string());
        self
    }

    /// Set collection filter.
    pub fn collections(mut self, cols: &[&str]) -> Self {
        self.collections = Some(cols.iter().map(|s| s.to_string()).collect());
        self
    }

    /// Set maximum items per page.
    pub fn limit(mut self, n: u32) -> Self {
        self.limit = Some(n);
        self
    }

    /// Require `property < value`.
    pub fn less_than(mut self, property: &str, value: f64) -> Self {
        let query = self.query.get_or_insert_with(serde_json::Map::new);
        query.insert(property.to_string(), serde_json::json!({ "lt": value }));
        self
    }

    /// Sort ascending by a field such as `properties.datetime`.
    pub fn sort_ascending(mut self, field: &str) -> Self {
        self.sortby
            .get_or_insert_with(Vec::new)
            .push(serde_json::json!({ "field": field, "direction": "asc" }));
        self
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

/// A STAC Item Collection (GeoJSON FeatureCollection).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItemCollection {
    #[serde(rename = "type")]
    pub type_: String,

    pub features: Vec<StacItem>,

    #[serde(default)]
    pub links: Vec<StacLink>,

    #[serde(rename = "numberMatched", skip_serializing_if = "Option::is_none")]
    pub number_matched: Option<u64>,

    #[serde(rename = "numberReturned", skip_serializing_if = "Option::is_none")]
    pub number_returned: Option<u64>,

    /// Older context extension: `{"returned": 10, "limit": 10, "matched": 42}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl StacItemCollection {
    /// Find the `"next"` pagination link, if any.
    pub fn next_link(&self) -> Option<&StacLink> {
        self.links.iter().find(|l| l.rel == "next")
    }

    /// Whether there is a next page.
    pub fn has_next(&self) -> bool {
        self.next_link().is_some()
    }

    /// Total match count reported by the server, from `numberMatched` or
    /// `context.matched`.
    pub fn matched_count(&self) -> Option<u64> {
        self.number_matched.or_else(|| {
            self.context
                .as_ref()
                .and_then(|c| c.get("matched"))
                .and_then(serde_json::Value::as_u64)
        })
    }

    /// Total number of items in this page.
    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// A single STAC Item (GeoJSON Feature).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItem {
    #[serde(rename = "type")]
    pub type_: String,

    /// Unique item identifier.
    pub id: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub geometry: Option<serde_json::Value>,

    /// Bounding box `[west, south, east, north]`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bbox: Option<Vec<f64>>,

    pub properties: StacItemProperties,

    pub assets: HashMap<String, StacAsset>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub collection: Option<String>,

    #[serde(default)]
    pub links: Vec<StacLink>,
}

impl StacItem {
    /// Get an asset by key.
    pub fn asset(&self, key: &str) -> Option<&StacAsset> {
        self.assets.get(key)
    }

    /// EPSG code of the item's native grid, from `proj:epsg` or `proj:code`.
    pub fn epsg(&self) -> Option<u32> {
        let extra = &self.properties.extra;
        if let Some(code) = extra.get("proj:epsg").and_then(|v| v.as_u64()) {
            return u32::try_from(code).ok();
        }
        extra
            .get("proj:code")
            .and_then(|v| v.as_str())
            .and_then(|s| s.strip_prefix("EPSG:"))
            .and_then(|s| s.parse().ok())
    }

    /// Acquisition time.
    pub fn acquired(&self) -> Option<DateTime<Utc>> {
        self.properties
            .datetime
            .as_deref()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }
}

/// STAC Item properties.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacItemProperties {
    /// ISO 8601 datetime.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datetime: Option<String>,

    /// Cloud cover percentage (EO extension).
    #[serde(rename = "eo:cloud_cover", skip_serializing_if = "Option::is_none")]
    pub eo_cloud_cover: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,

    /// All other properties we don't model explicitly.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// A single STAC Asset (file reference).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacAsset {
    /// URL to the asset file.
    pub href: String,

    /// Media type (e.g., `"image/tiff; application=geotiff; profile=cloud-optimized"`).
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub roles: Option<Vec<String>>,

    /// All other asset fields.
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl StacAsset {
    /// First entry of the `raster:bands` extension, if present.
    fn raster_band(&self) -> Option<&serde_json::Value> {
        self.extra.get("raster:bands")?.as_array()?.first()
    }

    /// `(scale, offset)` mapping stored values to physical values.
    ///
    /// Missing fields default to `(1, 0)`.
    pub fn scaling(&self) -> (f64, f64) {
        let band = self.raster_band();
        let field = |name: &str, default: f64| {
            band.and_then(|b| b.get(name))
                .and_then(|v| v.as_f64())
                .unwrap_or(default)
        };
        (field("scale", 1.0), field("offset", 0.0))
    }

    /// Nodata value declared by the `raster:bands` extension.
    pub fn nodata(&self) -> Option<f64> {
        self.raster_band()?.get("nodata")?.as_f64()
    }
}

/// A STAC Link (used for pagination and related resources).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StacLink {
    /// Relationship: `"self"`, `"root"`, `"next"`, `"prev"`, etc.
    pub rel: String,

    /// Target URL.
    pub href: String,

    /// HTTP method for the link (default GET, but `"next"` often uses POST).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,

    /// Request body for POST-based pagination.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,

    /// Merge mode: if true, merge body with previous request body.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merge: Option<bool>,

    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
