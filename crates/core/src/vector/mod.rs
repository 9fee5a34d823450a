//! Vector data structures: features with ordered attributes

use crate::crs::CRS;
use crate::error::{Error, Result};
use geo::BoundingRect;
use geo_types::{Geometry, MultiPolygon, Rect};
use serde::{Deserialize, Serialize};

/// Attribute value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            AttributeValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, AttributeValue::Null)
    }
}

impl From<Option<f64>> for AttributeValue {
    fn from(v: Option<f64>) -> Self {
        match v {
            Some(v) if v.is_finite() => AttributeValue::Float(v),
            _ => AttributeValue::Null,
        }
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<&AttributeValue> for serde_json::Value {
    fn from(v: &AttributeValue) -> Self {
        match v {
            AttributeValue::Null => serde_json::Value::Null,
            AttributeValue::Bool(b) => serde_json::Value::Bool(*b),
            AttributeValue::Int(i) => serde_json::Value::from(*i),
            AttributeValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            AttributeValue::String(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl From<&serde_json::Value> for AttributeValue {
    fn from(v: &serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => AttributeValue::Null,
            serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
            serde_json::Value::Number(n) => match n.as_i64() {
                Some(i) => AttributeValue::Int(i),
                None => n.as_f64().map_or(AttributeValue::Null, AttributeValue::Float),
            },
            serde_json::Value::String(s) => AttributeValue::String(s.clone()),
            other => AttributeValue::String(other.to_string()),
        }
    }
}

/// A geographic feature with geometry and attributes.
///
/// Attributes keep their insertion order so written files list columns
/// in the order they were produced.
#[derive(Debug, Clone, Default)]
pub struct Feature {
    /// Feature geometry
    pub geometry: Option<Geometry<f64>>,
    /// Feature attributes, in column order
    pub properties: Vec<(String, AttributeValue)>,
    /// Optional feature ID
    pub id: Option<String>,
}

impl Feature {
    /// Create a new feature with geometry
    pub fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry: Some(geometry),
            properties: Vec::new(),
            id: None,
        }
    }

    /// Set an attribute, replacing an existing column of the same name
    pub fn set_property(&mut self, key: impl Into<String>, value: impl Into<AttributeValue>) {
        let key = key.into();
        let value = value.into();
        match self.properties.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.properties.push((key, value)),
        }
    }

    /// Get an attribute
    pub fn get_property(&self, key: &str) -> Option<&AttributeValue> {
        self.properties
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Collection of features sharing one CRS
#[derive(Debug, Clone, Default)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
    /// CRS of every geometry in the collection, if known
    pub crs: Option<CRS>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_crs(crs: CRS) -> Self {
        Self {
            features: Vec::new(),
            crs: Some(crs),
        }
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Merge every polygonal geometry into one multipolygon.
    ///
    /// Parts are collected, not dissolved; overlapping parts stay as they are.
    pub fn polygons(&self) -> Result<MultiPolygon<f64>> {
        let mut parts = Vec::new();
        for feature in &self.features {
            match &feature.geometry {
                Some(Geometry::Polygon(p)) => parts.push(p.clone()),
                Some(Geometry::MultiPolygon(mp)) => parts.extend(mp.0.iter().cloned()),
                Some(Geometry::GeometryCollection(gc)) => {
                    for g in gc.iter() {
                        match g {
                            Geometry::Polygon(p) => parts.push(p.clone()),
                            Geometry::MultiPolygon(mp) => parts.extend(mp.0.iter().cloned()),
                            _ => {}
                        }
                    }
                }
                _ => {}
            }
        }
        if parts.is_empty() {
            return Err(Error::Geometry("no polygon geometry in collection".into()));
        }
        Ok(MultiPolygon(parts))
    }

    /// Bounding rectangle of all geometries
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|f| f.geometry.as_ref()?.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                    (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
                )
            })
    }
}

impl IntoIterator for FeatureCollection {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}
