//! GeoJSON reading and writing
//!
//! Accepts a FeatureCollection, a single Feature or a bare Geometry. The
//! pre-RFC 7946 `crs` member (`{"type": "name", "properties": {"name":
//! "urn:ogc:def:crs:EPSG::4283"}}`) is honoured on read and emitted on write
//! so projected output opens in the right place in desktop GIS.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::vector::{AttributeValue, Feature, FeatureCollection};
use geojson::{feature::Id, GeoJson, JsonObject, JsonValue};
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use tracing::debug;

/// Read a vector file into a feature collection.
///
/// `default_crs` applies when the document carries no `crs` member.
pub fn read_geojson<P: AsRef<Path>>(path: P, default_crs: &CRS) -> Result<FeatureCollection> {
    let text = fs::read_to_string(path.as_ref())?;
    let fc = parse_geojson(&text, default_crs)?;
    debug!(
        path = %path.as_ref().display(),
        features = fc.len(),
        crs = %fc.crs.as_ref().map(CRS::identifier).unwrap_or_default(),
        "read vector file"
    );
    Ok(fc)
}

/// Parse GeoJSON text into a feature collection
pub fn parse_geojson(text: &str, default_crs: &CRS) -> Result<FeatureCollection> {
    let doc: GeoJson = text.parse()?;

    let (features, foreign) = match doc {
        GeoJson::FeatureCollection(fc) => (fc.features, fc.foreign_members),
        GeoJson::Feature(f) => {
            let foreign = f.foreign_members.clone();
            (vec![f], foreign)
        }
        GeoJson::Geometry(g) => {
            let foreign = g.foreign_members.clone();
            let feature = geojson::Feature {
                bbox: None,
                geometry: Some(g),
                id: None,
                properties: None,
                foreign_members: None,
            };
            (vec![feature], foreign)
        }
    };

    let crs = match foreign.as_ref().and_then(|m| m.get("crs")) {
        Some(member) => crs_from_member(member)?,
        None => default_crs.clone(),
    };

    let mut collection = FeatureCollection::with_crs(crs);
    for f in features {
        collection.push(convert_feature(f)?);
    }
    Ok(collection)
}

fn convert_feature(f: geojson::Feature) -> Result<Feature> {
    let geometry = match f.geometry {
        Some(g) => Some(geo_types::Geometry::<f64>::try_from(g)?),
        None => None,
    };
    let id = f.id.map(|id| match id {
        Id::String(s) => s,
        Id::Number(n) => n.to_string(),
    });
    let properties = f
        .properties
        .unwrap_or_default()
        .iter()
        .map(|(k, v)| (k.clone(), AttributeValue::from(v)))
        .collect();
    Ok(Feature {
        geometry,
        properties,
        id,
    })
}

/// Parse a legacy named-CRS member
fn crs_from_member(member: &JsonValue) -> Result<CRS> {
    let name = member
        .get("properties")
        .and_then(|p| p.get("name"))
        .and_then(JsonValue::as_str)
        .ok_or_else(|| Error::VectorFormat("crs member has no properties.name".into()))?;
    CRS::parse(name)
}

fn crs_member(crs: &CRS) -> Option<JsonValue> {
    let urn = crs.urn()?;
    Some(serde_json::json!({
        "type": "name",
        "properties": { "name": urn }
    }))
}

/// Serialise a feature collection to a GeoJSON document
pub fn to_geojson(fc: &FeatureCollection) -> GeoJson {
    let features = fc
        .features
        .iter()
        .map(|f| {
            let properties: JsonObject = f
                .properties
                .iter()
                .map(|(k, v)| (k.clone(), JsonValue::from(v)))
                .collect();
            geojson::Feature {
                bbox: None,
                geometry: f
                    .geometry
                    .as_ref()
                    .map(|g| geojson::Geometry::new(geojson::Value::from(g))),
                id: f.id.clone().map(Id::String),
                properties: Some(properties),
                foreign_members: None,
            }
        })
        .collect();

    let foreign_members = fc.crs.as_ref().and_then(crs_member).map(|member| {
        let mut map = JsonObject::new();
        map.insert("crs".to_string(), member);
        map
    });

    GeoJson::FeatureCollection(geojson::FeatureCollection {
        bbox: None,
        features,
        foreign_members,
    })
}

/// Write a feature collection as a GeoJSON file
pub fn write_geojson<P: AsRef<Path>>(fc: &FeatureCollection, path: P) -> Result<()> {
    let mut writer = BufWriter::new(File::create(path.as_ref())?);
    serde_json::to_writer(&mut writer, &to_geojson(fc))?;
    writer.flush()?;
    debug!(path = %path.as_ref().display(), features = fc.len(), "wrote vector file");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: &str = r#"{
        "type": "FeatureCollection",
        "crs": { "type": "name", "properties": { "name": "urn:ogc:def:crs:EPSG::4283" } },
        "features": [{
            "type": "Feature",
            "id": 7,
            "properties": { "name": "paddock", "area": 12.5 },
            "geometry": { "type": "Polygon", "coordinates": [[[146,-36],[146.1,-36],[146.1,-35.9],[146,-35.9],[146,-36]]] }
        }]
    }"#;

    #[test]
    fn crs_member_overrides_default() {
        let fc = parse_geojson(SQUARE, &CRS::wgs84()).unwrap();
        assert_eq!(fc.crs.as_ref().and_then(CRS::epsg), Some(4283));
        assert_eq!(fc.len(), 1);

        let f = &fc.features[0];
        assert_eq!(f.id.as_deref(), Some("7"));
        assert_eq!(f.get_property("area").and_then(AttributeValue::as_f64), Some(12.5));
        assert!(matches!(f.geometry, Some(geo_types::Geometry::Polygon(_))));
    }

    #[test]
    fn bare_geometry_uses_default_crs() {
        let text = r#"{"type":"Polygon","coordinates":[[[0,0],[1,0],[1,1],[0,0]]]}"#;
        let fc = parse_geojson(text, &CRS::from_epsg(3577)).unwrap();
        assert_eq!(fc.crs.as_ref().and_then(CRS::epsg), Some(3577));
        assert!(fc.polygons().is_ok());
    }

    #[test]
    fn malformed_document_is_an_error() {
        assert!(parse_geojson("{\"type\":\"Nope\"}", &CRS::wgs84()).is_err());
    }

    #[test]
    fn written_document_keeps_columns_and_crs() {
        let mut fc = FeatureCollection::with_crs(CRS::from_epsg(3577));
        let mut f = Feature::new(geo_types::Geometry::Point(geo_types::point!(x: 1.0, y: 2.0)));
        f.set_property("index", 0i64);
        f.set_property("2023_9_mean", None::<f64>);
        f.set_property("Disturbance", 1i64);
        fc.push(f);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hex.geojson");
        write_geojson(&fc, &path).unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("urn:ogc:def:crs:EPSG::3577"));
        assert!(text.contains("\"2023_9_mean\":null"));

        let back = read_geojson(&path, &CRS::wgs84()).unwrap();
        assert_eq!(back.crs.as_ref().and_then(CRS::epsg), Some(3577));
        let keys: Vec<_> = back.features[0].properties.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["index", "2023_9_mean", "Disturbance"]);
    }
}
