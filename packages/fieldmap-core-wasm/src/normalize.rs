//! Coerces bare geometries, single features and feature collections into a
//! canonical `FeatureCollection`.

use serde::Serialize;
use serde_json::Value;

use crate::error::{GeoError, Result};
use crate::geojson_features::{Feature, FeatureCollection, Geometry};

/// Broad geometry kind of a layer, used to pick default styling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryKind {
    Point,
    Line,
    Polygon,
}

/// Interprets a GeoJSON value as a feature collection.
///
/// Rules, in order: a `FeatureCollection` is taken as is, a `Feature` is
/// wrapped, a bare geometry (has `type` and `coordinates`) becomes a feature
/// with empty properties. Coordinates are not range-checked and rings are
/// not checked for closure.
pub fn normalize(value: &Value) -> Result<FeatureCollection> {
    let kind = value.get("type").and_then(Value::as_str);

    match kind {
        Some("FeatureCollection") if value.get("features").map_or(false, Value::is_array) => {
            parse_collection(value)
        }
        Some("Feature") => {
            let feature: Feature = serde_json::from_value(value.clone())
                .map_err(|e| GeoError::InvalidGeometry(format!("invalid feature: {}", e)))?;
            Ok(FeatureCollection::new(vec![feature]))
        }
        Some(_) if value.get("coordinates").is_some() => {
            let geometry: Geometry = serde_json::from_value(value.clone())
                .map_err(|e| GeoError::InvalidGeometry(format!("invalid geometry: {}", e)))?;
            Ok(FeatureCollection::new(vec![Feature::new(geometry)]))
        }
        _ => Err(GeoError::InvalidGeometry(
            "expected a FeatureCollection, Feature or geometry".to_string(),
        )),
    }
}

/// Parses GeoJSON text, then normalizes it
pub fn normalize_str(text: &str) -> Result<FeatureCollection> {
    let value: Value = serde_json::from_str(text)
        .map_err(|e| GeoError::InvalidGeometry(format!("not valid JSON: {}", e)))?;
    normalize(&value)
}

fn parse_collection(value: &Value) -> Result<FeatureCollection> {
    serde_json::from_value(value.clone())
        .map_err(|e| GeoError::InvalidGeometry(format!("invalid feature collection: {}", e)))
}

/// Kind of the first feature's geometry; an empty collection or a missing
/// geometry counts as polygons.
pub fn detect_geometry_kind(fc: &FeatureCollection) -> GeometryKind {
    match fc.features.first().and_then(|f| f.geometry.as_ref()) {
        Some(Geometry::Point(_)) | Some(Geometry::MultiPoint(_)) => GeometryKind::Point,
        Some(Geometry::LineString(_)) | Some(Geometry::MultiLineString(_)) => GeometryKind::Line,
        _ => GeometryKind::Polygon,
    }
}
