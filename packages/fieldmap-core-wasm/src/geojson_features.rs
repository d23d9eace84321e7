use geo_types::{Coord, LineString, MultiPolygon, Polygon};
use serde::de::Error as _;
use serde::ser::SerializeStruct;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Attribute mapping of a feature. Key order is insertion order.
pub type Properties = serde_json::Map<String, serde_json::Value>;

/// A longitude/latitude pair in WGS84 degrees
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Position { x, y }
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Serialize for Position {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        [self.x, self.y].serialize(serializer)
    }
}

// Accepts [x, y] as well as [x, y, z, ...]; extra ordinates are dropped.
impl<'de> Deserialize<'de> for Position {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let ordinates = Vec::<f64>::deserialize(deserializer)?;
        if ordinates.len() < 2 {
            return Err(D::Error::custom(format!(
                "position needs at least 2 ordinates, got {}",
                ordinates.len()
            )));
        }
        Ok(Position::new(ordinates[0], ordinates[1]))
    }
}

impl From<Position> for Coord<f64> {
    fn from(p: Position) -> Self {
        Coord { x: p.x, y: p.y }
    }
}

impl From<Coord<f64>> for Position {
    fn from(c: Coord<f64>) -> Self {
        Position::new(c.x, c.y)
    }
}

/// Geometry kinds the core understands, encoded as GeoJSON
/// `{"type": ..., "coordinates": ...}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
pub enum Geometry {
    Point(Position),
    MultiPoint(Vec<Position>),
    LineString(Vec<Position>),
    MultiLineString(Vec<Vec<Position>>),
    Polygon(Vec<Vec<Position>>),
    MultiPolygon(Vec<Vec<Vec<Position>>>),
}

/// Coarse grouping used to pick a shapefile bucket and a clipping strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GeometryFamily {
    Puntal,
    Lineal,
    Polygonal,
}

impl Geometry {
    pub fn type_name(&self) -> &'static str {
        match self {
            Geometry::Point(_) => "Point",
            Geometry::MultiPoint(_) => "MultiPoint",
            Geometry::LineString(_) => "LineString",
            Geometry::MultiLineString(_) => "MultiLineString",
            Geometry::Polygon(_) => "Polygon",
            Geometry::MultiPolygon(_) => "MultiPolygon",
        }
    }

    pub fn family(&self) -> GeometryFamily {
        match self {
            Geometry::Point(_) | Geometry::MultiPoint(_) => GeometryFamily::Puntal,
            Geometry::LineString(_) | Geometry::MultiLineString(_) => GeometryFamily::Lineal,
            Geometry::Polygon(_) | Geometry::MultiPolygon(_) => GeometryFamily::Polygonal,
        }
    }

    /// Every coordinate of the geometry in document order
    pub fn positions(&self) -> Vec<Position> {
        match self {
            Geometry::Point(p) => vec![*p],
            Geometry::MultiPoint(points) | Geometry::LineString(points) => points.clone(),
            Geometry::MultiLineString(parts) | Geometry::Polygon(parts) => {
                parts.iter().flatten().copied().collect()
            }
            Geometry::MultiPolygon(polygons) => {
                polygons.iter().flatten().flatten().copied().collect()
            }
        }
    }

    /// Polygon members as geo polygons. Empty for non-polygonal geometries.
    pub fn to_multi_polygon(&self) -> MultiPolygon<f64> {
        match self {
            Geometry::Polygon(rings) => MultiPolygon::new(vec![rings_to_polygon(rings)]),
            Geometry::MultiPolygon(polygons) => {
                MultiPolygon::new(polygons.iter().map(|rings| rings_to_polygon(rings)).collect())
            }
            _ => MultiPolygon::new(Vec::new()),
        }
    }

    /// Line members as geo line strings. Empty for non-lineal geometries.
    pub fn to_line_strings(&self) -> Vec<LineString<f64>> {
        match self {
            Geometry::LineString(line) => vec![positions_to_line_string(line)],
            Geometry::MultiLineString(lines) => {
                lines.iter().map(|line| positions_to_line_string(line)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Converts a geo multipolygon back. A single member becomes a `Polygon`;
    /// an empty multipolygon yields `None`.
    pub fn from_multi_polygon(multi: &MultiPolygon<f64>) -> Option<Geometry> {
        let mut polygons: Vec<Vec<Vec<Position>>> = multi.0.iter().map(polygon_to_rings).collect();
        match polygons.len() {
            0 => None,
            1 => polygons.pop().map(Geometry::Polygon),
            _ => Some(Geometry::MultiPolygon(polygons)),
        }
    }

    pub fn from_line_string(line: &LineString<f64>) -> Geometry {
        Geometry::LineString(line.0.iter().map(|c| Position::from(*c)).collect())
    }
}

pub fn positions_to_line_string(positions: &[Position]) -> LineString<f64> {
    LineString::new(positions.iter().map(|p| Coord::from(*p)).collect())
}

fn rings_to_polygon(rings: &[Vec<Position>]) -> Polygon<f64> {
    let mut rings = rings.iter().map(|ring| positions_to_line_string(ring));
    let exterior = rings.next().unwrap_or_else(|| LineString::new(Vec::new()));
    Polygon::new(exterior, rings.collect())
}

fn polygon_to_rings(polygon: &Polygon<f64>) -> Vec<Vec<Position>> {
    std::iter::once(polygon.exterior())
        .chain(polygon.interiors())
        .map(|ring| ring.0.iter().map(|c| Position::from(*c)).collect())
        .collect()
}

fn nullable_properties<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Properties, D::Error> {
    Ok(Option::<Properties>::deserialize(deserializer)?.unwrap_or_default())
}

/// One geometry plus its attributes
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Feature {
    /// `None` for a GeoJSON `"geometry": null`
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default, deserialize_with = "nullable_properties")]
    pub properties: Properties,
}

impl Feature {
    pub fn new(geometry: Geometry) -> Self {
        Feature {
            geometry: Some(geometry),
            properties: Properties::new(),
        }
    }

    pub fn with_properties(geometry: Geometry, properties: Properties) -> Self {
        Feature {
            geometry: Some(geometry),
            properties,
        }
    }
}

impl Serialize for Feature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Feature", 3)?;
        state.serialize_field("type", "Feature")?;
        state.serialize_field("properties", &self.properties)?;
        state.serialize_field("geometry", &self.geometry)?;
        state.end()
    }
}

/// Ordered sequence of features; order drives record numbering on export
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        FeatureCollection { features }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Feature> {
        self.features.iter()
    }
}

impl Serialize for FeatureCollection {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("FeatureCollection", 2)?;
        state.serialize_field("type", "FeatureCollection")?;
        state.serialize_field("features", &self.features)?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn geometry_round_trips_through_geojson() {
        let value = json!({"type": "LineString", "coordinates": [[0.0, 1.0], [2.0, 3.0, 40.0]]});
        let geometry: Geometry = serde_json::from_value(value).unwrap();
        assert_eq!(
            geometry,
            Geometry::LineString(vec![Position::new(0.0, 1.0), Position::new(2.0, 3.0)])
        );
        let back = serde_json::to_value(&geometry).unwrap();
        assert_eq!(back, json!({"type": "LineString", "coordinates": [[0.0, 1.0], [2.0, 3.0]]}));
    }

    #[test]
    fn unknown_geometry_type_is_rejected() {
        let value = json!({"type": "GeometryCollection", "coordinates": []});
        assert!(serde_json::from_value::<Geometry>(value).is_err());
    }

    #[test]
    fn short_position_is_rejected() {
        let value = json!({"type": "Point", "coordinates": [1.0]});
        assert!(serde_json::from_value::<Geometry>(value).is_err());
    }

    #[test]
    fn null_properties_become_empty() {
        let value = json!({
            "type": "Feature",
            "properties": null,
            "geometry": {"type": "Point", "coordinates": [1.0, 2.0]}
        });
        let feature: Feature = serde_json::from_value(value).unwrap();
        assert!(feature.properties.is_empty());
    }

    #[test]
    fn null_geometry_is_kept_as_none() {
        let value = json!({"type": "Feature", "properties": {"id": 4}, "geometry": null});
        let feature: Feature = serde_json::from_value(value).unwrap();
        assert_eq!(feature.geometry, None);
        assert_eq!(serde_json::to_value(&feature).unwrap()["geometry"], serde_json::Value::Null);

        let missing: Feature = serde_json::from_value(json!({"type": "Feature", "properties": {}})).unwrap();
        assert_eq!(missing.geometry, None);
    }

    #[test]
    fn feature_serializes_with_type_tag() {
        let mut properties = Properties::new();
        properties.insert("crop".into(), json!("corn"));
        let feature = Feature::with_properties(Geometry::Point(Position::new(1.0, 2.0)), properties);
        let value = serde_json::to_value(&feature).unwrap();
        assert_eq!(value["type"], "Feature");
        assert_eq!(value["properties"]["crop"], "corn");
        assert_eq!(value["geometry"]["type"], "Point");
    }

    #[test]
    fn positions_flatten_multipolygons() {
        let square = vec![
            Position::new(0.0, 0.0),
            Position::new(1.0, 0.0),
            Position::new(1.0, 1.0),
            Position::new(0.0, 0.0),
        ];
        let geometry = Geometry::MultiPolygon(vec![vec![square.clone()], vec![square]]);
        assert_eq!(geometry.positions().len(), 8);
        assert_eq!(geometry.family(), GeometryFamily::Polygonal);
    }

    #[test]
    fn single_member_multipolygon_converts_to_polygon() {
        let ring = vec![
            Position::new(0.0, 0.0),
            Position::new(1.0, 0.0),
            Position::new(1.0, 1.0),
            Position::new(0.0, 0.0),
        ];
        let geometry = Geometry::Polygon(vec![ring]);
        let multi = geometry.to_multi_polygon();
        assert_eq!(Geometry::from_multi_polygon(&multi), Some(geometry));
        assert_eq!(Geometry::from_multi_polygon(&MultiPolygon::new(Vec::new())), None);
    }
}
