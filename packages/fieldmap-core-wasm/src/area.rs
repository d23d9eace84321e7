//! Planar acreage estimate used for live feedback and attribute tables.
//!
//! The shoelace area is taken directly on longitude/latitude degrees and
//! scaled with a single mid-latitude factor. This is intentionally not a
//! geodesic computation; numbers shown elsewhere depend on it.

use crate::geojson_features::{FeatureCollection, Geometry, Position};

const MILES_PER_DEGREE: f64 = 69.0;
const ACRES_PER_SQUARE_MILE: f64 = 640.0;

/// Area in acres of a ring of lon/lat positions; fewer than three points yield 0.
pub fn polygon_area_acres(ring: &[Position]) -> f64 {
    let n = ring.len();
    if n < 3 {
        return 0.0;
    }

    let mut area = 0.0;
    for i in 0..n {
        let j = (i + 1) % n;
        area += ring[i].x * ring[j].y;
        area -= ring[j].x * ring[i].y;
    }
    let square_degrees = area.abs() / 2.0;

    let center_lat = ring.iter().map(|p| p.y).sum::<f64>() / n as f64;
    let lat_miles = MILES_PER_DEGREE;
    let lng_miles = MILES_PER_DEGREE * (center_lat * std::f64::consts::PI / 180.0).cos();

    square_degrees * lat_miles * lng_miles * ACRES_PER_SQUARE_MILE
}

/// Outer-ring acreage of one geometry. Holes are ignored, non-polygons are 0.
pub fn geometry_area_acres(geometry: &Geometry) -> f64 {
    match geometry {
        Geometry::Polygon(rings) => rings.first().map_or(0.0, |ring| polygon_area_acres(ring)),
        Geometry::MultiPolygon(polygons) => polygons
            .iter()
            .filter_map(|rings| rings.first())
            .map(|ring| polygon_area_acres(ring))
            .sum(),
        _ => 0.0,
    }
}

/// Sum of the outer-ring acreage of every polygonal feature
pub fn collection_area_acres(fc: &FeatureCollection) -> f64 {
    fc.iter()
        .filter_map(|f| f.geometry.as_ref())
        .map(geometry_area_acres)
        .sum()
}
