//! Clips a layer against a field boundary, one strategy per geometry family.
//!
//! Polygons are intersected with the boundary, lines are split at the
//! boundary outline and filtered by segment midpoint, points are kept when
//! they fall inside or on the boundary. A failure on one feature is recorded
//! and the feature is left out; it never fails the whole clip.

use std::panic::{self, AssertUnwindSafe};

use geo::algorithm::line_intersection::{line_intersection, LineIntersection};
use geo::{BooleanOps, ChamberlainDuquetteArea, Coord, Intersects, Line, LineString, MultiPolygon, Relate};
use serde_json::Value;

use crate::area::geometry_area_acres;
use crate::bbox_filter::BoundingBox;
use crate::error::{GeoError, Result};
use crate::geojson_features::{Feature, FeatureCollection, Geometry, GeometryFamily, Position};
use crate::normalize::normalize;
use crate::{console_log, console_warn};

/// Attribute written onto every clipped polygon
pub const AREA_ATTRIBUTE: &str = "_area_acres";

const SQUARE_METERS_PER_ACRE: f64 = 4046.86;

/// Clipped features plus the per-feature failures met along the way
#[derive(Debug, Default)]
pub struct ClipOutcome {
    pub collection: FeatureCollection,
    /// Always `GeoError::PerFeatureClipError`, in source order
    pub diagnostics: Vec<GeoError>,
}

/// The clip mask: every boundary feature merged into one multipolygon
struct Boundary {
    shape: MultiPolygon<f64>,
    bbox: BoundingBox,
    outline: Vec<Line<f64>>,
}

impl Boundary {
    // Boundary features without a geometry contribute nothing
    fn resolve(boundary: &FeatureCollection) -> Result<Boundary> {
        let mut members = boundary
            .iter()
            .enumerate()
            .filter_map(|(index, feature)| feature.geometry.as_ref().map(|geometry| (index, geometry)))
            .map(|(index, geometry)| {
                if geometry.family() != GeometryFamily::Polygonal {
                    return Err(GeoError::BoundaryProcessingFailed(format!(
                        "boundary feature {} is a {}, not a polygon",
                        index,
                        geometry.type_name()
                    )));
                }
                if geometry.positions().iter().any(|p| !p.is_finite()) {
                    return Err(GeoError::BoundaryProcessingFailed(format!(
                        "boundary feature {} has a non-finite coordinate",
                        index
                    )));
                }
                Ok(geometry.to_multi_polygon())
            });

        let mut shape = match members.next() {
            Some(first) => first?,
            None => return Err(GeoError::NoBoundaryPolygon),
        };
        for member in members {
            let member = member?;
            shape = guarded(|| shape.union(&member)).map_err(GeoError::BoundaryProcessingFailed)?;
        }

        shape.0.retain(|polygon| polygon.exterior().0.len() >= 3);
        if shape.0.is_empty() {
            return Err(GeoError::NoBoundaryPolygon);
        }

        let mut bbox = BoundingBox::empty();
        let mut outline = Vec::new();
        for polygon in &shape.0 {
            for ring in std::iter::once(polygon.exterior()).chain(polygon.interiors()) {
                for coord in &ring.0 {
                    bbox.extend(&Position::from(*coord));
                }
                outline.extend(ring.lines());
            }
        }

        Ok(Boundary { shape, bbox, outline })
    }

    // Points on the outline count as inside
    fn covers(&self, coord: &Coord<f64>) -> bool {
        self.bbox.contains(&Position::from(*coord))
            && self.shape.0.iter().any(|polygon| polygon.intersects(coord))
    }
}

/// Normalizes both inputs, then clips `source` to `boundary`.
pub fn clip_values(source: &Value, boundary: &Value) -> Result<ClipOutcome> {
    let source = normalize(source)?;
    let boundary = normalize(boundary)?;
    clip(&source, &boundary)
}

/// Clips every source feature against the union of the boundary features.
///
/// An empty result is a success. Fails only when the boundary cannot be
/// turned into a polygon.
pub fn clip(source: &FeatureCollection, boundary: &FeatureCollection) -> Result<ClipOutcome> {
    let boundary = Boundary::resolve(boundary)?;

    let mut outcome = ClipOutcome::default();
    for (index, feature) in source.iter().enumerate() {
        match clip_feature(feature, &boundary) {
            Ok(kept) => outcome.collection.features.extend(kept),
            Err(reason) => outcome
                .diagnostics
                .push(GeoError::PerFeatureClipError { index, reason }),
        }
    }

    if !outcome.diagnostics.is_empty() {
        let messages: Vec<String> = outcome.diagnostics.iter().map(|e| e.to_string()).collect();
        console_warn!("Clip errors: {}", messages.join("; "));
    }
    console_log!(
        "Clipped {} source features to {} features",
        source.len(),
        outcome.collection.len()
    );

    Ok(outcome)
}

fn clip_feature(feature: &Feature, boundary: &Boundary) -> std::result::Result<Vec<Feature>, String> {
    let Some(geometry) = &feature.geometry else {
        return Err("feature has no geometry".to_string());
    };
    match geometry.family() {
        GeometryFamily::Polygonal => clip_polygonal(feature, geometry, boundary),
        GeometryFamily::Lineal => clip_lineal(feature, geometry, boundary),
        GeometryFamily::Puntal => Ok(clip_puntal(feature, geometry, boundary)),
    }
}

fn clip_polygonal(
    feature: &Feature,
    geometry: &Geometry,
    boundary: &Boundary,
) -> std::result::Result<Vec<Feature>, String> {
    let positions = geometry.positions();
    if positions.iter().any(|p| !p.is_finite()) {
        return Err("non-finite coordinate".to_string());
    }
    if !BoundingBox::from_positions(&positions).overlaps(&boundary.bbox) {
        return Ok(Vec::new());
    }

    let subject = geometry.to_multi_polygon();
    let within = guarded(|| subject.relate(&boundary.shape).is_within())?;

    let (clipped, geometry) = if within {
        (subject, geometry.clone())
    } else {
        let clipped = guarded(|| subject.intersection(&boundary.shape))?;
        match Geometry::from_multi_polygon(&clipped) {
            Some(geometry) => (clipped, geometry),
            None => return Ok(Vec::new()),
        }
    };

    let mut properties = feature.properties.clone();
    if let Some(acres) = intersection_area_acres(&clipped, &geometry) {
        let rounded = (acres * 100.0).round() / 100.0;
        if let Some(number) = serde_json::Number::from_f64(rounded) {
            properties.insert(AREA_ATTRIBUTE.to_string(), Value::Number(number));
        }
    }

    Ok(vec![Feature::with_properties(geometry, properties)])
}

// Spherical area when it can be computed, planar outer-ring estimate otherwise
fn intersection_area_acres(clipped: &MultiPolygon<f64>, geometry: &Geometry) -> Option<f64> {
    guarded(|| clipped.chamberlain_duquette_unsigned_area())
        .ok()
        .filter(|square_meters| square_meters.is_finite())
        .map(|square_meters| square_meters / SQUARE_METERS_PER_ACRE)
        .or_else(|| {
            let planar = geometry_area_acres(geometry);
            planar.is_finite().then_some(planar)
        })
}

fn clip_lineal(
    feature: &Feature,
    geometry: &Geometry,
    boundary: &Boundary,
) -> std::result::Result<Vec<Feature>, String> {
    let parts = geometry.to_line_strings();
    let touches = parts
        .iter()
        .any(|line| boundary.shape.0.iter().any(|polygon| line.intersects(polygon)));
    if !touches {
        return Ok(Vec::new());
    }

    match split_inside(&parts, boundary) {
        Ok(Some(pieces)) => Ok(pieces
            .iter()
            .map(|piece| Feature::with_properties(Geometry::from_line_string(piece), feature.properties.clone()))
            .collect()),
        // Crosses nothing but touches the boundary: wholly inside
        Ok(None) => Ok(vec![feature.clone()]),
        Err(reason) => {
            console_warn!("Line split failed ({}), falling back to vertex test", reason);
            let any_inside = parts.iter().flat_map(|line| line.0.iter()).any(|c| boundary.covers(c));
            Ok(if any_inside { vec![feature.clone()] } else { Vec::new() })
        }
    }
}

/// Splits the lines at the boundary outline and keeps the pieces whose
/// midpoint is covered. `Ok(None)` means the outline cut nothing.
fn split_inside(
    parts: &[LineString<f64>],
    boundary: &Boundary,
) -> std::result::Result<Option<Vec<LineString<f64>>>, String> {
    let mut pieces = Vec::new();
    let mut any_cut = false;

    for (n, part) in parts.iter().enumerate() {
        if part.0.len() < 2 {
            return Err(format!("line {} has fewer than two positions", n));
        }
        if part.0.iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
            return Err(format!("line {} has a non-finite coordinate", n));
        }
        let (split, cut) = split_line(part, &boundary.outline);
        any_cut |= cut;
        pieces.extend(split);
    }

    if !any_cut {
        return Ok(None);
    }

    let mut inside = Vec::new();
    for piece in pieces {
        let mid = midpoint(&piece.0).ok_or_else(|| "could not locate segment midpoint".to_string())?;
        if boundary.covers(&mid) {
            inside.push(piece);
        }
    }
    Ok(Some(inside))
}

/// Cuts one line wherever it meets an outline edge. The flag reports
/// whether any cut produced a piece.
fn split_line(line: &LineString<f64>, outline: &[Line<f64>]) -> (Vec<LineString<f64>>, bool) {
    let mut pieces = Vec::new();
    let mut cut = false;
    let mut current = vec![line.0[0]];

    for segment in line.lines() {
        let mut cuts: Vec<(f64, Coord<f64>)> = Vec::new();
        for edge in outline {
            match line_intersection(segment, *edge) {
                Some(LineIntersection::SinglePoint { intersection, .. }) => {
                    cuts.push((segment_param(&segment, intersection), intersection));
                }
                Some(LineIntersection::Collinear { intersection }) => {
                    cuts.push((segment_param(&segment, intersection.start), intersection.start));
                    cuts.push((segment_param(&segment, intersection.end), intersection.end));
                }
                None => {}
            }
        }
        cuts.sort_by(|a, b| a.0.total_cmp(&b.0));

        for (_, point) in cuts {
            if current.last() != Some(&point) {
                current.push(point);
            }
            if current.len() >= 2 {
                pieces.push(LineString::new(std::mem::replace(&mut current, vec![point])));
                cut = true;
            }
        }
        if current.last() != Some(&segment.end) {
            current.push(segment.end);
        }
    }

    if current.len() >= 2 {
        pieces.push(LineString::new(current));
    }
    (pieces, cut)
}

fn segment_param(segment: &Line<f64>, point: Coord<f64>) -> f64 {
    let d = segment.delta();
    let len2 = d.x * d.x + d.y * d.y;
    if len2 == 0.0 {
        return 0.0;
    }
    ((point.x - segment.start.x) * d.x + (point.y - segment.start.y) * d.y) / len2
}

/// Point halfway along the line, measured in planar degrees
fn midpoint(coords: &[Coord<f64>]) -> Option<Coord<f64>> {
    let lengths: Vec<f64> = coords
        .windows(2)
        .map(|w| (w[1].x - w[0].x).hypot(w[1].y - w[0].y))
        .collect();
    let total: f64 = lengths.iter().sum();
    if !total.is_finite() {
        return None;
    }
    if total == 0.0 {
        return coords.first().copied();
    }

    let mut remaining = total / 2.0;
    for (w, len) in coords.windows(2).zip(&lengths) {
        if remaining <= *len && *len > 0.0 {
            let t = remaining / len;
            return Some(Coord {
                x: w[0].x + (w[1].x - w[0].x) * t,
                y: w[0].y + (w[1].y - w[0].y) * t,
            });
        }
        remaining -= len;
    }
    coords.last().copied()
}

fn clip_puntal(feature: &Feature, geometry: &Geometry, boundary: &Boundary) -> Vec<Feature> {
    match geometry {
        Geometry::Point(p) => {
            if boundary.covers(&Coord::from(*p)) {
                vec![feature.clone()]
            } else {
                Vec::new()
            }
        }
        Geometry::MultiPoint(points) => points
            .iter()
            .filter(|p| boundary.covers(&Coord::from(**p)))
            .map(|p| Feature::with_properties(Geometry::Point(*p), feature.properties.clone()))
            .collect(),
        _ => Vec::new(),
    }
}

/// Runs a geometry operation, turning a panic inside it into an error message.
///
/// Only native callers are protected: on `wasm32-unknown-unknown` panics
/// abort, so the instance traps before `catch_unwind` sees anything.
fn guarded<T>(op: impl FnOnce() -> T) -> std::result::Result<T, String> {
    panic::catch_unwind(AssertUnwindSafe(op)).map_err(|payload| {
        if let Some(message) = payload.downcast_ref::<&str>() {
            message.to_string()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "geometry operation panicked".to_string()
        }
    })
}
