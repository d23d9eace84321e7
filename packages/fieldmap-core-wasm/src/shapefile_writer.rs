//! ESRI shapefile export.
//!
//! Features are split into polygon, line and point buckets; each non-empty
//! bucket becomes a `.shp`/`.shx`/`.dbf`/`.prj` set. All sets plus a GeoJSON
//! copy are zipped into a single archive.

use std::io::{Cursor, Write};

use chrono::{Local, NaiveDate};
use serde_json::Value;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::bbox_filter::BoundingBox;
use crate::byte_buffer::ByteWriter;
use crate::dbf::{is_blank, write_dbf};
use crate::error::{GeoError, Result};
use crate::geojson_features::{Feature, FeatureCollection, Geometry, GeometryFamily, Position};
use crate::normalize::normalize;
use crate::{console_log, console_warn};

/// Geographic WGS84, identical for every export
pub const PRJ_WGS84: &str = r#"GEOGCS["GCS_WGS_1984",DATUM["D_WGS_1984",SPHEROID["WGS_1984",6378137,298.257223563]],PRIMEM["Greenwich",0],UNIT["Degree",0.017453292519943295]]"#;

pub const ARCHIVE_MIME_TYPE: &str = "application/zip";

pub const FILE_CODE: i32 = 9994;
pub const VERSION: i32 = 1000;
pub const HEADER_LEN: usize = 100;
pub const RECORD_HEADER_LEN: usize = 8;

/// Shape type codes from the ESRI shapefile technical description
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapeType {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
}

impl ShapeType {
    pub fn code(self) -> i32 {
        match self {
            ShapeType::Null => 0,
            ShapeType::Point => 1,
            ShapeType::PolyLine => 3,
            ShapeType::Polygon => 5,
            ShapeType::MultiPoint => 8,
        }
    }

    pub fn from_code(code: i32) -> Option<ShapeType> {
        match code {
            0 => Some(ShapeType::Null),
            1 => Some(ShapeType::Point),
            3 => Some(ShapeType::PolyLine),
            5 => Some(ShapeType::Polygon),
            8 => Some(ShapeType::MultiPoint),
            _ => None,
        }
    }

    /// The type an export writes for a geometry family
    pub fn for_family(family: GeometryFamily) -> ShapeType {
        match family {
            GeometryFamily::Polygonal => ShapeType::Polygon,
            GeometryFamily::Lineal => ShapeType::PolyLine,
            GeometryFamily::Puntal => ShapeType::Point,
        }
    }

    fn bucket_name(self) -> &'static str {
        match self {
            ShapeType::Polygon => "polygons",
            ShapeType::PolyLine => "lines",
            _ => "points",
        }
    }
}

/// Export settings
#[derive(Debug, Clone)]
pub struct ExportOptions {
    /// Last-modified date stamped into every `.dbf` header
    pub modified: NaiveDate,
}

impl Default for ExportOptions {
    fn default() -> Self {
        ExportOptions {
            modified: Local::now().date_naive(),
        }
    }
}

/// One shape type's worth of files
#[derive(Debug, Clone)]
pub struct ShapefileSet {
    pub shape_type: ShapeType,
    pub shp: Vec<u8>,
    pub shx: Vec<u8>,
    pub dbf: Vec<u8>,
    pub prj: String,
}

impl ShapefileSet {
    /// Extension/content pairs in archive order
    pub fn files(&self) -> [(&'static str, &[u8]); 4] {
        [
            ("shp", self.shp.as_slice()),
            ("shx", self.shx.as_slice()),
            ("dbf", self.dbf.as_slice()),
            ("prj", self.prj.as_bytes()),
        ]
    }
}

/// A finished export, ready to be offered as a download
#[derive(Debug, Clone)]
pub struct ShapefileArchive {
    pub file_name: String,
    pub mime_type: &'static str,
    pub bytes: Vec<u8>,
}

/// Replaces every character outside `[A-Za-z0-9_-]` with `_`.
pub fn sanitize_base_name(name: &str) -> String {
    let sanitized: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    if sanitized.is_empty() {
        "export".to_string()
    } else {
        sanitized
    }
}

/// Gives every feature a `name` (`Feature_<n>`) and an `id` (`<n>`) when
/// the current value is missing or blank.
pub fn with_default_attributes(mut fc: FeatureCollection) -> FeatureCollection {
    for (i, feature) in fc.features.iter_mut().enumerate() {
        let n = i + 1;
        if feature.properties.get("name").map_or(true, is_blank) {
            feature
                .properties
                .insert("name".to_string(), Value::String(format!("Feature_{}", n)));
        }
        if feature.properties.get("id").map_or(true, is_blank) {
            feature.properties.insert("id".to_string(), Value::from(n));
        }
    }
    fc
}

/// Normalizes `value` and encodes it into a zip archive named
/// `<sanitized base_name>.zip`. Any failure is reported as a single
/// `ExportError` and no archive is produced.
pub fn encode(value: &Value, base_name: &str, options: &ExportOptions) -> Result<ShapefileArchive> {
    normalize(value)
        .and_then(|fc| encode_collection(fc, base_name, options))
        .map_err(|e| {
            console_warn!("Shapefile export error: {}", e);
            e.into_export_error()
        })
}

/// Encodes an already normalized collection. Features without a geometry
/// have no shape record; they appear only in the GeoJSON copy.
pub fn encode_collection(
    fc: FeatureCollection,
    base_name: &str,
    options: &ExportOptions,
) -> Result<ShapefileArchive> {
    let fc = with_default_attributes(fc);
    let base = sanitize_base_name(base_name);

    let unmapped = fc.iter().filter(|f| f.geometry.is_none()).count();
    if unmapped > 0 {
        console_warn!("Skipping {} features without geometry in the shapefile sets", unmapped);
    }

    let mut sets = Vec::new();
    for family in [GeometryFamily::Polygonal, GeometryFamily::Lineal, GeometryFamily::Puntal] {
        let bucket: Vec<Feature> = fc
            .iter()
            .filter(|f| f.geometry.as_ref().map(Geometry::family) == Some(family))
            .cloned()
            .collect();
        if bucket.is_empty() {
            continue;
        }
        sets.push(encode_bucket(&bucket, ShapeType::for_family(family), options.modified)?);
    }

    let geojson = serde_json::to_string_pretty(&fc)?;
    let bytes = write_archive(&base, &sets, &geojson).map_err(GeoError::into_export_error)?;

    console_log!(
        "Exported {} features in {} shapefile sets to {}.zip ({} bytes)",
        fc.len(),
        sets.len(),
        base,
        bytes.len()
    );

    Ok(ShapefileArchive {
        file_name: format!("{}.zip", base),
        mime_type: ARCHIVE_MIME_TYPE,
        bytes,
    })
}

/// Writes one `.shp`/`.shx`/`.dbf`/`.prj` set. Every feature must belong to
/// the family of `shape_type`.
pub fn encode_bucket(features: &[Feature], shape_type: ShapeType, modified: NaiveDate) -> Result<ShapefileSet> {
    let bbox = BoundingBox::from_features(features);

    let mut shp = ByteWriter::new();
    write_header(&mut shp, shape_type, &bbox, 0)?;

    let mut index = Vec::with_capacity(features.len());
    for (i, feature) in features.iter().enumerate() {
        let content = feature
            .geometry
            .as_ref()
            .ok_or_else(|| "no geometry".to_string())
            .and_then(|geometry| shape_record(geometry, shape_type))
            .map_err(|reason| GeoError::InvalidGeometry(format!("feature {}: {}", i + 1, reason)))?;
        let offset = words(shp.position())?;
        let length = words(content.len())?;
        shp.put_i32_be(record_number(i)?)
            .put_i32_be(length)
            .put_bytes(&content);
        index.push((offset, length));
    }
    let shp_len = shp.len();
    shp.seek(24).put_i32_be(words(shp_len)?);

    let shx_len = HEADER_LEN + index.len() * RECORD_HEADER_LEN;
    let mut shx = ByteWriter::with_capacity(shx_len);
    write_header(&mut shx, shape_type, &bbox, shx_len)?;
    for (offset, length) in index {
        shx.put_i32_be(offset).put_i32_be(length);
    }

    Ok(ShapefileSet {
        shape_type,
        shp: shp.into_inner(),
        shx: shx.into_inner(),
        dbf: write_dbf(features, modified),
        prj: PRJ_WGS84.to_string(),
    })
}

fn words(bytes: usize) -> Result<i32> {
    i32::try_from(bytes / 2).map_err(|_| GeoError::Other(format!("{} bytes exceed the shapefile size limit", bytes)))
}

fn record_number(index: usize) -> Result<i32> {
    i32::try_from(index + 1).map_err(|_| GeoError::Other("too many records".to_string()))
}

fn count(n: usize) -> Result<i32> {
    i32::try_from(n).map_err(|_| GeoError::Other(format!("{} exceeds the shapefile count limit", n)))
}

/// 100-byte main file header, shared by `.shp` and `.shx`
fn write_header(w: &mut ByteWriter, shape_type: ShapeType, bbox: &BoundingBox, file_len: usize) -> Result<()> {
    w.seek(0)
        .put_i32_be(FILE_CODE)
        .put_zeros(20)
        .put_i32_be(words(file_len)?)
        .put_i32_le(VERSION)
        .put_i32_le(shape_type.code())
        .put_f64_le(bbox.x_min)
        .put_f64_le(bbox.y_min)
        .put_f64_le(bbox.x_max)
        .put_f64_le(bbox.y_max)
        // Z and M ranges are unused
        .put_zeros(32);
    debug_assert_eq!(w.position(), HEADER_LEN);
    w.seek_end();
    Ok(())
}

/// Record content (without the 8-byte record header)
fn shape_record(geometry: &Geometry, shape_type: ShapeType) -> std::result::Result<Vec<u8>, String> {
    if ShapeType::for_family(geometry.family()) != shape_type {
        return Err(format!(
            "a {} cannot be written as shape type {}",
            geometry.type_name(),
            shape_type.code()
        ));
    }

    match geometry {
        Geometry::Point(p) => Ok(point_record(p)),
        // Only the first member fits a Point record
        Geometry::MultiPoint(points) => points
            .first()
            .map(point_record)
            .ok_or_else(|| "MultiPoint has no coordinates".to_string()),
        Geometry::LineString(line) => poly_record(shape_type, &[line.as_slice()]),
        Geometry::MultiLineString(lines) | Geometry::Polygon(lines) => {
            let parts: Vec<&[Position]> = lines.iter().map(Vec::as_slice).collect();
            poly_record(shape_type, &parts)
        }
        Geometry::MultiPolygon(polygons) => {
            let parts: Vec<&[Position]> = polygons.iter().flatten().map(Vec::as_slice).collect();
            poly_record(shape_type, &parts)
        }
    }
}

fn point_record(p: &Position) -> Vec<u8> {
    let mut w = ByteWriter::with_capacity(20);
    w.put_i32_le(ShapeType::Point.code()).put_f64_le(p.x).put_f64_le(p.y);
    w.into_inner()
}

fn poly_record(shape_type: ShapeType, parts: &[&[Position]]) -> std::result::Result<Vec<u8>, String> {
    let bbox = BoundingBox::from_positions(parts.iter().flat_map(|part| part.iter()));
    let num_points: usize = parts.iter().map(|part| part.len()).sum();

    let mut w = ByteWriter::with_capacity(44 + parts.len() * 4 + num_points * 16);
    w.put_i32_le(shape_type.code())
        .put_f64_le(bbox.x_min)
        .put_f64_le(bbox.y_min)
        .put_f64_le(bbox.x_max)
        .put_f64_le(bbox.y_max)
        .put_i32_le(count(parts.len()).map_err(|e| e.to_string())?)
        .put_i32_le(count(num_points).map_err(|e| e.to_string())?);

    let mut start = 0;
    for part in parts {
        w.put_i32_le(count(start).map_err(|e| e.to_string())?);
        start += part.len();
    }
    for part in parts {
        for p in part.iter() {
            w.put_f64_le(p.x).put_f64_le(p.y);
        }
    }
    Ok(w.into_inner())
}

fn write_archive(base: &str, sets: &[ShapefileSet], geojson: &str) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default());

    for set in sets {
        let stem = format!("{}_{}", base, set.shape_type.bucket_name());
        for (extension, bytes) in set.files() {
            zip.start_file(format!("{}.{}", stem, extension), options)?;
            zip.write_all(bytes)?;
        }
    }
    zip.start_file(format!("{}.geojson", base), options)?;
    zip.write_all(geojson.as_bytes())?;

    Ok(zip.finish()?.into_inner())
}
