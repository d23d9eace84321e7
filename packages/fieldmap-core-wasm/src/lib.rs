use js_sys::{Array, Reflect, Uint8Array};
use serde_json::Value;
use serde_wasm_bindgen::{from_value, to_value};
use wasm_bindgen::prelude::*;

// Create a console module for logging
pub mod console;
// Error types shared by every operation
pub mod error;
// GeoJSON value types
pub mod geojson_features;
// Bounding boxes and ring predicates
pub mod bbox_filter;
// Input normalization
pub mod normalize;
// Acreage estimates
pub mod area;
// Clipping a layer to a boundary
pub mod clip;
// Cursor-based binary writer/reader
pub mod byte_buffer;
// dBASE attribute tables
pub mod dbf;
// Shapefile export
pub mod shapefile_writer;
// Shapefile import
pub mod shapefile_reader;
// File loading by extension
pub mod importers;
// Attribute table CSV
pub mod csv_export;
// Import our models
mod models;

pub use area::{collection_area_acres, geometry_area_acres, polygon_area_acres};
pub use clip::{clip, clip_values, ClipOutcome, AREA_ATTRIBUTE};
pub use csv_export::attributes_csv;
pub use error::GeoError;
pub use geojson_features::{Feature, FeatureCollection, Geometry, Position, Properties};
pub use importers::{load_vector_layer, InputFile};
pub use normalize::{detect_geometry_kind, normalize, normalize_str, GeometryKind};
pub use shapefile_reader::{read_shapefile, ShapefileParts};
pub use shapefile_writer::{encode, encode_bucket, ExportOptions, ShapeType, ShapefileArchive, ShapefileSet};

use models::{ClipResponse, CsvExport, ExportedArchive, ImportedLayer};

// Enable better panic messages in console during development
#[cfg(feature = "console_error_panic_hook")]
pub use console_error_panic_hook::set_once as set_panic_hook;

// Use the macros from our console module
#[macro_export]
macro_rules! console_log {
    ($($t:tt)*) => ($crate::console::log(&format!($($t)*)))
}

#[macro_export]
macro_rules! console_warn {
    ($($t:tt)*) => ($crate::console::warn(&format!($($t)*)))
}

use std::sync::Once;
static INIT: Once = Once::new();

// This sets up the wasm_bindgen start functionality
#[wasm_bindgen(start)]
pub fn start() {
    INIT.call_once(|| {
        // Set the panic hook for better error messages
        #[cfg(feature = "console_error_panic_hook")]
        console_error_panic_hook::set_once();

        console_log!("Field map core initialized");
    });
}

fn js_error(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

fn parse_json(text: &str) -> Result<Value, GeoError> {
    serde_json::from_str(text).map_err(|e| GeoError::InvalidGeometry(format!("not valid JSON: {}", e)))
}

/// Flat `[lon, lat, lon, lat, ..]` to positions; a trailing odd value is ignored
fn ring_from_flat(coords: &[f64]) -> Vec<Position> {
    coords.chunks_exact(2).map(|c| Position::new(c[0], c[1])).collect()
}

/// Canonical FeatureCollection JSON for any GeoJSON input
#[wasm_bindgen]
pub fn normalize_geojson(json: &str) -> Result<String, JsValue> {
    let fc = normalize_str(json).map_err(js_error)?;
    serde_json::to_string(&fc).map_err(js_error)
}

/// Total acreage of every polygon in a GeoJSON input
#[wasm_bindgen]
pub fn calculate_area_acres(json: &str) -> Result<f64, JsValue> {
    let fc = normalize_str(json).map_err(js_error)?;
    Ok(collection_area_acres(&fc))
}

#[wasm_bindgen]
pub fn calculate_ring_area_acres(coords: &[f64]) -> f64 {
    polygon_area_acres(&ring_from_flat(coords))
}

/// Clips `source` to `boundary`, returning `{"collection": .., "errors": [..]}`
#[wasm_bindgen]
pub fn clip_layer_to_boundary(source: &str, boundary: &str) -> Result<String, JsValue> {
    let source = parse_json(source).map_err(js_error)?;
    let boundary = parse_json(boundary).map_err(js_error)?;
    let outcome = clip_values(&source, &boundary).map_err(js_error)?;
    serde_json::to_string(&ClipResponse::from(outcome)).map_err(js_error)
}

/// Builds the shapefile zip, returning `{fileName, mimeType, size, bytes}`
#[wasm_bindgen]
pub fn export_shapefile(json: &str, name: &str) -> Result<JsValue, JsValue> {
    let value = parse_json(json)
        .map_err(GeoError::into_export_error)
        .map_err(js_error)?;
    let archive = encode(&value, name, &ExportOptions::default()).map_err(js_error)?;

    let info = ExportedArchive {
        file_name: archive.file_name,
        mime_type: archive.mime_type,
        size: archive.bytes.len(),
    };
    let result = to_value(&info)?;
    Reflect::set(
        &result,
        &JsValue::from_str("bytes"),
        &Uint8Array::from(archive.bytes.as_slice()),
    )?;
    Ok(result)
}

/// Loads one layer from user files. `names[i]` names `buffers[i]`.
#[wasm_bindgen]
pub fn import_vector_files(names: JsValue, buffers: Array) -> Result<String, JsValue> {
    let names: Vec<String> = from_value(names)?;
    if names.len() != buffers.length() as usize {
        return Err(js_error(format!(
            "{} file names for {} buffers",
            names.len(),
            buffers.length()
        )));
    }

    let files: Vec<InputFile> = names
        .into_iter()
        .zip(buffers.iter())
        .map(|(name, buffer)| InputFile::new(name, Uint8Array::new(&buffer).to_vec()))
        .collect();

    let fc = load_vector_layer(&files).map_err(js_error)?;
    let layer = ImportedLayer {
        kind: detect_geometry_kind(&fc),
        feature_count: fc.len(),
        area_acres: collection_area_acres(&fc),
        geojson: fc,
    };
    serde_json::to_string(&layer).map_err(js_error)
}

/// Attribute table as CSV, returning `{fileName, mimeType, csv}`
#[wasm_bindgen]
pub fn export_attributes_csv(json: &str, layer_name: &str) -> Result<JsValue, JsValue> {
    let fc = normalize_str(json).map_err(js_error)?;
    let export = CsvExport::new(layer_name, attributes_csv(&fc.features));
    Ok(to_value(&export)?)
}
