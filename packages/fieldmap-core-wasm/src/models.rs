// This is the models module containing the structures handed to JavaScript
use serde::Serialize;

use crate::clip::ClipOutcome;
use crate::csv_export::{csv_file_name, CSV_MIME_TYPE};
use crate::geojson_features::FeatureCollection;
use crate::normalize::GeometryKind;

/// Result of `clip_layer_to_boundary`
#[derive(Serialize)]
pub struct ClipResponse {
    pub collection: FeatureCollection,
    pub errors: Vec<String>,
}

impl From<ClipOutcome> for ClipResponse {
    fn from(outcome: ClipOutcome) -> Self {
        ClipResponse {
            errors: outcome.diagnostics.iter().map(ToString::to_string).collect(),
            collection: outcome.collection,
        }
    }
}

/// A loaded layer plus what the UI needs to style and list it
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportedLayer {
    pub geojson: FeatureCollection,
    pub kind: GeometryKind,
    pub feature_count: usize,
    pub area_acres: f64,
}

// The archive bytes are attached separately as a Uint8Array
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportedArchive {
    pub file_name: String,
    pub mime_type: &'static str,
    pub size: usize,
}

/// Result of `export_attributes_csv`
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CsvExport {
    pub file_name: String,
    pub mime_type: &'static str,
    pub csv: String,
}

impl CsvExport {
    pub fn new(layer_name: &str, csv: String) -> Self {
        CsvExport {
            file_name: csv_file_name(layer_name),
            mime_type: CSV_MIME_TYPE,
            csv,
        }
    }
}
