//! Attribute table as CSV.

use serde_json::Value;

use crate::geojson_features::Feature;

/// One column per property key, in the order keys are first seen. Every
/// cell is double-quoted; missing and null values are empty.
pub fn attributes_csv(features: &[Feature]) -> String {
    if features.is_empty() {
        return String::new();
    }

    let mut columns: Vec<&str> = Vec::new();
    for feature in features {
        for key in feature.properties.keys() {
            if !columns.contains(&key.as_str()) {
                columns.push(key);
            }
        }
    }

    let mut lines = Vec::with_capacity(features.len() + 1);
    lines.push(columns.iter().map(|c| quote(c)).collect::<Vec<_>>().join(","));
    for feature in features {
        let row: Vec<String> = columns
            .iter()
            .map(|c| quote(&cell_text(feature.properties.get(*c))))
            .collect();
        lines.push(row.join(","));
    }
    lines.join("\n")
}

pub const CSV_MIME_TYPE: &str = "text/csv";

/// `<layer>.csv`, or `attributes.csv` for an unnamed layer
pub fn csv_file_name(layer_name: &str) -> String {
    if layer_name.is_empty() {
        "attributes.csv".to_string()
    } else {
        format!("{}.csv", layer_name)
    }
}

fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('"', "\"\""))
}

// Nested arrays and objects are written as compact JSON
fn cell_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}
