//! dBASE III attribute tables for shapefile sets.
//!
//! Every column is written as a 20-byte character field and at most ten
//! columns are kept. Both limits are inherited from the legacy export and
//! are part of the file contract.

use chrono::{Datelike, NaiveDate};
use serde_json::{Number, Value};

use crate::byte_buffer::{ByteReader, ByteWriter};
use crate::clip::AREA_ATTRIBUTE;
use crate::error::{GeoError, Result};
use crate::geojson_features::{Feature, Properties};

pub const FIELD_WIDTH: usize = 20;
pub const MAX_FIELDS: usize = 10;
pub const MAX_FIELD_NAME_BYTES: usize = 10;

const VERSION: u8 = 3;
const HEADER_PREFIX_LEN: usize = 32;
const DESCRIPTOR_LEN: usize = 32;
const HEADER_TERMINATOR: u8 = 0x0D;
const RECORD_ACTIVE: u8 = 0x20;
const RECORD_DELETED: u8 = 0x2A;
const FILE_TERMINATOR: u8 = 0x1A;

/// Column names for a set of features: `id`, `name`, then every property key
/// in discovery order, capped at ten.
pub fn field_names(features: &[Feature]) -> Vec<String> {
    let mut names: Vec<String> = vec!["id".to_string(), "name".to_string()];
    for feature in features {
        for key in feature.properties.keys() {
            if !names.iter().any(|n| n == key) {
                names.push(key.clone());
            }
        }
    }
    names.truncate(MAX_FIELDS);
    names
}

/// JavaScript-style falsiness: absent, null, empty string, zero and false
pub fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::Array(_) | Value::Object(_) => false,
    }
}

/// Text written into a character field for a property value
pub fn display_value(value: Option<&Value>) -> String {
    match value {
        None => String::new(),
        Some(v) if is_blank(v) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => format_number(n),
        Some(other) => other.to_string(),
    }
}

fn format_number(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    match n.as_f64() {
        Some(f) if f.fract() == 0.0 && f.abs() < 1e21 => format!("{:.0}", f),
        Some(f) => f.to_string(),
        None => n.to_string(),
    }
}

/// Acreage keeps two decimals, so a sliver still reads `0.00` rather than blank
fn format_area(n: &Number) -> String {
    match n.as_f64() {
        Some(f) if f.is_finite() => format!("{:.2}", f),
        _ => String::new(),
    }
}

/// Longest prefix of `s` that fits in `max` bytes without splitting a character
pub fn truncate_utf8(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// Serializes the attribute table of `features`.
pub fn write_dbf(features: &[Feature], modified: NaiveDate) -> Vec<u8> {
    let fields = field_names(features);
    let header_len = HEADER_PREFIX_LEN + fields.len() * DESCRIPTOR_LEN + 1;
    let record_len = 1 + fields.len() * FIELD_WIDTH;
    let file_len = header_len + features.len() * record_len + 1;

    let mut w = ByteWriter::with_capacity(file_len);
    let year = u8::try_from(modified.year() - 1900).unwrap_or(u8::MAX);
    w.put_u8(VERSION)
        .put_u8(year)
        .put_u8(modified.month() as u8)
        .put_u8(modified.day() as u8)
        .put_u32_le(features.len() as u32)
        .put_u16_le(header_len as u16)
        .put_u16_le(record_len as u16)
        .put_zeros(HEADER_PREFIX_LEN - 12);

    for name in &fields {
        let start = w.position();
        let upper = name.to_uppercase();
        w.put_padded(truncate_utf8(&upper, MAX_FIELD_NAME_BYTES).as_bytes(), 11, 0)
            .put_u8(b'C')
            .put_zeros(4)
            .put_u8(FIELD_WIDTH as u8);
        let written = w.position() - start;
        w.put_zeros(DESCRIPTOR_LEN - written);
    }
    w.put_u8(HEADER_TERMINATOR);

    for feature in features {
        w.put_u8(RECORD_ACTIVE);
        for name in &fields {
            let text = match feature.properties.get(name) {
                Some(Value::Number(n)) if name == AREA_ATTRIBUTE => format_area(n),
                value => display_value(value),
            };
            w.put_padded(truncate_utf8(&text, FIELD_WIDTH).as_bytes(), FIELD_WIDTH, b' ');
        }
    }
    w.put_u8(FILE_TERMINATOR);

    w.into_inner()
}

#[derive(Debug, Clone)]
struct FieldDescriptor {
    name: String,
    kind: u8,
    length: usize,
}

/// Reads every non-deleted record of a dBASE table into property maps.
///
/// Character fields are trimmed, numeric fields become numbers (blank
/// becomes null) and logical fields become booleans.
pub fn read_dbf(data: &[u8]) -> Result<Vec<Properties>> {
    let mut r = ByteReader::new(data);
    let _version = r.u8()?;
    r.bytes(3)?;
    let record_count = r.u32_le()? as usize;
    let header_len = r.u16_le()? as usize;
    let record_len = r.u16_le()? as usize;
    r.seek(HEADER_PREFIX_LEN)?;

    let mut fields = Vec::new();
    while r.position() + DESCRIPTOR_LEN < header_len {
        let descriptor = r.bytes(DESCRIPTOR_LEN)?;
        if descriptor[0] == HEADER_TERMINATOR {
            break;
        }
        let name_end = descriptor[..11].iter().position(|b| *b == 0).unwrap_or(11);
        fields.push(FieldDescriptor {
            name: String::from_utf8_lossy(&descriptor[..name_end]).trim().to_string(),
            kind: descriptor[11],
            length: descriptor[16] as usize,
        });
    }

    let needed: usize = 1 + fields.iter().map(|f| f.length).sum::<usize>();
    if record_len < needed {
        return Err(GeoError::MalformedShapefile(format!(
            "record length {} is shorter than its {} field bytes",
            record_len, needed
        )));
    }

    r.seek(header_len)?;
    if record_count.checked_mul(record_len).map_or(true, |n| n > r.remaining()) {
        return Err(GeoError::MalformedShapefile(format!(
            "{} records of {} bytes do not fit in {} bytes",
            record_count,
            record_len,
            r.remaining()
        )));
    }
    let mut rows = Vec::with_capacity(record_count);
    for _ in 0..record_count {
        let record = r.bytes(record_len)?;
        if record[0] == RECORD_DELETED {
            continue;
        }
        let mut properties = Properties::new();
        let mut offset = 1;
        for field in &fields {
            let raw = &record[offset..offset + field.length];
            offset += field.length;
            properties.insert(field.name.clone(), parse_field(field.kind, raw));
        }
        rows.push(properties);
    }
    Ok(rows)
}

fn parse_field(kind: u8, raw: &[u8]) -> Value {
    let text = String::from_utf8_lossy(raw);
    let text = text.trim_matches(|c: char| c == ' ' || c == '\0');
    match kind {
        b'N' | b'F' => {
            if text.is_empty() {
                Value::Null
            } else if let Ok(i) = text.parse::<i64>() {
                Value::from(i)
            } else {
                text.parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        b'L' => match text.chars().next() {
            Some('T' | 't' | 'Y' | 'y') => Value::Bool(true),
            Some('F' | 'f' | 'N' | 'n') => Value::Bool(false),
            _ => Value::Null,
        },
        _ => Value::String(text.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geojson_features::{Geometry, Position};
    use serde_json::json;

    fn feature(properties: Value) -> Feature {
        let properties = match properties {
            Value::Object(map) => map,
            _ => Properties::new(),
        };
        Feature::with_properties(Geometry::Point(Position::new(0.0, 0.0)), properties)
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 17).unwrap()
    }

    #[test]
    fn header_layout() {
        let features = vec![feature(json!({"id": 1, "name": "North", "crop": "corn"}))];
        let bytes = write_dbf(&features, date());

        let header_len = 32 + 3 * 32 + 1;
        let record_len = 1 + 3 * 20;
        assert_eq!(bytes.len(), header_len + record_len + 1);
        assert_eq!(&bytes[0..4], &[3, 124, 5, 17]);
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8..10], &(header_len as u16).to_le_bytes());
        assert_eq!(&bytes[10..12], &(record_len as u16).to_le_bytes());

        let crop = &bytes[32 + 2 * 32..32 + 3 * 32];
        assert_eq!(&crop[..11], b"CROP\0\0\0\0\0\0\0");
        assert_eq!(crop[11], b'C');
        assert_eq!(crop[16], 20);
        assert_eq!(bytes[header_len - 1], 0x0D);
        assert_eq!(*bytes.last().unwrap(), 0x1A);

        let record = &bytes[header_len..header_len + record_len];
        assert_eq!(record[0], 0x20);
        assert_eq!(&record[1..21], b"1                   ");
        assert_eq!(&record[21..41], b"North               ");
        assert_eq!(&record[41..61], b"corn                ");
    }

    #[test]
    fn long_values_are_truncated_to_field_width() {
        let features = vec![feature(json!({"id": 1, "name": "a name that is much longer than twenty"}))];
        let bytes = write_dbf(&features, date());
        let header_len = 32 + 2 * 32 + 1;
        assert_eq!(bytes.len(), header_len + 41 + 1);
        assert_eq!(&bytes[header_len + 21..header_len + 41], b"a name that is much ");
    }

    #[test]
    fn multibyte_values_never_split_characters() {
        let text = "ééééééééééé"; // 22 bytes
        let truncated = truncate_utf8(text, FIELD_WIDTH);
        assert_eq!(truncated.len(), 20);
        let features = vec![feature(json!({"id": 1, "name": "çççççççççççç"}))];
        let bytes = write_dbf(&features, date());
        let header_len = 32 + 2 * 32 + 1;
        let field = &bytes[header_len + 21..header_len + 41];
        assert_eq!(field.len(), 20);
        assert!(std::str::from_utf8(field).is_ok());
    }

    #[test]
    fn columns_are_capped_at_ten_in_discovery_order() {
        let mut props = serde_json::Map::new();
        for i in 0..12 {
            props.insert(format!("k{i}"), json!(i));
        }
        let names = field_names(&[feature(Value::Object(props))]);
        assert_eq!(names.len(), 10);
        assert_eq!(&names[..3], ["id", "name", "k0"]);
        assert_eq!(names[9], "k7");
    }

    #[test]
    fn missing_and_blank_values_are_empty() {
        assert_eq!(display_value(None), "");
        assert_eq!(display_value(Some(&json!(null))), "");
        assert_eq!(display_value(Some(&json!(0))), "");
        assert_eq!(display_value(Some(&json!(false))), "");
        assert_eq!(display_value(Some(&json!(2.0))), "2");
        assert_eq!(display_value(Some(&json!(12.5))), "12.5");
        assert_eq!(display_value(Some(&json!(true))), "true");
    }

    #[test]
    fn written_tables_read_back() {
        let features = vec![
            feature(json!({"id": 1, "name": "North", "acres": 40})),
            feature(json!({"id": 2, "name": "South"})),
        ];
        let rows = read_dbf(&write_dbf(&features, date())).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["NAME"], "North");
        assert_eq!(rows[0]["ACRES"], "40");
        assert_eq!(rows[1]["ACRES"], "");
    }

    #[test]
    fn numeric_and_logical_fields_are_typed() {
        assert_eq!(parse_field(b'N', b"   42"), json!(42));
        assert_eq!(parse_field(b'F', b" 1.25 "), json!(1.25));
        assert_eq!(parse_field(b'N', b"     "), Value::Null);
        assert_eq!(parse_field(b'L', b"T"), json!(true));
        assert_eq!(parse_field(b'L', b"?"), Value::Null);
        assert_eq!(parse_field(b'C', b"corn   "), json!("corn"));
    }

    #[test]
    fn truncated_table_is_rejected() {
        let bytes = write_dbf(&[feature(json!({"id": 1}))], date());
        assert!(read_dbf(&bytes[..bytes.len() - 10]).is_err());
    }

    #[test]
    fn oversized_record_count_is_rejected() {
        let mut bytes = write_dbf(&[feature(json!({"id": 1}))], date());
        bytes[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(read_dbf(&bytes), Err(GeoError::MalformedShapefile(_))));
    }

    #[test]
    fn area_attribute_keeps_two_decimals() {
        let features = [
            feature(json!({"_area_acres": 0.0, "other": 0.0})),
            feature(json!({"_area_acres": 12.3, "other": 12.3})),
        ];
        let rows = read_dbf(&write_dbf(&features, date())).unwrap();
        assert_eq!(rows[0]["_AREA_ACRE"], "0.00");
        assert_eq!(rows[0]["OTHER"], "");
        assert_eq!(rows[1]["_AREA_ACRE"], "12.30");
        assert_eq!(rows[1]["OTHER"], "12.3");
    }
}
