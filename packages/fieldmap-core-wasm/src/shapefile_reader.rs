//! Decoding of `.shp`/`.shx`/`.dbf` sets back into GeoJSON features.
//!
//! Z and M variants are read as their 2D base type. Null shapes are skipped
//! together with their attribute row.

use crate::bbox_filter::{is_point_in_ring, ring_signed_area, BoundingBox};
use crate::byte_buffer::ByteReader;
use crate::dbf::read_dbf;
use crate::error::{GeoError, Result};
use crate::geojson_features::{Feature, FeatureCollection, Geometry, Position, Properties};
use crate::shapefile_writer::{ShapeType, FILE_CODE, HEADER_LEN, RECORD_HEADER_LEN};

/// The files of one shapefile set. Only `.shp` and `.dbf` are required.
#[derive(Debug, Clone, Copy)]
pub struct ShapefileParts<'a> {
    pub shp: &'a [u8],
    pub dbf: &'a [u8],
    pub shx: Option<&'a [u8]>,
}

/// Main file header fields
#[derive(Debug, Clone, PartialEq)]
pub struct ShapefileHeader {
    pub shape_type: ShapeType,
    /// Declared file length in bytes
    pub file_len: usize,
    pub bbox: BoundingBox,
}

/// Location of one record in the `.shp`, in bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexEntry {
    pub offset: usize,
    pub content_len: usize,
}

fn malformed(msg: impl Into<String>) -> GeoError {
    GeoError::MalformedShapefile(msg.into())
}

/// Byte size of `count` units of `unit` bytes, refusing to overflow `usize`
fn byte_len(count: usize, unit: usize) -> Result<usize> {
    count
        .checked_mul(unit)
        .ok_or_else(|| malformed(format!("{} x {} bytes overflows", count, unit)))
}

/// A non-negative 16-bit word count from a header field, in bytes
fn words_to_bytes(words: i32, what: &str) -> Result<usize> {
    let words = usize::try_from(words).map_err(|_| malformed(format!("negative {} {}", what, words)))?;
    byte_len(words, 2)
}

/// Z/M variants share the layout of their base type up to the M/Z arrays
fn base_shape_type(code: i32) -> Option<ShapeType> {
    match code {
        11 | 13 | 15 | 18 | 21 | 23 | 25 | 28 => ShapeType::from_code(code % 10),
        _ => ShapeType::from_code(code),
    }
}

pub fn read_header(data: &[u8]) -> Result<ShapefileHeader> {
    if data.len() < HEADER_LEN {
        return Err(malformed("header is shorter than 100 bytes"));
    }
    let mut r = ByteReader::new(data);
    let code = r.i32_be()?;
    if code != FILE_CODE {
        return Err(malformed(format!("bad file code {}", code)));
    }
    r.seek(24)?;
    let words = r.i32_be()?;
    let _version = r.i32_le()?;
    let type_code = r.i32_le()?;
    let shape_type = base_shape_type(type_code)
        .ok_or_else(|| malformed(format!("unsupported shape type {}", type_code)))?;
    let bbox = BoundingBox {
        x_min: r.f64_le()?,
        y_min: r.f64_le()?,
        x_max: r.f64_le()?,
        y_max: r.f64_le()?,
    };
    Ok(ShapefileHeader {
        shape_type,
        file_len: usize::try_from(words).unwrap_or(0) * 2,
        bbox,
    })
}

/// Record locations from a `.shx` index
pub fn read_shx(data: &[u8]) -> Result<Vec<IndexEntry>> {
    read_header(data)?;
    let mut r = ByteReader::new(data);
    r.seek(HEADER_LEN)?;
    let mut entries = Vec::with_capacity(r.remaining() / RECORD_HEADER_LEN);
    while r.remaining() >= RECORD_HEADER_LEN {
        let offset = r.i32_be()?;
        let length = r.i32_be()?;
        entries.push(IndexEntry {
            offset: words_to_bytes(offset, "index offset")?,
            content_len: words_to_bytes(length, "index length")?,
        });
    }
    Ok(entries)
}

/// Every record of a `.shp`, in file order. `None` marks a null shape.
pub fn read_shp(data: &[u8]) -> Result<Vec<Option<Geometry>>> {
    read_header(data)?;
    let mut r = ByteReader::new(data);
    r.seek(HEADER_LEN)?;
    let mut shapes = Vec::new();
    while r.remaining() >= RECORD_HEADER_LEN {
        let _number = r.i32_be()?;
        let length = words_to_bytes(r.i32_be()?, "record length")?;
        shapes.push(read_record(r.bytes(length)?)?);
    }
    Ok(shapes)
}

/// Records at the locations given by an index
pub fn read_shp_indexed(data: &[u8], index: &[IndexEntry]) -> Result<Vec<Option<Geometry>>> {
    read_header(data)?;
    let mut r = ByteReader::new(data);
    index
        .iter()
        .map(|entry| {
            let start = entry
                .offset
                .checked_add(RECORD_HEADER_LEN)
                .ok_or_else(|| malformed(format!("record offset {} overflows", entry.offset)))?;
            r.seek(start)?;
            read_record(r.bytes(entry.content_len)?)
        })
        .collect()
}

/// Decodes a shapefile set into features, pairing records with attribute
/// rows by position.
pub fn read_shapefile(parts: ShapefileParts<'_>) -> Result<FeatureCollection> {
    let shapes = match parts.shx {
        Some(shx) => read_shp_indexed(parts.shp, &read_shx(shx)?)?,
        None => read_shp(parts.shp)?,
    };
    let mut rows = read_dbf(parts.dbf)?.into_iter();

    let features = shapes
        .into_iter()
        .filter_map(|shape| {
            let properties = rows.next().unwrap_or_else(Properties::new);
            shape.map(|geometry| Feature::with_properties(geometry, properties))
        })
        .collect();
    Ok(FeatureCollection::new(features))
}

fn read_record(content: &[u8]) -> Result<Option<Geometry>> {
    let mut r = ByteReader::new(content);
    let code = r.i32_le()?;
    let shape_type =
        base_shape_type(code).ok_or_else(|| malformed(format!("unsupported shape type {}", code)))?;

    let geometry = match shape_type {
        ShapeType::Null => return Ok(None),
        ShapeType::Point => Geometry::Point(read_position(&mut r)?),
        ShapeType::MultiPoint => {
            r.bytes(32)?;
            let n = read_count(&mut r)?;
            Geometry::MultiPoint(read_positions(&mut r, n)?)
        }
        ShapeType::PolyLine => {
            let mut lines = read_parts(&mut r)?;
            if lines.len() == 1 {
                Geometry::LineString(lines.remove(0))
            } else {
                Geometry::MultiLineString(lines)
            }
        }
        ShapeType::Polygon => {
            let mut polygons = group_rings(read_parts(&mut r)?);
            if polygons.len() == 1 {
                Geometry::Polygon(polygons.remove(0))
            } else {
                Geometry::MultiPolygon(polygons)
            }
        }
    };
    Ok(Some(geometry))
}

fn read_position(r: &mut ByteReader<'_>) -> Result<Position> {
    Ok(Position::new(r.f64_le()?, r.f64_le()?))
}

fn read_positions(r: &mut ByteReader<'_>, n: usize) -> Result<Vec<Position>> {
    if byte_len(n, 16)? > r.remaining() {
        return Err(malformed(format!("{} points do not fit the record", n)));
    }
    (0..n).map(|_| read_position(r)).collect()
}

fn read_count(r: &mut ByteReader<'_>) -> Result<usize> {
    let n = r.i32_le()?;
    usize::try_from(n).map_err(|_| malformed(format!("negative count {}", n)))
}

/// Splits the point array of a PolyLine/Polygon record at its part starts
fn read_parts(r: &mut ByteReader<'_>) -> Result<Vec<Vec<Position>>> {
    r.bytes(32)?;
    let num_parts = read_count(r)?;
    let num_points = read_count(r)?;
    if byte_len(num_parts, 4)? > r.remaining() {
        return Err(malformed(format!("{} parts do not fit the record", num_parts)));
    }
    let starts = (0..num_parts).map(|_| read_count(r)).collect::<Result<Vec<_>>>()?;
    let points = read_positions(r, num_points)?;

    let mut parts = Vec::with_capacity(num_parts);
    for (i, &start) in starts.iter().enumerate() {
        let end = starts.get(i + 1).copied().unwrap_or(num_points);
        if start > end || end > num_points {
            return Err(malformed(format!("part {} spans {}..{}", i, start, end)));
        }
        parts.push(points[start..end].to_vec());
    }
    Ok(parts)
}

/// Groups rings into polygons. A ring whose first vertex lies inside an
/// earlier outer ring of opposite winding is a hole of it; any other ring
/// starts a new polygon. This accepts both shapefile (clockwise outer) and
/// GeoJSON (counter-clockwise outer) winding.
fn group_rings(rings: Vec<Vec<Position>>) -> Vec<Vec<Vec<Position>>> {
    let mut polygons: Vec<Vec<Vec<Position>>> = Vec::new();
    for ring in rings {
        let winding = ring_signed_area(&ring).signum();
        let owner = ring.first().and_then(|first| {
            polygons.iter().position(|polygon| {
                let outer = &polygon[0];
                ring_signed_area(outer).signum() == -winding && is_point_in_ring(first, outer)
            })
        });
        match owner {
            Some(i) => polygons[i].push(ring),
            None => polygons.push(vec![ring]),
        }
    }
    polygons
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapefile_writer::encode_bucket;
    use chrono::NaiveDate;
    use serde_json::json;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 2).unwrap()
    }

    fn ring(coords: &[(f64, f64)]) -> Vec<Position> {
        coords.iter().map(|&(x, y)| Position::new(x, y)).collect()
    }

    fn square(x0: f64, y0: f64, size: f64, clockwise: bool) -> Vec<Position> {
        let mut r = ring(&[
            (x0, y0),
            (x0 + size, y0),
            (x0 + size, y0 + size),
            (x0, y0 + size),
            (x0, y0),
        ]);
        if clockwise {
            r.reverse();
        }
        r
    }

    #[test]
    fn points_survive_export() {
        let features: Vec<Feature> = (0..5)
            .map(|i| {
                Feature::with_properties(
                    Geometry::Point(Position::new(-96.0 + i as f64, 39.0 + i as f64 / 10.0)),
                    json!({"id": i + 1, "name": format!("Well {}", i + 1)})
                        .as_object()
                        .cloned()
                        .unwrap(),
                )
            })
            .collect();
        let set = encode_bucket(&features, ShapeType::Point, date()).unwrap();

        let header = read_header(&set.shp).unwrap();
        assert_eq!(header.shape_type, ShapeType::Point);
        assert_eq!(header.file_len, set.shp.len());
        assert_eq!(header.bbox.x_min, -96.0);
        assert_eq!(header.bbox.x_max, -92.0);

        let fc = read_shapefile(ShapefileParts {
            shp: &set.shp,
            dbf: &set.dbf,
            shx: None,
        })
        .unwrap();
        assert_eq!(fc.len(), 5);
        for (i, (read, written)) in fc.iter().zip(&features).enumerate() {
            assert_eq!(read.geometry, written.geometry);
            assert_eq!(read.properties["NAME"], written.properties["name"]);
            // character fields come back as text
            assert_eq!(read.properties["ID"], json!((i + 1).to_string()));
        }
    }

    #[test]
    fn index_locates_the_same_records() {
        let features = vec![
            Feature::new(Geometry::LineString(ring(&[(0.0, 0.0), (1.0, 1.0)]))),
            Feature::new(Geometry::MultiLineString(vec![
                ring(&[(0.0, 0.0), (1.0, 0.0), (2.0, 0.0)]),
                ring(&[(5.0, 5.0), (6.0, 6.0)]),
            ])),
        ];
        let set = encode_bucket(&features, ShapeType::PolyLine, date()).unwrap();

        let index = read_shx(&set.shx).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index[0].offset, 100);
        assert_eq!(read_shp_indexed(&set.shp, &index).unwrap(), read_shp(&set.shp).unwrap());

        let shapes = read_shp(&set.shp).unwrap();
        assert_eq!(shapes[0], features[0].geometry);
        assert_eq!(shapes[1], features[1].geometry);
    }

    #[test]
    fn clockwise_outer_with_hole() {
        let outer = square(0.0, 0.0, 10.0, true);
        let hole = square(2.0, 2.0, 2.0, false);
        let separate = square(20.0, 0.0, 1.0, true);
        let polygons = group_rings(vec![outer.clone(), hole.clone(), separate.clone()]);
        assert_eq!(polygons, vec![vec![outer, hole], vec![separate]]);
    }

    #[test]
    fn geojson_winding_polygons_round_trip() {
        let with_hole = vec![square(0.0, 0.0, 10.0, false), square(2.0, 2.0, 2.0, true)];
        let second = vec![square(20.0, 0.0, 1.0, false)];
        let geometry = Geometry::MultiPolygon(vec![with_hole, second]);

        let set = encode_bucket(&[Feature::new(geometry.clone())], ShapeType::Polygon, date()).unwrap();
        let shapes = read_shp(&set.shp).unwrap();
        assert_eq!(shapes, vec![Some(geometry)]);
    }

    #[test]
    fn null_shapes_are_skipped_with_their_row() {
        let features = vec![
            Feature::new(Geometry::Point(Position::new(1.0, 1.0))),
            Feature::new(Geometry::Point(Position::new(2.0, 2.0))),
        ];
        let mut set = encode_bucket(&features, ShapeType::Point, date()).unwrap();
        // turn the first record into a null shape of the same length
        set.shp[108..112].copy_from_slice(&0i32.to_le_bytes());

        let fc = read_shapefile(ShapefileParts {
            shp: &set.shp,
            dbf: &set.dbf,
            shx: Some(&set.shx),
        })
        .unwrap();
        assert_eq!(fc.len(), 1);
        assert_eq!(fc.features[0].geometry, Some(Geometry::Point(Position::new(2.0, 2.0))));
        assert_eq!(fc.features[0].properties["ID"], json!("2"));
    }

    #[test]
    fn z_variants_read_as_2d() {
        let set = encode_bucket(
            &[Feature::new(Geometry::Point(Position::new(3.0, 4.0)))],
            ShapeType::Point,
            date(),
        )
        .unwrap();
        let mut shp = set.shp.clone();
        shp[32..36].copy_from_slice(&11i32.to_le_bytes());
        shp[108..112].copy_from_slice(&11i32.to_le_bytes());
        assert_eq!(read_header(&shp).unwrap().shape_type, ShapeType::Point);
        assert_eq!(read_shp(&shp).unwrap(), vec![Some(Geometry::Point(Position::new(3.0, 4.0)))]);
    }

    #[test]
    fn out_of_range_index_entries_are_rejected() {
        let set = encode_bucket(
            &[Feature::new(Geometry::Point(Position::new(1.0, 1.0)))],
            ShapeType::Point,
            date(),
        )
        .unwrap();

        let mut shx = set.shx.clone();
        shx[100..104].copy_from_slice(&i32::MAX.to_be_bytes());
        let shapes = read_shx(&shx).and_then(|index| read_shp_indexed(&set.shp, &index));
        assert!(matches!(shapes, Err(GeoError::MalformedShapefile(_))));

        let huge = [IndexEntry {
            offset: usize::MAX - 4,
            content_len: 20,
        }];
        assert!(matches!(
            read_shp_indexed(&set.shp, &huge),
            Err(GeoError::MalformedShapefile(_))
        ));

        shx[100..104].copy_from_slice(&(-1i32).to_be_bytes());
        assert!(matches!(read_shx(&shx), Err(GeoError::MalformedShapefile(_))));
    }

    #[test]
    fn malformed_input_is_reported() {
        assert!(matches!(read_shp(b"not a shapefile"), Err(GeoError::MalformedShapefile(_))));

        let set = encode_bucket(
            &[Feature::new(Geometry::LineString(ring(&[(0.0, 0.0), (1.0, 1.0)])))],
            ShapeType::PolyLine,
            date(),
        )
        .unwrap();
        let truncated = &set.shp[..set.shp.len() - 8];
        assert!(matches!(read_shp(truncated), Err(GeoError::MalformedShapefile(_))));
    }
}
