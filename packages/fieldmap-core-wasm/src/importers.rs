//! Loading user-supplied vector files into a feature collection.
//!
//! GeoJSON (optionally gzipped), zipped shapefiles and loose `.shp`/`.dbf`
//! sets are accepted. Coordinates are taken as WGS84; `.prj` is ignored.

use std::collections::HashMap;
use std::io::{Cursor, Read};

use flate2::read::GzDecoder;
use zip::ZipArchive;

use crate::console_log;
use crate::error::{GeoError, Result};
use crate::geojson_features::FeatureCollection;
use crate::normalize::normalize_str;
use crate::shapefile_reader::{read_shapefile, ShapefileParts};

/// A file handed over by the user, named as on disk
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        InputFile {
            name: name.into(),
            bytes: bytes.into(),
        }
    }

    /// Lower-cased extension, empty when there is none
    pub fn extension(&self) -> String {
        extension_of(&self.name)
    }
}

fn extension_of(name: &str) -> String {
    match name.rsplit_once('.') {
        Some((_, ext)) => ext.to_ascii_lowercase(),
        None => String::new(),
    }
}

/// Detect the gzip magic number
pub fn is_gzipped(data: &[u8]) -> bool {
    data.len() >= 2 && data[0] == 0x1F && data[1] == 0x8B
}

/// Gunzip `data` if it is gzipped, otherwise return it unchanged
pub fn decompress_gzip(data: &[u8]) -> Result<Vec<u8>> {
    if !is_gzipped(data) {
        return Ok(data.to_vec());
    }

    let mut decoder = GzDecoder::new(data);
    let mut decompressed_data = Vec::new();
    decoder.read_to_end(&mut decompressed_data)?;

    Ok(decompressed_data)
}

/// Loads one layer. The format is chosen by the first file's extension.
pub fn load_vector_layer(files: &[InputFile]) -> Result<FeatureCollection> {
    let first = files
        .first()
        .ok_or_else(|| GeoError::UnsupportedFormat("no file supplied".to_string()))?;

    let fc = match first.extension().as_str() {
        "geojson" | "json" => load_geojson(&first.bytes)?,
        "zip" => load_zipped_shapefiles(&first.bytes)?,
        "shp" | "dbf" | "shx" => load_shapefile_set(files)?,
        _ => return Err(GeoError::UnsupportedFormat(first.name.clone())),
    };

    console_log!("Loaded {} features from {}", fc.len(), first.name);
    Ok(fc)
}

fn load_geojson(bytes: &[u8]) -> Result<FeatureCollection> {
    let data = decompress_gzip(bytes)?;
    let text = std::str::from_utf8(&data)
        .map_err(|e| GeoError::InvalidGeometry(format!("file is not UTF-8: {}", e)))?;
    normalize_str(text.trim_start_matches('\u{feff}'))
}

fn load_shapefile_set(files: &[InputFile]) -> Result<FeatureCollection> {
    let find = |ext: &str| files.iter().find(|f| f.extension() == ext);
    let shp = find("shp").ok_or(GeoError::MissingShapefilePart("shp"))?;
    let dbf = find("dbf").ok_or(GeoError::MissingShapefilePart("dbf"))?;

    read_shapefile(ShapefileParts {
        shp: &shp.bytes,
        dbf: &dbf.bytes,
        shx: find("shx").map(|f| f.bytes.as_slice()),
    })
}

/// Decodes every `.shp` in the archive that has a `.dbf` next to it, in
/// archive order, into one collection.
fn load_zipped_shapefiles(bytes: &[u8]) -> Result<FeatureCollection> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;

    // stem (lower-cased path without extension) -> extension -> contents
    let mut entries: HashMap<String, HashMap<String, Vec<u8>>> = HashMap::new();
    let mut stems = Vec::new();
    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        if file.is_dir() || file.name().starts_with("__MACOSX/") {
            continue;
        }
        let name = file.name().to_string();
        let ext = extension_of(&name);
        if !matches!(ext.as_str(), "shp" | "dbf" | "shx") {
            continue;
        }
        let stem = name[..name.len() - ext.len() - 1].to_ascii_lowercase();
        let mut contents = Vec::new();
        file.read_to_end(&mut contents)?;
        if ext == "shp" {
            stems.push(stem.clone());
        }
        entries.entry(stem).or_default().insert(ext, contents);
    }

    if stems.is_empty() {
        return Err(GeoError::MissingShapefilePart("shp"));
    }

    let mut features = Vec::new();
    let mut sets = 0;
    for stem in &stems {
        let Some(set) = entries.get(stem) else { continue };
        let (Some(shp), Some(dbf)) = (set.get("shp"), set.get("dbf")) else {
            console_log!("Skipping {}.shp without a .dbf", stem);
            continue;
        };
        let fc = read_shapefile(ShapefileParts {
            shp,
            dbf,
            shx: set.get("shx").map(Vec::as_slice),
        })?;
        features.extend(fc.features);
        sets += 1;
    }

    if sets == 0 {
        return Err(GeoError::MissingShapefilePart("dbf"));
    }
    Ok(FeatureCollection::new(features))
}
