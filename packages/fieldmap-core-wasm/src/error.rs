//! Error types for the field map core

use thiserror::Error;

/// Failure taxonomy shared by the normalizer, clipper, encoder and loader
#[derive(Error, Debug)]
pub enum GeoError {
    #[error("Invalid GeoJSON data: {0}")]
    InvalidGeometry(String),

    #[error("Failed to process boundary: {0}")]
    BoundaryProcessingFailed(String),

    #[error("Could not create boundary polygon")]
    NoBoundaryPolygon,

    #[error("Feature {index}: {reason}")]
    PerFeatureClipError { index: usize, reason: String },

    #[error("Export failed: {0}")]
    ExportError(#[source] Box<GeoError>),

    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Missing .{0} file")]
    MissingShapefilePart(&'static str),

    #[error("Malformed shapefile: {0}")]
    MalformedShapefile(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Archive error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("{0}")]
    Other(String),
}

impl GeoError {
    /// Wrap any failure as the single fatal error of an export.
    /// Already-wrapped errors are passed through untouched.
    pub fn into_export_error(self) -> GeoError {
        match self {
            GeoError::ExportError(_) => self,
            other => GeoError::ExportError(Box::new(other)),
        }
    }
}

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, GeoError>;
