//! Error types shared by the acquisition and mosaicking modules.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("XML parse error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Array shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid area of interest: {0}")]
    InvalidArea(String),

    #[error("Polygon has zero extent: {width:.3} x {height:.3} m")]
    DegenerateExtent { width: f64, height: f64 },

    #[error("Invalid date `{0}`")]
    InvalidDate(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid raster: {0}")]
    InvalidRaster(String),

    #[error("No tiles available for mosaicking")]
    NoTiles,

    #[error("Mosaic size mismatch: grid holds {expected} pixels but tiles cover {found} distinct coordinates")]
    SizeMismatch { expected: usize, found: usize },
}

pub type Result<T> = std::result::Result<T, Error>;
