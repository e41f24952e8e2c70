//! Error type shared by the tiling and mosaic pipelines.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, TilerError>;

/// Errors raised while partitioning, reading, writing or mosaicking rasters.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum TilerError {
    /// A tile dimension of zero or less was requested.
    #[error("invalid tile size {0}: must be greater than zero")]
    InvalidTileSize(i64),

    /// The transform's linear part is singular and cannot be inverted.
    #[error("degenerate transform: determinant {determinant} is zero")]
    DegenerateTransform { determinant: f64 },

    /// A merge was requested without any resolvable input.
    #[error("no input rasters to merge")]
    EmptyInputSet,

    /// Inputs to a merge declare different coordinate reference systems.
    #[error("incompatible CRS: expected {expected}, found {found} in {path}")]
    IncompatibleCrs {
        expected: String,
        found: String,
        path: PathBuf,
    },

    /// A window does not lie inside the raster it addresses.
    #[error("window {window} is outside raster of {width}x{height}")]
    InvalidWindow {
        window: String,
        width: usize,
        height: usize,
    },

    /// The file uses a layout or sample type this crate cannot handle.
    #[error("unsupported raster format: {0}")]
    UnsupportedFormat(String),

    /// Pixel data or metadata is inconsistent.
    #[error("invalid raster data: {0}")]
    InvalidData(String),

    /// A merge in all-or-nothing mode hit a failing input.
    #[error("merge aborted: {count} input(s) failed, first: {first}")]
    MergeAborted { count: usize, first: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TIFF error: {0}")]
    Tiff(#[from] tiff::TiffError),

    #[error("directory walk error: {0}")]
    Walk(#[from] walkdir::Error),
}
