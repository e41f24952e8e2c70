//! Tile large GeoTIFF rasters into a grid of georeferenced tiles and
//! reassemble tiles into a single mosaic.
//!
//! ## Architecture
//!
//! The library is organized into several modules:
//!
//! - [`geometry`]: [`AffineTransform`], [`Window`], [`BoundingBox`] and [`Crs`]
//! - [`partition`]: Column-major window enumeration via [`GridPartitioner`]
//! - [`tiler`]: Tile generation with the [`TileWriter`] builder
//! - [`extent`]: Common output grid for a merge ([`resolve_extent`])
//! - [`mosaic`]: Last-write-wins merging with [`MosaicCompositor`]
//! - [`io`]: Raster I/O boundary ([`RasterIo`]) and the pure-Rust GeoTIFF backend
//! - [`source`]: Tile directory listing with explicit input order
//! - [`naming`]: `tile_x{x:05}_y{y:05}` tile names and their parsing
//! - [`raster`]: [`RasterDescriptor`], [`PixelBuffer`] and sample types
//!
//! ## Example
//!
//! ```rust,no_run
//! use geotiler::{MergeOptions, MosaicCompositor, RasterDescriptor, ScanOptions, TileOptions};
//!
//! fn main() -> geotiler::Result<()> {
//!     let raster = RasterDescriptor::open("scene.tif")?;
//!     raster.generate_tiles("tiles/", &TileOptions::default())?;
//!
//!     let outcome = MosaicCompositor::new(MergeOptions::default())
//!         .merge_directory("tiles/", "mosaic.tif", &ScanOptions::default())?;
//!     assert!(outcome.is_complete());
//!     Ok(())
//! }
//! ```

// ============================================================================
// Public modules
// ============================================================================

pub mod casting;
pub mod error;
pub mod extent;
pub mod geometry;
pub mod io;
pub mod mosaic;
pub mod naming;
pub mod partition;
pub mod raster;
pub mod source;
pub mod tiler;

// ============================================================================
// Errors
// ============================================================================

pub use error::{Result, TilerError};

// ============================================================================
// Geometry
// ============================================================================

pub use geometry::{AffineTransform, BoundingBox, Crs, GeoKeys, Window};

// ============================================================================
// Tiling
// ============================================================================
// Primary API: TileWriter::new(options).write_tiles(&descriptor, folder)

pub use partition::{GridPartitioner, Windows};
pub use tiler::{TileArtifact, TileOptions, TileWriter};
pub use naming::{parse_tile_name, tile_name};

// ============================================================================
// Merging
// ============================================================================
// Primary API: MosaicCompositor::new(options).compose(&paths, output)

pub use extent::{resolve_extent, Extent};
pub use mosaic::{
    FailureStage, InputFailure, MergeOptions, MergeOutcome, MosaicCompositor, MosaicGrid, DEFAULT_MAX_SAMPLES,
};

// ============================================================================
// Rasters & I/O
// ============================================================================

pub use raster::{Compression, DataType, PixelBuffer, RasterDescriptor, RasterMetadata};
pub use io::{GeoTiffCompression, GeoTiffIo, GeoTiffWriter, RasterHandle, RasterIo};

// ============================================================================
// Source Discovery
// ============================================================================

pub use source::{InputOrder, ScanOptions, TileDirectory, TileEntry};
