//! Splitting a raster into a grid of GeoTIFF tiles.
//!
//! Every window from [`GridPartitioner`] is read from the source, given the
//! transform [`AffineTransform::compose`] derives for its offset, and
//! written as `tile_x{offset_x:05}_y{offset_y:05}.tif` in a flat folder.
//!
//! # Example
//!
//! ```rust,no_run
//! use geotiler::{RasterDescriptor, TileOptions, TileWriter};
//!
//! fn main() -> geotiler::Result<()> {
//!     let raster = RasterDescriptor::open("scene.tif")?;
//!     let written = TileWriter::new(TileOptions::default().with_tile_size(512).with_parallel(true))
//!         .write_tiles(&raster, "tiles/")?;
//!     println!("{written} tiles");
//!     Ok(())
//! }
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tracing::{debug, info};

use crate::error::Result;
use crate::geometry::{AffineTransform, Window};
use crate::io::{GeoTiffCompression, RasterHandle, RasterIo, DEFAULT_IO};
use crate::naming::{tile_name, DEFAULT_EXTENSION, MAX_PADDED_OFFSET};
use crate::partition::GridPartitioner;
use crate::raster::RasterDescriptor;

/// Options for tile generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileOptions {
    /// Nominal tile edge in pixels; edge tiles are clipped.
    pub tile_size: usize,
    /// Write each tile with internal 256x256 TIFF tiling instead of strips.
    pub tiled: bool,
    /// Requested tile compression. Reserved: tiles are written uncompressed.
    pub compression: String,
    /// Requested photometric interpretation. Reserved: not yet applied.
    pub photometric: String,
    /// Process windows on the rayon pool.
    pub parallel: bool,
    /// Tile file extension.
    pub extension: String,
}

impl Default for TileOptions {
    fn default() -> Self {
        Self {
            tile_size: 1024,
            tiled: false,
            compression: "JPEG".to_string(),
            photometric: "RGB".to_string(),
            parallel: false,
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }
}

impl TileOptions {
    #[must_use]
    pub fn with_tile_size(mut self, tile_size: usize) -> Self {
        self.tile_size = tile_size;
        self
    }

    #[must_use]
    pub fn with_tiled(mut self, tiled: bool) -> Self {
        self.tiled = tiled;
        self
    }

    #[must_use]
    pub fn with_compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = compression.into();
        self
    }

    #[must_use]
    pub fn with_photometric(mut self, photometric: impl Into<String>) -> Self {
        self.photometric = photometric.into();
        self
    }

    #[must_use]
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// A tile written to storage.
#[derive(Debug, Clone, PartialEq)]
pub struct TileArtifact {
    /// Region of the parent raster this tile covers.
    pub window: Window,
    /// Parent transform composed with the window offset.
    pub transform: AffineTransform,
    /// File name, encoding the window offset.
    pub name: String,
    pub path: PathBuf,
}

/// Writes the tiles of a raster through a [`RasterIo`] backend.
pub struct TileWriter<'a> {
    io: &'a dyn RasterIo,
    options: TileOptions,
}

impl TileWriter<'static> {
    /// Tile writer using the GeoTIFF backend.
    #[must_use]
    pub fn new(options: TileOptions) -> Self {
        Self {
            io: &DEFAULT_IO,
            options,
        }
    }
}

impl<'a> TileWriter<'a> {
    /// Tile writer using a custom backend.
    #[must_use]
    pub fn with_io(io: &'a dyn RasterIo, options: TileOptions) -> Self {
        Self { io, options }
    }

    #[must_use]
    pub fn options(&self) -> &TileOptions {
        &self.options
    }

    /// Tile `descriptor` into `output_folder` and return the number of
    /// tiles written.
    ///
    /// The folder is created if missing. A failing window aborts the call;
    /// tiles already written stay on disk. Every handle opened on the source
    /// is closed either way.
    ///
    /// # Errors
    /// Returns [`TilerError::InvalidTileSize`](crate::TilerError::InvalidTileSize)
    /// for a zero tile size, or the first I/O error hit.
    pub fn write_tiles<P: AsRef<Path>>(&self, descriptor: &RasterDescriptor, output_folder: P) -> Result<usize> {
        Ok(self.write_artifacts(descriptor, output_folder)?.len())
    }

    /// Like [`TileWriter::write_tiles`] but returns every written tile, in
    /// partition order.
    ///
    /// # Errors
    /// See [`TileWriter::write_tiles`].
    pub fn write_artifacts<P: AsRef<Path>>(
        &self,
        descriptor: &RasterDescriptor,
        output_folder: P,
    ) -> Result<Vec<TileArtifact>> {
        let grid = GridPartitioner::new(descriptor.width, descriptor.height, self.options.tile_size)?;
        let folder = output_folder.as_ref();
        fs::create_dir_all(folder)?;

        if descriptor.width.max(descriptor.height) > MAX_PADDED_OFFSET + 1 {
            debug!(
                width = descriptor.width,
                height = descriptor.height,
                "Offsets exceed five digits; tile names will not sort lexically"
            );
        }
        debug!(
            compression = %self.options.compression,
            photometric = %self.options.photometric,
            "Tile compression and photometric options are reserved and not applied"
        );

        let artifacts = if self.options.parallel {
            let mut artifacts = grid
                .windows()
                .par_bridge()
                .map(|window| -> Result<TileArtifact> {
                    let mut handle = self.io.open(&descriptor.path)?;
                    let result = self.write_tile(handle.as_mut(), descriptor, &window, folder);
                    let closed = handle.close();
                    let artifact = result?;
                    closed?;
                    Ok(artifact)
                })
                .collect::<Result<Vec<_>>>()?;
            // Offsets order exactly like the column-major-outer enumeration
            artifacts.sort_by_key(|a| (a.window.offset_x, a.window.offset_y));
            artifacts
        } else {
            let mut handle = self.io.open(&descriptor.path)?;
            let result = grid
                .windows()
                .map(|window| self.write_tile(handle.as_mut(), descriptor, &window, folder))
                .collect::<Result<Vec<_>>>();
            let closed = handle.close();
            let artifacts = result?;
            closed?;
            artifacts
        };

        info!(
            source = %descriptor.path.display(),
            folder = %folder.display(),
            tiles = artifacts.len(),
            tile_size = self.options.tile_size,
            "Wrote tiles"
        );
        Ok(artifacts)
    }

    fn write_tile(
        &self,
        handle: &mut dyn RasterHandle,
        descriptor: &RasterDescriptor,
        window: &Window,
        folder: &Path,
    ) -> Result<TileArtifact> {
        let pixels = handle.read_window(window)?;
        let transform = window.transform(&descriptor.transform);

        let mut metadata = descriptor.metadata();
        metadata.width = window.width;
        metadata.height = window.height;
        metadata.transform = transform;
        metadata.tiled = self.options.tiled;
        metadata.block_size = None;
        metadata.compression = GeoTiffCompression::None;

        let name = tile_name(window.offset_x, window.offset_y, &self.options.extension);
        let path = folder.join(&name);
        self.io.write(&path, &pixels, &metadata)?;
        debug!(tile = %name, width = window.width, height = window.height, "Wrote tile");

        Ok(TileArtifact {
            window: *window,
            transform,
            name,
            path,
        })
    }
}

impl RasterDescriptor {
    /// Split this raster into tiles under `output_folder`.
    ///
    /// # Errors
    /// See [`TileWriter::write_tiles`].
    pub fn generate_tiles<P: AsRef<Path>>(&self, output_folder: P, options: &TileOptions) -> Result<usize> {
        TileWriter::new(options.clone()).write_tiles(self, output_folder)
    }
}
