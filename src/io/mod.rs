//! Raster I/O boundary.
//!
//! The tiling and mosaic code only talks to rasters through [`RasterIo`]
//! and [`RasterHandle`], so alternative backends (or in-memory fakes in
//! tests) can stand in for the GeoTIFF implementation in [`geotiff`].

pub mod decode_cache;
pub mod geotiff;

use std::path::Path;

pub use geotiff::{GeoTiffCompression, GeoTiffHandle, GeoTiffIo, GeoTiffWriter};

use crate::error::Result;
use crate::geometry::Window;
use crate::raster::{PixelBuffer, RasterDescriptor, RasterMetadata};

/// Backend used when no other [`RasterIo`] is supplied.
pub(crate) static DEFAULT_IO: GeoTiffIo = GeoTiffIo::new();

/// An open raster.
///
/// Handles release their underlying resources when dropped; [`close`]
/// does the same explicitly and reports any error doing so.
///
/// [`close`]: RasterHandle::close
pub trait RasterHandle: Send {
    /// Metadata snapshot taken when the raster was opened.
    fn descriptor(&self) -> &RasterDescriptor;

    /// Read the pixels under `window`.
    ///
    /// # Errors
    /// Returns an error if the window is outside the raster or decoding fails.
    fn read_window(&mut self, window: &Window) -> Result<PixelBuffer>;

    /// Read every pixel.
    ///
    /// # Errors
    /// Returns an error if decoding fails.
    fn read_all(&mut self) -> Result<PixelBuffer> {
        let descriptor = self.descriptor();
        let window = Window::full(descriptor.width, descriptor.height);
        self.read_window(&window)
    }

    /// Release the handle.
    ///
    /// # Errors
    /// Returns an error if releasing the underlying resource fails.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Opens and writes rasters.
pub trait RasterIo: Send + Sync {
    /// Open a raster for reading.
    ///
    /// # Errors
    /// Returns an error if the file is missing or not a supported raster.
    fn open(&self, path: &Path) -> Result<Box<dyn RasterHandle>>;

    /// Persist `buffer` at `path` described by `metadata`.
    ///
    /// Implementations must not leave a partially written file at `path`
    /// when they fail.
    ///
    /// # Errors
    /// Returns an error if encoding or writing fails.
    fn write(&self, path: &Path, buffer: &PixelBuffer, metadata: &RasterMetadata) -> Result<()>;
}
