//! Reassembling rasters into a single mosaic.
//!
//! Inputs are placed on the grid from [`resolve_extent`] in the order they
//! are given, and a later input overwrites earlier ones wherever they
//! overlap. Merging is best-effort by default: an input that fails to open
//! or read is recorded in [`MergeOutcome::failures`] and skipped. Every
//! opened input is closed before [`MosaicCompositor::compose`] returns,
//! whatever the outcome.
//!
//! # Example
//!
//! ```rust,no_run
//! use geotiler::{MergeOptions, MosaicCompositor, ScanOptions};
//!
//! fn main() -> geotiler::Result<()> {
//!     let outcome = MosaicCompositor::new(MergeOptions::default())
//!         .merge_directory("tiles/", "mosaic.tif", &ScanOptions::default())?;
//!     for failure in &outcome.failures {
//!         eprintln!("skipped {}: {}", failure.path.display(), failure.error);
//!     }
//!     Ok(())
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::casting::{f64_to_pixel_index, round_to_i64, EXTENT_EPSILON};
use crate::error::{Result, TilerError};
use crate::extent::{resolve_extent, Extent};
use crate::geometry::{AffineTransform, BoundingBox};
use crate::io::{GeoTiffCompression, RasterHandle, RasterIo, DEFAULT_IO};
use crate::raster::{PixelBuffer, RasterDescriptor, RasterMetadata, GTIFF_DRIVER};
use crate::source::{ScanOptions, TileDirectory};

/// Largest mosaic, in samples, allocated unless raised.
pub const DEFAULT_MAX_SAMPLES: usize = 1 << 28;

/// Options for merging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOptions {
    /// Compression of the mosaic file.
    pub compression: GeoTiffCompression,
    /// Write the mosaic with internal tiles instead of strips.
    pub tiled: bool,
    /// Internal tile size when `tiled`.
    pub block_size: Option<(usize, usize)>,
    /// Fail with [`TilerError::EmptyInputSet`] instead of succeeding
    /// without output when there is nothing to merge.
    pub strict_empty: bool,
    /// Fail with [`TilerError::MergeAborted`] on the first input that cannot
    /// be opened or read, writing nothing.
    pub all_or_nothing: bool,
    /// Refuse output grids of more than this many samples
    /// (width x height x bands).
    pub max_samples: usize,
}

impl Default for MergeOptions {
    fn default() -> Self {
        Self {
            compression: GeoTiffCompression::None,
            tiled: false,
            block_size: None,
            strict_empty: false,
            all_or_nothing: false,
            max_samples: DEFAULT_MAX_SAMPLES,
        }
    }
}

impl MergeOptions {
    #[must_use]
    pub fn with_compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }

    #[must_use]
    pub fn with_tiled(mut self, tiled: bool, block_size: Option<(usize, usize)>) -> Self {
        self.tiled = tiled;
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub fn with_strict_empty(mut self, strict: bool) -> Self {
        self.strict_empty = strict;
        self
    }

    #[must_use]
    pub fn with_all_or_nothing(mut self, all_or_nothing: bool) -> Self {
        self.all_or_nothing = all_or_nothing;
        self
    }

    #[must_use]
    pub fn with_max_samples(mut self, max_samples: usize) -> Self {
        self.max_samples = max_samples;
        self
    }
}

/// Step at which an input failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    Open,
    Read,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Open => f.write_str("open"),
            Self::Read => f.write_str("read"),
        }
    }
}

/// An input skipped by a best-effort merge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFailure {
    pub path: PathBuf,
    pub stage: FailureStage,
    pub error: String,
}

impl InputFailure {
    fn new(path: &Path, stage: FailureStage, error: &TilerError) -> Self {
        Self {
            path: path.to_path_buf(),
            stage,
            error: error.to_string(),
        }
    }
}

impl fmt::Display for InputFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} failed): {}", self.path.display(), self.stage, self.error)
    }
}

/// Result of a merge.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MergeOutcome {
    /// Whether a mosaic file was written.
    pub written: bool,
    pub output_path: Option<PathBuf>,
    pub width: usize,
    pub height: usize,
    /// Inputs whose pixels made it into the mosaic.
    pub inputs_merged: usize,
    pub failures: Vec<InputFailure>,
}

impl MergeOutcome {
    /// True when every input was merged.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Output grid of a merge with its pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct MosaicGrid {
    pub transform: AffineTransform,
    pub width: usize,
    pub height: usize,
    pub buffer: PixelBuffer,
}

impl MosaicGrid {
    /// Grid of `extent` with every sample set to `fill`.
    ///
    /// # Errors
    /// Returns [`TilerError::InvalidData`] if the sample count overflows.
    pub fn new(extent: &Extent, bands: usize, fill: f64) -> Result<Self> {
        sample_count(extent, bands)?;
        Ok(Self {
            transform: extent.transform,
            width: extent.width,
            height: extent.height,
            buffer: PixelBuffer::filled(extent.width, extent.height, bands, fill),
        })
    }

    /// Copy `source`, georeferenced by `transform`, onto the grid.
    ///
    /// Samples equal to `nodata` are skipped so they never overwrite data
    /// already on the grid. Returns the number of grid pixels touched.
    ///
    /// # Errors
    /// Returns [`TilerError::DegenerateTransform`] if either transform
    /// cannot be inverted.
    pub fn place(&mut self, source: &PixelBuffer, transform: &AffineTransform, nodata: Option<f64>) -> Result<usize> {
        if same_scale(&self.transform, transform) {
            self.place_aligned(source, transform, nodata)
        } else {
            self.place_resampled(source, transform, nodata)
        }
    }

    fn place_aligned(&mut self, source: &PixelBuffer, transform: &AffineTransform, nodata: Option<f64>) -> Result<usize> {
        let (col, row) = self.transform.world_to_pixel(transform.c, transform.f)?;
        let (Some(offset_x), Some(offset_y)) = (round_to_i64(col), round_to_i64(row)) else {
            return Err(TilerError::InvalidData(format!(
                "placement offset ({col}, {row}) is out of range"
            )));
        };

        let mut touched = 0;
        for src_row in 0..source.height {
            let Some(dst_row) = shifted(offset_y, src_row, self.height) else {
                continue;
            };
            for src_col in 0..source.width {
                let Some(dst_col) = shifted(offset_x, src_col, self.width) else {
                    continue;
                };
                if self.copy_pixel(source, (src_col, src_row), (dst_col, dst_row), nodata) {
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    fn place_resampled(&mut self, source: &PixelBuffer, transform: &AffineTransform, nodata: Option<f64>) -> Result<usize> {
        let to_source = transform.inverse()?;
        let to_grid = self.transform.inverse()?;

        // Only visit grid pixels under the source footprint
        let footprint = BoundingBox::of_raster(transform, source.width, source.height);
        let Some(area) = BoundingBox::from_points(
            &[
                (footprint.minx, footprint.miny),
                (footprint.minx, footprint.maxy),
                (footprint.maxx, footprint.miny),
                (footprint.maxx, footprint.maxy),
            ]
            .map(|(x, y)| to_grid.pixel_to_world(x, y)),
        ) else {
            return Ok(0);
        };
        let cols = clamp_range(area.minx, area.maxx, self.width);
        let rows = clamp_range(area.miny, area.maxy, self.height);

        let mut touched = 0;
        for dst_row in rows {
            for dst_col in cols.clone() {
                #[allow(clippy::cast_precision_loss)]
                let (x, y) = self.transform.pixel_to_world(dst_col as f64 + 0.5, dst_row as f64 + 0.5);
                let (sc, sr) = to_source.pixel_to_world(x, y);
                let (Some(src_col), Some(src_row)) =
                    (f64_to_pixel_index(sc, source.width), f64_to_pixel_index(sr, source.height))
                else {
                    continue;
                };
                if self.copy_pixel(source, (src_col, src_row), (dst_col, dst_row), nodata) {
                    touched += 1;
                }
            }
        }
        Ok(touched)
    }

    fn copy_pixel(&mut self, source: &PixelBuffer, src: (usize, usize), dst: (usize, usize), nodata: Option<f64>) -> bool {
        let bands = self.buffer.bands.min(source.bands);
        let mut copied = false;
        for band in 0..bands {
            let Some(value) = source.get(src.0, src.1, band) else {
                continue;
            };
            if is_nodata(value, nodata) {
                continue;
            }
            self.buffer.set(dst.0, dst.1, band, value);
            copied = true;
        }
        copied
    }
}

/// Samples in a `bands`-band grid over `extent`.
fn sample_count(extent: &Extent, bands: usize) -> Result<usize> {
    extent
        .width
        .checked_mul(extent.height)
        .and_then(|n| n.checked_mul(bands))
        .ok_or_else(|| {
            TilerError::InvalidData(format!(
                "mosaic of {}x{}x{bands} samples overflows",
                extent.width, extent.height
            ))
        })
}

fn same_scale(a: &AffineTransform, b: &AffineTransform) -> bool {
    [(a.a, b.a), (a.b, b.b), (a.d, b.d), (a.e, b.e)]
        .iter()
        .all(|&(x, y)| (x - y).abs() <= EXTENT_EPSILON * x.abs().max(y.abs()))
}

/// `offset + index` if it falls inside `0..len`.
fn shifted(offset: i64, index: usize, len: usize) -> Option<usize> {
    let position = offset.checked_add(i64::try_from(index).ok()?)?;
    usize::try_from(position).ok().filter(|&p| p < len)
}

/// Whole-pixel index range covering `min..max`, clipped to `0..len`.
fn clamp_range(min: f64, max: f64, len: usize) -> std::ops::Range<usize> {
    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let clamp = |v: f64| v.max(0.0).min(len as f64) as usize;
    clamp(min.floor())..clamp(max.ceil())
}

#[allow(clippy::float_cmp)]
fn is_nodata(value: f64, nodata: Option<f64>) -> bool {
    match nodata {
        Some(n) if n.is_nan() => value.is_nan(),
        Some(n) => value == n,
        None => false,
    }
}

struct OpenInput {
    path: PathBuf,
    handle: Box<dyn RasterHandle>,
}

/// Merges rasters into one mosaic through a [`RasterIo`] backend.
pub struct MosaicCompositor<'a> {
    io: &'a dyn RasterIo,
    options: MergeOptions,
}

impl MosaicCompositor<'static> {
    /// Compositor using the GeoTIFF backend.
    #[must_use]
    pub fn new(options: MergeOptions) -> Self {
        Self {
            io: &DEFAULT_IO,
            options,
        }
    }
}

impl<'a> MosaicCompositor<'a> {
    /// Compositor using a custom backend.
    #[must_use]
    pub fn with_io(io: &'a dyn RasterIo, options: MergeOptions) -> Self {
        Self { io, options }
    }

    #[must_use]
    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Merge every raster in `input_folder`, ordered per `scan`, into
    /// `output_path`.
    ///
    /// # Errors
    /// Returns an error if the folder cannot be listed, or as
    /// [`MosaicCompositor::compose`].
    pub fn merge_directory<P, Q>(&self, input_folder: P, output_path: Q, scan: &ScanOptions) -> Result<MergeOutcome>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let listing = TileDirectory::scan(input_folder, scan)?;
        self.compose(&listing.paths(), output_path)
    }

    /// Merge `inputs`, in order, into a mosaic at `output_path`.
    ///
    /// With no inputs (or none that could be opened) nothing is written and
    /// the call succeeds unless [`MergeOptions::strict_empty`] is set.
    ///
    /// # Errors
    /// - [`TilerError::EmptyInputSet`] in strict mode with nothing to merge.
    /// - [`TilerError::IncompatibleCrs`] if inputs declare different CRSs.
    /// - [`TilerError::MergeAborted`] in all-or-nothing mode when an input fails.
    /// - Any error writing the mosaic or closing an input.
    pub fn compose<P: AsRef<Path>>(&self, inputs: &[P], output_path: impl AsRef<Path>) -> Result<MergeOutcome> {
        let output_path = output_path.as_ref();
        let mut failures = Vec::new();
        let mut opened = Vec::with_capacity(inputs.len());

        for path in inputs {
            let path = path.as_ref();
            match self.io.open(path) {
                Ok(handle) => opened.push(OpenInput {
                    path: path.to_path_buf(),
                    handle,
                }),
                Err(e) => {
                    warn!(input = %path.display(), error = %e, "Skipping input that failed to open");
                    failures.push(InputFailure::new(path, FailureStage::Open, &e));
                    if self.options.all_or_nothing {
                        close_all(opened)?;
                        return Err(aborted(&failures));
                    }
                }
            }
        }

        if opened.is_empty() {
            if self.options.strict_empty {
                return Err(TilerError::EmptyInputSet);
            }
            info!(output = %output_path.display(), failed = failures.len(), "No inputs to merge; nothing written");
            return Ok(MergeOutcome {
                failures,
                ..MergeOutcome::default()
            });
        }

        let merged = self.merge_opened(&mut opened, output_path, failures);
        let closed = close_all(opened);
        let outcome = merged?;
        closed?;
        Ok(outcome)
    }

    fn merge_opened(
        &self,
        opened: &mut [OpenInput],
        output_path: &Path,
        mut failures: Vec<InputFailure>,
    ) -> Result<MergeOutcome> {
        let descriptors: Vec<RasterDescriptor> = opened.iter().map(|input| input.handle.descriptor().clone()).collect();
        let extent = resolve_extent(&descriptors)?;
        let first = &descriptors[0];

        let samples = sample_count(&extent, first.bands)?;
        if samples > self.options.max_samples {
            return Err(TilerError::InvalidData(format!(
                "mosaic of {}x{}x{} samples exceeds the limit of {}",
                extent.width, extent.height, first.bands, self.options.max_samples
            )));
        }
        let mut grid = MosaicGrid::new(&extent, first.bands, first.nodata.unwrap_or(0.0))?;

        let mut inputs_merged = 0;
        for (input, descriptor) in opened.iter_mut().zip(&descriptors) {
            let pixels = match input.handle.read_all() {
                Ok(pixels) => pixels,
                Err(e) => {
                    warn!(input = %input.path.display(), error = %e, "Skipping input that failed to read");
                    failures.push(InputFailure::new(&input.path, FailureStage::Read, &e));
                    if self.options.all_or_nothing {
                        return Err(aborted(&failures));
                    }
                    continue;
                }
            };
            let touched = grid.place(&pixels, &descriptor.transform, descriptor.nodata)?;
            debug!(input = %input.path.display(), pixels = touched, "Placed input");
            inputs_merged += 1;
        }

        if inputs_merged == 0 {
            warn!(output = %output_path.display(), failed = failures.len(), "Every input failed; nothing written");
            return Ok(MergeOutcome {
                width: grid.width,
                height: grid.height,
                failures,
                ..MergeOutcome::default()
            });
        }

        let metadata = RasterMetadata {
            driver: GTIFF_DRIVER.to_string(),
            dtype: first.dtype,
            width: grid.width,
            height: grid.height,
            bands: first.bands,
            transform: grid.transform,
            crs: extent.crs,
            geokeys: first.geokeys.clone(),
            nodata: first.nodata,
            tiled: self.options.tiled,
            block_size: self.options.block_size,
            compression: self.options.compression,
        };
        self.io.write(output_path, &grid.buffer, &metadata)?;

        info!(
            output = %output_path.display(),
            width = grid.width,
            height = grid.height,
            merged = inputs_merged,
            failed = failures.len(),
            "Wrote mosaic"
        );

        Ok(MergeOutcome {
            written: true,
            output_path: Some(output_path.to_path_buf()),
            width: grid.width,
            height: grid.height,
            inputs_merged,
            failures,
        })
    }
}

/// Close every handle, returning the first error after attempting all.
fn close_all(opened: Vec<OpenInput>) -> Result<()> {
    let mut first_error = None;
    for input in opened {
        if let Err(e) = input.handle.close() {
            warn!(input = %input.path.display(), error = %e, "Failed to close input");
            first_error.get_or_insert(e);
        }
    }
    first_error.map_or(Ok(()), Err)
}

fn aborted(failures: &[InputFailure]) -> TilerError {
    TilerError::MergeAborted {
        count: failures.len(),
        first: failures.first().map(ToString::to_string).unwrap_or_default(),
    }
}

impl RasterDescriptor {
    /// Merge the tiles in `input_folder` into `output_path`, keeping this
    /// raster's compression and block layout.
    ///
    /// # Errors
    /// See [`MosaicCompositor::merge_directory`].
    pub fn merge_tiles<P, Q>(&self, input_folder: P, output_path: Q) -> Result<MergeOutcome>
    where
        P: AsRef<Path>,
        Q: AsRef<Path>,
    {
        let options = MergeOptions::default()
            .with_compression(self.compression.writable())
            .with_tiled(self.tiled, self.block_size);
        MosaicCompositor::new(options).merge_directory(input_folder, output_path, &ScanOptions::default())
    }
}
