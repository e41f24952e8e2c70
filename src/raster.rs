//! Raster descriptors, pixel buffers and sample types.
//!
//! A [`RasterDescriptor`] is an immutable snapshot of a raster file's
//! metadata taken when it is opened. Pixel data lives separately in a
//! [`PixelBuffer`] read through the I/O layer.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TilerError};
use crate::geometry::crs::describe;
use crate::geometry::{AffineTransform, BoundingBox, Crs, GeoKeys, Window};
use crate::io::{GeoTiffCompression, GeoTiffIo, RasterIo};

/// Driver name recorded for every raster this crate reads or writes.
pub const GTIFF_DRIVER: &str = "GTiff";

/// Sample type of a raster band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    #[default]
    UInt8,
    Int8,
    UInt16,
    Int16,
    UInt32,
    Int32,
    Float32,
    Float64,
}

impl DataType {
    /// Bits per sample.
    #[must_use]
    pub const fn bits(self) -> u16 {
        match self {
            Self::UInt8 | Self::Int8 => 8,
            Self::UInt16 | Self::Int16 => 16,
            Self::UInt32 | Self::Int32 | Self::Float32 => 32,
            Self::Float64 => 64,
        }
    }

    /// TIFF `SampleFormat` value: 1 unsigned, 2 signed, 3 IEEE float.
    #[must_use]
    pub const fn sample_format(self) -> u16 {
        match self {
            Self::UInt8 | Self::UInt16 | Self::UInt32 => 1,
            Self::Int8 | Self::Int16 | Self::Int32 => 2,
            Self::Float32 | Self::Float64 => 3,
        }
    }

    /// Resolve a type from TIFF `BitsPerSample` and `SampleFormat`.
    ///
    /// # Errors
    /// Returns [`TilerError::UnsupportedFormat`] for other combinations.
    pub fn from_tiff(bits: u16, sample_format: u16) -> Result<Self> {
        match (bits, sample_format) {
            (8, 1) => Ok(Self::UInt8),
            (8, 2) => Ok(Self::Int8),
            (16, 1) => Ok(Self::UInt16),
            (16, 2) => Ok(Self::Int16),
            (32, 1) => Ok(Self::UInt32),
            (32, 2) => Ok(Self::Int32),
            (32, 3) => Ok(Self::Float32),
            (64, 3) => Ok(Self::Float64),
            _ => Err(TilerError::UnsupportedFormat(format!(
                "{bits}-bit samples with sample format {sample_format}"
            ))),
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::UInt8 => "uint8",
            Self::Int8 => "int8",
            Self::UInt16 => "uint16",
            Self::Int16 => "int16",
            Self::UInt32 => "uint32",
            Self::Int32 => "int32",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Compression found in a source file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Lzw,
    Deflate,
    Jpeg,
    PackBits,
    Zstd,
    Other(u16),
}

impl Compression {
    /// Map a TIFF `Compression` tag value.
    #[must_use]
    pub const fn from_tag(value: u16) -> Self {
        match value {
            1 => Self::None,
            5 => Self::Lzw,
            8 | 32946 => Self::Deflate,
            6 | 7 => Self::Jpeg,
            32773 => Self::PackBits,
            50000 => Self::Zstd,
            other => Self::Other(other),
        }
    }

    /// Closest compression the GeoTIFF writer can produce.
    #[must_use]
    pub const fn writable(self) -> GeoTiffCompression {
        match self {
            Self::Lzw => GeoTiffCompression::Lzw,
            Self::Deflate | Self::Zstd => GeoTiffCompression::Deflate,
            Self::None | Self::Jpeg | Self::PackBits | Self::Other(_) => GeoTiffCompression::None,
        }
    }
}

/// Interleaved pixel data (`band` varies fastest: R,G,B,R,G,B,...).
///
/// Samples are held as `f64` whatever the on-disk type, which represents
/// every supported sample type exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct PixelBuffer {
    pub pixels: Vec<f64>,
    pub width: usize,
    pub height: usize,
    pub bands: usize,
}

impl PixelBuffer {
    /// Buffer of the given shape with every sample set to `fill`.
    #[must_use]
    pub fn filled(width: usize, height: usize, bands: usize, fill: f64) -> Self {
        Self {
            pixels: vec![fill; width * height * bands],
            width,
            height,
            bands,
        }
    }

    /// Wrap existing samples, checking the length matches the shape.
    ///
    /// # Errors
    /// Returns [`TilerError::InvalidData`] on a length mismatch.
    pub fn from_vec(pixels: Vec<f64>, width: usize, height: usize, bands: usize) -> Result<Self> {
        let expected = width * height * bands;
        if pixels.len() != expected {
            return Err(TilerError::InvalidData(format!(
                "expected {expected} samples for {width}x{height}x{bands}, got {}",
                pixels.len()
            )));
        }
        Ok(Self { pixels, width, height, bands })
    }

    #[inline]
    fn index(&self, col: usize, row: usize, band: usize) -> usize {
        (row * self.width + col) * self.bands + band
    }

    #[inline]
    #[must_use]
    pub fn get(&self, col: usize, row: usize, band: usize) -> Option<f64> {
        if col >= self.width || row >= self.height || band >= self.bands {
            return None;
        }
        self.pixels.get(self.index(col, row, band)).copied()
    }

    #[inline]
    pub fn set(&mut self, col: usize, row: usize, band: usize, value: f64) {
        if col < self.width && row < self.height && band < self.bands {
            let idx = self.index(col, row, band);
            self.pixels[idx] = value;
        }
    }

    /// All samples of one pixel.
    #[must_use]
    pub fn pixel(&self, col: usize, row: usize) -> Option<&[f64]> {
        if col >= self.width || row >= self.height {
            return None;
        }
        let start = self.index(col, row, 0);
        self.pixels.get(start..start + self.bands)
    }

    /// Copy out the pixels under `window`.
    ///
    /// # Errors
    /// Returns [`TilerError::InvalidWindow`] if the window is not inside
    /// this buffer.
    pub fn crop(&self, window: &Window) -> Result<Self> {
        window.validate(self.width, self.height)?;
        let row_len = window.width * self.bands;
        let mut pixels = Vec::with_capacity(window.height * row_len);
        for row in window.offset_y..window.end_y() {
            let start = self.index(window.offset_x, row, 0);
            pixels.extend_from_slice(&self.pixels[start..start + row_len]);
        }
        Ok(Self {
            pixels,
            width: window.width,
            height: window.height,
            bands: self.bands,
        })
    }

    /// Nearest-neighbour resize to `width` x `height`.
    #[must_use]
    pub fn resize_nearest(&self, width: usize, height: usize) -> Self {
        let mut out = Self::filled(width, height, self.bands, 0.0);
        if self.width == 0 || self.height == 0 {
            return out;
        }
        #[allow(clippy::cast_precision_loss)]
        let (sx, sy) = (
            self.width as f64 / width.max(1) as f64,
            self.height as f64 / height.max(1) as f64,
        );
        for row in 0..height {
            #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let src_row = (((row as f64 + 0.5) * sy) as usize).min(self.height - 1);
            for col in 0..width {
                #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                let src_col = (((col as f64 + 0.5) * sx) as usize).min(self.width - 1);
                let src = self.index(src_col, src_row, 0);
                let dst = out.index(col, row, 0);
                out.pixels[dst..dst + self.bands].copy_from_slice(&self.pixels[src..src + self.bands]);
            }
        }
        out
    }

    /// Keep only the first `count` bands.
    #[must_use]
    pub fn select_bands(&self, count: usize) -> Self {
        let count = count.min(self.bands);
        if count == self.bands {
            return self.clone();
        }
        let pixels = self
            .pixels
            .chunks_exact(self.bands)
            .flat_map(|px| px[..count].iter().copied())
            .collect();
        Self {
            pixels,
            width: self.width,
            height: self.height,
            bands: count,
        }
    }
}

/// Everything the writer needs to persist a raster besides its pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMetadata {
    pub driver: String,
    pub dtype: DataType,
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub transform: AffineTransform,
    pub crs: Option<Crs>,
    /// Raw GeoKeys written in place of keys built from `crs`.
    pub geokeys: Option<GeoKeys>,
    pub nodata: Option<f64>,
    /// Write internal tiles instead of strips.
    pub tiled: bool,
    /// Internal tile size for tiled output; 256x256 when unset.
    pub block_size: Option<(usize, usize)>,
    pub compression: GeoTiffCompression,
}

impl RasterMetadata {
    /// Metadata for `buffer` written with `transform`, other fields default.
    #[must_use]
    pub fn for_buffer(buffer: &PixelBuffer, dtype: DataType, transform: AffineTransform) -> Self {
        Self {
            driver: GTIFF_DRIVER.to_string(),
            dtype,
            width: buffer.width,
            height: buffer.height,
            bands: buffer.bands,
            transform,
            crs: None,
            geokeys: None,
            nodata: None,
            tiled: false,
            block_size: None,
            compression: GeoTiffCompression::None,
        }
    }

    #[must_use]
    pub fn with_crs(mut self, crs: Option<Crs>) -> Self {
        self.crs = crs;
        self
    }

    #[must_use]
    pub fn with_geokeys(mut self, geokeys: Option<GeoKeys>) -> Self {
        self.geokeys = geokeys;
        self
    }

    #[must_use]
    pub fn with_tiling(mut self, tiled: bool, block_size: Option<(usize, usize)>) -> Self {
        self.tiled = tiled;
        self.block_size = block_size;
        self
    }

    #[must_use]
    pub fn with_nodata(mut self, nodata: Option<f64>) -> Self {
        self.nodata = nodata;
        self
    }
}

/// Metadata snapshot of a raster file.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterDescriptor {
    pub path: PathBuf,
    /// File stem, used for display.
    pub name: String,
    pub driver: String,
    pub width: usize,
    pub height: usize,
    pub bands: usize,
    pub dtype: DataType,
    pub transform: AffineTransform,
    pub crs: Option<Crs>,
    /// GeoKeys as read from the file.
    pub geokeys: Option<GeoKeys>,
    pub tiled: bool,
    /// Internal tile or strip size as (width, height).
    pub block_size: Option<(usize, usize)>,
    pub compression: Compression,
    pub nodata: Option<f64>,
}

impl RasterDescriptor {
    /// Open a GeoTIFF and snapshot its metadata.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or decoded.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let handle = GeoTiffIo::new().open(path.as_ref())?;
        let descriptor = handle.descriptor().clone();
        handle.close()?;
        Ok(descriptor)
    }

    /// World-space footprint.
    #[must_use]
    pub fn bounds(&self) -> BoundingBox {
        BoundingBox::of_raster(&self.transform, self.width, self.height)
    }

    /// Whether `other` is in the same CRS.
    ///
    /// EPSG codes are compared when both rasters have one; otherwise the raw
    /// GeoKeys must match.
    #[must_use]
    pub fn same_crs(&self, other: &Self) -> bool {
        match (self.crs, other.crs) {
            (Some(a), Some(b)) => a == b,
            (None, None) => self.geokeys == other.geokeys,
            _ => false,
        }
    }

    /// CRS for messages: the EPSG code, the citation of user-defined keys,
    /// or "unknown".
    #[must_use]
    pub fn crs_label(&self) -> String {
        match (self.crs, &self.geokeys) {
            (Some(crs), _) => crs.to_string(),
            (None, Some(keys)) => format!("user-defined ({})", keys.citation().unwrap_or("no citation")),
            (None, None) => describe(None),
        }
    }

    /// Writer metadata copied from this raster ("profile").
    #[must_use]
    pub fn metadata(&self) -> RasterMetadata {
        RasterMetadata {
            driver: self.driver.clone(),
            dtype: self.dtype,
            width: self.width,
            height: self.height,
            bands: self.bands,
            transform: self.transform,
            crs: self.crs,
            geokeys: self.geokeys.clone(),
            nodata: self.nodata,
            tiled: self.tiled,
            block_size: self.block_size,
            compression: self.compression.writable(),
        }
    }

    /// Downsampled copy no larger than `max_size` on its long side,
    /// together with the transform of the downsampled grid.
    ///
    /// # Errors
    /// Returns an error if the raster cannot be read.
    pub fn preview(&self, max_size: usize) -> Result<(PixelBuffer, AffineTransform)> {
        self.preview_with(&GeoTiffIo::new(), max_size)
    }

    /// [`RasterDescriptor::preview`] through a specific I/O backend.
    ///
    /// # Errors
    /// Returns an error if the raster cannot be read.
    pub fn preview_with(&self, io: &dyn RasterIo, max_size: usize) -> Result<(PixelBuffer, AffineTransform)> {
        let mut handle = io.open(&self.path)?;
        let data = handle.read_all();
        handle.close()?;
        let data = data?;

        let long_side = self.width.max(self.height);
        if max_size == 0 || long_side <= max_size {
            return Ok((data, self.transform));
        }

        #[allow(clippy::cast_precision_loss)]
        let scale = max_size as f64 / long_side as f64;
        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let (new_w, new_h) = (
            ((self.width as f64 * scale) as usize).max(1),
            ((self.height as f64 * scale) as usize).max(1),
        );
        let resized = data.resize_nearest(new_w, new_h);
        #[allow(clippy::cast_precision_loss)]
        let transform = self.transform.scaled(
            self.width as f64 / new_w as f64,
            self.height as f64 / new_h as f64,
        );
        Ok((resized, transform))
    }

    /// Pixel data limited to the first three bands, interleaved row by row.
    ///
    /// # Errors
    /// Returns an error if the raster cannot be read.
    pub fn to_rgb_array(&self) -> Result<PixelBuffer> {
        let mut handle = GeoTiffIo::new().open(&self.path)?;
        let data = handle.read_all();
        handle.close()?;
        Ok(data?.select_bands(3))
    }
}

impl fmt::Display for RasterDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Raster(name={}, driver={}, dtype={}, width={}, height={}, channels={})",
            self.name, self.driver, self.dtype, self.width, self.height, self.bands
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(width: usize, height: usize, bands: usize) -> PixelBuffer {
        #[allow(clippy::cast_precision_loss)]
        let pixels = (0..width * height * bands).map(|i| i as f64).collect();
        PixelBuffer::from_vec(pixels, width, height, bands).unwrap()
    }

    #[test]
    fn test_dtype_from_tiff() {
        assert_eq!(DataType::from_tiff(8, 1).unwrap(), DataType::UInt8);
        assert_eq!(DataType::from_tiff(16, 2).unwrap(), DataType::Int16);
        assert_eq!(DataType::from_tiff(64, 3).unwrap(), DataType::Float64);
        assert!(DataType::from_tiff(12, 1).is_err());
        assert_eq!(DataType::Float32.to_string(), "float32");
    }

    #[test]
    fn test_compression_mapping() {
        assert_eq!(Compression::from_tag(5), Compression::Lzw);
        assert_eq!(Compression::from_tag(7), Compression::Jpeg);
        assert_eq!(Compression::from_tag(4), Compression::Other(4));
        assert!(matches!(Compression::Jpeg.writable(), GeoTiffCompression::None));
        assert!(matches!(Compression::Lzw.writable(), GeoTiffCompression::Lzw));
    }

    #[test]
    fn test_from_vec_length_mismatch() {
        assert!(PixelBuffer::from_vec(vec![0.0; 5], 2, 2, 1).is_err());
    }

    #[test]
    fn test_crop() {
        let buf = ramp(4, 3, 2);
        let crop = buf.crop(&Window::new(1, 1, 2, 2)).unwrap();
        assert_eq!(crop.width, 2);
        assert_eq!(crop.pixel(0, 0).unwrap(), buf.pixel(1, 1).unwrap());
        assert_eq!(crop.pixel(1, 1).unwrap(), buf.pixel(2, 2).unwrap());
        assert!(buf.crop(&Window::new(3, 0, 2, 1)).is_err());
    }

    #[test]
    fn test_resize_nearest() {
        let buf = ramp(4, 4, 1);
        let small = buf.resize_nearest(2, 2);
        // Centres of output pixels land on source pixels (1,1), (3,1), (1,3), (3,3)
        assert_eq!(small.pixels, vec![5.0, 7.0, 13.0, 15.0]);
    }

    #[test]
    fn test_select_bands() {
        let buf = ramp(2, 1, 4);
        let rgb = buf.select_bands(3);
        assert_eq!(rgb.bands, 3);
        assert_eq!(rgb.pixels, vec![0.0, 1.0, 2.0, 4.0, 5.0, 6.0]);
        assert_eq!(ramp(2, 1, 1).select_bands(3).bands, 1);
    }

    #[test]
    fn test_get_set_bounds() {
        let mut buf = PixelBuffer::filled(2, 2, 1, 0.0);
        buf.set(1, 1, 0, 9.0);
        buf.set(5, 5, 0, 1.0);
        assert_eq!(buf.get(1, 1, 0), Some(9.0));
        assert_eq!(buf.get(2, 0, 0), None);
    }

    fn scene() -> RasterDescriptor {
        RasterDescriptor {
            path: PathBuf::from("scene.tif"),
            name: "scene".to_string(),
            driver: GTIFF_DRIVER.to_string(),
            width: 2500,
            height: 2000,
            bands: 3,
            dtype: DataType::UInt8,
            transform: AffineTransform::identity(),
            crs: None,
            geokeys: None,
            tiled: false,
            block_size: None,
            compression: Compression::None,
            nodata: None,
        }
    }

    fn user_defined(citation: &str) -> GeoKeys {
        GeoKeys {
            directory: vec![1, 1, 0, 1, 3072, 0, 1, 32767],
            doubles: vec![6_378_137.0],
            ascii: format!("{citation}|"),
        }
    }

    #[test]
    fn test_same_crs() {
        let mut a = scene();
        let mut b = scene();
        assert!(a.same_crs(&b));

        a.geokeys = Some(user_defined("Local grid A"));
        b.geokeys = Some(user_defined("Local grid B"));
        assert!(!a.same_crs(&b));
        assert_eq!(a.crs_label(), "user-defined (Local grid A)");

        b.geokeys = Some(user_defined("Local grid A"));
        assert!(a.same_crs(&b));

        // An EPSG code is compared on its own, whatever the raw keys say
        a.crs = Some(Crs::WGS84);
        assert!(!a.same_crs(&b));
        b.crs = Some(Crs::WGS84);
        b.geokeys = None;
        assert!(a.same_crs(&b));
        assert_eq!(a.crs_label(), "EPSG:4326");
    }

    #[test]
    fn test_f64_samples_are_exact() {
        let mut buf = PixelBuffer::filled(1, 1, 2, 0.0);
        buf.set(0, 0, 0, 4_000_000_001.0);
        buf.set(0, 0, 1, 0.1);
        assert_eq!(buf.pixel(0, 0).unwrap(), &[4_000_000_001.0, 0.1]);
    }

    #[test]
    fn test_descriptor_display() {
        let descriptor = scene();
        assert_eq!(
            descriptor.to_string(),
            "Raster(name=scene, driver=GTiff, dtype=uint8, width=2500, height=2000, channels=3)"
        );
        assert_eq!(descriptor.metadata().width, 2500);
    }
}
