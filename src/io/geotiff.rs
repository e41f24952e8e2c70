//! GeoTIFF reading and writing.
//!
//! Pure Rust (no GDAL): pixels and tags go through the `tiff` crate and the
//! georeferencing is stored as standard GeoTIFF tags.
//!
//! - Transform: `ModelPixelScale` + `ModelTiepoint` for north-up rasters,
//!   `ModelTransformation` otherwise.
//! - CRS: the GeoKey directory, double and ASCII params, kept verbatim so
//!   user-defined systems survive a round trip. An EPSG code is parsed out
//!   when the keys name one.
//! - Nodata: the GDAL nodata ASCII tag.
//!
//! Reads decode only the strips or internal tiles a window touches, through
//! the shared [`decode_cache`]. Samples are carried as `f64`, which holds
//! every supported sample type exactly.
//!
//! # Example
//!
//! ```rust,no_run
//! use geotiler::io::{GeoTiffIo, RasterIo};
//! use geotiler::Window;
//!
//! fn main() -> geotiler::Result<()> {
//!     let io = GeoTiffIo::new();
//!     let mut handle = io.open("scene.tif".as_ref())?;
//!     let corner = handle.read_window(&Window::new(0, 0, 256, 256))?;
//!     let metadata = handle.descriptor().metadata();
//!     handle.close()?;
//!     println!("{} bands, {} samples", corner.bands, corner.pixels.len());
//!     # let _ = metadata;
//!     Ok(())
//! }
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::encoder::colortype::{
    ColorType, Gray16, Gray32, Gray32Float, Gray64Float, Gray8, RGB16, RGB32, RGB32Float,
    RGB64Float, RGB8, RGBA16, RGBA32, RGBA32Float, RGBA64Float, RGBA8,
};
use tiff::encoder::{Compression, DirectoryEncoder, TiffEncoder, TiffKind, TiffValue};
use tiff::tags::Tag;
use tracing::{debug, warn};

use super::decode_cache::{self, SourceStamp};
use super::{RasterHandle, RasterIo};
use crate::casting::{usize_to_u16, usize_to_u32};
use crate::error::{Result, TilerError};
use crate::geometry::{AffineTransform, Crs, GeoKeys, Window};
use crate::raster::{
    Compression as SourceCompression, DataType, PixelBuffer, RasterDescriptor, RasterMetadata,
    GTIFF_DRIVER,
};

// GeoKey IDs
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;

// GeoKey values
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;
const USER_DEFINED: u16 = 32767;

/// Internal tile edge when tiled output has no block size.
const DEFAULT_BLOCK: usize = 256;
/// Target uncompressed strip size for chunked strip output.
const STRIP_BYTES: usize = 64 * 1024;

/// Compression method for GeoTIFF output
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GeoTiffCompression {
    /// No compression - fastest but largest files
    #[default]
    None,
    /// LZW compression - good balance of speed and size
    Lzw,
    /// Deflate (zlib) compression - better compression, slower
    Deflate,
}

impl GeoTiffCompression {
    /// Parse a compression name as accepted on the command line.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "uncompressed" => Some(Self::None),
            "lzw" => Some(Self::Lzw),
            "deflate" | "zlib" | "adobe_deflate" => Some(Self::Deflate),
            _ => None,
        }
    }

    fn encoder_compression(self) -> Compression {
        match self {
            Self::None => Compression::Uncompressed,
            Self::Lzw => Compression::Lzw,
            Self::Deflate => Compression::Deflate(tiff::encoder::DeflateLevel::Fast),
        }
    }
}

// ============================================================================
// Reading
// ============================================================================

type FileDecoder = Decoder<BufReader<File>>;

/// [`RasterIo`] backed by GeoTIFF files on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct GeoTiffIo;

impl GeoTiffIo {
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl RasterIo for GeoTiffIo {
    fn open(&self, path: &Path) -> Result<Box<dyn RasterHandle>> {
        Ok(Box::new(GeoTiffHandle::open(path)?))
    }

    fn write(&self, path: &Path, buffer: &PixelBuffer, metadata: &RasterMetadata) -> Result<()> {
        GeoTiffWriter::new(buffer, metadata).write(path)
    }
}

/// Open GeoTIFF file.
///
/// Windows are assembled from the strips or internal tiles they intersect;
/// decoded chunks are shared with other handles through [`decode_cache`].
pub struct GeoTiffHandle {
    descriptor: RasterDescriptor,
    decoder: Option<FileDecoder>,
    stamp: Option<SourceStamp>,
    decoded_chunks: usize,
}

impl GeoTiffHandle {
    /// Open `path` and read its metadata.
    ///
    /// # Errors
    /// Returns an error if the file is missing or not a readable TIFF.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path)?;
        let mut decoder = Decoder::new(BufReader::new(file))?.with_limits(Limits::unlimited());
        let descriptor = read_descriptor(&mut decoder, path)?;
        debug!(path = %path.display(), width = descriptor.width, height = descriptor.height, "Opened raster");
        Ok(Self {
            descriptor,
            decoder: Some(decoder),
            stamp: SourceStamp::of(path),
            decoded_chunks: 0,
        })
    }

    /// Number of chunks this handle decoded itself (cache hits excluded).
    #[must_use]
    pub fn decoded_chunks(&self) -> usize {
        self.decoded_chunks
    }

    fn chunk(&mut self, index: u32) -> Result<Arc<[f64]>> {
        if let Some(cached) = self.stamp.as_ref().and_then(|stamp| decode_cache::fetch(stamp, index)) {
            return Ok(cached);
        }
        let decoder = self.decoder.as_mut().ok_or_else(|| {
            TilerError::InvalidData(format!("{} is already closed", self.descriptor.path.display()))
        })?;
        let samples: Arc<[f64]> = decode_samples(decoder.read_chunk(index)?)?.into();
        self.decoded_chunks += 1;
        if let Some(stamp) = &self.stamp {
            decode_cache::store(stamp, index, Arc::clone(&samples));
        }
        Ok(samples)
    }
}

impl RasterHandle for GeoTiffHandle {
    fn descriptor(&self) -> &RasterDescriptor {
        &self.descriptor
    }

    fn read_window(&mut self, window: &Window) -> Result<PixelBuffer> {
        let (width, height, bands) = (self.descriptor.width, self.descriptor.height, self.descriptor.bands);
        window.validate(width, height)?;
        let (chunk_w, chunk_h) = match self.descriptor.block_size {
            Some((w, h)) if w > 0 && h > 0 => (w, h),
            other => {
                return Err(TilerError::UnsupportedFormat(format!(
                    "{}: chunk size {other:?}",
                    self.descriptor.path.display()
                )))
            }
        };
        let chunks_across = width.div_ceil(chunk_w);
        let row_len = window.width * bands;
        let mut pixels = vec![0.0; window.height * row_len];

        for cy in window.offset_y / chunk_h..=(window.end_y() - 1) / chunk_h {
            for cx in window.offset_x / chunk_w..=(window.end_x() - 1) / chunk_w {
                let chunk = self.chunk(usize_to_u32(cy * chunks_across + cx)?)?;
                let (x0, y0) = (cx * chunk_w, cy * chunk_h);
                // Edge chunks decode cropped to the image
                let data_w = chunk_w.min(width - x0);
                let data_h = chunk_h.min(height - y0);
                if chunk.len() < data_w * data_h * bands {
                    return Err(TilerError::InvalidData(format!(
                        "{} chunk {cx},{cy} decoded {} samples, expected {}",
                        self.descriptor.path.display(),
                        chunk.len(),
                        data_w * data_h * bands
                    )));
                }

                let (xs, xe) = (window.offset_x.max(x0), window.end_x().min(x0 + data_w));
                let (ys, ye) = (window.offset_y.max(y0), window.end_y().min(y0 + data_h));
                let span = (xe - xs) * bands;
                for y in ys..ye {
                    let src = ((y - y0) * data_w + (xs - x0)) * bands;
                    let dst = (y - window.offset_y) * row_len + (xs - window.offset_x) * bands;
                    pixels[dst..dst + span].copy_from_slice(&chunk[src..src + span]);
                }
            }
        }
        PixelBuffer::from_vec(pixels, window.width, window.height, bands)
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.decoder = None;
        Ok(())
    }
}

fn first_u16(decoder: &mut FileDecoder, tag: Tag, default: u16) -> Result<u16> {
    let values = decoder.find_tag(tag)?.map(tiff::decoder::ifd::Value::into_u16_vec).transpose()?;
    Ok(values.and_then(|v| v.first().copied()).unwrap_or(default))
}

fn optional_f64_vec(decoder: &mut FileDecoder, tag: Tag) -> Result<Option<Vec<f64>>> {
    Ok(decoder.find_tag(tag)?.map(tiff::decoder::ifd::Value::into_f64_vec).transpose()?)
}

fn read_descriptor(decoder: &mut FileDecoder, path: &Path) -> Result<RasterDescriptor> {
    let (width, height) = decoder.dimensions()?;
    let bands = usize::from(first_u16(decoder, Tag::SamplesPerPixel, 1)?);
    let bits = first_u16(decoder, Tag::BitsPerSample, 1)?;
    let sample_format = first_u16(decoder, Tag::SampleFormat, 1)?;
    let dtype = DataType::from_tiff(bits, sample_format)?;

    if first_u16(decoder, Tag::PlanarConfiguration, 1)? != 1 {
        return Err(TilerError::UnsupportedFormat(format!(
            "{}: planar (band-sequential) layout",
            path.display()
        )));
    }

    let compression = SourceCompression::from_tag(first_u16(decoder, Tag::Compression, 1)?);
    let tile_width = decoder.find_tag_unsigned::<u32>(Tag::TileWidth)?;
    let tile_length = decoder.find_tag_unsigned::<u32>(Tag::TileLength)?;
    let (tiled, block_size) = match (tile_width, tile_length) {
        (Some(tw), Some(th)) => (true, Some((tw as usize, th as usize))),
        _ => {
            let rows = decoder.find_tag_unsigned::<u32>(Tag::RowsPerStrip)?.unwrap_or(height);
            (false, Some((width as usize, rows.min(height) as usize)))
        }
    };

    let transform = read_transform(decoder, path)?;
    let geokeys = read_geokeys(decoder)?;
    let crs = geokeys.as_ref().and_then(|keys| parse_geokey_crs(&keys.directory));
    let nodata = match decoder.find_tag(Tag::GdalNodata)? {
        Some(value) => value.into_string().ok().and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok()),
        None => None,
    };

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("unknown")
        .to_string();

    Ok(RasterDescriptor {
        path: path.to_path_buf(),
        name,
        driver: GTIFF_DRIVER.to_string(),
        width: width as usize,
        height: height as usize,
        bands,
        dtype,
        transform,
        crs,
        geokeys,
        tiled,
        block_size,
        compression,
        nodata,
    })
}

fn read_transform(decoder: &mut FileDecoder, path: &Path) -> Result<AffineTransform> {
    if let Some(m) = optional_f64_vec(decoder, Tag::ModelTransformationTag)? {
        if m.len() >= 8 {
            return Ok(AffineTransform::new(m[0], m[1], m[3], m[4], m[5], m[7]));
        }
    }

    let scale = optional_f64_vec(decoder, Tag::ModelPixelScaleTag)?;
    let tiepoint = optional_f64_vec(decoder, Tag::ModelTiepointTag)?;
    if let (Some(scale), Some(tie)) = (scale, tiepoint) {
        if scale.len() >= 2 && tie.len() >= 6 {
            // Tiepoint (i, j, k, x, y, z) maps pixel (i, j) to world (x, y)
            let origin_x = tie[3] - tie[0] * scale[0];
            let origin_y = tie[4] + tie[1] * scale[1];
            return Ok(AffineTransform::from_origin(origin_x, origin_y, scale[0], scale[1]));
        }
    }

    warn!(path = %path.display(), "No georeferencing tags, using pixel coordinates");
    Ok(AffineTransform::identity())
}

fn read_geokeys(decoder: &mut FileDecoder) -> Result<Option<GeoKeys>> {
    let Some(value) = decoder.find_tag(Tag::GeoKeyDirectoryTag)? else {
        return Ok(None);
    };
    let directory = value.into_u16_vec()?;
    let doubles = optional_f64_vec(decoder, Tag::GeoDoubleParamsTag)?.unwrap_or_default();
    let ascii = decoder
        .find_tag(Tag::GeoAsciiParamsTag)?
        .and_then(|value| value.into_string().ok())
        .map(|text| text.trim_end_matches(char::from(0)).to_string())
        .unwrap_or_default();
    Ok(Some(GeoKeys {
        directory,
        doubles,
        ascii,
    }))
}

/// EPSG code from a GeoKeyDirectory, preferring the projected CS key.
fn parse_geokey_crs(keys: &[u16]) -> Option<Crs> {
    let count = usize::from(*keys.get(3)?);
    let entries = keys.get(4..)?.chunks_exact(4).take(count);

    let mut geographic = None;
    let mut projected = None;
    for entry in entries {
        let (key_id, location, value) = (entry[0], entry[1], entry[3]);
        if location != 0 || value == 0 || value == USER_DEFINED {
            continue;
        }
        match key_id {
            PROJECTED_CS_TYPE_GEO_KEY => projected = Some(Crs::from_epsg(value)),
            GEOGRAPHIC_TYPE_GEO_KEY => geographic = Some(Crs::from_epsg(value)),
            _ => {}
        }
    }
    projected.or(geographic)
}

fn decode_samples(result: DecodingResult) -> Result<Vec<f64>> {
    // 64-bit integers beyond 2^53 are the only samples f64 cannot hold
    #[allow(clippy::cast_precision_loss)]
    let samples = match result {
        DecodingResult::U8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I8(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I16(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::I32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::U64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::I64(v) => v.into_iter().map(|x| x as f64).collect(),
        DecodingResult::F32(v) => v.into_iter().map(f64::from).collect(),
        DecodingResult::F64(v) => v,
        #[allow(unreachable_patterns)]
        _ => {
            return Err(TilerError::UnsupportedFormat(
                "sample type not supported".to_string(),
            ))
        }
    };
    Ok(samples)
}

// ============================================================================
// Writing
// ============================================================================

/// Conversion from the `f64` working representation to an on-disk sample.
trait Sample: Copy + Default {
    fn from_f64(value: f64) -> Self;
}

macro_rules! integer_sample {
    ($($t:ty),*) => {$(
        impl Sample for $t {
            #[inline]
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            fn from_f64(value: f64) -> Self {
                // `as` saturates and maps NaN to 0
                value.round() as $t
            }
        }
    )*};
}

integer_sample!(u8, i8, u16, i16, u32, i32);

impl Sample for f32 {
    #[inline]
    #[allow(clippy::cast_possible_truncation)]
    fn from_f64(value: f64) -> Self {
        value as f32
    }
}

impl Sample for f64 {
    #[inline]
    fn from_f64(value: f64) -> Self {
        value
    }
}

fn convert<T: Sample>(pixels: &[f64]) -> Vec<T> {
    pixels.iter().map(|&v| T::from_f64(v)).collect()
}

/// How the chunked writer splits an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkLayout {
    Strips { rows: usize },
    Tiles { width: usize, height: usize },
}

impl ChunkLayout {
    fn for_metadata(metadata: &RasterMetadata) -> Self {
        if metadata.tiled {
            let (width, height) = metadata.block_size.unwrap_or((DEFAULT_BLOCK, DEFAULT_BLOCK));
            // TIFF tile edges must be multiples of 16
            Self::Tiles {
                width: width.max(1).next_multiple_of(16),
                height: height.max(1).next_multiple_of(16),
            }
        } else {
            let row_bytes = metadata.width * metadata.bands * usize::from(metadata.dtype.bits() / 8);
            Self::Strips {
                rows: (STRIP_BYTES / row_bytes.max(1)).clamp(1, metadata.height.max(1)),
            }
        }
    }

    /// Chunk windows in TIFF chunk order, each with the size it is stored at.
    fn chunks(self, width: usize, height: usize) -> Vec<(Window, (usize, usize))> {
        match self {
            Self::Strips { rows } => (0..height)
                .step_by(rows)
                .map(|y| {
                    let window = Window::new(0, y, width, rows.min(height - y));
                    (window, (window.width, window.height))
                })
                .collect(),
            Self::Tiles { width: tw, height: th } => (0..height)
                .step_by(th)
                .flat_map(|y| {
                    (0..width).step_by(tw).map(move |x| {
                        let window = Window::new(x, y, tw.min(width - x), th.min(height - y));
                        (window, (tw, th))
                    })
                })
                .collect(),
        }
    }
}

/// Samples under `window`, padded with zeros to `stored` width and height.
fn chunk_samples<T: Copy + Default>(
    samples: &[T],
    image_width: usize,
    bands: usize,
    window: &Window,
    stored: (usize, usize),
) -> Vec<T> {
    let mut chunk = vec![T::default(); stored.0 * stored.1 * bands];
    let span = window.width * bands;
    for row in 0..window.height {
        let src = ((window.offset_y + row) * image_width + window.offset_x) * bands;
        let dst = row * stored.0 * bands;
        chunk[dst..dst + span].copy_from_slice(&samples[src..src + span]);
    }
    chunk
}

/// Builder for writing a [`PixelBuffer`] as a GeoTIFF.
pub struct GeoTiffWriter<'a> {
    buffer: &'a PixelBuffer,
    metadata: &'a RasterMetadata,
    compression: GeoTiffCompression,
}

impl<'a> GeoTiffWriter<'a> {
    /// Writer using the compression recorded in `metadata`.
    #[must_use]
    pub fn new(buffer: &'a PixelBuffer, metadata: &'a RasterMetadata) -> Self {
        Self {
            buffer,
            metadata,
            compression: metadata.compression,
        }
    }

    /// Set the compression method
    #[must_use]
    pub fn compression(mut self, compression: GeoTiffCompression) -> Self {
        self.compression = compression;
        self
    }

    /// Write to a file path.
    ///
    /// Data goes to a sibling `.partial` file that is renamed into place
    /// once complete, so a failed write never leaves a truncated raster at
    /// `path`.
    ///
    /// # Errors
    /// Returns an error if encoding or any file operation fails.
    pub fn write<P: AsRef<Path>>(self, path: P) -> Result<()> {
        let path = path.as_ref();
        let partial = partial_path(path);
        let result = File::create(&partial)
            .map_err(TilerError::from)
            .and_then(|file| {
                let mut writer = BufWriter::new(file);
                self.write_to(&mut writer)?;
                writer.flush()?;
                Ok(())
            })
            .and_then(|()| fs::rename(&partial, path).map_err(TilerError::from));

        if result.is_err() {
            let _ = fs::remove_file(&partial);
        }
        result
    }

    /// Write to any writer that implements Write + Seek.
    ///
    /// # Errors
    /// Returns an error if the buffer and metadata disagree or encoding fails.
    pub fn write_to<W: Write + Seek>(self, writer: W) -> Result<()> {
        let buffer = self.buffer;

        if buffer.width == 0 || buffer.height == 0 || buffer.bands == 0 {
            return Err(TilerError::InvalidData("raster has zero dimensions".to_string()));
        }
        if buffer.pixels.len() != buffer.width * buffer.height * buffer.bands {
            return Err(TilerError::InvalidData("pixel count does not match dimensions".to_string()));
        }
        if (buffer.width, buffer.height, buffer.bands)
            != (self.metadata.width, self.metadata.height, self.metadata.bands)
        {
            return Err(TilerError::InvalidData(format!(
                "buffer is {}x{}x{} but metadata says {}x{}x{}",
                buffer.width,
                buffer.height,
                buffer.bands,
                self.metadata.width,
                self.metadata.height,
                self.metadata.bands
            )));
        }

        let width = usize_to_u32(buffer.width)?;
        let height = usize_to_u32(buffer.height)?;

        // The chunked path writes raw samples itself, so compression only
        // applies to the typed layouts.
        let compression = if self.has_typed_layout() {
            self.compression
        } else {
            GeoTiffCompression::None
        };
        let mut encoder = TiffEncoder::new(writer)?.with_compression(compression.encoder_compression());
        if self.has_typed_layout() {
            self.write_typed_image(&mut encoder, width, height)
        } else {
            self.write_chunked_image(&mut encoder, width, height, ChunkLayout::for_metadata(self.metadata))
        }
    }

    fn has_typed_layout(&self) -> bool {
        !self.metadata.tiled
            && matches!(self.buffer.bands, 1 | 3 | 4)
            && !matches!(
                self.metadata.dtype,
                DataType::Int8 | DataType::Int16 | DataType::Int32
            )
    }

    /// Common band counts through the typed `ColorType` API. Keep in sync
    /// with `has_typed_layout`.
    fn write_typed_image<W: Write + Seek>(&self, encoder: &mut TiffEncoder<W>, width: u32, height: u32) -> Result<()> {
        let pixels = &self.buffer.pixels;
        match (self.metadata.dtype, self.buffer.bands) {
            (DataType::UInt8, 1) => self.write_typed::<Gray8, _>(encoder, width, height, &convert(pixels)),
            (DataType::UInt8, 3) => self.write_typed::<RGB8, _>(encoder, width, height, &convert(pixels)),
            (DataType::UInt8, 4) => self.write_typed::<RGBA8, _>(encoder, width, height, &convert(pixels)),
            (DataType::UInt16, 1) => self.write_typed::<Gray16, _>(encoder, width, height, &convert(pixels)),
            (DataType::UInt16, 3) => self.write_typed::<RGB16, _>(encoder, width, height, &convert(pixels)),
            (DataType::UInt16, 4) => self.write_typed::<RGBA16, _>(encoder, width, height, &convert(pixels)),
            (DataType::UInt32, 1) => self.write_typed::<Gray32, _>(encoder, width, height, &convert(pixels)),
            (DataType::UInt32, 3) => self.write_typed::<RGB32, _>(encoder, width, height, &convert(pixels)),
            (DataType::UInt32, 4) => self.write_typed::<RGBA32, _>(encoder, width, height, &convert(pixels)),
            (DataType::Float32, 1) => self.write_typed::<Gray32Float, _>(encoder, width, height, &convert(pixels)),
            (DataType::Float32, 3) => self.write_typed::<RGB32Float, _>(encoder, width, height, &convert(pixels)),
            (DataType::Float32, 4) => self.write_typed::<RGBA32Float, _>(encoder, width, height, &convert(pixels)),
            (DataType::Float64, 1) => self.write_typed::<Gray64Float, _>(encoder, width, height, pixels),
            (DataType::Float64, 3) => self.write_typed::<RGB64Float, _>(encoder, width, height, pixels),
            (DataType::Float64, 4) => self.write_typed::<RGBA64Float, _>(encoder, width, height, pixels),
            (dtype, bands) => Err(TilerError::UnsupportedFormat(format!(
                "no typed layout for {bands} {dtype} bands"
            ))),
        }
    }

    fn write_chunked_image<W: Write + Seek>(
        &self,
        encoder: &mut TiffEncoder<W>,
        width: u32,
        height: u32,
        layout: ChunkLayout,
    ) -> Result<()> {
        let pixels = &self.buffer.pixels;
        match self.metadata.dtype {
            DataType::UInt8 => self.write_chunked::<u8, _>(encoder, width, height, &convert(pixels), layout),
            DataType::Int8 => self.write_chunked::<i8, _>(encoder, width, height, &convert(pixels), layout),
            DataType::UInt16 => self.write_chunked::<u16, _>(encoder, width, height, &convert(pixels), layout),
            DataType::Int16 => self.write_chunked::<i16, _>(encoder, width, height, &convert(pixels), layout),
            DataType::UInt32 => self.write_chunked::<u32, _>(encoder, width, height, &convert(pixels), layout),
            DataType::Int32 => self.write_chunked::<i32, _>(encoder, width, height, &convert(pixels), layout),
            DataType::Float32 => self.write_chunked::<f32, _>(encoder, width, height, &convert(pixels), layout),
            DataType::Float64 => self.write_chunked::<f64, _>(encoder, width, height, pixels, layout),
        }
    }

    fn write_typed<C, W>(
        &self,
        encoder: &mut TiffEncoder<W>,
        width: u32,
        height: u32,
        samples: &[C::Inner],
    ) -> Result<()>
    where
        C: ColorType,
        [C::Inner]: TiffValue,
        W: Write + Seek,
    {
        let mut image = encoder.new_image::<C>(width, height)?;
        self.write_geotiff_tags(image.encoder())?;
        image.write_data(samples)?;
        Ok(())
    }

    /// Write an image of any band count and sample type as uncompressed
    /// chunky strips or internal tiles.
    fn write_chunked<T, W>(
        &self,
        encoder: &mut TiffEncoder<W>,
        width: u32,
        height: u32,
        samples: &[T],
        layout: ChunkLayout,
    ) -> Result<()>
    where
        T: Copy + Default,
        [T]: TiffValue,
        W: Write + Seek,
    {
        let bands = self.buffer.bands;
        let dtype = self.metadata.dtype;
        if self.compression != GeoTiffCompression::None {
            debug!(bands, dtype = %dtype, ?layout, "Compression not applied to chunked output");
        }

        let mut dir = encoder.image_directory()?;

        dir.write_tag(Tag::ImageWidth, width)?;
        dir.write_tag(Tag::ImageLength, height)?;

        let bits_per_sample: Vec<u16> = vec![dtype.bits(); bands];
        dir.write_tag(Tag::BitsPerSample, bits_per_sample.as_slice())?;
        dir.write_tag(Tag::Compression, 1u16)?;

        // PhotometricInterpretation: 2 = RGB, 1 = BlackIsZero
        let rgb = matches!(bands, 3 | 4);
        dir.write_tag(Tag::PhotometricInterpretation, if rgb { 2u16 } else { 1u16 })?;
        dir.write_tag(Tag::SamplesPerPixel, usize_to_u16(bands)?)?;

        let sample_format: Vec<u16> = vec![dtype.sample_format(); bands];
        dir.write_tag(Tag::SampleFormat, sample_format.as_slice())?;

        // PlanarConfiguration: 1 = Chunky (interleaved)
        dir.write_tag(Tag::PlanarConfiguration, 1u16)?;

        if rgb && bands == 4 {
            // Unassociated alpha, as the typed RGBA layouts write it
            dir.write_tag(Tag::ExtraSamples, 2u16)?;
        } else if !rgb && bands > 1 {
            let extra_samples: Vec<u16> = vec![0; bands - 1];
            dir.write_tag(Tag::ExtraSamples, extra_samples.as_slice())?;
        }

        let (offsets_tag, byte_counts_tag) = match layout {
            ChunkLayout::Strips { rows } => {
                dir.write_tag(Tag::RowsPerStrip, usize_to_u32(rows)?)?;
                (Tag::StripOffsets, Tag::StripByteCounts)
            }
            ChunkLayout::Tiles { width: tw, height: th } => {
                dir.write_tag(Tag::TileWidth, usize_to_u32(tw)?)?;
                dir.write_tag(Tag::TileLength, usize_to_u32(th)?)?;
                (Tag::TileOffsets, Tag::TileByteCounts)
            }
        };

        self.write_geotiff_tags(&mut dir)?;

        let sample_bytes = usize::from(dtype.bits() / 8);
        let mut offsets = Vec::new();
        let mut byte_counts = Vec::new();
        for (window, stored) in layout.chunks(self.buffer.width, self.buffer.height) {
            let chunk = chunk_samples(samples, self.buffer.width, bands, &window, stored);
            let offset = dir.write_data(chunk.as_slice())?;
            offsets.push(
                u32::try_from(offset)
                    .map_err(|_| TilerError::InvalidData("chunk offset exceeds 4 GiB".to_string()))?,
            );
            byte_counts.push(usize_to_u32(chunk.len() * sample_bytes)?);
        }
        dir.write_tag(offsets_tag, offsets.as_slice())?;
        dir.write_tag(byte_counts_tag, byte_counts.as_slice())?;

        dir.finish()?;
        Ok(())
    }

    fn write_geotiff_tags<W: Write + Seek, K: TiffKind>(
        &self,
        dir: &mut DirectoryEncoder<W, K>,
    ) -> Result<()> {
        let t = &self.metadata.transform;

        if t.is_rectilinear() && t.a > 0.0 && t.e < 0.0 {
            // ModelPixelScale: [ScaleX, ScaleY, ScaleZ]
            let pixel_scale = [t.a, -t.e, 0.0];
            dir.write_tag(Tag::ModelPixelScaleTag, pixel_scale.as_slice())?;

            // ModelTiepoint: pixel (0, 0) → world origin
            let tiepoint = [0.0, 0.0, 0.0, t.c, t.f, 0.0];
            dir.write_tag(Tag::ModelTiepointTag, tiepoint.as_slice())?;
        } else {
            let matrix = [
                t.a, t.b, 0.0, t.c, //
                t.d, t.e, 0.0, t.f, //
                0.0, 0.0, 0.0, 0.0, //
                0.0, 0.0, 0.0, 1.0,
            ];
            dir.write_tag(Tag::ModelTransformationTag, matrix.as_slice())?;
        }

        if let Some(keys) = &self.metadata.geokeys {
            dir.write_tag(Tag::GeoKeyDirectoryTag, keys.directory.as_slice())?;
            if !keys.doubles.is_empty() {
                dir.write_tag(Tag::GeoDoubleParamsTag, keys.doubles.as_slice())?;
            }
            if !keys.ascii.is_empty() {
                dir.write_tag(Tag::GeoAsciiParamsTag, keys.ascii.as_str())?;
            }
        } else {
            let geokeys = build_geokey_directory(self.metadata.crs);
            dir.write_tag(Tag::GeoKeyDirectoryTag, geokeys.as_slice())?;

            if let Some(proj_string) = self.metadata.crs.and_then(Crs::proj_string) {
                // GeoAsciiParams entries are pipe-terminated
                let ascii_params = format!("{proj_string}|");
                dir.write_tag(Tag::GeoAsciiParamsTag, ascii_params.as_str())?;
            }
        }

        if let Some(nodata) = self.metadata.nodata {
            let text = format_nodata(nodata);
            dir.write_tag(Tag::GdalNodata, text.as_str())?;
        }

        Ok(())
    }
}

fn build_geokey_directory(crs: Option<Crs>) -> Vec<u16> {
    // GeoKeyDirectory structure:
    // [KeyDirectoryVersion, KeyRevision, MinorRevision, NumberOfKeys,
    //  KeyID1, TIFFTagLocation1, Count1, Value_Offset1, ...]
    let Some(crs) = crs else {
        return vec![1, 1, 0, 1, GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA];
    };

    let is_geographic = crs.is_geographic();
    let mut keys = vec![1, 1, 0, 3];

    keys.extend_from_slice(&[
        GT_MODEL_TYPE_GEO_KEY,
        0, // TIFFTagLocation = 0 means value is in Value_Offset
        1,
        if is_geographic {
            MODEL_TYPE_GEOGRAPHIC
        } else {
            MODEL_TYPE_PROJECTED
        },
    ]);
    keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);

    if is_geographic {
        keys.extend_from_slice(&[GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, crs.epsg()]);
    } else {
        keys.extend_from_slice(&[PROJECTED_CS_TYPE_GEO_KEY, 0, 1, crs.epsg()]);
    }

    keys
}

fn format_nodata(value: f64) -> String {
    if value.is_nan() {
        "nan".to_string()
    } else if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        value.to_string()
    }
}

fn partial_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(std::ffi::OsStr::to_os_string).unwrap_or_default();
    name.push(".partial");
    path.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("geotiler_geotiff_{name}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn ramp(width: usize, height: usize, bands: usize) -> PixelBuffer {
        #[allow(clippy::cast_precision_loss)]
        let pixels = (0..width * height * bands).map(|i| (i % 256) as f64).collect();
        PixelBuffer::from_vec(pixels, width, height, bands).unwrap()
    }

    fn utm_metadata(buffer: &PixelBuffer, dtype: DataType) -> RasterMetadata {
        RasterMetadata::for_buffer(
            buffer,
            dtype,
            AffineTransform::from_origin(500_000.0, 4_010_000.0, 10.0, 10.0),
        )
        .with_crs(Some(Crs::from_epsg(32610)))
    }

    fn roundtrip(buffer: &PixelBuffer, metadata: &RasterMetadata, name: &str) -> (RasterDescriptor, PixelBuffer) {
        let dir = temp_dir(name);
        let path = dir.join("raster.tif");
        GeoTiffIo::new().write(&path, buffer, metadata).unwrap();

        let mut handle = GeoTiffIo::new().open(&path).unwrap();
        let descriptor = handle.descriptor().clone();
        let data = handle.read_all().unwrap();
        handle.close().unwrap();
        fs::remove_dir_all(&dir).ok();
        (descriptor, data)
    }

    #[test]
    fn test_roundtrip_grayscale_u8() {
        let buffer = ramp(37, 21, 1);
        let metadata = utm_metadata(&buffer, DataType::UInt8);
        let (descriptor, data) = roundtrip(&buffer, &metadata, "gray_u8");

        assert_eq!((descriptor.width, descriptor.height, descriptor.bands), (37, 21, 1));
        assert_eq!(descriptor.dtype, DataType::UInt8);
        assert_eq!(descriptor.transform, metadata.transform);
        assert_eq!(descriptor.crs, Some(Crs::from_epsg(32610)));
        assert_eq!(data, buffer);
    }

    #[test]
    fn test_roundtrip_rgb_lzw() {
        let buffer = ramp(16, 16, 3);
        let mut metadata = utm_metadata(&buffer, DataType::UInt8);
        metadata.compression = GeoTiffCompression::Lzw;
        let (descriptor, data) = roundtrip(&buffer, &metadata, "rgb_lzw");

        assert_eq!(descriptor.compression, SourceCompression::Lzw);
        assert_eq!(data, buffer);
    }

    #[test]
    fn test_roundtrip_multiband_i16_with_nodata() {
        let mut buffer = ramp(8, 8, 5);
        buffer.pixels[0] = -9999.0;
        let metadata = utm_metadata(&buffer, DataType::Int16).with_nodata(Some(-9999.0));
        let (descriptor, data) = roundtrip(&buffer, &metadata, "multi_i16");

        assert_eq!(descriptor.bands, 5);
        assert_eq!(descriptor.dtype, DataType::Int16);
        assert_eq!(descriptor.nodata, Some(-9999.0));
        assert_eq!(data, buffer);
    }

    #[test]
    fn test_roundtrip_rotated_transform_geographic() {
        let buffer = ramp(4, 4, 1);
        let mut metadata = RasterMetadata::for_buffer(
            &buffer,
            DataType::Float32,
            AffineTransform::new(0.01, 0.001, -122.5, 0.002, -0.01, 37.5),
        );
        metadata.crs = Some(Crs::WGS84);
        let (descriptor, data) = roundtrip(&buffer, &metadata, "rotated");

        assert_eq!(descriptor.transform, metadata.transform);
        assert_eq!(descriptor.crs, Some(Crs::WGS84));
        assert_eq!(data, buffer);
    }

    #[test]
    fn test_read_window() {
        let buffer = ramp(10, 6, 2);
        let metadata = utm_metadata(&buffer, DataType::UInt16);
        let dir = temp_dir("window");
        let path = dir.join("raster.tif");
        GeoTiffIo::new().write(&path, &buffer, &metadata).unwrap();

        let mut handle = GeoTiffHandle::open(&path).unwrap();
        let window = Window::new(7, 2, 3, 4);
        let part = handle.read_window(&window).unwrap();
        assert_eq!(part, buffer.crop(&window).unwrap());
        assert!(handle.read_window(&Window::new(8, 0, 3, 1)).is_err());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_window_decodes_only_touched_chunks() {
        let buffer = ramp(64, 64, 1);
        let metadata = utm_metadata(&buffer, DataType::UInt8).with_tiling(true, Some((16, 16)));
        let dir = temp_dir("chunks");
        let path = dir.join("raster.tif");
        GeoTiffIo::new().write(&path, &buffer, &metadata).unwrap();

        let mut handle = GeoTiffHandle::open(&path).unwrap();
        assert_eq!(handle.descriptor().block_size, Some((16, 16)));

        let corner = Window::new(0, 0, 16, 16);
        assert_eq!(handle.read_window(&corner).unwrap(), buffer.crop(&corner).unwrap());
        assert_eq!(handle.decoded_chunks(), 1);

        // Straddles four tiles, one of them already cached
        let straddle = Window::new(8, 8, 16, 16);
        assert_eq!(handle.read_window(&straddle).unwrap(), buffer.crop(&straddle).unwrap());
        assert_eq!(handle.decoded_chunks(), 4);
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_tiled_output_with_padded_edge_tiles() {
        let buffer = ramp(50, 40, 3);
        let metadata = utm_metadata(&buffer, DataType::UInt8).with_tiling(true, Some((20, 20)));
        let (descriptor, data) = roundtrip(&buffer, &metadata, "tiled");

        assert!(descriptor.tiled);
        // Rounded up to the TIFF multiple of 16
        assert_eq!(descriptor.block_size, Some((32, 32)));
        assert_eq!(data, buffer);
    }

    #[test]
    fn test_tiled_output_default_block() {
        let buffer = ramp(300, 10, 2);
        let metadata = utm_metadata(&buffer, DataType::Int16).with_tiling(true, None);
        let (descriptor, data) = roundtrip(&buffer, &metadata, "tiled_default");

        assert_eq!(descriptor.block_size, Some((256, 256)));
        assert_eq!(data, buffer);
    }

    #[test]
    fn test_large_multiband_split_into_strips() {
        // 300 px * 5 bands * 2 bytes = 3000 bytes per row
        let buffer = ramp(300, 100, 5);
        let metadata = utm_metadata(&buffer, DataType::UInt16);
        let (descriptor, data) = roundtrip(&buffer, &metadata, "strips");

        assert!(!descriptor.tiled);
        assert_eq!(descriptor.block_size, Some((300, 21)));
        assert_eq!(data, buffer);
    }

    #[test]
    fn test_wide_samples_are_exact() {
        let values = vec![0.1, 123_456.789_012_345, 1e-10, std::f64::consts::PI];
        let buffer = PixelBuffer::from_vec(values, 2, 2, 1).unwrap();
        let (_, data) = roundtrip(&buffer, &utm_metadata(&buffer, DataType::Float64), "f64");
        assert_eq!(data, buffer);

        let counts = PixelBuffer::from_vec(vec![16_777_217.0, 4_000_000_001.0], 2, 1, 1).unwrap();
        let (_, data) = roundtrip(&counts, &utm_metadata(&counts, DataType::UInt32), "u32");
        assert_eq!(data, counts);

        let signed = PixelBuffer::from_vec(vec![-2_147_483_647.0, 16_777_217.0], 2, 1, 1).unwrap();
        let (_, data) = roundtrip(&signed, &utm_metadata(&signed, DataType::Int32), "i32");
        assert_eq!(data, signed);
    }

    #[test]
    fn test_user_defined_geokeys_roundtrip() {
        let keys = GeoKeys {
            directory: vec![
                1, 1, 0, 4, //
                GT_MODEL_TYPE_GEO_KEY, 0, 1, MODEL_TYPE_PROJECTED, //
                1026, 34737, 16, 0, //
                PROJECTED_CS_TYPE_GEO_KEY, 0, 1, USER_DEFINED, //
                3077, 34736, 1, 0,
            ],
            doubles: vec![0.3048],
            ascii: "Local site grid|".to_string(),
        };
        let buffer = ramp(4, 4, 1);
        let metadata = RasterMetadata::for_buffer(
            &buffer,
            DataType::UInt8,
            AffineTransform::from_origin(100.0, 200.0, 0.5, 0.5),
        )
        .with_geokeys(Some(keys.clone()));
        let (descriptor, _) = roundtrip(&buffer, &metadata, "user_defined");

        assert_eq!(descriptor.crs, None);
        assert_eq!(descriptor.geokeys, Some(keys));
        assert_eq!(descriptor.crs_label(), "user-defined (Local site grid)");
    }

    #[test]
    fn test_epsg_keys_kept_alongside_code() {
        let buffer = ramp(4, 4, 1);
        let (descriptor, _) = roundtrip(&buffer, &utm_metadata(&buffer, DataType::UInt8), "epsg_keys");
        let keys = descriptor.geokeys.unwrap();
        assert_eq!(keys.directory, build_geokey_directory(Some(Crs::from_epsg(32610))));
        assert!(keys.ascii.contains("+proj=utm"));
    }

    #[test]
    fn test_write_leaves_no_partial_file() {
        let dir = temp_dir("partial");
        let path = dir.join("raster.tif");
        let buffer = ramp(4, 4, 1);
        let metadata = utm_metadata(&buffer, DataType::UInt8);
        GeoTiffIo::new().write(&path, &buffer, &metadata).unwrap();

        assert!(path.exists());
        assert!(!partial_path(&path).exists());
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_mismatched_metadata_rejected() {
        let buffer = ramp(4, 4, 1);
        let mut metadata = utm_metadata(&buffer, DataType::UInt8);
        metadata.width = 5;
        let result = GeoTiffWriter::new(&buffer, &metadata).write_to(Cursor::new(Vec::new()));
        assert!(matches!(result, Err(TilerError::InvalidData(_))));
    }

    #[test]
    fn test_empty_raster_error() {
        let buffer = PixelBuffer::filled(0, 0, 1, 0.0);
        let metadata = RasterMetadata::for_buffer(&buffer, DataType::UInt8, AffineTransform::identity());
        let result = GeoTiffWriter::new(&buffer, &metadata).write_to(Cursor::new(Vec::new()));
        assert!(result.is_err());
    }

    #[test]
    fn test_geokey_directory_projected() {
        let geokeys = build_geokey_directory(Some(Crs::from_epsg(32610)));

        assert_eq!(&geokeys[..4], &[1, 1, 0, 3]);
        assert_eq!(geokeys[4], GT_MODEL_TYPE_GEO_KEY);
        assert_eq!(geokeys[7], MODEL_TYPE_PROJECTED);
        assert_eq!(geokeys[12], PROJECTED_CS_TYPE_GEO_KEY);
        assert_eq!(geokeys[15], 32610);
        assert_eq!(parse_geokey_crs(&geokeys), Some(Crs::from_epsg(32610)));
    }

    #[test]
    fn test_geokey_directory_geographic() {
        let geokeys = build_geokey_directory(Some(Crs::WGS84));
        assert_eq!(geokeys[7], MODEL_TYPE_GEOGRAPHIC);
        assert_eq!(geokeys[12], GEOGRAPHIC_TYPE_GEO_KEY);
        assert_eq!(geokeys[15], 4326);
        assert_eq!(parse_geokey_crs(&geokeys), Some(Crs::WGS84));
    }

    #[test]
    fn test_geokey_directory_without_crs() {
        let geokeys = build_geokey_directory(None);
        assert_eq!(geokeys[3], 1);
        assert_eq!(parse_geokey_crs(&geokeys), None);
        assert_eq!(parse_geokey_crs(&[1, 1]), None);
    }

    #[test]
    fn test_format_nodata() {
        assert_eq!(format_nodata(-9999.0), "-9999");
        assert_eq!(format_nodata(0.5), "0.5");
        assert_eq!(format_nodata(f64::NAN), "nan");
    }

    #[test]
    fn test_compression_from_name() {
        assert_eq!(GeoTiffCompression::from_name("LZW"), Some(GeoTiffCompression::Lzw));
        assert_eq!(GeoTiffCompression::from_name("deflate"), Some(GeoTiffCompression::Deflate));
        assert_eq!(GeoTiffCompression::from_name("jpeg"), None);
    }

    #[test]
    fn test_open_missing_file() {
        assert!(matches!(
            GeoTiffHandle::open("/nonexistent/geotiler.tif"),
            Err(TilerError::Io(_))
        ));
    }
}
