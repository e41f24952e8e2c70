//! Checked numeric conversions used by the raster geometry code.
//!
//! # Assumptions
//!
//! ## Raster dimensions (`usize` ↔ `f64`)
//! Dimensions and offsets are converted to `f64` freely: `f64` represents
//! integers exactly up to 2^53, far beyond any raster this crate writes.
//!
//! ## World → pixel (`f64` → integer)
//! Pixel positions derived from world coordinates may be negative, NaN or
//! past the raster edge, so every float-to-index conversion is checked.
//!
//! ## TIFF fields (`usize` → `u32`/`u16`)
//! TIFF stores dimensions as `u32` and sample counts as `u16`; overflow is
//! reported as [`TilerError::InvalidData`].

use crate::error::{Result, TilerError};

/// Tolerance applied before rounding a pixel count up, so that
/// `2500.000000001` pixels of floating-point noise is still 2500.
pub const EXTENT_EPSILON: f64 = 1e-6;

/// Convert a `usize` to `u32`, failing on overflow.
///
/// # Errors
/// Returns [`TilerError::InvalidData`] if the value exceeds `u32::MAX`.
#[inline]
pub fn usize_to_u32(value: usize) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| TilerError::InvalidData(format!("value {value} exceeds u32 maximum")))
}

/// Convert a `usize` to `u16`, failing on overflow.
///
/// # Errors
/// Returns [`TilerError::InvalidData`] if the value exceeds `u16::MAX`.
#[inline]
pub fn usize_to_u16(value: usize) -> Result<u16> {
    u16::try_from(value)
        .map_err(|_| TilerError::InvalidData(format!("value {value} exceeds u16 maximum (65535)")))
}

/// Convert a float to a pixel index, returning `None` if out of bounds.
///
/// Negative values, NaN and values at or past `max_value` yield `None`.
#[inline]
#[must_use]
pub fn f64_to_pixel_index(value: f64, max_value: usize) -> Option<usize> {
    if value.is_nan() || value < 0.0 {
        return None;
    }
    // Checked non-negative and not NaN above
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let index = value as usize;
    if index >= max_value {
        None
    } else {
        Some(index)
    }
}

/// Round a fractional pixel offset to the nearest whole pixel.
///
/// Returns `None` for NaN or values outside the `i64` range.
#[inline]
#[must_use]
pub fn round_to_i64(value: f64) -> Option<i64> {
    let rounded = value.round();
    #[allow(clippy::cast_precision_loss)]
    if rounded.is_nan() || rounded < i64::MIN as f64 || rounded > i64::MAX as f64 {
        return None;
    }
    #[allow(clippy::cast_possible_truncation)]
    Some(rounded as i64)
}

/// Number of whole pixels of size `pixel_size` needed to cover `span`.
///
/// The count is rounded up, ignoring overshoot smaller than
/// [`EXTENT_EPSILON`] of a pixel.
#[inline]
#[must_use]
pub fn ceil_pixel_count(span: f64, pixel_size: f64) -> usize {
    let pixels = (span / pixel_size.abs()) - EXTENT_EPSILON;
    if pixels.is_nan() || pixels <= 0.0 {
        return 0;
    }
    // Checked positive above
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    {
        pixels.ceil() as usize
    }
}
