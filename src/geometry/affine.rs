//! Pixel ↔ world affine transform.

use std::fmt;

use crate::error::{Result, TilerError};

/// Six-coefficient affine mapping from pixel (column, row) to world (x, y).
///
/// ```text
/// world_x = a * col + b * row + c
/// world_y = d * col + e * row + f
/// ```
///
/// `a` and `e` are the pixel width and height (`e` is negative for
/// north-up rasters), `b` and `d` are rotation terms, `(c, f)` is the world
/// position of the top-left corner of pixel (0, 0).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AffineTransform {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl AffineTransform {
    #[must_use]
    pub const fn new(a: f64, b: f64, c: f64, d: f64, e: f64, f: f64) -> Self {
        Self { a, b, c, d, e, f }
    }

    /// The identity transform (pixel space == world space).
    #[must_use]
    pub const fn identity() -> Self {
        Self::new(1.0, 0.0, 0.0, 0.0, 1.0, 0.0)
    }

    /// North-up transform from an origin and pixel size, as stored by the
    /// GeoTIFF `ModelTiepoint` + `ModelPixelScale` pair.
    #[must_use]
    pub const fn from_origin(origin_x: f64, origin_y: f64, pixel_width: f64, pixel_height: f64) -> Self {
        Self::new(pixel_width, 0.0, origin_x, 0.0, -pixel_height, origin_y)
    }

    /// Build from a GDAL-ordered geotransform
    /// `[origin_x, pixel_width, row_rotation, origin_y, col_rotation, pixel_height]`.
    #[must_use]
    pub const fn from_gdal(gt: [f64; 6]) -> Self {
        Self::new(gt[1], gt[2], gt[0], gt[4], gt[5], gt[3])
    }

    /// GDAL-ordered geotransform coefficients.
    #[must_use]
    pub const fn to_gdal(&self) -> [f64; 6] {
        [self.c, self.a, self.b, self.f, self.d, self.e]
    }

    /// World position of the top-left corner of pixel (0, 0).
    #[must_use]
    pub const fn origin(&self) -> (f64, f64) {
        (self.c, self.f)
    }

    /// Pixel size as `(width, height)`, signs preserved.
    #[must_use]
    pub const fn pixel_size(&self) -> (f64, f64) {
        (self.a, self.e)
    }

    /// True when there are no rotation terms.
    #[must_use]
    pub fn is_rectilinear(&self) -> bool {
        self.b == 0.0 && self.d == 0.0
    }

    #[must_use]
    pub fn determinant(&self) -> f64 {
        self.a * self.e - self.b * self.d
    }

    /// Transform of the sub-region whose top-left pixel sits at
    /// `(pixel_dx, pixel_dy)` in this transform's pixel space.
    ///
    /// Only the origin moves; `a`, `b`, `d` and `e` are copied unchanged so
    /// tiles reassemble without scale drift.
    #[must_use]
    pub fn compose(&self, pixel_dx: f64, pixel_dy: f64) -> Self {
        Self {
            c: self.a * pixel_dx + self.b * pixel_dy + self.c,
            f: self.d * pixel_dx + self.e * pixel_dy + self.f,
            ..*self
        }
    }

    /// Transform of a resampled grid where each new pixel spans `sx` by
    /// `sy` of the current pixels. The origin is unchanged.
    #[must_use]
    pub fn scaled(&self, sx: f64, sy: f64) -> Self {
        Self {
            a: self.a * sx,
            b: self.b * sy,
            d: self.d * sx,
            e: self.e * sy,
            ..*self
        }
    }

    /// Map a pixel-space position to world coordinates.
    #[must_use]
    pub fn pixel_to_world(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.a * col + self.b * row + self.c,
            self.d * col + self.e * row + self.f,
        )
    }

    /// Map world coordinates to a (fractional) pixel-space position.
    ///
    /// # Errors
    /// Returns [`TilerError::DegenerateTransform`] if the transform is singular.
    pub fn world_to_pixel(&self, x: f64, y: f64) -> Result<(f64, f64)> {
        let inverse = self.inverse()?;
        Ok(inverse.pixel_to_world(x, y))
    }

    /// The inverse mapping, world → pixel.
    ///
    /// # Errors
    /// Returns [`TilerError::DegenerateTransform`] if the transform is singular.
    pub fn inverse(&self) -> Result<Self> {
        let determinant = self.determinant();
        if determinant == 0.0 || !determinant.is_finite() {
            return Err(TilerError::DegenerateTransform { determinant });
        }
        let inv_a = self.e / determinant;
        let inv_b = -self.b / determinant;
        let inv_d = -self.d / determinant;
        let inv_e = self.a / determinant;
        Ok(Self {
            a: inv_a,
            b: inv_b,
            c: -(inv_a * self.c + inv_b * self.f),
            d: inv_d,
            e: inv_e,
            f: -(inv_d * self.c + inv_e * self.f),
        })
    }

    /// World-space corners of a `width` x `height` pixel rectangle, in
    /// order top-left, top-right, bottom-right, bottom-left.
    #[must_use]
    pub fn corners(&self, width: usize, height: usize) -> [(f64, f64); 4] {
        #[allow(clippy::cast_precision_loss)]
        let (w, h) = (width as f64, height as f64);
        [
            self.pixel_to_world(0.0, 0.0),
            self.pixel_to_world(w, 0.0),
            self.pixel_to_world(w, h),
            self.pixel_to_world(0.0, h),
        ]
    }
}

impl Default for AffineTransform {
    fn default() -> Self {
        Self::identity()
    }
}

impl fmt::Display for AffineTransform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "|{:.6}, {:.6}, {:.6}|\n|{:.6}, {:.6}, {:.6}|",
            self.a, self.b, self.c, self.d, self.e, self.f
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn utm_transform() -> AffineTransform {
        AffineTransform::from_origin(500_000.0, 4_010_000.0, 10.0, 10.0)
    }

    #[test]
    fn test_compose_shifts_origin_only() {
        let t = utm_transform();
        let tile = t.compose(1024.0, 2048.0);

        assert_eq!(tile.a.to_bits(), t.a.to_bits());
        assert_eq!(tile.b.to_bits(), t.b.to_bits());
        assert_eq!(tile.d.to_bits(), t.d.to_bits());
        assert_eq!(tile.e.to_bits(), t.e.to_bits());
        assert_eq!(tile.origin(), (510_240.0, 3_989_520.0));
    }

    #[test]
    fn test_compose_matches_parent_pixel() {
        let t = AffineTransform::new(0.5, 0.1, 100.0, -0.2, -0.5, 200.0);
        for (dx, dy) in [(0.0, 0.0), (3.0, 7.0), (1024.0, 452.0)] {
            let tile = t.compose(dx, dy);
            let (x1, y1) = tile.pixel_to_world(0.0, 0.0);
            let (x2, y2) = t.pixel_to_world(dx, dy);
            assert!((x1 - x2).abs() < 1e-9);
            assert!((y1 - y2).abs() < 1e-9);
        }
    }

    #[test]
    fn test_world_to_pixel_roundtrip() {
        let t = AffineTransform::new(2.0, 0.5, 10.0, 0.25, -3.0, 50.0);
        let (x, y) = t.pixel_to_world(12.5, 7.25);
        let (col, row) = t.world_to_pixel(x, y).unwrap();
        assert!((col - 12.5).abs() < 1e-9);
        assert!((row - 7.25).abs() < 1e-9);
    }

    #[test]
    fn test_degenerate_transform() {
        let t = AffineTransform::new(0.0, 0.0, 10.0, 0.0, -1.0, 50.0);
        assert!(matches!(
            t.world_to_pixel(0.0, 0.0),
            Err(TilerError::DegenerateTransform { .. })
        ));

        let collinear = AffineTransform::new(1.0, 2.0, 0.0, 2.0, 4.0, 0.0);
        assert!(collinear.inverse().is_err());
    }

    #[test]
    fn test_scaled_keeps_origin() {
        let t = utm_transform();
        let preview = t.scaled(4.0, 2.0);
        assert_eq!(preview.origin(), t.origin());
        assert_eq!(preview.pixel_size(), (40.0, -20.0));
    }

    #[test]
    fn test_gdal_order_roundtrip() {
        let gt = [500_000.0, 10.0, 0.0, 4_010_000.0, 0.0, -10.0];
        let t = AffineTransform::from_gdal(gt);
        assert_eq!(t, utm_transform());
        assert_eq!(t.to_gdal(), gt);
    }

    #[test]
    fn test_corners() {
        let t = AffineTransform::from_origin(0.0, 100.0, 1.0, 1.0);
        let corners = t.corners(10, 20);
        assert_eq!(corners[0], (0.0, 100.0));
        assert_eq!(corners[2], (10.0, 80.0));
    }
}
