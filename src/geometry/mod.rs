//! Geometry primitives: affine transforms, pixel windows and world-space
//! bounding boxes.

pub mod affine;
pub mod crs;

use std::fmt;

pub use affine::AffineTransform;
pub use crs::{Crs, GeoKeys};

use crate::error::{Result, TilerError};

/// Pixel-space rectangle addressing a sub-region of a raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Window {
    pub offset_x: usize,
    pub offset_y: usize,
    pub width: usize,
    pub height: usize,
}

impl Window {
    #[must_use]
    pub const fn new(offset_x: usize, offset_y: usize, width: usize, height: usize) -> Self {
        Self { offset_x, offset_y, width, height }
    }

    /// Window covering an entire `width` x `height` raster.
    #[must_use]
    pub const fn full(width: usize, height: usize) -> Self {
        Self::new(0, 0, width, height)
    }

    #[must_use]
    pub const fn area(&self) -> usize {
        self.width * self.height
    }

    /// Exclusive right edge in parent pixel space.
    #[must_use]
    pub const fn end_x(&self) -> usize {
        self.offset_x + self.width
    }

    /// Exclusive bottom edge in parent pixel space.
    #[must_use]
    pub const fn end_y(&self) -> usize {
        self.offset_y + self.height
    }

    #[must_use]
    pub const fn contains(&self, col: usize, row: usize) -> bool {
        col >= self.offset_x && col < self.end_x() && row >= self.offset_y && row < self.end_y()
    }

    /// Check that this window is non-empty and lies inside a
    /// `parent_width` x `parent_height` raster.
    ///
    /// # Errors
    /// Returns [`TilerError::InvalidWindow`] otherwise.
    pub fn validate(&self, parent_width: usize, parent_height: usize) -> Result<()> {
        let inside = self.width > 0
            && self.height > 0
            && self.offset_x < parent_width
            && self.offset_y < parent_height
            && self.end_x() <= parent_width
            && self.end_y() <= parent_height;
        if inside {
            Ok(())
        } else {
            Err(TilerError::InvalidWindow {
                window: self.to_string(),
                width: parent_width,
                height: parent_height,
            })
        }
    }

    /// Transform of this window given its parent's transform.
    #[must_use]
    pub fn transform(&self, parent: &AffineTransform) -> AffineTransform {
        #[allow(clippy::cast_precision_loss)]
        parent.compose(self.offset_x as f64, self.offset_y as f64)
    }
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Window(col_off={}, row_off={}, width={}, height={})",
            self.offset_x, self.offset_y, self.width, self.height
        )
    }
}

/// Axis-aligned bounding box in world coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub minx: f64,
    pub miny: f64,
    pub maxx: f64,
    pub maxy: f64,
}

impl BoundingBox {
    #[must_use]
    pub const fn new(minx: f64, miny: f64, maxx: f64, maxy: f64) -> Self {
        Self { minx, miny, maxx, maxy }
    }

    /// Smallest box containing all `points`. Returns `None` for no points.
    #[must_use]
    pub fn from_points(points: &[(f64, f64)]) -> Option<Self> {
        let (&(x0, y0), rest) = points.split_first()?;
        let mut bbox = Self::new(x0, y0, x0, y0);
        for &(x, y) in rest {
            bbox.minx = bbox.minx.min(x);
            bbox.miny = bbox.miny.min(y);
            bbox.maxx = bbox.maxx.max(x);
            bbox.maxy = bbox.maxy.max(y);
        }
        Some(bbox)
    }

    /// World-space footprint of a `width` x `height` raster.
    #[must_use]
    pub fn of_raster(transform: &AffineTransform, width: usize, height: usize) -> Self {
        let corners = transform.corners(width, height);
        // Four corners are always present
        Self::from_points(&corners).unwrap_or(Self::new(0.0, 0.0, 0.0, 0.0))
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            minx: self.minx.min(other.minx),
            miny: self.miny.min(other.miny),
            maxx: self.maxx.max(other.maxx),
            maxy: self.maxy.max(other.maxy),
        }
    }

    #[must_use]
    pub fn width(&self) -> f64 {
        self.maxx - self.minx
    }

    #[must_use]
    pub fn height(&self) -> f64 {
        self.maxy - self.miny
    }

    #[must_use]
    pub fn intersects(&self, other: &Self) -> bool {
        !(self.maxx <= other.minx
            || self.minx >= other.maxx
            || self.maxy <= other.miny
            || self.miny >= other.maxy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_validate() {
        assert!(Window::new(0, 0, 10, 10).validate(10, 10).is_ok());
        assert!(Window::new(5, 5, 5, 5).validate(10, 10).is_ok());
        assert!(Window::new(5, 5, 6, 5).validate(10, 10).is_err());
        assert!(Window::new(10, 0, 1, 1).validate(10, 10).is_err());
        assert!(Window::new(0, 0, 0, 4).validate(10, 10).is_err());
    }

    #[test]
    fn test_window_transform() {
        let parent = AffineTransform::from_origin(100.0, 200.0, 2.0, 2.0);
        let w = Window::new(3, 4, 1, 1);
        assert_eq!(w.transform(&parent).origin(), (106.0, 192.0));
    }

    #[test]
    fn test_bbox_of_raster() {
        let t = AffineTransform::from_origin(100.0, 200.0, 2.0, 2.0);
        let bbox = BoundingBox::of_raster(&t, 10, 5);
        assert_eq!(bbox, BoundingBox::new(100.0, 190.0, 120.0, 200.0));
    }

    #[test]
    fn test_bbox_union_and_intersects() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 5.0, 15.0, 15.0);
        let c = BoundingBox::new(10.0, 0.0, 20.0, 10.0);
        assert_eq!(a.union(&b), BoundingBox::new(0.0, 0.0, 15.0, 15.0));
        assert!(a.intersects(&b));
        assert!(!a.intersects(&c), "touching edges do not overlap");
    }
}
