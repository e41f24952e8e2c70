//! Regular grid partitioning of a raster into tile windows.
//!
//! Windows are enumerated column-major-outer: every row of tiles for the
//! first tile column, then every row for the next column, and so on. The
//! last window along each axis is clipped to whatever pixels remain.
//!
//! ```
//! use geotiler::GridPartitioner;
//!
//! let grid = GridPartitioner::new(2500, 2500, 1024).unwrap();
//! let sizes: Vec<_> = grid.windows().map(|w| (w.width, w.height)).collect();
//! assert_eq!(sizes[2], (1024, 452));
//! assert_eq!(grid.len(), 9);
//! ```

use std::iter::FusedIterator;

use crate::error::{Result, TilerError};
use crate::geometry::Window;

/// Tile grid over a `width` x `height` raster.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridPartitioner {
    width: usize,
    height: usize,
    tile_size: usize,
}

impl GridPartitioner {
    /// # Errors
    /// Returns [`TilerError::InvalidTileSize`] if `tile_size` is zero.
    pub fn new(width: usize, height: usize, tile_size: usize) -> Result<Self> {
        if tile_size == 0 {
            return Err(TilerError::InvalidTileSize(0));
        }
        Ok(Self { width, height, tile_size })
    }

    /// Like [`GridPartitioner::new`] but accepts a signed tile size, as
    /// handed over by callers that do not validate input.
    ///
    /// # Errors
    /// Returns [`TilerError::InvalidTileSize`] if `tile_size <= 0`.
    pub fn with_signed_tile_size(width: usize, height: usize, tile_size: i64) -> Result<Self> {
        let size = usize::try_from(tile_size)
            .ok()
            .filter(|&s| s > 0)
            .ok_or(TilerError::InvalidTileSize(tile_size))?;
        Self::new(width, height, size)
    }

    #[must_use]
    pub const fn tile_size(&self) -> usize {
        self.tile_size
    }

    /// Tiles along the x axis.
    #[must_use]
    pub const fn columns(&self) -> usize {
        self.width.div_ceil(self.tile_size)
    }

    /// Tiles along the y axis.
    #[must_use]
    pub const fn rows(&self) -> usize {
        self.height.div_ceil(self.tile_size)
    }

    /// Total number of windows.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.columns() * self.rows()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Lazy, restartable sequence of windows in column-major-outer order.
    #[must_use]
    pub fn windows(&self) -> Windows {
        Windows {
            grid: *self,
            next: 0,
            end: self.len(),
        }
    }

    /// Window at position `index` of the enumeration order.
    #[must_use]
    pub fn window_at(&self, index: usize) -> Option<Window> {
        if index >= self.len() {
            return None;
        }
        let rows = self.rows();
        let offset_x = (index / rows) * self.tile_size;
        let offset_y = (index % rows) * self.tile_size;
        Some(Window::new(
            offset_x,
            offset_y,
            self.tile_size.min(self.width - offset_x),
            self.tile_size.min(self.height - offset_y),
        ))
    }
}

impl IntoIterator for &GridPartitioner {
    type Item = Window;
    type IntoIter = Windows;

    fn into_iter(self) -> Windows {
        self.windows()
    }
}

/// Iterator over the windows of a [`GridPartitioner`].
#[derive(Debug, Clone)]
pub struct Windows {
    grid: GridPartitioner,
    next: usize,
    end: usize,
}

impl Iterator for Windows {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        if self.next >= self.end {
            return None;
        }
        let window = self.grid.window_at(self.next);
        self.next += 1;
        window
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.next;
        (remaining, Some(remaining))
    }

    fn nth(&mut self, n: usize) -> Option<Window> {
        self.next = self.next.saturating_add(n).min(self.end);
        self.next()
    }
}

impl DoubleEndedIterator for Windows {
    fn next_back(&mut self) -> Option<Window> {
        if self.next >= self.end {
            return None;
        }
        self.end -= 1;
        self.grid.window_at(self.end)
    }
}

impl ExactSizeIterator for Windows {}

impl FusedIterator for Windows {}
