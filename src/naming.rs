//! Tile file naming.
//!
//! Tiles are named `tile_x{offset_x:05}_y{offset_y:05}.{ext}` after the pixel
//! offset of their top-left corner in the parent raster. Offsets above
//! 99999 still produce unique names, but they are wider than five digits
//! and no longer sort lexically; use [`parse_tile_name`] to order them.

/// Widest offset that keeps the fixed five-digit layout.
pub const MAX_PADDED_OFFSET: usize = 99_999;

/// Default extension for written tiles.
pub const DEFAULT_EXTENSION: &str = "tif";

/// File name for the tile whose top-left pixel is `(offset_x, offset_y)`.
///
/// ```
/// assert_eq!(geotiler::naming::tile_name(0, 1024, "tif"), "tile_x00000_y01024.tif");
/// ```
#[must_use]
pub fn tile_name(offset_x: usize, offset_y: usize, extension: &str) -> String {
    let extension = extension.trim_start_matches('.');
    format!("tile_x{offset_x:05}_y{offset_y:05}.{extension}")
}

/// Recover `(offset_x, offset_y)` from a tile file name.
///
/// Accepts names with or without an extension; returns `None` for anything
/// not produced by [`tile_name`].
#[must_use]
pub fn parse_tile_name(name: &str) -> Option<(usize, usize)> {
    let stem = name.split_once('.').map_or(name, |(stem, _)| stem);
    let rest = stem.strip_prefix("tile_x")?;
    let (x, y) = rest.split_once("_y")?;
    if x.is_empty() || y.is_empty() || !x.bytes().all(|b| b.is_ascii_digit()) || !y.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some((x.parse().ok()?, y.parse().ok()?))
}
