//! Common output grid for a set of rasters.
//!
//! The union of every input's world footprint is covered by a grid that
//! uses the coarsest input pixel size and is anchored at the union's
//! minimum x and maximum y (rows run downward as y decreases).

use tracing::debug;

use crate::casting::ceil_pixel_count;
use crate::error::{Result, TilerError};
use crate::geometry::{AffineTransform, BoundingBox, Crs};
use crate::raster::RasterDescriptor;

/// Output grid shared by all inputs of a merge.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Extent {
    pub transform: AffineTransform,
    pub width: usize,
    pub height: usize,
    /// Union of input footprints in world coordinates.
    pub bounds: BoundingBox,
    pub crs: Option<Crs>,
}

/// Compute the output grid covering all `descriptors`.
///
/// # Errors
/// - [`TilerError::EmptyInputSet`] if there are no descriptors.
/// - [`TilerError::IncompatibleCrs`] if their CRSs differ.
/// - [`TilerError::DegenerateTransform`] if any transform is singular.
pub fn resolve_extent<'a, I>(descriptors: I) -> Result<Extent>
where
    I: IntoIterator<Item = &'a RasterDescriptor>,
{
    let mut iter = descriptors.into_iter();
    let first = iter.next().ok_or(TilerError::EmptyInputSet)?;
    check_transform(&first.transform)?;

    let mut bounds = first.bounds();
    let mut coarsest = first.transform;
    let mut count = 1usize;

    for descriptor in iter {
        if !descriptor.same_crs(first) {
            return Err(TilerError::IncompatibleCrs {
                expected: first.crs_label(),
                found: descriptor.crs_label(),
                path: descriptor.path.clone(),
            });
        }
        check_transform(&descriptor.transform)?;

        bounds = bounds.union(&descriptor.bounds());
        // Strictly coarser only: ties keep the earliest input's scale
        if descriptor.transform.determinant().abs() > coarsest.determinant().abs() {
            coarsest = descriptor.transform;
        }
        count += 1;
    }

    let origin_y = if coarsest.e < 0.0 { bounds.maxy } else { bounds.miny };
    let transform = AffineTransform {
        c: bounds.minx,
        f: origin_y,
        ..coarsest
    };
    let width = ceil_pixel_count(bounds.width(), coarsest.a);
    let height = ceil_pixel_count(bounds.height(), coarsest.e);

    debug!(inputs = count, width, height, crs = %first.crs_label(), "Resolved mosaic extent");

    Ok(Extent {
        transform,
        width,
        height,
        bounds,
        crs: first.crs,
    })
}

fn check_transform(transform: &AffineTransform) -> Result<()> {
    let determinant = transform.determinant();
    if determinant == 0.0 || !determinant.is_finite() || transform.a == 0.0 || transform.e == 0.0 {
        return Err(TilerError::DegenerateTransform { determinant });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::GeoKeys;
    use crate::raster::{Compression, DataType, GTIFF_DRIVER};
    use std::path::PathBuf;

    fn descriptor(name: &str, transform: AffineTransform, width: usize, height: usize) -> RasterDescriptor {
        RasterDescriptor {
            path: PathBuf::from(format!("{name}.tif")),
            name: name.to_string(),
            driver: GTIFF_DRIVER.to_string(),
            width,
            height,
            bands: 1,
            dtype: DataType::UInt8,
            transform,
            crs: Some(Crs::from_epsg(32633)),
            geokeys: None,
            tiled: false,
            block_size: None,
            compression: Compression::None,
            nodata: None,
        }
    }

    #[test]
    fn test_single_input_reproduces_grid() {
        let t = AffineTransform::from_origin(1000.0, 5000.0, 10.0, 10.0);
        let extent = resolve_extent([&descriptor("a", t, 250, 120)]).unwrap();
        assert_eq!(extent.transform, t);
        assert_eq!((extent.width, extent.height), (250, 120));
    }

    #[test]
    fn test_union_of_tiles() {
        let parent = AffineTransform::from_origin(0.0, 100.0, 1.0, 1.0);
        let a = descriptor("a", parent, 64, 64);
        let b = descriptor("b", parent.compose(64.0, 0.0), 36, 64);
        let c = descriptor("c", parent.compose(0.0, 64.0), 64, 10);

        let extent = resolve_extent([&b, &c, &a]).unwrap();
        assert_eq!(extent.transform.origin(), (0.0, 100.0));
        assert_eq!((extent.width, extent.height), (100, 74));
        assert_eq!(extent.bounds, BoundingBox::new(0.0, 26.0, 100.0, 100.0));
    }

    #[test]
    fn test_coarsest_scale_wins() {
        let fine = descriptor("fine", AffineTransform::from_origin(0.0, 100.0, 1.0, 1.0), 100, 100);
        let coarse = descriptor("coarse", AffineTransform::from_origin(50.0, 150.0, 5.0, 5.0), 10, 10);

        let extent = resolve_extent([&fine, &coarse]).unwrap();
        assert_eq!(extent.transform.pixel_size(), (5.0, -5.0));
        assert_eq!(extent.transform.origin(), (0.0, 150.0));
        // x: 0..100 → 20 px, y: 0..150 → 30 px
        assert_eq!((extent.width, extent.height), (20, 30));
    }

    #[test]
    fn test_partial_pixel_rounds_up() {
        let a = descriptor("a", AffineTransform::from_origin(0.0, 10.0, 2.0, 2.0), 5, 5);
        let b = descriptor("b", AffineTransform::from_origin(11.0, 10.0, 2.0, 2.0), 1, 1);
        let extent = resolve_extent([&a, &b]).unwrap();
        // x: 0..13 at 2 units → 6.5 → 7
        assert_eq!(extent.width, 7);
    }

    #[test]
    fn test_empty_input() {
        let none: [&RasterDescriptor; 0] = [];
        assert!(matches!(resolve_extent(none), Err(TilerError::EmptyInputSet)));
    }

    #[test]
    fn test_incompatible_crs() {
        let t = AffineTransform::from_origin(0.0, 10.0, 1.0, 1.0);
        let a = descriptor("a", t, 10, 10);
        let mut b = descriptor("b", t, 10, 10);
        b.crs = Some(Crs::WGS84);

        let err = resolve_extent([&a, &b]).unwrap_err();
        assert!(matches!(err, TilerError::IncompatibleCrs { .. }));
        assert!(err.to_string().contains("EPSG:4326"));
    }

    #[test]
    fn test_user_defined_crs_compared_by_geokeys() {
        let t = AffineTransform::from_origin(0.0, 10.0, 1.0, 1.0);
        let keys = |citation: &str| GeoKeys {
            directory: vec![1, 1, 0, 1, 3072, 0, 1, 32767],
            doubles: Vec::new(),
            ascii: format!("{citation}|"),
        };
        let mut a = descriptor("a", t, 10, 10);
        let mut b = descriptor("b", t.compose(10.0, 0.0), 10, 10);
        a.crs = None;
        b.crs = None;
        a.geokeys = Some(keys("Site grid"));
        b.geokeys = Some(keys("Other grid"));

        let err = resolve_extent([&a, &b]).unwrap_err();
        assert!(err.to_string().contains("user-defined (Other grid)"));

        b.geokeys = Some(keys("Site grid"));
        let extent = resolve_extent([&a, &b]).unwrap();
        assert_eq!(extent.crs, None);
        assert_eq!(extent.width, 20);
    }

    #[test]
    fn test_degenerate_input() {
        let a = descriptor("a", AffineTransform::new(0.0, 0.0, 0.0, 0.0, -1.0, 0.0), 10, 10);
        assert!(matches!(resolve_extent([&a]), Err(TilerError::DegenerateTransform { .. })));
    }
}
