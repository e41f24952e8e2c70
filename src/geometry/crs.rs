//! Coordinate reference system identity.
//!
//! Rasters carry their CRS as an EPSG code when the GeoKeys name one, and
//! always keep the raw [`GeoKeys`] read from the file so user-defined
//! systems survive tiling and can still be compared. No reprojection is done
//! anywhere in this crate; the `crs-definitions` database is only used to
//! tell geographic from projected systems.

use std::fmt;

/// An EPSG-coded coordinate reference system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Crs(u16);

impl Crs {
    /// WGS 84 geographic coordinates.
    pub const WGS84: Crs = Crs(4326);
    /// Web Mercator.
    pub const WEB_MERCATOR: Crs = Crs(3857);

    #[must_use]
    pub const fn from_epsg(code: u16) -> Self {
        Self(code)
    }

    #[must_use]
    pub const fn epsg(self) -> u16 {
        self.0
    }

    /// PROJ4 definition from the crs-definitions database, if known.
    #[must_use]
    pub fn proj_string(self) -> Option<&'static str> {
        crs_definitions::from_code(self.0).map(|def| def.proj4)
    }

    /// Whether this is a geographic (lon/lat) CRS.
    #[must_use]
    pub fn is_geographic(self) -> bool {
        if let Some(proj_str) = self.proj_string() {
            proj_str.contains("+proj=longlat")
        } else {
            // Geographic codes mostly live in 4000..5000
            (4000..5000).contains(&self.0)
        }
    }
}

impl fmt::Display for Crs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EPSG:{}", self.0)
    }
}

/// Display helper for an optional CRS.
#[must_use]
pub fn describe(crs: Option<Crs>) -> String {
    crs.map_or_else(|| "unknown".to_string(), |c| c.to_string())
}

/// GeoTIFF georeferencing keys as stored in the file.
///
/// Written back verbatim, so CRSs without an EPSG code are not lost.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeoKeys {
    /// `GeoKeyDirectoryTag` values.
    pub directory: Vec<u16>,
    /// `GeoDoubleParamsTag` values.
    pub doubles: Vec<f64>,
    /// `GeoAsciiParamsTag` text, `|`-separated.
    pub ascii: String,
}

impl GeoKeys {
    /// First non-empty ASCII parameter, usually a CRS citation.
    #[must_use]
    pub fn citation(&self) -> Option<&str> {
        self.ascii.split('|').map(str::trim).find(|s| !s.is_empty())
    }
}
