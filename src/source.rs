//! Tile directory listing.
//!
//! Finds raster files in a folder and puts them in an explicit order, since
//! the filesystem guarantees none and the mosaic's last-write-wins overlap
//! rule depends on it.
//!
//! # Example
//!
//! ```rust,no_run
//! use geotiler::source::{InputOrder, ScanOptions, TileDirectory};
//!
//! fn main() -> geotiler::Result<()> {
//!     let tiles = TileDirectory::scan("tiles/", &ScanOptions::default().with_order(InputOrder::ByName))?;
//!     for entry in tiles.entries() {
//!         println!("{} at {:?}", entry.name, entry.offset);
//!     }
//!     Ok(())
//! }
//! ```

use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use tracing::debug;
use walkdir::WalkDir;

use crate::error::{Result, TilerError};
use crate::naming::parse_tile_name;

/// Order in which discovered files are handed to the mosaic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum InputOrder {
    /// Tiles by parsed `(offset_x, offset_y)`, i.e. the order they were
    /// written in; other files follow by name.
    #[default]
    ByTileOffset,
    /// Lexical file name order.
    ByName,
    /// Oldest modification time first; ties broken by name.
    ByModified,
    /// Whatever order the directory walk produced.
    AsListed,
}

/// Options for scanning a tile directory.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// File extensions to consider (case-insensitive)
    pub extensions: Vec<String>,
    /// Maximum directory depth (1 = only files directly inside the folder)
    pub max_depth: usize,
    /// Whether to follow symbolic links
    pub follow_links: bool,
    pub order: InputOrder,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["tif".to_string(), "tiff".to_string()],
            max_depth: 1,
            follow_links: false,
            order: InputOrder::default(),
        }
    }
}

impl ScanOptions {
    /// Scan subdirectories without a depth limit.
    #[must_use]
    pub fn recursive() -> Self {
        Self {
            max_depth: usize::MAX,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_order(mut self, order: InputOrder) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extensions = extensions.into_iter().map(Into::into).collect();
        self
    }

    fn matches(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| self.extensions.iter().any(|x| x.eq_ignore_ascii_case(ext)))
    }
}

/// A raster file found in a tile directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileEntry {
    pub path: PathBuf,
    /// File name including extension.
    pub name: String,
    /// Offset parsed from a `tile_x…_y…` name.
    pub offset: Option<(usize, usize)>,
    pub size_bytes: u64,
    pub last_modified: Option<SystemTime>,
}

/// Ordered listing of raster files in a folder.
#[derive(Debug, Clone)]
pub struct TileDirectory {
    root: PathBuf,
    entries: Vec<TileEntry>,
}

impl TileDirectory {
    /// List matching files under `root`, sorted per `options.order`.
    ///
    /// # Errors
    /// Returns an error if `root` does not exist or cannot be read.
    pub fn scan<P: AsRef<Path>>(root: P, options: &ScanOptions) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(TilerError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("directory does not exist: {}", root.display()),
            )));
        }

        let walker = WalkDir::new(root)
            .min_depth(1)
            .max_depth(options.max_depth)
            .follow_links(options.follow_links);

        let mut entries = Vec::new();
        for entry in walker {
            let entry = entry?;
            if !entry.file_type().is_file() || !options.matches(entry.path()) {
                continue;
            }
            let meta = entry.metadata()?;
            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push(TileEntry {
                path: entry.path().to_path_buf(),
                offset: parse_tile_name(&name),
                name,
                size_bytes: meta.len(),
                last_modified: meta.modified().ok(),
            });
        }

        sort_entries(&mut entries, options.order);
        debug!(root = %root.display(), count = entries.len(), order = ?options.order, "Scanned tile directory");

        Ok(Self {
            root: root.to_path_buf(),
            entries,
        })
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn entries(&self) -> &[TileEntry] {
        &self.entries
    }

    /// Paths in merge order.
    #[must_use]
    pub fn paths(&self) -> Vec<PathBuf> {
        self.entries.iter().map(|e| e.path.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total size of all files in bytes.
    #[must_use]
    pub fn total_size_bytes(&self) -> u64 {
        self.entries.iter().map(|e| e.size_bytes).sum()
    }
}

fn sort_entries(entries: &mut [TileEntry], order: InputOrder) {
    match order {
        InputOrder::ByTileOffset => entries.sort_by(|a, b| match (a.offset, b.offset) {
            (Some(oa), Some(ob)) => oa.cmp(&ob).then_with(|| a.name.cmp(&b.name)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.name.cmp(&b.name),
        }),
        InputOrder::ByName => entries.sort_by(|a, b| a.name.cmp(&b.name)),
        InputOrder::ByModified => {
            entries.sort_by(|a, b| a.last_modified.cmp(&b.last_modified).then_with(|| a.name.cmp(&b.name)));
        }
        InputOrder::AsListed => {}
    }
}
