use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Instant;

use clap::{Parser, Subcommand, ValueEnum};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use geotiler::{
    GeoTiffCompression, InputOrder, MergeOptions, MosaicCompositor, RasterDescriptor, ScanOptions, TileOptions,
    TileWriter, DEFAULT_MAX_SAMPLES,
};

/// Order in which tiles found in a folder are merged.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum Order {
    /// By the offset encoded in `tile_x…_y…` names.
    Offset,
    /// Lexical file name order.
    Name,
    /// Oldest modification time first.
    Modified,
}

impl From<Order> for InputOrder {
    fn from(order: Order) -> Self {
        match order {
            Order::Offset => InputOrder::ByTileOffset,
            Order::Name => InputOrder::ByName,
            Order::Modified => InputOrder::ByModified,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum OutputCompression {
    None,
    Lzw,
    Deflate,
}

impl From<OutputCompression> for GeoTiffCompression {
    fn from(c: OutputCompression) -> Self {
        match c {
            OutputCompression::None => GeoTiffCompression::None,
            OutputCompression::Lzw => GeoTiffCompression::Lzw,
            OutputCompression::Deflate => GeoTiffCompression::Deflate,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "geotiler", version, about = "Tile GeoTIFF rasters and mosaic tiles back together")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Split a raster into tiles named tile_x{x}_y{y}.tif
    Tile {
        input: PathBuf,
        output_dir: PathBuf,

        /// Tile edge in pixels
        #[arg(long, default_value_t = 1024)]
        tile_size: usize,

        /// Write tiles with internal 256x256 TIFF tiling
        #[arg(long, default_value_t = false)]
        tiled: bool,

        /// Read and write tiles on all cores
        #[arg(long, default_value_t = false)]
        parallel: bool,
    },
    /// Merge a folder of rasters into one mosaic (later inputs win on overlap)
    Merge {
        input_dir: PathBuf,
        output: PathBuf,

        #[arg(long, value_enum, default_value_t = OutputCompression::None)]
        compression: OutputCompression,

        #[arg(long, value_enum, default_value_t = Order::Offset)]
        order: Order,

        /// Descend into subdirectories
        #[arg(long, default_value_t = false)]
        recursive: bool,

        /// Fail when the folder holds no rasters
        #[arg(long, default_value_t = false)]
        strict: bool,

        /// Abort on the first input that cannot be read
        #[arg(long, default_value_t = false)]
        all_or_nothing: bool,

        /// Write the mosaic with internal tiles of this edge length
        #[arg(long)]
        block_size: Option<usize>,

        /// Largest mosaic to allocate, in samples
        #[arg(long, default_value_t = DEFAULT_MAX_SAMPLES)]
        max_samples: usize,
    },
    /// Print a raster's metadata
    Info { input: PathBuf },
}

fn run(args: Args) -> geotiler::Result<()> {
    match args.command {
        Command::Tile {
            input,
            output_dir,
            tile_size,
            tiled,
            parallel,
        } => {
            let raster = RasterDescriptor::open(&input)?;
            info!(raster = %raster, "Tiling");
            let options = TileOptions::default()
                .with_tile_size(tile_size)
                .with_tiled(tiled)
                .with_parallel(parallel);
            let started = Instant::now();
            let count = TileWriter::new(options).write_tiles(&raster, &output_dir)?;
            info!(tiles = count, elapsed_ms = started.elapsed().as_millis(), "Done");
        }
        Command::Merge {
            input_dir,
            output,
            compression,
            order,
            recursive,
            strict,
            all_or_nothing,
            block_size,
            max_samples,
        } => {
            let scan = if recursive { ScanOptions::recursive() } else { ScanOptions::default() }.with_order(order.into());
            let options = MergeOptions::default()
                .with_compression(compression.into())
                .with_strict_empty(strict)
                .with_all_or_nothing(all_or_nothing)
                .with_tiled(block_size.is_some(), block_size.map(|edge| (edge, edge)))
                .with_max_samples(max_samples);
            let started = Instant::now();
            let outcome = MosaicCompositor::new(options).merge_directory(&input_dir, &output, &scan)?;
            for failure in &outcome.failures {
                warn!(%failure, "Input skipped");
            }
            info!(
                written = outcome.written,
                width = outcome.width,
                height = outcome.height,
                merged = outcome.inputs_merged,
                elapsed_ms = started.elapsed().as_millis(),
                "Done"
            );
        }
        Command::Info { input } => {
            let raster = RasterDescriptor::open(&input)?;
            let bounds = raster.bounds();
            println!("{raster}");
            println!("transform: {}", raster.transform);
            println!("crs: {}", raster.crs_label());
            println!(
                "bounds: ({}, {}) - ({}, {})",
                bounds.minx, bounds.miny, bounds.maxx, bounds.maxy
            );
            println!("compression: {:?}, tiled: {}, block: {:?}", raster.compression, raster.tiled, raster.block_size);
            if let Some(nodata) = raster.nodata {
                println!("nodata: {nodata}");
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "geotiler failed");
            ExitCode::FAILURE
        }
    }
}
