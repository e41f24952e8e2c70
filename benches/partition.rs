//! Benchmarks for window enumeration and mosaic placement.
//!
//! Run with: `cargo bench`

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;

use geotiler::{AffineTransform, BoundingBox, Extent, GridPartitioner, MosaicGrid, PixelBuffer};

/// Enumerate windows and derive each tile transform, as tiling does
fn bench_partition(c: &mut Criterion) {
    let parent = AffineTransform::from_origin(500_000.0, 6_000_000.0, 0.5, 0.5);
    let mut group = c.benchmark_group("partition");

    for tile_size in [256usize, 512, 1024] {
        let grid = GridPartitioner::new(40_000, 40_000, tile_size).unwrap();
        group.bench_with_input(BenchmarkId::new("tile_size", tile_size), &grid, |b, grid| {
            b.iter(|| {
                let mut checksum = 0.0;
                for window in grid.windows() {
                    checksum += window.transform(&parent).c;
                }
                black_box(checksum)
            });
        });
    }

    group.finish();
}

/// Place one tile on a mosaic grid, aligned and resampled
fn bench_place(c: &mut Criterion) {
    let extent = Extent {
        transform: AffineTransform::from_origin(0.0, 2048.0, 1.0, 1.0),
        width: 2048,
        height: 2048,
        bounds: BoundingBox::new(0.0, 0.0, 2048.0, 2048.0),
        crs: None,
    };
    let tile = PixelBuffer::filled(512, 512, 3, 128.0);
    let aligned = AffineTransform::from_origin(512.0, 1536.0, 1.0, 1.0);
    let finer = AffineTransform::from_origin(512.0, 1536.0, 0.5, 0.5);

    let mut group = c.benchmark_group("place");
    group.bench_function("aligned", |b| {
        let mut grid = MosaicGrid::new(&extent, 3, 0.0).unwrap();
        b.iter(|| black_box(grid.place(&tile, &aligned, None).unwrap()));
    });
    group.bench_function("resampled", |b| {
        let mut grid = MosaicGrid::new(&extent, 3, 0.0).unwrap();
        b.iter(|| black_box(grid.place(&tile, &finer, None).unwrap()));
    });
    group.finish();
}

criterion_group!(benches, bench_partition, bench_place);
criterion_main!(benches);
