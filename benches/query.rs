use std::sync::Arc;

use criterion::{criterion_group, criterion_main, Criterion};
use kdblock::codec::encode_f64;
use kdblock::device::DevicePool;
use kdblock::kdtree::{KDTreeBuilder, KDTreeIndex, OwnedKDTree};
use kdblock::{DeviceConfig, Engine, EngineConfig, ExecutionMode, IndexPaths, QueryBox, QuerySpec};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BLOCK_CAPACITY: usize = 1024;

fn load_points(n: usize) -> Vec<(f64, f64)> {
    let mut rng = StdRng::seed_from_u64(0);
    (0..n)
        .map(|_| (rng.gen_range(0.0..1000.0), rng.gen_range(0.0..1000.0)))
        .collect()
}

fn construct(points: &[(f64, f64)]) -> OwnedKDTree {
    let mut builder = KDTreeBuilder::new_with_block_capacity(2, BLOCK_CAPACITY);
    for (i, (x, y)) in points.iter().enumerate() {
        builder.add(&[encode_f64(*x), encode_f64(*y)], i as u64);
    }
    builder.finish()
}

fn query_box() -> QueryBox {
    let mut query_box = QueryBox::open(2);
    query_box
        .intersect_values(0, 100.0, 200.0)
        .intersect_values(1, 100.0, 200.0);
    query_box
}

pub fn criterion_benchmark(c: &mut Criterion) {
    let points = load_points(200_000);

    c.bench_function("construction", |b| b.iter(|| construct(&points)));

    let tree = construct(&points);
    c.bench_function("block search", |b| b.iter(|| tree.search(&query_box())));

    let dir = tempfile::tempdir().unwrap();
    let paths = IndexPaths::new(dir.path().join("bench"));
    tree.write_files(&paths).unwrap();
    let devices = Arc::new(
        DevicePool::start(DeviceConfig::default().with_devices(2)).unwrap(),
    );
    let config = EngineConfig::default().with_block_capacity(BLOCK_CAPACITY);
    let engine = Engine::open(&paths, 2, config, Some(devices)).unwrap();

    for (name, mode) in [
        ("query (full scan)", ExecutionMode::FullScan),
        ("query (tree filtered)", ExecutionMode::TreeFiltered),
        ("query (resident)", ExecutionMode::Resident),
        ("query (cpu)", ExecutionMode::Cpu),
    ] {
        c.bench_function(name, |b| {
            b.iter(|| {
                let pending = engine
                    .submit_with_mode(QuerySpec::new(query_box()), mode)
                    .unwrap();
                engine.collect(pending).unwrap()
            })
        });
    }
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
