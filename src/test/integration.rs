use std::fs;
use std::sync::Arc;

use geo_0_31::{polygon, Contains, Point};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tempfile::TempDir;

use crate::codec::{encode_f64, encode_i64};
use crate::config::{DeviceConfig, EngineConfig, ExecutionMode};
use crate::device::DevicePool;
use crate::engine::{Engine, EnginePool};
use crate::kdtree::build_files;
use crate::paths::IndexPaths;
use crate::query::{QueryBox, QuerySpec};
use crate::shim::{IndexSpec, KdAccessMethod, RecordLocation};

const MODES: [ExecutionMode; 4] = [
    ExecutionMode::FullScan,
    ExecutionMode::TreeFiltered,
    ExecutionMode::Resident,
    ExecutionMode::Cpu,
];

/// Uniform points in [0, 1000]² with a timestamp a minute apart.
struct Trips {
    _dir: TempDir,
    paths: IndexPaths,
    points: Vec<(f64, f64, i64)>,
}

fn trips(n: usize, block_capacity: usize) -> Trips {
    let dir = tempfile::tempdir().unwrap();
    let paths = IndexPaths::new(dir.path().join("taxi.trips.kd"));
    let mut rng = StdRng::seed_from_u64(2013);
    let points: Vec<(f64, f64, i64)> = (0..n)
        .map(|i| {
            (
                rng.gen_range(0.0..=1000.0),
                rng.gen_range(0.0..=1000.0),
                1_356_998_400 + 60 * i as i64,
            )
        })
        .collect();

    let mut words = Vec::with_capacity(n * 4);
    for (i, (x, y, t)) in points.iter().enumerate() {
        words.extend([encode_f64(*x), encode_f64(*y), encode_i64(*t), i as u64]);
    }
    fs::write(paths.data(), bytemuck::cast_slice::<u64, u8>(&words)).unwrap();
    let summary = build_files(&paths.data(), &paths, 3, block_capacity).unwrap();
    assert_eq!(summary.records, n as u64);

    Trips {
        _dir: dir,
        paths,
        points,
    }
}

fn device_pool() -> Arc<DevicePool> {
    Arc::new(
        DevicePool::start(
            DeviceConfig::default()
                .with_devices(2)
                .with_arena_bytes(4 << 20),
        )
        .unwrap(),
    )
}

fn spatial_query(x: (f64, f64), y: (f64, f64)) -> QuerySpec {
    let mut query_box = QueryBox::open(3);
    query_box
        .intersect_values(0, x.0, x.1)
        .intersect_values(1, y.0, y.1);
    QuerySpec::new(query_box)
}

fn brute_force(points: &[(f64, f64, i64)], x: (f64, f64), y: (f64, f64)) -> Vec<u64> {
    points
        .iter()
        .enumerate()
        .filter(|(_, (px, py, _))| x.0 <= *px && *px <= x.1 && y.0 <= *py && *py <= y.1)
        .map(|(i, _)| i as u64)
        .collect()
}

#[test]
fn ten_thousand_points_in_one_box() {
    let trips = trips(10_000, 4096);
    let config = EngineConfig::default().with_block_capacity(4096);
    let engine = Engine::open(&trips.paths, 3, config, Some(device_pool())).unwrap();
    assert_eq!(engine.record_count(), 10_000);

    let query = spatial_query((100.0, 200.0), (100.0, 200.0));
    let expected = brute_force(&trips.points, (100.0, 200.0), (100.0, 200.0));
    // a hundredth of the area
    assert!((50..150).contains(&expected.len()), "{}", expected.len());
    for mode in MODES {
        let pending = engine.submit_with_mode(query.clone(), mode).unwrap();
        assert_eq!(engine.collect(pending).unwrap(), expected, "{:?}", mode);
    }
}

#[test]
fn universal_box_returns_every_record_once() {
    let trips = trips(5_000, 64);
    let config = EngineConfig::default().with_block_capacity(64);
    let engine = Engine::open(&trips.paths, 3, config, Some(device_pool())).unwrap();
    let all: Vec<u64> = (0..5_000).collect();
    for mode in MODES {
        let pending = engine.submit_with_mode(QuerySpec::open(3), mode).unwrap();
        assert_eq!(engine.collect(pending).unwrap(), all, "{:?}", mode);
    }
}

#[test]
fn random_boxes_agree_across_modes() {
    let trips = trips(4_000, 32);
    let config = EngineConfig::default().with_block_capacity(32);
    let engine = Engine::open(&trips.paths, 3, config, Some(device_pool())).unwrap();
    let mut rng = StdRng::seed_from_u64(99);
    for _ in 0..20 {
        let x0 = rng.gen_range(0.0..1000.0);
        let y0 = rng.gen_range(0.0..1000.0);
        let x = (x0, x0 + rng.gen_range(0.0..300.0));
        let y = (y0, y0 + rng.gen_range(0.0..300.0));
        // half of the time window as well
        let mut query = spatial_query(x, y);
        let (t0, t1) = (trips.points[0].2, trips.points[1_999].2);
        query.query_box.intersect_values(2, t0, t1);

        let expected: Vec<u64> = brute_force(&trips.points, x, y)
            .into_iter()
            .filter(|i| *i < 2_000)
            .collect();
        for mode in MODES {
            let pending = engine.submit_with_mode(query.clone(), mode).unwrap();
            assert_eq!(engine.collect(pending).unwrap(), expected, "{:?}", mode);
        }
    }
}

#[test]
fn documents_to_cursor() {
    let dir = tempfile::tempdir().unwrap();
    let engines = Arc::new(EnginePool::new(
        EngineConfig::default().with_block_capacity(128),
        Some(device_pool()),
    ));
    let base = KdAccessMethod::file_name(dir.path(), "taxi.trips", "pickup_2d_dropoff_2d_time_1");
    let index = KdAccessMethod::new(IndexPaths::new(base), engines);

    let mut rng = StdRng::seed_from_u64(17);
    let docs: Vec<_> = (0..3_000u32)
        .map(|i| {
            let doc = json!({
                "pickup": [rng.gen_range(0.0..1000.0), rng.gen_range(0.0..1000.0)],
                "dropoff": {"x": rng.gen_range(0.0..1000.0), "y": rng.gen_range(0.0..1000.0)},
                "time": 1_356_998_400 + 60 * i64::from(i),
            });
            (doc, RecordLocation::new(i / 1000, i % 1000))
        })
        .collect();
    let spec = IndexSpec::from_key_pattern(&json!({
        "pickup": "2d",
        "dropoff": "2d",
        "time": 1,
    }))
    .unwrap();
    let report = index.build(&spec, docs.clone().into_iter()).unwrap();
    assert_eq!(report.records, 3_000);

    // pickups inside a triangle, dropoffs in a box, the first half of the day
    let triangle = polygon![(x: 100.0, y: 100.0), (x: 900.0, y: 100.0), (x: 100.0, y: 900.0)];
    let mut cursor = index.new_cursor().unwrap();
    cursor
        .seek(&json!({
            "pickup": {"$within": {"$polygon": [[100, 100], [900, 100], [100, 900]]}},
            "dropoff": {"$within": {"$box": [[0, 0], [500, 1000]]}},
            "time": {"$lt": 1_356_998_400 + 12 * 3600},
        }))
        .unwrap();
    let found: Vec<RecordLocation> = cursor.collect();

    let expected: Vec<RecordLocation> = docs
        .iter()
        .filter(|(doc, _)| {
            let pickup = Point::new(
                doc["pickup"][0].as_f64().unwrap(),
                doc["pickup"][1].as_f64().unwrap(),
            );
            let dropoff_x = doc["dropoff"]["x"].as_f64().unwrap();
            triangle.contains(&pickup)
                && dropoff_x <= 500.0
                && doc["time"].as_i64().unwrap() < 1_356_998_400 + 12 * 3600
        })
        .map(|(_, loc)| *loc)
        .collect();
    assert!(!expected.is_empty());
    assert_eq!(found, expected);
}
