use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec::{encode_f64, KeyType};
use crate::config::{DeviceConfig, ExecutionMode};
use crate::device::worker::DeviceWorker;
use crate::device::DevicePool;
use crate::engine::DataSet;
use crate::error::KdError;
use crate::executor::{
    AcceleratorExecutor, BlockSelection, CpuExecutor, Executor, Job, Request, RequestState, Ticket,
};
use crate::kdtree::{KDTreeBuilder, KDTreeIndex, OwnedKDTree};
use crate::query::{QueryBox, QuerySpec, Region};

const BLOCK_CAPACITY: usize = 4;

fn points() -> Vec<(f64, f64)> {
    let mut rng = StdRng::seed_from_u64(7);
    (0..200)
        .map(|_| (rng.gen_range(-50.0..50.0), rng.gen_range(-50.0..50.0)))
        .collect()
}

fn tree() -> OwnedKDTree {
    let mut builder = KDTreeBuilder::new_with_block_capacity(2, BLOCK_CAPACITY);
    for (i, (x, y)) in points().iter().enumerate() {
        builder.add(&[encode_f64(*x), encode_f64(*y)], i as u64);
    }
    builder.finish()
}

fn dataset(tree: &OwnedKDTree) -> Arc<DataSet> {
    Arc::new(DataSet::from_tree(tree).unwrap())
}

fn query() -> QuerySpec {
    let mut query_box = QueryBox::open(2);
    query_box
        .intersect_values(0, -20.0, 30.0)
        .intersect_values(1, -40.0, 10.0);
    let triangle = Region::new(
        0,
        1,
        KeyType::Float,
        KeyType::Float,
        &[[-20.0, -40.0], [30.0, -40.0], [-20.0, 10.0]],
    )
    .unwrap();
    QuerySpec::new(query_box).with_region(triangle)
}

fn brute_force(query: &QuerySpec) -> Vec<u64> {
    let mut expected: Vec<u64> = points()
        .iter()
        .enumerate()
        .filter(|(i, (x, y))| query.matches(&[encode_f64(*x), encode_f64(*y), *i as u64]))
        .map(|(i, _)| i as u64)
        .collect();
    expected.sort_unstable();
    expected
}

fn selection(
    mode: ExecutionMode,
    tree: &OwnedKDTree,
    data: &DataSet,
    query: &QuerySpec,
) -> BlockSelection {
    match mode {
        ExecutionMode::FullScan => BlockSelection::Span(0..data.block_count()),
        _ => BlockSelection::Leaves(tree.search(&query.query_box)),
    }
}

fn run(worker: &mut DeviceWorker, request: (Request, Ticket)) -> crate::error::Result<Vec<u64>> {
    let (request, ticket) = request;
    worker.handle(request);
    assert_eq!(ticket.state(), RequestState::Done);
    ticket.wait().map(|mut found| {
        found.sort_unstable();
        found
    })
}

fn request(
    mode: ExecutionMode,
    tree: &OwnedKDTree,
    data: &Arc<DataSet>,
    query: QuerySpec,
) -> (Request, Ticket) {
    let blocks = selection(mode, tree, data, &query);
    Request::new(1, mode, data.clone(), Arc::new(query), blocks)
}

#[test]
fn device_modes_match_brute_force() {
    let tree = tree();
    let data = dataset(&tree);
    let expected = brute_force(&query());
    assert!(!expected.is_empty());

    for mode in [
        ExecutionMode::FullScan,
        ExecutionMode::TreeFiltered,
        ExecutionMode::Resident,
    ] {
        // resident keys take 4800 bytes; the small arenas force several batches
        let small = if mode == ExecutionMode::Resident { 6144 } else { 2048 };
        for arena_bytes in [small, 1 << 20] {
            let mut worker = DeviceWorker::new(0, arena_bytes).unwrap();
            let found = run(&mut worker, request(mode, &tree, &data, query()));
            assert_eq!(found.unwrap(), expected, "{:?} with {} bytes", mode, arena_bytes);
        }
    }
}

#[test]
fn resident_keys_survive_between_requests() {
    let tree = tree();
    let data = dataset(&tree);
    let mut worker = DeviceWorker::new(0, 1 << 16).unwrap();

    let first = run(&mut worker, request(ExecutionMode::Resident, &tree, &data, query()));
    let open = run(
        &mut worker,
        request(ExecutionMode::Resident, &tree, &data, QuerySpec::open(2)),
    );
    assert_eq!(first.unwrap(), brute_force(&query()));
    assert_eq!(open.unwrap(), (0..200).collect::<Vec<u64>>());

    // a non-resident request on the same worker still sees the whole arena
    let filtered = run(&mut worker, request(ExecutionMode::TreeFiltered, &tree, &data, query()));
    assert_eq!(filtered.unwrap(), brute_force(&query()));
}

#[test]
fn tiny_arena_is_exhausted() {
    let tree = tree();
    let data = dataset(&tree);
    let mut worker = DeviceWorker::new(0, 64).unwrap();
    for mode in [ExecutionMode::FullScan, ExecutionMode::TreeFiltered] {
        let result = run(&mut worker, request(mode, &tree, &data, query()));
        assert!(
            matches!(result, Err(KdError::ResourceExhausted { .. })),
            "{:?}: {:?}",
            mode,
            result
        );
    }
}

#[test]
fn resident_keys_larger_than_arena() {
    let tree = tree();
    let data = dataset(&tree);
    let mut worker = DeviceWorker::new(0, 1024).unwrap();
    let result = run(&mut worker, request(ExecutionMode::Resident, &tree, &data, query()));
    assert!(matches!(result, Err(KdError::ResourceExhausted { .. })));

    // the worker keeps serving
    let result = run(&mut worker, request(ExecutionMode::TreeFiltered, &tree, &data, query()));
    assert_eq!(result.unwrap(), brute_force(&query()));
}

#[test]
fn mismatched_requests_are_unsupported() {
    let tree = tree();
    let data = dataset(&tree);
    let mut worker = DeviceWorker::new(0, 1 << 16).unwrap();

    let cpu = Request::new(
        1,
        ExecutionMode::Cpu,
        data.clone(),
        Arc::new(query()),
        BlockSelection::Span(0..1),
    );
    assert!(matches!(run(&mut worker, cpu), Err(KdError::UnsupportedRequest(_))));

    let wrong_selection = Request::new(
        2,
        ExecutionMode::TreeFiltered,
        data.clone(),
        Arc::new(query()),
        BlockSelection::Span(0..data.block_count()),
    );
    assert!(matches!(
        run(&mut worker, wrong_selection),
        Err(KdError::UnsupportedRequest(_))
    ));

    let out_of_range = Request::new(
        3,
        ExecutionMode::FullScan,
        data.clone(),
        Arc::new(query()),
        BlockSelection::Span(0..data.block_count() + 1),
    );
    assert!(matches!(
        run(&mut worker, out_of_range),
        Err(KdError::UnsupportedRequest(_))
    ));

    let wrong_dims = Request::new(
        4,
        ExecutionMode::FullScan,
        data.clone(),
        Arc::new(QuerySpec::open(3)),
        BlockSelection::Span(0..1),
    );
    assert!(matches!(
        run(&mut worker, wrong_dims),
        Err(KdError::UnsupportedRequest(_))
    ));
}

#[test]
fn kernel_panic_becomes_internal_error() {
    let tree = tree();
    let data = dataset(&tree);
    let mut worker = DeviceWorker::new(0, 1 << 16).unwrap();

    let region = Region::new(
        9,
        1,
        KeyType::Float,
        KeyType::Float,
        &[[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]],
    )
    .unwrap();
    let broken = QuerySpec::open(2).with_region(region);
    let result = run(&mut worker, request(ExecutionMode::TreeFiltered, &tree, &data, broken));
    assert!(matches!(result, Err(KdError::Internal(_))), "{:?}", result);

    let result = run(&mut worker, request(ExecutionMode::TreeFiltered, &tree, &data, query()));
    assert_eq!(result.unwrap(), brute_force(&query()));
}

#[test]
fn pool_runs_requests() {
    let tree = tree();
    let data = dataset(&tree);
    let mut pool = DevicePool::start(DeviceConfig::default().with_devices(2)).unwrap();
    assert_eq!(pool.len(), 2);
    assert!(pool.next_request_id() < pool.next_request_id());

    let (request, ticket) = request(ExecutionMode::TreeFiltered, &tree, &data, query());
    pool.submit_to(1, request).unwrap();
    let mut found = ticket.wait().unwrap();
    found.sort_unstable();
    assert_eq!(found, brute_force(&query()));

    let (request, _) = self::request(ExecutionMode::TreeFiltered, &tree, &data, query());
    assert!(matches!(pool.submit_to(2, request), Err(KdError::Config(_))));

    pool.shutdown();
    let (request, ticket) = self::request(ExecutionMode::TreeFiltered, &tree, &data, query());
    pool.submit_to(0, request).unwrap();
    assert!(matches!(ticket.wait(), Err(KdError::Disconnected(_))));
}

#[test]
fn pool_start_fails_without_memory() {
    let config = DeviceConfig::default().with_arena_bytes(usize::MAX);
    assert!(matches!(
        DevicePool::start(config),
        Err(KdError::ResourceExhausted { .. })
    ));
    assert!(matches!(
        DevicePool::start(DeviceConfig::default().with_arena_bytes(0)),
        Err(KdError::Config(_))
    ));
}

#[test]
fn queued_requests_disconnect_on_stop() {
    let tree = tree();
    let data = dataset(&tree);
    let mut pool = DevicePool::start(DeviceConfig::default().with_queue_capacity(64)).unwrap();

    // a slow first request keeps the worker busy while the rest queue up
    let big = Arc::new({
        let mut builder = KDTreeBuilder::new_with_block_capacity(2, BLOCK_CAPACITY);
        for i in 0..200_000u64 {
            builder.add(&[i, i], i);
        }
        DataSet::from_tree(&builder.finish()).unwrap()
    });
    let mut tickets = vec![];
    let (slow, ticket) = Request::new(
        0,
        ExecutionMode::FullScan,
        big.clone(),
        Arc::new(QuerySpec::open(2)),
        BlockSelection::Span(0..big.block_count()),
    );
    pool.submit_to(0, slow).unwrap();
    tickets.push(ticket);
    for _ in 0..32 {
        let (request, ticket) = request(ExecutionMode::TreeFiltered, &tree, &data, query());
        pool.submit_to(0, request).unwrap();
        tickets.push(ticket);
    }
    pool.shutdown();

    let mut served = 0;
    let mut disconnected = 0;
    for ticket in tickets {
        assert_eq!(ticket.state(), RequestState::Done);
        match ticket.wait() {
            Ok(_) => served += 1,
            Err(KdError::Disconnected(_)) => disconnected += 1,
            Err(e) => panic!("unexpected {:?}", e),
        }
    }
    // every request completes one way or the other
    assert_eq!(served + disconnected, 33);
}

#[test]
fn accelerator_matches_cpu() {
    let tree = tree();
    let data = dataset(&tree);
    let pool = Arc::new(
        DevicePool::start(
            DeviceConfig::default()
                .with_devices(3)
                .with_arena_bytes(1 << 14),
        )
        .unwrap(),
    );
    let accelerator = AcceleratorExecutor::new(pool);

    let query = Arc::new(query());
    let mut expected = CpuExecutor
        .execute(Job {
            data: data.clone(),
            query: query.clone(),
            mode: ExecutionMode::Cpu,
            blocks: BlockSelection::Leaves(tree.search(&query.query_box)),
        })
        .unwrap();
    expected.sort_unstable();
    assert_eq!(expected, brute_force(&query));

    for mode in [
        ExecutionMode::FullScan,
        ExecutionMode::TreeFiltered,
        ExecutionMode::Resident,
    ] {
        let job = Job {
            data: data.clone(),
            query: query.clone(),
            mode,
            blocks: selection(mode, &tree, &data, &query),
        };
        let pending = accelerator.submit(job).unwrap();
        assert_eq!(pending.requests(), 3);
        let mut found = pending.wait().unwrap();
        found.sort_unstable();
        assert_eq!(found, expected, "{:?}", mode);
    }

    let empty = Job {
        data: data.clone(),
        query: query.clone(),
        mode: ExecutionMode::TreeFiltered,
        blocks: BlockSelection::Leaves(vec![]),
    };
    let pending = accelerator.submit(empty).unwrap();
    assert_eq!(pending.requests(), 1);
    assert!(pending.wait().unwrap().is_empty());

    let cpu = Job {
        data,
        query,
        mode: ExecutionMode::Cpu,
        blocks: BlockSelection::Span(0..1),
    };
    assert!(matches!(
        accelerator.execute(cpu),
        Err(KdError::UnsupportedRequest(_))
    ));
}

#[test]
fn failed_dispatch_waits_for_dispatched_requests() {
    let tree = tree();
    let data = dataset(&tree);
    let pool = Arc::new(
        DevicePool::start(
            DeviceConfig::default()
                .with_devices(3)
                .with_arena_bytes(1 << 14),
        )
        .unwrap(),
    );
    let accelerator = AcceleratorExecutor::new(pool);
    let job = Job {
        blocks: BlockSelection::Span(0..data.block_count()),
        data,
        query: Arc::new(query()),
        mode: ExecutionMode::FullScan,
    };

    let completed = Arc::new(AtomicUsize::new(0));
    let mut runners = vec![];
    let result = accelerator.dispatch(job, |device, request| {
        if device == 2 {
            return Err(KdError::Disconnected("device 2 is gone".into()));
        }
        let completed = completed.clone();
        runners.push(thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            completed.fetch_add(1, Ordering::SeqCst);
            request.complete(Ok(vec![]));
        }));
        Ok(())
    });
    assert!(matches!(result, Err(KdError::Disconnected(_))));
    // both earlier requests finished before the error came back
    assert_eq!(completed.load(Ordering::SeqCst), 2);
    for runner in runners {
        runner.join().unwrap();
    }
}

#[test]
fn requests_from_many_threads() {
    let tree = Arc::new(tree());
    let data = dataset(&tree);
    let pool = Arc::new(DevicePool::start(DeviceConfig::default().with_devices(2)).unwrap());
    let expected = brute_force(&query());

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let tree = tree.clone();
            let data = data.clone();
            let accelerator = AcceleratorExecutor::new(pool.clone());
            let expected = expected.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(i));
                let query = Arc::new(query());
                let job = Job {
                    blocks: BlockSelection::Leaves(tree.search(&query.query_box)),
                    data,
                    query,
                    mode: ExecutionMode::TreeFiltered,
                };
                let mut found = accelerator.execute(job).unwrap();
                found.sort_unstable();
                assert_eq!(found, expected);
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
}
