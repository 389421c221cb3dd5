use std::collections::HashSet;

use bytemuck::cast_slice;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::codec::encode_i64;
use crate::error::KdError;
use crate::kdtree::{
    build_files, KDTreeBuilder, KDTreeIndex, KDTreeRef, MappedKDTree, Node, OwnedKDTree, PAD_REF,
};
use crate::paths::IndexPaths;
use crate::query::QueryBox;

fn points() -> Vec<(i64, i64)> {
    vec![
        (54, 1),
        (97, 21),
        (65, 35),
        (33, 54),
        (95, 39),
        (54, 3),
        (53, 54),
        (84, 72),
        (33, 34),
        (43, 15),
        (52, 83),
        (81, 23),
        (1, 61),
        (38, 74),
        (11, 91),
        (24, 56),
        (90, 31),
        (25, 57),
        (46, 61),
        (29, 69),
        (49, 60),
        (4, 98),
        (71, 15),
        (60, 25),
        (38, 84),
        (52, 38),
        (94, 51),
        (13, 25),
        (77, 73),
        (88, 87),
        (6, 27),
        (58, 22),
        (53, 28),
        (27, 91),
        (96, 98),
        (93, 14),
        (22, 93),
        (45, 94),
        (18, 28),
        (35, 15),
        (19, 81),
        (20, 81),
        (67, 53),
        (43, 3),
        (47, 66),
        (48, 34),
        (46, 12),
        (32, 38),
        (43, 12),
        (39, 94),
        (88, 62),
        (66, 14),
        (84, 30),
        (72, 81),
        (41, 92),
        (26, 4),
        (6, 22),
        (47, 21),
        (10, 50),
        (70, 5),
    ]
}

fn make_index(block_capacity: usize) -> OwnedKDTree {
    let mut builder = KDTreeBuilder::new_with_block_capacity(2, block_capacity);
    for (i, (x, y)) in points().into_iter().enumerate() {
        builder.add(&[encode_i64(x), encode_i64(y)], i as u64);
    }
    builder.finish()
}

fn block(tree: &OwnedKDTree, offset: u64) -> &[u64] {
    let width = tree.dims() + 1;
    let start = offset as usize * width;
    &tree.keys()[start..start + tree.block_capacity() * width]
}

/// References of matching records inside the blocks selected by a search.
fn query_blocks(tree: &OwnedKDTree, query: &QueryBox) -> Vec<u64> {
    let mut result = vec![];
    for leaf in tree.search(query) {
        for record in block(tree, leaf.offset).chunks_exact(3) {
            if record[2] != PAD_REF && query.contains(&record[..2]) {
                result.push(record[2]);
            }
        }
    }
    result.sort();
    result
}

fn brute_force(points: &[(i64, i64)], query: &QueryBox) -> Vec<u64> {
    points
        .iter()
        .enumerate()
        .filter(|(_, (x, y))| query.contains(&[encode_i64(*x), encode_i64(*y)]))
        .map(|(i, _)| i as u64)
        .collect()
}

fn int_box(min_x: i64, min_y: i64, max_x: i64, max_y: i64) -> QueryBox {
    let mut query = QueryBox::open(2);
    query.intersect_values(0, min_x, max_x);
    query.intersect_values(1, min_y, max_y);
    query
}

#[test]
fn creates_an_index() {
    let tree = make_index(10);
    let n = points().len();

    assert_eq!(tree.record_count(), n as u64);
    let leaves = tree.leaves();
    assert_eq!(tree.ranges().len(), leaves.len() * 4);
    assert_eq!(tree.keys().len(), leaves.len() * 10 * 3);

    // blocks are laid out back to back in construction order
    for (i, leaf) in leaves.iter().enumerate() {
        assert_eq!(leaf.offset, i as u64 * 10);
        assert_eq!(leaf.block_index(10), i);
        assert!(leaf.count > 0 && leaf.count <= 10);
    }

    // every record is stored exactly once
    let mut seen = HashSet::new();
    for record in tree.keys().chunks_exact(3) {
        if record[2] == PAD_REF {
            assert_eq!(record, &[u64::MAX; 3]);
        } else {
            assert!(seen.insert(record[2]));
        }
    }
    assert_eq!(seen.len(), n);
}

#[test]
fn leaf_ranges_bound_their_records() {
    let tree = make_index(10);
    let ranges: Vec<&[u64]> = tree.ranges().chunks_exact(4).collect();
    for (leaf, range) in tree.leaves().iter().zip(ranges) {
        let records: Vec<&[u64]> = block(&tree, leaf.offset)
            .chunks_exact(3)
            .take(leaf.count as usize)
            .collect();
        for d in 0..2 {
            let min = records.iter().map(|r| r[d]).min().unwrap();
            let max = records.iter().map(|r| r[d]).max().unwrap();
            assert_eq!(range[2 * d], min);
            assert_eq!(range[2 * d + 1], max);
        }
        // only the tail of a block is padding
        assert!(block(&tree, leaf.offset)
            .chunks_exact(3)
            .skip(leaf.count as usize)
            .all(|r| r[2] == PAD_REF));
    }
}

fn check_node<T: KDTreeIndex>(tree: &OwnedKDTree, node: Node<'_, T>) -> Vec<u64> {
    if node.is_dead() {
        return vec![];
    }
    if let Some(leaf) = node.leaf() {
        assert_eq!(node.range().unwrap().len(), 4);
        return block(tree, leaf.offset)
            .chunks_exact(3)
            .take(leaf.count as usize)
            .flat_map(|r| r.to_vec())
            .collect();
    }

    let median = node.median().unwrap();
    let dim = node.split_dim();
    let left = check_node(tree, node.left_child().unwrap());
    let right = check_node(tree, node.right_child().unwrap());
    assert!(left.chunks_exact(3).all(|r| r[dim] <= median));
    assert!(right.chunks_exact(3).all(|r| r[dim] >= median));
    assert_eq!(
        node.record_count(),
        ((left.len() + right.len()) / 3) as u64
    );
    // left partitions are always whole blocks
    assert_eq!((left.len() / 3) % tree.block_capacity(), 0);
    left.into_iter().chain(right).collect()
}

#[test]
fn tree_shape() {
    for capacity in [1, 3, 10, 16, 59, 60] {
        let tree = make_index(capacity);
        let records = check_node(&tree, tree.root());
        assert_eq!(records.len() / 3, points().len(), "capacity {}", capacity);
    }
}

#[test]
fn range_search() {
    let tree = make_index(10);
    let points = points();

    let query = int_box(20, 30, 50, 70);
    let result = query_blocks(&tree, &query);
    let expected = brute_force(&points, &query);
    assert_eq!(result, expected);
    assert_eq!(expected, vec![3, 8, 15, 17, 18, 19, 20, 44, 45, 47]);

    // pruning happened
    assert!(tree.search(&query).len() < tree.leaves().len());
}

#[test]
fn universal_box_returns_every_block() {
    let tree = make_index(7);
    let query = QueryBox::open(2);
    assert_eq!(tree.search(&query), tree.leaves());
    assert_eq!(
        query_blocks(&tree, &query),
        (0..points().len() as u64).collect::<Vec<_>>()
    );
}

#[test]
fn random_boxes_match_brute_force() {
    let mut rng = StdRng::seed_from_u64(21);
    let points: Vec<(i64, i64)> = (0..3_000)
        .map(|_| (rng.gen_range(-500..500), rng.gen_range(-500..500)))
        .collect();
    let mut builder = KDTreeBuilder::new_with_block_capacity(2, 64);
    for (i, (x, y)) in points.iter().enumerate() {
        builder.add(&[encode_i64(*x), encode_i64(*y)], i as u64);
    }
    let tree = builder.finish();

    for _ in 0..200 {
        let x0 = rng.gen_range(-600..600);
        let y0 = rng.gen_range(-600..600);
        let query = int_box(
            x0,
            y0,
            x0 + rng.gen_range(0..300),
            y0 + rng.gen_range(0..300),
        );
        assert_eq!(query_blocks(&tree, &query), brute_force(&points, &query));
    }
}

#[test]
fn duplicate_split_values() {
    // every record shares x, so records equal to the median land on both sides
    let mut builder = KDTreeBuilder::new_with_block_capacity(2, 4);
    for i in 0..37 {
        builder.add(&[encode_i64(5), encode_i64(i % 3)], i as u64);
    }
    let tree = builder.finish();

    let query = int_box(5, 0, 5, 2);
    let mut result = vec![];
    for leaf in tree.search(&query) {
        result.extend(
            block(&tree, leaf.offset)
                .chunks_exact(3)
                .take(leaf.count as usize)
                .map(|r| r[2]),
        );
    }
    result.sort();
    assert_eq!(result, (0..37).collect::<Vec<_>>());
}

#[test]
fn single_leaf_root() {
    let mut builder = KDTreeBuilder::new_with_block_capacity(3, 8);
    builder.add(&[1, 2, 3], 0);
    builder.add(&[4, 5, 6], 1);
    let tree = builder.finish();

    // leaf slot, offset slot and one range slot per dimension
    assert_eq!(tree.num_slots(), 5);
    assert!(tree.root().is_leaf());
    assert_eq!(tree.root().range().unwrap(), &[1, 4, 2, 5, 3, 6]);
    assert_eq!(tree.record_count(), 2);
    assert_eq!(tree.keys().len(), 8 * 4);
}

#[test]
fn empty_tree() {
    let tree = KDTreeBuilder::new_with_block_capacity(2, 8).finish();
    assert!(tree.root().is_dead());
    assert!(tree.leaves().is_empty());
    assert!(tree.search(&QueryBox::open(2)).is_empty());
    assert_eq!(tree.record_count(), 0);
    assert!(tree.keys().is_empty());
}

#[test]
fn tree_ref_validation() {
    let tree = make_index(10);
    let view = KDTreeRef::try_new(tree.nodes(), 2).unwrap();
    assert_eq!(view.leaves(), tree.leaves());

    let mut corrupt = tree.nodes().to_vec();
    corrupt[0] = 10_000;
    assert!(matches!(
        KDTreeRef::try_new(&corrupt, 2),
        Err(KdError::Format(_))
    ));
    assert!(KDTreeRef::try_new(&[], 2).is_err());
}

fn write_data(paths: &IndexPaths, records: &[u64]) {
    std::fs::write(paths.data(), cast_slice::<u64, u8>(records)).unwrap();
}

#[test]
fn builds_files_like_memory() {
    let dir = tempfile::tempdir().unwrap();
    let paths = IndexPaths::new(dir.path().join("points"));

    let mut data = vec![];
    for (i, (x, y)) in points().into_iter().enumerate() {
        data.extend([encode_i64(x), encode_i64(y), i as u64]);
    }
    write_data(&paths, &data);

    let summary = build_files(&paths.data(), &paths, 2, 10).unwrap();
    let tree = make_index(10);
    assert_eq!(summary.records, 60);
    assert_eq!(summary.leaves, tree.leaves().len() as u64);
    assert_eq!(summary.nodes, tree.num_slots() as u64);
    assert_eq!(
        summary.padded_records,
        summary.leaves * 10 - summary.records
    );

    assert_eq!(
        std::fs::read(paths.keys()).unwrap(),
        cast_slice::<u64, u8>(tree.keys())
    );
    assert_eq!(
        std::fs::read(paths.range()).unwrap(),
        cast_slice::<u64, u8>(tree.ranges())
    );

    // the data file is not reordered
    assert_eq!(
        std::fs::read(paths.data()).unwrap(),
        cast_slice::<u64, u8>(&data)
    );

    let mapped = MappedKDTree::open(&paths, 2).unwrap();
    let query = int_box(20, 30, 50, 70);
    assert_eq!(mapped.search(&query), tree.search(&query));
    assert_eq!(mapped.record_count(), 60);
}

#[test]
fn build_files_rejects_truncated_data() {
    let dir = tempfile::tempdir().unwrap();
    let paths = IndexPaths::new(dir.path().join("bad"));
    write_data(&paths, &[1, 2, 3, 4]);

    assert!(matches!(
        build_files(&paths.data(), &paths, 2, 10),
        Err(KdError::Format(_))
    ));
    // nothing was written
    assert!(!paths.keys().exists());
    assert!(!paths.tree().exists());
}

#[test]
fn build_files_empty_data() {
    let dir = tempfile::tempdir().unwrap();
    let paths = IndexPaths::new(dir.path().join("empty"));
    write_data(&paths, &[]);

    let summary = build_files(&paths.data(), &paths, 2, 10).unwrap();
    assert_eq!(summary.records, 0);
    assert_eq!(summary.leaves, 0);
    let mapped = MappedKDTree::open(&paths, 2).unwrap();
    assert!(mapped.root().is_dead());
    assert!(mapped.search(&QueryBox::open(2)).is_empty());
}
