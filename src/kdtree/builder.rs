use std::convert::Infallible;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use bytemuck::cast_slice;
use memmap2::MmapOptions;
use tempfile::NamedTempFile;

use crate::error::{KdError, Result};
use crate::kdtree::constants::{
    DEAD_NODE, DEFAULT_BLOCK_CAPACITY, LEAF_CHILD, PAD_REF, SLOT_WORDS,
};
use crate::kdtree::sort::{composite, position_of, sort_by_value, value_of};
use crate::kdtree::OwnedKDTree;
use crate::paths::IndexPaths;

/// Statistics of a finished build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    /// Number of input records.
    pub records: u64,
    /// Number of leaf blocks written to the keys output.
    pub leaves: u64,
    /// Number of 16-byte slots in the tree output.
    pub nodes: u64,
    /// Number of padding records appended to short leaves.
    pub padded_records: u64,
}

/// A builder to create an [`OwnedKDTree`] from records held in memory.
///
/// Every record is `dims` order-preserving keys (see [`crate::codec`]) followed by a reference,
/// usually the record's ordinal in the data file.
#[derive(Debug, Clone)]
pub struct KDTreeBuilder {
    dims: usize,
    block_capacity: usize,
    records: Vec<u64>,
}

impl KDTreeBuilder {
    /// Create a new builder for `dims` dimensions with the default block capacity.
    pub fn new(dims: usize) -> Self {
        Self::new_with_block_capacity(dims, DEFAULT_BLOCK_CAPACITY)
    }

    /// Create a new builder for `dims` dimensions and `block_capacity` records per leaf.
    ///
    /// ## Panics
    ///
    /// - If `dims` or `block_capacity` is zero.
    pub fn new_with_block_capacity(dims: usize, block_capacity: usize) -> Self {
        assert!(dims > 0, "at least one dimension is required");
        assert!(block_capacity > 0, "block capacity must be positive");
        Self {
            dims,
            block_capacity,
            records: vec![],
        }
    }

    /// Add a record. Returns its insertion index.
    ///
    /// ## Panics
    ///
    /// - If `values` does not have one key per dimension.
    /// - If `reference` is the padding sentinel.
    pub fn add(&mut self, values: &[u64], reference: u64) -> usize {
        assert_eq!(values.len(), self.dims, "wrong number of dimensions");
        assert_ne!(reference, PAD_REF, "reference is reserved for padding");
        self.records.extend_from_slice(values);
        self.records.push(reference);
        self.records.len() / (self.dims + 1) - 1
    }

    /// Number of records added so far.
    pub fn len(&self) -> usize {
        self.records.len() / (self.dims + 1)
    }

    /// Whether no record has been added.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consume this builder, partitioning the records into leaf blocks.
    pub fn finish(mut self) -> OwnedKDTree {
        let mut keys: Vec<u64> = vec![];
        let built = build(&mut self.records, self.dims, self.block_capacity, &mut keys);
        let (nodes, ranges, _) = match built {
            Ok(out) => out,
            Err(never) => match never {},
        };
        OwnedKDTree {
            dims: self.dims,
            block_capacity: self.block_capacity,
            nodes,
            keys,
            ranges,
        }
    }
}

/// Build the keys, tree and range files from a data file of `dims + 1` wide records.
///
/// The data file is mapped copy-on-write, so it is partitioned in place without being modified.
/// Outputs are staged in temporary files next to their destinations and only moved into place
/// once all of them were written.
pub fn build_files(
    data_path: &Path,
    paths: &IndexPaths,
    dims: usize,
    block_capacity: usize,
) -> Result<BuildSummary> {
    if dims == 0 || block_capacity == 0 {
        return Err(KdError::Config(format!(
            "invalid tree shape: {} dimensions, {} records per block",
            dims, block_capacity
        )));
    }

    let file = File::open(data_path)?;
    let len = file.metadata()?.len() as usize;
    let record_bytes = (dims + 1) * std::mem::size_of::<u64>();
    if len % record_bytes != 0 {
        return Err(KdError::Format(format!(
            "{} has {} bytes, not a multiple of the {} byte record size",
            data_path.display(),
            len,
            record_bytes
        )));
    }
    tracing::info!(
        path = %data_path.display(),
        records = len / record_bytes,
        dims,
        block_capacity,
        "building kd-tree"
    );

    let mut map;
    let mut empty: [u64; 0] = [];
    let records: &mut [u64] = if len == 0 {
        &mut empty
    } else {
        // SAFETY: private mapping; writes never reach the file and the length was validated.
        map = unsafe { MmapOptions::new().map_copy(&file)? };
        bytemuck::try_cast_slice_mut(&mut map[..])
            .map_err(|e| KdError::Format(format!("{}: {}", data_path.display(), e)))?
    };

    let dir = paths.dir();
    let mut keys = BufWriter::new(NamedTempFile::new_in(dir)?);
    let (nodes, ranges, summary) = build(records, dims, block_capacity, &mut keys)?;
    let keys = keys.into_inner().map_err(|e| e.into_error())?;

    let mut tree = NamedTempFile::new_in(dir)?;
    tree.write_all(cast_slice(&nodes))?;
    let mut range = NamedTempFile::new_in(dir)?;
    range.write_all(cast_slice(&ranges))?;

    keys.persist(paths.keys()).map_err(|e| e.error)?;
    tree.persist(paths.tree()).map_err(|e| e.error)?;
    range.persist(paths.range()).map_err(|e| e.error)?;

    tracing::info!(
        records = summary.records,
        leaves = summary.leaves,
        nodes = summary.nodes,
        padded_records = summary.padded_records,
        "kd-tree built"
    );
    Ok(summary)
}

/// Destination of leaf blocks.
pub(crate) trait KeySink {
    type Error;

    fn put(&mut self, records: &[u64]) -> std::result::Result<(), Self::Error>;
}

impl KeySink for Vec<u64> {
    type Error = Infallible;

    fn put(&mut self, records: &[u64]) -> std::result::Result<(), Infallible> {
        self.extend_from_slice(records);
        Ok(())
    }
}

impl<W: Write> KeySink for BufWriter<W> {
    type Error = KdError;

    fn put(&mut self, records: &[u64]) -> Result<()> {
        self.write_all(cast_slice(records))?;
        Ok(())
    }
}

/// Partition `records` in place and emit every leaf to `keys`.
///
/// Returns the tree slots and leaf ranges as flat `u64` buffers.
pub(crate) fn build<S: KeySink>(
    records: &mut [u64],
    dims: usize,
    block_capacity: usize,
    keys: &mut S,
) -> std::result::Result<(Vec<u64>, Vec<u64>, BuildSummary), S::Error> {
    let width = dims + 1;
    let n = records.len() / width;
    let mut writer = TreeWriter {
        dims,
        block_capacity,
        keys,
        nodes: vec![],
        ranges: vec![],
        next_free: 1,
        offset: 0,
        scratch: vec![],
        order: vec![],
        swap_record: vec![0; width],
        padding: vec![u64::MAX; width],
        summary: BuildSummary {
            records: n as u64,
            ..Default::default()
        },
    };

    if n == 0 {
        writer.set_slot(0, DEAD_NODE, 0);
    } else {
        if n <= block_capacity {
            writer.next_free += dims + 1;
        }
        writer.build_node(records, 0, 0)?;
    }

    writer.summary.nodes = (writer.nodes.len() / SLOT_WORDS) as u64;
    Ok((writer.nodes, writer.ranges, writer.summary))
}

struct TreeWriter<'a, S> {
    dims: usize,
    block_capacity: usize,
    keys: &'a mut S,
    nodes: Vec<u64>,
    ranges: Vec<u64>,
    /// First unallocated slot.
    next_free: usize,
    /// Records written to `keys` so far.
    offset: u64,
    scratch: Vec<u128>,
    order: Vec<usize>,
    swap_record: Vec<u64>,
    padding: Vec<u64>,
    summary: BuildSummary,
}

impl<S: KeySink> TreeWriter<'_, S> {
    fn set_slot(&mut self, slot: usize, child: u64, value: u64) {
        let end = (slot + 1) * SLOT_WORDS;
        if self.nodes.len() < end {
            self.nodes.resize(end, 0);
        }
        self.nodes[slot * SLOT_WORDS] = child;
        self.nodes[slot * SLOT_WORDS + 1] = value;
    }

    fn build_node(
        &mut self,
        records: &mut [u64],
        depth: usize,
        slot: usize,
    ) -> std::result::Result<(), S::Error> {
        let width = self.dims + 1;
        let n = records.len() / width;
        if n <= self.block_capacity {
            return self.write_leaf(records, slot);
        }

        let dim = depth % self.dims;
        self.scratch.clear();
        self.scratch.extend(
            records
                .chunks_exact(width)
                .enumerate()
                .map(|(i, r)| composite(r[dim], i as u64)),
        );
        sort_by_value(&mut self.scratch);

        let cap = self.block_capacity;
        let median_index = ((n / 2).div_ceil(cap) * cap).saturating_sub(1).min(n - 1);
        let median = value_of(self.scratch[median_index]);
        self.permute(records);

        let left_n = median_index + 1;
        let right_n = n - left_n;
        let left_leaf = left_n <= cap;
        let right_leaf = right_n > 0 && right_n <= cap;

        let child = self.next_free;
        self.next_free += 2;
        if left_leaf {
            self.next_free += self.dims + 1;
        }
        if right_leaf {
            self.next_free += self.dims + 1;
        }
        self.set_slot(slot, child as u64, median);

        let (left, right) = records.split_at_mut(left_n * width);
        self.build_node(left, depth + 1, child)?;

        let right_slot = child + 1 + if left_leaf { self.dims + 1 } else { 0 };
        if right_n > 0 {
            self.build_node(right, depth + 1, right_slot)
        } else {
            self.set_slot(right_slot, DEAD_NODE, 0);
            Ok(())
        }
    }

    /// Reorder `records` to the order of `scratch` by following permutation cycles.
    fn permute(&mut self, records: &mut [u64]) {
        let width = self.dims + 1;
        self.order.clear();
        self.order
            .extend(self.scratch.iter().map(|item| position_of(*item) as usize));

        for i in 0..self.order.len() {
            let mut current = i;
            let mut wanted = self.order[i];
            while wanted != i {
                self.swap_records(records, current, wanted, width);
                self.order[current] = current;
                current = wanted;
                wanted = self.order[current];
            }
            self.order[current] = current;
        }
    }

    fn swap_records(&mut self, records: &mut [u64], a: usize, b: usize, width: usize) {
        self.swap_record
            .copy_from_slice(&records[a * width..(a + 1) * width]);
        records.copy_within(b * width..(b + 1) * width, a * width);
        records[b * width..(b + 1) * width].copy_from_slice(&self.swap_record);
    }

    fn write_leaf(&mut self, records: &[u64], slot: usize) -> std::result::Result<(), S::Error> {
        let dims = self.dims;
        let width = dims + 1;
        let n = records.len() / width;

        let mut range = vec![0; 2 * dims];
        for d in 0..dims {
            range[2 * d] = u64::MAX;
        }
        for record in records.chunks_exact(width) {
            for d in 0..dims {
                range[2 * d] = range[2 * d].min(record[d]);
                range[2 * d + 1] = range[2 * d + 1].max(record[d]);
            }
        }

        self.set_slot(slot, LEAF_CHILD, n as u64);
        self.set_slot(slot + 1, self.offset, 0);
        for d in 0..dims {
            self.set_slot(slot + 2 + d, range[2 * d], range[2 * d + 1]);
        }
        self.ranges.extend_from_slice(&range);

        self.keys.put(records)?;
        let padding = self.block_capacity - n;
        if padding > 0 {
            tracing::trace!(records = n, padding, "padding leaf block");
            for _ in 0..padding {
                self.keys.put(&self.padding)?;
            }
        }
        self.offset += self.block_capacity as u64;
        self.summary.leaves += 1;
        self.summary.padded_records += padding as u64;
        Ok(())
    }
}
