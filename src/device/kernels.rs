//! The per-batch kernels a device runs over staged arena contents.
//!
//! Kernels only see plain slices: the query tables staged by [`StagedQuery::stage`] and the keys
//! or ranges staged for the current batch. They never allocate.

use crate::arena::{Arena, ArenaRead, Slot};
use crate::error::Result;
use crate::kdtree::PAD_REF;
use crate::query::{box_contains, box_overlaps, descriptor_contains, QuerySpec};

/// Slots holding one query in a device arena.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StagedQuery {
    dims: usize,
    bounds: Slot<u64>,
    vertices: Slot<f64>,
    offsets: Slot<u32>,
    sizes: Slot<u32>,
    descriptors: Slot<u32>,
}

impl StagedQuery {
    /// Bytes [`StagedQuery::stage`] allocates for `query`, ignoring alignment.
    pub(crate) fn footprint(query: &QuerySpec) -> usize {
        let vertices: usize = query.regions.iter().map(|r| r.vertices().len()).sum();
        let regions = query.regions.len();
        query.query_box.as_slice().len() * 8 + vertices * 8 + regions * (4 + 4 + 16)
    }

    /// Copy the query box and region tables into the arena.
    pub(crate) fn stage(arena: &mut Arena, query: &QuerySpec) -> Result<Self> {
        let bounds_src = query.query_box.as_slice();
        let vertex_count: usize = query.regions.iter().map(|r| r.vertices().len()).sum();
        let regions = query.regions.len();

        let bounds = arena.alloc::<u64>(bounds_src.len())?;
        let vertices = arena.alloc::<f64>(vertex_count)?;
        let offsets = arena.alloc::<u32>(regions)?;
        let sizes = arena.alloc::<u32>(regions)?;
        let descriptors = arena.alloc::<u32>(regions * 4)?;

        arena.get_mut(bounds).copy_from_slice(bounds_src);
        let mut start = 0;
        for (i, region) in query.regions.iter().enumerate() {
            let v = region.vertices();
            arena.get_mut(vertices)[start..start + v.len()].copy_from_slice(v);
            arena.get_mut(offsets)[i] = (start / 2) as u32;
            arena.get_mut(sizes)[i] = (v.len() / 2) as u32;
            arena.get_mut(descriptors)[i * 4..i * 4 + 4].copy_from_slice(&region.descriptor());
            start += v.len();
        }

        Ok(Self {
            dims: query.dims(),
            bounds,
            vertices,
            offsets,
            sizes,
            descriptors,
        })
    }

    /// Borrow the staged tables from the read side of a split arena.
    pub(crate) fn load<'r>(&self, read: &'r ArenaRead<'_>) -> KernelQuery<'r> {
        KernelQuery {
            dims: self.dims,
            bounds: read.get(self.bounds),
            vertices: read.get(self.vertices),
            offsets: read.get(self.offsets),
            sizes: read.get(self.sizes),
            descriptors: read.get(self.descriptors),
        }
    }
}

/// A staged query as the kernels see it.
#[derive(Debug, Clone, Copy)]
pub(crate) struct KernelQuery<'a> {
    dims: usize,
    bounds: &'a [u64],
    vertices: &'a [f64],
    offsets: &'a [u32],
    sizes: &'a [u32],
    descriptors: &'a [u32],
}

impl KernelQuery<'_> {
    #[inline]
    fn matches(&self, record: &[u64]) -> bool {
        if record[self.dims] == PAD_REF || !box_contains(self.bounds, &record[..self.dims]) {
            return false;
        }
        (0..self.offsets.len()).all(|i| {
            let start = self.offsets[i] as usize * 2;
            let end = start + self.sizes[i] as usize * 2;
            descriptor_contains(
                &self.descriptors[i * 4..i * 4 + 4],
                &self.vertices[start..end],
                record,
            )
        })
    }
}

/// Phase 1: flag every staged block range that overlaps the query box.
pub(crate) fn block_filter(query: &KernelQuery<'_>, ranges: &[u64], flags: &mut [u32]) {
    for (flag, range) in flags.iter_mut().zip(ranges.chunks_exact(2 * query.dims)) {
        *flag = u32::from(box_overlaps(query.bounds, range));
    }
}

/// Phase 2: write the reference of every matching staged record to `out`. Returns the number of
/// references written.
pub(crate) fn record_filter(query: &KernelQuery<'_>, records: &[u64], out: &mut [u64]) -> usize {
    let width = query.dims + 1;
    let mut found = 0;
    for record in records.chunks_exact(width) {
        if query.matches(record) {
            out[found] = record[query.dims];
            found += 1;
        }
    }
    found
}
