use std::fs::File;
use std::path::Path;

use bytemuck::{cast_slice, Pod, Zeroable};
use memmap2::Mmap;

use crate::error::{KdError, Result};
use crate::kdtree::constants::SLOT_WORDS;
use crate::kdtree::KDTreeIndex;
use crate::paths::IndexPaths;

/// A leaf block selected by a search: its record count and its first record in the keys file.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Pod, Zeroable)]
pub struct LeafBlock {
    /// Number of real (non-padding) records in the block.
    pub count: u64,
    /// Offset of the block's first record, in records.
    pub offset: u64,
}

impl LeafBlock {
    /// Index of this block in the keys and range files.
    pub fn block_index(&self, block_capacity: usize) -> usize {
        (self.offset / block_capacity as u64) as usize
    }
}

/// An owned block KD-tree: tree slots, padded keys and leaf ranges held in memory.
///
/// Usually this will be created from scratch via [`KDTreeBuilder`][crate::kdtree::KDTreeBuilder].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedKDTree {
    pub(crate) dims: usize,
    pub(crate) block_capacity: usize,
    pub(crate) nodes: Vec<u64>,
    pub(crate) keys: Vec<u64>,
    pub(crate) ranges: Vec<u64>,
}

impl OwnedKDTree {
    /// Number of records per leaf block.
    pub fn block_capacity(&self) -> usize {
        self.block_capacity
    }

    /// Padded leaf blocks, `dims + 1` words per record.
    pub fn keys(&self) -> &[u64] {
        &self.keys
    }

    /// One `2 * dims` bounding range per leaf block.
    pub fn ranges(&self) -> &[u64] {
        &self.ranges
    }

    /// A borrowed view of the tree slots.
    pub fn as_ref(&self) -> KDTreeRef<'_> {
        KDTreeRef {
            dims: self.dims,
            nodes: &self.nodes,
        }
    }

    /// Write the keys, tree and range files.
    pub fn write_files(&self, paths: &IndexPaths) -> Result<()> {
        std::fs::write(paths.keys(), cast_slice::<u64, u8>(&self.keys))?;
        std::fs::write(paths.tree(), cast_slice::<u64, u8>(&self.nodes))?;
        std::fs::write(paths.range(), cast_slice::<u64, u8>(&self.ranges))?;
        Ok(())
    }
}

/// A reference on external tree slots.
///
/// Usually this will be created from an [`OwnedKDTree`] via its [`as_ref`][OwnedKDTree::as_ref]
/// method, but it can also be created from any existing slot buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KDTreeRef<'a> {
    pub(crate) dims: usize,
    pub(crate) nodes: &'a [u64],
}

impl<'a> KDTreeRef<'a> {
    /// Wrap a slot buffer and check that every child reference stays in bounds.
    pub fn try_new(nodes: &'a [u64], dims: usize) -> Result<Self> {
        let tree = Self { dims, nodes };
        tree.validate()?;
        Ok(tree)
    }
}

/// A tree file mapped read-only into memory.
#[derive(Debug)]
pub struct MappedKDTree {
    dims: usize,
    map: Mmap,
}

impl MappedKDTree {
    /// Map the `.tree` file of an index.
    pub fn open(paths: &IndexPaths, dims: usize) -> Result<Self> {
        Self::open_path(&paths.tree(), dims)
    }

    /// Map a tree file.
    pub fn open_path(path: &Path, dims: usize) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        let slot_bytes = SLOT_WORDS * std::mem::size_of::<u64>();
        if len == 0 || len % slot_bytes != 0 {
            return Err(KdError::Format(format!(
                "{} has {} bytes, not a whole number of tree slots",
                path.display(),
                len
            )));
        }
        // SAFETY: index files are immutable once built.
        let map = unsafe { Mmap::map(&file)? };
        let tree = Self { dims, map };
        tree.validate()?;
        Ok(tree)
    }
}

impl KDTreeIndex for OwnedKDTree {
    fn nodes(&self) -> &[u64] {
        &self.nodes
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

impl KDTreeIndex for KDTreeRef<'_> {
    fn nodes(&self) -> &[u64] {
        self.nodes
    }

    fn dims(&self) -> usize {
        self.dims
    }
}

impl KDTreeIndex for MappedKDTree {
    fn nodes(&self) -> &[u64] {
        cast_slice(&self.map[..])
    }

    fn dims(&self) -> usize {
        self.dims
    }
}
