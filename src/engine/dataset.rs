use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use memmap2::Mmap;

use crate::error::{KdError, Result};
use crate::kdtree::{KDTreeIndex, OwnedKDTree};
use crate::paths::IndexPaths;

static NEXT_DATASET_ID: AtomicU64 = AtomicU64::new(1);

enum Words {
    Mapped(Mmap),
    Owned(Vec<u64>),
    Empty,
}

impl Words {
    fn map(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let len = file.metadata()?.len() as usize;
        if len == 0 {
            return Ok(Words::Empty);
        }
        // SAFETY: index files are immutable once built.
        let map = unsafe { Mmap::map(&file)? };
        bytemuck::try_cast_slice::<u8, u64>(&map[..])
            .map_err(|e| KdError::Format(format!("{}: {}", path.display(), e)))?;
        Ok(Words::Mapped(map))
    }

    fn as_slice(&self) -> &[u64] {
        match self {
            // validated when mapped
            Words::Mapped(map) => bytemuck::cast_slice(&map[..]),
            Words::Owned(words) => words,
            Words::Empty => &[],
        }
    }
}

/// The padded leaf blocks of one index and their bounding ranges, shared by every request that
/// reads them.
pub struct DataSet {
    id: u64,
    dims: usize,
    block_capacity: usize,
    keys: Words,
    ranges: Words,
}

impl fmt::Debug for DataSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataSet")
            .field("id", &self.id)
            .field("dims", &self.dims)
            .field("block_capacity", &self.block_capacity)
            .field("blocks", &self.block_count())
            .finish()
    }
}

impl DataSet {
    /// Map the `.keys` and `.range` files of an index.
    pub fn open(paths: &IndexPaths, dims: usize, block_capacity: usize) -> Result<Self> {
        Self::new(
            dims,
            block_capacity,
            Words::map(&paths.keys())?,
            Words::map(&paths.range())?,
        )
    }

    /// Wrap the artifacts of an in-memory tree.
    pub fn from_tree(tree: &OwnedKDTree) -> Result<Self> {
        Self::new(
            tree.dims(),
            tree.block_capacity(),
            Words::Owned(tree.keys().to_vec()),
            Words::Owned(tree.ranges().to_vec()),
        )
    }

    fn new(dims: usize, block_capacity: usize, keys: Words, ranges: Words) -> Result<Self> {
        if dims == 0 || block_capacity == 0 {
            return Err(KdError::Config(format!(
                "invalid data set shape: {} dimensions, {} records per block",
                dims, block_capacity
            )));
        }
        let data = Self {
            id: NEXT_DATASET_ID.fetch_add(1, Ordering::Relaxed),
            dims,
            block_capacity,
            keys,
            ranges,
        };
        let block_words = (dims + 1) * block_capacity;
        let keys_len = data.keys().len();
        if keys_len % block_words != 0 {
            return Err(KdError::Format(format!(
                "keys hold {} words, not a whole number of {}-record blocks",
                keys_len, block_capacity
            )));
        }
        if data.ranges().len() != data.block_count() * 2 * dims {
            return Err(KdError::Format(format!(
                "{} ranges for {} blocks",
                data.ranges().len() / (2 * dims),
                data.block_count()
            )));
        }
        Ok(data)
    }

    /// Process-unique identifier, used to recognize resident copies.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn block_capacity(&self) -> usize {
        self.block_capacity
    }

    /// Words per record: the keys plus the reference.
    pub fn record_width(&self) -> usize {
        self.dims + 1
    }

    /// Words per block.
    pub fn block_words(&self) -> usize {
        self.record_width() * self.block_capacity
    }

    pub fn block_count(&self) -> usize {
        self.keys().len() / self.block_words()
    }

    /// Every block, back to back.
    pub fn keys(&self) -> &[u64] {
        self.keys.as_slice()
    }

    /// Every block range, back to back.
    pub fn ranges(&self) -> &[u64] {
        self.ranges.as_slice()
    }

    /// The records of one block, padding included.
    pub fn block(&self, index: usize) -> &[u64] {
        let words = self.block_words();
        &self.keys()[index * words..(index + 1) * words]
    }

    /// The `2 * dims` bounding range of one block.
    pub fn block_range(&self, index: usize) -> &[u64] {
        let words = 2 * self.dims;
        &self.ranges()[index * words..(index + 1) * words]
    }
}
