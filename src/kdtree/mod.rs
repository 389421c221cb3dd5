//! A block KD-tree: records are partitioned into fixed-size leaf blocks whose bounding ranges
//! are kept in a compact slot array, so a search returns candidate blocks instead of records.

#![warn(missing_docs)]

mod builder;
pub(crate) mod constants;
mod index;
pub(crate) mod sort;
mod r#trait;
mod traversal;

pub use builder::{build_files, BuildSummary, KDTreeBuilder};
pub use constants::{DEAD_NODE, DEFAULT_BLOCK_CAPACITY, LEAF_CHILD, PAD_REF};
pub use index::{KDTreeRef, LeafBlock, MappedKDTree, OwnedKDTree};
pub use r#trait::KDTreeIndex;
pub use traversal::Node;

#[cfg(test)]
mod test;
