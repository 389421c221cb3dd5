//! Utilities to traverse the block KD-tree structure.

use crate::kdtree::constants::{DEAD_NODE, LEAF_CHILD, SLOT_WORDS};
use crate::kdtree::r#trait::right_slot;
use crate::kdtree::{KDTreeIndex, LeafBlock};

/// A slot of the tree reached by a walk from the root.
#[derive(Debug)]
pub struct Node<'a, T: KDTreeIndex> {
    /// The tree that this node is a reference onto
    tree: &'a T,
    slot: usize,
    depth: usize,
}

impl<T: KDTreeIndex> Clone for Node<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T: KDTreeIndex> Copy for Node<'_, T> {}

impl<'a, T: KDTreeIndex> Node<'a, T> {
    pub(crate) fn from_root(tree: &'a T) -> Self {
        Self {
            tree,
            slot: 0,
            depth: 0,
        }
    }

    #[inline]
    fn child_word(&self) -> u64 {
        self.tree.nodes()[self.slot * SLOT_WORDS]
    }

    #[inline]
    fn value_word(&self) -> u64 {
        self.tree.nodes()[self.slot * SLOT_WORDS + 1]
    }

    /// Index of this node's slot.
    pub fn slot(&self) -> usize {
        self.slot
    }

    /// Distance from the root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// The dimension this node's children are split on.
    pub fn split_dim(&self) -> usize {
        self.depth % self.tree.dims()
    }

    /// Returns `true` if this is a leaf block.
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.child_word() == LEAF_CHILD
    }

    /// Returns `true` if this slot marks an empty subtree.
    #[inline]
    pub fn is_dead(&self) -> bool {
        self.child_word() == DEAD_NODE
    }

    /// Returns `true` if this is an intermediate node with children.
    #[inline]
    pub fn is_parent(&self) -> bool {
        !self.is_leaf() && !self.is_dead()
    }

    /// The split value of an intermediate node.
    pub fn median(&self) -> Option<u64> {
        self.is_parent().then(|| self.value_word())
    }

    /// The child holding records up to and including the median.
    pub fn left_child(&self) -> Option<Node<'a, T>> {
        self.is_parent().then(|| Node {
            tree: self.tree,
            slot: self.child_word() as usize,
            depth: self.depth + 1,
        })
    }

    /// The child holding the records after the median position.
    pub fn right_child(&self) -> Option<Node<'a, T>> {
        self.is_parent().then(|| Node {
            tree: self.tree,
            slot: right_slot(
                self.tree.nodes(),
                self.child_word() as usize,
                self.tree.dims(),
            ),
            depth: self.depth + 1,
        })
    }

    /// The block descriptor of a leaf.
    pub fn leaf(&self) -> Option<LeafBlock> {
        self.is_leaf().then(|| LeafBlock {
            count: self.value_word(),
            offset: self.tree.nodes()[(self.slot + 1) * SLOT_WORDS],
        })
    }

    /// The bounding range `[min0, max0, min1, max1, …]` of a leaf.
    pub fn range(&self) -> Option<&'a [u64]> {
        let tree: &'a T = self.tree;
        let start = (self.slot + 2) * SLOT_WORDS;
        self.is_leaf()
            .then(|| &tree.nodes()[start..start + tree.dims() * SLOT_WORDS])
    }

    /// Number of records below this node, padding excluded.
    pub fn record_count(&self) -> u64 {
        if let Some(leaf) = self.leaf() {
            return leaf.count;
        }
        match (self.left_child(), self.right_child()) {
            (Some(left), Some(right)) => left.record_count() + right.record_count(),
            _ => 0,
        }
    }
}
