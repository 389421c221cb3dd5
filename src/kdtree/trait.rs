use tinyvec::TinyVec;

use crate::error::{KdError, Result};
use crate::kdtree::constants::{DEAD_NODE, LEAF_CHILD, SLOT_WORDS};
use crate::kdtree::{LeafBlock, Node};
use crate::query::QueryBox;

/// A trait for searching and accessing data out of a block KD-tree.
pub trait KDTreeIndex: Sized {
    /// The underlying raw slot buffer of this tree, two words per slot.
    fn nodes(&self) -> &[u64];

    /// The number of dimensions of the indexed records.
    fn dims(&self) -> usize;

    /// The number of 16-byte slots in this tree.
    fn num_slots(&self) -> usize {
        self.nodes().len() / SLOT_WORDS
    }

    /// Search the tree for leaf blocks whose range overlaps `query`.
    ///
    /// The result is a superset of the blocks holding matching records, in the order the blocks
    /// were written.
    fn search(&self, query: &QueryBox) -> Vec<LeafBlock> {
        debug_assert_eq!(query.dims(), self.dims());
        let nodes = self.nodes();
        let dims = self.dims();

        // Use TinyVec to avoid heap allocations
        let mut stack: TinyVec<[(usize, usize); 64]> = TinyVec::new();
        stack.push((0, 0));

        let mut result = vec![];
        while let Some((slot, depth)) = stack.pop() {
            let child = nodes[slot * SLOT_WORDS];
            let value = nodes[slot * SLOT_WORDS + 1];
            if child == DEAD_NODE {
                continue;
            }
            if child == LEAF_CHILD {
                let range = &nodes[(slot + 2) * SLOT_WORDS..(slot + 2 + dims) * SLOT_WORDS];
                if query.overlaps(range) {
                    result.push(LeafBlock {
                        count: value,
                        offset: nodes[(slot + 1) * SLOT_WORDS],
                    });
                }
                continue;
            }

            let dim = depth % dims;
            let child = child as usize;
            // records equal to the median may sit on either side
            // Note: pushed in backwards order to what gets popped
            if query.upper(dim) >= value {
                stack.push((right_slot(nodes, child, dims), depth + 1));
            }
            if query.lower(dim) <= value {
                stack.push((child, depth + 1));
            }
        }
        result
    }

    /// Every leaf block, in the order the blocks were written.
    fn leaves(&self) -> Vec<LeafBlock> {
        let nodes = self.nodes();
        let dims = self.dims();
        let mut stack: TinyVec<[usize; 64]> = TinyVec::new();
        stack.push(0);

        let mut result = vec![];
        while let Some(slot) = stack.pop() {
            match nodes[slot * SLOT_WORDS] {
                DEAD_NODE => {}
                LEAF_CHILD => result.push(LeafBlock {
                    count: nodes[slot * SLOT_WORDS + 1],
                    offset: nodes[(slot + 1) * SLOT_WORDS],
                }),
                child => {
                    let child = child as usize;
                    stack.push(right_slot(nodes, child, dims));
                    stack.push(child);
                }
            }
        }
        result
    }

    /// Number of records stored in the tree, padding excluded.
    fn record_count(&self) -> u64 {
        self.leaves().iter().map(|leaf| leaf.count).sum()
    }

    /// Check that every slot a walk from the root can reach lies inside the buffer.
    fn validate(&self) -> Result<()> {
        let nodes = self.nodes();
        let dims = self.dims();
        let num_slots = self.num_slots();
        if dims == 0 || num_slots == 0 || nodes.len() % SLOT_WORDS != 0 {
            return Err(KdError::Format(format!(
                "tree of {} words cannot hold {} dimensions",
                nodes.len(),
                dims
            )));
        }

        let mut stack: Vec<usize> = vec![0];
        while let Some(slot) = stack.pop() {
            if slot >= num_slots {
                return Err(KdError::Format(format!(
                    "tree slot {} is out of bounds ({} slots)",
                    slot, num_slots
                )));
            }
            match nodes[slot * SLOT_WORDS] {
                DEAD_NODE => {}
                LEAF_CHILD => {
                    if slot + 2 + dims > num_slots {
                        return Err(KdError::Format(format!(
                            "leaf at slot {} is truncated",
                            slot
                        )));
                    }
                }
                child => {
                    let child = child as usize;
                    // children always follow their parent
                    if child <= slot || child >= num_slots {
                        return Err(KdError::Format(format!(
                            "slot {} points to invalid child {}",
                            slot, child
                        )));
                    }
                    stack.push(child);
                    stack.push(right_slot(nodes, child, dims));
                }
            }
        }
        Ok(())
    }

    /// Access the root node of the tree for manual traversal.
    fn root(&self) -> Node<'_, Self> {
        Node::from_root(self)
    }
}

/// Slot of the right sibling of the left child at `child`; a left leaf is `dims + 2` slots long.
#[inline]
pub(crate) fn right_slot(nodes: &[u64], child: usize, dims: usize) -> usize {
    if nodes[child * SLOT_WORDS] == LEAF_CHILD {
        child + 2 + dims
    } else {
        child + 1
    }
}
