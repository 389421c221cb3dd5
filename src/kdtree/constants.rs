/// Default number of records per leaf block.
pub const DEFAULT_BLOCK_CAPACITY: usize = 4096;

/// `child` value of a leaf slot.
pub const LEAF_CHILD: u64 = 0;

/// `child` value of a slot whose subtree is empty.
pub const DEAD_NODE: u64 = u64::MAX;

/// Record reference of a padding record in the keys file.
pub const PAD_REF: u64 = u64::MAX;

/// Number of `u64` words in one tree slot (`child`, `value`).
pub(crate) const SLOT_WORDS: usize = 2;
