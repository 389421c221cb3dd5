//! A bump allocator over a single pre-reserved buffer.
//!
//! Each device reserves one arena when it starts and reuses it for every request. Buffers handed
//! out by [`Arena::alloc`] are typed, bounds-checked [`Slot`]s; they are never freed individually.
//! Instead the arena is rewound to a [`ArenaMark`] between batches.

use std::marker::PhantomData;
use std::mem::{align_of, size_of};

use bytemuck::{cast_slice, cast_slice_mut, Pod};

use crate::error::{KdError, Result};

/// Backing words are `u64`, so every offset that is a multiple of 8 is suitably aligned for all
/// the plain-old-data types stored in an arena.
const WORD: usize = size_of::<u64>();

/// A typed region of an [`Arena`].
#[derive(Debug, PartialEq, Eq)]
pub struct Slot<T> {
    offset: usize,
    len: usize,
    phantom: PhantomData<T>,
}

impl<T> Clone for Slot<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Slot<T> {}

impl<T> Slot<T> {
    /// Byte offset of this slot inside the arena.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Number of `T` elements in this slot.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// One past the last byte of this slot.
    pub fn end(&self) -> usize {
        self.offset + self.len * size_of::<T>()
    }
}

/// A position in an [`Arena`] that allocations can be rewound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ArenaMark(usize);

/// A fixed-capacity bump allocator.
#[derive(Debug)]
pub struct Arena {
    words: Vec<u64>,
    used: usize,
}

impl Arena {
    /// Reserve an arena of `bytes` bytes (rounded down to whole words).
    ///
    /// Returns [`KdError::ResourceExhausted`] when the memory cannot be reserved.
    pub fn with_capacity(bytes: usize) -> Result<Self> {
        let num_words = bytes / WORD;
        let mut words = Vec::new();
        words
            .try_reserve_exact(num_words)
            .map_err(|_| KdError::ResourceExhausted {
                required: bytes,
                available: 0,
            })?;
        words.resize(num_words, 0);
        Ok(Self { words, used: 0 })
    }

    /// Total capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.words.len() * WORD
    }

    /// Bytes handed out since the last reset.
    pub fn used(&self) -> usize {
        self.used
    }

    /// Bytes still available, ignoring alignment padding of the next allocation.
    pub fn remaining(&self) -> usize {
        self.capacity() - self.used
    }

    /// Allocate `len` elements of `T`.
    pub fn alloc<T: Pod>(&mut self, len: usize) -> Result<Slot<T>> {
        let align = align_of::<T>();
        debug_assert!(WORD % align == 0);
        let offset = self.used.next_multiple_of(align);
        let end = len
            .checked_mul(size_of::<T>())
            .and_then(|bytes| bytes.checked_add(offset))
            .filter(|end| *end <= self.capacity())
            .ok_or(KdError::ResourceExhausted {
                required: len.saturating_mul(size_of::<T>()),
                available: self.capacity().saturating_sub(offset),
            })?;
        self.used = end;
        Ok(Slot {
            offset,
            len,
            phantom: PhantomData,
        })
    }

    /// Current allocation position.
    pub fn mark(&self) -> ArenaMark {
        ArenaMark(self.used)
    }

    /// Release every slot allocated after `mark`.
    pub fn reset_to(&mut self, mark: ArenaMark) {
        assert!(mark.0 <= self.used, "arena mark is ahead of the allocator");
        self.used = mark.0;
    }

    /// Release every slot.
    pub fn reset(&mut self) {
        self.used = 0;
    }

    /// Read access to a slot.
    pub fn get<T: Pod>(&self, slot: Slot<T>) -> &[T] {
        assert!(slot.end() <= self.used, "slot was released");
        cast_slice(&self.bytes()[slot.offset..slot.end()])
    }

    /// Write access to a slot.
    pub fn get_mut<T: Pod>(&mut self, slot: Slot<T>) -> &mut [T] {
        assert!(slot.end() <= self.used, "slot was released");
        let end = slot.end();
        cast_slice_mut(&mut self.bytes_mut()[slot.offset..end])
    }

    /// Split the arena at `out`: read access to everything allocated before it, write access to
    /// `out` itself.
    pub fn split_for<T: Pod>(&mut self, out: Slot<T>) -> (ArenaRead<'_>, &mut [T]) {
        assert!(out.end() <= self.used, "slot was released");
        let end = out.end();
        let (head, tail) = self.bytes_mut()[..end].split_at_mut(out.offset);
        (ArenaRead { bytes: head }, cast_slice_mut(tail))
    }

    fn bytes(&self) -> &[u8] {
        cast_slice(&self.words)
    }

    fn bytes_mut(&mut self) -> &mut [u8] {
        cast_slice_mut(&mut self.words)
    }
}

/// Read-only view of the part of an arena below a slot that is being written.
#[derive(Debug)]
pub struct ArenaRead<'a> {
    bytes: &'a [u8],
}

impl ArenaRead<'_> {
    pub fn get<T: Pod>(&self, slot: Slot<T>) -> &[T] {
        assert!(
            slot.end() <= self.bytes.len(),
            "slot overlaps the output slot"
        );
        cast_slice(&self.bytes[slot.offset..slot.end()])
    }
}
