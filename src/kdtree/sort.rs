//! In-place MSB radix sort of `(value, position)` pairs.
//!
//! Each item is a `u128` composite with the value in the high 64 bits and the record position in
//! the low 64 bits. Only the value bytes are sorted on, so records with equal values may appear in
//! any order.

/// Buckets smaller than this are finished with insertion sort.
const MIN_FOR_RADIX: usize = 64;

/// Byte index (from the least significant) of the most significant value byte.
const TOP_BYTE: u32 = 15;

/// Pack a value and its position into a sortable composite.
#[inline]
pub(crate) fn composite(value: u64, position: u64) -> u128 {
    ((value as u128) << 64) | position as u128
}

#[inline]
pub(crate) fn value_of(item: u128) -> u64 {
    (item >> 64) as u64
}

#[inline]
pub(crate) fn position_of(item: u128) -> u64 {
    item as u64
}

#[inline]
fn byte_of(item: u128, byte: u32) -> usize {
    ((item >> (byte * 8)) & 0xff) as usize
}

/// Sort composites by value.
pub(crate) fn sort_by_value(items: &mut [u128]) {
    if items.len() < MIN_FOR_RADIX {
        insertion_sort(items);
    } else {
        radix_sort(items, TOP_BYTE);
    }
}

fn radix_sort(items: &mut [u128], byte: u32) {
    let mut counts = [0usize; 256];
    for item in items.iter() {
        counts[byte_of(*item, byte)] += 1;
    }

    // next free position of each bucket
    let mut heads = [0usize; 256];
    let mut sum = 0;
    for (head, count) in heads.iter_mut().zip(counts) {
        *head = sum;
        sum += count;
    }

    let mut end = 0;
    for bucket in 0..256 {
        let count = counts[bucket];
        if count == 0 {
            continue;
        }
        end += count;
        // cycle misplaced items into their buckets until this bucket is full
        let mut i = heads[bucket];
        while i < end {
            let mut value = items[i];
            while byte_of(value, byte) != bucket {
                let target = &mut heads[byte_of(value, byte)];
                std::mem::swap(&mut items[*target], &mut value);
                *target += 1;
            }
            items[i] = value;
            i += 1;
        }
        heads[bucket] = end;

        if byte > TOP_BYTE - 7 {
            let sub = &mut items[end - count..end];
            if count < MIN_FOR_RADIX {
                insertion_sort(sub);
            } else {
                radix_sort(sub, byte - 1);
            }
        }
    }
}

fn insertion_sort(items: &mut [u128]) {
    for i in 1..items.len() {
        let item = items[i];
        let mut j = i;
        while j > 0 && value_of(item) < value_of(items[j - 1]) {
            items[j] = items[j - 1];
            j -= 1;
        }
        items[j] = item;
    }
}
