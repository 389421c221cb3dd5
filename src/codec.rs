//! Order-preserving transforms between signed/float domains and unsigned 64-bit keys.
//!
//! Every dimension of a record is stored as a `u64` so that plain unsigned comparison reproduces
//! the ordering of the original values. Integers flip the sign bit; doubles flip every bit of
//! negative values and only the sign bit of non-negative values.

use std::fmt::Debug;

use crate::error::{KdError, Result};

const SIGN_BIT: u64 = 0x8000_0000_0000_0000;

/// Encode a double so that unsigned comparison of the keys matches `f64` ordering.
#[inline]
pub fn encode_f64(value: f64) -> u64 {
    let bits = value.to_bits();
    bits ^ ((bits >> 63).wrapping_neg() | SIGN_BIT)
}

/// Inverse of [`encode_f64`].
#[inline]
pub fn decode_f64(key: u64) -> f64 {
    f64::from_bits(key ^ ((key >> 63).wrapping_sub(1) | SIGN_BIT))
}

/// Encode a signed integer so that unsigned comparison of the keys matches `i64` ordering.
#[inline]
pub fn encode_i64(value: i64) -> u64 {
    (value as u64) ^ SIGN_BIT
}

/// Inverse of [`encode_i64`].
#[inline]
pub fn decode_i64(key: u64) -> i64 {
    (key ^ SIGN_BIT) as i64
}

/// The numeric domain a dimension was encoded from.
///
/// The discriminant is the tag written to the `.meta` file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    Integer = 0,
    Float = 1,
}

impl KeyType {
    /// The tag used for this type in the `.meta` file.
    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Parse a `.meta` type tag.
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(KeyType::Integer),
            1 => Ok(KeyType::Float),
            t => Err(KdError::Format(format!("Unexpected key type tag {}.", t))),
        }
    }

    /// Decode a key of this type into a double, e.g. for point-in-polygon tests.
    #[inline]
    pub fn decode_to_f64(&self, key: u64) -> f64 {
        match self {
            KeyType::Integer => decode_i64(key) as f64,
            KeyType::Float => decode_f64(key),
        }
    }
}

/// A trait for the primitive types that can be stored as order-preserving keys.
///
/// This trait is sealed and cannot be implemented for external types: the `.meta` file only
/// knows the two [`KeyType`] domains.
pub trait OrderedKey: private::Sealed + Copy + PartialOrd + Debug + Send + Sync {
    /// The domain this type is encoded in.
    const KEY_TYPE: KeyType;

    /// Encode into an order-preserving key.
    fn encode(self) -> u64;

    /// Decode from an order-preserving key.
    fn decode(key: u64) -> Self;
}

impl OrderedKey for i64 {
    const KEY_TYPE: KeyType = KeyType::Integer;

    #[inline]
    fn encode(self) -> u64 {
        encode_i64(self)
    }

    #[inline]
    fn decode(key: u64) -> Self {
        decode_i64(key)
    }
}

impl OrderedKey for i32 {
    const KEY_TYPE: KeyType = KeyType::Integer;

    #[inline]
    fn encode(self) -> u64 {
        encode_i64(self.into())
    }

    #[inline]
    fn decode(key: u64) -> Self {
        decode_i64(key) as i32
    }
}

impl OrderedKey for f64 {
    const KEY_TYPE: KeyType = KeyType::Float;

    #[inline]
    fn encode(self) -> u64 {
        encode_f64(self)
    }

    #[inline]
    fn decode(key: u64) -> Self {
        decode_f64(key)
    }
}

impl OrderedKey for f32 {
    const KEY_TYPE: KeyType = KeyType::Float;

    #[inline]
    fn encode(self) -> u64 {
        encode_f64(self.into())
    }

    #[inline]
    fn decode(key: u64) -> Self {
        decode_f64(key) as f32
    }
}

// https://rust-lang.github.io/api-guidelines/future-proofing.html#sealed-traits-protect-against-downstream-implementations-c-sealed
mod private {
    pub trait Sealed {}

    impl Sealed for i32 {}
    impl Sealed for i64 {}
    impl Sealed for f32 {}
    impl Sealed for f64 {}
}
