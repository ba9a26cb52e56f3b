//! Floating-point element types accepted by the fused kernel.
//!
//! `Element` is implemented for `f32` and `f64`. It carries the constants the
//! kernel needs (zero, two, the representable maximum used as sentinel) and
//! the widest vector transfer the type supports.

use std::fmt::Debug;
use std::ops::{Add, Mul, Sub};

/// Scalar type usable as matrix element, norm and distance.
pub trait Element:
    Copy
    + Debug
    + Default
    + PartialOrd
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Send
    + Sync
    + 'static
{
    /// Additive identity.
    const ZERO: Self;
    /// Factor applied to the dot product in `|x|² + |y|² - 2·x·y`.
    const TWO: Self;
    /// Largest finite value; the default "no neighbor" distance sentinel.
    const MAX: Self;
    /// Size of one element in bytes.
    const BYTES: usize;
    /// Widest transfer in elements (16-byte vectors).
    const MAX_VEC_WIDTH: usize;

    /// Squared L2 norm of one row.
    #[must_use]
    fn squared_norm(row: &[Self]) -> Self {
        row.iter().fold(Self::ZERO, |acc, &v| acc + v * v)
    }

    /// Order-preserving 32-bit key used by the packed lock-free merge.
    ///
    /// `None` when the type does not fit in 32 bits.
    #[must_use]
    fn ordered_key(self) -> Option<u32>;

    /// Inverse of [`Element::ordered_key`].
    #[must_use]
    fn from_ordered_key(key: u32) -> Option<Self>;
}

impl Element for f32 {
    const ZERO: Self = 0.0;
    const TWO: Self = 2.0;
    const MAX: Self = f32::MAX;
    const BYTES: usize = 4;
    const MAX_VEC_WIDTH: usize = 4;

    #[inline]
    fn squared_norm(row: &[Self]) -> Self {
        crate::simd::squared_norm_f32(row)
    }

    #[inline]
    fn ordered_key(self) -> Option<u32> {
        // Flip the sign bit of non-negative values and every bit of negative
        // values so that unsigned order matches float order. Both zeros map
        // to the key of +0.0.
        let bits = if self == 0.0 { 0 } else { self.to_bits() };
        Some(if bits & 0x8000_0000 == 0 {
            bits | 0x8000_0000
        } else {
            !bits
        })
    }

    #[inline]
    fn from_ordered_key(key: u32) -> Option<Self> {
        let bits = if key & 0x8000_0000 != 0 {
            key & 0x7fff_ffff
        } else {
            !key
        };
        Some(f32::from_bits(bits))
    }
}

impl Element for f64 {
    const ZERO: Self = 0.0;
    const TWO: Self = 2.0;
    const MAX: Self = f64::MAX;
    const BYTES: usize = 8;
    const MAX_VEC_WIDTH: usize = 2;

    #[inline]
    fn ordered_key(self) -> Option<u32> {
        None
    }

    #[inline]
    fn from_ordered_key(_key: u32) -> Option<Self> {
        None
    }
}
