//! Atomic primitives used across tile boundaries.
//!
//! With the `loom` feature the row locks and packed keys are built on loom's
//! model types so `tests/loom_tests.rs` can explore every interleaving.

#[cfg(feature = "loom")]
pub(crate) use loom::hint::spin_loop;
#[cfg(feature = "loom")]
pub(crate) use loom::sync::atomic::{AtomicU32, AtomicU64, Ordering};

#[cfg(not(feature = "loom"))]
pub(crate) use std::hint::spin_loop;
#[cfg(not(feature = "loom"))]
pub(crate) use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
