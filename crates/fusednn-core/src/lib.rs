//! # fusednn-core
//!
//! Fused squared-L2 distance and 1-nearest-neighbor search.
//!
//! For every row of a query matrix `X` (m × k) the engine finds the row of a
//! candidate matrix `Y` (n × k) with the smallest squared Euclidean distance,
//! without ever materializing the m × n distance matrix. The product `X·Yᵀ`
//! is accumulated tile by tile; each tile turns its block into distances with
//! `|x|² + |y|² - 2·x·y`, reduces it to a per-row minimum, and merges that
//! minimum into the global result.
//!
//! ## Features
//!
//! - **Tiled kernel**: configurable register blocking, padded scratch pages,
//!   vector-width selection from `k`
//! - **Two merge strategies**: per-row spin locks or a lock-free packed CAS
//! - **Deterministic ties**: the lowest column index wins on equal distance
//! - **Layered config**: defaults, `fusednn.toml`, `FUSEDNN_*` environment
//!
//! ## Quick Start
//!
//! ```rust
//! use fusednn_core::{fused_l2_nn, MatrixRef};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let x = [0.0_f32, 0.0, 1.0, 1.0];
//!     let y = [0.0_f32, 1.0, 5.0, 5.0];
//!
//!     let nn = fused_l2_nn(MatrixRef::new(&x, 2, 2)?, MatrixRef::new(&y, 2, 2)?)?;
//!     assert_eq!(nn.indices, vec![0, 0]);
//!     assert_eq!(nn.distances, vec![1.0, 1.0]);
//!     Ok(())
//! }
//! ```
//!
//! Callers running many passes keep a [`Dispatcher`] and reuse their own
//! output and [`RowLocks`] buffers through [`Dispatcher::run`].

#![warn(missing_docs)]
// Clippy lints configured in workspace Cargo.toml [workspace.lints.clippy]
#![cfg_attr(
    test,
    allow(
        clippy::doc_markdown,
        clippy::uninlined_format_args,
        clippy::cast_lossless,
        clippy::float_cmp,
        clippy::manual_assert
    )
)]

pub mod config;
pub mod dispatch;
pub mod element;
pub mod error;
mod init;
pub mod kernel;
pub mod matrix;
pub mod merge;
#[cfg(test)]
mod merge_tests;
pub mod norms;
pub mod simd;
mod sync;
pub mod tile;

pub use config::{FusedNnConfig, LoggingConfig};
pub use dispatch::{
    fused_l2_nn, Dispatcher, ExecQueue, NearestNeighbors, NearestOutputs, RunReport,
};
pub use element::Element;
pub use error::{Error, Result};
pub use kernel::{ClampPolicy, TileCoord};
pub use matrix::{FusedNnInputs, MatrixRef};
pub use merge::{
    Candidate, MergeSnapshot, MergeStats, MergeStrategy, PackedKeys, RowLockGuard, RowLocks,
    NOT_FOUND,
};
pub use norms::row_squared_norms;
pub use tile::{TileGeometry, TilingParams, VecWidth, LANE_GROUP_SIZE};
