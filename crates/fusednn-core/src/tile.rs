//! Tiling parameters and the geometry derived from them.
//!
//! A tile is the `m_blk × n_blk` block of the conceptual distance matrix
//! processed by one worker group. The group has `worker_rows × worker_cols`
//! workers; each owns a `rows_per_worker × cols_per_worker` register block.
//!
//! ```text
//!            n_blk = cols_per_worker × worker_cols
//!          ┌──────────────────────────────────────┐
//!   m_blk  │ worker (r, c) owns rows r, r + worker_rows, ...
//!          │ and cols c, c + worker_cols, ...     │
//!          └──────────────────────────────────────┘
//! ```
//!
//! Scratch holds one K block of X (`m_blk` rows) followed by one K block of
//! Y (`n_blk` rows), each row padded to `k_block + vec_width` elements.

use serde::{Deserialize, Serialize};

use crate::element::Element;
use crate::error::{Error, Result};

/// Number of workers that can exchange values in one lockstep reduction.
pub const LANE_GROUP_SIZE: usize = 32;

/// Tunable tiling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilingParams {
    /// Elements along K staged per main-loop iteration.
    pub k_block: usize,
    /// Output rows accumulated by one worker.
    pub rows_per_worker: usize,
    /// Output columns accumulated by one worker.
    pub cols_per_worker: usize,
    /// Workers sharing the same output column set.
    pub worker_rows: usize,
    /// Workers sharing the same output row set (one lane group per row).
    pub worker_cols: usize,
}

impl Default for TilingParams {
    fn default() -> Self {
        Self {
            k_block: 32,
            rows_per_worker: 4,
            cols_per_worker: 4,
            worker_rows: 16,
            worker_cols: 16,
        }
    }
}

/// Elements moved by one bulk transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum VecWidth {
    /// Scalar transfers.
    One,
    /// Two-element transfers.
    Two,
    /// Four-element transfers.
    Four,
}

impl VecWidth {
    /// Number of elements per transfer.
    #[inline]
    #[must_use]
    pub const fn lanes(self) -> usize {
        match self {
            Self::One => 1,
            Self::Two => 2,
            Self::Four => 4,
        }
    }

    /// Widest transfer that divides `k`, capped at what `T` supports.
    ///
    /// Chosen once per run; every tile uses the same width.
    #[must_use]
    pub fn for_k<T: Element>(k: usize) -> Self {
        if k % 4 == 0 && T::MAX_VEC_WIDTH >= 4 {
            Self::Four
        } else if k % 2 == 0 && T::MAX_VEC_WIDTH >= 2 {
            Self::Two
        } else {
            Self::One
        }
    }
}

/// Geometry derived from [`TilingParams`] for a given element type and width.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileGeometry {
    /// Source parameters.
    pub params: TilingParams,
    /// Transfer width.
    pub vec_width: VecWidth,
    /// Workers per group.
    pub workers: usize,
    /// Tile extent along M.
    pub m_blk: usize,
    /// Tile extent along N.
    pub n_blk: usize,
    /// Workers needed to load one K block of a single row.
    pub loaders_per_row: usize,
    /// Transfers issued by one worker for X per K block.
    pub loads_per_worker_x: usize,
    /// Transfers issued by one worker for Y per K block.
    pub loads_per_worker_y: usize,
    /// X rows covered by one round of transfers.
    pub rows_per_load_x: usize,
    /// Y rows covered by one round of transfers.
    pub rows_per_load_y: usize,
    /// Padded scratch row stride in elements.
    pub stride: usize,
    /// Scratch elements for the X page.
    pub page_x: usize,
    /// Scratch elements for X and Y together.
    pub scratch_elems: usize,
    /// Scratch footprint in bytes.
    pub scratch_bytes: usize,
}

impl TileGeometry {
    /// Derives and validates the geometry.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTileConfig` when a derived count is not integral
    /// or the lane-group constraints are violated.
    pub fn new<T: Element>(params: TilingParams, vec_width: VecWidth) -> Result<Self> {
        let TilingParams {
            k_block,
            rows_per_worker,
            cols_per_worker,
            worker_rows,
            worker_cols,
        } = params;

        if k_block == 0
            || rows_per_worker == 0
            || cols_per_worker == 0
            || worker_rows == 0
            || worker_cols == 0
        {
            return Err(Error::InvalidTileConfig(format!(
                "all tiling parameters must be non-zero: {params:?}"
            )));
        }

        let veclen = vec_width.lanes();
        if veclen > T::MAX_VEC_WIDTH {
            return Err(Error::InvalidTileConfig(format!(
                "vector width {veclen} exceeds the {} supported for {}-byte elements",
                T::MAX_VEC_WIDTH,
                T::BYTES
            )));
        }
        if k_block % veclen != 0 {
            return Err(Error::InvalidTileConfig(format!(
                "k_block {k_block} is not a multiple of vector width {veclen}"
            )));
        }
        if !worker_cols.is_power_of_two() || worker_cols > LANE_GROUP_SIZE {
            return Err(Error::InvalidTileConfig(format!(
                "worker_cols {worker_cols} must be a power of two no larger than {LANE_GROUP_SIZE}"
            )));
        }

        let workers = worker_rows * worker_cols;
        let m_blk = rows_per_worker * worker_rows;
        let n_blk = cols_per_worker * worker_cols;
        let loaders_per_row = k_block / veclen;

        if workers % loaders_per_row != 0 {
            return Err(Error::InvalidTileConfig(format!(
                "{workers} workers cannot be split into rows of {loaders_per_row} loaders"
            )));
        }

        let loads_x = Self::loads_per_worker(m_blk, loaders_per_row, workers, "X")?;
        let loads_y = Self::loads_per_worker(n_blk, loaders_per_row, workers, "Y")?;

        let stride = k_block + veclen;
        let page_x = stride * m_blk;
        let scratch_elems = page_x + stride * n_blk;

        Ok(Self {
            params,
            vec_width,
            workers,
            m_blk,
            n_blk,
            loaders_per_row,
            loads_per_worker_x: loads_x,
            loads_per_worker_y: loads_y,
            rows_per_load_x: m_blk / loads_x,
            rows_per_load_y: n_blk / loads_y,
            stride,
            page_x,
            scratch_elems,
            scratch_bytes: scratch_elems * T::BYTES,
        })
    }

    fn loads_per_worker(
        extent: usize,
        loaders_per_row: usize,
        workers: usize,
        side: &str,
    ) -> Result<usize> {
        let transfers = extent * loaders_per_row;
        if transfers % workers != 0 || transfers < workers {
            return Err(Error::InvalidTileConfig(format!(
                "{side} tile needs {transfers} transfers, not an integral multiple of {workers} workers"
            )));
        }
        let loads = transfers / workers;
        if extent % loads != 0 {
            return Err(Error::InvalidTileConfig(format!(
                "{side} tile extent {extent} is not covered by {loads} load rounds"
            )));
        }
        Ok(loads)
    }

    /// Rejects geometries whose scratch does not fit the budget.
    ///
    /// # Errors
    ///
    /// Returns `Error::ScratchExceeded`.
    pub fn check_scratch(&self, budget: usize) -> Result<()> {
        if self.scratch_bytes > budget {
            return Err(Error::ScratchExceeded {
                required: self.scratch_bytes,
                budget,
            });
        }
        Ok(())
    }

    /// Grid shape `(ceil(m / m_blk), ceil(n / n_blk))`.
    #[must_use]
    pub fn grid(&self, m: usize, n: usize) -> (usize, usize) {
        (m.div_ceil(self.m_blk), n.div_ceil(self.n_blk))
    }

    /// Accumulator slots per worker.
    #[inline]
    #[must_use]
    pub fn acc_per_worker(&self) -> usize {
        self.params.rows_per_worker * self.params.cols_per_worker
    }
}
