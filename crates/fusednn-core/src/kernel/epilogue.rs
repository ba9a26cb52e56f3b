//! Norm staging and conversion of dot products into squared distances.

use serde::{Deserialize, Serialize};

use crate::element::Element;
use crate::tile::TileGeometry;

use super::TileCoord;

/// What to do with negative distances produced by cancellation in
/// `|x|² + |y|² - 2·x·y` for near-identical rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClampPolicy {
    /// Clamp negative (and negative-zero) distances to `+0`.
    #[default]
    Zero,
    /// Keep the raw arithmetic result.
    None,
}

impl ClampPolicy {
    #[inline]
    pub(crate) fn apply<T: Element>(self, distance: T) -> T {
        match self {
            Self::Zero if distance <= T::ZERO => T::ZERO,
            _ => distance,
        }
    }
}

/// Writes the tile's slice of the norm vectors to the front of scratch:
/// X norms at `[0, m_blk)`, Y norms at `[m_blk, m_blk + n_blk)`.
/// Rows past `m`/`n` get `max_val` so they can never become a minimum.
pub(super) fn stage_norms<T: Element>(
    scratch: &mut [T],
    geom: &TileGeometry,
    tile: TileCoord,
    x_norms: &[T],
    y_norms: &[T],
    max_val: T,
) {
    let row0 = tile.row_block * geom.m_blk;
    let col0 = tile.col_block * geom.n_blk;

    let (sx, rest) = scratch.split_at_mut(geom.m_blk);
    for (i, slot) in sx.iter_mut().enumerate() {
        *slot = x_norms.get(row0 + i).copied().unwrap_or(max_val);
    }
    for (j, slot) in rest[..geom.n_blk].iter_mut().enumerate() {
        *slot = y_norms.get(col0 + j).copied().unwrap_or(max_val);
    }
}

/// Turns one worker's accumulators into distances in place.
pub(super) fn combine<T: Element>(
    acc: &mut [T],
    scratch: &[T],
    geom: &TileGeometry,
    tid: usize,
    clamp: ClampPolicy,
) {
    let p = &geom.params;
    let acc_row = tid / p.worker_cols;
    let acc_col = tid % p.worker_cols;

    for i in 0..p.rows_per_worker {
        let xn = scratch[i * p.worker_rows + acc_row];
        for j in 0..p.cols_per_worker {
            let yn = scratch[geom.m_blk + j * p.worker_cols + acc_col];
            let slot = &mut acc[i * p.cols_per_worker + j];
            *slot = clamp.apply(xn + yn - T::TWO * *slot);
        }
    }
}
