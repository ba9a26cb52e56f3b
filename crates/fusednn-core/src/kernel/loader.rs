//! Cooperative staging of X/Y sub-tiles into group scratch.
//!
//! Worker `tid` loads `vec_width` contiguous elements starting at column
//! `(tid % loaders_per_row) * vec_width` of the K block, for rows
//! `tid / loaders_per_row + i * rows_per_load` (`i < loads_per_worker`).
//! Rows past the matrix end and columns past `k` are written as zeros, so the
//! accumulator never needs a bounds check.

use crate::element::Element;
use crate::matrix::MatrixRef;
use crate::tile::TileGeometry;

/// One side (X or Y) of the staged K block.
#[derive(Debug, Clone, Copy)]
pub(super) struct StageSide<'a, T> {
    pub matrix: MatrixRef<'a, T>,
    /// First global row of the tile on this side.
    pub base_row: usize,
    pub loads_per_worker: usize,
    pub rows_per_load: usize,
}

/// Fixed-width bulk read: copies `dst.len()` elements from `src` at `offset`,
/// or zero-fills when the read would leave `src`.
#[inline]
pub(super) fn read_vec<T: Element>(src: &[T], offset: usize, dst: &mut [T]) {
    match src.get(offset..offset + dst.len()) {
        Some(values) => dst.copy_from_slice(values),
        None => dst.fill(T::ZERO),
    }
}

/// Stages one K block of `side` into `page` for every worker of the group.
pub(super) fn stage<T: Element>(
    page: &mut [T],
    geom: &TileGeometry,
    side: &StageSide<'_, T>,
    kidx: usize,
) {
    let veclen = geom.vec_width.lanes();
    let rows = side.matrix.rows();
    let k = side.matrix.cols();

    for tid in 0..geom.workers {
        let srow = tid / geom.loaders_per_row;
        let scol = (tid % geom.loaders_per_row) * veclen;
        let koffset = kidx + scol;

        for i in 0..side.loads_per_worker {
            let local_row = srow + i * side.rows_per_load;
            let global_row = side.base_row + local_row;
            let start = local_row * geom.stride + scol;
            let dst = &mut page[start..start + veclen];

            if koffset < k && global_row < rows {
                read_vec(side.matrix.row(global_row), koffset, dst);
            } else {
                dst.fill(T::ZERO);
            }
        }
    }
}
