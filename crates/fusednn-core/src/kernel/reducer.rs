//! Per-row minimum within a lane group.
//!
//! The `worker_cols` workers sharing an output row form one lane group. Each
//! first scans its own columns, then the group runs a binary-tree reduction:
//! at every step all lanes publish their value to the exchange buffer, the
//! group passes a barrier, and lane `l` compares against lane `l + offset`.
//! After `log2(worker_cols)` steps lane 0 (the row leader) holds the best
//! `(index, distance)` of the tile for that row.

use crate::element::Element;
use crate::merge::Candidate;
use crate::tile::TileGeometry;

use super::TileCoord;

/// Scans one worker's distances for each of its rows.
///
/// `best` receives `rows_per_worker` candidates. Columns at or past `n` are
/// never considered.
pub(super) fn scan_worker<T: Element>(
    best: &mut [Candidate<T>],
    dist: &[T],
    geom: &TileGeometry,
    tile: TileCoord,
    tid: usize,
    n: usize,
    max_val: T,
) {
    let p = &geom.params;
    let acc_col = tid % p.worker_cols;
    let col0 = tile.col_block * geom.n_blk + acc_col;

    for (i, slot) in best.iter_mut().enumerate() {
        let mut current = Candidate::none(max_val);
        for j in 0..p.cols_per_worker {
            let col = col0 + j * p.worker_cols;
            if col >= n {
                break;
            }
            #[allow(clippy::cast_possible_wrap)] // Reason: n <= isize::MAX (slice length).
            let candidate = Candidate::new(col as i64, dist[i * p.cols_per_worker + j]);
            if candidate.is_better_than(&current) {
                current = candidate;
            }
        }
        *slot = current;
    }
}

/// Tree-reduces local row `i` across every lane group of the tile.
///
/// `best` is laid out `[tid * rows_per_worker + i]`; on return the row
/// leader's entry (lane 0) holds the group minimum. `exchange` has one slot
/// per worker.
pub(super) fn reduce_groups<T: Element>(
    best: &mut [Candidate<T>],
    exchange: &mut [Candidate<T>],
    geom: &TileGeometry,
    i: usize,
) {
    let p = &geom.params;
    let rows = p.rows_per_worker;
    let mut offset = p.worker_cols / 2;

    while offset > 0 {
        // publish
        for tid in 0..geom.workers {
            exchange[tid] = best[tid * rows + i];
        }
        // barrier
        for tid in 0..geom.workers {
            let lane = tid % p.worker_cols;
            if lane + offset < p.worker_cols {
                let other = exchange[tid + offset];
                let own = &mut best[tid * rows + i];
                if other.is_better_than(own) {
                    *own = other;
                }
            }
        }
        offset /= 2;
    }
}
