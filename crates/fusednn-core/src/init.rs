//! Per-row reset of the output buffers before a main pass.

use rayon::prelude::*;

use crate::element::Element;
use crate::merge::{RowLocks, NOT_FOUND};

/// Rows handed to one pool task.
const INIT_CHUNK_ROWS: usize = 1024;

/// Sets every row to "no neighbor" and unlocks its row lock.
///
/// Only the first `indices.len()` rows of `locks` are touched; callers check
/// `locks.len() >= indices.len()` beforehand.
pub(crate) fn initialize<T: Element>(
    indices: &mut [i64],
    distances: &mut [T],
    locks: &RowLocks,
    max_val: T,
) {
    debug_assert_eq!(indices.len(), distances.len());
    indices
        .par_chunks_mut(INIT_CHUNK_ROWS)
        .zip(distances.par_chunks_mut(INIT_CHUNK_ROWS))
        .enumerate()
        .for_each(|(chunk, (idx, dist))| {
            let row0 = chunk * INIT_CHUNK_ROWS;
            for (offset, (i, d)) in idx.iter_mut().zip(dist.iter_mut()).enumerate() {
                *i = NOT_FOUND;
                *d = max_val;
                locks.reset_row(row0 + offset);
            }
        });
}
