//! Per-worker outer-product accumulation over one staged K block.

use crate::element::Element;
use crate::tile::TileGeometry;

/// Register file of one worker: `rows_per_worker` X vectors and
/// `cols_per_worker` Y vectors of `vec_width` lanes each.
#[derive(Debug, Clone)]
pub(super) struct WorkerRegs<T> {
    regx: Vec<T>,
    regy: Vec<T>,
}

impl<T: Element> WorkerRegs<T> {
    pub(super) fn new(geom: &TileGeometry) -> Self {
        let veclen = geom.vec_width.lanes();
        Self {
            regx: vec![T::ZERO; geom.params.rows_per_worker * veclen],
            regy: vec![T::ZERO; geom.params.cols_per_worker * veclen],
        }
    }

    /// Loads this worker's vectors at K offset `ki` of the staged block.
    pub(super) fn load(&mut self, scratch: &[T], geom: &TileGeometry, tid: usize, ki: usize) {
        let veclen = geom.vec_width.lanes();
        let acc_row = tid / geom.params.worker_cols;
        let acc_col = tid % geom.params.worker_cols;

        for (i, reg) in self.regx.chunks_exact_mut(veclen).enumerate() {
            let start = (acc_row + i * geom.params.worker_rows) * geom.stride + ki;
            reg.copy_from_slice(&scratch[start..start + veclen]);
        }
        for (j, reg) in self.regy.chunks_exact_mut(veclen).enumerate() {
            let start = geom.page_x + (acc_col + j * geom.params.worker_cols) * geom.stride + ki;
            reg.copy_from_slice(&scratch[start..start + veclen]);
        }
    }

    /// `acc[i][j] += Σ_v regx[i][v] * regy[j][v]`, row-major, ascending lane.
    pub(super) fn accumulate(&self, acc: &mut [T], geom: &TileGeometry) {
        let veclen = geom.vec_width.lanes();
        let cols = geom.params.cols_per_worker;

        for (i, x) in self.regx.chunks_exact(veclen).enumerate() {
            for (j, y) in self.regy.chunks_exact(veclen).enumerate() {
                let slot = &mut acc[i * cols + j];
                for v in 0..veclen {
                    *slot = *slot + x[v] * y[v];
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::{TilingParams, VecWidth};

    fn geometry() -> TileGeometry {
        let params = TilingParams {
            k_block: 4,
            rows_per_worker: 2,
            cols_per_worker: 2,
            worker_rows: 2,
            worker_cols: 2,
        };
        TileGeometry::new::<f64>(params, VecWidth::Two).unwrap()
    }

    #[test]
    fn test_worker_reads_strided_rows() {
        let geom = geometry();
        let mut scratch = vec![0.0_f64; geom.scratch_elems];
        // X page: local row r, column c = 100 + r * 10 + c
        for r in 0..geom.m_blk {
            for c in 0..4 {
                scratch[r * geom.stride + c] = (100 + r * 10 + c) as f64;
            }
        }
        // Y page: local row r, column c = 200 + r * 10 + c
        for r in 0..geom.n_blk {
            for c in 0..4 {
                scratch[geom.page_x + r * geom.stride + c] = (200 + r * 10 + c) as f64;
            }
        }

        // tid 3 -> acc_row 1, acc_col 1 -> X rows 1, 3 and Y rows 1, 3
        let mut regs = WorkerRegs::new(&geom);
        regs.load(&scratch, &geom, 3, 2);
        assert_eq!(regs.regx, vec![112.0, 113.0, 132.0, 133.0]);
        assert_eq!(regs.regy, vec![212.0, 213.0, 232.0, 233.0]);
    }

    #[test]
    fn test_accumulate_outer_product() {
        let geom = geometry();
        let regs = WorkerRegs {
            regx: vec![1.0_f64, 2.0, 3.0, 4.0],
            regy: vec![5.0, 6.0, 7.0, 8.0],
        };
        let mut acc = vec![1.0_f64; 4];
        regs.accumulate(&mut acc, &geom);
        // [1,2]·[5,6]=17, [1,2]·[7,8]=23, [3,4]·[5,6]=39, [3,4]·[7,8]=53
        assert_eq!(acc, vec![18.0, 24.0, 40.0, 54.0]);
    }
}
