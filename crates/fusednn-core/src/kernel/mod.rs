//! Tile kernel: one worker group computing one block of the distance matrix.
//!
//! The workers of a group are emulated in lockstep inside a single pool task.
//! Every group-wide barrier is therefore a phase boundary below: all workers
//! finish the current phase before any worker starts the next, and no worker
//! can skip a phase.
//!
//! ```text
//! prolog   zero accumulators
//! loop     for each K block:
//!              stage X and Y sub-tiles ─ barrier ─ accumulate ─ barrier
//! epilog   stage norms ─ barrier ─ combine into distances
//!          scan own columns ─ tree-reduce per lane group
//!          row leaders offer their candidate to the sink
//! ```
//!
//! Scratch is single-buffered: a K block is fully consumed before the next
//! one overwrites it.

mod accumulator;
mod epilogue;
mod loader;
mod reducer;

pub use epilogue::ClampPolicy;

use crate::element::Element;
use crate::matrix::FusedNnInputs;
use crate::merge::{Candidate, TileSink};
use crate::tile::TileGeometry;

use accumulator::WorkerRegs;
use loader::StageSide;

/// Position of a tile in the output grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TileCoord {
    /// Block index along M (rows of X).
    pub row_block: usize,
    /// Block index along N (rows of Y).
    pub col_block: usize,
}

/// Group-private state, reused across every tile a pool thread processes.
#[derive(Debug)]
pub(crate) struct TileKernel<T> {
    geom: TileGeometry,
    clamp: ClampPolicy,
    scratch: Vec<T>,
    acc: Vec<T>,
    regs: WorkerRegs<T>,
    best: Vec<Candidate<T>>,
    exchange: Vec<Candidate<T>>,
}

impl<T: Element> TileKernel<T> {
    pub(crate) fn new(geom: TileGeometry, clamp: ClampPolicy) -> Self {
        Self {
            geom,
            clamp,
            scratch: vec![T::ZERO; geom.scratch_elems],
            acc: vec![T::ZERO; geom.workers * geom.acc_per_worker()],
            regs: WorkerRegs::new(&geom),
            best: vec![Candidate::none(T::MAX); geom.workers * geom.params.rows_per_worker],
            exchange: vec![Candidate::none(T::MAX); geom.workers],
        }
    }

    /// Runs the whole tile and offers each valid row's local best to `sink`.
    pub(crate) fn run<S: TileSink<T>>(
        &mut self,
        inputs: &FusedNnInputs<'_, T>,
        tile: TileCoord,
        sink: &S,
    ) {
        self.prolog();
        self.main_loop(inputs, tile);
        self.epilog(inputs, tile, sink);
    }

    fn prolog(&mut self) {
        self.acc.fill(T::ZERO);
    }

    fn main_loop(&mut self, inputs: &FusedNnInputs<'_, T>, tile: TileCoord) {
        let geom = self.geom;
        let veclen = geom.vec_width.lanes();
        let per_worker = geom.acc_per_worker();

        let x_side = StageSide {
            matrix: inputs.x,
            base_row: tile.row_block * geom.m_blk,
            loads_per_worker: geom.loads_per_worker_x,
            rows_per_load: geom.rows_per_load_x,
        };
        let y_side = StageSide {
            matrix: inputs.y,
            base_row: tile.col_block * geom.n_blk,
            loads_per_worker: geom.loads_per_worker_y,
            rows_per_load: geom.rows_per_load_y,
        };

        for kidx in (0..inputs.k()).step_by(geom.params.k_block) {
            let (page_x, page_y) = self.scratch.split_at_mut(geom.page_x);
            loader::stage(page_x, &geom, &x_side, kidx);
            loader::stage(page_y, &geom, &y_side, kidx);
            // barrier: staged block complete

            for ki in (0..geom.params.k_block).step_by(veclen) {
                for (tid, acc) in self.acc.chunks_exact_mut(per_worker).enumerate() {
                    self.regs.load(&self.scratch, &geom, tid, ki);
                    self.regs.accumulate(acc, &geom);
                }
            }
            // barrier: block consumed, scratch may be overwritten
        }
    }

    fn epilog<S: TileSink<T>>(&mut self, inputs: &FusedNnInputs<'_, T>, tile: TileCoord, sink: &S) {
        let geom = self.geom;
        let p = geom.params;
        let per_worker = geom.acc_per_worker();

        epilogue::stage_norms(
            &mut self.scratch,
            &geom,
            tile,
            inputs.x_norms,
            inputs.y_norms,
            inputs.max_val,
        );
        // barrier: norms staged

        let rows_best = self.best.chunks_exact_mut(p.rows_per_worker);
        for ((tid, acc), best) in self.acc.chunks_exact_mut(per_worker).enumerate().zip(rows_best) {
            epilogue::combine(acc, &self.scratch, &geom, tid, self.clamp);
            reducer::scan_worker(best, acc, &geom, tile, tid, inputs.n(), inputs.max_val);
        }

        for i in 0..p.rows_per_worker {
            reducer::reduce_groups(&mut self.best, &mut self.exchange, &geom, i);
        }

        let row0 = tile.row_block * geom.m_blk;
        for leader in (0..geom.workers).step_by(p.worker_cols) {
            let acc_row = leader / p.worker_cols;
            for i in 0..p.rows_per_worker {
                let row = row0 + acc_row + i * p.worker_rows;
                if row < inputs.m() {
                    sink.offer(row, self.best[leader * p.rows_per_worker + i]);
                }
            }
        }
    }
}

#[cfg(test)]
mod kernel_tests;
