//! Host-side orchestration of one fused nearest-neighbor pass.
//!
//! A run is a fixed sequence of steps submitted to one [`ExecQueue`]:
//!
//! ```text
//! initialize (outputs + row locks) ─▶ main pass (grid of tiles) ─▶ finalize (packed only)
//! ```
//!
//! The queue runs each step to completion before the next one starts, so
//! the main pass always observes fully initialized outputs.

use parking_lot::Mutex;
use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::config::FusedNnConfig;
use crate::element::Element;
use crate::error::{Error, Result};
use crate::init;
use crate::kernel::{ClampPolicy, TileCoord, TileKernel};
use crate::matrix::{FusedNnInputs, MatrixRef};
use crate::merge::{
    MergeSnapshot, MergeStats, MergeStrategy, OutputSlots, PackedKeys, PackedMerger,
    RowLockMerger, RowLocks, TileSink,
};
use crate::norms::row_squared_norms;
use crate::tile::{TileGeometry, VecWidth};

// =============================================================================
// Execution queue
// =============================================================================

/// Ordered execution queue backed by a dedicated rayon pool.
///
/// Steps submitted through [`ExecQueue::submit`] never overlap: a step runs
/// to completion on the pool before the next one is admitted.
pub struct ExecQueue {
    pool: rayon::ThreadPool,
    order: Mutex<u64>,
}

impl std::fmt::Debug for ExecQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecQueue")
            .field("threads", &self.pool.current_num_threads())
            .field("submitted", &*self.order.lock())
            .finish()
    }
}

impl ExecQueue {
    /// Builds a pool with `num_threads` workers, or one per available core.
    ///
    /// # Errors
    ///
    /// Returns `Error::Dispatch` if the pool cannot be created.
    pub fn new(num_threads: Option<usize>) -> Result<Self> {
        let mut builder =
            rayon::ThreadPoolBuilder::new().thread_name(|i| format!("fusednn-worker-{i}"));
        if let Some(threads) = num_threads {
            builder = builder.num_threads(threads);
        }
        let pool = builder.build()?;
        debug!(threads = pool.current_num_threads(), "execution queue ready");
        Ok(Self {
            pool,
            order: Mutex::new(0),
        })
    }

    /// Worker threads in the pool.
    #[must_use]
    pub fn num_threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Runs `step` on the pool and waits for it.
    ///
    /// # Errors
    ///
    /// Returns `Error::Dispatch` when called from one of this queue's own
    /// workers. A step cannot wait for a later step of the same queue.
    pub fn submit<R, F>(&self, name: &'static str, step: F) -> Result<R>
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        if let Some(worker) = self.pool.current_thread_index() {
            return Err(Error::Dispatch(format!(
                "step '{name}' submitted from queue worker {worker}"
            )));
        }
        let mut seq = self.order.lock();
        *seq += 1;
        trace!(step = name, seq = *seq, "queue step");
        Ok(self.pool.install(step))
    }
}

// =============================================================================
// Outputs and reports
// =============================================================================

/// Caller-owned output buffers of a run.
#[derive(Debug)]
pub struct NearestOutputs<'a, T> {
    indices: &'a mut [i64],
    distances: &'a mut [T],
}

impl<'a, T: Element> NearestOutputs<'a, T> {
    /// Wraps the index and distance buffers.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShapeMismatch` if the buffers differ in length.
    pub fn new(indices: &'a mut [i64], distances: &'a mut [T]) -> Result<Self> {
        if indices.len() != distances.len() {
            return Err(Error::ShapeMismatch(format!(
                "index buffer has {} rows but distance buffer has {}",
                indices.len(),
                distances.len()
            )));
        }
        Ok(Self { indices, distances })
    }

    /// Rows available.
    #[must_use]
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True if no rows are available.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.indices.is_empty()
    }
}

/// Owned result of [`fused_l2_nn`] and [`Dispatcher::nearest`].
#[derive(Debug, Clone, PartialEq)]
pub struct NearestNeighbors<T> {
    /// Row of Y nearest to each row of X, or `-1`.
    pub indices: Vec<i64>,
    /// Squared L2 distance to that row, or the sentinel.
    pub distances: Vec<T>,
}

/// Summary of one dispatched run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunReport {
    /// Tiles along M and N; `(0, 0)` when the main pass was skipped.
    pub grid: (usize, usize),
    /// Transfer width used by every tile.
    pub vec_width: VecWidth,
    /// Strategy that merged the tiles.
    pub strategy: MergeStrategy,
    /// Merge counters.
    pub merge: MergeSnapshot,
}

impl RunReport {
    fn skipped(vec_width: VecWidth, strategy: MergeStrategy) -> Self {
        Self {
            grid: (0, 0),
            vec_width,
            strategy,
            merge: MergeSnapshot::default(),
        }
    }

    /// Number of tiles executed.
    #[must_use]
    pub fn tiles(&self) -> usize {
        self.grid.0 * self.grid.1
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Validates a run, picks its geometry and drives it through the queue.
#[derive(Debug)]
pub struct Dispatcher {
    config: FusedNnConfig,
    queue: ExecQueue,
}

impl Dispatcher {
    /// Creates a dispatcher with its own execution queue.
    ///
    /// # Errors
    ///
    /// Returns an error if `config` is invalid or the pool cannot be built.
    pub fn new(config: FusedNnConfig) -> Result<Self> {
        config.validate()?;
        let queue = ExecQueue::new(config.num_threads)?;
        Ok(Self { config, queue })
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &FusedNnConfig {
        &self.config
    }

    /// Underlying queue.
    #[must_use]
    pub fn queue(&self) -> &ExecQueue {
        &self.queue
    }

    /// Geometry a run over `k` columns of `T` would use.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidTileConfig` or `Error::ScratchExceeded`.
    pub fn geometry_for<T: Element>(&self, k: usize) -> Result<TileGeometry> {
        let geom = TileGeometry::new::<T>(self.config.tiling, VecWidth::for_k::<T>(k))?;
        geom.check_scratch(self.config.max_scratch_bytes)?;
        Ok(geom)
    }

    /// Runs one fused pass, writing row `i`'s nearest neighbor of `inputs.x`
    /// among the rows of `inputs.y` into `outputs`.
    ///
    /// `outputs` and `locks` must cover at least `m` rows; rows past `m` are
    /// left untouched.
    ///
    /// # Errors
    ///
    /// - `Error::ShapeMismatch` if a buffer is shorter than `m`
    /// - `Error::InvalidTileConfig` / `Error::ScratchExceeded` for a tiling
    ///   that does not fit the chosen vector width or the scratch budget
    /// - `Error::InvalidConfig` if the packed merge cannot represent `T` or `n`
    /// - `Error::Dispatch` if called from inside a step running on this
    ///   dispatcher's own queue
    pub fn run<T: Element>(
        &self,
        inputs: &FusedNnInputs<'_, T>,
        locks: &mut RowLocks,
        outputs: &mut NearestOutputs<'_, T>,
    ) -> Result<RunReport> {
        let (m, n, k) = (inputs.m(), inputs.n(), inputs.k());
        let strategy = self.config.merge;

        if outputs.len() < m {
            return Err(Error::ShapeMismatch(format!(
                "output buffers hold {} rows, need {m}",
                outputs.len()
            )));
        }
        if locks.len() < m {
            return Err(Error::ShapeMismatch(format!(
                "row lock buffer holds {} rows, need {m}",
                locks.len()
            )));
        }

        let geom = self.geometry_for::<T>(k)?;
        if strategy == MergeStrategy::Packed {
            check_packed::<T>(n)?;
        }
        debug!(
            m,
            n,
            k,
            vec_width = geom.vec_width.lanes(),
            m_blk = geom.m_blk,
            n_blk = geom.n_blk,
            scratch_bytes = geom.scratch_bytes,
            strategy = ?strategy,
            "dispatching fused L2 nearest neighbor"
        );

        if m == 0 {
            debug!("no query rows, nothing to do");
            return Ok(RunReport::skipped(geom.vec_width, strategy));
        }

        let indices = &mut outputs.indices[..m];
        let distances = &mut outputs.distances[..m];
        let locks: &RowLocks = locks;
        let max_val = inputs.max_val();

        self.queue.submit("initialize", || {
            init::initialize(&mut *indices, &mut *distances, locks, max_val);
        })?;

        if n == 0 {
            warn!(m, "no candidate rows, every query keeps the sentinel");
            return Ok(RunReport::skipped(geom.vec_width, strategy));
        }

        let grid = geom.grid(m, n);
        let stats = MergeStats::new();
        let clamp = self.config.clamp;

        match strategy {
            MergeStrategy::RowLock => {
                let merger = RowLockMerger::new(OutputSlots::new(indices, distances), locks, &stats);
                self.queue
                    .submit("main_pass", || main_pass(inputs, geom, clamp, grid, &merger))?;
            }
            MergeStrategy::Packed => {
                let keys = PackedKeys::new(m, max_val).ok_or_else(|| {
                    Error::InvalidConfig("packed merge needs a 32-bit ordered key".to_string())
                })?;
                let merger = PackedMerger::new(&keys, &stats);
                self.queue
                    .submit("main_pass", || main_pass(inputs, geom, clamp, grid, &merger))?;
                self.queue
                    .submit("finalize", || finalize_packed(&keys, indices, distances))?;
            }
        }

        let merge = stats.snapshot();
        debug!(
            tiles = grid.0 * grid.1,
            candidates = merge.candidates,
            replacements = merge.replacements,
            contended = merge.contended,
            "fused pass complete"
        );
        Ok(RunReport {
            grid,
            vec_width: geom.vec_width,
            strategy,
            merge,
        })
    }

    /// Computes norms, allocates outputs and locks, and runs one pass.
    ///
    /// # Errors
    ///
    /// See [`Dispatcher::run`].
    pub fn nearest<T: Element>(
        &self,
        x: MatrixRef<'_, T>,
        y: MatrixRef<'_, T>,
    ) -> Result<NearestNeighbors<T>> {
        let (x_norms, y_norms) = self
            .queue
            .submit("norms", || rayon::join(|| row_squared_norms(x), || row_squared_norms(y)))?;
        let inputs = FusedNnInputs::new(x, y, &x_norms, &y_norms)?;

        let m = inputs.m();
        let mut indices = vec![crate::merge::NOT_FOUND; m];
        let mut distances = vec![inputs.max_val(); m];
        let mut locks = RowLocks::new(m);
        let mut outputs = NearestOutputs::new(&mut indices, &mut distances)?;
        self.run(&inputs, &mut locks, &mut outputs)?;

        Ok(NearestNeighbors { indices, distances })
    }
}

/// Nearest row of `y` for every row of `x` with the default configuration.
///
/// # Errors
///
/// See [`Dispatcher::run`].
pub fn fused_l2_nn<T: Element>(
    x: MatrixRef<'_, T>,
    y: MatrixRef<'_, T>,
) -> Result<NearestNeighbors<T>> {
    Dispatcher::new(FusedNnConfig::default())?.nearest(x, y)
}

fn check_packed<T: Element>(n: usize) -> Result<()> {
    if T::MAX.ordered_key().is_none() {
        return Err(Error::InvalidConfig(format!(
            "packed merge is not available for {}",
            std::any::type_name::<T>()
        )));
    }
    if u32::try_from(n).map_or(true, |n| n == u32::MAX) {
        return Err(Error::InvalidConfig(format!(
            "packed merge supports fewer than {} candidate rows, got {n}",
            u32::MAX
        )));
    }
    Ok(())
}

fn main_pass<T: Element, S: TileSink<T>>(
    inputs: &FusedNnInputs<'_, T>,
    geom: TileGeometry,
    clamp: ClampPolicy,
    (grid_rows, grid_cols): (usize, usize),
    sink: &S,
) {
    (0..grid_rows * grid_cols).into_par_iter().for_each_init(
        || TileKernel::new(geom, clamp),
        |kernel, t| {
            let tile = TileCoord {
                row_block: t / grid_cols,
                col_block: t % grid_cols,
            };
            kernel.run(inputs, tile, sink);
        },
    );
}

fn finalize_packed<T: Element>(keys: &PackedKeys, indices: &mut [i64], distances: &mut [T]) {
    indices
        .par_iter_mut()
        .zip(distances.par_iter_mut())
        .enumerate()
        .for_each(|(row, (index, distance))| {
            if let Some(best) = keys.load::<T>(row) {
                *index = best.index;
                *distance = best.distance;
            }
        });
}
