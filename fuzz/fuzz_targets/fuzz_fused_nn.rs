//! Fuzz target for the fused nearest-neighbor pass.
//!
//! Drives arbitrary shapes, values (NaN, Inf, huge magnitudes) and tiling
//! parameters through the dispatcher to find:
//! - Panics on ragged tiles or degenerate shapes
//! - Out-of-range indices in the result
//! - Disagreement between the row-lock and packed merges
//!
//! # Running
//!
//! ```bash
//! cd fuzz
//! cargo +nightly fuzz run fuzz_fused_nn
//! ```

#![no_main]

use arbitrary::Arbitrary;
use fusednn_core::{
    Dispatcher, FusedNnConfig, FusedNnInputs, MatrixRef, MergeStrategy, NearestOutputs,
    RowLocks, TilingParams,
};
use libfuzzer_sys::fuzz_target;

/// Fuzzing input for one fused pass.
#[derive(Arbitrary, Debug)]
struct FusedInput {
    m: u8,
    n: u8,
    k: u8,
    /// Values cycled to fill X then Y
    values: Vec<f32>,
    /// Index into the tiling presets
    tiling: u8,
}

const TILINGS: [TilingParams; 3] = [
    TilingParams {
        k_block: 32,
        rows_per_worker: 4,
        cols_per_worker: 4,
        worker_rows: 16,
        worker_cols: 16,
    },
    TilingParams {
        k_block: 8,
        rows_per_worker: 2,
        cols_per_worker: 2,
        worker_rows: 4,
        worker_cols: 4,
    },
    TilingParams {
        k_block: 4,
        rows_per_worker: 2,
        cols_per_worker: 2,
        worker_rows: 2,
        worker_cols: 2,
    },
];

fn run(
    config: FusedNnConfig,
    inputs: &FusedNnInputs<'_, f32>,
    m: usize,
) -> Option<(Vec<i64>, Vec<f32>)> {
    let dispatcher = Dispatcher::new(config).ok()?;
    let mut indices = vec![0_i64; m];
    let mut distances = vec![0.0_f32; m];
    let mut locks = RowLocks::new(m);
    let mut outputs = NearestOutputs::new(&mut indices, &mut distances).ok()?;
    dispatcher.run(inputs, &mut locks, &mut outputs).ok()?;
    Some((indices, distances))
}

fuzz_target!(|input: FusedInput| {
    let (m, n, k) = (
        usize::from(input.m % 96),
        usize::from(input.n % 96),
        usize::from(input.k % 40),
    );
    if input.values.is_empty() {
        return;
    }

    let mut cycle = input.values.iter().copied().cycle();
    let x: Vec<f32> = cycle.by_ref().take(m * k).collect();
    let y: Vec<f32> = cycle.take(n * k).collect();
    let (Ok(xm), Ok(ym)) = (MatrixRef::new(&x, m, k), MatrixRef::new(&y, n, k)) else {
        return;
    };
    let xn = fusednn_core::row_squared_norms(xm);
    let yn = fusednn_core::row_squared_norms(ym);
    let Ok(inputs) = FusedNnInputs::new(xm, ym, &xn, &yn) else {
        return;
    };

    let tiling = TILINGS[usize::from(input.tiling) % TILINGS.len()];
    let config = |merge| FusedNnConfig {
        tiling,
        merge,
        num_threads: Some(2),
        ..FusedNnConfig::default()
    };

    let locked = run(config(MergeStrategy::RowLock), &inputs, m);
    let packed = run(config(MergeStrategy::Packed), &inputs, m);

    if let Some((indices, _)) = &locked {
        for &idx in indices {
            assert!(idx == -1 || (idx >= 0 && (idx as usize) < n));
        }
    }
    // NaN distances never win under either strategy.
    assert_eq!(locked, packed);
});
