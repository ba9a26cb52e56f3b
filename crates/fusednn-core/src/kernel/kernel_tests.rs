//! Tests for the tile kernel against a brute-force reference.

#![allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]

use parking_lot::Mutex;

use super::*;
use crate::matrix::MatrixRef;
use crate::tile::{TilingParams, VecWidth};

/// Records every offer instead of merging.
#[derive(Default)]
struct RecordingSink {
    offers: Mutex<Vec<(usize, Candidate<f64>)>>,
}

impl TileSink<f64> for RecordingSink {
    fn offer(&self, row: usize, candidate: Candidate<f64>) {
        self.offers.lock().push((row, candidate));
    }
}

fn small_params() -> TilingParams {
    TilingParams {
        k_block: 4,
        rows_per_worker: 2,
        cols_per_worker: 2,
        worker_rows: 2,
        worker_cols: 2,
    }
}

fn norms(data: &[f64], rows: usize, k: usize) -> Vec<f64> {
    (0..rows)
        .map(|r| data[r * k..(r + 1) * k].iter().map(|v| v * v).sum())
        .collect()
}

fn brute_force_in_range(
    x: &[f64],
    y: &[f64],
    k: usize,
    row: usize,
    cols: std::ops::Range<usize>,
) -> Candidate<f64> {
    let mut best = Candidate::none(f64::MAX);
    for j in cols {
        let d: f64 = (0..k)
            .map(|c| {
                let diff = x[row * k + c] - y[j * k + c];
                diff * diff
            })
            .sum();
        let cand = Candidate::new(j as i64, d);
        if cand.is_better_than(&best) {
            best = cand;
        }
    }
    best
}

fn generate(rows: usize, k: usize, seed: f64) -> Vec<f64> {
    (0..rows * k)
        .map(|i| ((i as f64) * 0.731 + seed).sin() * 4.0)
        .collect()
}

#[test]
fn test_single_tile_matches_brute_force() {
    let (m, n, k) = (4, 4, 6);
    let x = generate(m, k, 0.1);
    let y = generate(n, k, 2.3);
    let xn = norms(&x, m, k);
    let yn = norms(&y, n, k);
    let inputs = FusedNnInputs::new(
        MatrixRef::new(&x, m, k).unwrap(),
        MatrixRef::new(&y, n, k).unwrap(),
        &xn,
        &yn,
    )
    .unwrap();

    let geom = TileGeometry::new::<f64>(small_params(), VecWidth::Two).unwrap();
    let mut kernel = TileKernel::new(geom, ClampPolicy::Zero);
    let sink = RecordingSink::default();
    kernel.run(
        &inputs,
        TileCoord {
            row_block: 0,
            col_block: 0,
        },
        &sink,
    );

    let mut offers = sink.offers.into_inner();
    offers.sort_by_key(|(row, _)| *row);
    assert_eq!(offers.len(), m);
    for (row, cand) in offers {
        let expected = brute_force_in_range(&x, &y, k, row, 0..n);
        assert_eq!(cand.index, expected.index, "row {row}");
        assert!((cand.distance - expected.distance).abs() < 1e-9);
    }
}

#[test]
fn test_ragged_tile_only_offers_valid_rows_and_columns() {
    // second row block holds rows 4..6 of 6; second column block holds cols 4..5 of 5
    let (m, n, k) = (6, 5, 3);
    let x = generate(m, k, 0.7);
    let y = generate(n, k, 1.9);
    let xn = norms(&x, m, k);
    let yn = norms(&y, n, k);
    let inputs = FusedNnInputs::new(
        MatrixRef::new(&x, m, k).unwrap(),
        MatrixRef::new(&y, n, k).unwrap(),
        &xn,
        &yn,
    )
    .unwrap();

    let geom = TileGeometry::new::<f64>(small_params(), VecWidth::One).unwrap();
    let mut kernel = TileKernel::new(geom, ClampPolicy::Zero);
    let sink = RecordingSink::default();
    kernel.run(
        &inputs,
        TileCoord {
            row_block: 1,
            col_block: 1,
        },
        &sink,
    );

    let mut offers = sink.offers.into_inner();
    offers.sort_by_key(|(row, _)| *row);
    let rows: Vec<usize> = offers.iter().map(|(row, _)| *row).collect();
    assert_eq!(rows, vec![4, 5]);
    for (row, cand) in offers {
        assert_eq!(cand.index, 4, "only column 4 exists in this tile");
        let expected = brute_force_in_range(&x, &y, k, row, 4..5);
        assert!((cand.distance - expected.distance).abs() < 1e-9);
    }
}

#[test]
fn test_kernel_reuse_across_tiles_resets_accumulators() {
    let (m, n, k) = (4, 8, 8);
    let x = generate(m, k, 0.3);
    let y = generate(n, k, 4.1);
    let xn = norms(&x, m, k);
    let yn = norms(&y, n, k);
    let inputs = FusedNnInputs::new(
        MatrixRef::new(&x, m, k).unwrap(),
        MatrixRef::new(&y, n, k).unwrap(),
        &xn,
        &yn,
    )
    .unwrap();

    let geom = TileGeometry::new::<f64>(small_params(), VecWidth::Two).unwrap();
    let mut kernel = TileKernel::new(geom, ClampPolicy::Zero);

    for col_block in 0..2 {
        let sink = RecordingSink::default();
        kernel.run(
            &inputs,
            TileCoord {
                row_block: 0,
                col_block,
            },
            &sink,
        );
        for (row, cand) in sink.offers.into_inner() {
            let cols = col_block * 4..(col_block + 1) * 4;
            let expected = brute_force_in_range(&x, &y, k, row, cols);
            assert_eq!(cand.index, expected.index);
            assert!((cand.distance - expected.distance).abs() < 1e-9);
        }
    }
}

#[test]
fn test_zero_k_uses_norms_only() {
    let inputs = FusedNnInputs::new(
        MatrixRef::new(&[], 2, 0).unwrap(),
        MatrixRef::new(&[], 3, 0).unwrap(),
        &[0.0, 0.0],
        &[0.0, 0.0, 0.0],
    )
    .unwrap();
    let geom = TileGeometry::new::<f64>(small_params(), VecWidth::Two).unwrap();
    let mut kernel = TileKernel::new(geom, ClampPolicy::Zero);
    let sink = RecordingSink::default();
    kernel.run(
        &inputs,
        TileCoord {
            row_block: 0,
            col_block: 0,
        },
        &sink,
    );
    for (_, cand) in sink.offers.into_inner() {
        assert_eq!(cand, Candidate::new(0, 0.0));
    }
}
