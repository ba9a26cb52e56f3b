//! Row squared norms for callers that do not precompute them.

use rayon::prelude::*;

use crate::element::Element;
use crate::matrix::MatrixRef;

/// Rows below which the parallel split is not worth it.
const PARALLEL_THRESHOLD: usize = 256;

/// `|row|²` for every row of `matrix`, computed in parallel for large inputs.
#[must_use]
pub fn row_squared_norms<T: Element>(matrix: MatrixRef<'_, T>) -> Vec<T> {
    if matrix.rows() < PARALLEL_THRESHOLD {
        return (0..matrix.rows())
            .map(|r| T::squared_norm(matrix.row(r)))
            .collect();
    }
    (0..matrix.rows())
        .into_par_iter()
        .map(|r| T::squared_norm(matrix.row(r)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_matrix_norms() {
        let data = [3.0_f32, 4.0, 1.0, 1.0];
        let m = MatrixRef::new(&data, 2, 2).unwrap();
        assert_eq!(row_squared_norms(m), vec![25.0, 2.0]);
    }

    #[test]
    fn test_parallel_path_matches_sequential() {
        let rows = PARALLEL_THRESHOLD * 3;
        let k = 5;
        #[allow(clippy::cast_precision_loss)]
        let data: Vec<f64> = (0..rows * k).map(|i| (i % 13) as f64 - 6.0).collect();
        let m = MatrixRef::new(&data, rows, k).unwrap();
        let norms = row_squared_norms(m);
        assert_eq!(norms.len(), rows);
        for (r, norm) in norms.iter().enumerate() {
            let expected: f64 = m.row(r).iter().map(|v| v * v).sum();
            assert!((norm - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn test_zero_k_norms_are_zero() {
        let m = MatrixRef::<f32>::new(&[], 3, 0).unwrap();
        assert_eq!(row_squared_norms(m), vec![0.0; 3]);
    }
}
