//! Borrowed row-major matrices and the read-only input bundle of a run.

use crate::element::Element;
use crate::error::{Error, Result};

/// Borrowed dense row-major matrix.
#[derive(Debug, Clone, Copy)]
pub struct MatrixRef<'a, T> {
    data: &'a [T],
    rows: usize,
    cols: usize,
}

impl<'a, T: Element> MatrixRef<'a, T> {
    /// Wraps `data` as a `rows × cols` matrix.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShapeMismatch` if `data.len() != rows * cols`.
    pub fn new(data: &'a [T], rows: usize, cols: usize) -> Result<Self> {
        let expected = rows.checked_mul(cols).ok_or_else(|| {
            Error::ShapeMismatch(format!("{rows} x {cols} overflows usize"))
        })?;
        if data.len() != expected {
            return Err(Error::ShapeMismatch(format!(
                "matrix data has {} elements, expected {rows} x {cols} = {expected}",
                data.len()
            )));
        }
        Ok(Self { data, rows, cols })
    }

    /// Number of rows.
    #[inline]
    #[must_use]
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns (the shared K dimension).
    #[inline]
    #[must_use]
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// True when the matrix has no rows.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Row `i` as a slice.
    #[inline]
    #[must_use]
    pub fn row(&self, i: usize) -> &'a [T] {
        &self.data[i * self.cols..(i + 1) * self.cols]
    }

    /// Underlying storage.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &'a [T] {
        self.data
    }
}

/// Read-only inputs of one fused pass.
#[derive(Debug, Clone, Copy)]
pub struct FusedNnInputs<'a, T> {
    pub(crate) x: MatrixRef<'a, T>,
    pub(crate) y: MatrixRef<'a, T>,
    pub(crate) x_norms: &'a [T],
    pub(crate) y_norms: &'a [T],
    pub(crate) max_val: T,
}

impl<'a, T: Element> FusedNnInputs<'a, T> {
    /// Bundles X, Y and their precomputed squared norms.
    ///
    /// The sentinel distance defaults to `T::MAX`.
    ///
    /// # Errors
    ///
    /// Returns `Error::ShapeMismatch` if X and Y disagree on K or a norm
    /// vector length does not match its matrix.
    pub fn new(
        x: MatrixRef<'a, T>,
        y: MatrixRef<'a, T>,
        x_norms: &'a [T],
        y_norms: &'a [T],
    ) -> Result<Self> {
        if x.cols() != y.cols() {
            return Err(Error::ShapeMismatch(format!(
                "X has k = {} but Y has k = {}",
                x.cols(),
                y.cols()
            )));
        }
        if x_norms.len() != x.rows() {
            return Err(Error::ShapeMismatch(format!(
                "x_norms has length {}, expected {}",
                x_norms.len(),
                x.rows()
            )));
        }
        if y_norms.len() != y.rows() {
            return Err(Error::ShapeMismatch(format!(
                "y_norms has length {}, expected {}",
                y_norms.len(),
                y.rows()
            )));
        }
        Ok(Self {
            x,
            y,
            x_norms,
            y_norms,
            max_val: T::MAX,
        })
    }

    /// Overrides the "no neighbor" distance sentinel.
    #[must_use]
    pub fn with_max_val(mut self, max_val: T) -> Self {
        self.max_val = max_val;
        self
    }

    /// Number of query rows (m).
    #[must_use]
    pub fn m(&self) -> usize {
        self.x.rows()
    }

    /// Number of candidate rows (n).
    #[must_use]
    pub fn n(&self) -> usize {
        self.y.rows()
    }

    /// Shared dimension (k).
    #[must_use]
    pub fn k(&self) -> usize {
        self.x.cols()
    }

    /// Sentinel distance.
    #[must_use]
    pub fn max_val(&self) -> T {
        self.max_val
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matrix_shape_checked() {
        let data = [1.0_f32, 2.0, 3.0, 4.0, 5.0, 6.0];
        assert!(MatrixRef::new(&data, 2, 3).is_ok());
        let err = MatrixRef::new(&data, 4, 2).unwrap_err();
        assert_eq!(err.code(), "FNN-003");
    }

    #[test]
    fn test_matrix_row_access() {
        let data = [1.0_f64, 2.0, 3.0, 4.0, 5.0, 6.0];
        let m = MatrixRef::new(&data, 3, 2).unwrap();
        assert_eq!(m.row(1), &[3.0, 4.0]);
        assert_eq!(m.rows(), 3);
        assert_eq!(m.cols(), 2);
    }

    #[test]
    fn test_empty_matrix_with_nonzero_k() {
        let m = MatrixRef::<f32>::new(&[], 0, 16).unwrap();
        assert!(m.is_empty());
        assert_eq!(m.cols(), 16);
    }

    #[test]
    fn test_inputs_reject_k_mismatch() {
        let x = MatrixRef::new(&[0.0_f32; 4], 2, 2).unwrap();
        let y = MatrixRef::new(&[0.0_f32; 3], 1, 3).unwrap();
        assert!(FusedNnInputs::new(x, y, &[0.0; 2], &[0.0]).is_err());
    }

    #[test]
    fn test_inputs_reject_norm_length() {
        let x = MatrixRef::new(&[0.0_f32; 4], 2, 2).unwrap();
        let y = MatrixRef::new(&[0.0_f32; 2], 1, 2).unwrap();
        assert!(FusedNnInputs::new(x, y, &[0.0], &[0.0]).is_err());
        assert!(FusedNnInputs::new(x, y, &[0.0; 2], &[]).is_err());
    }

    #[test]
    fn test_inputs_default_sentinel() {
        let x = MatrixRef::new(&[0.0_f32; 2], 1, 2).unwrap();
        let y = MatrixRef::new(&[0.0_f32; 2], 1, 2).unwrap();
        let inputs = FusedNnInputs::new(x, y, &[0.0], &[0.0]).unwrap();
        assert_eq!(inputs.max_val(), f32::MAX);
        assert_eq!(inputs.with_max_val(9.0).max_val(), 9.0);
    }
}
