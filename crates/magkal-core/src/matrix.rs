//! Dense matrix kernel.
//!
//! Thin, shape-checked wrappers over `nalgebra::DMatrix`. The filter only ever
//! works with matrices up to 6x6, so there is no pivoting or regularisation.
//! Shape violations are programming errors and panic; callers validate user
//! input before it reaches this module.

use nalgebra::DMatrix;

pub type Matrix = DMatrix<f64>;

pub fn add(a: &Matrix, b: &Matrix) -> Matrix {
    assert_eq!(
        a.shape(),
        b.shape(),
        "matrix add: dimension mismatch {:?} vs {:?}",
        a.shape(),
        b.shape()
    );
    a + b
}

pub fn scalar_multiply(k: f64, a: &Matrix) -> Matrix {
    a * k
}

pub fn multiply(a: &Matrix, b: &Matrix) -> Matrix {
    assert_eq!(
        a.ncols(),
        b.nrows(),
        "matrix multiply: {}x{} cannot multiply {}x{}",
        a.nrows(),
        a.ncols(),
        b.nrows(),
        b.ncols()
    );
    a * b
}

pub fn transpose(a: &Matrix) -> Matrix {
    a.transpose()
}

pub fn identity(n: usize) -> Matrix {
    Matrix::identity(n, n)
}

/// Square matrix with `values` on the diagonal.
pub fn diagonal(values: &[f64]) -> Matrix {
    Matrix::from_fn(values.len(), values.len(), |i, j| {
        if i == j {
            values[i]
        } else {
            0.0
        }
    })
}

/// Column vector from a slice.
pub fn column(values: &[f64]) -> Matrix {
    Matrix::from_column_slice(values.len(), 1, values)
}

/// `(A + A^T) / 2`. Keeps covariance round-off from drifting asymmetric.
pub fn symmetrize(a: &Matrix) -> Matrix {
    assert!(a.is_square(), "symmetrize: {}x{} is not square", a.nrows(), a.ncols());
    scalar_multiply(0.5, &add(a, &transpose(a)))
}

pub fn is_finite(a: &Matrix) -> bool {
    a.iter().all(|v| v.is_finite())
}
