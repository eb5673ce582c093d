//! Discrete Lyapunov solves
//!
//! Gramians of a stable discrete state-space solve X − AᵀXA = B. Both
//! routines assemble the exploded linear system over the matrix unknowns and
//! hand it to the full-pivoting elimination; the symmetric variant keeps only
//! the n(n+1)/2 lower-triangle unknowns and mirrors the result.

use crate::error::{DrmError, Result};
use crate::linalg::gauss_solve_full_pivot;
use nalgebra::{DMatrix, DVector};

/// Solve X − AᵀXA = B over all n² unknowns.
///
/// A must be Schur-stable for the system to be nonsingular. B is not
/// required to be symmetric here; the symmetric fast path is
/// [`solve_discrete_lyapunov_sym`].
pub fn solve_discrete_lyapunov(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(DrmError::dimension("solve_discrete_lyapunov", n, a.ncols()));
    }
    if b.nrows() != n || b.ncols() != n {
        return Err(DrmError::dimension("solve_discrete_lyapunov", n, b.nrows()));
    }
    let nx = n * n;
    let mut m = DMatrix::zeros(nx, nx);
    let mut rhs = DVector::zeros(nx);
    // One equation per (i, j) element: Σ_kl a[k][i]·a[l][j]·x[k][l] − x[i][j] = −b[i][j]
    for i in 0..n {
        for j in 0..n {
            let row = i * n + j;
            rhs[row] = -b[(i, j)];
            for k in 0..n {
                for l in 0..n {
                    m[(row, k * n + l)] = a[(k, i)] * a[(l, j)];
                }
            }
            m[(row, row)] -= 1.0;
        }
    }
    let x = gauss_solve_full_pivot(&m, &rhs)?;
    let mut out = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in 0..n {
            out[(i, j)] = x[i * n + j];
        }
    }
    Ok(out)
}

/// Solve X − AᵀXA = B exploiting symmetry of B and X.
///
/// Only the lower-triangle unknowns are assembled; the solution is mirrored
/// to the upper triangle before returning.
pub fn solve_discrete_lyapunov_sym(a: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = a.nrows();
    if n != a.ncols() {
        return Err(DrmError::dimension("solve_discrete_lyapunov_sym", n, a.ncols()));
    }
    if b.nrows() != n || b.ncols() != n {
        return Err(DrmError::dimension("solve_discrete_lyapunov_sym", n, b.nrows()));
    }
    let nx = n * (n + 1) / 2;
    let mut m = DMatrix::zeros(nx, nx);
    let mut rhs = DVector::zeros(nx);
    for i in 0..n {
        for j in 0..=i {
            let row = i * (i + 1) / 2 + j;
            rhs[row] = -b[(i, j)];
            for k in 0..n {
                for l in 0..=k {
                    let col = k * (k + 1) / 2 + l;
                    if k == l {
                        m[(row, col)] = a[(k, i)] * a[(l, j)];
                    } else {
                        m[(row, col)] = a[(k, i)] * a[(l, j)] + a[(l, i)] * a[(k, j)];
                    }
                }
            }
            m[(row, row)] -= 1.0;
        }
    }
    let x = gauss_solve_full_pivot(&m, &rhs)?;
    let mut out = DMatrix::zeros(n, n);
    for i in 0..n {
        for j in 0..=i {
            let value = x[i * (i + 1) / 2 + j];
            out[(i, j)] = value;
            out[(j, i)] = value;
        }
    }
    Ok(out)
}
