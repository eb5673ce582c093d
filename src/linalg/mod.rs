//! Dense linear-algebra kernel
//!
//! Decompositions and solves used by the state-space, balanced-reduction and
//! second-order training paths. Storage and products come from [`nalgebra`];
//! the routines here add the factorizations with the exact numerical
//! contracts the pipeline depends on: partial-pivoting LU with a tiny-pivot
//! guard, Cholesky that reports loss of positive definiteness as a numerical
//! signal, Householder QR, triangular solves, and Gaussian elimination with
//! row or full pivoting for possibly under-determined systems.

use crate::error::{DrmError, Result};
use nalgebra::{DMatrix, DVector};

pub mod lyapunov;
pub mod svd;

pub use lyapunov::{solve_discrete_lyapunov, solve_discrete_lyapunov_sym};
pub use svd::{svd, Svd};

/// Guard value substituted for exact zero pivots and used as the
/// rank-deficiency threshold in the pivoting eliminations.
pub const TINY: f64 = 1e-20;

/// LU-decompose a square matrix in place with partial pivoting.
///
/// On success the matrix holds the combined L (unit diagonal, below) and U
/// (on and above the diagonal) factors of a row-wise permutation of the
/// input, and the returned vector holds the row index swapped into place at
/// each elimination step. An exact zero pivot is replaced by [`TINY`] so the
/// factorization can continue; a row of zeros is reported as singular.
pub fn lu_decompose(m: &mut DMatrix<f64>) -> Result<Vec<usize>> {
    let n = m.nrows();
    if n != m.ncols() {
        return Err(DrmError::dimension("lu_decompose", n, m.ncols()));
    }
    let mut pivots = vec![0usize; n];
    // Implicit scaling of each row
    let mut scale = vec![0.0f64; n];
    for i in 0..n {
        let mut big = 0.0;
        for j in 0..n {
            let temp = m[(i, j)].abs();
            if temp > big {
                big = temp;
            }
        }
        if big == 0.0 {
            return Err(DrmError::numerical("lu_decompose", format!("row {} is zero", i)));
        }
        scale[i] = 1.0 / big;
    }
    for j in 0..n {
        for i in 0..j {
            let mut sum = m[(i, j)];
            for k in 0..i {
                sum -= m[(i, k)] * m[(k, j)];
            }
            m[(i, j)] = sum;
        }
        let mut big = 0.0;
        let mut imax = j;
        for i in j..n {
            let mut sum = m[(i, j)];
            for k in 0..j {
                sum -= m[(i, k)] * m[(k, j)];
            }
            m[(i, j)] = sum;
            let dum = scale[i] * sum.abs();
            if dum >= big {
                big = dum;
                imax = i;
            }
        }
        if j != imax {
            m.swap_rows(j, imax);
            scale[imax] = scale[j];
        }
        pivots[j] = imax;
        if m[(j, j)] == 0.0 {
            m[(j, j)] = TINY;
        }
        if j != n - 1 {
            let dum = 1.0 / m[(j, j)];
            for i in j + 1..n {
                m[(i, j)] *= dum;
            }
        }
    }
    Ok(pivots)
}

/// Back-substitute through a factored LU, overwriting `b` with the solution.
///
/// `lu` and `pivots` must come from [`lu_decompose`]; neither is altered.
pub fn lu_back_substitute(lu: &DMatrix<f64>, pivots: &[usize], b: &mut DVector<f64>) {
    let n = lu.nrows();
    let mut first = None;
    for i in 0..n {
        let ip = pivots[i];
        let mut sum = b[ip];
        b[ip] = b[i];
        if let Some(ii) = first {
            for j in ii..i {
                sum -= lu[(i, j)] * b[j];
            }
        } else if sum != 0.0 {
            first = Some(i);
        }
        b[i] = sum;
    }
    for i in (0..n).rev() {
        let mut sum = b[i];
        for j in i + 1..n {
            sum -= lu[(i, j)] * b[j];
        }
        b[i] = sum / lu[(i, i)];
    }
}

/// Invert a square matrix by LU decomposition, solving against each column
/// of the identity. The input is not altered.
pub fn lu_invert(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = m.nrows();
    if n != m.ncols() {
        return Err(DrmError::dimension("lu_invert", n, m.ncols()));
    }
    let mut lu = m.clone();
    let pivots = lu_decompose(&mut lu)?;
    let mut inv = DMatrix::zeros(n, n);
    let mut col = DVector::zeros(n);
    for j in 0..n {
        col.fill(0.0);
        col[j] = 1.0;
        lu_back_substitute(&lu, &pivots, &mut col);
        inv.set_column(j, &col);
    }
    Ok(inv)
}

/// Determinant via the product of LU pivots. Returns 0 for a singular or
/// non-square matrix; kept for diagnostics only.
pub fn lu_determinant(m: &DMatrix<f64>) -> f64 {
    if m.nrows() != m.ncols() {
        return 0.0;
    }
    let mut lu = m.clone();
    match lu_decompose(&mut lu) {
        Ok(_) => (0..lu.nrows()).map(|i| lu[(i, i)]).product(),
        Err(_) => 0.0,
    }
}

/// Cholesky-factor a symmetric positive definite matrix into its lower
/// triangle L with L·Lᵀ = M.
///
/// Failure of positive definiteness (a non-positive diagonal square) is a
/// numerical signal to the caller that the source matrix was not SPD; the
/// error names the offending row and the squared diagonal value.
pub fn cholesky_lower(m: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = m.nrows();
    if n != m.ncols() {
        return Err(DrmError::dimension("cholesky_lower", n, m.ncols()));
    }
    let mut l = DMatrix::zeros(n, n);
    for j in 0..n {
        let mut d = 0.0;
        for k in 0..j {
            let mut s = 0.0;
            for i in 0..k {
                s += l[(k, i)] * l[(j, i)];
            }
            s = (m[(j, k)] - s) / l[(k, k)];
            l[(j, k)] = s;
            d += s * s;
        }
        d = m[(j, j)] - d;
        if d <= 0.0 {
            return Err(DrmError::numerical(
                "cholesky_lower",
                format!("diagonal square is {:e} at row {}", d, j),
            ));
        }
        l[(j, j)] = d.sqrt();
    }
    Ok(l)
}

/// Householder QR of an n×m matrix with n ≥ m, returning (Q, R) with Q
/// n×m, R m×m and Q·R equal to the input.
pub fn qr_decompose(m: &DMatrix<f64>) -> Result<(DMatrix<f64>, DMatrix<f64>)> {
    let nrow = m.nrows();
    let ncol = m.ncols();
    if nrow < ncol {
        return Err(DrmError::dimension("qr_decompose", ncol, nrow));
    }
    let mut qr = m.clone();
    let mut rdiag = vec![0.0f64; ncol];
    for k in 0..ncol {
        // 2-norm of the k-th column without under/overflow
        let mut nrm = 0.0f64;
        for i in k..nrow {
            nrm = nrm.hypot(qr[(i, k)]);
        }
        if nrm != 0.0 {
            if qr[(k, k)] < 0.0 {
                nrm = -nrm;
            }
            for i in k..nrow {
                qr[(i, k)] /= nrm;
            }
            qr[(k, k)] += 1.0;
            for j in k + 1..ncol {
                let mut s = 0.0;
                for i in k..nrow {
                    s += qr[(i, k)] * qr[(i, j)];
                }
                s = -s / qr[(k, k)];
                for i in k..nrow {
                    qr[(i, j)] += s * qr[(i, k)];
                }
            }
        }
        rdiag[k] = -nrm;
    }
    let mut q = DMatrix::zeros(nrow, ncol);
    for k in (0..ncol).rev() {
        q[(k, k)] = 1.0;
        for j in k..ncol {
            if qr[(k, k)] != 0.0 {
                let mut s = 0.0;
                for i in k..nrow {
                    s += qr[(i, k)] * q[(i, j)];
                }
                s = -s / qr[(k, k)];
                for i in k..nrow {
                    q[(i, j)] += s * qr[(i, k)];
                }
            }
        }
    }
    let mut r = DMatrix::zeros(ncol, ncol);
    for i in 0..ncol {
        for j in 0..ncol {
            if i < j {
                r[(i, j)] = qr[(i, j)];
            } else if i == j {
                r[(i, j)] = rdiag[i];
            }
        }
    }
    Ok((q, r))
}

/// Solve L·x = b for a lower-triangular L against a single right-hand side.
pub fn solve_lower_triangular_vec(l: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let n = l.nrows();
    if n != l.ncols() {
        return Err(DrmError::dimension("solve_lower_triangular", n, l.ncols()));
    }
    if b.len() != n {
        return Err(DrmError::dimension("solve_lower_triangular", n, b.len()));
    }
    let mut x = DVector::zeros(n);
    for i in 0..n {
        if l[(i, i)] == 0.0 {
            return Err(DrmError::numerical(
                "solve_lower_triangular",
                format!("zero diagonal at row {}", i),
            ));
        }
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[(i, k)] * x[k];
        }
        x[i] = sum / l[(i, i)];
    }
    Ok(x)
}

/// Solve L·X = B for a lower-triangular L against multiple right-hand sides.
pub fn solve_lower_triangular(l: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = l.nrows();
    if n != l.ncols() {
        return Err(DrmError::dimension("solve_lower_triangular", n, l.ncols()));
    }
    if b.nrows() != n {
        return Err(DrmError::dimension("solve_lower_triangular", n, b.nrows()));
    }
    check_nonzero_diagonal(l, "solve_lower_triangular")?;
    let mut x = DMatrix::zeros(n, b.ncols());
    for j in 0..b.ncols() {
        for i in 0..n {
            let mut sum = b[(i, j)];
            for k in 0..i {
                sum -= l[(i, k)] * x[(k, j)];
            }
            x[(i, j)] = sum / l[(i, i)];
        }
    }
    Ok(x)
}

/// Solve U·X = B for an upper-triangular U against multiple right-hand sides.
pub fn solve_upper_triangular(u: &DMatrix<f64>, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = u.nrows();
    if n != u.ncols() {
        return Err(DrmError::dimension("solve_upper_triangular", n, u.ncols()));
    }
    if b.nrows() != n {
        return Err(DrmError::dimension("solve_upper_triangular", n, b.nrows()));
    }
    check_nonzero_diagonal(u, "solve_upper_triangular")?;
    let mut x = DMatrix::zeros(n, b.ncols());
    for j in 0..b.ncols() {
        for i in (0..n).rev() {
            let mut sum = b[(i, j)];
            for k in i + 1..n {
                sum -= u[(i, k)] * x[(k, j)];
            }
            x[(i, j)] = sum / u[(i, i)];
        }
    }
    Ok(x)
}

/// Invert a lower-triangular matrix by forward substitution against the
/// identity columns.
pub fn invert_lower_triangular(l: &DMatrix<f64>) -> Result<DMatrix<f64>> {
    let n = l.nrows();
    let identity = DMatrix::identity(n, n);
    solve_lower_triangular(l, &identity)
}

fn check_nonzero_diagonal(m: &DMatrix<f64>, operation: &str) -> Result<()> {
    for i in 0..m.nrows() {
        if m[(i, i)] == 0.0 {
            return Err(DrmError::numerical(
                operation,
                format!("zero diagonal at row {}", i),
            ));
        }
    }
    Ok(())
}

/// Solve A·x = b by Gaussian elimination with row pivoting only.
///
/// A must be square here; rank deficiency is reported as singular.
pub fn gauss_solve_row_pivot(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let nrow = a.nrows();
    let ncol = a.ncols();
    if b.len() != nrow {
        return Err(DrmError::dimension("gauss_solve_row_pivot", nrow, b.len()));
    }
    if nrow > ncol {
        return Err(DrmError::dimension("gauss_solve_row_pivot", ncol, nrow));
    }
    let mut m = a.clone();
    let mut rhs = b.clone();
    for i in 0..nrow {
        let mut imax = i;
        let mut amax = m[(i, i)].abs();
        for k in i + 1..nrow {
            let v = m[(k, i)].abs();
            if v > amax {
                imax = k;
                amax = v;
            }
        }
        if amax == 0.0 {
            return Err(DrmError::numerical(
                "gauss_solve_row_pivot",
                format!("rank deficiency at column {}", i),
            ));
        }
        if imax != i {
            m.swap_rows(i, imax);
            rhs.swap_rows(i, imax);
        }
        for k in i + 1..nrow {
            let fac = m[(k, i)] / m[(i, i)];
            for j in i..ncol {
                m[(k, j)] -= fac * m[(i, j)];
            }
            rhs[k] -= fac * rhs[i];
        }
    }
    let mut x = DVector::zeros(ncol);
    for k in (0..nrow).rev() {
        let mut acc = 0.0;
        for j in k + 1..ncol {
            acc += m[(k, j)] * x[j];
        }
        x[k] = (rhs[k] - acc) / m[(k, k)];
    }
    Ok(x)
}

/// Solve A·x = b by Gaussian elimination with column pivoting, falling back
/// to row pivoting when a whole pivot row vanishes.
///
/// Applicable to systems with nrow ≤ ncol. For an under-determined system
/// the leftover unknowns are set to zero. When the effective rank is below
/// nrow, the dropped equations must have right-hand sides below [`TINY`] in
/// magnitude, otherwise the system is inconsistent and an error is returned.
pub fn gauss_solve_full_pivot(a: &DMatrix<f64>, b: &DVector<f64>) -> Result<DVector<f64>> {
    let nrow = a.nrows();
    let ncol = a.ncols();
    if b.len() != nrow {
        return Err(DrmError::dimension("gauss_solve_full_pivot", nrow, b.len()));
    }
    if nrow > ncol {
        return Err(DrmError::dimension("gauss_solve_full_pivot", ncol, nrow));
    }
    let mut m = a.clone();
    let mut rhs = b.clone();
    // Maps the pivoted column order back to the caller's unknown order
    let mut col_map: Vec<usize> = (0..ncol).collect();
    let mut rank = nrow;
    for i in 0..nrow {
        // Column pivoting within row i
        let mut jmax = i;
        let mut amax = m[(i, i)].abs();
        for j in i + 1..ncol {
            let v = m[(i, j)].abs();
            if v > amax {
                amax = v;
                jmax = j;
            }
        }
        if amax < TINY {
            // Whole row is negligible; look below for a usable row
            let mut found = None;
            'search: for k in i + 1..nrow {
                for j in i..ncol {
                    if m[(k, j)].abs() > TINY {
                        found = Some(k);
                        break 'search;
                    }
                }
            }
            match found {
                Some(k) => {
                    m.swap_rows(i, k);
                    rhs.swap_rows(i, k);
                    jmax = i;
                    amax = m[(i, i)].abs();
                    for j in i + 1..ncol {
                        let v = m[(i, j)].abs();
                        if v > amax {
                            amax = v;
                            jmax = j;
                        }
                    }
                }
                None => {
                    rank = i;
                    break;
                }
            }
        }
        if jmax != i {
            col_map.swap(i, jmax);
            m.swap_columns(i, jmax);
        }
        for k in i + 1..nrow {
            let fac = m[(k, i)] / m[(i, i)];
            for j in i..ncol {
                m[(k, j)] -= fac * m[(i, j)];
            }
            rhs[k] -= fac * rhs[i];
        }
    }
    let mut y = DVector::zeros(ncol);
    for k in (0..rank).rev() {
        let mut acc = 0.0;
        for j in k + 1..ncol {
            acc += m[(k, j)] * y[j];
        }
        y[k] = (rhs[k] - acc) / m[(k, k)];
    }
    if rank < nrow {
        for k in rank..nrow {
            if rhs[k].abs() > TINY {
                return Err(DrmError::numerical(
                    "gauss_solve_full_pivot",
                    format!("inconsistent right-hand side {:e} in dropped row {}", rhs[k], k),
                ));
            }
        }
    }
    let mut x = DVector::zeros(ncol);
    for j in 0..ncol {
        x[col_map[j]] = y[j];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn relative_residual(a: &DMatrix<f64>, b: &DMatrix<f64>) -> f64 {
        (a - b).norm() / b.norm()
    }

    #[test]
    fn lu_solve_recovers_known_solution() {
        let a = DMatrix::from_row_slice(3, 3, &[4.0, 1.0, 0.5, 1.0, 3.0, 1.0, 0.5, 1.0, 2.0]);
        let x_true = DVector::from_vec(vec![1.0, -2.0, 0.5]);
        let b = &a * &x_true;
        let mut lu = a.clone();
        let pivots = lu_decompose(&mut lu).unwrap();
        let mut x = b.clone();
        lu_back_substitute(&lu, &pivots, &mut x);
        assert!((x - x_true).norm() < 1e-12);
    }

    #[test]
    fn lu_invert_gives_identity() {
        let a = DMatrix::from_row_slice(3, 3, &[2.0, 1.0, 0.0, 1.0, 3.0, 1.0, 0.0, 1.0, 4.0]);
        let inv = lu_invert(&a).unwrap();
        let identity = DMatrix::identity(3, 3);
        assert!(relative_residual(&(&a * inv), &identity) < 1e-12);
    }

    #[test]
    fn lu_rejects_non_square() {
        let mut a = DMatrix::zeros(2, 3);
        assert!(lu_decompose(&mut a).is_err());
    }

    #[test]
    fn cholesky_reconstructs_spd_matrix() {
        let g = DMatrix::from_row_slice(3, 3, &[2.0, 0.5, 0.0, 1.0, 2.0, 0.3, 0.2, 0.1, 1.5]);
        let m = &g * g.transpose();
        let l = cholesky_lower(&m).unwrap();
        let rebuilt = &l * l.transpose();
        assert!(relative_residual(&rebuilt, &m) < 1e-9);
    }

    #[test]
    fn cholesky_signals_non_spd() {
        let m = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 1.0]);
        let err = cholesky_lower(&m).unwrap_err();
        assert!(err.to_string().contains("row 1"));
    }

    #[test]
    fn qr_reconstructs_tall_matrix() {
        let m = DMatrix::from_row_slice(4, 2, &[1.0, 2.0, 0.5, -1.0, 3.0, 0.0, -2.0, 1.5]);
        let (q, r) = qr_decompose(&m).unwrap();
        assert!(relative_residual(&(&q * r), &m) < 1e-12);
    }

    #[test]
    fn triangular_solves_agree_with_products() {
        let l = DMatrix::from_row_slice(3, 3, &[2.0, 0.0, 0.0, 1.0, 3.0, 0.0, 0.5, 1.0, 4.0]);
        let x_true = DMatrix::from_row_slice(3, 2, &[1.0, 0.0, -1.0, 2.0, 0.5, 1.0]);
        let b = &l * &x_true;
        let x = solve_lower_triangular(&l, &b).unwrap();
        assert!((&x - &x_true).norm() < 1e-12);

        let u = l.transpose();
        let b = &u * &x_true;
        let x = solve_upper_triangular(&u, &b).unwrap();
        assert!((x - x_true).norm() < 1e-12);
    }

    #[test]
    fn invert_lower_triangular_round_trip() {
        let l = DMatrix::from_row_slice(2, 2, &[2.0, 0.0, 1.0, 0.5]);
        let inv = invert_lower_triangular(&l).unwrap();
        assert!(relative_residual(&(&l * inv), &DMatrix::identity(2, 2)) < 1e-12);
    }

    #[test]
    fn full_pivot_solves_square_system() {
        let a = DMatrix::from_row_slice(3, 3, &[0.0, 2.0, 1.0, 1.0, 0.0, 3.0, 2.0, 1.0, 0.0]);
        let x_true = DVector::from_vec(vec![1.0, 2.0, -1.0]);
        let b = &a * &x_true;
        let x = gauss_solve_full_pivot(&a, &b).unwrap();
        assert!((x - x_true).norm() < 1e-12);
    }

    #[test]
    fn full_pivot_zeroes_leftover_unknowns() {
        // One equation, two unknowns: x0 + x1 = 3 picks x with the leftover at zero
        let a = DMatrix::from_row_slice(1, 2, &[1.0, 1.0]);
        let b = DVector::from_vec(vec![3.0]);
        let x = gauss_solve_full_pivot(&a, &b).unwrap();
        assert_eq!(x.len(), 2);
        assert!(((a * &x)[0] - 3.0).abs() < 1e-12);
    }

    #[test]
    fn full_pivot_rejects_inconsistent_rank_deficient_system() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 1.0, 1.0, 1.0]);
        let b = DVector::from_vec(vec![1.0, 2.0]);
        assert!(gauss_solve_full_pivot(&a, &b).is_err());
    }

    #[test]
    fn row_pivot_matches_full_pivot_on_square_system() {
        let a = DMatrix::from_row_slice(3, 3, &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 10.0]);
        let b = DVector::from_vec(vec![6.0, 15.0, 25.0]);
        let x1 = gauss_solve_row_pivot(&a, &b).unwrap();
        let x2 = gauss_solve_full_pivot(&a, &b).unwrap();
        assert!((x1 - x2).norm() < 1e-10);
    }

    #[test]
    fn determinant_of_singular_matrix_is_tiny() {
        let a = DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 2.0, 4.0]);
        assert!(lu_determinant(&a).abs() < 1e-12);
    }
}
