//! Singular value decomposition
//!
//! LINPACK-style two-phase SVD: Householder reduction to bidiagonal form
//! followed by implicit-shift QR with the four standard deflation cases.
//! For an n×m input with n ≥ m the factors satisfy A = U·Σ·Vᵀ with U n×m,
//! V m×m and the singular values non-negative in non-increasing order.

use crate::error::{DrmError, Result};
use nalgebra::{DMatrix, DVector};

/// Iteration budget for the implicit-shift QR phase.
const MAX_ITER: usize = 500;

/// Result of [`svd`]
#[derive(Debug, Clone)]
pub struct Svd {
    /// Left singular vectors, n×m
    pub u: DMatrix<f64>,
    /// Right singular vectors, m×m
    pub v: DMatrix<f64>,
    /// Singular values, non-increasing and non-negative
    pub sigma: DVector<f64>,
}

/// Decompose an n×m matrix with n ≥ m into U·Σ·Vᵀ.
pub fn svd(matrix: &DMatrix<f64>) -> Result<Svd> {
    let m = matrix.nrows();
    let n = matrix.ncols();
    if m < n {
        return Err(DrmError::dimension("svd", n, m));
    }
    let mut a = matrix.clone();
    let mut u = DMatrix::<f64>::zeros(m, n);
    let mut v = DMatrix::<f64>::zeros(n, n);
    let mut s = vec![0.0f64; n];
    let mut e = vec![0.0f64; n];
    let mut work = vec![0.0f64; m];
    let nu = n;

    // Reduce to bidiagonal form, storing the diagonal in s and the
    // super-diagonal in e.
    let nct = (m - 1).min(n);
    let nrt = if n >= 2 { (n - 2).min(m) } else { 0 };
    for k in 0..nct.max(nrt) {
        if k < nct {
            // Householder transform for the k-th column; 2-norm without
            // under/overflow.
            s[k] = 0.0;
            for i in k..m {
                s[k] = s[k].hypot(a[(i, k)]);
            }
            if s[k] != 0.0 {
                if a[(k, k)] < 0.0 {
                    s[k] = -s[k];
                }
                for i in k..m {
                    a[(i, k)] /= s[k];
                }
                a[(k, k)] += 1.0;
            }
            s[k] = -s[k];
        }
        for j in k + 1..n {
            if k < nct && s[k] != 0.0 {
                let mut t = 0.0;
                for i in k..m {
                    t += a[(i, k)] * a[(i, j)];
                }
                t = -t / a[(k, k)];
                for i in k..m {
                    a[(i, j)] += t * a[(i, k)];
                }
            }
            e[j] = a[(k, j)];
        }
        if k < nct {
            // Keep the transform for the later back-accumulation of U
            for i in k..m {
                u[(i, k)] = a[(i, k)];
            }
        }
        if k < nrt {
            // Row transform producing the k-th super-diagonal
            e[k] = 0.0;
            for i in k + 1..n {
                e[k] = e[k].hypot(e[i]);
            }
            if e[k] != 0.0 {
                if e[k + 1] < 0.0 {
                    e[k] = -e[k];
                }
                for i in k + 1..n {
                    e[i] /= e[k];
                }
                e[k + 1] += 1.0;
            }
            e[k] = -e[k];
            if k + 1 < m && e[k] != 0.0 {
                for item in work.iter_mut().take(m).skip(k + 1) {
                    *item = 0.0;
                }
                for j in k + 1..n {
                    for i in k + 1..m {
                        work[i] += e[j] * a[(i, j)];
                    }
                }
                for j in k + 1..n {
                    let t = -e[j] / e[k + 1];
                    for i in k + 1..m {
                        a[(i, j)] += t * work[i];
                    }
                }
            }
            for i in k + 1..n {
                v[(i, k)] = e[i];
            }
        }
    }

    // Set up the final bidiagonal matrix of order p.
    let mut p = n.min(m + 1);
    if nct < n {
        s[nct] = a[(nct, nct)];
    }
    if m < p {
        s[p - 1] = 0.0;
    }
    if nrt + 1 < p {
        e[nrt] = a[(nrt, p - 1)];
    }
    e[p - 1] = 0.0;

    // Back-accumulate U.
    for j in nct..nu {
        for i in 0..m {
            u[(i, j)] = 0.0;
        }
        u[(j, j)] = 1.0;
    }
    for k in (0..nct).rev() {
        if s[k] != 0.0 {
            for j in k + 1..nu {
                let mut t = 0.0;
                for i in k..m {
                    t += u[(i, k)] * u[(i, j)];
                }
                t = -t / u[(k, k)];
                for i in k..m {
                    u[(i, j)] += t * u[(i, k)];
                }
            }
            for i in k..m {
                u[(i, k)] = -u[(i, k)];
            }
            u[(k, k)] += 1.0;
            for i in 0..k {
                u[(i, k)] = 0.0;
            }
        } else {
            for i in 0..m {
                u[(i, k)] = 0.0;
            }
            u[(k, k)] = 1.0;
        }
    }

    // Back-accumulate V.
    for k in (0..n).rev() {
        if k < nrt && e[k] != 0.0 {
            for j in k + 1..nu {
                let mut t = 0.0;
                for i in k + 1..n {
                    t += v[(i, k)] * v[(i, j)];
                }
                t = -t / v[(k + 1, k)];
                for i in k + 1..n {
                    v[(i, j)] += t * v[(i, k)];
                }
            }
        }
        for i in 0..n {
            v[(i, k)] = 0.0;
        }
        v[(k, k)] = 1.0;
    }

    // Implicit-shift QR on the bidiagonal matrix.
    let pp = p - 1;
    let mut iter = 0usize;
    let eps = 2f64.powi(-52);
    let tiny = 2f64.powi(-966);
    while p > 0 {
        if iter > MAX_ITER {
            let residual = if p >= 2 { e[p - 2].abs() } else { 0.0 };
            return Err(DrmError::ConvergenceFailure {
                algorithm: "svd".to_string(),
                iterations: iter,
                residual,
            });
        }
        // Inspect for negligible elements. After this block:
        //   kase = 1  s(p) and e[k-1] negligible, k < p
        //   kase = 2  s(k) negligible, k < p
        //   kase = 3  e[k-1] negligible and s(k..p) not (qr step)
        //   kase = 4  e(p-1) negligible (convergence)
        let mut k: i64 = -1;
        for kk in (0..=p as i64 - 2).rev() {
            let kku = kk as usize;
            if e[kku].abs() <= tiny + eps * (s[kku].abs() + s[kku + 1].abs()) {
                e[kku] = 0.0;
                k = kk;
                break;
            }
        }
        let kase;
        if k == p as i64 - 2 {
            kase = 4;
        } else {
            let mut ks: i64 = k;
            for kk in (k + 1..=p as i64 - 1).rev() {
                let kku = kk as usize;
                let t = (if kk != p as i64 { e[kku].abs() } else { 0.0 })
                    + (if kk != k + 1 { e[kku - 1].abs() } else { 0.0 });
                if s[kku].abs() <= tiny + eps * t {
                    s[kku] = 0.0;
                    ks = kk;
                    break;
                }
                ks = k;
            }
            if ks == k {
                kase = 3;
            } else if ks == p as i64 - 1 {
                kase = 1;
            } else {
                kase = 2;
                k = ks;
            }
        }
        let k = (k + 1) as usize;

        match kase {
            // Deflate negligible s(p).
            1 => {
                let mut f = e[p - 2];
                e[p - 2] = 0.0;
                for j in (k..=p - 2).rev() {
                    let t = s[j].hypot(f);
                    let cs = s[j] / t;
                    let sn = f / t;
                    s[j] = t;
                    if j != k {
                        f = -sn * e[j - 1];
                        e[j - 1] *= cs;
                    }
                    for i in 0..n {
                        let t = cs * v[(i, j)] + sn * v[(i, p - 1)];
                        v[(i, p - 1)] = -sn * v[(i, j)] + cs * v[(i, p - 1)];
                        v[(i, j)] = t;
                    }
                }
            }
            // Split at negligible s(k).
            2 => {
                let mut f = e[k - 1];
                e[k - 1] = 0.0;
                for j in k..p {
                    let t = s[j].hypot(f);
                    let cs = s[j] / t;
                    let sn = f / t;
                    s[j] = t;
                    f = -sn * e[j];
                    e[j] *= cs;
                    for i in 0..m {
                        let t = cs * u[(i, j)] + sn * u[(i, k - 1)];
                        u[(i, k - 1)] = -sn * u[(i, j)] + cs * u[(i, k - 1)];
                        u[(i, j)] = t;
                    }
                }
            }
            // One QR step.
            3 => {
                let scale = s[p - 1]
                    .abs()
                    .max(s[p - 2].abs())
                    .max(e[p - 2].abs())
                    .max(s[k].abs())
                    .max(e[k].abs());
                let sp = s[p - 1] / scale;
                let spm1 = s[p - 2] / scale;
                let epm1 = e[p - 2] / scale;
                let sk = s[k] / scale;
                let ek = e[k] / scale;
                let b = ((spm1 + sp) * (spm1 - sp) + epm1 * epm1) / 2.0;
                let c = (sp * epm1) * (sp * epm1);
                let mut shift = 0.0;
                if b != 0.0 || c != 0.0 {
                    shift = (b * b + c).sqrt();
                    if b < 0.0 {
                        shift = -shift;
                    }
                    shift = c / (b + shift);
                }
                let mut f = (sk + sp) * (sk - sp) + shift;
                let mut g = sk * ek;
                // Chase zeros down the bidiagonal.
                for j in k..p - 1 {
                    let mut t = f.hypot(g);
                    let mut cs = f / t;
                    let mut sn = g / t;
                    if j != k {
                        e[j - 1] = t;
                    }
                    f = cs * s[j] + sn * e[j];
                    e[j] = cs * e[j] - sn * s[j];
                    g = sn * s[j + 1];
                    s[j + 1] *= cs;
                    for i in 0..n {
                        let t = cs * v[(i, j)] + sn * v[(i, j + 1)];
                        v[(i, j + 1)] = -sn * v[(i, j)] + cs * v[(i, j + 1)];
                        v[(i, j)] = t;
                    }
                    t = f.hypot(g);
                    cs = f / t;
                    sn = g / t;
                    s[j] = t;
                    f = cs * e[j] + sn * s[j + 1];
                    s[j + 1] = -sn * e[j] + cs * s[j + 1];
                    g = sn * e[j + 1];
                    e[j + 1] *= cs;
                    if j < m - 1 {
                        for i in 0..m {
                            let t = cs * u[(i, j)] + sn * u[(i, j + 1)];
                            u[(i, j + 1)] = -sn * u[(i, j)] + cs * u[(i, j + 1)];
                            u[(i, j)] = t;
                        }
                    }
                }
                e[p - 2] = f;
                iter += 1;
            }
            // Convergence.
            _ => {
                // Make the singular value positive.
                if s[k] <= 0.0 {
                    s[k] = if s[k] < 0.0 { -s[k] } else { 0.0 };
                    for i in 0..=pp {
                        v[(i, k)] = -v[(i, k)];
                    }
                }
                // Order the singular values.
                let mut k = k;
                while k < pp {
                    if s[k] >= s[k + 1] {
                        break;
                    }
                    s.swap(k, k + 1);
                    if k < n - 1 {
                        v.swap_columns(k, k + 1);
                    }
                    if k < m - 1 {
                        u.swap_columns(k, k + 1);
                    }
                    k += 1;
                }
                iter = 0;
                p -= 1;
            }
        }
    }

    Ok(Svd {
        u,
        v,
        sigma: DVector::from_vec(s),
    })
}
