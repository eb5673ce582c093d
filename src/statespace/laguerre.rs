//! Laguerre realizations and balanced-truncation reduction
//!
//! The builder assembles Wang's canonical state-space for a discrete Laguerre
//! cascade: an optional delay chain, a low-pass seed, then one all-pass
//! section per remaining state. A second cascade for a slower pole can be
//! appended block-diagonally; the second cascade never carries a delay chain
//! (a delayed second pole makes the observability Gramian lose positive
//! definiteness downstream).
//!
//! Reduction solves the two Gramian Lyapunov equations against the trained
//! first-layer weights, Cholesky-factors them, takes the SVD of the factor
//! product and truncates the balanced realization at the first large gap in
//! the Hankel singular values.

use crate::error::{DrmError, Result};
use crate::io;
use crate::linalg::{cholesky_lower, solve_discrete_lyapunov_sym, svd};
use crate::statespace::StateSpace;
use log::{info, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// Parameters of one per-input Laguerre filter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LaguerreSpec {
    /// First (fast) pole, |pole| < 1
    pub pole: f64,
    /// Second (slow) pole, used when `two_pole` is set
    pub pole2: f64,
    /// Delay chain length prepended to the first cascade
    pub delay: usize,
    /// State order of the first cascade
    pub order: usize,
    /// State order of the second cascade
    pub order2: usize,
    /// Whether the second cascade is enabled
    pub two_pole: bool,
}

impl Default for LaguerreSpec {
    fn default() -> Self {
        Self {
            pole: 0.5,
            pole2: 0.96,
            delay: 0,
            order: 6,
            order2: 6,
            two_pole: false,
        }
    }
}

impl LaguerreSpec {
    /// Total state order of the realization.
    pub fn total_order(&self) -> usize {
        if self.two_pole {
            self.order + self.order2
        } else {
            self.order
        }
    }

    fn validate(&self) -> Result<()> {
        if self.pole.abs() >= 1.0 {
            return Err(DrmError::invalid(format!(
                "Laguerre pole {} is not strictly inside the unit circle",
                self.pole
            )));
        }
        if self.order < self.delay + 1 {
            return Err(DrmError::invalid(format!(
                "state-space order {} is less than number of delays plus 1 for the 1st Laguerre pole",
                self.order
            )));
        }
        if self.two_pole {
            if self.pole2.abs() >= 1.0 {
                return Err(DrmError::invalid(format!(
                    "second Laguerre pole {} is not strictly inside the unit circle",
                    self.pole2
                )));
            }
            if self.order2 < self.delay + 1 {
                return Err(DrmError::invalid(format!(
                    "state-space order {} is less than number of delays plus 1 for the 2nd Laguerre pole",
                    self.order2
                )));
            }
        }
        Ok(())
    }

    /// Build the unbalanced realization.
    ///
    /// The delay chain shifts the low-pass seed by `delay` states with
    /// A_{i,i−1} = 1; each all-pass section fills its row from the running C
    /// vector, which updates as C ← −a·C followed by C_i = √(1−a²).
    pub fn build(&self) -> Result<StateSpace> {
        self.validate()?;
        let n = self.total_order();
        let mut ss = StateSpace::new(n);
        build_cascade(
            &mut ss.a,
            &mut ss.b,
            &mut ss.c,
            0,
            self.order,
            self.pole,
            self.delay,
        );
        if self.two_pole {
            // Second cascade, block-diagonal, no delay
            build_cascade(
                &mut ss.a,
                &mut ss.b,
                &mut ss.c,
                self.order,
                self.order2,
                self.pole2,
                0,
            );
        }
        Ok(ss)
    }
}

/// Fill one Laguerre cascade of `order` states at block offset `base`.
fn build_cascade(
    a: &mut DMatrix<f64>,
    b: &mut DVector<f64>,
    c: &mut DVector<f64>,
    base: usize,
    order: usize,
    pole: f64,
    delay: usize,
) {
    let sqrt_beta = (1.0 - pole * pole).sqrt();
    b[base] = 1.0;
    if delay > 0 {
        // Delay chain: rows 1..delay shift the previous state
        for i in 1..delay {
            a[(base + i, base + i - 1)] = 1.0;
        }
        c[base + delay - 1] = 1.0;
        // Low-pass section fed by the end of the chain
        a[(base + delay, base + delay)] = pole;
        for j in 0..delay {
            a[(base + delay, base + j)] = c[base + j];
        }
        c[base + delay - 1] = 0.0;
        c[base + delay] = sqrt_beta;
    } else {
        a[(base, base)] = pole;
        c[base] = sqrt_beta;
    }
    // All-pass sections
    for i in delay + 1..order {
        a[(base + i, base + i)] = pole;
        for j in 0..i {
            a[(base + i, base + j)] = sqrt_beta * c[base + j];
        }
        c[base + i] = sqrt_beta;
        for j in 0..i {
            c[base + j] *= -pole;
        }
    }
}

/// First-layer weight block for one filter, column-scaled by 1/σ when the
/// network inputs were scaled during training.
///
/// `sigma` must be the per-state σ recorded by the training network for this
/// filter's state block, never a freshly computed one.
pub fn scaled_weight_matrix(weights: &DMatrix<f64>, sigma: &[f64], scaled: bool) -> DMatrix<f64> {
    let mut w = weights.clone();
    if scaled {
        for j in 0..w.ncols() {
            for i in 0..w.nrows() {
                w[(i, j)] /= sigma[j];
            }
        }
    }
    w
}

/// Result of [`reduce_balanced`]
#[derive(Debug, Clone)]
pub struct Reduction {
    /// Truncated balanced realization
    pub state_space: StateSpace,
    /// Hankel singular values of the full realization
    pub hankel_values: DVector<f64>,
    /// Number of states kept
    pub kept: usize,
}

/// Reduce a realization by balanced truncation against an output-weight
/// matrix W (hidden neurons × states).
///
/// Solves P − AᵀPA = WᵀW and Q − AQAᵀ = BBᵀ, factors both by Cholesky,
/// takes the SVD of L_Pᵀ·L_Q, forms the balancing transform from the factors
/// and truncates at the smallest k with σ_k < 0.1·σ_{k−1}. A zero singular
/// value clamps the kept order before the gap rule is applied.
pub fn reduce_balanced(ss: &StateSpace, w: &DMatrix<f64>) -> Result<Reduction> {
    let n = ss.order();
    if w.ncols() != n {
        return Err(DrmError::dimension("reduce_balanced", n, w.ncols()));
    }
    let wtw = w.transpose() * w;
    let bbt = &ss.b * ss.b.transpose();
    let at = ss.a.transpose();

    // Observability Gramian P: P − AᵀPA = WᵀW
    let p = solve_discrete_lyapunov_sym(&ss.a, &wtw)?;
    // Controllability Gramian Q: Q − AQAᵀ = BBᵀ
    let q = solve_discrete_lyapunov_sym(&at, &bbt)?;

    let lp = cholesky_lower(&p).map_err(|err| {
        warn!("observability Gramian is not symmetric positive definite: {}", err);
        dump_gramian_failure("gramian_p_dump.txt", &ss.a, &p, &wtw);
        err
    })?;
    let lq = cholesky_lower(&q).map_err(|err| {
        warn!("controllability Gramian is not symmetric positive definite: {}", err);
        dump_gramian_failure("gramian_q_dump.txt", &at, &q, &bbt);
        err
    })?;

    let h = lp.transpose() * &lq;
    let decomp = svd(&h)?;
    let sv = &decomp.sigma;
    info!(
        "Hankel singular values are [{}]",
        sv.iter()
            .map(|v| format!("{:.6e}", v))
            .collect::<Vec<_>>()
            .join(" ")
    );

    // Truncation order: first 10x gap, clamped at the first zero value
    let mut kept = n;
    for i in 1..n {
        if sv[i] * 10.0 < sv[i - 1] {
            kept = i;
            break;
        }
    }
    for i in 0..kept {
        if sv[i] <= 0.0 {
            kept = i;
            break;
        }
    }
    if kept == 0 {
        return Err(DrmError::numerical(
            "reduce_balanced",
            "all Hankel singular values are zero",
        ));
    }

    let inv_sqrt: Vec<f64> = (0..kept).map(|i| 1.0 / sv[i].sqrt()).collect();
    // T = Σ^{-1/2}·Uᵀ·L_Pᵀ, rows beyond the kept order never enter the result
    let mut t = decomp.u.columns(0, kept).transpose() * lp.transpose();
    for i in 0..kept {
        for j in 0..n {
            t[(i, j)] *= inv_sqrt[i];
        }
    }
    // T⁻¹ = L_Q·V·Σ^{-1/2}
    let mut t_inv = &lq * decomp.v.columns(0, kept);
    for j in 0..kept {
        for i in 0..n {
            t_inv[(i, j)] *= inv_sqrt[j];
        }
    }

    let a_bal = &t * &ss.a * &t_inv;
    let b_bal = &t * &ss.b;
    let c_bal = t_inv.transpose() * &ss.c;
    let reduced = StateSpace::from_parts(a_bal, b_bal, c_bal)?;

    Ok(Reduction {
        state_space: reduced,
        hankel_values: sv.clone(),
        kept,
    })
}

/// Write the matrices behind a Gramian Cholesky failure to a diagnostics
/// file. A failure to dump is logged, not propagated, so the numerical error
/// stays the caller-visible failure.
fn dump_gramian_failure(path: &str, a: &DMatrix<f64>, gramian: &DMatrix<f64>, rhs: &DMatrix<f64>) {
    let result = (|| -> Result<()> {
        let mut file = File::create(path)?;
        writeln!(file, "A matrix")?;
        io::write_matrix(&mut file, a)?;
        writeln!(file, "Gramian")?;
        io::write_matrix(&mut file, gramian)?;
        writeln!(file, "Right-hand side")?;
        io::write_matrix(&mut file, rhs)?;
        Ok(())
    })();
    if let Err(err) = result {
        warn!("failed to dump Gramian diagnostics to {}: {}", path, err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_pole_c_vector_matches_recurrence() {
        // a = 0.5, r = 3, d = 0
        let spec = LaguerreSpec {
            pole: 0.5,
            order: 3,
            two_pole: false,
            ..Default::default()
        };
        let ss = spec.build().unwrap();
        let sqrt_beta = 0.75f64.sqrt();
        assert!((ss.c[0] - 0.25 * sqrt_beta).abs() < 1e-12);
        assert!((ss.c[1] + 0.5 * sqrt_beta).abs() < 1e-12);
        assert!((ss.c[2] - sqrt_beta).abs() < 1e-12);
        // Lower-triangular A, eigenvalues on the diagonal
        for i in 0..3 {
            assert!((ss.a[(i, i)] - 0.5).abs() < 1e-12);
            for j in i + 1..3 {
                assert_eq!(ss.a[(i, j)], 0.0);
            }
        }
        assert_eq!(ss.b[0], 1.0);
        assert_eq!(ss.b[1], 0.0);
    }

    #[test]
    fn delay_chain_structure() {
        let spec = LaguerreSpec {
            pole: 0.4,
            delay: 2,
            order: 4,
            two_pole: false,
            ..Default::default()
        };
        let ss = spec.build().unwrap();
        // Chain shifts state 0 into state 1, low-pass row is fed by state 1
        assert_eq!(ss.a[(1, 0)], 1.0);
        assert_eq!(ss.a[(2, 1)], 1.0);
        assert!((ss.a[(2, 2)] - 0.4).abs() < 1e-12);
        // Delay states are invisible to the output
        assert_eq!(ss.c[0], 0.0);
        assert_eq!(ss.c[1], 0.0);
    }

    #[test]
    fn two_pole_realization_is_block_diagonal() {
        let spec = LaguerreSpec {
            pole: 0.5,
            pole2: 0.9,
            order: 3,
            order2: 2,
            two_pole: true,
            ..Default::default()
        };
        let ss = spec.build().unwrap();
        assert_eq!(ss.order(), 5);
        for i in 0..3 {
            for j in 3..5 {
                assert_eq!(ss.a[(i, j)], 0.0);
                assert_eq!(ss.a[(j, i)], 0.0);
            }
        }
        assert_eq!(ss.b[3], 1.0);
        assert!((ss.a[(3, 3)] - 0.9).abs() < 1e-12);
    }

    #[test]
    fn rejects_order_below_delay() {
        let spec = LaguerreSpec {
            delay: 3,
            order: 3,
            ..Default::default()
        };
        assert!(spec.build().is_err());

        let spec = LaguerreSpec {
            pole: 1.0,
            ..Default::default()
        };
        assert!(spec.build().is_err());
    }

    #[test]
    fn scalar_reduction_preserves_impulse_response() {
        let spec = LaguerreSpec {
            pole: 0.5,
            order: 1,
            ..Default::default()
        };
        let ss = spec.build().unwrap();
        let w = DMatrix::from_row_slice(1, 1, &[2.0]);
        let reduction = reduce_balanced(&ss, &w).unwrap();
        assert_eq!(reduction.kept, 1);
        let red = &reduction.state_space;
        // Markov parameters cᵀA^k b agree for a full-order balanced transform
        let mut h_orig = Vec::new();
        let mut h_red = Vec::new();
        let mut xo = ss.b.clone();
        let mut xr = red.b.clone();
        for _ in 0..5 {
            h_orig.push(ss.c.dot(&xo));
            h_red.push(red.c.dot(&xr));
            xo = &ss.a * xo;
            xr = &red.a * xr;
        }
        for (orig, red) in h_orig.iter().zip(&h_red) {
            assert!((orig - red).abs() < 1e-10);
        }
    }

    #[test]
    fn reduction_respects_gap_rule() {
        let spec = LaguerreSpec {
            pole: 0.5,
            order: 4,
            ..Default::default()
        };
        let ss = spec.build().unwrap();
        let w = DMatrix::from_row_slice(2, 4, &[0.8, 0.3, 0.1, 0.05, 0.2, 0.6, 0.15, 0.02]);
        let reduction = reduce_balanced(&ss, &w).unwrap();
        let sv = &reduction.hankel_values;
        for i in 1..sv.len() {
            assert!(sv[i - 1] >= sv[i]);
            assert!(sv[i] >= 0.0);
        }
        let kept = reduction.kept;
        assert!(kept >= 1 && kept <= 4);
        // No 10x gap strictly inside the kept range, and one at the boundary
        for i in 1..kept {
            assert!(sv[i] * 10.0 >= sv[i - 1]);
        }
        if kept < 4 {
            assert!(sv[kept] * 10.0 < sv[kept - 1]);
        }
        assert_eq!(reduction.state_space.order(), kept);
    }
}
