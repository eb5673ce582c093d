//! Linear time-invariant state-space filters
//!
//! A filter holds (A, B, C) and a mutable current state x. The Laguerre
//! builder in [`laguerre`] produces unbalanced realizations of this type and
//! reduces them by balanced truncation.

use crate::error::{DrmError, Result};
use crate::linalg::gauss_solve_full_pivot;
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

pub mod laguerre;

pub use laguerre::{reduce_balanced, scaled_weight_matrix, LaguerreSpec, Reduction};

/// Single-input state-space filter with a mutable current state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSpace {
    /// State transition matrix, n×n
    pub a: DMatrix<f64>,
    /// Input column, n
    pub b: DVector<f64>,
    /// Output row, n
    pub c: DVector<f64>,
    /// Current state, n
    pub x: DVector<f64>,
}

impl StateSpace {
    /// Create a zeroed filter of the given order.
    pub fn new(order: usize) -> Self {
        Self {
            a: DMatrix::zeros(order, order),
            b: DVector::zeros(order),
            c: DVector::zeros(order),
            x: DVector::zeros(order),
        }
    }

    /// Create a filter from its matrices with the state at zero.
    pub fn from_parts(a: DMatrix<f64>, b: DVector<f64>, c: DVector<f64>) -> Result<Self> {
        let n = a.nrows();
        if a.ncols() != n {
            return Err(DrmError::dimension("state_space", n, a.ncols()));
        }
        if b.len() != n {
            return Err(DrmError::dimension("state_space", n, b.len()));
        }
        if c.len() != n {
            return Err(DrmError::dimension("state_space", n, c.len()));
        }
        Ok(Self {
            a,
            b,
            c,
            x: DVector::zeros(n),
        })
    }

    /// Number of state variables.
    pub fn order(&self) -> usize {
        self.a.nrows()
    }

    /// Set the state to the steady state for a constant input u by solving
    /// (A − I)·x = −B·u. Requires that 1 is not an eigenvalue of A.
    pub fn init_steady_state(&mut self, u: f64) -> Result<()> {
        let n = self.order();
        let mut m = self.a.clone();
        for i in 0..n {
            m[(i, i)] -= 1.0;
        }
        let rhs = -u * &self.b;
        self.x = gauss_solve_full_pivot(&m, &rhs)?;
        Ok(())
    }

    /// Advance the state one step: x ← A·x + B·u.
    pub fn step(&mut self, u: f64) {
        let mut next = &self.a * &self.x;
        next.axpy(u, &self.b, 1.0);
        self.x = next;
    }

    /// Current output cᵀ·x.
    pub fn output(&self) -> f64 {
        self.c.dot(&self.x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_filter() -> StateSpace {
        let a = DMatrix::from_row_slice(2, 2, &[0.5, 0.0, 0.25, 0.5]);
        let b = DVector::from_vec(vec![1.0, 0.0]);
        let c = DVector::from_vec(vec![0.0, 1.0]);
        StateSpace::from_parts(a, b, c).unwrap()
    }

    #[test]
    fn steady_state_is_a_fixed_point() {
        let mut ss = sample_filter();
        ss.init_steady_state(2.0).unwrap();
        let x0 = ss.x.clone();
        let y0 = ss.output();
        for _ in 0..5 {
            ss.step(2.0);
            assert!((ss.x.clone() - &x0).norm() < 1e-10);
            assert!((ss.output() - y0).abs() < 1e-10);
        }
    }

    #[test]
    fn step_follows_recurrence() {
        let mut ss = sample_filter();
        ss.x = DVector::from_vec(vec![1.0, 2.0]);
        ss.step(3.0);
        // x0' = 0.5*1 + 3, x1' = 0.25*1 + 0.5*2
        assert!((ss.x[0] - 3.5).abs() < 1e-12);
        assert!((ss.x[1] - 1.25).abs() < 1e-12);
    }

    #[test]
    fn from_parts_checks_shapes() {
        let a = DMatrix::zeros(2, 2);
        let b = DVector::zeros(3);
        let c = DVector::zeros(2);
        assert!(StateSpace::from_parts(a, b, c).is_err());
    }
}
