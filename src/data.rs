//! Identification datasets
//!
//! A [`DataCollection`] holds an ordered sequence of rows, each carrying the
//! input samples followed by the output samples of one time step; row k is
//! interpreted as the pair (u(k), y(k+1)). Column statistics use the
//! sample formula with the N−1 denominator.

use crate::error::{DrmError, Result};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// Rows of paired input/output samples with per-column scaling state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataCollection {
    /// Number of input columns
    pub n_in: usize,
    /// Number of output columns
    pub n_out: usize,
    /// Row-major data, one row per pair, inputs then outputs
    pub data: DMatrix<f64>,
    /// Per-column mean
    pub mean: DVector<f64>,
    /// Per-column sample standard deviation
    pub sigma: DVector<f64>,
}

impl DataCollection {
    /// Create a zeroed collection of the given shape.
    pub fn new(n_pair: usize, n_in: usize, n_out: usize) -> Self {
        let n_col = n_in + n_out;
        Self {
            n_in,
            n_out,
            data: DMatrix::zeros(n_pair, n_col),
            mean: DVector::zeros(n_col),
            sigma: DVector::from_element(n_col, 1.0),
        }
    }

    /// Number of data pairs.
    pub fn n_pair(&self) -> usize {
        self.data.nrows()
    }

    /// Fill from a flat column-major interleaved tensor: all samples of
    /// column 0, then column 1, and so on.
    pub fn load_column_major(&mut self, n_pair: usize, tensor: &[f64]) -> Result<()> {
        let n_col = self.n_in + self.n_out;
        if tensor.len() != n_pair * n_col {
            return Err(DrmError::dimension(
                "load_column_major",
                n_pair * n_col,
                tensor.len(),
            ));
        }
        self.data = DMatrix::zeros(n_pair, n_col);
        let mut k = 0;
        for j in 0..n_col {
            for i in 0..n_pair {
                self.data[(i, j)] = tensor[k];
                k += 1;
            }
        }
        Ok(())
    }

    /// Compute per-column mean and sample standard deviation (N−1).
    pub fn compute_mean_sigma(&mut self) {
        let n = self.n_pair();
        let n_col = self.n_in + self.n_out;
        for j in 0..n_col {
            let mut sum = 0.0;
            for i in 0..n {
                sum += self.data[(i, j)];
            }
            self.mean[j] = sum / n as f64;
        }
        for j in 0..n_col {
            let mut sum = 0.0;
            for i in 0..n {
                let dx = self.data[(i, j)] - self.mean[j];
                sum += dx * dx;
            }
            self.sigma[j] = if n > 1 {
                (sum / (n - 1) as f64).sqrt()
            } else {
                1.0
            };
        }
    }

    /// Scale the input columns in place: x ← (x − μ)/σ.
    pub fn scale_inputs(&mut self) {
        self.scale_columns(0, self.n_in);
    }

    /// Scale the output columns in place.
    pub fn scale_outputs(&mut self) {
        self.scale_columns(self.n_in, self.n_in + self.n_out);
    }

    /// Undo input scaling.
    pub fn unscale_inputs(&mut self) {
        self.unscale_columns(0, self.n_in);
    }

    /// Undo output scaling.
    pub fn unscale_outputs(&mut self) {
        self.unscale_columns(self.n_in, self.n_in + self.n_out);
    }

    fn scale_columns(&mut self, from: usize, to: usize) {
        for j in from..to {
            for i in 0..self.data.nrows() {
                self.data[(i, j)] = (self.data[(i, j)] - self.mean[j]) / self.sigma[j];
            }
        }
    }

    fn unscale_columns(&mut self, from: usize, to: usize) {
        for j in from..to {
            for i in 0..self.data.nrows() {
                self.data[(i, j)] = self.data[(i, j)] * self.sigma[j] + self.mean[j];
            }
        }
    }
}
