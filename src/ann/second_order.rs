//! Second-order batch training interface
//!
//! Exposes the network's batch objective, gradient and Hessian over an
//! external weight vector as the callback triplet a second-order optimizer
//! consumes, plus a damped-Newton driver that trains through that interface.
//! The Hessian uses the closed form for a single hidden layer; its sparsity
//! pattern is dense except for the block mixing output-layer weights that
//! feed different output neurons, which is identically zero.

use crate::ann::NeuralNetwork;
use crate::data::DataCollection;
use crate::error::{DrmError, Result};
use crate::linalg::{lu_back_substitute, lu_decompose};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector};

/// Bound applied to every weight by the Newton driver.
const WEIGHT_BOUND: f64 = 10.0;

impl NeuralNetwork {
    /// Batch objective Σ pair errors for a given weight vector.
    pub fn batch_error_with_weights(&mut self, w: &[f64], data: &DataCollection) -> Result<f64> {
        self.set_weights(w)?;
        let n_pair = data.n_pair();
        let first = self.first_output_neuron();
        let mut input = vec![0.0; self.n_input];
        self.error_batch = 0.0;
        for i in 0..n_pair {
            for j in 0..self.n_input {
                input[j] = data.data[(i, j)];
            }
            self.set_inputs(&input);
            self.forward_no_derivative();
            let mut pair = 0.0;
            for j in 0..self.n_output {
                let err = data.data[(i, self.n_input + j)] - self.y[first + j];
                pair += err * err;
            }
            self.error_batch += pair / 2.0;
        }
        Ok(self.error_batch)
    }

    /// Batch gradient for a given weight vector; identical to the
    /// accumulator after one back-propagation sweep without weight updates.
    pub fn batch_gradient_with_weights(
        &mut self,
        w: &[f64],
        data: &DataCollection,
        grad: &mut [f64],
    ) -> Result<()> {
        if grad.len() != self.n_connection {
            return Err(DrmError::dimension(
                "batch_gradient",
                self.n_connection,
                grad.len(),
            ));
        }
        self.set_weights(w)?;
        self.clear_gradients();
        self.error_batch = 0.0;
        let n_pair = data.n_pair();
        let mut input = vec![0.0; self.n_input];
        let mut target = vec![0.0; self.n_output];
        for i in 0..n_pair {
            for j in 0..self.n_input {
                input[j] = data.data[(i, j)];
            }
            for j in 0..self.n_output {
                target[j] = data.data[(i, self.n_input + j)];
            }
            self.set_inputs(&input);
            self.forward();
            self.backward(&target);
        }
        grad.copy_from_slice(&self.grad_new);
        Ok(())
    }

    /// Number of structurally nonzero lower-triangle Hessian entries.
    pub fn hessian_nonzero_count(&self) -> usize {
        let nc = self.n_connection;
        let h1 = self.neurons_per_layer[1];
        nc * (nc + 1) / 2 - self.n_output * (self.n_output - 1) / 2 * h1 * h1
    }

    /// Lower-triangle (row, col) indices of the structurally nonzero Hessian
    /// entries, in the enumeration order [`Self::batch_hessian_with_weights`]
    /// fills values.
    pub fn hessian_nonzero_indices(&self, rows: &mut [usize], cols: &mut [usize]) -> Result<()> {
        let expected = self.hessian_nonzero_count();
        if rows.len() != expected || cols.len() != expected {
            return Err(DrmError::dimension("hessian_structure", expected, rows.len()));
        }
        let mut n = 0;
        for j in 0..self.n_connection {
            let layer0 = self.conn_layer[j];
            for k in 0..=j {
                let layer1 = self.conn_layer[k];
                if layer0 == 1
                    && layer1 == 1
                    && self.conn_to[j] != self.conn_to[k]
                {
                    continue;
                }
                rows[n] = j;
                cols[n] = k;
                n += 1;
            }
        }
        debug_assert_eq!(n, expected);
        Ok(())
    }

    /// Batch Hessian values for a given weight vector, in the enumeration
    /// order of [`Self::hessian_nonzero_indices`]. Closed form for one
    /// hidden layer; per-pair contributions are summed over the dataset.
    pub fn batch_hessian_with_weights(
        &mut self,
        w: &[f64],
        data: &DataCollection,
        values: &mut [f64],
    ) -> Result<()> {
        if self.neurons_per_layer.len() != 3 {
            return Err(DrmError::invalid(
                "batch Hessian requires exactly one hidden layer",
            ));
        }
        let expected = self.hessian_nonzero_count();
        if values.len() != expected {
            return Err(DrmError::dimension("batch_hessian", expected, values.len()));
        }
        self.set_weights(w)?;
        values.fill(0.0);
        let n_pair = data.n_pair();
        let first_out = self.first_output_neuron();
        let mut input = vec![0.0; self.n_input];
        let mut target = vec![0.0; self.n_output];
        // Per-output h_mm = y"·(y − t) + (y')²
        let mut hm = vec![0.0; self.n_neuron];
        self.error_batch = 0.0;
        for i in 0..n_pair {
            for j in 0..self.n_input {
                input[j] = data.data[(i, j)];
            }
            for j in 0..self.n_output {
                target[j] = data.data[(i, self.n_input + j)];
            }
            self.set_inputs(&input);
            self.forward_with_second_derivative();
            self.backward(&target);
            for j in 0..self.n_output {
                let neuron = first_out + j;
                hm[neuron] = self.y_second[neuron] * (self.y[neuron] - target[j])
                    + self.y_prime[neuron] * self.y_prime[neuron];
            }
            let mut n = 0;
            for j in 0..self.n_connection {
                let layer0 = self.conn_layer[j];
                let from0 = self.conn_from[j];
                let to0 = self.conn_to[j];
                for k in 0..=j {
                    let layer1 = self.conn_layer[k];
                    let from1 = self.conn_from[k];
                    let to1 = self.conn_to[k];
                    if layer0 == 1 {
                        if layer1 == 1 {
                            // Both weights feed the output layer; cross-output
                            // entries are structural zeros and are skipped
                            if to0 == to1 {
                                values[n] += self.y[from0] * self.y[from1] * hm[to0];
                                n += 1;
                            }
                        } else {
                            // One weight per layer; to1 is a hidden neuron
                            let w_out = self.weight
                                [self.first_conn_into[to0] + to1 - self.n_input - 1];
                            let mut sum = self.y[from0] * w_out * hm[to0];
                            if to1 == from0 {
                                sum -= self.delta[to0];
                            }
                            values[n] += self.y[from1] * self.y_prime[to1] * sum;
                            n += 1;
                        }
                    } else {
                        // Both weights in the first layer
                        let mut sum = 0.0;
                        for m in 0..self.n_output {
                            let out = first_out + m;
                            let w0 = self.weight
                                [self.first_conn_into[out] + to0 - self.n_input - 1];
                            let w1 = self.weight
                                [self.first_conn_into[out] + to1 - self.n_input - 1];
                            sum += hm[out] * w0 * w1;
                        }
                        sum *= self.y_prime[to0] * self.y_prime[to1];
                        let mut sum1 = 0.0;
                        if to0 == to1 {
                            for m in 0..self.n_output {
                                let out = first_out + m;
                                sum1 -= self.delta[out]
                                    * self.weight
                                        [self.first_conn_into[out] + to0 - self.n_input - 1];
                            }
                            sum1 *= self.y_second[to0];
                        }
                        values[n] += self.y[from0] * self.y[from1] * (sum + sum1);
                        n += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Callback triplet plus finalize sink consumed by a second-order optimizer
pub trait SecondOrderProblem {
    /// Number of optimization variables.
    fn num_vars(&self) -> usize;
    /// Starting point.
    fn initial_point(&self, x: &mut [f64]);
    /// Objective value at x.
    fn objective(&mut self, x: &[f64]) -> Result<f64>;
    /// Objective gradient at x.
    fn gradient(&mut self, x: &[f64], grad: &mut [f64]) -> Result<()>;
    /// Number of structurally nonzero lower-triangle Hessian entries.
    fn hessian_nnz(&self) -> usize;
    /// Lower-triangle sparsity pattern.
    fn hessian_structure(&self, rows: &mut [usize], cols: &mut [usize]) -> Result<()>;
    /// Hessian values at x, in the order of the structure.
    fn hessian_values(&mut self, x: &[f64], values: &mut [f64]) -> Result<()>;
    /// Write the solution back into the owning model.
    fn finalize(&mut self, x: &[f64]) -> Result<()>;
}

/// Batch training of a network as a second-order problem
pub struct AnnBatchProblem<'a> {
    net: &'a mut NeuralNetwork,
    data: &'a DataCollection,
    /// Uniform starting weight; small values keep the later balanced
    /// reduction well conditioned
    pub initial_weight: f64,
}

impl<'a> AnnBatchProblem<'a> {
    /// Wrap a network and its training data.
    pub fn new(net: &'a mut NeuralNetwork, data: &'a DataCollection, initial_weight: f64) -> Self {
        Self {
            net,
            data,
            initial_weight,
        }
    }
}

impl SecondOrderProblem for AnnBatchProblem<'_> {
    fn num_vars(&self) -> usize {
        self.net.n_connection()
    }

    fn initial_point(&self, x: &mut [f64]) {
        x.fill(self.initial_weight);
    }

    fn objective(&mut self, x: &[f64]) -> Result<f64> {
        self.net.batch_error_with_weights(x, self.data)
    }

    fn gradient(&mut self, x: &[f64], grad: &mut [f64]) -> Result<()> {
        self.net.batch_gradient_with_weights(x, self.data, grad)
    }

    fn hessian_nnz(&self) -> usize {
        self.net.hessian_nonzero_count()
    }

    fn hessian_structure(&self, rows: &mut [usize], cols: &mut [usize]) -> Result<()> {
        self.net.hessian_nonzero_indices(rows, cols)
    }

    fn hessian_values(&mut self, x: &[f64], values: &mut [f64]) -> Result<()> {
        self.net.batch_hessian_with_weights(x, self.data, values)
    }

    fn finalize(&mut self, x: &[f64]) -> Result<()> {
        self.net.set_weights(x)
    }
}

/// Damped-Newton settings
#[derive(Debug, Clone, Copy)]
pub struct NewtonOptions {
    /// Iteration cap
    pub max_iter: usize,
    /// Gradient infinity-norm below which the run stops
    pub tol: f64,
}

impl Default for NewtonOptions {
    fn default() -> Self {
        Self {
            max_iter: 3000,
            tol: 1e-5,
        }
    }
}

/// Outcome of [`train_second_order`]
#[derive(Debug, Clone, Copy)]
pub struct NewtonSummary {
    /// Iterations performed
    pub iterations: usize,
    /// Best objective value reached
    pub objective: f64,
    /// Whether the gradient tolerance was met
    pub converged: bool,
}

/// Train a second-order problem with a damped-Newton iteration.
///
/// Each step assembles the dense lower triangle from the sparse pattern,
/// solves (H + λI)s = −g by LU and accepts the step only when the objective
/// improves, growing λ otherwise. Iterates are clamped to ±10 per variable.
/// Running out of iterations is a soft failure: the best iterate seen is
/// finalized into the model and reported.
pub fn train_second_order<P: SecondOrderProblem>(
    problem: &mut P,
    options: NewtonOptions,
) -> Result<NewtonSummary> {
    let n = problem.num_vars();
    let nnz = problem.hessian_nnz();
    let mut rows = vec![0usize; nnz];
    let mut cols = vec![0usize; nnz];
    problem.hessian_structure(&mut rows, &mut cols)?;

    let mut x = vec![0.0; n];
    problem.initial_point(&mut x);
    let mut f = problem.objective(&x)?;
    let mut best_x = x.clone();
    let mut best_f = f;
    let mut grad = vec![0.0; n];
    let mut values = vec![0.0; nnz];
    let mut lambda = 1e-3;
    let mut converged = false;
    let mut iterations = 0;

    for iter in 0..options.max_iter {
        iterations = iter + 1;
        problem.gradient(&x, &mut grad)?;
        let g_norm = grad.iter().fold(0.0f64, |acc, g| acc.max(g.abs()));
        if g_norm < options.tol {
            converged = true;
            break;
        }
        problem.hessian_values(&x, &mut values)?;
        let mut h = DMatrix::zeros(n, n);
        for ((&r, &c), &v) in rows.iter().zip(cols.iter()).zip(values.iter()) {
            h[(r, c)] = v;
            h[(c, r)] = v;
        }

        let mut accepted = false;
        for _ in 0..40 {
            let mut damped = h.clone();
            for i in 0..n {
                damped[(i, i)] += lambda;
            }
            let step = match lu_decompose(&mut damped) {
                Ok(pivots) => {
                    let mut s = DVector::from_fn(n, |i, _| -grad[i]);
                    lu_back_substitute(&damped, &pivots, &mut s);
                    s
                }
                Err(_) => {
                    lambda *= 10.0;
                    continue;
                }
            };
            let trial: Vec<f64> = x
                .iter()
                .zip(step.iter())
                .map(|(xi, si)| (xi + si).clamp(-WEIGHT_BOUND, WEIGHT_BOUND))
                .collect();
            let f_trial = problem.objective(&trial)?;
            if f_trial.is_finite() && f_trial < f {
                x = trial;
                f = f_trial;
                lambda = (lambda * 0.3).max(1e-12);
                accepted = true;
                break;
            }
            lambda *= 10.0;
            if lambda > 1e12 {
                break;
            }
        }
        if f < best_f {
            best_f = f;
            best_x.copy_from_slice(&x);
        }
        if !accepted {
            // No downhill damped step exists; treat as converged-in-place
            break;
        }
        if iter % 100 == 0 {
            debug!("newton iteration {}: objective {:.6e}", iter, f);
        }
    }

    if !converged {
        warn!(
            "second-order training stopped after {} iterations with objective {:.6e}; keeping best-so-far weights",
            iterations, best_f
        );
    }
    problem.finalize(&best_x)?;
    Ok(NewtonSummary {
        iterations,
        objective: best_f,
        converged,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    fn small_net() -> NeuralNetwork {
        let mut rng = SmallRng::seed_from_u64(11);
        NeuralNetwork::new(1, 1, &[2], &mut rng).unwrap()
    }

    fn small_data() -> DataCollection {
        let mut dc = DataCollection::new(5, 1, 1);
        for i in 0..5 {
            let x = (i as f64 - 2.0) / 2.0;
            dc.data[(i, 0)] = x;
            dc.data[(i, 1)] = 0.5 * x - 0.2;
        }
        dc
    }

    #[test]
    fn nonzero_count_matches_enumeration() {
        let mut rng = SmallRng::seed_from_u64(3);
        let net = NeuralNetwork::new(2, 2, &[3], &mut rng).unwrap();
        let nnz = net.hessian_nonzero_count();
        let mut rows = vec![0; nnz];
        let mut cols = vec![0; nnz];
        net.hessian_nonzero_indices(&mut rows, &mut cols).unwrap();
        // Lower triangle only
        for (r, c) in rows.iter().zip(cols.iter()) {
            assert!(c <= r);
        }
        // Cross-output pairs of output-layer weights are absent
        for (r, c) in rows.iter().zip(cols.iter()) {
            if net.conn_layer[*r] == 1 && net.conn_layer[*c] == 1 {
                assert_eq!(net.conn_to[*r], net.conn_to[*c]);
            }
        }
    }

    #[test]
    fn hessian_matches_finite_difference_of_gradient() {
        let mut net = small_net();
        let data = small_data();
        let n = net.n_connection();
        let w: Vec<f64> = (0..n).map(|i| 0.1 + 0.05 * i as f64).collect();

        let nnz = net.hessian_nonzero_count();
        let mut rows = vec![0; nnz];
        let mut cols = vec![0; nnz];
        net.hessian_nonzero_indices(&mut rows, &mut cols).unwrap();
        let mut values = vec![0.0; nnz];
        net.batch_hessian_with_weights(&w, &data, &mut values).unwrap();
        let mut h = DMatrix::zeros(n, n);
        for ((&r, &c), &v) in rows.iter().zip(cols.iter()).zip(values.iter()) {
            h[(r, c)] = v;
            h[(c, r)] = v;
        }

        let eps = 1e-5;
        let mut g_plus = vec![0.0; n];
        let mut g_minus = vec![0.0; n];
        for j in 0..n {
            let mut wp = w.clone();
            wp[j] += eps;
            net.batch_gradient_with_weights(&wp, &data, &mut g_plus).unwrap();
            let mut wm = w.clone();
            wm[j] -= eps;
            net.batch_gradient_with_weights(&wm, &data, &mut g_minus).unwrap();
            for i in 0..n {
                let numeric = (g_plus[i] - g_minus[i]) / (2.0 * eps);
                assert!(
                    (h[(i, j)] - numeric).abs() < 1e-4,
                    "H[{},{}] analytic {} numeric {}",
                    i,
                    j,
                    h[(i, j)],
                    numeric
                );
            }
        }
    }

    #[test]
    fn gradient_interface_matches_objective_slope() {
        let mut net = small_net();
        let data = small_data();
        let n = net.n_connection();
        let w: Vec<f64> = (0..n).map(|i| 0.05 * (i as f64 + 1.0)).collect();
        let mut grad = vec![0.0; n];
        net.batch_gradient_with_weights(&w, &data, &mut grad).unwrap();
        let eps = 1e-6;
        for j in 0..n {
            let mut wp = w.clone();
            wp[j] += eps;
            let fp = net.batch_error_with_weights(&wp, &data).unwrap();
            let mut wm = w.clone();
            wm[j] -= eps;
            let fm = net.batch_error_with_weights(&wm, &data).unwrap();
            let numeric = (fp - fm) / (2.0 * eps);
            assert!((grad[j] - numeric).abs() < 1e-6);
        }
    }

    #[test]
    fn newton_trains_small_regression_net() {
        let mut net = small_net();
        let data = small_data();
        let mut problem = AnnBatchProblem::new(&mut net, &data, 0.01);
        let summary = train_second_order(&mut problem, NewtonOptions::default()).unwrap();
        assert!(summary.objective < 1e-4, "objective {}", summary.objective);
        // Finalize wrote the solution back
        let mut out = [0.0];
        net.predict(&[1.0], &mut out).unwrap();
        assert!((out[0] - 0.3).abs() < 0.05);
    }

    #[test]
    fn quadratic_problem_converges() {
        // f(x) = ½ (x0 − 1)² + (x1 + 2)², minimum at (1, −2)
        struct Quadratic;
        impl SecondOrderProblem for Quadratic {
            fn num_vars(&self) -> usize {
                2
            }
            fn initial_point(&self, x: &mut [f64]) {
                x.fill(0.0);
            }
            fn objective(&mut self, x: &[f64]) -> crate::error::Result<f64> {
                Ok(0.5 * (x[0] - 1.0).powi(2) + (x[1] + 2.0).powi(2))
            }
            fn gradient(&mut self, x: &[f64], grad: &mut [f64]) -> crate::error::Result<()> {
                grad[0] = x[0] - 1.0;
                grad[1] = 2.0 * (x[1] + 2.0);
                Ok(())
            }
            fn hessian_nnz(&self) -> usize {
                2
            }
            fn hessian_structure(
                &self,
                rows: &mut [usize],
                cols: &mut [usize],
            ) -> crate::error::Result<()> {
                rows[0] = 0;
                cols[0] = 0;
                rows[1] = 1;
                cols[1] = 1;
                Ok(())
            }
            fn hessian_values(
                &mut self,
                _x: &[f64],
                values: &mut [f64],
            ) -> crate::error::Result<()> {
                values[0] = 1.0;
                values[1] = 2.0;
                Ok(())
            }
            fn finalize(&mut self, _x: &[f64]) -> crate::error::Result<()> {
                Ok(())
            }
        }
        let mut problem = Quadratic;
        let summary = train_second_order(&mut problem, NewtonOptions::default()).unwrap();
        assert!(summary.converged);
        assert!(summary.objective < 1e-9);
    }
}
