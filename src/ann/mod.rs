//! Feed-forward neural network with resilient back-propagation
//!
//! Fixed-topology fully connected network with one bias neuron per layer
//! (output held at 1, no incoming weights). The flat per-neuron and
//! per-connection arrays keep forward, backward and update passes allocation
//! free; connection order is layer by layer, destination neuron by
//! destination neuron, anterior neuron innermost, and every index map is
//! derived from that order.
//!
//! Batch training supports the classical momentum rule, RPROP and iRPROP+.
//! The second-order batch interface used by the Newton training path lives
//! in [`second_order`].

use crate::data::DataCollection;
use crate::error::{DrmError, Result};
use log::debug;
use nalgebra::DMatrix;
use rand::rngs::SmallRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

pub mod second_order;

pub use second_order::{train_second_order, AnnBatchProblem, NewtonOptions, SecondOrderProblem};

/// Neuron activation kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    /// y = s·z
    Linear,
    /// y = 1/(1+e^{−2s·z})
    Sigmoid,
    /// y = 2/(1+e^{−2s·z}) − 1
    SymmetricSigmoid,
}

/// Batch weight-update rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainMethod {
    /// Momentum gradient descent, applied online
    Classical,
    /// Resilient back-propagation (Riedmiller)
    Rprop,
    /// iRPROP+ (Igel and Hüsken): undo the last step when the batch error grew
    IRpropPlus,
}

/// Result of a training run
#[derive(Debug, Clone, Copy)]
pub struct TrainSummary {
    /// Epochs actually run
    pub epochs: usize,
    /// Mean batch error at the end of training
    pub mean_error: f64,
    /// Whether the stop error was reached
    pub converged: bool,
}

/// One-hidden-layer feed-forward network over flat state arrays
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NeuralNetwork {
    pub(crate) n_input: usize,
    pub(crate) n_output: usize,
    pub(crate) n_neuron: usize,
    pub(crate) n_connection: usize,
    /// Neurons per layer, bias included
    pub(crate) neurons_per_layer: Vec<usize>,
    /// Index of the first connection feeding each neuron; meaningful only
    /// for non-bias neurons past the input layer
    pub(crate) first_conn_into: Vec<usize>,
    pub(crate) conn_from: Vec<usize>,
    pub(crate) conn_to: Vec<usize>,
    /// Index of the anterior layer of each connection
    pub(crate) conn_layer: Vec<usize>,
    pub(crate) y: Vec<f64>,
    pub(crate) y_prime: Vec<f64>,
    pub(crate) y_second: Vec<f64>,
    pub(crate) delta: Vec<f64>,
    pub(crate) weight: Vec<f64>,
    /// Gradient from the previous update step
    pub(crate) grad: Vec<f64>,
    /// Gradient accumulator for the current batch
    pub(crate) grad_new: Vec<f64>,
    pub(crate) step_size: Vec<f64>,
    pub(crate) weight_change: Vec<f64>,
    /// Per-channel mean, inputs then outputs
    pub(crate) mean: Vec<f64>,
    /// Per-channel standard deviation, inputs then outputs
    pub(crate) sigma: Vec<f64>,
    pub(crate) error_pair: f64,
    pub(crate) error_batch: f64,
    pub(crate) error_batch_old: f64,

    /// Batch update rule
    pub train_method: TrainMethod,
    /// Epoch cap
    pub max_epochs: usize,
    /// Mean batch error below which training stops
    pub stop_error: f64,
    /// Learning rate of the classical rule
    pub learning_rate: f64,
    /// Momentum coefficient of the classical rule
    pub momentum: f64,
    /// RPROP step floor
    pub delta_min: f64,
    /// RPROP step ceiling
    pub delta_max: f64,
    /// RPROP initial step
    pub delta_zero: f64,
    /// RPROP shrink factor
    pub eta_minus: f64,
    /// RPROP growth factor
    pub eta_plus: f64,
    /// Hidden layer activation
    pub hidden_activation: Activation,
    /// Output layer activation
    pub output_activation: Activation,
    /// Hidden layer steepness
    pub steepness_hidden: f64,
    /// Output layer steepness
    pub steepness_output: f64,
}

impl NeuralNetwork {
    /// Build a fully connected network with the given hidden layer sizes
    /// (bias neurons excluded from the counts). Weights start uniform in
    /// (−1, 1) from the supplied generator.
    pub fn new(
        n_input: usize,
        n_output: usize,
        hidden: &[usize],
        rng: &mut SmallRng,
    ) -> Result<Self> {
        if n_input == 0 || n_output == 0 {
            return Err(DrmError::invalid("network needs at least one input and one output"));
        }
        if hidden.is_empty() || hidden.iter().any(|&h| h == 0) {
            return Err(DrmError::invalid("hidden layers must be non-empty"));
        }
        let n_layer = hidden.len() + 2;
        let mut neurons_per_layer = Vec::with_capacity(n_layer);
        neurons_per_layer.push(n_input + 1);
        for &h in hidden {
            neurons_per_layer.push(h + 1);
        }
        neurons_per_layer.push(n_output + 1);
        let n_neuron: usize = neurons_per_layer.iter().sum();
        let n_connection: usize = (1..n_layer)
            .map(|i| neurons_per_layer[i - 1] * (neurons_per_layer[i] - 1))
            .sum();
        let delta_zero = 0.5;

        let mut net = Self {
            n_input,
            n_output,
            n_neuron,
            n_connection,
            neurons_per_layer,
            first_conn_into: vec![0; n_neuron],
            conn_from: vec![0; n_connection],
            conn_to: vec![0; n_connection],
            conn_layer: vec![0; n_connection],
            y: vec![0.0; n_neuron],
            y_prime: vec![0.0; n_neuron],
            y_second: vec![0.0; n_neuron],
            delta: vec![0.0; n_neuron],
            weight: vec![0.0; n_connection],
            grad: vec![1e-4; n_connection],
            grad_new: vec![0.0; n_connection],
            step_size: vec![delta_zero; n_connection],
            weight_change: vec![0.0; n_connection],
            mean: vec![0.0; n_input + n_output],
            sigma: vec![1.0; n_input + n_output],
            error_pair: 0.0,
            error_batch: 0.0,
            error_batch_old: 0.0,
            train_method: TrainMethod::Rprop,
            max_epochs: 50_000,
            stop_error: 1e-5,
            learning_rate: 0.6,
            momentum: 0.1,
            delta_min: 0.0,
            delta_max: 50.0,
            delta_zero,
            eta_minus: 0.5,
            eta_plus: 1.2,
            hidden_activation: Activation::SymmetricSigmoid,
            output_activation: Activation::Linear,
            steepness_hidden: 1.0,
            steepness_output: 1.0,
        };

        // Connection index maps, in construction order
        let mut first = 0;
        let mut conn = 0;
        for layer in 1..n_layer {
            let anterior_first = first;
            let n_anterior = net.neurons_per_layer[layer - 1];
            first += n_anterior;
            for j in 0..net.neurons_per_layer[layer] - 1 {
                net.first_conn_into[first + j] = conn;
                for k in 0..n_anterior {
                    net.conn_from[conn] = anterior_first + k;
                    net.conn_to[conn] = first + j;
                    net.conn_layer[conn] = layer - 1;
                    conn += 1;
                }
            }
        }

        for w in net.weight.iter_mut() {
            *w = rng.gen_range(-1.0..1.0);
        }
        // Bias and input neuron bookkeeping never changes after this
        for i in 0..n_input {
            net.y_prime[i] = 1.0;
        }
        let mut first = 0;
        for layer in 0..n_layer {
            let bias = first + net.neurons_per_layer[layer] - 1;
            net.y[bias] = 1.0;
            net.y_prime[bias] = 1.0;
            first += net.neurons_per_layer[layer];
        }
        Ok(net)
    }

    /// Number of inputs.
    pub fn n_input(&self) -> usize {
        self.n_input
    }

    /// Number of outputs.
    pub fn n_output(&self) -> usize {
        self.n_output
    }

    /// Number of connections (trainable weights).
    pub fn n_connection(&self) -> usize {
        self.n_connection
    }

    /// Neurons in the first hidden layer, bias excluded.
    pub fn hidden_neuron_count(&self) -> usize {
        self.neurons_per_layer[1] - 1
    }

    /// Mean batch error of the most recent epoch or evaluation.
    pub fn batch_error(&self) -> f64 {
        self.error_batch
    }

    /// Flat weight vector.
    pub fn weights(&self) -> &[f64] {
        &self.weight
    }

    /// Overwrite all weights from a flat vector.
    pub fn set_weights(&mut self, weights: &[f64]) -> Result<()> {
        if weights.len() != self.n_connection {
            return Err(DrmError::dimension("set_weights", self.n_connection, weights.len()));
        }
        self.weight.copy_from_slice(weights);
        Ok(())
    }

    /// Set every weight to the same value; small uniform weights keep the
    /// first-layer weight matrix well conditioned for balanced reduction.
    pub fn init_uniform_weights(&mut self, value: f64) {
        self.weight.fill(value);
    }

    /// Per-channel σ of the input channels recorded by [`Self::fit_scaling`].
    pub fn input_sigma(&self) -> &[f64] {
        &self.sigma[..self.n_input]
    }

    /// Hidden layer sizes, bias neurons excluded.
    pub fn hidden_layer_sizes(&self) -> Vec<usize> {
        self.neurons_per_layer[1..self.neurons_per_layer.len() - 1]
            .iter()
            .map(|&n| n - 1)
            .collect()
    }

    /// Channel scaling as (mean, σ) slices, inputs then outputs.
    pub fn channel_scaling(&self) -> (&[f64], &[f64]) {
        (&self.mean, &self.sigma)
    }

    /// Overwrite the channel scaling, inputs then outputs.
    pub fn set_channel_scaling(&mut self, mean: &[f64], sigma: &[f64]) -> Result<()> {
        let n_chan = self.n_input + self.n_output;
        if mean.len() != n_chan || sigma.len() != n_chan {
            return Err(DrmError::dimension("set_channel_scaling", n_chan, mean.len()));
        }
        self.mean.copy_from_slice(mean);
        self.sigma.copy_from_slice(sigma);
        Ok(())
    }

    /// First-layer weights as a (hidden × input) matrix, bias column dropped.
    pub fn first_layer_weights(&self) -> DMatrix<f64> {
        let h = self.hidden_neuron_count();
        let stride = self.n_input + 1;
        DMatrix::from_fn(h, self.n_input, |j, k| self.weight[j * stride + k])
    }

    /// Compute channel mean and sample σ from a dataset matching the
    /// network's input/output counts.
    pub fn fit_scaling(&mut self, data: &DataCollection) -> Result<()> {
        self.check_data(data)?;
        let n = data.n_pair();
        let n_chan = self.n_input + self.n_output;
        for j in 0..n_chan {
            let mut sum = 0.0;
            for i in 0..n {
                sum += data.data[(i, j)];
            }
            self.mean[j] = sum / n as f64;
        }
        for j in 0..n_chan {
            let mut sum = 0.0;
            for i in 0..n {
                let dx = data.data[(i, j)] - self.mean[j];
                sum += dx * dx;
            }
            self.sigma[j] = if n > 1 {
                (sum / (n - 1) as f64).sqrt()
            } else {
                1.0
            };
        }
        Ok(())
    }

    /// Reset channel scaling to mean 0, σ 1.
    pub fn reset_scaling(&mut self) {
        self.mean.fill(0.0);
        self.sigma.fill(1.0);
    }

    /// Scale a dataset in place with the network's channel statistics.
    pub fn scale_data(&self, data: &mut DataCollection) -> Result<()> {
        self.check_data(data)?;
        let n_chan = self.n_input + self.n_output;
        for j in 0..n_chan {
            for i in 0..data.data.nrows() {
                data.data[(i, j)] = (data.data[(i, j)] - self.mean[j]) / self.sigma[j];
            }
        }
        Ok(())
    }

    /// Scale an input vector in place.
    pub fn scale_input(&self, input: &mut [f64]) {
        for (j, value) in input.iter_mut().enumerate().take(self.n_input) {
            *value = (*value - self.mean[j]) / self.sigma[j];
        }
    }

    /// Undo output scaling on a prediction in place.
    pub fn unscale_output(&self, output: &mut [f64]) {
        for (j, value) in output.iter_mut().enumerate().take(self.n_output) {
            *value = *value * self.sigma[self.n_input + j] + self.mean[self.n_input + j];
        }
    }

    fn check_data(&self, data: &DataCollection) -> Result<()> {
        if data.n_in != self.n_input {
            return Err(DrmError::dimension("ann data", self.n_input, data.n_in));
        }
        if data.n_out != self.n_output {
            return Err(DrmError::dimension("ann data", self.n_output, data.n_out));
        }
        Ok(())
    }

    pub(crate) fn set_inputs(&mut self, input: &[f64]) {
        self.y[..self.n_input].copy_from_slice(&input[..self.n_input]);
    }

    pub(crate) fn first_output_neuron(&self) -> usize {
        self.n_neuron - self.n_output - 1
    }

    fn layer_activation(&self, layer: usize) -> (Activation, f64) {
        if layer < self.neurons_per_layer.len() - 1 {
            (self.hidden_activation, self.steepness_hidden)
        } else {
            (self.output_activation, self.steepness_output)
        }
    }

    /// Forward pass computing y and y' for every non-input neuron.
    pub(crate) fn forward(&mut self) {
        self.forward_impl(DerivativeOrder::First);
    }

    /// Forward pass computing y only.
    pub(crate) fn forward_no_derivative(&mut self) {
        self.forward_impl(DerivativeOrder::None);
    }

    /// Forward pass computing y, y' and y" for the Hessian path.
    pub(crate) fn forward_with_second_derivative(&mut self) {
        self.forward_impl(DerivativeOrder::Second);
    }

    fn forward_impl(&mut self, order: DerivativeOrder) {
        let n_layer = self.neurons_per_layer.len();
        let mut anterior_first = 0;
        let mut conn = 0;
        for layer in 1..n_layer {
            let n_anterior = self.neurons_per_layer[layer - 1];
            let current_first = anterior_first + n_anterior;
            let (activation, steepness) = self.layer_activation(layer);
            for j in 0..self.neurons_per_layer[layer] - 1 {
                let neuron = current_first + j;
                let mut sum = 0.0;
                for k in 0..n_anterior {
                    sum += self.y[anterior_first + k] * self.weight[conn];
                    conn += 1;
                }
                sum *= steepness;
                match activation {
                    Activation::Linear => {
                        self.y[neuron] = sum;
                        if order != DerivativeOrder::None {
                            self.y_prime[neuron] = steepness;
                        }
                        if order == DerivativeOrder::Second {
                            self.y_second[neuron] = 0.0;
                        }
                    }
                    Activation::Sigmoid => {
                        let v = 1.0 / (1.0 + (-2.0 * sum).exp());
                        self.y[neuron] = v;
                        if order != DerivativeOrder::None {
                            self.y_prime[neuron] = 2.0 * steepness * v * (1.0 - v);
                        }
                        if order == DerivativeOrder::Second {
                            self.y_second[neuron] =
                                4.0 * steepness * steepness * v * (1.0 - v) * (1.0 - 2.0 * v);
                        }
                    }
                    Activation::SymmetricSigmoid => {
                        let v = 2.0 / (1.0 + (-2.0 * sum).exp()) - 1.0;
                        self.y[neuron] = v;
                        if order != DerivativeOrder::None {
                            self.y_prime[neuron] = steepness * (1.0 - v * v);
                        }
                        if order == DerivativeOrder::Second {
                            self.y_second[neuron] =
                                2.0 * steepness * steepness * v * (1.0 - v * v);
                        }
                    }
                }
            }
            anterior_first = current_first;
        }
    }

    /// Back-propagate one pair: fills δ, accumulates the per-connection
    /// gradient into the batch accumulator and adds the pair error to the
    /// batch error. Assumes [`Self::forward`] just ran.
    pub(crate) fn backward(&mut self, targets: &[f64]) {
        let n_layer = self.neurons_per_layer.len();
        // Output layer error signals
        let mut current_first = self.first_output_neuron();
        self.error_pair = 0.0;
        for j in 0..self.n_output {
            let neuron = current_first + j;
            let err = targets[j] - self.y[neuron];
            self.error_pair += err * err;
            self.delta[neuron] = err * self.y_prime[neuron];
        }
        self.error_pair /= 2.0;
        // Hidden layer error signals
        for layer in (1..n_layer - 1).rev() {
            let n_current = self.neurons_per_layer[layer] - 1;
            let n_posterior = self.neurons_per_layer[layer + 1] - 1;
            let posterior_first = current_first;
            current_first -= n_current + 1;
            for j in 0..n_current {
                let neuron = current_first + j;
                let mut sum = 0.0;
                for k in 0..n_posterior {
                    let post = posterior_first + k;
                    let conn = self.first_conn_into[post] + j;
                    sum += self.weight[conn] * self.delta[post];
                }
                self.delta[neuron] = sum * self.y_prime[neuron];
            }
        }
        // Gradient accumulation over all connections
        for conn in 0..self.n_connection {
            self.grad_new[conn] -= self.delta[self.conn_to[conn]] * self.y[self.conn_from[conn]];
        }
        self.error_batch += self.error_pair;
    }

    pub(crate) fn clear_gradients(&mut self) {
        self.grad_new.fill(0.0);
    }

    /// Apply the configured batch update rule to every connection.
    pub(crate) fn update_weights(&mut self) {
        for conn in 0..self.n_connection {
            let g_new = self.grad_new[conn];
            match self.train_method {
                TrainMethod::Classical => {
                    self.weight_change[conn] =
                        self.momentum * self.weight_change[conn] - self.learning_rate * g_new;
                    self.weight[conn] += self.weight_change[conn];
                }
                TrainMethod::Rprop => {
                    let product = self.grad[conn] * g_new;
                    if product > 0.0 {
                        self.step_size[conn] =
                            (self.step_size[conn] * self.eta_plus).min(self.delta_max);
                        self.weight_change[conn] = -g_new.signum_or_zero() * self.step_size[conn];
                        self.weight[conn] += self.weight_change[conn];
                        self.grad[conn] = g_new;
                    } else if product < 0.0 {
                        self.step_size[conn] =
                            (self.step_size[conn] * self.eta_minus).max(self.delta_min);
                        self.grad[conn] = 0.0;
                    } else {
                        self.weight_change[conn] = -g_new.signum_or_zero() * self.step_size[conn];
                        self.weight[conn] += self.weight_change[conn];
                        self.grad[conn] = g_new;
                    }
                }
                TrainMethod::IRpropPlus => {
                    let product = self.grad[conn] * g_new;
                    if product > 0.0 {
                        self.step_size[conn] =
                            (self.step_size[conn] * self.eta_plus).min(self.delta_max);
                        self.weight_change[conn] = -g_new.signum_or_zero() * self.step_size[conn];
                        self.weight[conn] += self.weight_change[conn];
                        self.grad[conn] = g_new;
                    } else if product < 0.0 {
                        self.step_size[conn] =
                            (self.step_size[conn] * self.eta_minus).max(self.delta_min);
                        if self.error_batch > self.error_batch_old {
                            self.weight[conn] -= self.weight_change[conn];
                            self.weight_change[conn] = 0.0;
                        }
                        self.grad[conn] = 0.0;
                    } else {
                        self.weight_change[conn] = -g_new.signum_or_zero() * self.step_size[conn];
                        self.weight[conn] += self.weight_change[conn];
                        self.grad[conn] = g_new;
                    }
                }
            }
        }
    }

    /// Train over a dataset. The classical rule runs online, the RPROP
    /// family runs in batch mode.
    pub fn train(&mut self, data: &DataCollection) -> Result<TrainSummary> {
        match self.train_method {
            TrainMethod::Classical => self.train_online(data),
            _ => self.train_batch(data),
        }
    }

    /// Batch training: one gradient accumulation sweep per epoch followed by
    /// one weight update. Stops at the epoch cap or when the mean batch
    /// error drops below `stop_error`; running out of epochs is a soft
    /// failure and leaves the current weights in place.
    pub fn train_batch(&mut self, data: &DataCollection) -> Result<TrainSummary> {
        self.check_data(data)?;
        let n_pair = data.n_pair();
        if n_pair == 0 {
            return Err(DrmError::invalid("training dataset is empty"));
        }
        let mut epochs = 0;
        let mut converged = false;
        let mut input = vec![0.0; self.n_input];
        let mut target = vec![0.0; self.n_output];
        for epoch in 0..self.max_epochs {
            epochs = epoch + 1;
            self.error_batch_old = self.error_batch;
            self.error_batch = 0.0;
            self.clear_gradients();
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
            self.update_weights();
            if self.error_batch / (n_pair as f64) < self.stop_error {
                converged = true;
                break;
            }
            if epoch % 1000 == 0 {
                debug!(
                    "epoch {}: average error {:.6e}",
                    epoch,
                    self.error_batch / n_pair as f64
                );
            }
        }
        let mean_error = self.error_batch / n_pair as f64;
        debug!("training finished at epoch {}: average error {:.6e}", epochs, mean_error);
        Ok(TrainSummary {
            epochs,
            mean_error,
            converged,
        })
    }

    /// Online training: update the weights after every pair.
    pub fn train_online(&mut self, data: &DataCollection) -> Result<TrainSummary> {
        self.check_data(data)?;
        let n_pair = data.n_pair();
        if n_pair == 0 {
            return Err(DrmError::invalid("training dataset is empty"));
        }
        let mut epochs = 0;
        let mut converged = false;
        let mut input = vec![0.0; self.n_input];
        let mut target = vec![0.0; self.n_output];
        for epoch in 0..self.max_epochs {
            epochs = epoch + 1;
            let mut epoch_error = 0.0;
            for i in 0..n_pair {
                for j in 0..self.n_input {
                    input[j] = data.data[(i, j)];
                }
                for j in 0..self.n_output {
                    target[j] = data.data[(i, self.n_input + j)];
                }
                self.clear_gradients();
                self.set_inputs(&input);
                self.forward();
                self.error_batch = 0.0;
                self.backward(&target);
                self.update_weights();
                epoch_error += self.error_pair;
            }
            self.error_batch = epoch_error;
            if epoch_error / (n_pair as f64) < self.stop_error {
                converged = true;
                break;
            }
            if epoch % 10_000 == 0 {
                debug!(
                    "epoch {}: average error {:.6e}",
                    epoch,
                    epoch_error / n_pair as f64
                );
            }
        }
        let mean_error = self.error_batch / n_pair as f64;
        Ok(TrainSummary {
            epochs,
            mean_error,
            converged,
        })
    }

    /// Forward prediction without derivatives; inputs are taken as given,
    /// scaling is the caller's concern.
    pub fn predict(&mut self, input: &[f64], output: &mut [f64]) -> Result<()> {
        if input.len() < self.n_input {
            return Err(DrmError::dimension("predict", self.n_input, input.len()));
        }
        if output.len() < self.n_output {
            return Err(DrmError::dimension("predict", self.n_output, output.len()));
        }
        self.set_inputs(input);
        self.forward_no_derivative();
        let first = self.first_output_neuron();
        output[..self.n_output].copy_from_slice(&self.y[first..first + self.n_output]);
        Ok(())
    }

    /// Mean batch error over a dataset without touching the weights.
    pub fn evaluate(&mut self, data: &DataCollection) -> Result<f64> {
        self.check_data(data)?;
        let n_pair = data.n_pair();
        let first = self.first_output_neuron();
        let mut input = vec![0.0; self.n_input];
        let mut total = 0.0;
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
            total += pair / 2.0;
        }
        Ok(total / n_pair as f64)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DerivativeOrder {
    None,
    First,
    Second,
}

trait SignumOrZero {
    fn signum_or_zero(self) -> f64;
}

impl SignumOrZero for f64 {
    /// signum with sign(0) = 0, unlike `f64::signum`
    fn signum_or_zero(self) -> f64 {
        if self > 0.0 {
            1.0
        } else if self < 0.0 {
            -1.0
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn rng() -> SmallRng {
        SmallRng::seed_from_u64(7)
    }

    fn xor_data() -> DataCollection {
        let mut dc = DataCollection::new(4, 2, 1);
        let rows = [
            [-1.0, -1.0, -1.0],
            [-1.0, 1.0, 1.0],
            [1.0, -1.0, 1.0],
            [1.0, 1.0, -1.0],
        ];
        for (i, row) in rows.iter().enumerate() {
            for (j, v) in row.iter().enumerate() {
                dc.data[(i, j)] = *v;
            }
        }
        dc
    }

    #[test]
    fn topology_counts_match_dense_bipartite_structure() {
        let net = NeuralNetwork::new(3, 2, &[4], &mut rng()).unwrap();
        // (3+1)*4 + (4+1)*2 connections, 3+1 + 4+1 + 2+1 neurons
        assert_eq!(net.n_connection(), 26);
        assert_eq!(net.n_neuron, 12);
        assert_eq!(net.hidden_neuron_count(), 4);
    }

    #[test]
    fn bias_neurons_stay_at_one() {
        let mut net = NeuralNetwork::new(2, 1, &[3], &mut rng()).unwrap();
        net.set_inputs(&[0.3, -0.7]);
        net.forward();
        // Bias of input layer and of hidden layer
        assert_eq!(net.y[2], 1.0);
        assert_eq!(net.y[6], 1.0);
    }

    #[test]
    fn gradient_matches_finite_difference() {
        let mut net = NeuralNetwork::new(2, 1, &[3], &mut rng()).unwrap();
        let input = [0.4, -0.2];
        let target = [0.7];
        net.clear_gradients();
        net.set_inputs(&input);
        net.forward();
        net.backward(&target);
        let analytic = net.grad_new.clone();

        let eps = 1e-6;
        for conn in 0..net.n_connection() {
            let saved = net.weight[conn];
            net.weight[conn] = saved + eps;
            net.set_inputs(&input);
            net.forward_no_derivative();
            let first = net.first_output_neuron();
            let err_plus = 0.5 * (target[0] - net.y[first]).powi(2);
            net.weight[conn] = saved - eps;
            net.set_inputs(&input);
            net.forward_no_derivative();
            let err_minus = 0.5 * (target[0] - net.y[first]).powi(2);
            net.weight[conn] = saved;
            let numeric = (err_plus - err_minus) / (2.0 * eps);
            assert!(
                (analytic[conn] - numeric).abs() < 1e-6,
                "connection {}: analytic {} numeric {}",
                conn,
                analytic[conn],
                numeric
            );
        }
    }

    #[test]
    fn rprop_learns_xor() {
        let mut net = NeuralNetwork::new(2, 1, &[6], &mut rng()).unwrap();
        net.train_method = TrainMethod::Rprop;
        net.max_epochs = 3000;
        net.stop_error = 1e-4;
        let data = xor_data();
        let summary = net.train(&data).unwrap();
        assert!(summary.mean_error < 1e-2, "mean error {}", summary.mean_error);
    }

    #[test]
    fn irprop_learns_xor() {
        let mut net = NeuralNetwork::new(2, 1, &[6], &mut rng()).unwrap();
        net.train_method = TrainMethod::IRpropPlus;
        net.max_epochs = 3000;
        net.stop_error = 1e-4;
        let data = xor_data();
        let summary = net.train(&data).unwrap();
        assert!(summary.mean_error < 1e-2, "mean error {}", summary.mean_error);
    }

    #[test]
    fn classical_online_training_descends() {
        let mut net = NeuralNetwork::new(1, 1, &[2], &mut rng()).unwrap();
        net.hidden_activation = Activation::Linear;
        net.train_method = TrainMethod::Classical;
        net.learning_rate = 0.05;
        net.max_epochs = 2000;
        let mut dc = DataCollection::new(8, 1, 1);
        for i in 0..8 {
            let x = (i as f64 - 3.5) / 3.5;
            dc.data[(i, 0)] = x;
            dc.data[(i, 1)] = -x + 0.25;
        }
        let before = net.evaluate(&dc).unwrap();
        let summary = net.train(&dc).unwrap();
        assert!(summary.mean_error < before);
        assert!(summary.mean_error < 1e-2, "mean error {}", summary.mean_error);
    }

    #[test]
    fn linear_network_reproduces_linear_map() {
        let mut net = NeuralNetwork::new(1, 1, &[2], &mut rng()).unwrap();
        net.hidden_activation = Activation::Linear;
        net.max_epochs = 3000;
        let mut dc = DataCollection::new(9, 1, 1);
        for i in 0..9 {
            let x = (i as f64 - 4.0) / 4.0;
            dc.data[(i, 0)] = x;
            dc.data[(i, 1)] = 2.0 * x + 0.5;
        }
        let summary = net.train(&dc).unwrap();
        assert!(summary.mean_error < 1e-4, "mean error {}", summary.mean_error);
        let mut out = [0.0];
        net.predict(&[0.25], &mut out).unwrap();
        assert!((out[0] - 1.0).abs() < 0.05);
    }

    #[test]
    fn scaling_round_trips_through_network_channels() {
        let mut net = NeuralNetwork::new(2, 1, &[2], &mut rng()).unwrap();
        let mut dc = DataCollection::new(6, 2, 1);
        for i in 0..6 {
            dc.data[(i, 0)] = 10.0 + i as f64;
            dc.data[(i, 1)] = -5.0 * i as f64;
            dc.data[(i, 2)] = 100.0 + 2.0 * i as f64;
        }
        net.fit_scaling(&dc).unwrap();
        let mut input = [12.0, -10.0];
        net.scale_input(&mut input);
        let mut output = [0.5];
        net.unscale_output(&mut output);
        // Unscale is the inverse of the scaling applied to targets
        let mean_out = net.mean[2];
        let sigma_out = net.sigma[2];
        assert!((output[0] - (0.5 * sigma_out + mean_out)).abs() < 1e-12);
    }

    #[test]
    fn first_layer_weight_extraction_matches_layout() {
        let mut net = NeuralNetwork::new(3, 1, &[2], &mut rng()).unwrap();
        for (i, w) in net.weight.iter_mut().enumerate() {
            *w = i as f64;
        }
        let block = net.first_layer_weights();
        assert_eq!(block.nrows(), 2);
        assert_eq!(block.ncols(), 3);
        // Second hidden neuron's weights start after the full (n_in+1) stride
        assert_eq!(block[(1, 0)], 4.0);
        assert_eq!(block[(1, 2)], 6.0);
    }
}
