//! Per-output DABNet assembly
//!
//! One [`Dabnet`] builds the model of a single output: it owns the per-input
//! Laguerre filters, projects the identification data through them into
//! state trajectories, trains the Laguerre network, reduces every filter by
//! balanced truncation against the trained first-layer weights, and trains
//! the reduced network on the re-projected data. The identification data and
//! the shared options are borrowed from the container for the duration of
//! the build.

use crate::ann::{
    train_second_order, Activation, AnnBatchProblem, NeuralNetwork, NewtonOptions, TrainMethod,
};
use crate::config::{DabnetOptions, OutputModelOptions, PoleOptimization, TrainingMethod};
use crate::data::DataCollection;
use crate::error::{DrmError, Result};
use crate::simplex::{self, SimplexOptions};
use crate::statespace::{reduce_balanced, scaled_weight_matrix, LaguerreSpec, StateSpace};
use log::{info, warn};
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

/// Uniform starting weight of the reduced network's second-order path.
const REDUCED_NEWTON_INIT_WEIGHT: f64 = 0.2;

/// Pole search box of the Simplex optimization.
const POLE_MIN: f64 = 0.001;
const POLE_MAX: f64 = 0.9999;
const POLE_OFFSET: f64 = 0.1;

/// Builder for one output's DABNet model
pub struct Dabnet<'a> {
    n_input: usize,
    output_index: usize,
    specs: Vec<LaguerreSpec>,
    output_options: &'a OutputModelOptions,
    options: &'a DabnetOptions,
    /// Scaled identification data, rows of (u(k), y(k+1))
    id_data: &'a DataCollection,
    laguerre_filters: Vec<StateSpace>,
    reduced_filters: Vec<StateSpace>,
    ann_laguerre: Option<NeuralNetwork>,
    ann_reduced: Option<NeuralNetwork>,
    n_state_laguerre: usize,
    n_state_reduced: usize,
}

/// Finished per-output model, detached from the builder borrows
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DabnetModel {
    /// Number of plant inputs
    pub n_input: usize,
    /// Index of the modeled output
    pub output_index: usize,
    /// Filter parameters after any pole optimization
    pub specs: Vec<LaguerreSpec>,
    /// Per-input unbalanced Laguerre filters
    pub laguerre_filters: Vec<StateSpace>,
    /// Per-input reduced filters
    pub reduced_filters: Vec<StateSpace>,
    /// Network over the Laguerre states
    pub ann_laguerre: NeuralNetwork,
    /// Network over the reduced states
    pub ann_reduced: NeuralNetwork,
}

impl<'a> Dabnet<'a> {
    /// Create a builder for the given output.
    pub fn new(
        output_index: usize,
        specs: Vec<LaguerreSpec>,
        output_options: &'a OutputModelOptions,
        options: &'a DabnetOptions,
        id_data: &'a DataCollection,
    ) -> Result<Self> {
        let n_input = id_data.n_in;
        if specs.len() != n_input {
            return Err(DrmError::dimension("dabnet specs", n_input, specs.len()));
        }
        if output_index >= id_data.n_out {
            return Err(DrmError::invalid(format!(
                "output index {} out of range for {} outputs",
                output_index, id_data.n_out
            )));
        }
        if output_options.hidden_neurons == 0 {
            return Err(DrmError::config_field("hidden_neurons", "must be positive"));
        }
        Ok(Self {
            n_input,
            output_index,
            specs,
            output_options,
            options,
            id_data,
            laguerre_filters: Vec::new(),
            reduced_filters: Vec::new(),
            ann_laguerre: None,
            ann_reduced: None,
            n_state_laguerre: 0,
            n_state_reduced: 0,
        })
    }

    /// Run the full per-output pipeline: filters, optional pole
    /// optimization, Laguerre training, reduction, reduced training.
    pub fn run(&mut self, rng: &mut SmallRng) -> Result<()> {
        self.build_filters()?;
        let n_pole = self.pole_count();
        if n_pole > 0 {
            info!("optimizing {} Laguerre poles for output {}", n_pole, self.output_index);
            self.optimize_poles(rng)?;
        } else {
            let mut ann_data = self.project_laguerre_data()?;
            self.train_laguerre(&mut ann_data, rng)?;
        }
        info!("reducing order of state space through balanced realization");
        self.reduce()?;
        info!(
            "numbers of reduced state-space variables are [{}]",
            self.reduced_filters
                .iter()
                .map(|f| f.order().to_string())
                .collect::<Vec<_>>()
                .join(" ")
        );
        let mut ann_data = self.project_reduced_data()?;
        self.train_reduced(&mut ann_data, rng)?;
        Ok(())
    }

    /// Rebuild the Laguerre filter list from the current specs.
    pub fn build_filters(&mut self) -> Result<()> {
        let mut filters = Vec::with_capacity(self.n_input);
        let mut total = 0;
        for spec in &self.specs {
            let filter = spec.build()?;
            total += filter.order();
            filters.push(filter);
        }
        self.laguerre_filters = filters;
        self.n_state_laguerre = total;
        Ok(())
    }

    /// Number of poles the configured optimization mode varies.
    fn pole_count(&self) -> usize {
        let slow = self.specs.iter().filter(|s| s.two_pole).count();
        match self.output_options.pole_optimization {
            PoleOptimization::None => 0,
            PoleOptimization::Both => self.n_input + slow,
            PoleOptimization::Fast => self.n_input,
            PoleOptimization::Slow => slow,
        }
    }

    fn gather_poles(&self) -> Vec<f64> {
        let mode = self.output_options.pole_optimization;
        let mut poles = Vec::new();
        if matches!(mode, PoleOptimization::Both | PoleOptimization::Fast) {
            poles.extend(self.specs.iter().map(|s| s.pole));
        }
        if matches!(mode, PoleOptimization::Both | PoleOptimization::Slow) {
            poles.extend(self.specs.iter().filter(|s| s.two_pole).map(|s| s.pole2));
        }
        poles
    }

    fn assign_poles(specs: &mut [LaguerreSpec], mode: PoleOptimization, values: &[f64]) {
        let mut k = 0;
        if matches!(mode, PoleOptimization::Both | PoleOptimization::Fast) {
            for spec in specs.iter_mut() {
                spec.pole = values[k];
                k += 1;
            }
        }
        if matches!(mode, PoleOptimization::Both | PoleOptimization::Slow) {
            for spec in specs.iter_mut().filter(|s| s.two_pole) {
                spec.pole2 = values[k];
                k += 1;
            }
        }
    }

    /// Simplex search over the selected pole subset. Every objective call
    /// rebuilds the filters, re-projects the data and retrains the Laguerre
    /// network, returning its mean batch error.
    fn optimize_poles(&mut self, rng: &mut SmallRng) -> Result<()> {
        let initial = self.gather_poles();
        let n = initial.len();
        let offsets = vec![POLE_OFFSET; n];
        let lower = vec![POLE_MIN; n];
        let upper = vec![POLE_MAX; n];
        let mode = self.output_options.pole_optimization;

        let mut trial_error: Result<()> = Ok(());
        {
            let builder = &mut *self;
            let trial_error = &mut trial_error;
            let rng = &mut *rng;
            let mut objective = move |poles: &[f64]| -> f64 {
                // Track only the most recent trial: simplex re-evaluates the
                // best vertex last, so this reflects the returned point
                *trial_error = Ok(());
                Self::assign_poles(&mut builder.specs, mode, poles);
                let attempt = (|| -> Result<f64> {
                    builder.build_filters()?;
                    let mut ann_data = builder.project_laguerre_data()?;
                    builder.train_laguerre(&mut ann_data, rng)
                })();
                match attempt {
                    Ok(error) => error,
                    Err(err) => {
                        warn!("pole trial failed: {}", err);
                        *trial_error = Err(err);
                        f64::INFINITY
                    }
                }
            };
            let result = simplex::optimize(
                &initial,
                &offsets,
                &lower,
                &upper,
                SimplexOptions::default(),
                &mut objective,
            )?;
            info!(
                "optimized Laguerre pole values are [{}] after {} iterations",
                result
                    .best
                    .iter()
                    .map(|p| format!("{:.6}", p))
                    .collect::<Vec<_>>()
                    .join(" "),
                result.iterations
            );
        }
        // A failed trial leaves the model without usable filters; the last
        // objective call above already rebuilt and retrained at the best point
        trial_error
    }

    /// Project the identification data through the Laguerre filters.
    ///
    /// Filters start at the steady state of the first input row. Each row
    /// records the current states x(k) and then steps the filter with u(k),
    /// pairing x(k) with the response y(k+1) held in the same row.
    pub fn project_laguerre_data(&mut self) -> Result<DataCollection> {
        let filters = &mut self.laguerre_filters;
        project(filters, self.id_data, self.output_index, self.n_state_laguerre)
    }

    /// Project the identification data through the reduced filters.
    pub fn project_reduced_data(&mut self) -> Result<DataCollection> {
        let filters = &mut self.reduced_filters;
        project(filters, self.id_data, self.output_index, self.n_state_reduced)
    }

    /// Train the Laguerre network; returns the mean batch error.
    pub fn train_laguerre(
        &mut self,
        ann_data: &mut DataCollection,
        rng: &mut SmallRng,
    ) -> Result<f64> {
        let mut net = NeuralNetwork::new(
            self.n_state_laguerre,
            1,
            &[self.output_options.hidden_neurons],
            rng,
        )?;
        if self.output_options.linear_network {
            net.hidden_activation = Activation::Linear;
        }
        if self.options.scale_laguerre_data {
            net.fit_scaling(ann_data)?;
            net.scale_data(ann_data)?;
        } else {
            net.reset_scaling();
        }
        let error = match self.options.laguerre_training {
            TrainingMethod::Rprop => {
                net.init_uniform_weights(self.options.weight_init);
                net.train_method = TrainMethod::Rprop;
                net.max_epochs = self.options.max_iter_bp_laguerre;
                net.stop_error = 1e-5;
                net.train(ann_data)?.mean_error
            }
            TrainingMethod::SecondOrder => {
                let n_pair = ann_data.n_pair();
                let mut problem =
                    AnnBatchProblem::new(&mut net, ann_data, self.options.weight_init);
                let summary = train_second_order(
                    &mut problem,
                    NewtonOptions {
                        max_iter: self.options.max_iter_newton_laguerre,
                        tol: 1e-5,
                    },
                )?;
                summary.objective / n_pair as f64
            }
        };
        self.ann_laguerre = Some(net);
        Ok(error)
    }

    /// Train the reduced network; returns the mean batch error.
    pub fn train_reduced(
        &mut self,
        ann_data: &mut DataCollection,
        rng: &mut SmallRng,
    ) -> Result<f64> {
        let mut net = NeuralNetwork::new(
            self.n_state_reduced,
            1,
            &[self.output_options.hidden_neurons],
            rng,
        )?;
        if self.output_options.linear_network {
            net.hidden_activation = Activation::Linear;
        }
        if self.options.scale_reduced_data {
            net.fit_scaling(ann_data)?;
            net.scale_data(ann_data)?;
        } else {
            net.reset_scaling();
        }
        let error = match self.options.reduced_training {
            TrainingMethod::Rprop => {
                net.train_method = TrainMethod::Rprop;
                net.max_epochs = self.options.max_iter_bp_reduced;
                net.stop_error = 1e-5;
                net.train(ann_data)?.mean_error
            }
            TrainingMethod::SecondOrder => {
                let n_pair = ann_data.n_pair();
                let mut problem =
                    AnnBatchProblem::new(&mut net, ann_data, REDUCED_NEWTON_INIT_WEIGHT);
                let summary = train_second_order(
                    &mut problem,
                    NewtonOptions {
                        max_iter: self.options.max_iter_newton_reduced,
                        tol: 1e-5,
                    },
                )?;
                summary.objective / n_pair as f64
            }
        };
        self.ann_reduced = Some(net);
        Ok(error)
    }

    /// Per-input first-layer weight blocks of the trained Laguerre network,
    /// column-scaled by the σ that network recorded during training.
    fn weight_matrices(&self) -> Result<Vec<DMatrix<f64>>> {
        let net = self
            .ann_laguerre
            .as_ref()
            .ok_or_else(|| DrmError::invalid("Laguerre network has not been trained"))?;
        let full = net.first_layer_weights();
        let sigma = net.input_sigma();
        let mut blocks = Vec::with_capacity(self.n_input);
        let mut state = 0;
        for filter in &self.laguerre_filters {
            let n = filter.order();
            let block = full.columns(state, n).into_owned();
            blocks.push(scaled_weight_matrix(
                &block,
                &sigma[state..state + n],
                self.options.scale_laguerre_data,
            ));
            state += n;
        }
        Ok(blocks)
    }

    /// Balanced reduction of every Laguerre filter against the trained
    /// weights. A Gramian failure aborts this output's build.
    pub fn reduce(&mut self) -> Result<()> {
        let blocks = self.weight_matrices()?;
        let mut reduced = Vec::with_capacity(self.n_input);
        let mut total = 0;
        for (filter, block) in self.laguerre_filters.iter().zip(blocks.iter()) {
            let reduction = reduce_balanced(filter, block)?;
            total += reduction.kept;
            reduced.push(reduction.state_space);
        }
        self.reduced_filters = reduced;
        self.n_state_reduced = total;
        Ok(())
    }

    /// Replay scaled input rows through the Laguerre model.
    pub fn predict_laguerre(&mut self, inputs: &DMatrix<f64>) -> Result<DVector<f64>> {
        let net = self
            .ann_laguerre
            .as_mut()
            .ok_or_else(|| DrmError::invalid("Laguerre network has not been trained"))?;
        predict(
            &mut self.laguerre_filters,
            net,
            inputs,
            self.n_state_laguerre,
            self.options.scale_laguerre_data,
        )
    }

    /// Replay scaled input rows through whichever model the options select
    /// for prediction.
    pub fn predict(&mut self, inputs: &DMatrix<f64>) -> Result<DVector<f64>> {
        if self.options.predict_reduced {
            self.predict_reduced(inputs)
        } else {
            self.predict_laguerre(inputs)
        }
    }

    /// Replay scaled input rows through the reduced model.
    pub fn predict_reduced(&mut self, inputs: &DMatrix<f64>) -> Result<DVector<f64>> {
        let net = self
            .ann_reduced
            .as_mut()
            .ok_or_else(|| DrmError::invalid("reduced network has not been trained"))?;
        predict(
            &mut self.reduced_filters,
            net,
            inputs,
            self.n_state_reduced,
            self.options.scale_reduced_data,
        )
    }

    /// Mean and sample σ of every reduced state variable over a replay of
    /// the given input rows.
    pub fn reduced_state_stats(
        &mut self,
        inputs: &DMatrix<f64>,
    ) -> Result<(DVector<f64>, DVector<f64>)> {
        let n_state = self.n_state_reduced;
        let np = inputs.nrows();
        let mut mean: DVector<f64> = DVector::zeros(n_state);
        replay(&mut self.reduced_filters, inputs, |states| {
            for (i, s) in states.iter().enumerate() {
                mean[i] += s;
            }
        })?;
        mean /= np as f64;
        let mut sigma: DVector<f64> = DVector::zeros(n_state);
        replay(&mut self.reduced_filters, inputs, |states| {
            for (i, s) in states.iter().enumerate() {
                let dx = s - mean[i];
                sigma[i] += dx * dx;
            }
        })?;
        let denom = if np <= 1 { 1 } else { np - 1 };
        for i in 0..n_state {
            sigma[i] = (sigma[i] / denom as f64).sqrt();
        }
        Ok((mean, sigma))
    }

    /// Detach the finished model from the builder.
    pub fn finish(self) -> Result<DabnetModel> {
        let ann_laguerre = self
            .ann_laguerre
            .ok_or_else(|| DrmError::invalid("Laguerre network has not been trained"))?;
        let ann_reduced = self
            .ann_reduced
            .ok_or_else(|| DrmError::invalid("reduced network has not been trained"))?;
        Ok(DabnetModel {
            n_input: self.n_input,
            output_index: self.output_index,
            specs: self.specs,
            laguerre_filters: self.laguerre_filters,
            reduced_filters: self.reduced_filters,
            ann_laguerre,
            ann_reduced,
        })
    }
}

/// Project identification rows through a filter bank into network training
/// data: row k holds the pre-step states x(k) and the response y(k+1).
fn project(
    filters: &mut [StateSpace],
    id_data: &DataCollection,
    output_index: usize,
    n_state: usize,
) -> Result<DataCollection> {
    let np = id_data.n_pair();
    if np == 0 {
        return Err(DrmError::invalid("identification dataset is empty"));
    }
    let n_in = id_data.n_in;
    let mut ann_data = DataCollection::new(np, n_state, 1);
    for (j, filter) in filters.iter_mut().enumerate() {
        filter.init_steady_state(id_data.data[(0, j)])?;
    }
    for i in 0..np {
        let mut n = 0;
        for (j, filter) in filters.iter_mut().enumerate() {
            for k in 0..filter.order() {
                ann_data.data[(i, n)] = filter.x[k];
                n += 1;
            }
            filter.step(id_data.data[(i, j)]);
        }
        ann_data.data[(i, n_state)] = id_data.data[(i, n_in + output_index)];
    }
    Ok(ann_data)
}

/// Replay input rows through a filter bank, handing the concatenated
/// pre-step states of each row to `visit`.
fn replay(
    filters: &mut [StateSpace],
    inputs: &DMatrix<f64>,
    mut visit: impl FnMut(&[f64]),
) -> Result<()> {
    let np = inputs.nrows();
    if np == 0 {
        return Err(DrmError::invalid("input dataset is empty"));
    }
    let n_state: usize = filters.iter().map(|f| f.order()).sum();
    let mut states = vec![0.0; n_state];
    for (j, filter) in filters.iter_mut().enumerate() {
        filter.init_steady_state(inputs[(0, j)])?;
    }
    for i in 0..np {
        let mut n = 0;
        for (j, filter) in filters.iter_mut().enumerate() {
            for k in 0..filter.order() {
                states[n] = filter.x[k];
                n += 1;
            }
            filter.step(inputs[(i, j)]);
        }
        visit(&states);
    }
    Ok(())
}

/// Replay input rows through a filter bank and network.
fn predict(
    filters: &mut [StateSpace],
    net: &mut NeuralNetwork,
    inputs: &DMatrix<f64>,
    n_state: usize,
    scaled: bool,
) -> Result<DVector<f64>> {
    let np = inputs.nrows();
    if inputs.ncols() < filters.len() {
        return Err(DrmError::dimension("predict", filters.len(), inputs.ncols()));
    }
    let mut out = DVector::zeros(np);
    let mut ann_input = vec![0.0; n_state];
    let mut ann_output = [0.0];
    let mut row = 0;
    replay(filters, inputs, |states| {
        ann_input.copy_from_slice(states);
        if scaled {
            net.scale_input(&mut ann_input);
        }
        // Output scaling inside the network is identity (mean 0, sigma 1 on
        // the target channel is not refit at prediction time)
        if net.predict(&ann_input, &mut ann_output).is_ok() {
            out[row] = ann_output[0];
        }
        row += 1;
    })?;
    Ok(out)
}
