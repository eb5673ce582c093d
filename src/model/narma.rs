//! NARMA model
//!
//! A single network maps a fixed window of past inputs and past outputs to
//! the next output. The projection clamps the window at the start of the
//! record, so the first rows repeat the initial steady-state samples.

use crate::ann::{NeuralNetwork, TrainMethod, TrainSummary};
use crate::config::NarmaOptions;
use crate::data::DataCollection;
use crate::error::{DrmError, Result};
use nalgebra::{DMatrix, DVector};
use rand::rngs::SmallRng;
use serde::{Deserialize, Serialize};

/// NARMA model over a scaled identification record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Narma {
    /// Number of plant inputs
    pub n_input: usize,
    /// Number of plant outputs
    pub n_output: usize,
    /// Model options
    pub options: NarmaOptions,
    /// Trained network, present after [`Self::train`]
    pub ann: Option<NeuralNetwork>,
}

impl Narma {
    /// Create an untrained model.
    pub fn new(n_input: usize, n_output: usize, options: NarmaOptions) -> Result<Self> {
        if options.history == 0 {
            return Err(DrmError::config_field("history", "must be positive"));
        }
        if options.hidden_neurons == 0 {
            return Err(DrmError::config_field("hidden_neurons", "must be positive"));
        }
        Ok(Self {
            n_input,
            n_output,
            options,
            ann: None,
        })
    }

    /// Network input width: one window per input and output channel.
    pub fn window_width(&self) -> usize {
        (self.n_input + self.n_output) * self.options.history
    }

    /// Project an identification record into windowed training data.
    pub fn project(&self, id_data: &DataCollection) -> Result<DataCollection> {
        if id_data.n_in != self.n_input || id_data.n_out != self.n_output {
            return Err(DrmError::dimension("narma project", self.n_input, id_data.n_in));
        }
        let np = id_data.n_pair();
        if np == 0 {
            return Err(DrmError::invalid("identification dataset is empty"));
        }
        let history = self.options.history;
        let mut ann_data = DataCollection::new(np, self.window_width(), self.n_output);
        for i in 0..np {
            let mut n = 0;
            for j in 0..self.n_input {
                for k in 0..history {
                    let m = (i + k).saturating_sub(history);
                    ann_data.data[(i, n)] = id_data.data[(m, j)];
                    n += 1;
                }
            }
            for j in 0..self.n_output {
                for k in 0..history {
                    let m = (i + k).saturating_sub(history);
                    ann_data.data[(i, n)] = id_data.data[(m, self.n_input + j)];
                    n += 1;
                }
            }
            for j in 0..self.n_output {
                ann_data.data[(i, n)] = id_data.data[(i, self.n_input + j)];
                n += 1;
            }
        }
        Ok(ann_data)
    }

    /// Project and train the network on an already-scaled record.
    pub fn train(&mut self, id_data: &DataCollection, rng: &mut SmallRng) -> Result<TrainSummary> {
        let ann_data = self.project(id_data)?;
        let mut net = NeuralNetwork::new(
            self.window_width(),
            self.n_output,
            &[self.options.hidden_neurons],
            rng,
        )?;
        net.train_method = TrainMethod::Rprop;
        net.max_epochs = self.options.max_iter;
        net.stop_error = 1e-5;
        // The record is already scaled; the network keeps identity scaling
        let summary = net.train(&ann_data)?;
        self.ann = Some(net);
        Ok(summary)
    }

    /// Replay a record, predicting every output from the true history held
    /// in the record itself.
    pub fn predict(&mut self, id_data: &DataCollection) -> Result<DMatrix<f64>> {
        let ann_data = self.project(id_data)?;
        let net = self
            .ann
            .as_mut()
            .ok_or_else(|| DrmError::invalid("NARMA network has not been trained"))?;
        let np = ann_data.n_pair();
        let width = ann_data.n_in;
        let mut out = DMatrix::zeros(np, self.n_output);
        let mut input = vec![0.0; width];
        let mut output = vec![0.0; self.n_output];
        for i in 0..np {
            for j in 0..width {
                input[j] = ann_data.data[(i, j)];
            }
            net.predict(&input, &mut output)?;
            for j in 0..self.n_output {
                out[(i, j)] = output[j];
            }
        }
        Ok(out)
    }

    /// Mean batch error of the trained network over a record.
    pub fn evaluate(&mut self, id_data: &DataCollection) -> Result<f64> {
        let ann_data = self.project(id_data)?;
        let net = self
            .ann
            .as_mut()
            .ok_or_else(|| DrmError::invalid("NARMA network has not been trained"))?;
        net.evaluate(&ann_data)
    }

    /// Residuals of the prediction against the recorded outputs.
    pub fn residuals(&mut self, id_data: &DataCollection) -> Result<DVector<f64>> {
        let predictions = self.predict(id_data)?;
        let np = predictions.nrows();
        let mut res = DVector::zeros(np);
        for i in 0..np {
            let mut sum = 0.0;
            for j in 0..self.n_output {
                let err = id_data.data[(i, self.n_input + j)] - predictions[(i, j)];
                sum += err * err;
            }
            res[i] = sum.sqrt();
        }
        Ok(res)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn record() -> DataCollection {
        let mut dc = DataCollection::new(30, 1, 1);
        let mut y = 0.0;
        for i in 0..30 {
            let u = ((i / 5) % 2) as f64;
            y = 0.5 * y + 0.5 * u;
            dc.data[(i, 0)] = u;
            dc.data[(i, 1)] = y;
        }
        dc
    }

    #[test]
    fn window_clamps_at_record_start() {
        let narma = Narma::new(1, 1, NarmaOptions::default()).unwrap();
        let data = record();
        let ann_data = narma.project(&data).unwrap();
        assert_eq!(ann_data.n_in, 4);
        // Row 0: all history entries clamp to row 0
        assert_eq!(ann_data.data[(0, 0)], data.data[(0, 0)]);
        assert_eq!(ann_data.data[(0, 1)], data.data[(0, 0)]);
        assert_eq!(ann_data.data[(0, 2)], data.data[(0, 1)]);
        // Row 3 with history 2 sees rows 1 and 2
        assert_eq!(ann_data.data[(3, 0)], data.data[(1, 0)]);
        assert_eq!(ann_data.data[(3, 1)], data.data[(2, 0)]);
        // Target is the current row's output
        assert_eq!(ann_data.data[(3, 4)], data.data[(3, 1)]);
    }

    #[test]
    fn trains_and_predicts_first_order_plant() {
        let mut narma = Narma::new(
            1,
            1,
            NarmaOptions {
                history: 2,
                hidden_neurons: 6,
                max_iter: 2000,
            },
        )
        .unwrap();
        let data = record();
        let mut rng = SmallRng::seed_from_u64(2);
        let summary = narma.train(&data, &mut rng).unwrap();
        assert!(summary.mean_error < 1e-2, "mean error {}", summary.mean_error);
        let predictions = narma.predict(&data).unwrap();
        assert_eq!(predictions.nrows(), 30);
        // Later rows, past the clamped window, track the plant closely
        let err = narma.evaluate(&data).unwrap();
        assert!(err < 1e-2);
        let residuals = narma.residuals(&data).unwrap();
        assert_eq!(residuals.len(), 30);
        assert!(residuals.iter().all(|r| r.is_finite() && *r >= 0.0));
    }
}
