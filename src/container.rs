//! D-RM container: data ownership, build orchestration, export
//!
//! The container owns the identification data and every per-output model.
//! `build` scales the data once, then runs the per-output DABNet pipeline
//! (or the single NARMA training) with one seeded generator so a given seed
//! reproduces the whole build. A numerical failure in one output's build
//! aborts the build with that output's error; training non-convergence is
//! soft and only logged.

use crate::config::{DabnetOptions, NarmaOptions, OutputModelOptions};
use crate::data::DataCollection;
use crate::error::{DrmError, Result};
use crate::io;
use crate::model::{Dabnet, DabnetModel, Narma};
use crate::statespace::LaguerreSpec;
use log::info;
use nalgebra::DMatrix;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::io::Write;

/// Supported model families
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    /// Laguerre-filtered inputs feeding a static nonlinear map, reduced by
    /// balanced truncation
    Dabnet,
    /// Windowed auto-regressive network
    Narma,
}

/// Container orchestrating a D-RM build
pub struct DrmContainer {
    kind: ModelKind,
    n_in: usize,
    n_out: usize,
    data: DataCollection,
    dabnet_options: DabnetOptions,
    output_options: Vec<OutputModelOptions>,
    /// Per-(output, input) filter parameters, output-major
    filter_specs: Vec<LaguerreSpec>,
    narma_options: NarmaOptions,
    models: Vec<DabnetModel>,
    narma: Option<Narma>,
    state_mean: Vec<f64>,
    state_sigma: Vec<f64>,
    built: bool,
}

impl DrmContainer {
    /// Create an empty container for the given model kind and plant shape.
    pub fn new(kind: ModelKind, n_in: usize, n_out: usize) -> Result<Self> {
        if n_in == 0 || n_out == 0 {
            return Err(DrmError::invalid(
                "container needs at least one input and one output",
            ));
        }
        Ok(Self {
            kind,
            n_in,
            n_out,
            data: DataCollection::new(0, n_in, n_out),
            dabnet_options: DabnetOptions::default(),
            output_options: vec![OutputModelOptions::default(); n_out],
            filter_specs: vec![LaguerreSpec::default(); n_out * n_in],
            narma_options: NarmaOptions::default(),
            models: Vec::new(),
            narma: None,
            state_mean: Vec::new(),
            state_sigma: Vec::new(),
            built: false,
        })
    }

    /// Load identification data from the column-major interleaved training
    /// tensor: all samples of column 0, then column 1, and so on.
    pub fn load_column_major(&mut self, n_pair: usize, tensor: &[f64]) -> Result<()> {
        if n_pair == 0 {
            return Err(DrmError::invalid("training tensor has no rows"));
        }
        self.data = DataCollection::new(n_pair, self.n_in, self.n_out);
        self.data.load_column_major(n_pair, tensor)
    }

    /// Options shared by every DABNet output build.
    pub fn set_dabnet_options(&mut self, options: DabnetOptions) {
        self.dabnet_options = options;
    }

    /// Per-output model options; one entry per output.
    pub fn set_output_options(&mut self, options: Vec<OutputModelOptions>) -> Result<()> {
        if options.len() != self.n_out {
            return Err(DrmError::dimension("output options", self.n_out, options.len()));
        }
        self.output_options = options;
        Ok(())
    }

    /// Per-(output, input) filter parameters, output-major; one entry per
    /// output/input pair.
    pub fn set_filter_options(&mut self, specs: Vec<LaguerreSpec>) -> Result<()> {
        if specs.len() != self.n_out * self.n_in {
            return Err(DrmError::dimension(
                "filter options",
                self.n_out * self.n_in,
                specs.len(),
            ));
        }
        self.filter_specs = specs;
        Ok(())
    }

    /// NARMA model options.
    pub fn set_narma_options(&mut self, options: NarmaOptions) {
        self.narma_options = options;
    }

    /// Identification data, scaled in place once built.
    pub fn data(&self) -> &DataCollection {
        &self.data
    }

    /// Finished per-output DABNet models.
    pub fn models(&self) -> &[DabnetModel] {
        &self.models
    }

    /// Scale the data and build every output's model. Deterministic for a
    /// given seed.
    pub fn build(&mut self, seed: u64) -> Result<()> {
        if self.built {
            return Err(DrmError::invalid("container has already been built"));
        }
        if self.data.n_pair() == 0 {
            return Err(DrmError::invalid("no identification data loaded"));
        }
        let mut rng = SmallRng::seed_from_u64(seed);
        self.data.compute_mean_sigma();
        self.data.scale_inputs();
        self.data.scale_outputs();
        info!(
            "starting D-RM generation over {} pairs, {} inputs, {} outputs",
            self.data.n_pair(),
            self.n_in,
            self.n_out
        );
        match self.kind {
            ModelKind::Dabnet => {
                let inputs: DMatrix<f64> = self.data.data.columns(0, self.n_in).into_owned();
                for j in 0..self.n_out {
                    info!("building DABNet model for output {}", j);
                    let specs = self.filter_specs[j * self.n_in..(j + 1) * self.n_in].to_vec();
                    let mut dabnet = Dabnet::new(
                        j,
                        specs,
                        &self.output_options[j],
                        &self.dabnet_options,
                        &self.data,
                    )?;
                    dabnet.run(&mut rng)?;
                    let (mean, sigma) = dabnet.reduced_state_stats(&inputs)?;
                    self.state_mean.extend(mean.iter());
                    self.state_sigma.extend(sigma.iter());
                    self.models.push(dabnet.finish()?);
                }
            }
            ModelKind::Narma => {
                info!("building NARMA model");
                let mut narma = Narma::new(self.n_in, self.n_out, self.narma_options.clone())?;
                narma.train(&self.data, &mut rng)?;
                self.narma = Some(narma);
            }
        }
        self.built = true;
        info!("D-RM has been generated");
        Ok(())
    }

    /// Per-reduced-state-variable mean and σ, concatenated over outputs.
    pub fn reduced_state_stats(&self) -> (&[f64], &[f64]) {
        (&self.state_mean, &self.state_sigma)
    }

    /// Projection of all results for downstream consumption.
    pub fn export(&self) -> Result<DrmExport> {
        if !self.built {
            return Err(DrmError::invalid("container has not been built"));
        }
        let dabnet = match self.kind {
            ModelKind::Dabnet => {
                let poles = self
                    .models
                    .iter()
                    .flat_map(|m| m.specs.iter().map(|s| (s.pole, s.pole2)))
                    .collect();
                Some(DabnetExport {
                    outputs: self.models.clone(),
                    state_mean: self.state_mean.clone(),
                    state_sigma: self.state_sigma.clone(),
                    poles,
                })
            }
            ModelKind::Narma => None,
        };
        let narma = match (&self.kind, &self.narma) {
            (ModelKind::Narma, Some(narma)) => {
                let ann = narma
                    .ann
                    .clone()
                    .ok_or_else(|| DrmError::invalid("NARMA network has not been trained"))?;
                Some(NarmaExport {
                    n_in: narma.n_input,
                    n_out: narma.n_output,
                    history: narma.options.history,
                    ann,
                })
            }
            _ => None,
        };
        Ok(DrmExport {
            kind: self.kind,
            n_in: self.n_in,
            n_out: self.n_out,
            input_mean: self.data.mean.as_slice()[..self.n_in].to_vec(),
            input_sigma: self.data.sigma.as_slice()[..self.n_in].to_vec(),
            output_mean: self.data.mean.as_slice()[self.n_in..].to_vec(),
            output_sigma: self.data.sigma.as_slice()[self.n_in..].to_vec(),
            dabnet,
            narma,
        })
    }

    /// Legacy textual export: scaling header, then per output the reduced
    /// state-space matrices and the reduced network.
    pub fn write_text<W: Write>(&self, writer: &mut W) -> Result<()> {
        if !self.built {
            return Err(DrmError::invalid("container has not been built"));
        }
        writeln!(writer, "{}\t//number of input variables", self.n_in)?;
        writeln!(writer, "{}\t//number of output variables", self.n_out)?;
        writeln!(writer, "//mean of training input data")?;
        write_row(writer, &self.data.mean.as_slice()[..self.n_in])?;
        writeln!(writer, "//standard deviation of training input data")?;
        write_row(writer, &self.data.sigma.as_slice()[..self.n_in])?;
        writeln!(writer, "//mean of training output data")?;
        write_row(writer, &self.data.mean.as_slice()[self.n_in..])?;
        writeln!(writer, "//standard deviation of training output data")?;
        write_row(writer, &self.data.sigma.as_slice()[self.n_in..])?;
        match self.kind {
            ModelKind::Dabnet => {
                for model in &self.models {
                    writeln!(writer, "{}\t//number of input variables", model.n_input)?;
                    writeln!(writer, "1\t//number of output variables")?;
                    writeln!(writer, "//list of matrices")?;
                    for filter in &model.reduced_filters {
                        io::write_state_space(writer, filter)?;
                    }
                    writeln!(writer, "//neural network data")?;
                    io::write_network(writer, &model.ann_reduced)?;
                }
            }
            ModelKind::Narma => {
                let narma = self
                    .narma
                    .as_ref()
                    .and_then(|n| n.ann.as_ref())
                    .ok_or_else(|| DrmError::invalid("NARMA network has not been trained"))?;
                writeln!(writer, "//neural network data")?;
                io::write_network(writer, narma)?;
            }
        }
        Ok(())
    }
}

fn write_row<W: Write>(writer: &mut W, values: &[f64]) -> Result<()> {
    let row: Vec<String> = values.iter().map(|v| v.to_string()).collect();
    writeln!(writer, "{}", row.join("\t"))?;
    Ok(())
}

/// Projection of a finished build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrmExport {
    /// Model family
    pub kind: ModelKind,
    /// Number of plant inputs
    pub n_in: usize,
    /// Number of plant outputs
    pub n_out: usize,
    /// Mean of each input channel
    pub input_mean: Vec<f64>,
    /// σ of each input channel
    pub input_sigma: Vec<f64>,
    /// Mean of each output channel
    pub output_mean: Vec<f64>,
    /// σ of each output channel
    pub output_sigma: Vec<f64>,
    /// DABNet results, present for [`ModelKind::Dabnet`]
    pub dabnet: Option<DabnetExport>,
    /// NARMA results, present for [`ModelKind::Narma`]
    pub narma: Option<NarmaExport>,
}

/// DABNet side of the export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DabnetExport {
    /// Per-output models: filters, networks, filter parameters
    pub outputs: Vec<DabnetModel>,
    /// Reduced state means, concatenated over outputs
    pub state_mean: Vec<f64>,
    /// Reduced state σ, concatenated over outputs
    pub state_sigma: Vec<f64>,
    /// Final (fast, slow) pole values per (output, input), output-major
    pub poles: Vec<(f64, f64)>,
}

/// NARMA side of the export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarmaExport {
    /// Number of plant inputs
    pub n_in: usize,
    /// Number of plant outputs
    pub n_out: usize,
    /// History window length
    pub history: usize,
    /// Trained network
    pub ann: crate::ann::NeuralNetwork,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_tensor(n_pair: usize) -> Vec<f64> {
        let mut u = Vec::with_capacity(n_pair);
        let mut y = Vec::with_capacity(n_pair);
        let mut state = 0.0;
        for k in 0..n_pair {
            let input = if k < n_pair / 2 { 0.2 } else { 0.8 };
            state = 0.7 * state + 0.3 * input;
            u.push(input);
            y.push(state);
        }
        u.into_iter().chain(y).collect()
    }

    fn small_container() -> DrmContainer {
        let mut container = DrmContainer::new(ModelKind::Dabnet, 1, 1).unwrap();
        container.load_column_major(20, &step_tensor(20)).unwrap();
        let mut options = DabnetOptions::default();
        options.max_iter_bp_laguerre = 300;
        options.max_iter_bp_reduced = 300;
        container.set_dabnet_options(options);
        container
            .set_output_options(vec![OutputModelOptions {
                hidden_neurons: 4,
                ..Default::default()
            }])
            .unwrap();
        container
            .set_filter_options(vec![LaguerreSpec {
                pole: 0.5,
                order: 3,
                two_pole: false,
                ..Default::default()
            }])
            .unwrap();
        container
    }

    #[test]
    fn build_scales_data_and_produces_models() {
        let mut container = small_container();
        container.build(5).unwrap();
        // Scaled columns have zero mean
        let n = container.data().n_pair();
        for j in 0..2 {
            let mean: f64 =
                (0..n).map(|i| container.data().data[(i, j)]).sum::<f64>() / n as f64;
            assert!(mean.abs() < 1e-12);
        }
        assert_eq!(container.models().len(), 1);
        let (mean, sigma) = container.reduced_state_stats();
        assert_eq!(mean.len(), sigma.len());
        assert!(!mean.is_empty());
    }

    #[test]
    fn export_carries_scaling_and_poles() {
        let mut container = small_container();
        container.build(5).unwrap();
        let export = container.export().unwrap();
        assert_eq!(export.n_in, 1);
        assert_eq!(export.n_out, 1);
        let dabnet = export.dabnet.as_ref().unwrap();
        assert_eq!(dabnet.poles.len(), 1);
        assert_eq!(dabnet.poles[0].0, dabnet.outputs[0].specs[0].pole);
        // Export is serde round-trippable
        let text = serde_json::to_string(&export).unwrap();
        let back: DrmExport = serde_json::from_str(&text).unwrap();
        assert_eq!(back.n_in, export.n_in);
    }

    #[test]
    fn double_build_is_rejected() {
        let mut container = small_container();
        container.build(1).unwrap();
        assert!(container.build(1).is_err());
    }

    #[test]
    fn export_before_build_is_rejected() {
        let container = small_container();
        assert!(container.export().is_err());
    }

    #[test]
    fn text_export_mentions_every_block() {
        let mut container = small_container();
        container.build(9).unwrap();
        let mut buffer = Vec::new();
        container.write_text(&mut buffer).unwrap();
        let text = String::from_utf8(buffer).unwrap();
        assert!(text.contains("//number of input variables"));
        assert!(text.contains("//A matrix"));
        assert!(text.contains("//neural network data"));
    }
}
