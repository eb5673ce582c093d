//! Option structures for model builds and sequence generation
//!
//! All options are plain serde structs so hosts can ship them as JSON. The
//! defaults mirror the values the pipeline was tuned with: scaling on, RPROP
//! batch training, small uniform initial weights, and the iteration caps of
//! the two training passes.

use crate::error::{DrmError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

pub use crate::statespace::LaguerreSpec as FilterOptions;

/// Which optimizer trains a network
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingMethod {
    /// Resilient back-propagation in batch mode
    Rprop,
    /// Damped-Newton over the batch objective/gradient/Hessian callbacks
    SecondOrder,
}

/// Which Laguerre poles the Simplex optimizes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoleOptimization {
    /// Keep the user-specified pole values
    None,
    /// Optimize fast and slow poles together
    Both,
    /// Optimize the fast (first) poles only
    Fast,
    /// Optimize the slow (second) poles only
    Slow,
}

/// Options shared by every DABNet output build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DabnetOptions {
    /// Predict through the reduced model rather than the Laguerre model
    pub predict_reduced: bool,
    /// Training method of the Laguerre network
    pub laguerre_training: TrainingMethod,
    /// Training method of the reduced network
    pub reduced_training: TrainingMethod,
    /// Scale the projected state data before Laguerre training
    pub scale_laguerre_data: bool,
    /// Scale the projected state data before reduced training
    pub scale_reduced_data: bool,
    /// Epoch cap for RPROP training of the Laguerre network
    pub max_iter_bp_laguerre: usize,
    /// Epoch cap for RPROP training of the reduced network
    pub max_iter_bp_reduced: usize,
    /// Iteration cap for second-order training of the Laguerre network
    pub max_iter_newton_laguerre: usize,
    /// Iteration cap for second-order training of the reduced network
    pub max_iter_newton_reduced: usize,
    /// Uniform initial weight; small values keep the first-layer weight
    /// matrix well conditioned for balanced reduction
    pub weight_init: f64,
}

impl Default for DabnetOptions {
    fn default() -> Self {
        Self {
            predict_reduced: true,
            laguerre_training: TrainingMethod::Rprop,
            reduced_training: TrainingMethod::Rprop,
            scale_laguerre_data: true,
            scale_reduced_data: true,
            max_iter_bp_laguerre: 5000,
            max_iter_bp_reduced: 10_000,
            max_iter_newton_laguerre: 3000,
            max_iter_newton_reduced: 6000,
            weight_init: 0.01,
        }
    }
}

/// Per-output model options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputModelOptions {
    /// Use a linear hidden layer instead of the symmetric sigmoid
    pub linear_network: bool,
    /// Pole optimization mode for this output
    pub pole_optimization: PoleOptimization,
    /// Hidden neurons, bias excluded
    pub hidden_neurons: usize,
}

impl Default for OutputModelOptions {
    fn default() -> Self {
        Self {
            linear_network: false,
            pole_optimization: PoleOptimization::None,
            hidden_neurons: 10,
        }
    }
}

/// NARMA model options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NarmaOptions {
    /// Window length of past inputs and outputs
    pub history: usize,
    /// Hidden neurons, bias excluded
    pub hidden_neurons: usize,
    /// Epoch cap for batch training
    pub max_iter: usize,
}

impl Default for NarmaOptions {
    fn default() -> Self {
        Self {
            history: 2,
            hidden_neurons: 10,
            max_iter: 10_000,
        }
    }
}

/// One dimension of the excitation space
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DimensionSpec {
    /// Whether this dimension is varied by the sequence
    pub varied: bool,
    /// Value held on non-varied dimensions and in the steady-state prefix
    pub default: f64,
    /// Lower bound of the varied range
    pub lower: f64,
    /// Upper bound of the varied range
    pub upper: f64,
}

/// Inputs of the training-sequence generator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceOptions {
    /// Random seed; a given seed reproduces the sequence exactly
    pub seed: u64,
    /// Append the mirrored reverse sequence
    pub reverse: bool,
    /// LHS points per duration
    pub points: usize,
    /// Steps held at the steady-state prefix
    pub duration0: usize,
    /// Steps held at each point, one entry per duration
    pub durations: Vec<usize>,
    /// All dimensions, varied or not
    pub dims: Vec<DimensionSpec>,
}

impl SequenceOptions {
    /// Number of varied dimensions.
    pub fn varied_count(&self) -> usize {
        self.dims.iter().filter(|d| d.varied).count()
    }

    /// Check ranges and counts before generation.
    pub fn validate(&self) -> Result<()> {
        if self.points < 2 {
            return Err(DrmError::config_field("points", "at least 2 LHS points are required"));
        }
        if self.durations.is_empty() {
            return Err(DrmError::config_field("durations", "at least one duration is required"));
        }
        if self.durations.iter().any(|&d| d == 0) {
            return Err(DrmError::config_field("durations", "step counts must be positive"));
        }
        if self.varied_count() == 0 {
            return Err(DrmError::config_field("dims", "at least one dimension must be varied"));
        }
        for (i, dim) in self.dims.iter().enumerate() {
            if dim.varied && dim.lower >= dim.upper {
                return Err(DrmError::config_field(
                    "dims",
                    &format!("dimension {} has an empty range", i),
                ));
            }
        }
        Ok(())
    }
}

/// Read an options struct from a JSON file.
pub fn from_json_file<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|err| DrmError::IoError {
        message: err.to_string(),
        path: Some(path.display().to_string()),
        source: Some(err),
    })?;
    serde_json::from_reader(BufReader::new(file)).map_err(|err| DrmError::ParseError {
        message: format!("{}: {}", path.display(), err),
    })
}

/// Write an options or export struct to a JSON file.
pub fn to_json_file<T: Serialize>(value: &T, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = File::create(path).map_err(|err| DrmError::IoError {
        message: err.to_string(),
        path: Some(path.display().to_string()),
        source: Some(err),
    })?;
    serde_json::to_writer_pretty(BufWriter::new(file), value).map_err(|err| {
        DrmError::ParseError {
            message: format!("{}: {}", path.display(), err),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_tuned_values() {
        let options = DabnetOptions::default();
        assert_eq!(options.laguerre_training, TrainingMethod::Rprop);
        assert!(options.scale_laguerre_data);
        assert_eq!(options.weight_init, 0.01);
        assert_eq!(options.max_iter_bp_reduced, 10_000);
    }

    #[test]
    fn sequence_options_validation() {
        let mut options = SequenceOptions {
            seed: 0,
            reverse: true,
            points: 3,
            duration0: 5,
            durations: vec![2],
            dims: vec![
                DimensionSpec {
                    varied: true,
                    default: 0.5,
                    lower: 0.0,
                    upper: 1.0,
                },
                DimensionSpec {
                    varied: false,
                    default: 2.0,
                    lower: 0.0,
                    upper: 0.0,
                },
            ],
        };
        assert!(options.validate().is_ok());
        assert_eq!(options.varied_count(), 1);

        options.points = 1;
        assert!(options.validate().is_err());
        options.points = 3;
        options.dims[0].upper = -1.0;
        assert!(options.validate().is_err());
    }

    #[test]
    fn options_round_trip_through_json() {
        let options = DabnetOptions::default();
        let text = serde_json::to_string(&options).unwrap();
        let back: DabnetOptions = serde_json::from_str(&text).unwrap();
        assert_eq!(back.max_iter_bp_laguerre, options.max_iter_bp_laguerre);
        assert_eq!(back.laguerre_training, options.laguerre_training);
    }

    #[test]
    fn options_round_trip_through_file() {
        let path = std::env::temp_dir().join(format!("drm_options_{}.json", std::process::id()));
        let options = NarmaOptions {
            history: 3,
            hidden_neurons: 7,
            max_iter: 1234,
        };
        to_json_file(&options, &path).unwrap();
        let back: NarmaOptions = from_json_file(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(back.history, 3);
        assert_eq!(back.hidden_neurons, 7);
        assert_eq!(back.max_iter, 1234);
    }
}
