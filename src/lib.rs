//! # D-RM Trainer
//!
//! This crate trains dynamic reduced-order models (D-RMs) that approximate a
//! multi-input multi-output, time-discrete nonlinear dynamical system from
//! sampled input/output trajectories.
//!
//! Two model families are supported:
//!
//! - **DABNet**: per output, a parallel bank of per-input Laguerre state-space
//!   filters feeds a one-hidden-layer neural network. After the first training
//!   pass the Laguerre realization is reduced by balanced truncation and a
//!   second network is trained on the reduced states.
//! - **NARMA**: a single network mapping a fixed window of past inputs and
//!   outputs to the next output.
//!
//! The crate also ships the companion training-sequence generator that
//! produces Latin Hypercube step-change sequences for exciting the plant.
//!
//! ## Quick Start
//!
//! ```rust
//! use drm_trainer::{DrmContainer, ModelKind};
//! use drm_trainer::config::{DabnetOptions, FilterOptions, OutputModelOptions};
//!
//! // One input, one output, a short step-response record in column-major order.
//! let mut tensor = Vec::new();
//! for k in 0..40 {
//!     tensor.push(if k < 20 { 0.0 } else { 1.0 });
//! }
//! for k in 0..40 {
//!     tensor.push(if k < 20 { 0.1 } else { 0.9 + 0.001 * k as f64 });
//! }
//!
//! let mut container = DrmContainer::new(ModelKind::Dabnet, 1, 1)?;
//! container.load_column_major(40, &tensor)?;
//! container.set_dabnet_options(DabnetOptions {
//!     max_iter_bp_laguerre: 500,
//!     max_iter_bp_reduced: 500,
//!     ..Default::default()
//! });
//! container.set_output_options(vec![OutputModelOptions {
//!     hidden_neurons: 4,
//!     ..Default::default()
//! }])?;
//! container.set_filter_options(vec![FilterOptions {
//!     pole: 0.5,
//!     order: 3,
//!     two_pole: false,
//!     ..Default::default()
//! }])?;
//! container.build(0)?;
//! let export = container.export()?;
//! assert_eq!(export.n_in, 1);
//! # Ok::<(), drm_trainer::DrmError>(())
//! ```
//!
//! ## Pipeline
//!
//! For each output the DABNet build runs, in order: filter construction,
//! optional Simplex pole optimization, steady-state initialization and state
//! projection, network training (RPROP family or the second-order path),
//! first-layer weight extraction, balanced-realization reduction driven by
//! Gramian Cholesky factors and SVD, re-projection through the reduced
//! filters, and reduced-network training.
//!
//! Execution is strictly single-threaded and deterministic for a given seed.

#![warn(missing_docs, clippy::all)]
#![allow(clippy::float_cmp)] // Numerical code often requires exact comparisons

// Re-export commonly used types
pub use container::{DrmContainer, DrmExport, ModelKind};
pub use data::DataCollection;
pub use error::{DrmError, Result};
pub use statespace::StateSpace;

// Core modules
pub mod ann;
pub mod config;
pub mod container;
pub mod data;
pub mod error;
pub mod io;
pub mod linalg;
pub mod model;
pub mod sampling;
pub mod simplex;
pub mod statespace;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library description
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Convenient re-exports for common usage patterns
pub mod prelude {
    pub use crate::ann::{Activation, NeuralNetwork, TrainMethod};
    pub use crate::config::{
        DabnetOptions, FilterOptions, NarmaOptions, OutputModelOptions, PoleOptimization,
        SequenceOptions, TrainingMethod,
    };
    pub use crate::container::{DrmContainer, DrmExport, ModelKind};
    pub use crate::data::DataCollection;
    pub use crate::error::{DrmError, Result};
    pub use crate::sampling::TrainSequence;
    pub use crate::statespace::{LaguerreSpec, StateSpace};

    pub use nalgebra::{DMatrix, DVector};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_info() {
        assert!(!VERSION.is_empty());
        assert!(!DESCRIPTION.is_empty());
    }
}
