//! Training-sequence generation
//!
//! Builds LHS step-change sequences for exciting a plant: one LHS draw per
//! duration, chained so the starting point of each duration is the last row
//! of the previous one, best-of-n selected by the Φ₅₀ quality metric, then
//! expanded into a flat step-major sequence with a steady-state prefix and
//! an optional mirrored reverse replay.

use crate::config::SequenceOptions;
use crate::error::Result;
use log::info;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

pub mod lhs;

pub use lhs::{quality_phi, Lhs};

/// Chained LHS draws over the varied dimensions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainSequence {
    n_dim: usize,
    n_point: usize,
    /// Starting point of the first duration, one grid index per dimension
    start: Vec<usize>,
    samples: Vec<Lhs>,
}

impl TrainSequence {
    /// Create a sequence of `n_duration` chained draws with the starting
    /// point at the middle grid index.
    pub fn new(n_dim: usize, n_point: usize, n_duration: usize) -> Self {
        Self {
            n_dim,
            n_point,
            start: vec![n_point / 2; n_dim],
            samples: vec![Lhs::new(n_dim, n_point); n_duration],
        }
    }

    /// Number of durations.
    pub fn n_duration(&self) -> usize {
        self.samples.len()
    }

    /// Per-duration draws.
    pub fn samples(&self) -> &[Lhs] {
        &self.samples
    }

    /// Override the starting point, clamped to the grid.
    pub fn set_starting_point(&mut self, point: &[usize]) {
        for (target, &value) in self.start.iter_mut().zip(point.iter()) {
            *target = value.min(self.n_point - 1);
        }
    }

    /// One chained draw: each duration starts where the previous ended.
    pub fn sample(&mut self, rng: &mut SmallRng) {
        let mut first = self.start.clone();
        for sample in self.samples.iter_mut() {
            sample.sample_given_first(rng, &first);
            first = sample.points()[self.n_point - 1].clone();
        }
    }

    /// All chained points: the starting row, then every duration's rows
    /// with the first of each skipped (it repeats the previous last row).
    pub fn chained_points(&self) -> Vec<Vec<usize>> {
        let mut points = Vec::with_capacity(self.n_duration() * (self.n_point - 1) + 1);
        points.push(self.samples[0].points()[0].clone());
        for sample in &self.samples {
            for row in &sample.points()[1..] {
                points.push(row.clone());
            }
        }
        points
    }

    /// Φ_p over the full chained point set.
    pub fn quality_phi(&self, p: f64) -> f64 {
        quality_phi(&self.chained_points(), p)
    }

    /// Run `tries` fresh draws and keep the one with the lowest Φ₅₀.
    pub fn select_best(&mut self, rng: &mut SmallRng, tries: usize) {
        self.sample(rng);
        let mut best_phi = self.quality_phi(50.0);
        let mut trial = self.clone();
        for _ in 0..tries {
            trial.sample(rng);
            let phi = trial.quality_phi(50.0);
            if phi < best_phi {
                best_phi = phi;
                self.samples.clone_from(&trial.samples);
            }
        }
    }
}

/// Flat step-major excitation sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceResult {
    /// Number of emitted steps
    pub n_step: usize,
    /// Number of dimensions per step, varied and held alike
    pub n_dim: usize,
    /// Row-major values, `n_step × n_dim`
    pub sequence: Vec<f64>,
}

/// Generate the excitation sequence for the given options.
///
/// The sequence starts with `duration0` copies of the steady-state row (the
/// per-dimension defaults with varied coordinates replaced by the first LHS
/// row), then holds each chained LHS point for its duration's step count,
/// skipping the first point of each duration. With `reverse` set, the same
/// steps are replayed mirrored, omitting the last point so the turning step
/// is not emitted twice.
pub fn generate(options: &SequenceOptions) -> Result<SequenceResult> {
    options.validate()?;
    let n_varied = options.varied_count();
    let n_dim_all = options.dims.len();
    let n_duration = options.durations.len();
    let mut rng = SmallRng::seed_from_u64(options.seed);

    let tries = 10 * options.points * n_duration;
    let mut ts = TrainSequence::new(n_varied, options.points, n_duration);
    ts.select_best(&mut rng, tries);
    info!(
        "selected training sequence with quality {:.6e} out of {} draws",
        ts.quality_phi(50.0),
        tries + 1
    );

    // Grid spacing per varied dimension
    let varied: Vec<usize> = (0..n_dim_all).filter(|&i| options.dims[i].varied).collect();
    let spacing: Vec<f64> = varied
        .iter()
        .map(|&i| {
            (options.dims[i].upper - options.dims[i].lower) / (options.points - 1) as f64
        })
        .collect();
    let grid_value = |dim: usize, index: usize| -> f64 {
        options.dims[varied[dim]].lower + spacing[dim] * index as f64
    };

    // Expand one chained point into a full row over all dimensions
    let expand = |point: &[usize]| -> Vec<f64> {
        let mut row: Vec<f64> = options.dims.iter().map(|d| d.default).collect();
        for (k, &dim) in varied.iter().enumerate() {
            row[dim] = grid_value(k, point[k]);
        }
        row
    };

    let mut rows: Vec<Vec<f64>> = Vec::new();
    // Steady-state prefix pinned at the first chained point
    let first_row = expand(&ts.samples()[0].points()[0]);
    for _ in 0..options.duration0 {
        rows.push(first_row.clone());
    }
    // Forward sweep, skipping the first point of each duration
    let prefix_len = rows.len();
    for (duration, sample) in ts.samples().iter().enumerate() {
        for point in &sample.points()[1..] {
            let row = expand(point);
            for _ in 0..options.durations[duration] {
                rows.push(row.clone());
            }
        }
    }
    // Mirrored replay without the final turning step
    if options.reverse {
        let steps = rows[prefix_len..rows.len() - 1].to_vec();
        rows.extend(steps.into_iter().rev());
    }

    let n_step = rows.len();
    let mut sequence = Vec::with_capacity(n_step * n_dim_all);
    for row in rows {
        sequence.extend(row);
    }
    Ok(SequenceResult {
        n_step,
        n_dim: n_dim_all,
        sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DimensionSpec;

    fn dim(varied: bool, default: f64, lower: f64, upper: f64) -> DimensionSpec {
        DimensionSpec {
            varied,
            default,
            lower,
            upper,
        }
    }

    #[test]
    fn durations_chain_continuously() {
        let mut rng = SmallRng::seed_from_u64(3);
        let mut ts = TrainSequence::new(2, 4, 3);
        ts.sample(&mut rng);
        for i in 1..ts.n_duration() {
            let last = &ts.samples()[i - 1].points()[3];
            let first = &ts.samples()[i].points()[0];
            assert_eq!(last, first);
        }
    }

    #[test]
    fn starting_point_is_clamped_and_used() {
        let mut rng = SmallRng::seed_from_u64(6);
        let mut ts = TrainSequence::new(2, 4, 1);
        ts.set_starting_point(&[1, 9]);
        ts.sample(&mut rng);
        assert_eq!(ts.samples()[0].points()[0], vec![1, 3]);
    }

    #[test]
    fn chained_points_skip_duplicate_boundaries() {
        let mut rng = SmallRng::seed_from_u64(8);
        let mut ts = TrainSequence::new(2, 3, 2);
        ts.sample(&mut rng);
        let points = ts.chained_points();
        assert_eq!(points.len(), 2 * 2 + 1);
    }

    #[test]
    fn select_best_never_worsens_quality() {
        let mut rng1 = SmallRng::seed_from_u64(17);
        let mut first = TrainSequence::new(2, 5, 2);
        first.sample(&mut rng1);
        let single_phi = first.quality_phi(50.0);

        let mut rng2 = SmallRng::seed_from_u64(17);
        let mut best = TrainSequence::new(2, 5, 2);
        best.select_best(&mut rng2, 50);
        assert!(best.quality_phi(50.0) <= single_phi);
    }

    #[test]
    fn sequence_length_with_reverse() {
        // duration0 = 5, two varied dims, p = 3, one duration of 2 steps:
        // 5 + 2*(3-1) + (2*(3-1) - 1) = 12
        let options = SequenceOptions {
            seed: 4,
            reverse: true,
            points: 3,
            duration0: 5,
            durations: vec![2],
            dims: vec![dim(true, 0.5, 0.0, 1.0), dim(true, 5.0, 0.0, 10.0)],
        };
        let result = generate(&options).unwrap();
        assert_eq!(result.n_step, 12);
        assert_eq!(result.n_dim, 2);
        assert_eq!(result.sequence.len(), 24);
    }

    #[test]
    fn sequence_length_without_reverse() {
        let options = SequenceOptions {
            seed: 4,
            reverse: false,
            points: 4,
            duration0: 3,
            durations: vec![2, 1],
            dims: vec![dim(true, 0.0, -1.0, 1.0), dim(false, 7.5, 0.0, 0.0)],
        };
        let result = generate(&options).unwrap();
        // 3 + 2*(4-1) + 1*(4-1) = 12
        assert_eq!(result.n_step, 12);
    }

    #[test]
    fn held_dimensions_stay_at_default() {
        let options = SequenceOptions {
            seed: 11,
            reverse: true,
            points: 3,
            duration0: 2,
            durations: vec![1],
            dims: vec![dim(true, 0.0, 0.0, 2.0), dim(false, 7.5, 0.0, 0.0)],
        };
        let result = generate(&options).unwrap();
        for step in 0..result.n_step {
            assert_eq!(result.sequence[step * 2 + 1], 7.5);
        }
    }

    #[test]
    fn varied_values_lie_on_the_grid() {
        let options = SequenceOptions {
            seed: 2,
            reverse: false,
            points: 5,
            duration0: 1,
            durations: vec![1],
            dims: vec![dim(true, 0.0, 0.0, 1.0)],
        };
        let result = generate(&options).unwrap();
        for step in 0..result.n_step {
            let value = result.sequence[step];
            let scaled = value * 4.0;
            assert!((scaled - scaled.round()).abs() < 1e-12);
        }
    }

    #[test]
    fn same_seed_reproduces_sequence() {
        let options = SequenceOptions {
            seed: 23,
            reverse: true,
            points: 4,
            duration0: 2,
            durations: vec![2, 3],
            dims: vec![dim(true, 0.0, -1.0, 1.0), dim(true, 0.5, 0.0, 1.0)],
        };
        let a = generate(&options).unwrap();
        let b = generate(&options).unwrap();
        assert_eq!(a.sequence, b.sequence);
    }
}
