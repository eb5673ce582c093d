//! Nelder–Mead simplex optimization
//!
//! Derivative-free minimizer used for Laguerre pole optimization. Every
//! vertex carries its objective value in an appended slot; candidate points
//! are clamped element-wise to the bounds before evaluation. The objective
//! is re-evaluated at the best vertex before returning so that a stateful
//! objective (one that retrains a model) is left in the state of the
//! returned point.

use crate::error::{DrmError, Result};
use serde::{Deserialize, Serialize};

const TINY: f64 = 1e-20;

/// Simplex coefficients and tolerances
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SimplexOptions {
    /// Reflection coefficient
    pub reflection: f64,
    /// Expansion coefficient
    pub expansion: f64,
    /// Contraction coefficient
    pub contraction: f64,
    /// Shrink coefficient
    pub shrink: f64,
    /// Relative objective tolerance, also used for the coordinate spread
    pub rel_tol: f64,
    /// Absolute objective tolerance
    pub abs_tol: f64,
    /// Iteration cap; defaults to 50·n when absent
    pub max_iter: Option<usize>,
}

impl Default for SimplexOptions {
    fn default() -> Self {
        Self {
            reflection: 1.0,
            expansion: 2.0,
            contraction: 0.5,
            shrink: 0.5,
            rel_tol: 2e-4,
            abs_tol: 0.0,
            max_iter: None,
        }
    }
}

/// Outcome of a simplex run
#[derive(Debug, Clone)]
pub struct SimplexResult {
    /// Best point found
    pub best: Vec<f64>,
    /// Objective at the best point
    pub best_value: f64,
    /// Iterations performed
    pub iterations: usize,
    /// Whether a tolerance was met before the iteration cap
    pub converged: bool,
}

/// Minimize `objective` from `initial`, offsetting each coordinate by
/// `offsets` to span the starting simplex, with element-wise bounds.
pub fn optimize(
    initial: &[f64],
    offsets: &[f64],
    lower: &[f64],
    upper: &[f64],
    options: SimplexOptions,
    objective: &mut dyn FnMut(&[f64]) -> f64,
) -> Result<SimplexResult> {
    let n = initial.len();
    if n == 0 {
        return Err(DrmError::invalid("simplex needs at least one variable"));
    }
    if offsets.len() != n || lower.len() != n || upper.len() != n {
        return Err(DrmError::dimension("simplex", n, offsets.len()));
    }
    for i in 0..n {
        if lower[i] > upper[i] {
            return Err(DrmError::invalid(format!(
                "simplex bounds inverted at coordinate {}",
                i
            )));
        }
    }
    let max_iter = options.max_iter.unwrap_or(50 * n);

    // Vertices carry the objective value in the last slot
    let mut vertices: Vec<Vec<f64>> = Vec::with_capacity(n + 1);
    let mut base = vec![0.0; n + 1];
    base[..n].copy_from_slice(initial);
    clamp(&mut base[..n], lower, upper);
    vertices.push(base);
    for j in 0..n {
        let mut vertex = vertices[0].clone();
        vertex[j] += offsets[j];
        clamp(&mut vertex[..n], lower, upper);
        vertices.push(vertex);
    }
    for vertex in vertices.iter_mut() {
        vertex[n] = objective(&vertex[..n]);
    }
    let mut sum = centroid_sum(&vertices, n);

    let mut iterations = 0;
    let mut converged = false;
    loop {
        vertices.sort_by(|a, b| a[n].partial_cmp(&b[n]).unwrap_or(std::cmp::Ordering::Equal));
        let err_abs = (vertices[n][n] - vertices[0][n]).abs();
        let err_rel = err_abs / (vertices[0][n].abs() + TINY);
        let mut spread = 0.0f64;
        for i in 0..n {
            let dx = (vertices[n][i] - vertices[0][i]).abs();
            let rel = if dx > 0.0 {
                (dx / vertices[0][i]).abs()
            } else {
                0.0
            };
            spread = spread.max(rel);
        }
        if err_rel < options.rel_tol || err_abs < options.abs_tol || spread < options.rel_tol {
            converged = true;
            break;
        }
        if iterations >= max_iter {
            break;
        }
        iterations += 1;

        // Reflection
        let mut candidate = new_point(&vertices, &sum, n, options.reflection, lower, upper);
        candidate[n] = objective(&candidate[..n]);
        if candidate[n] < vertices[n - 1][n] && candidate[n] > vertices[0][n] {
            replace_worst(&mut vertices, &mut sum, candidate, n);
        } else if candidate[n] < vertices[0][n] {
            // Expansion
            let reflected = candidate;
            let mut expanded = new_point(&vertices, &sum, n, options.expansion, lower, upper);
            expanded[n] = objective(&expanded[..n]);
            if expanded[n] < reflected[n] {
                replace_worst(&mut vertices, &mut sum, expanded, n);
            } else {
                replace_worst(&mut vertices, &mut sum, reflected, n);
            }
        } else {
            // Contraction
            let mut contracted =
                new_point(&vertices, &sum, n, -options.contraction, lower, upper);
            contracted[n] = objective(&contracted[..n]);
            if contracted[n] < vertices[n][n] {
                replace_worst(&mut vertices, &mut sum, contracted, n);
            } else {
                // Shrink toward the best vertex
                for j in 1..=n {
                    for i in 0..n {
                        vertices[j][i] =
                            vertices[0][i] + options.shrink * (vertices[j][i] - vertices[0][i]);
                    }
                    vertices[j][n] = objective(&vertices[j][..n]);
                }
                sum = centroid_sum(&vertices, n);
            }
        }
    }

    // Leave any stateful objective evaluated at the returned point
    let best_value = objective(&vertices[0][..n]);
    Ok(SimplexResult {
        best: vertices[0][..n].to_vec(),
        best_value,
        iterations,
        converged,
    })
}

fn clamp(point: &mut [f64], lower: &[f64], upper: &[f64]) {
    for i in 0..point.len() {
        point[i] = point[i].clamp(lower[i], upper[i]);
    }
}

fn centroid_sum(vertices: &[Vec<f64>], n: usize) -> Vec<f64> {
    let mut sum = vec![0.0; n];
    for vertex in vertices {
        for i in 0..n {
            sum[i] += vertex[i];
        }
    }
    sum
}

/// Point on the line through the worst vertex and the centroid of the rest.
fn new_point(
    vertices: &[Vec<f64>],
    sum: &[f64],
    n: usize,
    coef: f64,
    lower: &[f64],
    upper: &[f64],
) -> Vec<f64> {
    let c = (coef + 1.0) / n as f64;
    let c1 = c + coef;
    let mut point = vec![0.0; n + 1];
    for i in 0..n {
        point[i] = (c * sum[i] - c1 * vertices[n][i]).clamp(lower[i], upper[i]);
    }
    point
}

fn replace_worst(vertices: &mut [Vec<f64>], sum: &mut [f64], candidate: Vec<f64>, n: usize) {
    for i in 0..n {
        sum[i] += candidate[i] - vertices[n][i];
    }
    vertices[n] = candidate;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadratic_converges_within_budget() {
        let target = [1.0, -2.0];
        let mut calls = 0usize;
        let mut objective = |x: &[f64]| {
            calls += 1;
            (x[0] - target[0]).powi(2) + (x[1] - target[1]).powi(2)
        };
        let result = optimize(
            &[0.0, 0.0],
            &[0.5, 0.5],
            &[-10.0, -10.0],
            &[10.0, 10.0],
            SimplexOptions::default(),
            &mut objective,
        )
        .unwrap();
        assert!(result.iterations < 100);
        for i in 0..2 {
            assert!(
                (result.best[i] - target[i]).abs() < 1e-3,
                "coordinate {}: {}",
                i,
                result.best[i]
            );
        }
    }

    #[test]
    fn candidates_respect_bounds() {
        // Unconstrained minimum at 5, bounds cap the search at 1
        let mut objective = |x: &[f64]| (x[0] - 5.0).powi(2);
        let result = optimize(
            &[0.0],
            &[0.2],
            &[0.0],
            &[1.0],
            SimplexOptions::default(),
            &mut objective,
        )
        .unwrap();
        assert!(result.best[0] <= 1.0);
        assert!((result.best[0] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn rejects_inverted_bounds() {
        let mut objective = |x: &[f64]| x[0];
        assert!(optimize(
            &[0.0],
            &[0.1],
            &[1.0],
            &[-1.0],
            SimplexOptions::default(),
            &mut objective,
        )
        .is_err());
    }

    #[test]
    fn stateful_objective_sees_best_point_last() {
        let mut last_seen = Vec::new();
        let mut objective = |x: &[f64]| {
            last_seen = x.to_vec();
            (x[0] - 0.5).powi(2)
        };
        let result = optimize(
            &[0.0],
            &[0.1],
            &[-1.0],
            &[1.0],
            SimplexOptions::default(),
            &mut objective,
        )
        .unwrap();
        assert_eq!(last_seen, result.best);
    }
}
