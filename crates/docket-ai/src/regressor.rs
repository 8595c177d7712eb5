//! Ridge-penalized linear regression on standardized features.
//!
//! Fitted with full-batch gradient descent from a zero start, so training is
//! deterministic for a given sample order.

use serde::{Deserialize, Serialize};

const EPOCHS: usize = 400;
const LEARNING_RATE: f64 = 0.05;
const L2_PENALTY: f64 = 1e-3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearRegressor {
    means: Vec<f64>,
    scales: Vec<f64>,
    weights: Vec<f64>,
    bias: f64,
}

impl LinearRegressor {
    /// Fit on rows `x` (all the same width) against targets `y`.
    ///
    /// Returns `None` if there are no rows or the shapes disagree.
    pub fn fit(x: &[Vec<f64>], y: &[f64]) -> Option<Self> {
        if x.is_empty() || x.len() != y.len() {
            return None;
        }
        let dim = x[0].len();
        if x.iter().any(|row| row.len() != dim) {
            return None;
        }
        let n = x.len() as f64;

        let mut means = vec![0.0; dim];
        for row in x {
            for (m, v) in means.iter_mut().zip(row) {
                *m += v / n;
            }
        }
        let mut scales = vec![0.0; dim];
        for row in x {
            for ((s, v), m) in scales.iter_mut().zip(row).zip(&means) {
                *s += (v - m).powi(2) / n;
            }
        }
        for s in &mut scales {
            *s = if *s > 1e-12 { s.sqrt() } else { 1.0 };
        }

        let z: Vec<Vec<f64>> = x
            .iter()
            .map(|row| standardize(row, &means, &scales))
            .collect();

        let mut weights = vec![0.0; dim];
        let mut bias = 0.0;
        for _ in 0..EPOCHS {
            let mut grad_w = vec![0.0; dim];
            let mut grad_b = 0.0;
            for (row, target) in z.iter().zip(y) {
                let err = dot(&weights, row) + bias - target;
                for (g, v) in grad_w.iter_mut().zip(row) {
                    *g += err * v / n;
                }
                grad_b += err / n;
            }
            for (w, g) in weights.iter_mut().zip(&grad_w) {
                *w -= LEARNING_RATE * (g + L2_PENALTY * *w);
            }
            bias -= LEARNING_RATE * grad_b;
        }

        Some(Self {
            means,
            scales,
            weights,
            bias,
        })
    }

    pub fn predict(&self, row: &[f64]) -> f64 {
        dot(&self.weights, &standardize(row, &self.means, &self.scales)) + self.bias
    }

    /// Mean absolute error of `map(prediction)` against `map(target)`.
    pub fn mean_absolute_error(&self, x: &[Vec<f64>], y: &[f64], map: impl Fn(f64) -> f64) -> f64 {
        if x.is_empty() {
            return 0.0;
        }
        let total: f64 = x
            .iter()
            .zip(y)
            .map(|(row, target)| (map(self.predict(row)) - map(*target)).abs())
            .sum();
        total / x.len() as f64
    }

    pub fn dim(&self) -> usize {
        self.weights.len()
    }
}

fn standardize(row: &[f64], means: &[f64], scales: &[f64]) -> Vec<f64> {
    row.iter()
        .zip(means)
        .zip(scales)
        .map(|((v, m), s)| (v - m) / s)
        .collect()
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
