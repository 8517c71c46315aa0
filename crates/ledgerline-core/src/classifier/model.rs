//! Multinomial logistic regression over sparse TF-IDF vectors
//!
//! Biases are fixed at the log class prior, so an input with no known tokens
//! scores exactly the class-prior distribution. Weights start at zero and are
//! fit with full-batch gradient descent for a fixed number of epochs, which
//! keeps training deterministic for a given sample order.

use serde::{Deserialize, Serialize};

use super::tfidf::SparseVector;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftmaxRegression {
    /// class × feature
    weights: Vec<Vec<f64>>,
    bias: Vec<f64>,
}

/// Gradient-descent settings
#[derive(Debug, Clone, Copy)]
pub struct FitParams {
    pub epochs: usize,
    pub learning_rate: f64,
    pub l2: f64,
}

impl SoftmaxRegression {
    /// Fit on vectorized samples; `labels` are class indices
    pub fn fit(
        samples: &[SparseVector],
        labels: &[usize],
        n_classes: usize,
        n_features: usize,
        params: FitParams,
    ) -> Self {
        let n = samples.len().max(1) as f64;

        let mut counts = vec![0usize; n_classes];
        for &label in labels {
            counts[label] += 1;
        }
        // Laplace-smoothed so an unseen class never gets -inf
        let total = labels.len() as f64 + n_classes as f64;
        let bias: Vec<f64> = counts
            .iter()
            .map(|c| ((*c as f64 + 1.0) / total).ln())
            .collect();

        let mut model = Self {
            weights: vec![vec![0.0; n_features]; n_classes],
            bias,
        };

        let mut gradient = vec![vec![0.0; n_features]; n_classes];
        for _ in 0..params.epochs {
            for row in gradient.iter_mut() {
                row.iter_mut().for_each(|g| *g = 0.0);
            }

            for (x, &label) in samples.iter().zip(labels) {
                let probs = model.probabilities(x);
                for (k, p) in probs.iter().enumerate() {
                    let err = p - if k == label { 1.0 } else { 0.0 };
                    for &(j, v) in x {
                        gradient[k][j] += err * v;
                    }
                }
            }

            for (w_row, g_row) in model.weights.iter_mut().zip(&gradient) {
                for (w, g) in w_row.iter_mut().zip(g_row) {
                    *w -= params.learning_rate * (g / n + params.l2 * *w);
                }
            }
        }

        model
    }

    /// Softmax class probabilities, in class-index order
    pub fn probabilities(&self, x: &SparseVector) -> Vec<f64> {
        let logits: Vec<f64> = self
            .weights
            .iter()
            .zip(&self.bias)
            .map(|(w, b)| {
                b + x
                    .iter()
                    .filter_map(|&(j, v)| w.get(j).map(|wj| wj * v))
                    .sum::<f64>()
            })
            .collect();

        let max = logits.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
        let sum: f64 = exp.iter().sum();
        exp.into_iter().map(|e| e / sum).collect()
    }

    pub fn n_classes(&self) -> usize {
        self.bias.len()
    }
}
