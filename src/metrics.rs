//! Evaluation metrics computed on plain floats, outside the computation graph

use crate::{
    loss::{LossError, class_targets},
    tensor::Tensor,
};

/// Fraction of rows whose largest score is the target class
pub fn accuracy(scores: &Tensor, labels: &Tensor) -> Result<f32, LossError> {
    let targets = class_targets(scores, labels)?;
    if targets.is_empty() {
        return Err(LossError::EmptyBatch);
    }
    let predicted = scores.argmax_rows()?;
    let correct = predicted
        .iter()
        .zip(targets.iter())
        .filter(|(p, t)| p == t)
        .count();
    Ok(correct as f32 / targets.len() as f32)
}

/// Running cross entropy over predicted probabilities, `-ln(p[label] + eps)` averaged
/// over every sample seen so far
#[derive(Debug, Clone)]
pub struct CrossEntropyMetric {
    eps: f32,
    sum: f64,
    n_samples: usize,
}

impl Default for CrossEntropyMetric {
    fn default() -> Self {
        Self::new(1e-12)
    }
}

impl CrossEntropyMetric {
    pub fn new(eps: f32) -> Self {
        Self {
            eps,
            sum: 0.0,
            n_samples: 0,
        }
    }

    /// Adds a batch of probabilities `[batch, classes]` with their class labels
    pub fn update(&mut self, labels: &Tensor, probs: &Tensor) -> Result<(), LossError> {
        let targets = class_targets(probs, labels)?;
        for (i, class) in targets.into_iter().enumerate() {
            let p = probs.row(i)?[class].data();
            self.sum -= f64::from(p + self.eps).ln();
            self.n_samples += 1;
        }
        Ok(())
    }

    /// Mean over all samples, `None` before the first update
    pub fn get(&self) -> Option<f32> {
        (self.n_samples > 0).then(|| (self.sum / self.n_samples as f64) as f32)
    }

    pub fn reset(&mut self) {
        self.sum = 0.0;
        self.n_samples = 0;
    }
}
