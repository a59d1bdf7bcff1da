//! Loss function(s)
//!
//! Classification criteria take class-index targets, a rank 1 tensor holding one
//! integral class id per row of the output.

use thiserror::Error;

use crate::{
    tensor::{Tensor, TensorError},
    values::Value,
};

/// Errors for loss computation
#[derive(Debug, Error)]
pub enum LossError {
    #[error("Output has {outputs} rows but {targets} targets were given")]
    BatchSizeMismatch { outputs: usize, targets: usize },
    #[error("Target {0} is not a class index")]
    InvalidTarget(f32),
    #[error("Target class {class} out of range for {n_classes} classes")]
    ClassOutOfRange { class: usize, n_classes: usize },
    #[error("Cannot compute a loss over an empty batch")]
    EmptyBatch,
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// A criterion mapping a model output and a target to a differentiable scalar
pub trait Loss {
    fn compute(&self, output: &Tensor, target: &Tensor) -> Result<Value, LossError>;
}

/// How per-sample losses are combined into the scalar loss
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Reduction {
    #[default]
    Mean,
    Sum,
}

impl Reduction {
    fn reduce(&self, per_sample: Vec<Value>) -> Result<Value, LossError> {
        if per_sample.is_empty() {
            return Err(LossError::EmptyBatch);
        }
        let n = per_sample.len();
        let total = per_sample.into_iter().sum::<Value>();
        Ok(match self {
            Reduction::Mean => total / Value::new(n as f32),
            Reduction::Sum => total,
        })
    }
}

/// Validates `target` as one class index per row of `output`
pub(crate) fn class_targets(output: &Tensor, target: &Tensor) -> Result<Vec<usize>, LossError> {
    let (batch, n_classes) = output.dims2()?;
    if target.numel() != batch || target.shape().len() > 1 {
        return Err(LossError::BatchSizeMismatch {
            outputs: batch,
            targets: target.numel(),
        });
    }
    target
        .data()
        .into_iter()
        .map(|t| {
            if t < 0.0 || t.fract() != 0.0 || !t.is_finite() {
                return Err(LossError::InvalidTarget(t));
            }
            let class = t as usize;
            if class >= n_classes {
                return Err(LossError::ClassOutOfRange { class, n_classes });
            }
            Ok(class)
        })
        .collect()
}

/// Negative log likelihood over log-probabilities `[batch, classes]`
#[derive(Debug, Default, Clone, Copy)]
pub struct NLLLoss {
    pub reduction: Reduction,
}

impl NLLLoss {
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    /// Unreduced loss, one value per row
    pub fn per_sample(
        &self,
        log_probs: &Tensor,
        target: &Tensor,
    ) -> Result<Vec<Value>, LossError> {
        let classes = class_targets(log_probs, target)?;
        classes
            .into_iter()
            .enumerate()
            .map(|(i, class)| -> Result<Value, LossError> {
                Ok(-&log_probs.row(i)?[class])
            })
            .collect()
    }
}

impl Loss for NLLLoss {
    fn compute(&self, output: &Tensor, target: &Tensor) -> Result<Value, LossError> {
        self.reduction.reduce(self.per_sample(output, target)?)
    }
}

/// Cross entropy over raw scores (logits), combining log-softmax and NLL in one step.
///
/// Taking the log of softmax probabilities loses precision close to 0 and 1, so the
/// log-probabilities are computed directly from the shifted logits instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct CrossEntropyLoss {
    pub reduction: Reduction,
}

impl CrossEntropyLoss {
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    pub fn per_sample(
        &self,
        logits: &Tensor,
        target: &Tensor,
    ) -> Result<Vec<Value>, LossError> {
        // validate before building the log-softmax graph
        class_targets(logits, target)?;
        NLLLoss::new(self.reduction).per_sample(&logits.log_softmax_rows()?, target)
    }
}

impl Loss for CrossEntropyLoss {
    fn compute(&self, output: &Tensor, target: &Tensor) -> Result<Value, LossError> {
        self.reduction.reduce(self.per_sample(output, target)?)
    }
}

/// Mean Squared Error Loss between two tensors of the same shape
#[derive(Debug, Default, Clone, Copy)]
pub struct MSELoss;

impl MSELoss {
    pub fn call<T, U>(y_pred: &[T], y_true: &[U]) -> Value
    where
        T: AsRef<Value>,
        U: AsRef<Value>,
    {
        let loss = y_pred
            .iter()
            .zip(y_true.iter())
            .map(|(a, b)| (a.as_ref() - b.as_ref()).pow(&Value::new(2.0)))
            .sum::<Value>();
        loss / Value::new(y_pred.len() as f32)
    }
}

impl Loss for MSELoss {
    fn compute(&self, output: &Tensor, target: &Tensor) -> Result<Value, LossError> {
        if output.shape() != target.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: output.shape().to_vec(),
                got: target.shape().to_vec(),
            }
            .into());
        }
        if output.numel() == 0 {
            return Err(LossError::EmptyBatch);
        }
        Ok(MSELoss::call(output.values(), target.values()))
    }
}
