//! Training loop driver
//!
//! One optimization step per batch: clear the gradient accumulators, forward pass to
//! logits, loss, backward pass, optimizer update. The autodiff engine adds into
//! gradients, so skipping the reset silently mixes gradients of earlier batches into
//! later updates. It raises no error; the training just goes wrong.

use std::time::{Duration, Instant};

use thiserror::Error;

use crate::{
    dataloader::{Batch, BatchSource},
    loss::{Loss, LossError},
    metrics,
    nn::{Module, NNError},
    optim::Optim,
};

/// Errors which abort training
#[derive(Debug, Error)]
pub enum TrainError {
    #[error("Model error: {0}")]
    Model(#[from] NNError),
    #[error("Loss error: {0}")]
    Loss(#[from] LossError),
    #[error("The loader produced no batches")]
    EmptyLoader,
    #[error("Gradient accumulation steps must be at least 1")]
    ZeroAccumulationSteps,
}

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub epochs: usize,
    /// Number of consecutive batches whose gradients are summed before each optimizer
    /// step. `1` clears the gradients before every batch.
    pub grad_accumulation_steps: usize,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            epochs: 5,
            grad_accumulation_steps: 1,
        }
    }
}

/// Summary of one completed epoch
#[derive(Debug, Clone, PartialEq)]
pub struct EpochReport {
    /// 1-based
    pub epoch: usize,
    /// Mean of the per-batch losses
    pub mean_loss: f32,
    pub n_batches: usize,
    pub elapsed: Duration,
}

/// Forward and backward pass for one batch, returning the (detached) loss.
///
/// Gradients are added to the parameters' accumulators, the caller decides when to
/// clear them and when to step.
pub fn train_step<M, L>(model: &M, batch: &Batch, criterion: &L) -> Result<f32, TrainError>
where
    M: Module + ?Sized,
    L: Loss + ?Sized,
{
    let logits = model.forward(&batch.inputs)?;
    let loss = criterion.compute(&logits, &batch.labels)?;
    loss.backward();
    Ok(loss.data())
}

/// Runs `config.epochs` passes over `loader`, one optimizer step per accumulation window,
/// and returns one report per epoch
pub fn train_loop<M, S, L, O>(
    model: &M,
    loader: &mut S,
    criterion: &L,
    optimizer: &mut O,
    config: &TrainConfig,
) -> Result<Vec<EpochReport>, TrainError>
where
    M: Module + ?Sized,
    S: BatchSource + ?Sized,
    L: Loss + ?Sized,
    O: Optim + ?Sized,
{
    if config.grad_accumulation_steps == 0 {
        return Err(TrainError::ZeroAccumulationSteps);
    }
    let accumulation = config.grad_accumulation_steps;
    let mut reports = Vec::with_capacity(config.epochs);

    for epoch in 1..=config.epochs {
        let start = Instant::now();
        let mut running_loss = 0.0;
        let mut n_batches = 0;

        let mut batches = loader.batches().peekable();
        while let Some(batch) = batches.next() {
            if n_batches % accumulation == 0 {
                optimizer.zero_grad();
            }
            let loss = train_step(model, &batch, criterion)?;
            n_batches += 1;

            let window_done = n_batches % accumulation == 0;
            if window_done || batches.peek().is_none() {
                optimizer.step();
            }
            running_loss += loss;
            log::debug!(
                "epoch {} batch {}: loss {:.6} ({} samples)",
                epoch,
                n_batches,
                loss,
                batch.len()
            );
        }

        if n_batches == 0 {
            return Err(TrainError::EmptyLoader);
        }
        let report = EpochReport {
            epoch,
            mean_loss: running_loss / n_batches as f32,
            n_batches,
            elapsed: start.elapsed(),
        };
        log::info!(
            "epoch: {}/{}, training loss: {:.6}, batches: {}, took {:?}",
            epoch,
            config.epochs,
            report.mean_loss,
            report.n_batches,
            report.elapsed
        );
        reports.push(report);
    }

    Ok(reports)
}

/// Classification accuracy over one pass of `loader`, without touching gradients
/// or parameters
pub fn evaluate<M, S>(model: &M, loader: &mut S) -> Result<f32, TrainError>
where
    M: Module + ?Sized,
    S: BatchSource + ?Sized,
{
    let mut correct = 0.0;
    let mut total = 0;
    for batch in loader.batches() {
        let logits = model.forward(&batch.inputs)?.detach();
        correct += metrics::accuracy(&logits, &batch.labels)? * batch.len() as f32;
        total += batch.len();
    }
    if total == 0 {
        return Err(TrainError::EmptyLoader);
    }
    Ok(correct / total as f32)
}
