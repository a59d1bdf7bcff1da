//! Components to build a neural network

use std::sync::atomic::{self, AtomicUsize};

use rand::Rng;
use thiserror::Error;

use crate::{
    tensor::{Tensor, TensorError},
    values::Value,
};

/// Errors for the neural network
#[derive(Debug, Error)]
pub enum NNError {
    #[error("Input size mismatch: expected {expected} features, got {got}")]
    InputSizeMismatch { expected: usize, got: usize },
    #[error("Invalid layer dimensions: {n_inputs} inputs, {n_outputs} outputs")]
    InvalidLayer { n_inputs: usize, n_outputs: usize },
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

/// Represents the torch.nn.Module. NNs should implement this trait.
/// <https://github.com/pytorch/pytorch/blob/v2.6.0/torch/nn/modules/module.py#L402>
pub trait Module {
    fn forward(&self, input: &Tensor) -> Result<Tensor, NNError>;

    /// Learnable tensors keyed by name, in a stable order
    fn named_parameters(&self) -> Vec<(String, Tensor)>;

    /// Every learnable scalar, flattened in the order of `named_parameters`
    fn parameters(&self) -> Vec<Value> {
        self.named_parameters()
            .into_iter()
            .flat_map(|(_, t)| t.values().to_vec())
            .collect()
    }

    fn zero_grad(&mut self) {
        for p in self.parameters().iter_mut() {
            p.zero_grad();
        }
    }
}

/// Fully connected layer computing `x @ weight^T + bias`
pub struct Linear {
    /// `[n_outputs, n_inputs]`
    weight: Tensor,
    /// `[n_outputs]`
    bias: Tensor,
}

impl Linear {
    /// Creates a new layer with the given number of inputs and outputs
    pub fn new(n_inputs: usize, n_outputs: usize) -> Result<Self, NNError> {
        Self::with_rng(n_inputs, n_outputs, &mut rand::rng())
    }

    pub fn with_rng<R: Rng + ?Sized>(
        n_inputs: usize,
        n_outputs: usize,
        rng: &mut R,
    ) -> Result<Self, NNError> {
        if n_inputs == 0 || n_outputs == 0 {
            return Err(NNError::InvalidLayer {
                n_inputs,
                n_outputs,
            });
        }
        // He initialization to ensure the variance of the output is the same as the input
        // and keep weights relatively small to avoid exploding or vanishing gradients
        let std = (2.0 / n_inputs as f32).sqrt();
        Ok(Self {
            weight: Tensor::randn(&[n_outputs, n_inputs], std, rng)?,
            bias: Tensor::zeros(&[n_outputs]),
        })
    }

    /// Builds a layer around existing weights, `weight: [out, in]` and `bias: [out]`
    pub fn from_parts(weight: Tensor, bias: Tensor) -> Result<Self, NNError> {
        let (n_outputs, n_inputs) = weight.dims2()?;
        if bias.shape() != [n_outputs] {
            return Err(TensorError::ShapeMismatch {
                expected: vec![n_outputs],
                got: bias.shape().to_vec(),
            }
            .into());
        }
        if n_inputs == 0 || n_outputs == 0 {
            return Err(NNError::InvalidLayer {
                n_inputs,
                n_outputs,
            });
        }
        Ok(Self { weight, bias })
    }

    pub fn n_inputs(&self) -> usize {
        self.weight.shape()[1]
    }

    pub fn n_outputs(&self) -> usize {
        self.weight.shape()[0]
    }

    pub fn weight(&self) -> &Tensor {
        &self.weight
    }

    pub fn bias(&self) -> &Tensor {
        &self.bias
    }
}

impl Module for Linear {
    fn forward(&self, input: &Tensor) -> Result<Tensor, NNError> {
        let (_, n_features) = input.dims2()?;
        if n_features != self.n_inputs() {
            return Err(NNError::InputSizeMismatch {
                expected: self.n_inputs(),
                got: n_features,
            });
        }
        Ok(input.linear(&self.weight, &self.bias)?)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![
            ("weight".to_string(), self.weight.clone()),
            ("bias".to_string(), self.bias.clone()),
        ]
    }
}

/// Applies ReLU element-wise
#[derive(Default)]
pub struct ReLU {
    n_dead_neurons: AtomicUsize,
}

impl ReLU {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of non-positive pre-activations seen in the last forward pass (used for debugging)
    pub fn n_dead_neurons(&self) -> usize {
        self.n_dead_neurons.load(atomic::Ordering::Relaxed)
    }
}

impl Module for ReLU {
    fn forward(&self, input: &Tensor) -> Result<Tensor, NNError> {
        let n_dead_neurons = input.values().iter().filter(|v| v.data() <= 0.0).count();
        self.n_dead_neurons
            .store(n_dead_neurons, atomic::Ordering::Relaxed);
        log::debug!("relu dead units: {}/{}", n_dead_neurons, input.numel());
        Ok(input.relu())
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![]
    }
}

/// Turns logits into class probabilities, row by row.
///
/// Only for inference: feed logits, not probabilities, to the loss.
#[derive(Default)]
pub struct Softmax;

impl Module for Softmax {
    fn forward(&self, input: &Tensor) -> Result<Tensor, NNError> {
        Ok(input.softmax_rows()?)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![]
    }
}

/// Row-wise log-probabilities, pair with [`crate::loss::NLLLoss`]
#[derive(Default)]
pub struct LogSoftmax;

impl Module for LogSoftmax {
    fn forward(&self, input: &Tensor) -> Result<Tensor, NNError> {
        Ok(input.log_softmax_rows()?)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        vec![]
    }
}

/// An ordered composition of modules, the output of each feeding the next
#[derive(Default)]
pub struct Sequential {
    layers: Vec<Box<dyn Module>>,
}

impl Sequential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add<M: Module + 'static>(mut self, layer: M) -> Self {
        self.layers.push(Box::new(layer));
        self
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Feed-forward classifier: `Linear -> ReLU` for every hidden size, then a final
    /// `Linear` producing logits
    pub fn mlp<R: Rng + ?Sized>(
        n_inputs: usize,
        hidden: &[usize],
        n_outputs: usize,
        rng: &mut R,
    ) -> Result<Self, NNError> {
        let mut model = Sequential::new();
        let mut width = n_inputs;
        for &h in hidden {
            model = model.add(Linear::with_rng(width, h, rng)?).add(ReLU::new());
            width = h;
        }
        Ok(model.add(Linear::with_rng(width, n_outputs, rng)?))
    }
}

impl Module for Sequential {
    fn forward(&self, input: &Tensor) -> Result<Tensor, NNError> {
        let mut output = input.clone();
        for layer in self.layers.iter() {
            output = layer.forward(&output)?;
        }
        Ok(output)
    }

    fn named_parameters(&self) -> Vec<(String, Tensor)> {
        self.layers
            .iter()
            .enumerate()
            .flat_map(|(i, layer)| {
                layer
                    .named_parameters()
                    .into_iter()
                    .map(move |(name, t)| (format!("{}.{}", i, name), t))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use super::*;
    use crate::assert_eq_float;

    fn ones_layer(n_inputs: usize, n_outputs: usize) -> Linear {
        Linear::from_parts(
            Tensor::new(vec![1.0; n_inputs * n_outputs], &[n_outputs, n_inputs]).unwrap(),
            Tensor::new(vec![1.0; n_outputs], &[n_outputs]).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_layer_forward() {
        let layer = ones_layer(2, 3);
        let inputs = Tensor::new(vec![1.0, 2.0], &[1, 2]).unwrap();
        let outputs = layer.forward(&inputs).unwrap();
        assert_eq!(outputs.shape(), &[1, 3]);
        assert_eq!(outputs.data(), vec![4.0, 4.0, 4.0]);
    }

    #[test]
    fn test_dim_mismatch() {
        let layer = ones_layer(2, 3);
        let inputs = Tensor::new(vec![1.0], &[1, 1]).unwrap();
        let err = layer.forward(&inputs).unwrap_err();
        assert!(matches!(
            err,
            NNError::InputSizeMismatch {
                expected: 2,
                got: 1
            }
        ));
    }

    #[test]
    fn test_linear_init() {
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        let layer = Linear::with_rng(4, 3, &mut rng).unwrap();
        assert_eq!(layer.weight().shape(), &[3, 4]);
        assert_eq!(layer.bias().data(), vec![0.0; 3]);
        assert!(layer.weight().data().iter().any(|w| *w != 0.0));
    }

    #[test]
    fn test_invalid_layer() {
        assert!(matches!(
            Linear::new(0, 3),
            Err(NNError::InvalidLayer { .. })
        ));
    }

    #[test]
    fn test_named_parameters() {
        let mut rng = Pcg64Mcg::seed_from_u64(0);
        let model = Sequential::mlp(4, &[8, 6], 3, &mut rng).unwrap();
        let names = model
            .named_parameters()
            .into_iter()
            .map(|(name, t)| (name, t.shape().to_vec()))
            .collect::<Vec<_>>();
        assert_eq!(
            names,
            vec![
                ("0.weight".to_string(), vec![8, 4]),
                ("0.bias".to_string(), vec![8]),
                ("2.weight".to_string(), vec![6, 8]),
                ("2.bias".to_string(), vec![6]),
                ("4.weight".to_string(), vec![3, 6]),
                ("4.bias".to_string(), vec![3]),
            ]
        );
        assert_eq!(model.parameters().len(), 8 * 4 + 8 + 6 * 8 + 6 + 3 * 6 + 3);
    }

    #[test]
    fn test_zero_grad_clears_all_parameters() {
        let mut rng = Pcg64Mcg::seed_from_u64(1);
        let mut model = Sequential::mlp(3, &[5], 2, &mut rng).unwrap();
        let x = Tensor::randn(&[4, 3], 1.0, &mut rng).unwrap();
        model.forward(&x).unwrap().pow_scalar(2.0).mean().backward();
        assert!(model.parameters().iter().any(|p| p.grad() != 0.0));

        model.zero_grad();
        for (name, t) in model.named_parameters() {
            assert!(t.grad().iter().all(|g| *g == 0.0), "{} not zeroed", name);
        }
    }

    #[test]
    fn test_relu_counts_dead_units() {
        let relu = ReLU::new();
        let x = Tensor::new(vec![-1.0, 0.0, 2.0, 3.0], &[2, 2]).unwrap();
        let y = relu.forward(&x).unwrap();
        assert_eq!(y.data(), vec![0.0, 0.0, 2.0, 3.0]);
        assert_eq!(relu.n_dead_neurons(), 2);
    }

    #[test]
    fn test_log_softmax_matches_softmax() {
        let x = Tensor::new(vec![0.5, -1.0, 2.0], &[1, 3]).unwrap();
        let log_probs = LogSoftmax.forward(&x).unwrap().data();
        let probs = Softmax.forward(&x).unwrap().data();
        for (lp, p) in log_probs.into_iter().zip(probs) {
            assert_eq_float!(lp.exp(), p);
        }
    }
}
