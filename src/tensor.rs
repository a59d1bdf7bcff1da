//! Shaped, row-major collections of [`Value`]s
//!
//! A tensor is a view over graph nodes: operations on tensors build the same scalar
//! computation graph as operations on values, so a loss computed from tensors can be
//! differentiated with [`Value::backward`].

use std::cmp::Ordering;

use rand::Rng;
use rand_distr::{Distribution, Normal};
use thiserror::Error;

use crate::values::Value;

/// Errors for tensor construction and arithmetic
#[derive(Debug, Error, PartialEq)]
pub enum TensorError {
    #[error("Data of length {len} does not fit shape {shape:?}")]
    InvalidShape { len: usize, shape: Vec<usize> },
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Expected a tensor of rank {expected}, got shape {shape:?}")]
    RankMismatch { expected: usize, shape: Vec<usize> },
    #[error("Invalid standard deviation {0} for random initialization")]
    InvalidStd(f32),
}

#[derive(Debug, Clone)]
pub struct Tensor {
    values: Vec<Value>,
    shape: Vec<usize>,
}

impl Tensor {
    /// Creates a tensor of fresh leaf values
    pub fn new(data: Vec<f32>, shape: &[usize]) -> Result<Self, TensorError> {
        Self::from_values(data.into_iter().map(Value::new).collect(), shape)
    }

    /// Wraps existing graph nodes without copying them
    pub fn from_values(values: Vec<Value>, shape: &[usize]) -> Result<Self, TensorError> {
        if values.len() != shape.iter().product::<usize>() {
            return Err(TensorError::InvalidShape {
                len: values.len(),
                shape: shape.to_vec(),
            });
        }
        Ok(Self {
            values,
            shape: shape.to_vec(),
        })
    }

    pub fn zeros(shape: &[usize]) -> Self {
        let n = shape.iter().product();
        Self {
            values: (0..n).map(|_| Value::new(0.0)).collect(),
            shape: shape.to_vec(),
        }
    }

    pub fn scalar(data: f32) -> Self {
        Self {
            values: vec![Value::new(data)],
            shape: vec![],
        }
    }

    /// Samples every element from `N(0, std)`
    pub fn randn<R: Rng + ?Sized>(
        shape: &[usize],
        std: f32,
        rng: &mut R,
    ) -> Result<Self, TensorError> {
        let normal = Normal::new(0.0, std).map_err(|_| TensorError::InvalidStd(std))?;
        let n = shape.iter().product();
        Ok(Self {
            values: (0..n).map(|_| Value::new(normal.sample(rng))).collect(),
            shape: shape.to_vec(),
        })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn numel(&self) -> usize {
        self.values.len()
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Copies the current data out of the graph
    pub fn data(&self) -> Vec<f32> {
        self.values.iter().map(Value::data).collect()
    }

    pub fn grad(&self) -> Vec<f32> {
        self.values.iter().map(Value::grad).collect()
    }

    pub fn zero_grad(&mut self) {
        for v in self.values.iter_mut() {
            v.zero_grad();
        }
    }

    pub fn detach(&self) -> Tensor {
        Tensor {
            values: self.values.iter().map(Value::detach).collect(),
            shape: self.shape.clone(),
        }
    }

    /// `(rows, cols)` of a rank 2 tensor
    pub fn dims2(&self) -> Result<(usize, usize), TensorError> {
        match self.shape.as_slice() {
            [rows, cols] => Ok((*rows, *cols)),
            _ => Err(TensorError::RankMismatch {
                expected: 2,
                shape: self.shape.clone(),
            }),
        }
    }

    /// Row `i` of a rank 2 tensor
    pub fn row(&self, i: usize) -> Result<&[Value], TensorError> {
        let (rows, cols) = self.dims2()?;
        if i >= rows {
            return Err(TensorError::ShapeMismatch {
                expected: vec![i + 1, cols],
                got: self.shape.clone(),
            });
        }
        Ok(&self.values[i * cols..(i + 1) * cols])
    }

    fn rows(&self) -> Result<impl Iterator<Item = &[Value]>, TensorError> {
        let (rows, cols) = self.dims2()?;
        Ok((0..rows).map(move |i| &self.values[i * cols..(i + 1) * cols]))
    }

    /// Index of the largest element in every row
    pub fn argmax_rows(&self) -> Result<Vec<usize>, TensorError> {
        Ok(self
            .rows()?
            .map(|row| {
                row.iter()
                    .enumerate()
                    .max_by(|(_, a), (_, b)| {
                        a.data().partial_cmp(&b.data()).unwrap_or(Ordering::Equal)
                    })
                    .map(|(i, _)| i)
                    .unwrap_or(0)
            })
            .collect())
    }

    fn map(&self, f: impl Fn(&Value) -> Value) -> Tensor {
        Tensor {
            values: self.values.iter().map(f).collect(),
            shape: self.shape.clone(),
        }
    }

    pub fn pow_scalar(&self, exponent: f32) -> Tensor {
        let exponent = Value::new(exponent);
        self.map(|v| v.pow(&exponent))
    }

    pub fn relu(&self) -> Tensor {
        self.map(Value::relu)
    }

    pub fn exp(&self) -> Tensor {
        self.map(Value::exp)
    }

    pub fn ln(&self) -> Tensor {
        self.map(Value::ln)
    }

    /// Element-wise product of two tensors of the same shape
    pub fn mul(&self, other: &Tensor) -> Result<Tensor, TensorError> {
        if self.shape != other.shape {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: other.shape.clone(),
            });
        }
        Ok(Tensor {
            values: self
                .values
                .iter()
                .zip(other.values.iter())
                .map(|(a, b)| a * b)
                .collect(),
            shape: self.shape.clone(),
        })
    }

    pub fn sum(&self) -> Value {
        self.values.iter().cloned().sum()
    }

    pub fn mean(&self) -> Value {
        self.sum() / Value::new(self.values.len() as f32)
    }

    /// `self @ weight^T + bias` for `self: [batch, in]`, `weight: [out, in]`, `bias: [out]`
    pub fn linear(&self, weight: &Tensor, bias: &Tensor) -> Result<Tensor, TensorError> {
        let (batch, n_in) = self.dims2()?;
        let (n_out, w_in) = weight.dims2()?;
        if w_in != n_in {
            return Err(TensorError::ShapeMismatch {
                expected: vec![n_out, n_in],
                got: weight.shape.clone(),
            });
        }
        if bias.shape != [n_out] {
            return Err(TensorError::ShapeMismatch {
                expected: vec![n_out],
                got: bias.shape.clone(),
            });
        }

        let mut values = Vec::with_capacity(batch * n_out);
        for row in self.rows()? {
            for (o, b) in bias.values.iter().enumerate() {
                let w_row = &weight.values[o * n_in..(o + 1) * n_in];
                let acc = w_row.iter().zip(row).map(|(w, x)| w * x).sum::<Value>();
                values.push(&acc + b);
            }
        }
        Tensor::from_values(values, &[batch, n_out])
    }

    /// Row-wise `x - max(x) - ln(sum(exp(x - max(x))))`
    ///
    /// The row maximum is detached: it cancels out of the result, so it only keeps
    /// `exp` from overflowing.
    pub fn log_softmax_rows(&self) -> Result<Tensor, TensorError> {
        let mut values = Vec::with_capacity(self.values.len());
        for row in self.rows()? {
            let max = Value::new(
                row.iter()
                    .map(Value::data)
                    .fold(f32::NEG_INFINITY, f32::max),
            );
            let shifted = row.iter().map(|v| v - &max).collect::<Vec<_>>();
            let log_sum_exp = shifted.iter().map(Value::exp).sum::<Value>().ln();
            values.extend(shifted.iter().map(|v| v - &log_sum_exp));
        }
        Tensor::from_values(values, &self.shape)
    }

    /// Row-wise softmax, shifted by the detached row maximum
    pub fn softmax_rows(&self) -> Result<Tensor, TensorError> {
        let mut values = Vec::with_capacity(self.values.len());
        for row in self.rows()? {
            let max = Value::new(
                row.iter()
                    .map(Value::data)
                    .fold(f32::NEG_INFINITY, f32::max),
            );
            let exps = row.iter().map(|v| (v - &max).exp()).collect::<Vec<_>>();
            let exp_sum = exps.iter().cloned().sum::<Value>();
            // Note: dividing by a zero sum would produce NaN, the shift guarantees exp_sum >= 1
            values.extend(exps.iter().map(|e| e / &exp_sum));
        }
        Tensor::from_values(values, &self.shape)
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use super::*;
    use crate::assert_eq_float;

    #[test]
    fn test_shape_validation() {
        assert!(Tensor::new(vec![1.0, 2.0, 3.0], &[2, 2]).is_err());
        let t = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        assert_eq!(t.shape(), &[2, 2]);
        assert_eq!(t.row(1).unwrap()[0].data(), 3.0);
        assert!(matches!(
            Tensor::scalar(1.0).dims2(),
            Err(TensorError::RankMismatch { expected: 2, .. })
        ));
    }

    #[test]
    fn test_mean_of_squares_gradient() {
        // z = mean(x^2) over 4 elements => dz/dx = 2x / 4 = x / 2
        let mut rng = Pcg64Mcg::seed_from_u64(7);
        let x = Tensor::randn(&[2, 2], 1.0, &mut rng).unwrap();
        let z = x.pow_scalar(2.0).mean();
        z.backward();

        for (g, d) in x.grad().into_iter().zip(x.data()) {
            assert_eq_float!(g, d / 2.0, 1e-5);
        }
    }

    #[test]
    fn test_mean_of_squares_times_other_gradient() {
        // z = mean(x^2 * y) over 4 elements => dz/dx = x * y / 2
        let mut rng = Pcg64Mcg::seed_from_u64(11);
        let x = Tensor::randn(&[2, 2], 1.0, &mut rng).unwrap();
        let y = Tensor::randn(&[2, 2], 1.0, &mut rng).unwrap();
        let z = x.pow_scalar(2.0).mul(&y).unwrap().mean();
        z.backward();

        let expected = x
            .data()
            .into_iter()
            .zip(y.data())
            .map(|(x, y)| x * y / 2.0);
        for (g, e) in x.grad().into_iter().zip(expected) {
            assert_eq_float!(g, e, 1e-5);
        }
        // dz/dy = x^2 / 4
        for (g, x) in y.grad().into_iter().zip(x.data()) {
            assert_eq_float!(g, x * x / 4.0, 1e-5);
        }
    }

    #[test]
    fn test_linear() {
        let x = Tensor::new(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]).unwrap();
        let w = Tensor::new(vec![1.0, 0.0, 1.0, 1.0, 0.5, -1.0], &[3, 2]).unwrap();
        let b = Tensor::new(vec![0.0, 1.0, 2.0], &[3]).unwrap();
        let out = x.linear(&w, &b).unwrap();
        assert_eq!(out.shape(), &[2, 3]);
        assert_eq!(out.data(), vec![1.0, 4.0, 0.5, 3.0, 8.0, -0.5]);

        out.sum().backward();
        // d sum / d w[o][i] = sum over the batch of x[.][i]
        assert_eq!(w.grad(), vec![4.0, 6.0, 4.0, 6.0, 4.0, 6.0]);
        assert_eq!(b.grad(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn test_linear_shape_mismatch() {
        let x = Tensor::zeros(&[1, 3]);
        let w = Tensor::zeros(&[2, 2]);
        let b = Tensor::zeros(&[2]);
        assert!(matches!(
            x.linear(&w, &b),
            Err(TensorError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_softmax_rows() {
        let x = Tensor::new(vec![1.0, 2.0], &[1, 2]).unwrap();
        let s = x.softmax_rows().unwrap();
        assert_eq_float!(s.values()[0].data(), 0.2689414);
        assert_eq_float!(s.values()[1].data(), 0.7310585);

        // d s1 / dx1 = s1 * (1 - s1)
        // d s1 / dx2 = -s1 * s2
        s.values()[0].backward();
        let s1 = s.values()[0].data();
        let s2 = s.values()[1].data();
        assert_eq_float!(x.values()[0].grad(), s1 * (1.0 - s1));
        assert_eq_float!(x.values()[1].grad(), -s1 * s2);
    }

    #[test]
    fn test_log_softmax_large_logits() {
        let x = Tensor::new(vec![1000.0, 0.0, -1000.0], &[1, 3]).unwrap();
        let l = x.log_softmax_rows().unwrap().data();
        assert_eq_float!(l[0], 0.0);
        assert_eq_float!(l[1], -1000.0);
        assert!(l.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_argmax_rows() {
        let x = Tensor::new(vec![0.1, 0.9, 3.0, -1.0], &[2, 2]).unwrap();
        assert_eq!(x.argmax_rows().unwrap(), vec![1, 0]);
    }
}
