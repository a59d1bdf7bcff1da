//! Optimizer(s)

use crate::values::Value;

/// Common interface for optimizers
/// Analogous to the torch.optim.Optimizer interface
/// <https://pytorch.org/docs/stable/optim.html#base-class>
pub trait Optim {
    /// Performs a single optimization step with accumulated gradients
    fn step(&mut self);
    /// Zeros gradients for all parameters
    fn zero_grad(&mut self);
}

/// SGD with momentum, plain `p <- p - lr * g` when `momentum` is zero
pub struct SGD {
    params: Vec<Value>,
    // currently does not change the learning rate based on the iteration
    lr: f32,
    momentum: f32,
    // velocity per parameter
    velocity: Vec<f32>,
}

impl SGD {
    pub fn new(params: Vec<Value>, lr: f32, momentum: f32) -> Self {
        let velocity = vec![0.0; params.len()];
        Self {
            params,
            lr,
            momentum,
            velocity,
        }
    }

    pub fn lr(&self) -> f32 {
        self.lr
    }

    pub fn n_params(&self) -> usize {
        self.params.len()
    }

    #[cfg(test)]
    fn velocities(&self) -> &[f32] {
        &self.velocity
    }
}

impl Optim for SGD {
    fn step(&mut self) {
        for (param, velocity) in self.params.iter_mut().zip(self.velocity.iter_mut()) {
            if self.momentum == 0.0 {
                param.set_data(param.data() - self.lr * param.grad());
                continue;
            }
            *velocity = self.momentum * *velocity - self.lr * param.grad();
            param.set_data(param.data() + *velocity);
        }
    }

    fn zero_grad(&mut self) {
        for param in self.params.iter_mut() {
            param.zero_grad();
        }
    }
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_pcg::Pcg64Mcg;

    use super::*;
    use crate::{
        nn::{Module, Sequential},
        tensor::Tensor,
    };

    #[test]
    fn test_sgd_no_momentum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone(), c.clone()], 0.1, 0.0);
        assert_eq!(optim.n_params(), 3);
        assert_eq!(optim.lr(), 0.1);
        optim.step();
        assert_eq!(a.grad(), 1.0);
        assert_eq!(b.grad(), 1.0);
        assert_eq!(c.grad(), 1.0);
        assert_eq!(a.data(), 0.9);
        assert_eq!(b.data(), 1.9);
        assert_eq!(c.data(), 2.9);
    }

    #[test]
    fn test_sgd_with_momentum() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        let c = &a + &b;
        c.backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone(), c.clone()], 0.1, 0.9);
        optim.step();
        assert_eq!(a.data(), 0.9);
        assert_eq!(b.data(), 1.9);
        assert_eq!(c.data(), 2.9);
        assert_eq!(optim.velocities(), &[-0.1, -0.1, -0.1]);
        optim.step();
        assert_eq!(a.data(), 0.71);
        assert_eq!(b.data(), 1.71);
        assert_eq!(c.data(), 2.71);
        assert_eq!(optim.velocities(), &[-0.19, -0.19, -0.19]);
    }

    #[test]
    fn test_step_moves_every_parameter_against_its_gradient() {
        let mut rng = Pcg64Mcg::seed_from_u64(3);
        let model = Sequential::mlp(3, &[4], 2, &mut rng).unwrap();
        let x = Tensor::randn(&[5, 3], 1.0, &mut rng).unwrap();
        model.forward(&x).unwrap().pow_scalar(2.0).mean().backward();

        let params = model.parameters();
        let before = params
            .iter()
            .map(|p| (p.data(), p.grad()))
            .collect::<Vec<_>>();
        let lr = 0.05;
        let mut optim = SGD::new(params.clone(), lr, 0.0);
        optim.step();

        for (p, (old, grad)) in params.iter().zip(before) {
            assert_eq!(p.data(), old - lr * grad);
        }
    }

    #[test]
    fn test_zero_grad() {
        let a = Value::new(1.0);
        let b = Value::new(2.0);
        (&a * &b).backward();

        let mut optim = SGD::new(vec![a.clone(), b.clone()], 0.1, 0.0);
        optim.zero_grad();
        assert_eq!(a.grad(), 0.0);
        assert_eq!(b.grad(), 0.0);
    }
}
