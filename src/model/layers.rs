//! Building blocks of the network. Each layer owns its parameters and knows
//! how to push a gradient back through itself; the network composes them.

use crate::error::{Error, Result};
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rand::distributions::{Bernoulli, Distribution, Uniform};
use rand::Rng;

/// Fully connected layer computing `inputs . weight + bias`
#[derive(Debug, Clone, PartialEq)]
pub struct Linear {
    pub weight: Array2<f64>, // (in, out)
    pub bias: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct LinearGrads {
    pub weight: Array2<f64>,
    pub bias: Array1<f64>,
}

impl Linear {
    /// Weights and biases are drawn from U(-1/sqrt(in), 1/sqrt(in))
    pub fn new<R: Rng>(in_features: usize, out_features: usize, rng: &mut R) -> Linear {
        let bound = (in_features as f64).sqrt().recip();
        let distribution = Uniform::new_inclusive(-bound, bound);

        let weight =
            Array2::from_shape_fn((in_features, out_features), |_| distribution.sample(rng));
        let bias = Array1::from_shape_fn(out_features, |_| distribution.sample(rng));

        Linear { weight, bias }
    }

    pub fn in_features(&self) -> usize {
        self.weight.nrows()
    }

    pub fn out_features(&self) -> usize {
        self.weight.ncols()
    }

    pub fn forward(&self, inputs: &ArrayView2<f64>) -> Array2<f64> {
        inputs.dot(&self.weight) + &self.bias
    }

    /// Gradients of the parameters, and the gradient WRT the layer input
    pub fn backward(
        &self,
        inputs: &ArrayView2<f64>,
        grad: &Array2<f64>,
    ) -> (LinearGrads, Array2<f64>) {
        let grads = LinearGrads {
            weight: inputs.t().dot(grad),
            bias: grad.sum_axis(Axis(0)),
        };

        (grads, grad.dot(&self.weight.t()))
    }

    pub fn step(&mut self, grads: &LinearGrads, learning_rate: f64) {
        self.weight.scaled_add(-learning_rate, &grads.weight);
        self.bias.scaled_add(-learning_rate, &grads.bias);
    }

    pub fn num_parameters(&self) -> usize {
        self.weight.len() + self.bias.len()
    }
}

pub const BATCH_NORM_EPS: f64 = 1e-5;
pub const BATCH_NORM_MOMENTUM: f64 = 0.1;

/// Per-feature batch normalization with a learned scale (gamma) and shift (beta)
#[derive(Debug, Clone, PartialEq)]
pub struct BatchNorm {
    pub gamma: Array1<f64>,
    pub beta: Array1<f64>,
    pub running_mean: Array1<f64>,
    pub running_var: Array1<f64>,
}

/// What the backward pass needs from a training-mode forward pass
#[derive(Debug, Clone)]
pub struct BatchNormCache {
    normalized: Array2<f64>,
    inv_std: Array1<f64>,
}

#[derive(Debug, Clone)]
pub struct BatchNormGrads {
    pub gamma: Array1<f64>,
    pub beta: Array1<f64>,
}

impl BatchNorm {
    pub fn new(num_features: usize) -> BatchNorm {
        BatchNorm {
            gamma: Array1::ones(num_features),
            beta: Array1::zeros(num_features),
            running_mean: Array1::zeros(num_features),
            running_var: Array1::ones(num_features),
        }
    }

    pub fn num_features(&self) -> usize {
        self.gamma.len()
    }

    /// Normalize with the statistics of this batch and fold them into the
    /// running estimates
    pub fn forward_train(
        &mut self,
        inputs: &Array2<f64>,
    ) -> Result<(Array2<f64>, BatchNormCache)> {
        let n = inputs.nrows();
        if n < 2 {
            return Err(Error::Shape(format!(
                "batch normalization needs at least 2 samples in training mode, got {}",
                n
            )));
        }

        let mean = inputs
            .mean_axis(Axis(0))
            .ok_or_else(|| Error::Shape("empty batch".to_string()))?;
        let centered = inputs - &mean;
        let var = centered.mapv(|x| x * x).sum_axis(Axis(0)) / n as f64;
        let inv_std = var.mapv(|v| (v + BATCH_NORM_EPS).sqrt().recip());
        let normalized = &centered * &inv_std;
        let output = &normalized * &self.gamma + &self.beta;

        // Running variance tracks the unbiased estimate
        let unbiased_var = &var * (n as f64 / (n - 1) as f64);
        let keep = 1f64 - BATCH_NORM_MOMENTUM;
        self.running_mean = &self.running_mean * keep + &mean * BATCH_NORM_MOMENTUM;
        self.running_var = &self.running_var * keep + &unbiased_var * BATCH_NORM_MOMENTUM;

        Ok((output, BatchNormCache { normalized, inv_std }))
    }

    pub fn forward_eval(&self, inputs: &Array2<f64>) -> Array2<f64> {
        let inv_std = self
            .running_var
            .mapv(|v| (v + BATCH_NORM_EPS).sqrt().recip());

        (inputs - &self.running_mean) * &inv_std * &self.gamma + &self.beta
    }

    pub fn backward(
        &self,
        cache: &BatchNormCache,
        grad: &Array2<f64>,
    ) -> (BatchNormGrads, Array2<f64>) {
        let n = grad.nrows() as f64;
        let grads = BatchNormGrads {
            gamma: (grad * &cache.normalized).sum_axis(Axis(0)),
            beta: grad.sum_axis(Axis(0)),
        };

        // dx = inv_std / n * (n * dxhat - sum(dxhat) - xhat * sum(dxhat * xhat))
        let grad_normalized = grad * &self.gamma;
        let sum_grad = grad_normalized.sum_axis(Axis(0));
        let sum_grad_normalized = (&grad_normalized * &cache.normalized).sum_axis(Axis(0));
        let grad_input = (grad_normalized * n
            - &sum_grad
            - &cache.normalized * &sum_grad_normalized)
            * &cache.inv_std
            / n;

        (grads, grad_input)
    }

    pub fn step(&mut self, grads: &BatchNormGrads, learning_rate: f64) {
        self.gamma.scaled_add(-learning_rate, &grads.gamma);
        self.beta.scaled_add(-learning_rate, &grads.beta);
    }

    pub fn num_parameters(&self) -> usize {
        self.gamma.len() + self.beta.len()
    }
}

pub fn sigmoid(z: f64) -> f64 {
    (1f64 + (-z).exp()).recip()
}

/// Derivative of the sigmoid expressed through its output
pub fn delta_sigmoid(activated: f64) -> f64 {
    activated * (1f64 - activated)
}

/// Zeroes activations with probability `prob` during training and scales the
/// survivors by `1 / (1 - prob)`
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dropout {
    pub prob: f64,
}

impl Dropout {
    pub fn new(prob: f64) -> Result<Dropout> {
        if !(0f64..=1f64).contains(&prob) {
            return Err(Error::InvalidConfig(format!(
                "dropout probability {} is outside [0, 1]",
                prob
            )));
        }

        Ok(Dropout { prob })
    }

    /// Returns the masked output and the mask (already scaled) for the
    /// backward pass
    pub fn forward_train<R: Rng>(
        &self,
        inputs: Array2<f64>,
        rng: &mut R,
    ) -> Result<(Array2<f64>, Array2<f64>)> {
        let keep = Bernoulli::new(1f64 - self.prob)
            .map_err(|e| Error::InvalidConfig(e.to_string()))?;
        let scale = if self.prob < 1f64 {
            (1f64 - self.prob).recip()
        } else {
            0f64
        };

        let mask = Array2::from_shape_fn(inputs.raw_dim(), |_| {
            if keep.sample(rng) {
                scale
            } else {
                0f64
            }
        });

        Ok((inputs * &mask, mask))
    }
}
