use ndarray::{Array2, ArrayView1, ArrayView2};
use rand::Rng;

use crate::error::Result;

pub mod layers;
pub mod loss;
pub mod neural_net;

/// Whether batch statistics and dropout are active
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

pub trait Model {
    /// Run one training-mode forward/backward pass on a batch and update the
    /// parameters. Returns the mean loss of the batch
    fn train_step<R: Rng>(
        &mut self,
        inputs: &ArrayView2<f64>,
        labels: &ArrayView1<usize>,
        learning_rate: f64,
        rng: &mut R,
    ) -> Result<f64>;

    /// Raw class scores for a batch, evaluation mode
    fn predict(&self, inputs: &ArrayView2<f64>) -> Result<Array2<f64>>;
}
