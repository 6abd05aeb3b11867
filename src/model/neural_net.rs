use crate::config::ModelConfig;
use crate::error::{Error, Result};
use json::JsonValue;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::Rng;
use std::{fs, path::Path};

use super::layers::{
    delta_sigmoid, sigmoid, BatchNorm, BatchNormCache, BatchNormGrads, Dropout, Linear,
    LinearGrads,
};
use super::loss::cross_entropy;
use super::{Mode, Model};

/// The MNIST classifier:
/// Linear -> BatchNorm -> Sigmoid -> Linear -> BatchNorm -> Sigmoid -> Linear -> Dropout
#[derive(Debug, Clone, PartialEq)]
pub struct NeuralNet {
    pub config: ModelConfig,
    pub linear1: Linear,
    pub norm1: BatchNorm,
    pub linear2: Linear,
    pub norm2: BatchNorm,
    pub linear3: Linear,
    pub dropout: Dropout,
}

/// Activations kept from a training-mode forward pass for backprop
struct ForwardCache {
    norm1: BatchNormCache,
    activated1: Array2<f64>,
    norm2: BatchNormCache,
    activated2: Array2<f64>,
    mask: Array2<f64>,
}

/// Gradients of the loss WRT every trainable parameter
#[derive(Debug, Clone)]
pub struct Gradients {
    pub linear1: LinearGrads,
    pub norm1: BatchNormGrads,
    pub linear2: LinearGrads,
    pub norm2: BatchNormGrads,
    pub linear3: LinearGrads,
}

impl NeuralNet {
    /// Construct a new neural net with freshly initialized weights
    pub fn new<R: Rng>(config: ModelConfig, rng: &mut R) -> Result<NeuralNet> {
        config.validate()?;

        Ok(NeuralNet {
            linear1: Linear::new(config.input_nodes, config.hidden_nodes, rng),
            norm1: BatchNorm::new(config.hidden_nodes),
            linear2: Linear::new(config.hidden_nodes, config.hidden_nodes, rng),
            norm2: BatchNorm::new(config.hidden_nodes),
            linear3: Linear::new(config.hidden_nodes, config.output_nodes, rng),
            dropout: Dropout::new(config.dropout_prob)?,
            config,
        })
    }

    pub fn num_parameters(&self) -> usize {
        self.linear1.num_parameters()
            + self.norm1.num_parameters()
            + self.linear2.num_parameters()
            + self.norm2.num_parameters()
            + self.linear3.num_parameters()
    }

    fn check_inputs(&self, inputs: &ArrayView2<f64>) -> Result<()> {
        if inputs.ncols() != self.config.input_nodes {
            return Err(Error::Shape(format!(
                "expected {} input features, got {}",
                self.config.input_nodes,
                inputs.ncols()
            )));
        }

        Ok(())
    }

    /// Compute the class scores of a batch in the given mode
    pub fn forward<R: Rng>(
        &mut self,
        inputs: &ArrayView2<f64>,
        mode: Mode,
        rng: &mut R,
    ) -> Result<Array2<f64>> {
        match mode {
            Mode::Train => self.forward_train(inputs, rng).map(|(scores, _)| scores),
            Mode::Eval => self.predict(inputs),
        }
    }

    fn forward_train<R: Rng>(
        &mut self,
        inputs: &ArrayView2<f64>,
        rng: &mut R,
    ) -> Result<(Array2<f64>, ForwardCache)> {
        self.check_inputs(inputs)?;

        let (normalized1, norm1) = self.norm1.forward_train(&self.linear1.forward(inputs))?;
        let activated1 = normalized1.mapv(sigmoid);
        let (normalized2, norm2) = self
            .norm2
            .forward_train(&self.linear2.forward(&activated1.view()))?;
        let activated2 = normalized2.mapv(sigmoid);
        let (scores, mask) = self
            .dropout
            .forward_train(self.linear3.forward(&activated2.view()), rng)?;

        let cache = ForwardCache {
            norm1,
            activated1,
            norm2,
            activated2,
            mask,
        };

        Ok((scores, cache))
    }

    /// Push the gradient of the loss WRT the scores back through the layers
    fn backward(
        &self,
        inputs: &ArrayView2<f64>,
        cache: &ForwardCache,
        grad: Array2<f64>,
    ) -> Gradients {
        let grad = grad * &cache.mask;
        let (linear3, grad) = self.linear3.backward(&cache.activated2.view(), &grad);

        let grad = grad * &cache.activated2.mapv(delta_sigmoid);
        let (norm2, grad) = self.norm2.backward(&cache.norm2, &grad);
        let (linear2, grad) = self.linear2.backward(&cache.activated1.view(), &grad);

        let grad = grad * &cache.activated1.mapv(delta_sigmoid);
        let (norm1, grad) = self.norm1.backward(&cache.norm1, &grad);
        let (linear1, _) = self.linear1.backward(inputs, &grad);

        Gradients {
            linear1,
            norm1,
            linear2,
            norm2,
            linear3,
        }
    }

    /// Training-mode forward pass followed by backprop. Running statistics
    /// are updated, parameters are not
    pub fn gradients<R: Rng>(
        &mut self,
        inputs: &ArrayView2<f64>,
        labels: &ArrayView1<usize>,
        rng: &mut R,
    ) -> Result<(f64, Gradients)> {
        if inputs.nrows() != labels.len() {
            return Err(Error::Shape(format!(
                "{} input rows but {} labels",
                inputs.nrows(),
                labels.len()
            )));
        }

        let (scores, cache) = self.forward_train(inputs, rng)?;
        let (loss, grad) = cross_entropy(&scores.view(), labels)?;

        Ok((loss, self.backward(inputs, &cache, grad)))
    }

    /// Perform a plain GD step
    pub fn apply(&mut self, grads: &Gradients, learning_rate: f64) {
        self.linear1.step(&grads.linear1, learning_rate);
        self.norm1.step(&grads.norm1, learning_rate);
        self.linear2.step(&grads.linear2, learning_rate);
        self.norm2.step(&grads.norm2, learning_rate);
        self.linear3.step(&grads.linear3, learning_rate);
    }

    /// Write every parameter and running statistic as JSON. Each entry is
    /// keyed by e.g. `linear1.weight` and holds its shape and row-major data
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut data = JsonValue::new_object();

        for (name, linear) in self.linears() {
            let shape = [linear.in_features(), linear.out_features()];
            data[format!("{}.weight", name)] = entry(&shape, linear.weight.iter());
            data[format!("{}.bias", name)] = entry(&[linear.out_features()], linear.bias.iter());
        }
        for (name, norm) in self.norms() {
            data[format!("{}.gamma", name)] = entry(&[norm.num_features()], norm.gamma.iter());
            data[format!("{}.beta", name)] = entry(&[norm.num_features()], norm.beta.iter());
            data[format!("{}.running_mean", name)] =
                entry(&[norm.num_features()], norm.running_mean.iter());
            data[format!("{}.running_var", name)] =
                entry(&[norm.num_features()], norm.running_var.iter());
        }

        fs::write(path, data.dump()).map_err(|e| Error::io(path, e))?;
        tracing::debug!("saved {} parameters to {}", self.num_parameters(), path.display());

        Ok(())
    }

    /// Rebuild a network saved with `save`. The stored shapes must agree with
    /// `config`
    pub fn load(path: impl AsRef<Path>, config: ModelConfig) -> Result<NeuralNet> {
        config.validate()?;
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let data = json::parse(&contents).map_err(|e| Error::Snapshot(e.to_string()))?;

        let read_linear = |name: &str, rows: usize, cols: usize| -> Result<Linear> {
            let weight = read_values(&data, &format!("{}.weight", name), &[rows, cols])?;
            let bias = read_values(&data, &format!("{}.bias", name), &[cols])?;

            Ok(Linear {
                weight: Array2::from_shape_vec((rows, cols), weight)
                    .map_err(|e| Error::Shape(e.to_string()))?,
                bias: Array1::from(bias),
            })
        };
        let read_norm = |name: &str, features: usize| -> Result<BatchNorm> {
            let read = |field: &str| {
                read_values(&data, &format!("{}.{}", name, field), &[features]).map(Array1::from)
            };

            Ok(BatchNorm {
                gamma: read("gamma")?,
                beta: read("beta")?,
                running_mean: read("running_mean")?,
                running_var: read("running_var")?,
            })
        };

        Ok(NeuralNet {
            linear1: read_linear("linear1", config.input_nodes, config.hidden_nodes)?,
            norm1: read_norm("norm1", config.hidden_nodes)?,
            linear2: read_linear("linear2", config.hidden_nodes, config.hidden_nodes)?,
            norm2: read_norm("norm2", config.hidden_nodes)?,
            linear3: read_linear("linear3", config.hidden_nodes, config.output_nodes)?,
            dropout: Dropout::new(config.dropout_prob)?,
            config,
        })
    }

    fn linears(&self) -> [(&'static str, &Linear); 3] {
        [
            ("linear1", &self.linear1),
            ("linear2", &self.linear2),
            ("linear3", &self.linear3),
        ]
    }

    fn norms(&self) -> [(&'static str, &BatchNorm); 2] {
        [("norm1", &self.norm1), ("norm2", &self.norm2)]
    }
}

fn entry<'a>(shape: &[usize], values: impl Iterator<Item = &'a f64>) -> JsonValue {
    let mut entry = JsonValue::new_object();
    entry["shape"] = shape.to_vec().into();
    entry["data"] = values.copied().collect::<Vec<f64>>().into();

    entry
}

fn read_values(data: &JsonValue, key: &str, expected_shape: &[usize]) -> Result<Vec<f64>> {
    let entry = &data[key];
    if entry.is_null() {
        return Err(Error::Snapshot(format!("missing `{}`", key)));
    }

    let shape = entry["shape"]
        .members()
        .map(|x| x.as_usize())
        .collect::<Option<Vec<usize>>>()
        .ok_or_else(|| Error::Snapshot(format!("`{}` has an invalid shape", key)))?;
    if shape != expected_shape {
        return Err(Error::Shape(format!(
            "`{}` is stored as {:?} but the model expects {:?}",
            key, shape, expected_shape
        )));
    }

    let values = entry["data"]
        .members()
        .map(|x| x.as_f64())
        .collect::<Option<Vec<f64>>>()
        .ok_or_else(|| Error::Snapshot(format!("`{}` holds a non-numeric value", key)))?;
    if values.len() != shape.iter().product::<usize>() {
        return Err(Error::Snapshot(format!(
            "`{}` holds {} values for shape {:?}",
            key,
            values.len(),
            shape
        )));
    }

    Ok(values)
}

impl Model for NeuralNet {
    fn train_step<R: Rng>(
        &mut self,
        inputs: &ArrayView2<f64>,
        labels: &ArrayView1<usize>,
        learning_rate: f64,
        rng: &mut R,
    ) -> Result<f64> {
        let (loss, grads) = self.gradients(inputs, labels, rng)?;
        self.apply(&grads, learning_rate);

        Ok(loss)
    }

    /// Evaluation mode: running statistics instead of batch statistics, no dropout
    fn predict(&self, inputs: &ArrayView2<f64>) -> Result<Array2<f64>> {
        self.check_inputs(inputs)?;

        let activated1 = self
            .norm1
            .forward_eval(&self.linear1.forward(inputs))
            .mapv(sigmoid);
        let activated2 = self
            .norm2
            .forward_eval(&self.linear2.forward(&activated1.view()))
            .mapv(sigmoid);

        Ok(self.linear3.forward(&activated2.view()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_config(dropout_prob: f64) -> ModelConfig {
        ModelConfig {
            input_nodes: 5,
            hidden_nodes: 4,
            output_nodes: 3,
            dropout_prob,
        }
    }

    fn batch(rows: usize, cols: usize) -> Array2<f64> {
        Array::from_shape_fn((rows, cols), |(i, j)| ((i * 7 + j * 3) % 11) as f64 / 10.0)
    }

    #[test]
    fn parameter_count_matches_reference_network() {
        let mut rng = StdRng::seed_from_u64(1337);
        let net = NeuralNet::new(ModelConfig::default(), &mut rng).unwrap();

        assert_eq!(net.num_parameters(), 200_010);
    }

    #[test]
    fn eval_output_has_one_row_per_sample() {
        let mut rng = StdRng::seed_from_u64(1337);
        let net = NeuralNet::new(ModelConfig::default(), &mut rng).unwrap();

        for rows in [1, 3, 128] {
            let scores = net.predict(&batch(rows, 784).view()).unwrap();
            assert_eq!(scores.dim(), (rows, 10));
        }
    }

    #[test]
    fn rejects_wrong_feature_count() {
        let mut rng = StdRng::seed_from_u64(1337);
        let mut net = NeuralNet::new(ModelConfig::default(), &mut rng).unwrap();
        let inputs = batch(4, 783);

        assert!(matches!(net.predict(&inputs.view()), Err(Error::Shape(_))));
        assert!(matches!(
            net.forward(&inputs.view(), Mode::Train, &mut rng),
            Err(Error::Shape(_))
        ));
    }

    #[test]
    fn training_needs_more_than_one_sample() {
        let mut rng = StdRng::seed_from_u64(1337);
        let mut net = NeuralNet::new(small_config(0.5), &mut rng).unwrap();
        let inputs = batch(1, 5);

        assert!(matches!(
            net.forward(&inputs.view(), Mode::Train, &mut rng),
            Err(Error::Shape(_))
        ));
        assert_eq!(net.forward(&inputs.view(), Mode::Eval, &mut rng).unwrap().dim(), (1, 3));
    }

    #[test]
    fn eval_is_deterministic_and_train_is_not() {
        let mut rng = StdRng::seed_from_u64(1337);
        let mut net = NeuralNet::new(ModelConfig::default(), &mut rng).unwrap();
        let inputs = batch(16, 784);

        let first = net.forward(&inputs.view(), Mode::Eval, &mut rng).unwrap();
        let second = net.forward(&inputs.view(), Mode::Eval, &mut rng).unwrap();
        assert_eq!(first, second);

        let first = net.forward(&inputs.view(), Mode::Train, &mut rng).unwrap();
        let second = net.forward(&inputs.view(), Mode::Train, &mut rng).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn backward_matches_finite_differences() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut net = NeuralNet::new(small_config(0.0), &mut rng).unwrap();
        let inputs = batch(6, 5);
        let labels = Array::from_shape_fn(6, |i| i % 3);

        let (_, grads) = net.gradients(&inputs.view(), &labels.view(), &mut rng).unwrap();

        let h = 1e-6;
        let loss_with = |perturb: &dyn Fn(&mut NeuralNet)| -> f64 {
            let mut copy = net.clone();
            perturb(&mut copy);
            copy.gradients(&inputs.view(), &labels.view(), &mut StdRng::seed_from_u64(0))
                .unwrap()
                .0
        };
        let numeric = |perturb: &dyn Fn(&mut NeuralNet, f64)| -> f64 {
            let plus = loss_with(&|n: &mut NeuralNet| perturb(n, h));
            let minus = loss_with(&|n: &mut NeuralNet| perturb(n, -h));
            (plus - minus) / (2.0 * h)
        };

        assert_abs_diff_eq!(
            numeric(&|n: &mut NeuralNet, d: f64| n.linear1.weight[[0, 1]] += d),
            grads.linear1.weight[[0, 1]],
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            numeric(&|n: &mut NeuralNet, d: f64| n.norm1.gamma[2] += d),
            grads.norm1.gamma[2],
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            numeric(&|n: &mut NeuralNet, d: f64| n.linear2.bias[1] += d),
            grads.linear2.bias[1],
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            numeric(&|n: &mut NeuralNet, d: f64| n.norm2.beta[0] += d),
            grads.norm2.beta[0],
            epsilon = 1e-6
        );
        assert_abs_diff_eq!(
            numeric(&|n: &mut NeuralNet, d: f64| n.linear3.weight[[3, 2]] += d),
            grads.linear3.weight[[3, 2]],
            epsilon = 1e-6
        );
    }

    #[test]
    fn repeated_steps_reduce_loss() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut net = NeuralNet::new(small_config(0.0), &mut rng).unwrap();
        let inputs = batch(9, 5);
        let labels = Array::from_shape_fn(9, |i| i % 3);

        let first = net
            .train_step(&inputs.view(), &labels.view(), 0.1, &mut rng)
            .unwrap();
        let mut last = first;
        for _ in 0..200 {
            last = net
                .train_step(&inputs.view(), &labels.view(), 0.1, &mut rng)
                .unwrap();
        }

        assert!(last < first, "loss went from {} to {}", first, last);
    }

    #[test]
    fn snapshot_round_trip_preserves_predictions() {
        let mut rng = StdRng::seed_from_u64(5);
        let mut net = NeuralNet::new(small_config(0.5), &mut rng).unwrap();
        let inputs = batch(8, 5);
        let labels = Array::from_shape_fn(8, |i| i % 3);
        net.train_step(&inputs.view(), &labels.view(), 0.1, &mut rng)
            .unwrap();

        let path = std::env::temp_dir()
            .join(format!("mnist_mlp_snapshot_{}.json", std::process::id()));
        net.save(&path).unwrap();
        let loaded = NeuralNet::load(&path, small_config(0.5)).unwrap();
        let wider = ModelConfig {
            hidden_nodes: 5,
            ..small_config(0.5)
        };
        let mismatched = NeuralNet::load(&path, wider);
        std::fs::remove_file(&path).unwrap();

        let expected = net.predict(&inputs.view()).unwrap();
        let actual = loaded.predict(&inputs.view()).unwrap();
        for (a, b) in actual.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
        }
        assert!(matches!(mismatched, Err(Error::Shape(_))));
    }

    #[test]
    fn loading_garbage_is_a_snapshot_error() {
        let path = std::env::temp_dir()
            .join(format!("mnist_mlp_garbage_{}.json", std::process::id()));
        std::fs::write(&path, "{\"linear1.weight\": 3").unwrap();
        let result = NeuralNet::load(&path, small_config(0.5));
        std::fs::remove_file(&path).unwrap();

        assert!(matches!(result, Err(Error::Snapshot(_))));
    }
}
