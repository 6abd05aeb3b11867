use rand::Rng;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::model::{loss, Model};
use crate::parsing::Dataset;

pub mod log;

pub use log::{EpochRecord, TrainingLog};

/// Where the trainer currently is. Epochs are 1-based
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    TrainingEpoch(usize),
    EvaluatingEpoch(usize),
    Done,
}

/// Per-epoch running sums, reset at the start of every pass
#[derive(Debug, Default)]
struct EpochAccumulator {
    loss_sum: f64,
    samples: usize,
    correct: usize,
}

impl EpochAccumulator {
    fn add_batch(&mut self, batch_loss: f64, batch_len: usize) {
        self.loss_sum += batch_loss * batch_len as f64;
        self.samples += batch_len;
    }

    fn mean_loss(&self) -> f64 {
        self.loss_sum / self.samples as f64
    }
}

/// Result of a full pass over the test set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Evaluation {
    pub loss: f64,
    pub correct: usize,
    pub total: usize,
}

impl Evaluation {
    pub fn accuracy(&self) -> f64 {
        100f64 * self.correct as f64 / self.total as f64
    }
}

/// One pass over `dataset` in training mode, updating the model after every
/// batch. Returns the mean loss per sample
pub fn train_epoch<M: Model, R: Rng>(
    model: &mut M,
    dataset: &Dataset,
    config: &Config,
    epoch: usize,
    rng: &mut R,
) -> Result<f64> {
    config.validate()?;
    if dataset.is_empty() {
        return Err(Error::Shape("cannot train on an empty dataset".to_string()));
    }
    let num_batches = dataset.num_batches(config.batch_size);
    let mut acc = EpochAccumulator::default();

    for (batch_idx, (inputs, labels)) in dataset.batches(config.batch_size).enumerate() {
        let loss = model.train_step(&inputs, &labels, config.learning_rate, rng)?;
        acc.add_batch(loss, inputs.nrows());

        if batch_idx % config.progress_interval == 0 {
            tracing::info!(
                "Train Epoch: {} [{}/{} ({:.0}%)]\tLoss: {:.6}",
                epoch,
                batch_idx * config.batch_size,
                dataset.len(),
                100f64 * batch_idx as f64 / num_batches as f64,
                loss
            );
        }
    }

    Ok(acc.mean_loss())
}

/// One pass over `dataset` in evaluation mode, without touching the model
pub fn evaluate<M: Model>(model: &M, dataset: &Dataset, batch_size: usize) -> Result<Evaluation> {
    if batch_size == 0 {
        return Err(Error::InvalidConfig("batch size must be positive".to_string()));
    }
    if dataset.is_empty() {
        return Err(Error::Shape("cannot evaluate an empty dataset".to_string()));
    }
    let mut acc = EpochAccumulator::default();

    for (inputs, labels) in dataset.batches(batch_size) {
        let scores = model.predict(&inputs)?;
        let (batch_loss, _) = loss::cross_entropy(&scores.view(), &labels)?;
        acc.add_batch(batch_loss, inputs.nrows());

        acc.correct += loss::argmax(&scores.view())
            .iter()
            .zip(labels.iter())
            .filter(|(predicted, actual)| predicted == actual)
            .count();
    }

    Ok(Evaluation {
        loss: acc.mean_loss(),
        correct: acc.correct,
        total: acc.samples,
    })
}

/// Drives the alternating train/evaluate epochs and collects the log
#[derive(Debug)]
pub struct Trainer {
    config: Config,
    phase: Phase,
    log: TrainingLog,
}

impl Trainer {
    pub fn new(config: Config) -> Result<Trainer> {
        config.validate()?;

        Ok(Trainer {
            config,
            phase: Phase::Idle,
            log: TrainingLog::default(),
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn log(&self) -> &TrainingLog {
        &self.log
    }

    pub fn into_log(self) -> TrainingLog {
        self.log
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!("{:?} -> {:?}", self.phase, phase);
        self.phase = phase;
    }

    /// Train for the configured number of epochs, evaluating on `test` after
    /// each one. Batches are taken in dataset order. Any error aborts the run
    pub fn run<M: Model, R: Rng>(
        &mut self,
        model: &mut M,
        train: &Dataset,
        test: &Dataset,
        rng: &mut R,
    ) -> Result<&TrainingLog> {
        if train.is_empty() || test.is_empty() {
            return Err(Error::Shape(format!(
                "training needs samples, got {} train and {} test",
                train.len(),
                test.len()
            )));
        }

        self.log = TrainingLog::default();

        for epoch in 1..=self.config.num_epochs {
            self.enter(Phase::TrainingEpoch(epoch));
            let train_loss = train_epoch(model, train, &self.config, epoch, rng)?;

            self.enter(Phase::EvaluatingEpoch(epoch));
            let evaluation = evaluate(model, test, self.config.batch_size)?;

            tracing::info!(
                "Epoch: {} Test set: Average loss: {:.4}, Accuracy: {}/{} ({:.0}%)",
                epoch,
                evaluation.loss,
                evaluation.correct,
                evaluation.total,
                evaluation.accuracy()
            );

            self.log.push(EpochRecord {
                epoch,
                train_loss,
                test_loss: evaluation.loss,
                accuracy: evaluation.accuracy(),
            });
        }

        self.enter(Phase::Done);

        Ok(&self.log)
    }
}
