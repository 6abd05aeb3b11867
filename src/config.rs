use crate::error::{Error, Result};
use crate::parsing::mnist::{NUM_CLASSES, NUM_FEATURES};

pub const HIDDEN_NODES: usize = 200;
pub const LEARNING_RATE: f64 = 0.1;
pub const BATCH_SIZE: usize = 128;
pub const NUM_EPOCHS: usize = 10;
pub const DROPOUT_PROB: f64 = 0.5;
pub const SEED: u64 = 1337;
pub const PROGRESS_INTERVAL: usize = 100;

/// Layer sizes and regularization of the network
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelConfig {
    pub input_nodes: usize,
    pub hidden_nodes: usize,
    pub output_nodes: usize,
    pub dropout_prob: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelConfig {
            input_nodes: NUM_FEATURES,
            hidden_nodes: HIDDEN_NODES,
            output_nodes: NUM_CLASSES,
            dropout_prob: DROPOUT_PROB,
        }
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.input_nodes == 0 || self.hidden_nodes == 0 || self.output_nodes == 0 {
            return Err(Error::InvalidConfig(format!(
                "layer sizes must be non-zero, got {}/{}/{}",
                self.input_nodes, self.hidden_nodes, self.output_nodes
            )));
        }
        if !(0f64..=1f64).contains(&self.dropout_prob) {
            return Err(Error::InvalidConfig(format!(
                "dropout probability {} is outside [0, 1]",
                self.dropout_prob
            )));
        }

        Ok(())
    }
}

/// Training hyperparams
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Config {
    pub learning_rate: f64,
    pub batch_size: usize,
    pub num_epochs: usize,
    pub seed: u64,
    /// Log a progress line every this many training batches
    pub progress_interval: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            learning_rate: LEARNING_RATE,
            batch_size: BATCH_SIZE,
            num_epochs: NUM_EPOCHS,
            seed: SEED,
            progress_interval: PROGRESS_INTERVAL,
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be positive".to_string()));
        }
        if self.progress_interval == 0 {
            return Err(Error::InvalidConfig(
                "progress interval must be positive".to_string(),
            ));
        }
        if !self.learning_rate.is_finite() {
            return Err(Error::InvalidConfig(format!(
                "learning rate {} is not finite",
                self.learning_rate
            )));
        }

        Ok(())
    }
}
