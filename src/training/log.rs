use serde::Serialize;
use std::path::Path;

use crate::error::{Error, Result};

/// Metrics of one completed epoch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct EpochRecord {
    /// 1-based
    pub epoch: usize,
    /// Mean cross-entropy over every training sample
    pub train_loss: f64,
    pub test_loss: f64,
    /// Percentage of test samples classified correctly, in [0, 100]
    pub accuracy: f64,
}

/// Append-only history of a training run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TrainingLog {
    records: Vec<EpochRecord>,
}

impl TrainingLog {
    pub(crate) fn push(&mut self, record: EpochRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[EpochRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn final_accuracy(&self) -> Option<f64> {
        self.records.last().map(|r| r.accuracy)
    }

    /// Write the log as `epoch,train_loss,test_loss,accuracy` rows
    pub fn write_csv(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut writer = csv::Writer::from_path(path)?;

        for record in &self.records {
            writer.serialize(record)?;
        }
        writer.flush().map_err(|e| Error::io(path, e))?;

        tracing::debug!("wrote {} epoch records to {}", self.len(), path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn csv_has_header_and_one_row_per_epoch() {
        let mut log = TrainingLog::default();
        log.push(EpochRecord {
            epoch: 1,
            train_loss: 0.5,
            test_loss: 0.25,
            accuracy: 90.0,
        });
        log.push(EpochRecord {
            epoch: 2,
            train_loss: 0.25,
            test_loss: 0.125,
            accuracy: 95.5,
        });

        let path = std::env::temp_dir().join(format!("mnist_mlp_log_{}.csv", std::process::id()));
        log.write_csv(&path).unwrap();
        let contents = std::fs::read_to_string(&path).unwrap();
        std::fs::remove_file(&path).unwrap();

        assert_eq!(
            contents,
            "epoch,train_loss,test_loss,accuracy\n1,0.5,0.25,90.0\n2,0.25,0.125,95.5\n"
        );
        assert_eq!(log.final_accuracy(), Some(95.5));
    }
}
