use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Every failure aborts the run, so there is a single error type for the whole crate
#[derive(Debug, Error)]
pub enum Error {
    #[error("cannot read `{}`: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A malformed dataset row. `line` is 1-based
    #[error("line {line}: {message}")]
    Format { line: u64, message: String },

    #[error("shape mismatch: {0}")]
    Shape(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("malformed weights snapshot: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Csv(#[from] csv::Error),

    #[error("cannot write plot: {0}")]
    Plot(#[from] image::ImageError),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
