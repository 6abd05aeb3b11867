pub mod config;
pub mod error;
pub mod model;
pub mod parsing;
pub mod plot;
pub mod training;

pub use error::{Error, Result};
