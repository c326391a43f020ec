// In crates/strategies/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid evaluator parameters: {0}")]
    InvalidParameters(String),

    #[error("Evaluation failed: {reason}")]
    EvaluationFailed { reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
