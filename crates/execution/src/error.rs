// In crates/execution/src/error.rs

use core_types::Symbol;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Execution failed: {reason}")]
    ExecutionFailed { reason: String },

    #[error("No open position found for symbol {0}")]
    NoPosition(Symbol),
}

pub type Result<T> = std::result::Result<T, Error>;
