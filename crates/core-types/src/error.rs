// In crates/core-types/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid market snapshot for {symbol}: {reason}")]
    InvalidSnapshot { symbol: String, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
