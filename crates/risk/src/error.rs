// In crates/risk/src/error.rs

use core_types::GateLayer;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("{reason}")]
    Rejected { layer: GateLayer, reason: String },

    #[error("circuit breaker open: {reason}")]
    CircuitBreakerOpen { layer: GateLayer, reason: String },

    #[error("Invalid risk parameters: {0}")]
    InvalidParameters(String),
}

impl Error {
    pub fn rejected(layer: GateLayer, reason: impl Into<String>) -> Self {
        Error::Rejected {
            layer,
            reason: reason.into(),
        }
    }

    /// The gate layer that produced this error, if it came from a gate.
    pub fn layer(&self) -> Option<GateLayer> {
        match self {
            Error::Rejected { layer, .. } | Error::CircuitBreakerOpen { layer, .. } => Some(*layer),
            Error::InvalidParameters(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
