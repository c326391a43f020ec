// In crates/core-types/src/lib.rs

pub mod error;
pub mod evaluator;
pub mod types;

// Re-export the most important types for easy access from other crates.
pub use error::{Error, Result};
pub use evaluator::EvaluatorConfig;
pub use types::{
    ConsensusDecision, Direction, DirectiveKind, ExecutionIntent, GateLayer, Kline,
    MarketSnapshot, PortfolioState, Position, PositionDirective, RiskGateResult, Side, Signal,
    Symbol,
};
