// In crates/strategies/src/lib.rs

use async_trait::async_trait;
use core_types::{MarketSnapshot, Signal};

pub mod ema_crossover;
pub mod error;
pub mod factory;
pub mod mean_reversion;
pub mod supertrend;
pub mod types;

pub use error::{Error, Result};

/// The universal interface for a signal evaluator.
///
/// An evaluator inspects a market snapshot and produces at most one directional
/// `Signal`. Evaluators only read their inputs: the same instance is shared by
/// concurrent coordination cycles, so `evaluate` takes `&self`.
///
/// # Returns
///
/// * `Ok(Some(signal))`: the evaluator has an opinion (a `Hold` signal counts as
///   a response but not as a vote).
/// * `Ok(None)`: the snapshot is too short for this evaluator's lookback.
/// * `Err(_)`: the evaluation failed. The coordinator records an abstention.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// The unique id this evaluator votes and is weighted under.
    fn id(&self) -> &str;

    async fn evaluate(&self, snapshot: &MarketSnapshot) -> Result<Option<Signal>>;
}
