// In crates/execution/src/lib.rs

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{ExecutionIntent, PositionDirective};
use rust_decimal::Decimal;

pub mod error;
pub mod paper;
pub mod types;

// Re-export public types
pub use error::{Error, Result};
pub use paper::PaperExecutor;
pub use types::{ClosedTrade, Fill, SimulationSettings};

/// The collaborator approved intents are handed to.
///
/// Implementations own order placement. The coordinator only guarantees that
/// no directional intent is submitted while the circuit breaker is open.
#[async_trait]
pub trait ExecutionSink: Send + Sync {
    /// The name of the sink (e.g., "PaperExecutor").
    fn name(&self) -> &'static str;

    /// Opens a position for an approved, sized intent.
    async fn submit(&self, intent: &ExecutionIntent) -> Result<Fill>;

    /// Acts on a position-monitor directive at the latest `price`, observed at `at`.
    ///
    /// Returns the realized trade when the directive closed all or part of a position.
    async fn on_directive(
        &self,
        directive: &PositionDirective,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Option<ClosedTrade>>;
}
