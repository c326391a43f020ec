// In crates/risk/src/lib.rs

pub mod circuit_breaker;
pub mod error;
pub mod pipeline;
pub mod portfolio;
pub mod position_monitor;
pub mod pre_trade;
pub mod sizing;
pub mod state;
pub mod types;

// Re-export public types
pub use circuit_breaker::{BreakerSnapshot, BreakerStatus, CircuitBreaker, ResetPolicy, TripReason};
pub use error::{Error, Result};
pub use pipeline::{CircuitBreakerGate, GateOutcome, RiskGatePipeline};
pub use portfolio::{CorrelationSource, PortfolioRiskGate, StaticCorrelations};
pub use position_monitor::PositionMonitor;
pub use pre_trade::{GateContext, PreTradeGate, RiskGate, TradeIntent};
pub use sizing::{PositionSizingPolicy, RiskScaler, SizingBreakdown};
pub use state::{PortfolioStore, PriceBook};
pub use types::{
    BreakerSettings, CorrelationPair, PortfolioRiskSettings, PositionMonitorSettings,
    PreTradeSettings, ResetPolicySettings, SizingSettings,
};
