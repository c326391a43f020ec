// In crates/risk/src/pre_trade.rs

use crate::circuit_breaker::BreakerSnapshot;
use crate::types::PreTradeSettings;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use core_types::{ConsensusDecision, GateLayer, PortfolioState, Symbol};
use rust_decimal::Decimal;

/// A consensus decision enriched with what the gates need to size its risk.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeIntent {
    pub symbol: Symbol,
    pub decision: ConsensusDecision,
    pub entry_price: Decimal,
    pub stop_loss: Decimal,
    /// Equity fraction lost if the stop is hit at the largest allowed size.
    pub risk_fraction: f64,
}

/// Everything a gate may look at during one pass.
pub struct GateContext<'a> {
    pub portfolio: &'a PortfolioState,
    pub breaker: &'a BreakerSnapshot,
    pub intent: &'a TradeIntent,
    pub now: DateTime<Utc>,
}

/// One rejecting layer of the pipeline.
///
/// Gates evaluate in insertion order and the first `Err` short-circuits.
pub trait RiskGate: Send + Sync {
    fn layer(&self) -> GateLayer;

    fn check(&self, ctx: &GateContext<'_>) -> Result<()>;
}

/// Layer 1: account-level limits checked before anything else.
pub struct PreTradeGate {
    settings: PreTradeSettings,
}

impl PreTradeGate {
    pub fn new(settings: PreTradeSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }
}

impl RiskGate for PreTradeGate {
    fn layer(&self) -> GateLayer {
        GateLayer::PreTrade
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<()> {
        if ctx.breaker.is_open() {
            return Err(Error::CircuitBreakerOpen {
                layer: GateLayer::PreTrade,
                reason: ctx.breaker.reason(),
            });
        }

        let portfolio = ctx.portfolio;
        if portfolio.equity <= Decimal::ZERO {
            return Err(Error::rejected(
                GateLayer::PreTrade,
                format!("non-positive equity ({})", portfolio.equity),
            ));
        }

        let daily = portfolio.daily_pnl_fraction();
        if daily < -self.settings.daily_loss_cap {
            return Err(Error::rejected(
                GateLayer::PreTrade,
                format!(
                    "daily loss limit: {:.2}% below cap of -{:.2}%",
                    daily * 100.0,
                    self.settings.daily_loss_cap * 100.0
                ),
            ));
        }

        let weekly = portfolio.weekly_pnl_fraction();
        if weekly < -self.settings.weekly_loss_cap {
            return Err(Error::rejected(
                GateLayer::PreTrade,
                format!(
                    "weekly loss limit: {:.2}% below cap of -{:.2}%",
                    weekly * 100.0,
                    self.settings.weekly_loss_cap * 100.0
                ),
            ));
        }

        if portfolio.consecutive_losses >= self.settings.consecutive_loss_trip {
            return Err(Error::rejected(
                GateLayer::PreTrade,
                format!(
                    "{} consecutive losses (limit {})",
                    portfolio.consecutive_losses, self.settings.consecutive_loss_trip
                ),
            ));
        }

        if ctx.intent.risk_fraction > self.settings.max_risk_per_trade {
            return Err(Error::rejected(
                GateLayer::PreTrade,
                format!(
                    "trade risk {:.2}% exceeds per-trade cap of {:.2}%",
                    ctx.intent.risk_fraction * 100.0,
                    self.settings.max_risk_per_trade * 100.0
                ),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::circuit_breaker::BreakerStatus;
    use core_types::Direction;
    use std::collections::BTreeSet;

    pub fn closed_breaker() -> BreakerSnapshot {
        BreakerSnapshot {
            status: BreakerStatus::Closed,
            trip: None,
            generation: 0,
        }
    }

    pub fn buy_intent(symbol: &str, risk_fraction: f64) -> TradeIntent {
        TradeIntent {
            symbol: Symbol::new(symbol),
            decision: ConsensusDecision {
                action: Direction::Buy,
                confidence: 0.75,
                contributing_evaluators: BTreeSet::from(["a".to_string(), "b".to_string()]),
                agreement_ratio: 1.0,
            },
            entry_price: Decimal::from(100),
            stop_loss: Decimal::from(98),
            risk_fraction,
        }
    }
}
