//! The ordered risk gate pipeline.
//!
//! Layers run in a fixed order: pre-trade, position monitor, portfolio risk,
//! circuit breaker. The first rejection short-circuits the rejecting layers.
//! The position monitor never rejects and scans open positions on every pass.
//! Every pass, HOLD cycles included, first checks the breaker's trip
//! conditions against the pass snapshot, so a tripping condition opens the
//! breaker even when a stricter layer-1 or layer-3 cap would reject first.

use crate::circuit_breaker::{BreakerSnapshot, CircuitBreaker};
use crate::portfolio::PortfolioRiskGate;
use crate::position_monitor::PositionMonitor;
use crate::pre_trade::{GateContext, PreTradeGate, RiskGate, TradeIntent};
use crate::state::{PortfolioStore, PriceBook};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use core_types::{GateLayer, PortfolioState, PositionDirective, RiskGateResult};
use events::{AlertEvent, GateDecision};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Layer 4: evaluates trip conditions against the pass's snapshot.
pub struct CircuitBreakerGate {
    breaker: Arc<CircuitBreaker>,
}

impl CircuitBreakerGate {
    pub fn new(breaker: Arc<CircuitBreaker>) -> Self {
        Self { breaker }
    }
}

impl RiskGate for CircuitBreakerGate {
    fn layer(&self) -> GateLayer {
        GateLayer::CircuitBreaker
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<()> {
        let snapshot = self.breaker.evaluate(ctx.portfolio, ctx.now);
        if snapshot.is_open() {
            return Err(Error::CircuitBreakerOpen {
                layer: GateLayer::CircuitBreaker,
                reason: snapshot.reason(),
            });
        }
        Ok(())
    }
}

/// The verdict of one pass plus what layer 2 found.
#[derive(Debug, Clone)]
pub struct GateOutcome {
    pub result: RiskGateResult,
    pub directives: Vec<PositionDirective>,
    /// The portfolio the pass was evaluated against.
    pub portfolio: Arc<PortfolioState>,
}

pub struct RiskGatePipeline {
    pre_trade: PreTradeGate,
    monitor: PositionMonitor,
    portfolio: PortfolioRiskGate,
    breaker_gate: CircuitBreakerGate,
    breaker: Arc<CircuitBreaker>,
    store: Arc<PortfolioStore>,
    prices: Arc<PriceBook>,
    alerts: Option<broadcast::Sender<AlertEvent>>,
}

impl RiskGatePipeline {
    pub fn new(
        pre_trade: PreTradeGate,
        monitor: PositionMonitor,
        portfolio: PortfolioRiskGate,
        breaker: Arc<CircuitBreaker>,
        store: Arc<PortfolioStore>,
        prices: Arc<PriceBook>,
    ) -> Self {
        Self {
            pre_trade,
            monitor,
            portfolio,
            breaker_gate: CircuitBreakerGate::new(breaker.clone()),
            breaker,
            store,
            prices,
            alerts: None,
        }
    }

    pub fn with_alerts(mut self, alerts: broadcast::Sender<AlertEvent>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    pub fn store(&self) -> &Arc<PortfolioStore> {
        &self.store
    }

    pub fn prices(&self) -> &Arc<PriceBook> {
        &self.prices
    }

    /// Runs every layer against one portfolio snapshot.
    pub fn evaluate(&self, intent: &TradeIntent, now: DateTime<Utc>) -> GateOutcome {
        let portfolio = self.store.snapshot();
        let breaker: BreakerSnapshot = self.breaker.evaluate(&portfolio, now);
        let ctx = GateContext {
            portfolio: &portfolio,
            breaker: &breaker,
            intent,
            now,
        };

        let pre_trade = self.pre_trade.check(&ctx);
        let directives = self.monitor.scan(&portfolio, &self.prices, now);
        let verdict = pre_trade
            .and_then(|()| self.portfolio.check(&ctx))
            .and_then(|()| self.breaker_gate.check(&ctx));

        let result = match verdict {
            Ok(()) => {
                tracing::info!(symbol = %intent.symbol, action = %intent.decision.action, "Risk gate approved.");
                RiskGateResult::approved()
            }
            Err(e) => {
                let layer = e.layer().unwrap_or(GateLayer::PreTrade);
                tracing::info!(symbol = %intent.symbol, %layer, reason = %e, "Risk gate rejected.");
                RiskGateResult::rejected(layer, e.to_string())
            }
        };

        self.publish(AlertEvent::GateDecision(GateDecision {
            timestamp: now,
            symbol: intent.symbol.clone(),
            result: result.clone(),
        }));
        self.publish_directives(&directives);

        GateOutcome {
            result,
            directives,
            portfolio,
        }
    }

    /// Layer 2 on its own, for cycles that produced no actionable decision.
    pub fn monitor_positions(&self, now: DateTime<Utc>) -> Vec<PositionDirective> {
        let portfolio = self.store.snapshot();
        self.breaker.evaluate(&portfolio, now);
        let directives = self.monitor.scan(&portfolio, &self.prices, now);
        self.publish_directives(&directives);
        directives
    }

    /// Latest breaker read before an approved intent leaves the subsystem.
    pub fn breaker_allows_entry(&self, now: DateTime<Utc>) -> bool {
        !self.breaker.status(now).is_open()
    }

    fn publish_directives(&self, directives: &[PositionDirective]) {
        for d in directives {
            tracing::warn!(symbol = %d.symbol, kind = ?d.kind, reason = %d.reason, "Position directive.");
            self.publish(AlertEvent::PositionDirective(d.clone()));
        }
    }

    fn publish(&self, event: AlertEvent) {
        if let Some(tx) = &self.alerts {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::portfolio::StaticCorrelations;
    use crate::pre_trade::test_support::buy_intent;
    use crate::types::{ResetPolicySettings, fixtures};
    use chrono::Duration;
    use core_types::{Position, Side, Symbol};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Harness {
        pipeline: RiskGatePipeline,
        store: Arc<PortfolioStore>,
        alerts: broadcast::Receiver<AlertEvent>,
    }

    fn harness(policy: ResetPolicySettings) -> Harness {
        let (tx, rx) = broadcast::channel(64);
        let store = Arc::new(PortfolioStore::new(PortfolioState::new(dec!(10_000))));
        let breaker = Arc::new(CircuitBreaker::new(fixtures::breaker(policy)).with_alerts(tx.clone()));
        let pipeline = RiskGatePipeline::new(
            PreTradeGate::new(fixtures::pre_trade()).unwrap(),
            PositionMonitor::new(fixtures::monitor()).unwrap(),
            PortfolioRiskGate::new(fixtures::portfolio(), Arc::new(StaticCorrelations::default())).unwrap(),
            breaker,
            store.clone(),
            Arc::new(PriceBook::new(Duration::hours(1))),
        )
        .with_alerts(tx);
        Harness {
            pipeline,
            store,
            alerts: rx,
        }
    }

    fn losing_trade(store: &PortfolioStore) {
        store.open_position(Position {
            symbol: Symbol::new("SOLUSDT"),
            side: Side::Long,
            entry_price: dec!(100),
            size: 0.05,
            entry_time: Utc::now(),
            stop_loss: dec!(98),
            take_profit: None,
            scaled_out: false,
        });
        store.close_position(&Symbol::new("SOLUSDT"), dec!(-10));
    }

    #[test]
    fn test_clean_state_is_approved() {
        let h = harness(ResetPolicySettings::Manual);
        let outcome = h.pipeline.evaluate(&buy_intent("BTCUSDT", 0.01), Utc::now());
        assert!(outcome.result.approved);
        assert_eq!(outcome.result.layer, GateLayer::CircuitBreaker);
    }

    #[test]
    fn test_daily_loss_rejected_at_pre_trade() {
        let mut h = harness(ResetPolicySettings::Manual);
        h.store.update(|s| s.daily_pnl = Decimal::from(-600));
        let outcome = h.pipeline.evaluate(&buy_intent("BTCUSDT", 0.01), Utc::now());
        assert!(!outcome.result.approved);
        assert_eq!(outcome.result.layer, GateLayer::PreTrade);
        assert!(outcome.result.reason.contains("daily loss limit"));

        let published = h.alerts.try_recv().unwrap();
        assert!(matches!(published, AlertEvent::GateDecision(d) if !d.result.approved));
    }

    #[test]
    fn test_loss_streak_trips_breaker_until_reset() {
        let mut h = harness(ResetPolicySettings::Manual);
        for _ in 0..5 {
            losing_trade(&h.store);
        }
        let now = Utc::now();

        // The streak meets both the pre-trade cap and the trip count; the breaker opens first.
        let first = h.pipeline.evaluate(&buy_intent("BTCUSDT", 0.01), now);
        assert!(!first.result.approved);
        assert!(first.result.reason.starts_with("circuit breaker open"));
        assert!(h.pipeline.breaker().is_open());
        let tripped = std::iter::from_fn(|| h.alerts.try_recv().ok())
            .filter(|e| matches!(e, AlertEvent::BreakerTripped(_)))
            .count();
        assert_eq!(tripped, 1);

        let second = h.pipeline.evaluate(&buy_intent("BTCUSDT", 0.01), now + Duration::hours(6));
        assert!(second.result.reason.starts_with("circuit breaker open"));
        assert!(!h.pipeline.breaker_allows_entry(now + Duration::hours(6)));

        assert!(h.pipeline.breaker().reset(now + Duration::hours(7)));
        h.store.reset_loss_streak();
        let third = h.pipeline.evaluate(&buy_intent("BTCUSDT", 0.01), now + Duration::hours(7));
        assert!(third.result.approved);
    }

    #[test]
    fn test_monitor_pass_trips_breaker() {
        let h = harness(ResetPolicySettings::Manual);
        h.store.update(|s| s.consecutive_losses = 5);
        assert!(h.pipeline.monitor_positions(Utc::now()).is_empty());
        assert!(h.pipeline.breaker().is_open());
    }

    #[test]
    fn test_drawdown_trip_is_cited_before_portfolio_limit() {
        let mut h = harness(ResetPolicySettings::Manual);
        // Over both the portfolio limit (15%) and the breaker threshold (20%).
        h.store.update(|s| s.current_drawdown = 0.22);

        let outcome = h.pipeline.evaluate(&buy_intent("BTCUSDT", 0.01), Utc::now());
        assert!(!outcome.result.approved);
        assert!(outcome.result.reason.contains("drawdown"));
        assert!(h.pipeline.breaker().is_open());
        assert!(matches!(h.alerts.try_recv().unwrap(), AlertEvent::BreakerTripped(_)));
    }

    #[test]
    fn test_layer_four_rejects_trip_between_read_and_check() {
        let h = harness(ResetPolicySettings::Manual);
        let gate = CircuitBreakerGate::new(h.pipeline.breaker().clone());
        let portfolio = h.store.snapshot();
        let closed = h.pipeline.breaker().status(Utc::now());
        let intent = buy_intent("BTCUSDT", 0.01);
        let ctx = GateContext {
            portfolio: &portfolio,
            breaker: &closed,
            intent: &intent,
            now: Utc::now(),
        };
        assert!(gate.check(&ctx).is_ok());

        h.pipeline
            .breaker()
            .trip(crate::circuit_breaker::TripReason::Manual("ops".to_string()), Utc::now());
        let err = gate.check(&ctx).unwrap_err();
        assert_eq!(err.layer(), Some(GateLayer::CircuitBreaker));
    }

    #[test]
    fn test_directives_are_reported_even_when_rejected() {
        let h = harness(ResetPolicySettings::Manual);
        let now = Utc::now();
        h.store.open_position(Position {
            symbol: Symbol::new("ETHUSDT"),
            side: Side::Long,
            entry_price: dec!(2_000),
            size: 0.1,
            entry_time: now,
            stop_loss: dec!(1_950),
            take_profit: None,
            scaled_out: false,
        });
        h.pipeline.prices().record(&Symbol::new("ETHUSDT"), now, dec!(1_940));
        h.store.update(|s| s.daily_pnl = Decimal::from(-600));

        let outcome = h.pipeline.evaluate(&buy_intent("BTCUSDT", 0.01), now);
        assert!(!outcome.result.approved);
        assert_eq!(outcome.directives.len(), 1);
        assert_eq!(h.pipeline.monitor_positions(now).len(), 1);
    }
}
