// In crates/execution/src/paper.rs

use crate::types::{ClosedTrade, Fill, SimulationSettings};
use crate::{Error, ExecutionSink, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use core_types::{DirectiveKind, Direction, ExecutionIntent, Position, PositionDirective, Side, Symbol};
use events::{AlertEvent, IntentSubmitted, PositionClosed};
use num_traits::{FromPrimitive, ToPrimitive};
use risk::PortfolioStore;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Simulated execution against the shared portfolio store.
///
/// Fills at the intent's reference price adjusted for slippage and charges the
/// taker fee on both legs. Realized PnL is booked into the store.
pub struct PaperExecutor {
    settings: SimulationSettings,
    store: Arc<PortfolioStore>,
    alerts: Option<broadcast::Sender<AlertEvent>>,
}

impl PaperExecutor {
    pub fn new(settings: SimulationSettings, store: Arc<PortfolioStore>) -> Self {
        Self {
            settings,
            store,
            alerts: None,
        }
    }

    pub fn with_alerts(mut self, alerts: broadcast::Sender<AlertEvent>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    fn rate(value: f64) -> Result<Decimal> {
        Decimal::from_f64(value).ok_or_else(|| Error::ExecutionFailed {
            reason: format!("unrepresentable rate {value}"),
        })
    }

    /// Slippage always moves the fill against the trader.
    fn slipped(&self, price: Decimal, buying: bool) -> Result<Decimal> {
        let slippage = Self::rate(self.settings.slippage_percent)?;
        Ok(if buying {
            price * (dec!(1) + slippage)
        } else {
            price * (dec!(1) - slippage)
        })
    }

    /// Closes `fraction` of the position at `price`. A fraction of 1 removes it.
    fn process_close(
        &self,
        symbol: &Symbol,
        price: Decimal,
        fraction: Decimal,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<ClosedTrade> {
        let state = self.store.snapshot();
        let position = state
            .open_positions
            .get(symbol)
            .ok_or_else(|| Error::NoPosition(symbol.clone()))?;

        let execution_price = self.slipped(price, position.side == Side::Short)?;
        let size = Decimal::from_f64(position.size).unwrap_or_default();
        let notional = state.equity * size * fraction;
        let gross = notional * Decimal::from_f64(position.pnl_fraction(execution_price)).unwrap_or_default();
        let fee = notional * Self::rate(self.settings.taker_fee)?;
        let pnl = gross - fee;

        let full_close = fraction >= Decimal::ONE;
        if full_close {
            self.store.close_position(symbol, pnl);
        } else {
            self.store.apply_directive(&PositionDirective {
                symbol: symbol.clone(),
                kind: DirectiveKind::ScaleOut,
                reason: reason.to_string(),
            });
            self.store.realize(pnl);
        }

        let return_fraction = if state.equity > Decimal::ZERO {
            (pnl / state.equity).to_f64().unwrap_or(0.0)
        } else {
            0.0
        };
        tracing::info!(%symbol, exit = %execution_price, %pnl, full_close, reason, "Paper position closed.");
        self.publish(AlertEvent::PositionClosed(PositionClosed {
            timestamp: at,
            symbol: symbol.clone(),
            exit_price: execution_price,
            pnl,
            reason: reason.to_string(),
        }));

        Ok(ClosedTrade {
            symbol: symbol.clone(),
            exit_price: execution_price,
            pnl,
            return_fraction,
            full_close,
        })
    }

    fn publish(&self, event: AlertEvent) {
        if let Some(tx) = &self.alerts {
            let _ = tx.send(event);
        }
    }
}

#[async_trait]
impl ExecutionSink for PaperExecutor {
    fn name(&self) -> &'static str {
        "PaperExecutor"
    }

    async fn submit(&self, intent: &ExecutionIntent) -> Result<Fill> {
        let side = Side::from_direction(intent.action).ok_or_else(|| Error::ExecutionFailed {
            reason: "HOLD intents cannot be executed".to_string(),
        })?;

        if let Some(existing) = self.store.snapshot().open_positions.get(&intent.symbol) {
            if existing.side == side {
                return Err(Error::ExecutionFailed {
                    reason: format!("{:?} position already open for {}", side, intent.symbol),
                });
            }
            // Reversal: flatten before opening the other side.
            self.process_close(&intent.symbol, intent.reference_price, Decimal::ONE, "reversal", intent.decided_at)?;
        }

        let execution_price = self.slipped(intent.reference_price, intent.action == Direction::Buy)?;
        let state = self.store.snapshot();
        let notional = state.equity * Decimal::from_f64(intent.size_fraction).unwrap_or_default();
        let fee = notional * Self::rate(self.settings.taker_fee)?;
        if state.equity < fee {
            return Err(Error::ExecutionFailed {
                reason: "Insufficient equity for fees".to_string(),
            });
        }
        self.store.realize(-fee);

        self.store.open_position(Position {
            symbol: intent.symbol.clone(),
            side,
            entry_price: execution_price,
            size: intent.size_fraction,
            entry_time: intent.decided_at,
            stop_loss: intent.stop_loss,
            take_profit: intent.take_profit,
            scaled_out: false,
        });

        tracing::info!(
            symbol = %intent.symbol,
            ?side,
            price = %execution_price,
            size = intent.size_fraction,
            "Paper position opened."
        );
        self.publish(AlertEvent::IntentSubmitted(IntentSubmitted {
            timestamp: intent.decided_at,
            intent: intent.clone(),
        }));

        Ok(Fill {
            symbol: intent.symbol.clone(),
            side,
            price: execution_price,
            notional,
            fee,
        })
    }

    async fn on_directive(
        &self,
        directive: &PositionDirective,
        price: Decimal,
        at: DateTime<Utc>,
    ) -> Result<Option<ClosedTrade>> {
        match &directive.kind {
            DirectiveKind::CloseImmediately | DirectiveKind::Close => self
                .process_close(&directive.symbol, price, Decimal::ONE, &directive.reason, at)
                .map(Some),
            DirectiveKind::ScaleOut => self
                .process_close(&directive.symbol, price, dec!(0.5), &directive.reason, at)
                .map(Some),
            DirectiveKind::TightenStop { .. } => {
                self.store.apply_directive(directive);
                Ok(None)
            }
            DirectiveKind::MonitorClosely => Ok(None),
        }
    }
}
