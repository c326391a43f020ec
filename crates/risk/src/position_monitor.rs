// In crates/risk/src/position_monitor.rs

use crate::Result;
use crate::state::PriceBook;
use crate::types::PositionMonitorSettings;
use chrono::{DateTime, Duration, Utc};
use core_types::{DirectiveKind, PortfolioState, Position, PositionDirective, Side};
use num_traits::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;

/// Layer 2: watches open positions and proposes actions on them.
///
/// It never rejects a new trade.
pub struct PositionMonitor {
    settings: PositionMonitorSettings,
}

impl PositionMonitor {
    pub fn new(settings: PositionMonitorSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self { settings })
    }

    /// Directives for every open position with a known price, ordered by symbol.
    pub fn scan(
        &self,
        portfolio: &PortfolioState,
        prices: &PriceBook,
        now: DateTime<Utc>,
    ) -> Vec<PositionDirective> {
        let mut positions: Vec<&Position> = portfolio.open_positions.values().collect();
        positions.sort_by(|a, b| a.symbol.cmp(&b.symbol));

        let mut directives = Vec::new();
        for position in positions {
            let Some(price) = prices.latest(&position.symbol) else {
                tracing::debug!(symbol = %position.symbol, "No price for open position. Skipping.");
                continue;
            };
            self.inspect(position, price, prices, now, &mut directives);
        }
        directives
    }

    fn inspect(
        &self,
        position: &Position,
        price: Decimal,
        prices: &PriceBook,
        now: DateTime<Utc>,
        out: &mut Vec<PositionDirective>,
    ) {
        let directive = |kind, reason: String| PositionDirective {
            symbol: position.symbol.clone(),
            kind,
            reason,
        };

        let stop_hit = match position.side {
            Side::Long => price <= position.stop_loss,
            Side::Short => price >= position.stop_loss,
        };
        if stop_hit {
            out.push(directive(
                DirectiveKind::CloseImmediately,
                format!("price {price} breached stop {}", position.stop_loss),
            ));
            return;
        }

        let held_hours = (now - position.entry_time).num_seconds() as f64 / 3_600.0;
        let pnl = position.pnl_fraction(price);
        if held_hours > self.settings.max_hold_hours && pnl < self.settings.min_profit_to_hold {
            out.push(directive(
                DirectiveKind::Close,
                format!(
                    "held {held_hours:.1}h with {:.2}% return (time stop {}h)",
                    pnl * 100.0,
                    self.settings.max_hold_hours
                ),
            ));
            return;
        }

        if let Some(target) = position.take_profit {
            let reached = match position.side {
                Side::Long => price >= target,
                Side::Short => price <= target,
            };
            if reached && !position.scaled_out {
                out.push(directive(
                    DirectiveKind::ScaleOut,
                    format!("price {price} reached take-profit {target}"),
                ));
            }
        }

        let window = Duration::seconds(self.settings.velocity_window_secs as i64);
        let Some((start, last)) = prices.window(&position.symbol, now, window) else {
            return;
        };
        if start <= Decimal::ZERO {
            return;
        }
        let change = ((last - start) / start).to_f64().unwrap_or(0.0);
        let adverse = match position.side {
            Side::Long => -change,
            Side::Short => change,
        };

        let threshold = self.settings.velocity_threshold;
        if adverse > threshold * self.settings.tighten_velocity_multiple {
            if let Some(new_stop) = self.tightened_stop(position, last) {
                out.push(directive(
                    DirectiveKind::TightenStop { new_stop },
                    format!("adverse move of {:.2}% within {}s", adverse * 100.0, window.num_seconds()),
                ));
                return;
            }
        }
        if adverse > threshold {
            out.push(directive(
                DirectiveKind::MonitorClosely,
                format!("adverse move of {:.2}% within {}s", adverse * 100.0, window.num_seconds()),
            ));
        }
    }

    /// A stop `tighten_stop_fraction` away from `price`, if it is tighter than the current one.
    fn tightened_stop(&self, position: &Position, price: Decimal) -> Option<Decimal> {
        let offset = Decimal::from_f64(self.settings.tighten_stop_fraction)?;
        match position.side {
            Side::Long => {
                let stop = price * (Decimal::ONE - offset);
                (stop > position.stop_loss).then_some(stop)
            }
            Side::Short => {
                let stop = price * (Decimal::ONE + offset);
                (stop < position.stop_loss).then_some(stop)
            }
        }
    }
}
