// In crates/risk/src/state.rs

use chrono::{DateTime, Duration, Utc};
use core_types::{DirectiveKind, PortfolioState, Position, PositionDirective, Symbol};
use num_traits::{FromPrimitive, ToPrimitive};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

struct Book {
    state: Arc<PortfolioState>,
    peak_equity: Decimal,
}

/// Single owner of the portfolio state.
///
/// Readers take an `Arc` snapshot and never observe a half-applied update;
/// writers clone the current state, mutate the clone and swap it in.
pub struct PortfolioStore {
    book: RwLock<Book>,
}

impl PortfolioStore {
    pub fn new(initial: PortfolioState) -> Self {
        let peak_equity = implied_peak(&initial);
        Self {
            book: RwLock::new(Book {
                state: Arc::new(initial),
                peak_equity,
            }),
        }
    }

    /// The current state. Holds no lock after returning.
    pub fn snapshot(&self) -> Arc<PortfolioState> {
        self.book.read().state.clone()
    }

    /// Replaces the whole state, e.g. after a reconciliation with the account.
    pub fn replace(&self, state: PortfolioState) {
        let peak_equity = implied_peak(&state);
        let mut book = self.book.write();
        book.state = Arc::new(state);
        book.peak_equity = peak_equity;
    }

    /// Applies `f` to a copy of the state and publishes the copy.
    pub fn update<F>(&self, f: F)
    where
        F: FnOnce(&mut PortfolioState),
    {
        let mut book = self.book.write();
        let mut next = (*book.state).clone();
        f(&mut next);
        book.state = Arc::new(next);
    }

    pub fn open_position(&self, position: Position) {
        tracing::debug!(symbol = %position.symbol, size = position.size, "Position opened.");
        self.update(|s| {
            s.open_positions.insert(position.symbol.clone(), position);
        });
    }

    /// Removes the position and books its realized `pnl` as one completed trade.
    pub fn close_position(&self, symbol: &Symbol, pnl: Decimal) -> Option<Position> {
        let mut book = self.book.write();
        let mut next = (*book.state).clone();
        let closed = next.open_positions.remove(symbol)?;

        if pnl < Decimal::ZERO {
            next.consecutive_losses += 1;
        } else {
            next.consecutive_losses = 0;
        }
        book.peak_equity = apply_pnl(&mut next, book.peak_equity, pnl);
        book.state = Arc::new(next);

        tracing::debug!(symbol = %symbol, pnl = %pnl, "Position closed.");
        Some(closed)
    }

    /// Books PnL that did not end a trade, such as a partial scale-out.
    pub fn realize(&self, pnl: Decimal) {
        let mut book = self.book.write();
        let mut next = (*book.state).clone();
        book.peak_equity = apply_pnl(&mut next, book.peak_equity, pnl);
        book.state = Arc::new(next);
    }

    /// Mutates the position book for directives that adjust a position in place.
    ///
    /// Closing directives are left to the execution collaborator, which knows the
    /// exit price, and `MonitorClosely` changes nothing.
    pub fn apply_directive(&self, directive: &PositionDirective) -> bool {
        match &directive.kind {
            DirectiveKind::TightenStop { new_stop } => {
                let new_stop = *new_stop;
                let mut applied = false;
                self.update(|s| {
                    if let Some(p) = s.open_positions.get_mut(&directive.symbol) {
                        p.stop_loss = new_stop;
                        applied = true;
                    }
                });
                applied
            }
            DirectiveKind::ScaleOut => {
                let mut applied = false;
                self.update(|s| {
                    if let Some(p) = s.open_positions.get_mut(&directive.symbol) {
                        if !p.scaled_out {
                            p.size /= 2.0;
                            p.scaled_out = true;
                            applied = true;
                        }
                    }
                });
                applied
            }
            DirectiveKind::CloseImmediately | DirectiveKind::Close | DirectiveKind::MonitorClosely => {
                false
            }
        }
    }

    pub fn reset_daily(&self) {
        self.update(|s| s.daily_pnl = Decimal::ZERO);
    }

    pub fn reset_weekly(&self) {
        self.update(|s| s.weekly_pnl = Decimal::ZERO);
    }

    /// Clears the losing-trade streak after an operator acknowledged it.
    pub fn reset_loss_streak(&self) {
        self.update(|s| s.consecutive_losses = 0);
    }
}

fn apply_pnl(state: &mut PortfolioState, peak: Decimal, pnl: Decimal) -> Decimal {
    state.equity += pnl;
    state.daily_pnl += pnl;
    state.weekly_pnl += pnl;

    let peak = peak.max(state.equity);
    state.current_drawdown = if peak > Decimal::ZERO {
        ((peak - state.equity) / peak).to_f64().unwrap_or(0.0).max(0.0)
    } else {
        0.0
    };
    peak
}

/// Peak equity consistent with the state's reported drawdown.
fn implied_peak(state: &PortfolioState) -> Decimal {
    let dd = state.current_drawdown;
    if dd > 0.0 && dd < 1.0 {
        if let Some(divisor) = Decimal::from_f64(1.0 - dd) {
            if !divisor.is_zero() {
                return state.equity / divisor;
            }
        }
    }
    state.equity
}

/// Recent prices per symbol, used for stop checks and short-window velocity.
pub struct PriceBook {
    retention: Duration,
    prices: Mutex<HashMap<Symbol, VecDeque<(DateTime<Utc>, Decimal)>>>,
}

impl PriceBook {
    pub fn new(retention: Duration) -> Self {
        Self {
            retention,
            prices: Mutex::new(HashMap::new()),
        }
    }

    /// Records an observation. Observations older than the retention window are dropped.
    pub fn record(&self, symbol: &Symbol, at: DateTime<Utc>, price: Decimal) {
        let mut prices = self.prices.lock();
        let series = prices.entry(symbol.clone()).or_default();
        if series.back().is_some_and(|(t, _)| *t > at) {
            return;
        }
        series.push_back((at, price));
        let horizon = at - self.retention;
        while series.front().is_some_and(|(t, _)| *t < horizon) {
            series.pop_front();
        }
    }

    pub fn latest(&self, symbol: &Symbol) -> Option<Decimal> {
        self.prices
            .lock()
            .get(symbol)
            .and_then(|s| s.back().map(|(_, p)| *p))
    }

    /// The oldest and newest prices observed within `window` of `now`.
    pub fn window(&self, symbol: &Symbol, now: DateTime<Utc>, window: Duration) -> Option<(Decimal, Decimal)> {
        let prices = self.prices.lock();
        let series = prices.get(symbol)?;
        let since = now - window;
        let first = series.iter().find(|(t, _)| *t >= since)?.1;
        let last = series.back()?.1;
        Some((first, last))
    }
}
