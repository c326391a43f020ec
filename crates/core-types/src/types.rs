// In crates/core-types/src/types.rs

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// A trading pair identifier, e.g. `BTCUSDT`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(pub String);

impl Symbol {
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single OHLCV bar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Kline {
    pub open_time: i64,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub close_time: i64,
}

/// An ordered window of bars for one symbol, handed to every evaluator in a cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: Symbol,
    pub klines: Vec<Kline>,
}

impl MarketSnapshot {
    /// Builds a snapshot, rejecting bars that are not in ascending `open_time` order.
    pub fn new(symbol: Symbol, klines: Vec<Kline>) -> Result<Self> {
        if klines.windows(2).any(|w| w[1].open_time <= w[0].open_time) {
            return Err(Error::InvalidSnapshot {
                symbol: symbol.0,
                reason: "klines are not strictly ordered by open_time".to_string(),
            });
        }
        Ok(Self { symbol, klines })
    }

    pub fn len(&self) -> usize {
        self.klines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.klines.is_empty()
    }

    pub fn last(&self) -> Option<&Kline> {
        self.klines.last()
    }

    pub fn last_close(&self) -> Option<Decimal> {
        self.klines.last().map(|k| k.close)
    }

    /// Closing prices as `f64`, oldest first. Indicator code works in floats.
    pub fn closes(&self) -> Vec<f64> {
        self.klines
            .iter()
            .map(|k| k.close.to_f64().unwrap_or(0.0))
            .collect()
    }
}

/// The direction an evaluator (or the consensus) wants to take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Buy,
    Sell,
    Hold,
}

impl Direction {
    /// `true` for `Buy` and `Sell`.
    pub fn is_directional(&self) -> bool {
        !matches!(self, Direction::Hold)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Direction::Buy => "BUY",
            Direction::Sell => "SELL",
            Direction::Hold => "HOLD",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Long,
    Short,
}

impl Side {
    /// Maps an entry direction to the side of the resulting position.
    pub fn from_direction(direction: Direction) -> Option<Side> {
        match direction {
            Direction::Buy => Some(Side::Long),
            Direction::Sell => Some(Side::Short),
            Direction::Hold => None,
        }
    }
}

/// A single evaluator's vote. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub evaluator_id: String,
    pub direction: Direction,
    /// Always within `[0, 1]`; out-of-range and NaN inputs are clamped at construction.
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

impl Signal {
    pub fn new(evaluator_id: impl Into<String>, direction: Direction, confidence: f64) -> Self {
        Self::at(evaluator_id, direction, confidence, Utc::now())
    }

    pub fn at(
        evaluator_id: impl Into<String>,
        direction: Direction,
        confidence: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let confidence = if confidence.is_nan() {
            0.0
        } else {
            confidence.clamp(0.0, 1.0)
        };
        Self {
            evaluator_id: evaluator_id.into(),
            direction,
            confidence,
            timestamp,
        }
    }
}

/// The aggregated outcome of one coordination cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConsensusDecision {
    pub action: Direction,
    pub confidence: f64,
    /// Evaluators that voted for the winning direction.
    pub contributing_evaluators: BTreeSet<String>,
    pub agreement_ratio: f64,
}

impl ConsensusDecision {
    /// The neutral decision: HOLD with zero confidence.
    pub fn hold() -> Self {
        Self {
            action: Direction::Hold,
            confidence: 0.0,
            contributing_evaluators: BTreeSet::new(),
            agreement_ratio: 0.0,
        }
    }

    pub fn is_actionable(&self) -> bool {
        self.action.is_directional()
    }
}

/// An open position. `size` is a fraction of equity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    pub side: Side,
    pub entry_price: Decimal,
    pub size: f64,
    pub entry_time: DateTime<Utc>,
    pub stop_loss: Decimal,
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub scaled_out: bool,
}

impl Position {
    /// Distance between entry and stop as a fraction of the entry price.
    pub fn stop_distance_fraction(&self) -> f64 {
        if self.entry_price <= Decimal::ZERO {
            return 0.0;
        }
        ((self.entry_price - self.stop_loss).abs() / self.entry_price)
            .to_f64()
            .unwrap_or(0.0)
    }

    /// Equity fraction at risk if the stop is hit.
    pub fn risk_fraction(&self) -> f64 {
        self.size * self.stop_distance_fraction()
    }

    /// Signed return of the position at `price`, as a fraction of the entry price.
    pub fn pnl_fraction(&self, price: Decimal) -> f64 {
        if self.entry_price <= Decimal::ZERO {
            return 0.0;
        }
        let raw = ((price - self.entry_price) / self.entry_price)
            .to_f64()
            .unwrap_or(0.0);
        match self.side {
            Side::Long => raw,
            Side::Short => -raw,
        }
    }
}

/// The bookkeeping view of the account that risk layers evaluate against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioState {
    pub equity: Decimal,
    pub daily_pnl: Decimal,
    pub weekly_pnl: Decimal,
    /// Decline from peak equity, as a fraction (0.10 = 10%).
    pub current_drawdown: f64,
    pub consecutive_losses: u32,
    pub open_positions: HashMap<Symbol, Position>,
}

impl PortfolioState {
    pub fn new(equity: Decimal) -> Self {
        Self {
            equity,
            daily_pnl: Decimal::ZERO,
            weekly_pnl: Decimal::ZERO,
            current_drawdown: 0.0,
            consecutive_losses: 0,
            open_positions: HashMap::new(),
        }
    }

    /// Daily PnL over equity. Negative when losing. Zero if equity is not positive.
    pub fn daily_pnl_fraction(&self) -> f64 {
        self.fraction_of_equity(self.daily_pnl)
    }

    pub fn weekly_pnl_fraction(&self) -> f64 {
        self.fraction_of_equity(self.weekly_pnl)
    }

    /// Sum of the risk fractions of all open positions.
    pub fn total_risk(&self) -> f64 {
        self.open_positions.values().map(Position::risk_fraction).sum()
    }

    fn fraction_of_equity(&self, amount: Decimal) -> f64 {
        if self.equity <= Decimal::ZERO {
            return 0.0;
        }
        (amount / self.equity).to_f64().unwrap_or(0.0)
    }
}

/// The four ordered layers of the risk gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GateLayer {
    PreTrade,
    PositionMonitor,
    PortfolioRisk,
    CircuitBreaker,
}

impl fmt::Display for GateLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateLayer::PreTrade => "pre_trade",
            GateLayer::PositionMonitor => "position_monitor",
            GateLayer::PortfolioRisk => "portfolio_risk",
            GateLayer::CircuitBreaker => "circuit_breaker",
        };
        f.write_str(s)
    }
}

/// Verdict of one pass through the risk gate pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RiskGateResult {
    pub approved: bool,
    pub reason: String,
    /// The rejecting layer, or the last layer evaluated when approved.
    pub layer: GateLayer,
}

impl RiskGateResult {
    pub fn approved() -> Self {
        Self {
            approved: true,
            reason: "approved".to_string(),
            layer: GateLayer::CircuitBreaker,
        }
    }

    pub fn rejected(layer: GateLayer, reason: impl Into<String>) -> Self {
        Self {
            approved: false,
            reason: reason.into(),
            layer,
        }
    }
}

/// What the position monitor wants done with an existing position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum DirectiveKind {
    CloseImmediately,
    Close,
    MonitorClosely,
    TightenStop { new_stop: Decimal },
    ScaleOut,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PositionDirective {
    pub symbol: Symbol,
    pub kind: DirectiveKind,
    pub reason: String,
}

/// The approved, sized decision handed to the execution collaborator.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExecutionIntent {
    pub symbol: Symbol,
    pub action: Direction,
    pub confidence: f64,
    pub size_fraction: f64,
    /// Last close the decision was made on.
    pub reference_price: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Option<Decimal>,
    /// Cycle time; paper positions open at this instant.
    pub decided_at: DateTime<Utc>,
}
