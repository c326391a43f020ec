// In crates/execution/src/types.rs

use core_types::{Side, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SimulationSettings {
    /// The taker fee for the exchange (e.g., 0.0004 for 0.04%).
    pub taker_fee: f64,

    /// The simulated slippage percentage for market orders (e.g., 0.0005 for 0.05%).
    pub slippage_percent: f64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            taker_fee: 0.0004,
            slippage_percent: 0.0005,
        }
    }
}

/// The simulated fill of an entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fill {
    pub symbol: Symbol,
    pub side: Side,
    pub price: Decimal,
    /// Position value in account currency.
    pub notional: Decimal,
    pub fee: Decimal,
}

/// A fully or partially closed position and what it realized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClosedTrade {
    pub symbol: Symbol,
    pub exit_price: Decimal,
    /// Realized PnL net of fees.
    pub pnl: Decimal,
    /// `pnl` over the equity before the close.
    pub return_fraction: f64,
    /// `false` for a scale-out that left the position open.
    pub full_close: bool,
}
