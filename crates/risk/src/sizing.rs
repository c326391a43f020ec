// In crates/risk/src/sizing.rs

use crate::Result;
use crate::types::{CapitalTier, DrawdownStep, SizingSettings};
use core_types::PortfolioState;
use num_traits::ToPrimitive;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;

/// Every factor that went into one sizing decision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SizingBreakdown {
    pub base: f64,
    pub confidence_multiplier: f64,
    pub performance_multiplier: f64,
    pub drawdown_multiplier: f64,
    pub risk_scale: f64,
    /// Final fraction of equity, within `[min_size, max_size]`.
    pub size: f64,
}

/// A bounded, slowly adapting risk multiplier.
#[derive(Debug, Clone)]
pub struct RiskScaler {
    value: f64,
    min: f64,
    max: f64,
    adapt_rate: f64,
}

impl RiskScaler {
    pub fn new(min: f64, max: f64, adapt_rate: f64) -> Self {
        Self {
            value: 1.0_f64.clamp(min, max),
            min,
            max,
            adapt_rate,
        }
    }

    pub fn value(&self) -> f64 {
        self.value
    }

    /// Moves toward `max` after a gain, `min` after a loss, and 1.0 on a flat return.
    pub fn update(&mut self, period_return: f64) {
        if !period_return.is_finite() {
            return;
        }
        let target = if period_return > 0.0 {
            self.max
        } else if period_return < 0.0 {
            self.min
        } else {
            1.0
        };
        self.value = (self.value + self.adapt_rate * (target - self.value)).clamp(self.min, self.max);
    }
}

struct Performance {
    outcomes: VecDeque<bool>,
    scaler: RiskScaler,
}

/// Turns an approved decision into a fraction of equity.
pub struct PositionSizingPolicy {
    settings: SizingSettings,
    performance: Mutex<Performance>,
}

impl PositionSizingPolicy {
    pub fn new(settings: SizingSettings) -> Result<Self> {
        settings.validate()?;
        let scale = &settings.risk_scale;
        let scaler = RiskScaler::new(scale.min_risk_scale, scale.max_risk_scale, scale.adapt_rate);
        Ok(Self {
            performance: Mutex::new(Performance {
                outcomes: VecDeque::with_capacity(settings.performance.lookback_trades),
                scaler,
            }),
            settings,
        })
    }

    pub fn min_size(&self) -> f64 {
        self.settings.min_size
    }

    pub fn max_size(&self) -> f64 {
        self.settings.max_size
    }

    /// Records whether a completed trade won.
    pub fn record_trade(&self, won: bool) {
        let mut perf = self.performance.lock();
        if perf.outcomes.len() == self.settings.performance.lookback_trades {
            perf.outcomes.pop_front();
        }
        perf.outcomes.push_back(won);
    }

    /// Feeds a period return (fraction of equity) to the risk scaler.
    pub fn record_return(&self, period_return: f64) {
        self.performance.lock().scaler.update(period_return);
    }

    pub fn size(&self, confidence: f64, portfolio: &PortfolioState) -> SizingBreakdown {
        let capital = portfolio.equity.to_f64().unwrap_or(0.0);
        let base = base_fraction(&self.settings.capital_tiers, capital);
        let confidence_multiplier = self.confidence_multiplier(confidence);
        let drawdown_multiplier = drawdown_multiplier(&self.settings.drawdown_steps, portfolio.current_drawdown);
        let (performance_multiplier, risk_scale) = {
            let perf = self.performance.lock();
            (self.performance_multiplier(&perf.outcomes), perf.scaler.value())
        };

        let raw = base * confidence_multiplier * performance_multiplier * drawdown_multiplier * risk_scale;
        let size = if raw.is_finite() {
            raw.clamp(self.settings.min_size, self.settings.max_size)
        } else {
            self.settings.min_size
        };

        SizingBreakdown {
            base,
            confidence_multiplier,
            performance_multiplier,
            drawdown_multiplier,
            risk_scale,
            size,
        }
    }

    fn confidence_multiplier(&self, confidence: f64) -> f64 {
        let c = if confidence.is_nan() { 0.5 } else { confidence.clamp(0.5, 1.0) };
        let (low, high) = (
            self.settings.confidence_multiplier_low,
            self.settings.confidence_multiplier_high,
        );
        low + (c - 0.5) / 0.5 * (high - low)
    }

    fn performance_multiplier(&self, outcomes: &VecDeque<bool>) -> f64 {
        let perf = &self.settings.performance;
        if outcomes.len() < perf.min_trades || outcomes.is_empty() {
            return 1.0;
        }
        let wins = outcomes.iter().filter(|w| **w).count();
        let win_rate = wins as f64 / outcomes.len() as f64;
        if win_rate >= perf.hot_win_rate {
            perf.hot_multiplier
        } else if win_rate <= perf.cold_win_rate {
            perf.cold_multiplier
        } else {
            1.0
        }
    }
}

/// Piecewise-linear interpolation over sorted tiers, flat beyond either end.
fn base_fraction(tiers: &[CapitalTier], capital: f64) -> f64 {
    let (Some(first), Some(last)) = (tiers.first(), tiers.last()) else {
        return 0.0;
    };
    if capital <= first.capital {
        return first.fraction;
    }
    if capital >= last.capital {
        return last.fraction;
    }
    for w in tiers.windows(2) {
        let (lo, hi) = (w[0], w[1]);
        if capital <= hi.capital {
            let t = (capital - lo.capital) / (hi.capital - lo.capital);
            return lo.fraction + t * (hi.fraction - lo.fraction);
        }
    }
    last.fraction
}

/// The multiplier of the deepest step whose drawdown has been reached.
fn drawdown_multiplier(steps: &[DrawdownStep], drawdown: f64) -> f64 {
    steps
        .iter()
        .take_while(|s| drawdown >= s.drawdown)
        .last()
        .map(|s| s.multiplier)
        .unwrap_or(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::fixtures;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn policy() -> PositionSizingPolicy {
        PositionSizingPolicy::new(fixtures::sizing()).unwrap()
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_base_interpolates_between_tiers() {
        let tiers = fixtures::sizing().capital_tiers;
        assert!(approx(base_fraction(&tiers, 500.0), 0.10));
        assert!(approx(base_fraction(&tiers, 5_500.0), 0.09));
        assert!(approx(base_fraction(&tiers, 10_000.0), 0.08));
        assert!(approx(base_fraction(&tiers, 1_000_000.0), 0.05));
    }

    #[test]
    fn test_confidence_multiplier_maps_linearly() {
        let p = policy();
        assert!(approx(p.confidence_multiplier(0.2), 0.7));
        assert!(approx(p.confidence_multiplier(0.75), 0.95));
        assert!(approx(p.confidence_multiplier(1.0), 1.2));
    }

    #[test]
    fn test_drawdown_steps() {
        let steps = fixtures::sizing().drawdown_steps;
        assert_eq!(drawdown_multiplier(&steps, 0.01), 1.0);
        assert_eq!(drawdown_multiplier(&steps, 0.07), 0.75);
        assert_eq!(drawdown_multiplier(&steps, 0.30), 0.25);
    }

    #[test]
    fn test_performance_needs_min_trades() {
        let p = policy();
        for _ in 0..4 {
            p.record_trade(true);
        }
        let state = PortfolioState::new(dec!(10_000));
        assert_eq!(p.size(0.75, &state).performance_multiplier, 1.0);
        p.record_trade(true);
        assert_eq!(p.size(0.75, &state).performance_multiplier, 1.2);
    }

    #[test]
    fn test_cold_streak_shrinks_size() {
        let p = policy();
        for _ in 0..10 {
            p.record_trade(false);
        }
        let state = PortfolioState::new(dec!(10_000));
        let b = p.size(0.75, &state);
        assert_eq!(b.performance_multiplier, 0.7);
        assert!(approx(b.size, 0.08 * 0.95 * 0.7));
    }

    #[test]
    fn test_risk_scaler_is_bounded() {
        let mut scaler = RiskScaler::new(0.5, 1.5, 0.5);
        for _ in 0..100 {
            scaler.update(0.02);
        }
        assert!(scaler.value() <= 1.5 && scaler.value() > 1.49);
        for _ in 0..100 {
            scaler.update(-0.02);
        }
        assert!(scaler.value() >= 0.5 && scaler.value() < 0.51);
        scaler.update(f64::NAN);
        assert!(scaler.value() >= 0.5);
    }

    #[test]
    fn test_size_always_within_bounds() {
        let p = policy();
        let equities = [0i64, 1, 500, 7_500, 50_000, 10_000_000];
        let drawdowns = [0.0, 0.06, 0.5, 1.0];
        let confidences = [0.0, 0.3, 0.6, 0.99, 1.0, f64::NAN];
        for (i, outcome) in [true, true, false, true, true, true].iter().enumerate() {
            p.record_trade(*outcome);
            p.record_return(if i % 2 == 0 { 0.01 } else { -0.01 });
        }
        for equity in equities {
            for dd in drawdowns {
                for c in confidences {
                    let mut state = PortfolioState::new(Decimal::from(equity));
                    state.current_drawdown = dd;
                    let size = p.size(c, &state).size;
                    assert!((0.01..=0.25).contains(&size), "size {size} out of bounds");
                }
            }
        }
    }
}
