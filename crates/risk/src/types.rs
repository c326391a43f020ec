// In crates/risk/src/types.rs

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Layer 1 limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreTradeSettings {
    /// Maximum tolerated daily loss as a fraction of equity (0.05 = 5%).
    pub daily_loss_cap: f64,
    pub weekly_loss_cap: f64,
    /// New entries stop once this many losing trades happened in a row.
    pub consecutive_loss_trip: u32,
    /// Maximum equity fraction a single trade may put at risk.
    pub max_risk_per_trade: f64,
}

impl PreTradeSettings {
    pub fn validate(&self) -> Result<()> {
        check_fraction("pre_trade.daily_loss_cap", self.daily_loss_cap)?;
        check_fraction("pre_trade.weekly_loss_cap", self.weekly_loss_cap)?;
        check_fraction("pre_trade.max_risk_per_trade", self.max_risk_per_trade)?;
        if self.consecutive_loss_trip == 0 {
            return Err(Error::InvalidParameters(
                "pre_trade.consecutive_loss_trip must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Layer 2 thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionMonitorSettings {
    /// Positions held longer than this are closed unless they earn `min_profit_to_hold`.
    pub max_hold_hours: f64,
    pub min_profit_to_hold: f64,
    /// Look-back used to measure short-window price velocity.
    pub velocity_window_secs: u64,
    /// Adverse move over the window (fraction of price) that triggers `MonitorClosely`.
    pub velocity_threshold: f64,
    /// Multiple of `velocity_threshold` at which the stop is tightened instead.
    #[serde(default = "default_tighten_multiple")]
    pub tighten_velocity_multiple: f64,
    /// Distance of a tightened stop from the latest price.
    pub tighten_stop_fraction: f64,
}

fn default_tighten_multiple() -> f64 {
    2.0
}

impl PositionMonitorSettings {
    pub fn validate(&self) -> Result<()> {
        if self.max_hold_hours <= 0.0 {
            return Err(Error::InvalidParameters(
                "position_monitor.max_hold_hours must be positive".to_string(),
            ));
        }
        if self.velocity_window_secs == 0 {
            return Err(Error::InvalidParameters(
                "position_monitor.velocity_window_secs must be positive".to_string(),
            ));
        }
        check_fraction("position_monitor.velocity_threshold", self.velocity_threshold)?;
        check_fraction("position_monitor.tighten_stop_fraction", self.tighten_stop_fraction)?;
        if self.tighten_velocity_multiple < 1.0 {
            return Err(Error::InvalidParameters(
                "position_monitor.tighten_velocity_multiple must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Layer 3 limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioRiskSettings {
    pub max_portfolio_risk: f64,
    pub max_correlated_risk: f64,
    /// Pairs with |correlation| above this are treated as one cluster.
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,
    pub max_drawdown_limit: f64,
}

fn default_correlation_threshold() -> f64 {
    0.8
}

impl PortfolioRiskSettings {
    pub fn validate(&self) -> Result<()> {
        check_fraction("portfolio_risk.max_portfolio_risk", self.max_portfolio_risk)?;
        check_fraction("portfolio_risk.max_correlated_risk", self.max_correlated_risk)?;
        check_fraction("portfolio_risk.correlation_threshold", self.correlation_threshold)?;
        check_fraction("portfolio_risk.max_drawdown_limit", self.max_drawdown_limit)?;
        Ok(())
    }
}

/// How an OPEN breaker returns to CLOSED.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResetPolicySettings {
    Manual,
    AutoCooldown { cooldown_secs: u64 },
}

impl Default for ResetPolicySettings {
    fn default() -> Self {
        ResetPolicySettings::Manual
    }
}

/// Circuit breaker trip thresholds and reset policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BreakerSettings {
    pub drawdown_threshold: f64,
    pub daily_loss_threshold: f64,
    /// Disabled when absent.
    #[serde(default)]
    pub weekly_loss_threshold: Option<f64>,
    pub consecutive_trip: u32,
    #[serde(default)]
    pub reset_policy: ResetPolicySettings,
}

impl BreakerSettings {
    pub fn validate(&self) -> Result<()> {
        check_fraction("breaker.drawdown_threshold", self.drawdown_threshold)?;
        check_fraction("breaker.daily_loss_threshold", self.daily_loss_threshold)?;
        if let Some(weekly) = self.weekly_loss_threshold {
            check_fraction("breaker.weekly_loss_threshold", weekly)?;
        }
        if self.consecutive_trip == 0 {
            return Err(Error::InvalidParameters(
                "breaker.consecutive_trip must be at least 1".to_string(),
            ));
        }
        if let ResetPolicySettings::AutoCooldown { cooldown_secs: 0 } = self.reset_policy {
            return Err(Error::InvalidParameters(
                "breaker.reset_policy.cooldown_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// One `capital -> base fraction` breakpoint of the sizing curve.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CapitalTier {
    pub capital: f64,
    pub fraction: f64,
}

/// Drawdown at or above `drawdown` scales size by `multiplier`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DrawdownStep {
    pub drawdown: f64,
    pub multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceSettings {
    /// Number of trailing trades the win rate is measured over.
    pub lookback_trades: usize,
    /// Below this many recorded trades the multiplier stays at 1.
    pub min_trades: usize,
    pub hot_win_rate: f64,
    pub cold_win_rate: f64,
    pub hot_multiplier: f64,
    pub cold_multiplier: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScaleSettings {
    pub min_risk_scale: f64,
    pub max_risk_scale: f64,
    /// Fraction of the gap to the target closed on every update.
    pub adapt_rate: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SizingSettings {
    pub min_size: f64,
    pub max_size: f64,
    pub capital_tiers: Vec<CapitalTier>,
    pub confidence_multiplier_low: f64,
    pub confidence_multiplier_high: f64,
    pub performance: PerformanceSettings,
    pub drawdown_steps: Vec<DrawdownStep>,
    pub risk_scale: RiskScaleSettings,
}

impl SizingSettings {
    pub fn validate(&self) -> Result<()> {
        if self.min_size < 0.0 || self.min_size > self.max_size {
            return Err(Error::InvalidParameters(format!(
                "sizing.min_size ({}) must be non-negative and not above max_size ({})",
                self.min_size, self.max_size
            )));
        }
        if self.capital_tiers.is_empty() {
            return Err(Error::InvalidParameters(
                "sizing.capital_tiers must not be empty".to_string(),
            ));
        }
        if self
            .capital_tiers
            .windows(2)
            .any(|w| w[1].capital <= w[0].capital)
        {
            return Err(Error::InvalidParameters(
                "sizing.capital_tiers must be sorted by strictly increasing capital".to_string(),
            ));
        }
        if self.capital_tiers.iter().any(|t| t.fraction < 0.0) {
            return Err(Error::InvalidParameters(
                "sizing.capital_tiers fractions must not be negative".to_string(),
            ));
        }
        if self.confidence_multiplier_low <= 0.0
            || self.confidence_multiplier_low > self.confidence_multiplier_high
        {
            return Err(Error::InvalidParameters(
                "sizing confidence multiplier bounds are inverted or non-positive".to_string(),
            ));
        }

        let perf = &self.performance;
        if perf.lookback_trades == 0 || perf.min_trades > perf.lookback_trades {
            return Err(Error::InvalidParameters(
                "sizing.performance.min_trades must be within 1..=lookback_trades".to_string(),
            ));
        }
        check_fraction("sizing.performance.hot_win_rate", perf.hot_win_rate)?;
        check_fraction("sizing.performance.cold_win_rate", perf.cold_win_rate)?;
        if perf.cold_win_rate >= perf.hot_win_rate {
            return Err(Error::InvalidParameters(
                "sizing.performance.cold_win_rate must be below hot_win_rate".to_string(),
            ));
        }
        if perf.cold_multiplier <= 0.0 || perf.cold_multiplier > perf.hot_multiplier {
            return Err(Error::InvalidParameters(
                "sizing.performance multipliers are inverted or non-positive".to_string(),
            ));
        }

        if self
            .drawdown_steps
            .windows(2)
            .any(|w| w[1].drawdown <= w[0].drawdown || w[1].multiplier > w[0].multiplier)
        {
            return Err(Error::InvalidParameters(
                "sizing.drawdown_steps must have increasing drawdowns and non-increasing multipliers"
                    .to_string(),
            ));
        }
        if self
            .drawdown_steps
            .iter()
            .any(|s| s.multiplier < 0.0 || s.multiplier > 1.0)
        {
            return Err(Error::InvalidParameters(
                "sizing.drawdown_steps multipliers must be within [0, 1]".to_string(),
            ));
        }

        let scale = &self.risk_scale;
        if scale.min_risk_scale <= 0.0
            || scale.min_risk_scale > 1.0
            || scale.max_risk_scale < 1.0
        {
            return Err(Error::InvalidParameters(
                "sizing.risk_scale bounds must satisfy 0 < min <= 1 <= max".to_string(),
            ));
        }
        check_fraction("sizing.risk_scale.adapt_rate", scale.adapt_rate)?;
        Ok(())
    }
}

/// A configured pairwise correlation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CorrelationPair {
    pub a: String,
    pub b: String,
    pub value: f64,
}

fn check_fraction(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=1.0).contains(&value) {
        return Err(Error::InvalidParameters(format!(
            "{name} ({value}) must be a fraction within [0, 1]"
        )));
    }
    Ok(())
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixtures_are_valid() {
        assert!(fixtures::pre_trade().validate().is_ok());
        assert!(fixtures::monitor().validate().is_ok());
        assert!(fixtures::portfolio().validate().is_ok());
        assert!(fixtures::breaker(ResetPolicySettings::Manual).validate().is_ok());
        assert!(fixtures::sizing().validate().is_ok());
    }

    #[test]
    fn test_min_size_above_max_size_is_invalid() {
        let mut sizing = fixtures::sizing();
        sizing.min_size = 0.5;
        assert!(matches!(sizing.validate(), Err(Error::InvalidParameters(_))));
    }

    #[test]
    fn test_unsorted_tiers_are_invalid() {
        let mut sizing = fixtures::sizing();
        sizing.capital_tiers.reverse();
        assert!(sizing.validate().is_err());
    }

    #[test]
    fn test_zero_cooldown_is_invalid() {
        let breaker = fixtures::breaker(ResetPolicySettings::AutoCooldown { cooldown_secs: 0 });
        assert!(breaker.validate().is_err());
    }

    #[test]
    fn test_out_of_range_fraction_is_invalid() {
        let mut pre = fixtures::pre_trade();
        pre.daily_loss_cap = 1.5;
        assert!(pre.validate().is_err());
    }
}
