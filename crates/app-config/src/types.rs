// In crates/app-config/src/types.rs

use crate::{Error, Result};
use core_types::EvaluatorConfig;
use execution::SimulationSettings;
use risk::types::{
    BreakerSettings, CorrelationPair, PortfolioRiskSettings, PositionMonitorSettings,
    PreTradeSettings, SizingSettings,
};
use serde::Deserialize;

/// Tolerance on the evaluator weights summing to 1.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Deserialize, Debug, Clone)]
pub struct Settings {
    /// The application's general settings.
    pub app: AppSettings,
    pub coordinator: CoordinatorSettings,
    #[serde(default)]
    pub weighting: WeightingSettings,
    pub trade: TradeSettings,
    #[serde(default)]
    pub simulation: SimulationSettings,
    /// The evaluator pool, one `[[evaluators]]` table each.
    pub evaluators: Vec<EvaluatorConfig>,
    pub pre_trade: PreTradeSettings,
    pub position_monitor: PositionMonitorSettings,
    pub portfolio_risk: PortfolioRiskSettings,
    pub breaker: BreakerSettings,
    pub sizing: SizingSettings,
    #[serde(default)]
    pub correlations: Vec<CorrelationPair>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct AppSettings {
    /// The environment the application is running in (e.g., "development", "production").
    pub environment: String,
    /// The log level for the application.
    pub log_level: String,
}

/// Deadlines and consensus thresholds for the decision coordinator.
#[derive(Deserialize, Debug, Clone)]
pub struct CoordinatorSettings {
    /// Per-evaluator deadline (D_eval).
    pub eval_deadline_ms: u64,
    /// Deadline for the whole fan-out (D_total).
    pub total_deadline_ms: u64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence_threshold: f64,
    #[serde(default = "default_min_agreeing")]
    pub min_agreeing_evaluators: usize,
    /// Score gap at or under which BUY and SELL are a tie.
    #[serde(default = "default_tie_epsilon")]
    pub tie_epsilon: f64,
}

fn default_min_confidence() -> f64 {
    0.60
}

fn default_min_agreeing() -> usize {
    2
}

fn default_tie_epsilon() -> f64 {
    1e-9
}

/// The background routine that re-weights evaluators by realized accuracy.
#[derive(Deserialize, Debug, Clone)]
pub struct WeightingSettings {
    pub enabled: bool,
    /// Bars after a vote at which it is scored against the realized move.
    pub horizon_bars: usize,
    /// Cycles between two rebalances.
    pub rebalance_every: usize,
    /// Share of the gap to the accuracy-implied table closed per rebalance.
    pub learning_rate: f64,
    /// Floor applied before normalization so no evaluator is silenced.
    pub min_weight: f64,
}

impl Default for WeightingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            horizon_bars: 5,
            rebalance_every: 50,
            learning_rate: 0.2,
            min_weight: 0.05,
        }
    }
}

/// How approved decisions are turned into orders.
#[derive(Deserialize, Debug, Clone)]
pub struct TradeSettings {
    pub initial_equity: f64,
    /// Stop distance from the entry price, as a fraction of it.
    pub stop_loss_fraction: f64,
    /// Take-profit distance from the entry price. Disabled when absent.
    #[serde(default)]
    pub take_profit_fraction: Option<f64>,
    /// Bars kept in the rolling snapshot handed to evaluators.
    #[serde(default = "default_window")]
    pub window: usize,
}

fn default_window() -> usize {
    200
}

impl Settings {
    /// Rejects any configuration the pipeline cannot run safely with.
    pub fn validate(&self) -> Result<()> {
        self.validate_evaluators()?;
        self.validate_coordinator()?;
        self.validate_trade()?;
        self.validate_weighting()?;

        self.pre_trade.validate()?;
        self.position_monitor.validate()?;
        self.portfolio_risk.validate()?;
        self.breaker.validate()?;
        self.sizing.validate()?;
        Ok(())
    }

    fn validate_evaluators(&self) -> Result<()> {
        if self.evaluators.is_empty() {
            return Err(Error::Invalid("at least one evaluator must be configured".to_string()));
        }
        if let Some(bad) = self
            .evaluators
            .iter()
            .find(|e| !e.weight.is_finite() || e.weight < 0.0)
        {
            return Err(Error::Invalid(format!(
                "evaluator '{}' has invalid weight {}",
                bad.id(),
                bad.weight
            )));
        }
        let sum: f64 = self.evaluators.iter().map(|e| e.weight).sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(Error::Invalid(format!(
                "evaluator weights sum to {sum}, expected 1.0"
            )));
        }
        Ok(())
    }

    fn validate_coordinator(&self) -> Result<()> {
        let c = &self.coordinator;
        if c.eval_deadline_ms == 0 || c.total_deadline_ms == 0 {
            return Err(Error::Invalid("coordinator deadlines must be positive".to_string()));
        }
        if !(0.0..=1.0).contains(&c.min_confidence_threshold) {
            return Err(Error::Invalid(format!(
                "coordinator.min_confidence_threshold ({}) must be within [0, 1]",
                c.min_confidence_threshold
            )));
        }
        if c.min_agreeing_evaluators == 0 {
            return Err(Error::Invalid(
                "coordinator.min_agreeing_evaluators must be at least 1".to_string(),
            ));
        }
        if !(c.tie_epsilon >= 0.0) {
            return Err(Error::Invalid("coordinator.tie_epsilon must be non-negative".to_string()));
        }
        Ok(())
    }

    fn validate_trade(&self) -> Result<()> {
        let t = &self.trade;
        if !(t.initial_equity > 0.0) {
            return Err(Error::Invalid("trade.initial_equity must be positive".to_string()));
        }
        if !(t.stop_loss_fraction > 0.0 && t.stop_loss_fraction < 1.0) {
            return Err(Error::Invalid(
                "trade.stop_loss_fraction must be within (0, 1)".to_string(),
            ));
        }
        if let Some(tp) = t.take_profit_fraction {
            if !(tp > 0.0) {
                return Err(Error::Invalid(
                    "trade.take_profit_fraction must be positive".to_string(),
                ));
            }
        }
        if t.window < 2 {
            return Err(Error::Invalid("trade.window must hold at least 2 bars".to_string()));
        }
        Ok(())
    }

    fn validate_weighting(&self) -> Result<()> {
        let w = &self.weighting;
        if !w.enabled {
            return Ok(());
        }
        if w.horizon_bars == 0 || w.rebalance_every == 0 {
            return Err(Error::Invalid(
                "weighting.horizon_bars and rebalance_every must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&w.learning_rate) {
            return Err(Error::Invalid("weighting.learning_rate must be within [0, 1]".to_string()));
        }
        if w.min_weight < 0.0 || w.min_weight * self.evaluators.len() as f64 > 1.0 {
            return Err(Error::Invalid(
                "weighting.min_weight must be non-negative and leave room for every evaluator"
                    .to_string(),
            ));
        }
        Ok(())
    }
}
