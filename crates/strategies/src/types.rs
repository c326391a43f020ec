// In crates/strategies/src/types.rs

use crate::{Error, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct EmaCrossoverSettings {
    pub fast_period: u32,
    pub slow_period: u32,
    /// Minimum separation between the two averages, as a fraction of the slow one.
    #[serde(default)]
    pub min_spread: f64,
    // The confidence score to assign to signals from this evaluator
    pub confidence: f64,
}

impl EmaCrossoverSettings {
    pub fn validate(&self) -> Result<()> {
        if self.fast_period == 0 || self.slow_period == 0 {
            return Err(Error::InvalidParameters(
                "ema_crossover periods must be greater than 0".to_string(),
            ));
        }
        if self.fast_period >= self.slow_period {
            return Err(Error::InvalidParameters(format!(
                "ema_crossover fast_period ({}) must be below slow_period ({})",
                self.fast_period, self.slow_period
            )));
        }
        if self.min_spread < 0.0 {
            return Err(Error::InvalidParameters(
                "ema_crossover min_spread must not be negative".to_string(),
            ));
        }
        validate_confidence("ema_crossover", self.confidence)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SuperTrendSettings {
    pub period: u32,
    pub multiplier: f64,
    pub confirmation_bars: u32,
    #[serde(default)]
    pub volume_threshold: f64,
    pub confidence: f64,
}

impl SuperTrendSettings {
    pub fn validate(&self) -> Result<()> {
        if self.period < 1 || self.confirmation_bars < 1 {
            return Err(Error::InvalidParameters(
                "supertrend periods must be greater than 0".to_string(),
            ));
        }
        if self.multiplier <= 0.0 {
            return Err(Error::InvalidParameters(
                "supertrend multiplier must be positive".to_string(),
            ));
        }
        validate_confidence("supertrend", self.confidence)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct MeanReversionSettings {
    pub bband_period: u32,
    pub bband_stddev: f64,
    pub rsi_period: u32,
    pub rsi_oversold: f64,
    pub rsi_overbought: f64,
    pub confidence: f64,
}

impl MeanReversionSettings {
    pub fn validate(&self) -> Result<()> {
        if self.bband_period < 2 || self.rsi_period < 1 {
            return Err(Error::InvalidParameters(
                "mean_reversion periods are too short".to_string(),
            ));
        }
        if self.bband_stddev <= 0.0 {
            return Err(Error::InvalidParameters(
                "mean_reversion bband_stddev must be positive".to_string(),
            ));
        }
        if !(0.0..=100.0).contains(&self.rsi_oversold)
            || !(0.0..=100.0).contains(&self.rsi_overbought)
            || self.rsi_oversold >= self.rsi_overbought
        {
            return Err(Error::InvalidParameters(format!(
                "mean_reversion RSI bounds are invalid: oversold {} / overbought {}",
                self.rsi_oversold, self.rsi_overbought
            )));
        }
        validate_confidence("mean_reversion", self.confidence)
    }
}

fn validate_confidence(name: &str, confidence: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&confidence) {
        return Err(Error::InvalidParameters(format!(
            "{name} confidence ({confidence}) must be within [0, 1]"
        )));
    }
    Ok(())
}
