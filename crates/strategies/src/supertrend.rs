// In crates/strategies/src/supertrend.rs

use crate::types::SuperTrendSettings;
use crate::{Error, Evaluator, Result};
use async_trait::async_trait;
use core_types::{Direction, MarketSnapshot, Signal};
use rust_decimal::prelude::*;
use ta::indicators::AverageTrueRange;
use ta::{DataItem, Next};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
enum TrendDirection {
    #[default]
    Sideways,
    Uptrend,
    Downtrend,
}

/// Band state carried from one bar to the next.
#[derive(Debug, Clone, Copy, Default)]
struct BandState {
    final_upper_band: f64,
    final_lower_band: f64,
    trend: TrendDirection,
    confirmation_count: u32,
}

/// ATR-band trend follower.
///
/// The band history is rebuilt from the snapshot on every call, so the
/// evaluator holds no state between cycles.
#[derive(Debug)]
pub struct SuperTrend {
    id: String,
    settings: SuperTrendSettings,
}

impl SuperTrend {
    pub fn new(id: impl Into<String>, settings: SuperTrendSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            id: id.into(),
            settings,
        })
    }

    fn final_state(&self, snapshot: &MarketSnapshot) -> Result<BandState> {
        let mut atr = AverageTrueRange::new(self.settings.period as usize)
            .map_err(|e| Error::InvalidParameters(format!("{e:?}")))?;
        let mut last = BandState::default();

        for (i, kline) in snapshot.klines.iter().enumerate() {
            let close = kline.close.to_f64().unwrap_or(0.0);
            let high = kline.high.to_f64().unwrap_or(0.0);
            let low = kline.low.to_f64().unwrap_or(0.0);
            let prev_close = if i > 0 {
                snapshot.klines[i - 1].close.to_f64().unwrap_or(0.0)
            } else {
                close
            };

            let item = DataItem::builder()
                .open(close)
                .high(high)
                .low(low)
                .close(close)
                .volume(0.0)
                .build()
                .map_err(|e| Error::EvaluationFailed {
                    reason: format!("malformed bar at {}: {e:?}", kline.open_time),
                })?;
            let current_atr = atr.next(&item);

            let hl2 = (high + low) / 2.0;
            let basic_upper = hl2 + self.settings.multiplier * current_atr;
            let basic_lower = hl2 - self.settings.multiplier * current_atr;

            let mut current = last;
            current.final_upper_band = if i == 0
                || basic_upper < last.final_upper_band
                || prev_close > last.final_upper_band
            {
                basic_upper
            } else {
                last.final_upper_band
            };
            current.final_lower_band = if i == 0
                || basic_lower > last.final_lower_band
                || prev_close < last.final_lower_band
            {
                basic_lower
            } else {
                last.final_lower_band
            };

            current.trend = if close > last.final_upper_band && i > 0 {
                TrendDirection::Uptrend
            } else if close < last.final_lower_band && i > 0 {
                TrendDirection::Downtrend
            } else {
                last.trend
            };

            current.confirmation_count = if current.trend == last.trend {
                last.confirmation_count + 1
            } else {
                1
            };

            last = current;
        }

        Ok(last)
    }
}

#[async_trait]
impl Evaluator for SuperTrend {
    fn id(&self) -> &str {
        &self.id
    }

    async fn evaluate(&self, snapshot: &MarketSnapshot) -> Result<Option<Signal>> {
        let required_bars = self.settings.period as usize + self.settings.confirmation_bars as usize;
        if snapshot.len() < required_bars {
            return Ok(None);
        }

        // Volume filter
        if let Some(last) = snapshot.last() {
            let threshold = Decimal::from_f64(self.settings.volume_threshold).unwrap_or_default();
            if last.volume < threshold {
                return Ok(Some(Signal::new(&self.id, Direction::Hold, 0.0)));
            }
        }

        let state = self.final_state(snapshot)?;
        if state.confirmation_count < self.settings.confirmation_bars {
            return Ok(Some(Signal::new(&self.id, Direction::Hold, 0.0)));
        }

        let direction = match state.trend {
            TrendDirection::Uptrend => Direction::Buy,
            TrendDirection::Downtrend => Direction::Sell,
            TrendDirection::Sideways => Direction::Hold,
        };
        let confidence = if direction.is_directional() {
            self.settings.confidence
        } else {
            0.0
        };
        Ok(Some(Signal::new(&self.id, direction, confidence)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Kline, Symbol};

    fn snapshot_from(closes: &[f64], spread: f64) -> MarketSnapshot {
        let klines = closes
            .iter()
            .enumerate()
            .map(|(i, c)| Kline {
                open_time: i as i64 * 60_000,
                open: Decimal::from_f64(*c).unwrap(),
                high: Decimal::from_f64(c + spread).unwrap(),
                low: Decimal::from_f64(c - spread).unwrap(),
                close: Decimal::from_f64(*c).unwrap(),
                volume: Decimal::from(10),
                close_time: i as i64 * 60_000 + 59_999,
            })
            .collect();
        MarketSnapshot::new(Symbol::new("BTCUSDT"), klines).unwrap()
    }

    fn settings() -> SuperTrendSettings {
        SuperTrendSettings {
            period: 5,
            multiplier: 1.0,
            confirmation_bars: 2,
            volume_threshold: 0.0,
            confidence: 0.65,
        }
    }

    #[tokio::test]
    async fn test_short_snapshot_abstains() {
        let eval = SuperTrend::new("st", settings()).unwrap();
        let snap = snapshot_from(&[100.0, 101.0, 102.0], 0.5);
        assert!(eval.evaluate(&snap).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_strong_rally_votes_buy() {
        let eval = SuperTrend::new("st", settings()).unwrap();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + 3.0 * i as f64).collect();
        let signal = eval.evaluate(&snapshot_from(&closes, 0.5)).await.unwrap().unwrap();
        assert_eq!(signal.direction, Direction::Buy);
        assert_eq!(signal.confidence, 0.65);
    }

    #[tokio::test]
    async fn test_strong_selloff_votes_sell() {
        let eval = SuperTrend::new("st", settings()).unwrap();
        let closes: Vec<f64> = (0..40).map(|i| 300.0 - 3.0 * i as f64).collect();
        let signal = eval.evaluate(&snapshot_from(&closes, 0.5)).await.unwrap().unwrap();
        assert_eq!(signal.direction, Direction::Sell);
    }

    #[tokio::test]
    async fn test_low_volume_holds() {
        let mut s = settings();
        s.volume_threshold = 1_000.0;
        let eval = SuperTrend::new("st", s).unwrap();
        let closes: Vec<f64> = (0..40).map(|i| 100.0 + 3.0 * i as f64).collect();
        let signal = eval.evaluate(&snapshot_from(&closes, 0.5)).await.unwrap().unwrap();
        assert_eq!(signal.direction, Direction::Hold);
    }

    #[test]
    fn test_rejects_non_positive_multiplier() {
        let mut s = settings();
        s.multiplier = 0.0;
        assert!(SuperTrend::new("st", s).is_err());
    }
}
