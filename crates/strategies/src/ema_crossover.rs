// In crates/strategies/src/ema_crossover.rs

use crate::types::EmaCrossoverSettings;
use crate::{Error, Evaluator, Result};
use async_trait::async_trait;
use core_types::{Direction, MarketSnapshot, Signal};
use ta::Next;
use ta::indicators::ExponentialMovingAverage as Ema;

/// Votes with the side of the fast EMA relative to the slow EMA.
///
/// A fresh crossover on the latest bar is reported at full confidence; an
/// established trend is reported at 80% of it. When the averages sit closer
/// than `min_spread` the evaluator answers `Hold`.
#[derive(Debug)]
pub struct EmaCrossover {
    id: String,
    settings: EmaCrossoverSettings,
}

impl EmaCrossover {
    pub fn new(id: impl Into<String>, settings: EmaCrossoverSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            id: id.into(),
            settings,
        })
    }

    /// Returns the (previous, current) fast/slow EMA pairs over `closes`.
    fn ema_pairs(&self, closes: &[f64]) -> Result<((f64, f64), (f64, f64))> {
        let mut fast = Ema::new(self.settings.fast_period as usize)
            .map_err(|e| Error::InvalidParameters(format!("{e:?}")))?;
        let mut slow = Ema::new(self.settings.slow_period as usize)
            .map_err(|e| Error::InvalidParameters(format!("{e:?}")))?;

        let mut prev = (0.0, 0.0);
        let mut current = (0.0, 0.0);
        for close in closes {
            prev = current;
            current = (fast.next(*close), slow.next(*close));
        }
        Ok((prev, current))
    }
}

#[async_trait]
impl Evaluator for EmaCrossover {
    fn id(&self) -> &str {
        &self.id
    }

    async fn evaluate(&self, snapshot: &MarketSnapshot) -> Result<Option<Signal>> {
        // One extra bar so the previous pair is fully warmed up.
        if snapshot.len() <= self.settings.slow_period as usize {
            return Ok(None);
        }

        let closes = snapshot.closes();
        let ((prev_fast, prev_slow), (fast, slow)) = self.ema_pairs(&closes)?;
        if slow <= 0.0 {
            return Err(Error::EvaluationFailed {
                reason: format!("non-positive slow EMA ({slow}) for {}", snapshot.symbol),
            });
        }

        let spread = (fast - slow) / slow;
        if spread.abs() < self.settings.min_spread {
            return Ok(Some(Signal::new(&self.id, Direction::Hold, 0.0)));
        }

        let direction = if fast > slow {
            Direction::Buy
        } else if fast < slow {
            Direction::Sell
        } else {
            Direction::Hold
        };

        let crossed = match direction {
            Direction::Buy => prev_fast <= prev_slow,
            Direction::Sell => prev_fast >= prev_slow,
            Direction::Hold => false,
        };
        let confidence = if crossed {
            self.settings.confidence
        } else {
            self.settings.confidence * 0.8
        };

        Ok(Some(Signal::new(&self.id, direction, confidence)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core_types::{Kline, Symbol};
    use rust_decimal::Decimal;
    use rust_decimal::prelude::FromPrimitive;

    fn snapshot_from(closes: &[f64]) -> MarketSnapshot {
        let klines = closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                let price = Decimal::from_f64(*c).unwrap();
                Kline {
                    open_time: i as i64 * 60_000,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    volume: Decimal::ONE,
                    close_time: i as i64 * 60_000 + 59_999,
                }
            })
            .collect();
        MarketSnapshot::new(Symbol::new("BTCUSDT"), klines).unwrap()
    }

    fn settings() -> EmaCrossoverSettings {
        EmaCrossoverSettings {
            fast_period: 3,
            slow_period: 8,
            min_spread: 0.0,
            confidence: 0.7,
        }
    }

    #[tokio::test]
    async fn test_insufficient_data_returns_none() {
        let eval = EmaCrossover::new("ema", settings()).unwrap();
        let snap = snapshot_from(&[100.0; 5]);
        assert!(eval.evaluate(&snap).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_uptrend_votes_buy() {
        let eval = EmaCrossover::new("ema", settings()).unwrap();
        let closes: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let signal = eval.evaluate(&snapshot_from(&closes)).await.unwrap().unwrap();
        assert_eq!(signal.direction, Direction::Buy);
        assert_eq!(signal.evaluator_id, "ema");
        assert!(signal.confidence > 0.0 && signal.confidence <= 0.7);
    }

    #[tokio::test]
    async fn test_downtrend_votes_sell() {
        let eval = EmaCrossover::new("ema", settings()).unwrap();
        let closes: Vec<f64> = (0..30).map(|i| 200.0 - i as f64).collect();
        let signal = eval.evaluate(&snapshot_from(&closes)).await.unwrap().unwrap();
        assert_eq!(signal.direction, Direction::Sell);
    }

    #[tokio::test]
    async fn test_flat_market_holds_under_min_spread() {
        let mut s = settings();
        s.min_spread = 0.001;
        let eval = EmaCrossover::new("ema", s).unwrap();
        let signal = eval.evaluate(&snapshot_from(&[100.0; 20])).await.unwrap().unwrap();
        assert_eq!(signal.direction, Direction::Hold);
    }

    #[test]
    fn test_rejects_inverted_periods() {
        let mut s = settings();
        s.fast_period = 10;
        assert!(EmaCrossover::new("ema", s).is_err());
    }
}
