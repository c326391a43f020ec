// In crates/strategies/src/mean_reversion.rs

use crate::types::MeanReversionSettings;
use crate::{Error, Evaluator, Result};
use async_trait::async_trait;
use core_types::{Direction, MarketSnapshot, Signal};
use ta::Next;
use ta::indicators::{BollingerBands, RelativeStrengthIndex as Rsi};

/// Fades band extremes that are confirmed by an RSI extreme.
///
/// * close at or below the lower band with RSI under `rsi_oversold` votes `Buy`;
/// * close at or above the upper band with RSI over `rsi_overbought` votes `Sell`;
/// * anything else is a `Hold`.
#[derive(Debug)]
pub struct MeanReversion {
    id: String,
    settings: MeanReversionSettings,
}

impl MeanReversion {
    pub fn new(id: impl Into<String>, settings: MeanReversionSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            id: id.into(),
            settings,
        })
    }

    fn lookback(&self) -> usize {
        (self.settings.bband_period as usize).max(self.settings.rsi_period as usize + 1)
    }
}

#[async_trait]
impl Evaluator for MeanReversion {
    fn id(&self) -> &str {
        &self.id
    }

    async fn evaluate(&self, snapshot: &MarketSnapshot) -> Result<Option<Signal>> {
        if snapshot.len() < self.lookback() {
            return Ok(None);
        }

        let closes = snapshot.closes();
        let mut bbands = BollingerBands::new(self.settings.bband_period as usize, self.settings.bband_stddev)
            .map_err(|e| Error::InvalidParameters(format!("{e:?}")))?;
        let mut rsi = Rsi::new(self.settings.rsi_period as usize)
            .map_err(|e| Error::InvalidParameters(format!("{e:?}")))?;

        let mut bands = None;
        let mut current_rsi = 50.0;
        for close in &closes {
            bands = Some(bbands.next(*close));
            current_rsi = rsi.next(*close);
        }

        let (Some(bands), Some(close)) = (bands, closes.last().copied()) else {
            return Ok(None);
        };

        let direction = if close <= bands.lower && current_rsi < self.settings.rsi_oversold {
            Direction::Buy
        } else if close >= bands.upper && current_rsi > self.settings.rsi_overbought {
            Direction::Sell
        } else {
            Direction::Hold
        };

        let confidence = if direction.is_directional() {
            self.settings.confidence
        } else {
            0.0
        };
        Ok(Some(Signal::new(&self.id, direction, confidence)))
    }
}
