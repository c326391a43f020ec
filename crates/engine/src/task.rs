use crate::Engine;
use anyhow::Context;
use chrono::DateTime;
use core_types::{Kline, MarketSnapshot, Symbol};
use futures::{Stream, StreamExt};
use rust_decimal::Decimal;
use std::collections::VecDeque;
use std::sync::Arc;

/// Counters accumulated over one run of a [`TradingTask`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub bars: usize,
    pub actionable: usize,
    pub approved: usize,
    pub rejected: usize,
    pub submitted: usize,
    pub directives: usize,
    pub closed_trades: usize,
    pub realized_pnl: Decimal,
}

/// Drives the engine for a single asset from a stream of closed bars.
pub struct TradingTask {
    symbol: Symbol,
    engine: Arc<Engine>,
    window: usize,
    // Rolling window handed to the evaluators.
    klines: VecDeque<Kline>,
}

impl TradingTask {
    pub fn new(symbol: Symbol, engine: Arc<Engine>, window: usize) -> Self {
        let window = window.max(1);
        Self {
            symbol,
            engine,
            window,
            klines: VecDeque::with_capacity(window + 1),
        }
    }

    /// Processes every bar the stream yields, in order, until it ends.
    pub async fn run<S>(&mut self, bars: S) -> anyhow::Result<RunSummary>
    where
        S: Stream<Item = Kline>,
    {
        tracing::info!(symbol = %self.symbol, window = self.window, "Starting trading task.");
        let mut summary = RunSummary::default();
        let mut bars = std::pin::pin!(bars);

        while let Some(kline) = bars.next().await {
            let now = DateTime::from_timestamp_millis(kline.close_time)
                .with_context(|| format!("Bar close time out of range: {}", kline.close_time))?;

            self.klines.push_back(kline);
            if self.klines.len() > self.window {
                self.klines.pop_front();
            }

            let snapshot = MarketSnapshot::new(self.symbol.clone(), self.klines.iter().cloned().collect())?;
            let cycle = self.engine.process_snapshot(snapshot, now).await?;

            summary.bars += 1;
            if cycle.decision.is_actionable() {
                summary.actionable += 1;
            }
            match &cycle.gate {
                Some(gate) if gate.approved => summary.approved += 1,
                Some(_) => summary.rejected += 1,
                None => {}
            }
            if cycle.submitted.is_some() {
                summary.submitted += 1;
            }
            summary.directives += cycle.directives.len();
            summary.closed_trades += cycle.closed_trades.len();
            summary.realized_pnl += cycle.closed_trades.iter().map(|t| t.pnl).sum::<Decimal>();
        }

        tracing::info!(symbol = %self.symbol, ?summary, "Bar stream ended.");
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use core_types::{Direction, PortfolioState, Signal};
    use execution::{PaperExecutor, SimulationSettings};
    use risk::PortfolioStore;
    use rust_decimal_macros::dec;
    use std::path::Path;
    use strategies::Evaluator;
    use tokio::sync::broadcast;

    struct Trend(&'static str);

    #[async_trait]
    impl Evaluator for Trend {
        fn id(&self) -> &str {
            self.0
        }

        async fn evaluate(&self, snapshot: &MarketSnapshot) -> strategies::Result<Option<Signal>> {
            if snapshot.len() < 3 {
                return Ok(None);
            }
            Ok(Some(Signal::new(self.0, Direction::Buy, 0.8)))
        }
    }

    fn bar(minute: i64, close: Decimal) -> Kline {
        Kline {
            open_time: minute * 60_000,
            open: close,
            high: close,
            low: close,
            close,
            volume: Decimal::ONE,
            close_time: minute * 60_000 + 59_999,
        }
    }

    #[tokio::test]
    async fn test_replay_opens_once_and_counts_bars() {
        let settings = app_config::load_settings_from(&Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config")).unwrap();
        let (tx, _rx) = broadcast::channel(256);
        let store = Arc::new(PortfolioStore::new(PortfolioState::new(dec!(10000))));
        let sink = Arc::new(PaperExecutor::new(SimulationSettings::default(), store.clone()));
        let evaluators: Vec<Arc<dyn Evaluator>> = vec![
            Arc::new(Trend("ema_crossover")),
            Arc::new(Trend("supertrend")),
            Arc::new(Trend("mean_reversion")),
        ];
        let engine = Arc::new(Engine::new(&settings, evaluators, store.clone(), sink, tx).unwrap());

        let bars: Vec<Kline> = (0..6).map(|m| bar(m, dec!(100) + Decimal::from(m))).collect();
        let mut task = TradingTask::new(Symbol::new("BTCUSDT"), engine, 4);
        let summary = task.run(futures::stream::iter(bars)).await.unwrap();

        assert_eq!(summary.bars, 6);
        // Bars 0 and 1 are too short for every evaluator.
        assert_eq!(summary.actionable, 4);
        assert_eq!(summary.approved, 4);
        assert_eq!(summary.submitted, 1);
        assert_eq!(task.klines.len(), 4);
        assert!(store.snapshot().open_positions.contains_key(&Symbol::new("BTCUSDT")));
    }
}
