//! Evaluator weights and the routine that adapts them.
//!
//! [`SharedWeights`] hands out `Arc` snapshots of an immutable [`WeightTable`].
//! A rebalance builds a complete new table and swaps it in under the write
//! lock, so a consensus computation always sees one consistent table.

use app_config::WeightingSettings;
use core_types::{Direction, EvaluatorConfig, Signal, Symbol};
use parking_lot::{Mutex, RwLock};
use rust_decimal::Decimal;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

/// Evaluator id to weight. Immutable once built.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WeightTable {
    weights: BTreeMap<String, f64>,
}

impl WeightTable {
    pub fn new(weights: impl IntoIterator<Item = (String, f64)>) -> Self {
        Self {
            weights: weights.into_iter().collect(),
        }
    }

    pub fn from_configs(configs: &[EvaluatorConfig]) -> Self {
        Self::new(configs.iter().map(|c| (c.id().to_string(), c.weight)))
    }

    /// Weight of `id`. Unknown evaluators vote with weight 0.
    pub fn get(&self, id: &str) -> f64 {
        self.weights.get(id).copied().unwrap_or(0.0)
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.weights.iter().map(|(k, v)| (k.as_str(), *v))
    }
}

/// The single owner of the live weight table.
#[derive(Debug)]
pub struct SharedWeights {
    table: RwLock<Arc<WeightTable>>,
}

impl SharedWeights {
    pub fn new(table: WeightTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    pub fn snapshot(&self) -> Arc<WeightTable> {
        self.table.read().clone()
    }

    pub fn replace(&self, table: WeightTable) {
        *self.table.write() = Arc::new(table);
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Accuracy {
    correct: u32,
    scored: u32,
}

impl Accuracy {
    /// Laplace-smoothed hit rate; 0.5 before any vote is scored.
    fn rate(&self) -> f64 {
        (self.correct as f64 + 1.0) / (self.scored as f64 + 2.0)
    }
}

struct PendingVote {
    evaluator_id: String,
    direction: Direction,
    price: Decimal,
    bar: u64,
}

/// Scores directional votes against the move that followed them and
/// periodically re-weights evaluators by their hit rate.
///
/// Votes are queued per symbol and `bar` counts that symbol's bars, so a vote
/// is only ever scored against a later price of the same symbol.
pub struct AdaptiveWeighting {
    settings: WeightingSettings,
    weights: Arc<SharedWeights>,
    pending: Mutex<HashMap<Symbol, VecDeque<PendingVote>>>,
    accuracy: Mutex<HashMap<String, Accuracy>>,
}

impl AdaptiveWeighting {
    pub fn new(settings: WeightingSettings, weights: Arc<SharedWeights>) -> Self {
        Self {
            settings,
            weights,
            pending: Mutex::new(HashMap::new()),
            accuracy: Mutex::new(HashMap::new()),
        }
    }

    /// Queues this bar's directional votes for scoring `horizon_bars` later.
    pub fn record_votes<'a>(
        &self,
        symbol: &Symbol,
        bar: u64,
        price: Decimal,
        signals: impl IntoIterator<Item = &'a Signal>,
    ) {
        let mut queues = self.pending.lock();
        let pending = queues.entry(symbol.clone()).or_default();
        for signal in signals.into_iter().filter(|s| s.direction.is_directional()) {
            pending.push_back(PendingVote {
                evaluator_id: signal.evaluator_id.clone(),
                direction: signal.direction,
                price,
                bar,
            });
        }
    }

    /// Scores every pending vote on `symbol` that has reached its horizon at `bar`.
    pub fn resolve(&self, symbol: &Symbol, bar: u64, price: Decimal) {
        let horizon = self.settings.horizon_bars as u64;
        let mut queues = self.pending.lock();
        let Some(pending) = queues.get_mut(symbol) else {
            return;
        };
        let mut accuracy = self.accuracy.lock();
        while pending.front().is_some_and(|v| bar >= v.bar + horizon) {
            let Some(vote) = pending.pop_front() else {
                break;
            };
            let correct = match vote.direction {
                Direction::Buy => price > vote.price,
                Direction::Sell => price < vote.price,
                Direction::Hold => continue,
            };
            let entry = accuracy.entry(vote.evaluator_id).or_default();
            entry.scored += 1;
            if correct {
                entry.correct += 1;
            }
        }
    }

    /// Moves the live table toward hit-rate-proportional weights and swaps it in.
    pub fn rebalance(&self) -> Arc<WeightTable> {
        let current = self.weights.snapshot();
        let accuracy = self.accuracy.lock().clone();
        let lr = self.settings.learning_rate;

        let rates: Vec<(String, f64)> = current
            .iter()
            .map(|(id, _)| {
                let rate = accuracy.get(id).map(Accuracy::rate).unwrap_or(0.5);
                (id.to_string(), rate)
            })
            .collect();
        let rate_sum: f64 = rates.iter().map(|(_, r)| r).sum();
        if rates.is_empty() || rate_sum <= 0.0 {
            return current;
        }

        let blended: Vec<(String, f64)> = rates
            .into_iter()
            .map(|(id, rate)| {
                let target = rate / rate_sum;
                let w = (1.0 - lr) * current.get(&id) + lr * target;
                (id, w.max(self.settings.min_weight))
            })
            .collect();
        let total: f64 = blended.iter().map(|(_, w)| w).sum();
        let table = WeightTable::new(blended.into_iter().map(|(id, w)| (id, w / total)));

        tracing::info!(weights = ?table.weights, "Evaluator weights rebalanced.");
        self.weights.replace(table);
        self.weights.snapshot()
    }
}
