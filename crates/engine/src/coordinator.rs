//! Concurrent fan-out of a snapshot to the evaluator pool.
//!
//! Every evaluator runs as its own task in a [`JoinSet`], bounded by the
//! per-evaluator deadline. Collection stops at the total deadline; the set is
//! then aborted and dropped, so a result that arrives late is never observed.

use crate::consensus::{ConsensusParams, WeightedVote, compute_consensus};
use crate::weights::{SharedWeights, WeightTable};
use app_config::CoordinatorSettings;
use core_types::{ConsensusDecision, MarketSnapshot, Signal};
use futures::FutureExt;
use std::any::Any;
use std::collections::BTreeMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use strategies::Evaluator;
use tokio::task::JoinSet;
use tokio::time::Instant;

/// Which deadline an evaluator missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// The per-evaluator deadline.
    Evaluator,
    /// The deadline of the whole fan-out.
    Total,
}

impl fmt::Display for Deadline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Deadline::Evaluator => f.write_str("evaluator deadline"),
            Deadline::Total => f.write_str("total deadline"),
        }
    }
}

/// What one evaluator contributed to a cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationOutcome {
    /// A response. HOLD signals are responses but not votes.
    Vote(Signal),
    /// Not enough data for an opinion.
    NoSignal,
    TimedOut(Deadline),
    Failed(String),
    Panicked(String),
}

impl EvaluationOutcome {
    pub fn signal(&self) -> Option<&Signal> {
        match self {
            EvaluationOutcome::Vote(signal) => Some(signal),
            _ => None,
        }
    }

    /// Timeouts, errors and panics.
    pub fn is_abstention(&self) -> bool {
        matches!(
            self,
            EvaluationOutcome::TimedOut(_) | EvaluationOutcome::Failed(_) | EvaluationOutcome::Panicked(_)
        )
    }
}

#[derive(Debug, Clone)]
pub struct CoordinationReport {
    pub decision: ConsensusDecision,
    /// One entry per registered evaluator.
    pub outcomes: BTreeMap<String, EvaluationOutcome>,
    /// The weight snapshot the decision was computed with.
    pub weights: Arc<WeightTable>,
}

impl CoordinationReport {
    pub fn signals(&self) -> impl Iterator<Item = &Signal> {
        self.outcomes.values().filter_map(EvaluationOutcome::signal)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorParams {
    pub eval_deadline: Duration,
    pub total_deadline: Duration,
    pub consensus: ConsensusParams,
}

impl From<&CoordinatorSettings> for CoordinatorParams {
    fn from(s: &CoordinatorSettings) -> Self {
        Self {
            eval_deadline: Duration::from_millis(s.eval_deadline_ms),
            total_deadline: Duration::from_millis(s.total_deadline_ms),
            consensus: ConsensusParams::from(s),
        }
    }
}

pub struct DecisionCoordinator {
    evaluators: Vec<Arc<dyn Evaluator>>,
    weights: Arc<SharedWeights>,
    params: CoordinatorParams,
}

impl DecisionCoordinator {
    pub fn new(evaluators: Vec<Arc<dyn Evaluator>>, weights: Arc<SharedWeights>, params: CoordinatorParams) -> Self {
        Self {
            evaluators,
            weights,
            params,
        }
    }

    pub fn weights(&self) -> &Arc<SharedWeights> {
        &self.weights
    }

    /// Runs one coordination cycle. Never fails: every fault is an abstention.
    pub async fn coordinate(&self, snapshot: Arc<MarketSnapshot>) -> CoordinationReport {
        let weights = self.weights.snapshot();
        let deadline = Instant::now() + self.params.total_deadline;

        let mut tasks = JoinSet::new();
        for evaluator in &self.evaluators {
            let id = evaluator.id().to_string();
            let evaluator = evaluator.clone();
            let snapshot = snapshot.clone();
            let eval_deadline = self.params.eval_deadline;
            tasks.spawn(async move {
                let call = AssertUnwindSafe(evaluator.evaluate(&snapshot)).catch_unwind();
                let outcome = match tokio::time::timeout(eval_deadline, call).await {
                    Err(_) => EvaluationOutcome::TimedOut(Deadline::Evaluator),
                    Ok(Err(panic)) => EvaluationOutcome::Panicked(panic_message(panic.as_ref())),
                    Ok(Ok(Err(e))) => EvaluationOutcome::Failed(e.to_string()),
                    Ok(Ok(Ok(None))) => EvaluationOutcome::NoSignal,
                    // Votes count under the registered id, whatever the signal claims.
                    Ok(Ok(Ok(Some(s)))) => {
                        EvaluationOutcome::Vote(Signal::at(id.clone(), s.direction, s.confidence, s.timestamp))
                    }
                };
                (id, outcome)
            });
        }

        let mut outcomes = BTreeMap::new();
        let mut total_elapsed = false;
        loop {
            match tokio::time::timeout_at(deadline, tasks.join_next()).await {
                Ok(Some(Ok((id, outcome)))) => {
                    outcomes.insert(id, outcome);
                }
                Ok(Some(Err(e))) => {
                    tracing::warn!(error = %e, "Evaluator task ended abnormally.");
                }
                Ok(None) => break,
                Err(_) => {
                    total_elapsed = true;
                    break;
                }
            }
        }
        tasks.abort_all();
        drop(tasks);

        for evaluator in &self.evaluators {
            outcomes.entry(evaluator.id().to_string()).or_insert_with(|| {
                if total_elapsed {
                    EvaluationOutcome::TimedOut(Deadline::Total)
                } else {
                    EvaluationOutcome::Failed("evaluator task aborted".to_string())
                }
            });
        }

        for (id, outcome) in &outcomes {
            match outcome {
                EvaluationOutcome::Vote(_) | EvaluationOutcome::NoSignal => {}
                EvaluationOutcome::TimedOut(deadline) => {
                    tracing::warn!(evaluator = %id, %deadline, "Evaluator timed out. Counting as abstention.")
                }
                EvaluationOutcome::Failed(reason) => {
                    tracing::warn!(evaluator = %id, %reason, "Evaluator failed. Counting as abstention.")
                }
                EvaluationOutcome::Panicked(reason) => {
                    tracing::warn!(evaluator = %id, %reason, "Evaluator panicked. Counting as abstention.")
                }
            }
        }

        let votes: Vec<WeightedVote<'_>> = outcomes
            .values()
            .filter_map(EvaluationOutcome::signal)
            .map(|signal| WeightedVote {
                signal,
                weight: weights.get(&signal.evaluator_id),
            })
            .collect();
        let decision = compute_consensus(&votes, &self.params.consensus);

        tracing::debug!(
            symbol = %snapshot.symbol,
            action = %decision.action,
            confidence = decision.confidence,
            agreement = decision.agreement_ratio,
            responses = votes.len(),
            "Consensus computed."
        );

        CoordinationReport {
            decision,
            outcomes,
            weights,
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use core_types::{Direction, Kline, Symbol};
    use rust_decimal::Decimal;

    /// Votes after an optional delay.
    struct Scripted {
        id: &'static str,
        delay: Duration,
        reply: Reply,
    }

    enum Reply {
        Vote(Direction, f64),
        Nothing,
        Error,
        Panic,
    }

    #[async_trait]
    impl Evaluator for Scripted {
        fn id(&self) -> &str {
            self.id
        }

        async fn evaluate(&self, _snapshot: &MarketSnapshot) -> strategies::Result<Option<Signal>> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            match self.reply {
                Reply::Vote(d, c) => Ok(Some(Signal::new(self.id, d, c))),
                Reply::Nothing => Ok(None),
                Reply::Error => Err(strategies::Error::EvaluationFailed {
                    reason: "boom".to_string(),
                }),
                Reply::Panic => panic!("evaluator bug"),
            }
        }
    }

    fn voter(id: &'static str, delay_ms: u64, direction: Direction, confidence: f64) -> Arc<dyn Evaluator> {
        Arc::new(Scripted {
            id,
            delay: Duration::from_millis(delay_ms),
            reply: Reply::Vote(direction, confidence),
        })
    }

    fn scripted(id: &'static str, reply: Reply) -> Arc<dyn Evaluator> {
        Arc::new(Scripted {
            id,
            delay: Duration::ZERO,
            reply,
        })
    }

    fn snapshot() -> Arc<MarketSnapshot> {
        let kline = Kline {
            open_time: 0,
            open: Decimal::ONE,
            high: Decimal::ONE,
            low: Decimal::ONE,
            close: Decimal::ONE,
            volume: Decimal::ONE,
            close_time: 59_999,
        };
        Arc::new(MarketSnapshot::new(Symbol::new("BTCUSDT"), vec![kline]).unwrap())
    }

    fn coordinator(evaluators: Vec<Arc<dyn Evaluator>>, weight: f64) -> DecisionCoordinator {
        let table = WeightTable::new(evaluators.iter().map(|e| (e.id().to_string(), weight)));
        DecisionCoordinator::new(
            evaluators,
            Arc::new(SharedWeights::new(table)),
            CoordinatorParams {
                eval_deadline: Duration::from_millis(100),
                total_deadline: Duration::from_millis(300),
                consensus: ConsensusParams::default(),
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_three_buy_votes_reach_consensus() {
        let c = coordinator(
            vec![
                voter("a", 0, Direction::Buy, 0.8),
                voter("b", 10, Direction::Buy, 0.7),
                voter("c", 20, Direction::Buy, 0.75),
            ],
            0.3,
        );
        let report = c.coordinate(snapshot()).await;
        assert_eq!(report.decision.action, Direction::Buy);
        assert!((report.decision.confidence - 0.75).abs() < 1e-9);
        assert_eq!(report.decision.agreement_ratio, 1.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_late_evaluator_contributes_no_vote() {
        let c = coordinator(
            vec![
                voter("fast_a", 0, Direction::Buy, 0.9),
                voter("fast_b", 5, Direction::Buy, 0.9),
                // Would flip the decision if it were counted.
                voter("slow", 150, Direction::Sell, 1.0),
            ],
            1.0 / 3.0,
        );
        let report = c.coordinate(snapshot()).await;
        assert_eq!(report.outcomes["slow"], EvaluationOutcome::TimedOut(Deadline::Evaluator));
        assert!(!report.decision.contributing_evaluators.contains("slow"));
        assert_eq!(report.decision.action, Direction::Buy);
        assert!((report.decision.confidence - 0.9).abs() < 1e-9);

        // Give the abandoned task every chance to finish; nothing changes.
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(report.signals().all(|s| s.evaluator_id != "slow"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_total_deadline_cuts_collection() {
        let mut c = coordinator(
            vec![voter("a", 0, Direction::Sell, 0.9), voter("b", 80, Direction::Sell, 0.9)],
            0.5,
        );
        c.params.total_deadline = Duration::from_millis(50);
        let report = c.coordinate(snapshot()).await;
        assert_eq!(report.outcomes["b"], EvaluationOutcome::TimedOut(Deadline::Total));
        assert_eq!(report.decision.action, Direction::Hold);
    }

    #[tokio::test(start_paused = true)]
    async fn test_faults_are_abstentions() {
        let c = coordinator(
            vec![
                voter("a", 0, Direction::Buy, 0.9),
                voter("b", 0, Direction::Buy, 0.8),
                scripted("err", Reply::Error),
                scripted("panics", Reply::Panic),
                scripted("quiet", Reply::Nothing),
            ],
            0.2,
        );
        let report = c.coordinate(snapshot()).await;
        assert!(matches!(report.outcomes["err"], EvaluationOutcome::Failed(_)));
        assert_eq!(
            report.outcomes["panics"],
            EvaluationOutcome::Panicked("evaluator bug".to_string())
        );
        assert_eq!(report.outcomes["quiet"], EvaluationOutcome::NoSignal);
        assert!(report.outcomes["err"].is_abstention());
        assert_eq!(report.decision.action, Direction::Buy);
        assert!((report.decision.confidence - 0.85).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pool_holds() {
        let c = coordinator(vec![], 0.0);
        let report = c.coordinate(snapshot()).await;
        assert_eq!(report.decision, ConsensusDecision::hold());
        assert!(report.outcomes.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_unweighted_evaluator_votes_with_zero_weight() {
        let evaluators = vec![
            voter("a", 0, Direction::Buy, 0.9),
            voter("b", 0, Direction::Buy, 0.9),
            voter("stranger", 0, Direction::Sell, 1.0),
        ];
        let table = WeightTable::new([("a".to_string(), 0.5), ("b".to_string(), 0.5)]);
        let c = DecisionCoordinator::new(
            evaluators,
            Arc::new(SharedWeights::new(table)),
            CoordinatorParams {
                eval_deadline: Duration::from_millis(100),
                total_deadline: Duration::from_millis(300),
                consensus: ConsensusParams::default(),
            },
        );
        let report = c.coordinate(snapshot()).await;
        assert_eq!(report.decision.action, Direction::Buy);
        assert!((report.decision.confidence - 0.9).abs() < 1e-9);
        assert!((report.decision.agreement_ratio - 2.0 / 3.0).abs() < 1e-9);
    }
}
