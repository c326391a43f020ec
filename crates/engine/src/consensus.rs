// In crates/engine/src/consensus.rs

use app_config::CoordinatorSettings;
use core_types::{ConsensusDecision, Direction, Signal};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConsensusParams {
    pub min_confidence_threshold: f64,
    /// Distinct evaluators that must vote for the winning direction.
    pub min_agreeing: usize,
    pub tie_epsilon: f64,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            min_confidence_threshold: 0.60,
            min_agreeing: 2,
            tie_epsilon: 1e-9,
        }
    }
}

impl From<&CoordinatorSettings> for ConsensusParams {
    fn from(s: &CoordinatorSettings) -> Self {
        Self {
            min_confidence_threshold: s.min_confidence_threshold,
            min_agreeing: s.min_agreeing_evaluators,
            tie_epsilon: s.tie_epsilon,
        }
    }
}

/// One received signal and the weight its evaluator votes with.
#[derive(Debug, Clone)]
pub struct WeightedVote<'a> {
    pub signal: &'a Signal,
    pub weight: f64,
}

/// Aggregates votes into a single decision.
///
/// `score[d] = Σ weight·confidence over votes for d / Σ weight over all BUY and SELL votes`.
/// HOLD signals are responses, not votes. The result is independent of vote order.
pub fn compute_consensus(votes: &[WeightedVote<'_>], params: &ConsensusParams) -> ConsensusDecision {
    let mut total_weight = 0.0;
    let mut buy = Tally::default();
    let mut sell = Tally::default();

    for vote in votes {
        let weight = if vote.weight.is_finite() { vote.weight.max(0.0) } else { 0.0 };
        let tally = match vote.signal.direction {
            Direction::Buy => &mut buy,
            Direction::Sell => &mut sell,
            Direction::Hold => continue,
        };
        total_weight += weight;
        tally.weighted_confidence += weight * vote.signal.confidence;
        tally.voters.insert(vote.signal.evaluator_id.clone());
    }

    let directional_voters = buy.voters.len() + sell.voters.len();
    if directional_voters == 0 || total_weight <= 0.0 {
        return ConsensusDecision::hold();
    }

    let buy_score = buy.weighted_confidence / total_weight;
    let sell_score = sell.weighted_confidence / total_weight;
    if (buy_score - sell_score).abs() <= params.tie_epsilon {
        return ConsensusDecision::hold();
    }

    let (action, score, winners) = if buy_score > sell_score {
        (Direction::Buy, buy_score, buy.voters)
    } else {
        (Direction::Sell, sell_score, sell.voters)
    };

    if winners.len() < params.min_agreeing || score < params.min_confidence_threshold {
        return ConsensusDecision::hold();
    }

    ConsensusDecision {
        action,
        confidence: score.clamp(0.0, 1.0),
        agreement_ratio: winners.len() as f64 / directional_voters as f64,
        contributing_evaluators: winners,
    }
}

#[derive(Default)]
struct Tally {
    weighted_confidence: f64,
    voters: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signals(votes: &[(&str, Direction, f64)]) -> Vec<Signal> {
        votes.iter().map(|(id, d, c)| Signal::new(*id, *d, *c)).collect()
    }

    fn weighted(signals: &[Signal], weight: f64) -> Vec<WeightedVote<'_>> {
        signals
            .iter()
            .map(|signal| WeightedVote { signal, weight })
            .collect()
    }

    #[test]
    fn test_unanimous_buy() {
        let s = signals(&[
            ("a", Direction::Buy, 0.8),
            ("b", Direction::Buy, 0.7),
            ("c", Direction::Buy, 0.75),
        ]);
        let decision = compute_consensus(&weighted(&s, 0.3), &ConsensusParams::default());
        assert_eq!(decision.action, Direction::Buy);
        assert!((decision.confidence - 0.75).abs() < 1e-9);
        assert_eq!(decision.agreement_ratio, 1.0);
        assert_eq!(decision.contributing_evaluators.len(), 3);
    }

    #[test]
    fn test_single_voter_holds() {
        let s = signals(&[("a", Direction::Buy, 0.95), ("b", Direction::Hold, 0.0)]);
        let decision = compute_consensus(&weighted(&s, 0.5), &ConsensusParams::default());
        assert_eq!(decision, ConsensusDecision::hold());
    }

    #[test]
    fn test_no_responses_hold() {
        let decision = compute_consensus(&[], &ConsensusParams::default());
        assert_eq!(decision.action, Direction::Hold);
        assert_eq!(decision.confidence, 0.0);
    }

    #[test]
    fn test_below_threshold_holds() {
        let s = signals(&[("a", Direction::Sell, 0.5), ("b", Direction::Sell, 0.55)]);
        let decision = compute_consensus(&weighted(&s, 0.5), &ConsensusParams::default());
        assert_eq!(decision.action, Direction::Hold);
    }

    #[test]
    fn test_split_vote_dilutes_score() {
        // Four agree on SELL, one dissents: score = 4·0.2·0.8 / 1.0 = 0.64.
        let s = signals(&[
            ("a", Direction::Sell, 0.8),
            ("b", Direction::Sell, 0.8),
            ("c", Direction::Sell, 0.8),
            ("d", Direction::Sell, 0.8),
            ("e", Direction::Buy, 0.9),
        ]);
        let decision = compute_consensus(&weighted(&s, 0.2), &ConsensusParams::default());
        assert_eq!(decision.action, Direction::Sell);
        assert!((decision.confidence - 0.64).abs() < 1e-9);
        assert!((decision.agreement_ratio - 0.8).abs() < 1e-12);
        assert!(!decision.contributing_evaluators.contains("e"));
    }

    #[test]
    fn test_exact_tie_holds() {
        let s = signals(&[
            ("a", Direction::Buy, 0.9),
            ("b", Direction::Buy, 0.9),
            ("c", Direction::Sell, 0.9),
            ("d", Direction::Sell, 0.9),
        ]);
        let params = ConsensusParams {
            min_confidence_threshold: 0.0,
            ..ConsensusParams::default()
        };
        let decision = compute_consensus(&weighted(&s, 0.25), &params);
        assert_eq!(decision.action, Direction::Hold);
    }

    #[test]
    fn test_zero_weight_votes_hold() {
        let s = signals(&[("a", Direction::Buy, 0.9), ("b", Direction::Buy, 0.9)]);
        let decision = compute_consensus(&weighted(&s, 0.0), &ConsensusParams::default());
        assert_eq!(decision.action, Direction::Hold);
    }

    #[test]
    fn test_order_does_not_matter() {
        let mut s = signals(&[
            ("a", Direction::Buy, 0.9),
            ("b", Direction::Sell, 0.3),
            ("c", Direction::Buy, 0.8),
            ("d", Direction::Hold, 0.0),
        ]);
        let forward = compute_consensus(&weighted(&s, 0.25), &ConsensusParams::default());
        s.reverse();
        let backward = compute_consensus(&weighted(&s, 0.25), &ConsensusParams::default());
        assert_eq!(forward, backward);
    }

    #[test]
    fn test_confidence_stays_in_unit_interval() {
        let directions = [Direction::Buy, Direction::Sell, Direction::Hold];
        let params = ConsensusParams {
            min_confidence_threshold: 0.0,
            min_agreeing: 1,
            tie_epsilon: 0.0,
        };
        for n in 1..6usize {
            for seed in 0..50usize {
                let s: Vec<Signal> = (0..n)
                    .map(|i| {
                        let k = (seed * 7 + i * 13) % 17;
                        Signal::new(format!("e{i}"), directions[k % 3], k as f64 / 10.0)
                    })
                    .collect();
                let votes: Vec<WeightedVote<'_>> = s
                    .iter()
                    .enumerate()
                    .map(|(i, signal)| WeightedVote {
                        signal,
                        weight: ((seed + i) % 5) as f64 / 4.0,
                    })
                    .collect();
                let d = compute_consensus(&votes, &params);
                assert!((0.0..=1.0).contains(&d.confidence));
                assert!((0.0..=1.0).contains(&d.agreement_ratio));
            }
        }
    }
}
