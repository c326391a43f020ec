// In crates/engine/src/lib.rs

pub mod consensus;
pub mod coordinator;
pub mod task;
pub mod weights;

pub use consensus::{ConsensusParams, compute_consensus};
pub use coordinator::{CoordinationReport, CoordinatorParams, Deadline, DecisionCoordinator, EvaluationOutcome};
pub use task::{RunSummary, TradingTask};
pub use weights::{AdaptiveWeighting, SharedWeights, WeightTable};

use anyhow::{Context, Result};
use app_config::{Settings, TradeSettings};
use chrono::{DateTime, Datelike, IsoWeek, NaiveDate, Utc};
use core_types::{
    ConsensusDecision, Direction, DirectiveKind, ExecutionIntent, MarketSnapshot, PositionDirective,
    RiskGateResult, Side, Symbol,
};
use events::AlertEvent;
use execution::{ClosedTrade, ExecutionSink};
use parking_lot::Mutex;
use risk::{
    CircuitBreaker, PortfolioRiskGate, PortfolioStore, PositionMonitor, PositionSizingPolicy,
    PreTradeGate, PriceBook, RiskGatePipeline, SizingBreakdown, StaticCorrelations, TradeIntent,
};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use strategies::Evaluator;
use tokio::sync::broadcast;

/// What happened in one snapshot-to-decision cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub symbol: Symbol,
    pub decision: ConsensusDecision,
    pub outcomes: BTreeMap<String, EvaluationOutcome>,
    /// Absent when the decision was HOLD.
    pub gate: Option<RiskGateResult>,
    pub sizing: Option<SizingBreakdown>,
    pub submitted: Option<ExecutionIntent>,
    pub directives: Vec<PositionDirective>,
    pub closed_trades: Vec<ClosedTrade>,
}

#[derive(Default)]
struct Calendar {
    day: Option<NaiveDate>,
    week: Option<IsoWeek>,
}

/// Wires the coordinator, the risk gate pipeline, sizing and execution.
pub struct Engine {
    coordinator: DecisionCoordinator,
    pipeline: RiskGatePipeline,
    sizing: PositionSizingPolicy,
    sink: Arc<dyn ExecutionSink>,
    adaptive: Option<AdaptiveWeighting>,
    rebalance_every: u64,
    trade: TradeSettings,
    cycles: AtomicU64,
    // Per-symbol bar counters for scoring adaptive-weighting votes.
    bars: Mutex<HashMap<Symbol, u64>>,
    breaker_generation: AtomicU64,
    calendar: Mutex<Calendar>,
}

impl Engine {
    pub fn new(
        settings: &Settings,
        evaluators: Vec<Arc<dyn Evaluator>>,
        store: Arc<PortfolioStore>,
        sink: Arc<dyn ExecutionSink>,
        alerts: broadcast::Sender<AlertEvent>,
    ) -> Result<Self> {
        let weights = Arc::new(SharedWeights::new(WeightTable::from_configs(&settings.evaluators)));
        let coordinator = DecisionCoordinator::new(
            evaluators,
            weights.clone(),
            CoordinatorParams::from(&settings.coordinator),
        );

        let breaker = Arc::new(CircuitBreaker::new(settings.breaker.clone()).with_alerts(alerts.clone()));
        let correlations = StaticCorrelations::new(&settings.correlations)?;
        let retention = chrono::Duration::seconds(settings.position_monitor.velocity_window_secs as i64 * 4);
        let pipeline = RiskGatePipeline::new(
            PreTradeGate::new(settings.pre_trade.clone())?,
            PositionMonitor::new(settings.position_monitor.clone())?,
            PortfolioRiskGate::new(settings.portfolio_risk.clone(), Arc::new(correlations))?,
            breaker,
            store,
            Arc::new(PriceBook::new(retention)),
        )
        .with_alerts(alerts);

        let adaptive = settings
            .weighting
            .enabled
            .then(|| AdaptiveWeighting::new(settings.weighting.clone(), weights));

        Ok(Self {
            coordinator,
            pipeline,
            sizing: PositionSizingPolicy::new(settings.sizing.clone())?,
            sink,
            adaptive,
            rebalance_every: settings.weighting.rebalance_every.max(1) as u64,
            trade: settings.trade.clone(),
            cycles: AtomicU64::new(0),
            bars: Mutex::new(HashMap::new()),
            breaker_generation: AtomicU64::new(0),
            calendar: Mutex::new(Calendar::default()),
        })
    }

    pub fn pipeline(&self) -> &RiskGatePipeline {
        &self.pipeline
    }

    pub fn coordinator(&self) -> &DecisionCoordinator {
        &self.coordinator
    }

    /// Runs one full cycle for `snapshot`, observed at `now`.
    ///
    /// Evaluator and gate faults never fail the cycle. Errors are reserved for
    /// snapshots the engine cannot price.
    pub async fn process_snapshot(&self, snapshot: MarketSnapshot, now: DateTime<Utc>) -> Result<CycleReport> {
        let symbol = snapshot.symbol.clone();
        let price = snapshot
            .last_close()
            .with_context(|| format!("Empty snapshot for {symbol}"))?;
        let cycle_no = self.cycles.fetch_add(1, Ordering::AcqRel);
        let bar = {
            let mut bars = self.bars.lock();
            let counter = bars.entry(symbol.clone()).or_insert(0);
            *counter += 1;
            *counter - 1
        };

        self.pipeline.prices().record(&symbol, now, price);
        self.roll_calendar(now);
        self.acknowledge_breaker_reset(now);

        if let Some(adaptive) = &self.adaptive {
            adaptive.resolve(&symbol, bar, price);
        }

        let report = self.coordinator.coordinate(Arc::new(snapshot)).await;

        if let Some(adaptive) = &self.adaptive {
            adaptive.record_votes(&symbol, bar, price, report.signals());
            if cycle_no > 0 && cycle_no % self.rebalance_every == 0 {
                adaptive.rebalance();
            }
        }

        let mut cycle = CycleReport {
            symbol: symbol.clone(),
            decision: report.decision.clone(),
            outcomes: report.outcomes,
            gate: None,
            sizing: None,
            submitted: None,
            directives: Vec::new(),
            closed_trades: Vec::new(),
        };

        let intent = if report.decision.is_actionable() {
            let intent = self.trade_intent(&symbol, report.decision, price)?;
            let outcome = self.pipeline.evaluate(&intent, now);
            cycle.gate = Some(outcome.result.clone());
            cycle.directives = outcome.directives;
            outcome.result.approved.then_some((intent, outcome.portfolio))
        } else {
            cycle.directives = self.pipeline.monitor_positions(now);
            None
        };

        let directives = cycle.directives.clone();
        for directive in &directives {
            let Some(directive_price) = self.pipeline.prices().latest(&directive.symbol) else {
                continue;
            };
            self.execute_directive(directive, directive_price, now, &mut cycle).await;
        }

        if let Some((intent, portfolio)) = intent {
            let side = Side::from_direction(intent.decision.action);
            // Directives above may have closed the position the gate saw.
            let open_side = self.pipeline.store().snapshot().open_positions.get(&symbol).map(|p| p.side);
            if open_side.is_some() && open_side == side {
                tracing::debug!(%symbol, "Position already open on this side. Nothing to submit.");
                return Ok(cycle);
            }

            let sizing = self.sizing.size(intent.decision.confidence, &portfolio);
            cycle.sizing = Some(sizing);

            // The breaker may have been tripped out of band since the gate ran.
            if !self.pipeline.breaker_allows_entry(now) {
                tracing::warn!(%symbol, "Circuit breaker opened before submission. Intent dropped.");
                return Ok(cycle);
            }

            if open_side.is_some() {
                let reversal = PositionDirective {
                    symbol: symbol.clone(),
                    kind: DirectiveKind::Close,
                    reason: format!("reversal to {}", intent.decision.action),
                };
                let closed = self.execute_directive(&reversal, price, now, &mut cycle).await;
                cycle.directives.push(reversal);
                if !closed {
                    return Ok(cycle);
                }
            }

            let execution_intent = ExecutionIntent {
                symbol: symbol.clone(),
                action: intent.decision.action,
                confidence: intent.decision.confidence,
                size_fraction: sizing.size,
                reference_price: price,
                stop_loss: intent.stop_loss,
                take_profit: self.take_profit(intent.decision.action, price),
                decided_at: now,
            };
            match self.sink.submit(&execution_intent).await {
                Ok(fill) => {
                    tracing::info!(
                        %symbol,
                        action = %execution_intent.action,
                        size = sizing.size,
                        price = %fill.price,
                        sink = self.sink.name(),
                        "Intent submitted."
                    );
                    cycle.submitted = Some(execution_intent);
                }
                Err(e) => tracing::warn!(%symbol, error = %e, "Execution sink rejected intent."),
            }
        }

        Ok(cycle)
    }

    /// Hands `directive` to the sink and books any realized trade. `false` if the sink failed.
    async fn execute_directive(
        &self,
        directive: &PositionDirective,
        price: Decimal,
        now: DateTime<Utc>,
        cycle: &mut CycleReport,
    ) -> bool {
        match self.sink.on_directive(directive, price, now).await {
            Ok(Some(trade)) => {
                self.record_trade(&trade);
                cycle.closed_trades.push(trade);
                true
            }
            Ok(None) => true,
            Err(e) => {
                tracing::warn!(symbol = %directive.symbol, error = %e, "Directive not executed.");
                false
            }
        }
    }

    fn trade_intent(&self, symbol: &Symbol, decision: ConsensusDecision, price: Decimal) -> Result<TradeIntent> {
        let distance = Decimal::from_f64(self.trade.stop_loss_fraction)
            .context("stop_loss_fraction is not representable")?;
        let stop_loss = match decision.action {
            Direction::Sell => price * (Decimal::ONE + distance),
            _ => price * (Decimal::ONE - distance),
        };
        Ok(TradeIntent {
            symbol: symbol.clone(),
            decision,
            entry_price: price,
            stop_loss,
            risk_fraction: self.sizing.max_size() * self.trade.stop_loss_fraction,
        })
    }

    fn take_profit(&self, action: Direction, price: Decimal) -> Option<Decimal> {
        let distance = Decimal::from_f64(self.trade.take_profit_fraction?)?;
        Some(match action {
            Direction::Sell => price * (Decimal::ONE - distance),
            _ => price * (Decimal::ONE + distance),
        })
    }

    fn record_trade(&self, trade: &ClosedTrade) {
        if trade.full_close {
            self.sizing.record_trade(trade.pnl > Decimal::ZERO);
        }
        self.sizing.record_return(trade.return_fraction);
    }

    /// Clears daily and weekly PnL when `now` enters a new UTC day or ISO week.
    fn roll_calendar(&self, now: DateTime<Utc>) {
        let (day, week) = (now.date_naive(), now.iso_week());
        let mut calendar = self.calendar.lock();
        let store = self.pipeline.store();
        if calendar.day.is_some_and(|d| d != day) {
            tracing::info!(%day, "New trading day. Resetting daily PnL.");
            store.reset_daily();
        }
        if calendar.week.is_some_and(|w| w != week) {
            tracing::info!(week = week.week(), "New trading week. Resetting weekly PnL.");
            store.reset_weekly();
        }
        calendar.day = Some(day);
        calendar.week = Some(week);
    }

    /// A reset breaker re-arms with a fresh loss streak.
    fn acknowledge_breaker_reset(&self, now: DateTime<Utc>) {
        let generation = self.pipeline.breaker().status(now).generation;
        if self.breaker_generation.swap(generation, Ordering::AcqRel) < generation {
            tracing::info!("Breaker reset acknowledged. Clearing loss streak.");
            self.pipeline.store().reset_loss_streak();
        }
    }
}
