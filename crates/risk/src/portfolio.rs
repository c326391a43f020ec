// In crates/risk/src/portfolio.rs

use crate::pre_trade::{GateContext, RiskGate};
use crate::types::{CorrelationPair, PortfolioRiskSettings};
use crate::{Error, Result};
use core_types::{GateLayer, Symbol};
use std::collections::HashMap;
use std::sync::Arc;

/// Pairwise correlation between two symbols, in `[-1, 1]`.
pub trait CorrelationSource: Send + Sync {
    fn correlation(&self, a: &Symbol, b: &Symbol) -> f64;
}

/// Correlations from configuration. Unknown pairs are uncorrelated.
#[derive(Debug, Default)]
pub struct StaticCorrelations {
    pairs: HashMap<(Symbol, Symbol), f64>,
}

impl StaticCorrelations {
    pub fn new(pairs: &[CorrelationPair]) -> Result<Self> {
        let mut map = HashMap::with_capacity(pairs.len() * 2);
        for pair in pairs {
            if !(-1.0..=1.0).contains(&pair.value) {
                return Err(Error::InvalidParameters(format!(
                    "correlation {}/{} ({}) outside [-1, 1]",
                    pair.a, pair.b, pair.value
                )));
            }
            let (a, b) = (Symbol::new(&pair.a), Symbol::new(&pair.b));
            map.insert((a.clone(), b.clone()), pair.value);
            map.insert((b, a), pair.value);
        }
        Ok(Self { pairs: map })
    }
}

impl CorrelationSource for StaticCorrelations {
    fn correlation(&self, a: &Symbol, b: &Symbol) -> f64 {
        if a == b {
            return 1.0;
        }
        self.pairs.get(&(a.clone(), b.clone())).copied().unwrap_or(0.0)
    }
}

/// Layer 3: exposure limits across all open positions.
pub struct PortfolioRiskGate {
    settings: PortfolioRiskSettings,
    correlations: Arc<dyn CorrelationSource>,
}

impl PortfolioRiskGate {
    pub fn new(settings: PortfolioRiskSettings, correlations: Arc<dyn CorrelationSource>) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            settings,
            correlations,
        })
    }

    /// Risk of existing positions correlated with `symbol`, weighted by |correlation|.
    fn correlated_exposure(&self, ctx: &GateContext<'_>) -> f64 {
        let symbol = &ctx.intent.symbol;
        ctx.portfolio
            .open_positions
            .values()
            .filter_map(|p| {
                let rho = self.correlations.correlation(symbol, &p.symbol).abs();
                (rho > self.settings.correlation_threshold).then(|| rho * p.risk_fraction())
            })
            .sum()
    }
}

impl RiskGate for PortfolioRiskGate {
    fn layer(&self) -> GateLayer {
        GateLayer::PortfolioRisk
    }

    fn check(&self, ctx: &GateContext<'_>) -> Result<()> {
        let new_risk = ctx.intent.risk_fraction;

        let total = ctx.portfolio.total_risk() + new_risk;
        if total > self.settings.max_portfolio_risk {
            return Err(Error::rejected(
                GateLayer::PortfolioRisk,
                format!(
                    "portfolio risk {:.2}% would exceed {:.2}%",
                    total * 100.0,
                    self.settings.max_portfolio_risk * 100.0
                ),
            ));
        }

        let correlated = self.correlated_exposure(ctx) + new_risk;
        if correlated > self.settings.max_correlated_risk {
            return Err(Error::rejected(
                GateLayer::PortfolioRisk,
                format!(
                    "correlated risk {:.2}% would exceed {:.2}%",
                    correlated * 100.0,
                    self.settings.max_correlated_risk * 100.0
                ),
            ));
        }

        if ctx.portfolio.current_drawdown > self.settings.max_drawdown_limit {
            return Err(Error::rejected(
                GateLayer::PortfolioRisk,
                format!(
                    "drawdown {:.2}% exceeds limit of {:.2}%",
                    ctx.portfolio.current_drawdown * 100.0,
                    self.settings.max_drawdown_limit * 100.0
                ),
            ));
        }

        Ok(())
    }
}
