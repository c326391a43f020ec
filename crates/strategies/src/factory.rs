//! Builds the evaluator pool from the `[[evaluators]]` configuration entries.

use crate::types::{EmaCrossoverSettings, MeanReversionSettings, SuperTrendSettings};
use crate::{Evaluator, ema_crossover::EmaCrossover, mean_reversion::MeanReversion, supertrend::SuperTrend};
use anyhow::{Context, Result};
use core_types::EvaluatorConfig;
use std::collections::HashSet;
use std::sync::Arc;

/// Instantiates every configured evaluator.
///
/// Fails on unknown evaluator names, malformed `params` tables, invalid
/// parameters, or duplicated ids. Called once at startup.
pub fn create_evaluators(configs: &[EvaluatorConfig]) -> Result<Vec<Arc<dyn Evaluator>>> {
    let mut evaluators: Vec<Arc<dyn Evaluator>> = Vec::with_capacity(configs.len());
    let mut seen = HashSet::new();

    for config in configs {
        let id = config.id().to_string();
        if !seen.insert(id.clone()) {
            anyhow::bail!("Duplicate evaluator id: {}", id);
        }

        let evaluator: Arc<dyn Evaluator> = match config.name.as_str() {
            "ema_crossover" => {
                let settings: EmaCrossoverSettings = config
                    .params
                    .clone()
                    .try_into()
                    .with_context(|| format!("Invalid params for evaluator '{id}'"))?;
                Arc::new(EmaCrossover::new(id, settings)?)
            }
            "supertrend" => {
                let settings: SuperTrendSettings = config
                    .params
                    .clone()
                    .try_into()
                    .with_context(|| format!("Invalid params for evaluator '{id}'"))?;
                Arc::new(SuperTrend::new(id, settings)?)
            }
            "mean_reversion" => {
                let settings: MeanReversionSettings = config
                    .params
                    .clone()
                    .try_into()
                    .with_context(|| format!("Invalid params for evaluator '{id}'"))?;
                Arc::new(MeanReversion::new(id, settings)?)
            }
            unknown => anyhow::bail!("Attempted to create unknown evaluator: {}", unknown),
        };

        tracing::info!(id = %evaluator.id(), kind = %config.name, "Registered evaluator.");
        evaluators.push(evaluator);
    }

    Ok(evaluators)
}
