// In app/src/main.rs

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use core_types::{Kline, PortfolioState, Symbol};
use engine::{Engine, RunSummary, TradingTask};
use events::{AlertEvent, Severity};
use execution::PaperExecutor;
use risk::PortfolioStore;
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::prelude::*;

use self::tracing_layer::{Journal, WarningJournalLayer};
mod tracing_layer;

// --- Command-Line Interface Definition ---

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = "A concurrent decision coordinator with a layered risk gate.")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replays closed bars through the coordinator, the risk gate and the paper executor.
    Run {
        /// JSON array of bars. Prices are decimal strings.
        #[arg(short, long)]
        bars: PathBuf,

        /// The trading symbol the bars belong to (e.g., "BTCUSDT").
        #[arg(short, long, default_value = "BTCUSDT")]
        symbol: String,

        /// Rolling window handed to the evaluators. Defaults to `trade.window`.
        #[arg(short, long)]
        window: Option<usize>,
    },

    /// Loads the configuration and builds the evaluator pool without trading.
    Validate,
}

// --- Main Application Entry Point ---

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from a .env file, if it exists.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = app_config::load_settings().context("Failed to load configuration")?;

    let level = settings
        .app
        .log_level
        .parse::<tracing::Level>()
        .unwrap_or(tracing::Level::INFO);
    let journal = Journal::default();
    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_filter(tracing_subscriber::filter::Targets::new().with_default(level));
    tracing_subscriber::registry()
        .with(fmt_layer)
        .with(WarningJournalLayer::new(journal.clone()))
        .init();

    tracing::info!(environment = %settings.app.environment, "Starting decision coordinator.");

    match cli.command {
        Commands::Run { bars, symbol, window } => {
            let window = window.unwrap_or(settings.trade.window);
            let summary = handle_run(&settings, bars, Symbol::new(symbol), window).await?;
            print_summary(&summary, &journal);
        }
        Commands::Validate => {
            let evaluators = strategies::factory::create_evaluators(&settings.evaluators)?;
            println!("Configuration is valid. {} evaluator(s) ready.", evaluators.len());
        }
    }

    Ok(())
}

// --- "Run" Subcommand Logic ---

async fn handle_run(settings: &app_config::Settings, path: PathBuf, symbol: Symbol, window: usize) -> Result<RunSummary> {
    let raw = std::fs::read_to_string(&path).with_context(|| format!("Failed to read {}", path.display()))?;
    let bars: Vec<Kline> = serde_json::from_str(&raw).with_context(|| format!("Malformed bars in {}", path.display()))?;
    tracing::info!(%symbol, bars = bars.len(), "Loaded bars.");

    let (alerts_tx, alerts_rx) = broadcast::channel::<AlertEvent>(1024);
    let alert_handle = tokio::spawn(log_alerts(alerts_rx));

    let equity = Decimal::from_f64(settings.trade.initial_equity).context("initial_equity is not representable")?;
    let store = Arc::new(PortfolioStore::new(PortfolioState::new(equity)));
    let sink = Arc::new(PaperExecutor::new(settings.simulation.clone(), store.clone()).with_alerts(alerts_tx.clone()));
    let evaluators = strategies::factory::create_evaluators(&settings.evaluators)?;
    let engine = Arc::new(Engine::new(settings, evaluators, store.clone(), sink, alerts_tx)?);

    let mut task = TradingTask::new(symbol, engine.clone(), window);
    let summary = task.run(futures::stream::iter(bars)).await?;

    // Every sender is gone once the engine is dropped, which ends the alert task.
    drop(task);
    drop(engine);
    let alerts = alert_handle.await?;
    tracing::info!(alerts, equity = %store.snapshot().equity, "Replay complete.");

    Ok(summary)
}

/// Mirrors every alert into the log at a level matching its severity.
async fn log_alerts(mut rx: broadcast::Receiver<AlertEvent>) -> usize {
    let mut seen = 0;
    loop {
        match rx.recv().await {
            Ok(event) => {
                seen += 1;
                let payload = serde_json::to_string(&event).unwrap_or_default();
                match event.severity() {
                    Severity::Critical => tracing::error!(%payload, "Alert."),
                    Severity::Warning => tracing::warn!(%payload, "Alert."),
                    Severity::Info => tracing::debug!(%payload, "Alert."),
                }
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Alert subscriber lagged.");
            }
            Err(broadcast::error::RecvError::Closed) => return seen,
        }
    }
}

fn print_summary(summary: &RunSummary, journal: &Journal) {
    println!("\n--- Replay Summary ---");
    println!("  Bars processed:      {}", summary.bars);
    println!("  Actionable decisions:{:>4}", summary.actionable);
    println!("  Gate approved:       {}", summary.approved);
    println!("  Gate rejected:       {}", summary.rejected);
    println!("  Intents submitted:   {}", summary.submitted);
    println!("  Position directives: {}", summary.directives);
    println!("  Closed trades:       {}", summary.closed_trades);
    println!("  Realized PnL:        {}", summary.realized_pnl.round_dp(2));

    if let Ok(journal) = journal.lock() {
        if !journal.is_empty() {
            println!("\n--- Recent Warnings ({}) ---", journal.len());
            for line in journal.iter().rev().take(10) {
                println!("  {line}");
            }
        }
    }
}
