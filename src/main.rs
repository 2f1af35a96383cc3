//! Binary Trader - Main Entry Point
//!
//! Runs one automated trading session against the Deriv API until a stop
//! rule fires or Ctrl-C is pressed.

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

use binary_trader::config::{load_config, StakingKind};
use binary_trader::{build_strategy, StrategyKind, TradingEngine};

/// CLI arguments for the application
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long)]
    log_level: Option<String>,

    /// Instrument to trade, e.g. R_100
    #[arg(long)]
    symbol: Option<String>,

    /// Strategy: trend, balanced or cadence
    #[arg(long, default_value = "trend")]
    strategy: String,

    /// Staking progression: flat, classic, inverse, arithmetic or sequence
    #[arg(long)]
    staking: Option<String>,

    /// Session name used in logs
    #[arg(long, default_value = "main")]
    name: String,
}

fn level_from(name: &str) -> Level {
    match name.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    let mut config = load_config(Some(&args.config)).context("loading configuration")?;

    // Initialize logging
    let level = level_from(args.log_level.as_deref().unwrap_or(&config.settings.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting Binary Trader");
    info!("Configuration file: {}", args.config);

    if let Some(symbol) = args.symbol {
        config.trading.symbol = symbol;
    }
    if let Some(staking) = args.staking.as_deref() {
        config.risk.staking = staking.parse::<StakingKind>()?;
    }
    let kind: StrategyKind = args.strategy.parse()?;

    let strategy = build_strategy(kind, &config.trading);
    let mut engine = TradingEngine::with_deriv(args.name, config, strategy);
    let handle = engine.handle();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received shutdown signal, stopping session...");
            handle.stop();
        }
    });

    match engine.start().await {
        Ok(summary) => {
            info!(
                reason = ?summary.stop_reason,
                net_profit = %summary.stats.net_profit,
                "Session finished"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "Session ended with an error");
            Err(e.into())
        }
    }
}
