//! PICKWISE: prediction ensemble and staking decision runner.
//!
//! Entry point. Loads configuration, initialises structured logging, and
//! either drives one decision through the lifecycle or replays resolved
//! decisions as a backtest.
//!
//! ```text
//! pickwise <request.json>
//! pickwise backtest <history.json>
//! ```

use anyhow::{bail, Context, Result};
use rust_decimal::prelude::*;
use serde::Deserialize;
use std::fs;
use std::sync::Arc;
use tracing::{error, info, warn};

use pickwise::backtest::calibration::{CalibrationPoint, Calibrator};
use pickwise::backtest::runner::{Backtester, ResolvedDecision};
use pickwise::config::AppConfig;
use pickwise::engine::{DecisionEvent, DecisionLifecycle, DecisionState};
use pickwise::regression::KernelRegressor;
use pickwise::strategy::{Analyzer, SelectedSignals};
use pickwise::types::{BankrollSettings, FeatureVector};

const BANNER: &str = r#"
 ___ ___ ___ _  ____      _____ ___ ___
| _ \_ _/ __| |/ /\ \    / /_ _/ __| __|
|  _/| | (__| ' <  \ \/\/ / | |\__ \ _|
|_| |___\___|_|\_\  \_/\_/ |___|___/___|

  Prediction ensemble & risk-adjusted staking
"#;

/// One decision to run, as read from disk.
#[derive(Debug, Deserialize)]
struct DecisionRequest {
    signals: SelectedSignals,
    /// Overrides the `[staking]` bankroll settings.
    #[serde(default)]
    settings: Option<BankrollSettings>,
    /// Observations to fit the kernel regressor on.
    #[serde(default)]
    training: Option<TrainingData>,
}

#[derive(Debug, Deserialize)]
struct TrainingData {
    inputs: Vec<FeatureVector>,
    targets: Vec<f64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = AppConfig::load("config.toml")?;
    init_logging();

    println!("{BANNER}");
    info!(
        engine = %cfg.engine.name,
        bankroll = format!("${:.2}", cfg.staking.bankroll),
        profile = %cfg.staking.risk_profile,
        dry_run = cfg.submission.dry_run,
        "PICKWISE starting up"
    );

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [cmd, path] if cmd == "backtest" => run_backtest(&cfg, path),
        [path] => run_decision(&cfg, path).await,
        _ => bail!("usage: pickwise <request.json> | pickwise backtest <history.json>"),
    }
}

/// Drive one decision from selection through submission.
async fn run_decision(cfg: &AppConfig, path: &str) -> Result<()> {
    let request: DecisionRequest = read_json(path)?;

    let mut analyzer = cfg.build_analyzer();
    if let Some(training) = &request.training {
        analyzer = analyzer.with_regressor(fit_regressor(cfg, training)?);
    }
    apply_calibration(cfg, &mut analyzer)?;

    let settings = request.settings.unwrap_or_else(|| cfg.bankroll_settings());
    let mut lifecycle = DecisionLifecycle::new(
        Arc::new(analyzer),
        cfg.build_submitter()?,
        settings,
        cfg.lifecycle_config(),
    );

    lifecycle.send(DecisionEvent::Select(request.signals)).await;
    lifecycle.send(DecisionEvent::Analyze).await;
    if lifecycle.state() == DecisionState::Error {
        let reason = lifecycle
            .context()
            .last_error
            .as_ref()
            .map(|e| e.to_string())
            .unwrap_or_default();
        bail!("analysis failed: {reason}");
    }

    lifecycle.send(DecisionEvent::Review).await;
    if let (Some(aggregate), Some(stake)) = (&lifecycle.context().aggregate, &lifecycle.context().stake) {
        info!(aggregate = %aggregate, "Estimate");
        for line in aggregate.reasoning() {
            info!("  {line}");
        }
        info!(stake = %stake, "Recommendation");
        for line in stake.rationale() {
            info!("  {line}");
        }
    }

    if !lifecycle.send(DecisionEvent::Confirm).await {
        info!("No actionable stake; nothing submitted");
        return Ok(());
    }
    if lifecycle.state() == DecisionState::Error {
        bail!("order could not be confirmed: {:?}", lifecycle.context().last_error);
    }

    lifecycle.send(DecisionEvent::Submit).await;
    loop {
        match lifecycle.settle().await {
            Some(Ok(outcome)) => {
                info!(
                    receipt = %outcome.receipt,
                    attempts = outcome.attempts,
                    "Order placed"
                );
                return Ok(());
            }
            Some(Err(e)) => {
                if lifecycle.send(DecisionEvent::Retry).await {
                    warn!(error = %e, "Submission failed, retrying");
                    continue;
                }
                error!(error = %e, "Submission failed");
                return Err(e.into());
            }
            None => bail!("no submission in flight (state: {})", lifecycle.state()),
        }
    }
}

/// Replay resolved decisions through the stake sizer.
fn run_backtest(cfg: &AppConfig, path: &str) -> Result<()> {
    let decisions: Vec<ResolvedDecision> = read_json(path)?;
    let initial = Decimal::from_f64(cfg.staking.bankroll)
        .context("bankroll is not representable as a decimal")?;

    let backtester = Backtester::new(
        cfg.kelly_calculator(),
        cfg.staking.max_stake_pct,
        cfg.staking.risk_profile,
    );
    let report = backtester.run(&decisions, initial.round_dp(2));

    info!(
        decisions = decisions.len(),
        bets = report.total_bets,
        wins = report.wins,
        losses = report.losses,
        win_rate = format!("{:.1}%", report.win_rate * 100.0),
        final_bankroll = format!("${}", report.final_bankroll),
        pnl = format!("${}", report.total_pnl),
        return_pct = format!("{:.2}%", report.return_pct),
        brier = format!("{:.4}", report.brier_score),
        sharpe = format!("{:.3}", report.sharpe_ratio),
        max_drawdown = format!("{:.2}%", report.max_drawdown_pct),
        busted = report.busted,
        "Backtest complete"
    );
    Ok(())
}

fn fit_regressor(cfg: &AppConfig, training: &TrainingData) -> Result<KernelRegressor> {
    let regressor = KernelRegressor::select_best(
        &cfg.kernel.candidates,
        cfg.kernel.noise,
        &training.inputs,
        &training.targets,
    )
    .context("failed to fit kernel regressor")?;
    info!(
        kernel = regressor.kernel().name(),
        points = regressor.training_size(),
        "Kernel regressor fitted"
    );
    Ok(regressor)
}

/// Load resolved predictions and feed per-source reliability weights.
fn apply_calibration(cfg: &AppConfig, analyzer: &mut Analyzer) -> Result<()> {
    let Some(path) = &cfg.engine.calibration_history else {
        return Ok(());
    };
    let points: Vec<CalibrationPoint> = read_json(path)?;
    let mut calibrator = Calibrator::new().with_min_samples(cfg.engine.calibration_min_samples);
    calibrator.add_points(points);
    for line in calibrator.summary() {
        info!("{line}");
    }
    analyzer.set_reliability(calibrator.reliability_weights());
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &str) -> Result<T> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("Failed to read {path}"))?;
    serde_json::from_str(&contents).with_context(|| format!("Failed to parse {path}"))
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("pickwise=info"));

    let json_logging = std::env::var("PICKWISE_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
