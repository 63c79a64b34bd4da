//! Bankroll replay over resolved decisions.
//!
//! Replays resolved decisions through the stake sizer with a compounding
//! bankroll to evaluate performance: win rate, P&L, Sharpe ratio, max
//! drawdown, and Brier score.

use chrono::{DateTime, Utc};
use rust_decimal::prelude::*;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::strategy::kelly::KellyCalculator;
use crate::types::{AggregateEstimate, BankrollSettings, RiskProfile};

// ---------------------------------------------------------------------------
// Historical decision data
// ---------------------------------------------------------------------------

/// A past decision with known outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedDecision {
    pub selection_id: String,
    pub aggregate: AggregateEstimate,
    /// Decimal odds available when the decision was made.
    pub odds: f64,
    pub won: bool,
    pub placed_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of one replay.
#[derive(Debug, Clone)]
pub struct BacktestReport {
    pub initial_bankroll: Decimal,
    pub final_bankroll: Decimal,
    pub total_pnl: Decimal,
    pub return_pct: f64,
    pub total_bets: usize,
    pub wins: usize,
    pub losses: usize,
    pub win_rate: f64,
    /// Over every replayed decision, staked or not.
    pub brier_score: f64,
    /// Mean over std of per-bet returns.
    pub sharpe_ratio: f64,
    pub max_drawdown_pct: f64,
    pub peak_bankroll: Decimal,
    /// True when the bankroll fell below the minimum stake.
    pub busted: bool,
    /// Balance after each bet, for charting.
    pub balance_history: Vec<(DateTime<Utc>, Decimal)>,
    pub bet_log: Vec<BacktestBet>,
}

/// Individual bet in the backtest.
#[derive(Debug, Clone)]
pub struct BacktestBet {
    pub selection_id: String,
    pub stake: Decimal,
    pub odds: f64,
    pub probability: f64,
    pub won: bool,
    pub pnl: Decimal,
    pub bankroll_after: Decimal,
}

// ---------------------------------------------------------------------------
// Backtester
// ---------------------------------------------------------------------------

pub struct Backtester {
    sizer: KellyCalculator,
    max_stake_pct: f64,
    risk_profile: RiskProfile,
}

impl Backtester {
    pub fn new(sizer: KellyCalculator, max_stake_pct: f64, risk_profile: RiskProfile) -> Self {
        Self {
            sizer,
            max_stake_pct,
            risk_profile,
        }
    }

    /// Run a backtest over resolved decisions in chronological order.
    pub fn run(&self, decisions: &[ResolvedDecision], initial_bankroll: Decimal) -> BacktestReport {
        let mut bankroll = initial_bankroll;
        let mut peak = initial_bankroll;
        let mut max_dd = 0.0_f64;
        let mut bet_log = Vec::new();
        let mut balance_history = vec![(
            decisions.first().map(|d| d.placed_at).unwrap_or_else(Utc::now),
            initial_bankroll,
        )];
        let mut returns: Vec<f64> = Vec::new();
        let mut brier_sum = 0.0_f64;
        let mut busted = false;

        for decision in decisions {
            let p = decision.aggregate.probability();
            let outcome = if decision.won { 1.0 } else { 0.0 };
            brier_sum += (p - outcome) * (p - outcome);

            if busted {
                continue;
            }

            let settings = BankrollSettings {
                bankroll: bankroll.to_f64().unwrap_or(0.0),
                max_stake_pct: self.max_stake_pct,
                risk_profile: self.risk_profile,
            };
            let rec = self.sizer.size(&decision.aggregate, &settings, decision.odds);
            if !rec.is_actionable() {
                debug!(selection = %decision.selection_id, "No stake in replay");
                continue;
            }

            let stake = rec.absolute_stake();
            let net_odds = Decimal::from_f64(decision.odds - 1.0).unwrap_or(Decimal::ZERO);
            let pnl = if decision.won {
                (stake * net_odds).round_dp(2)
            } else {
                -stake
            };
            bankroll += pnl;

            let stake_f64 = stake.to_f64().unwrap_or(0.01).max(0.01);
            returns.push(pnl.to_f64().unwrap_or(0.0) / stake_f64);

            if bankroll > peak {
                peak = bankroll;
            }
            if peak > Decimal::ZERO {
                let dd = (Decimal::ONE - bankroll / peak).to_f64().unwrap_or(0.0);
                max_dd = max_dd.max(dd);
            }

            bet_log.push(BacktestBet {
                selection_id: decision.selection_id.clone(),
                stake,
                odds: decision.odds,
                probability: p,
                won: decision.won,
                pnl,
                bankroll_after: bankroll,
            });
            balance_history.push((decision.placed_at, bankroll));

            let floor = Decimal::from_f64(self.sizer.config().min_stake).unwrap_or(Decimal::ZERO);
            if bankroll <= Decimal::ZERO || bankroll < floor {
                info!(bankroll = %bankroll, "Bankroll exhausted, replay stops staking");
                busted = true;
            }
        }

        let total_bets = bet_log.len();
        let wins = bet_log.iter().filter(|b| b.won).count();
        let return_pct = if initial_bankroll > Decimal::ZERO {
            ((bankroll - initial_bankroll) / initial_bankroll * dec!(100))
                .to_f64()
                .unwrap_or(0.0)
        } else {
            0.0
        };

        BacktestReport {
            initial_bankroll,
            final_bankroll: bankroll,
            total_pnl: bankroll - initial_bankroll,
            return_pct,
            total_bets,
            wins,
            losses: total_bets - wins,
            win_rate: if total_bets > 0 { wins as f64 / total_bets as f64 } else { 0.0 },
            brier_score: if decisions.is_empty() { 0.0 } else { brier_sum / decisions.len() as f64 },
            sharpe_ratio: per_bet_sharpe(&returns),
            max_drawdown_pct: max_dd * 100.0,
            peak_bankroll: peak,
            busted,
            balance_history,
            bet_log,
        }
    }
}

/// Mean over sample standard deviation of per-bet returns, no
/// annualisation. Zero with fewer than two bets or no dispersion.
fn per_bet_sharpe(returns: &[f64]) -> f64 {
    let [_, _, ..] = returns else {
        return 0.0;
    };
    let n = returns.len() as f64;
    let mean = returns.iter().sum::<f64>() / n;
    let sd = (returns.iter().map(|r| (r - mean) * (r - mean)).sum::<f64>() / (n - 1.0)).sqrt();
    if sd < 1e-10 {
        0.0
    } else {
        mean / sd
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
