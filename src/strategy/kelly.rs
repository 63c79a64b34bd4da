//! Kelly criterion stake sizing.
//!
//! Computes a bounded stake using fractional Kelly scaled by risk profile,
//! capped at the caller's maximum stake percentage. Invalid inputs never
//! error: they fail closed to a zero stake flagged high risk.

use rust_decimal::prelude::*;
use tracing::{debug, warn};

use super::risk::RiskConfig;
use crate::types::{validate_odds, AggregateEstimate, BankrollSettings, CoreError, StakeRecommendation};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Kelly sizing configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct KellyConfig {
    /// Minimum stake in currency units (below this, don't bother).
    pub min_stake: f64,
    /// Aggregates less confident than this are never staked.
    pub min_confidence: f64,
}

impl Default for KellyConfig {
    fn default() -> Self {
        Self {
            min_stake: 1.0,      // $1 minimum
            min_confidence: 0.5,
        }
    }
}

/// Raw Kelly fraction `f* = (p·b − q) / b` with `b = odds − 1`, floored at 0.
///
/// Returns 0 for any input outside its domain.
pub fn kelly_fraction(probability: f64, odds: f64) -> f64 {
    if !(probability.is_finite() && (0.0..=1.0).contains(&probability)) || validate_odds(odds).is_err() {
        return 0.0;
    }
    let b = odds - 1.0;
    let kelly = (b * probability - (1.0 - probability)) / b;
    kelly.max(0.0)
}

// ---------------------------------------------------------------------------
// Kelly calculator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct KellyCalculator {
    config: KellyConfig,
    risk: RiskConfig,
}

impl KellyCalculator {
    pub fn new(config: KellyConfig, risk: RiskConfig) -> Self {
        Self { config, risk }
    }

    /// Access the Kelly configuration.
    pub fn config(&self) -> &KellyConfig {
        &self.config
    }

    pub fn risk_config(&self) -> &RiskConfig {
        &self.risk
    }

    /// Size a stake for an aggregate at the given decimal odds.
    pub fn size(
        &self,
        aggregate: &AggregateEstimate,
        settings: &BankrollSettings,
        odds: f64,
    ) -> StakeRecommendation {
        match self.try_size(aggregate, settings, odds) {
            Ok(rec) => rec,
            Err(e) => {
                warn!(error = %e, "Stake sizing failed closed");
                StakeRecommendation::zero(settings.risk_profile, vec![e.to_string()])
            }
        }
    }

    fn try_size(
        &self,
        aggregate: &AggregateEstimate,
        settings: &BankrollSettings,
        odds: f64,
    ) -> Result<StakeRecommendation, CoreError> {
        settings.validate()?;
        validate_odds(odds).map_err(|e| CoreError::StakingDomain(e.to_string()))?;
        let p = aggregate.probability();
        let c = aggregate.confidence();
        if !(p.is_finite() && (0.0..=1.0).contains(&p) && c.is_finite() && (0.0..=1.0).contains(&c)) {
            return Err(CoreError::StakingDomain(format!(
                "probability {p} / confidence {c} outside [0, 1]"
            )));
        }

        let profile = settings.risk_profile;
        let kelly = kelly_fraction(p, odds);
        let level = self.risk.classify(aggregate.risk_score(), kelly);
        let mut rationale = vec![format!(
            "Kelly {:.2}% at p={:.1}% odds {:.2}",
            kelly * 100.0,
            p * 100.0,
            odds
        )];

        if kelly <= 0.0 {
            rationale.push("No positive edge at these odds".into());
            debug!(probability = p, odds, "Negative Kelly: no stake");
            return Ok(StakeRecommendation::new(0.0, 0.0, Decimal::ZERO, level, profile, rationale));
        }

        if c < self.config.min_confidence {
            rationale.push(format!(
                "Confidence {:.0}% below minimum {:.0}%",
                c * 100.0,
                self.config.min_confidence * 100.0
            ));
            debug!(confidence = c, min = self.config.min_confidence, "Confidence gate: no stake");
            return Ok(StakeRecommendation::new(0.0, kelly, Decimal::ZERO, level, profile, rationale));
        }

        // Apply fractional Kelly for the profile
        let multiplier = self.risk.multiplier(profile);
        let fractional = kelly * multiplier;
        rationale.push(format!(
            "{profile} profile ×{multiplier:.2} → {:.2}%",
            fractional * 100.0
        ));

        // Cap at maximum
        let fraction = fractional.min(settings.max_stake_pct).max(0.0);
        if fraction < fractional {
            rationale.push(format!(
                "Capped at max stake {:.2}%",
                settings.max_stake_pct * 100.0
            ));
        }

        let amount = settings.bankroll * fraction;
        let absolute = Decimal::from_f64(amount)
            .ok_or_else(|| CoreError::StakingDomain(format!("stake {amount} not representable")))?
            .round_dp_with_strategy(2, RoundingStrategy::ToZero);

        // Floor check
        if amount < self.config.min_stake {
            rationale.push(format!(
                "Stake ${:.2} below minimum ${:.2}",
                amount, self.config.min_stake
            ));
            debug!(amount, min = self.config.min_stake, "Stake below minimum size");
            return Ok(StakeRecommendation::new(0.0, kelly, Decimal::ZERO, level, profile, rationale));
        }

        debug!(
            raw_kelly = format!("{:.2}%", kelly * 100.0),
            fraction = format!("{:.2}%", fraction * 100.0),
            stake = format!("${}", absolute),
            risk = %level,
            "Stake sized"
        );

        Ok(StakeRecommendation::new(fraction, kelly, absolute, level, profile, rationale))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
