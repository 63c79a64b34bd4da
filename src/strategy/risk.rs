//! Risk profile scaling and risk classification.
//!
//! Maps the user's risk profile to a fractional-Kelly multiplier and
//! classifies a sized stake as low, medium or high risk.

use crate::types::{CoreError, RiskLevel, RiskProfile};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct RiskConfig {
    /// Kelly multiplier per profile; must satisfy conservative < moderate < aggressive.
    pub conservative_multiplier: f64,
    pub moderate_multiplier: f64,
    pub aggressive_multiplier: f64,
    /// Aggregate risk score at or above which a stake is high risk.
    pub high_risk_score: f64,
    pub medium_risk_score: f64,
    /// Raw Kelly fraction at or above which a stake is high risk.
    pub high_kelly: f64,
    pub medium_kelly: f64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            conservative_multiplier: 0.25, // quarter-Kelly
            moderate_multiplier: 0.50,
            aggressive_multiplier: 1.0,
            high_risk_score: 0.60,
            medium_risk_score: 0.35,
            high_kelly: 0.25,
            medium_kelly: 0.10,
        }
    }
}

impl RiskConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        let m = [
            self.conservative_multiplier,
            self.moderate_multiplier,
            self.aggressive_multiplier,
        ];
        if m.iter().any(|v| !(v.is_finite() && *v > 0.0 && *v <= 1.0)) {
            return Err(CoreError::Config(format!(
                "risk multipliers must be in (0, 1], got {m:?}"
            )));
        }
        if !(m[0] < m[1] && m[1] < m[2]) {
            return Err(CoreError::Config(format!(
                "risk multipliers must increase conservative < moderate < aggressive, got {m:?}"
            )));
        }
        if !(self.medium_risk_score < self.high_risk_score && self.medium_kelly < self.high_kelly) {
            return Err(CoreError::Config(
                "medium risk thresholds must sit below high risk thresholds".into(),
            ));
        }
        Ok(())
    }

    pub fn multiplier(&self, profile: RiskProfile) -> f64 {
        match profile {
            RiskProfile::Conservative => self.conservative_multiplier,
            RiskProfile::Moderate => self.moderate_multiplier,
            RiskProfile::Aggressive => self.aggressive_multiplier,
        }
    }

    /// Classify from the aggregate risk score and the raw Kelly fraction.
    pub fn classify(&self, risk_score: f64, kelly: f64) -> RiskLevel {
        if risk_score >= self.high_risk_score || kelly >= self.high_kelly {
            RiskLevel::High
        } else if risk_score >= self.medium_risk_score || kelly >= self.medium_kelly {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}
