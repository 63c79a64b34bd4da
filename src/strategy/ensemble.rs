//! Ensemble aggregation.
//!
//! Merges signal-model estimates, and optionally the kernel regressor's
//! predictive distribution, into one calibrated win probability with a
//! confidence that is penalised when the components disagree.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::{
    validate_odds, AggregateEstimate, CoreError, RegressionEstimate, SignalEstimate, SignalSource,
};

/// Weight of (1 − confidence) in the risk score; the rest goes to disagreement.
const RISK_CONFIDENCE_SHARE: f64 = 0.6;

// ---------------------------------------------------------------------------
// Configuration (defaults: overridden by config.toml at runtime)
// ---------------------------------------------------------------------------

/// How a regression mean is turned into a win probability.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProbabilityMapping {
    /// Logistic approximation of `P(target > centre)` under the predictive
    /// normal. The selection's line, when present, replaces `center`.
    Logistic { center: f64, scale: f64 },
    /// Linear ramp from 0 at `lo` to 1 at `hi`.
    Linear { lo: f64, hi: f64 },
}

impl Default for ProbabilityMapping {
    fn default() -> Self {
        ProbabilityMapping::Logistic {
            center: 0.0,
            scale: 1.0,
        }
    }
}

impl ProbabilityMapping {
    pub fn validate(&self) -> Result<(), CoreError> {
        match *self {
            ProbabilityMapping::Logistic { center, scale } => {
                if !center.is_finite() || !(scale.is_finite() && scale > 0.0) {
                    return Err(CoreError::Config(format!(
                        "logistic mapping needs finite center and positive scale, got {center}/{scale}"
                    )));
                }
            }
            ProbabilityMapping::Linear { lo, hi } => {
                if !(lo.is_finite() && hi.is_finite() && hi > lo) {
                    return Err(CoreError::Config(format!(
                        "linear mapping needs lo < hi, got {lo}/{hi}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Probability the target clears the line.
    pub fn to_probability(&self, estimate: &RegressionEstimate, line: Option<f64>) -> f64 {
        match *self {
            ProbabilityMapping::Logistic { center, scale } => {
                let centre = line.unwrap_or(center);
                let spread = (scale * scale + estimate.variance.max(0.0)).sqrt();
                let z = (estimate.mean - centre) / spread;
                // 1.702 makes the logistic track the normal CDF within 0.01.
                1.0 / (1.0 + (-1.702 * z).exp())
            }
            ProbabilityMapping::Linear { lo, hi } => ((estimate.mean - lo) / (hi - lo)).clamp(0.0, 1.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleConfig {
    /// Multiplier on the coefficient of variation in the confidence discount.
    pub disagreement_penalty: f64,
    /// Probability spread above which confidence is capped below the
    /// weakest component.
    pub disagreement_threshold: f64,
    /// Base weight of the regression component before variance shrinkage.
    pub regression_weight: f64,
    pub mapping: ProbabilityMapping,
    pub max_reasoning: usize,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            disagreement_penalty: 4.0,
            disagreement_threshold: 0.10,
            regression_weight: 1.0,
            mapping: ProbabilityMapping::default(),
            max_reasoning: 5,
        }
    }
}

impl EnsembleConfig {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(self.disagreement_penalty.is_finite() && self.disagreement_penalty > 0.0) {
            return Err(CoreError::Config(format!(
                "disagreement_penalty must be positive, got {}",
                self.disagreement_penalty
            )));
        }
        if !(self.disagreement_threshold.is_finite() && (0.0..=1.0).contains(&self.disagreement_threshold)) {
            return Err(CoreError::Config(format!(
                "disagreement_threshold must be in [0, 1], got {}",
                self.disagreement_threshold
            )));
        }
        if !(self.regression_weight.is_finite() && self.regression_weight >= 0.0) {
            return Err(CoreError::Config(format!(
                "regression_weight must be >= 0, got {}",
                self.regression_weight
            )));
        }
        self.mapping.validate()
    }
}

/// Regression output plus the line it is judged against.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegressionSignal {
    pub estimate: RegressionEstimate,
    pub line: Option<f64>,
}

// ---------------------------------------------------------------------------
// Aggregator
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct Component {
    probability: f64,
    confidence: f64,
    weight: f64,
}

pub struct EnsembleAggregator {
    config: EnsembleConfig,
    reliability: HashMap<SignalSource, f64>,
}

impl EnsembleAggregator {
    pub fn new(config: EnsembleConfig) -> Self {
        Self {
            config,
            reliability: HashMap::new(),
        }
    }

    /// Access the ensemble configuration.
    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Replace the per-source reliability weights (missing sources count 1.0).
    pub fn set_reliability(&mut self, weights: HashMap<SignalSource, f64>) {
        self.reliability = weights
            .into_iter()
            .filter(|(_, w)| w.is_finite() && *w >= 0.0)
            .collect();
    }

    pub fn reliability(&self, source: SignalSource) -> f64 {
        self.reliability.get(&source).copied().unwrap_or(1.0)
    }

    /// Combine estimates into one calibrated aggregate at the given odds.
    pub fn aggregate(
        &self,
        estimates: &[SignalEstimate],
        regression: Option<&RegressionSignal>,
        odds: f64,
    ) -> Result<AggregateEstimate, CoreError> {
        if estimates.is_empty() {
            return Err(CoreError::AggregationEmptyInput);
        }
        validate_odds(odds)?;
        for est in estimates {
            est.validate()?;
        }

        let mut components: Vec<Component> = estimates
            .iter()
            .map(|e| Component {
                probability: e.probability(),
                confidence: e.confidence(),
                weight: e.confidence() * self.reliability(e.source()),
            })
            .collect();

        if let Some(reg) = regression {
            if !(reg.estimate.mean.is_finite() && reg.estimate.variance.is_finite()) {
                return Err(CoreError::InvalidInput("regression estimate is not finite".into()));
            }
            let shrink = 1.0 / (1.0 + reg.estimate.variance.max(0.0));
            components.push(Component {
                probability: self.config.mapping.to_probability(&reg.estimate, reg.line),
                confidence: shrink,
                weight: self.config.regression_weight * shrink,
            });
        }

        let total_weight: f64 = components.iter().map(|c| c.weight).sum();
        if total_weight <= 0.0 {
            // Nothing carries confidence: fall back to a plain mean.
            for c in &mut components {
                c.weight = 1.0;
            }
        }
        let total_weight: f64 = components.iter().map(|c| c.weight).sum();

        let probability = (components.iter().map(|c| c.weight * c.probability).sum::<f64>()
            / total_weight)
            .clamp(0.0, 1.0);
        let mean_confidence =
            components.iter().map(|c| c.weight * c.confidence).sum::<f64>() / total_weight;

        let discount = 1.0 / (1.0 + self.config.disagreement_penalty * coefficient_of_variation(&components));
        let mut confidence = mean_confidence * discount;

        let (min_p, max_p) = components.iter().fold((f64::MAX, f64::MIN), |(lo, hi), c| {
            (lo.min(c.probability), hi.max(c.probability))
        });
        let spread = max_p - min_p;
        if spread > self.config.disagreement_threshold {
            let min_c = components.iter().map(|c| c.confidence).fold(f64::MAX, f64::min);
            confidence = confidence.min(min_c * discount);
        }
        let confidence = confidence.clamp(0.0, 1.0);

        let expected_value = probability * (odds - 1.0) - (1.0 - probability);
        let risk_score = (RISK_CONFIDENCE_SHARE * (1.0 - confidence)
            + (1.0 - RISK_CONFIDENCE_SHARE) * (1.0 - discount))
            .clamp(0.0, 1.0);

        let reasoning = self.reasoning(estimates, regression);

        debug!(
            signals = estimates.len(),
            regression = regression.is_some(),
            probability = format!("{:.1}%", probability * 100.0),
            confidence = format!("{:.0}%", confidence * 100.0),
            spread = format!("{:.3}", spread),
            ev = format!("{:+.4}", expected_value),
            "Ensemble aggregated"
        );

        Ok(AggregateEstimate::new(
            probability,
            confidence,
            expected_value,
            risk_score,
            reasoning,
            estimates.len(),
        ))
    }

    /// Top factor of each estimate, strongest first.
    fn reasoning(&self, estimates: &[SignalEstimate], regression: Option<&RegressionSignal>) -> Vec<String> {
        let mut tops: Vec<(SignalSource, &str, f64)> = estimates
            .iter()
            .filter_map(|e| e.top_factor().map(|f| (e.source(), f.name.as_str(), f.weight)))
            .collect();
        tops.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

        let mut lines: Vec<String> = tops
            .into_iter()
            .map(|(source, name, weight)| format!("{source}: {name} ({:.0}%)", weight * 100.0))
            .collect();
        if let Some(reg) = regression {
            let line = match reg.line {
                Some(l) => format!(
                    "regression: mean {:.2} ± {:.2} vs line {l}",
                    reg.estimate.mean,
                    reg.estimate.std_dev()
                ),
                None => format!(
                    "regression: mean {:.2} ± {:.2}",
                    reg.estimate.mean,
                    reg.estimate.std_dev()
                ),
            };
            lines.push(line);
        }
        lines.truncate(self.config.max_reasoning);
        lines
    }
}

/// Population std / mean of component probabilities; 0 when the mean is 0.
fn coefficient_of_variation(components: &[Component]) -> f64 {
    let n = components.len() as f64;
    let mean = components.iter().map(|c| c.probability).sum::<f64>() / n;
    if mean <= 0.0 {
        return 0.0;
    }
    let var = components
        .iter()
        .map(|c| (c.probability - mean).powi(2))
        .sum::<f64>()
        / n;
    var.sqrt() / mean
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Factor;

    fn est(source: SignalSource, p: f64, c: f64) -> SignalEstimate {
        SignalEstimate::new(source, p, c, vec![Factor::new(format!("{source}_factor"), 1.0)]).unwrap()
    }

    fn agg() -> EnsembleAggregator {
        EnsembleAggregator::new(EnsembleConfig::default())
    }

    fn three_agreeing() -> Vec<SignalEstimate> {
        vec![
            est(SignalSource::Statistical, 0.60, 0.8),
            est(SignalSource::Learned, 0.62, 0.7),
            est(SignalSource::Hybrid, 0.58, 0.75),
        ]
    }

    #[test]
    fn test_empty_input_rejected() {
        assert_eq!(agg().aggregate(&[], None, 2.0), Err(CoreError::AggregationEmptyInput));
    }

    #[test]
    fn test_invalid_odds_rejected() {
        let e = vec![est(SignalSource::Statistical, 0.6, 0.8)];
        assert_eq!(agg().aggregate(&e, None, 1.0), Err(CoreError::InvalidOdds(1.0)));
        assert!(agg().aggregate(&e, None, f64::NAN).is_err());
    }

    #[test]
    fn test_three_agreeing_signals() {
        let a = agg().aggregate(&three_agreeing(), None, 2.10).unwrap();
        assert!((a.probability() - 0.60).abs() <= 0.02);
        assert!(a.expected_value() > 0.0);
        assert_eq!(a.signal_count(), 3);
        assert!(a.confidence() > 0.0 && a.confidence() < 0.8);
        assert!((0.0..=1.0).contains(&a.risk_score()));
    }

    #[test]
    fn test_single_signal_passes_through() {
        let e = vec![est(SignalSource::Statistical, 0.4, 0.7)];
        let a = agg().aggregate(&e, None, 1.8).unwrap();
        assert!((a.probability() - 0.4).abs() < 1e-12);
        assert!((a.confidence() - 0.7).abs() < 1e-12);
        // 0.4·0.8 − 0.6
        assert!((a.expected_value() + 0.28).abs() < 1e-12);
    }

    #[test]
    fn test_disagreement_caps_below_min_confidence() {
        let e = vec![
            est(SignalSource::Statistical, 0.80, 0.9),
            est(SignalSource::Learned, 0.30, 0.6),
        ];
        let a = agg().aggregate(&e, None, 2.0).unwrap();
        assert!(a.confidence() < 0.6);
    }

    #[test]
    fn test_disagreement_raises_risk() {
        let calm = agg()
            .aggregate(
                &[est(SignalSource::Statistical, 0.6, 0.8), est(SignalSource::Learned, 0.6, 0.8)],
                None,
                2.0,
            )
            .unwrap();
        let split = agg()
            .aggregate(
                &[est(SignalSource::Statistical, 0.8, 0.8), est(SignalSource::Learned, 0.4, 0.8)],
                None,
                2.0,
            )
            .unwrap();
        assert!(split.risk_score() > calm.risk_score());
        assert!(split.confidence() < calm.confidence());
    }

    #[test]
    fn test_out_of_range_estimate_rejected() {
        let bad: SignalEstimate = serde_json::from_str(
            r#"{"source":"external","probability":1.5,"confidence":0.5,"expected_value":2.0,"factors":[]}"#,
        )
        .unwrap();
        assert!(matches!(
            agg().aggregate(&[bad], None, 2.0),
            Err(CoreError::InvalidProbability(_))
        ));
    }

    #[test]
    fn test_zero_confidence_falls_back_to_mean() {
        let e = vec![
            est(SignalSource::Statistical, 0.5, 0.0),
            est(SignalSource::Learned, 0.7, 0.0),
        ];
        let a = agg().aggregate(&e, None, 2.0).unwrap();
        assert!((a.probability() - 0.6).abs() < 1e-12);
        assert_eq!(a.confidence(), 0.0);
    }

    #[test]
    fn test_reliability_weights_shift_probability() {
        let e = vec![
            est(SignalSource::Statistical, 0.5, 0.8),
            est(SignalSource::Learned, 0.6, 0.8),
        ];
        let mut a = agg();
        let even = a.aggregate(&e, None, 2.0).unwrap().probability();
        a.set_reliability(HashMap::from([(SignalSource::Learned, 3.0)]));
        let skewed = a.aggregate(&e, None, 2.0).unwrap().probability();
        assert!(skewed > even);
        assert_eq!(a.reliability(SignalSource::Statistical), 1.0);
    }

    #[test]
    fn test_regression_component_pulls_probability() {
        let e = vec![est(SignalSource::Statistical, 0.5, 0.5)];
        let reg = RegressionSignal {
            estimate: RegressionEstimate { mean: 30.0, variance: 0.01 },
            line: Some(24.5),
        };
        let a = agg().aggregate(&e, Some(&reg), 2.0).unwrap();
        assert!(a.probability() > 0.5);
        assert_eq!(a.signal_count(), 1);
        assert!(a.reasoning().iter().any(|r| r.starts_with("regression")));
    }

    #[test]
    fn test_uncertain_regression_has_less_pull() {
        let e = vec![est(SignalSource::Statistical, 0.5, 0.5)];
        let sure = RegressionSignal {
            estimate: RegressionEstimate { mean: 30.0, variance: 0.1 },
            line: Some(24.5),
        };
        let unsure = RegressionSignal {
            estimate: RegressionEstimate { mean: 30.0, variance: 50.0 },
            line: Some(24.5),
        };
        let p_sure = agg().aggregate(&e, Some(&sure), 2.0).unwrap().probability();
        let p_unsure = agg().aggregate(&e, Some(&unsure), 2.0).unwrap().probability();
        assert!(p_sure > p_unsure);
    }

    #[test]
    fn test_reasoning_sorted_and_truncated() {
        let e = vec![
            SignalEstimate::new(
                SignalSource::Statistical,
                0.6,
                0.8,
                vec![Factor::new("win_rate", 0.45), Factor::new("recent_form", 0.35)],
            )
            .unwrap(),
            SignalEstimate::new(SignalSource::Learned, 0.6, 0.8, vec![Factor::new("value_score", 0.7)])
                .unwrap(),
        ];
        let a = EnsembleAggregator::new(EnsembleConfig {
            max_reasoning: 1,
            ..EnsembleConfig::default()
        })
        .aggregate(&e, None, 2.0)
        .unwrap();
        assert_eq!(a.reasoning(), &["learned: value_score (70%)".to_string()]);

        let a = agg().aggregate(&e, None, 2.0).unwrap();
        assert_eq!(a.reasoning()[1], "statistical: win_rate (45%)");
    }

    #[test]
    fn test_mapping_logistic_centered_on_line() {
        let m = ProbabilityMapping::default();
        let at_line = RegressionEstimate { mean: 24.5, variance: 1.0 };
        assert!((m.to_probability(&at_line, Some(24.5)) - 0.5).abs() < 1e-12);
        let above = RegressionEstimate { mean: 27.0, variance: 1.0 };
        assert!(m.to_probability(&above, Some(24.5)) > 0.9);
    }

    #[test]
    fn test_mapping_linear() {
        let m = ProbabilityMapping::Linear { lo: 10.0, hi: 30.0 };
        let e = RegressionEstimate { mean: 15.0, variance: 0.0 };
        assert!((m.to_probability(&e, None) - 0.25).abs() < 1e-12);
        assert!(ProbabilityMapping::Linear { lo: 1.0, hi: 1.0 }.validate().is_err());
    }

    #[test]
    fn test_config_validate() {
        assert!(EnsembleConfig::default().validate().is_ok());
        let bad = EnsembleConfig {
            disagreement_penalty: 0.0,
            ..EnsembleConfig::default()
        };
        assert!(matches!(bad.validate(), Err(CoreError::Config(_))));
    }
}
