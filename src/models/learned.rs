//! Learned signal model.
//!
//! The estimator itself is a black box behind the `Inference` trait;
//! `LearnedModel` only enforces its output contract. A fantasy-value
//! inference is bundled for deployments without a trained model.

use std::sync::Arc;

use tracing::debug;

use super::{normalize_factors, SignalModel};
use crate::types::{CoreError, Factor, PredictionInput, SignalEstimate, SignalSource};

// ---------------------------------------------------------------------------
// Inference collaborator
// ---------------------------------------------------------------------------

/// Raw output of an inference backend.
#[derive(Debug, Clone, PartialEq)]
pub struct InferenceOutput {
    pub probability: f64,
    pub confidence: f64,
    pub factors: Vec<Factor>,
}

/// A trained estimator.
pub trait Inference: Send + Sync {
    fn infer(&self, input: &PredictionInput) -> Result<InferenceOutput, CoreError>;

    /// Model identifier for logging.
    fn name(&self) -> &str;
}

/// Contract-checking wrapper around an `Inference` backend.
#[derive(Clone)]
pub struct LearnedModel {
    inference: Arc<dyn Inference>,
}

impl LearnedModel {
    pub fn new(inference: Arc<dyn Inference>) -> Self {
        Self { inference }
    }

    pub fn inference_name(&self) -> &str {
        self.inference.name()
    }
}

impl SignalModel for LearnedModel {
    fn score(&self, input: &PredictionInput) -> Result<SignalEstimate, CoreError> {
        input.validate()?;
        let out = self.inference.infer(input)?;
        if out.factors.is_empty() {
            return Err(CoreError::InvalidInput(format!(
                "inference '{}' returned no contributing factors",
                self.inference.name()
            )));
        }
        let estimate = SignalEstimate::new(
            SignalSource::Learned,
            out.probability,
            out.confidence,
            normalize_factors(out.factors),
        )?;
        debug!(
            player = %input.player_id,
            model = self.inference.name(),
            probability = estimate.probability(),
            confidence = estimate.confidence(),
            "Learned estimate"
        );
        Ok(estimate)
    }

    fn source(&self) -> SignalSource {
        SignalSource::Learned
    }
}

// ---------------------------------------------------------------------------
// Fantasy value inference
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct FantasyValueConfig {
    /// Projected points per $1k of salary considered par.
    pub target_value: f64,
    pub value_weight: f64,
    pub form_weight: f64,
    /// Recent games used for form and consistency.
    pub window: usize,
    pub max_confidence: f64,
}

impl Default for FantasyValueConfig {
    fn default() -> Self {
        Self {
            target_value: 5.0,
            value_weight: 0.4,
            form_weight: 0.6,
            window: 5,
            max_confidence: 0.9,
        }
    }
}

/// Scores projected value per salary against recent form.
///
/// Requires fantasy data; confidence tracks how consistent recent
/// performances were and how many of them are available.
pub struct FantasyValueInference {
    config: FantasyValueConfig,
}

impl FantasyValueInference {
    pub fn new(config: FantasyValueConfig) -> Self {
        Self { config }
    }
}

impl Inference for FantasyValueInference {
    fn infer(&self, input: &PredictionInput) -> Result<InferenceOutput, CoreError> {
        let fantasy = input.fantasy.as_ref().ok_or_else(|| {
            CoreError::InvalidInput(format!("{}: fantasy data required", input.player_id))
        })?;
        if fantasy.salary <= 0.0 {
            return Err(CoreError::InvalidInput(format!(
                "{}: salary must be positive, got {}",
                input.player_id, fantasy.salary
            )));
        }
        let c = &self.config;

        let points_per_k = fantasy.projected_points / (fantasy.salary / 1000.0);
        let value_score = (points_per_k / (2.0 * c.target_value)).clamp(0.0, 1.0);

        let recent = &input.historical.recent_performance;
        let window = c.window.max(1);
        let tail = &recent[recent.len().saturating_sub(window)..];
        let (form, consistency) = if tail.is_empty() {
            (value_score, 0.0)
        } else {
            let mean = tail.iter().sum::<f64>() / tail.len() as f64;
            let mad = tail.iter().map(|v| (v - mean).abs()).sum::<f64>() / tail.len() as f64;
            // Scores live in [0, 1], so the mean absolute deviation is at most 0.5.
            (mean, (1.0 - 2.0 * mad).clamp(0.0, 1.0))
        };
        let coverage = (tail.len() as f64 / window as f64).min(1.0);

        let weight_sum = c.value_weight + c.form_weight;
        if !(weight_sum.is_finite() && weight_sum > 0.0) {
            return Err(CoreError::Config("fantasy weights must sum to a positive value".into()));
        }
        let probability =
            ((c.value_weight * value_score + c.form_weight * form) / weight_sum).clamp(0.0, 1.0);
        let confidence = (c.max_confidence * consistency * coverage).clamp(0.0, 1.0);

        Ok(InferenceOutput {
            probability,
            confidence,
            factors: vec![
                Factor::new("value_score", c.value_weight * value_score),
                Factor::new("recent_form", c.form_weight * form),
            ],
        })
    }

    fn name(&self) -> &str {
        "fantasy-value"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FantasyData, FeatureVector, HistoricalData};

    fn make_input(recent: Vec<f64>, fantasy: Option<FantasyData>) -> PredictionInput {
        PredictionInput {
            player_id: "p9".into(),
            player_name: "Test".into(),
            historical: HistoricalData {
                wins: 5,
                losses: 5,
                average_score: 18.0,
                recent_performance: recent,
            },
            opponent: None,
            fantasy,
            features: FeatureVector::default(),
        }
    }

    fn fantasy(points: f64, salary: f64) -> Option<FantasyData> {
        Some(FantasyData {
            projected_points: points,
            salary,
            value: points / salary * 1000.0,
        })
    }

    fn model() -> LearnedModel {
        LearnedModel::new(Arc::new(FantasyValueInference::new(FantasyValueConfig::default())))
    }

    struct Fixed(InferenceOutput);

    impl Inference for Fixed {
        fn infer(&self, _input: &PredictionInput) -> Result<InferenceOutput, CoreError> {
            Ok(self.0.clone())
        }

        fn name(&self) -> &str {
            "fixed"
        }
    }

    #[test]
    fn test_requires_fantasy_data() {
        let err = model().score(&make_input(vec![0.5; 5], None)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn test_rejects_non_positive_salary() {
        let err = model().score(&make_input(vec![0.5; 5], fantasy(30.0, 0.0))).unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[test]
    fn test_par_value_consistent_form() {
        // 30 points on $6k = 5x value → value score 0.5; flat form 0.5.
        let est = model().score(&make_input(vec![0.5; 5], fantasy(30.0, 6000.0))).unwrap();
        assert!((est.probability() - 0.5).abs() < 1e-12);
        assert!((est.confidence() - 0.9).abs() < 1e-12);
        assert_eq!(est.source(), SignalSource::Learned);
        assert!(!est.factors().is_empty());
    }

    #[test]
    fn test_erratic_form_lowers_confidence() {
        let steady = model().score(&make_input(vec![0.6; 5], fantasy(30.0, 6000.0))).unwrap();
        let erratic = model()
            .score(&make_input(vec![0.0, 1.0, 0.0, 1.0, 0.0], fantasy(30.0, 6000.0)))
            .unwrap();
        assert!(erratic.confidence() < steady.confidence());
    }

    #[test]
    fn test_no_recent_games_zero_confidence() {
        let est = model().score(&make_input(vec![], fantasy(40.0, 5000.0))).unwrap();
        assert_eq!(est.confidence(), 0.0);
    }

    #[test]
    fn test_contract_rejects_out_of_range_output() {
        let m = LearnedModel::new(Arc::new(Fixed(InferenceOutput {
            probability: 1.3,
            confidence: 0.5,
            factors: vec![Factor::new("x", 1.0)],
        })));
        let err = m.score(&make_input(vec![], None)).unwrap_err();
        assert!(matches!(err, CoreError::InvalidProbability(_)));
    }

    #[test]
    fn test_contract_rejects_empty_factors() {
        let m = LearnedModel::new(Arc::new(Fixed(InferenceOutput {
            probability: 0.6,
            confidence: 0.5,
            factors: vec![],
        })));
        assert!(matches!(
            m.score(&make_input(vec![], None)),
            Err(CoreError::InvalidInput(_))
        ));
        assert_eq!(m.inference_name(), "fixed");
    }
}
