//! Hybrid signal model.
//!
//! Confidence-weighted blend of the statistical and learned estimates.
//! When the two agree the blend is more confident than either alone. Without
//! fantasy data the learned side cannot score, and the statistical estimate
//! is passed through.

use tracing::debug;

use super::{normalize_factors, LearnedModel, SignalModel, StatisticalModel};
use crate::types::{CoreError, Factor, PredictionInput, SignalEstimate, SignalSource};

#[derive(Debug, Clone, PartialEq)]
pub struct HybridConfig {
    /// Fraction of the remaining headroom (1 − max confidence) granted
    /// when both estimates agree exactly.
    pub agreement_boost: f64,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self { agreement_boost: 0.25 }
    }
}

pub struct HybridModel {
    statistical: StatisticalModel,
    learned: LearnedModel,
    config: HybridConfig,
}

impl HybridModel {
    pub fn new(statistical: StatisticalModel, learned: LearnedModel, config: HybridConfig) -> Self {
        Self {
            statistical,
            learned,
            config,
        }
    }

    pub fn config(&self) -> &HybridConfig {
        &self.config
    }

    /// Blend two estimates. Both must already be valid.
    pub fn combine(
        &self,
        stat: &SignalEstimate,
        learned: &SignalEstimate,
    ) -> Result<SignalEstimate, CoreError> {
        let (c1, c2) = (stat.confidence(), learned.confidence());
        let total = c1 + c2;
        if total <= 0.0 {
            return Self::relabel(stat).map(SignalEstimate::without_confidence);
        }
        let (w1, w2) = (c1 / total, c2 / total);

        let probability = (w1 * stat.probability() + w2 * learned.probability()).clamp(0.0, 1.0);

        let agreement = 1.0 - (stat.probability() - learned.probability()).abs();
        let c_max = c1.max(c2);
        let boost = self.config.agreement_boost.clamp(0.0, 1.0);
        let confidence = (c_max + (1.0 - c_max) * boost * agreement).clamp(0.0, 1.0);

        let factors = normalize_factors(
            stat.factors()
                .iter()
                .map(|f| Factor::new(f.name.clone(), f.weight * w1))
                .chain(
                    learned
                        .factors()
                        .iter()
                        .map(|f| Factor::new(f.name.clone(), f.weight * w2)),
                )
                .collect(),
        );

        SignalEstimate::new(SignalSource::Hybrid, probability, confidence, factors)
    }

    fn relabel(estimate: &SignalEstimate) -> Result<SignalEstimate, CoreError> {
        SignalEstimate::new(
            SignalSource::Hybrid,
            estimate.probability(),
            estimate.confidence(),
            estimate.factors().to_vec(),
        )
    }
}

impl SignalModel for HybridModel {
    fn score(&self, input: &PredictionInput) -> Result<SignalEstimate, CoreError> {
        let stat = self.statistical.score(input)?;
        // Only missing fantasy data falls back; any other learned failure is a real error.
        let learned = match self.learned.score(input) {
            Ok(est) => est,
            Err(e) if input.fantasy.is_none() => {
                debug!(player = %input.player_id, error = %e, "No fantasy data, using statistical estimate");
                return Self::relabel(&stat);
            }
            Err(e) => return Err(e),
        };
        let blended = self.combine(&stat, &learned)?;
        debug!(
            player = %input.player_id,
            statistical = stat.probability(),
            learned = learned.probability(),
            probability = blended.probability(),
            confidence = blended.confidence(),
            "Hybrid estimate"
        );
        Ok(blended)
    }

    fn source(&self) -> SignalSource {
        SignalSource::Hybrid
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{FantasyValueConfig, FantasyValueInference, Inference, InferenceOutput, StatisticalConfig};
    use crate::types::{FantasyData, FeatureVector, HistoricalData};
    use std::sync::Arc;

    fn model() -> HybridModel {
        HybridModel::new(
            StatisticalModel::new(StatisticalConfig::default()),
            LearnedModel::new(Arc::new(FantasyValueInference::new(FantasyValueConfig::default()))),
            HybridConfig::default(),
        )
    }

    fn est(source: SignalSource, p: f64, c: f64, factor: &str) -> SignalEstimate {
        SignalEstimate::new(source, p, c, vec![Factor::new(factor, 1.0)]).unwrap()
    }

    fn make_input(fantasy: Option<FantasyData>) -> PredictionInput {
        PredictionInput {
            player_id: "h1".into(),
            player_name: "Hybrid Test".into(),
            historical: HistoricalData {
                wins: 14,
                losses: 6,
                average_score: 24.0,
                recent_performance: vec![0.6, 0.7, 0.65, 0.7, 0.75],
            },
            opponent: None,
            fantasy,
            features: FeatureVector::default(),
        }
    }

    #[test]
    fn test_confidence_weighted_probability() {
        let m = model();
        let a = est(SignalSource::Statistical, 0.6, 0.6, "win_rate");
        let b = est(SignalSource::Learned, 0.7, 0.2, "value_score");
        let h = m.combine(&a, &b).unwrap();
        // (0.6·0.6 + 0.7·0.2) / 0.8 = 0.625
        assert!((h.probability() - 0.625).abs() < 1e-12);
        assert_eq!(h.source(), SignalSource::Hybrid);
    }

    #[test]
    fn test_agreement_boosts_confidence() {
        let m = model();
        let a = est(SignalSource::Statistical, 0.6, 0.6, "win_rate");
        let b = est(SignalSource::Learned, 0.6, 0.5, "value_score");
        let h = m.combine(&a, &b).unwrap();
        assert!(h.confidence() > 0.6);
        // 0.6 + 0.4 · 0.25 · 1.0
        assert!((h.confidence() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_disagreement_gives_smaller_boost() {
        let m = model();
        let a = est(SignalSource::Statistical, 0.6, 0.6, "win_rate");
        let agree = m.combine(&a, &est(SignalSource::Learned, 0.6, 0.5, "v")).unwrap();
        let disagree = m.combine(&a, &est(SignalSource::Learned, 0.2, 0.5, "v")).unwrap();
        assert!(disagree.confidence() < agree.confidence());
        assert!(disagree.confidence() >= 0.6);
    }

    #[test]
    fn test_factor_union_normalized() {
        let m = model();
        let a = est(SignalSource::Statistical, 0.6, 0.75, "win_rate");
        let b = est(SignalSource::Learned, 0.6, 0.25, "value_score");
        let h = m.combine(&a, &b).unwrap();
        assert_eq!(h.factors().len(), 2);
        assert_eq!(h.factors()[0].name, "win_rate");
        assert!((h.factors()[0].weight - 0.75).abs() < 1e-12);
        let total: f64 = h.factors().iter().map(|f| f.weight).sum();
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_both_zero_confidence_yields_statistical_with_zero() {
        let m = model();
        let a = est(SignalSource::Statistical, 0.58, 0.0, "win_rate");
        let b = est(SignalSource::Learned, 0.9, 0.0, "value_score");
        let h = m.combine(&a, &b).unwrap();
        assert!((h.probability() - 0.58).abs() < 1e-12);
        assert_eq!(h.confidence(), 0.0);
    }

    #[test]
    fn test_falls_back_without_fantasy_data() {
        let m = model();
        let input = make_input(None);
        let stat = StatisticalModel::new(StatisticalConfig::default())
            .score(&input)
            .unwrap();
        let h = m.score(&input).unwrap();
        assert_eq!(h.source(), SignalSource::Hybrid);
        assert_eq!(h.probability(), stat.probability());
        assert_eq!(h.confidence(), stat.confidence());
    }

    #[test]
    fn test_scores_with_fantasy_data() {
        let m = model();
        let input = make_input(Some(FantasyData {
            projected_points: 36.0,
            salary: 6000.0,
            value: 6.0,
        }));
        let h = m.score(&input).unwrap();
        assert!(h.confidence() > 0.0);
        assert!(h.factors().iter().any(|f| f.name == "value_score"));
    }

    struct BrokenInference {
        output: InferenceOutput,
    }

    impl Inference for BrokenInference {
        fn infer(&self, _input: &PredictionInput) -> Result<InferenceOutput, CoreError> {
            Ok(self.output.clone())
        }

        fn name(&self) -> &str {
            "broken"
        }
    }

    fn model_with(output: InferenceOutput) -> HybridModel {
        HybridModel::new(
            StatisticalModel::new(StatisticalConfig::default()),
            LearnedModel::new(Arc::new(BrokenInference { output })),
            HybridConfig::default(),
        )
    }

    fn with_fantasy() -> PredictionInput {
        make_input(Some(FantasyData {
            projected_points: 30.0,
            salary: 6000.0,
            value: 5.0,
        }))
    }

    #[test]
    fn test_learned_contract_violation_propagates() {
        let m = model_with(InferenceOutput {
            probability: 7.0,
            confidence: 0.6,
            factors: vec![Factor::new("value_score", 1.0)],
        });
        let err = m.score(&with_fantasy()).unwrap_err();
        assert!(matches!(err, CoreError::InvalidProbability(_)), "{err:?}");
    }

    #[test]
    fn test_learned_without_factors_propagates() {
        let m = model_with(InferenceOutput {
            probability: 0.6,
            confidence: 0.6,
            factors: vec![],
        });
        assert!(matches!(m.score(&with_fantasy()), Err(CoreError::InvalidInput(_))));
    }
}
