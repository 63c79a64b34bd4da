//! Statistical signal model.
//!
//! Blends the historical win ratio, a recency-weighted moving average of
//! recent performance, and opponent weakness into a win probability.
//! Confidence grows with sample size and saturates below 1.0.

use tracing::debug;

use super::{normalize_factors, SignalModel};
use crate::types::{CoreError, Factor, PredictionInput, SignalEstimate, SignalSource};

/// Statistical model configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct StatisticalConfig {
    pub win_rate_weight: f64,
    pub recent_form_weight: f64,
    pub opponent_weight: f64,
    /// How many of the most recent games feed the form average.
    pub recent_window: usize,
    /// Confidence ceiling approached as the sample grows.
    pub max_confidence: f64,
    /// Games needed to reach ~63% of `max_confidence`.
    pub sample_scale: f64,
}

impl Default for StatisticalConfig {
    fn default() -> Self {
        Self {
            win_rate_weight: 0.5,
            recent_form_weight: 0.3,
            opponent_weight: 0.2,
            recent_window: 5,
            max_confidence: 0.95,
            sample_scale: 20.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StatisticalModel {
    config: StatisticalConfig,
}

impl StatisticalModel {
    pub fn new(config: StatisticalConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &StatisticalConfig {
        &self.config
    }

    /// Linearly recency-weighted mean of the last `recent_window` scores.
    ///
    /// The newest score carries weight `n`, the oldest weight 1.
    pub fn recent_form(&self, recent: &[f64]) -> Option<f64> {
        let window = self.config.recent_window.max(1);
        let tail = &recent[recent.len().saturating_sub(window)..];
        if tail.is_empty() {
            return None;
        }
        let (weighted, total) = tail
            .iter()
            .enumerate()
            .fold((0.0, 0.0), |(acc, w_sum), (i, v)| {
                let w = (i + 1) as f64;
                (acc + v * w, w_sum + w)
            });
        Some(weighted / total)
    }

    /// `max_confidence · (1 − e^(−n / sample_scale))`
    pub fn sample_confidence(&self, games: u32) -> f64 {
        let scale = self.config.sample_scale.max(f64::EPSILON);
        self.config.max_confidence.clamp(0.0, 1.0) * (1.0 - (-(games as f64) / scale).exp())
    }
}

impl SignalModel for StatisticalModel {
    fn score(&self, input: &PredictionInput) -> Result<SignalEstimate, CoreError> {
        input.validate()?;
        let hist = &input.historical;

        let win_rate = hist.win_rate().unwrap_or(0.5);
        let recent_form = self.recent_form(&hist.recent_performance).unwrap_or(win_rate);
        let opponent_strength = input
            .opponent
            .as_ref()
            .and_then(|o| o.win_rate())
            .unwrap_or(0.5);

        let c = &self.config;
        let weight_sum = c.win_rate_weight + c.recent_form_weight + c.opponent_weight;
        if !(weight_sum.is_finite() && weight_sum > 0.0) {
            return Err(CoreError::Config("statistical weights must sum to a positive value".into()));
        }

        let contributions = [
            ("win_rate", c.win_rate_weight * win_rate),
            ("recent_form", c.recent_form_weight * recent_form),
            ("opponent_weakness", c.opponent_weight * (1.0 - opponent_strength)),
        ];
        let probability =
            (contributions.iter().map(|(_, v)| v).sum::<f64>() / weight_sum).clamp(0.0, 1.0);
        let confidence = self.sample_confidence(hist.games());

        let factors = normalize_factors(
            contributions
                .iter()
                .map(|(name, v)| Factor::new(*name, *v))
                .collect(),
        );

        debug!(
            player = %input.player_id,
            win_rate,
            recent_form,
            opponent_strength,
            probability,
            confidence,
            "Statistical estimate"
        );

        SignalEstimate::new(SignalSource::Statistical, probability, confidence, factors)
    }

    fn source(&self) -> SignalSource {
        SignalSource::Statistical
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FeatureVector, HistoricalData, OpponentData};

    fn make_input(wins: u32, losses: u32, recent: Vec<f64>) -> PredictionInput {
        PredictionInput {
            player_id: "p1".into(),
            player_name: "Test".into(),
            historical: HistoricalData {
                wins,
                losses,
                average_score: 20.0,
                recent_performance: recent,
            },
            opponent: None,
            fantasy: None,
            features: FeatureVector::default(),
        }
    }

    fn model() -> StatisticalModel {
        StatisticalModel::new(StatisticalConfig::default())
    }

    #[test]
    fn test_recent_form_weights_newest_heaviest() {
        let m = model();
        // weights 1..5 over [0,0,0,0,1] → 5/15
        let form = m.recent_form(&[0.0, 0.0, 0.0, 0.0, 1.0]).unwrap();
        assert!((form - 5.0 / 15.0).abs() < 1e-12);
        let form = m.recent_form(&[1.0, 0.0, 0.0, 0.0, 0.0]).unwrap();
        assert!((form - 1.0 / 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_recent_form_uses_only_window() {
        let m = model();
        let form = m.recent_form(&[0.0, 0.0, 1.0, 1.0, 1.0, 1.0, 1.0]).unwrap();
        assert!((form - 1.0).abs() < 1e-12);
        assert!(m.recent_form(&[]).is_none());
    }

    #[test]
    fn test_score_blends_components() {
        let m = model();
        let input = make_input(6, 4, vec![0.5, 0.5, 0.5, 0.5, 0.5]);
        let est = m.score(&input).unwrap();
        // 0.5·0.6 + 0.3·0.5 + 0.2·0.5 = 0.55
        assert!((est.probability() - 0.55).abs() < 1e-12);
        assert_eq!(est.source(), SignalSource::Statistical);
        let total: f64 = est.factors().iter().map(|f| f.weight).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert_eq!(est.factors()[0].name, "win_rate");
    }

    #[test]
    fn test_strong_opponent_lowers_probability() {
        let m = model();
        let mut weak = make_input(10, 10, vec![0.5; 5]);
        weak.opponent = Some(OpponentData { wins: 2, losses: 18, average_score: 15.0 });
        let mut strong = weak.clone();
        strong.opponent = Some(OpponentData { wins: 18, losses: 2, average_score: 25.0 });
        assert!(m.score(&weak).unwrap().probability() > m.score(&strong).unwrap().probability());
    }

    #[test]
    fn test_confidence_grows_with_sample_and_saturates() {
        let m = model();
        let small = m.score(&make_input(2, 1, vec![])).unwrap().confidence();
        let large = m.score(&make_input(60, 40, vec![])).unwrap().confidence();
        let huge = m.score(&make_input(6000, 4000, vec![])).unwrap().confidence();
        assert!(small < large);
        assert!(large <= huge);
        assert!(huge < 1.0);
        assert!(huge <= 0.95);
    }

    #[test]
    fn test_no_history_has_zero_confidence() {
        let m = model();
        let est = m.score(&make_input(0, 0, vec![])).unwrap();
        assert!((est.probability() - 0.5).abs() < 1e-12);
        assert_eq!(est.confidence(), 0.0);
    }

    #[test]
    fn test_invalid_input_rejected() {
        let m = model();
        let input = make_input(1, 1, vec![2.0]);
        assert!(matches!(m.score(&input), Err(CoreError::InvalidInput(_))));
    }
}
