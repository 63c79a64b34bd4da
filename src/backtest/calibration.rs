//! Calibration tracking for signal sources.
//!
//! Measures how well each signal source's probabilities match resolved
//! outcomes. Computes calibration curves and Brier scores per source, and
//! turns them into reliability weights for the ensemble aggregator.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::SignalSource;

/// Brier score of an uninformed 50% forecast.
const COIN_FLIP_BRIER: f64 = 0.25;

/// Buckets with fewer points are ignored by the diagnosis.
const MIN_BUCKET_COUNT: usize = 3;
const MIN_DIAGNOSIS_POINTS: usize = 20;
/// Excess extremity tolerated before calling a bias.
const DIAGNOSIS_TOLERANCE: f64 = 0.05;

// ---------------------------------------------------------------------------
// Calibration data
// ---------------------------------------------------------------------------

/// One resolved prediction from one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationPoint {
    pub selection_id: String,
    pub source: SignalSource,
    pub predicted_probability: f64,
    pub won: bool,
}

/// Snapshot of how well predictions matched outcomes.
#[derive(Debug, Clone)]
pub struct CalibrationReport {
    pub total_predictions: usize,
    pub overall_brier: f64,
    /// Brier score per signal source.
    pub source_brier: HashMap<SignalSource, f64>,
    /// Predicted vs observed win rate per equal-width probability bin.
    pub calibration_curve: Vec<CalibrationBucket>,
    /// Whether the sources are over-confident, under-confident, or well-calibrated.
    pub diagnosis: CalibrationDiagnosis,
}

/// Predictions whose probability fell in `[bin_start, bin_end)`.
#[derive(Debug, Clone)]
pub struct CalibrationBucket {
    pub bin_start: f64,
    pub bin_end: f64,
    pub mean_predicted: f64,
    pub actual_rate: f64,
    pub count: usize,
    /// |mean_predicted - actual_rate|
    pub deviation: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CalibrationDiagnosis {
    WellCalibrated,
    /// Predictions further from 50% than outcomes justify.
    OverConfident,
    /// Predictions closer to 50% than outcomes justify.
    UnderConfident,
    InsufficientData,
}

// ---------------------------------------------------------------------------
// Calibrator
// ---------------------------------------------------------------------------

pub struct Calibrator {
    points: Vec<CalibrationPoint>,
    num_bins: usize,
    /// Sources with fewer resolved points keep the neutral weight 1.0.
    min_samples: usize,
}

impl Default for Calibrator {
    fn default() -> Self {
        Self::new()
    }
}

impl Calibrator {
    pub fn new() -> Self {
        Self {
            points: Vec::new(),
            num_bins: 10,
            min_samples: 10,
        }
    }

    pub fn with_min_samples(mut self, min_samples: usize) -> Self {
        self.min_samples = min_samples;
        self
    }

    /// Add a resolved prediction. Probabilities outside [0, 1] are dropped.
    pub fn add_point(&mut self, point: CalibrationPoint) {
        if point.predicted_probability.is_finite() && (0.0..=1.0).contains(&point.predicted_probability) {
            self.points.push(point);
        }
    }

    pub fn add_points(&mut self, points: Vec<CalibrationPoint>) {
        for p in points {
            self.add_point(p);
        }
    }

    pub fn count(&self) -> usize {
        self.points.len()
    }

    /// Brier scores, curve and diagnosis over everything recorded.
    pub fn report(&self) -> CalibrationReport {
        if self.points.is_empty() {
            return CalibrationReport {
                total_predictions: 0,
                overall_brier: 0.0,
                source_brier: HashMap::new(),
                calibration_curve: Vec::new(),
                diagnosis: CalibrationDiagnosis::InsufficientData,
            };
        }

        let all: Vec<&CalibrationPoint> = self.points.iter().collect();
        let calibration_curve = self.compute_calibration_curve();
        let diagnosis = self.diagnose(&calibration_curve);

        CalibrationReport {
            total_predictions: self.points.len(),
            overall_brier: brier(&all),
            source_brier: self.by_source().into_iter().map(|(s, pts)| (s, brier(&pts))).collect(),
            calibration_curve,
            diagnosis,
        }
    }

    /// Per-source weights for the ensemble aggregator.
    ///
    /// `1 + skill` where skill is the Brier skill against a coin flip,
    /// clamped to [0.1, 2.0]: a source no better than 50/50 gets 1.0.
    pub fn reliability_weights(&self) -> HashMap<SignalSource, f64> {
        self.by_source()
            .into_iter()
            .filter(|(_, pts)| pts.len() >= self.min_samples)
            .map(|(source, pts)| {
                let skill = 1.0 - brier(&pts) / COIN_FLIP_BRIER;
                (source, (1.0 + skill).clamp(0.1, 2.0))
            })
            .collect()
    }

    /// One line per fact, for logging.
    pub fn summary(&self) -> Vec<String> {
        let report = self.report();
        let mut parts = vec![format!(
            "Calibration over {} resolved predictions, Brier {:.3}",
            report.total_predictions, report.overall_brier
        )];

        let mut sources: Vec<_> = report.source_brier.iter().collect();
        sources.sort_by_key(|(s, _)| **s);
        for (source, score) in sources {
            parts.push(format!("  {source} Brier: {score:.3}"));
        }

        parts.push(match report.diagnosis {
            CalibrationDiagnosis::OverConfident => "Diagnosis: over-confident, estimates too extreme".into(),
            CalibrationDiagnosis::UnderConfident => "Diagnosis: under-confident, estimates too central".into(),
            CalibrationDiagnosis::WellCalibrated => "Diagnosis: well calibrated".into(),
            CalibrationDiagnosis::InsufficientData => "Diagnosis: not enough data".into(),
        });
        parts
    }

    fn by_source(&self) -> HashMap<SignalSource, Vec<&CalibrationPoint>> {
        let mut grouped: HashMap<SignalSource, Vec<&CalibrationPoint>> = HashMap::new();
        for p in &self.points {
            grouped.entry(p.source).or_default().push(p);
        }
        grouped
    }

    /// Single pass over the points into `num_bins` equal-width bins.
    /// A prediction of exactly 1.0 lands in the last bin.
    fn compute_calibration_curve(&self) -> Vec<CalibrationBucket> {
        let bins = self.num_bins.max(1);
        let width = 1.0 / bins as f64;

        // (sum of predictions, wins, count)
        let mut acc = vec![(0.0_f64, 0_usize, 0_usize); bins];
        for p in &self.points {
            let idx = ((p.predicted_probability / width) as usize).min(bins - 1);
            acc[idx].0 += p.predicted_probability;
            acc[idx].1 += usize::from(p.won);
            acc[idx].2 += 1;
        }

        acc.into_iter()
            .enumerate()
            .map(|(i, (sum, wins, count))| {
                let bin_start = i as f64 * width;
                let bin_end = bin_start + width;
                if count == 0 {
                    return CalibrationBucket {
                        bin_start,
                        bin_end,
                        mean_predicted: (bin_start + bin_end) / 2.0,
                        actual_rate: 0.0,
                        count,
                        deviation: 0.0,
                    };
                }
                let mean_predicted = sum / count as f64;
                let actual_rate = wins as f64 / count as f64;
                CalibrationBucket {
                    bin_start,
                    bin_end,
                    mean_predicted,
                    actual_rate,
                    count,
                    deviation: (mean_predicted - actual_rate).abs(),
                }
            })
            .collect()
    }

    /// Count-weighted excess extremity over populated bins: how much
    /// further from 50% the predictions sit than the observed rates.
    fn diagnose(&self, curve: &[CalibrationBucket]) -> CalibrationDiagnosis {
        let populated: Vec<&CalibrationBucket> =
            curve.iter().filter(|b| b.count >= MIN_BUCKET_COUNT).collect();
        let covered: usize = populated.iter().map(|b| b.count).sum();
        if populated.len() < 2 || covered < MIN_DIAGNOSIS_POINTS {
            return CalibrationDiagnosis::InsufficientData;
        }

        let excess = populated
            .iter()
            .map(|b| b.count as f64 * ((b.mean_predicted - 0.5).abs() - (b.actual_rate - 0.5).abs()))
            .sum::<f64>()
            / covered as f64;

        if excess > DIAGNOSIS_TOLERANCE {
            CalibrationDiagnosis::OverConfident
        } else if excess < -DIAGNOSIS_TOLERANCE {
            CalibrationDiagnosis::UnderConfident
        } else {
            CalibrationDiagnosis::WellCalibrated
        }
    }
}

/// Brier = (1/N) · Σ(predicted − outcome)². 0.0 is perfect, 0.25 is a coin flip.
fn brier(points: &[&CalibrationPoint]) -> f64 {
    if points.is_empty() {
        return 0.0;
    }
    let sum: f64 = points
        .iter()
        .map(|p| {
            let outcome = if p.won { 1.0 } else { 0.0 };
            (p.predicted_probability - outcome).powi(2)
        })
        .sum();
    sum / points.len() as f64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
