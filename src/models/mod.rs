//! Signal models: statistical, learned, and hybrid estimators.
//!
//! Defines the `SignalModel` trait shared by all three variants. Models are
//! pure functions of their input, so the analyzer may evaluate several of
//! them concurrently for one decision.

pub mod hybrid;
pub mod learned;
pub mod statistical;

use crate::types::{CoreError, Factor, PredictionInput, SignalEstimate, SignalSource};

pub use hybrid::{HybridConfig, HybridModel};
pub use learned::{FantasyValueConfig, FantasyValueInference, Inference, InferenceOutput, LearnedModel};
pub use statistical::{StatisticalConfig, StatisticalModel};

/// Abstraction over probability estimators.
///
/// Implementors turn one `PredictionInput` into exactly one
/// `SignalEstimate` without side effects.
pub trait SignalModel: Send + Sync {
    /// Score a single prediction input.
    fn score(&self, input: &PredictionInput) -> Result<SignalEstimate, CoreError>;

    /// Which source tag this model's estimates carry.
    fn source(&self) -> SignalSource;
}

/// Merge factors sharing a name (first occurrence keeps its position) and
/// rescale weights to sum to 1.
///
/// Negative weights are floored at zero. If nothing positive remains the
/// weights are spread evenly.
pub fn normalize_factors(factors: Vec<Factor>) -> Vec<Factor> {
    let mut merged: Vec<Factor> = Vec::with_capacity(factors.len());
    for f in factors {
        let weight = if f.weight.is_finite() { f.weight.max(0.0) } else { 0.0 };
        match merged.iter_mut().find(|m| m.name == f.name) {
            Some(existing) => existing.weight += weight,
            None => merged.push(Factor::new(f.name, weight)),
        }
    }

    let total: f64 = merged.iter().map(|f| f.weight).sum();
    if merged.is_empty() {
        return merged;
    }
    if total > 0.0 {
        for f in &mut merged {
            f.weight /= total;
        }
    } else {
        let even = 1.0 / merged.len() as f64;
        for f in &mut merged {
            f.weight = even;
        }
    }
    merged
}
