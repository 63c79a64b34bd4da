//! Strategy engine: ensemble aggregation, Kelly sizing, and risk scaling.

pub mod ensemble;
pub mod kelly;
pub mod risk;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::SignalModel;
use crate::regression::KernelRegressor;
use crate::types::{
    AggregateEstimate, BankrollSettings, CoreError, FeatureVector, PredictionInput,
    RegressionEstimate, Selection, SignalEstimate, SignalSource, StakeRecommendation,
};
use ensemble::{EnsembleAggregator, RegressionSignal};
use kelly::KellyCalculator;

// ---------------------------------------------------------------------------
// Selected signals
// ---------------------------------------------------------------------------

/// Everything the analyzer needs for one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedSignals {
    pub selection: Selection,
    pub input: PredictionInput,
    /// Signal models to run. `External` entries are ignored here; their
    /// estimates arrive precomputed in `external`.
    #[serde(default)]
    pub sources: Vec<SignalSource>,
    #[serde(default)]
    pub external: Vec<SignalEstimate>,
    /// Feature vector to query the kernel regressor with, if any.
    #[serde(default)]
    pub regression_query: Option<FeatureVector>,
}

impl SelectedSignals {
    /// Whether at least one signal would reach the aggregator.
    pub fn has_signals(&self) -> bool {
        !self.external.is_empty()
            || self.sources.iter().any(|s| *s != SignalSource::External)
    }
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Pipelines signal models (+ regressor) → ensemble aggregation → sizing.
///
/// Models and the regressor are pure, so one analysis fans them out on the
/// blocking pool and joins all of them before aggregating; any failure
/// fails the whole analysis.
pub struct Analyzer {
    models: HashMap<SignalSource, Arc<dyn SignalModel>>,
    regressor: Option<Arc<KernelRegressor>>,
    aggregator: EnsembleAggregator,
    sizer: KellyCalculator,
}

impl Analyzer {
    pub fn new(aggregator: EnsembleAggregator, sizer: KellyCalculator) -> Self {
        Self {
            models: HashMap::new(),
            regressor: None,
            aggregator,
            sizer,
        }
    }

    /// Register a model under its own source tag, replacing any previous one.
    pub fn with_model(mut self, model: Arc<dyn SignalModel>) -> Self {
        self.models.insert(model.source(), model);
        self
    }

    /// Attach a fitted kernel regressor.
    pub fn with_regressor(mut self, regressor: KernelRegressor) -> Self {
        self.regressor = Some(Arc::new(regressor));
        self
    }

    /// Feed per-source reliability weights (e.g. from the calibrator).
    pub fn set_reliability(&mut self, weights: HashMap<SignalSource, f64>) {
        self.aggregator.set_reliability(weights);
    }

    pub fn aggregator(&self) -> &EnsembleAggregator {
        &self.aggregator
    }

    pub fn sizer(&self) -> &KellyCalculator {
        &self.sizer
    }

    /// Run the selected models concurrently and aggregate their output at
    /// the selection's odds.
    pub async fn analyze(&self, signals: &SelectedSignals) -> Result<AggregateEstimate, CoreError> {
        signals.selection.validate()?;
        signals.input.validate()?;

        let mut tasks = Vec::new();
        let mut seen = HashSet::new();
        for source in &signals.sources {
            if *source == SignalSource::External {
                continue;
            }
            if !seen.insert(*source) {
                debug!(selection = %signals.selection.id, source = %source, "Duplicate source ignored");
                continue;
            }
            let model = self
                .models
                .get(source)
                .cloned()
                .ok_or_else(|| CoreError::Config(format!("no model registered for source {source}")))?;
            let input = signals.input.clone();
            tasks.push(async move {
                tokio::task::spawn_blocking(move || model.score(&input))
                    .await
                    .map_err(|e| CoreError::TaskFailed(e.to_string()))?
            });
        }

        let regression = async {
            match &signals.regression_query {
                Some(query) => self.predict_regression(query.clone()).await.map(Some),
                None => Ok(None),
            }
        };

        let (mut estimates, regression) = tokio::try_join!(try_join_all(tasks), regression)?;
        estimates.extend(signals.external.iter().cloned());

        let regression = regression.map(|estimate| RegressionSignal {
            estimate,
            line: signals.selection.line,
        });

        for est in &estimates {
            debug!(selection = %signals.selection.id, estimate = %est, "Signal collected");
        }

        let aggregate = self
            .aggregator
            .aggregate(&estimates, regression.as_ref(), signals.selection.odds)?;

        info!(
            selection = %signals.selection.id,
            signals = aggregate.signal_count(),
            probability = format!("{:.1}%", aggregate.probability() * 100.0),
            confidence = format!("{:.0}%", aggregate.confidence() * 100.0),
            ev = format!("{:+.4}", aggregate.expected_value()),
            "Analysis complete"
        );

        Ok(aggregate)
    }

    /// Size a stake for an aggregate. Never fails: invalid inputs yield a
    /// zero, high-risk recommendation.
    pub fn recommend_stake(
        &self,
        aggregate: &AggregateEstimate,
        settings: &BankrollSettings,
        odds: f64,
    ) -> StakeRecommendation {
        let rec = self.sizer.size(aggregate, settings, odds);
        info!(
            stake = %rec.absolute_stake(),
            fraction = format!("{:.2}%", rec.fraction() * 100.0),
            risk = %rec.risk_level(),
            profile = %rec.risk_profile(),
            "Stake recommended"
        );
        rec
    }

    async fn predict_regression(&self, query: FeatureVector) -> Result<RegressionEstimate, CoreError> {
        let regressor = self.regressor.clone().ok_or(CoreError::NotFitted)?;
        tokio::task::spawn_blocking(move || regressor.predict(&query))
            .await
            .map_err(|e| CoreError::TaskFailed(e.to_string()))?
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
