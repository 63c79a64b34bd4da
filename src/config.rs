//! Configuration loading from TOML with environment variable resolution.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Every section is optional and falls back to the component defaults.
//! Secrets (the submission API key) are referenced by env-var name and
//! resolved at runtime via `std::env::var`.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use crate::engine::executor::{DryRunSubmitter, HttpSubmitter, Submitter};
use crate::engine::lifecycle::LifecycleConfig;
use crate::models::{
    FantasyValueConfig, FantasyValueInference, HybridConfig, HybridModel, LearnedModel,
    StatisticalConfig, StatisticalModel,
};
use crate::regression::Kernel;
use crate::strategy::ensemble::{EnsembleAggregator, EnsembleConfig, ProbabilityMapping};
use crate::strategy::kelly::{KellyCalculator, KellyConfig};
use crate::strategy::risk::RiskConfig;
use crate::strategy::Analyzer;
use crate::types::{BankrollSettings, RiskProfile};

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    pub engine: EngineConfig,
    pub kernel: KernelSection,
    pub models: ModelsConfig,
    pub ensemble: EnsembleSection,
    pub staking: StakingConfig,
    pub lifecycle: LifecycleSection,
    pub submission: SubmissionConfig,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EngineConfig {
    pub name: String,
    /// JSON file of resolved predictions used to derive reliability weights.
    pub calibration_history: Option<String>,
    /// Resolved predictions a source needs before its weight moves off 1.0.
    pub calibration_min_samples: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            name: "PICKWISE-001".into(),
            calibration_history: None,
            calibration_min_samples: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct KernelSection {
    pub noise: f64,
    /// Tried in order; the best marginal likelihood wins.
    pub candidates: Vec<Kernel>,
}

impl Default for KernelSection {
    fn default() -> Self {
        Self {
            noise: 1e-6,
            candidates: vec![Kernel::default()],
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ModelsConfig {
    pub win_rate_weight: f64,
    pub recent_form_weight: f64,
    pub opponent_weight: f64,
    pub recent_window: usize,
    pub statistical_max_confidence: f64,
    pub sample_scale: f64,
    pub target_value: f64,
    pub value_weight: f64,
    pub form_weight: f64,
    pub learned_max_confidence: f64,
    pub agreement_boost: f64,
}

impl Default for ModelsConfig {
    fn default() -> Self {
        let stat = StatisticalConfig::default();
        let learned = FantasyValueConfig::default();
        Self {
            win_rate_weight: stat.win_rate_weight,
            recent_form_weight: stat.recent_form_weight,
            opponent_weight: stat.opponent_weight,
            recent_window: stat.recent_window,
            statistical_max_confidence: stat.max_confidence,
            sample_scale: stat.sample_scale,
            target_value: learned.target_value,
            value_weight: learned.value_weight,
            form_weight: learned.form_weight,
            learned_max_confidence: learned.max_confidence,
            agreement_boost: HybridConfig::default().agreement_boost,
        }
    }
}

impl ModelsConfig {
    pub fn validate(&self) -> Result<()> {
        let weights = [
            ("win_rate_weight", self.win_rate_weight),
            ("recent_form_weight", self.recent_form_weight),
            ("opponent_weight", self.opponent_weight),
            ("value_weight", self.value_weight),
            ("form_weight", self.form_weight),
        ];
        for (name, w) in weights {
            if !(w.is_finite() && w >= 0.0) {
                bail!("models.{name} must be non-negative, got {w}");
            }
        }
        if self.win_rate_weight + self.recent_form_weight + self.opponent_weight <= 0.0 {
            bail!("models: statistical component weights must not all be zero");
        }
        if self.value_weight + self.form_weight <= 0.0 {
            bail!("models: value_weight and form_weight must not both be zero");
        }
        for (name, c) in [
            ("statistical_max_confidence", self.statistical_max_confidence),
            ("learned_max_confidence", self.learned_max_confidence),
            ("agreement_boost", self.agreement_boost),
        ] {
            if !(0.0..=1.0).contains(&c) {
                bail!("models.{name} must be in [0, 1], got {c}");
            }
        }
        if !(self.sample_scale.is_finite() && self.sample_scale > 0.0) {
            bail!("models.sample_scale must be positive, got {}", self.sample_scale);
        }
        if !(self.target_value.is_finite() && self.target_value > 0.0) {
            bail!("models.target_value must be positive, got {}", self.target_value);
        }
        if self.recent_window == 0 {
            bail!("models.recent_window must be at least 1");
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EnsembleSection {
    pub disagreement_penalty: f64,
    pub disagreement_threshold: f64,
    pub regression_weight: f64,
    pub max_reasoning: usize,
    pub mapping: ProbabilityMapping,
}

impl Default for EnsembleSection {
    fn default() -> Self {
        let d = EnsembleConfig::default();
        Self {
            disagreement_penalty: d.disagreement_penalty,
            disagreement_threshold: d.disagreement_threshold,
            regression_weight: d.regression_weight,
            max_reasoning: d.max_reasoning,
            mapping: d.mapping,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StakingConfig {
    pub bankroll: f64,
    pub max_stake_pct: f64,
    pub risk_profile: RiskProfile,
    pub min_stake: f64,
    pub min_confidence: f64,
    pub conservative_multiplier: f64,
    pub moderate_multiplier: f64,
    pub aggressive_multiplier: f64,
    pub high_risk_score: f64,
    pub medium_risk_score: f64,
    pub high_kelly: f64,
    pub medium_kelly: f64,
}

impl Default for StakingConfig {
    fn default() -> Self {
        let kelly = KellyConfig::default();
        let risk = RiskConfig::default();
        Self {
            bankroll: 1000.0,
            max_stake_pct: 0.1,
            risk_profile: RiskProfile::Moderate,
            min_stake: kelly.min_stake,
            min_confidence: kelly.min_confidence,
            conservative_multiplier: risk.conservative_multiplier,
            moderate_multiplier: risk.moderate_multiplier,
            aggressive_multiplier: risk.aggressive_multiplier,
            high_risk_score: risk.high_risk_score,
            medium_risk_score: risk.medium_risk_score,
            high_kelly: risk.high_kelly,
            medium_kelly: risk.medium_kelly,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LifecycleSection {
    pub submit_timeout_secs: u64,
    pub max_submit_attempts: u32,
    pub max_history: usize,
}

impl Default for LifecycleSection {
    fn default() -> Self {
        let d = LifecycleConfig::default();
        Self {
            submit_timeout_secs: d.submit_timeout.as_secs(),
            max_submit_attempts: d.max_submit_attempts,
            max_history: d.max_history,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SubmissionConfig {
    /// Log orders instead of sending them.
    pub dry_run: bool,
    pub endpoint: Option<String>,
    pub api_key_env: Option<String>,
}

impl Default for SubmissionConfig {
    fn default() -> Self {
        Self {
            dry_run: true,
            endpoint: None,
            api_key_env: None,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        let config = Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {path}"))?;
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Resolve an environment variable name to its value.
    /// Useful for loading secrets referenced in the config.
    pub fn resolve_env(env_name: &str) -> Result<String> {
        std::env::var(env_name)
            .with_context(|| format!("Environment variable not set: {env_name}"))
    }

    /// Reject values no component would accept.
    pub fn validate(&self) -> Result<()> {
        if !(self.kernel.noise.is_finite() && self.kernel.noise >= 0.0) {
            bail!("kernel.noise must be non-negative, got {}", self.kernel.noise);
        }
        for kernel in &self.kernel.candidates {
            kernel.validate()?;
        }
        self.models.validate()?;
        self.ensemble_config().validate()?;
        self.risk_config().validate()?;
        self.bankroll_settings().validate()?;
        if self.staking.min_stake < 0.0 {
            bail!("staking.min_stake must be non-negative");
        }
        if !(0.0..=1.0).contains(&self.staking.min_confidence) {
            bail!("staking.min_confidence must be in [0, 1]");
        }
        if self.lifecycle.submit_timeout_secs == 0 {
            bail!("lifecycle.submit_timeout_secs must be positive");
        }
        if self.lifecycle.max_submit_attempts == 0 {
            bail!("lifecycle.max_submit_attempts must be at least 1");
        }
        if !self.submission.dry_run && self.submission.endpoint.is_none() {
            bail!("submission.endpoint is required when dry_run is false");
        }
        Ok(())
    }

    // -- component configs -------------------------------------------------

    pub fn statistical_config(&self) -> StatisticalConfig {
        let m = &self.models;
        StatisticalConfig {
            win_rate_weight: m.win_rate_weight,
            recent_form_weight: m.recent_form_weight,
            opponent_weight: m.opponent_weight,
            recent_window: m.recent_window,
            max_confidence: m.statistical_max_confidence,
            sample_scale: m.sample_scale,
        }
    }

    pub fn fantasy_value_config(&self) -> FantasyValueConfig {
        let m = &self.models;
        FantasyValueConfig {
            target_value: m.target_value,
            value_weight: m.value_weight,
            form_weight: m.form_weight,
            window: m.recent_window,
            max_confidence: m.learned_max_confidence,
        }
    }

    pub fn ensemble_config(&self) -> EnsembleConfig {
        let e = &self.ensemble;
        EnsembleConfig {
            disagreement_penalty: e.disagreement_penalty,
            disagreement_threshold: e.disagreement_threshold,
            regression_weight: e.regression_weight,
            mapping: e.mapping,
            max_reasoning: e.max_reasoning,
        }
    }

    pub fn kelly_config(&self) -> KellyConfig {
        KellyConfig {
            min_stake: self.staking.min_stake,
            min_confidence: self.staking.min_confidence,
        }
    }

    pub fn risk_config(&self) -> RiskConfig {
        let s = &self.staking;
        RiskConfig {
            conservative_multiplier: s.conservative_multiplier,
            moderate_multiplier: s.moderate_multiplier,
            aggressive_multiplier: s.aggressive_multiplier,
            high_risk_score: s.high_risk_score,
            medium_risk_score: s.medium_risk_score,
            high_kelly: s.high_kelly,
            medium_kelly: s.medium_kelly,
        }
    }

    pub fn bankroll_settings(&self) -> BankrollSettings {
        BankrollSettings {
            bankroll: self.staking.bankroll,
            max_stake_pct: self.staking.max_stake_pct,
            risk_profile: self.staking.risk_profile,
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        LifecycleConfig {
            submit_timeout: Duration::from_secs(self.lifecycle.submit_timeout_secs),
            max_submit_attempts: self.lifecycle.max_submit_attempts,
            max_history: self.lifecycle.max_history,
        }
    }

    // -- builders ----------------------------------------------------------

    pub fn kelly_calculator(&self) -> KellyCalculator {
        KellyCalculator::new(self.kelly_config(), self.risk_config())
    }

    /// Analyzer with the statistical, learned and hybrid models registered.
    pub fn build_analyzer(&self) -> Analyzer {
        let statistical = StatisticalModel::new(self.statistical_config());
        let learned = LearnedModel::new(Arc::new(FantasyValueInference::new(
            self.fantasy_value_config(),
        )));
        let hybrid = HybridModel::new(
            statistical.clone(),
            learned.clone(),
            HybridConfig {
                agreement_boost: self.models.agreement_boost,
            },
        );

        Analyzer::new(
            EnsembleAggregator::new(self.ensemble_config()),
            self.kelly_calculator(),
        )
        .with_model(Arc::new(statistical))
        .with_model(Arc::new(learned))
        .with_model(Arc::new(hybrid))
    }

    /// Dry-run submitter, or the HTTP submitter when `dry_run` is off.
    pub fn build_submitter(&self) -> Result<Arc<dyn Submitter>> {
        if self.submission.dry_run {
            return Ok(Arc::new(DryRunSubmitter));
        }
        let endpoint = self
            .submission
            .endpoint
            .clone()
            .context("submission.endpoint is not set")?;
        let api_key = match &self.submission.api_key_env {
            Some(env) => Some(Self::resolve_env(env)?),
            None => None,
        };
        let submitter = HttpSubmitter::new(
            endpoint,
            api_key,
            Duration::from_secs(self.lifecycle.submit_timeout_secs),
        )?;
        Ok(Arc::new(submitter))
    }
}
