//! Shared types for the PICKWISE decision core.
//!
//! These types form the data model used across all modules. Values that
//! enter from outside (features, odds, bankroll settings) are validated
//! here at the boundary so downstream modules can rely on their invariants.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Features
// ---------------------------------------------------------------------------

/// Ordered mapping from named numeric features to values.
///
/// Immutable once built. Construction rejects duplicate names and
/// non-finite values, so every stored value is a usable real.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(try_from = "Vec<(String, f64)>", into = "Vec<(String, f64)>")]
pub struct FeatureVector {
    names: Vec<String>,
    values: Vec<f64>,
}

impl FeatureVector {
    /// Build a feature vector from `(name, value)` pairs, preserving order.
    pub fn new<I, S>(pairs: I) -> Result<Self, CoreError>
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        let mut names: Vec<String> = Vec::new();
        let mut values = Vec::new();
        for (name, value) in pairs {
            let name = name.into();
            if !value.is_finite() {
                return Err(CoreError::InvalidInput(format!(
                    "feature '{name}' is not finite ({value})"
                )));
            }
            if names.contains(&name) {
                return Err(CoreError::InvalidInput(format!(
                    "duplicate feature '{name}'"
                )));
            }
            names.push(name);
            values.push(value);
        }
        Ok(Self { names, values })
    }

    /// Unnamed features (`x0`, `x1`, ...), handy for regression inputs.
    pub fn from_values(values: &[f64]) -> Result<Self, CoreError> {
        Self::new(
            values
                .iter()
                .enumerate()
                .map(|(i, v)| (format!("x{i}"), *v)),
        )
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Feature values in insertion order.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Look up a feature by name.
    pub fn get(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.values[i])
    }
}

impl TryFrom<Vec<(String, f64)>> for FeatureVector {
    type Error = CoreError;

    fn try_from(pairs: Vec<(String, f64)>) -> Result<Self, Self::Error> {
        Self::new(pairs)
    }
}

impl From<FeatureVector> for Vec<(String, f64)> {
    fn from(fv: FeatureVector) -> Self {
        fv.names.into_iter().zip(fv.values).collect()
    }
}

// ---------------------------------------------------------------------------
// Prediction input
// ---------------------------------------------------------------------------

/// Historical record of the subject being predicted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalData {
    pub wins: u32,
    pub losses: u32,
    pub average_score: f64,
    /// Per-game performance scores in [0, 1], oldest first.
    #[serde(default)]
    pub recent_performance: Vec<f64>,
}

impl HistoricalData {
    pub fn games(&self) -> u32 {
        self.wins + self.losses
    }

    /// Win ratio, or `None` with no games on record.
    pub fn win_rate(&self) -> Option<f64> {
        let games = self.games();
        (games > 0).then(|| self.wins as f64 / games as f64)
    }
}

/// Record of the opposing side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpponentData {
    pub wins: u32,
    pub losses: u32,
    pub average_score: f64,
}

impl OpponentData {
    pub fn win_rate(&self) -> Option<f64> {
        let games = self.wins + self.losses;
        (games > 0).then(|| self.wins as f64 / games as f64)
    }
}

/// Daily-fantasy projection for the subject.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FantasyData {
    pub projected_points: f64,
    pub salary: f64,
    pub value: f64,
}

/// Everything a signal model may consume for one decision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionInput {
    pub player_id: String,
    pub player_name: String,
    pub historical: HistoricalData,
    #[serde(default)]
    pub opponent: Option<OpponentData>,
    #[serde(default)]
    pub fantasy: Option<FantasyData>,
    #[serde(default)]
    pub features: FeatureVector,
}

impl PredictionInput {
    /// Reject values the feature source should never have produced.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.historical.average_score.is_finite() {
            return Err(CoreError::InvalidInput(format!(
                "{}: average score is not finite",
                self.player_id
            )));
        }
        if let Some(bad) = self
            .historical
            .recent_performance
            .iter()
            .find(|v| !v.is_finite() || **v < 0.0 || **v > 1.0)
        {
            return Err(CoreError::InvalidInput(format!(
                "{}: recent performance score {bad} outside [0, 1]",
                self.player_id
            )));
        }
        if let Some(f) = &self.fantasy {
            if !(f.projected_points.is_finite() && f.salary.is_finite() && f.value.is_finite()) {
                return Err(CoreError::InvalidInput(format!(
                    "{}: fantasy data is not finite",
                    self.player_id
                )));
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Signal estimates
// ---------------------------------------------------------------------------

/// Which estimator produced a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    Statistical,
    Learned,
    Hybrid,
    /// Precomputed estimate supplied by a backend collaborator.
    External,
}

impl SignalSource {
    pub const MODELS: &'static [SignalSource] = &[
        SignalSource::Statistical,
        SignalSource::Learned,
        SignalSource::Hybrid,
    ];
}

impl fmt::Display for SignalSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalSource::Statistical => write!(f, "statistical"),
            SignalSource::Learned => write!(f, "learned"),
            SignalSource::Hybrid => write!(f, "hybrid"),
            SignalSource::External => write!(f, "external"),
        }
    }
}

impl std::str::FromStr for SignalSource {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "statistical" | "stats" => Ok(SignalSource::Statistical),
            "learned" | "ml" => Ok(SignalSource::Learned),
            "hybrid" => Ok(SignalSource::Hybrid),
            "external" => Ok(SignalSource::External),
            _ => Err(CoreError::InvalidInput(format!("unknown signal source: {s}"))),
        }
    }
}

/// One named contribution to an estimate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Factor {
    pub name: String,
    pub weight: f64,
}

impl Factor {
    pub fn new(name: impl Into<String>, weight: f64) -> Self {
        Self {
            name: name.into(),
            weight,
        }
    }
}

/// Output of exactly one signal model invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalEstimate {
    source: SignalSource,
    probability: f64,
    confidence: f64,
    /// Per unit stake at even money (decimal odds 2.0): `2p - 1`.
    expected_value: f64,
    factors: Vec<Factor>,
}

impl SignalEstimate {
    pub fn new(
        source: SignalSource,
        probability: f64,
        confidence: f64,
        factors: Vec<Factor>,
    ) -> Result<Self, CoreError> {
        check_unit("probability", probability)?;
        check_unit("confidence", confidence)?;
        Ok(Self {
            source,
            probability,
            confidence,
            expected_value: 2.0 * probability - 1.0,
            factors,
        })
    }

    pub fn source(&self) -> SignalSource {
        self.source
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn expected_value(&self) -> f64 {
        self.expected_value
    }

    pub fn factors(&self) -> &[Factor] {
        &self.factors
    }

    /// Highest-weighted factor; the first one wins ties.
    pub fn top_factor(&self) -> Option<&Factor> {
        self.factors.iter().fold(None, |best: Option<&Factor>, f| match best {
            Some(b) if b.weight >= f.weight => Some(b),
            _ => Some(f),
        })
    }

    /// Same estimate with confidence forced to zero.
    pub(crate) fn without_confidence(mut self) -> Self {
        self.confidence = 0.0;
        self
    }

    /// Re-validate an estimate that arrived from outside the crate.
    pub fn validate(&self) -> Result<(), CoreError> {
        check_unit("probability", self.probability)?;
        check_unit("confidence", self.confidence)
    }
}

impl fmt::Display for SignalEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] P={:.1}% conf={:.0}% ev={:+.3}",
            self.source,
            self.probability * 100.0,
            self.confidence * 100.0,
            self.expected_value,
        )
    }
}

/// Predictive distribution from the kernel regressor.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegressionEstimate {
    pub mean: f64,
    /// Never negative.
    pub variance: f64,
}

impl RegressionEstimate {
    pub fn std_dev(&self) -> f64 {
        self.variance.sqrt()
    }
}

// ---------------------------------------------------------------------------
// Aggregate estimate
// ---------------------------------------------------------------------------

/// Calibrated combination of one or more signal estimates.
///
/// Only the ensemble aggregator constructs these, and only from a
/// non-empty set of signals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "AggregateEstimateRaw")]
pub struct AggregateEstimate {
    probability: f64,
    confidence: f64,
    expected_value: f64,
    risk_score: f64,
    reasoning: Vec<String>,
    signal_count: usize,
}

impl AggregateEstimate {
    pub(crate) fn new(
        probability: f64,
        confidence: f64,
        expected_value: f64,
        risk_score: f64,
        reasoning: Vec<String>,
        signal_count: usize,
    ) -> Self {
        debug_assert!(signal_count > 0);
        Self {
            probability,
            confidence,
            expected_value,
            risk_score,
            reasoning,
            signal_count,
        }
    }

    pub fn probability(&self) -> f64 {
        self.probability
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    /// Net return per unit stake at the odds used for aggregation.
    pub fn expected_value(&self) -> f64 {
        self.expected_value
    }

    pub fn risk_score(&self) -> f64 {
        self.risk_score
    }

    pub fn reasoning(&self) -> &[String] {
        &self.reasoning
    }

    pub fn signal_count(&self) -> usize {
        self.signal_count
    }
}

/// Unchecked wire shape of [`AggregateEstimate`].
#[derive(Deserialize)]
struct AggregateEstimateRaw {
    probability: f64,
    confidence: f64,
    expected_value: f64,
    risk_score: f64,
    #[serde(default)]
    reasoning: Vec<String>,
    signal_count: usize,
}

impl TryFrom<AggregateEstimateRaw> for AggregateEstimate {
    type Error = CoreError;

    fn try_from(raw: AggregateEstimateRaw) -> Result<Self, Self::Error> {
        check_unit("probability", raw.probability)?;
        check_unit("confidence", raw.confidence)?;
        check_unit("risk score", raw.risk_score)?;
        if !raw.expected_value.is_finite() {
            return Err(CoreError::InvalidInput(format!(
                "expected value is not finite ({})",
                raw.expected_value
            )));
        }
        if raw.signal_count == 0 {
            return Err(CoreError::AggregationEmptyInput);
        }
        Ok(Self::new(
            raw.probability,
            raw.confidence,
            raw.expected_value,
            raw.risk_score,
            raw.reasoning,
            raw.signal_count,
        ))
    }
}

impl fmt::Display for AggregateEstimate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "P={:.1}% conf={:.0}% ev={:+.3} risk={:.2} (n={})",
            self.probability * 100.0,
            self.confidence * 100.0,
            self.expected_value,
            self.risk_score,
            self.signal_count,
        )
    }
}

// ---------------------------------------------------------------------------
// Staking
// ---------------------------------------------------------------------------

/// User-selected tolerance gating stake aggressiveness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskProfile {
    Conservative,
    Moderate,
    Aggressive,
}

impl RiskProfile {
    pub const ALL: &'static [RiskProfile] = &[
        RiskProfile::Conservative,
        RiskProfile::Moderate,
        RiskProfile::Aggressive,
    ];
}

impl fmt::Display for RiskProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskProfile::Conservative => write!(f, "conservative"),
            RiskProfile::Moderate => write!(f, "moderate"),
            RiskProfile::Aggressive => write!(f, "aggressive"),
        }
    }
}

impl std::str::FromStr for RiskProfile {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "conservative" | "low" => Ok(RiskProfile::Conservative),
            "moderate" | "medium" => Ok(RiskProfile::Moderate),
            "aggressive" | "high" => Ok(RiskProfile::Aggressive),
            _ => Err(CoreError::InvalidInput(format!("unknown risk profile: {s}"))),
        }
    }
}

/// Risk classification attached to a stake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// Bankroll constraints supplied by the settings source.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BankrollSettings {
    pub bankroll: f64,
    /// Hard ceiling on the stake as a fraction of bankroll, in (0, 1].
    pub max_stake_pct: f64,
    pub risk_profile: RiskProfile,
}

impl BankrollSettings {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !self.bankroll.is_finite() || self.bankroll <= 0.0 {
            return Err(CoreError::StakingDomain(format!(
                "bankroll must be positive, got {}",
                self.bankroll
            )));
        }
        if !self.max_stake_pct.is_finite() || self.max_stake_pct <= 0.0 || self.max_stake_pct > 1.0 {
            return Err(CoreError::StakingDomain(format!(
                "max stake percentage must be in (0, 1], got {}",
                self.max_stake_pct
            )));
        }
        Ok(())
    }
}

/// Bounded, risk-scaled stake for one decision.
///
/// Only the stake sizer constructs these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "StakeRecommendationRaw")]
pub struct StakeRecommendation {
    fraction: f64,
    kelly_fraction: f64,
    absolute_stake: Decimal,
    risk_level: RiskLevel,
    risk_profile: RiskProfile,
    rationale: Vec<String>,
}

impl StakeRecommendation {
    pub(crate) fn new(
        fraction: f64,
        kelly_fraction: f64,
        absolute_stake: Decimal,
        risk_level: RiskLevel,
        risk_profile: RiskProfile,
        rationale: Vec<String>,
    ) -> Self {
        Self {
            fraction,
            kelly_fraction,
            absolute_stake,
            risk_level,
            risk_profile,
            rationale,
        }
    }

    /// Fail-closed result: nothing staked, flagged high risk.
    pub(crate) fn zero(risk_profile: RiskProfile, rationale: Vec<String>) -> Self {
        Self::new(0.0, 0.0, Decimal::ZERO, RiskLevel::High, risk_profile, rationale)
    }

    /// Stake as a fraction of bankroll after scaling and caps.
    pub fn fraction(&self) -> f64 {
        self.fraction
    }

    /// Raw Kelly fraction before profile scaling and caps.
    pub fn kelly_fraction(&self) -> f64 {
        self.kelly_fraction
    }

    pub fn absolute_stake(&self) -> Decimal {
        self.absolute_stake
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn risk_profile(&self) -> RiskProfile {
        self.risk_profile
    }

    pub fn rationale(&self) -> &[String] {
        &self.rationale
    }

    pub fn is_actionable(&self) -> bool {
        self.absolute_stake > Decimal::ZERO
    }
}

#[derive(Deserialize)]
struct StakeRecommendationRaw {
    fraction: f64,
    kelly_fraction: f64,
    absolute_stake: Decimal,
    risk_level: RiskLevel,
    risk_profile: RiskProfile,
    #[serde(default)]
    rationale: Vec<String>,
}

impl TryFrom<StakeRecommendationRaw> for StakeRecommendation {
    type Error = CoreError;

    fn try_from(raw: StakeRecommendationRaw) -> Result<Self, Self::Error> {
        for (what, value) in [("stake fraction", raw.fraction), ("kelly fraction", raw.kelly_fraction)] {
            if !(value.is_finite() && (0.0..=1.0).contains(&value)) {
                return Err(CoreError::StakingDomain(format!("{what} {value} outside [0, 1]")));
            }
        }
        if raw.absolute_stake.is_sign_negative() {
            return Err(CoreError::StakingDomain(format!(
                "absolute stake must not be negative, got {}",
                raw.absolute_stake
            )));
        }
        Ok(Self::new(
            raw.fraction,
            raw.kelly_fraction,
            raw.absolute_stake,
            raw.risk_level,
            raw.risk_profile,
            raw.rationale,
        ))
    }
}

impl fmt::Display for StakeRecommendation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stake=${} ({:.2}% of bankroll, kelly={:.2}%) risk={} profile={}",
            self.absolute_stake,
            self.fraction * 100.0,
            self.kelly_fraction * 100.0,
            self.risk_level,
            self.risk_profile,
        )
    }
}

// ---------------------------------------------------------------------------
// Selection & orders
// ---------------------------------------------------------------------------

/// The market outcome a decision is about.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Selection {
    pub id: String,
    pub label: String,
    /// Decimal odds, strictly greater than 1.0.
    pub odds: f64,
    /// Statistical line the regression target is compared against.
    #[serde(default)]
    pub line: Option<f64>,
}

impl Selection {
    pub fn validate(&self) -> Result<(), CoreError> {
        validate_odds(self.odds)?;
        if let Some(line) = self.line {
            if !line.is_finite() {
                return Err(CoreError::InvalidInput(format!(
                    "{}: line is not finite",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{} [{}] line={line} @ {:.2}", self.label, self.id, self.odds),
            None => write!(f, "{} [{}] @ {:.2}", self.label, self.id, self.odds),
        }
    }
}

/// Final order payload handed to the submission collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: String,
    pub selection_id: String,
    pub stake: Decimal,
    pub odds: f64,
}

impl fmt::Display for Order {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ${} @ {:.2} [{}]",
            self.selection_id, self.stake, self.odds, self.order_id
        )
    }
}

/// Acknowledgement returned by the submission collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmissionReceipt {
    pub order_id: String,
    /// Reference assigned by the collaborator (bet slip id).
    pub reference: String,
    pub stake: Decimal,
    pub odds: f64,
    pub timestamp: DateTime<Utc>,
}

impl fmt::Display for SubmissionReceipt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "${} @ {:.2} ref={} [{}]",
            self.stake, self.odds, self.reference, self.order_id
        )
    }
}

// ---------------------------------------------------------------------------
// Validation helpers
// ---------------------------------------------------------------------------

/// Decimal odds must be finite and strictly greater than 1.0.
pub fn validate_odds(odds: f64) -> Result<(), CoreError> {
    if odds.is_finite() && odds > 1.0 {
        Ok(())
    } else {
        Err(CoreError::InvalidOdds(odds))
    }
}

fn check_unit(what: &str, value: f64) -> Result<(), CoreError> {
    if value.is_finite() && (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(CoreError::InvalidProbability(format!(
            "{what} {value} outside [0, 1]"
        )))
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Domain-specific error types for PICKWISE.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoreError {
    #[error("Regressor has not been fitted")]
    NotFitted,

    #[error("Covariance matrix not positive-definite at pivot {pivot} ({value:.3e}); increase noise or remove near-duplicate points")]
    NumericalInstability { pivot: usize, value: f64 },

    #[error("Invalid odds {0}: decimal odds must be greater than 1.0")]
    InvalidOdds(f64),

    #[error("Invalid probability: {0}")]
    InvalidProbability(String),

    #[error("Aggregation requires at least one signal")]
    AggregationEmptyInput,

    #[error("Staking domain error: {0}")]
    StakingDomain(String),

    #[error("Submission failed (transient): {0}")]
    SubmissionTransient(String),

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

impl CoreError {
    /// Whether replaying the failed action may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::SubmissionTransient(_) | CoreError::Timeout(_)
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
