//! Decision lifecycle state machine.
//!
//! Sequences one betting decision through selection, analysis, review,
//! confirmation and submission. Events that are not legal in the current
//! state, or whose guard fails, are ignored. Failures park the machine in
//! `Error` until `Retry` replays the failed step or `Reset` abandons it.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use rust_decimal::prelude::*;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::executor::Submitter;
use crate::strategy::{Analyzer, SelectedSignals};
use crate::types::{
    validate_odds, AggregateEstimate, BankrollSettings, CoreError, Order, StakeRecommendation,
    SubmissionReceipt,
};

// ---------------------------------------------------------------------------
// States & events
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DecisionState {
    Idle,
    Selecting,
    Analyzing,
    Reviewing,
    Confirming,
    Submitting,
    Completed,
    Error,
}

impl fmt::Display for DecisionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DecisionState::Idle => "idle",
            DecisionState::Selecting => "selecting",
            DecisionState::Analyzing => "analyzing",
            DecisionState::Reviewing => "reviewing",
            DecisionState::Confirming => "confirming",
            DecisionState::Submitting => "submitting",
            DecisionState::Completed => "completed",
            DecisionState::Error => "error",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DecisionEvent {
    Select(SelectedSignals),
    Analyze,
    Review,
    Confirm,
    Submit,
    Retry,
    Reset,
}

/// Payload-free event tag, for logs and history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Select,
    Analyze,
    Review,
    Confirm,
    Submit,
    Retry,
    Reset,
}

impl DecisionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            DecisionEvent::Select(_) => EventKind::Select,
            DecisionEvent::Analyze => EventKind::Analyze,
            DecisionEvent::Review => EventKind::Review,
            DecisionEvent::Confirm => EventKind::Confirm,
            DecisionEvent::Submit => EventKind::Submit,
            DecisionEvent::Retry => EventKind::Retry,
            DecisionEvent::Reset => EventKind::Reset,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            EventKind::Select => "SELECT",
            EventKind::Analyze => "ANALYZE",
            EventKind::Review => "REVIEW",
            EventKind::Confirm => "CONFIRM",
            EventKind::Submit => "SUBMIT",
            EventKind::Retry => "RETRY",
            EventKind::Reset => "RESET",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Context, history & outcome
// ---------------------------------------------------------------------------

/// Data accumulated over one decision cycle.
#[derive(Debug, Clone, Default)]
pub struct DecisionContext {
    pub selected: Option<SelectedSignals>,
    pub aggregate: Option<AggregateEstimate>,
    pub stake: Option<StakeRecommendation>,
    pub order: Option<Order>,
    pub last_error: Option<CoreError>,
    pub submit_attempts: u32,
}

/// One recorded state change. `event` is `None` for changes driven by a
/// finished background step (analysis or submission result).
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub from: DecisionState,
    pub to: DecisionState,
    pub event: Option<EventKind>,
    pub at: DateTime<Utc>,
}

/// Everything a completed decision produced.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionOutcome {
    pub receipt: SubmissionReceipt,
    pub order: Order,
    pub aggregate: AggregateEstimate,
    pub stake: StakeRecommendation,
    pub attempts: u32,
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct LifecycleConfig {
    /// Upper bound on one submission attempt.
    pub submit_timeout: Duration,
    pub max_submit_attempts: u32,
    /// Transitions kept in memory, oldest dropped first. 0 keeps all.
    pub max_history: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            submit_timeout: Duration::from_secs(10),
            max_submit_attempts: 3,
            max_history: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

struct PendingSubmission {
    cycle: u64,
    handle: JoinHandle<Result<SubmissionReceipt, CoreError>>,
}

pub struct DecisionLifecycle {
    analyzer: Arc<Analyzer>,
    submitter: Arc<dyn Submitter>,
    settings: BankrollSettings,
    config: LifecycleConfig,
    state: DecisionState,
    context: DecisionContext,
    /// State whose step failed, replayed by `Retry`.
    failed_state: Option<DecisionState>,
    history: Vec<Transition>,
    /// Bumped on every reset; results from older cycles are dropped.
    cycle: u64,
    pending: Option<PendingSubmission>,
}

impl DecisionLifecycle {
    pub fn new(
        analyzer: Arc<Analyzer>,
        submitter: Arc<dyn Submitter>,
        settings: BankrollSettings,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            analyzer,
            submitter,
            settings,
            config,
            state: DecisionState::Idle,
            context: DecisionContext::default(),
            failed_state: None,
            history: Vec::new(),
            cycle: 0,
            pending: None,
        }
    }

    pub fn state(&self) -> DecisionState {
        self.state
    }

    pub fn context(&self) -> &DecisionContext {
        &self.context
    }

    pub fn history(&self) -> &[Transition] {
        &self.history
    }

    pub fn cycle(&self) -> u64 {
        self.cycle
    }

    pub fn settings(&self) -> &BankrollSettings {
        &self.settings
    }

    /// Replace the bankroll settings used by subsequent analyses and orders.
    pub fn update_settings(&mut self, settings: BankrollSettings) {
        self.settings = settings;
    }

    /// Whether `event` would be accepted in the current state.
    pub fn can(&self, event: &DecisionEvent) -> bool {
        use DecisionState as S;
        match (self.state, event) {
            (_, DecisionEvent::Reset) => true,
            (S::Idle | S::Reviewing, DecisionEvent::Select(_)) => true,
            (S::Selecting, DecisionEvent::Analyze) => self.context.selected.is_some(),
            (S::Analyzing, DecisionEvent::Review) => {
                self.context.aggregate.is_some() && self.context.stake.is_some()
            }
            (S::Reviewing, DecisionEvent::Confirm) => {
                self.context.aggregate.is_some()
                    && self.context.stake.as_ref().is_some_and(|s| s.is_actionable())
            }
            (S::Confirming, DecisionEvent::Submit) => self.context.order.is_some(),
            (S::Confirming, DecisionEvent::Review) => true,
            (S::Error, DecisionEvent::Retry) => self.retry_allowed(),
            _ => false,
        }
    }

    /// Apply an event. Returns `false` when it was ignored.
    ///
    /// Analysis runs to completion inside this call; submission is started
    /// in the background and finished by `settle`.
    pub async fn send(&mut self, event: DecisionEvent) -> bool {
        let kind = event.kind();
        if !self.can(&event) {
            debug!(state = %self.state, event = %kind, "Event ignored");
            return false;
        }

        match event {
            DecisionEvent::Reset => self.reset(),
            DecisionEvent::Select(signals) => {
                self.context.aggregate = None;
                self.context.stake = None;
                self.context.order = None;
                self.context.selected = Some(signals);
                self.transition(DecisionState::Selecting, Some(kind));
            }
            DecisionEvent::Analyze => {
                self.transition(DecisionState::Analyzing, Some(kind));
                self.run_analysis().await;
            }
            DecisionEvent::Review => {
                self.context.order = None;
                self.transition(DecisionState::Reviewing, Some(kind));
            }
            DecisionEvent::Confirm => {
                self.transition(DecisionState::Confirming, Some(kind));
                self.confirm_order();
            }
            DecisionEvent::Submit => {
                self.transition(DecisionState::Submitting, Some(kind));
                self.start_submission();
            }
            DecisionEvent::Retry => {
                let Some(target) = self.failed_state.take() else {
                    return false;
                };
                self.context.last_error = None;
                self.transition(target, Some(kind));
                match target {
                    DecisionState::Analyzing => self.run_analysis().await,
                    DecisionState::Confirming => self.confirm_order(),
                    DecisionState::Submitting => self.start_submission(),
                    _ => {}
                }
            }
        }
        true
    }

    /// Wait for the in-flight submission and apply its result.
    ///
    /// Returns `None` when nothing is in flight.
    pub async fn settle(&mut self) -> Option<Result<DecisionOutcome, CoreError>> {
        let pending = self.pending.take()?;
        let result = match pending.handle.await {
            Ok(result) => result,
            Err(e) => Err(CoreError::TaskFailed(e.to_string())),
        };
        self.apply_submission(pending.cycle, result)
    }

    /// Non-blocking `settle`: applies the result only if it is ready.
    pub fn try_settle(&mut self) -> Option<Result<DecisionOutcome, CoreError>> {
        let mut pending = self.pending.take()?;
        match (&mut pending.handle).now_or_never() {
            Some(joined) => {
                let result = joined.unwrap_or_else(|e| Err(CoreError::TaskFailed(e.to_string())));
                self.apply_submission(pending.cycle, result)
            }
            None => {
                self.pending = Some(pending);
                None
            }
        }
    }

    // -- internals ---------------------------------------------------------

    fn transition(&mut self, to: DecisionState, event: Option<EventKind>) {
        let from = self.state;
        self.state = to;
        info!(
            from = %from,
            to = %to,
            event = event.map(|e| e.to_string()).unwrap_or_else(|| "-".into()),
            cycle = self.cycle,
            "Decision transition"
        );
        if self.config.max_history > 0 && self.history.len() >= self.config.max_history {
            self.history.remove(0);
        }
        self.history.push(Transition {
            from,
            to,
            event,
            at: Utc::now(),
        });
    }

    fn fail(&mut self, error: CoreError) {
        warn!(state = %self.state, error = %error, "Decision step failed");
        self.failed_state = Some(self.state);
        self.context.last_error = Some(error);
        self.transition(DecisionState::Error, None);
    }

    fn retry_allowed(&self) -> bool {
        match self.failed_state {
            Some(DecisionState::Submitting) => {
                self.context.last_error.as_ref().is_some_and(|e| e.is_retryable())
                    && self.context.submit_attempts < self.config.max_submit_attempts
            }
            Some(_) => true,
            None => false,
        }
    }

    fn reset(&mut self) {
        if let Some(pending) = self.pending.take() {
            pending.handle.abort();
            info!(cycle = self.cycle, "Abandoned in-flight submission");
        }
        self.cycle += 1;
        self.context = DecisionContext::default();
        self.failed_state = None;
        self.transition(DecisionState::Idle, Some(EventKind::Reset));
    }

    async fn run_analysis(&mut self) {
        self.context.aggregate = None;
        self.context.stake = None;
        let Some(selected) = self.context.selected.clone() else {
            self.fail(CoreError::InvalidInput("no selection to analyze".into()));
            return;
        };

        match self.analyzer.analyze(&selected).await {
            Ok(aggregate) => {
                let stake =
                    self.analyzer
                        .recommend_stake(&aggregate, &self.settings, selected.selection.odds);
                self.context.aggregate = Some(aggregate);
                self.context.stake = Some(stake);
            }
            Err(e) => self.fail(e),
        }
    }

    fn confirm_order(&mut self) {
        match self.build_order() {
            Ok(order) => {
                info!(order = %order, "Order confirmed");
                self.context.order = Some(order);
            }
            Err(e) => self.fail(e),
        }
    }

    fn build_order(&self) -> Result<Order, CoreError> {
        let selected = self
            .context
            .selected
            .as_ref()
            .ok_or_else(|| CoreError::InvalidInput("no selection to confirm".into()))?;
        let stake = self
            .context
            .stake
            .as_ref()
            .ok_or_else(|| CoreError::StakingDomain("no stake to confirm".into()))?;
        validate_odds(selected.selection.odds)?;
        self.settings.validate()?;

        let ceiling = Decimal::from_f64(self.settings.bankroll * self.settings.max_stake_pct)
            .ok_or_else(|| CoreError::StakingDomain("stake ceiling not representable".into()))?;
        if !stake.is_actionable() || stake.absolute_stake() > ceiling {
            return Err(CoreError::StakingDomain(format!(
                "stake ${} outside (0, ${}]",
                stake.absolute_stake(),
                ceiling.round_dp(2)
            )));
        }

        Ok(Order {
            order_id: uuid::Uuid::new_v4().to_string(),
            selection_id: selected.selection.id.clone(),
            stake: stake.absolute_stake(),
            odds: selected.selection.odds,
        })
    }

    fn start_submission(&mut self) {
        let Some(order) = self.context.order.clone() else {
            self.fail(CoreError::InvalidInput("no order to submit".into()));
            return;
        };
        self.context.submit_attempts += 1;

        let submitter = Arc::clone(&self.submitter);
        let timeout = self.config.submit_timeout;
        info!(
            order_id = %order.order_id,
            attempt = self.context.submit_attempts,
            timeout_ms = timeout.as_millis() as u64,
            "Submitting order"
        );
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, submitter.submit(&order)).await {
                Ok(result) => result,
                Err(_) => Err(CoreError::Timeout(timeout)),
            }
        });
        self.pending = Some(PendingSubmission {
            cycle: self.cycle,
            handle,
        });
    }

    fn apply_submission(
        &mut self,
        cycle: u64,
        result: Result<SubmissionReceipt, CoreError>,
    ) -> Option<Result<DecisionOutcome, CoreError>> {
        if cycle != self.cycle || self.state != DecisionState::Submitting {
            debug!(cycle, current = self.cycle, "Stale submission result dropped");
            return None;
        }

        match result {
            Ok(receipt) => {
                let ctx = std::mem::take(&mut self.context);
                self.failed_state = None;
                self.transition(DecisionState::Completed, None);
                match (ctx.order, ctx.aggregate, ctx.stake) {
                    (Some(order), Some(aggregate), Some(stake)) => {
                        info!(receipt = %receipt, attempts = ctx.submit_attempts, "Decision completed");
                        Some(Ok(DecisionOutcome {
                            receipt,
                            order,
                            aggregate,
                            stake,
                            attempts: ctx.submit_attempts,
                        }))
                    }
                    _ => Some(Err(CoreError::InvalidInput(
                        "submission acknowledged without a confirmed order".into(),
                    ))),
                }
            }
            Err(e) => {
                self.fail(e.clone());
                Some(Err(e))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::executor::{DryRunSubmitter, MockSubmitter};
    use crate::strategy::ensemble::{EnsembleAggregator, EnsembleConfig};
    use crate::strategy::kelly::{KellyCalculator, KellyConfig};
    use crate::strategy::risk::RiskConfig;
    use crate::types::{
        Factor, FeatureVector, HistoricalData, PredictionInput, RiskProfile, Selection,
        SignalEstimate, SignalSource,
    };
    use async_trait::async_trait;
    use rust_decimal_macros::dec;
    use std::sync::atomic::{AtomicBool, Ordering};

    // ---- helpers -----------------------------------------------------------

    fn make_signals(probability: f64, odds: f64) -> SelectedSignals {
        SelectedSignals {
            selection: Selection {
                id: "sel-1".into(),
                label: "Over 24.5 points".into(),
                odds,
                line: Some(24.5),
            },
            input: PredictionInput {
                player_id: "p1".into(),
                player_name: "Lifecycle Test".into(),
                historical: HistoricalData {
                    wins: 10,
                    losses: 10,
                    average_score: 24.0,
                    recent_performance: vec![],
                },
                opponent: None,
                fantasy: None,
                features: FeatureVector::default(),
            },
            sources: vec![SignalSource::External],
            external: vec![SignalEstimate::new(
                SignalSource::External,
                probability,
                0.8,
                vec![Factor::new("consensus", 1.0)],
            )
            .unwrap()],
            regression_query: None,
        }
    }

    fn settings() -> BankrollSettings {
        BankrollSettings {
            bankroll: 1000.0,
            max_stake_pct: 0.1,
            risk_profile: RiskProfile::Moderate,
        }
    }

    fn analyzer() -> Arc<Analyzer> {
        Arc::new(Analyzer::new(
            EnsembleAggregator::new(EnsembleConfig::default()),
            KellyCalculator::new(KellyConfig::default(), RiskConfig::default()),
        ))
    }

    fn lifecycle_with(submitter: Arc<dyn Submitter>, config: LifecycleConfig) -> DecisionLifecycle {
        DecisionLifecycle::new(analyzer(), submitter, settings(), config)
    }

    fn lifecycle(submitter: Arc<dyn Submitter>) -> DecisionLifecycle {
        lifecycle_with(submitter, LifecycleConfig::default())
    }

    fn receipt_for(order: &Order) -> SubmissionReceipt {
        SubmissionReceipt {
            order_id: order.order_id.clone(),
            reference: "slip-1".into(),
            stake: order.stake,
            odds: order.odds,
            timestamp: Utc::now(),
        }
    }

    /// Drive a fresh machine up to `Submitting`.
    async fn to_submitting(lc: &mut DecisionLifecycle) {
        assert!(lc.send(DecisionEvent::Select(make_signals(0.6, 2.1))).await);
        assert!(lc.send(DecisionEvent::Analyze).await);
        assert!(lc.send(DecisionEvent::Review).await);
        assert!(lc.send(DecisionEvent::Confirm).await);
        assert!(lc.send(DecisionEvent::Submit).await);
        assert_eq!(lc.state(), DecisionState::Submitting);
    }

    struct SlowSubmitter {
        delay: Duration,
        finished: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Submitter for SlowSubmitter {
        async fn submit(&self, order: &Order) -> Result<SubmissionReceipt, CoreError> {
            tokio::time::sleep(self.delay).await;
            self.finished.store(true, Ordering::SeqCst);
            Ok(receipt_for(order))
        }
    }

    // ---- tests -------------------------------------------------------------

    #[tokio::test]
    async fn test_illegal_events_are_noops() {
        let mut lc = lifecycle(Arc::new(DryRunSubmitter));
        for event in [
            DecisionEvent::Analyze,
            DecisionEvent::Review,
            DecisionEvent::Confirm,
            DecisionEvent::Submit,
            DecisionEvent::Retry,
        ] {
            assert!(!lc.can(&event));
            assert!(!lc.send(event).await);
            assert_eq!(lc.state(), DecisionState::Idle);
        }
        assert!(lc.history().is_empty());
    }

    #[tokio::test]
    async fn test_happy_path_completes_and_clears_context() {
        let mut lc = lifecycle(Arc::new(DryRunSubmitter));
        to_submitting(&mut lc).await;

        let outcome = tokio_test::assert_ok!(lc.settle().await.unwrap());
        assert_eq!(lc.state(), DecisionState::Completed);
        assert!(outcome.receipt.reference.starts_with("dry-run-"));
        assert_eq!(outcome.order.stake, dec!(100));
        assert_eq!(outcome.attempts, 1);
        assert!((outcome.aggregate.probability() - 0.6).abs() < 1e-12);
        assert!(lc.context().selected.is_none());
        assert!(lc.context().order.is_none());

        assert!(lc.send(DecisionEvent::Reset).await);
        assert_eq!(lc.state(), DecisionState::Idle);
    }

    #[tokio::test]
    async fn test_analysis_stays_until_review() {
        let mut lc = lifecycle(Arc::new(DryRunSubmitter));
        lc.send(DecisionEvent::Select(make_signals(0.6, 2.1))).await;
        lc.send(DecisionEvent::Analyze).await;
        assert_eq!(lc.state(), DecisionState::Analyzing);
        assert!(lc.context().aggregate.is_some());
        assert_eq!(lc.context().stake.as_ref().unwrap().absolute_stake(), dec!(100));
        // Duplicate ANALYZE while analyzing is ignored.
        assert!(!lc.send(DecisionEvent::Analyze).await);
    }

    #[tokio::test]
    async fn test_empty_signals_fail_analysis() {
        let mut lc = lifecycle(Arc::new(DryRunSubmitter));
        let mut signals = make_signals(0.6, 2.1);
        signals.external.clear();
        lc.send(DecisionEvent::Select(signals)).await;
        lc.send(DecisionEvent::Analyze).await;

        assert_eq!(lc.state(), DecisionState::Error);
        assert_eq!(lc.context().last_error, Some(CoreError::AggregationEmptyInput));
        assert!(lc.context().aggregate.is_none());
        assert!(!lc.send(DecisionEvent::Review).await);

        // Retry replays the analysis, which fails the same way.
        assert!(lc.send(DecisionEvent::Retry).await);
        assert_eq!(lc.state(), DecisionState::Error);

        assert!(lc.send(DecisionEvent::Reset).await);
        assert_eq!(lc.state(), DecisionState::Idle);
        assert!(lc.context().last_error.is_none());
    }

    #[tokio::test]
    async fn test_confirm_guard_requires_positive_stake() {
        let mut lc = lifecycle(Arc::new(DryRunSubmitter));
        lc.send(DecisionEvent::Select(make_signals(0.40, 1.80))).await;
        lc.send(DecisionEvent::Analyze).await;
        lc.send(DecisionEvent::Review).await;
        assert_eq!(lc.state(), DecisionState::Reviewing);
        assert_eq!(lc.context().stake.as_ref().unwrap().fraction(), 0.0);

        assert!(!lc.can(&DecisionEvent::Confirm));
        assert!(!lc.send(DecisionEvent::Confirm).await);
        assert_eq!(lc.state(), DecisionState::Reviewing);
    }

    #[tokio::test]
    async fn test_reselect_and_step_back() {
        let mut lc = lifecycle(Arc::new(DryRunSubmitter));
        lc.send(DecisionEvent::Select(make_signals(0.6, 2.1))).await;
        lc.send(DecisionEvent::Analyze).await;
        lc.send(DecisionEvent::Review).await;
        lc.send(DecisionEvent::Confirm).await;
        assert_eq!(lc.state(), DecisionState::Confirming);
        assert!(lc.context().order.is_some());

        assert!(lc.send(DecisionEvent::Review).await);
        assert_eq!(lc.state(), DecisionState::Reviewing);
        assert!(lc.context().order.is_none());

        assert!(lc.send(DecisionEvent::Select(make_signals(0.7, 1.9))).await);
        assert_eq!(lc.state(), DecisionState::Selecting);
        assert!(lc.context().aggregate.is_none());
        assert_eq!(lc.context().selected.as_ref().unwrap().selection.odds, 1.9);
    }

    #[tokio::test]
    async fn test_confirm_fails_when_settings_shrink() {
        let mut lc = lifecycle(Arc::new(DryRunSubmitter));
        lc.send(DecisionEvent::Select(make_signals(0.6, 2.1))).await;
        lc.send(DecisionEvent::Analyze).await;
        lc.send(DecisionEvent::Review).await;
        lc.update_settings(BankrollSettings {
            bankroll: 100.0,
            ..settings()
        });
        assert!(lc.send(DecisionEvent::Confirm).await);
        assert_eq!(lc.state(), DecisionState::Error);
        assert!(matches!(lc.context().last_error, Some(CoreError::StakingDomain(_))));
    }

    #[tokio::test]
    async fn test_duplicate_submit_ignored() {
        let mut mock = MockSubmitter::new();
        mock.expect_submit().times(1).returning(|o| Ok(receipt_for(o)));
        let mut lc = lifecycle(Arc::new(mock));
        to_submitting(&mut lc).await;
        assert!(!lc.send(DecisionEvent::Submit).await);
        assert!(lc.settle().await.unwrap().is_ok());
        assert!(lc.settle().await.is_none());
    }

    #[tokio::test]
    async fn test_transient_failure_then_retry_succeeds() {
        let mut mock = MockSubmitter::new();
        let mut seq = mockall::Sequence::new();
        mock.expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(CoreError::SubmissionTransient("503".into())));
        mock.expect_submit()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|o| Ok(receipt_for(o)));

        let mut lc = lifecycle(Arc::new(mock));
        to_submitting(&mut lc).await;
        let err = tokio_test::assert_err!(lc.settle().await.unwrap());
        assert!(err.is_retryable());
        assert_eq!(lc.state(), DecisionState::Error);
        assert!(lc.context().order.is_some());

        assert!(lc.can(&DecisionEvent::Retry));
        assert!(lc.send(DecisionEvent::Retry).await);
        assert_eq!(lc.state(), DecisionState::Submitting);
        let outcome = tokio_test::assert_ok!(lc.settle().await.unwrap());
        assert_eq!(outcome.attempts, 2);
        assert_eq!(lc.state(), DecisionState::Completed);
    }

    #[tokio::test]
    async fn test_rejected_submission_not_retryable() {
        let mut mock = MockSubmitter::new();
        mock.expect_submit()
            .times(1)
            .returning(|_| Err(CoreError::SubmissionRejected("odds moved".into())));
        let mut lc = lifecycle(Arc::new(mock));
        to_submitting(&mut lc).await;
        assert!(lc.settle().await.unwrap().is_err());
        assert_eq!(lc.state(), DecisionState::Error);
        assert!(!lc.can(&DecisionEvent::Retry));
        assert!(!lc.send(DecisionEvent::Retry).await);
    }

    #[tokio::test]
    async fn test_retry_limit() {
        let mut mock = MockSubmitter::new();
        mock.expect_submit()
            .times(2)
            .returning(|_| Err(CoreError::SubmissionTransient("busy".into())));
        let mut lc = lifecycle_with(
            Arc::new(mock),
            LifecycleConfig {
                max_submit_attempts: 2,
                ..LifecycleConfig::default()
            },
        );
        to_submitting(&mut lc).await;
        assert!(lc.settle().await.unwrap().is_err());
        assert!(lc.send(DecisionEvent::Retry).await);
        assert!(lc.settle().await.unwrap().is_err());
        assert_eq!(lc.context().submit_attempts, 2);
        assert!(!lc.can(&DecisionEvent::Retry));
    }

    #[tokio::test]
    async fn test_submission_timeout() {
        let finished = Arc::new(AtomicBool::new(false));
        let slow = SlowSubmitter {
            delay: Duration::from_secs(5),
            finished: Arc::clone(&finished),
        };
        let mut lc = lifecycle_with(
            Arc::new(slow),
            LifecycleConfig {
                submit_timeout: Duration::from_millis(50),
                ..LifecycleConfig::default()
            },
        );
        to_submitting(&mut lc).await;
        let err = lc.settle().await.unwrap().unwrap_err();
        assert_eq!(err, CoreError::Timeout(Duration::from_millis(50)));
        assert_eq!(lc.state(), DecisionState::Error);
        assert!(lc.can(&DecisionEvent::Retry));
    }

    #[tokio::test]
    async fn test_reset_abandons_inflight_submission() {
        let finished = Arc::new(AtomicBool::new(false));
        let slow = SlowSubmitter {
            delay: Duration::from_millis(100),
            finished: Arc::clone(&finished),
        };
        let mut lc = lifecycle(Arc::new(slow));
        to_submitting(&mut lc).await;
        let cycle = lc.cycle();

        assert!(lc.send(DecisionEvent::Reset).await);
        assert_eq!(lc.state(), DecisionState::Idle);
        assert_eq!(lc.cycle(), cycle + 1);
        assert!(lc.settle().await.is_none());

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(!finished.load(Ordering::SeqCst));
        assert_eq!(lc.state(), DecisionState::Idle);
    }

    /// Drive a fresh machine into `target` along the normal path.
    async fn drive_to(lc: &mut DecisionLifecycle, target: DecisionState) {
        use DecisionState as S;
        if target == S::Error {
            let mut signals = make_signals(0.6, 2.1);
            signals.external.clear();
            lc.send(DecisionEvent::Select(signals)).await;
            lc.send(DecisionEvent::Analyze).await;
        } else if target != S::Idle {
            let steps = [
                (S::Selecting, DecisionEvent::Select(make_signals(0.6, 2.1))),
                (S::Analyzing, DecisionEvent::Analyze),
                (S::Reviewing, DecisionEvent::Review),
                (S::Confirming, DecisionEvent::Confirm),
                (S::Submitting, DecisionEvent::Submit),
            ];
            for (reached, event) in steps {
                assert!(lc.send(event).await);
                if reached == target {
                    break;
                }
            }
            if target == S::Completed {
                assert!(lc.settle().await.unwrap().is_ok());
            }
        }
        assert_eq!(lc.state(), target);
    }

    #[tokio::test]
    async fn test_reset_from_every_state_clears_context() {
        use DecisionState as S;
        for state in [
            S::Idle,
            S::Selecting,
            S::Analyzing,
            S::Reviewing,
            S::Confirming,
            S::Submitting,
            S::Error,
            S::Completed,
        ] {
            let mut lc = lifecycle(Arc::new(DryRunSubmitter));
            drive_to(&mut lc, state).await;

            assert!(lc.send(DecisionEvent::Reset).await, "reset refused from {state}");
            assert_eq!(lc.state(), S::Idle, "after reset from {state}");
            let ctx = lc.context();
            assert!(ctx.selected.is_none(), "selection kept after reset from {state}");
            assert!(ctx.aggregate.is_none());
            assert!(ctx.stake.is_none());
            assert!(ctx.order.is_none());
            assert!(ctx.last_error.is_none());
            assert_eq!(ctx.submit_attempts, 0);
            assert!(lc.settle().await.is_none());
        }
    }

    #[tokio::test]
    async fn test_try_settle_not_ready() {
        let finished = Arc::new(AtomicBool::new(false));
        let slow = SlowSubmitter {
            delay: Duration::from_millis(200),
            finished,
        };
        let mut lc = lifecycle(Arc::new(slow));
        to_submitting(&mut lc).await;
        assert!(lc.try_settle().is_none());
        assert_eq!(lc.state(), DecisionState::Submitting);
        assert!(lc.settle().await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_history_records_transitions() {
        let mut lc = lifecycle(Arc::new(DryRunSubmitter));
        to_submitting(&mut lc).await;
        lc.settle().await;
        let path: Vec<DecisionState> = lc.history().iter().map(|t| t.to).collect();
        assert_eq!(
            path,
            vec![
                DecisionState::Selecting,
                DecisionState::Analyzing,
                DecisionState::Reviewing,
                DecisionState::Confirming,
                DecisionState::Submitting,
                DecisionState::Completed,
            ]
        );
        assert_eq!(lc.history()[0].event, Some(EventKind::Select));
        assert_eq!(lc.history()[5].event, None);
    }

    #[tokio::test]
    async fn test_history_is_bounded() {
        let mut lc = lifecycle_with(
            Arc::new(DryRunSubmitter),
            LifecycleConfig {
                max_history: 3,
                ..LifecycleConfig::default()
            },
        );
        to_submitting(&mut lc).await;
        assert_eq!(lc.history().len(), 3);
        assert_eq!(lc.history()[2].to, DecisionState::Submitting);
    }

    #[test]
    fn test_display_names() {
        assert_eq!(DecisionState::Submitting.to_string(), "submitting");
        assert_eq!(EventKind::Retry.to_string(), "RETRY");
        assert_eq!(DecisionEvent::Reset.kind(), EventKind::Reset);
    }
}
