//! Decision engine: lifecycle state machine and order submission.

pub mod executor;
pub mod lifecycle;

pub use executor::{DryRunSubmitter, HttpSubmitter, Submitter};
pub use lifecycle::{
    DecisionContext, DecisionEvent, DecisionLifecycle, DecisionOutcome, DecisionState, EventKind,
    LifecycleConfig, Transition,
};
