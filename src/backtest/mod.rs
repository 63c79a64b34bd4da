//! Evaluation against resolved outcomes: calibration tracking and
//! bankroll replay.

pub mod calibration;
pub mod runner;
