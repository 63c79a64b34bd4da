//! PICKWISE: prediction ensemble, risk-adjusted Kelly staking and the
//! bet decision lifecycle.
//!
//! Library crate exposing all modules for use by integration tests
//! and the binary entry point.

pub mod config;
pub mod types;
pub mod regression;
pub mod models;
pub mod strategy;
pub mod backtest;
pub mod engine;
