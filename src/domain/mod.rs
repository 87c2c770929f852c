//! Core domain types and decision logic.

pub mod config_validation;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod execution;
pub mod indicator;
pub mod indicator_bank;
pub mod ledger;
pub mod market_window;
pub mod ohlcv;
pub mod order;
pub mod portfolio;
pub mod position;
pub mod prediction;
pub mod risk;
pub mod signal;
