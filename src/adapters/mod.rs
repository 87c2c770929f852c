//! Concrete adapter implementations for ports.

pub mod csv_adapter;
pub mod csv_audit_adapter;
pub mod file_config_adapter;
pub mod momentum_predictor;
pub mod paper_broker;
pub mod tracing_audit_adapter;
