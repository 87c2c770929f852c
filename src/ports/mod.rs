//! Port traits for the engine's external collaborators.

pub mod audit_port;
pub mod broker_port;
pub mod config_port;
pub mod prediction_port;
