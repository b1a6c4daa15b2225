//! Core functionality for the VoltMesh charging-network authentication stack.
//!
//! This crate provides the configuration, logging, error, and time helpers
//! shared by every other VoltMesh crate.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{
    AnomalyConfig, Config, CryptoConfig, IdentityConfig, LedgerConfig, MaintenanceConfig,
    PufConfig, SessionConfig,
};
pub use error::{CoreError, Result};
pub use types::{current_timestamp_ms, Timestamp, MS_PER_SEC};
