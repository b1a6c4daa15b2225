//! Cross-crate scenarios for the VoltMesh protocol
//!
//! This test suite validates:
//! - Registration, certification, and status snapshots
//! - Intra-domain and cross-domain authentication, including anomaly gating
//! - Audit ledger sealing and chain integrity
//! - Maintenance: aggregation, session expiry, start/stop lifecycle
//! - Concurrent foreground calls alongside maintenance cycles

pub mod test_utils;

#[cfg(test)]
mod authentication_tests;

#[cfg(test)]
mod ledger_audit_tests;

#[cfg(test)]
mod maintenance_tests;
