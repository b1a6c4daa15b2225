//! Configuration management for VoltMesh.

use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};
#[cfg(feature = "toml")]
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub ledger: LedgerConfig,
    pub sessions: SessionConfig,
    pub maintenance: MaintenanceConfig,
    pub anomaly: AnomalyConfig,
    pub crypto: CryptoConfig,
    pub puf: PufConfig,
    pub identity: IdentityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Pending transactions that trigger automatic block sealing
    pub batch_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions older than this are force-ended by maintenance
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub interval_secs: u64,
    /// Upper bound on how long `stop()` waits for the maintenance task
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Cross-domain attempts scoring above this are rejected
    pub rejection_threshold: f64,
    /// Chi-square confidence level used for the model threshold
    pub confidence: f64,
    /// Diagonal term added to the covariance matrix
    pub regularization: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CryptoConfig {
    /// Merkle tree height of the certificate authority key (2^h signatures)
    pub authority_tree_height: u32,
    /// Merkle tree height of entity keys
    pub entity_tree_height: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PufConfig {
    pub secret_len: usize,
    pub response_bits: usize,
    pub noise_factor: f64,
    pub tolerance: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub certificate_validity_secs: u64,
    pub credential_validity_secs: u64,
    /// Allowed clock skew on authentication request timestamps
    pub max_request_skew_secs: u64,
    pub charging_station_power_kw: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self { batch_size: 10 }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_secs: 3600 }
    }
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            shutdown_timeout_secs: 5,
        }
    }
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            rejection_threshold: 0.8,
            confidence: 0.95,
            regularization: 1e-6,
        }
    }
}

impl Default for CryptoConfig {
    fn default() -> Self {
        Self {
            authority_tree_height: 10,
            entity_tree_height: 8,
        }
    }
}

impl Default for PufConfig {
    fn default() -> Self {
        Self {
            secret_len: 1024,
            response_bits: 256,
            noise_factor: 0.05,
            tolerance: 0.9,
        }
    }
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            certificate_validity_secs: 86_400,
            credential_validity_secs: 86_400,
            max_request_skew_secs: 300,
            charging_station_power_kw: 50.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::default_config()
    }
}

impl Config {
    #[cfg(feature = "toml")]
    pub fn from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            ledger: LedgerConfig::default(),
            sessions: SessionConfig::default(),
            maintenance: MaintenanceConfig::default(),
            anomaly: AnomalyConfig::default(),
            crypto: CryptoConfig::default(),
            puf: PufConfig::default(),
            identity: IdentityConfig::default(),
        }
    }

    /// Reject values that would make the protocol misbehave.
    pub fn validate(&self) -> Result<()> {
        if self.ledger.batch_size == 0 {
            return Err(invalid("ledger.batch_size", "must be at least 1"));
        }
        if self.maintenance.interval_secs == 0 {
            return Err(invalid("maintenance.interval_secs", "must be at least 1"));
        }
        if !(0.0..=1.0).contains(&self.anomaly.rejection_threshold) {
            return Err(invalid(
                "anomaly.rejection_threshold",
                "must lie in [0, 1]",
            ));
        }
        if !(self.anomaly.confidence > 0.0 && self.anomaly.confidence < 1.0) {
            return Err(invalid("anomaly.confidence", "must lie in (0, 1)"));
        }
        if self.anomaly.regularization < 0.0 {
            return Err(invalid("anomaly.regularization", "must be non-negative"));
        }
        for (field, height) in [
            ("crypto.authority_tree_height", self.crypto.authority_tree_height),
            ("crypto.entity_tree_height", self.crypto.entity_tree_height),
        ] {
            if height == 0 || height > 20 {
                return Err(invalid(field, "must lie in [1, 20]"));
            }
        }
        if self.puf.secret_len == 0 || self.puf.response_bits == 0 {
            return Err(invalid("puf", "secret_len and response_bits must be positive"));
        }
        if !(0.0..0.5).contains(&self.puf.noise_factor) {
            return Err(invalid("puf.noise_factor", "must lie in [0, 0.5)"));
        }
        if !(0.0..=1.0).contains(&self.puf.tolerance) {
            return Err(invalid("puf.tolerance", "must lie in [0, 1]"));
        }
        if self.identity.charging_station_power_kw <= 0.0 {
            return Err(invalid(
                "identity.charging_station_power_kw",
                "must be positive",
            ));
        }
        Ok(())
    }
}

fn invalid(field: &str, reason: &str) -> CoreError {
    CoreError::InvalidConfig {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default_config();
        assert!(config.validate().is_ok());
        assert_eq!(config.ledger.batch_size, 10);
        assert_eq!(config.sessions.ttl_secs, 3600);
        assert_eq!(config.maintenance.interval_secs, 10);
        assert_eq!(config.anomaly.rejection_threshold, 0.8);
    }

    #[test]
    fn test_zero_batch_size_rejected() {
        let mut config = Config::default();
        config.ledger.batch_size = 0;

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("ledger.batch_size"));
    }

    #[test]
    fn test_oversized_tree_rejected() {
        let mut config = Config::default();
        config.crypto.entity_tree_height = 32;
        assert!(config.validate().is_err());
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voltmesh.toml");
        std::fs::write(
            &path,
            "[ledger]\nbatch_size = 4\n\n[sessions]\nttl_secs = 60\n",
        )
        .unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.ledger.batch_size, 4);
        assert_eq!(config.sessions.ttl_secs, 60);
        assert_eq!(config.puf.response_bits, 256);
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_invalid_toml_value_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("voltmesh.toml");
        std::fs::write(&path, "[anomaly]\nconfidence = 1.5\n").unwrap();

        assert!(Config::from_file(&path).is_err());
    }
}
