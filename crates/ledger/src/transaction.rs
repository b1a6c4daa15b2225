//! Audit transaction payloads.
//!
//! Each payload serializes with a `type` tag, so a sealed block reads as a
//! list of self-describing records.

use serde::{Deserialize, Serialize};
use voltmesh_core::Timestamp;

/// How an authentication attempt was adjudicated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthenticationMode {
    IntraDomain,
    CrossDomain,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransactionPayload {
    Registration {
        entity_id: String,
        entity_kind: String,
        public_key: String,
        certificate_serial: u64,
    },
    CredentialIssuance {
        credential_id: String,
        ev_id: String,
        en_id: String,
        expiry: Timestamp,
    },
    Authentication {
        mode: AuthenticationMode,
        session_id: String,
        ev_id: String,
        cs_id: String,
        en_id: Option<String>,
    },
    AuthenticationFailure {
        mode: AuthenticationMode,
        ev_id: String,
        cs_id: String,
        en_id: Option<String>,
        reason: String,
        anomaly_score: Option<f64>,
    },
    ChargingStart {
        session_id: String,
        ev_id: String,
        cs_id: String,
        power_kw: f64,
    },
    SessionEnd {
        session_id: String,
        ev_id: String,
        cs_id: String,
        duration_ms: u64,
        /// Ended by the TTL sweep rather than by the caller
        expired: bool,
    },
    FlModelUpdate {
        en_id: String,
        relation_id: Option<String>,
        model_hash: String,
        version: u64,
    },
    Revocation {
        entity_id: String,
    },
    Rekey {
        entity_id: String,
        public_key: String,
        certificate_serial: u64,
    },
}

impl TransactionPayload {
    /// The serialized `type` tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            TransactionPayload::Registration { .. } => "registration",
            TransactionPayload::CredentialIssuance { .. } => "credential_issuance",
            TransactionPayload::Authentication { .. } => "authentication",
            TransactionPayload::AuthenticationFailure { .. } => "authentication_failure",
            TransactionPayload::ChargingStart { .. } => "charging_start",
            TransactionPayload::SessionEnd { .. } => "session_end",
            TransactionPayload::FlModelUpdate { .. } => "fl_model_update",
            TransactionPayload::Revocation { .. } => "revocation",
            TransactionPayload::Rekey { .. } => "rekey",
        }
    }
}

/// A payload queued for (or sealed into) a block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingTransaction {
    pub id: String,
    pub timestamp: Timestamp,
    pub payload: TransactionPayload,
}

impl PendingTransaction {
    pub fn new(payload: TransactionPayload, timestamp: Timestamp) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            timestamp,
            payload,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_type_tag() {
        let payload = TransactionPayload::AuthenticationFailure {
            mode: AuthenticationMode::CrossDomain,
            ev_id: "EV-1".to_string(),
            cs_id: "CS-1".to_string(),
            en_id: Some("EN-1".to_string()),
            reason: "anomaly".to_string(),
            anomaly_score: Some(0.93),
        };

        let value = serde_json::to_value(&payload).unwrap();

        assert_eq!(value["type"], payload.type_name());
        assert_eq!(value["mode"], "cross_domain");
        assert_eq!(value["anomaly_score"], 0.93);
    }

    #[test]
    fn test_transaction_ids_unique() {
        let payload = TransactionPayload::Revocation {
            entity_id: "EV-1".to_string(),
        };
        let a = PendingTransaction::new(payload.clone(), 1);
        let b = PendingTransaction::new(payload, 1);

        assert_ne!(a.id, b.id);
    }
}
