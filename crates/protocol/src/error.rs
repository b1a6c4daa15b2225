//! Error types for protocol operations.
//!
//! Every failure carries a machine-checkable [`ErrorKind`] and a
//! human-readable reason through `Display`.

use crate::session::SessionState;
use thiserror::Error;
use voltmesh_core::CoreError;
use voltmesh_crypto::SignatureError;
use voltmesh_federated::{AggregationError, ModelError};
use voltmesh_identity::{EntityKind, IdentityError, VerificationFailure};
use voltmesh_ledger::LedgerError;

/// Coarse classification callers can branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Entity, session, block, or transaction absent
    NotFound,
    /// Expired certificate, bad signature, insufficient resource, bad input
    Validation,
    /// Anomaly score over the rejection threshold
    PolicyRejection,
    /// Signing key index cap reached
    Exhaustion,
    /// Configuration or environment problem
    Internal,
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Unsupported entity kind: {0}")]
    UnsupportedEntityKind(String),

    #[error("{kind} not found: {id}")]
    EntityNotFound { kind: EntityKind, id: String },

    #[error("Entity already exists: {0}")]
    EntityExists(String),

    #[error("No edge node available")]
    NoEdgeNodeAvailable,

    #[error("Verification failed: {0}")]
    VerificationFailed(VerificationFailure),

    #[error("Authentication rejected: anomaly score {score:.3} exceeds {threshold}")]
    AnomalyRejected { score: f64, threshold: f64 },

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Invalid session transition: {from:?} -> {to:?}")]
    InvalidTransition { from: SessionState, to: SessionState },

    #[error("Signing key exhausted after {capacity} signatures; rekey required")]
    KeyExhausted { capacity: u64 },

    #[error("Insufficient resource: {0}")]
    InsufficientResource(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Maintenance requires a running Tokio runtime")]
    NoRuntime,

    #[error(transparent)]
    Identity(IdentityError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Model(#[from] AggregationError),

    #[error(transparent)]
    Config(#[from] CoreError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;

impl ProtocolError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProtocolError::EntityNotFound { .. }
            | ProtocolError::NoEdgeNodeAvailable
            | ProtocolError::SessionNotFound(_)
            | ProtocolError::Ledger(LedgerError::BlockNotFound(_))
            | ProtocolError::Ledger(LedgerError::TransactionNotFound(_))
            | ProtocolError::Identity(IdentityError::CertificateNotFound { .. })
            | ProtocolError::Model(AggregationError::UnknownEdge(_)) => ErrorKind::NotFound,

            ProtocolError::AnomalyRejected { .. } => ErrorKind::PolicyRejection,

            ProtocolError::KeyExhausted { .. } => ErrorKind::Exhaustion,

            ProtocolError::NoRuntime
            | ProtocolError::Config(_)
            | ProtocolError::Ledger(LedgerError::Serialization(_)) => ErrorKind::Internal,

            _ => ErrorKind::Validation,
        }
    }
}

impl From<IdentityError> for ProtocolError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::UnsupportedEntityKind(kind) => ProtocolError::UnsupportedEntityKind(kind),
            IdentityError::EntityNotFound { kind, id } => ProtocolError::EntityNotFound { kind, id },
            IdentityError::EntityExists { id } => ProtocolError::EntityExists(id),
            IdentityError::Verification(failure) => ProtocolError::VerificationFailed(failure),
            IdentityError::Signature(err) => err.into(),
            IdentityError::InsufficientPower {
                requested_kw,
                available_kw,
            } => ProtocolError::InsufficientResource(format!(
                "requested {} kW, {} kW available",
                requested_kw, available_kw
            )),
            other => ProtocolError::Identity(other),
        }
    }
}

impl From<SignatureError> for ProtocolError {
    fn from(err: SignatureError) -> Self {
        match err {
            SignatureError::KeyExhausted { capacity } => ProtocolError::KeyExhausted { capacity },
            other => ProtocolError::Identity(IdentityError::Signature(other)),
        }
    }
}

impl From<VerificationFailure> for ProtocolError {
    fn from(failure: VerificationFailure) -> Self {
        ProtocolError::VerificationFailed(failure)
    }
}

impl From<ModelError> for ProtocolError {
    fn from(err: ModelError) -> Self {
        ProtocolError::Model(AggregationError::Model(err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_errors_are_flattened() {
        let err: ProtocolError = IdentityError::EntityNotFound {
            kind: EntityKind::ElectricVehicle,
            id: "EV-9".to_string(),
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert_eq!(err.to_string(), "EV not found: EV-9");

        let err: ProtocolError =
            IdentityError::Signature(SignatureError::KeyExhausted { capacity: 256 }).into();
        assert!(matches!(err, ProtocolError::KeyExhausted { capacity: 256 }));
        assert_eq!(err.kind(), ErrorKind::Exhaustion);
    }

    #[test]
    fn test_kinds() {
        assert_eq!(
            ProtocolError::AnomalyRejected {
                score: 0.93,
                threshold: 0.8
            }
            .kind(),
            ErrorKind::PolicyRejection
        );
        assert_eq!(
            ProtocolError::VerificationFailed(VerificationFailure::CertificateExpired).kind(),
            ErrorKind::Validation
        );
        assert_eq!(
            ProtocolError::from(LedgerError::BlockNotFound(4)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            ProtocolError::from(ModelError::EmptyTrainingSet).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_rejection_reason_is_readable() {
        let err = ProtocolError::AnomalyRejected {
            score: 1.0,
            threshold: 0.8,
        };
        assert_eq!(
            err.to_string(),
            "Authentication rejected: anomaly score 1.000 exceeds 0.8"
        );
    }
}
