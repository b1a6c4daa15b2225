//! Error types for VoltMesh identity operations.
//!
//! This module provides error handling for certificate management,
//! credential issuance, entity bookkeeping, and request verification.

use crate::entity::EntityKind;
use thiserror::Error;
use voltmesh_crypto::{PufError, SignatureError};

/// Why a certificate, credential, or authentication request was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum VerificationFailure {
    #[error("expired")]
    CertificateExpired,

    #[error("invalid signature")]
    InvalidCertificateSignature,

    #[error("revoked")]
    CertificateRevoked,

    #[error("unknown issuer")]
    UnknownIssuer,

    #[error("certificate missing")]
    CertificateMissing,

    #[error("certificate subject does not match requester")]
    SubjectMismatch,

    #[error("request timestamp outside allowed skew")]
    StaleRequest,

    #[error("request signature invalid")]
    InvalidRequestSignature,

    #[error("device binding (PUF) check failed")]
    DeviceBindingFailed,

    #[error("credential expired")]
    CredentialExpired,

    #[error("credential signature invalid")]
    InvalidCredentialSignature,

    #[error("credential issued to a different subject")]
    CredentialSubjectMismatch,
}

/// Errors that can occur in identity operations.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Entity kind string not one of EV, CS, EN, ESP
    #[error("Unsupported entity kind: {0}")]
    UnsupportedEntityKind(String),

    /// Entity not registered
    #[error("{kind} not found: {id}")]
    EntityNotFound { kind: EntityKind, id: String },

    /// Entity id already taken
    #[error("Entity already exists: {id}")]
    EntityExists { id: String },

    /// No certificate was ever issued to the subject
    #[error("Certificate not found for subject: {subject_id}")]
    CertificateNotFound { subject_id: String },

    /// Certificate Authority refused the operation
    #[error("CA error: {0}")]
    CertificateAuthority(String),

    /// Verification of a certificate, credential, or request failed
    #[error("Verification failed: {0}")]
    Verification(#[from] VerificationFailure),

    /// Signing key problems, including exhaustion
    #[error("Signature error: {0}")]
    Signature(#[from] SignatureError),

    /// Device binding setup errors
    #[error("PUF error: {0}")]
    Puf(#[from] PufError),

    /// Charging operation on an EV that is not plugged in
    #[error("EV {ev_id} is not connected to {cs_id}")]
    NotConnected { ev_id: String, cs_id: String },

    /// EV already holds a power allocation at this station
    #[error("EV {ev_id} already has an active charging session")]
    AlreadyCharging { ev_id: String },

    /// Station cannot satisfy the requested power
    #[error("Insufficient power: requested {requested_kw} kW, available {available_kw} kW")]
    InsufficientPower { requested_kw: f64, available_kw: f64 },

    /// Operation not valid for the entity's current state or kind
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for identity operations.
pub type IdentityResult<T> = Result<T, IdentityError>;
