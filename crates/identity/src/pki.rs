//! Public Key Infrastructure (PKI) for VoltMesh identity management.
//!
//! The certificate authority binds entity ids to hash-based public keys.
//! It signs with its own one-time signature tree, so every issued
//! certificate consumes one leaf of the authority key.

use crate::error::{IdentityError, IdentityResult, VerificationFailure};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};
use voltmesh_core::{current_timestamp_ms, Timestamp, MS_PER_SEC};
use voltmesh_crypto::{OneTimeSignature, PrivateKey, PublicKey, SignatureScheme};

/// Identity certificate for a registered entity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Certificate {
    /// Certificate serial number
    pub serial: u64,
    /// Subject (entity being certified)
    pub subject_id: String,
    /// Subject's hash-based public key
    pub subject_public_key: PublicKey,
    /// Issuer (certificate authority)
    pub issuer_id: String,
    /// Issuance time (Unix milliseconds)
    pub issued_at: Timestamp,
    /// Not valid after (Unix milliseconds)
    pub expiry: Timestamp,
    /// Authority signature over the body
    pub signature: OneTimeSignature,
}

/// Signed portion of a certificate. Field order is the canonical encoding.
#[derive(Serialize)]
struct CertificateBody<'a> {
    serial: u64,
    subject_id: &'a str,
    subject_public_key: &'a PublicKey,
    issuer_id: &'a str,
    issued_at: Timestamp,
    expiry: Timestamp,
}

impl Certificate {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expiry < now
    }

    fn body_bytes(&self) -> IdentityResult<Vec<u8>> {
        encode_body(&CertificateBody {
            serial: self.serial,
            subject_id: &self.subject_id,
            subject_public_key: &self.subject_public_key,
            issuer_id: &self.issuer_id,
            issued_at: self.issued_at,
            expiry: self.expiry,
        })
    }
}

fn encode_body(body: &CertificateBody<'_>) -> IdentityResult<Vec<u8>> {
    Ok(serde_json::to_vec(body)?)
}

/// Certificate Authority managing certificate lifecycle.
#[derive(Debug)]
pub struct CertificateAuthority {
    /// CA identity
    ca_id: String,
    scheme: SignatureScheme,
    /// CA public key
    public_key: PublicKey,
    /// CA signing key
    private_key: PrivateKey,
    /// Active certificate per subject; re-issue overwrites
    certificates: HashMap<String, Certificate>,
    /// Revoked subjects
    revoked: HashSet<String>,
    /// Next serial number
    next_serial: u64,
    /// Validity applied when the caller gives no expiry
    default_validity_ms: u64,
}

impl CertificateAuthority {
    /// Create a new certificate authority with a fresh signing tree.
    pub fn new(
        ca_id: impl Into<String>,
        scheme: SignatureScheme,
        default_validity_secs: u64,
    ) -> Self {
        let pair = scheme.key_gen();
        let ca_id = ca_id.into();
        info!(
            ca_id = %ca_id,
            capacity = pair.public_key.capacity(),
            "Certificate authority initialized"
        );

        Self {
            ca_id,
            scheme,
            public_key: pair.public_key,
            private_key: pair.private_key,
            certificates: HashMap::new(),
            revoked: HashSet::new(),
            next_serial: 1,
            default_validity_ms: default_validity_secs * MS_PER_SEC,
        }
    }

    pub fn ca_id(&self) -> &str {
        &self.ca_id
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// Signatures the authority can still produce.
    pub fn remaining_signatures(&self) -> u64 {
        self.private_key.remaining()
    }

    /// Issue (or re-issue) the certificate for `subject_id`.
    ///
    /// `expiry` defaults to now plus the configured validity.
    pub fn issue_certificate(
        &mut self,
        subject_id: &str,
        subject_public_key: PublicKey,
        expiry: Option<Timestamp>,
    ) -> IdentityResult<Certificate> {
        if self.revoked.contains(subject_id) {
            return Err(IdentityError::CertificateAuthority(format!(
                "subject {} is revoked",
                subject_id
            )));
        }

        let now = current_timestamp_ms();
        let serial = self.next_serial;
        let expiry = expiry.unwrap_or(now + self.default_validity_ms);

        let body = encode_body(&CertificateBody {
            serial,
            subject_id,
            subject_public_key: &subject_public_key,
            issuer_id: &self.ca_id,
            issued_at: now,
            expiry,
        })?;
        let signature = self.scheme.sign(&body, &mut self.private_key)?;
        self.next_serial += 1;

        let cert = Certificate {
            serial,
            subject_id: subject_id.to_string(),
            subject_public_key,
            issuer_id: self.ca_id.clone(),
            issued_at: now,
            expiry,
            signature,
        };

        if self
            .certificates
            .insert(subject_id.to_string(), cert.clone())
            .is_some()
        {
            debug!(subject_id, serial, "Certificate re-issued");
        }
        Ok(cert)
    }

    /// Verify a certificate at the current time.
    pub fn verify_certificate(&self, cert: &Certificate) -> Result<(), VerificationFailure> {
        self.verify_certificate_at(cert, current_timestamp_ms())
    }

    /// Verify a certificate: expiry, then issuer and signature, then revocation.
    pub fn verify_certificate_at(
        &self,
        cert: &Certificate,
        now: Timestamp,
    ) -> Result<(), VerificationFailure> {
        if cert.is_expired_at(now) {
            return Err(VerificationFailure::CertificateExpired);
        }

        if cert.issuer_id != self.ca_id {
            return Err(VerificationFailure::UnknownIssuer);
        }

        let body = cert
            .body_bytes()
            .map_err(|_| VerificationFailure::InvalidCertificateSignature)?;
        if !self.scheme.verify(&body, &cert.signature, &self.public_key) {
            return Err(VerificationFailure::InvalidCertificateSignature);
        }

        if self.revoked.contains(&cert.subject_id) {
            return Err(VerificationFailure::CertificateRevoked);
        }

        Ok(())
    }

    /// Revoke the subject. The certificate stays on record.
    pub fn revoke_certificate(&mut self, subject_id: &str) -> IdentityResult<()> {
        if !self.certificates.contains_key(subject_id) {
            return Err(IdentityError::CertificateNotFound {
                subject_id: subject_id.to_string(),
            });
        }

        self.revoked.insert(subject_id.to_string());
        info!(subject_id, "Certificate revoked");
        Ok(())
    }

    /// Check if a subject is revoked.
    pub fn is_revoked(&self, subject_id: &str) -> bool {
        self.revoked.contains(subject_id)
    }

    /// Get the active certificate for a subject.
    pub fn get_certificate(&self, subject_id: &str) -> Option<&Certificate> {
        self.certificates.get(subject_id)
    }

    /// List all issued certificates.
    pub fn list_certificates(&self) -> Vec<&Certificate> {
        self.certificates.values().collect()
    }
}
