//! Short-lived verifiable credentials for cross-domain authentication.
//!
//! A credential is an authorization token signed by an edge node. It is not
//! an identity proof: the EV still presents its CA certificate when it
//! authenticates, and the credential only shows that an edge node vouched
//! for the EV within the validity window.

use crate::error::VerificationFailure;
use serde::{Deserialize, Serialize};
use voltmesh_core::Timestamp;
use voltmesh_crypto::{OneTimeSignature, PublicKey, SignatureScheme};

/// Credential type issued for roaming authentication.
pub const CROSS_DOMAIN_CREDENTIAL: &str = "cross-domain-auth";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub credential_id: String,
    /// EV the credential was issued to
    pub subject_id: String,
    /// Edge node that signed it
    pub issuer_id: String,
    pub issued_at: Timestamp,
    pub expiry: Timestamp,
    pub credential_type: String,
}

impl Credential {
    pub fn is_expired_at(&self, now: Timestamp) -> bool {
        self.expiry < now
    }

    /// Canonical signing bytes.
    pub fn signing_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedCredential {
    pub credential: Credential,
    pub signature: OneTimeSignature,
}

impl SignedCredential {
    /// Check expiry, subject, then the issuer's signature.
    pub fn verify(
        &self,
        subject_id: &str,
        issuer_key: &PublicKey,
        now: Timestamp,
    ) -> Result<(), VerificationFailure> {
        if self.credential.is_expired_at(now) {
            return Err(VerificationFailure::CredentialExpired);
        }
        if self.credential.subject_id != subject_id {
            return Err(VerificationFailure::CredentialSubjectMismatch);
        }

        let bytes = self
            .credential
            .signing_bytes()
            .map_err(|_| VerificationFailure::InvalidCredentialSignature)?;
        if !SignatureScheme::default().verify(&bytes, &self.signature, issuer_key) {
            return Err(VerificationFailure::InvalidCredentialSignature);
        }
        Ok(())
    }

    /// Short identifier recorded on the audit ledger.
    pub fn fingerprint(&self) -> String {
        self.signature.fingerprint()
    }
}
