//! Verification of signed authentication requests.
//!
//! A charging station checks, in order: certificate present and bound to the
//! requester, CA verification, freshness, the request signature under the
//! certified key, and finally the device binding.

use crate::entity::SignedAuthenticationRequest;
use crate::error::VerificationFailure;
use crate::pki::CertificateAuthority;
use tracing::debug;
use voltmesh_core::Timestamp;
use voltmesh_crypto::{PufEmulator, SignatureScheme};

/// Everything a verifier needs besides the request itself.
#[derive(Debug)]
pub struct RequestVerifier<'a> {
    pub authority: &'a CertificateAuthority,
    /// Enrolled PUF of the requester; `None` for entities without one
    pub device: Option<&'a PufEmulator>,
    /// Nonce the verifier handed out
    pub expected_challenge: &'a [u8],
    pub puf_tolerance: f64,
    pub max_skew_ms: u64,
    pub now: Timestamp,
}

impl RequestVerifier<'_> {
    pub fn verify(&self, signed: &SignedAuthenticationRequest) -> Result<(), VerificationFailure> {
        let request = &signed.request;
        let cert = &request.certificate;

        if cert.subject_id != request.entity_id {
            return Err(VerificationFailure::SubjectMismatch);
        }
        self.authority.verify_certificate_at(cert, self.now)?;

        if request.timestamp.abs_diff(self.now) > self.max_skew_ms {
            return Err(VerificationFailure::StaleRequest);
        }

        let bytes = request
            .signing_bytes()
            .map_err(|_| VerificationFailure::InvalidRequestSignature)?;
        if !SignatureScheme::default().verify(&bytes, &signed.signature, &cert.subject_public_key)
        {
            return Err(VerificationFailure::InvalidRequestSignature);
        }

        if let Some(device) = self.device {
            if request.puf_challenge != self.expected_challenge
                || !device.verify(
                    &request.puf_challenge,
                    &request.puf_response,
                    self.puf_tolerance,
                )
            {
                return Err(VerificationFailure::DeviceBindingFailed);
            }
        }

        debug!(entity_id = %request.entity_id, "Authentication request verified");
        Ok(())
    }
}
