//! Physically Unclonable Function emulator
//!
//! Models a device fingerprint as a secret byte array fixed at construction.
//! A challenge is mapped to a response by
//!
//! 1. hashing the challenge and using the digest bytes as indices into the
//!    secret,
//! 2. hashing the gathered secret bytes,
//! 3. expanding that hash through the BLAKE3 XOF to `response_bits`, and
//! 4. flipping each bit independently with probability `noise_factor`.
//!
//! Verification compares against the noise-free response and accepts when
//! the fraction of matching bits reaches the tolerance.

use blake3::Hasher;
use rand::{Rng, RngCore};
use std::fmt;
use thiserror::Error;
use voltmesh_core::PufConfig;
use zeroize::Zeroize;

/// Default fraction of matching bits required by `verify`.
pub const DEFAULT_TOLERANCE: f64 = 0.9;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum PufError {
    #[error("PUF secret must not be empty")]
    EmptySecret,

    #[error("PUF response length must be positive")]
    EmptyResponse,

    #[error("Invalid noise factor {0} (must lie in [0, 0.5))")]
    InvalidNoise(f64),
}

pub struct PufEmulator {
    secret: Vec<u8>,
    response_bits: usize,
    noise_factor: f64,
}

impl PufEmulator {
    /// Create an emulator with a freshly drawn secret.
    pub fn new(config: &PufConfig) -> Result<Self, PufError> {
        let mut secret = vec![0u8; config.secret_len];
        rand::thread_rng().fill_bytes(&mut secret);
        Self::with_secret(secret, config.response_bits, config.noise_factor)
    }

    /// Create an emulator from a known secret (enrollment replay, tests).
    pub fn with_secret(
        secret: Vec<u8>,
        response_bits: usize,
        noise_factor: f64,
    ) -> Result<Self, PufError> {
        if secret.is_empty() {
            return Err(PufError::EmptySecret);
        }
        if response_bits == 0 {
            return Err(PufError::EmptyResponse);
        }
        if !(0.0..0.5).contains(&noise_factor) {
            return Err(PufError::InvalidNoise(noise_factor));
        }
        Ok(Self {
            secret,
            response_bits,
            noise_factor,
        })
    }

    pub fn response_bits(&self) -> usize {
        self.response_bits
    }

    pub fn noise_factor(&self) -> f64 {
        self.noise_factor
    }

    /// Noisy response, as read from the device.
    pub fn challenge(&self, input: &[u8]) -> Vec<u8> {
        self.challenge_with_rng(input, &mut rand::thread_rng())
    }

    /// Noisy response drawing bit flips from `rng`.
    pub fn challenge_with_rng<R: Rng + ?Sized>(&self, input: &[u8], rng: &mut R) -> Vec<u8> {
        let mut response = self.reference_response(input);
        if self.noise_factor > 0.0 {
            for bit in 0..self.response_bits {
                if rng.gen_bool(self.noise_factor) {
                    response[bit / 8] ^= 0x80 >> (bit % 8);
                }
            }
        }
        response
    }

    /// Noise-free response for `input`, packed MSB first.
    pub fn reference_response(&self, input: &[u8]) -> Vec<u8> {
        let challenge_hash = blake3::hash(input);
        let gathered: Vec<u8> = challenge_hash
            .as_bytes()
            .iter()
            .map(|&b| self.secret[b as usize % self.secret.len()])
            .collect();

        let mut hasher = Hasher::new();
        hasher.update(&gathered);
        let mut response = vec![0u8; self.response_bits.div_ceil(8)];
        hasher.finalize_xof().fill(&mut response);

        // Clear padding bits beyond the configured length
        let spare = response.len() * 8 - self.response_bits;
        if spare > 0 {
            if let Some(last) = response.last_mut() {
                *last &= 0xFFu8 << spare;
            }
        }
        response
    }

    /// Fraction of the first `response_bits` bits of `response` that match
    /// the reference. Missing bits count as mismatches.
    pub fn match_ratio(&self, challenge: &[u8], response: &[u8]) -> f64 {
        let expected = self.reference_response(challenge);
        let matching = (0..self.response_bits)
            .filter(|&bit| {
                let byte = bit / 8;
                let mask = 0x80u8 >> (bit % 8);
                match response.get(byte) {
                    Some(actual) => (actual & mask) == (expected[byte] & mask),
                    None => false,
                }
            })
            .count();
        matching as f64 / self.response_bits as f64
    }

    /// Accept `response` if at least `tolerance` of its bits match.
    pub fn verify(&self, challenge: &[u8], response: &[u8], tolerance: f64) -> bool {
        self.match_ratio(challenge, response) >= tolerance
    }
}

impl fmt::Debug for PufEmulator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PufEmulator")
            .field("secret_len", &self.secret.len())
            .field("response_bits", &self.response_bits)
            .field("noise_factor", &self.noise_factor)
            .finish()
    }
}

impl Drop for PufEmulator {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}
