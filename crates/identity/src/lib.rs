//! Identity management and authentication for the VoltMesh charging network.
//!
//! This crate provides the certificate authority, entity records for every
//! participant kind, cross-domain credentials, and verification of signed
//! authentication requests.
//!
//! # Core Concepts
//!
//! - **Entity**: an EV, charging station, edge node, or energy service
//!   provider with its own hash-based key pair
//! - **Certificate**: CA-signed binding of an entity id to its public key
//! - **Credential**: short-lived token an edge node signs for a roaming EV
//! - **Device binding**: EVs and charging stations answer PUF challenges
//!
//! # Security Model
//!
//! Certificates, credentials, and requests are verified from public material
//! only. Every signature consumes a one-time leaf of the signer's key.

pub mod auth;
pub mod credential;
pub mod entity;
pub mod error;
pub mod pki;
pub mod registry;

pub use auth::RequestVerifier;
pub use credential::{Credential, SignedCredential, CROSS_DOMAIN_CREDENTIAL};
pub use entity::{
    AuthenticationRequest, ChargingStatus, ConnectionLogEntry, CONNECTION_LOG_WINDOW_MS, EdgeNodeState, EnergyPrices,
    EntityKind, EntityRecord, EntityState, PowerAllocation, ProviderState,
    SignedAuthenticationRequest, StationState, VehicleState,
};
pub use error::{IdentityError, IdentityResult, VerificationFailure};
pub use pki::{Certificate, CertificateAuthority};
pub use registry::EntityRegistry;
