//! VoltMesh protocol orchestration.
//!
//! [`ProtocolOrchestrator`] ties the identity, ledger, and federated-model
//! crates together:
//!
//! - entity registration and certification
//! - intra-domain and cross-domain authentication
//! - charging sessions and their TTL
//! - a background maintenance task that seals ledger batches, aggregates
//!   edge models into the global model, and expires stale sessions
//!
//! # Example
//! ```no_run
//! use voltmesh_identity::EntityKind;
//! use voltmesh_protocol::ProtocolOrchestrator;
//!
//! # fn main() -> voltmesh_protocol::Result<()> {
//! let orchestrator = ProtocolOrchestrator::with_defaults()?;
//! let ev = orchestrator.register_entity(EntityKind::ElectricVehicle, None)?;
//! let cs = orchestrator.register_entity(EntityKind::ChargingStation, None)?;
//!
//! let session = orchestrator.intra_domain_authentication(&ev, &cs)?;
//! orchestrator.end_session(&session.id)?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod maintenance;
pub mod observation;
pub mod orchestrator;
pub mod session;
pub mod status;

pub use error::{ErrorKind, ProtocolError, Result};
pub use observation::usage_observation;
pub use orchestrator::{ProtocolOrchestrator, AUTHORITY_ID};
pub use session::{Session, SessionState};
pub use status::{
    CertificateStatus, EntityCounts, EntityStatus, LedgerStatus, MaintenanceReport,
    ModelTierStatus, ModelUpdate, SystemStatus,
};
