//! Read-only status snapshots for dashboards and CLIs.

use serde::{Deserialize, Serialize};
use voltmesh_core::Timestamp;
use voltmesh_identity::{EntityKind, EntityRecord, EntityState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CertificateStatus {
    pub serial: u64,
    pub issuer_id: String,
    pub expiry: Timestamp,
    pub revoked: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityStatus {
    pub id: String,
    pub kind: EntityKind,
    pub public_key: String,
    pub created_at: Timestamp,
    pub certificate: Option<CertificateStatus>,
    pub remaining_signatures: u64,
    pub device_bound: bool,
    pub state: EntityState,
}

impl EntityStatus {
    pub(crate) fn from_record(record: &EntityRecord, revoked: bool) -> Self {
        Self {
            id: record.id.clone(),
            kind: record.kind,
            public_key: record.public_key.to_hex(),
            created_at: record.created_at,
            certificate: record.certificate.as_ref().map(|cert| CertificateStatus {
                serial: cert.serial,
                issuer_id: cert.issuer_id.clone(),
                expiry: cert.expiry,
                revoked,
            }),
            remaining_signatures: record.remaining_signatures(),
            device_bound: record.puf().is_some(),
            state: record.state.clone(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCounts {
    pub electric_vehicles: usize,
    pub charging_stations: usize,
    pub edge_nodes: usize,
    pub service_providers: usize,
}

impl EntityCounts {
    pub fn total(&self) -> usize {
        self.electric_vehicles + self.charging_stations + self.edge_nodes + self.service_providers
    }

    pub fn get(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::ElectricVehicle => self.electric_vehicles,
            EntityKind::ChargingStation => self.charging_stations,
            EntityKind::EdgeNode => self.edge_nodes,
            EntityKind::ServiceProvider => self.service_providers,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerStatus {
    pub blocks: usize,
    pub pending_transactions: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelTierStatus {
    pub global_present: bool,
    pub global_trained: bool,
    pub global_version: u64,
    pub edge_models: usize,
    pub trained_edge_models: usize,
    pub local_models: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemStatus {
    pub entities: EntityCounts,
    pub ledger: LedgerStatus,
    pub active_sessions: usize,
    pub cross_domain_sessions: usize,
    pub models: ModelTierStatus,
    pub authority_remaining_signatures: u64,
    pub maintenance_running: bool,
}

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    pub block_sealed: bool,
    pub global_aggregated: bool,
    pub models_distributed: usize,
    pub sessions_expired: usize,
    /// Steps that failed and were skipped
    pub failed_steps: Vec<String>,
}

/// Result of `update_fl_model`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelUpdate {
    pub en_id: String,
    pub relation_id: String,
    pub local_version: u64,
    pub edge_version: u64,
    pub model_hash: String,
}
