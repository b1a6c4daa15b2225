//! Entity records for vehicles, charging stations, edge nodes, and service
//! providers.
//!
//! Every entity shares the same identity core (id, hash-based key pair,
//! certificate) and carries a kind-specific state payload. EVs and charging
//! stations are additionally bound to a PUF emulator.

use crate::credential::{Credential, SignedCredential, CROSS_DOMAIN_CREDENTIAL};
use crate::error::{IdentityError, IdentityResult, VerificationFailure};
use crate::pki::Certificate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use voltmesh_core::{PufConfig, Timestamp, MS_PER_SEC};
use voltmesh_crypto::{
    OneTimeSignature, PrivateKey, PublicKey, PufEmulator, SignatureError, SignatureScheme,
};

/// The four participant roles of the charging network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "EV")]
    ElectricVehicle,
    #[serde(rename = "CS")]
    ChargingStation,
    #[serde(rename = "EN")]
    EdgeNode,
    #[serde(rename = "ESP")]
    ServiceProvider,
}

impl EntityKind {
    pub const ALL: [EntityKind; 4] = [
        EntityKind::ElectricVehicle,
        EntityKind::ChargingStation,
        EntityKind::EdgeNode,
        EntityKind::ServiceProvider,
    ];

    /// Short wire code: EV, CS, EN, ESP.
    pub fn code(&self) -> &'static str {
        match self {
            EntityKind::ElectricVehicle => "EV",
            EntityKind::ChargingStation => "CS",
            EntityKind::EdgeNode => "EN",
            EntityKind::ServiceProvider => "ESP",
        }
    }

    /// Physical devices are bound to a PUF.
    pub fn has_device_binding(&self) -> bool {
        matches!(
            self,
            EntityKind::ElectricVehicle | EntityKind::ChargingStation
        )
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for EntityKind {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EntityKind::ALL
            .into_iter()
            .find(|kind| kind.code().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| IdentityError::UnsupportedEntityKind(s.to_string()))
    }
}

/// Charging state of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChargingStatus {
    Idle,
    Charging,
    Discharging,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VehicleState {
    /// Battery level in percent
    pub battery_level: f64,
    pub charging_status: ChargingStatus,
    /// Most recent cross-domain credential
    pub credential: Option<SignedCredential>,
}

impl Default for VehicleState {
    fn default() -> Self {
        Self {
            battery_level: 100.0,
            charging_status: ChargingStatus::Idle,
            credential: None,
        }
    }
}

impl VehicleState {
    pub fn update_battery_level(&mut self, level: f64) -> bool {
        if (0.0..=100.0).contains(&level) {
            self.battery_level = level;
            return true;
        }
        false
    }

    pub fn start_charging(&mut self) -> bool {
        if self.charging_status == ChargingStatus::Idle {
            self.charging_status = ChargingStatus::Charging;
            return true;
        }
        false
    }

    pub fn stop_charging(&mut self) -> bool {
        if self.charging_status == ChargingStatus::Charging {
            self.charging_status = ChargingStatus::Idle;
            return true;
        }
        false
    }
}

/// Power reserved for one plugged-in EV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PowerAllocation {
    pub started_at: Timestamp,
    pub power_kw: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationState {
    pub max_power_kw: f64,
    pub available_power_kw: f64,
    pub connected_evs: Vec<String>,
    pub allocations: HashMap<String, PowerAllocation>,
}

impl StationState {
    pub fn new(max_power_kw: f64) -> Self {
        Self {
            max_power_kw,
            available_power_kw: max_power_kw,
            connected_evs: Vec::new(),
            allocations: HashMap::new(),
        }
    }

    pub fn is_connected(&self, ev_id: &str) -> bool {
        self.connected_evs.iter().any(|id| id == ev_id)
    }

    pub fn connect_ev(&mut self, ev_id: &str) -> bool {
        if self.is_connected(ev_id) {
            return false;
        }
        self.connected_evs.push(ev_id.to_string());
        true
    }

    /// Unplug the EV and release any power it held.
    pub fn disconnect_ev(&mut self, ev_id: &str) -> bool {
        let Some(pos) = self.connected_evs.iter().position(|id| id == ev_id) else {
            return false;
        };
        self.connected_evs.remove(pos);
        if let Some(allocation) = self.allocations.remove(ev_id) {
            self.available_power_kw =
                (self.available_power_kw + allocation.power_kw).min(self.max_power_kw);
        }
        true
    }

    pub fn start_charging_session(
        &mut self,
        ev_id: &str,
        power_kw: f64,
        station_id: &str,
        now: Timestamp,
    ) -> IdentityResult<()> {
        if !self.is_connected(ev_id) {
            return Err(IdentityError::NotConnected {
                ev_id: ev_id.to_string(),
                cs_id: station_id.to_string(),
            });
        }
        if self.allocations.contains_key(ev_id) {
            return Err(IdentityError::AlreadyCharging {
                ev_id: ev_id.to_string(),
            });
        }
        if !(power_kw > 0.0) || power_kw > self.available_power_kw {
            return Err(IdentityError::InsufficientPower {
                requested_kw: power_kw,
                available_kw: self.available_power_kw,
            });
        }

        self.available_power_kw -= power_kw;
        self.allocations.insert(
            ev_id.to_string(),
            PowerAllocation {
                started_at: now,
                power_kw,
            },
        );
        Ok(())
    }

    /// Fraction of nameplate power still unallocated.
    pub fn available_power_fraction(&self) -> f64 {
        if self.max_power_kw <= 0.0 {
            return 0.0;
        }
        (self.available_power_kw / self.max_power_kw).clamp(0.0, 1.0)
    }
}

/// How far back an edge node keeps per-EV connection history.
pub const CONNECTION_LOG_WINDOW_MS: u64 = 86_400 * MS_PER_SEC;

/// One authentication attempt seen by an edge node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionLogEntry {
    pub cs_id: String,
    pub timestamp: Timestamp,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeNodeState {
    pub connected_charging_stations: Vec<String>,
    /// Connection attempts per EV, oldest first
    pub connection_logs: HashMap<String, Vec<ConnectionLogEntry>>,
}

impl EdgeNodeState {
    pub fn register_charging_station(&mut self, cs_id: &str) -> bool {
        if self.connected_charging_stations.iter().any(|id| id == cs_id) {
            return false;
        }
        self.connected_charging_stations.push(cs_id.to_string());
        true
    }

    /// Record an attempt and drop the EV's entries older than the window;
    /// returns the EV's log length.
    pub fn log_connection(&mut self, ev_id: &str, cs_id: &str, timestamp: Timestamp) -> usize {
        let log = self.connection_logs.entry(ev_id.to_string()).or_default();
        log.retain(|entry| timestamp.saturating_sub(entry.timestamp) <= CONNECTION_LOG_WINDOW_MS);
        log.push(ConnectionLogEntry {
            cs_id: cs_id.to_string(),
            timestamp,
        });
        log.len()
    }

    pub fn connections(&self, ev_id: &str) -> &[ConnectionLogEntry] {
        self.connection_logs
            .get(ev_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnergyPrices {
    /// Price per kWh bought from the grid
    pub buy: f64,
    /// Price per kWh sold back
    pub sell: f64,
}

impl Default for EnergyPrices {
    fn default() -> Self {
        Self {
            buy: 0.15,
            sell: 0.10,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderState {
    pub edge_nodes: Vec<String>,
    pub energy_prices: EnergyPrices,
}

impl ProviderState {
    pub fn register_edge_node(&mut self, en_id: &str) -> bool {
        if self.edge_nodes.iter().any(|id| id == en_id) {
            return false;
        }
        self.edge_nodes.push(en_id.to_string());
        true
    }

    pub fn update_energy_prices(&mut self, buy: f64, sell: f64) -> bool {
        if buy > 0.0 && sell > 0.0 {
            self.energy_prices = EnergyPrices { buy, sell };
            return true;
        }
        false
    }
}

/// Kind-specific payload of an entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EntityState {
    Vehicle(VehicleState),
    ChargingStation(StationState),
    EdgeNode(EdgeNodeState),
    ServiceProvider(ProviderState),
}

impl EntityState {
    pub fn for_kind(kind: EntityKind, station_power_kw: f64) -> Self {
        match kind {
            EntityKind::ElectricVehicle => EntityState::Vehicle(VehicleState::default()),
            EntityKind::ChargingStation => {
                EntityState::ChargingStation(StationState::new(station_power_kw))
            }
            EntityKind::EdgeNode => EntityState::EdgeNode(EdgeNodeState::default()),
            EntityKind::ServiceProvider => EntityState::ServiceProvider(ProviderState::default()),
        }
    }
}

/// Authentication request body. Field order is the canonical encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticationRequest {
    pub entity_id: String,
    pub kind: EntityKind,
    pub timestamp: Timestamp,
    pub certificate: Certificate,
    /// Verifier-chosen nonce the PUF was challenged with
    pub puf_challenge: Vec<u8>,
    pub puf_response: Vec<u8>,
}

impl AuthenticationRequest {
    pub fn signing_bytes(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedAuthenticationRequest {
    pub request: AuthenticationRequest,
    pub signature: OneTimeSignature,
}

/// A registered participant.
#[derive(Debug)]
pub struct EntityRecord {
    pub id: String,
    pub kind: EntityKind,
    pub public_key: PublicKey,
    pub certificate: Option<Certificate>,
    pub created_at: Timestamp,
    pub state: EntityState,
    scheme: SignatureScheme,
    signing_key: PrivateKey,
    puf: Option<PufEmulator>,
}

impl EntityRecord {
    /// Generate keys (and a PUF for devices) for a new entity.
    ///
    /// Without an explicit id one is derived from the kind and a UUID.
    pub fn new(
        kind: EntityKind,
        id: Option<&str>,
        scheme: SignatureScheme,
        puf_config: &PufConfig,
        station_power_kw: f64,
        now: Timestamp,
    ) -> IdentityResult<Self> {
        let id = match id {
            Some(id) if !id.trim().is_empty() => id.to_string(),
            Some(_) => {
                return Err(IdentityError::InvalidState(
                    "entity id must not be empty".to_string(),
                ))
            }
            None => format!("{}-{}", kind.code(), uuid::Uuid::new_v4()),
        };

        let puf = if kind.has_device_binding() {
            Some(PufEmulator::new(puf_config)?)
        } else {
            None
        };
        let pair = scheme.key_gen();

        Ok(Self {
            id,
            kind,
            public_key: pair.public_key,
            certificate: None,
            created_at: now,
            state: EntityState::for_kind(kind, station_power_kw),
            scheme,
            signing_key: pair.private_key,
            puf,
        })
    }

    pub fn puf(&self) -> Option<&PufEmulator> {
        self.puf.as_ref()
    }

    /// Signatures left before the key must be replaced.
    pub fn remaining_signatures(&self) -> u64 {
        self.signing_key.remaining()
    }

    pub fn sign(&mut self, message: &[u8]) -> Result<OneTimeSignature, SignatureError> {
        self.scheme.sign(message, &mut self.signing_key)
    }

    /// Replace the key pair. The old certificate no longer matches and is
    /// dropped; the caller must obtain a new one.
    pub fn rekey(&mut self) -> PublicKey {
        let pair = self.scheme.key_gen();
        self.public_key = pair.public_key;
        self.signing_key = pair.private_key;
        self.certificate = None;
        self.public_key
    }

    /// Build and sign an authentication request answering `challenge`.
    pub fn create_authentication_request(
        &mut self,
        challenge: &[u8],
        now: Timestamp,
    ) -> IdentityResult<SignedAuthenticationRequest> {
        let certificate = self
            .certificate
            .clone()
            .ok_or(VerificationFailure::CertificateMissing)?;
        let puf_response = self
            .puf
            .as_ref()
            .map(|puf| puf.challenge(challenge))
            .unwrap_or_default();

        let request = AuthenticationRequest {
            entity_id: self.id.clone(),
            kind: self.kind,
            timestamp: now,
            certificate,
            puf_challenge: challenge.to_vec(),
            puf_response,
        };
        let signature = self.sign(&request.signing_bytes()?)?;

        Ok(SignedAuthenticationRequest { request, signature })
    }

    /// Edge nodes sign short-lived credentials for EVs.
    pub fn issue_credential(
        &mut self,
        ev_id: &str,
        validity_ms: u64,
        now: Timestamp,
    ) -> IdentityResult<SignedCredential> {
        if self.kind != EntityKind::EdgeNode {
            return Err(IdentityError::InvalidState(format!(
                "{} {} cannot issue credentials",
                self.kind, self.id
            )));
        }

        let credential = Credential {
            credential_id: uuid::Uuid::new_v4().to_string(),
            subject_id: ev_id.to_string(),
            issuer_id: self.id.clone(),
            issued_at: now,
            expiry: now + validity_ms,
            credential_type: CROSS_DOMAIN_CREDENTIAL.to_string(),
        };
        let signature = self.sign(&credential.signing_bytes()?)?;

        Ok(SignedCredential {
            credential,
            signature,
        })
    }

    pub fn as_vehicle(&self) -> Option<&VehicleState> {
        match &self.state {
            EntityState::Vehicle(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_vehicle_mut(&mut self) -> Option<&mut VehicleState> {
        match &mut self.state {
            EntityState::Vehicle(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_station(&self) -> Option<&StationState> {
        match &self.state {
            EntityState::ChargingStation(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_station_mut(&mut self) -> Option<&mut StationState> {
        match &mut self.state {
            EntityState::ChargingStation(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_edge_node(&self) -> Option<&EdgeNodeState> {
        match &self.state {
            EntityState::EdgeNode(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_edge_node_mut(&mut self) -> Option<&mut EdgeNodeState> {
        match &mut self.state {
            EntityState::EdgeNode(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_provider(&self) -> Option<&ProviderState> {
        match &self.state {
            EntityState::ServiceProvider(state) => Some(state),
            _ => None,
        }
    }

    pub fn as_provider_mut(&mut self) -> Option<&mut ProviderState> {
        match &mut self.state {
            EntityState::ServiceProvider(state) => Some(state),
            _ => None,
        }
    }
}
