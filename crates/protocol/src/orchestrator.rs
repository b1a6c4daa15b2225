//! Protocol orchestrator: registration, credentials, authentication flows,
//! and session lifecycle.
//!
//! # Locking
//!
//! Shared state sits behind per-structure `parking_lot` mutexes. When more
//! than one is held they are always acquired in this order:
//!
//! 1. registry
//! 2. authority
//! 3. sessions
//! 4. models
//! 5. ledger
//!
//! The maintenance slot is never held together with any of them.

use crate::error::{ProtocolError, Result};
use crate::maintenance::MaintenanceHandle;
use crate::observation::usage_observation;
use crate::session::{Session, SessionState};
use crate::status::{
    EntityCounts, EntityStatus, LedgerStatus, ModelTierStatus, ModelUpdate, SystemStatus,
};
use parking_lot::Mutex;
use rand::RngCore;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};
use voltmesh_core::{current_timestamp_ms, Config, Timestamp, MS_PER_SEC};
use voltmesh_crypto::{PublicKey, SignatureScheme};
use voltmesh_federated::{HierarchicalAggregator, UsageRecord};
use voltmesh_identity::{
    CertificateAuthority, EntityKind, EntityRecord, EntityRegistry, RequestVerifier,
    SignedCredential, StationState, VerificationFailure,
};
use voltmesh_ledger::{
    AuditLedger, AuthenticationMode, LedgerBlock, PendingTransaction, TransactionPayload,
};

/// Identity of the orchestrator's certificate authority.
pub const AUTHORITY_ID: &str = "voltmesh-ca";

/// Length of the nonce a charging station challenges a PUF with.
const CHALLENGE_LEN: usize = 16;

pub(crate) struct Inner {
    pub(crate) config: Config,
    entity_scheme: SignatureScheme,
    registry: Mutex<EntityRegistry>,
    authority: Mutex<CertificateAuthority>,
    pub(crate) sessions: Mutex<HashMap<String, Session>>,
    pub(crate) models: Mutex<HierarchicalAggregator>,
    pub(crate) ledger: Mutex<AuditLedger>,
    pub(crate) maintenance: Mutex<Option<MaintenanceHandle>>,
}

impl Inner {
    pub(crate) fn record(&self, payload: TransactionPayload) -> Result<String> {
        Ok(self.ledger.lock().add_transaction(payload)?)
    }
}

/// Entry point for every protocol operation.
///
/// Cloning is cheap and yields a handle to the same orchestrator.
#[derive(Clone)]
pub struct ProtocolOrchestrator {
    pub(crate) inner: Arc<Inner>,
}

impl ProtocolOrchestrator {
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let entity_scheme = SignatureScheme::new(config.crypto.entity_tree_height)?;
        let authority_scheme = SignatureScheme::new(config.crypto.authority_tree_height)?;

        let authority = CertificateAuthority::new(
            AUTHORITY_ID,
            authority_scheme,
            config.identity.certificate_validity_secs,
        );
        let mut models = HierarchicalAggregator::new(config.anomaly.clone());
        models.initialize_global();
        let ledger = AuditLedger::new(config.ledger.batch_size);

        info!(
            batch_size = config.ledger.batch_size,
            session_ttl_secs = config.sessions.ttl_secs,
            "Protocol orchestrator initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                entity_scheme,
                registry: Mutex::new(EntityRegistry::new()),
                authority: Mutex::new(authority),
                sessions: Mutex::new(HashMap::new()),
                models: Mutex::new(models),
                ledger: Mutex::new(ledger),
                maintenance: Mutex::new(None),
            }),
        })
    }

    pub fn with_defaults() -> Result<Self> {
        Self::new(Config::default())
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    // Registration

    /// Create an entity, certify it, and record the registration.
    ///
    /// Edge nodes also get an edge-tier anomaly model.
    pub fn register_entity(&self, kind: EntityKind, id: Option<&str>) -> Result<String> {
        let inner = &self.inner;
        if let Some(id) = id {
            if inner.registry.lock().contains(id) {
                return Err(ProtocolError::EntityExists(id.to_string()));
            }
        }

        // Key generation happens outside any lock
        let now = current_timestamp_ms();
        let mut record = EntityRecord::new(
            kind,
            id,
            inner.entity_scheme,
            &inner.config.puf,
            inner.config.identity.charging_station_power_kw,
            now,
        )?;

        let mut registry = inner.registry.lock();
        if registry.contains(&record.id) {
            return Err(ProtocolError::EntityExists(record.id.clone()));
        }
        let certificate = inner
            .authority
            .lock()
            .issue_certificate(&record.id, record.public_key, None)?;
        let certificate_serial = certificate.serial;
        record.certificate = Some(certificate);

        let entity_id = record.id.clone();
        let public_key = record.public_key.to_hex();
        registry.insert(record)?;

        if kind == EntityKind::EdgeNode {
            inner.models.lock().initialize_edge(&entity_id);
        }
        inner.record(TransactionPayload::Registration {
            entity_id: entity_id.clone(),
            entity_kind: kind.to_string(),
            public_key,
            certificate_serial,
        })?;

        info!(entity_id = %entity_id, kind = %kind, "Entity registered");
        Ok(entity_id)
    }

    /// Like [`register_entity`](Self::register_entity) with the kind given as
    /// its code (`EV`, `CS`, `EN`, `ESP`).
    pub fn register_entity_by_code(&self, kind: &str, id: Option<&str>) -> Result<String> {
        let kind: EntityKind = kind.parse()?;
        self.register_entity(kind, id)
    }

    /// Attach a charging station to an edge node.
    pub fn register_charging_station(&self, en_id: &str, cs_id: &str) -> Result<bool> {
        let mut registry = self.inner.registry.lock();
        registry.get(EntityKind::ChargingStation, cs_id)?;
        let added = registry
            .get_mut(EntityKind::EdgeNode, en_id)?
            .as_edge_node_mut()
            .map_or(false, |edge| edge.register_charging_station(cs_id));
        if added {
            self.inner.models.lock().initialize_local(en_id, cs_id);
            debug!(en_id, cs_id, "Charging station attached to edge node");
        }
        Ok(added)
    }

    /// Attach an edge node to a service provider.
    pub fn register_edge_node(&self, esp_id: &str, en_id: &str) -> Result<bool> {
        let mut registry = self.inner.registry.lock();
        registry.get(EntityKind::EdgeNode, en_id)?;
        Ok(registry
            .get_mut(EntityKind::ServiceProvider, esp_id)?
            .as_provider_mut()
            .map_or(false, |provider| provider.register_edge_node(en_id)))
    }

    pub fn update_energy_prices(&self, esp_id: &str, buy: f64, sell: f64) -> Result<()> {
        let mut registry = self.inner.registry.lock();
        let updated = registry
            .get_mut(EntityKind::ServiceProvider, esp_id)?
            .as_provider_mut()
            .map_or(false, |provider| provider.update_energy_prices(buy, sell));
        if !updated {
            return Err(ProtocolError::InvalidArgument(format!(
                "energy prices must be positive (buy {}, sell {})",
                buy, sell
            )));
        }
        Ok(())
    }

    /// Revoke an entity's certificate and end its active sessions.
    pub fn revoke_entity(&self, kind: EntityKind, id: &str) -> Result<()> {
        let now = current_timestamp_ms();
        let mut registry = self.inner.registry.lock();
        registry.get(kind, id)?;
        self.inner.authority.lock().revoke_certificate(id)?;

        let affected: Vec<Session> = {
            let mut sessions = self.inner.sessions.lock();
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.ev_id == id || s.cs_id == id)
                .map(|s| s.id.clone())
                .collect();
            ids.iter().filter_map(|sid| sessions.remove(sid)).collect()
        };
        for session in affected {
            self.close_session(&mut registry, session, SessionState::Ended, now)?;
        }

        self.inner.record(TransactionPayload::Revocation {
            entity_id: id.to_string(),
        })?;
        warn!(entity_id = id, kind = %kind, "Entity revoked");
        Ok(())
    }

    /// Replace an entity's key pair and re-certify it.
    pub fn rekey_entity(&self, kind: EntityKind, id: &str) -> Result<PublicKey> {
        let mut registry = self.inner.registry.lock();
        let record = registry.get_mut(kind, id)?;
        let mut authority = self.inner.authority.lock();
        if authority.is_revoked(id) {
            return Err(VerificationFailure::CertificateRevoked.into());
        }

        let public_key = record.rekey();
        let certificate = authority.issue_certificate(id, public_key, None)?;
        let certificate_serial = certificate.serial;
        record.certificate = Some(certificate);
        drop(authority);

        self.inner.record(TransactionPayload::Rekey {
            entity_id: id.to_string(),
            public_key: public_key.to_hex(),
            certificate_serial,
        })?;
        info!(entity_id = id, kind = %kind, "Entity rekeyed");
        Ok(public_key)
    }

    // Credentials

    /// Have an edge node sign a cross-domain credential for an EV.
    ///
    /// Without `en_id` the first registered edge node whose certificate is
    /// still valid issues it. A revoked or expired issuer is refused.
    pub fn issue_verifiable_credential(
        &self,
        ev_id: &str,
        en_id: Option<&str>,
    ) -> Result<SignedCredential> {
        let now = current_timestamp_ms();
        let mut registry = self.inner.registry.lock();
        registry.get(EntityKind::ElectricVehicle, ev_id)?;
        let en_id = resolve_edge_node(&registry, &self.inner.authority.lock(), en_id, now)?;
        self.issue_credential_locked(&mut registry, ev_id, &en_id, now)
    }

    fn issue_credential_locked(
        &self,
        registry: &mut EntityRegistry,
        ev_id: &str,
        en_id: &str,
        now: Timestamp,
    ) -> Result<SignedCredential> {
        self.check_certified(registry, &[(EntityKind::EdgeNode, en_id)], now)?;
        let validity_ms = self.inner.config.identity.credential_validity_secs * MS_PER_SEC;
        let credential = registry
            .get_mut(EntityKind::EdgeNode, en_id)?
            .issue_credential(ev_id, validity_ms, now)?;

        if let Some(vehicle) = registry
            .get_mut(EntityKind::ElectricVehicle, ev_id)?
            .as_vehicle_mut()
        {
            vehicle.credential = Some(credential.clone());
        }

        self.inner.record(TransactionPayload::CredentialIssuance {
            credential_id: credential.credential.credential_id.clone(),
            ev_id: ev_id.to_string(),
            en_id: en_id.to_string(),
            expiry: credential.credential.expiry,
        })?;
        info!(ev_id, en_id, "Credential issued");
        Ok(credential)
    }

    /// Check a credential against the issuing edge node's certified key.
    pub fn verify_credential(&self, ev_id: &str, credential: &SignedCredential) -> Result<()> {
        let registry = self.inner.registry.lock();
        let authority = self.inner.authority.lock();
        verify_credential_locked(&registry, &authority, ev_id, credential, current_timestamp_ms())
    }

    // Authentication

    /// Authenticate an EV at a charging station of its home domain.
    pub fn intra_domain_authentication(&self, ev_id: &str, cs_id: &str) -> Result<Session> {
        let now = current_timestamp_ms();
        let mut registry = self.inner.registry.lock();
        registry.get(EntityKind::ElectricVehicle, ev_id)?;
        registry.get(EntityKind::ChargingStation, cs_id)?;

        let mut session = Session::new(ev_id, cs_id, None, AuthenticationMode::IntraDomain, now);
        let station = [(EntityKind::ChargingStation, cs_id)];
        if let Err(err) = self.check_certified(&registry, &station, now) {
            return Err(self.reject(&mut session, err, None));
        }
        if let Err(err) = self.authenticate_request(&mut registry, ev_id, now) {
            return Err(self.reject(&mut session, err, None));
        }
        session.transition(SessionState::Verified)?;
        self.activate(&mut registry, session)
    }

    /// Authenticate a roaming EV, adjudicated by an edge node's anomaly model.
    ///
    /// A missing or invalid credential is replaced by a freshly issued one.
    pub fn cross_domain_authentication(
        &self,
        ev_id: &str,
        cs_id: &str,
        en_id: Option<&str>,
    ) -> Result<Session> {
        let now = current_timestamp_ms();
        let mut registry = self.inner.registry.lock();
        registry.get(EntityKind::ElectricVehicle, ev_id)?;
        registry.get(EntityKind::ChargingStation, cs_id)?;
        let en_id = resolve_edge_node(&registry, &self.inner.authority.lock(), en_id, now)?;

        let mut session = Session::new(
            ev_id,
            cs_id,
            Some(en_id.as_str()),
            AuthenticationMode::CrossDomain,
            now,
        );
        let hosts = [
            (EntityKind::ChargingStation, cs_id),
            (EntityKind::EdgeNode, en_id.as_str()),
        ];
        if let Err(err) = self.check_certified(&registry, &hosts, now) {
            return Err(self.reject(&mut session, err, None));
        }

        let held = {
            let authority = self.inner.authority.lock();
            registry
                .get(EntityKind::ElectricVehicle, ev_id)?
                .as_vehicle()
                .and_then(|vehicle| vehicle.credential.clone())
                .filter(|credential| {
                    verify_credential_locked(&registry, &authority, ev_id, credential, now).is_ok()
                })
        };
        let credential = match held {
            Some(credential) => credential,
            None => self.issue_credential_locked(&mut registry, ev_id, &en_id, now)?,
        };
        let verified = {
            let authority = self.inner.authority.lock();
            verify_credential_locked(&registry, &authority, ev_id, &credential, now)
        };
        if let Err(err) = verified {
            return Err(self.reject(&mut session, err, None));
        }

        let score = self.adjudicate(&mut registry, &en_id, ev_id, cs_id, now)?;
        let threshold = self.inner.config.anomaly.rejection_threshold;
        if score > threshold {
            return Err(self.reject(
                &mut session,
                ProtocolError::AnomalyRejected { score, threshold },
                Some(score),
            ));
        }

        if let Err(err) = self.authenticate_request(&mut registry, ev_id, now) {
            return Err(self.reject(&mut session, err, Some(score)));
        }
        session.transition(SessionState::Verified)?;
        self.activate(&mut registry, session)
    }

    /// Fails unless each `(kind, id)` holds a live certificate.
    fn check_certified(
        &self,
        registry: &EntityRegistry,
        entities: &[(EntityKind, &str)],
        now: Timestamp,
    ) -> Result<()> {
        let authority = self.inner.authority.lock();
        for (kind, id) in entities {
            certified_key(registry, &authority, *kind, id, now)?;
        }
        Ok(())
    }

    /// EV signs a request answering a fresh challenge; the station checks it.
    fn authenticate_request(
        &self,
        registry: &mut EntityRegistry,
        ev_id: &str,
        now: Timestamp,
    ) -> Result<()> {
        let mut challenge = [0u8; CHALLENGE_LEN];
        rand::thread_rng().fill_bytes(&mut challenge);

        let signed = registry
            .get_mut(EntityKind::ElectricVehicle, ev_id)?
            .create_authentication_request(&challenge, now)?;

        let ev = registry.get(EntityKind::ElectricVehicle, ev_id)?;
        let authority = self.inner.authority.lock();
        let verifier = RequestVerifier {
            authority: &authority,
            device: ev.puf(),
            expected_challenge: &challenge,
            puf_tolerance: self.inner.config.puf.tolerance,
            max_skew_ms: self.inner.config.identity.max_request_skew_secs * MS_PER_SEC,
            now,
        };
        verifier.verify(&signed)?;
        Ok(())
    }

    /// Log the attempt at the edge node and score it against the edge model.
    fn adjudicate(
        &self,
        registry: &mut EntityRegistry,
        en_id: &str,
        ev_id: &str,
        cs_id: &str,
        now: Timestamp,
    ) -> Result<f64> {
        let observation = {
            let station = station_state(registry, cs_id)?;
            let edge = registry
                .get(EntityKind::EdgeNode, en_id)?
                .as_edge_node()
                .ok_or_else(|| not_found(EntityKind::EdgeNode, en_id))?;
            usage_observation(edge, station, ev_id, cs_id, now)
        };
        if let Some(edge) = registry
            .get_mut(EntityKind::EdgeNode, en_id)?
            .as_edge_node_mut()
        {
            edge.log_connection(ev_id, cs_id, now);
        }

        let score = self
            .inner
            .models
            .lock()
            .edge(en_id)
            .map_or(1.0, |model| model.score(&observation));
        debug!(en_id, ev_id, cs_id, score, "Cross-domain attempt scored");
        Ok(score)
    }

    /// Record a failed attempt and hand the error back.
    fn reject(
        &self,
        session: &mut Session,
        err: ProtocolError,
        anomaly_score: Option<f64>,
    ) -> ProtocolError {
        // Requested and Verified may both move to Rejected
        let _ = session.transition(SessionState::Rejected);
        warn!(
            ev_id = %session.ev_id,
            cs_id = %session.cs_id,
            mode = ?session.kind,
            reason = %err,
            "Authentication rejected"
        );

        let payload = TransactionPayload::AuthenticationFailure {
            mode: session.kind,
            ev_id: session.ev_id.clone(),
            cs_id: session.cs_id.clone(),
            en_id: session.en_id.clone(),
            reason: err.to_string(),
            anomaly_score,
        };
        if let Err(ledger_err) = self.inner.record(payload) {
            warn!(error = %ledger_err, "Failed to record authentication failure");
        }
        err
    }

    /// Plug the EV in, store the session, and record it.
    fn activate(&self, registry: &mut EntityRegistry, mut session: Session) -> Result<Session> {
        if let Some(station) = registry
            .get_mut(EntityKind::ChargingStation, &session.cs_id)?
            .as_station_mut()
        {
            station.connect_ev(&session.ev_id);
        }
        session.transition(SessionState::Active)?;

        self.inner
            .sessions
            .lock()
            .insert(session.id.clone(), session.clone());
        self.inner.record(TransactionPayload::Authentication {
            mode: session.kind,
            session_id: session.id.clone(),
            ev_id: session.ev_id.clone(),
            cs_id: session.cs_id.clone(),
            en_id: session.en_id.clone(),
        })?;

        info!(
            session_id = %session.id,
            ev_id = %session.ev_id,
            cs_id = %session.cs_id,
            mode = ?session.kind,
            "Session started"
        );
        Ok(session)
    }

    // Sessions

    /// Reserve station power for an active session.
    pub fn start_charging(&self, session_id: &str, power_kw: f64) -> Result<()> {
        let now = current_timestamp_ms();
        let mut registry = self.inner.registry.lock();
        let mut sessions = self.inner.sessions.lock();
        let session = sessions
            .get_mut(session_id)
            .filter(|s| s.is_active())
            .ok_or_else(|| ProtocolError::SessionNotFound(session_id.to_string()))?;

        let cs_id = session.cs_id.clone();
        registry
            .get_mut(EntityKind::ChargingStation, &cs_id)?
            .as_station_mut()
            .ok_or_else(|| not_found(EntityKind::ChargingStation, &cs_id))?
            .start_charging_session(&session.ev_id, power_kw, &cs_id, now)?;
        if let Some(vehicle) = registry
            .get_mut(EntityKind::ElectricVehicle, &session.ev_id)?
            .as_vehicle_mut()
        {
            vehicle.start_charging();
        }
        session.power_kw = Some(power_kw);

        let payload = TransactionPayload::ChargingStart {
            session_id: session.id.clone(),
            ev_id: session.ev_id.clone(),
            cs_id,
            power_kw,
        };
        drop(sessions);
        self.inner.record(payload)?;
        Ok(())
    }

    /// End an active session, unplugging the EV and releasing its power.
    pub fn end_session(&self, session_id: &str) -> Result<Session> {
        let now = current_timestamp_ms();
        let mut registry = self.inner.registry.lock();
        let session = self
            .inner
            .sessions
            .lock()
            .remove(session_id)
            .ok_or_else(|| ProtocolError::SessionNotFound(session_id.to_string()))?;
        self.close_session(&mut registry, session, SessionState::Ended, now)
    }

    /// Finish a session already removed from the active map.
    pub(crate) fn close_session(
        &self,
        registry: &mut EntityRegistry,
        mut session: Session,
        state: SessionState,
        now: Timestamp,
    ) -> Result<Session> {
        if let Some(station) = registry
            .find_mut(&session.cs_id)
            .and_then(|record| record.as_station_mut())
        {
            station.disconnect_ev(&session.ev_id);
        }
        if let Some(vehicle) = registry
            .find_mut(&session.ev_id)
            .and_then(|record| record.as_vehicle_mut())
        {
            vehicle.stop_charging();
        }
        session.finish(state, now)?;

        let duration_ms = session.duration_ms(now);
        self.inner.record(TransactionPayload::SessionEnd {
            session_id: session.id.clone(),
            ev_id: session.ev_id.clone(),
            cs_id: session.cs_id.clone(),
            duration_ms,
            expired: state == SessionState::ExpiredEnded,
        })?;
        info!(
            session_id = %session.id,
            duration_ms,
            state = ?state,
            "Session ended"
        );
        Ok(session)
    }

    pub fn active_session(&self, session_id: &str) -> Option<Session> {
        self.inner.sessions.lock().get(session_id).cloned()
    }

    pub fn active_sessions(&self) -> Vec<Session> {
        let mut sessions: Vec<Session> = self.inner.sessions.lock().values().cloned().collect();
        sessions.sort_by_key(|s| s.created_at);
        sessions
    }

    /// Force-end sessions older than the TTL at `now`.
    pub(crate) fn expire_sessions(&self, now: Timestamp) -> usize {
        let ttl_ms = self.inner.config.sessions.ttl_secs * MS_PER_SEC;
        let mut registry = self.inner.registry.lock();
        let expired: Vec<Session> = {
            let mut sessions = self.inner.sessions.lock();
            let ids: Vec<String> = sessions
                .values()
                .filter(|s| s.is_expired_at(now, ttl_ms))
                .map(|s| s.id.clone())
                .collect();
            ids.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        let count = expired.len();
        for session in expired {
            let session_id = session.id.clone();
            if let Err(err) =
                self.close_session(&mut registry, session, SessionState::ExpiredEnded, now)
            {
                warn!(session_id = %session_id, error = %err, "Failed to close expired session");
            }
        }
        count
    }

    // Federated model

    /// Train the local model for (edge node, relation) and fold the edge
    /// node's local models into its edge model.
    ///
    /// The relation is `cs_id` when given, otherwise the edge node itself.
    pub fn update_fl_model(
        &self,
        records: &[UsageRecord],
        en_id: Option<&str>,
        cs_id: Option<&str>,
    ) -> Result<ModelUpdate> {
        let (en_id, relation_id) = {
            let registry = self.inner.registry.lock();
            let authority = self.inner.authority.lock();
            let en_id = resolve_edge_node(&registry, &authority, en_id, current_timestamp_ms())?;
            if let Some(cs_id) = cs_id {
                registry.get(EntityKind::ChargingStation, cs_id)?;
            }
            let relation_id = cs_id.map_or_else(|| en_id.clone(), str::to_string);
            (en_id, relation_id)
        };

        let (local_version, edge) = {
            let mut models = self.inner.models.lock();
            models.initialize_edge(&en_id);
            let local_version = models.train_local(&en_id, &relation_id, records)?;
            (local_version, models.aggregate_local_models(&en_id, None)?)
        };

        let model_hash = edge.model_hash();
        self.inner.record(TransactionPayload::FlModelUpdate {
            en_id: en_id.clone(),
            relation_id: Some(relation_id.clone()),
            model_hash: model_hash.clone(),
            version: edge.version,
        })?;
        info!(
            en_id = %en_id,
            relation_id = %relation_id,
            records = records.len(),
            version = edge.version,
            "Edge model updated"
        );

        Ok(ModelUpdate {
            en_id,
            relation_id,
            local_version,
            edge_version: edge.version,
            model_hash,
        })
    }

    /// Score a usage record against an edge node's model (1.0 if untrained).
    pub fn anomaly_score(&self, en_id: &str, record: &UsageRecord) -> Result<f64> {
        self.inner.registry.lock().get(EntityKind::EdgeNode, en_id)?;
        Ok(self
            .inner
            .models
            .lock()
            .edge(en_id)
            .map_or(1.0, |model| model.score(record)))
    }

    // Ledger

    pub fn ledger_block(&self, index: u64) -> Result<LedgerBlock> {
        Ok(self.inner.ledger.lock().get_block(index)?.clone())
    }

    pub fn ledger_transaction(&self, id: &str) -> Result<PendingTransaction> {
        Ok(self.inner.ledger.lock().get_transaction(id)?.0.clone())
    }

    /// Every recorded transaction, sealed ones first.
    pub fn ledger_transactions(&self) -> Vec<PendingTransaction> {
        self.inner.ledger.lock().transactions().cloned().collect()
    }

    /// Seal pending transactions now. `false` if none were pending.
    pub fn mine_pending_block(&self) -> Result<bool> {
        Ok(self.inner.ledger.lock().mine_block()?)
    }

    pub fn verify_ledger(&self) -> bool {
        self.inner.ledger.lock().verify_chain()
    }

    // Status

    pub fn get_entity_status(&self, kind: EntityKind, id: &str) -> Result<EntityStatus> {
        let registry = self.inner.registry.lock();
        let record = registry.get(kind, id)?;
        let revoked = self.inner.authority.lock().is_revoked(id);
        Ok(EntityStatus::from_record(record, revoked))
    }

    pub fn entity_ids(&self, kind: EntityKind) -> Vec<String> {
        self.inner.registry.lock().ids(kind)
    }

    pub fn get_system_status(&self) -> SystemStatus {
        let entities = {
            let registry = self.inner.registry.lock();
            EntityCounts {
                electric_vehicles: registry.count(EntityKind::ElectricVehicle),
                charging_stations: registry.count(EntityKind::ChargingStation),
                edge_nodes: registry.count(EntityKind::EdgeNode),
                service_providers: registry.count(EntityKind::ServiceProvider),
            }
        };
        let authority_remaining_signatures = self.inner.authority.lock().remaining_signatures();
        let (active_sessions, cross_domain_sessions) = {
            let sessions = self.inner.sessions.lock();
            let cross = sessions.values().filter(|s| s.is_cross_domain()).count();
            (sessions.len(), cross)
        };
        let models = {
            let models = self.inner.models.lock();
            let global = models.global();
            ModelTierStatus {
                global_present: global.is_some(),
                global_trained: global.is_some_and(|g| g.is_trained()),
                global_version: global.map_or(0, |g| g.version()),
                edge_models: models.edge_count(),
                trained_edge_models: models
                    .edge_ids()
                    .iter()
                    .filter(|id| models.edge(id).is_some_and(|m| m.is_trained()))
                    .count(),
                local_models: models.local_count(),
            }
        };
        let ledger = {
            let ledger = self.inner.ledger.lock();
            LedgerStatus {
                blocks: ledger.chain_length(),
                pending_transactions: ledger.pending_count(),
            }
        };

        SystemStatus {
            entities,
            ledger,
            active_sessions,
            cross_domain_sessions,
            models,
            authority_remaining_signatures,
            maintenance_running: self.is_maintenance_running(),
        }
    }
}

fn not_found(kind: EntityKind, id: &str) -> ProtocolError {
    ProtocolError::EntityNotFound {
        kind,
        id: id.to_string(),
    }
}

/// The given edge node, or the first registered one still certified.
fn resolve_edge_node(
    registry: &EntityRegistry,
    authority: &CertificateAuthority,
    en_id: Option<&str>,
    now: Timestamp,
) -> Result<String> {
    match en_id {
        Some(id) => Ok(registry.get(EntityKind::EdgeNode, id)?.id.clone()),
        None => registry
            .iter()
            .filter(|record| record.kind == EntityKind::EdgeNode)
            .find(|record| certified_key(registry, authority, record.kind, &record.id, now).is_ok())
            .map(|record| record.id.clone())
            .ok_or(ProtocolError::NoEdgeNodeAvailable),
    }
}

/// Public key of an entity whose certificate the authority still accepts.
fn certified_key(
    registry: &EntityRegistry,
    authority: &CertificateAuthority,
    kind: EntityKind,
    id: &str,
    now: Timestamp,
) -> Result<PublicKey> {
    let certificate = registry
        .get(kind, id)?
        .certificate
        .as_ref()
        .ok_or(VerificationFailure::CertificateMissing)?;
    authority.verify_certificate_at(certificate, now)?;
    Ok(certificate.subject_public_key)
}

fn station_state<'a>(registry: &'a EntityRegistry, cs_id: &str) -> Result<&'a StationState> {
    registry
        .get(EntityKind::ChargingStation, cs_id)?
        .as_station()
        .ok_or_else(|| not_found(EntityKind::ChargingStation, cs_id))
}

fn verify_credential_locked(
    registry: &EntityRegistry,
    authority: &CertificateAuthority,
    ev_id: &str,
    credential: &SignedCredential,
    now: Timestamp,
) -> Result<()> {
    let issuer_key = certified_key(
        registry,
        authority,
        EntityKind::EdgeNode,
        &credential.credential.issuer_id,
        now,
    )?;
    credential.verify(ev_id, &issuer_key, now)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use voltmesh_ledger::TransactionPayload as Tx;

    fn test_config() -> Config {
        let mut config = Config::default();
        config.crypto.authority_tree_height = 6;
        config.crypto.entity_tree_height = 3;
        config
    }

    fn orchestrator() -> ProtocolOrchestrator {
        ProtocolOrchestrator::new(test_config()).unwrap()
    }

    fn network(o: &ProtocolOrchestrator) -> (String, String, String) {
        let ev = o.register_entity(EntityKind::ElectricVehicle, Some("EV-1")).unwrap();
        let cs = o.register_entity(EntityKind::ChargingStation, Some("CS-1")).unwrap();
        let en = o.register_entity(EntityKind::EdgeNode, Some("EN-1")).unwrap();
        (ev, cs, en)
    }

    fn is_revoked(err: &ProtocolError) -> bool {
        matches!(
            err,
            ProtocolError::VerificationFailed(VerificationFailure::CertificateRevoked)
        )
    }

    #[test]
    fn test_register_and_status() {
        let o = orchestrator();
        let id = o.register_entity(EntityKind::ChargingStation, None).unwrap();

        let status = o.get_entity_status(EntityKind::ChargingStation, &id).unwrap();
        assert_eq!(status.id, id);
        assert_eq!(status.kind, EntityKind::ChargingStation);
        assert!(status.certificate.is_some());
        assert!(status.device_bound);
        assert_eq!(o.get_system_status().ledger.pending_transactions, 1);
    }

    #[test]
    fn test_unsupported_kind_and_duplicates() {
        let o = orchestrator();
        let err = o.register_entity_by_code("TRUCK", None).unwrap_err();
        assert!(matches!(err, ProtocolError::UnsupportedEntityKind(_)));

        o.register_entity_by_code("EV", Some("EV-1")).unwrap();
        let err = o
            .register_entity(EntityKind::ChargingStation, Some("EV-1"))
            .unwrap_err();
        assert!(matches!(err, ProtocolError::EntityExists(_)));
    }

    #[test]
    fn test_edge_node_registration_creates_model() {
        let o = orchestrator();
        o.register_entity(EntityKind::EdgeNode, Some("EN-1")).unwrap();

        let models = o.get_system_status().models;
        assert!(models.global_present);
        assert_eq!(models.edge_models, 1);
        assert!(!models.global_trained);
    }

    #[test]
    fn test_credential_needs_edge_node() {
        let o = orchestrator();
        o.register_entity(EntityKind::ElectricVehicle, Some("EV-1")).unwrap();

        let err = o.issue_verifiable_credential("EV-1", None).unwrap_err();
        assert!(matches!(err, ProtocolError::NoEdgeNodeAvailable));
        assert_eq!(err.kind(), ErrorKind::NotFound);

        o.register_entity(EntityKind::EdgeNode, Some("EN-1")).unwrap();
        let credential = o.issue_verifiable_credential("EV-1", None).unwrap();
        assert_eq!(credential.credential.issuer_id, "EN-1");
        assert!(o.verify_credential("EV-1", &credential).is_ok());

        let err = o.issue_verifiable_credential("EV-404", None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_intra_domain_session_lifecycle() {
        let o = orchestrator();
        let (ev, cs, _) = network(&o);

        let session = o.intra_domain_authentication(&ev, &cs).unwrap();
        assert_eq!(session.state, SessionState::Active);
        assert!(o.active_session(&session.id).is_some());
        let station = o.get_entity_status(EntityKind::ChargingStation, &cs).unwrap();
        assert!(matches!(
            station.state,
            voltmesh_identity::EntityState::ChargingStation(ref s) if s.is_connected(&ev)
        ));

        let ended = o.end_session(&session.id).unwrap();
        assert_eq!(ended.state, SessionState::Ended);
        assert!(o.active_session(&session.id).is_none());

        let err = o.end_session(&session.id).unwrap_err();
        assert!(matches!(err, ProtocolError::SessionNotFound(_)));
    }

    #[test]
    fn test_unknown_station_is_not_found() {
        let o = orchestrator();
        let (ev, _, _) = network(&o);
        let err = o.intra_domain_authentication(&ev, "CS-404").unwrap_err();
        assert_eq!(err.to_string(), "CS not found: CS-404");
    }

    #[test]
    fn test_revoked_vehicle_fails_closed() {
        let o = orchestrator();
        let (ev, cs, _) = network(&o);
        o.revoke_entity(EntityKind::ElectricVehicle, &ev).unwrap();

        let err = o.intra_domain_authentication(&ev, &cs).unwrap_err();

        assert!(matches!(
            err,
            ProtocolError::VerificationFailed(VerificationFailure::CertificateRevoked)
        ));
        assert!(o.ledger_transactions().iter().any(|tx| matches!(
            &tx.payload,
            Tx::AuthenticationFailure { reason, .. } if reason.contains("revoked")
        )));
        assert_eq!(o.get_system_status().active_sessions, 0);
    }

    #[test]
    fn test_revoked_station_hosts_no_new_sessions() {
        let o = orchestrator();
        let (ev, cs, _) = network(&o);
        o.revoke_entity(EntityKind::ChargingStation, &cs).unwrap();

        let err = o.intra_domain_authentication(&ev, &cs).unwrap_err();
        assert!(is_revoked(&err));
        let err = o.cross_domain_authentication(&ev, &cs, None).unwrap_err();
        assert!(is_revoked(&err));

        assert_eq!(o.get_system_status().active_sessions, 0);
        let failures = o
            .ledger_transactions()
            .into_iter()
            .filter(|tx| matches!(tx.payload, Tx::AuthenticationFailure { .. }))
            .count();
        assert_eq!(failures, 2);
    }

    #[test]
    fn test_revoked_edge_node_loses_trust() {
        let o = orchestrator();
        let (ev, cs, en) = network(&o);
        let credential = o.issue_verifiable_credential(&ev, Some(en.as_str())).unwrap();
        let backup = o.register_entity(EntityKind::EdgeNode, Some("EN-2")).unwrap();

        o.revoke_entity(EntityKind::EdgeNode, &en).unwrap();

        assert!(is_revoked(&o.verify_credential(&ev, &credential).unwrap_err()));
        let err = o
            .issue_verifiable_credential(&ev, Some(en.as_str()))
            .unwrap_err();
        assert!(is_revoked(&err));
        let err = o
            .cross_domain_authentication(&ev, &cs, Some(en.as_str()))
            .unwrap_err();
        assert!(is_revoked(&err));

        // Default issuer skips the revoked node
        let reissued = o.issue_verifiable_credential(&ev, None).unwrap();
        assert_eq!(reissued.credential.issuer_id, backup);
        assert!(o.verify_credential(&ev, &reissued).is_ok());

        o.revoke_entity(EntityKind::EdgeNode, &backup).unwrap();
        assert!(matches!(
            o.issue_verifiable_credential(&ev, None),
            Err(ProtocolError::NoEdgeNodeAvailable)
        ));
    }

    #[test]
    fn test_untrained_edge_rejects_cross_domain() {
        let o = orchestrator();
        let (ev, cs, en) = network(&o);

        let err = o.cross_domain_authentication(&ev, &cs, None).unwrap_err();

        assert!(matches!(err, ProtocolError::AnomalyRejected { score, .. } if score == 1.0));
        assert_eq!(err.kind(), ErrorKind::PolicyRejection);
        let failure = o
            .ledger_transactions()
            .into_iter()
            .find(|tx| matches!(tx.payload, Tx::AuthenticationFailure { .. }))
            .unwrap();
        assert!(matches!(
            failure.payload,
            Tx::AuthenticationFailure { anomaly_score: Some(s), en_id: Some(ref e), .. }
                if s == 1.0 && *e == en
        ));
        // The credential was issued on the fly
        let ev_status = o.get_entity_status(EntityKind::ElectricVehicle, &ev).unwrap();
        assert!(matches!(
            ev_status.state,
            voltmesh_identity::EntityState::Vehicle(ref v) if v.credential.is_some()
        ));
    }

    #[test]
    fn test_key_exhaustion_and_rekey() {
        let mut config = test_config();
        config.crypto.entity_tree_height = 1;
        let o = ProtocolOrchestrator::new(config).unwrap();
        let (ev, cs, _) = network(&o);

        for _ in 0..2 {
            let session = o.intra_domain_authentication(&ev, &cs).unwrap();
            o.end_session(&session.id).unwrap();
        }
        let err = o.intra_domain_authentication(&ev, &cs).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Exhaustion);

        o.rekey_entity(EntityKind::ElectricVehicle, &ev).unwrap();
        assert!(o.intra_domain_authentication(&ev, &cs).is_ok());
    }

    #[test]
    fn test_charging_power_accounting() {
        let o = orchestrator();
        let (ev, cs, _) = network(&o);
        let session = o.intra_domain_authentication(&ev, &cs).unwrap();

        let err = o.start_charging(&session.id, 80.0).unwrap_err();
        assert!(matches!(err, ProtocolError::InsufficientResource(_)));

        o.start_charging(&session.id, 22.0).unwrap();
        assert_eq!(o.active_session(&session.id).unwrap().power_kw, Some(22.0));

        o.end_session(&session.id).unwrap();
        let station = o.get_entity_status(EntityKind::ChargingStation, &cs).unwrap();
        assert!(matches!(
            station.state,
            voltmesh_identity::EntityState::ChargingStation(ref s) if s.available_power_kw == 50.0
        ));
    }

    #[test]
    fn test_update_fl_model_records_hash() {
        let o = orchestrator();
        let (_, cs, en) = network(&o);
        let records: Vec<UsageRecord> = (0..20)
            .map(|i| UsageRecord {
                time_of_day: i as f64 / 20.0,
                location: 0.3,
                frequency: 0.2 + (i % 3) as f64 * 0.1,
                duration: 0.5 + (i % 5) as f64 * 0.05,
                power: 0.7 + (i % 4) as f64 * 0.05,
            })
            .collect();

        let update = o.update_fl_model(&records, None, Some(cs.as_str())).unwrap();

        assert_eq!(update.en_id, en);
        assert_eq!(update.relation_id, cs);
        assert_eq!(update.edge_version, 1);
        assert!(o.ledger_transactions().iter().any(|tx| matches!(
            &tx.payload,
            Tx::FlModelUpdate { model_hash, .. } if *model_hash == update.model_hash
        )));
        assert_eq!(o.get_system_status().models.trained_edge_models, 1);

        let err = o.update_fl_model(&[], None, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[test]
    fn test_provider_operations() {
        let o = orchestrator();
        let esp = o.register_entity(EntityKind::ServiceProvider, None).unwrap();
        let en = o.register_entity(EntityKind::EdgeNode, None).unwrap();
        let cs = o.register_entity(EntityKind::ChargingStation, None).unwrap();

        assert!(o.register_edge_node(&esp, &en).unwrap());
        assert!(!o.register_edge_node(&esp, &en).unwrap());
        assert!(o.register_charging_station(&en, &cs).unwrap());
        assert!(o.update_energy_prices(&esp, 0.2, 0.1).is_ok());
        assert!(matches!(
            o.update_energy_prices(&esp, -1.0, 0.1),
            Err(ProtocolError::InvalidArgument(_))
        ));
        assert_eq!(o.get_system_status().models.local_models, 1);
    }
}
