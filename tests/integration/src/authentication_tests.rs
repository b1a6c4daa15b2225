//! Authentication scenarios across domains

use crate::test_utils::{first_visit_profile, records_around, TestNetwork};
use voltmesh_identity::{EntityKind, EntityState, VerificationFailure};
use voltmesh_ledger::{AuthenticationMode, TransactionPayload};
use voltmesh_protocol::{ErrorKind, ProtocolError, SessionState};

#[test]
fn test_registration_round_trips_through_status() {
    let net = TestNetwork::new();
    let o = &net.orchestrator;

    for (kind, id) in [
        (EntityKind::ElectricVehicle, &net.ev),
        (EntityKind::ChargingStation, &net.cs),
        (EntityKind::EdgeNode, &net.en),
        (EntityKind::ServiceProvider, &net.esp),
    ] {
        let status = o.get_entity_status(kind, id).unwrap();
        assert_eq!(status.id, *id);
        assert_eq!(status.kind, kind);
        assert_eq!(status.device_bound, kind.has_device_binding());
        assert!(!status.certificate.unwrap().revoked);
    }

    let err = o
        .get_entity_status(EntityKind::ChargingStation, &net.ev)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let status = o.get_system_status();
    assert_eq!(status.entities.total(), 4);
    assert_eq!(status.entities.edge_nodes, 1);
    assert_eq!(status.models.edge_models, 1);
}

#[test]
fn test_intra_domain_full_session() {
    let net = TestNetwork::new();
    let o = &net.orchestrator;

    let session = o.intra_domain_authentication(&net.ev, &net.cs).unwrap();
    assert_eq!(session.kind, AuthenticationMode::IntraDomain);
    assert!(session.en_id.is_none());

    o.start_charging(&session.id, 11.0).unwrap();
    let ev = o.get_entity_status(EntityKind::ElectricVehicle, &net.ev).unwrap();
    assert!(matches!(
        ev.state,
        EntityState::Vehicle(ref v) if v.charging_status == voltmesh_identity::ChargingStatus::Charging
    ));

    let ended = o.end_session(&session.id).unwrap();
    assert_eq!(ended.state, SessionState::Ended);
    assert!(ended.ended_at.is_some());

    let payloads: Vec<TransactionPayload> = o
        .ledger_transactions()
        .into_iter()
        .map(|tx| tx.payload)
        .collect();
    assert!(payloads.iter().any(|p| matches!(
        p,
        TransactionPayload::Authentication { session_id, .. } if *session_id == session.id
    )));
    assert!(payloads.iter().any(|p| matches!(
        p,
        TransactionPayload::ChargingStart { power_kw, .. } if *power_kw == 11.0
    )));
    assert!(payloads.iter().any(|p| matches!(
        p,
        TransactionPayload::SessionEnd { expired: false, .. }
    )));
}

#[test]
fn test_revoked_station_cannot_host_sessions() {
    let net = TestNetwork::new();
    let o = &net.orchestrator;
    let session = o.intra_domain_authentication(&net.ev, &net.cs).unwrap();

    o.revoke_entity(EntityKind::ChargingStation, &net.cs).unwrap();

    // Revocation ends sessions hosted by the station
    assert!(o.active_session(&session.id).is_none());
    let status = o
        .get_entity_status(EntityKind::ChargingStation, &net.cs)
        .unwrap();
    assert!(status.certificate.unwrap().revoked);

    let revoked = |err: &ProtocolError| {
        matches!(
            err,
            ProtocolError::VerificationFailed(VerificationFailure::CertificateRevoked)
        )
    };
    let err = o.intra_domain_authentication(&net.ev, &net.cs).unwrap_err();
    assert!(revoked(&err));
    let err = o
        .cross_domain_authentication(&net.ev, &net.cs, Some(net.en.as_str()))
        .unwrap_err();
    assert!(revoked(&err));
    assert!(o.active_sessions().is_empty());

    let err = o
        .rekey_entity(EntityKind::ChargingStation, &net.cs)
        .unwrap_err();
    assert!(revoked(&err));
}

#[test]
fn test_untrained_edge_rejects_and_audits_score() {
    let net = TestNetwork::new();
    let o = &net.orchestrator;

    let err = o
        .cross_domain_authentication(&net.ev, &net.cs, Some(net.en.as_str()))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::PolicyRejection);
    assert!(err.to_string().contains("anomaly score 1.000"));
    assert_eq!(o.get_system_status().active_sessions, 0);

    let failure = o
        .ledger_transactions()
        .into_iter()
        .find_map(|tx| match tx.payload {
            TransactionPayload::AuthenticationFailure {
                mode,
                anomaly_score,
                reason,
                ..
            } => Some((mode, anomaly_score, reason)),
            _ => None,
        })
        .unwrap();
    assert_eq!(failure.0, AuthenticationMode::CrossDomain);
    assert_eq!(failure.1, Some(1.0));
    assert!(failure.2.contains("exceeds 0.8"));
}

#[test]
fn test_trained_edge_accepts_familiar_pattern() {
    let net = TestNetwork::new();
    let o = &net.orchestrator;
    let profile = first_visit_profile(&net.cs);
    let records = records_around(profile, 0.05, 60, 11);

    let update = o
        .update_fl_model(&records, Some(net.en.as_str()), Some(net.cs.as_str()))
        .unwrap();
    assert_eq!(update.edge_version, 1);
    assert!(o.anomaly_score(&net.en, &profile).unwrap() < 0.8);

    let session = o
        .cross_domain_authentication(&net.ev, &net.cs, None)
        .unwrap();

    assert_eq!(session.kind, AuthenticationMode::CrossDomain);
    assert_eq!(session.en_id.as_deref(), Some(net.en.as_str()));
    let status = o.get_system_status();
    assert_eq!(status.active_sessions, 1);
    assert_eq!(status.cross_domain_sessions, 1);
}

#[test]
fn test_trained_edge_rejects_unfamiliar_pattern() {
    let net = TestNetwork::new();
    let o = &net.orchestrator;
    let mut habitual = first_visit_profile(&net.cs);
    habitual.frequency = 0.9;
    habitual.duration = 0.1;
    habitual.power = 0.2;
    let records = records_around(habitual, 0.02, 60, 5);
    o.update_fl_model(&records, Some(net.en.as_str()), None).unwrap();

    let err = o
        .cross_domain_authentication(&net.ev, &net.cs, Some(net.en.as_str()))
        .unwrap_err();

    let ProtocolError::AnomalyRejected { score, threshold } = err else {
        panic!("expected anomaly rejection, got {err}");
    };
    assert!(score > threshold);
    assert!(o.ledger_transactions().iter().any(|tx| matches!(
        tx.payload,
        TransactionPayload::AuthenticationFailure { anomaly_score: Some(s), .. } if s == score
    )));
}

#[test]
fn test_credential_reused_while_valid() {
    let net = TestNetwork::new();
    let o = &net.orchestrator;
    let credential = o.issue_verifiable_credential(&net.ev, None).unwrap();
    assert_eq!(credential.credential.issuer_id, net.en);

    // Rejected by the untrained model, but the held credential is kept
    let _ = o.cross_domain_authentication(&net.ev, &net.cs, None);

    let issuances = o
        .ledger_transactions()
        .iter()
        .filter(|tx| matches!(tx.payload, TransactionPayload::CredentialIssuance { .. }))
        .count();
    assert_eq!(issuances, 1);
    let ev = o.get_entity_status(EntityKind::ElectricVehicle, &net.ev).unwrap();
    assert!(matches!(
        ev.state,
        EntityState::Vehicle(ref v) if v.credential.as_ref() == Some(&credential)
    ));
}

#[test]
fn test_exhausted_vehicle_rekeys() {
    let mut config = crate::test_utils::test_config();
    config.crypto.entity_tree_height = 1;
    let o = voltmesh_protocol::ProtocolOrchestrator::new(config).unwrap();
    let ev = o.register_entity(EntityKind::ElectricVehicle, None).unwrap();
    let cs = o.register_entity(EntityKind::ChargingStation, None).unwrap();
    let before = o.get_entity_status(EntityKind::ElectricVehicle, &ev).unwrap();

    for _ in 0..2 {
        let session = o.intra_domain_authentication(&ev, &cs).unwrap();
        o.end_session(&session.id).unwrap();
    }
    let err = o.intra_domain_authentication(&ev, &cs).unwrap_err();
    assert!(matches!(err, ProtocolError::KeyExhausted { capacity: 2 }));

    let key = o.rekey_entity(EntityKind::ElectricVehicle, &ev).unwrap();
    let after = o.get_entity_status(EntityKind::ElectricVehicle, &ev).unwrap();
    assert_ne!(after.public_key, before.public_key);
    assert_eq!(after.public_key, key.to_hex());
    assert_eq!(after.remaining_signatures, 2);
    assert!(o.intra_domain_authentication(&ev, &cs).is_ok());
}
