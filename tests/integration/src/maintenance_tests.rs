//! Maintenance cycles, lifecycle, and concurrency with foreground calls

use crate::test_utils::{first_visit_profile, orchestrator, records_around, TestNetwork};
use std::time::Duration;
use voltmesh_core::MS_PER_SEC;
use voltmesh_identity::{EntityKind, EntityState};
use voltmesh_ledger::TransactionPayload;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_background_task_seals_and_stops() {
    let o = orchestrator();
    o.register_entity(EntityKind::ChargingStation, None).unwrap();
    assert_eq!(o.get_system_status().ledger.pending_transactions, 1);

    assert!(o.start().unwrap());
    assert!(!o.start().unwrap());
    tokio::time::sleep(Duration::from_millis(1_600)).await;

    let status = o.get_system_status();
    assert!(status.maintenance_running);
    assert_eq!(status.ledger.blocks, 1);
    assert_eq!(status.ledger.pending_transactions, 0);

    assert!(o.stop().await);
    assert!(!o.stop().await);
    assert!(!o.get_system_status().maintenance_running);

    // Restartable after a stop
    assert!(o.start().unwrap());
    assert!(o.stop().await);
}

#[test]
fn test_ttl_sweep_force_ends_sessions() {
    let net = TestNetwork::new();
    let o = &net.orchestrator;
    let session = o.intra_domain_authentication(&net.ev, &net.cs).unwrap();
    let ttl_ms = o.config().sessions.ttl_secs * MS_PER_SEC;

    let report = o.run_maintenance_cycle_at(session.created_at + ttl_ms + 1);

    assert_eq!(report.sessions_expired, 1);
    assert!(report.failed_steps.is_empty());
    assert!(o.active_session(&session.id).is_none());
    assert!(o.end_session(&session.id).is_err());

    let station = o
        .get_entity_status(EntityKind::ChargingStation, &net.cs)
        .unwrap();
    assert!(matches!(
        station.state,
        EntityState::ChargingStation(ref s) if !s.is_connected(&net.ev)
    ));
    assert!(o.ledger_transactions().iter().any(|tx| matches!(
        tx.payload,
        TransactionPayload::SessionEnd { expired: true, duration_ms, .. } if duration_ms == ttl_ms + 1
    )));
}

#[test]
fn test_global_model_reaches_every_edge() {
    let o = orchestrator();
    let cs = o.register_entity(EntityKind::ChargingStation, None).unwrap();
    let en1 = o.register_entity(EntityKind::EdgeNode, None).unwrap();
    let en2 = o.register_entity(EntityKind::EdgeNode, None).unwrap();
    let en3 = o.register_entity(EntityKind::EdgeNode, None).unwrap();

    let profile = first_visit_profile(&cs);
    let mut other = profile;
    other.frequency = 0.3;
    o.update_fl_model(&records_around(profile, 0.05, 40, 1), Some(en1.as_str()), None)
        .unwrap();
    o.update_fl_model(&records_around(other, 0.05, 40, 2), Some(en2.as_str()), None)
        .unwrap();

    let report = o.run_maintenance_cycle();

    assert!(report.global_aggregated);
    assert_eq!(report.models_distributed, 3);
    let models = o.get_system_status().models;
    assert!(models.global_trained);
    assert_eq!(models.trained_edge_models, 3);

    // Every edge now scores with the same parameters
    let s1 = o.anomaly_score(&en1, &profile).unwrap();
    let s3 = o.anomaly_score(&en3, &profile).unwrap();
    assert!((s1 - s3).abs() < 1e-12);

    // A second pass over identical inputs changes nothing
    let again = o.run_maintenance_cycle();
    assert!(again.global_aggregated);
    assert!((o.anomaly_score(&en2, &profile).unwrap() - s1).abs() < 1e-12);
}

#[test]
fn test_foreground_calls_alongside_maintenance() {
    let o = orchestrator();
    let cs = o.register_entity(EntityKind::ChargingStation, None).unwrap();
    let evs: Vec<String> = (0..3)
        .map(|_| o.register_entity(EntityKind::ElectricVehicle, None).unwrap())
        .collect();

    std::thread::scope(|scope| {
        for ev in &evs {
            let o = o.clone();
            let cs = cs.clone();
            scope.spawn(move || {
                for _ in 0..3 {
                    let session = o.intra_domain_authentication(ev, &cs).unwrap();
                    o.end_session(&session.id).unwrap();
                }
            });
        }
        let o = o.clone();
        scope.spawn(move || {
            for _ in 0..5 {
                let report = o.run_maintenance_cycle();
                assert!(report.failed_steps.is_empty());
            }
        });
    });

    let status = o.get_system_status();
    assert_eq!(status.active_sessions, 0);
    assert!(o.verify_ledger());
    let authentications = o
        .ledger_transactions()
        .iter()
        .filter(|tx| matches!(tx.payload, TransactionPayload::Authentication { .. }))
        .count();
    assert_eq!(authentications, 9);
    tracing::debug!(blocks = status.ledger.blocks, "Concurrent scenario finished");
}
