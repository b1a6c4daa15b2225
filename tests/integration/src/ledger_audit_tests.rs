//! Audit ledger behaviour as seen through the orchestrator

use crate::test_utils::orchestrator;
use voltmesh_identity::EntityKind;
use voltmesh_ledger::{TransactionPayload, GENESIS_PREVIOUS_HASH};
use voltmesh_protocol::ErrorKind;

#[test]
fn test_batch_limit_seals_automatically() {
    let o = orchestrator();
    let batch = o.config().ledger.batch_size;

    for _ in 0..batch - 1 {
        o.register_entity(EntityKind::ElectricVehicle, None).unwrap();
    }
    assert_eq!(o.get_system_status().ledger.blocks, 0);

    o.register_entity(EntityKind::ElectricVehicle, None).unwrap();
    let ledger = o.get_system_status().ledger;
    assert_eq!(ledger.blocks, 1);
    assert_eq!(ledger.pending_transactions, 0);

    let genesis = o.ledger_block(0).unwrap();
    assert_eq!(genesis.previous_hash, GENESIS_PREVIOUS_HASH);
    assert_eq!(genesis.transactions.len(), batch);
    assert_eq!(genesis.hash, genesis.compute_hash().unwrap());
    assert!(o.verify_ledger());
}

#[test]
fn test_blocks_link_and_serialize() {
    let o = orchestrator();
    assert!(!o.mine_pending_block().unwrap());

    o.register_entity(EntityKind::EdgeNode, Some("EN-1")).unwrap();
    assert!(o.mine_pending_block().unwrap());
    o.register_entity(EntityKind::ChargingStation, Some("CS-1")).unwrap();
    assert!(o.mine_pending_block().unwrap());

    let first = o.ledger_block(0).unwrap();
    let second = o.ledger_block(1).unwrap();
    assert_eq!(second.previous_hash, first.hash);
    assert!(o.verify_ledger());

    let json = serde_json::to_value(&second).unwrap();
    assert_eq!(json["transactions"][0]["payload"]["type"], "registration");
    assert_eq!(json["transactions"][0]["payload"]["entity_id"], "CS-1");
}

#[test]
fn test_transaction_lookup() {
    let o = orchestrator();
    o.register_entity(EntityKind::ServiceProvider, Some("ESP-1")).unwrap();
    let tx = o.ledger_transactions().remove(0);

    // Found while pending and after sealing
    assert_eq!(o.ledger_transaction(&tx.id).unwrap(), tx);
    o.mine_pending_block().unwrap();
    let found = o.ledger_transaction(&tx.id).unwrap();
    assert!(matches!(
        found.payload,
        TransactionPayload::Registration { ref entity_id, .. } if entity_id == "ESP-1"
    ));

    let err = o.ledger_transaction("missing").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    let err = o.ledger_block(7).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_revocation_and_rekey_are_audited() {
    let o = orchestrator();
    let ev = o.register_entity(EntityKind::ElectricVehicle, None).unwrap();
    let en = o.register_entity(EntityKind::EdgeNode, None).unwrap();

    let key = o.rekey_entity(EntityKind::EdgeNode, &en).unwrap();
    o.revoke_entity(EntityKind::ElectricVehicle, &ev).unwrap();

    let payloads: Vec<TransactionPayload> = o
        .ledger_transactions()
        .into_iter()
        .map(|tx| tx.payload)
        .collect();
    assert!(payloads.iter().any(|p| matches!(
        p,
        TransactionPayload::Rekey { entity_id, public_key, .. }
            if *entity_id == en && *public_key == key.to_hex()
    )));
    assert!(payloads.iter().any(|p| matches!(
        p,
        TransactionPayload::Revocation { entity_id } if *entity_id == ev
    )));
}
