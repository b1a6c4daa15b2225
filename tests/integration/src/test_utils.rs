//! Fixtures shared by the integration scenarios

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use voltmesh_core::{current_timestamp_ms, Config, MS_PER_SEC};
use voltmesh_federated::{location_coordinate, UsageRecord};
use voltmesh_identity::EntityKind;
use voltmesh_protocol::ProtocolOrchestrator;

const DAY_MS: u64 = 86_400 * MS_PER_SEC;

/// Default configuration with small signing trees so tests stay fast.
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.crypto.authority_tree_height = 7;
    config.crypto.entity_tree_height = 4;
    config.maintenance.interval_secs = 1;
    config.maintenance.shutdown_timeout_secs = 2;
    config
}

pub fn orchestrator() -> ProtocolOrchestrator {
    voltmesh_core::logging::try_init_for_tests();
    ProtocolOrchestrator::new(test_config()).expect("test config is valid")
}

/// One vehicle, one station, one edge node, one provider, wired together.
pub struct TestNetwork {
    pub orchestrator: ProtocolOrchestrator,
    pub ev: String,
    pub cs: String,
    pub en: String,
    pub esp: String,
}

impl TestNetwork {
    pub fn new() -> Self {
        let orchestrator = orchestrator();
        let ev = orchestrator
            .register_entity(EntityKind::ElectricVehicle, Some("EV-1"))
            .unwrap();
        let cs = orchestrator
            .register_entity(EntityKind::ChargingStation, Some("CS-1"))
            .unwrap();
        let en = orchestrator
            .register_entity(EntityKind::EdgeNode, Some("EN-1"))
            .unwrap();
        let esp = orchestrator
            .register_entity(EntityKind::ServiceProvider, Some("ESP-1"))
            .unwrap();
        orchestrator.register_charging_station(&en, &cs).unwrap();
        orchestrator.register_edge_node(&esp, &en).unwrap();

        Self {
            orchestrator,
            ev,
            cs,
            en,
            esp,
        }
    }
}

impl Default for TestNetwork {
    fn default() -> Self {
        Self::new()
    }
}

/// What an edge node observes for an EV's first visit to `cs_id` right now,
/// with the station idle.
pub fn first_visit_profile(cs_id: &str) -> UsageRecord {
    UsageRecord {
        time_of_day: (current_timestamp_ms() % DAY_MS) as f64 / DAY_MS as f64,
        location: location_coordinate(cs_id),
        frequency: 0.1,
        duration: 1.0,
        power: 1.0,
    }
}

/// `count` records scattered around `centre` by up to `spread` per feature.
pub fn records_around(centre: UsageRecord, spread: f64, count: usize, seed: u64) -> Vec<UsageRecord> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut jitter = move || rng.gen_range(-spread..spread);
    (0..count)
        .map(|_| UsageRecord {
            time_of_day: centre.time_of_day + jitter(),
            location: centre.location + jitter(),
            frequency: centre.frequency + jitter(),
            duration: centre.duration + jitter(),
            power: centre.power + jitter(),
        })
        .collect()
}
