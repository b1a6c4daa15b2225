//! Usage observations an edge node derives for anomaly scoring.

use voltmesh_core::{Timestamp, MS_PER_SEC};
use voltmesh_federated::{location_coordinate, UsageRecord};
use voltmesh_identity::{EdgeNodeState, StationState, CONNECTION_LOG_WINDOW_MS};

const DAY_MS: u64 = 86_400 * MS_PER_SEC;

/// Connections per day that saturate the frequency feature.
const FREQUENCY_SATURATION: f64 = 10.0;

/// Build the observation for an attempt at `now`, counting the attempt
/// itself but not yet logged in `edge`.
pub fn usage_observation(
    edge: &EdgeNodeState,
    station: &StationState,
    ev_id: &str,
    cs_id: &str,
    now: Timestamp,
) -> UsageRecord {
    let history = edge.connections(ev_id);
    let recent = history
        .iter()
        .filter(|entry| now.saturating_sub(entry.timestamp) <= CONNECTION_LOG_WINDOW_MS)
        .count()
        + 1;

    let duration = history
        .last()
        .map(|previous| now.saturating_sub(previous.timestamp).min(DAY_MS) as f64 / DAY_MS as f64)
        .unwrap_or(1.0);

    UsageRecord {
        time_of_day: (now % DAY_MS) as f64 / DAY_MS as f64,
        location: location_coordinate(cs_id),
        frequency: (recent as f64 / FREQUENCY_SATURATION).min(1.0),
        duration,
        power: station.available_power_fraction(),
    }
}
