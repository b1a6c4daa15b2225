//! Usage records and the feature vector the anomaly model is trained on.

use serde::{Deserialize, Serialize};

/// Base features plus two derived ones.
pub const FEATURE_COUNT: usize = 7;

pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "time_of_day",
    "location",
    "frequency",
    "duration",
    "power",
    "power_frequency_ratio",
    "duration_power",
];

/// One observed charging interaction, every field normalized to roughly [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UsageRecord {
    pub time_of_day: f64,
    pub location: f64,
    pub frequency: f64,
    pub duration: f64,
    pub power: f64,
}

impl UsageRecord {
    pub fn features(&self) -> [f64; FEATURE_COUNT] {
        [
            self.time_of_day,
            self.location,
            self.frequency,
            self.duration,
            self.power,
            self.power / (self.frequency + 1e-10),
            self.duration * self.power,
        ]
    }
}

/// Stable coordinate in [0, 1] for a charging station id.
pub fn location_coordinate(station_id: &str) -> f64 {
    let hash = blake3::hash(station_id.as_bytes());
    let mut prefix = [0u8; 8];
    prefix.copy_from_slice(&hash.as_bytes()[..8]);
    u64::from_be_bytes(prefix) as f64 / u64::MAX as f64
}
