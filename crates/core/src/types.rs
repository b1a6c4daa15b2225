//! Core types

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Unix epoch milliseconds.
pub type Timestamp = u64;

pub const MS_PER_SEC: u64 = 1_000;

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_is_after_2020() {
        assert!(current_timestamp_ms() > 1_577_836_800_000);
    }
}
