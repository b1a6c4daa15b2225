//! Tracing setup shared by VoltMesh binaries and tests.
//!
//! The filter comes from `RUST_LOG` and falls back to `info`. Protocol
//! events carry structured fields (`entity_id`, `session_id`, `score`), so
//! the JSON format is the one to ship to log collectors.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const DEFAULT_FILTER: &str = "info";

/// Output format for [`init_with`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Install the global subscriber in the given format.
///
/// # Panics
/// If a global subscriber is already installed.
///
/// # Example
/// ```no_run
/// use voltmesh_core::logging::{self, LogFormat};
///
/// logging::init_with(LogFormat::Json);
/// tracing::info!(entity_id = "EV-1", "Entity registered");
/// ```
pub fn init_with(format: LogFormat) {
    let registry = tracing_subscriber::registry().with(env_filter());
    match format {
        LogFormat::Pretty => registry
            .with(fmt::layer().with_target(true).with_thread_ids(true))
            .init(),
        LogFormat::Json => registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(true))
            .init(),
    }
}

/// Human-readable output.
pub fn init() {
    init_with(LogFormat::Pretty);
}

/// JSON output.
pub fn init_json() {
    init_with(LogFormat::Json);
}

/// Test-friendly subscriber; later calls are no-ops.
pub fn try_init_for_tests() {
    let _ = tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_test_writer())
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_init_is_repeatable() {
        try_init_for_tests();
        try_init_for_tests();
        tracing::debug!("subscriber installed once");
    }

    #[test]
    fn test_default_format_is_pretty() {
        assert_eq!(LogFormat::default(), LogFormat::Pretty);
    }
}
