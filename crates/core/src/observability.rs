//! Structured logging setup using `tracing-subscriber`.
//!
//! Output goes to stderr, filtered by `RUST_LOG` (default: `info`).

use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output format of the tracing subscriber
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines
    #[default]
    Pretty,
    /// One JSON object per event
    Json,
}

aegis_common::impl_status_conversions!(LogFormat {
    Pretty => "pretty",
    Json => "json",
});

/// Install the global subscriber
///
/// Returns `false` when a subscriber was already installed, so repeated
/// calls (tests, embedding hosts) are harmless.
pub fn init_tracing(format: LogFormat) -> bool {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(env_filter);

    let installed = match format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .try_init(),
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
    };
    installed.is_ok()
}

#[cfg(test)]
mod tests {
    //! Unit tests for observability.
    use super::*;

    /// Validates `init_tracing` behavior for the repeated initialisation
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms a second call reports the subscriber was already set.
    #[test]
    fn test_init_is_idempotent() {
        init_tracing(LogFormat::Json);
        assert!(!init_tracing(LogFormat::Pretty));
    }
}
