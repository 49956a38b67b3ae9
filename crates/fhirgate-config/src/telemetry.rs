//! Tracing bootstrap driven by the `[logging]` section of
//! [`GatewayConfig`](crate::GatewayConfig).
//!
//! A `fmt` subscriber is installed once per process behind a reloadable
//! [`EnvFilter`], so a changed `logging.level` can be applied at runtime
//! without restarting the gateway. `RUST_LOG`, when set and parsable, wins
//! over the configured level at startup.

use std::sync::OnceLock;

use tracing_subscriber::{EnvFilter, Registry, fmt, prelude::*, reload};

use crate::settings::LoggingSettings;

type FilterHandle = reload::Handle<EnvFilter, Registry>;

static FILTER_HANDLE: OnceLock<FilterHandle> = OnceLock::new();

/// Install the subscriber with the default level (`info`).
pub fn init_tracing() -> bool {
    init_tracing_from(&LoggingSettings::default())
}

/// Install the subscriber using the validated `[logging]` settings.
///
/// Returns `true` when this call installed the global subscriber. Later
/// calls, or a subscriber set elsewhere in the process, leave the existing
/// one in place and return `false`.
pub fn init_tracing_from(settings: &LoggingSettings) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&settings.level));
    let (filter, handle) = reload::Layer::new(filter);

    let installed = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .try_init()
        .is_ok();
    if installed {
        // Keep the handle only for the layer that actually went live.
        let _ = FILTER_HANDLE.set(handle);
    }
    installed
}

/// Point the active filter at a new `[logging]` level, e.g. after a config
/// reload. Does nothing until a subscriber from this module is installed.
pub fn apply_logging_level(settings: &LoggingSettings) {
    if let Some(handle) = FILTER_HANDLE.get() {
        let _ = handle.modify(|filter| *filter = EnvFilter::new(&settings.level));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn logging(level: &str) -> LoggingSettings {
        LoggingSettings {
            level: level.into(),
        }
    }

    #[test]
    fn test_config_level_drives_active_filter() {
        // First install wins, the duplicate is refused.
        assert!(init_tracing_from(&logging("info")));
        assert!(!init_tracing());

        // Runtime swaps flow through the reload handle regardless of RUST_LOG.
        apply_logging_level(&logging("debug"));
        assert!(tracing::enabled!(tracing::Level::DEBUG));

        apply_logging_level(&logging("warn"));
        assert!(!tracing::enabled!(tracing::Level::DEBUG));
        assert!(tracing::enabled!(tracing::Level::ERROR));
    }
}
