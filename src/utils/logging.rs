//! Structured logging setup.
//!
//! Thin wrapper over `tracing-subscriber` honoring [`LoggingConfig`]. The
//! `RUST_LOG` environment variable, when set, overrides the configured
//! level so operators can turn on `trace` for a single module without
//! touching config files.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Initialize the global tracing subscriber from logging configuration.
///
/// Safe to call more than once; only the first call installs a subscriber
/// and later calls are no-ops. Returns whether this call installed it.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "{}={}",
            config.app_name.replace('-', "_"),
            config.log_level
        ))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    if config.json_format {
        builder.json().try_init().is_ok()
    } else {
        builder.try_init().is_ok()
    }
}
