//! Logging initialization for the host process and the `modctl` CLI
//!
//! - Respects the RUST_LOG environment variable (always takes precedence)
//! - Falls back to the configured filter, then to "info"
//! - Human-readable output on stderr; JSON behind the `json-logging` feature
//!
//! # Usage
//! ```rust,no_run
//! use modular_host::utils::init_logging;
//!
//! init_logging(None); // Uses RUST_LOG or defaults to "info"
//! ```

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Pick the effective filter: RUST_LOG, then config, then "info"
fn resolve_filter(filter: Option<&str>) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        return EnvFilter::from_default_env();
    }
    EnvFilter::new(filter.unwrap_or("info"))
}

/// Initialize human-readable logging
///
/// # Arguments
/// * `filter` - Optional log filter from config (e.g. "debug",
///   "modular_host::flags=trace"). Ignored when RUST_LOG is set.
pub fn init_logging(filter: Option<&str>) {
    let env_filter = resolve_filter(filter);

    let result = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_thread_ids(false)
                .with_ansi(std::env::var("NO_COLOR").is_err()),
        )
        .with(env_filter)
        .try_init();

    if result.is_err() {
        // A subscriber is already installed (tests, embedding applications)
        tracing::debug!("Global tracing subscriber already set, keeping it");
    }
}

/// Initialize logging with JSON output (for log aggregation)
#[cfg(feature = "json-logging")]
pub fn init_json_logging(filter: Option<&str>) {
    let env_filter = resolve_filter(filter);

    let result = tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_current_span(true)
                .with_span_list(true),
        )
        .with(env_filter)
        .try_init();

    if result.is_err() {
        tracing::debug!("Global tracing subscriber already set, keeping it");
    }
}

/// Initialize logging from the host configuration
///
/// # Example
/// ```rust,no_run
/// use modular_host::config::HostConfig;
/// use modular_host::utils::init_logging_from_config;
///
/// let config = HostConfig::default();
/// init_logging_from_config(config.logging.as_ref());
/// ```
pub fn init_logging_from_config(config: Option<&LoggingConfig>) {
    let filter = config.and_then(|c| c.filter.as_deref());

    if config.map(|c| c.json_format).unwrap_or(false) {
        #[cfg(feature = "json-logging")]
        {
            init_json_logging(filter);
        }
        #[cfg(not(feature = "json-logging"))]
        {
            init_logging(filter);
            tracing::warn!("json_format requested but the json-logging feature is disabled");
        }
    } else {
        init_logging(filter);
    }
}
