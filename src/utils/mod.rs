//! Utility modules for resilience, logging, and persisted state

pub mod fs;
pub mod logging;
pub mod retry;
pub mod signal;
pub mod time;
pub mod timeout;

// Re-export commonly used items
pub use fs::write_atomic;
#[cfg(feature = "json-logging")]
pub use logging::init_json_logging;
pub use logging::{init_logging, init_logging_from_config};
pub use retry::{retry_with_backoff, RetryConfig};
pub use signal::{wait_for_shutdown_signal, ShutdownSignal};
pub use time::{current_timestamp_millis, system_time_millis};
pub use timeout::{with_custom_timeout, DEFAULT_START_TIMEOUT, DEFAULT_STOP_TIMEOUT};
