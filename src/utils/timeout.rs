//! Timeout utilities for module hooks
//!
//! Start and stop hooks are bounded by the timeouts in `LifecycleConfig`.
//! These constants are its defaults.

use std::time::Duration;
use tokio::time::timeout;

/// Default bound for a module start hook
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(30);

/// Default bound for a module stop hook
pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(30);

/// Execute operation with custom timeout
pub async fn with_custom_timeout<F, T>(
    operation: F,
    duration: Duration,
) -> Result<T, tokio::time::error::Elapsed>
where
    F: std::future::Future<Output = T>,
{
    timeout(duration, operation).await
}
