//! Time utilities
//!
//! Timestamps are stored as milliseconds since the Unix epoch so that flag
//! writes can be ordered against file modification times.

use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tracing::warn;

/// Get current Unix timestamp in milliseconds
///
/// Returns 0 if system time is before epoch instead of panicking.
pub fn current_timestamp_millis() -> u64 {
    system_time_millis(SystemTime::now())
}

/// Convert a `SystemTime` (e.g. a file mtime) to milliseconds since epoch
pub fn system_time_millis(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH)
        .unwrap_or_else(|_| {
            warn!("System time is before UNIX epoch, using 0 as timestamp");
            Duration::from_secs(0)
        })
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_system_time_millis() {
        let t = UNIX_EPOCH + Duration::from_millis(1_700_000_000_123);
        assert_eq!(system_time_millis(t), 1_700_000_000_123);
        assert!(current_timestamp_millis() > 1_700_000_000_000);
    }
}
