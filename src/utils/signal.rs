//! Shutdown signals for the long-running host (`modctl run`)

use std::fmt;
use tokio::signal;

/// Signal that ended `modctl run`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ShutdownSignal::Interrupt => "SIGINT",
            ShutdownSignal::Terminate => "SIGTERM",
        })
    }
}

/// Block until SIGINT or (on unix) SIGTERM arrives
///
/// Fails only when no handler could be installed.
pub async fn wait_for_shutdown_signal() -> std::io::Result<ShutdownSignal> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal as unix_signal, SignalKind};

        let mut terminate = unix_signal(SignalKind::terminate())?;
        tokio::select! {
            _ = terminate.recv() => Ok(ShutdownSignal::Terminate),
            interrupted = signal::ctrl_c() => interrupted.map(|()| ShutdownSignal::Interrupt),
        }
    }

    #[cfg(not(unix))]
    {
        signal::ctrl_c().await.map(|()| ShutdownSignal::Interrupt)
    }
}
