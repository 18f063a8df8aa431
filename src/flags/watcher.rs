//! Watches the persisted flag file for changes made by other processes
//!
//! OS notifications are received on a dedicated thread, coalesced with a
//! trailing-edge debounce and handed to the async side as `ReloadSignal`s.
//! The watcher never touches the store; `reconcile_loop` applies the reload on
//! the runtime so the store keeps a single writer path.

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{channel, RecvTimeoutError};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tokio::sync::mpsc as tokio_mpsc;
use tracing::{debug, error, info, warn};

use super::error::FlagError;
use super::store::FeatureFlagStore;

/// Request to reload the flag file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReloadSignal {
    /// Number of raw notifications coalesced into this signal
    pub coalesced: usize,
}

/// Trailing-edge debounce timer on the monotonic clock
#[derive(Debug)]
pub struct Debounce {
    window: Duration,
    deadline: Option<Instant>,
    pending: usize,
}

impl Debounce {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            deadline: None,
            pending: 0,
        }
    }

    /// Record a notification; pushes the deadline out by one window
    pub fn touch(&mut self, now: Instant) {
        self.deadline = Some(now + self.window);
        self.pending += 1;
    }

    /// Time left until the pending burst fires, or None when idle
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(now))
    }

    /// Fire if the window has elapsed, returning the burst size
    pub fn fire(&mut self, now: Instant) -> Option<usize> {
        match self.deadline {
            Some(deadline) if deadline <= now => {
                self.deadline = None;
                Some(std::mem::take(&mut self.pending))
            }
            _ => None,
        }
    }
}

/// Handle to the background watcher thread
pub struct ConfigWatcher {
    watcher: Option<RecommendedWatcher>,
    thread: Option<JoinHandle<()>>,
    path: PathBuf,
}

impl ConfigWatcher {
    /// Start watching `path`
    ///
    /// The parent directory is watched (non-recursively) so atomic replaces
    /// via rename are seen; events for other files are ignored.
    pub fn spawn(
        path: &Path,
        window: Duration,
        signals: tokio_mpsc::UnboundedSender<ReloadSignal>,
    ) -> notify::Result<Self> {
        let file_name: OsString = path
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| notify::Error::generic("flag file path has no file name"))?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(notify::Error::io)?;

        let (event_tx, event_rx) = channel();
        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    let _ = event_tx.send(event);
                }
                Err(e) => warn!("Flag file watch error: {}", e),
            },
            Config::default(),
        )?;
        watcher.watch(&dir, RecursiveMode::NonRecursive)?;

        info!(
            "Watching {:?} for external flag changes (debounce {:?})",
            path, window
        );

        let thread = std::thread::Builder::new()
            .name("flag-watcher".to_string())
            .spawn(move || {
                let mut debounce = Debounce::new(window);
                loop {
                    let received = match debounce.remaining(Instant::now()) {
                        Some(wait) => event_rx.recv_timeout(wait),
                        None => event_rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };

                    match received {
                        Ok(event) => {
                            if is_relevant(&event, &file_name) {
                                debug!("Flag file event: {:?}", event.kind);
                                debounce.touch(Instant::now());
                            }
                        }
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => break,
                    }

                    if let Some(coalesced) = debounce.fire(Instant::now()) {
                        if signals.send(ReloadSignal { coalesced }).is_err() {
                            debug!("Reload receiver gone, stopping flag watcher");
                            break;
                        }
                    }
                }
                debug!("Flag watcher thread exiting");
            })
            .map_err(notify::Error::io)?;

        Ok(Self {
            watcher: Some(watcher),
            thread: Some(thread),
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stop watching and join the thread
    pub fn shutdown(&mut self) {
        // Dropping the watcher closes the event channel, ending the thread
        self.watcher.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("Flag watcher thread panicked");
            }
        }
    }
}

impl Drop for ConfigWatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn is_relevant(event: &Event, file_name: &OsString) -> bool {
    let kind_matches = matches!(
        event.kind,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) | EventKind::Any
    );
    kind_matches
        && event
            .paths
            .iter()
            .any(|p| p.file_name().map(|n| n == file_name.as_os_str()).unwrap_or(false))
}

/// Apply reload signals to the store until the signal channel closes
///
/// Corruption is logged and the last good in-memory state keeps serving.
pub async fn reconcile_loop(
    store: Arc<FeatureFlagStore>,
    mut signals: tokio_mpsc::UnboundedReceiver<ReloadSignal>,
) {
    while let Some(signal) = signals.recv().await {
        debug!(
            "Reconciling flag file ({} notifications coalesced)",
            signal.coalesced
        );
        match store.reload_from_backend().await {
            Ok(changes) if changes.is_empty() => debug!("Flag file unchanged"),
            Ok(changes) => debug!("Reconciled {} changed flags", changes.len()),
            Err(FlagError::ConfigCorruption(e)) => {
                warn!("Ignoring corrupt flag file, keeping last good state: {}", e)
            }
            Err(e) => error!("Flag reconciliation failed: {}", e),
        }
    }
    debug!("Flag reconcile loop finished");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debounce_coalesces_burst() {
        let start = Instant::now();
        let window = Duration::from_millis(100);
        let mut debounce = Debounce::new(window);
        assert_eq!(debounce.remaining(start), None);

        debounce.touch(start);
        debounce.touch(start + Duration::from_millis(40));
        debounce.touch(start + Duration::from_millis(80));

        assert_eq!(debounce.fire(start + Duration::from_millis(150)), None);
        assert_eq!(
            debounce.remaining(start + Duration::from_millis(150)),
            Some(Duration::from_millis(30))
        );
        assert_eq!(debounce.fire(start + Duration::from_millis(180)), Some(3));
        assert_eq!(debounce.fire(start + Duration::from_millis(500)), None);
        assert_eq!(debounce.remaining(start + Duration::from_millis(500)), None);
    }

    #[test]
    fn test_event_filtering_by_file_name() {
        let target = OsString::from("feature_flags.json");
        let event = Event::new(EventKind::Modify(notify::event::ModifyKind::Any))
            .add_path(PathBuf::from("/data/feature_flags.json"));
        assert!(is_relevant(&event, &target));

        let temp = Event::new(EventKind::Create(notify::event::CreateKind::File))
            .add_path(PathBuf::from("/data/feature_flags.json.42.tmp"));
        assert!(!is_relevant(&temp, &target));

        let access = Event::new(EventKind::Access(notify::event::AccessKind::Any))
            .add_path(PathBuf::from("/data/feature_flags.json"));
        assert!(!is_relevant(&access, &target));
    }
}
