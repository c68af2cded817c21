//! File system event nudges
//!
//! Polling is the source of truth for drift. The watcher only shortens the
//! wait: an eligible create/modify/remove event sends a nudge so the poller
//! runs its next cycle immediately instead of at the next tick.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::tracker::TrackerConfig;

/// Default debounce window per path
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(200);

/// Record an event for `path`; false while it is inside the debounce window
///
/// Entries older than the window are pruned on every call, so the map only
/// holds paths seen within the last `debounce`.
fn debounce_event(
    last: &mut HashMap<PathBuf, Instant>,
    path: &Path,
    now: Instant,
    debounce: Duration,
) -> bool {
    last.retain(|_, seen| now.duration_since(*seen) < debounce);
    if last.contains_key(path) {
        return false;
    }
    last.insert(path.to_path_buf(), now);
    true
}

/// Filesystem watcher over the tracker's roots
pub struct UnitWatcher {
    config: TrackerConfig,
    debounce: Duration,
    watcher: Option<RecommendedWatcher>,
    last_events: Arc<Mutex<HashMap<PathBuf, Instant>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl UnitWatcher {
    pub fn new(config: TrackerConfig) -> Self {
        Self {
            config,
            debounce: DEFAULT_DEBOUNCE,
            watcher: None,
            last_events: Arc::new(Mutex::new(HashMap::new())),
            shutdown_tx: None,
        }
    }

    pub fn with_debounce(mut self, debounce: Duration) -> Self {
        self.debounce = debounce;
        self
    }

    pub fn is_running(&self) -> bool {
        self.watcher.is_some()
    }

    /// Start watching; each relevant event sends a nudge on `nudge_tx`
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&mut self, nudge_tx: mpsc::Sender<()>) -> Result<(), notify::Error> {
        info!("Starting unit watcher");

        let (tx, mut rx) = mpsc::channel::<Event>(1024);
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    let _ = tx.blocking_send(event);
                }
                Err(e) => warn!("Watch error: {}", e),
            },
            Config::default(),
        )?;

        let mode = if self.config.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };
        for root in &self.config.roots {
            if !root.exists() {
                warn!("Watch path does not exist: {:?}", root);
                continue;
            }
            watcher.watch(root, mode)?;
            debug!("Watching {:?}", root);
        }
        self.watcher = Some(watcher);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let config = self.config.clone();
        let debounce = self.debounce;
        let last_events = self.last_events.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    Some(event) = rx.recv() => {
                        if !matches!(
                            event.kind,
                            EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                        ) {
                            continue;
                        }

                        let relevant = event.paths.iter().any(|path| {
                            if !config.is_eligible(path) {
                                return false;
                            }
                            let fresh = debounce_event(
                                &mut last_events.lock(),
                                path,
                                Instant::now(),
                                debounce,
                            );
                            if !fresh {
                                debug!("Debounced event for {:?}", path);
                            }
                            fresh
                        });

                        // a full channel already holds a pending nudge
                        if relevant && nudge_tx.try_send(()).is_err() && nudge_tx.is_closed() {
                            break;
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Unit watcher shutting down");
                        break;
                    }
                }
            }
        });

        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
        self.watcher = None;
        self.last_events.lock().clear();
    }
}
