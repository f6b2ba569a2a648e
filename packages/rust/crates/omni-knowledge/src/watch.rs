//! Live watching of one project.
//!
//! [`WatchService`] owns a [`FileWatcher`] feeding a bounded channel and a
//! single background task that debounces paths and hands each quiet batch to
//! [`SyncService::sync_paths`]. When the OS subscription cannot be installed
//! (or dies) the task falls back to periodic full scans.
//!
//! A path that is gone from disk when its batch is ready is held back for one
//! more window before it is reconciled. The other half of a rename reported
//! separately can then still claim the entity as a move.

use omni_io::{Debouncer, FileEvent, FileWatcher};
use std::path::Path;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::error::SyncError;
use crate::sync::{SyncService, WatchMode};

/// Background watch loop for one project. Stop it with [`Self::stop`];
/// dropping it also signals the loop to end.
#[derive(Debug)]
pub struct WatchService {
    sync: SyncService,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl WatchService {
    /// Subscribe to the project root and spawn the reconciliation loop.
    ///
    /// Expects an initial full scan to have run already. A failed OS
    /// subscription is not an error: the service runs in polling mode.
    ///
    /// # Errors
    /// `WatchSubscription` when called outside a tokio runtime.
    pub fn start(sync: SyncService) -> Result<Self, SyncError> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| SyncError::WatchSubscription(e.to_string()))?;
        let config = sync.config();
        let (events_tx, events_rx) = mpsc::channel(config.channel_capacity);
        let watcher = match FileWatcher::start(sync.root(), events_tx) {
            Ok(watcher) => {
                info!(root = %sync.root().display(), "watching project");
                sync.set_watch_mode(WatchMode::Live);
                Some(watcher)
            }
            Err(err) => {
                error!(root = %sync.root().display(), error = %err, "watch subscription failed");
                warn!(
                    interval_secs = config.scan_interval_secs,
                    "falling back to periodic full scans"
                );
                sync.set_watch_mode(WatchMode::Polling);
                None
            }
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let task = runtime.spawn(watch_loop(sync.clone(), watcher, events_rx, stop_rx));
        Ok(Self {
            sync,
            stop: Some(stop_tx),
            task: Some(task),
        })
    }

    /// Current delivery mode.
    #[must_use]
    pub fn mode(&self) -> WatchMode {
        self.sync.status().watch_mode
    }

    /// Stop watching. A reconciliation already in flight completes first;
    /// debounced paths not yet handed over are dropped.
    ///
    /// # Errors
    /// `Task` when the loop panicked.
    pub async fn stop(mut self) -> Result<(), SyncError> {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.map_err(|e| SyncError::Task(e.to_string()))?;
        }
        Ok(())
    }
}

impl Drop for WatchService {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
    }
}

/// Loop state apart from the channels.
struct WatchLoop {
    sync: SyncService,
    debouncer: Debouncer<String>,
    held: Debouncer<String>,
    rescan: bool,
}

impl WatchLoop {
    fn new(sync: SyncService) -> Self {
        let window = sync.config().debounce();
        Self {
            debouncer: Debouncer::new(window),
            held: Debouncer::new(window),
            sync,
            rescan: false,
        }
    }

    fn pending(&self) -> usize {
        self.debouncer.len() + self.held.len()
    }

    fn next_deadline(&self) -> Option<Instant> {
        if self.rescan {
            return Some(Instant::now());
        }
        let quiet = self.debouncer.next_deadline();
        let held = self.held.next_deadline();
        quiet.into_iter().chain(held).min().map(Instant::from_std)
    }

    fn handle(&mut self, event: FileEvent) {
        match event {
            FileEvent::Rescan => {
                debug!("watcher requested a rescan");
                self.rescan = true;
            }
            FileEvent::Error { error } => {
                warn!(%error, "watcher reported an error");
            }
            other => {
                let now = Instant::now().into_std();
                for path in other.paths() {
                    if path.is_empty() || self.sync.filter().is_ignored(Path::new(path)) {
                        continue;
                    }
                    self.debouncer.push(path.to_string(), now);
                }
            }
        }
        self.sync.set_pending(self.pending());
    }

    async fn flush_ready(&mut self) {
        if self.rescan {
            self.rescan = false;
            self.debouncer.drain_all();
            self.held.drain_all();
            self.full_pass().await;
            self.sync.set_pending(self.pending());
            return;
        }
        let now = Instant::now().into_std();
        let mut batch = self.held.drain_ready(now);
        for path in self.debouncer.drain_ready(now) {
            if self.sync.root().join(&path).exists() {
                batch.push(path);
            } else {
                self.held.push(path, now);
            }
        }
        if !batch.is_empty() {
            debug!(paths = batch.len(), held = self.held.len(), "debounced batch ready");
            match self.sync.sync_paths(batch).await {
                Ok(report) => debug!(?report, "incremental pass done"),
                Err(err) => warn!(error = %err, "incremental pass failed"),
            }
        }
        self.sync.set_pending(self.pending());
    }

    async fn full_pass(&self) {
        match self.sync.sync_full().await {
            Ok(report) => debug!(?report, "full pass done"),
            Err(err) => warn!(error = %err, "full pass failed"),
        }
    }
}

async fn watch_loop(
    sync: SyncService,
    mut watcher: Option<FileWatcher>,
    mut events: mpsc::Receiver<FileEvent>,
    mut stop: oneshot::Receiver<()>,
) {
    let mut poll = tokio::time::interval(sync.config().scan_interval());
    let mut state = WatchLoop::new(sync);
    poll.set_missed_tick_behavior(MissedTickBehavior::Skip);
    poll.tick().await;

    loop {
        let live = watcher.is_some();
        let deadline = state.next_deadline();
        let sleep_until = deadline.unwrap_or_else(|| Instant::now() + Duration::from_secs(3600));

        tokio::select! {
            biased;
            _ = &mut stop => break,
            event = events.recv(), if live => match event {
                Some(event) => state.handle(event),
                None => {
                    error!("watch channel closed; falling back to periodic full scans");
                    watcher = None;
                    state.sync.set_watch_mode(WatchMode::Polling);
                }
            },
            () = tokio::time::sleep_until(sleep_until), if deadline.is_some() => {
                state.flush_ready().await;
            }
            _ = poll.tick(), if !live => state.full_pass().await,
        }
    }

    drop(watcher);
    let dropped = state.debouncer.drain_all().len() + state.held.drain_all().len();
    if dropped > 0 {
        debug!(dropped, "pending paths dropped on shutdown");
    }
    state.sync.set_pending(0);
    state.sync.set_watch_mode(WatchMode::Off);
    info!(root = %state.sync.root().display(), "watch stopped");
}
