//! File-change watching
//!
//! A [`FileWatchService`] registers watches through a [`FileWatchSource`] and
//! queues every change on a bounded internal channel. The monitoring service
//! drains that channel, notifying listeners and forwarding to the realtime
//! sink. Changes are only queued while the service accepts them; a full queue
//! drops new changes.

use crate::error::{MonitoringError, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use notify::event::{ModifyKind, RenameMode};
use notify::{EventKind, RecursiveMode, Watcher};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Created,
    Modified,
    Deleted,
    Renamed,
}

/// One change observed under a watched path
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FileChangeEvent {
    pub path: PathBuf,
    /// Previous path of a rename
    pub old_path: Option<PathBuf>,
    pub change_type: ChangeType,
    pub timestamp: DateTime<Utc>,
}

impl FileChangeEvent {
    pub fn new(path: impl Into<PathBuf>, change_type: ChangeType) -> Self {
        Self {
            path: path.into(),
            old_path: None,
            change_type,
            timestamp: Utc::now(),
        }
    }

    pub fn renamed(old_path: impl Into<PathBuf>, path: impl Into<PathBuf>) -> Self {
        Self {
            old_path: Some(old_path.into()),
            ..Self::new(path, ChangeType::Renamed)
        }
    }
}

/// Keeps a watch alive; dropping it ends the watch
pub struct WatchGuard {
    _inner: Box<dyn Send>,
}

impl WatchGuard {
    pub fn new<T: Send + 'static>(inner: T) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

impl std::fmt::Debug for WatchGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("WatchGuard")
    }
}

/// Queueing end handed to watch sources
#[derive(Debug, Clone)]
pub struct FileChangeSender {
    sender: mpsc::Sender<FileChangeEvent>,
    accepting: Arc<AtomicBool>,
}

impl FileChangeSender {
    /// Queue a change. Returns false if it was dropped because the service is
    /// not accepting changes, the queue is full, or the queue is closed.
    pub fn send(&self, event: FileChangeEvent) -> bool {
        if !self.accepting.load(Ordering::Acquire) {
            debug!(path = %event.path.display(), "Dropping file change while paused");
            return false;
        }
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                warn!(path = %event.path.display(), "File event queue is full, dropping change");
                metrics::counter!("file_events_dropped_total").increment(1);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Produces change events for a path until the returned guard is dropped
pub trait FileWatchSource: Send + Sync {
    fn watch(&self, path: &Path, events: FileChangeSender) -> Result<WatchGuard>;
}

/// Watch source backed by the platform's native notifier
#[derive(Debug, Default, Clone, Copy)]
pub struct NotifyWatchSource;

impl FileWatchSource for NotifyWatchSource {
    fn watch(&self, path: &Path, events: FileChangeSender) -> Result<WatchGuard> {
        let watched = path.to_path_buf();
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<notify::Event>| match res {
            Ok(event) => {
                for change in translate_event(event) {
                    if !events.send(change) && events.is_closed() {
                        debug!(path = %watched.display(), "File event receiver dropped");
                        return;
                    }
                }
            }
            Err(e) => warn!(path = %watched.display(), error = %e, "File watcher error"),
        })?;

        watcher.watch(path, RecursiveMode::Recursive)?;
        Ok(WatchGuard::new(watcher))
    }
}

/// Map a native notification onto change events.
///
/// Backends that report both halves of a rename also report the combined
/// event, so only the combined form becomes a `Renamed` change.
pub fn translate_event(event: notify::Event) -> Vec<FileChangeEvent> {
    let change_type = match event.kind {
        EventKind::Create(_) => ChangeType::Created,
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            return vec![FileChangeEvent::renamed(
                event.paths[0].clone(),
                event.paths[1].clone(),
            )];
        }
        EventKind::Modify(ModifyKind::Name(RenameMode::From | RenameMode::To)) => {
            return Vec::new();
        }
        EventKind::Modify(_) => ChangeType::Modified,
        EventKind::Remove(_) => ChangeType::Deleted,
        _ => return Vec::new(),
    };

    event
        .paths
        .into_iter()
        .map(|path| FileChangeEvent::new(path, change_type))
        .collect()
}

/// Watch source driven by hand, for tests and embedding
#[derive(Debug, Default, Clone)]
pub struct ManualWatchSource {
    senders: Arc<Mutex<HashMap<PathBuf, FileChangeSender>>>,
}

impl ManualWatchSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit a change for a watched path. Returns false when nothing watches
    /// it or the change was not queued.
    pub fn emit(&self, watched: &Path, event: FileChangeEvent) -> bool {
        match self.senders.lock().get(watched) {
            Some(sender) => sender.send(event),
            None => false,
        }
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.senders.lock().contains_key(path)
    }
}

struct ManualWatch {
    path: PathBuf,
    senders: Arc<Mutex<HashMap<PathBuf, FileChangeSender>>>,
}

impl Drop for ManualWatch {
    fn drop(&mut self) {
        self.senders.lock().remove(&self.path);
    }
}

impl FileWatchSource for ManualWatchSource {
    fn watch(&self, path: &Path, events: FileChangeSender) -> Result<WatchGuard> {
        self.senders.lock().insert(path.to_path_buf(), events);
        Ok(WatchGuard::new(ManualWatch {
            path: path.to_path_buf(),
            senders: self.senders.clone(),
        }))
    }
}

pub type FileChangeListener = Arc<dyn Fn(&FileChangeEvent) -> anyhow::Result<()> + Send + Sync>;

/// Registry of active watches and change listeners
pub struct FileWatchService {
    source: Arc<dyn FileWatchSource>,
    watches: Mutex<HashMap<PathBuf, WatchGuard>>,
    listeners: RwLock<Vec<(Uuid, FileChangeListener)>>,
    sender: FileChangeSender,
    receiver: tokio::sync::Mutex<mpsc::Receiver<FileChangeEvent>>,
}

impl FileWatchService {
    /// Create a paused service queueing at most `queue_capacity` changes
    pub fn new(source: Arc<dyn FileWatchSource>, queue_capacity: usize) -> Self {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        Self {
            source,
            watches: Mutex::new(HashMap::new()),
            listeners: RwLock::new(Vec::new()),
            sender: FileChangeSender {
                sender,
                accepting: Arc::new(AtomicBool::new(false)),
            },
            receiver: tokio::sync::Mutex::new(receiver),
        }
    }

    /// Start queueing changes from active watches
    pub fn resume(&self) {
        self.sender.accepting.store(true, Ordering::Release);
    }

    /// Stop queueing changes and discard the backlog. Returns the number of
    /// discarded changes.
    ///
    /// Waits for a concurrent drainer to release the queue.
    pub async fn pause(&self) -> usize {
        self.sender.accepting.store(false, Ordering::Release);
        let mut receiver = self.receiver.lock().await;
        let mut discarded = 0;
        while receiver.try_recv().is_ok() {
            discarded += 1;
        }
        if discarded > 0 {
            debug!(discarded, "Discarded queued file changes");
        }
        discarded
    }

    pub fn is_accepting(&self) -> bool {
        self.sender.accepting.load(Ordering::Acquire)
    }

    /// Changes waiting to be drained
    pub fn queued(&self) -> usize {
        self.sender.sender.max_capacity() - self.sender.sender.capacity()
    }

    /// Start watching `path`. Returns false if it was already watched.
    pub fn start_watch(&self, path: impl AsRef<Path>) -> Result<bool> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(MonitoringError::validation("Watch path cannot be empty"));
        }

        let mut watches = self.watches.lock();
        if watches.contains_key(path) {
            debug!(path = %path.display(), "Path is already watched");
            return Ok(false);
        }

        let guard = self.source.watch(path, self.sender.clone())?;
        watches.insert(path.to_path_buf(), guard);
        info!(path = %path.display(), "Started file watch");
        Ok(true)
    }

    /// Stop watching `path`. Returns false if it was not watched.
    pub fn stop_watch(&self, path: impl AsRef<Path>) -> bool {
        let path = path.as_ref();
        match self.watches.lock().remove(path) {
            Some(_) => {
                info!(path = %path.display(), "Stopped file watch");
                true
            }
            None => false,
        }
    }

    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = self.watches.lock().keys().cloned().collect();
        paths.sort();
        paths
    }

    pub fn add_listener(&self, listener: FileChangeListener) -> Uuid {
        let id = Uuid::new_v4();
        self.listeners.write().push((id, listener));
        id
    }

    pub fn remove_listener(&self, id: Uuid) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Invoke every listener; failures are logged and contained
    pub fn notify_listeners(&self, event: &FileChangeEvent) {
        let listeners: Vec<FileChangeListener> =
            self.listeners.read().iter().map(|(_, l)| l.clone()).collect();

        for listener in listeners {
            match std::panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    error!(path = %event.path.display(), error = %e, "File change listener failed")
                }
                Err(_) => error!(path = %event.path.display(), "File change listener panicked"),
            }
        }
    }

    /// Wait for the next queued change.
    ///
    /// Only one caller drains the queue at a time.
    pub async fn next_event(&self) -> Option<FileChangeEvent> {
        self.receiver.lock().await.recv().await
    }

    /// Wait for the next change, giving up when `stop` resolves first
    pub async fn next_event_until<F>(&self, stop: F) -> Option<FileChangeEvent>
    where
        F: std::future::Future<Output = ()>,
    {
        let mut receiver = self.receiver.lock().await;
        let stop = stop.fuse();
        futures::pin_mut!(stop);
        tokio::select! {
            _ = &mut stop => None,
            event = receiver.recv() => event,
        }
    }
}
