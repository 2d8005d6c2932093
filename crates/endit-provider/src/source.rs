//! Filesystem notifications for the agent's result directories.
//!
//! Uses inotify on Linux, FSEvents on macOS (through `notify`). The backend
//! is free to drop events; when it says so we get [`FsEvent::Overflow`] and
//! the watch loop falls back to scanning the directories.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::time::Duration;

use endit_config::path::normalize_or_original;
use endit_config::{log_watch_debug, log_watch_info};
use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;

use crate::error::WatchError;

/// What the watch loop learns from the notification backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FsEvent {
    /// A file in a watched directory was created or modified
    Changed(PathBuf),
    /// Events were lost
    Overflow { dir: Option<PathBuf> },
}

/// A directory to watch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchDir {
    pub path: PathBuf,
    /// Also report in-place writes, not only new entries
    pub include_modify: bool,
}

impl WatchDir {
    pub fn creates(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            include_modify: false,
        }
    }

    pub fn creates_and_modifies(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            include_modify: true,
        }
    }
}

pub type EventResult = Result<FsEvent, WatchError>;

/// Stream of events; watching stops when it is dropped
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<EventResult>,
    _guard: Box<dyn Any + Send>,
}

impl EventStream {
    /// `guard` is kept alive as long as the stream, typically the backend watcher
    pub fn new(rx: mpsc::UnboundedReceiver<EventResult>, guard: Box<dyn Any + Send>) -> Self {
        Self { rx, _guard: guard }
    }

    /// Next event; `None` once the backend is gone
    pub async fn next(&mut self) -> Option<EventResult> {
        self.rx.recv().await
    }
}

/// Source of change notifications for a set of directories
pub trait EventSource: Send {
    fn watch(&mut self, dirs: &[WatchDir]) -> Result<EventStream, WatchError>;
}

impl<S: EventSource + ?Sized> EventSource for Box<S> {
    fn watch(&mut self, dirs: &[WatchDir]) -> Result<EventStream, WatchError> {
        (**self).watch(dirs)
    }
}

/// Event source backed by the platform's recommended `notify` watcher
#[derive(Debug, Clone)]
pub struct NotifySource {
    /// Only used by the polling fallback backend
    poll_interval: Duration,
}

impl Default for NotifySource {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
        }
    }
}

impl NotifySource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

impl EventSource for NotifySource {
    fn watch(&mut self, dirs: &[WatchDir]) -> Result<EventStream, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let routes: Vec<Route> = dirs.iter().cloned().map(Route::new).collect();

        let watcher_config = Config::default()
            .with_poll_interval(self.poll_interval)
            .with_compare_contents(false);

        let mut watcher = RecommendedWatcher::new(
            move |res: notify::Result<Event>| match res {
                Ok(event) => {
                    for event in translate(&routes, event) {
                        let _ = tx.send(Ok(event));
                    }
                }
                Err(e) => {
                    let _ = tx.send(Err(e.into()));
                }
            },
            watcher_config,
        )?;

        for dir in dirs {
            watcher.watch(&dir.path, RecursiveMode::NonRecursive)?;
            log_watch_info!(
                path = %dir.path.display(),
                modify = dir.include_modify,
                "Watching directory"
            );
        }

        Ok(EventStream::new(rx, Box::new(watcher)))
    }
}

/// A watched directory as configured, and as the backend may report it
#[derive(Debug, Clone)]
pub(crate) struct Route {
    watched: WatchDir,
    resolved: PathBuf,
}

impl Route {
    pub(crate) fn new(watched: WatchDir) -> Self {
        let resolved = normalize_or_original(&watched.path);
        Self { watched, resolved }
    }

    /// `path` rebased onto the configured directory, if it is a direct child
    fn rebase(&self, path: &Path) -> Option<PathBuf> {
        let parent = path.parent()?;
        if parent != self.watched.path && parent != self.resolved {
            return None;
        }
        Some(self.watched.path.join(path.file_name()?))
    }
}

/// Convert a notify event into the events the watch loop cares about.
///
/// Paths are reported under the configured directory even when the backend
/// resolved symlinks, since that is what tasks are registered under.
pub(crate) fn translate(routes: &[Route], event: Event) -> Vec<FsEvent> {
    if event.need_rescan() {
        return vec![FsEvent::Overflow {
            dir: event.paths.into_iter().next(),
        }];
    }

    let is_modify = match event.kind {
        EventKind::Create(_) => false,
        // moved into the directory: a new entry as far as the agent protocol goes
        EventKind::Modify(ModifyKind::Name(RenameMode::To | RenameMode::Both)) => false,
        EventKind::Modify(_) => true,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter_map(|path| {
            routes
                .iter()
                .filter(|route| !is_modify || route.watched.include_modify)
                .find_map(|route| route.rebase(path))
        })
        .inspect(|path| log_watch_debug!(path = %path.display(), is_modify, "FS event received"))
        .map(FsEvent::Changed)
        .collect()
}
