//! Test support: an isolated agent directory tree and a hand-driven event
//! source.
//!
//! # Usage
//!
//! ```ignore
//! use endit_provider::testing::{ManualSource, TestEnvironment};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let env = TestEnvironment::new().unwrap();
//!     let (source, events) = ManualSource::new();
//!     let engine = Engine::start(&env.config(), source).unwrap();
//!     // play the agent with env.write_flush_result(..), then events.changed(..)
//! }
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use endit_config::{Config, Directories, DirectoryConfig, ProviderConfig};
use filetime::{set_file_mtime, FileTime};
use tempfile::TempDir;
use tokio::sync::mpsc;

use crate::error::WatchError;
use crate::source::{EventResult, EventSource, EventStream, FsEvent, WatchDir};

/// Atomic counter for unique test IDs
static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Agent directory layout under a temporary root, plus a pool directory
pub struct TestEnvironment {
    /// Temporary directory (dropped on cleanup)
    _temp_dir: TempDir,
    base: PathBuf,
    dirs: Directories,
    pool_dir: PathBuf,
    /// Unique test ID
    pub test_id: u32,
}

impl TestEnvironment {
    /// Create the directory tree
    pub fn new() -> io::Result<Self> {
        let test_id = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
        let temp_dir = TempDir::new()?;
        let base = temp_dir.path().join(format!("endit-{test_id}"));

        let dirs = Directories::under(&base);
        dirs.create_all().map_err(io::Error::other)?;
        let pool_dir = base.join("pool");
        fs::create_dir_all(&pool_dir)?;

        Ok(Self {
            _temp_dir: temp_dir,
            base,
            dirs,
            pool_dir,
            test_id,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn dirs(&self) -> &Directories {
        &self.dirs
    }

    /// Where replicas live; not shared with the agent
    pub fn pool_dir(&self) -> &Path {
        &self.pool_dir
    }

    /// Locators come out as `endit://test?bfid=<id>`
    pub fn provider(&self) -> ProviderConfig {
        ProviderConfig {
            hsm_type: "endit".to_string(),
            name: "test".to_string(),
        }
    }

    /// Engine config pointing at this tree
    pub fn config(&self) -> Config {
        Config {
            provider: self.provider(),
            directories: DirectoryConfig {
                base: self.base.clone(),
                ..Default::default()
            },
            ..Default::default()
        }
    }

    /// Agent side: flush of `id` is on tape
    pub fn write_flush_result(&self, id: &str) -> io::Result<PathBuf> {
        let path = self.dirs.flush_result.join(id);
        fs::write(&path, b"")?;
        Ok(path)
    }

    /// Agent side: flush of `id` failed
    pub fn write_flush_error(&self, id: &str, message: &str) -> io::Result<PathBuf> {
        let path = self.dirs.flush_result.join(format!("{id}.err"));
        fs::write(&path, message)?;
        Ok(path)
    }

    /// Agent side: (part of) the staged data for `id`
    pub fn write_staged(&self, id: &str, data: &[u8]) -> io::Result<PathBuf> {
        let path = self.dirs.stage_input.join(id);
        fs::write(&path, data)?;
        Ok(path)
    }

    /// Agent side: stage of `id` failed
    pub fn write_stage_error(&self, id: &str, message: &str) -> io::Result<PathBuf> {
        let path = self.dirs.stage_input.join(format!("{id}.err"));
        fs::write(&path, message)?;
        Ok(path)
    }

    /// Backdate (or postdate) `path` to `secs` after the epoch
    pub fn set_mtime(&self, path: &Path, secs: i64) -> io::Result<()> {
        set_file_mtime(path, FileTime::from_unix_time(secs, 0))
    }
}

/// Event source driven by the test through a [`ManualHandle`]
pub struct ManualSource {
    rx: Option<mpsc::UnboundedReceiver<EventResult>>,
    watched: Arc<Mutex<Vec<WatchDir>>>,
}

/// Sending side of a [`ManualSource`]. Dropping every handle ends the stream.
#[derive(Clone)]
pub struct ManualHandle {
    tx: mpsc::UnboundedSender<EventResult>,
    watched: Arc<Mutex<Vec<WatchDir>>>,
}

impl ManualSource {
    pub fn new() -> (Self, ManualHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let watched = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                rx: Some(rx),
                watched: watched.clone(),
            },
            ManualHandle { tx, watched },
        )
    }
}

impl EventSource for ManualSource {
    /// Can only be watched once
    fn watch(&mut self, dirs: &[WatchDir]) -> Result<EventStream, WatchError> {
        let rx = self.rx.take().ok_or(WatchError::AlreadyWatching)?;
        *self.watched.lock().unwrap_or_else(PoisonError::into_inner) = dirs.to_vec();
        Ok(EventStream::new(rx, Box::new(())))
    }
}

impl ManualHandle {
    /// Report a change; `false` once the watch loop is gone
    pub fn changed(&self, path: impl Into<PathBuf>) -> bool {
        self.tx.send(Ok(FsEvent::Changed(path.into()))).is_ok()
    }

    /// Report lost events
    pub fn overflow(&self) -> bool {
        self.tx.send(Ok(FsEvent::Overflow { dir: None })).is_ok()
    }

    /// Break the event source
    pub fn fail(&self, error: io::Error) -> bool {
        self.tx.send(Err(WatchError::Io(error))).is_ok()
    }

    /// Directories the engine asked to watch
    pub fn watched_dirs(&self) -> Vec<WatchDir> {
        self.watched
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
