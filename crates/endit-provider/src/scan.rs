//! Fallback scan after the notification backend lost events.
//!
//! Lists the result directories and hands every entry to the dispatcher,
//! oldest first, so results the agent wrote long ago are not starved by
//! a stream of fresh ones.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::SystemTime;

use endit_config::log_watch_debug;

/// Lists result directories in modification order
#[derive(Debug, Clone)]
pub struct FallbackScanner {
    dirs: Vec<PathBuf>,
}

impl FallbackScanner {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self { dirs }
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    /// Every entry of every directory, sorted by mtime ascending.
    ///
    /// Entries whose metadata can't be read (typically removed while we
    /// list) sort first; the dispatcher will find nothing there. Failing
    /// to list a directory fails the whole scan.
    pub fn scan(&self) -> io::Result<Vec<PathBuf>> {
        let mut entries: Vec<(SystemTime, PathBuf)> = Vec::new();

        for dir in &self.dirs {
            for entry in fs::read_dir(dir)? {
                let entry = entry?;
                let mtime = entry
                    .metadata()
                    .and_then(|m| m.modified())
                    .unwrap_or(SystemTime::UNIX_EPOCH);
                entries.push((mtime, entry.path()));
            }
        }

        // stable: equal mtimes keep listing order
        entries.sort_by_key(|(mtime, _)| *mtime);
        log_watch_debug!(count = entries.len(), "Fallback scan listed entries");

        Ok(entries.into_iter().map(|(_, path)| path).collect())
    }
}
