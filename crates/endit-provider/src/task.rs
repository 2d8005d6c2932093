//! The contract every nearline task fulfils.
//!
//! A task hands a request to the agent by writing a file, then learns about
//! the outcome purely by inspecting the filesystem. Every method must be
//! idempotent with respect to redundant calls: the engine may poll a task
//! many times without anything having changed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::{FileId, Outcome, TaskKind};

pub trait Task: Send + 'static {
    fn id(&self) -> &FileId;

    fn kind(&self) -> TaskKind;

    /// Paths whose changes must reach this task. Fixed for the task's lifetime.
    fn watched_paths(&self) -> &[PathBuf];

    /// Hand the request to the agent.
    ///
    /// `Ok(Some(_))` means the task completed without involving the agent.
    fn start(&self, path_hint: Option<&str>) -> Result<Option<Outcome>>;

    /// Check the filesystem for an outcome; `Ok(None)` while still pending.
    fn poll(&self) -> Result<Option<Outcome>>;

    /// Withdraw the request. `Ok(false)` means there was no request to withdraw.
    fn abort(&self) -> Result<bool>;
}

/// Remove a file that may already be gone; `Ok(true)` only if something was removed
pub(crate) fn delete_if_exists(path: &Path) -> io::Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Consume an agent error file.
///
/// Returns its lines; `error_file` and every path in `cleanup` are deleted
/// even when reading fails.
pub(crate) fn take_error_file(error_file: &Path, cleanup: &[&Path]) -> Result<Vec<String>> {
    let contents = fs::read_to_string(error_file);
    for path in cleanup {
        delete_if_exists(path)?;
    }
    delete_if_exists(error_file)?;
    Ok(contents?.lines().map(str::to_owned).collect())
}

/// Size of `path` if it is a regular file
pub(crate) fn regular_file_size(path: &Path) -> Option<u64> {
    fs::metadata(path)
        .ok()
        .filter(|meta| meta.is_file())
        .map(|meta| meta.len())
}
