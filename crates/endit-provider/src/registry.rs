//! Watched path → owning task.
//!
//! The registry holds a strong reference to every owner until it is
//! unregistered, so a task stays tracked even when its caller lets go.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

pub struct TaskRegistry<T> {
    entries: DashMap<PathBuf, Arc<T>>,
}

impl<T> Default for TaskRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> TaskRegistry<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    /// Claim every path for `owner`.
    ///
    /// Paths owned by someone else are returned as conflicts and left alone.
    /// Paths claimed before a conflict was hit stay claimed; the caller is
    /// expected to [`unregister`](Self::unregister) on failure.
    pub fn register(&self, paths: &[PathBuf], owner: &Arc<T>) -> Result<(), Vec<PathBuf>> {
        let mut conflicts = Vec::new();

        for path in paths {
            match self.entries.entry(path.clone()) {
                Entry::Occupied(entry) => {
                    if !Arc::ptr_eq(entry.get(), owner) {
                        conflicts.push(path.clone());
                    }
                }
                Entry::Vacant(entry) => {
                    entry.insert(owner.clone());
                }
            }
        }

        if conflicts.is_empty() {
            Ok(())
        } else {
            Err(conflicts)
        }
    }

    /// Drop the entries for `paths` that `owner` still holds.
    ///
    /// Returns the paths that were actually released.
    pub fn unregister(&self, paths: &[PathBuf], owner: &T) -> Vec<PathBuf> {
        let owner: *const T = owner;
        paths
            .iter()
            .filter_map(|path| {
                self.entries
                    .remove_if(path, |_, current| std::ptr::eq(Arc::as_ptr(current), owner))
                    .map(|(path, _)| path)
            })
            .collect()
    }

    pub fn lookup(&self, path: &Path) -> Option<Arc<T>> {
        self.entries.get(path).map(|entry| entry.value().clone())
    }

    /// Every owner, once each
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        let mut owners: Vec<Arc<T>> = Vec::new();
        for entry in self.entries.iter() {
            if !owners.iter().any(|known| Arc::ptr_eq(known, entry.value())) {
                owners.push(entry.value().clone());
            }
        }
        owners
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
