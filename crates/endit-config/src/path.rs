//! Path helpers for configured directories.

use std::path::{Path, PathBuf};

/// Expand a leading `~/` to the user's home directory.
///
/// Paths without the prefix, or when no home directory is known, are returned as-is.
pub fn expand_home(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    match path.strip_prefix("~") {
        Ok(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => path.to_path_buf(),
        },
        Err(_) => path.to_path_buf(),
    }
}

/// Normalize path, falling back to the original if canonicalization fails.
///
/// Useful for comparing event paths against configured directories when one
/// side may go through a symlink.
pub fn normalize_or_original(path: impl AsRef<Path>) -> PathBuf {
    let path = path.as_ref();
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
