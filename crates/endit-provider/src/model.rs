//! Request and outcome types exchanged with the host pool.

use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use url::Url;

use crate::error::TaskError;

/// Pool-side file identifier.
///
/// Used verbatim as a file name inside the agent directories, so it can never
/// be empty, contain a path separator, or be a relative component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FileId(String);

impl FileId {
    pub fn new(id: impl Into<String>) -> Result<Self, TaskError> {
        let id = id.into();
        if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\', '\0']) {
            return Err(TaskError::InvalidFileId(id));
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Name of the agent's failure sentinel for this id
    pub fn error_file_name(&self) -> String {
        format!("{}.err", self.0)
    }
}

impl fmt::Display for FileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for FileId {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Direction of a nearline transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    /// Pool to tape
    Flush,
    /// Tape to pool
    Stage,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskKind::Flush => f.write_str("flush"),
            TaskKind::Stage => f.write_str("stage"),
        }
    }
}

/// Storage attributes of a pool file, serialized as `key=value;key=value;`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StorageInfo {
    entries: Vec<(String, String)>,
}

impl StorageInfo {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an attribute, keeping insertion order
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    /// Set an attribute; an existing key keeps its position
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Display for StorageInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            write!(f, "{key}={value};")?;
        }
        Ok(())
    }
}

impl FromStr for StorageInfo {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut info = StorageInfo::new();
        for pair in s.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| TaskError::InvalidStorageInfo(pair.to_string()))?;
            info.insert(key.trim(), value.trim());
        }
        Ok(info)
    }
}

/// Request to copy a pool file to tape
#[derive(Debug, Clone)]
pub struct FlushRequest {
    pub id: FileId,
    pub storage_info: StorageInfo,
    /// Namespace path, prepended to the request as `path=` when known
    pub path: Option<String>,
}

/// Request to bring a file back from tape into the pool
#[derive(Debug, Clone)]
pub struct StageRequest {
    pub id: FileId,
    /// Expected byte count of the staged data
    pub size: u64,
    /// Replica location the staged data is moved to
    pub replica: PathBuf,
}

/// Checksum of staged data
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Checksum {
    pub algorithm: String,
    pub value: String,
}

/// Tape location of a flushed file: `<type>://<name>?bfid=<id>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Locator(Url);

impl Locator {
    pub fn new(hsm_type: &str, name: &str, id: &FileId) -> Result<Self, TaskError> {
        let mut url = Url::parse(&format!("{hsm_type}://{name}"))
            .map_err(|e| TaskError::InvalidLocator(format!("{hsm_type}://{name}: {e}")))?;
        url.query_pairs_mut().append_pair("bfid", id.as_str());
        Ok(Self(url))
    }

    pub fn hsm_type(&self) -> &str {
        self.0.scheme()
    }

    pub fn hsm_name(&self) -> Option<&str> {
        self.0.host_str()
    }

    /// The file identifier the agent uses to restore or purge the copy
    pub fn bfid(&self) -> Option<String> {
        self.0
            .query_pairs()
            .find(|(k, _)| k == "bfid")
            .map(|(_, v)| v.into_owned())
    }

    pub fn as_url(&self) -> &Url {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0.as_str())
    }
}

impl FromStr for Locator {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Url::parse(s)
            .map(Self)
            .map_err(|e| TaskError::InvalidLocator(format!("{s}: {e}")))
    }
}

/// Successful result of a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Flushed(Locator),
    Staged(BTreeSet<Checksum>),
}

impl Outcome {
    pub fn locator(&self) -> Option<&Locator> {
        match self {
            Outcome::Flushed(locator) => Some(locator),
            Outcome::Staged(_) => None,
        }
    }

    pub fn checksums(&self) -> Option<&BTreeSet<Checksum>> {
        match self {
            Outcome::Flushed(_) => None,
            Outcome::Staged(checksums) => Some(checksums),
        }
    }
}
