//! Error types.

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;

/// Failure of a single nearline task
#[derive(Error, Debug)]
pub enum TaskError {
    #[error("Duplicate nearline requests on {}", path.display())]
    DuplicateRequest { path: PathBuf },

    /// Lines of the agent's `.err` file, verbatim
    #[error("Agent reported failure: {}", .0.join(" "))]
    AgentReported(Vec<String>),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Provider is shut down")]
    Shutdown,

    #[error("Invalid file id: {0:?}")]
    InvalidFileId(String),

    #[error("Invalid storage info entry: {0:?}")]
    InvalidStorageInfo(String),

    #[error("Invalid locator: {0}")]
    InvalidLocator(String),
}

/// Terminal failure of a task: the error that ended it, plus anything that
/// went wrong while cleaning up afterwards.
#[derive(Debug)]
pub struct TaskFailure {
    pub primary: TaskError,
    pub suppressed: Vec<TaskError>,
}

impl TaskFailure {
    pub fn new(primary: TaskError) -> Self {
        Self {
            primary,
            suppressed: Vec::new(),
        }
    }
}

impl From<TaskError> for TaskFailure {
    fn from(primary: TaskError) -> Self {
        Self::new(primary)
    }
}

impl fmt::Display for TaskFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary)?;
        for suppressed in &self.suppressed {
            write!(f, " (suppressed: {suppressed})")?;
        }
        Ok(())
    }
}

impl std::error::Error for TaskFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.primary)
    }
}

/// Why waiting on a task did not produce an outcome
#[derive(Error, Debug, Clone)]
pub enum WaitError {
    #[error("{0}")]
    Failed(Arc<TaskFailure>),

    #[error("Task was cancelled")]
    Cancelled,
}

/// Failure of the notification mechanism itself; fatal to the engine
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Watch backend error: {0}")]
    Notify(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Event source already in use")]
    AlreadyWatching,
}

/// Errors starting or running the engine
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Config error: {0}")]
    Config(#[from] endit_config::ConfigError),

    #[error("Watch error: {0}")]
    Watch(#[from] WatchError),

    #[error("Task error: {0}")]
    Task(#[from] TaskError),

    #[error("Engine must be started inside a Tokio runtime")]
    NoRuntime,
}

pub type Result<T> = std::result::Result<T, TaskError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display_keeps_primary_first() {
        let mut failure = TaskFailure::new(TaskError::AgentReported(vec![
            "tape".to_string(),
            "unavailable".to_string(),
        ]));
        failure
            .suppressed
            .push(TaskError::Io(io::Error::other("cleanup failed")));

        let text = failure.to_string();
        assert!(text.starts_with("Agent reported failure: tape unavailable"));
        assert!(text.contains("suppressed: I/O error: cleanup failed"));
    }
}
