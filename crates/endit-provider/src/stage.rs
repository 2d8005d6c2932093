//! Stage: bring a file back from tape into the pool.
//!
//! ```text
//! <stage_request>/<id>  written by us, `size=<bytes>`
//! <stage_input>/<id>    written by the agent, complete once its size matches
//! <stage_input>/<id>.err written by the agent on failure
//! ```
//!
//! The agent may still be writing `<stage_input>/<id>` when we look at it, so
//! a size mismatch only means "not yet".

use std::collections::BTreeSet;
use std::fs;
use std::path::PathBuf;

use endit_config::{log_stage_info, log_stage_warn, Directories};

use crate::error::{Result, TaskError};
use crate::model::{FileId, Outcome, StageRequest, TaskKind};
use crate::task::{delete_if_exists, regular_file_size, take_error_file, Task};

#[derive(Debug)]
pub struct StageTask {
    id: FileId,
    size: u64,
    target: PathBuf,
    in_file: PathBuf,
    error_file: PathBuf,
    request_file: PathBuf,
    /// `[error_file, in_file]`
    watched: [PathBuf; 2],
}

impl StageTask {
    pub fn new(request: &StageRequest, dirs: &Directories) -> Self {
        let in_file = dirs.stage_input.join(request.id.as_str());
        let error_file = dirs.stage_input.join(request.id.error_file_name());
        Self {
            id: request.id.clone(),
            size: request.size,
            target: request.replica.clone(),
            request_file: dirs.stage_request.join(request.id.as_str()),
            watched: [error_file.clone(), in_file.clone()],
            in_file,
            error_file,
        }
    }

    fn is_complete(&self) -> bool {
        regular_file_size(&self.in_file) == Some(self.size)
    }

    fn move_into_pool(&self) -> Result<Outcome> {
        fs::rename(&self.in_file, &self.target)?;
        Ok(Outcome::Staged(BTreeSet::new()))
    }
}

impl Task for StageTask {
    fn id(&self) -> &FileId {
        &self.id
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Stage
    }

    fn watched_paths(&self) -> &[PathBuf] {
        &self.watched
    }

    /// The path hint is meaningless for stages and ignored.
    fn start(&self, _path_hint: Option<&str>) -> Result<Option<Outcome>> {
        // Left over from a previous run that died before picking it up
        if self.is_complete() {
            let outcome = self.move_into_pool()?;
            log_stage_warn!(id = %self.id, "Found staged file on start, moved it to pool");
            return Ok(Some(outcome));
        }
        fs::write(&self.request_file, format!("size={}", self.size))?;
        Ok(None)
    }

    fn poll(&self) -> Result<Option<Outcome>> {
        if self.error_file.exists() {
            let lines = take_error_file(&self.error_file, &[&self.in_file, &self.request_file])?;
            log_stage_warn!(id = %self.id, ?lines, "Stage request failed");
            return Err(TaskError::AgentReported(lines));
        }
        if self.is_complete() {
            delete_if_exists(&self.request_file)?;
            let outcome = self.move_into_pool()?;
            log_stage_info!(id = %self.id, "Moved staged file to pool");
            return Ok(Some(outcome));
        }
        Ok(None)
    }

    fn abort(&self) -> Result<bool> {
        log_stage_info!(id = %self.id, "Aborting stage");
        if delete_if_exists(&self.request_file)? {
            delete_if_exists(&self.error_file)?;
            delete_if_exists(&self.in_file)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnvironment;

    fn stage_task(env: &TestEnvironment, id: &str, size: u64) -> StageTask {
        let request = StageRequest {
            id: FileId::new(id).unwrap(),
            size,
            replica: env.pool_dir().join(id),
        };
        StageTask::new(&request, env.dirs())
    }

    #[test]
    fn test_start_writes_size_request() {
        let env = TestEnvironment::new().unwrap();
        let task = stage_task(&env, "0101", 42);

        assert_eq!(task.start(Some("/ignored")).unwrap(), None);
        let body = fs::read_to_string(env.dirs().stage_request.join("0101")).unwrap();
        assert_eq!(body, "size=42");
    }

    #[test]
    fn test_start_picks_up_existing_input() {
        let env = TestEnvironment::new().unwrap();
        env.write_staged("0102", b"hello").unwrap();
        let task = stage_task(&env, "0102", 5);

        let outcome = task.start(None).unwrap().unwrap();
        assert_eq!(outcome, Outcome::Staged(BTreeSet::new()));
        assert_eq!(fs::read(env.pool_dir().join("0102")).unwrap(), b"hello");
        assert!(!env.dirs().stage_request.join("0102").exists());
    }

    #[test]
    fn test_partial_input_is_not_complete() {
        let env = TestEnvironment::new().unwrap();
        let task = stage_task(&env, "0103", 10);
        task.start(None).unwrap();

        env.write_staged("0103", b"12345").unwrap();
        assert_eq!(task.poll().unwrap(), None);
        assert_eq!(task.poll().unwrap(), None);
        assert!(env.dirs().stage_input.join("0103").exists());
        assert!(!env.pool_dir().join("0103").exists());

        env.write_staged("0103", b"1234567890").unwrap();
        assert!(task.poll().unwrap().is_some());
        assert!(env.pool_dir().join("0103").exists());
        assert!(!env.dirs().stage_input.join("0103").exists());
        assert!(!env.dirs().stage_request.join("0103").exists());
    }

    #[test]
    fn test_error_takes_precedence_over_input() {
        let env = TestEnvironment::new().unwrap();
        let task = stage_task(&env, "0104", 3);
        task.start(None).unwrap();
        env.write_staged("0104", b"abc").unwrap();
        env.write_stage_error("0104", "checksum mismatch").unwrap();

        assert!(matches!(
            task.poll(),
            Err(TaskError::AgentReported(lines)) if lines == vec!["checksum mismatch"]
        ));
        assert!(!env.dirs().stage_input.join("0104").exists());
        assert!(!env.dirs().stage_input.join("0104.err").exists());
        assert!(!env.dirs().stage_request.join("0104").exists());
        assert!(!env.pool_dir().join("0104").exists());
    }

    #[test]
    fn test_abort_without_request_is_a_noop() {
        let env = TestEnvironment::new().unwrap();
        let task = stage_task(&env, "0105", 3);
        env.write_staged("0105", b"a").unwrap();

        assert!(!task.abort().unwrap());
        // nothing was withdrawn, so the agent's data stays
        assert!(env.dirs().stage_input.join("0105").exists());

        task.start(None).unwrap();
        assert!(task.abort().unwrap());
        assert!(!env.dirs().stage_input.join("0105").exists());
        assert!(!env.dirs().stage_request.join("0105").exists());
    }
}
