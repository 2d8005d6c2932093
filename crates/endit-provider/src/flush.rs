//! Flush: copy a pool file to tape.
//!
//! ```text
//! <flush_request>/<id>   written by us, storage attributes
//! <flush_result>/<id>    written by the agent once the copy is on tape
//! <flush_result>/<id>.err written by the agent on failure
//! ```

use std::fs;
use std::path::PathBuf;

use endit_config::{log_flush_debug, log_flush_info, log_flush_warn, Directories, ProviderConfig};

use crate::error::{Result, TaskError};
use crate::model::{FileId, FlushRequest, Locator, Outcome, StorageInfo, TaskKind};
use crate::task::{delete_if_exists, take_error_file, Task};

#[derive(Debug)]
pub struct FlushTask {
    id: FileId,
    storage_info: StorageInfo,
    hsm_type: String,
    hsm_name: String,
    out_file: PathBuf,
    error_file: PathBuf,
    request_file: PathBuf,
    /// `[out_file, error_file]`
    watched: [PathBuf; 2],
}

impl FlushTask {
    pub fn new(request: &FlushRequest, dirs: &Directories, provider: &ProviderConfig) -> Self {
        let out_file = dirs.flush_result.join(request.id.as_str());
        let error_file = dirs.flush_result.join(request.id.error_file_name());
        Self {
            id: request.id.clone(),
            storage_info: request.storage_info.clone(),
            hsm_type: provider.hsm_type.clone(),
            hsm_name: provider.name.clone(),
            request_file: dirs.flush_request.join(request.id.as_str()),
            watched: [out_file.clone(), error_file.clone()],
            out_file,
            error_file,
        }
    }

    /// Request body: the storage attributes, with `path=` prepended when the
    /// attributes lack it and a non-empty hint is given.
    fn request_body(&self, path_hint: Option<&str>) -> String {
        let attributes = self.storage_info.to_string();
        match path_hint {
            Some(path) if !path.is_empty() && !self.storage_info.contains_key("path") => {
                format!("path={path};{attributes}")
            }
            _ => attributes,
        }
    }
}

impl Task for FlushTask {
    fn id(&self) -> &FileId {
        &self.id
    }

    fn kind(&self) -> TaskKind {
        TaskKind::Flush
    }

    fn watched_paths(&self) -> &[PathBuf] {
        &self.watched
    }

    fn start(&self, path_hint: Option<&str>) -> Result<Option<Outcome>> {
        log_flush_info!(id = %self.id, "Writing flush request");
        fs::write(&self.request_file, self.request_body(path_hint))?;
        Ok(None)
    }

    fn poll(&self) -> Result<Option<Outcome>> {
        if self.error_file.exists() {
            let lines = take_error_file(&self.error_file, &[&self.out_file, &self.request_file])?;
            log_flush_warn!(id = %self.id, ?lines, "Flush request failed");
            return Err(TaskError::AgentReported(lines));
        }
        if self.out_file.exists() {
            let locator = Locator::new(&self.hsm_type, &self.hsm_name, &self.id)?;
            log_flush_debug!(id = %self.id, %locator, "Sending back locator");
            delete_if_exists(&self.out_file)?;
            delete_if_exists(&self.request_file)?;
            log_flush_info!(id = %self.id, "File on tape");
            return Ok(Some(Outcome::Flushed(locator)));
        }
        Ok(None)
    }

    fn abort(&self) -> Result<bool> {
        log_flush_info!(id = %self.id, "Aborting flush");
        if delete_if_exists(&self.request_file)? {
            delete_if_exists(&self.error_file)?;
            delete_if_exists(&self.out_file)?;
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::TestEnvironment;

    fn flush_task(env: &TestEnvironment, id: &str, info: StorageInfo) -> FlushTask {
        let request = FlushRequest {
            id: FileId::new(id).unwrap(),
            storage_info: info,
            path: None,
        };
        FlushTask::new(&request, env.dirs(), &env.provider())
    }

    #[test]
    fn test_start_prepends_path_hint() {
        let env = TestEnvironment::new().unwrap();
        let task = flush_task(&env, "0001", StorageInfo::new().with("hsm", "osm"));

        assert_eq!(task.start(Some("/pnfs/data/file")).unwrap(), None);
        let body = fs::read_to_string(env.dirs().flush_request.join("0001")).unwrap();
        assert_eq!(body, "path=/pnfs/data/file;hsm=osm;");
    }

    #[test]
    fn test_start_keeps_existing_path() {
        let env = TestEnvironment::new().unwrap();
        let info = StorageInfo::new().with("path", "/pnfs/a").with("hsm", "osm");
        let task = flush_task(&env, "0002", info);

        task.start(Some("/pnfs/other")).unwrap();
        let body = fs::read_to_string(env.dirs().flush_request.join("0002")).unwrap();
        assert_eq!(body, "path=/pnfs/a;hsm=osm;");

        let task = flush_task(&env, "0003", StorageInfo::new().with("hsm", "osm"));
        task.start(Some("")).unwrap();
        let body = fs::read_to_string(env.dirs().flush_request.join("0003")).unwrap();
        assert_eq!(body, "hsm=osm;");
    }

    #[test]
    fn test_poll_success_returns_locator_and_cleans_up() {
        let env = TestEnvironment::new().unwrap();
        let task = flush_task(&env, "0004", StorageInfo::new());
        task.start(None).unwrap();

        assert_eq!(task.poll().unwrap(), None);
        assert_eq!(task.poll().unwrap(), None);

        env.write_flush_result("0004").unwrap();
        let outcome = task.poll().unwrap().unwrap();
        let locator = outcome.locator().unwrap();
        assert_eq!(locator.to_string(), "endit://test?bfid=0004");
        assert!(!env.dirs().flush_result.join("0004").exists());
        assert!(!env.dirs().flush_request.join("0004").exists());
    }

    #[test]
    fn test_error_takes_precedence_over_result() {
        let env = TestEnvironment::new().unwrap();
        let task = flush_task(&env, "0005", StorageInfo::new());
        task.start(None).unwrap();
        env.write_flush_result("0005").unwrap();
        env.write_flush_error("0005", "drive offline\nretry later").unwrap();

        match task.poll() {
            Err(TaskError::AgentReported(lines)) => {
                assert_eq!(lines, vec!["drive offline", "retry later"])
            }
            other => panic!("expected agent failure, got {other:?}"),
        }
        assert!(!env.dirs().flush_result.join("0005").exists());
        assert!(!env.dirs().flush_result.join("0005.err").exists());
        assert!(!env.dirs().flush_request.join("0005").exists());
    }

    #[test]
    fn test_abort_only_when_request_exists() {
        let env = TestEnvironment::new().unwrap();
        let task = flush_task(&env, "0006", StorageInfo::new());
        assert!(!task.abort().unwrap());

        task.start(None).unwrap();
        env.write_flush_result("0006").unwrap();
        assert!(task.abort().unwrap());
        assert!(!env.dirs().flush_request.join("0006").exists());
        assert!(!env.dirs().flush_result.join("0006").exists());
    }

    #[test]
    fn test_watched_paths() {
        let env = TestEnvironment::new().unwrap();
        let task = flush_task(&env, "0007", StorageInfo::new());
        assert_eq!(
            task.watched_paths(),
            &[
                env.dirs().flush_result.join("0007"),
                env.dirs().flush_result.join("0007.err")
            ]
        );
    }
}
