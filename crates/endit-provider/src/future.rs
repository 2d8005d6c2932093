//! Caller-facing handle of a nearline task.
//!
//! A [`TaskFuture`] wraps its task and moves from `Pending` to exactly one of
//! `Succeeded`, `Failed` or `Cancelled`. Every lifecycle call on the task
//! (start, poll, abort) happens under the future's lifecycle lock, so a task
//! is never polled and aborted at the same time and resolves only once.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use endit_config::{log_engine_info, log_engine_warn};
use tokio::sync::Notify;

use crate::error::{TaskError, TaskFailure, WaitError};
use crate::model::{FileId, Outcome, TaskKind};
use crate::queue::PendingQueue;
use crate::registry::TaskRegistry;
use crate::task::Task;

/// Observable state of a task
#[derive(Debug, Clone)]
pub enum TaskState {
    Pending,
    Succeeded(Outcome),
    Failed(Arc<TaskFailure>),
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskState::Pending)
    }

    fn to_result(&self) -> Option<Result<Outcome, WaitError>> {
        match self {
            TaskState::Pending => None,
            TaskState::Succeeded(outcome) => Some(Ok(outcome.clone())),
            TaskState::Failed(failure) => Some(Err(WaitError::Failed(failure.clone()))),
            TaskState::Cancelled => Some(Err(WaitError::Cancelled)),
        }
    }
}

/// Registry and pending queue shared by the futures of one engine
#[derive(Default)]
pub struct Tracker {
    registry: TaskRegistry<TaskSlot>,
    queue: PendingQueue,
}

impl Tracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    /// Wrap `task` in a future and claim its watched paths.
    ///
    /// When another task already owns one of the paths the returned future
    /// has already failed with [`TaskError::DuplicateRequest`].
    pub fn track(self: &Arc<Self>, task: Box<dyn Task>) -> TaskFuture {
        let slot = Arc::new(TaskSlot {
            id: task.id().clone(),
            kind: task.kind(),
            paths: task.watched_paths().to_vec(),
            task: Mutex::new(task),
            state: Mutex::new(TaskState::Pending),
            resolved: Condvar::new(),
            resolved_async: Notify::new(),
            tracker: self.clone(),
        });
        let future = TaskFuture { slot };

        // Hold the lifecycle lock so nobody polls a half-registered task
        let guard = future.lock_task();
        if let Err(conflicts) = self.registry.register(&future.slot.paths, &future.slot) {
            log_engine_warn!(
                id = %future.slot.id,
                path = %conflicts[0].display(),
                "Duplicate nearline request"
            );
            let path = conflicts.into_iter().next().unwrap_or_default();
            future.complete(TaskState::Failed(Arc::new(
                TaskError::DuplicateRequest { path }.into(),
            )));
        }
        drop(guard);

        future
    }

    /// Future owning `path`, if any
    pub fn lookup(&self, path: &Path) -> Option<TaskFuture> {
        self.registry.lookup(path).map(|slot| TaskFuture { slot })
    }

    /// Every registered future, once each
    pub fn tasks(&self) -> Vec<TaskFuture> {
        self.registry
            .snapshot()
            .into_iter()
            .map(|slot| TaskFuture { slot })
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }
}

/// Shared state behind every clone of a [`TaskFuture`].
///
/// The registry holds the slot until the task resolves; dropping every
/// future leaves the task running.
pub struct TaskSlot {
    id: FileId,
    kind: TaskKind,
    paths: Vec<PathBuf>,
    /// Lifecycle lock
    task: Mutex<Box<dyn Task>>,
    state: Mutex<TaskState>,
    resolved: Condvar,
    resolved_async: Notify,
    tracker: Arc<Tracker>,
}

#[derive(Clone)]
pub struct TaskFuture {
    slot: Arc<TaskSlot>,
}

impl fmt::Debug for TaskFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskFuture")
            .field("id", &self.slot.id)
            .field("kind", &self.slot.kind)
            .field("state", &self.state())
            .finish()
    }
}

impl TaskFuture {
    pub fn id(&self) -> &FileId {
        &self.slot.id
    }

    pub fn kind(&self) -> TaskKind {
        self.slot.kind
    }

    pub fn watched_paths(&self) -> &[PathBuf] {
        &self.slot.paths
    }

    pub fn state(&self) -> TaskState {
        self.lock_state().clone()
    }

    pub fn is_done(&self) -> bool {
        self.lock_state().is_terminal()
    }

    /// Outcome if the task has finished, without waiting
    pub fn try_result(&self) -> Option<Result<Outcome, WaitError>> {
        self.lock_state().to_result()
    }

    /// Wait until the task finishes
    pub async fn wait(&self) -> Result<Outcome, WaitError> {
        loop {
            let notified = self.slot.resolved_async.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(result) = self.try_result() {
                return result;
            }
            notified.await;
        }
    }

    /// Block the calling thread until the task finishes or `timeout` passes.
    ///
    /// Returns `None` on timeout. Not for use on runtime worker threads.
    pub fn wait_blocking(&self, timeout: Option<Duration>) -> Option<Result<Outcome, WaitError>> {
        let state = self.lock_state();
        let state = match timeout {
            None => self
                .slot
                .resolved
                .wait_while(state, |s| !s.is_terminal())
                .unwrap_or_else(PoisonError::into_inner),
            Some(timeout) => {
                self.slot
                    .resolved
                    .wait_timeout_while(state, timeout, |s| !s.is_terminal())
                    .unwrap_or_else(PoisonError::into_inner)
                    .0
            }
        };
        state.to_result()
    }

    /// Hand the request to the agent, then look for an outcome right away
    pub fn start(&self, path_hint: Option<&str>) {
        let task = self.lock_task();
        if self.is_done() {
            return;
        }
        match task.start(path_hint) {
            Ok(Some(outcome)) => self.complete(TaskState::Succeeded(outcome)),
            Ok(None) => self.poll_locked(&**task),
            Err(e) => self.fail(&**task, e),
        }
    }

    /// Re-evaluate the task against the filesystem. No-op once finished.
    pub fn poll(&self) {
        let task = self.lock_task();
        if self.is_done() {
            return;
        }
        self.poll_locked(&**task);
    }

    /// Withdraw the request.
    ///
    /// Returns `false` if the task already finished, or if there was no
    /// request to withdraw, in which case the task stays pending.
    pub fn cancel(&self) -> bool {
        let task = self.lock_task();
        if self.is_done() {
            return false;
        }
        match task.abort() {
            Ok(false) => false,
            Ok(true) => {
                log_engine_info!(id = %self.slot.id, kind = %self.slot.kind, "Task cancelled");
                self.complete(TaskState::Cancelled);
                true
            }
            Err(e) => {
                self.complete(TaskState::Failed(Arc::new(e.into())));
                true
            }
        }
    }

    /// Cancellation by engine shutdown: always ends the task
    pub(crate) fn cancel_on_shutdown(&self) {
        let task = self.lock_task();
        if self.is_done() {
            return;
        }
        if let Err(e) = task.abort() {
            log_engine_warn!(id = %self.slot.id, error = %e, "Abort on shutdown failed");
        }
        self.complete(TaskState::Cancelled);
    }

    /// Fail a task that never reached the agent; nothing is aborted
    pub(crate) fn reject(&self, error: TaskError) {
        let _guard = self.lock_task();
        if self.is_done() {
            return;
        }
        log_engine_warn!(id = %self.slot.id, kind = %self.slot.kind, %error, "Task rejected");
        self.complete(TaskState::Failed(Arc::new(error.into())));
    }

    fn poll_locked(&self, task: &dyn Task) {
        match task.poll() {
            Ok(None) => {}
            Ok(Some(outcome)) => self.complete(TaskState::Succeeded(outcome)),
            Err(e) => self.fail(task, e),
        }
    }

    /// Abort after a failure; anything the abort throws rides along as suppressed
    fn fail(&self, task: &dyn Task, error: TaskError) {
        let mut failure = TaskFailure::new(error);
        if let Err(suppressed) = task.abort() {
            failure.suppressed.push(suppressed);
        }
        log_engine_warn!(id = %self.slot.id, kind = %self.slot.kind, %failure, "Task failed");
        self.complete(TaskState::Failed(Arc::new(failure)));
    }

    fn complete(&self, state: TaskState) {
        self.untrack();
        let mut current = self.lock_state();
        if current.is_terminal() {
            return;
        }
        *current = state;
        drop(current);
        self.slot.resolved.notify_all();
        self.slot.resolved_async.notify_waiters();
    }

    /// Release the paths this task still owns, along with their queued events
    fn untrack(&self) {
        let tracker = &self.slot.tracker;
        for path in tracker.registry.unregister(&self.slot.paths, &self.slot) {
            tracker.queue.remove(&path);
        }
    }

    fn lock_task(&self) -> MutexGuard<'_, Box<dyn Task>> {
        self.slot.task.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_state(&self) -> MutexGuard<'_, TaskState> {
        self.slot.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flush::FlushTask;
    use crate::model::{FlushRequest, StageRequest, StorageInfo};
    use crate::stage::StageTask;
    use crate::testing::TestEnvironment;
    use std::io;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    fn flush(env: &TestEnvironment, tracker: &Arc<Tracker>, id: &str) -> TaskFuture {
        let request = FlushRequest {
            id: FileId::new(id).unwrap(),
            storage_info: StorageInfo::new().with("hsm", "osm"),
            path: None,
        };
        tracker.track(Box::new(FlushTask::new(&request, env.dirs(), &env.provider())))
    }

    fn stage(env: &TestEnvironment, tracker: &Arc<Tracker>, id: &str, size: u64) -> TaskFuture {
        let request = StageRequest {
            id: FileId::new(id).unwrap(),
            size,
            replica: env.pool_dir().join(id),
        };
        tracker.track(Box::new(StageTask::new(&request, env.dirs())))
    }

    /// Poll always fails; abort optionally fails too
    struct BrokenTask {
        id: FileId,
        paths: Vec<PathBuf>,
        abort_fails: bool,
        aborts: Arc<AtomicUsize>,
    }

    impl Task for BrokenTask {
        fn id(&self) -> &FileId {
            &self.id
        }
        fn kind(&self) -> TaskKind {
            TaskKind::Flush
        }
        fn watched_paths(&self) -> &[PathBuf] {
            &self.paths
        }
        fn start(&self, _: Option<&str>) -> crate::error::Result<Option<Outcome>> {
            Ok(None)
        }
        fn poll(&self) -> crate::error::Result<Option<Outcome>> {
            Err(io::Error::other("disk gone").into())
        }
        fn abort(&self) -> crate::error::Result<bool> {
            self.aborts.fetch_add(1, Ordering::SeqCst);
            if self.abort_fails {
                Err(io::Error::other("cleanup failed").into())
            } else {
                Ok(true)
            }
        }
    }

    #[test]
    fn test_success_resolves_once() {
        let env = TestEnvironment::new().unwrap();
        let tracker = Arc::new(Tracker::new());
        let future = flush(&env, &tracker, "A1");

        future.start(None);
        assert!(!future.is_done());
        future.poll();
        assert!(!future.is_done());

        env.write_flush_result("A1").unwrap();
        future.poll();
        let outcome = future.try_result().unwrap().unwrap();
        assert_eq!(outcome.locator().unwrap().bfid().as_deref(), Some("A1"));
        assert!(tracker.is_empty());

        // a late result file no longer matters
        env.write_flush_error("A1", "too late").unwrap();
        future.poll();
        assert!(matches!(future.state(), TaskState::Succeeded(_)));
        assert!(!future.cancel());
    }

    #[test]
    fn test_failure_records_suppressed_abort_error() {
        let aborts = Arc::new(AtomicUsize::new(0));
        let tracker = Arc::new(Tracker::new());
        let future = tracker.track(Box::new(BrokenTask {
            id: FileId::new("B1").unwrap(),
            paths: vec![PathBuf::from("/out/B1")],
            abort_fails: true,
            aborts: aborts.clone(),
        }));

        future.poll();
        match future.try_result() {
            Some(Err(WaitError::Failed(failure))) => {
                assert!(matches!(failure.primary, TaskError::Io(_)));
                assert_eq!(failure.suppressed.len(), 1);
            }
            other => panic!("expected failure, got {other:?}"),
        }
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
        assert!(tracker.is_empty());

        future.poll();
        assert_eq!(aborts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_agent_error_fails_future() {
        let env = TestEnvironment::new().unwrap();
        let tracker = Arc::new(Tracker::new());
        let future = stage(&env, &tracker, "C1", 4);
        future.start(None);

        env.write_stage_error("C1", "no such volume").unwrap();
        future.poll();
        match future.try_result() {
            Some(Err(WaitError::Failed(failure))) => {
                assert!(matches!(
                    &failure.primary,
                    TaskError::AgentReported(lines) if lines == &vec!["no such volume".to_string()]
                ));
                // the request file was already gone, abort had nothing to do
                assert!(failure.suppressed.is_empty());
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn test_cancel_before_request_keeps_pending() {
        let env = TestEnvironment::new().unwrap();
        let tracker = Arc::new(Tracker::new());
        let future = stage(&env, &tracker, "D1", 3);

        assert!(!future.cancel());
        assert!(!future.is_done());
        assert!(tracker.lookup(&env.dirs().stage_input.join("D1")).is_some());

        env.write_staged("D1", b"xyz").unwrap();
        future.poll();
        assert!(matches!(future.state(), TaskState::Succeeded(_)));
        assert_eq!(std::fs::read(env.pool_dir().join("D1")).unwrap(), b"xyz");
    }

    #[test]
    fn test_cancel_after_start() {
        let env = TestEnvironment::new().unwrap();
        let tracker = Arc::new(Tracker::new());
        let future = flush(&env, &tracker, "E1");
        future.start(None);

        assert!(future.cancel());
        assert!(matches!(future.try_result(), Some(Err(WaitError::Cancelled))));
        assert!(!env.dirs().flush_request.join("E1").exists());
        assert!(tracker.is_empty());
        assert!(!future.cancel());
    }

    #[test]
    fn test_duplicate_request_fails_second_only() {
        let env = TestEnvironment::new().unwrap();
        let tracker = Arc::new(Tracker::new());
        let first = flush(&env, &tracker, "F1");
        let second = flush(&env, &tracker, "F1");

        match second.try_result() {
            Some(Err(WaitError::Failed(failure))) => assert!(matches!(
                &failure.primary,
                TaskError::DuplicateRequest { path } if path == &env.dirs().flush_result.join("F1")
            )),
            other => panic!("expected duplicate failure, got {other:?}"),
        }
        assert!(!first.is_done());

        first.start(None);
        env.write_flush_result("F1").unwrap();
        let owner = tracker.lookup(&env.dirs().flush_result.join("F1")).unwrap();
        owner.poll();
        assert!(matches!(first.state(), TaskState::Succeeded(_)));
    }

    #[test]
    fn test_duplicate_keeps_owner_event_queued() {
        let env = TestEnvironment::new().unwrap();
        let tracker = Arc::new(Tracker::new());
        let first = flush(&env, &tracker, "F2");
        first.start(None);
        let result = env.write_flush_result("F2").unwrap();
        tracker.queue().push(result.clone());

        let second = flush(&env, &tracker, "F2");
        assert!(second.is_done());
        assert_eq!(tracker.queue().len(), 1);

        let path = tracker.queue().try_take().unwrap();
        assert_eq!(path, result);
        tracker.lookup(&path).unwrap().poll();
        assert!(matches!(first.state(), TaskState::Succeeded(_)));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_dropped_future_stays_tracked() {
        let env = TestEnvironment::new().unwrap();
        let tracker = Arc::new(Tracker::new());
        let result = env.dirs().flush_result.join("F3");
        flush(&env, &tracker, "F3").start(None);

        let owner = tracker.lookup(&result).unwrap();
        assert_eq!(owner.id().as_str(), "F3");
        drop(owner);
        assert_eq!(tracker.tasks().len(), 1);

        env.write_flush_result("F3").unwrap();
        tracker.lookup(&result).unwrap().poll();
        assert!(tracker.is_empty());
        assert!(!result.exists());
        assert!(!env.dirs().flush_request.join("F3").exists());
    }

    #[test]
    fn test_completion_removes_queued_paths() {
        let env = TestEnvironment::new().unwrap();
        let tracker = Arc::new(Tracker::new());
        let future = flush(&env, &tracker, "G1");
        future.start(None);

        tracker.queue().push(env.dirs().flush_result.join("G1"));
        tracker.queue().push(env.dirs().flush_result.join("other"));
        assert!(future.cancel());

        assert_eq!(tracker.queue().len(), 1);
        assert_eq!(
            tracker.queue().try_take(),
            Some(env.dirs().flush_result.join("other"))
        );
    }

    #[test]
    fn test_wait_blocking_times_out_while_pending() {
        let env = TestEnvironment::new().unwrap();
        let tracker = Arc::new(Tracker::new());
        let future = flush(&env, &tracker, "H1");
        future.start(None);

        assert!(future
            .wait_blocking(Some(Duration::from_millis(20)))
            .is_none());

        let poller = {
            let future = future.clone();
            let result = env.dirs().flush_result.join("H1");
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                std::fs::write(result, "").unwrap();
                future.poll();
            })
        };
        let result = future.wait_blocking(Some(Duration::from_secs(10)));
        poller.join().unwrap();
        assert!(matches!(result, Some(Ok(Outcome::Flushed(_)))));
    }

    #[tokio::test]
    async fn test_async_wait() {
        let env = TestEnvironment::new().unwrap();
        let tracker = Arc::new(Tracker::new());
        let future = flush(&env, &tracker, "I1");
        future.start(None);

        let waiter = {
            let future = future.clone();
            tokio::spawn(async move { future.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(future.cancel());

        let result = tokio::time::timeout(Duration::from_secs(5), waiter)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(WaitError::Cancelled)));
    }

    #[test]
    fn test_concurrent_poll_and_cancel_resolve_once() {
        for round in 0..20 {
            let env = TestEnvironment::new().unwrap();
            let tracker = Arc::new(Tracker::new());
            let id = format!("J{round}");
            let future = flush(&env, &tracker, &id);
            future.start(None);
            env.write_flush_result(&id).unwrap();

            let poller = {
                let future = future.clone();
                thread::spawn(move || future.poll())
            };
            let canceller = {
                let future = future.clone();
                thread::spawn(move || future.cancel())
            };
            poller.join().unwrap();
            let cancelled = canceller.join().unwrap();

            match future.state() {
                TaskState::Cancelled => assert!(cancelled),
                TaskState::Succeeded(_) => assert!(!cancelled),
                other => panic!("unexpected state {other:?}"),
            }
            assert!(tracker.is_empty());
        }
    }

    #[test]
    fn test_shutdown_cancels_even_without_request() {
        let env = TestEnvironment::new().unwrap();
        let tracker = Arc::new(Tracker::new());
        let future = stage(&env, &tracker, "K1", 1);

        future.cancel_on_shutdown();
        assert!(matches!(future.state(), TaskState::Cancelled));
        assert!(tracker.is_empty());
    }
}
