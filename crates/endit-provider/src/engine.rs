//! Engine: owns the registry, the watch loop and the dispatcher.
//!
//! Everything is instance state, so several engines can run side by side
//! over different directory trees. The dispatcher is spawned before the
//! watch loop so no queued path waits for a consumer.

use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use endit_config::{log_engine_info, log_engine_warn, Config, Directories, ProviderConfig};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::dispatch::run_dispatcher;
use crate::error::{EngineError, TaskError};
use crate::flush::FlushTask;
use crate::future::{TaskFuture, Tracker};
use crate::model::{FileId, FlushRequest, Locator, StageRequest};
use crate::remove::write_removal;
use crate::scan::FallbackScanner;
use crate::source::{EventSource, WatchDir};
use crate::stage::StageTask;
use crate::task::Task;
use crate::watch::run_watch_loop;

struct Loops {
    dispatcher: JoinHandle<()>,
    watcher: JoinHandle<()>,
}

pub struct Engine {
    dirs: Directories,
    provider: ProviderConfig,
    tracker: Arc<Tracker>,
    runtime: Handle,
    shutdown: watch::Sender<bool>,
    loops: Mutex<Option<Loops>>,
}

impl Engine {
    /// Watch the configured directories and start dispatching.
    ///
    /// Must be called from within a Tokio runtime. Fails if a directory is
    /// missing or the watch can't be established.
    pub fn start(config: &Config, mut source: impl EventSource) -> Result<Self, EngineError> {
        let runtime = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let dirs = config.directories.resolve();
        dirs.validate()?;

        let stream = source.watch(&[
            WatchDir::creates(dirs.flush_result.clone()),
            WatchDir::creates_and_modifies(dirs.stage_input.clone()),
        ])?;

        let mut scanned = vec![dirs.flush_result.clone()];
        if dirs.stage_input != dirs.flush_result {
            scanned.push(dirs.stage_input.clone());
        }
        let scanner = FallbackScanner::new(scanned);

        let tracker = Arc::new(Tracker::new());
        let (shutdown, shutdown_rx) = watch::channel(false);

        // Consumer first
        let dispatcher = runtime.spawn(run_dispatcher(tracker.clone(), shutdown_rx.clone()));
        let watcher = runtime.spawn(run_watch_loop(
            tracker.clone(),
            stream,
            scanner,
            shutdown_rx,
        ));

        log_engine_info!(
            hsm_type = %config.provider.hsm_type,
            name = %config.provider.name,
            out = %dirs.flush_result.display(),
            input = %dirs.stage_input.display(),
            "Engine started"
        );

        Ok(Self {
            dirs,
            provider: config.provider.clone(),
            tracker,
            runtime,
            shutdown,
            loops: Mutex::new(Some(Loops {
                dispatcher,
                watcher,
            })),
        })
    }

    pub fn directories(&self) -> &Directories {
        &self.dirs
    }

    /// Copy a pool file to tape. `request.path` is passed on as the path hint.
    pub fn submit_flush(&self, request: FlushRequest) -> TaskFuture {
        let hint = request.path.clone();
        let task = FlushTask::new(&request, &self.dirs, &self.provider);
        self.submit(Box::new(task), hint)
    }

    /// Bring a file back from tape into the pool
    pub fn submit_stage(&self, request: StageRequest) -> TaskFuture {
        let task = StageTask::new(&request, &self.dirs);
        self.submit(Box::new(task), None)
    }

    fn submit(&self, task: Box<dyn Task>, hint: Option<String>) -> TaskFuture {
        let future = self.tracker.track(task);
        if future.is_done() {
            // duplicate request
            return future;
        }
        if !self.is_running() {
            future.reject(TaskError::Shutdown);
            return future;
        }

        log_engine_info!(id = %future.id(), kind = %future.kind(), "Task submitted");
        let started = future.clone();
        let tracker = self.tracker.clone();
        self.runtime.spawn_blocking(move || {
            started.start(hint.as_deref());
            // The watch loop may have stopped while we were starting
            if tracker.queue().is_closed() {
                started.cancel_on_shutdown();
            }
        });
        future
    }

    /// Ask the agent to purge tape copies; one result per locator, in order
    pub fn remove(&self, locators: &[Locator]) -> Vec<Result<PathBuf, TaskError>> {
        locators
            .iter()
            .map(|locator| write_removal(&self.dirs.trash, locator))
            .collect()
    }

    /// Ids of tasks still waiting for the agent
    pub fn pending(&self) -> Vec<FileId> {
        let mut ids: Vec<FileId> = self
            .tracker
            .tasks()
            .iter()
            .map(|task| task.id().clone())
            .collect();
        ids.sort();
        ids
    }

    /// `false` once the watch loop has stopped, for whatever reason
    pub fn is_running(&self) -> bool {
        !self.tracker.queue().is_closed()
    }

    /// Stop both loops and wait for them. Outstanding tasks end cancelled.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);

        let loops = self
            .loops
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Loops {
            dispatcher,
            watcher,
        }) = loops
        else {
            return;
        };

        if let Err(e) = watcher.await {
            log_engine_warn!(error = %e, "Watch loop ended abnormally");
        }
        if let Err(e) = dispatcher.await {
            log_engine_warn!(error = %e, "Dispatcher ended abnormally");
        }
        log_engine_info!("Engine stopped");
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.shutdown.send_replace(true);
    }
}
