//! # endit-provider
//!
//! Nearline storage provider that talks to a tape agent through files.
//!
//! ## Protocol
//!
//! Requests are files we write, results are files the agent writes:
//! - Flush: `<request>/<id>` holds storage attributes; the agent answers
//!   with `<out>/<id>` on success or `<out>/<id>.err` on failure
//! - Stage: `<request>/<id>` holds `size=<bytes>`; the agent writes the data
//!   to `<in>/<id>` (complete once the size matches) or `<in>/<id>.err`
//! - Remove: `<trash>/<bfid>` holds the locator to purge
//!
//! ## Architecture
//!
//! - [`Tracker`]: registry of watched path → task, at most one task per path,
//!   plus the deduplicated queue of paths waiting for re-evaluation
//! - Watch loop: notifications feed the queue; on overflow the result
//!   directories are scanned oldest first
//! - Dispatcher: single consumer, polls the owner of each queued path
//! - [`TaskFuture`]: resolves exactly once to success, failure or
//!   cancellation

pub mod engine;
pub mod error;
pub mod flush;
pub mod future;
pub mod model;
pub mod queue;
pub mod registry;
pub mod remove;
pub mod scan;
pub mod source;
pub mod stage;
pub mod task;
pub mod testing;

mod dispatch;
mod watch;

pub use engine::Engine;
pub use error::{EngineError, TaskError, TaskFailure, WaitError, WatchError};
pub use future::{TaskFuture, TaskState, Tracker};
pub use model::{
    Checksum, FileId, FlushRequest, Locator, Outcome, StageRequest, StorageInfo, TaskKind,
};
pub use source::{EventSource, EventStream, FsEvent, NotifySource, WatchDir};
pub use task::Task;
