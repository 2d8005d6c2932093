//! Pending-path queue between the watch loop and the dispatcher.
//!
//! A deduplicated FIFO: a path is queued at most once at a time, so a burst
//! of events for one file costs a single re-evaluation.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};

use tokio::sync::Notify;

#[derive(Default)]
struct QueueState {
    order: VecDeque<PathBuf>,
    queued: HashSet<PathBuf>,
    closed: bool,
}

#[derive(Default)]
pub struct PendingQueue {
    state: Mutex<QueueState>,
    available: Notify,
}

impl PendingQueue {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue `path` unless it is already queued or the queue is closed
    pub fn push(&self, path: PathBuf) -> bool {
        let mut state = self.lock();
        if state.closed || state.queued.contains(&path) {
            return false;
        }
        state.queued.insert(path.clone());
        state.order.push_back(path);
        drop(state);
        self.available.notify_one();
        true
    }

    pub fn remove(&self, path: &Path) -> bool {
        let mut state = self.lock();
        if !state.queued.remove(path) {
            return false;
        }
        state.order.retain(|queued| queued != path);
        true
    }

    pub fn try_take(&self) -> Option<PathBuf> {
        let mut state = self.lock();
        let path = state.order.pop_front()?;
        state.queued.remove(&path);
        Some(path)
    }

    /// Wait for the next path; `None` once the queue is closed
    pub async fn take(&self) -> Option<PathBuf> {
        loop {
            let notified = self.available.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = self.lock();
                if let Some(path) = state.order.pop_front() {
                    state.queued.remove(&path);
                    return Some(path);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    pub fn clear(&self) {
        let mut state = self.lock();
        state.order.clear();
        state.queued.clear();
    }

    /// Drop everything queued and wake the consumer for good
    pub fn close(&self) {
        {
            let mut state = self.lock();
            state.closed = true;
            state.order.clear();
            state.queued.clear();
        }
        self.available.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
