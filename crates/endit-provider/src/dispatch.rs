//! Single consumer of the pending queue.
//!
//! Each path is looked up in the registry and its owner re-evaluated. Paths
//! nobody owns any more are stale and dropped.

use std::sync::Arc;

use endit_config::{log_dispatch_debug, log_dispatch_info, log_dispatch_warn};
use tokio::sync::watch;

use crate::future::Tracker;

pub(crate) async fn run_dispatcher(tracker: Arc<Tracker>, mut shutdown: watch::Receiver<bool>) {
    log_dispatch_info!("Dispatcher started");
    let mut dispatched: u64 = 0;

    loop {
        let path = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
            path = tracker.queue().take() => match path {
                Some(path) => path,
                // closed by the watch loop
                None => break,
            },
        };

        let Some(task) = tracker.lookup(&path) else {
            log_dispatch_debug!(path = %path.display(), "Stale event");
            continue;
        };

        log_dispatch_debug!(path = %path.display(), id = %task.id(), "Re-evaluating task");
        match tokio::task::spawn_blocking(move || task.poll()).await {
            Ok(()) => dispatched += 1,
            Err(e) => log_dispatch_warn!(error = %e, "Poll panicked"),
        }
    }

    tracker.queue().clear();
    log_dispatch_info!(dispatched, "Dispatcher stopped");
}
