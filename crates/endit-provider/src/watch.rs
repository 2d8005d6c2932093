//! Watch loop: turns filesystem notifications into pending paths.
//!
//! Ordinary events queue the changed path. An overflow queues the full
//! content of the result directories in mtime order, or polls every task
//! when even listing fails. When the loop ends for any reason the queue is
//! closed and every task still registered is cancelled.

use std::sync::Arc;
use std::time::Instant;

use endit_config::{log_watch_debug, log_watch_error, log_watch_info, log_watch_warn};
use tokio::sync::watch;

use crate::future::Tracker;
use crate::scan::FallbackScanner;
use crate::source::{EventStream, FsEvent};

pub(crate) async fn run_watch_loop(
    tracker: Arc<Tracker>,
    mut stream: EventStream,
    scanner: FallbackScanner,
    mut shutdown: watch::Receiver<bool>,
) {
    log_watch_info!(dirs = ?scanner.dirs(), "Watch loop started");

    // Results written before the watch was established
    poll_all(&tracker).await;

    loop {
        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    log_watch_info!("Shutdown requested");
                    break;
                }
            }
            event = stream.next() => match event {
                Some(Ok(FsEvent::Changed(path))) => {
                    if tracker.queue().push(path.clone()) {
                        log_watch_debug!(path = %path.display(), "Queued");
                    }
                }
                Some(Ok(FsEvent::Overflow { dir })) => {
                    log_watch_warn!(?dir, "Notification overflow, scanning directories");
                    fallback_scan(&tracker, &scanner).await;
                }
                Some(Err(e)) => {
                    log_watch_error!(error = %e, "Event source failed");
                    break;
                }
                None => {
                    log_watch_error!("Event source closed");
                    break;
                }
            }
        }
    }

    cancel_all(&tracker).await;
    log_watch_info!("Watch loop stopped");
}

async fn fallback_scan(tracker: &Arc<Tracker>, scanner: &FallbackScanner) {
    let started = Instant::now();
    let listing = {
        let scanner = scanner.clone();
        tokio::task::spawn_blocking(move || scanner.scan()).await
    };

    match listing {
        Ok(Ok(paths)) => {
            let total = paths.len();
            let queued = paths
                .into_iter()
                .filter(|path| tracker.queue().push(path.clone()))
                .count();
            log_watch_warn!(
                total,
                queued,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Fallback scan complete"
            );
        }
        Ok(Err(e)) => {
            log_watch_warn!(error = %e, "Fallback scan failed, polling every task");
            poll_all(tracker).await;
        }
        Err(e) => {
            log_watch_error!(error = %e, "Fallback scan panicked, polling every task");
            poll_all(tracker).await;
        }
    }
}

async fn poll_all(tracker: &Arc<Tracker>) {
    let tasks = tracker.tasks();
    if tasks.is_empty() {
        return;
    }
    let count = tasks.len();
    let polled = tokio::task::spawn_blocking(move || {
        for task in tasks {
            task.poll();
        }
    })
    .await;
    match polled {
        Ok(()) => log_watch_debug!(count, "Polled every task"),
        Err(e) => log_watch_error!(error = %e, "Polling tasks panicked"),
    }
}

async fn cancel_all(tracker: &Arc<Tracker>) {
    tracker.queue().close();
    let tasks = tracker.tasks();
    if tasks.is_empty() {
        return;
    }
    log_watch_info!(count = tasks.len(), "Cancelling outstanding tasks");
    let cancelled = tokio::task::spawn_blocking(move || {
        for task in tasks {
            task.cancel_on_shutdown();
        }
    })
    .await;
    if let Err(e) = cancelled {
        log_watch_error!(error = %e, "Cancelling tasks panicked");
    }
}
