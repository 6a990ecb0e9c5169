//! Coalescing file-system-change signal.
//!
//! Many underlying watcher events collapse into a single pending rebuild
//! notification: the one stored permit of a [`tokio::sync::Notify`] is the
//! coalescing box, so [`ChangeObserver::wait`] never queues multiple
//! wakeups no matter how many events arrived since it last returned.

use notify_debouncer_full::{
    new_debouncer,
    notify::{EventKind, RecommendedWatcher, RecursiveMode, Watcher},
    DebounceEventResult, Debouncer, FileIdMap,
};
use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};
use tokio::sync::Notify;

use crate::error::StrataError;

/// Debounce window applied to raw watcher events before they reach the
/// coalescing signal.
const DEBOUNCE_WINDOW: Duration = Duration::from_secs(2);

/// A change signal over one or more watched paths. `wait()` blocks until at
/// least one change has been observed since the last `wait()` returned;
/// `close()` releases any pending waiter and permanently drains the signal.
pub struct ChangeObserver {
    // Kept alive for the lifetime of the observer; dropping it stops the
    // underlying watcher threads.
    _debouncer: Option<Debouncer<RecommendedWatcher, FileIdMap>>,
    signal: Arc<Notify>,
    closed: Arc<AtomicBool>,
}

impl ChangeObserver {
    /// Watch `paths` recursively. Events for hidden files (leading dot) are
    /// ignored; anything else pends exactly one rebuild signal.
    pub fn watch(paths: &[PathBuf]) -> Result<ChangeObserver, StrataError> {
        let signal = Arc::new(Notify::new());
        let closed = Arc::new(AtomicBool::new(false));

        let callback_signal = signal.clone();
        let callback_closed = closed.clone();
        let mut debouncer = new_debouncer(
            DEBOUNCE_WINDOW,
            None,
            move |result: DebounceEventResult| {
                if callback_closed.load(Ordering::SeqCst) {
                    return;
                }
                match result {
                    Ok(events) => {
                        let relevant = events.iter().any(|event| {
                            matches!(
                                event.event.kind,
                                EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_)
                            ) && event.paths.iter().any(|p| !is_hidden(p))
                        });
                        if relevant {
                            tracing::debug!("[ChangeObserver] change observed, signalling");
                            // notify_one stores at most one permit: the
                            // last-write-wins coalescing box.
                            callback_signal.notify_one();
                        }
                    }
                    Err(errors) => {
                        tracing::warn!("[ChangeObserver] watcher errors: {errors:?}");
                    }
                }
            },
        )?;
        for path in paths {
            debouncer.watcher().watch(path, RecursiveMode::Recursive)?;
        }

        Ok(ChangeObserver {
            _debouncer: Some(debouncer),
            signal,
            closed,
        })
    }

    /// An observer with no backing watcher; changes arrive only through
    /// [`ChangeObserver::signal`]. Used by tests and by callers that drive
    /// rebuilds from their own event source.
    pub fn manual() -> ChangeObserver {
        ChangeObserver {
            _debouncer: None,
            signal: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Record one pending change. Idempotent while a signal is already
    /// pending.
    pub fn signal(&self) {
        self.signal.notify_one();
    }

    /// Block until at least one change has been observed since the last
    /// `wait()` returned. Returns `false` once the observer is closed.
    pub async fn wait(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        self.signal.notified().await;
        !self.closed.load(Ordering::SeqCst)
    }

    /// Cancel the observer as a whole: wakes any pending waiter and makes
    /// every subsequent `wait()` return `false` immediately.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.signal.notify_one();
        self.signal.notify_waiters();
    }
}

fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn many_signals_coalesce_to_one_wakeup() {
        let observer = ChangeObserver::manual();
        for _ in 0..10 {
            observer.signal();
        }
        assert!(observer.wait().await);

        // No second pending notification survives.
        let second = tokio::time::timeout(Duration::from_millis(50), observer.wait()).await;
        assert!(second.is_err(), "wait() returned without a new signal");
    }

    #[tokio::test]
    async fn signal_after_wait_wakes_again() {
        let observer = Arc::new(ChangeObserver::manual());
        observer.signal();
        assert!(observer.wait().await);

        let waiter = {
            let observer = observer.clone();
            tokio::spawn(async move { observer.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        observer.signal();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn close_releases_blocked_waiter() {
        let observer = Arc::new(ChangeObserver::manual());
        let waiter = {
            let observer = observer.clone();
            tokio::spawn(async move { observer.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        observer.close();
        assert!(!waiter.await.unwrap());

        // Closed observers never block again.
        assert!(!observer.wait().await);
    }

    #[test]
    fn hidden_paths_are_filtered() {
        assert!(is_hidden(Path::new("/site/content/.DS_Store")));
        assert!(!is_hidden(Path::new("/site/content/post.md")));
    }
}
