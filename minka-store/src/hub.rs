//! Per-table write notification.
//!
//! The hub knows nothing about SQL: writers bump a version counter after a
//! successful commit, and watchers wait on it between query cycles. The
//! counter carries no payload, so nothing can be dropped; a watcher that
//! wakes simply re-queries from its cursor.
use tokio::sync::watch;

/// A version-bumped notifier shared by all writers and watchers of a table
#[derive(Debug)]
pub(crate) struct Hub {
    notifier: watch::Sender<u64>,
}

impl Hub {
    pub(crate) fn new() -> Self {
        let (notifier, _) = watch::channel(0);
        Self { notifier }
    }

    /// Signal that a write committed; wakes every waiting watcher
    pub(crate) fn broadcast(&self) {
        self.notifier.send_modify(|version| *version += 1);
    }

    /// Obtain a receiver for wait cycles.
    ///
    /// Callers must mark the current version seen (`borrow_and_update`)
    /// *before* querying, so a commit that lands between query and wait
    /// still wakes them.
    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.notifier.subscribe()
    }
}
