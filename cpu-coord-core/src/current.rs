//! The `current_worker()` thread-local and its scoped save/restore helper.
//!
//! `current_worker()` and `is_self(worker)` mirror QEMU's `current_cpu`:
//! a thread-local identifying which worker, if any, this thread is
//! currently driving. A submitter blocked waiting for its own submission
//! to finish must keep that identity intact across the wait, since the
//! wait can let other code run on this thread and mutate the thread-local
//! out from under it. Rather than saving and restoring it by hand at every
//! suspension point, [`PreserveCurrentWorker`] wraps the wait in a scope
//! guard that does it once, on drop.

use crate::worker::Worker;
use std::cell::RefCell;
use std::sync::Arc;

thread_local! {
    static CURRENT_WORKER: RefCell<Option<Arc<Worker>>> = RefCell::new(None);
}

/// The worker this thread is currently driving, if any.
pub fn current_worker() -> Option<Arc<Worker>> {
    CURRENT_WORKER.with(|cell| cell.borrow().clone())
}

/// True iff `worker` is the one this thread is currently driving.
pub(crate) fn is_self(worker: &Arc<Worker>) -> bool {
    CURRENT_WORKER.with(|cell| {
        cell.borrow()
            .as_ref()
            .map_or(false, |current| Arc::ptr_eq(current, worker))
    })
}

/// Sets the thread-local for the duration of a worker's main loop. Call
/// once when a worker thread starts; never nested. This is how a thread
/// announces "I am now driving this worker" so that `run_on_cpu`'s
/// self-submission fast path and `current_worker()` see it.
pub fn bind_current_worker(worker: Arc<Worker>) {
    CURRENT_WORKER.with(|cell| {
        let mut slot = cell.borrow_mut();
        assert!(slot.is_none(), "a thread can only drive one worker");
        *slot = Some(worker);
    });
}

/// Snapshots `current_worker()` on construction and restores it on drop.
/// Wrap any suspension (a condition-variable wait) that might let other
/// code run on this thread and mutate the thread-local out from under it.
pub(crate) struct PreserveCurrentWorker {
    saved: Option<Arc<Worker>>,
}

impl PreserveCurrentWorker {
    pub(crate) fn capture() -> Self {
        PreserveCurrentWorker {
            saved: current_worker(),
        }
    }
}

impl Drop for PreserveCurrentWorker {
    fn drop(&mut self) {
        CURRENT_WORKER.with(|cell| {
            *cell.borrow_mut() = self.saved.take();
        });
    }
}
