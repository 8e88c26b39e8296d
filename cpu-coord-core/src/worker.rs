//! The per-worker state: identity, the barrier-protocol flags, and each
//! worker's own work queue. Corresponds to QEMU's `CPUState`.

use crate::kick::Kick;
use crate::work_item::WorkItem;
use crate::Coordinator;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex, Weak};

/// Sentinel for "not currently a member of any registry" (`UNASSIGNED_CPU_INDEX`
/// in the original).
pub const UNASSIGNED: usize = usize::MAX;

/// One worker thread's coordination state: a stable index, the running/
/// waiter/exclusive flags the barrier protocol needs, and its own work
/// queue. Always held behind an `Arc`, shared between the worker's own
/// thread, the registry, and anyone submitting work to it.
pub struct Worker {
    pub(crate) index: AtomicUsize,
    pub(crate) running: AtomicBool,
    /// Written only while the owning [`Coordinator`]'s registry lock is
    /// held, by either `start_exclusive` or the execution-window hooks.
    /// Modeled as an atomic so it can live on a `Send + Sync` struct
    /// without `unsafe`; the registry lock is still what makes the
    /// read-modify-write sequences in `exclusive.rs` race free, not the
    /// atomicity of the type itself.
    pub(crate) has_waiter: AtomicBool,
    in_exclusive_context: AtomicBool,
    pub(crate) queue: Mutex<VecDeque<WorkItem>>,
    pub(crate) cond: Condvar,
    kick: Box<dyn Kick>,
    coordinator: Weak<Coordinator>,
}

impl fmt::Debug for Worker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Worker")
            .field("index", &self.index())
            .field("running", &self.running.load(Ordering::Relaxed))
            .finish()
    }
}

impl Worker {
    /// Creates an unregistered worker with sentinel index [`UNASSIGNED`].
    /// Register it with [`Coordinator::add`] before submitting work to it.
    pub fn new(kick: Box<dyn Kick>, coordinator: Weak<Coordinator>) -> Self {
        Worker {
            index: AtomicUsize::new(UNASSIGNED),
            running: AtomicBool::new(false),
            has_waiter: AtomicBool::new(false),
            in_exclusive_context: AtomicBool::new(false),
            queue: Mutex::new(VecDeque::new()),
            cond: Condvar::new(),
            kick,
            coordinator,
        }
    }

    /// This worker's stable small integer identity, or [`UNASSIGNED`] if it
    /// has been removed from (or never added to) a registry.
    #[inline]
    pub fn index(&self) -> usize {
        self.index.load(Ordering::Relaxed)
    }

    /// True while this worker is inside an execution window.
    #[inline]
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn is_in_exclusive_context(&self) -> bool {
        self.in_exclusive_context.load(Ordering::Relaxed)
    }

    #[inline]
    pub(crate) fn set_in_exclusive_context(&self, value: bool) {
        self.in_exclusive_context.store(value, Ordering::Relaxed);
    }

    pub(crate) fn coordinator(&self) -> std::sync::Arc<Coordinator> {
        self.coordinator
            .upgrade()
            .expect("worker outlived the coordinator that owns it")
    }

    /// Asks this worker to exit its current execution burst promptly.
    pub(crate) fn kick(&self) {
        self.kick.kick();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kick::NoopKick;

    #[test]
    fn fresh_worker_is_unassigned_and_idle() {
        let worker = Worker::new(Box::new(NoopKick), Weak::new());
        assert_eq!(worker.index(), UNASSIGNED);
        assert!(!worker.is_running());
        assert!(!worker.is_in_exclusive_context());
    }
}
