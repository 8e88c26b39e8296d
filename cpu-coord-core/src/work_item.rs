//! The work item and its four dispatch modes.
//!
//! QEMU represents a work item as one struct with three booleans (`free`,
//! `exclusive`, `bql`), four of whose eight combinations are meaningful and
//! the rest are programming errors the dispatcher has to assert against.
//! This crate replaces that with a tagged variant over the four real
//! modes, each carrying only what it needs — that's `WorkItem` below.

use std::cell::UnsafeCell;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};

/// A boxed, heap-owned callback: used by every mode except `Sync`, whose
/// item is owned by the submitter and freed implicitly when the submitter's
/// stack frame unwinds (`owned_by_queue == false` in QEMU's terms).
pub(crate) type WorkFn = Box<dyn FnOnce() + Send>;

/// A work item dequeued by [`crate::dispatch`]. Carries only the state its
/// mode needs, which is what rules out the original's invalid
/// flag combinations by construction.
pub(crate) enum WorkItem {
    /// `run_on_cpu`: submitter waits on `worker.cond` for `done`, so the
    /// callback can safely borrow from the submitter's stack frame. The
    /// `DoneFlag` is set by the dispatcher after `func` returns.
    Sync(StackJobRef, DoneFlag),
    /// `async_run_on_cpu`: BQL held while `func` runs.
    Async(WorkFn),
    /// `async_run_on_cpu_no_bql`: BQL released while `func` runs.
    AsyncNoBql(WorkFn),
    /// `async_safe_run_on_cpu`: runs under the exclusive barrier, BQL
    /// released. QEMU's equivalent flag combination — "exclusive with the
    /// BQL held" — is a programming error its dispatcher has to assert
    /// against; since our tagged variant has no `bql` field on this mode,
    /// that error class doesn't exist in this representation.
    Exclusive(WorkFn),
}

impl WorkItem {
    pub(crate) fn mode_name(&self) -> &'static str {
        match self {
            WorkItem::Sync(..) => "sync",
            WorkItem::Async(_) => "async",
            WorkItem::AsyncNoBql(_) => "async_no_bql",
            WorkItem::Exclusive(_) => "exclusive",
        }
    }
}

/// A pointer to the `done` flag living in `run_on_cpu`'s stack frame. Safe
/// to send to the dispatcher thread for the same reason `StackJobRef` is:
/// the submitter blocks on this flag until the dispatcher sets it, so the
/// pointee outlives every use of this pointer.
pub(crate) struct DoneFlag(*const AtomicBool);

unsafe impl Send for DoneFlag {}

impl DoneFlag {
    pub(crate) fn new(done: &AtomicBool) -> Self {
        DoneFlag(done as *const AtomicBool)
    }

    /// # Safety
    /// Must only be called while the pointee is still alive, i.e. before
    /// the submitter's wait loop has observed it set.
    pub(crate) unsafe fn mark_done(&self) {
        (*self.0).store(true, Ordering::Release);
    }
}

/// A job living on another thread's stack frame, executed exactly once by
/// the dispatcher. Grounded on `rayon_core::job::StackJob`/`JobRef`: a
/// synchronous `run_on_cpu` submission is explicitly stack-allocated
/// (`owned_by_queue == false`) rather than heap-allocated, so the
/// dispatcher needs a way to run a closure it does not own. `StackJob`
/// keeps that closure behind an `UnsafeCell` and `StackJobRef` erases its
/// type into a raw pointer plus a function pointer, the same shape as
/// `rayon_core`'s `JobRef`.
pub(crate) struct StackJob<F: FnOnce() + Send> {
    func: UnsafeCell<Option<F>>,
}

impl<F: FnOnce() + Send> StackJob<F> {
    pub(crate) fn new(func: F) -> Self {
        StackJob {
            func: UnsafeCell::new(Some(func)),
        }
    }

    /// # Safety
    /// The returned [`StackJobRef`] must not be executed after `self` is
    /// dropped. `run_on_cpu` upholds this by blocking the submitter on
    /// `item.done` until the dispatcher has finished with the item.
    pub(crate) unsafe fn as_job_ref(&self) -> StackJobRef {
        StackJobRef::new(self)
    }

    unsafe fn execute(this: *const Self) {
        let this = &*this;
        let func = (*this.func.get())
            .take()
            .expect("StackJob executed more than once");
        func();
    }
}

/// Type-erased reference to a [`StackJob`]. See `StackJob` for the safety
/// contract; this mirrors `rayon_core::job::JobRef` closely enough that
/// the comparison is the documentation.
pub(crate) struct StackJobRef {
    pointer: *const (),
    execute_fn: unsafe fn(*const ()),
}

// Safety: the pointee is only ever touched by the thread that calls
// `execute`, and the submitter guarantees (by blocking on `done`) that the
// referenced `StackJob` is still alive when that happens.
unsafe impl Send for StackJobRef {}

impl StackJobRef {
    unsafe fn new<F: FnOnce() + Send>(job: &StackJob<F>) -> Self {
        let execute_fn: unsafe fn(*const StackJob<F>) = StackJob::<F>::execute;
        StackJobRef {
            pointer: job as *const StackJob<F> as *const (),
            execute_fn: mem::transmute(execute_fn),
        }
    }

    pub(crate) unsafe fn execute(self) {
        (self.execute_fn)(self.pointer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn stack_job_runs_exactly_once() {
        let counter = AtomicUsize::new(0);
        let job = StackJob::new(|| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        unsafe {
            let job_ref = job.as_job_ref();
            job_ref.execute();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
