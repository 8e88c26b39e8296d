//! The work-item dispatcher: the four submission entry points, the
//! per-worker queue they feed, and `process_queue`, which a worker's own
//! thread calls at its own safe points to drain that queue.

use crate::current::{is_self, PreserveCurrentWorker};
use crate::log::Event;
use crate::unwind::{halt_unwinding, AbortIfPanic};
use crate::work_item::{DoneFlag, StackJob, WorkFn, WorkItem};
use crate::worker::Worker;
use crate::Coordinator;
use std::cell::Cell;
use std::mem;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

thread_local! {
    /// Counts worker queue locks currently held by this thread. `run_on_cpu`
    /// asserts this is zero on entry: submitting work while already holding
    /// some other worker's queue lock risks a lock-ordering cycle against
    /// that worker's own dispatcher.
    static WORKER_LOCK_DEPTH: Cell<usize> = Cell::new(0);
}

/// Asserts unconditionally, before any other branch in `run_on_cpu`: a
/// submitter holding some other worker's queue lock must never reach this
/// point, whether or not the submission happens to target itself.
fn assert_no_worker_lock_held() {
    let depth = WORKER_LOCK_DEPTH.with(Cell::get);
    if depth != 0 {
        crate::unwind::abort_programming_error(
            "run_on_cpu called while holding a worker queue lock: would cycle with the target's own lock ordering",
        );
    }
}

/// Runs `body` with `worker`'s queue lock held, bumping
/// [`WORKER_LOCK_DEPTH`] for the duration so nested `run_on_cpu` calls on
/// this thread are caught.
fn with_worker_lock<R>(worker: &Worker, body: impl FnOnce(&mut std::collections::VecDeque<WorkItem>) -> R) -> R {
    let mut queue = worker.queue.lock().unwrap();
    WORKER_LOCK_DEPTH.with(|depth| depth.set(depth.get() + 1));
    let result = body(&mut queue);
    WORKER_LOCK_DEPTH.with(|depth| depth.set(depth.get() - 1));
    result
}

/// `enqueue_locked`: caller already holds `worker`'s queue lock.
fn enqueue_locked(worker: &Arc<Worker>, item: WorkItem, queue: &mut std::collections::VecDeque<WorkItem>) {
    let mode = item.mode_name();
    queue.push_back(item);
    worker.kick();
    worker.coordinator().logger.log(|| Event::WorkEnqueued {
        worker: worker.index(),
        mode,
    });
}

/// `enqueue`: takes `worker`'s queue lock itself.
fn enqueue(worker: &Arc<Worker>, item: WorkItem) {
    with_worker_lock(worker, |queue| enqueue_locked(worker, item, queue));
}

fn with_bql_held<R>(coordinator: &Coordinator, body: impl FnOnce() -> R) -> R {
    let already_held = coordinator.bql.is_held_by_me();
    if !already_held {
        coordinator.bql.lock();
    }
    let guard = AbortIfPanic;
    let result = body();
    mem::forget(guard);
    if !already_held {
        coordinator.bql.unlock();
    }
    result
}

fn with_bql_released<R>(coordinator: &Coordinator, body: impl FnOnce() -> R) -> R {
    let was_held = coordinator.bql.is_held_by_me();
    if was_held {
        coordinator.bql.unlock();
    }
    let guard = AbortIfPanic;
    let result = body();
    mem::forget(guard);
    if was_held {
        coordinator.bql.lock();
    }
    result
}

impl Coordinator {
    /// A synchronous cross-worker call. If the caller is already driving
    /// `worker`, runs `func` inline under the BQL; otherwise enqueues a
    /// stack-borrowed item and blocks until it has run.
    pub fn run_on_cpu<F>(&self, worker: &Arc<Worker>, func: F)
    where
        F: FnOnce() + Send,
    {
        assert_no_worker_lock_held();

        if is_self(worker) {
            with_bql_held(self, func);
            return;
        }

        let job = StackJob::new(func);
        let done = AtomicBool::new(false);
        let job_ref = unsafe { job.as_job_ref() };
        let done_flag = DoneFlag::new(&done);

        with_bql_released(self, || {
            enqueue(worker, WorkItem::Sync(job_ref, done_flag));

            let _preserve = PreserveCurrentWorker::capture();
            let mut queue = worker.queue.lock().unwrap();
            while !done.load(Ordering::Acquire) {
                queue = worker.cond.wait(queue).unwrap();
            }
            drop(queue);
        });
    }

    /// Queues `func` to run asynchronously on `worker` with the BQL held,
    /// and returns immediately without waiting for it.
    pub fn async_run_on_cpu<F>(&self, worker: &Arc<Worker>, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let boxed: WorkFn = Box::new(func);
        enqueue(worker, WorkItem::Async(boxed));
    }

    /// Same enqueue shape as [`Coordinator::async_run_on_cpu`], but the
    /// dispatcher releases the BQL around `func` instead of holding it —
    /// for callbacks that take one of the worker's own deeper locks in an
    /// order that would otherwise conflict with the BQL.
    pub fn async_run_on_cpu_no_bql<F>(&self, worker: &Arc<Worker>, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let boxed: WorkFn = Box::new(func);
        enqueue(worker, WorkItem::AsyncNoBql(boxed));
    }

    /// Queues `func` to run under the exclusive barrier (no other worker
    /// executing), BQL released around it.
    pub fn async_safe_run_on_cpu<F>(&self, worker: &Arc<Worker>, func: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let boxed: WorkFn = Box::new(func);
        enqueue(worker, WorkItem::Exclusive(boxed));
    }

    /// `process_queue`: called by `worker`'s own thread at its own safe
    /// points. Drains the queue one item at a time, dropping the queue
    /// lock around each callback so submitters can keep enqueueing while
    /// one runs, and broadcasts `worker.cond` once the queue is empty.
    pub fn process_queue(&self, worker: &Arc<Worker>) {
        let mut queue = worker.queue.lock().unwrap();
        loop {
            let item = match queue.pop_front() {
                Some(item) => item,
                None => break,
            };
            let mode = item.mode_name();
            self.logger.log(|| Event::WorkDequeued {
                worker: worker.index(),
                mode,
            });

            // Release the worker lock around execution so submitters can
            // keep enqueueing while this item runs.
            drop(queue);
            self.dispatch_one(worker, item);
            // Retake it before touching the queue again.
            queue = worker.queue.lock().unwrap();
        }

        self.logger.log(|| Event::QueueDrained {
            worker: worker.index(),
        });
        worker.cond.notify_all();
        drop(queue);
    }

    /// Runs one item's callback through [`halt_unwinding`] so a panic in
    /// caller-supplied code can't skip the bookkeeping that must run
    /// afterward (publishing `done`, leaving the exclusive barrier); the
    /// panic, if any, is re-raised on this thread once that bookkeeping is
    /// done.
    fn dispatch_one(&self, worker: &Arc<Worker>, item: WorkItem) {
        match item {
            WorkItem::Sync(job_ref, done) => {
                let outcome = with_bql_held(self, || halt_unwinding(|| unsafe { job_ref.execute() }));
                // Publish `done = true`; the waiter in `run_on_cpu` pairs
                // this release store with an acquire load.
                self.mark_sync_done(worker, done);
                if let Err(payload) = outcome {
                    std::panic::resume_unwind(payload);
                }
            }
            WorkItem::Async(func) => {
                let outcome = with_bql_held(self, || halt_unwinding(func));
                if let Err(payload) = outcome {
                    std::panic::resume_unwind(payload);
                }
            }
            WorkItem::AsyncNoBql(func) => {
                let outcome = with_bql_released(self, || halt_unwinding(func));
                if let Err(payload) = outcome {
                    std::panic::resume_unwind(payload);
                }
            }
            WorkItem::Exclusive(func) => {
                let outcome = with_bql_released(self, || {
                    self.start_exclusive();
                    let outcome = halt_unwinding(func);
                    self.end_exclusive();
                    outcome
                });
                if let Err(payload) = outcome {
                    std::panic::resume_unwind(payload);
                }
            }
        }
    }

    /// Publishes `done` and wakes any waiter blocked in `run_on_cpu`.
    /// Takes `worker.queue`'s lock only long enough to pair with the
    /// waiter, which re-checks `done` under that same lock before
    /// deciding whether to keep waiting.
    fn mark_sync_done(&self, worker: &Arc<Worker>, done: DoneFlag) {
        let queue = worker.queue.lock().unwrap();
        unsafe { done.mark_done() };
        worker.cond.notify_all();
        drop(queue);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kick::NoopKick;
    use crate::CoordinatorBuilder;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    fn new_worker(coordinator: &Arc<Coordinator>) -> Arc<Worker> {
        Arc::new(Worker::new(Box::new(NoopKick), Arc::downgrade(coordinator)))
    }

    #[test]
    fn run_on_cpu_inline_when_caller_is_the_target() {
        let coordinator = CoordinatorBuilder::new().build();
        let worker = new_worker(&coordinator);
        coordinator.add(&worker);

        crate::current::bind_current_worker(Arc::clone(&worker));
        let ran = AtomicUsize::new(0);
        coordinator.run_on_cpu(&worker, || {
            ran.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn run_on_cpu_cross_thread_blocks_until_the_item_runs() {
        let coordinator = CoordinatorBuilder::new().build();
        let worker = new_worker(&coordinator);
        coordinator.add(&worker);

        let worker_for_loop = Arc::clone(&worker);
        let coordinator_for_loop = Arc::clone(&coordinator);
        let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let stop2 = Arc::clone(&stop);
        let handle = thread::spawn(move || {
            crate::current::bind_current_worker(Arc::clone(&worker_for_loop));
            while !stop2.load(Ordering::Relaxed) {
                coordinator_for_loop.process_queue(&worker_for_loop);
                thread::sleep(Duration::from_millis(1));
            }
        });

        let ran = Arc::new(AtomicUsize::new(0));
        let ran2 = Arc::clone(&ran);
        coordinator.run_on_cpu(&worker, move || {
            ran2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(ran.load(Ordering::SeqCst), 1);

        stop.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }

    #[test]
    fn async_items_run_in_fifo_order() {
        let coordinator = CoordinatorBuilder::new().build();
        let worker = new_worker(&coordinator);
        coordinator.add(&worker);

        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        for i in 0..5 {
            let order = Arc::clone(&order);
            coordinator.async_run_on_cpu(&worker, move || {
                order.lock().unwrap().push(i);
            });
        }
        coordinator.process_queue(&worker);
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn async_no_bql_runs_without_the_bql_held() {
        let coordinator = CoordinatorBuilder::new().build();
        let worker = new_worker(&coordinator);
        coordinator.add(&worker);

        coordinator.bql.lock();
        let observed_held = Arc::new(std::sync::atomic::AtomicBool::new(true));
        let observed_held2 = Arc::clone(&observed_held);
        let bql = Arc::clone(&coordinator.bql);
        coordinator.async_run_on_cpu_no_bql(&worker, move || {
            observed_held2.store(bql.is_held_by_me(), Ordering::SeqCst);
        });

        // Still held here: the dispatcher must release it around `func`
        // and reacquire it afterward, not rely on the caller having
        // released it first.
        coordinator.process_queue(&worker);
        assert!(coordinator.bql.is_held_by_me());
        coordinator.bql.unlock();

        assert!(!observed_held.load(Ordering::SeqCst));
    }
}
