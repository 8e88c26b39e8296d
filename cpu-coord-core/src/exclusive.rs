//! The exclusive barrier and the execution-window hooks that cooperate with
//! it.
//!
//! The ordering between `pending_cpus` and each worker's `running` flag is
//! the one place this crate reaches past `Acquire`/`Release` to an
//! explicit `SeqCst` fence: `Release`/`Acquire` alone only order the
//! *other* accesses around a single atomic operation, they don't forbid a
//! thread's own store from being reordered after its own later load
//! (StoreLoad reordering). Both sides of this protocol do exactly that —
//! store `running`/`pending_cpus`, then load the other one — so both sides
//! take a `SeqCst` fence between the store and the load, mirroring the
//! `smp_mb()` calls the original places at the same two spots.

use crate::current::current_worker;
use crate::log::Event;
use crate::worker::Worker;
use crate::Coordinator;
use std::cell::Cell;
use std::sync::atomic::{fence, Ordering};
use std::sync::Arc;

thread_local! {
    /// Guards against nested `start_exclusive` from the same thread; not
    /// supported.
    static IN_START_EXCLUSIVE: Cell<bool> = Cell::new(false);
}

impl Coordinator {
    /// Stops every other running worker and returns holding exclusive
    /// access; pairs with [`Coordinator::end_exclusive`]. Must not be
    /// called from inside a worker's own execution window.
    pub fn start_exclusive(&self) {
        IN_START_EXCLUSIVE.with(|flag| {
            if flag.replace(true) {
                crate::unwind::abort_programming_error(
                    "start_exclusive called recursively on the same thread",
                );
            }
        });

        let mut guard = self.registry_lock.lock().unwrap();

        // Wait out any exclusive operation already in flight.
        while self.pending_cpus.load(Ordering::Relaxed) != 0 {
            guard = self.exclusive_resume.wait(guard).unwrap();
        }

        self.logger.log(|| Event::ExclusiveStartRequested);

        // Announce "exclusive starting" before reading `running`.
        self.pending_cpus.store(1, Ordering::Relaxed);
        fence(Ordering::SeqCst);

        // Kick every other running worker.
        let caller = current_worker();
        let mut running_cpus = 0usize;
        for worker in &guard.workers {
            if let Some(ref caller) = caller {
                if Arc::ptr_eq(caller, worker) {
                    continue;
                }
            }
            if worker.running.load(Ordering::Relaxed) {
                worker.has_waiter.store(true, Ordering::Relaxed);
                running_cpus += 1;
                worker.kick();
            }
        }

        self.pending_cpus
            .store(running_cpus + 1, Ordering::Relaxed);
        self.logger
            .log(|| Event::ExclusiveWaitingFor { running_cpus });

        // Wait for every kicked worker to quiesce.
        while self.pending_cpus.load(Ordering::Relaxed) > 1 {
            guard = self.exclusive_cond.wait(guard).unwrap();
        }

        // Release; no one else can start an exclusive operation until
        // `end_exclusive` resets `pending_cpus` to 0.
        drop(guard);

        if let Some(ref worker) = caller {
            worker.set_in_exclusive_context(true);
        }
        self.logger.log(|| Event::ExclusiveEntered);
    }

    /// Releases exclusive access taken by [`Coordinator::start_exclusive`].
    pub fn end_exclusive(&self) {
        if let Some(worker) = current_worker() {
            worker.set_in_exclusive_context(false);
        }

        let guard = self.registry_lock.lock().unwrap();
        self.pending_cpus.store(0, Ordering::Relaxed);
        self.exclusive_resume.notify_all();
        drop(guard);

        self.logger.log(|| Event::ExclusiveEnded);

        IN_START_EXCLUSIVE.with(|flag| flag.set(false));
    }

    /// Waits out any exclusive operation in progress, then marks `worker`
    /// as running an execution burst. Call at the top of every burst.
    pub fn cpu_exec_start(&self, worker: &Arc<Worker>) {
        worker.running.store(true, Ordering::Relaxed);
        fence(Ordering::SeqCst);

        if self.pending_cpus.load(Ordering::Relaxed) == 0 {
            return;
        }

        let mut guard = self.registry_lock.lock().unwrap();
        if !worker.has_waiter.load(Ordering::Relaxed) {
            // Not counted by the initiator: let the exclusive op run.
            self.logger.log(|| Event::WorkerSelfSuspended {
                worker: worker.index(),
            });
            worker.running.store(false, Ordering::Relaxed);
            while self.pending_cpus.load(Ordering::Relaxed) != 0 {
                guard = self.exclusive_resume.wait(guard).unwrap();
            }
            worker.running.store(true, Ordering::Relaxed);
            self.logger.log(|| Event::WorkerResumed {
                worker: worker.index(),
            });
        }
        // Else: `has_waiter` is set, we're counted in `pending_cpus`
        // already; `cpu_exec_end` will decrement it.
        drop(guard);
    }

    /// Marks `worker` as no longer running and, if an exclusive operation
    /// is waiting on it, releases its hold on that count.
    pub fn cpu_exec_end(&self, worker: &Arc<Worker>) {
        worker.running.store(false, Ordering::Relaxed);
        fence(Ordering::SeqCst);

        if self.pending_cpus.load(Ordering::Relaxed) == 0 {
            return;
        }

        let guard = self.registry_lock.lock().unwrap();
        if worker.has_waiter.load(Ordering::Relaxed) {
            worker.has_waiter.store(false, Ordering::Relaxed);
            let previous = self.pending_cpus.fetch_sub(1, Ordering::Relaxed);
            if previous - 1 == 1 {
                self.exclusive_cond.notify_one();
            }
        }
        drop(guard);
    }
}
