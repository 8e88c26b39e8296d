//! Coordination core for a multi-threaded CPU emulator: a worker registry,
//! per-worker work queues, a four-mode work-item dispatcher, and an
//! exclusive barrier paired with execution-window hooks.
//!
//! This crate has no public convenience API of its own beyond
//! [`Coordinator`] and [`CoordinatorBuilder`]; `cpu-coord` (the root
//! package of this workspace) is the ergonomic façade, the same
//! relationship `rayon-core` has to `rayon`.
//!
//! The big I/O lock and the "kick a running worker" mechanism are
//! deliberately not implemented here: they are external capabilities a
//! caller supplies via the [`Bql`] and [`Kick`] traits. This crate only
//! ever acquires, releases, or checks them through those contracts.

mod bql;
mod current;
mod dispatch;
mod exclusive;
mod kick;
mod log;
mod registry;
mod unwind;
mod work_item;
mod worker;

pub use bql::{Bql, StdBql};
pub use current::{bind_current_worker, current_worker};
pub use kick::{Kick, NoopKick};
pub use registry::RegistryGuard;
pub use worker::{Worker, UNASSIGNED};

use crossbeam_utils::CachePadded;
use log::Logger;
use registry::Inner;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Condvar, Mutex};

/// The shared coordination state: the worker registry, the exclusive
/// barrier's counters and condition variables, and a handle to the big
/// I/O lock.
///
/// Always held behind an `Arc`; every public method takes `&self` and is
/// safe to call concurrently from any thread, including a worker's own.
pub struct Coordinator {
    registry_lock: Mutex<Inner>,
    /// Counts workers the current exclusive operation is still waiting on,
    /// plus one for the initiator itself. Padded against false sharing
    /// since every worker's `cpu_exec_start`/`cpu_exec_end` reads it on the
    /// hot path, the same reasoning `rayon-core` applies to its own
    /// frequently-polled atomics.
    pending_cpus: CachePadded<AtomicUsize>,
    /// Workers wait here while an exclusive operation they were not
    /// counted in is in flight, and while a new exclusive op waits for a
    /// prior one to finish.
    exclusive_resume: Condvar,
    /// The exclusive initiator waits here for kicked workers to quiesce.
    exclusive_cond: Condvar,
    bql: Arc<dyn Bql>,
    logger: Logger,
}

impl Coordinator {
    /// Explicit exposure of the registry lock, for callers that must
    /// enumerate the registry atomically with some other action.
    pub fn registry(&self) -> RegistryGuard<'_> {
        self.lock()
    }
}

/// Builds a [`Coordinator`].
pub struct CoordinatorBuilder {
    bql: Option<Arc<dyn Bql>>,
}

impl CoordinatorBuilder {
    pub fn new() -> Self {
        CoordinatorBuilder { bql: None }
    }

    /// Supplies the big I/O lock implementation. Defaults to [`StdBql`] if
    /// never called.
    pub fn bql(mut self, bql: Arc<dyn Bql>) -> Self {
        self.bql = Some(bql);
        self
    }

    /// Builds the coordinator.
    pub fn build(self) -> Arc<Coordinator> {
        Arc::new(Coordinator {
            registry_lock: Mutex::new(Inner::new()),
            pending_cpus: CachePadded::new(AtomicUsize::new(0)),
            exclusive_resume: Condvar::new(),
            exclusive_cond: Condvar::new(),
            bql: self.bql.unwrap_or_else(|| Arc::new(StdBql::new())),
            logger: Logger::new(),
        })
    }
}

impl Default for CoordinatorBuilder {
    fn default() -> Self {
        CoordinatorBuilder::new()
    }
}
