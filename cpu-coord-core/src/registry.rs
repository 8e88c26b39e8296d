//! The worker registry: membership, stable index assignment, and
//! enumeration for the exclusive barrier.

use crate::log::Event;
use crate::worker::{Worker, UNASSIGNED};
use crate::Coordinator;
use std::sync::{Arc, MutexGuard};

/// State protected by [`Coordinator`]'s registry lock: membership and the
/// uniform-assignment-policy bookkeeping. `pending_cpus` and each worker's
/// `has_waiter` are also written only while this lock is held, but they
/// live elsewhere (`Coordinator::pending_cpus`, `Worker`) since nothing
/// besides this lock's critical sections needs to see them as part of
/// `Inner` specifically.
pub(crate) struct Inner {
    pub(crate) workers: Vec<Arc<Worker>>,
    /// `None` until the first worker is added; then remembers whether that
    /// first assignment was automatic or manual. Every later `add` must
    /// agree — the assignment policy has to stay uniform for the registry's
    /// whole lifetime.
    index_auto_assigned: Option<bool>,
}

impl Inner {
    pub(crate) fn new() -> Self {
        Inner {
            workers: Vec::new(),
            index_auto_assigned: None,
        }
    }

    fn next_free_index(&self) -> usize {
        self.workers
            .iter()
            .map(Worker::index)
            .filter(|&index| index != UNASSIGNED)
            .max()
            .map_or(0, |max| max + 1)
    }
}

/// An explicit hold on the registry lock, for callers that must enumerate
/// the registry atomically with some other action. Mirrors QEMU's
/// `cpu_list_lock`/`cpu_list_unlock`.
pub struct RegistryGuard<'a> {
    inner: MutexGuard<'a, Inner>,
}

impl<'a> RegistryGuard<'a> {
    /// Workers currently registered, in registration order. Held under the
    /// same lock `start_exclusive` uses, so none of this is invalidated by
    /// concurrent `add`/`remove` calls for as long as the guard lives.
    pub fn workers(&self) -> &[Arc<Worker>] {
        &self.inner.workers
    }
}

impl Coordinator {
    /// `cpu_list_add`: registers `worker`. If its index is
    /// [`UNASSIGNED`], assigns `max(existing indices) + 1` and remembers
    /// that this registry auto-assigns; otherwise the worker must already
    /// carry a caller-chosen index, and auto-assignment must never have
    /// been used.
    pub fn add(&self, worker: &Arc<Worker>) {
        let mut inner = self.registry_lock.lock().unwrap();

        let (assigned_index, auto_assigned) = if worker.index() == UNASSIGNED {
            match inner.index_auto_assigned {
                Some(false) => crate::unwind::abort_programming_error(
                    "cannot auto-assign a worker index: this registry has already used manual assignment",
                ),
                _ => (inner.next_free_index(), true),
            }
        } else {
            match inner.index_auto_assigned {
                Some(true) => crate::unwind::abort_programming_error(
                    "cannot manually assign a worker index: this registry has already used automatic assignment",
                ),
                _ => (worker.index(), false),
            }
        };

        if inner
            .workers
            .iter()
            .any(|existing| existing.index() == assigned_index)
        {
            crate::unwind::abort_programming_error("duplicate worker index");
        }

        worker
            .index
            .store(assigned_index, std::sync::atomic::Ordering::Relaxed);
        inner.index_auto_assigned = Some(auto_assigned);
        inner.workers.push(Arc::clone(worker));

        self.logger.log(|| Event::WorkerAdded {
            index: assigned_index,
            auto_assigned,
        });
    }

    /// `cpu_list_remove`: idempotent. A worker not currently registered is
    /// left untouched.
    pub fn remove(&self, worker: &Arc<Worker>) {
        let mut inner = self.registry_lock.lock().unwrap();
        let position = match inner
            .workers
            .iter()
            .position(|existing| Arc::ptr_eq(existing, worker))
        {
            Some(position) => position,
            None => return,
        };
        let removed = inner.workers.remove(position);
        let removed_index = removed.index();
        removed
            .index
            .store(UNASSIGNED, std::sync::atomic::Ordering::Relaxed);
        self.logger.log(|| Event::WorkerRemoved {
            index: removed_index,
        });
    }

    /// Iterates every registered worker. Safe against concurrent
    /// registration changes since it holds the registry lock for the
    /// duration, rather than leaning on a deferred-reclamation scheme.
    pub fn for_each(&self, mut f: impl FnMut(&Arc<Worker>)) {
        let inner = self.registry_lock.lock().unwrap();
        for worker in &inner.workers {
            f(worker);
        }
    }

    /// Explicit exposure of the registry lock (`cpu_list_lock` /
    /// `cpu_list_unlock`) for callers needing to enumerate atomically with
    /// some other action. Dropping the guard is `cpu_list_unlock`.
    pub fn lock(&self) -> RegistryGuard<'_> {
        RegistryGuard {
            inner: self.registry_lock.lock().unwrap(),
        }
    }

    pub(crate) fn with_inner<R>(&self, f: impl FnOnce(&mut Inner) -> R) -> R {
        let mut inner = self.registry_lock.lock().unwrap();
        f(&mut inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kick::NoopKick;
    use crate::CoordinatorBuilder;

    fn new_worker(coordinator: &Arc<Coordinator>) -> Arc<Worker> {
        Arc::new(Worker::new(Box::new(NoopKick), Arc::downgrade(coordinator)))
    }

    #[test]
    fn auto_assignment_gives_unique_increasing_indices() {
        let coordinator = CoordinatorBuilder::new().build();
        let workers: Vec<_> = (0..4).map(|_| new_worker(&coordinator)).collect();
        for worker in &workers {
            coordinator.add(worker);
        }
        let indices: Vec<usize> = workers.iter().map(|w| w.index()).collect();
        assert_eq!(indices, vec![0, 1, 2, 3]);
    }

    #[test]
    fn remove_is_idempotent_and_resets_index() {
        let coordinator = CoordinatorBuilder::new().build();
        let worker = new_worker(&coordinator);
        coordinator.add(&worker);
        assert_ne!(worker.index(), UNASSIGNED);

        coordinator.remove(&worker);
        assert_eq!(worker.index(), UNASSIGNED);

        // Removing again, or removing a worker never added, is a no-op.
        coordinator.remove(&worker);
        let never_added = new_worker(&coordinator);
        coordinator.remove(&never_added);
    }

    #[test]
    fn for_each_sees_every_registered_worker() {
        let coordinator = CoordinatorBuilder::new().build();
        let workers: Vec<_> = (0..3).map(|_| new_worker(&coordinator)).collect();
        for worker in &workers {
            coordinator.add(worker);
        }

        let mut seen = Vec::new();
        coordinator.for_each(|worker| seen.push(worker.index()));
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
    }

    #[test]
    #[should_panic(expected = "programming error")]
    fn mixing_manual_and_automatic_assignment_aborts() {
        let coordinator = CoordinatorBuilder::new().build();
        let auto = new_worker(&coordinator);
        coordinator.add(&auto);

        let manual = new_worker(&coordinator);
        manual.index.store(41, std::sync::atomic::Ordering::Relaxed);
        coordinator.add(&manual);
    }
}
