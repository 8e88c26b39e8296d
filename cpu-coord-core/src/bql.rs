//! The big I/O lock (BQL). The coordination core never owns this lock's
//! implementation, only acquires and releases it; the dispatcher treats it
//! purely as a capability each work item declares it wants or doesn't,
//! modeled as an explicit capability token rather than ambient global
//! state.

/// External contract for the big I/O lock, matching QEMU's
/// `bql_is_held_by_me()` / `bql_lock()` / `bql_unlock()`.
///
/// Unlike a `std::sync::Mutex`, this is deliberately not RAII-scoped: the
/// dispatcher must be able to release it before a callback runs and
/// reacquire it afterwards, possibly across different stack frames (the
/// wait inside `run_on_cpu`, the barrier inside `async_safe_run_on_cpu`).
/// That asymmetric lock/unlock pairing is the shape QEMU's
/// `qemu_mutex_lock_iothread`/`qemu_mutex_unlock_iothread` has, and is
/// preserved here rather than forced into a guard type.
pub trait Bql: Send + Sync {
    /// True iff the calling thread currently holds the lock.
    fn is_held_by_me(&self) -> bool;
    /// Blocks until the lock is held by the calling thread.
    fn lock(&self);
    /// Releases the lock. Caller must currently hold it.
    fn unlock(&self);
}

use std::cell::Cell;
use std::sync::{Condvar, Mutex};

thread_local! {
    static HELD_BY_ME: Cell<bool> = Cell::new(false);
}

/// Reference [`Bql`] implementation for tests and simple embedders: one
/// process-wide lock plus a thread-local flag recording whether the
/// calling thread is the holder, the same split QEMU's
/// `qemu_mutex_iothread_locked()` makes.
#[derive(Debug, Default)]
pub struct StdBql {
    locked: Mutex<bool>,
    released: Condvar,
}

impl StdBql {
    pub fn new() -> Self {
        StdBql {
            locked: Mutex::new(false),
            released: Condvar::new(),
        }
    }
}

impl Bql for StdBql {
    fn is_held_by_me(&self) -> bool {
        HELD_BY_ME.with(|held| held.get())
    }

    fn lock(&self) {
        let mut locked = self.locked.lock().unwrap();
        while *locked {
            locked = self.released.wait(locked).unwrap();
        }
        *locked = true;
        drop(locked);
        HELD_BY_ME.with(|held| held.set(true));
    }

    fn unlock(&self) {
        HELD_BY_ME.with(|held| held.set(false));
        let mut locked = self.locked.lock().unwrap();
        *locked = false;
        drop(locked);
        self.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn lock_is_exclusive_and_tracks_the_holder() {
        let bql = Arc::new(StdBql::new());
        assert!(!bql.is_held_by_me());

        bql.lock();
        assert!(bql.is_held_by_me());

        let bql2 = Arc::clone(&bql);
        let handle = thread::spawn(move || {
            assert!(!bql2.is_held_by_me());
            bql2.lock();
            assert!(bql2.is_held_by_me());
            bql2.unlock();
        });

        bql.unlock();
        handle.join().unwrap();
        assert!(!bql.is_held_by_me());
    }
}
