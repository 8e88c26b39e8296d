//! Panic containment, split into two distinct boundaries:
//!
//! - A caller-supplied callback panicking is expected to happen sometimes
//!   and must not corrupt this crate's own bookkeeping. [`halt_unwinding`]
//!   wraps callback execution so the dispatcher can still mark a work item
//!   done, release a lock, or leave the exclusive barrier correctly before
//!   re-raising the panic (via `std::panic::resume_unwind`) on whichever
//!   thread ran the callback.
//! - This crate's own protocol code — the short windows where it holds
//!   `registry_lock` or a worker's own queue lock — must never unwind at
//!   all: a panic there leaves that lock's state unverifiable for every
//!   other worker. [`AbortIfPanic`] turns an unwind through such a window
//!   into an immediate process abort rather than a silently corrupted
//!   coordinator.

use std::panic::{self, AssertUnwindSafe};
use std::thread;

pub(crate) fn halt_unwinding<F, R>(func: F) -> thread::Result<R>
where
    F: FnOnce() -> R,
{
    panic::catch_unwind(AssertUnwindSafe(func))
}

/// Dropped normally (via `mem::forget`) on the success path; if it runs its
/// `Drop` impl, something unwound through code that must not unwind, and
/// the whole process goes down rather than limp along with a corrupted
/// coordinator.
pub(crate) struct AbortIfPanic;

impl Drop for AbortIfPanic {
    fn drop(&mut self) {
        eprintln!("cpu-coord: detected unexpected panic in coordination core; aborting");
        std::process::abort();
    }
}

/// Reports a programming-error violation: duplicate worker indices, a
/// nested `start_exclusive`, a submitter holding the wrong locks. These are
/// bugs in the caller, not recoverable conditions, so this panics rather
/// than returning a `Result` — the same role QEMU's `g_assert`/`abort()`
/// pair plays in the original. Embedders who want a hard "the process goes
/// down" guarantee should build with `panic = "abort"`, as is already
/// conventional for emulator-shaped binaries; this crate itself only
/// promises that the violation is never silently ignored.
#[cold]
pub(crate) fn abort_programming_error(msg: &str) -> ! {
    panic!("cpu-coord: programming error: {}", msg);
}

