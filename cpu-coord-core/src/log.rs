//! Internal event logging.
//!
//! This deliberately does not chase QEMU's per-lock trace hooks
//! (`trace_qemu_mutex_lock` and friends) — it's the same shape of thing the
//! thread pool this crate is adapted from keeps internally: an `Event` enum
//! and a `Logger` that is a complete no-op unless a caller opts in, so the
//! hot dispatch/barrier paths never pay for diagnostics they didn't ask
//! for.
//!
//! Set `CPU_COORD_LOG=<path>` (or `CPU_COORD_LOG=-` for stderr) before the
//! first `Logger` is constructed to enable it. A background thread owns the
//! receiving end of the channel so `log()` itself never blocks on I/O.

use crossbeam_channel::{unbounded, Sender};
use std::env;
use std::fmt;
use std::fs::File;
use std::io::{self, Write};
use std::sync::Once;

#[derive(Clone, Debug)]
pub(crate) enum Event {
    WorkerAdded { index: usize, auto_assigned: bool },
    WorkerRemoved { index: usize },
    WorkEnqueued { worker: usize, mode: &'static str },
    WorkDequeued { worker: usize, mode: &'static str },
    QueueDrained { worker: usize },
    Kicked { worker: usize },
    ExclusiveStartRequested,
    ExclusiveWaitingFor { running_cpus: usize },
    ExclusiveEntered,
    ExclusiveEnded,
    WorkerSelfSuspended { worker: usize },
    WorkerResumed { worker: usize },
    Flush,
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

fn open_sink() -> io::Result<Box<dyn Write + Send>> {
    match env::var("CPU_COORD_LOG") {
        Ok(ref path) if path == "-" => Ok(Box::new(io::stderr())),
        Ok(path) => Ok(Box::new(File::create(path)?)),
        Err(_) => Err(io::Error::new(io::ErrorKind::NotFound, "CPU_COORD_LOG unset")),
    }
}

static mut THE_SENDER: Option<Sender<Event>> = None;
static THE_SENDER_SET: Once = Once::new();

fn global_sender() -> Option<Sender<Event>> {
    THE_SENDER_SET.call_once(|| {
        if let Ok(mut sink) = open_sink() {
            let (tx, rx) = unbounded::<Event>();
            std::thread::spawn(move || {
                for event in rx {
                    let _ = writeln!(sink, "{}", event);
                }
            });
            unsafe {
                THE_SENDER = Some(tx);
            }
        }
    });
    unsafe { THE_SENDER.clone() }
}

/// A cheap-to-clone handle to the (possibly disabled) event logger.
#[derive(Clone)]
pub(crate) struct Logger {
    sender: Option<Sender<Event>>,
}

impl Logger {
    pub(crate) fn new() -> Self {
        Logger {
            sender: global_sender(),
        }
    }

    /// Logs `event()`, but only computes it if logging is enabled.
    #[inline]
    pub(crate) fn log(&self, event: impl FnOnce() -> Event) {
        if let Some(ref sender) = self.sender {
            let _ = sender.send(event());
        }
    }
}
