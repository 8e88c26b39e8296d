//! `cpu-coord`: coordination core for a multi-threaded CPU emulator.
//!
//! This crate is a thin façade over [`cpu_coord_core`], which does all the
//! work — the worker registry, per-worker work queues, the work-item
//! dispatcher, and the exclusive barrier. Split out the same way `rayon`
//! sits on top of `rayon-core`: application code depends on this crate,
//! embedders who want to build their own higher-level API on the same
//! primitives can depend on `cpu-coord-core` directly.
//!
//! ```
//! use cpu_coord::{CoordinatorBuilder, NoopKick, Worker};
//! use std::sync::Arc;
//!
//! let coordinator = CoordinatorBuilder::new().build();
//! let worker = Arc::new(Worker::new(Box::new(NoopKick), Arc::downgrade(&coordinator)));
//! coordinator.add(&worker);
//! ```

pub use cpu_coord_core::{
    bind_current_worker, current_worker, Bql, Coordinator, CoordinatorBuilder, Kick, NoopKick,
    RegistryGuard, StdBql, Worker, UNASSIGNED,
};
