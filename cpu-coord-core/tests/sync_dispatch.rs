//! `run_on_cpu` (SYNC): the self-submission fast path and the cross-thread
//! enqueue-and-wait path.

use cpu_coord_core::{current_worker, CoordinatorBuilder, NoopKick, Worker};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[test]
fn submitting_to_self_runs_inline_without_a_round_trip() {
    let coordinator = CoordinatorBuilder::new().build();
    let worker = Arc::new(Worker::new(Box::new(NoopKick), Arc::downgrade(&coordinator)));
    coordinator.add(&worker);

    cpu_coord_core::bind_current_worker(Arc::clone(&worker));
    assert!(current_worker().is_some());

    let calls = AtomicUsize::new(0);
    coordinator.run_on_cpu(&worker, || {
        calls.fetch_add(1, Ordering::SeqCst);
    });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn submitting_from_another_thread_blocks_until_the_worker_runs_it() {
    let coordinator = CoordinatorBuilder::new().build();
    let worker = Arc::new(Worker::new(Box::new(NoopKick), Arc::downgrade(&coordinator)));
    coordinator.add(&worker);

    let owning_coordinator = Arc::clone(&coordinator);
    let owning_worker = Arc::clone(&worker);
    let stop = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let stop_in_loop = Arc::clone(&stop);
    let loop_handle = thread::spawn(move || {
        cpu_coord_core::bind_current_worker(Arc::clone(&owning_worker));
        while !stop_in_loop.load(Ordering::Relaxed) {
            owning_coordinator.process_queue(&owning_worker);
            thread::sleep(Duration::from_millis(1));
        }
    });

    let result = Arc::new(std::sync::Mutex::new(None));
    let result_in_job = Arc::clone(&result);
    coordinator.run_on_cpu(&worker, move || {
        *result_in_job.lock().unwrap() = Some(42);
    });
    assert_eq!(*result.lock().unwrap(), Some(42));

    stop.store(true, Ordering::Relaxed);
    loop_handle.join().unwrap();
}
