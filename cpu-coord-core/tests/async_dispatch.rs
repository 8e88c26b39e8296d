//! `async_run_on_cpu` ordering and `async_run_on_cpu_no_bql`'s BQL-released
//! contract.

use cpu_coord_core::{Bql, CoordinatorBuilder, NoopKick, StdBql, Worker};
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

#[test]
fn async_items_execute_in_submission_order_when_drained() {
    let coordinator = CoordinatorBuilder::new().build();
    let worker = Arc::new(Worker::new(Box::new(NoopKick), Arc::downgrade(&coordinator)));
    coordinator.add(&worker);

    let seen = Arc::new(Mutex::new(Vec::new()));
    for i in 0..8 {
        let seen = Arc::clone(&seen);
        coordinator.async_run_on_cpu(&worker, move || {
            seen.lock().unwrap().push(i);
        });
    }

    coordinator.process_queue(&worker);
    assert_eq!(*seen.lock().unwrap(), (0..8).collect::<Vec<_>>());
}

#[test]
fn async_no_bql_items_see_the_bql_released_even_if_the_caller_held_it() {
    let bql: Arc<dyn Bql> = Arc::new(StdBql::new());
    let coordinator = CoordinatorBuilder::new().bql(Arc::clone(&bql)).build();
    let worker = Arc::new(Worker::new(Box::new(NoopKick), Arc::downgrade(&coordinator)));
    coordinator.add(&worker);

    bql.lock();
    let saw_released = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let saw_released_in_job = Arc::clone(&saw_released);
    let bql_in_job = Arc::clone(&bql);
    coordinator.async_run_on_cpu_no_bql(&worker, move || {
        saw_released_in_job.store(!bql_in_job.is_held_by_me(), Ordering::SeqCst);
    });

    coordinator.process_queue(&worker);
    let bql_held_again = bql.is_held_by_me();
    bql.unlock();

    assert!(saw_released.load(Ordering::SeqCst));
    assert!(
        bql_held_again,
        "the dispatcher must restore the caller's original BQL state"
    );
}
