//! Integration tests for the semaphore and wait group.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use common::run_test;
use strands::prelude::*;

#[test]
fn test_fan_out_thousand_tasks() {
    const TASKS: usize = 1000;

    let completed = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&completed);

    run_test(4, move || {
        let wg = Arc::new(WaitGroup::new());
        wg.add(TASKS as i32);

        for _ in 0..TASKS {
            let completed = Arc::clone(&observed);
            let wg = Arc::clone(&wg);
            // small stacks keep a thousand live fibers cheap
            spawn_with_stack(
                move || {
                    completed.fetch_add(1, Ordering::Relaxed);
                    wg.done();
                },
                64 * 1024,
            );
        }

        wg.wait();

        // the group is reusable once drained
        wg.wait();
    });

    assert_eq!(completed.load(Ordering::Relaxed), TASKS);
}

#[test]
fn test_semaphore_release_from_plain_thread() {
    const WAITERS: usize = 8;

    let acquired = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&acquired);

    run_test(4, move || {
        let sema = Arc::new(Sema::new(0));
        let wg = Arc::new(WaitGroup::new());
        wg.add(WAITERS as i32);

        for _ in 0..WAITERS {
            let sema = Arc::clone(&sema);
            let acquired = Arc::clone(&observed);
            let wg = Arc::clone(&wg);
            spawn(move || {
                sema.acquire();
                acquired.fetch_add(1, Ordering::Relaxed);
                wg.done();
            });
        }

        // releases come from outside the scheduler entirely
        let releaser = {
            let sema = Arc::clone(&sema);
            thread::spawn(move || {
                for _ in 0..WAITERS {
                    sema.release();
                }
            })
        };

        wg.wait();
        releaser.join().unwrap();

        assert!(!sema.try_acquire(), "all releases must be consumed");
    });

    assert_eq!(acquired.load(Ordering::Relaxed), WAITERS);
}

#[test]
fn test_semaphores_sharing_a_root_stay_independent() {
    // far more semaphores than roots, so collisions are certain
    const SEMAS: usize = 512;

    let woken = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&woken);

    run_test(4, move || {
        let semas: Arc<Vec<Sema>> = Arc::new((0..SEMAS).map(|_| Sema::new(0)).collect());
        let wg = Arc::new(WaitGroup::new());
        wg.add(SEMAS as i32);

        for index in 0..SEMAS {
            let semas = Arc::clone(&semas);
            let woken = Arc::clone(&observed);
            let wg = Arc::clone(&wg);
            spawn_with_stack(
                move || {
                    semas[index].acquire();
                    woken.fetch_add(1, Ordering::Relaxed);
                    wg.done();
                },
                64 * 1024,
            );
        }

        // release in reverse so every wake has to pick the right waiter
        // out of a shared root list
        for index in (0..SEMAS).rev() {
            semas[index].release();
        }

        wg.wait();
    });

    assert_eq!(woken.load(Ordering::Relaxed), SEMAS);
}

#[test]
fn test_waitgroup_wait_from_many_tasks() {
    const WAITERS: usize = 6;

    let released = Arc::new(AtomicUsize::new(0));
    let observed = Arc::clone(&released);
    let checked = Arc::clone(&released);

    run_test(4, move || {
        let gate = Arc::new(WaitGroup::new());
        gate.add(1);

        let all_waiting = Arc::new(WaitGroup::new());
        all_waiting.add(WAITERS as i32);

        for _ in 0..WAITERS {
            let gate = Arc::clone(&gate);
            let all_waiting = Arc::clone(&all_waiting);
            let released = Arc::clone(&observed);
            spawn(move || {
                all_waiting.done();
                gate.wait();
                released.fetch_add(1, Ordering::Relaxed);
            });
        }

        // every waiter is registered (or about to be); drop the gate
        all_waiting.wait();
        gate.done();

        // the waiters themselves still need to finish
        while released.load(Ordering::Relaxed) != WAITERS {
            yield_now();
        }
    });

    assert_eq!(checked.load(Ordering::Relaxed), WAITERS);
}

#[test]
fn test_sema_round_trip_restores_count() {
    run_test(2, || {
        let sema = Sema::new(1);
        sema.acquire();
        sema.release();
        assert!(sema.try_acquire());
        assert!(!sema.try_acquire());
    });
}
