//! Scheduler performance benchmarks

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use strands::prelude::*;

fn with_scheduler<F>(nthreads: usize, f: F)
where
    F: FnOnce() + Send + 'static,
{
    let factory: Arc<dyn FiberFactory> = Arc::new(OsFiberFactory::new());
    run_function(factory, nthreads, f).expect("scheduler failed to run");
}

fn bench_spawn_join(c: &mut Criterion) {
    c.bench_function("spawn_join_1000", |b| {
        b.iter(|| {
            with_scheduler(2, || {
                let wg = Arc::new(WaitGroup::new());
                wg.add(1000);

                for i in 0..1000 {
                    let wg = Arc::clone(&wg);
                    spawn_with_stack(
                        move || {
                            black_box(i);
                            wg.done();
                        },
                        64 * 1024,
                    );
                }

                wg.wait();
            })
        })
    });
}

fn bench_yield(c: &mut Criterion) {
    c.bench_function("yield_10000", |b| {
        b.iter(|| {
            with_scheduler(1, || {
                for _ in 0..10_000 {
                    yield_now();
                }
            })
        })
    });
}

fn bench_sema_ping_pong(c: &mut Criterion) {
    c.bench_function("sema_ping_pong_1000", |b| {
        b.iter(|| {
            with_scheduler(2, || {
                let ping = Arc::new(Sema::new(0));
                let pong = Arc::new(Sema::new(0));
                let count = Arc::new(AtomicUsize::new(0));
                let wg = Arc::new(WaitGroup::new());
                wg.add(2);

                {
                    let ping = Arc::clone(&ping);
                    let pong = Arc::clone(&pong);
                    let count = Arc::clone(&count);
                    let wg = Arc::clone(&wg);
                    spawn(move || {
                        for _ in 0..1000 {
                            ping.acquire();
                            count.fetch_add(1, Ordering::Relaxed);
                            pong.release();
                        }
                        wg.done();
                    });
                }
                {
                    let ping = Arc::clone(&ping);
                    let pong = Arc::clone(&pong);
                    let wg = Arc::clone(&wg);
                    spawn(move || {
                        for _ in 0..1000 {
                            ping.release();
                            pong.acquire();
                        }
                        wg.done();
                    });
                }

                wg.wait();
                black_box(count.load(Ordering::Relaxed));
            })
        })
    });
}

criterion_group!(
    benches,
    bench_spawn_join,
    bench_yield,
    bench_sema_ping_pong
);
criterion_main!(benches);
