//! M:N fiber scheduler.
//!
//! Tasks are stackful fibers multiplexed over a pool of OS worker
//! threads. Workers block on a shared run queue, switch into task fibers
//! and get control back when a task yields, suspends or completes. There
//! is no preemption: a task runs until it reaches an explicit suspension
//! point.

mod core;
mod queue;
mod worker;

pub use self::core::{Scheduler, SchedulerConfig, SchedulerStats, DEFAULT_STACK_SIZE};
pub use self::queue::{TaskRef, UnlockFn};
pub use self::worker::{current_task, suspend_self, suspend_with_unlock, wake, yield_now};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use crate::error::{Error, Result};
use crate::fiber::FiberFactory;

/// Controls the lifetime of scheduler worker threads.
///
/// Workers poll [`running`](RunContext::running) between dispatches and
/// exit once it returns false; queued tasks are left behind.
pub trait RunContext: Sync {
    /// Returns true while workers should keep dispatching.
    fn running(&self) -> bool;
}

struct FlagContext {
    run: AtomicBool,
}

impl RunContext for FlagContext {
    fn running(&self) -> bool {
        self.run.load(Ordering::Acquire)
    }
}

/// Creates a new task on the current task's scheduler with the default
/// stack size.
///
/// # Panics
///
/// Panics when called from a thread with no attached worker.
pub fn spawn<F>(entry: F) -> TaskRef
where
    F: FnOnce() + Send + 'static,
{
    worker::with_current_scheduler(|scheduler| scheduler.spawn(entry))
}

/// Creates a new task on the current task's scheduler with an explicit
/// stack size (0 selects the default).
///
/// # Panics
///
/// Panics when called from a thread with no attached worker.
pub fn spawn_with_stack<F>(entry: F, stack_size: usize) -> TaskRef
where
    F: FnOnce() + Send + 'static,
{
    worker::with_current_scheduler(|scheduler| scheduler.spawn_with_stack(entry, stack_size))
}

/// Creates a scheduler and drives it on this thread until `entry` returns.
///
/// Spawns an initial task running `entry`, starts `nthreads - 1` worker
/// threads (0 selects the CPU count) and runs the calling thread as the
/// remaining worker. When `entry` returns, all workers drain out and the
/// scheduler is destroyed.
pub fn run_function<F>(factory: Arc<dyn FiberFactory>, nthreads: usize, entry: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    let scheduler = Scheduler::new(factory)?;
    let nthreads = if nthreads == 0 {
        scheduler.config.worker_threads
    } else {
        nthreads
    };
    let run_context = Arc::new(FlagContext {
        run: AtomicBool::new(true),
    });

    log::debug!("run_function starting with {} worker threads", nthreads);

    {
        let run_context = Arc::clone(&run_context);
        scheduler.spawn(move || {
            entry();
            run_context.run.store(false, Ordering::Release);
        });
    }

    thread::scope(|scope| -> Result<()> {
        for i in 1..nthreads {
            let scheduler = &scheduler;
            let run_context = &run_context;
            thread::Builder::new()
                .name(format!("{}-{}", scheduler.config.thread_name_prefix, i))
                .spawn_scoped(scope, move || scheduler.run(&**run_context))
                .map_err(|e| Error::WorkerSpawn {
                    reason: e.to_string(),
                })?;
        }

        scheduler.run(&*run_context);
        Ok(())
    })
}
