//! The per-thread worker loop and suspension primitives.
//!
//! Each worker owns a scheduler fiber (the fiber backing its native
//! stack). Dispatch alternates between that fiber and task fibers; every
//! suspension primitive here is a switch back to the scheduler fiber of
//! whichever worker is currently dispatching the task.

use std::cell::Cell;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::Ordering;

use parking_lot::lock_api::RawMutex as _;

use crate::fiber::Fiber;

use super::core::Scheduler;
use super::queue::{Task, TaskRef, UnlockFn};
use super::RunContext;

/// Thread-specific scheduler context; lives on the worker's native stack
/// for the duration of [`Scheduler::run`].
pub(crate) struct WorkerContext {
    pub(crate) scheduler: *const Scheduler,
    pub(crate) fiber: Fiber,
    pub(crate) current: *mut Task,
    pub(crate) delete_last_fiber: bool,
}

thread_local! {
    static CURRENT_WORKER: Cell<*mut WorkerContext> = const { Cell::new(ptr::null_mut()) };
}

pub(crate) fn current_worker_opt() -> Option<*mut WorkerContext> {
    let worker = CURRENT_WORKER.get();
    if worker.is_null() {
        None
    } else {
        Some(worker)
    }
}

fn current_worker() -> *mut WorkerContext {
    let worker = CURRENT_WORKER.get();
    assert!(
        !worker.is_null(),
        "thread is not attached to a scheduler; call Scheduler::run or run_function first"
    );
    worker
}

pub(crate) fn with_current_scheduler<R>(f: impl FnOnce(&Scheduler) -> R) -> R {
    let worker = current_worker();
    unsafe { f(&*(*worker).scheduler) }
}

pub(crate) fn run(scheduler: &Scheduler, run_context: &dyn RunContext) {
    // a nested run inherits the scheduler fiber from the outer frame
    let previous = CURRENT_WORKER.get();
    let fiber = if previous.is_null() {
        scheduler.factory.from_current_thread()
    } else {
        assert!(
            unsafe { (*previous).current.is_null() },
            "Scheduler::run called from inside a task"
        );
        unsafe { (*previous).fiber }
    };

    scheduler.attached.fetch_add(1, Ordering::SeqCst);
    log::debug!("worker attached on {:?}", std::thread::current().name());

    run_worker(scheduler, fiber, run_context);

    CURRENT_WORKER.set(previous);
    scheduler.attached.fetch_sub(1, Ordering::SeqCst);
    log::debug!("worker detached on {:?}", std::thread::current().name());

    if previous.is_null() {
        unsafe { scheduler.factory.release_current_thread(fiber) };
    }
}

/// Atomically waits for a runnable task.
fn wait_for_task(scheduler: &Scheduler, run_context: &dyn RunContext) -> *mut Task {
    let mut queue = scheduler.runqueue.lock();
    while queue.is_empty() && run_context.running() {
        scheduler.notready.wait(&mut queue);
    }
    queue.pop()
}

fn run_worker(scheduler: &Scheduler, fiber: Fiber, run_context: &dyn RunContext) {
    let mut thread = WorkerContext {
        scheduler,
        fiber,
        current: ptr::null_mut(),
        delete_last_fiber: false,
    };
    let thread_ptr: *mut WorkerContext = &mut thread;
    CURRENT_WORKER.set(thread_ptr);

    while run_context.running() {
        let task = wait_for_task(scheduler, run_context);
        if task.is_null() {
            // shut down while waiting; re-check the predicate
            continue;
        }

        unsafe {
            let task_fiber = (*task).fiber;
            (*task).thread = thread_ptr;
            (*thread_ptr).current = task;
            (*thread_ptr).delete_last_fiber = false;
            scheduler.stats.dispatches.fetch_add(1, Ordering::Relaxed);

            (*task).run_lock.lock();
            scheduler.factory.switch_to(fiber, task_fiber);

            if (*thread_ptr).delete_last_fiber {
                // the task completed; its record lived on the fiber stack
                // and is gone once the fiber is released
                scheduler.factory.release(task_fiber);
                scheduler.stats.tasks_completed.fetch_add(1, Ordering::Relaxed);
            } else {
                let unlock = (*task).unlock.take();
                let unlock_context = (*task).unlock_context;

                // let other workers dispatch this task
                (*task).run_lock.unlock();

                // with the run lock down, the waiter structure may now
                // publish the suspension to concurrent wakers
                if let Some(unlock) = unlock {
                    unlock(unlock_context);
                }
            }

            (*thread_ptr).current = ptr::null_mut();
        }
    }

    CURRENT_WORKER.set(ptr::null_mut());

    // wake anyone still blocked on the run queue so they can re-check
    scheduler.notready.notify_all();
}

/// Returns the task currently executing on this worker.
///
/// # Panics
///
/// Panics when called from a thread with no attached worker, or from a
/// worker's scheduler fiber rather than a task.
pub fn current_task() -> TaskRef {
    let worker = current_worker();
    let current = unsafe { (*worker).current };
    assert!(!current.is_null(), "no task is executing on this worker");
    TaskRef::new(current)
}

fn suspend_task(task: TaskRef) {
    let worker = current_worker();
    unsafe {
        let scheduler = &*(*worker).scheduler;
        scheduler
            .factory
            .switch_to((*task.as_ptr()).fiber, (*worker).fiber);
    }
}

/// Yields control back to the scheduler.
///
/// The current task is rescheduled behind everything already queued and
/// this call blocks until it is dispatched again.
pub fn yield_now() {
    let task = current_task();
    wake(task);
    suspend_task(task);
}

/// Suspends the current task until a corresponding [`wake`].
pub fn suspend_self() {
    suspend_task(current_task());
}

/// Makes `task` runnable on its scheduler.
///
/// The task must be suspended, or suspending under the publish-then-sleep
/// protocol; waking a task that may complete without suspending again is
/// a race on the task's storage.
pub fn wake(task: TaskRef) {
    unsafe {
        let task = task.as_ptr();
        let scheduler = &*(*(*task).thread).scheduler;
        {
            let mut queue = scheduler.runqueue.lock();
            queue.push(task);
        }
        scheduler.notready.notify_one();
    }
}

/// Suspends `task` (which must be the current task) and has the worker
/// loop invoke `unlock(context)` once the task's run lock is released.
///
/// This is the publish-then-sleep primitive: the caller registers itself
/// on a waiter structure under a lock, suspends through this call, and
/// the worker releases that lock only after the task can no longer be
/// dispatched concurrently. See [`crate::sema`] and [`crate::timer`].
///
/// # Safety
///
/// `context` must stay valid until `unlock` runs, and `unlock` must not
/// panic or touch the suspending task.
pub unsafe fn suspend_with_unlock(task: TaskRef, unlock: UnlockFn, context: *mut c_void) {
    let ptr = task.as_ptr();
    (*ptr).unlock = Some(unlock);
    (*ptr).unlock_context = context;
    suspend_task(task);
}
