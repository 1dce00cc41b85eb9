//! Scheduler state and task creation.

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::fiber::{Fiber, FiberFactory};
use crate::timer;

use super::queue::{Task, TaskList, TaskRef};
use super::worker;
use super::RunContext;

/// Stack size used for tasks spawned with stack size 0, unless overridden
/// in [`SchedulerConfig`].
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Scheduler configuration
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Number of worker threads driven by [`run_function`] (0 = number of
    /// CPU cores)
    ///
    /// [`run_function`]: super::run_function
    pub worker_threads: usize,
    /// Thread name prefix for workers started by `run_function`
    pub thread_name_prefix: String,
    /// Stack size for tasks spawned with stack size 0
    pub default_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_threads: num_cpus::get(),
            thread_name_prefix: "strand-worker".to_string(),
            default_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

/// Scheduler statistics
#[derive(Debug, Default)]
pub struct SchedulerStats {
    /// Total tasks spawned
    pub tasks_spawned: AtomicUsize,
    /// Total tasks that ran to completion
    pub tasks_completed: AtomicUsize,
    /// Total dispatches (a task may be dispatched many times)
    pub dispatches: AtomicUsize,
}

/// The scheduler: a shared run queue drained by worker threads.
///
/// Workers attach with [`run`](Scheduler::run) and pull tasks off the
/// queue, switching into their fibers until each task suspends or
/// completes.
pub struct Scheduler {
    pub(crate) runqueue: Mutex<TaskList>,
    pub(crate) notready: Condvar,
    pub(crate) factory: Arc<dyn FiberFactory>,
    pub(crate) config: SchedulerConfig,
    pub(crate) stats: SchedulerStats,
    pub(crate) attached: AtomicUsize,
}

impl Scheduler {
    /// Creates a scheduler with the default configuration.
    pub fn new(factory: Arc<dyn FiberFactory>) -> Result<Arc<Self>> {
        Self::with_config(factory, SchedulerConfig::default())
    }

    /// Creates a scheduler with the given configuration.
    pub fn with_config(
        factory: Arc<dyn FiberFactory>,
        mut config: SchedulerConfig,
    ) -> Result<Arc<Self>> {
        if config.worker_threads == 0 {
            config.worker_threads = num_cpus::get();
        }

        // the timer singleton serves every scheduler in the process
        timer::ensure_timer_thread()?;

        log::debug!(
            "creating scheduler ({} worker threads, {} byte default stacks)",
            config.worker_threads,
            config.default_stack_size
        );

        Ok(Arc::new(Scheduler {
            runqueue: Mutex::new(TaskList::new()),
            notready: Condvar::new(),
            factory,
            config,
            stats: SchedulerStats::default(),
            attached: AtomicUsize::new(0),
        }))
    }

    /// Returns the fiber factory this scheduler was created with.
    pub fn factory(&self) -> &Arc<dyn FiberFactory> {
        &self.factory
    }

    /// Returns the scheduler counters.
    pub fn stats(&self) -> &SchedulerStats {
        &self.stats
    }

    /// Drives the current OS thread as a worker until `run_context`
    /// reports it should stop.
    ///
    /// May be called from several threads at once; each becomes a worker.
    pub fn run(&self, run_context: &dyn RunContext) {
        worker::run(self, run_context);
    }

    /// Creates a new task with the default stack size and schedules it.
    pub fn spawn<F>(&self, entry: F) -> TaskRef
    where
        F: FnOnce() + Send + 'static,
    {
        self.spawn_with_stack(entry, 0)
    }

    /// Creates a new task with an explicit stack size and schedules it.
    ///
    /// A `stack_size` of 0 selects the configured default (1 MiB unless
    /// overridden).
    pub fn spawn_with_stack<F>(&self, entry: F, stack_size: usize) -> TaskRef
    where
        F: FnOnce() + Send + 'static,
    {
        let stack_size = if stack_size == 0 {
            self.config.default_stack_size
        } else {
            stack_size
        };
        let entry: Box<dyn FnOnce() + Send> = Box::new(entry);

        // the handshake switches from the caller's own fiber when a task
        // spawns a task; a plain thread is converted for the duration
        let (calling_fiber, adopted) = match worker::current_worker_opt() {
            Some(ctx) => {
                let current = unsafe { (*ctx).current };
                assert!(
                    !current.is_null(),
                    "spawn on an attached thread outside a task"
                );
                (unsafe { (*current).fiber }, false)
            }
            None => (self.factory.from_current_thread(), true),
        };

        let task = unsafe { create_task(&*self.factory, calling_fiber, entry, stack_size) };

        {
            let mut queue = self.runqueue.lock();
            queue.push(task);
        }
        self.notready.notify_one();
        self.stats.tasks_spawned.fetch_add(1, Ordering::Relaxed);

        if adopted {
            unsafe { self.factory.release_current_thread(calling_fiber) };
        }

        TaskRef::new(task)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        assert_eq!(
            self.attached.load(Ordering::SeqCst),
            0,
            "scheduler destroyed while workers are attached"
        );
    }
}

/// Transient handshake state; lives on the spawning caller's stack and is
/// dead as soon as the trampoline switches back.
struct SpawnContext<'a> {
    result: *mut Task,
    factory: *const (dyn FiberFactory + 'a),
    calling_fiber: Fiber,
    entry: Option<Box<dyn FnOnce() + Send>>,
}

unsafe fn task_trampoline(self_fiber: Fiber, context: *mut c_void) -> Fiber {
    let ctx = &mut *(context as *mut SpawnContext<'_>);

    // the task record lives here, on the fiber's own stack
    let mut task = Task::new(self_fiber);
    let task_ptr: *mut Task = &mut task;
    let entry = ctx.entry.take().expect("task entry already taken");

    let factory = ctx.factory;
    let calling_fiber = ctx.calling_fiber;
    ctx.result = task_ptr;
    (&*factory).switch_to(self_fiber, calling_fiber);

    // NOTE: ctx fell out of scope in create_task and is no longer valid

    entry();

    // flag ourselves for deletion and hand control to our worker
    let thread = (*task_ptr).thread;
    (*thread).delete_last_fiber = true;
    (*thread).fiber
}

/// Creates a new task, but does not schedule it.
///
/// Primes the fiber: the first switch into it builds the stack-local
/// [`Task`], moves the entry closure off the caller's stack and switches
/// straight back, publishing the task pointer through `SpawnContext`.
unsafe fn create_task(
    factory: &dyn FiberFactory,
    calling_fiber: Fiber,
    entry: Box<dyn FnOnce() + Send>,
    stack_size: usize,
) -> *mut Task {
    let mut ctx = SpawnContext {
        result: ptr::null_mut(),
        factory,
        calling_fiber,
        entry: Some(entry),
    };

    let fiber = factory.create(
        task_trampoline,
        &mut ctx as *mut SpawnContext as *mut c_void,
        stack_size,
    );
    factory.switch_to(calling_fiber, fiber);

    debug_assert!(!ctx.result.is_null());
    ctx.result
}
