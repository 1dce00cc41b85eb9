//! Task records and the intrusive run queue.

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;

use crate::fiber::Fiber;

use super::worker::WorkerContext;

/// Callback invoked by the worker loop after a task suspends and its run
/// lock has been released. See
/// [`suspend_with_unlock`](super::suspend_with_unlock).
pub type UnlockFn = unsafe fn(context: *mut c_void);

/// A unit of user work, backed by exactly one fiber.
///
/// The record lives on its own fiber's stack (see the spawn handshake in
/// `core.rs`), so task storage lives exactly as long as the fiber does.
pub(crate) struct Task {
    /// Worker currently dispatching this task; set on dispatch.
    pub(crate) thread: *mut WorkerContext,
    pub(crate) fiber: Fiber,
    /// Owned by whichever queue currently holds the task.
    pub(crate) next: *mut Task,
    pub(crate) unlock: Option<UnlockFn>,
    pub(crate) unlock_context: *mut c_void,
    /// Held by the dispatching worker from just before the switch into
    /// the task fiber until the switch returns. Serializes wake races.
    pub(crate) run_lock: RawMutex,
}

impl Task {
    pub(crate) fn new(fiber: Fiber) -> Self {
        Task {
            thread: ptr::null_mut(),
            fiber,
            next: ptr::null_mut(),
            unlock: None,
            unlock_context: ptr::null_mut(),
            run_lock: RawMutex::INIT,
        }
    }
}

/// Handle to a spawned task.
///
/// Valid from [`spawn`](super::Scheduler::spawn) until the task's entry
/// returns; a handle to a completed task must not be used.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct TaskRef {
    raw: NonNull<Task>,
}

// Task handles cross threads (wake from the timer thread or from plain
// OS threads); access is serialized by the queue and run-lock protocol.
unsafe impl Send for TaskRef {}
unsafe impl Sync for TaskRef {}

impl TaskRef {
    pub(crate) fn new(task: *mut Task) -> Self {
        TaskRef {
            raw: NonNull::new(task).expect("null task"),
        }
    }

    pub(crate) fn as_ptr(self) -> *mut Task {
        self.raw.as_ptr()
    }

    #[cfg(test)]
    pub(crate) fn dangling() -> Self {
        TaskRef {
            raw: NonNull::dangling(),
        }
    }
}

/// Intrusive FIFO of runnable tasks.
pub(crate) struct TaskList {
    front: *mut Task,
    last: *mut Task,
}

unsafe impl Send for TaskList {}

impl TaskList {
    pub(crate) const fn new() -> Self {
        TaskList {
            front: ptr::null_mut(),
            last: ptr::null_mut(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.front.is_null()
    }

    pub(crate) fn pop(&mut self) -> *mut Task {
        let task = self.front;
        if !task.is_null() {
            unsafe {
                self.front = (*task).next;
            }
            if self.front.is_null() {
                self.last = ptr::null_mut();
            }
        }
        task
    }

    pub(crate) fn push(&mut self, task: *mut Task) {
        unsafe {
            if self.last.is_null() {
                self.front = task;
                self.last = task;
            } else {
                (*self.last).next = task;
                self.last = task;
            }
            (*task).next = ptr::null_mut();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ptr::NonNull;

    fn dummy_task() -> Box<Task> {
        Box::new(Task::new(Fiber::from_raw(NonNull::dangling())))
    }

    #[test]
    fn test_tasklist_fifo_order() {
        let mut list = TaskList::new();
        assert!(list.is_empty());
        assert!(list.pop().is_null());

        let mut a = dummy_task();
        let mut b = dummy_task();
        let mut c = dummy_task();

        list.push(&mut *a);
        list.push(&mut *b);
        list.push(&mut *c);
        assert!(!list.is_empty());

        assert_eq!(list.pop(), &mut *a as *mut Task);
        assert_eq!(list.pop(), &mut *b as *mut Task);
        assert_eq!(list.pop(), &mut *c as *mut Task);
        assert!(list.pop().is_null());
        assert!(list.is_empty());
    }

    #[test]
    fn test_tasklist_repush_after_pop() {
        let mut list = TaskList::new();
        let mut a = dummy_task();
        let mut b = dummy_task();

        list.push(&mut *a);
        list.push(&mut *b);
        assert_eq!(list.pop(), &mut *a as *mut Task);

        // a re-enters behind b
        list.push(&mut *a);
        assert_eq!(list.pop(), &mut *b as *mut Task);
        assert_eq!(list.pop(), &mut *a as *mut Task);
        assert!(list.is_empty());
    }
}
