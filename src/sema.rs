//! Counting semaphore with address-hashed wait roots.
//!
//! A [`Sema`] is a single atomic counter; all waiting state lives in a
//! fixed table of roots shared by every semaphore in the process. A
//! semaphore maps to a root by hashing its address, so many semaphores
//! stripe over a few locks and the wait path allocates nothing: waiter
//! records live on the suspended tasks' own stacks.

use std::cell::UnsafeCell;
use std::ffi::c_void;
use std::mem;
use std::ptr;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::lock_api::RawMutex as _;
use parking_lot::RawMutex;

use crate::scheduler::{current_task, suspend_with_unlock, wake, TaskRef};

/// Counting semaphore for tasks.
///
/// [`acquire`](Sema::acquire) suspends the calling task while the count
/// is zero; [`release`](Sema::release) may be called from any thread,
/// including plain OS threads outside the scheduler.
pub struct Sema {
    counter: AtomicU32,
}

/// Stack-allocated record linking a suspended task into its root.
struct Waiter {
    next: *mut Waiter,
    owner: TaskRef,
    sema: *const Sema,
}

struct Root {
    lock: RawMutex,
    /// Head of the waiter list; guarded by `lock`.
    head: UnsafeCell<*mut Waiter>,
    waiters: AtomicU32,
}

// head is only touched under lock
unsafe impl Sync for Root {}

impl Root {
    const fn new() -> Self {
        Root {
            lock: RawMutex::INIT,
            head: UnsafeCell::new(ptr::null_mut()),
            waiters: AtomicU32::new(0),
        }
    }
}

// prime, so the modulo spreads addresses evenly
const ROOT_TABLE_SIZE: usize = 251;

static ROOTS: [Root; ROOT_TABLE_SIZE] = [const { Root::new() }; ROOT_TABLE_SIZE];

fn root_for(sema: *const Sema) -> &'static Root {
    let index = (sema as usize / mem::align_of::<Sema>()) % ROOT_TABLE_SIZE;
    &ROOTS[index]
}

fn try_decrement(counter: &AtomicU32) -> bool {
    let mut value = counter.load(Ordering::SeqCst);
    loop {
        if value == 0 {
            return false;
        }
        match counter.compare_exchange_weak(value, value - 1, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return true,
            Err(current) => value = current,
        }
    }
}

unsafe fn unlock_root(context: *mut c_void) {
    let root = &*(context as *const Root);
    root.lock.unlock();
}

impl Sema {
    /// Creates a semaphore with the given initial count.
    pub const fn new(initial: u32) -> Self {
        Sema {
            counter: AtomicU32::new(initial),
        }
    }

    /// Acquires one count, suspending the current task until a count is
    /// available.
    ///
    /// # Panics
    ///
    /// Panics when the count is zero and the caller is not a task on an
    /// attached worker.
    pub fn acquire(&self) {
        // handle the easy, non-contended case
        if try_decrement(&self.counter) {
            return;
        }

        let task = current_task();
        let root = root_for(self);
        loop {
            root.lock.lock();
            root.waiters.fetch_add(1, Ordering::SeqCst);

            // acquired in between lock states
            if try_decrement(&self.counter) {
                root.waiters.fetch_sub(1, Ordering::SeqCst);
                unsafe { root.lock.unlock() };
                return;
            }

            let mut waiter = Waiter {
                next: unsafe { *root.head.get() },
                owner: task,
                sema: self,
            };
            unsafe {
                *root.head.get() = &mut waiter;

                // the worker releases the task run lock, then this root;
                // a racing release serializes on the root and finds us
                suspend_with_unlock(task, unlock_root, root as *const Root as *mut c_void);
            }

            if try_decrement(&self.counter) {
                // waiter count already dropped by release()
                return;
            }
        }
    }

    /// Acquires one count without suspending; returns whether a count was
    /// taken.
    pub fn try_acquire(&self) -> bool {
        try_decrement(&self.counter)
    }

    /// Releases one count, waking a task waiting on this semaphore if
    /// there is one.
    pub fn release(&self) {
        let root = root_for(self);
        self.counter.fetch_add(1, Ordering::SeqCst);

        // easy, no waiters path for this root
        if root.waiters.load(Ordering::SeqCst) == 0 {
            return;
        }

        let mut to_wake: *mut Waiter = ptr::null_mut();
        root.lock.lock();
        if root.waiters.load(Ordering::SeqCst) != 0 {
            unsafe {
                // find a task waiting on this semaphore and unlink it
                let mut prev: *mut *mut Waiter = root.head.get();
                let mut waiter = *prev;
                while !waiter.is_null() {
                    if (*waiter).sema == self as *const Sema {
                        root.waiters.fetch_sub(1, Ordering::SeqCst);
                        *prev = (*waiter).next;
                        to_wake = waiter;
                        break;
                    }
                    prev = &mut (*waiter).next;
                    waiter = (*waiter).next;
                }
            }
        }
        unsafe { root.lock.unlock() };

        if !to_wake.is_null() {
            wake(unsafe { (*to_wake).owner });
        }
    }
}
