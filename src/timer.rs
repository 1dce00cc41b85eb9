//! Cooperative sleep backed by a dedicated timer thread.
//!
//! One timer thread per process owns a 4-ary min-heap of pending
//! deadlines, sleeping until the earliest one and waking its task. The
//! heap holds pointers into sleeping tasks' stacks: a [`sleep_ms`] frame
//! owns its timer record and the record is off the heap before the task
//! is woken, so the frame can unwind safely.

use std::ffi::c_void;
use std::mem;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;
use parking_lot::{Condvar, Mutex};

use crate::error::{Error, Result};
use crate::scheduler::{current_task, suspend_with_unlock, wake, TaskRef};

struct Timer {
    when: Instant,
    task: TaskRef,
    heap_index: isize,
}

#[derive(Clone, Copy)]
struct TimerPtr(*mut Timer);

unsafe impl Send for TimerPtr {}

/// Pending timers, maintained as a quad-child heap (each node has four
/// children instead of two) keyed by deadline.
struct TimerHeap {
    timers: Vec<TimerPtr>,
}

/// Shared state of the timer service.
pub struct TimerContext {
    lock: Mutex<TimerHeap>,
    cond: Condvar,
}

static TIMERS: TimerContext = TimerContext {
    lock: Mutex::new(TimerHeap { timers: Vec::new() }),
    cond: Condvar::new(),
};

static TIMER_THREAD: OnceCell<()> = OnceCell::new();

/// Returns the process-wide timer context.
pub fn timer_context_current() -> &'static TimerContext {
    &TIMERS
}

/// Starts the timer thread if it is not running yet.
pub(crate) fn ensure_timer_thread() -> Result<()> {
    TIMER_THREAD.get_or_try_init(|| {
        log::debug!("starting timer thread");
        std::thread::Builder::new()
            .name("strand-timer".to_string())
            .spawn(|| timer_context_process(timer_context_current()))
            .map(|_| ())
            .map_err(|e| Error::TimerSpawn {
                reason: e.to_string(),
            })
    })?;
    Ok(())
}

/// Swaps a timer toward the root until its parent expires no later than
/// it does.
fn bubble_up(timers: &mut [TimerPtr], mut index: usize) {
    unsafe {
        let timer = timers[index];
        let when = (*timer.0).when;

        while index > 0 {
            let parent = (index - 1) / 4;
            if when >= (*timers[parent].0).when {
                // the parent wakes up before us; done
                break;
            }

            timers[index] = timers[parent];
            (*timers[index].0).heap_index = index as isize;
            timers[parent] = timer;
            (*timer.0).heap_index = parent as isize;

            index = parent;
        }
    }
}

/// Swaps a timer away from the root until no child expires before it.
fn bubble_down(timers: &mut [TimerPtr], mut index: usize) {
    unsafe {
        let timer = timers[index];
        let when = (*timer.0).when;

        loop {
            let first_child = index * 4 + 1;
            if first_child >= timers.len() {
                break;
            }

            // earliest of up to four children
            let mut candidate = first_child;
            let mut candidate_when = (*timers[first_child].0).when;
            let last_child = (index * 4 + 4).min(timers.len() - 1);
            for child in first_child + 1..=last_child {
                let child_when = (*timers[child].0).when;
                if child_when < candidate_when {
                    candidate = child;
                    candidate_when = child_when;
                }
            }

            if candidate_when >= when {
                break;
            }

            timers[index] = timers[candidate];
            (*timers[index].0).heap_index = index as isize;
            timers[candidate] = timer;
            (*timer.0).heap_index = candidate as isize;

            index = candidate;
        }
    }
}

/// Inserts a timer and returns its final heap index.
fn add_with_lock(heap: &mut TimerHeap, timer: *mut Timer) -> usize {
    unsafe {
        (*timer).heap_index = heap.timers.len() as isize;
        heap.timers.push(TimerPtr(timer));
        let last = heap.timers.len() - 1;
        bubble_up(&mut heap.timers, last);
        (*timer).heap_index as usize
    }
}

/// Pops the earliest timer, restoring the heap property.
fn remove_root(heap: &mut TimerHeap) -> *mut Timer {
    let TimerPtr(timer) = heap.timers.swap_remove(0);
    if let Some(&TimerPtr(moved)) = heap.timers.first() {
        unsafe {
            (*moved).heap_index = 0;
        }
        bubble_down(&mut heap.timers, 0);
    }
    timer
}

fn timer_context_process(ctx: &'static TimerContext) {
    loop {
        let mut heap = ctx.lock.lock();
        let now = Instant::now();
        let mut next_deadline = None;

        // wake everything that has expired
        while let Some(&TimerPtr(earliest)) = heap.timers.first() {
            let when = unsafe { (*earliest).when };
            if when > now {
                next_deadline = Some(when);
                break;
            }

            let timer = remove_root(&mut heap);
            unsafe {
                // off the heap before the wake; the sleep_ms frame owning
                // this record may unwind as soon as the task resumes
                (*timer).heap_index = -1;
                wake((*timer).task);
            }
        }

        // wait for a wakeup, or for the next timer to expire
        match next_deadline {
            Some(deadline) => {
                let _ = ctx.cond.wait_until(&mut heap, deadline);
            }
            None => ctx.cond.wait(&mut heap),
        }
    }
}

unsafe fn unlock_timer_context(context: *mut c_void) {
    let ctx = &*(context as *const TimerContext);
    ctx.lock.force_unlock();
}

/// Suspends the current task for at least `ms` milliseconds.
///
/// The task is woken by the timer thread; it may resume on any worker.
/// `sleep_ms(0)` returns promptly after a timer-thread round trip.
///
/// # Panics
///
/// Panics when called from a thread with no attached worker.
pub fn sleep_ms(ms: u64) {
    let task = current_task();

    let mut timer = Timer {
        when: Instant::now() + Duration::from_millis(ms),
        task,
        heap_index: -1,
    };

    let ctx = timer_context_current();
    let mut heap = ctx.lock.lock();

    let index = add_with_lock(&mut heap, &mut timer);
    if index == 0 {
        // new earliest deadline; the timer thread must re-arm
        ctx.cond.notify_one();
    }

    // suspend, then let the worker unlock the timer context; the guard
    // must not unlock here or the timer thread could wake the task
    // before it has switched away
    mem::forget(heap);
    unsafe {
        suspend_with_unlock(
            task,
            unlock_timer_context,
            ctx as *const TimerContext as *mut c_void,
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn timer_at(base: Instant, ms: u64) -> Box<Timer> {
        Box::new(Timer {
            when: base + Duration::from_millis(ms),
            task: TaskRef::dangling(),
            heap_index: -1,
        })
    }

    #[test]
    fn test_heap_pops_in_deadline_order() {
        let base = Instant::now();
        let mut heap = TimerHeap { timers: Vec::new() };

        let mut timers: Vec<Box<Timer>> = [30u64, 10, 50, 20, 40, 15, 5]
            .iter()
            .map(|&ms| timer_at(base, ms))
            .collect();
        for timer in &mut timers {
            add_with_lock(&mut heap, &mut **timer);
        }

        let mut popped = Vec::new();
        while !heap.timers.is_empty() {
            let timer = remove_root(&mut heap);
            popped.push(unsafe { (*timer).when });
        }

        let mut sorted = popped.clone();
        sorted.sort();
        assert_eq!(popped, sorted);
    }

    #[test]
    fn test_heap_indices_track_positions() {
        let base = Instant::now();
        let mut heap = TimerHeap { timers: Vec::new() };

        let mut timers: Vec<Box<Timer>> =
            (0..32).map(|i| timer_at(base, 97 * (i % 7) as u64)).collect();
        for timer in &mut timers {
            add_with_lock(&mut heap, &mut **timer);
        }

        for (position, &TimerPtr(timer)) in heap.timers.iter().enumerate() {
            assert_eq!(unsafe { (*timer).heap_index }, position as isize);
        }
    }

    #[test]
    fn test_earliest_insert_lands_at_root() {
        let base = Instant::now();
        let mut heap = TimerHeap { timers: Vec::new() };

        let mut late = timer_at(base, 100);
        let mut later = timer_at(base, 200);
        let mut early = timer_at(base, 1);

        assert_eq!(add_with_lock(&mut heap, &mut *late), 0);
        assert_eq!(add_with_lock(&mut heap, &mut *later), 1);
        assert_eq!(add_with_lock(&mut heap, &mut *early), 0);
    }
}
