//! Go-style countdown barrier.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::sema::Sema;

/// Waits for a collection of tasks to finish.
///
/// The main task calls [`add`](WaitGroup::add) for each task to wait for,
/// each task calls [`done`](WaitGroup::done) when it finishes, and
/// [`wait`](WaitGroup::wait) blocks until the count reaches zero. A
/// single 64-bit atomic packs the count (signed, high 32 bits) and the
/// number of pending waiters (low 32 bits).
pub struct WaitGroup {
    state: AtomicU64,
    sema: Sema,
}

impl WaitGroup {
    /// Creates a wait group with a zero count.
    pub const fn new() -> Self {
        WaitGroup {
            state: AtomicU64::new(0),
            sema: Sema::new(0),
        }
    }

    /// Adds `delta`, which may be negative, to the count.
    ///
    /// When the count reaches zero, every pending [`wait`] is released.
    ///
    /// # Panics
    ///
    /// Panics if the count goes negative, or if an `add` with positive
    /// delta races with a [`wait`] draining the group. Counts must be
    /// added before anyone waits on them.
    ///
    /// [`wait`]: WaitGroup::wait
    pub fn add(&self, delta: i32) {
        // i32 -> u64 sign-extends, so a negative delta wraps the high word
        let shifted = (delta as u64) << 32;
        let state = self.state.fetch_add(shifted, Ordering::SeqCst).wrapping_add(shifted);
        let count = (state >> 32) as i32;
        let waiters = state as u32;

        assert!(count >= 0, "WaitGroup count is negative");
        assert!(
            waiters == 0 || delta <= 0 || count != delta,
            "WaitGroup::add with positive delta while the group is being drained"
        );

        // anyone to wake up
        if count == 0 && waiters > 0 {
            debug_assert_eq!(self.state.load(Ordering::SeqCst), state);

            self.state.store(0, Ordering::SeqCst);
            for _ in 0..waiters {
                self.sema.release();
            }
        }
    }

    /// Decrements the count by one.
    pub fn done(&self) {
        self.add(-1);
    }

    /// Blocks the current task until the count reaches zero.
    ///
    /// Returns immediately when the count is already zero.
    pub fn wait(&self) {
        let mut state = self.state.load(Ordering::SeqCst);
        loop {
            let count = (state >> 32) as i32;
            if count == 0 {
                return;
            }

            // add ourselves to the wait list, and block
            match self.state.compare_exchange_weak(
                state,
                state + 1,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => {
                    // the drainer releases exactly the waiters it saw
                    self.sema.acquire();
                    return;
                }
                Err(current) => state = current,
            }
        }
    }
}

impl Default for WaitGroup {
    fn default() -> Self {
        Self::new()
    }
}
