//! # Strands
//!
//! Go-like stackful tasks for Rust: a cooperative, fiber-based M:N
//! scheduler.
//!
//! ## Features
//!
//! - **Tasks**: lightweight stackful fibers multiplexed over a small pool
//!   of OS worker threads
//! - **Cooperative scheduling**: tasks run until they yield, sleep or
//!   block on a primitive; there is no preemption
//! - **Synchronization**: counting semaphores and Go-style wait groups
//!   built on the suspension protocol
//! - **Timers**: `sleep_ms` parks a task on a shared timer heap without
//!   tying up a worker
//!
//! ## Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use strands::prelude::*;
//!
//! let factory: Arc<dyn FiberFactory> = Arc::new(OsFiberFactory::new());
//! run_function(factory, 4, || {
//!     let wg = Arc::new(WaitGroup::new());
//!     wg.add(2);
//!     for id in 0..2 {
//!         let wg = Arc::clone(&wg);
//!         strands::spawn(move || {
//!             sleep_ms(10);
//!             println!("task {id} woke up");
//!             wg.done();
//!         });
//!     }
//!     wg.wait();
//! })
//! .unwrap();
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod fiber;
pub mod platform;
pub mod scheduler;
pub mod sema;
pub mod timer;
pub mod waitgroup;

/// Convenient re-exports for common functionality
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::fiber::{Fiber, FiberEntry, FiberFactory};
    pub use crate::platform::OsFiberFactory;
    pub use crate::scheduler::{
        current_task, run_function, spawn, spawn_with_stack, suspend_self, wake, yield_now,
        RunContext, Scheduler, SchedulerConfig, TaskRef,
    };
    pub use crate::sema::Sema;
    pub use crate::timer::sleep_ms;
    pub use crate::waitgroup::WaitGroup;
}

// Re-export the prelude at the crate root for convenience
pub use prelude::*;

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn basic_spawn_test() {
        let factory: Arc<dyn FiberFactory> = Arc::new(OsFiberFactory::new());
        let total = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&total);

        run_function(factory, 2, move || {
            let wg = Arc::new(WaitGroup::new());
            wg.add(4);

            for i in 0..4usize {
                let wg = Arc::clone(&wg);
                let total = Arc::clone(&observed);
                spawn(move || {
                    total.fetch_add(i, Ordering::Relaxed);
                    wg.done();
                });
            }

            wg.wait();
        })
        .unwrap();

        assert_eq!(total.load(Ordering::Relaxed), 6);
    }
}
