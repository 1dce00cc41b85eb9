//! Shared harness for scheduler integration tests.
//!
//! Runs the body of each test as the initial task of a fresh scheduler so
//! tests exercise the same code path as real callers.

use std::sync::{Arc, Once};

use strands::prelude::*;

static INIT: Once = Once::new();

/// Runs `f` as the initial task of a scheduler with `nthreads` workers.
pub fn run_test<F>(nthreads: usize, f: F)
where
    F: FnOnce() + Send + 'static,
{
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });

    let factory: Arc<dyn FiberFactory> = Arc::new(OsFiberFactory::new());
    run_function(factory, nthreads, f).expect("scheduler failed to run");
}
