//! Default host-OS fiber backend.
//!
//! Each platform module exposes the same five free functions; this module
//! wraps them in [`OsFiberFactory`], the [`FiberFactory`] used unless the
//! caller brings their own.

use std::ffi::c_void;

use crate::fiber::{Fiber, FiberEntry, FiberFactory};

#[cfg(unix)]
mod unix;
#[cfg(unix)]
use self::unix as imp;

#[cfg(windows)]
mod windows;
#[cfg(windows)]
use self::windows as imp;

#[cfg(not(any(unix, windows)))]
compile_error!("no fiber backend for this platform; provide a FiberFactory");

/// [`FiberFactory`] backed by the host OS.
///
/// On unix this wraps `ucontext` contexts over heap-allocated stacks; on
/// Windows it wraps the Win32 fiber API.
#[derive(Debug, Default)]
pub struct OsFiberFactory {
    _priv: (),
}

impl OsFiberFactory {
    /// Creates the host-OS fiber factory.
    pub fn new() -> Self {
        OsFiberFactory { _priv: () }
    }
}

unsafe impl FiberFactory for OsFiberFactory {
    fn from_current_thread(&self) -> Fiber {
        imp::from_current_thread()
    }

    unsafe fn release_current_thread(&self, fiber: Fiber) {
        imp::release_current_thread(fiber)
    }

    unsafe fn create(&self, entry: FiberEntry, context: *mut c_void, stack_size: usize) -> Fiber {
        imp::create(entry, context, stack_size)
    }

    unsafe fn release(&self, fiber: Fiber) {
        imp::release(fiber)
    }

    unsafe fn switch_to(&self, from: Fiber, to: Fiber) {
        imp::switch_to(from, to)
    }
}
