//! Win32 fiber backend.
//!
//! Wraps `ConvertThreadToFiber` / `CreateFiber` / `SwitchToFiber` /
//! `DeleteFiber`. The public handle points at a heap `FiberState` rather
//! than the raw Win32 fiber so the entry record has a stable home until
//! the first switch runs it.

use std::ffi::c_void;
use std::ptr::{self, NonNull};

use windows_sys::Win32::System::Threading::{
    ConvertFiberToThread, ConvertThreadToFiber, CreateFiber, DeleteFiber, SwitchToFiber,
};

use crate::fiber::{Fiber, FiberEntry};

struct FiberState {
    win_fiber: *mut c_void,
    entry: Option<FiberEntry>,
    param: *mut c_void,
}

fn state_of(fiber: Fiber) -> *mut FiberState {
    fiber.as_raw() as *mut FiberState
}

fn fiber_of(state: *mut FiberState) -> Fiber {
    Fiber::from_raw(NonNull::new(state as *mut c_void).expect("null fiber state"))
}

pub(super) fn from_current_thread() -> Fiber {
    let win_fiber = unsafe { ConvertThreadToFiber(ptr::null()) };
    assert!(!win_fiber.is_null(), "ConvertThreadToFiber failed");

    let state = Box::into_raw(Box::new(FiberState {
        win_fiber,
        entry: None,
        param: ptr::null_mut(),
    }));
    fiber_of(state)
}

pub(super) unsafe fn release_current_thread(fiber: Fiber) {
    let state = Box::from_raw(state_of(fiber));
    assert!(ConvertFiberToThread() != 0, "ConvertFiberToThread failed");
    drop(state);
}

unsafe extern "system" fn fiber_trampoline(param: *mut c_void) {
    let state = param as *mut FiberState;
    let entry = (*state).entry.take().expect("fiber entered twice");
    let next = entry(fiber_of(state), (*state).param);
    SwitchToFiber((*state_of(next)).win_fiber);
    unreachable!("completed fiber resumed");
}

pub(super) unsafe fn create(entry: FiberEntry, context: *mut c_void, stack_size: usize) -> Fiber {
    assert!(stack_size > 0, "fiber stack size must be non-zero");

    let state = Box::into_raw(Box::new(FiberState {
        win_fiber: ptr::null_mut(),
        entry: Some(entry),
        param: context,
    }));

    let win_fiber = CreateFiber(stack_size, Some(fiber_trampoline), state as *const c_void);
    assert!(!win_fiber.is_null(), "CreateFiber failed");
    (*state).win_fiber = win_fiber;

    fiber_of(state)
}

pub(super) unsafe fn release(fiber: Fiber) {
    let state = Box::from_raw(state_of(fiber));
    DeleteFiber(state.win_fiber);
}

pub(super) unsafe fn switch_to(_from: Fiber, to: Fiber) {
    SwitchToFiber((*state_of(to)).win_fiber);
}
