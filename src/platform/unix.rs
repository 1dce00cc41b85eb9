//! ucontext-based fibers for unix hosts.
//!
//! Each fiber owns a heap `FiberState` holding its `ucontext_t` and, for
//! created fibers, a 16-byte aligned stack from the global allocator. A
//! thread fiber starts with a zeroed context; the first `swapcontext`
//! away from it fills it in.

use std::alloc::{alloc, dealloc, handle_alloc_error, Layout};
use std::ffi::c_void;
use std::mem::{self, MaybeUninit};
use std::ptr::{self, NonNull};

use crate::fiber::{Fiber, FiberEntry};

struct FiberState {
    ctx: libc::ucontext_t,
    stack: *mut u8,
    stack_layout: Option<Layout>,
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
    let state = Box::new(FiberState {
        // populated by the first swapcontext away from this thread
        ctx: unsafe { MaybeUninit::zeroed().assume_init() },
        stack: ptr::null_mut(),
        stack_layout: None,
        entry: None,
        param: ptr::null_mut(),
    });
    fiber_of(Box::into_raw(state))
}

pub(super) unsafe fn release_current_thread(fiber: Fiber) {
    drop(Box::from_raw(state_of(fiber)));
}

extern "C" fn fiber_trampoline(lo: u32, hi: u32) {
    let addr = ((hi as u64) << 32) | (lo as u64);
    let state = addr as usize as *mut FiberState;
    unsafe {
        let entry = (*state).entry.take().expect("fiber entered twice");
        let param = (*state).param;
        let next = entry(fiber_of(state), param);
        switch_to(fiber_of(state), next);
    }
    unreachable!("completed fiber resumed");
}

pub(super) unsafe fn create(entry: FiberEntry, context: *mut c_void, stack_size: usize) -> Fiber {
    assert!(stack_size > 0, "fiber stack size must be non-zero");

    let layout = Layout::from_size_align(stack_size, 16).expect("bad stack size");
    let stack = alloc(layout);
    if stack.is_null() {
        handle_alloc_error(layout);
    }

    let state = Box::into_raw(Box::new(FiberState {
        ctx: MaybeUninit::zeroed().assume_init(),
        stack,
        stack_layout: Some(layout),
        entry: Some(entry),
        param: context,
    }));

    if libc::getcontext(&mut (*state).ctx) != 0 {
        panic!("getcontext failed");
    }
    (*state).ctx.uc_stack.ss_sp = stack as *mut c_void;
    (*state).ctx.uc_stack.ss_size = stack_size;
    (*state).ctx.uc_stack.ss_flags = 0;
    (*state).ctx.uc_link = ptr::null_mut();

    // makecontext takes int arguments; split the state pointer in two
    let addr = state as usize as u64;
    libc::makecontext(
        &mut (*state).ctx,
        mem::transmute::<extern "C" fn(u32, u32), extern "C" fn()>(fiber_trampoline),
        2,
        addr as u32,
        (addr >> 32) as u32,
    );

    fiber_of(state)
}

pub(super) unsafe fn release(fiber: Fiber) {
    let state = Box::from_raw(state_of(fiber));
    if let Some(layout) = state.stack_layout {
        dealloc(state.stack, layout);
    }
}

pub(super) unsafe fn switch_to(from: Fiber, to: Fiber) {
    let from = state_of(from);
    let to = state_of(to);
    if libc::swapcontext(&mut (*from).ctx, &(*to).ctx) != 0 {
        panic!("swapcontext failed");
    }
}
