//! Process-wide sensor handle and the C-ABI instrumentation trampolines.
//!
//! The instrumentation ABI has no user-data slot, so the sensor is held
//! behind a process-wide pointer installed once at startup. Callbacks fired
//! before installation are no-ops. The engine's scheduling model is
//! single-threaded cooperative: the callbacks run synchronously inside the
//! target's execution, on the same thread that owns the driver loop.

use std::ptr;
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::coverage::sensor::TracePc;

static SENSOR: AtomicPtr<TracePc> = AtomicPtr::new(ptr::null_mut());

/// Install the process-wide sensor. Installing twice is a programmer error.
pub fn install_sensor(sensor: TracePc) {
    let fresh = Box::into_raw(Box::new(sensor));
    let prev = SENSOR.swap(fresh, Ordering::Relaxed);
    assert!(prev.is_null(), "sensor installed twice");
}

pub fn sensor_installed() -> bool {
    !SENSOR.load(Ordering::Relaxed).is_null()
}

/// Run `f` against the installed sensor. Returns `None` when no sensor is
/// installed.
pub fn with_sensor<R>(f: impl FnOnce(&mut TracePc) -> R) -> Option<R> {
    let ptr = SENSOR.load(Ordering::Relaxed);
    if ptr.is_null() {
        return None;
    }
    // Safety: the pointer came from Box::into_raw in install_sensor and is
    // never freed; the single-threaded execution model means no aliasing
    // mutable access exists while `f` runs.
    Some(f(unsafe { &mut *ptr }))
}

/// Guard-table init for one module's range of 32-bit guard slots.
///
/// # Safety
///
/// `start..stop` must be a valid, writable range of `u32` slots. Only the
/// instrumentation runtime calls this.
#[no_mangle]
pub unsafe extern "C" fn gonzo_cov_pc_guard_init(start: *mut u32, stop: *mut u32) {
    if start.is_null() || stop.is_null() || stop <= start {
        return;
    }
    // Safety: the caller hands us a valid slot range with stop >= start.
    let len = unsafe { stop.offset_from(start) } as usize;
    let slots = unsafe { std::slice::from_raw_parts_mut(start, len) };
    with_sensor(|sensor| sensor.handle_pc_guard_init(slots));
}

/// Edge entry.
///
/// # Safety
///
/// `guard` must point at a slot previously initialized by
/// [`gonzo_cov_pc_guard_init`].
#[no_mangle]
pub unsafe extern "C" fn gonzo_cov_pc_guard(guard: *mut u32) {
    if guard.is_null() {
        return;
    }
    // Safety: the caller guarantees the slot is valid.
    let id = unsafe { *guard };
    with_sensor(|sensor| sensor.handle_pc_guard(id));
}

#[no_mangle]
pub extern "C" fn gonzo_cov_pc_indir(caller: usize, callee: usize) {
    with_sensor(|sensor| sensor.handle_pc_indir(caller, callee));
}

#[no_mangle]
pub extern "C" fn gonzo_cov_trace_cmp1(pc: usize, arg1: u8, arg2: u8) {
    with_sensor(|sensor| sensor.handle_trace_cmp1(pc, arg1, arg2));
}

#[no_mangle]
pub extern "C" fn gonzo_cov_trace_cmp2(pc: usize, arg1: u16, arg2: u16) {
    with_sensor(|sensor| sensor.handle_trace_cmp2(pc, arg1, arg2));
}

#[no_mangle]
pub extern "C" fn gonzo_cov_trace_cmp4(pc: usize, arg1: u32, arg2: u32) {
    with_sensor(|sensor| sensor.handle_trace_cmp4(pc, arg1, arg2));
}

#[no_mangle]
pub extern "C" fn gonzo_cov_trace_cmp8(pc: usize, arg1: u64, arg2: u64) {
    with_sensor(|sensor| sensor.handle_trace_cmp8(pc, arg1, arg2));
}
