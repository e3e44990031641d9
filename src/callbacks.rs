//! `extern "C"` entry points handed to the driver.
//!
//! The driver ABI has no user-data parameter, so every entry point forwards to
//! the process-wide [`dispatcher`].

use std::ffi::c_void;
use std::ptr;

use crate::dispatch::dispatcher;
use crate::ffi::{
    AsioBool, AsioCallbacks, AsioTime, SAMPLE_POSITION_VALID, SYSTEM_TIME_VALID,
};

/// Callback table registered with every `create_buffers` call.
pub static CALLBACKS: AsioCallbacks = AsioCallbacks {
    buffer_switch,
    sample_rate_did_change,
    asio_message,
    buffer_switch_time_info,
};

/// v1 buffer switch: no timing supplied, the dispatcher queries the driver.
///
/// # Safety
/// Called by the driver only.
pub unsafe extern "C" fn buffer_switch(double_buffer_index: i32, _direct_process: AsioBool) {
    dispatcher().buffer_switch(double_buffer_index, None);
}

/// v2 buffer switch with time info.
///
/// # Safety
/// `params` is null or points to a valid [`AsioTime`] for the duration of the call.
pub unsafe extern "C" fn buffer_switch_time_info(
    params: *mut AsioTime,
    double_buffer_index: i32,
    _direct_process: AsioBool,
) -> *mut AsioTime {
    // SAFETY: the caller guarantees `params` is null or valid.
    let timing = unsafe { params.as_ref() }.map(|time| {
        let info = &time.time_info;
        let system_time = if info.flags & SYSTEM_TIME_VALID != 0 {
            info.system_time.to_u64()
        } else {
            0
        };
        let sample_position = if info.flags & SAMPLE_POSITION_VALID != 0 {
            info.sample_position.to_u64()
        } else {
            0
        };
        (system_time, sample_position)
    });
    dispatcher().buffer_switch(double_buffer_index, timing);
    ptr::null_mut()
}

/// Sample rate change notification.
///
/// # Safety
/// Called by the driver only.
pub unsafe extern "C" fn sample_rate_did_change(rate: f64) {
    dispatcher().sample_rate_changed(rate);
}

/// Generic driver message.
///
/// # Safety
/// Called by the driver only; `message` and `opt` are not dereferenced.
pub unsafe extern "C" fn asio_message(
    selector: i32,
    value: i32,
    _message: *mut c_void,
    _opt: *mut f64,
) -> i32 {
    dispatcher().message(selector, value)
}
