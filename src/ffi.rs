//! C ABI records exchanged with a native driver.
//!
//! Layouts follow the vendor SDK headers: `long` is 32 bits on every target the
//! driver model ships for, so it is spelled `i32` here.

use std::ffi::c_void;
use std::ptr;

/// Driver-side boolean (`ASIOBool`).
pub type AsioBool = i32;

/// 64-bit count split into two 32-bit halves, high part first.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct AsioSamples {
    /// Upper 32 bits.
    pub hi: u32,
    /// Lower 32 bits.
    pub lo: u32,
}

/// Nanosecond timestamp split the same way as [`AsioSamples`].
pub type AsioTimeStamp = AsioSamples;

/// `AsioTimeInfo.flags`: `system_time` carries a valid value.
pub const SYSTEM_TIME_VALID: u32 = 1;
/// `AsioTimeInfo.flags`: `sample_position` carries a valid value.
pub const SAMPLE_POSITION_VALID: u32 = 1 << 1;
/// `AsioTimeInfo.flags`: `sample_rate` carries a valid value.
pub const SAMPLE_RATE_VALID: u32 = 1 << 2;
/// `AsioTimeInfo.flags`: `speed` carries a valid value.
pub const SPEED_VALID: u32 = 1 << 3;

/// Timing block the driver fills for the time-info buffer switch.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct AsioTimeInfo {
    /// Absolute speed, 1.0 is nominal.
    pub speed: f64,
    /// System time of the first sample of the ready half.
    pub system_time: AsioTimeStamp,
    /// Sample position of the first sample of the ready half.
    pub sample_position: AsioSamples,
    /// Current sample rate.
    pub sample_rate: f64,
    /// Validity flags, see the `*_VALID` constants.
    pub flags: u32,
    /// Reserved by the SDK.
    pub reserved: [i8; 12],
}

/// SMPTE time code block; reported as unsupported by this host.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AsioTimeCode {
    /// Speed relative to nominal.
    pub speed: f64,
    /// Time code position in samples.
    pub time_code_samples: AsioSamples,
    /// Time code flags.
    pub flags: u32,
    /// Reserved by the SDK.
    pub future: [i8; 64],
}

// Arrays past 32 elements have no `Default`.
impl Default for AsioTimeCode {
    fn default() -> Self {
        Self {
            speed: 0.0,
            time_code_samples: AsioSamples::default(),
            flags: 0,
            future: [0; 64],
        }
    }
}

impl Default for AsioTime {
    fn default() -> Self {
        Self {
            reserved: [0; 4],
            time_info: AsioTimeInfo::default(),
            time_code: AsioTimeCode::default(),
        }
    }
}

/// Argument of the time-info buffer switch.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct AsioTime {
    /// Reserved by the SDK.
    pub reserved: [i32; 4],
    /// Timing information.
    pub time_info: AsioTimeInfo,
    /// Time code information.
    pub time_code: AsioTimeCode,
}

/// One entry of the `createBuffers` request/response array.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct BufferInfo {
    /// Non-zero for an input channel.
    pub is_input: AsioBool,
    /// Channel index within its direction.
    pub channel_num: i32,
    /// Half-buffer pointers, written by the driver.
    pub buffers: [*mut c_void; 2],
}

impl BufferInfo {
    /// Request entry for a channel; the driver fills `buffers`.
    pub fn request(is_input: bool, channel_num: i32) -> Self {
        Self {
            is_input: is_input as AsioBool,
            channel_num,
            buffers: [ptr::null_mut(); 2],
        }
    }
}

/// Buffer switch without time info (`bufferSwitch`).
pub type BufferSwitchFn = unsafe extern "C" fn(double_buffer_index: i32, direct_process: AsioBool);
/// Sample rate change notification (`sampleRateDidChange`).
pub type SampleRateDidChangeFn = unsafe extern "C" fn(rate: f64);
/// Generic message entry point (`asioMessage`).
pub type AsioMessageFn =
    unsafe extern "C" fn(selector: i32, value: i32, message: *mut c_void, opt: *mut f64) -> i32;
/// Buffer switch with time info (`bufferSwitchTimeInfo`).
pub type BufferSwitchTimeInfoFn = unsafe extern "C" fn(
    params: *mut AsioTime,
    double_buffer_index: i32,
    direct_process: AsioBool,
) -> *mut AsioTime;

/// Callback table handed to the driver with `createBuffers`.
#[repr(C)]
#[derive(Clone, Copy)]
pub struct AsioCallbacks {
    /// v1 buffer switch.
    pub buffer_switch: BufferSwitchFn,
    /// Sample rate change.
    pub sample_rate_did_change: SampleRateDidChangeFn,
    /// Generic message.
    pub asio_message: AsioMessageFn,
    /// v2 buffer switch with time info.
    pub buffer_switch_time_info: BufferSwitchTimeInfoFn,
}

/// Message selectors passed to `asioMessage`.
pub mod selector {
    /// Is the selector in `value` supported?
    pub const SUPPORTED: i32 = 1;
    /// Which engine version does the host implement?
    pub const ENGINE_VERSION: i32 = 2;
    /// Driver requests a full reset.
    pub const RESET_REQUEST: i32 = 3;
    /// Driver proposes a new buffer size in `value`.
    pub const BUFFER_SIZE_CHANGE: i32 = 4;
    /// Driver lost samples and requests a resync.
    pub const RESYNC_REQUEST: i32 = 5;
    /// Driver latencies changed.
    pub const LATENCIES_CHANGED: i32 = 6;
    /// Does the host support the time-info buffer switch?
    pub const SUPPORTS_TIME_INFO: i32 = 7;
    /// Does the host support time code?
    pub const SUPPORTS_TIME_CODE: i32 = 8;
}
