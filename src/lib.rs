#![deny(missing_docs)]

//! Bridge between a managed runtime and a low-latency audio driver.
//!
//! A [`Session`] initializes one [`NativeDriver`] and binds it to the process-wide
//! [`Dispatcher`]. Configuring the session negotiates half-buffer pairs into the
//! [`BufferRegistry`](registry::BufferRegistry); once started, every driver buffer
//! switch enters through the `extern "C"` table in [`callbacks`], binds its thread
//! to the [`ManagedRuntime`] and invokes the [`Upcalls`] implementation with views
//! over the ready half. Views are zero-copy when the runtime can address driver
//! memory and fall back to per-callback copies otherwise.

use std::sync::Once;

/// Binding foreign threads to the managed runtime.
pub mod attach;
/// `extern "C"` driver callbacks.
pub mod callbacks;
/// Developer-facing control and TUI support.
pub mod control;
/// Callback dispatch and the upcall contract.
pub mod dispatch;
/// Native driver collaborator contract.
pub mod driver;
/// Error taxonomy.
pub mod error;
/// Driver ABI records.
pub mod ffi;
/// Sample encodings and conversions.
pub mod format;
/// In-process loopback driver.
pub mod loopback;
/// Buffer registry and channel views.
pub mod registry;
/// Driver session and per-session control surface.
pub mod session;
/// 64-bit counter reassembly and clocks.
pub mod time;

#[cfg(test)]
mod tests;

pub use attach::{
    BufferAccess, CallContext, DirectRuntime, ManagedRuntime, ThreadRole, with_managed_context,
};
pub use control::api::{Host, MAX_DRIVERS, stream_status};
pub use dispatch::{Dispatcher, StreamPhase, StreamStatus, Upcalls, dispatcher};
pub use driver::{
    BufferSizeRange, ChannelDescriptor, Direction, DriverInfo, DriverLoader, Latencies,
    NativeDriver,
};
pub use error::{Error, Result, ResultCode};
pub use format::SampleFormat;
pub use loopback::{LoopbackConfig, LoopbackDriver, LoopbackLoader};
pub use registry::{ChannelView, Samples, SlotInfo, StreamViews};
pub use session::{DriverState, Session};

static TRACING_INIT: Once = Once::new();

/// Install the fmt subscriber once. An embedding application's subscriber wins.
pub fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt::try_init();
    });
}

/// Stream status in C layout.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct AsioHostStatus {
    /// 0 idle, 1 armed, 2 running.
    pub phase: u8,
    /// Half handed to the last delivered upcall.
    pub ready_half: u32,
    /// Configured slots.
    pub slot_count: u32,
    /// Delivered buffer-ready upcalls.
    pub delivered: u64,
    /// Ignored buffer-ready callbacks.
    pub ignored: u64,
    /// Dropped callbacks and notifications.
    pub dropped: u64,
    /// Sample position of the last delivered upcall.
    pub last_sample_position: u64,
    /// Timestamp of the last delivered upcall.
    pub last_timestamp: u64,
}

impl From<StreamStatus> for AsioHostStatus {
    fn from(status: StreamStatus) -> Self {
        Self {
            phase: status.phase as u8,
            ready_half: status.ready_half,
            slot_count: status.slot_count as u32,
            delivered: status.delivered,
            ignored: status.ignored,
            dropped: status.dropped,
            last_sample_position: status.last_sample_position,
            last_timestamp: status.last_timestamp,
        }
    }
}

/// Install the tracing subscriber from a foreign host.
#[unsafe(no_mangle)]
pub extern "C" fn asio_host_init_tracing() {
    init_tracing();
}

/// Callback table for native shims that call the vendor `createBuffers` themselves.
#[unsafe(no_mangle)]
pub extern "C" fn asio_host_callbacks() -> *const ffi::AsioCallbacks {
    &callbacks::CALLBACKS
}

/// Copy the current stream status into `out`. Returns `false` for a null pointer.
///
/// # Safety
/// `out` must be null or valid for writes.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn asio_host_stream_status(out: *mut AsioHostStatus) -> bool {
    if out.is_null() {
        return false;
    }
    unsafe {
        out.write(stream_status().into());
    }
    true
}
