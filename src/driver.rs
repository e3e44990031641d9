//! Native driver collaborator contract.
//!
//! A [`NativeDriver`] is the loaded vendor driver. Its methods mirror the driver
//! interface one to one and report raw [`ResultCode`]s; translating those into
//! [`Error`](crate::Error) is the job of the session and the registry.

use std::sync::Arc;

use crate::error::ResultCode;
use crate::ffi::{AsioCallbacks, BufferInfo};
use crate::format::SampleFormat;

/// Channel direction.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Direction {
    /// Capture channel.
    Input,
    /// Playback channel.
    Output,
}

impl Direction {
    /// Whether this is [`Direction::Input`].
    pub fn is_input(self) -> bool {
        self == Direction::Input
    }
}

/// Channel description as reported by the driver.
///
/// Two descriptors denote the same channel when index and direction match.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelDescriptor {
    /// Index within its direction.
    pub index: u32,
    /// Input or output.
    pub direction: Direction,
    /// Native sample encoding.
    pub format: SampleFormat,
    /// Whether the channel currently has buffers.
    pub active: bool,
    /// Channel group the channel belongs to.
    pub group: i32,
    /// Human-readable name.
    pub name: String,
}

impl ChannelDescriptor {
    /// `(index, direction)` identity of the channel.
    pub fn key(&self) -> (u32, Direction) {
        (self.index, self.direction)
    }
}

/// Result of a successful driver `init`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DriverInfo {
    /// Interface version the host requested.
    pub asio_version: i32,
    /// Driver's own version.
    pub driver_version: i32,
    /// Driver name.
    pub name: String,
    /// Driver error message, usually empty on success.
    pub error_message: String,
}

/// Buffer size constraints in frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BufferSizeRange {
    /// Smallest supported size.
    pub min: i32,
    /// Largest supported size.
    pub max: i32,
    /// Driver's preferred size.
    pub preferred: i32,
    /// Step between sizes; -1 means powers of two, 0 means only `preferred`.
    pub granularity: i32,
}

/// Input and output latencies in frames.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Latencies {
    /// Input latency.
    pub input: i32,
    /// Output latency.
    pub output: i32,
}

/// The loaded vendor driver.
///
/// `create_buffers` receives a callback table with `'static` lifetime: drivers keep
/// the table and invoke it from their own threads until `dispose_buffers`.
pub trait NativeDriver: Send + Sync + 'static {
    /// Initialize the driver for the requested interface version.
    fn init(&self, version: i32) -> Result<DriverInfo, ResultCode>;
    /// Release the driver.
    fn exit(&self);
    /// `(inputs, outputs)` channel counts.
    fn channel_counts(&self) -> Result<(i32, i32), ResultCode>;
    /// Current sample rate.
    fn sample_rate(&self) -> Result<f64, ResultCode>;
    /// Change the sample rate.
    fn set_sample_rate(&self, rate: f64) -> Result<(), ResultCode>;
    /// Whether `rate` is supported.
    fn can_sample_rate(&self, rate: f64) -> bool;
    /// Buffer size constraints.
    fn buffer_size(&self) -> Result<BufferSizeRange, ResultCode>;
    /// Current latencies.
    fn latencies(&self) -> Result<Latencies, ResultCode>;
    /// Describe one channel.
    fn channel_info(&self, index: u32, direction: Direction) -> Result<ChannelDescriptor, ResultCode>;
    /// Allocate half-buffer pairs for every entry of `infos`, writing their addresses back.
    fn create_buffers(
        &self,
        infos: &mut [BufferInfo],
        frames: i32,
        callbacks: &'static AsioCallbacks,
    ) -> Result<(), ResultCode>;
    /// Release the buffers of the last `create_buffers`.
    fn dispose_buffers(&self) -> Result<(), ResultCode>;
    /// Start streaming.
    fn start(&self) -> Result<(), ResultCode>;
    /// Stop streaming.
    fn stop(&self) -> Result<(), ResultCode>;
    /// Tell the driver the output half is ready. Best effort.
    fn output_ready(&self) -> Result<(), ResultCode>;
    /// `(sample_position, system_time_ns)` of the current half.
    fn sample_position(&self) -> Result<(u64, u64), ResultCode>;
    /// Open the driver's own configuration dialog.
    fn control_panel(&self) -> Result<(), ResultCode>;
}

/// Discovers and loads drivers by name.
pub trait DriverLoader {
    /// Names of every installed driver, in enumeration order.
    fn driver_names(&self) -> Vec<String>;
    /// Load a driver; `None` when the name is unknown or loading failed.
    fn load(&self, name: &str) -> Option<Arc<dyn NativeDriver>>;
}
