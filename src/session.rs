//! Driver session: one initialized driver bound to the dispatcher.

use std::sync::Arc;

use tracing::{info, warn};

use crate::attach::ManagedRuntime;
use crate::dispatch::{Bindings, Dispatcher, StreamPhase, Upcalls, dispatcher};
use crate::driver::{BufferSizeRange, ChannelDescriptor, Direction, DriverInfo, Latencies, NativeDriver};
use crate::error::{Error, Result};
use crate::registry::SlotInfo;

/// Interface version requested from drivers.
pub const HOST_ASIO_VERSION: i32 = 2;

/// Driver lifecycle, ordered from least to most set up.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum DriverState {
    /// Loaded but not initialized.
    Loaded,
    /// Initialized, no buffers.
    Initialized,
    /// Buffers created.
    Prepared,
    /// Streaming.
    Running,
}

/// The live driver session. At most one exists per process.
///
/// Dropping the session stops the stream, releases buffers and exits the driver.
pub struct Session {
    bindings: Arc<Bindings>,
    dispatcher: &'static Dispatcher,
    info: DriverInfo,
    inputs: Vec<ChannelDescriptor>,
    outputs: Vec<ChannelDescriptor>,
    initialized: bool,
}

impl Session {
    /// Initialize `driver` and bind it to the process-wide dispatcher.
    pub fn init(
        driver: Arc<dyn NativeDriver>,
        runtime: Arc<dyn ManagedRuntime>,
        upcalls: Arc<dyn Upcalls>,
    ) -> Result<Self> {
        Self::init_on(dispatcher(), driver, runtime, upcalls)
    }

    /// Initialize `driver` and bind it to `dispatcher`.
    pub fn init_on(
        dispatcher: &'static Dispatcher,
        driver: Arc<dyn NativeDriver>,
        runtime: Arc<dyn ManagedRuntime>,
        upcalls: Arc<dyn Upcalls>,
    ) -> Result<Self> {
        let bindings = Arc::new(Bindings::new(driver, runtime, upcalls));
        dispatcher.bind_session(bindings.clone())?;

        let driver = &bindings.driver;
        let info = match driver.init(HOST_ASIO_VERSION) {
            Ok(info) => info,
            Err(code) => {
                warn!(%code, "driver init failed");
                unbind_after_failed_init(dispatcher);
                return Err(Error::from_code(code));
            }
        };

        let channels = query_channels(&**driver);
        let (inputs, outputs) = match channels {
            Ok(channels) => channels,
            Err(err) => {
                warn!(%err, "failed to query channels");
                driver.exit();
                unbind_after_failed_init(dispatcher);
                return Err(err);
            }
        };

        info!(
            driver = %info.name,
            version = info.driver_version,
            inputs = inputs.len(),
            outputs = outputs.len(),
            "driver initialized"
        );
        Ok(Self {
            bindings,
            dispatcher,
            info,
            inputs,
            outputs,
            initialized: true,
        })
    }

    /// What the driver reported on init.
    pub fn info(&self) -> &DriverInfo {
        &self.info
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DriverState {
        if !self.initialized {
            return DriverState::Loaded;
        }
        match self.dispatcher.phase() {
            StreamPhase::Idle => DriverState::Initialized,
            StreamPhase::Armed => DriverState::Prepared,
            StreamPhase::Running => DriverState::Running,
        }
    }

    fn driver(&self) -> Result<&dyn NativeDriver> {
        if self.initialized {
            Ok(&*self.bindings.driver)
        } else {
            Err(Error::InvalidMode("driver not initialized"))
        }
    }

    fn require(&self, state: DriverState, what: &'static str) -> Result<()> {
        if self.state() == state { Ok(()) } else { Err(Error::InvalidMode(what)) }
    }

    /// Number of channels in `direction`, as reported by the driver now.
    pub fn channel_count(&self, direction: Direction) -> Result<usize> {
        let (inputs, outputs) = self.driver()?.channel_counts()?;
        let count = match direction {
            Direction::Input => inputs,
            Direction::Output => outputs,
        };
        Ok(count.max(0) as usize)
    }

    /// Channel descriptors cached at init.
    pub fn channels(&self, direction: Direction) -> &[ChannelDescriptor] {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    /// Query one channel from the driver.
    pub fn channel_info(&self, index: u32, direction: Direction) -> Result<ChannelDescriptor> {
        let driver = self.driver()?;
        let count = self.channels(direction).len();
        if index as usize >= count {
            return Err(Error::InvalidArgument(format!(
                "{direction:?} channel index {index} out of range 0..{count}"
            )));
        }
        Ok(driver.channel_info(index, direction)?)
    }

    /// Current sample rate.
    pub fn sample_rate(&self) -> Result<f64> {
        Ok(self.driver()?.sample_rate()?)
    }

    /// Change the sample rate; 0 selects the external clock.
    pub fn set_sample_rate(&self, rate: f64) -> Result<()> {
        if !rate.is_finite() || rate < 0.0 {
            return Err(Error::InvalidArgument(format!("invalid sample rate {rate}")));
        }
        self.driver()?.set_sample_rate(rate)?;
        info!(rate, "sample rate set");
        Ok(())
    }

    /// Whether the driver supports `rate`.
    pub fn can_sample_rate(&self, rate: f64) -> Result<bool> {
        Ok(self.driver()?.can_sample_rate(rate))
    }

    /// Buffer size constraints.
    pub fn buffer_size_range(&self) -> Result<BufferSizeRange> {
        Ok(self.driver()?.buffer_size()?)
    }

    /// Current input and output latencies.
    pub fn latencies(&self) -> Result<Latencies> {
        Ok(self.driver()?.latencies()?)
    }

    /// Open the driver's configuration dialog.
    pub fn control_panel(&self) -> Result<()> {
        Ok(self.driver()?.control_panel()?)
    }

    /// Create buffers for `channels` at `frames` per half.
    ///
    /// The frame count goes to the driver unmodified.
    pub fn configure(&self, channels: &[ChannelDescriptor], frames: i32) -> Result<()> {
        self.driver()?;
        if self.state() > DriverState::Initialized {
            return Err(Error::AlreadyConfigured);
        }
        for channel in channels {
            let count = self.channels(channel.direction).len();
            if channel.index as usize >= count {
                return Err(Error::InvalidArgument(format!(
                    "{:?} channel index {} out of range 0..{count}",
                    channel.direction, channel.index
                )));
            }
        }
        self.dispatcher.configure(channels, frames)
    }

    /// Create buffers at the driver's preferred size; returns that size.
    pub fn configure_preferred(&self, channels: &[ChannelDescriptor]) -> Result<i32> {
        let frames = self.buffer_size_range()?.preferred;
        self.configure(channels, frames)?;
        Ok(frames)
    }

    /// Layout of the configured slots.
    pub fn slots(&self) -> Vec<SlotInfo> {
        self.dispatcher.layout()
    }

    /// Release buffers. Only valid while prepared and not running.
    pub fn dispose_buffers(&self) -> Result<()> {
        self.require(DriverState::Prepared, "buffers not created or stream running")?;
        self.dispatcher.teardown()
    }

    /// Start streaming.
    pub fn start(&self) -> Result<()> {
        self.require(DriverState::Prepared, "buffers must be created and stream stopped")?;
        self.dispatcher.start()
    }

    /// Stop streaming.
    pub fn stop(&self) -> Result<()> {
        self.require(DriverState::Running, "stream not running")?;
        self.dispatcher.stop()
    }

    /// Walk down the lifecycle to `target`. No effect when `target` is not below
    /// the current state.
    pub fn return_to_state(&mut self, target: DriverState) -> Result<()> {
        if self.state() == DriverState::Running && target < DriverState::Running {
            self.stop()?;
        }
        if self.state() == DriverState::Prepared && target < DriverState::Prepared {
            self.dispose_buffers()?;
        }
        if self.state() == DriverState::Initialized && target < DriverState::Initialized {
            self.shutdown()?;
        }
        Ok(())
    }

    /// Stop, release buffers and exit the driver.
    pub fn exit(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if !self.initialized {
            return Ok(());
        }
        let released = self.dispatcher.teardown();
        if self.dispatcher.phase() != StreamPhase::Idle {
            // Teardown was refused; the stream still uses the driver.
            return released;
        }
        self.bindings.driver.exit();
        self.initialized = false;
        let unbound = self.dispatcher.unbind_session();
        info!(driver = %self.info.name, "driver exited");
        released.and(unbound)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            warn!(%err, "session shutdown reported an error");
        }
    }
}

fn unbind_after_failed_init(dispatcher: &Dispatcher) {
    if let Err(err) = dispatcher.unbind_session() {
        warn!(%err, "failed to unbind after init failure");
    }
}

fn query_channels(
    driver: &dyn NativeDriver,
) -> Result<(Vec<ChannelDescriptor>, Vec<ChannelDescriptor>)> {
    let (inputs, outputs) = driver.channel_counts()?;
    let collect = |count: i32, direction: Direction| -> Result<Vec<ChannelDescriptor>> {
        (0..count.max(0) as u32)
            .map(|index| driver.channel_info(index, direction).map_err(Error::from_code))
            .collect()
    };
    Ok((
        collect(inputs, Direction::Input)?,
        collect(outputs, Direction::Output)?,
    ))
}
