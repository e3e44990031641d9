//! Software driver that plays every output channel back into the input with the
//! same index one period later.
//!
//! Callbacks fire either on demand through [`LoopbackDriver::fire_buffer_switch`]
//! or from a clock thread started with the stream.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use memmap2::{MmapMut, MmapOptions};
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::driver::{
    BufferSizeRange, ChannelDescriptor, Direction, DriverInfo, DriverLoader, Latencies,
    NativeDriver,
};
use crate::error::ResultCode;
use crate::ffi::{AsioCallbacks, AsioSamples, AsioTime, BufferInfo, SAMPLE_POSITION_VALID, SYSTEM_TIME_VALID};
use crate::format::SampleFormat;
use crate::time::monotonic_timestamp_ns;

/// Shape of a loopback device.
#[derive(Clone, Debug)]
pub struct LoopbackConfig {
    /// Name reported on init and used by the loader.
    pub name: String,
    /// Sample format of each input channel.
    pub inputs: Vec<SampleFormat>,
    /// Sample format of each output channel.
    pub outputs: Vec<SampleFormat>,
    /// Initial sample rate.
    pub sample_rate: f64,
    /// Rates `set_sample_rate` accepts.
    pub supported_rates: Vec<f64>,
    /// Buffer size constraints.
    pub buffer_sizes: BufferSizeRange,
    /// Reported latencies.
    pub latencies: Latencies,
    /// Deliver the time-info buffer switch instead of the v1 one.
    pub time_info: bool,
    /// Reject frame counts off the granularity grid.
    pub strict_granularity: bool,
    /// Fire callbacks from a clock thread while started.
    pub clocked: bool,
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            name: "Loopback".to_string(),
            inputs: vec![SampleFormat::Float32Lsb; 2],
            outputs: vec![SampleFormat::Float32Lsb; 2],
            sample_rate: 48_000.0,
            supported_rates: vec![44_100.0, 48_000.0, 96_000.0],
            buffer_sizes: BufferSizeRange {
                min: 64,
                max: 2048,
                preferred: 256,
                granularity: 64,
            },
            latencies: Latencies {
                input: 256,
                output: 256,
            },
            time_info: true,
            strict_granularity: false,
            clocked: false,
        }
    }
}

impl LoopbackConfig {
    fn formats(&self, direction: Direction) -> &[SampleFormat] {
        match direction {
            Direction::Input => &self.inputs,
            Direction::Output => &self.outputs,
        }
    }

    fn accepts_frames(&self, frames: i32) -> bool {
        let sizes = self.buffer_sizes;
        if frames < sizes.min || frames > sizes.max {
            return false;
        }
        if !self.strict_granularity {
            return true;
        }
        match sizes.granularity {
            -1 => frames.count_ones() == 1,
            0 => frames == sizes.preferred,
            step => (frames - sizes.min) % step == 0,
        }
    }
}

struct Channel {
    direction: Direction,
    index: u32,
    halves: [Range<usize>; 2],
}

struct Buffers {
    map: MmapMut,
    frames: i32,
    channels: Vec<Channel>,
    callbacks: &'static AsioCallbacks,
}

impl Buffers {
    /// Copy what each output played from the other half into its input twin.
    fn route(&mut self, half: usize) {
        for output in self.channels.iter().filter(|c| c.direction == Direction::Output) {
            let Some(input) = self
                .channels
                .iter()
                .find(|c| c.direction == Direction::Input && c.index == output.index)
            else {
                continue;
            };
            let src = output.halves[1 - half].clone();
            let dst = input.halves[half].clone();
            let len = src.len().min(dst.len());
            self.map.copy_within(src.start..src.start + len, dst.start);
        }
    }
}

struct Core {
    initialized: bool,
    sample_rate: f64,
    buffers: Option<Buffers>,
    fail_next_init: Option<ResultCode>,
    fail_next_create: Option<ResultCode>,
    fail_next_dispose: Option<ResultCode>,
    null_half_next: bool,
    clock: Option<JoinHandle<()>>,
}

/// In-process driver whose outputs feed its inputs.
pub struct LoopbackDriver {
    config: LoopbackConfig,
    this: Weak<LoopbackDriver>,
    core: Mutex<Core>,
    running: AtomicBool,
    position: AtomicU64,
    system_time: AtomicU64,
    outputs_ready: AtomicU64,
}

impl LoopbackDriver {
    /// Driver with the given shape.
    pub fn new(config: LoopbackConfig) -> Arc<Self> {
        let sample_rate = config.sample_rate;
        Arc::new_cyclic(|this| Self {
            config,
            this: this.clone(),
            core: Mutex::new(Core {
                initialized: false,
                sample_rate,
                buffers: None,
                fail_next_init: None,
                fail_next_create: None,
                fail_next_dispose: None,
                null_half_next: false,
                clock: None,
            }),
            running: AtomicBool::new(false),
            position: AtomicU64::new(0),
            system_time: AtomicU64::new(0),
            outputs_ready: AtomicU64::new(0),
        })
    }

    /// Shape of this driver.
    pub fn config(&self) -> &LoopbackConfig {
        &self.config
    }

    /// Whether the stream is started.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Number of `output_ready` calls received.
    pub fn output_ready_count(&self) -> u64 {
        self.outputs_ready.load(Ordering::SeqCst)
    }

    /// Make the next `init` fail with `code`.
    pub fn fail_next_init(&self, code: ResultCode) {
        self.core.lock().fail_next_init = Some(code);
    }

    /// Make the next `create_buffers` fail with `code`.
    pub fn fail_next_create_buffers(&self, code: ResultCode) {
        self.core.lock().fail_next_create = Some(code);
    }

    /// Make the next `dispose_buffers` release its buffers but report `code`.
    pub fn fail_next_dispose_buffers(&self, code: ResultCode) {
        self.core.lock().fail_next_dispose = Some(code);
    }

    /// Make the next successful `create_buffers` hand back a null second half
    /// for the last channel.
    pub fn null_half_on_next_create_buffers(&self) {
        self.core.lock().null_half_next = true;
    }

    /// Run one period for `half`: route outputs to inputs, then invoke the host's
    /// buffer switch. Fires whether or not the stream is started so late
    /// callbacks can be reproduced. Returns `false` without buffers.
    pub fn fire_buffer_switch(&self, half: i32) -> bool {
        let (callbacks, frames) = {
            let mut core = self.core.lock();
            let Some(buffers) = core.buffers.as_mut() else {
                return false;
            };
            if half == 0 || half == 1 {
                buffers.route(half as usize);
            }
            (buffers.callbacks, buffers.frames)
        };

        let position = self.position.load(Ordering::SeqCst);
        let now = monotonic_timestamp_ns();
        self.system_time.store(now, Ordering::SeqCst);
        if self.config.time_info {
            let mut time = AsioTime::default();
            time.time_info.speed = 1.0;
            time.time_info.sample_rate = self.core.lock().sample_rate;
            time.time_info.system_time = AsioSamples::from_u64(now);
            time.time_info.sample_position = AsioSamples::from_u64(position);
            time.time_info.flags = SYSTEM_TIME_VALID | SAMPLE_POSITION_VALID;
            // SAFETY: `time` outlives the call.
            unsafe { (callbacks.buffer_switch_time_info)(&mut time, half, 1) };
        } else {
            // SAFETY: plain values only.
            unsafe { (callbacks.buffer_switch)(half, 1) };
        }
        self.position.fetch_add(frames as u64, Ordering::SeqCst);
        true
    }

    /// Deliver a sample rate change notification. Returns `false` without buffers.
    pub fn fire_sample_rate_changed(&self, rate: f64) -> bool {
        let Some(callbacks) = self.callbacks() else {
            return false;
        };
        self.core.lock().sample_rate = rate;
        // SAFETY: plain values only.
        unsafe { (callbacks.sample_rate_did_change)(rate) };
        true
    }

    /// Send a host message. `None` without buffers.
    pub fn fire_message(&self, selector: i32, value: i32) -> Option<i32> {
        let callbacks = self.callbacks()?;
        // SAFETY: the host does not dereference the message pointers.
        Some(unsafe {
            (callbacks.asio_message)(selector, value, std::ptr::null_mut(), std::ptr::null_mut())
        })
    }

    /// Address of half `half` of a channel's buffer, while buffers exist.
    pub fn half_ptr(&self, index: u32, direction: Direction, half: usize) -> Option<*mut u8> {
        let mut core = self.core.lock();
        let buffers = core.buffers.as_mut()?;
        let range = buffers
            .channels
            .iter()
            .find(|c| c.index == index && c.direction == direction)?
            .halves[half & 1]
            .clone();
        Some(buffers.map[range].as_mut_ptr())
    }

    fn callbacks(&self) -> Option<&'static AsioCallbacks> {
        self.core.lock().buffers.as_ref().map(|b| b.callbacks)
    }

    fn period(&self, frames: i32, rate: f64) -> Duration {
        if rate > 0.0 {
            Duration::from_secs_f64(frames as f64 / rate)
        } else {
            Duration::from_millis(5)
        }
    }

    fn spawn_clock(&self, core: &mut Core) -> Result<(), ResultCode> {
        let Some(buffers) = core.buffers.as_ref() else {
            return Err(ResultCode::NOT_PRESENT);
        };
        let period = self.period(buffers.frames, core.sample_rate);
        let this = self.this.clone();
        let handle = thread::Builder::new()
            .name("loopback-clock".into())
            .spawn(move || {
                let mut half = 0;
                loop {
                    let Some(driver) = this.upgrade() else { break };
                    if !driver.is_running() {
                        break;
                    }
                    driver.fire_buffer_switch(half);
                    drop(driver);
                    half ^= 1;
                    thread::sleep(period);
                }
            })
            .map_err(|_| ResultCode::HW_MALFUNCTION)?;
        core.clock = Some(handle);
        Ok(())
    }

    /// Stop the clock and wait for it, unless called from the clock thread itself.
    fn halt(&self) {
        self.running.store(false, Ordering::SeqCst);
        let handle = self.core.lock().clock.take();
        if let Some(handle) = handle {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl NativeDriver for LoopbackDriver {
    fn init(&self, version: i32) -> Result<DriverInfo, ResultCode> {
        let mut core = self.core.lock();
        if let Some(code) = core.fail_next_init.take() {
            return Err(code);
        }
        core.initialized = true;
        drop(core);
        debug!(driver = %self.config.name, version, "loopback init");
        Ok(DriverInfo {
            asio_version: version,
            driver_version: 1,
            name: self.config.name.clone(),
            error_message: String::new(),
        })
    }

    fn exit(&self) {
        self.halt();
        let mut core = self.core.lock();
        core.buffers = None;
        core.initialized = false;
    }

    fn channel_counts(&self) -> Result<(i32, i32), ResultCode> {
        if !self.core.lock().initialized {
            return Err(ResultCode::NOT_PRESENT);
        }
        Ok((self.config.inputs.len() as i32, self.config.outputs.len() as i32))
    }

    fn sample_rate(&self) -> Result<f64, ResultCode> {
        let core = self.core.lock();
        if !core.initialized {
            return Err(ResultCode::NOT_PRESENT);
        }
        Ok(core.sample_rate)
    }

    fn set_sample_rate(&self, rate: f64) -> Result<(), ResultCode> {
        let mut core = self.core.lock();
        if !core.initialized {
            return Err(ResultCode::NOT_PRESENT);
        }
        if rate == 0.0 {
            return Err(ResultCode::NO_CLOCK);
        }
        if !self.can_sample_rate(rate) {
            return Err(ResultCode::INVALID_PARAMETER);
        }
        core.sample_rate = rate;
        Ok(())
    }

    fn can_sample_rate(&self, rate: f64) -> bool {
        self.config.supported_rates.iter().any(|r| *r == rate)
    }

    fn buffer_size(&self) -> Result<BufferSizeRange, ResultCode> {
        Ok(self.config.buffer_sizes)
    }

    fn latencies(&self) -> Result<Latencies, ResultCode> {
        Ok(self.config.latencies)
    }

    fn channel_info(&self, index: u32, direction: Direction) -> Result<ChannelDescriptor, ResultCode> {
        let core = self.core.lock();
        let format = *self
            .config
            .formats(direction)
            .get(index as usize)
            .ok_or(ResultCode::INVALID_PARAMETER)?;
        let active = core.buffers.as_ref().is_some_and(|b| {
            b.channels
                .iter()
                .any(|c| c.index == index && c.direction == direction)
        });
        let name = match direction {
            Direction::Input => format!("{} In {}", self.config.name, index + 1),
            Direction::Output => format!("{} Out {}", self.config.name, index + 1),
        };
        Ok(ChannelDescriptor {
            index,
            direction,
            format,
            active,
            group: 0,
            name,
        })
    }

    fn create_buffers(
        &self,
        infos: &mut [BufferInfo],
        frames: i32,
        callbacks: &'static AsioCallbacks,
    ) -> Result<(), ResultCode> {
        let mut core = self.core.lock();
        if !core.initialized || core.buffers.is_some() {
            return Err(ResultCode::INVALID_MODE);
        }
        if let Some(code) = core.fail_next_create.take() {
            return Err(code);
        }
        if !self.config.accepts_frames(frames) {
            return Err(ResultCode::INVALID_MODE);
        }
        if infos.is_empty() {
            return Err(ResultCode::INVALID_PARAMETER);
        }

        let mut channels = Vec::with_capacity(infos.len());
        let mut offset = 0;
        for info in infos.iter() {
            let direction = if info.is_input != 0 {
                Direction::Input
            } else {
                Direction::Output
            };
            let format = usize::try_from(info.channel_num)
                .ok()
                .and_then(|index| self.config.formats(direction).get(index))
                .ok_or(ResultCode::INVALID_PARAMETER)?;
            let len = frames as usize * format.byte_width().max(1);
            channels.push(Channel {
                direction,
                index: info.channel_num as u32,
                halves: [offset..offset + len, offset + len..offset + 2 * len],
            });
            offset += 2 * len;
        }

        let mut map = MmapOptions::new()
            .len(offset)
            .map_anon()
            .map_err(|_| ResultCode::NO_MEMORY)?;
        let base = map.as_mut_ptr();
        for (info, channel) in infos.iter_mut().zip(&channels) {
            // SAFETY: both ranges lie inside the mapping.
            info.buffers = channel
                .halves
                .clone()
                .map(|range| unsafe { base.add(range.start) }.cast());
        }
        if std::mem::take(&mut core.null_half_next) {
            if let Some(info) = infos.last_mut() {
                info.buffers[1] = std::ptr::null_mut();
            }
        }
        trace!(channels = channels.len(), frames, bytes = offset, "loopback buffers");
        core.buffers = Some(Buffers {
            map,
            frames,
            channels,
            callbacks,
        });
        self.position.store(0, Ordering::SeqCst);
        Ok(())
    }

    fn dispose_buffers(&self) -> Result<(), ResultCode> {
        if self.core.lock().buffers.is_none() {
            return Err(ResultCode::INVALID_MODE);
        }
        self.halt();
        let mut core = self.core.lock();
        core.buffers = None;
        match core.fail_next_dispose.take() {
            Some(code) => Err(code),
            None => Ok(()),
        }
    }

    fn start(&self) -> Result<(), ResultCode> {
        let mut core = self.core.lock();
        if core.buffers.is_none() {
            return Err(ResultCode::NOT_PRESENT);
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if self.config.clocked {
            if let Err(code) = self.spawn_clock(&mut core) {
                self.running.store(false, Ordering::SeqCst);
                return Err(code);
            }
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), ResultCode> {
        self.halt();
        Ok(())
    }

    fn output_ready(&self) -> Result<(), ResultCode> {
        self.outputs_ready.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn sample_position(&self) -> Result<(u64, u64), ResultCode> {
        if self.core.lock().buffers.is_none() {
            return Err(ResultCode::NOT_PRESENT);
        }
        Ok((
            self.position.load(Ordering::SeqCst),
            self.system_time.load(Ordering::SeqCst),
        ))
    }

    fn control_panel(&self) -> Result<(), ResultCode> {
        debug!(driver = %self.config.name, "loopback has no control panel");
        Ok(())
    }
}

/// Loader over a fixed set of loopback drivers.
pub struct LoopbackLoader {
    drivers: Vec<Arc<LoopbackDriver>>,
}

impl LoopbackLoader {
    /// Loader offering one driver per config.
    pub fn new(configs: impl IntoIterator<Item = LoopbackConfig>) -> Self {
        Self {
            drivers: configs.into_iter().map(LoopbackDriver::new).collect(),
        }
    }

    /// Concrete handle of a driver, for firing callbacks.
    pub fn driver(&self, name: &str) -> Option<Arc<LoopbackDriver>> {
        self.drivers
            .iter()
            .find(|d| d.config.name == name)
            .cloned()
    }
}

impl Default for LoopbackLoader {
    fn default() -> Self {
        Self::new([LoopbackConfig::default()])
    }
}

impl DriverLoader for LoopbackLoader {
    fn driver_names(&self) -> Vec<String> {
        self.drivers.iter().map(|d| d.config.name.clone()).collect()
    }

    fn load(&self, name: &str) -> Option<Arc<dyn NativeDriver>> {
        self.driver(name).map(|d| d as Arc<dyn NativeDriver>)
    }
}
