//! Callback dispatcher: routes driver callbacks into managed upcalls.
//!
//! The driver's callbacks carry no context pointer, so a single process-wide
//! [`Dispatcher`] holds the live session bindings and stream configuration. The
//! realtime path and the control path share the buffer registry through a phase
//! discipline instead of a lock:
//!
//! * the control thread only mutates the registry in `Idle` or `Armed`;
//! * the realtime thread only touches it in `Running`, counted by `in_flight`;
//! * leaving `Running` stores the new phase first and then waits for `in_flight`
//!   to drain, so no callback can still hold a view when slots are freed.

use std::cell::{Cell, UnsafeCell};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use once_cell::sync::Lazy;
use parking_lot::{Mutex, MutexGuard, RwLock};
use tracing::{debug, info, warn};

use crate::attach::{CallContext, ManagedRuntime, ThreadRole, with_managed_context};
use crate::callbacks::CALLBACKS;
use crate::driver::{ChannelDescriptor, NativeDriver};
use crate::error::{Error, Result};
use crate::ffi::{AsioCallbacks, selector};
use crate::registry::{BufferRegistry, SlotInfo, StreamViews};

/// Engine version reported to drivers.
pub const ENGINE_VERSION: i32 = 2;

/// Managed-side receiver of driver callbacks.
///
/// `on_buffer_ready` runs on the driver's realtime thread once per hardware
/// period. It must finish well within the period: no blocking, no allocation,
/// no waiting on runtime-wide pauses. Everything else runs on ordinary threads.
pub trait Upcalls: Send + Sync {
    /// Half `ready_half` has switched: read its inputs, write its outputs.
    fn on_buffer_ready(
        &self,
        ctx: &CallContext<'_>,
        timestamp_ticks: u64,
        sample_position: u64,
        ready_half: usize,
        views: &mut StreamViews<'_>,
    );

    /// The driver's sample rate changed.
    fn on_sample_rate_changed(&self, _ctx: &CallContext<'_>, _rate: f64) {}

    /// The driver asks for a full reset of the stream.
    fn on_reset_requested(&self, _ctx: &CallContext<'_>) {}

    /// The driver lost samples and asks for a resync.
    fn on_resync_requested(&self, _ctx: &CallContext<'_>) {}

    /// The driver proposes a new buffer size.
    fn on_buffer_size_change_requested(&self, _ctx: &CallContext<'_>, _frames: i32) {}

    /// The driver's latencies changed.
    fn on_latencies_changed(&self, _ctx: &CallContext<'_>, _input: i32, _output: i32) {}
}

/// Everything a session resolves once and the callbacks reuse for its lifetime.
pub struct Bindings {
    /// Loaded driver.
    pub driver: Arc<dyn NativeDriver>,
    /// Runtime upcalls execute in.
    pub runtime: Arc<dyn ManagedRuntime>,
    /// Upcall receiver.
    pub upcalls: Arc<dyn Upcalls>,
}

impl Bindings {
    /// Bundle the three collaborators.
    pub fn new(
        driver: Arc<dyn NativeDriver>,
        runtime: Arc<dyn ManagedRuntime>,
        upcalls: Arc<dyn Upcalls>,
    ) -> Self {
        Self {
            driver,
            runtime,
            upcalls,
        }
    }
}

/// Dispatcher phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum StreamPhase {
    /// No configuration.
    Idle = 0,
    /// Configured, not started.
    Armed = 1,
    /// Started; buffer-ready callbacks are delivered.
    Running = 2,
}

impl StreamPhase {
    fn from_u8(value: u8) -> Self {
        match value {
            2 => StreamPhase::Running,
            1 => StreamPhase::Armed,
            _ => StreamPhase::Idle,
        }
    }
}

/// Lock-free snapshot of stream activity.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StreamStatus {
    /// Current phase.
    pub phase: StreamPhase,
    /// Half handed to the last delivered upcall.
    pub ready_half: u32,
    /// Number of configured slots.
    pub slot_count: usize,
    /// Buffer-ready upcalls delivered.
    pub delivered: u64,
    /// Buffer-ready callbacks ignored because the stream was not running.
    pub ignored: u64,
    /// Callbacks dropped because the thread could not be bound or the upcall panicked.
    pub dropped: u64,
    /// Sample position of the last delivered upcall.
    pub last_sample_position: u64,
    /// Timestamp of the last delivered upcall.
    pub last_timestamp: u64,
}

#[derive(Default)]
struct Counters {
    ready_half: AtomicU32,
    slot_count: AtomicUsize,
    delivered: AtomicU64,
    ignored: AtomicU64,
    dropped: AtomicU64,
    last_sample_position: AtomicU64,
    last_timestamp: AtomicU64,
}

#[derive(Default)]
struct Stream {
    registry: BufferRegistry,
    bindings: Option<Arc<Bindings>>,
}

thread_local! {
    static IN_BUFFER_READY: Cell<bool> = const { Cell::new(false) };
}

struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct ReentryMark;

impl ReentryMark {
    fn enter() -> Self {
        IN_BUFFER_READY.with(|flag| flag.set(true));
        ReentryMark
    }
}

impl Drop for ReentryMark {
    fn drop(&mut self) {
        IN_BUFFER_READY.with(|flag| flag.set(false));
    }
}

fn in_buffer_ready() -> bool {
    IN_BUFFER_READY.with(|flag| flag.get())
}

/// Process-wide callback target.
pub struct Dispatcher {
    callbacks: &'static AsioCallbacks,
    control: Mutex<()>,
    session: RwLock<Option<Arc<Bindings>>>,
    phase: AtomicU8,
    in_flight: AtomicUsize,
    stream: UnsafeCell<Stream>,
    layout: Mutex<Vec<SlotInfo>>,
    counters: Counters,
}

// `stream` is only accessed under the phase discipline described in the module docs.
unsafe impl Sync for Dispatcher {}

static DISPATCHER: Lazy<Dispatcher> = Lazy::new(|| Dispatcher::new(&CALLBACKS));

/// The dispatcher the exported driver callbacks route to.
pub fn dispatcher() -> &'static Dispatcher {
    &DISPATCHER
}

/// Whether the host answers `selector` as supported.
pub fn selector_supported(value: i32) -> bool {
    matches!(
        value,
        selector::ENGINE_VERSION
            | selector::RESET_REQUEST
            | selector::RESYNC_REQUEST
            | selector::BUFFER_SIZE_CHANGE
            | selector::LATENCIES_CHANGED
            | selector::SUPPORTS_TIME_INFO
    )
}

impl Dispatcher {
    /// Dispatcher that hands `callbacks` to the driver on configure.
    pub fn new(callbacks: &'static AsioCallbacks) -> Self {
        Self {
            callbacks,
            control: Mutex::new(()),
            session: RwLock::new(None),
            phase: AtomicU8::new(StreamPhase::Idle as u8),
            in_flight: AtomicUsize::new(0),
            stream: UnsafeCell::new(Stream::default()),
            layout: Mutex::new(Vec::new()),
            counters: Counters::default(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> StreamPhase {
        StreamPhase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    /// Lock-free activity snapshot.
    pub fn status(&self) -> StreamStatus {
        let c = &self.counters;
        StreamStatus {
            phase: self.phase(),
            ready_half: c.ready_half.load(Ordering::Relaxed),
            slot_count: c.slot_count.load(Ordering::Relaxed),
            delivered: c.delivered.load(Ordering::Relaxed),
            ignored: c.ignored.load(Ordering::Relaxed),
            dropped: c.dropped.load(Ordering::Relaxed),
            last_sample_position: c.last_sample_position.load(Ordering::Relaxed),
            last_timestamp: c.last_timestamp.load(Ordering::Relaxed),
        }
    }

    /// Layout of the live configuration, empty when idle.
    pub fn layout(&self) -> Vec<SlotInfo> {
        self.layout.lock().clone()
    }

    /// Bindings of the live session.
    pub fn bindings(&self) -> Option<Arc<Bindings>> {
        self.session.read().clone()
    }

    fn lock_control(&self) -> Result<MutexGuard<'_, ()>> {
        if in_buffer_ready() {
            self.control
                .try_lock()
                .ok_or(Error::InvalidMode("control operation already in progress"))
        } else {
            Ok(self.control.lock())
        }
    }

    /// Make `bindings` the callback target. Fails while another session is bound.
    pub fn bind_session(&self, bindings: Arc<Bindings>) -> Result<()> {
        let _control = self.lock_control()?;
        let mut session = self.session.write();
        if session.is_some() {
            return Err(Error::AlreadyConfigured);
        }
        *session = Some(bindings);
        self.counters.delivered.store(0, Ordering::Relaxed);
        self.counters.ignored.store(0, Ordering::Relaxed);
        self.counters.dropped.store(0, Ordering::Relaxed);
        Ok(())
    }

    /// Clear the callback target. The stream must already be torn down.
    pub fn unbind_session(&self) -> Result<()> {
        let _control = self.lock_control()?;
        if self.phase() != StreamPhase::Idle {
            return Err(Error::InvalidMode("stream still configured"));
        }
        self.session.write().take();
        Ok(())
    }

    /// Negotiate buffers for `channels` with the bound driver. `Idle` to `Armed`.
    pub fn configure(&self, channels: &[ChannelDescriptor], frames: i32) -> Result<()> {
        if in_buffer_ready() {
            return Err(Error::InvalidMode("cannot configure from a buffer-ready upcall"));
        }
        let _control = self.lock_control()?;
        if self.phase() != StreamPhase::Idle {
            return Err(Error::AlreadyConfigured);
        }
        let bindings = self
            .bindings()
            .ok_or(Error::InvalidMode("no driver session"))?;
        let access = bindings.runtime.buffer_access();

        // SAFETY: Idle, the realtime path does not touch the stream.
        let stream = unsafe { &mut *self.stream.get() };
        stream
            .registry
            .configure(&*bindings.driver, channels, frames, access, self.callbacks)?;
        stream.bindings = Some(bindings);
        *self.layout.lock() = stream.registry.layout();
        self.counters
            .slot_count
            .store(stream.registry.len(), Ordering::Relaxed);
        self.phase.store(StreamPhase::Armed as u8, Ordering::SeqCst);
        info!(channels = channels.len(), frames, "stream armed");
        Ok(())
    }

    /// Start the driver. `Armed` to `Running`; no-op when already running.
    pub fn start(&self) -> Result<()> {
        let _control = self.lock_control()?;
        match self.phase() {
            StreamPhase::Idle => return Err(Error::InvalidMode("buffers not created")),
            StreamPhase::Running => return Ok(()),
            StreamPhase::Armed => {}
        }
        let bindings = self
            .bindings()
            .ok_or(Error::InvalidMode("no driver session"))?;
        // Running before the driver starts so the first period is not ignored.
        self.phase.store(StreamPhase::Running as u8, Ordering::SeqCst);
        if let Err(code) = bindings.driver.start() {
            self.phase.store(StreamPhase::Armed as u8, Ordering::SeqCst);
            self.drain();
            warn!(%code, "driver failed to start");
            return Err(Error::from_code(code));
        }
        info!("stream running");
        Ok(())
    }

    /// Stop the driver. `Running` to `Armed`; no-op otherwise.
    ///
    /// Returns after every other in-flight buffer-ready callback has finished. May
    /// be called from inside a buffer-ready upcall.
    pub fn stop(&self) -> Result<()> {
        let _control = self.lock_control()?;
        if self.phase() != StreamPhase::Running {
            return Ok(());
        }
        self.phase.store(StreamPhase::Armed as u8, Ordering::SeqCst);
        let result = match self.bindings() {
            Some(bindings) => bindings.driver.stop().map_err(Error::from_code),
            None => Ok(()),
        };
        self.drain();
        match &result {
            Ok(()) => info!("stream stopped"),
            Err(err) => warn!(%err, "driver failed to stop"),
        }
        result
    }

    /// Stop if running, then release every buffer. Back to `Idle`.
    ///
    /// Local state is released even if the driver fails to dispose; that error is
    /// returned afterwards. No-op when idle.
    pub fn teardown(&self) -> Result<()> {
        if in_buffer_ready() {
            return Err(Error::InvalidMode("cannot tear down from a buffer-ready upcall"));
        }
        let _control = self.lock_control()?;
        let phase = self.phase();
        if phase == StreamPhase::Idle {
            return Ok(());
        }
        self.phase.store(StreamPhase::Idle as u8, Ordering::SeqCst);
        self.drain();

        // SAFETY: Idle and drained, no callback holds a view.
        let stream = unsafe { &mut *self.stream.get() };
        let bindings = stream.bindings.take();
        let result = match &bindings {
            Some(bindings) => {
                if phase == StreamPhase::Running {
                    if let Err(code) = bindings.driver.stop() {
                        warn!(%code, "driver failed to stop during teardown");
                    }
                }
                stream.registry.teardown(&*bindings.driver)
            }
            None => Ok(()),
        };
        self.layout.lock().clear();
        self.counters.slot_count.store(0, Ordering::Relaxed);
        debug!(ok = result.is_ok(), "stream torn down");
        result
    }

    fn drain(&self) {
        let own = usize::from(in_buffer_ready());
        while self.in_flight.load(Ordering::SeqCst) > own {
            std::thread::yield_now();
        }
    }

    /// Realtime buffer switch.
    ///
    /// `timing` is `(system_time, sample_position)` when the driver supplied it;
    /// `None` asks the driver, falling back to zeros. Returns whether the upcall ran.
    pub fn buffer_switch(&self, half: i32, timing: Option<(u64, u64)>) -> bool {
        self.in_flight.fetch_add(1, Ordering::SeqCst);
        let _flight = InFlight(&self.in_flight);
        if self.phase.load(Ordering::SeqCst) != StreamPhase::Running as u8 || !(0..=1).contains(&half)
        {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        // SAFETY: Running and counted in flight; the control path waits for us
        // before touching the stream.
        let stream = unsafe { &mut *self.stream.get() };
        let Some(bindings) = stream.bindings.clone() else {
            self.counters.ignored.fetch_add(1, Ordering::Relaxed);
            return false;
        };
        let half = half as usize;
        let (timestamp, position) = timing.unwrap_or_else(|| {
            bindings
                .driver
                .sample_position()
                .map(|(position, time)| (time, position))
                .unwrap_or((0, 0))
        });

        let _mark = ReentryMark::enter();
        let registry = &mut stream.registry;
        let delivered = with_managed_context(&*bindings.runtime, ThreadRole::Realtime, |ctx| {
            // SAFETY: see above; the driver is done with `half` until the next switch.
            unsafe { registry.copy_in(half) };
            let mut views = unsafe { registry.views(half) };
            bindings
                .upcalls
                .on_buffer_ready(ctx, timestamp, position, half, &mut views);
            unsafe { registry.copy_out(half) };
        })
        .is_some();

        if !delivered {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        // Best effort; a failure means the next period plays stale data.
        let _ = bindings.driver.output_ready();
        let c = &self.counters;
        c.ready_half.store(half as u32, Ordering::Relaxed);
        c.last_sample_position.store(position, Ordering::Relaxed);
        c.last_timestamp.store(timestamp, Ordering::Relaxed);
        c.delivered.fetch_add(1, Ordering::Relaxed);
        true
    }

    /// Sample rate change notification.
    pub fn sample_rate_changed(&self, rate: f64) {
        self.notify("sample rate changed", |upcalls, ctx| {
            upcalls.on_sample_rate_changed(ctx, rate)
        });
    }

    /// Generic driver message. Queries are answered locally; notifications are
    /// forwarded and acknowledged.
    pub fn message(&self, kind: i32, value: i32) -> i32 {
        match kind {
            selector::SUPPORTED => i32::from(selector_supported(value)),
            selector::ENGINE_VERSION => ENGINE_VERSION,
            selector::RESET_REQUEST => {
                self.notify("reset request", |upcalls, ctx| upcalls.on_reset_requested(ctx));
                1
            }
            selector::RESYNC_REQUEST => {
                self.notify("resync request", |upcalls, ctx| upcalls.on_resync_requested(ctx));
                1
            }
            selector::BUFFER_SIZE_CHANGE => {
                self.notify("buffer size change", |upcalls, ctx| {
                    upcalls.on_buffer_size_change_requested(ctx, value)
                });
                1
            }
            selector::LATENCIES_CHANGED => {
                match self.bindings().map(|b| b.driver.latencies()) {
                    Some(Ok(latencies)) => self.notify("latencies changed", |upcalls, ctx| {
                        upcalls.on_latencies_changed(ctx, latencies.input, latencies.output)
                    }),
                    Some(Err(code)) => {
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                        warn!(%code, "latencies changed but driver query failed");
                    }
                    None => self.drop_unbound("latencies changed"),
                }
                1
            }
            selector::SUPPORTS_TIME_INFO => 1,
            selector::SUPPORTS_TIME_CODE => 0,
            _ => {
                debug!(selector = kind, value, "unhandled driver message");
                0
            }
        }
    }

    fn notify(&self, what: &'static str, call: impl FnOnce(&dyn Upcalls, &CallContext<'_>)) {
        let Some(bindings) = self.bindings() else {
            self.drop_unbound(what);
            return;
        };
        let upcalls = &*bindings.upcalls;
        if with_managed_context(&*bindings.runtime, ThreadRole::Ordinary, |ctx| {
            call(upcalls, ctx)
        })
        .is_none()
        {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(notification = what, "notification dropped, upcall could not run");
        }
    }

    fn drop_unbound(&self, what: &'static str) {
        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
        warn!(notification = what, "notification dropped, no session bound");
    }
}
