use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::attach::{AttachError, Attachment, BufferAccess, CallContext, ManagedRuntime, ThreadRole};
use crate::callbacks::CALLBACKS;
use crate::dispatch::{Dispatcher, Upcalls};
use crate::registry::StreamViews;

mod format_table;
mod session_surface;
mod timing;

/// A dispatcher private to one test, so unit tests never share the global one.
fn local_dispatcher() -> &'static Dispatcher {
    Box::leak(Box::new(Dispatcher::new(&CALLBACKS)))
}

/// Runtime that counts attach/detach calls and can refuse to attach.
#[derive(Default)]
struct CountingRuntime {
    access: Mutex<BufferAccess>,
    refuse: std::sync::atomic::AtomicBool,
    attached: AtomicUsize,
    detached: AtomicUsize,
    depth: AtomicI32,
}

impl CountingRuntime {
    fn with_access(access: BufferAccess) -> Self {
        let runtime = Self::default();
        *runtime.access.lock() = access;
        runtime
    }
}

impl ManagedRuntime for CountingRuntime {
    fn attach_current_thread(&self, _role: ThreadRole) -> Result<Attachment, AttachError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(AttachError(-1));
        }
        if self.depth.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(Attachment::AlreadyAttached);
        }
        self.attached.fetch_add(1, Ordering::SeqCst);
        Ok(Attachment::Attached)
    }

    fn detach_current_thread(&self) {
        self.depth.store(0, Ordering::SeqCst);
        self.detached.fetch_add(1, Ordering::SeqCst);
    }

    fn buffer_access(&self) -> BufferAccess {
        *self.access.lock()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Event {
    Ready { timestamp: u64, position: u64, half: usize, channels: usize },
    Rate(f64),
    Reset,
    Resync,
    BufferSize(i32),
    Latencies(i32, i32),
}

/// Upcalls that record every event and write a constant to every output.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<Event>>,
    output_value: Mutex<f32>,
    role: Mutex<Option<ThreadRole>>,
}

impl Recorder {
    fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    fn ready_count(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Ready { .. }))
            .count()
    }
}

impl Upcalls for Recorder {
    fn on_buffer_ready(
        &self,
        ctx: &CallContext<'_>,
        timestamp_ticks: u64,
        sample_position: u64,
        ready_half: usize,
        views: &mut StreamViews<'_>,
    ) {
        *self.role.lock() = Some(ctx.role());
        let value = *self.output_value.lock();
        let frames = views.frames();
        for mut view in views.iter_mut() {
            if view.descriptor().direction == crate::driver::Direction::Output {
                let _ = view.write_f32(&vec![value; frames]);
            }
        }
        self.events.lock().push(Event::Ready {
            timestamp: timestamp_ticks,
            position: sample_position,
            half: ready_half,
            channels: views.len(),
        });
    }

    fn on_sample_rate_changed(&self, _ctx: &CallContext<'_>, rate: f64) {
        self.events.lock().push(Event::Rate(rate));
    }

    fn on_reset_requested(&self, _ctx: &CallContext<'_>) {
        self.events.lock().push(Event::Reset);
    }

    fn on_resync_requested(&self, _ctx: &CallContext<'_>) {
        self.events.lock().push(Event::Resync);
    }

    fn on_buffer_size_change_requested(&self, _ctx: &CallContext<'_>, frames: i32) {
        self.events.lock().push(Event::BufferSize(frames));
    }

    fn on_latencies_changed(&self, _ctx: &CallContext<'_>, input: i32, output: i32) {
        self.events.lock().push(Event::Latencies(input, output));
    }
}

fn recorder() -> Arc<Recorder> {
    Arc::new(Recorder::default())
}
