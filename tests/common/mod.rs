#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{Mutex, MutexGuard};

use asio_host::{
    CallContext, Direction, DirectRuntime, Host, LoopbackConfig, LoopbackDriver, LoopbackLoader,
    Session, StreamViews, Upcalls,
};

/// Every test in a binary shares the process-wide dispatcher.
static SERIAL: Mutex<()> = Mutex::new(());

pub fn serial() -> MutexGuard<'static, ()> {
    SERIAL.lock()
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Ready {
    pub timestamp: u64,
    pub position: u64,
    pub half: usize,
    pub channels: usize,
    pub first_input: f32,
}

/// Records buffer-ready calls and writes `output_value` to every output.
#[derive(Default)]
pub struct Listener {
    pub ready: Mutex<Vec<Ready>>,
    pub output_value: Mutex<f32>,
    pub stop_on_ready: AtomicBool,
    pub stop_result: Mutex<Option<asio_host::Result<()>>>,
}

impl Listener {
    pub fn ready(&self) -> Vec<Ready> {
        self.ready.lock().clone()
    }
}

impl Upcalls for Listener {
    fn on_buffer_ready(
        &self,
        _ctx: &CallContext<'_>,
        timestamp_ticks: u64,
        sample_position: u64,
        ready_half: usize,
        views: &mut StreamViews<'_>,
    ) {
        let frames = views.frames();
        let mut first_input = [0.0f32; 1];
        if let Some(input) = views.find(0, Direction::Input) {
            let _ = input.read_f32(&mut first_input);
        }
        let value = *self.output_value.lock();
        for mut view in views.iter_mut() {
            if view.descriptor().direction == Direction::Output {
                let _ = view.write_f32(&vec![value; frames]);
            }
        }
        self.ready.lock().push(Ready {
            timestamp: timestamp_ticks,
            position: sample_position,
            half: ready_half,
            channels: views.len(),
            first_input: first_input[0],
        });
        if self.stop_on_ready.swap(false, Ordering::SeqCst) {
            *self.stop_result.lock() = Some(asio_host::dispatcher().stop());
        }
    }
}

pub fn loader() -> LoopbackLoader {
    LoopbackLoader::new([
        LoopbackConfig::default(),
        LoopbackConfig {
            name: "Strict".to_string(),
            strict_granularity: true,
            ..LoopbackConfig::default()
        },
        LoopbackConfig {
            name: "Legacy".to_string(),
            time_info: false,
            ..LoopbackConfig::default()
        },
        LoopbackConfig {
            name: "Clocked".to_string(),
            clocked: true,
            ..LoopbackConfig::default()
        },
    ])
}

/// Open `name` with a fresh listener.
pub fn open(
    host: &mut Host<LoopbackLoader>,
    name: &str,
) -> (Session, Arc<LoopbackDriver>, Arc<Listener>) {
    let listener = Arc::new(Listener::default());
    let session = host
        .open_session(name, Arc::new(DirectRuntime::new()), listener.clone())
        .expect("open session");
    let driver = host.loader().driver(name).expect("loopback driver");
    (session, driver, listener)
}

/// Both inputs and both outputs.
pub fn all_channels(session: &Session) -> Vec<asio_host::ChannelDescriptor> {
    let mut channels = session.channels(Direction::Input).to_vec();
    channels.extend_from_slice(session.channels(Direction::Output));
    channels
}
