use std::env;
use std::f64::consts::TAU;
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::info;

use asio_host::{
    CallContext, Direction, DirectRuntime, Host, LoopbackConfig, LoopbackLoader, MAX_DRIVERS,
    SampleFormat, Session, StreamViews, Upcalls,
};

const SINE_HZ: f64 = 440.0;
const SCRATCH_FRAMES: usize = 8192;

/// Writes a sine to the first two output channels.
struct SineHost {
    sample_index: AtomicU64,
    rate_bits: AtomicU64,
    scratch: Mutex<Vec<f32>>,
}

impl SineHost {
    fn new(sample_rate: f64) -> Self {
        Self {
            sample_index: AtomicU64::new(0),
            rate_bits: AtomicU64::new(sample_rate.to_bits()),
            scratch: Mutex::new(vec![0.0; SCRATCH_FRAMES]),
        }
    }
}

impl Upcalls for SineHost {
    fn on_buffer_ready(
        &self,
        _ctx: &CallContext<'_>,
        _timestamp_ticks: u64,
        _sample_position: u64,
        _ready_half: usize,
        views: &mut StreamViews<'_>,
    ) {
        let Some(mut scratch) = self.scratch.try_lock() else {
            return;
        };
        let frames = views.frames().min(scratch.len());
        let rate = f64::from_bits(self.rate_bits.load(Ordering::Relaxed));
        let start = self.sample_index.fetch_add(frames as u64, Ordering::Relaxed);
        for (i, sample) in scratch[..frames].iter_mut().enumerate() {
            let t = (start + i as u64) as f64 / rate;
            *sample = (TAU * SINE_HZ * t).sin() as f32 * 0.5;
        }
        for mut channel in views
            .iter_mut()
            .filter(|c| c.descriptor().direction == Direction::Output)
            .take(2)
        {
            let _ = channel.write_f32(&scratch[..frames]);
        }
    }

    fn on_sample_rate_changed(&self, _ctx: &CallContext<'_>, rate: f64) {
        self.rate_bits.store(rate.to_bits(), Ordering::Relaxed);
    }
}

fn loader() -> LoopbackLoader {
    LoopbackLoader::new([
        LoopbackConfig {
            clocked: true,
            ..LoopbackConfig::default()
        },
        LoopbackConfig {
            name: "Loopback 24-bit".to_string(),
            inputs: vec![SampleFormat::Int24Lsb; 4],
            outputs: vec![SampleFormat::Int24Lsb; 4],
            time_info: false,
            strict_granularity: true,
            clocked: true,
            ..LoopbackConfig::default()
        },
    ])
}

fn open(host: &mut Host<LoopbackLoader>, name: &str) -> Session {
    let upcalls = Arc::new(SineHost::new(48_000.0));
    match host.open_session(name, Arc::new(DirectRuntime::new()), upcalls) {
        Ok(session) => session,
        Err(err) => {
            eprintln!("asioctl: cannot open '{name}': {err}");
            process::exit(1);
        }
    }
}

fn print_list(host: &Host<LoopbackLoader>) {
    for (idx, name) in host.driver_names(MAX_DRIVERS).iter().enumerate() {
        println!("  [{idx}] {name}");
    }
}

fn print_info(session: &Session) {
    let info = session.info();
    println!("Driver      : {} (version {})", info.name, info.driver_version);
    match session.sample_rate() {
        Ok(rate) => println!("Sample Rate : {rate} Hz"),
        Err(err) => println!("Sample Rate : {err}"),
    }
    if let Ok(range) = session.buffer_size_range() {
        println!(
            "Buffer Size : min={} max={} preferred={} granularity={}",
            range.min, range.max, range.preferred, range.granularity
        );
    }
    if let Ok(latencies) = session.latencies() {
        println!(
            "Latency     : in={} out={} frames",
            latencies.input, latencies.output
        );
    }
    for direction in [Direction::Input, Direction::Output] {
        println!("{direction:?} channels:");
        for channel in session.channels(direction) {
            println!(
                "  [{}] {} | {:?} | group={}",
                channel.index, channel.name, channel.format, channel.group
            );
        }
    }
}

fn prepare(session: &Session) -> i32 {
    let mut channels: Vec<_> = session.channels(Direction::Output).iter().take(2).cloned().collect();
    channels.extend(session.channels(Direction::Input).iter().take(2).cloned());
    match session.configure_preferred(&channels) {
        Ok(frames) => frames,
        Err(err) => {
            eprintln!("asioctl: cannot create buffers: {err}");
            process::exit(1);
        }
    }
}

fn play_sine(session: Session, seconds: f64) {
    let frames = prepare(&session);
    info!(frames, seconds, "playing sine");
    if let Err(err) = session.start() {
        eprintln!("asioctl: cannot start: {err}");
        process::exit(1);
    }
    std::thread::sleep(Duration::from_secs_f64(seconds));
    let status = asio_host::stream_status();
    if let Err(err) = session.exit() {
        eprintln!("asioctl: shutdown reported: {err}");
    }
    println!(
        "Delivered {} buffers ({} ignored, {} dropped), last position {}",
        status.delivered, status.ignored, status.dropped, status.last_sample_position
    );
}

fn main() {
    asio_host::init_tracing();
    let mut host = Host::new(loader());
    let mut args = env::args().skip(1);
    if let Some(arg) = args.next() {
        match arg.as_str() {
            "--list" | "-l" => {
                print_list(&host);
                return;
            }
            "--info" | "-i" => {
                let Some(name) = args.next() else {
                    eprintln!("asioctl: --info needs a driver name");
                    process::exit(1);
                };
                print_info(&open(&mut host, &name));
                return;
            }
            "--sine" => {
                let Some(name) = args.next() else {
                    eprintln!("asioctl: --sine needs a driver name");
                    process::exit(1);
                };
                let seconds = args
                    .next()
                    .map(|s| s.parse::<f64>())
                    .transpose()
                    .unwrap_or_else(|_| {
                        eprintln!("asioctl: seconds must be a number");
                        process::exit(1);
                    })
                    .unwrap_or(2.0);
                play_sine(open(&mut host, &name), seconds);
                return;
            }
            "--help" | "-h" => {
                println!(
                    "Usage: asioctl [--list | --info <driver> | --sine <driver> [seconds]]\n\nWithout arguments the monitor console launches on the first driver."
                );
                return;
            }
            other => {
                eprintln!("asioctl: unknown argument '{other}'");
                process::exit(1);
            }
        }
    }

    let Some(name) = host.driver_names(1).into_iter().next() else {
        eprintln!("asioctl: no drivers installed");
        process::exit(1);
    };
    let session = open(&mut host, &name);
    prepare(&session);
    if let Err(err) = asio_host::control::ui::run(&session) {
        eprintln!("asioctl: {err}");
        process::exit(1);
    }
}
