use std::sync::Arc;

use parking_lot::Mutex;

use super::{CountingRuntime, local_dispatcher, recorder};
use crate::attach::CallContext;
use crate::dispatch::{StreamPhase, Upcalls};
use crate::driver::{ChannelDescriptor, Direction, NativeDriver};
use crate::error::{Error, Result, ResultCode};
use crate::format::SampleFormat;
use crate::loopback::{LoopbackConfig, LoopbackDriver};
use crate::registry::StreamViews;
use crate::session::{DriverState, Session};

fn open(config: LoopbackConfig) -> (Session, Arc<LoopbackDriver>) {
    let driver = LoopbackDriver::new(config);
    let session = Session::init_on(
        local_dispatcher(),
        driver.clone(),
        Arc::new(CountingRuntime::default()),
        recorder(),
    )
    .expect("init");
    (session, driver)
}

fn stereo_pair(session: &Session) -> Vec<ChannelDescriptor> {
    let mut channels = session.channels(Direction::Input).to_vec();
    channels.extend_from_slice(session.channels(Direction::Output));
    channels
}

#[test]
fn init_reports_driver_and_channels() {
    let (session, _driver) = open(LoopbackConfig::default());
    assert_eq!(session.state(), DriverState::Initialized);
    assert_eq!(session.info().name, "Loopback");
    assert_eq!(session.info().asio_version, 2);
    assert_eq!(session.channel_count(Direction::Input), Ok(2));
    assert_eq!(session.channel_count(Direction::Output), Ok(2));
    assert_eq!(session.channels(Direction::Output)[1].name, "Loopback Out 2");
    assert!(session.channels(Direction::Input).iter().all(|c| !c.active));
}

#[test]
fn lifecycle_ladder() {
    let (session, driver) = open(LoopbackConfig::default());
    let channels = stereo_pair(&session);

    assert!(matches!(session.start(), Err(Error::InvalidMode(_))));
    assert!(matches!(session.dispose_buffers(), Err(Error::InvalidMode(_))));

    session.configure(&channels, 256).expect("configure");
    assert_eq!(session.state(), DriverState::Prepared);
    assert_eq!(session.slots().len(), 4);
    assert!(session.channel_info(0, Direction::Input).expect("info").active);
    assert_eq!(session.configure(&channels, 256), Err(Error::AlreadyConfigured));
    assert!(matches!(session.stop(), Err(Error::InvalidMode(_))));

    session.start().expect("start");
    assert_eq!(session.state(), DriverState::Running);
    assert!(driver.is_running());
    assert!(matches!(session.dispose_buffers(), Err(Error::InvalidMode(_))));

    session.stop().expect("stop");
    assert_eq!(session.state(), DriverState::Prepared);
    session.dispose_buffers().expect("dispose");
    assert_eq!(session.state(), DriverState::Initialized);
    assert!(session.slots().is_empty());

    session.exit().expect("exit");
}

#[test]
fn return_to_state_walks_down() {
    let (mut session, driver) = open(LoopbackConfig::default());
    session.configure(&stereo_pair(&session), 128).expect("configure");
    session.start().expect("start");

    session
        .return_to_state(DriverState::Running)
        .expect("no-op at same state");
    assert_eq!(session.state(), DriverState::Running);

    session
        .return_to_state(DriverState::Initialized)
        .expect("down to initialized");
    assert_eq!(session.state(), DriverState::Initialized);
    assert!(!driver.is_running());

    session.return_to_state(DriverState::Loaded).expect("down to loaded");
    assert_eq!(session.state(), DriverState::Loaded);
    assert!(matches!(session.sample_rate(), Err(Error::InvalidMode(_))));
}

#[test]
fn channel_index_out_of_range() {
    let (session, _driver) = open(LoopbackConfig::default());
    assert!(matches!(
        session.channel_info(2, Direction::Output),
        Err(Error::InvalidArgument(_))
    ));
    let mut channels = stereo_pair(&session);
    channels[0].index = 7;
    assert!(matches!(
        session.configure(&channels, 256),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(session.state(), DriverState::Initialized);
}

#[test]
fn sample_rate_control() {
    let (session, _driver) = open(LoopbackConfig::default());
    assert_eq!(session.sample_rate(), Ok(48_000.0));
    assert_eq!(session.can_sample_rate(96_000.0), Ok(true));
    assert_eq!(session.can_sample_rate(22_050.0), Ok(false));

    session.set_sample_rate(96_000.0).expect("set rate");
    assert_eq!(session.sample_rate(), Ok(96_000.0));

    assert_eq!(session.set_sample_rate(0.0), Err(Error::ClockUnavailable));
    assert!(matches!(
        session.set_sample_rate(-1.0),
        Err(Error::InvalidArgument(_))
    ));
    assert!(matches!(
        session.set_sample_rate(f64::NAN),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(
        session.set_sample_rate(22_050.0),
        Err(Error::UnknownDriverError(ResultCode::INVALID_PARAMETER))
    );
}

#[test]
fn preferred_size_and_driver_queries() {
    let (session, _driver) = open(LoopbackConfig::default());
    let range = session.buffer_size_range().expect("range");
    assert_eq!((range.min, range.max, range.preferred, range.granularity), (64, 2048, 256, 64));
    let latencies = session.latencies().expect("latencies");
    assert_eq!((latencies.input, latencies.output), (256, 256));
    session.control_panel().expect("control panel");

    let frames = session
        .configure_preferred(&stereo_pair(&session))
        .expect("configure");
    assert_eq!(frames, 256);
    assert!(session.slots().iter().all(|slot| slot.byte_len == 256 * 4));
}

#[test]
fn frame_count_reaches_the_driver_unmodified() {
    let (session, _driver) = open(LoopbackConfig::default());
    session.configure(&stereo_pair(&session), 100).expect("off-grid size");
    assert!(session.slots().iter().all(|slot| slot.byte_len == 400));
    session.dispose_buffers().expect("dispose");

    let (strict, _driver) = open(LoopbackConfig {
        strict_granularity: true,
        ..LoopbackConfig::default()
    });
    assert_eq!(
        strict.configure(&stereo_pair(&strict), 100),
        Err(Error::UnsupportedBufferSize(100))
    );
    assert_eq!(strict.state(), DriverState::Initialized);
}

#[test]
fn second_session_on_same_dispatcher_is_rejected() {
    let dispatcher = local_dispatcher();
    let first = Session::init_on(
        dispatcher,
        LoopbackDriver::new(LoopbackConfig::default()),
        Arc::new(CountingRuntime::default()),
        recorder(),
    )
    .expect("first");
    let second = Session::init_on(
        dispatcher,
        LoopbackDriver::new(LoopbackConfig::default()),
        Arc::new(CountingRuntime::default()),
        recorder(),
    );
    assert!(matches!(second, Err(Error::AlreadyConfigured)));
    drop(first);
    assert!(dispatcher.bindings().is_none());
}

#[test]
fn failed_buffer_creation_keeps_session_initialized() {
    let (session, driver) = open(LoopbackConfig::default());
    driver.fail_next_create_buffers(ResultCode::HW_MALFUNCTION);
    assert_eq!(
        session.configure(&stereo_pair(&session), 256),
        Err(Error::HardwareFault)
    );
    assert_eq!(session.state(), DriverState::Initialized);
    session.configure(&stereo_pair(&session), 256).expect("retry");
}

#[test]
fn configure_rejects_a_format_the_driver_does_not_report() {
    let (session, driver) = open(LoopbackConfig {
        outputs: vec![SampleFormat::Float32Lsb],
        ..LoopbackConfig::default()
    });
    let mut output = session.channels(Direction::Output)[0].clone();
    output.format = SampleFormat::Float64Lsb;
    assert!(matches!(
        session.configure(&[output], 2048),
        Err(Error::InvalidArgument(_))
    ));
    assert_eq!(session.state(), DriverState::Initialized);
    assert!(driver.half_ptr(0, Direction::Output, 0).is_none());
}

#[test]
fn dispose_failure_still_releases_the_stream() {
    let (session, driver) = open(LoopbackConfig::default());
    session.configure(&stereo_pair(&session), 256).expect("configure");
    driver.fail_next_dispose_buffers(ResultCode::HW_MALFUNCTION);
    assert_eq!(session.dispose_buffers(), Err(Error::HardwareFault));
    assert_eq!(session.state(), DriverState::Initialized);
    assert!(session.slots().is_empty());
    session.configure(&stereo_pair(&session), 256).expect("configure again");
}

#[test]
fn failed_init_leaves_the_dispatcher_unbound() {
    let dispatcher = local_dispatcher();
    let driver = LoopbackDriver::new(LoopbackConfig::default());
    driver.fail_next_init(ResultCode::HW_MALFUNCTION);
    let failed = Session::init_on(
        dispatcher,
        driver.clone(),
        Arc::new(CountingRuntime::default()),
        recorder(),
    );
    assert!(matches!(failed, Err(Error::HardwareFault)));
    assert!(dispatcher.bindings().is_none());

    let session = Session::init_on(
        dispatcher,
        driver,
        Arc::new(CountingRuntime::default()),
        recorder(),
    )
    .expect("init after failure");
    assert_eq!(session.state(), DriverState::Initialized);
}

/// Exits its own session from inside the buffer-ready upcall.
#[derive(Default)]
struct ExitFromUpcall {
    session: Mutex<Option<Session>>,
    result: Mutex<Option<Result<()>>>,
}

impl Upcalls for ExitFromUpcall {
    fn on_buffer_ready(
        &self,
        _ctx: &CallContext<'_>,
        _timestamp_ticks: u64,
        _sample_position: u64,
        _ready_half: usize,
        _views: &mut StreamViews<'_>,
    ) {
        let session = self.session.lock().take();
        if let Some(session) = session {
            *self.result.lock() = Some(session.exit());
        }
    }
}

#[test]
fn exit_refused_inside_an_upcall_keeps_the_driver() {
    let dispatcher = local_dispatcher();
    let driver = LoopbackDriver::new(LoopbackConfig::default());
    let upcalls = Arc::new(ExitFromUpcall::default());
    let session = Session::init_on(
        dispatcher,
        driver.clone(),
        Arc::new(CountingRuntime::default()),
        upcalls.clone(),
    )
    .expect("init");
    session.configure(&stereo_pair(&session), 256).expect("configure");
    session.start().expect("start");
    *upcalls.session.lock() = Some(session);

    assert!(dispatcher.buffer_switch(0, Some((0, 0))));
    assert!(matches!(
        *upcalls.result.lock(),
        Some(Err(Error::InvalidMode(_)))
    ));
    assert_eq!(dispatcher.phase(), StreamPhase::Running);
    assert!(dispatcher.bindings().is_some());
    assert!(driver.is_running());
    assert!(driver.half_ptr(0, Direction::Output, 0).is_some());

    dispatcher.teardown().expect("teardown");
    dispatcher.unbind_session().expect("unbind");
    driver.exit();
}
