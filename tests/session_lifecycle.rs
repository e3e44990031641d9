mod common;

use std::sync::atomic::Ordering;

use asio_host::{
    AsioHostStatus, DriverState, Error, Host, LoopbackLoader, MAX_DRIVERS, StreamPhase,
    asio_host_callbacks, asio_host_stream_status, callbacks::CALLBACKS, dispatcher,
    stream_status,
};

use common::{all_channels, loader, open, serial};

#[test]
fn enumeration_and_loading() {
    let _serial = serial();
    let mut host = Host::new(loader());
    assert_eq!(
        host.driver_names(MAX_DRIVERS),
        vec!["Loopback", "Strict", "Legacy", "Clocked"]
    );
    assert_eq!(host.driver_names(2), vec!["Loopback", "Strict"]);
    assert_eq!(host.current_driver_index(), None);

    assert!(matches!(
        host.load_driver("Missing"),
        Err(Error::DeviceUnavailable)
    ));
    host.load_driver("Legacy").expect("load");
    assert_eq!(host.current_driver_name(), Some("Legacy"));
    assert_eq!(host.current_driver_index(), Some(2));

    host.load_driver("Legacy").expect("reload is a no-op");
    host.load_driver("Strict").expect("switch drivers");
    assert_eq!(host.current_driver_index(), Some(1));
    host.remove_current_driver().expect("remove");
    assert_eq!(host.current_driver_name(), None);
}

#[test]
fn open_session_pins_the_driver() {
    let _serial = serial();
    let mut host = Host::new(loader());
    let (session, _driver, _listener) = open(&mut host, "Loopback");
    assert_eq!(session.state(), DriverState::Initialized);
    assert!(dispatcher().bindings().is_some());

    assert!(matches!(
        host.load_driver("Strict"),
        Err(Error::InvalidMode(_))
    ));
    assert!(matches!(
        host.remove_current_driver(),
        Err(Error::InvalidMode(_))
    ));

    drop(session);
    assert!(dispatcher().bindings().is_none());
    host.remove_current_driver().expect("remove after session");
}

#[test]
fn dropping_a_running_session_cleans_up() {
    let _serial = serial();
    let mut host = Host::new(LoopbackLoader::default());
    let (session, driver, _listener) = open(&mut host, "Loopback");
    session.configure(&all_channels(&session), 256).expect("configure");
    session.start().expect("start");
    assert_eq!(stream_status().phase, StreamPhase::Running);

    drop(session);
    assert_eq!(stream_status().phase, StreamPhase::Idle);
    assert!(!driver.is_running());
    assert!(driver.half_ptr(0, asio_host::Direction::Input, 0).is_none());
    assert!(!driver.fire_buffer_switch(0));
}

#[test]
fn stop_from_inside_an_upcall() {
    let _serial = serial();
    let mut host = Host::new(loader());
    let (session, driver, listener) = open(&mut host, "Loopback");
    session.configure(&all_channels(&session), 256).expect("configure");
    session.start().expect("start");

    listener.stop_on_ready.store(true, Ordering::SeqCst);
    assert!(driver.fire_buffer_switch(0));
    assert_eq!(*listener.stop_result.lock(), Some(Ok(())));
    assert_eq!(session.state(), DriverState::Prepared);
    assert!(!driver.is_running());

    assert!(driver.fire_buffer_switch(1));
    assert_eq!(listener.ready().len(), 1);
    session.exit().expect("exit");
}

#[test]
fn driver_notifications_reach_the_session() {
    let _serial = serial();
    let mut host = Host::new(loader());
    let (session, driver, _listener) = open(&mut host, "Loopback");
    session.configure(&all_channels(&session), 256).expect("configure");

    assert_eq!(driver.fire_message(asio_host::ffi::selector::ENGINE_VERSION, 0), Some(2));
    assert_eq!(
        driver.fire_message(asio_host::ffi::selector::SUPPORTS_TIME_CODE, 0),
        Some(0)
    );
    assert!(driver.fire_sample_rate_changed(44_100.0));
    assert_eq!(session.sample_rate(), Ok(44_100.0));
    assert_eq!(stream_status().dropped, 0);
}

#[test]
fn c_status_export() {
    let _serial = serial();
    assert!(std::ptr::eq(asio_host_callbacks(), &CALLBACKS));
    assert!(!unsafe { asio_host_stream_status(std::ptr::null_mut()) });

    let mut host = Host::new(loader());
    let (session, _driver, _listener) = open(&mut host, "Loopback");
    session.configure(&all_channels(&session), 256).expect("configure");

    let mut status = AsioHostStatus::default();
    assert!(unsafe { asio_host_stream_status(&mut status) });
    assert_eq!(status.phase, StreamPhase::Armed as u8);
    assert_eq!(status.slot_count, 4);
}
