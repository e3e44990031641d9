use crate::ffi::AsioSamples;
use crate::time::{monotonic_timestamp_ns, reassemble, split};

#[test]
fn reassembly_recovers_boundary_values() {
    for value in [0u64, 0xFFFF_FFFF, 0x0000_0001_0000_0000, u64::MAX] {
        let (hi, lo) = split(value);
        assert_eq!(reassemble(hi, lo), value, "value {value:#x}");
    }
}

#[test]
fn high_half_comes_first() {
    assert_eq!(reassemble(1, 0), 0x1_0000_0000);
    assert_eq!(reassemble(0, 1), 1);
    let samples = AsioSamples::from_u64(0x0000_0002_0000_0003);
    assert_eq!((samples.hi, samples.lo), (2, 3));
    assert_eq!(samples.to_u64(), 0x2_0000_0003);
}

#[test]
fn monotonic_clock_never_goes_backwards() {
    let a = monotonic_timestamp_ns();
    let b = monotonic_timestamp_ns();
    assert!(b >= a);
}

#[test]
fn default_time_block_is_zeroed() {
    use crate::ffi::AsioTime;

    let time = AsioTime::default();
    assert_eq!(time.time_info.flags, 0);
    assert_eq!(time.time_info.sample_position.to_u64(), 0);
    assert_eq!(time.time_code.flags, 0);
    assert!(time.time_code.future.iter().all(|b| *b == 0));
}
