use crate::error::Error;
use crate::format::{ByteOrder, ManagedKind, SampleFormat};

const ALL_CODES: [i32; 21] = [
    0, 1, 2, 3, 4, 8, 9, 10, 11, 16, 17, 18, 19, 20, 24, 25, 26, 27, 32, 33, 40,
];

#[test]
fn every_native_code_is_recognized_and_maps_back() {
    for code in ALL_CODES {
        let format = SampleFormat::from_code(code);
        assert!(format.is_recognized(), "code {code}");
        assert_eq!(format.code(), code);
    }
    assert_eq!(SampleFormat::from_code(5), SampleFormat::Unrecognized(5));
    assert_eq!(
        SampleFormat::Unrecognized(41).ensure_recognized(),
        Err(Error::UnsupportedFormat(41))
    );
}

#[test]
fn widths_and_byte_orders() {
    use SampleFormat::*;
    assert_eq!(Int16Lsb.byte_width(), 2);
    assert_eq!(Int24Msb.byte_width(), 3);
    assert_eq!(Int32Lsb20.byte_width(), 4);
    assert_eq!(Float32Lsb.byte_width(), 4);
    assert_eq!(Float64Msb.byte_width(), 8);
    assert_eq!(DsdInt8Ner8.byte_width(), 1);

    assert_eq!(Int32Msb24.byte_order(), ByteOrder::Big);
    assert_eq!(Float64Lsb.byte_order(), ByteOrder::Little);
    assert_eq!(DsdInt8Msb1.byte_order(), ByteOrder::Unordered);

    assert_eq!(Int16Msb.managed_kind(), ManagedKind::Int);
    assert_eq!(Float32Msb.managed_kind(), ManagedKind::Float);
    assert_eq!(Float64Lsb.managed_kind(), ManagedKind::Double);
    assert_eq!(DsdInt8Lsb1.managed_kind(), ManagedKind::Byte);
}

#[test]
fn packed_24_bit_is_sign_extended_in_both_orders() {
    let mut out = [0i32; 2];
    SampleFormat::Int24Lsb.decode_ints(&[0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x80], &mut out);
    assert_eq!(out, [-1, -0x7F_FFFF]);

    SampleFormat::Int24Msb.decode_ints(&[0x80, 0x00, 0x00, 0x12, 0x34, 0x56], &mut out);
    assert_eq!(out, [-0x80_0000, 0x12_3456]);

    let mut bytes = [0u8; 6];
    SampleFormat::Int24Msb.encode_ints(&[-2, 0x01_0203], &mut bytes);
    assert_eq!(bytes, [0xFF, 0xFF, 0xFE, 0x01, 0x02, 0x03]);
    SampleFormat::Int24Lsb.encode_ints(&[-2, 0x01_0203], &mut bytes);
    assert_eq!(bytes, [0xFE, 0xFF, 0xFF, 0x03, 0x02, 0x01]);
}

#[test]
fn sixteen_bit_decodes_with_sign() {
    let mut out = [0i32; 2];
    SampleFormat::Int16Msb.decode_ints(&[0x80, 0x00, 0x00, 0x01], &mut out);
    assert_eq!(out, [i16::MIN as i32, 1]);
    SampleFormat::Int16Lsb.decode_ints(&[0x00, 0x80, 0x01, 0x00], &mut out);
    assert_eq!(out, [i16::MIN as i32, 1]);
}

#[test]
fn floats_respect_byte_order() {
    let mut bytes = [0u8; 4];
    SampleFormat::Float32Msb.encode_floats(&[1.0], &mut bytes);
    assert_eq!(bytes, 1.0f32.to_be_bytes());
    SampleFormat::Float32Lsb.encode_floats(&[1.0], &mut bytes);
    assert_eq!(bytes, 1.0f32.to_le_bytes());

    let mut doubles = [0.0f64; 1];
    SampleFormat::Float64Msb.decode_doubles(&(-0.25f64).to_be_bytes(), &mut doubles);
    assert_eq!(doubles, [-0.25]);
}

#[test]
fn normalized_io_uses_full_scale_of_each_encoding() {
    assert_eq!(SampleFormat::Int32Lsb16.full_scale(), Some(0x7FFF as f32));
    assert_eq!(SampleFormat::Int32Msb18.full_scale(), Some(0x1FFFF as f32));
    assert_eq!(SampleFormat::Int32Lsb20.full_scale(), Some(0x7FFFF as f32));
    assert_eq!(SampleFormat::Int24Lsb.full_scale(), Some(0x7F_FFFF as f32));
    assert_eq!(SampleFormat::Float32Lsb.full_scale(), None);

    let mut bytes = [0u8; 8];
    SampleFormat::Int32Lsb16
        .write_normalized(&[1.0, -0.5], &mut bytes)
        .expect("write");
    assert_eq!(i32::from_le_bytes(bytes[..4].try_into().unwrap()), 0x7FFF);
    assert_eq!(i32::from_le_bytes(bytes[4..].try_into().unwrap()), -16384);

    let mut back = [0.0f32; 2];
    SampleFormat::Int32Lsb16
        .read_normalized(&bytes, &mut back)
        .expect("read");
    assert!((back[0] - 1.0).abs() < 1e-6);
    assert!((back[1] + 0.5).abs() < 1e-3);
}

#[test]
fn normalized_writes_clamp_out_of_range_values() {
    let mut bytes = [0u8; 4];
    SampleFormat::Int16Msb
        .write_normalized(&[3.0, -3.0], &mut bytes)
        .expect("write");
    assert_eq!(bytes, [0x7F, 0xFF, 0x80, 0x01]);
}

#[test]
fn dsd_has_no_float_mapping() {
    let mut out = [0.0f32; 4];
    assert_eq!(
        SampleFormat::DsdInt8Msb1.read_normalized(&[0x69; 4], &mut out),
        Err(Error::UnsupportedFormat(33))
    );
    assert_eq!(
        SampleFormat::DsdInt8Ner8.write_normalized(&out, &mut [0u8; 4]),
        Err(Error::UnsupportedFormat(40))
    );
}
