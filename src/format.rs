//! Native sample encodings and the width/byte-order conversion table.
//!
//! Everything here is pure and allocation free: it runs on the realtime thread
//! when the managed runtime needs copy-based buffer access.

use crate::error::{Error, Result};

/// Byte order of a native encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ByteOrder {
    /// Least significant byte first.
    Little,
    /// Most significant byte first.
    Big,
    /// Single-byte packings where order does not apply.
    Unordered,
}

/// How a copied buffer represents one native sample in managed memory.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ManagedKind {
    /// Sign-extended 32-bit integer.
    Int,
    /// 32-bit float.
    Float,
    /// 64-bit float.
    Double,
    /// Raw byte (DSD packings).
    Byte,
}

/// Sample encoding reported by the driver for a channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// 16-bit integer, big endian.
    Int16Msb,
    /// Packed 24-bit integer, big endian.
    Int24Msb,
    /// 32-bit integer, big endian.
    Int32Msb,
    /// 32-bit float, big endian.
    Float32Msb,
    /// 64-bit float, big endian.
    Float64Msb,
    /// 32-bit word carrying 16 significant bits, big endian.
    Int32Msb16,
    /// 32-bit word carrying 18 significant bits, big endian.
    Int32Msb18,
    /// 32-bit word carrying 20 significant bits, big endian.
    Int32Msb20,
    /// 32-bit word carrying 24 significant bits, big endian.
    Int32Msb24,
    /// 16-bit integer, little endian.
    Int16Lsb,
    /// Packed 24-bit integer, little endian.
    Int24Lsb,
    /// 32-bit integer, little endian.
    Int32Lsb,
    /// 32-bit float, little endian.
    Float32Lsb,
    /// 64-bit float, little endian.
    Float64Lsb,
    /// 32-bit word carrying 16 significant bits, little endian.
    Int32Lsb16,
    /// 32-bit word carrying 18 significant bits, little endian.
    Int32Lsb18,
    /// 32-bit word carrying 20 significant bits, little endian.
    Int32Lsb20,
    /// 32-bit word carrying 24 significant bits, little endian.
    Int32Lsb24,
    /// DSD, 1 bit per sample, 8 samples per byte, first sample in the LSB.
    DsdInt8Lsb1,
    /// DSD, 1 bit per sample, 8 samples per byte, first sample in the MSB.
    DsdInt8Msb1,
    /// DSD, 8 samples per byte without reordering.
    DsdInt8Ner8,
    /// A code outside the recognized set.
    Unrecognized(i32),
}

impl SampleFormat {
    /// Decode the driver's numeric sample type.
    pub fn from_code(code: i32) -> Self {
        use SampleFormat::*;
        match code {
            0 => Int16Msb,
            1 => Int24Msb,
            2 => Int32Msb,
            3 => Float32Msb,
            4 => Float64Msb,
            8 => Int32Msb16,
            9 => Int32Msb18,
            10 => Int32Msb20,
            11 => Int32Msb24,
            16 => Int16Lsb,
            17 => Int24Lsb,
            18 => Int32Lsb,
            19 => Float32Lsb,
            20 => Float64Lsb,
            24 => Int32Lsb16,
            25 => Int32Lsb18,
            26 => Int32Lsb20,
            27 => Int32Lsb24,
            32 => DsdInt8Lsb1,
            33 => DsdInt8Msb1,
            40 => DsdInt8Ner8,
            other => Unrecognized(other),
        }
    }

    /// The driver's numeric sample type.
    pub fn code(self) -> i32 {
        use SampleFormat::*;
        match self {
            Int16Msb => 0,
            Int24Msb => 1,
            Int32Msb => 2,
            Float32Msb => 3,
            Float64Msb => 4,
            Int32Msb16 => 8,
            Int32Msb18 => 9,
            Int32Msb20 => 10,
            Int32Msb24 => 11,
            Int16Lsb => 16,
            Int24Lsb => 17,
            Int32Lsb => 18,
            Float32Lsb => 19,
            Float64Lsb => 20,
            Int32Lsb16 => 24,
            Int32Lsb18 => 25,
            Int32Lsb20 => 26,
            Int32Lsb24 => 27,
            DsdInt8Lsb1 => 32,
            DsdInt8Msb1 => 33,
            DsdInt8Ner8 => 40,
            Unrecognized(code) => code,
        }
    }

    /// Whether this encoding is one the registry can expose.
    pub fn is_recognized(self) -> bool {
        !matches!(self, SampleFormat::Unrecognized(_))
    }

    /// Fail with `UnsupportedFormat` for unrecognized encodings.
    pub fn ensure_recognized(self) -> Result<Self> {
        match self {
            SampleFormat::Unrecognized(code) => Err(Error::UnsupportedFormat(code)),
            format => Ok(format),
        }
    }

    /// Bytes occupied by one sample frame of one channel.
    pub fn byte_width(self) -> usize {
        use SampleFormat::*;
        match self {
            Int16Msb | Int16Lsb => 2,
            Int24Msb | Int24Lsb => 3,
            Int32Msb | Int32Lsb | Float32Msb | Float32Lsb => 4,
            Int32Msb16 | Int32Msb18 | Int32Msb20 | Int32Msb24 => 4,
            Int32Lsb16 | Int32Lsb18 | Int32Lsb20 | Int32Lsb24 => 4,
            Float64Msb | Float64Lsb => 8,
            DsdInt8Lsb1 | DsdInt8Msb1 | DsdInt8Ner8 => 1,
            Unrecognized(_) => 0,
        }
    }

    /// Byte order of the encoding.
    pub fn byte_order(self) -> ByteOrder {
        let code = self.code();
        match self {
            SampleFormat::DsdInt8Lsb1
            | SampleFormat::DsdInt8Msb1
            | SampleFormat::DsdInt8Ner8
            | SampleFormat::Unrecognized(_) => ByteOrder::Unordered,
            _ if code < 16 => ByteOrder::Big,
            _ => ByteOrder::Little,
        }
    }

    /// Managed representation used for copy-based access.
    pub fn managed_kind(self) -> ManagedKind {
        use SampleFormat::*;
        match self {
            Float32Msb | Float32Lsb => ManagedKind::Float,
            Float64Msb | Float64Lsb => ManagedKind::Double,
            DsdInt8Lsb1 | DsdInt8Msb1 | DsdInt8Ner8 | Unrecognized(_) => ManagedKind::Byte,
            _ => ManagedKind::Int,
        }
    }

    /// Whether this is one of the DSD packings.
    pub fn is_dsd(self) -> bool {
        matches!(
            self,
            SampleFormat::DsdInt8Lsb1 | SampleFormat::DsdInt8Msb1 | SampleFormat::DsdInt8Ner8
        )
    }

    /// Integer value corresponding to +1.0 for integer encodings.
    pub fn full_scale(self) -> Option<f32> {
        use SampleFormat::*;
        let scale: u32 = match self {
            Int16Msb | Int16Lsb | Int32Msb16 | Int32Lsb16 => 0x7FFF,
            Int32Msb18 | Int32Lsb18 => 0x1FFFF,
            Int32Msb20 | Int32Lsb20 => 0x7FFFF,
            Int24Msb | Int24Lsb | Int32Msb24 | Int32Lsb24 => 0x7F_FFFF,
            Int32Msb | Int32Lsb => 0x7FFF_FFFF,
            _ => return None,
        };
        Some(scale as f32)
    }

    fn load_int(self, bytes: &[u8]) -> i32 {
        let big = self.byte_order() == ByteOrder::Big;
        match self.byte_width() {
            2 => {
                let raw = [bytes[0], bytes[1]];
                (if big { i16::from_be_bytes(raw) } else { i16::from_le_bytes(raw) }) as i32
            }
            3 => {
                let raw = if big {
                    [bytes[0], bytes[1], bytes[2], 0]
                } else {
                    [bytes[2], bytes[1], bytes[0], 0]
                };
                // Arithmetic shift sign-extends bit 23.
                i32::from_be_bytes(raw) >> 8
            }
            _ => {
                let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
                if big { i32::from_be_bytes(raw) } else { i32::from_le_bytes(raw) }
            }
        }
    }

    fn store_int(self, bytes: &mut [u8], value: i32) {
        let big = self.byte_order() == ByteOrder::Big;
        match self.byte_width() {
            2 => {
                let v = value as i16;
                bytes[..2].copy_from_slice(&if big { v.to_be_bytes() } else { v.to_le_bytes() });
            }
            3 => {
                let raw = value.to_be_bytes();
                if big {
                    bytes[..3].copy_from_slice(&raw[1..]);
                } else {
                    bytes[0] = raw[3];
                    bytes[1] = raw[2];
                    bytes[2] = raw[1];
                }
            }
            _ => {
                bytes[..4].copy_from_slice(&if big {
                    value.to_be_bytes()
                } else {
                    value.to_le_bytes()
                });
            }
        }
    }

    fn load_f32(self, bytes: &[u8]) -> f32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self.byte_order() {
            ByteOrder::Big => f32::from_be_bytes(raw),
            _ => f32::from_le_bytes(raw),
        }
    }

    fn store_f32(self, bytes: &mut [u8], value: f32) {
        let raw = match self.byte_order() {
            ByteOrder::Big => value.to_be_bytes(),
            _ => value.to_le_bytes(),
        };
        bytes[..4].copy_from_slice(&raw);
    }

    fn load_f64(self, bytes: &[u8]) -> f64 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        match self.byte_order() {
            ByteOrder::Big => f64::from_be_bytes(raw),
            _ => f64::from_le_bytes(raw),
        }
    }

    fn store_f64(self, bytes: &mut [u8], value: f64) {
        let raw = match self.byte_order() {
            ByteOrder::Big => value.to_be_bytes(),
            _ => value.to_le_bytes(),
        };
        bytes[..8].copy_from_slice(&raw);
    }

    /// Decode native integer samples into sign-extended `i32`s.
    ///
    /// Converts `min(dst.len(), src.len() / width)` samples.
    pub fn decode_ints(self, src: &[u8], dst: &mut [i32]) {
        let width = self.byte_width();
        for (chunk, out) in src.chunks_exact(width).zip(dst.iter_mut()) {
            *out = self.load_int(chunk);
        }
    }

    /// Encode `i32`s into native integer samples, truncating to the native width.
    pub fn encode_ints(self, src: &[i32], dst: &mut [u8]) {
        let width = self.byte_width();
        for (chunk, value) in dst.chunks_exact_mut(width).zip(src.iter()) {
            self.store_int(chunk, *value);
        }
    }

    /// Decode native 32-bit floats.
    pub fn decode_floats(self, src: &[u8], dst: &mut [f32]) {
        for (chunk, out) in src.chunks_exact(4).zip(dst.iter_mut()) {
            *out = self.load_f32(chunk);
        }
    }

    /// Encode native 32-bit floats.
    pub fn encode_floats(self, src: &[f32], dst: &mut [u8]) {
        for (chunk, value) in dst.chunks_exact_mut(4).zip(src.iter()) {
            self.store_f32(chunk, *value);
        }
    }

    /// Decode native 64-bit floats.
    pub fn decode_doubles(self, src: &[u8], dst: &mut [f64]) {
        for (chunk, out) in src.chunks_exact(8).zip(dst.iter_mut()) {
            *out = self.load_f64(chunk);
        }
    }

    /// Encode native 64-bit floats.
    pub fn encode_doubles(self, src: &[f64], dst: &mut [u8]) {
        for (chunk, value) in dst.chunks_exact_mut(8).zip(src.iter()) {
            self.store_f64(chunk, *value);
        }
    }

    /// Read native samples as floats in [-1, 1].
    pub fn read_normalized(self, src: &[u8], dst: &mut [f32]) -> Result<()> {
        match self.managed_kind() {
            ManagedKind::Float => self.decode_floats(src, dst),
            ManagedKind::Double => {
                for (chunk, out) in src.chunks_exact(8).zip(dst.iter_mut()) {
                    *out = self.load_f64(chunk) as f32;
                }
            }
            ManagedKind::Int => {
                let scale = self.full_scale().ok_or(Error::UnsupportedFormat(self.code()))?;
                let width = self.byte_width();
                for (chunk, out) in src.chunks_exact(width).zip(dst.iter_mut()) {
                    *out = self.load_int(chunk) as f32 / scale;
                }
            }
            ManagedKind::Byte => return Err(Error::UnsupportedFormat(self.code())),
        }
        Ok(())
    }

    /// Write floats in [-1, 1] as native samples. Values outside the range are clamped.
    pub fn write_normalized(self, src: &[f32], dst: &mut [u8]) -> Result<()> {
        match self.managed_kind() {
            ManagedKind::Float => {
                for (chunk, value) in dst.chunks_exact_mut(4).zip(src.iter()) {
                    self.store_f32(chunk, value.clamp(-1.0, 1.0));
                }
            }
            ManagedKind::Double => {
                for (chunk, value) in dst.chunks_exact_mut(8).zip(src.iter()) {
                    self.store_f64(chunk, value.clamp(-1.0, 1.0) as f64);
                }
            }
            ManagedKind::Int => {
                let scale = self.full_scale().ok_or(Error::UnsupportedFormat(self.code()))?;
                let width = self.byte_width();
                for (chunk, value) in dst.chunks_exact_mut(width).zip(src.iter()) {
                    let scaled = (value.clamp(-1.0, 1.0) as f64 * scale as f64).round() as i32;
                    self.store_int(chunk, scaled);
                }
            }
            ManagedKind::Byte => return Err(Error::UnsupportedFormat(self.code())),
        }
        Ok(())
    }
}
