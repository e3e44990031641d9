//! Negotiated channel buffers and the views the managed side processes them through.
//!
//! The registry owns one [`BufferSlot`] per activated channel. Slot memory belongs
//! to the driver; the registry only records the addresses it handed out and, when
//! the runtime cannot address driver memory, the intermediate copy buffers.

use std::collections::HashSet;
use std::ptr::NonNull;
use std::slice;

use tracing::{debug, warn};

use crate::attach::BufferAccess;
use crate::driver::{ChannelDescriptor, Direction, NativeDriver};
use crate::error::{Error, Result};
use crate::ffi::{AsioCallbacks, BufferInfo};
use crate::format::{ManagedKind, SampleFormat};

const DSD_SILENCE: u8 = 0x69;

/// # Safety
/// `ptr` must address `len` bytes of a live half-buffer with no other reference to it.
unsafe fn half_bytes<'b>(ptr: NonNull<u8>, len: usize) -> &'b mut [u8] {
    unsafe { slice::from_raw_parts_mut(ptr.as_ptr(), len) }
}

/// Intermediate managed array used when driver memory is not directly addressable.
#[derive(Debug)]
pub enum ManagedBuffer {
    /// Integer encodings, sign extended.
    Int(Vec<i32>),
    /// 32-bit float encodings.
    Float(Vec<f32>),
    /// 64-bit float encodings.
    Double(Vec<f64>),
    /// DSD packings.
    Bytes(Vec<u8>),
}

impl ManagedBuffer {
    fn allocate(kind: ManagedKind, len: usize) -> Result<Self> {
        fn filled<T: Clone>(len: usize, value: T) -> Result<Vec<T>> {
            let mut buf = Vec::new();
            buf.try_reserve_exact(len)
                .map_err(|_| Error::InsufficientMemory)?;
            buf.resize(len, value);
            Ok(buf)
        }
        Ok(match kind {
            ManagedKind::Int => ManagedBuffer::Int(filled(len, 0)?),
            ManagedKind::Float => ManagedBuffer::Float(filled(len, 0.0)?),
            ManagedKind::Double => ManagedBuffer::Double(filled(len, 0.0)?),
            ManagedKind::Byte => ManagedBuffer::Bytes(filled(len, 0)?),
        })
    }

    fn byte_len(&self) -> usize {
        match self {
            ManagedBuffer::Int(buf) => buf.len() * size_of::<i32>(),
            ManagedBuffer::Float(buf) => buf.len() * size_of::<f32>(),
            ManagedBuffer::Double(buf) => buf.len() * size_of::<f64>(),
            ManagedBuffer::Bytes(buf) => buf.len(),
        }
    }
}

/// One activated channel and its pair of half-buffers.
#[derive(Debug)]
pub struct BufferSlot {
    descriptor: ChannelDescriptor,
    halves: [NonNull<u8>; 2],
    byte_len: usize,
    copy: Option<ManagedBuffer>,
}

// Half pointers are only dereferenced under the dispatcher's phase discipline.
unsafe impl Send for BufferSlot {}

impl BufferSlot {
    /// Channel this slot belongs to.
    pub fn descriptor(&self) -> &ChannelDescriptor {
        &self.descriptor
    }

    /// Length of each half in bytes: frames times the format width.
    pub fn byte_len(&self) -> usize {
        self.byte_len
    }

    /// Length in bytes of the managed-visible view.
    pub fn view_len(&self) -> usize {
        match &self.copy {
            Some(buffer) => buffer.byte_len(),
            None => self.byte_len,
        }
    }

    /// Whether the managed side works on a copy of driver memory.
    pub fn is_copied(&self) -> bool {
        self.copy.is_some()
    }

    /// Driver address of half `index` (0 or 1).
    pub fn half_ptr(&self, index: usize) -> NonNull<u8> {
        self.halves[index & 1]
    }

    /// # Safety
    /// See [`half_bytes`].
    unsafe fn copy_in(&mut self, half: usize) {
        let format = self.descriptor.format;
        let src = unsafe { half_bytes(self.halves[half & 1], self.byte_len) };
        match &mut self.copy {
            Some(ManagedBuffer::Int(dst)) => format.decode_ints(src, dst),
            Some(ManagedBuffer::Float(dst)) => format.decode_floats(src, dst),
            Some(ManagedBuffer::Double(dst)) => format.decode_doubles(src, dst),
            Some(ManagedBuffer::Bytes(dst)) => dst.copy_from_slice(src),
            None => {}
        }
    }

    /// # Safety
    /// See [`half_bytes`].
    unsafe fn copy_out(&mut self, half: usize) {
        let format = self.descriptor.format;
        let dst = unsafe { half_bytes(self.halves[half & 1], self.byte_len) };
        match &self.copy {
            Some(ManagedBuffer::Int(src)) => format.encode_ints(src, dst),
            Some(ManagedBuffer::Float(src)) => format.encode_floats(src, dst),
            Some(ManagedBuffer::Double(src)) => format.encode_doubles(src, dst),
            Some(ManagedBuffer::Bytes(src)) => dst.copy_from_slice(src),
            None => {}
        }
    }
}

/// Snapshot of one slot's layout, readable without touching driver memory.
#[derive(Clone, Debug, PartialEq)]
pub struct SlotInfo {
    /// Channel of the slot.
    pub descriptor: ChannelDescriptor,
    /// Bytes per half-buffer.
    pub byte_len: usize,
    /// Bytes of the managed-visible view.
    pub view_len: usize,
    /// Whether the view is a copy.
    pub copied: bool,
}

/// The live stream configuration: frame count plus one slot per activated channel.
#[derive(Debug, Default)]
pub struct BufferRegistry {
    slots: Vec<BufferSlot>,
    frames: i32,
    access: BufferAccess,
}

impl BufferRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a configuration is live.
    pub fn is_configured(&self) -> bool {
        !self.slots.is_empty()
    }

    /// Number of slots.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no slots.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Frames per half-buffer, 0 when not configured.
    pub fn frames(&self) -> i32 {
        self.frames
    }

    /// Access mode of the live configuration.
    pub fn access(&self) -> BufferAccess {
        self.access
    }

    /// Slots in configuration order.
    pub fn slots(&self) -> &[BufferSlot] {
        &self.slots
    }

    /// Layout of every slot.
    pub fn layout(&self) -> Vec<SlotInfo> {
        self.slots
            .iter()
            .map(|slot| SlotInfo {
                descriptor: slot.descriptor.clone(),
                byte_len: slot.byte_len,
                view_len: slot.view_len(),
                copied: slot.is_copied(),
            })
            .collect()
    }

    /// Negotiate buffers for exactly `channels` at `frames` per half.
    ///
    /// Each channel is re-queried from the driver; a descriptor whose format
    /// disagrees with the driver's is rejected.
    ///
    /// All-or-nothing: on any failure no slot is retained and the driver holds no
    /// buffers from this call.
    pub fn configure(
        &mut self,
        driver: &dyn NativeDriver,
        channels: &[ChannelDescriptor],
        frames: i32,
        access: BufferAccess,
        callbacks: &'static AsioCallbacks,
    ) -> Result<()> {
        if self.is_configured() {
            return Err(Error::AlreadyConfigured);
        }
        if channels.is_empty() {
            return Err(Error::InvalidArgument("no channels requested".into()));
        }
        if frames <= 0 {
            return Err(Error::InvalidArgument(format!(
                "frame count must be positive, got {frames}"
            )));
        }
        let mut seen = HashSet::with_capacity(channels.len());
        for channel in channels {
            if !seen.insert(channel.key()) {
                return Err(Error::InvalidArgument(format!(
                    "channel {} ({:?}) requested twice",
                    channel.index, channel.direction
                )));
            }
        }
        // Slot sizes must follow the format the driver allocates with.
        let mut resolved = Vec::with_capacity(channels.len());
        for channel in channels {
            let reported = driver
                .channel_info(channel.index, channel.direction)
                .map_err(Error::from_code)?;
            if reported.format != channel.format {
                return Err(Error::InvalidArgument(format!(
                    "channel {} ({:?}) requested as {:?}, driver reports {:?}",
                    channel.index, channel.direction, channel.format, reported.format
                )));
            }
            reported.format.ensure_recognized()?;
            resolved.push(reported);
        }
        let channels = resolved.as_slice();
        if access == BufferAccess::Unsupported {
            return Err(Error::UnsupportedPlatform);
        }

        let frame_count = frames as usize;
        let mut copies = Vec::with_capacity(channels.len());
        for channel in channels {
            copies.push(match access {
                BufferAccess::Copy => Some(ManagedBuffer::allocate(
                    channel.format.managed_kind(),
                    frame_count,
                )?),
                _ => None,
            });
        }

        let mut infos: Vec<BufferInfo> = channels
            .iter()
            .map(|ch| BufferInfo::request(ch.direction.is_input(), ch.index as i32))
            .collect();
        driver
            .create_buffers(&mut infos, frames, callbacks)
            .map_err(|code| {
                debug!(%code, frames, "driver rejected buffer creation");
                Error::from_create_buffers(code, frames)
            })?;

        let mut slots = Vec::with_capacity(channels.len());
        for ((channel, info), copy) in channels.iter().zip(&infos).zip(copies) {
            let halves = match (
                NonNull::new(info.buffers[0].cast::<u8>()),
                NonNull::new(info.buffers[1].cast::<u8>()),
            ) {
                (Some(a), Some(b)) => [a, b],
                _ => {
                    warn!(channel = channel.index, "driver returned a null half-buffer");
                    drop(slots);
                    if let Err(code) = driver.dispose_buffers() {
                        warn!(%code, "dispose during configure rollback failed");
                    }
                    return Err(Error::InsufficientMemory);
                }
            };
            let mut descriptor = channel.clone();
            descriptor.active = true;
            slots.push(BufferSlot {
                descriptor,
                halves,
                byte_len: frame_count * channel.format.byte_width(),
                copy,
            });
        }

        debug!(slots = slots.len(), frames, ?access, "buffers configured");
        self.slots = slots;
        self.frames = frames;
        self.access = access;
        Ok(())
    }

    /// Release every view and copy buffer, then ask the driver to free its buffers.
    ///
    /// No-op when nothing is configured. Local state is cleared even when the
    /// driver reports an error; that error is returned afterwards.
    pub fn teardown(&mut self, driver: &dyn NativeDriver) -> Result<()> {
        if !self.is_configured() {
            return Ok(());
        }
        self.slots.clear();
        self.frames = 0;
        self.access = BufferAccess::default();
        driver.dispose_buffers().map_err(|code| {
            warn!(%code, "driver failed to dispose buffers");
            Error::from_code(code)
        })
    }

    /// Copy input halves into the managed arrays. No-op for direct access.
    ///
    /// # Safety
    /// The configuration must be live and the driver must not be writing `half`.
    pub unsafe fn copy_in(&mut self, half: usize) {
        if self.access != BufferAccess::Copy {
            return;
        }
        for slot in self.slots.iter_mut() {
            if slot.descriptor.direction == Direction::Input {
                unsafe { slot.copy_in(half) };
            }
        }
    }

    /// Copy the managed arrays out to the output halves. No-op for direct access.
    ///
    /// # Safety
    /// See [`BufferRegistry::copy_in`].
    pub unsafe fn copy_out(&mut self, half: usize) {
        if self.access != BufferAccess::Copy {
            return;
        }
        for slot in self.slots.iter_mut() {
            if slot.descriptor.direction == Direction::Output {
                unsafe { slot.copy_out(half) };
            }
        }
    }

    /// Views of every slot for `half`.
    ///
    /// # Safety
    /// See [`BufferRegistry::copy_in`].
    pub unsafe fn views(&mut self, half: usize) -> StreamViews<'_> {
        StreamViews {
            slots: &mut self.slots,
            half: half & 1,
            frames: self.frames.max(0) as usize,
        }
    }
}

/// The channel views handed to one buffer-ready upcall.
pub struct StreamViews<'a> {
    slots: &'a mut [BufferSlot],
    half: usize,
    frames: usize,
}

impl<'a> StreamViews<'a> {
    /// Number of channels.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether there are no channels.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Half these views refer to.
    pub fn half(&self) -> usize {
        self.half
    }

    /// Frames per channel.
    pub fn frames(&self) -> usize {
        self.frames
    }

    /// View of the `position`-th configured channel.
    pub fn channel(&mut self, position: usize) -> Option<ChannelView<'_>> {
        let half = self.half;
        self.slots
            .get_mut(position)
            .map(|slot| ChannelView::new(slot, half))
    }

    /// View of the configured channel with the given identity.
    pub fn find(&mut self, index: u32, direction: Direction) -> Option<ChannelView<'_>> {
        let half = self.half;
        self.slots
            .iter_mut()
            .find(|slot| slot.descriptor.key() == (index, direction))
            .map(|slot| ChannelView::new(slot, half))
    }

    /// Views of every channel, in configuration order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = ChannelView<'_>> {
        let half = self.half;
        self.slots
            .iter_mut()
            .map(move |slot| ChannelView::new(slot, half))
    }
}

/// Sample storage behind a channel view.
pub enum Samples<'a> {
    /// Driver memory in its native encoding.
    Native {
        /// Raw half-buffer.
        bytes: &'a mut [u8],
        /// Encoding of `bytes`.
        format: SampleFormat,
    },
    /// Copied integer samples, sign extended.
    Int(&'a mut [i32]),
    /// Copied 32-bit float samples.
    Float(&'a mut [f32]),
    /// Copied 64-bit float samples.
    Double(&'a mut [f64]),
    /// Copied DSD bytes.
    Bytes(&'a mut [u8]),
}

/// One channel's half-buffer as seen by the managed side.
pub struct ChannelView<'a> {
    descriptor: &'a ChannelDescriptor,
    samples: Samples<'a>,
}

impl<'a> ChannelView<'a> {
    fn new(slot: &'a mut BufferSlot, half: usize) -> Self {
        let format = slot.descriptor.format;
        let halves = slot.halves;
        let byte_len = slot.byte_len;
        let samples = match &mut slot.copy {
            // SAFETY: views are only built while the configuration is live, on the
            // single thread running the buffer-ready callback.
            None => Samples::Native {
                bytes: unsafe { half_bytes(halves[half & 1], byte_len) },
                format,
            },
            Some(ManagedBuffer::Int(buf)) => Samples::Int(buf),
            Some(ManagedBuffer::Float(buf)) => Samples::Float(buf),
            Some(ManagedBuffer::Double(buf)) => Samples::Double(buf),
            Some(ManagedBuffer::Bytes(buf)) => Samples::Bytes(buf),
        };
        Self {
            descriptor: &slot.descriptor,
            samples,
        }
    }

    /// Channel this view belongs to.
    pub fn descriptor(&self) -> &ChannelDescriptor {
        self.descriptor
    }

    /// Raw access to the samples.
    pub fn samples(&mut self) -> &mut Samples<'a> {
        &mut self.samples
    }

    /// Read an input channel as floats in [-1, 1]. Returns the number of samples read.
    pub fn read_f32(&self, out: &mut [f32]) -> Result<usize> {
        if self.descriptor.direction != Direction::Input {
            return Err(Error::InvalidMode("only input channels can be read"));
        }
        let format = self.descriptor.format;
        let scale = format.full_scale().unwrap_or(1.0);
        let count = match &self.samples {
            Samples::Native { bytes, format } => {
                format.read_normalized(bytes, out)?;
                out.len().min(bytes.len() / format.byte_width().max(1))
            }
            Samples::Int(buf) => {
                for (dst, src) in out.iter_mut().zip(buf.iter()) {
                    *dst = *src as f32 / scale;
                }
                out.len().min(buf.len())
            }
            Samples::Float(buf) => {
                let n = out.len().min(buf.len());
                out[..n].copy_from_slice(&buf[..n]);
                n
            }
            Samples::Double(buf) => {
                for (dst, src) in out.iter_mut().zip(buf.iter()) {
                    *dst = *src as f32;
                }
                out.len().min(buf.len())
            }
            Samples::Bytes(_) => return Err(Error::UnsupportedFormat(format.code())),
        };
        Ok(count)
    }

    /// Write floats in [-1, 1] to an output channel. Returns the number of samples written.
    pub fn write_f32(&mut self, input: &[f32]) -> Result<usize> {
        if self.descriptor.direction != Direction::Output {
            return Err(Error::InvalidMode("only output channels can be written"));
        }
        let format = self.descriptor.format;
        let scale = format.full_scale().unwrap_or(1.0) as f64;
        let count = match &mut self.samples {
            Samples::Native { bytes, format } => {
                format.write_normalized(input, bytes)?;
                input.len().min(bytes.len() / format.byte_width().max(1))
            }
            Samples::Int(buf) => {
                for (dst, src) in buf.iter_mut().zip(input.iter()) {
                    *dst = (src.clamp(-1.0, 1.0) as f64 * scale).round() as i32;
                }
                input.len().min(buf.len())
            }
            Samples::Float(buf) => {
                for (dst, src) in buf.iter_mut().zip(input.iter()) {
                    *dst = src.clamp(-1.0, 1.0);
                }
                input.len().min(buf.len())
            }
            Samples::Double(buf) => {
                for (dst, src) in buf.iter_mut().zip(input.iter()) {
                    *dst = src.clamp(-1.0, 1.0) as f64;
                }
                input.len().min(buf.len())
            }
            Samples::Bytes(_) => return Err(Error::UnsupportedFormat(format.code())),
        };
        Ok(count)
    }

    /// Fill the view with silence.
    pub fn fill_silence(&mut self) {
        let dsd = self.descriptor.format.is_dsd();
        match &mut self.samples {
            Samples::Native { bytes, .. } | Samples::Bytes(bytes) => {
                bytes.fill(if dsd { DSD_SILENCE } else { 0 })
            }
            Samples::Int(buf) => buf.fill(0),
            Samples::Float(buf) => buf.fill(0.0),
            Samples::Double(buf) => buf.fill(0.0),
        }
    }
}
