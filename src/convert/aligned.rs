//! High- and low-aligned kernels.
//!
//! A sample narrower than its container sits either in the most-significant
//! bits (high-aligned) or the least-significant bits (low-aligned), with the
//! remainder zero. High-aligned containers already carry packed-scale
//! magnitudes and mostly delegate to the packed kernel of the container
//! width. Low-aligned input is first left-shifted in place by
//! `container bits - sample bits` (destructively, so callers must treat the
//! input as consumed) and then runs the matching high-aligned kernel.

use super::{convert_channels, packed};
use crate::buffer::BufferView;
use crate::format::{AudioFormat, FormatFlags};

pub(super) fn from_high_aligned8(
    source: &AudioFormat,
    input: &[BufferView<'_, u8>],
    output: &mut [BufferView<'_, f64>],
    frames: usize,
) {
    packed::from_packed8(source, input, output, frames);
}

pub(super) fn from_high_aligned16(
    source: &AudioFormat,
    input: &[BufferView<'_, u8>],
    output: &mut [BufferView<'_, f64>],
    frames: usize,
) {
    packed::from_packed16(source, input, output, frames);
}

pub(super) fn from_high_aligned32(
    source: &AudioFormat,
    input: &[BufferView<'_, u8>],
    output: &mut [BufferView<'_, f64>],
    frames: usize,
) {
    // 24 significant bits keep the historical two-step calibration: the
    // container divides down to 24-bit magnitude first, then normalizes.
    // Other widths read at container scale directly.
    if source.bits_per_channel == 24 {
        let full_scale = f64::from(1u32 << 23);
        let assembly_scale = f64::from(1u32 << 8);
        let signed = source.flags.contains(FormatFlags::SIGNED_INTEGER);
        let big_endian = source.flags.contains(FormatFlags::BIG_ENDIAN);

        convert_channels(input, output, frames, |data, channel, stride, out| {
            let samples = data.chunks_exact(4).skip(channel).step_by(stride);
            for (raw, out) in samples.zip(out.iter_mut()) {
                let bytes = [raw[0], raw[1], raw[2], raw[3]];
                let word = if big_endian {
                    u32::from_be_bytes(bytes)
                } else {
                    u32::from_le_bytes(bytes)
                };
                *out = if signed {
                    f64::from(word as i32) / assembly_scale / full_scale
                } else {
                    (f64::from(word) / assembly_scale - full_scale) / full_scale
                };
            }
        });
        return;
    }

    packed::from_packed32(source, input, output, frames);
}

pub(super) fn from_low_aligned8(
    source: &AudioFormat,
    input: &mut [BufferView<'_, u8>],
    output: &mut [BufferView<'_, f64>],
    frames: usize,
) {
    let shift = 8 - source.bits_per_channel;
    if shift > 0 {
        for buffer in input.iter_mut() {
            let total = frames * buffer.channels() as usize;
            for byte in buffer.data_mut().iter_mut().take(total) {
                *byte <<= shift;
            }
        }
    }
    from_high_aligned8(source, input, output, frames);
}

pub(super) fn from_low_aligned16(
    source: &AudioFormat,
    input: &mut [BufferView<'_, u8>],
    output: &mut [BufferView<'_, f64>],
    frames: usize,
) {
    let shift = 16 - source.bits_per_channel;
    let big_endian = source.flags.contains(FormatFlags::BIG_ENDIAN);
    if shift > 0 {
        for buffer in input.iter_mut() {
            let total = frames * buffer.channels() as usize;
            for raw in buffer.data_mut().chunks_exact_mut(2).take(total) {
                let bytes = [raw[0], raw[1]];
                if big_endian {
                    let value = u16::from_be_bytes(bytes) << shift;
                    raw.copy_from_slice(&value.to_be_bytes());
                } else {
                    let value = u16::from_le_bytes(bytes) << shift;
                    raw.copy_from_slice(&value.to_le_bytes());
                }
            }
        }
    }
    from_high_aligned16(source, input, output, frames);
}

pub(super) fn from_low_aligned32(
    source: &AudioFormat,
    input: &mut [BufferView<'_, u8>],
    output: &mut [BufferView<'_, f64>],
    frames: usize,
) {
    let shift = 32 - source.bits_per_channel;
    let big_endian = source.flags.contains(FormatFlags::BIG_ENDIAN);
    if shift > 0 {
        for buffer in input.iter_mut() {
            let total = frames * buffer.channels() as usize;
            for raw in buffer.data_mut().chunks_exact_mut(4).take(total) {
                let bytes = [raw[0], raw[1], raw[2], raw[3]];
                if big_endian {
                    let value = u32::from_be_bytes(bytes) << shift;
                    raw.copy_from_slice(&value.to_be_bytes());
                } else {
                    let value = u32::from_le_bytes(bytes) << shift;
                    raw.copy_from_slice(&value.to_le_bytes());
                }
            }
        }
    }
    from_high_aligned32(source, input, output, frames);
}
