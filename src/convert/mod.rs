//! Sample-format conversion into deinterleaved 64-bit floats.
//!
//! [`FloatConverter`] normalizes one block of interleaved (or already
//! deinterleaved) PCM frames into per-channel `f64` buffers in roughly
//! `[-1, +1)`. The source layout is validated once at construction, which
//! also resolves the conversion kernel; the per-block call is total and has
//! no fallible path.

mod aligned;
mod float;
mod packed;

use crate::buffer::BufferView;
use crate::error::ConvertError;
use crate::format::{AudioFormat, FormatFlags, FormatKind};

/// Leaf conversion routine resolved at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kernel {
    Float32,
    Float64,
    Packed8,
    Packed16,
    Packed24,
    Packed32,
    HighAligned8,
    HighAligned16,
    HighAligned32,
    LowAligned8,
    LowAligned16,
    LowAligned32,
}

/// Converts arbitrary PCM layouts into deinterleaved native doubles.
///
/// Covers packed 8/16/24/32-bit integers (signed and unsigned, either
/// endianness), 32/64-bit floats (either endianness), and narrow samples
/// carried high- or low-aligned in 1, 2, or 4 byte containers.
///
/// Low-aligned sources are shifted **in place** before conversion: the input
/// is consumed by the call, which is why [`FloatConverter::convert`] takes
/// the input views mutably.
#[derive(Debug)]
pub struct FloatConverter {
    source: AudioFormat,
    destination: AudioFormat,
    kernel: Kernel,
}

impl FloatConverter {
    /// Validates `source` and resolves its conversion kernel.
    ///
    /// # Errors
    ///
    /// * [`ConvertError::UnsupportedEncoding`]: not linear PCM, or a float
    ///   width other than 32/64 bits
    /// * [`ConvertError::UnsupportedPackedWidth`]: packed integers outside
    ///   8/16/24/32 bits
    /// * [`ConvertError::UnsupportedAlignedWidth`]: aligned samples in a
    ///   container without a kernel
    pub fn new(source: AudioFormat) -> Result<Self, ConvertError> {
        let kernel = Self::resolve_kernel(&source)?;

        let destination = AudioFormat {
            kind: FormatKind::Pcm,
            flags: FormatFlags::FLOAT | FormatFlags::PACKED | FormatFlags::NON_INTERLEAVED,
            bits_per_channel: 64,
            bytes_per_packet: 8,
            frames_per_packet: 1,
            bytes_per_frame: 8,
            sample_rate: source.sample_rate,
            channels_per_frame: source.channels_per_frame,
        };

        Ok(Self {
            source,
            destination,
            kernel,
        })
    }

    fn resolve_kernel(source: &AudioFormat) -> Result<Kernel, ConvertError> {
        if !source.is_pcm() {
            return Err(ConvertError::UnsupportedEncoding);
        }

        let interleaved = source.interleaved_channel_count();
        if interleaved == 0 {
            return Err(ConvertError::UnsupportedEncoding);
        }
        let sample_width = source.bytes_per_frame / interleaved;
        let bits = source.bits_per_channel;

        if source.flags.contains(FormatFlags::FLOAT) {
            return match bits {
                32 => Ok(Kernel::Float32),
                64 => Ok(Kernel::Float64),
                _ => Err(ConvertError::UnsupportedEncoding),
            };
        }

        if source.flags.contains(FormatFlags::PACKED) {
            if !matches!(bits, 8 | 16 | 24 | 32) {
                return Err(ConvertError::UnsupportedPackedWidth(bits));
            }
            return match sample_width {
                1 => Ok(Kernel::Packed8),
                2 => Ok(Kernel::Packed16),
                3 => Ok(Kernel::Packed24),
                4 => Ok(Kernel::Packed32),
                _ => Err(ConvertError::UnsupportedPackedWidth(bits)),
            };
        }

        // Aligned samples: the container picks the kernel, the declared
        // width only has to fit inside it.
        if bits == 0 || bits > 8 * sample_width {
            return Err(ConvertError::UnsupportedAlignedWidth {
                container: sample_width,
                bits,
            });
        }
        let high = source.flags.contains(FormatFlags::ALIGNED_HIGH);
        match sample_width {
            1 => Ok(if high {
                Kernel::HighAligned8
            } else {
                Kernel::LowAligned8
            }),
            2 => Ok(if high {
                Kernel::HighAligned16
            } else {
                Kernel::LowAligned16
            }),
            4 => Ok(if high {
                Kernel::HighAligned32
            } else {
                Kernel::LowAligned32
            }),
            _ => Err(ConvertError::UnsupportedAlignedWidth {
                container: sample_width,
                bits,
            }),
        }
    }

    /// The layout this converter accepts.
    pub fn source_format(&self) -> &AudioFormat {
        &self.source
    }

    /// The layout this converter produces: deinterleaved native doubles at
    /// the source's rate and channel count.
    pub fn destination_format(&self) -> &AudioFormat {
        &self.destination
    }

    /// Converts `frames` frames from `input` into `output`.
    ///
    /// Walks the channels of each input buffer in order, writing one output
    /// view per produced channel and stamping it with `byte_len = frames * 8`
    /// and a channel count of 1. Returns the number of frames written.
    ///
    /// `frames == 0` zeroes every output `byte_len` without reading a single
    /// input byte. Low-aligned kernels shift the input in place; treat the
    /// input as consumed after the call.
    pub fn convert(
        &self,
        input: &mut [BufferView<'_, u8>],
        output: &mut [BufferView<'_, f64>],
        frames: usize,
    ) -> usize {
        if frames == 0 {
            for view in output.iter_mut() {
                view.set_byte_len(0);
            }
            return 0;
        }

        match self.kernel {
            Kernel::Float32 => float::from_f32(&self.source, input, output, frames),
            Kernel::Float64 => float::from_f64(&self.source, input, output, frames),
            Kernel::Packed8 => packed::from_packed8(&self.source, input, output, frames),
            Kernel::Packed16 => packed::from_packed16(&self.source, input, output, frames),
            Kernel::Packed24 => packed::from_packed24(&self.source, input, output, frames),
            Kernel::Packed32 => packed::from_packed32(&self.source, input, output, frames),
            Kernel::HighAligned8 => aligned::from_high_aligned8(&self.source, input, output, frames),
            Kernel::HighAligned16 => {
                aligned::from_high_aligned16(&self.source, input, output, frames)
            }
            Kernel::HighAligned32 => {
                aligned::from_high_aligned32(&self.source, input, output, frames)
            }
            Kernel::LowAligned8 => aligned::from_low_aligned8(&self.source, input, output, frames),
            Kernel::LowAligned16 => aligned::from_low_aligned16(&self.source, input, output, frames),
            Kernel::LowAligned32 => aligned::from_low_aligned32(&self.source, input, output, frames),
        }

        frames
    }
}

/// Runs `kernel` once per input channel, pairing channels with output views
/// in order and stamping the produced views.
///
/// The kernel receives `(data, channel, stride, out)`: the raw bytes of one
/// input buffer, the channel's index within it, the buffer's interleaved
/// channel count, and the destination samples.
fn convert_channels(
    input: &[BufferView<'_, u8>],
    output: &mut [BufferView<'_, f64>],
    frames: usize,
    mut kernel: impl FnMut(&[u8], usize, usize, &mut [f64]),
) {
    let mut outputs = output.iter_mut();
    for buffer in input {
        let stride = buffer.channels() as usize;
        for channel in 0..stride {
            let Some(out) = outputs.next() else {
                return;
            };
            let out_data = out.data_mut();
            let n = frames.min(out_data.len());
            kernel(buffer.data(), channel, stride, &mut out_data[..n]);
            out.set_byte_len(n * std::mem::size_of::<f64>());
            out.set_channels(1);
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Shared scaffolding for the kernel tests.

    use super::*;

    /// Interleaved packed integer format.
    pub fn packed_int(bits: u32, channels: u32, signed: bool, big_endian: bool) -> AudioFormat {
        let mut flags = FormatFlags::PACKED;
        if signed {
            flags |= FormatFlags::SIGNED_INTEGER;
        }
        if big_endian {
            flags |= FormatFlags::BIG_ENDIAN;
        }
        AudioFormat {
            kind: FormatKind::Pcm,
            flags,
            bits_per_channel: bits,
            bytes_per_packet: (bits / 8) * channels,
            frames_per_packet: 1,
            bytes_per_frame: (bits / 8) * channels,
            sample_rate: 44_100.0,
            channels_per_frame: channels,
        }
    }

    /// Interleaved float format.
    pub fn float(bits: u32, channels: u32, big_endian: bool) -> AudioFormat {
        let mut flags = FormatFlags::FLOAT | FormatFlags::PACKED;
        if big_endian {
            flags |= FormatFlags::BIG_ENDIAN;
        }
        AudioFormat {
            kind: FormatKind::Pcm,
            flags,
            bits_per_channel: bits,
            bytes_per_packet: (bits / 8) * channels,
            frames_per_packet: 1,
            bytes_per_frame: (bits / 8) * channels,
            sample_rate: 44_100.0,
            channels_per_frame: channels,
        }
    }

    /// Interleaved aligned integer format in `container`-byte containers.
    pub fn aligned_int(
        bits: u32,
        container: u32,
        channels: u32,
        high: bool,
        big_endian: bool,
    ) -> AudioFormat {
        let mut flags = FormatFlags::SIGNED_INTEGER;
        if high {
            flags |= FormatFlags::ALIGNED_HIGH;
        }
        if big_endian {
            flags |= FormatFlags::BIG_ENDIAN;
        }
        AudioFormat {
            kind: FormatKind::Pcm,
            flags,
            bits_per_channel: bits,
            bytes_per_packet: container * channels,
            frames_per_packet: 1,
            bytes_per_frame: container * channels,
            sample_rate: 44_100.0,
            channels_per_frame: channels,
        }
    }

    /// Converts one interleaved byte buffer and returns the per-channel
    /// doubles, asserting the output bookkeeping along the way.
    pub fn run(source: AudioFormat, bytes: &mut [u8], frames: usize) -> Vec<Vec<f64>> {
        let channels = source.channels_per_frame as usize;
        let converter = FloatConverter::new(source).expect("source format should be convertible");

        let mut channel_data: Vec<Vec<f64>> = vec![vec![0.0; frames.max(1)]; channels];
        {
            let mut out_views: Vec<BufferView<'_, f64>> = channel_data
                .iter_mut()
                .map(|data| BufferView::new(data, 1))
                .collect();
            let mut in_views = [BufferView::new(bytes, channels as u32)];

            let written = converter.convert(&mut in_views, &mut out_views, frames);
            assert_eq!(written, frames);
            for view in &out_views {
                assert_eq!(view.byte_len(), frames * 8);
                if frames > 0 {
                    assert_eq!(view.channels(), 1);
                }
            }
        }
        channel_data
    }
}
