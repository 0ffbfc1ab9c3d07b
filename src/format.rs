//! Audio format descriptors.
//!
//! [`AudioFormat`] is a plain value type describing how samples are laid out
//! in memory: encoding, flag set, sample width, packet framing, rate, and
//! channel count. It is the shared vocabulary between the driver layer, the
//! converter, and the upstream player.

use bitflags::bitflags;

/// Encoding family of an [`AudioFormat`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormatKind {
    /// Linear PCM.
    #[default]
    Pcm,
    /// Direct Stream Digital, carried either as packed 1-bit samples
    /// (8 to a byte) or as 8-bit bytes.
    Dsd,
}

bitflags! {
    /// Layout flags of an [`AudioFormat`].
    ///
    /// For PCM exactly one of `SIGNED_INTEGER` / `FLOAT` is set. A sample
    /// narrower than its container is either `ALIGNED_HIGH` (value in the
    /// most-significant bits) or low-aligned (neither `PACKED` nor
    /// `ALIGNED_HIGH`).
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FormatFlags: u32 {
        /// Samples are signed integers.
        const SIGNED_INTEGER = 1 << 0;
        /// Samples are IEEE floats.
        const FLOAT = 1 << 1;
        /// No padding: `bits_per_channel == 8 * sample width`.
        const PACKED = 1 << 2;
        /// Each channel lives in its own buffer.
        const NON_INTERLEAVED = 1 << 3;
        /// Samples are big-endian.
        const BIG_ENDIAN = 1 << 4;
        /// The sample occupies the most-significant bits of its container.
        const ALIGNED_HIGH = 1 << 5;
    }
}

/// Description of a stream's sample layout.
///
/// Pure value semantics; [`AudioFormat::default`] clears every field and
/// construction sites fill in named fields.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct AudioFormat {
    /// Encoding family.
    pub kind: FormatKind,
    /// Layout flags.
    pub flags: FormatFlags,
    /// Significant bits per sample. 1 for packed DSD.
    pub bits_per_channel: u32,
    /// Bytes per packet, per channel for non-interleaved data.
    pub bytes_per_packet: u32,
    /// Frames carried by one packet (8 for packed DSD, 1 for PCM).
    pub frames_per_packet: u32,
    /// Bytes per frame. 0 is the sub-byte sentinel used by 1-bit DSD.
    pub bytes_per_frame: u32,
    /// Sample rate in Hz.
    pub sample_rate: f64,
    /// Channels per frame.
    pub channels_per_frame: u32,
}

impl AudioFormat {
    /// Returns `true` if the format is linear PCM.
    pub fn is_pcm(&self) -> bool {
        self.kind == FormatKind::Pcm
    }

    /// Returns `true` if the format is DSD.
    pub fn is_dsd(&self) -> bool {
        self.kind == FormatKind::Dsd
    }

    /// Converts a frame count into a byte count.
    ///
    /// Returns 0 for sub-byte formats (`bytes_per_frame == 0`).
    pub fn frame_count_to_byte_count(&self, frames: u32) -> u32 {
        frames * self.bytes_per_frame
    }

    /// Number of interleaved channels sharing one buffer: 1 when
    /// deinterleaved, otherwise the full channel count.
    pub fn interleaved_channel_count(&self) -> u32 {
        if self.flags.contains(FormatFlags::NON_INTERLEAVED) {
            1
        } else {
            self.channels_per_frame
        }
    }
}

/// Channel layout of a decoded stream.
///
/// The decoder's layout passes through configuration untouched and becomes
/// the ring buffer's layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelLayout {
    channels: u32,
}

impl ChannelLayout {
    /// Single channel layout.
    pub fn mono() -> Self {
        Self { channels: 1 }
    }

    /// Two channel layout.
    pub fn stereo() -> Self {
        Self { channels: 2 }
    }

    /// Layout with an arbitrary channel count.
    pub fn channels(channels: u32) -> Self {
        Self { channels }
    }

    /// Number of channels in the layout.
    pub fn channel_count(&self) -> u32 {
        self.channels
    }
}
