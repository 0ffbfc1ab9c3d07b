//! Upstream producer contract.
//!
//! The player decodes audio into a ring whose format the output negotiates
//! with the driver, and the buffer-switch path pulls exactly one switch
//! worth of frames back out. The pull side is bounded and non-blocking:
//! whatever the ring cannot provide becomes silence.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Mutex;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};

use crate::buffer::BufferView;
use crate::format::{AudioFormat, ChannelLayout};

/// The upstream decoder a controller is configured for.
///
/// Only the stream description is consumed here; decoding itself happens
/// elsewhere.
pub trait Decoder: Send {
    /// Format of the decoded stream.
    fn format(&self) -> &AudioFormat;

    /// Channel layout of the decoded stream.
    fn channel_layout(&self) -> ChannelLayout;
}

/// A decoded stream description, for wiring tests and simple players.
#[derive(Debug, Clone)]
pub struct DecodedStream {
    format: AudioFormat,
    layout: ChannelLayout,
}

impl DecodedStream {
    /// Describes a stream with the given format and layout.
    pub fn new(format: AudioFormat, layout: ChannelLayout) -> Self {
        Self { format, layout }
    }
}

impl Decoder for DecodedStream {
    fn format(&self) -> &AudioFormat {
        &self.format
    }

    fn channel_layout(&self) -> ChannelLayout {
        self.layout
    }
}

/// The producer feeding the output.
///
/// `provide_audio` runs on the driver's audio thread and must never block:
/// implementations fill every requested frame, substituting silence for
/// anything the ring cannot deliver.
pub trait Player: Send + Sync {
    /// Format of the ring buffer, as negotiated by the output.
    fn ring_format(&self) -> AudioFormat;

    /// Ring capacity in frames.
    fn ring_capacity(&self) -> u32;

    /// Resizes the ring to hold at least `frames` frames.
    fn set_ring_capacity(&self, frames: u32);

    /// Fills `frames` frames into the per-channel output views.
    fn provide_audio(&self, outputs: &mut [BufferView<'_, u8>], frames: u32);
}

/// Ring-buffer backed [`Player`].
///
/// The decode side pushes whole interleaved frames with
/// [`RingBufferPlayer::write_frames`]; the audio thread pulls deinterleaved
/// channel buffers. Resizing or reformatting the ring discards whatever was
/// buffered, and a pull that collides with a rebuild degrades to silence
/// rather than waiting.
pub struct RingBufferPlayer {
    format: Mutex<AudioFormat>,
    capacity_frames: AtomicU32,
    producer: Mutex<Option<HeapProd<u8>>>,
    consumer: Mutex<Option<HeapCons<u8>>>,
}

impl RingBufferPlayer {
    /// Creates a player with no ring; the output sizes and formats it
    /// during configuration.
    pub fn new() -> Self {
        Self {
            format: Mutex::new(AudioFormat::default()),
            capacity_frames: AtomicU32::new(0),
            producer: Mutex::new(None),
            consumer: Mutex::new(None),
        }
    }

    /// Adopts the negotiated ring format, rebuilding the ring.
    pub fn set_ring_format(&self, format: AudioFormat) {
        *self.format.lock().unwrap() = format;
        self.rebuild();
    }

    /// Pushes interleaved frame bytes into the ring.
    ///
    /// Returns the number of bytes accepted; a full ring accepts fewer than
    /// offered.
    pub fn write_frames(&self, bytes: &[u8]) -> usize {
        let mut producer = self.producer.lock().unwrap();
        match producer.as_mut() {
            Some(producer) => producer.push_slice(bytes),
            None => 0,
        }
    }

    /// Frames currently buffered.
    pub fn buffered_frames(&self) -> u32 {
        let format = *self.format.lock().unwrap();
        let frame_bytes = frame_byte_count(&format);
        if frame_bytes == 0 {
            return 0;
        }
        let consumer = self.consumer.lock().unwrap();
        consumer
            .as_ref()
            .map_or(0, |consumer| (consumer.occupied_len() / frame_bytes) as u32)
    }

    fn rebuild(&self) {
        let format = *self.format.lock().unwrap();
        let frames = self.capacity_frames.load(Ordering::SeqCst) as usize;
        let bytes = frames * frame_byte_count(&format);

        let (producer, consumer) = HeapRb::<u8>::new(bytes.max(1)).split();
        *self.producer.lock().unwrap() = Some(producer);
        *self.consumer.lock().unwrap() = Some(consumer);
    }
}

impl Default for RingBufferPlayer {
    fn default() -> Self {
        Self::new()
    }
}

/// Bytes of one interleaved frame across all ring channels.
fn frame_byte_count(format: &AudioFormat) -> usize {
    format.bytes_per_frame as usize * format.channels_per_frame as usize
}

impl Player for RingBufferPlayer {
    fn ring_format(&self) -> AudioFormat {
        *self.format.lock().unwrap()
    }

    fn ring_capacity(&self) -> u32 {
        self.capacity_frames.load(Ordering::SeqCst)
    }

    fn set_ring_capacity(&self, frames: u32) {
        self.capacity_frames.store(frames, Ordering::SeqCst);
        self.rebuild();
    }

    fn provide_audio(&self, outputs: &mut [BufferView<'_, u8>], frames: u32) {
        let frames = frames as usize;

        // try_lock on the pull path: the only contention is a control-plane
        // rebuild, and waiting for one is not an option on this thread.
        let (bytes_per_frame, filled) = match (self.format.try_lock(), self.consumer.try_lock()) {
            (Ok(format), Ok(mut consumer)) => {
                let bytes_per_frame = format.bytes_per_frame as usize;
                let filled = match consumer.as_mut() {
                    Some(consumer) if bytes_per_frame > 0 && !outputs.is_empty() => {
                        let whole_frames =
                            consumer.occupied_len() / (bytes_per_frame * outputs.len());
                        let filled = frames.min(whole_frames);
                        for frame in 0..filled {
                            let start = frame * bytes_per_frame;
                            for view in outputs.iter_mut() {
                                let data = view.data_mut();
                                let end = (start + bytes_per_frame).min(data.len());
                                if start < end {
                                    consumer.pop_slice(&mut data[start..end]);
                                }
                            }
                        }
                        filled
                    }
                    _ => 0,
                };
                (bytes_per_frame, filled)
            }
            _ => (0, 0),
        };

        // Whatever was not delivered becomes silence.
        for view in outputs.iter_mut() {
            let valid = view.byte_len().min(view.data().len());
            let start = (filled * bytes_per_frame).min(valid);
            let data = view.data_mut();
            for byte in &mut data[start..valid] {
                *byte = 0;
            }
        }
    }
}

/// A [`Player`] that records every pull, for testing the output pipeline
/// without a decoder.
///
/// Each `provide_audio` call fills the outputs with a byte equal to the
/// call's ordinal, so tests can also check which switch wrote a buffer.
pub struct MockPlayer {
    format: Mutex<AudioFormat>,
    capacity_frames: AtomicU32,
    calls: Mutex<Vec<u32>>,
    fill: AtomicU8,
}

impl MockPlayer {
    /// Creates a mock player with a cleared ring format.
    pub fn new() -> Self {
        Self {
            format: Mutex::new(AudioFormat::default()),
            capacity_frames: AtomicU32::new(0),
            calls: Mutex::new(Vec::new()),
            fill: AtomicU8::new(0),
        }
    }

    /// Adopts the negotiated ring format.
    pub fn set_ring_format(&self, format: AudioFormat) {
        *self.format.lock().unwrap() = format;
    }

    /// Frame counts of every `provide_audio` call, in order.
    pub fn provide_calls(&self) -> Vec<u32> {
        self.calls.lock().unwrap().clone()
    }
}

impl Default for MockPlayer {
    fn default() -> Self {
        Self::new()
    }
}

impl Player for MockPlayer {
    fn ring_format(&self) -> AudioFormat {
        *self.format.lock().unwrap()
    }

    fn ring_capacity(&self) -> u32 {
        self.capacity_frames.load(Ordering::SeqCst)
    }

    fn set_ring_capacity(&self, frames: u32) {
        self.capacity_frames.store(frames, Ordering::SeqCst);
    }

    fn provide_audio(&self, outputs: &mut [BufferView<'_, u8>], frames: u32) {
        self.calls.lock().unwrap().push(frames);
        let fill = self.fill.fetch_add(1, Ordering::SeqCst).wrapping_add(1);
        for view in outputs.iter_mut() {
            let valid = view.byte_len().min(view.data().len());
            let data = view.data_mut();
            for byte in &mut data[..valid] {
                *byte = fill;
            }
        }
    }
}
