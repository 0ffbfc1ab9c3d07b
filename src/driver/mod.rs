//! Low-latency driver interface.
//!
//! The driver-loading ABI wrapper lives outside this crate; what the
//! controller consumes is the trait surface here: [`DriverLoader`] yields
//! driver instances, [`Driver`] exposes the negotiation and transport calls,
//! and the driver invokes the application back through [`DriverCallbacks`]
//! installed at buffer creation.
//!
//! Status translation: every fallible driver call returns
//! `Result<_, DriverCallError>` with the raw status code carried for
//! logging.

mod mock;

pub use mock::{MockDriverConfig, MockDriverHandle, MockLoader};

use std::sync::Arc;

use bitflags::bitflags;

use crate::buffer::BufferView;
use crate::format::{AudioFormat, FormatFlags, FormatKind};

/// Protocol version the controller initializes drivers with.
pub const PROTOCOL_VERSION: u32 = 2;

/// Message selectors the driver may pass to [`DriverCallbacks::message`].
///
/// Raw codes rather than an enum: drivers are free to send selectors this
/// crate has never heard of, and the contract for those is "answer 0".
pub mod selector {
    /// Asks whether a given selector (carried in `value`) is handled.
    pub const SELECTOR_SUPPORTED: i32 = 1;
    /// Asks for the supported protocol version.
    pub const ENGINE_VERSION: i32 = 2;
    /// The driver needs a teardown/rebuild cycle.
    pub const RESET_REQUEST: i32 = 3;
    /// The preferred buffer size changed.
    pub const BUFFER_SIZE_CHANGE: i32 = 4;
    /// The driver lost sync and asks for a resync.
    pub const RESYNC_REQUEST: i32 = 5;
    /// Input/output latencies changed.
    pub const LATENCIES_CHANGED: i32 = 6;
    /// Asks whether the time-info buffer switch form is supported.
    pub const SUPPORTS_TIME_INFO: i32 = 7;
    /// Asks whether time-code information is consumed.
    pub const SUPPORTS_TIME_CODE: i32 = 8;
    /// Asks whether input monitoring is supported.
    pub const SUPPORTS_INPUT_MONITOR: i32 = 10;
    /// The driver detected a processing overload.
    pub const OVERLOAD: i32 = 15;
}

/// A driver call that returned a non-OK status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("driver status {code}")]
pub struct DriverCallError {
    /// Raw status code from the driver.
    pub code: i32,
}

impl DriverCallError {
    /// Wraps a raw status code.
    pub fn new(code: i32) -> Self {
        Self { code }
    }
}

/// IO format negotiated with the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoFormat {
    /// Linear PCM transport.
    Pcm,
    /// Direct Stream Digital transport.
    Dsd,
}

/// Sample layouts a driver channel can report.
///
/// One variant per recognized wire code; the raw-code boundary is
/// [`SampleType::from_code`], which is where unknown codes surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    /// 16-bit signed, little-endian.
    Int16Lsb,
    /// 16-bit signed, big-endian.
    Int16Msb,
    /// Packed 24-bit signed, little-endian.
    Int24Lsb,
    /// Packed 24-bit signed, big-endian.
    Int24Msb,
    /// 32-bit signed, little-endian.
    Int32Lsb,
    /// 32-bit signed, big-endian.
    Int32Msb,
    /// IEEE float32, little-endian.
    Float32Lsb,
    /// IEEE float32, big-endian.
    Float32Msb,
    /// IEEE float64, little-endian.
    Float64Lsb,
    /// IEEE float64, big-endian.
    Float64Msb,
    /// 16 significant bits low-aligned in a 32-bit little-endian container.
    Int32Lsb16,
    /// 18 significant bits low-aligned in a 32-bit little-endian container.
    Int32Lsb18,
    /// 20 significant bits low-aligned in a 32-bit little-endian container.
    Int32Lsb20,
    /// 24 significant bits low-aligned in a 32-bit little-endian container.
    Int32Lsb24,
    /// 16 significant bits low-aligned in a 32-bit big-endian container.
    Int32Msb16,
    /// 18 significant bits low-aligned in a 32-bit big-endian container.
    Int32Msb18,
    /// 20 significant bits low-aligned in a 32-bit big-endian container.
    Int32Msb20,
    /// 24 significant bits low-aligned in a 32-bit big-endian container.
    Int32Msb24,
    /// DSD 1-bit, 8 samples per byte, LSB first.
    DsdInt8Lsb1,
    /// DSD 1-bit, 8 samples per byte, MSB first.
    DsdInt8Msb1,
    /// DSD in 8-bit bytes.
    DsdInt8Ner8,
}

impl SampleType {
    /// Resolves a raw wire code to a sample type.
    ///
    /// Returns `None` for codes this crate does not recognize; the caller
    /// decides how to degrade.
    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Int16Msb),
            1 => Some(Self::Int24Msb),
            2 => Some(Self::Int32Msb),
            3 => Some(Self::Float32Msb),
            4 => Some(Self::Float64Msb),
            8 => Some(Self::Int32Msb16),
            9 => Some(Self::Int32Msb18),
            10 => Some(Self::Int32Msb20),
            11 => Some(Self::Int32Msb24),
            16 => Some(Self::Int16Lsb),
            17 => Some(Self::Int24Lsb),
            18 => Some(Self::Int32Lsb),
            19 => Some(Self::Float32Lsb),
            20 => Some(Self::Float64Lsb),
            24 => Some(Self::Int32Lsb16),
            25 => Some(Self::Int32Lsb18),
            26 => Some(Self::Int32Lsb20),
            27 => Some(Self::Int32Lsb24),
            32 => Some(Self::DsdInt8Lsb1),
            33 => Some(Self::DsdInt8Msb1),
            40 => Some(Self::DsdInt8Ner8),
            _ => None,
        }
    }

    /// Returns `true` for the big-endian variants.
    pub fn is_big_endian(&self) -> bool {
        matches!(
            self,
            Self::Int16Msb
                | Self::Int24Msb
                | Self::Int32Msb
                | Self::Float32Msb
                | Self::Float64Msb
                | Self::Int32Msb16
                | Self::Int32Msb18
                | Self::Int32Msb20
                | Self::Int32Msb24
                | Self::DsdInt8Msb1
        )
    }
}

impl From<SampleType> for AudioFormat {
    /// Derives the memory layout a driver channel delivers.
    ///
    /// Driver channels are always deinterleaved, so every derived format
    /// carries `NON_INTERLEAVED`. Sample rate and channel count are not the
    /// channel's business and stay zero for the caller to fill in.
    fn from(sample_type: SampleType) -> Self {
        use SampleType::*;

        let mut format = match sample_type {
            Int16Lsb | Int16Msb => packed_int(16),
            Int24Lsb | Int24Msb => packed_int(24),
            Int32Lsb | Int32Msb => packed_int(32),
            Float32Lsb | Float32Msb => packed_float(32),
            Float64Lsb | Float64Msb => packed_float(64),
            Int32Lsb16 | Int32Msb16 => low_aligned_in_32(16),
            Int32Lsb18 | Int32Msb18 => low_aligned_in_32(18),
            Int32Lsb20 | Int32Msb20 => low_aligned_in_32(20),
            Int32Lsb24 | Int32Msb24 => low_aligned_in_32(24),
            DsdInt8Lsb1 | DsdInt8Msb1 => AudioFormat {
                kind: FormatKind::Dsd,
                flags: FormatFlags::NON_INTERLEAVED,
                bits_per_channel: 1,
                bytes_per_packet: 1,
                frames_per_packet: 8,
                // Sub-byte sentinel: one frame is one bit.
                bytes_per_frame: 0,
                ..Default::default()
            },
            DsdInt8Ner8 => AudioFormat {
                kind: FormatKind::Dsd,
                flags: FormatFlags::NON_INTERLEAVED,
                bits_per_channel: 8,
                bytes_per_packet: 1,
                frames_per_packet: 1,
                bytes_per_frame: 1,
                ..Default::default()
            },
        };

        if sample_type.is_big_endian() {
            format.flags |= FormatFlags::BIG_ENDIAN;
        }

        format
    }
}

fn packed_int(bits: u32) -> AudioFormat {
    let bytes = bits / 8;
    AudioFormat {
        kind: FormatKind::Pcm,
        flags: FormatFlags::SIGNED_INTEGER | FormatFlags::NON_INTERLEAVED | FormatFlags::PACKED,
        bits_per_channel: bits,
        bytes_per_packet: bytes,
        frames_per_packet: 1,
        bytes_per_frame: bytes,
        ..Default::default()
    }
}

fn packed_float(bits: u32) -> AudioFormat {
    let bytes = bits / 8;
    AudioFormat {
        kind: FormatKind::Pcm,
        flags: FormatFlags::FLOAT | FormatFlags::NON_INTERLEAVED | FormatFlags::PACKED,
        bits_per_channel: bits,
        bytes_per_packet: bytes,
        frames_per_packet: 1,
        bytes_per_frame: bytes,
        ..Default::default()
    }
}

fn low_aligned_in_32(bits: u32) -> AudioFormat {
    AudioFormat {
        kind: FormatKind::Pcm,
        flags: FormatFlags::SIGNED_INTEGER | FormatFlags::NON_INTERLEAVED,
        bits_per_channel: bits,
        bytes_per_packet: 4,
        frames_per_packet: 1,
        bytes_per_frame: 4,
        ..Default::default()
    }
}

bitflags! {
    /// Validity flags of a [`TimeInfo`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TimeInfoFlags: u32 {
        /// `system_time` holds a valid timestamp.
        const SYSTEM_TIME_VALID = 1 << 0;
        /// `sample_position` holds a valid position.
        const SAMPLE_POSITION_VALID = 1 << 1;
    }
}

/// Timing snapshot the driver hands to the time-info buffer switch.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeInfo {
    /// System time in nanoseconds.
    pub system_time: i64,
    /// Stream position in samples.
    pub sample_position: i64,
    /// Which fields are valid.
    pub flags: TimeInfoFlags,
}

/// Buffer size bounds negotiated with the driver, in frames.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferSizes {
    /// Smallest supported buffer.
    pub min: u32,
    /// Largest supported buffer.
    pub max: u32,
    /// The driver's preferred buffer, used for every switch.
    pub preferred: u32,
    /// Step between valid sizes.
    pub granularity: i32,
}

/// One entry of the buffer creation request table.
#[derive(Debug, Clone, Copy)]
pub struct BufferRequest {
    /// Driver channel index.
    pub channel: u32,
    /// `true` for input channels.
    pub is_input: bool,
}

/// Per-channel description reported by the driver after buffer creation.
#[derive(Debug, Clone)]
pub struct ChannelDescriptor {
    /// Driver channel index.
    pub channel: u32,
    /// `true` for input channels.
    pub is_input: bool,
    /// Wire layout of the channel's samples.
    pub sample_type: SampleType,
    /// Driver-reported channel name.
    pub name: String,
}

/// An entry of the enumerated driver list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverDescriptor {
    /// Display name.
    pub name: String,
    /// Loader-scoped identifier.
    pub id: u32,
}

/// Driver re-entries permitted from inside a buffer switch.
///
/// The switch path may only touch these two calls; everything else on
/// [`Driver`] belongs to the control plane.
pub trait RtServices {
    /// Current stream position as `(samples, system_time_ns)`.
    fn sample_position(&mut self) -> Result<(i64, i64), DriverCallError>;

    /// Tells the driver the output buffers are fully written.
    fn output_ready(&mut self) -> Result<(), DriverCallError>;
}

/// Callbacks the application installs into the driver at buffer creation.
///
/// `outputs` are views over the driver-owned halves of the double buffer
/// selected by `index`; borrows last for the duration of one call and no
/// longer. The switch callbacks run on the driver's audio thread and must
/// return before the next switch.
pub trait DriverCallbacks: Send + Sync {
    /// Legacy buffer switch without timing information.
    fn buffer_switch(
        &self,
        rt: &mut dyn RtServices,
        outputs: &mut [BufferView<'_, u8>],
        index: usize,
        direct: bool,
    );

    /// Buffer switch carrying a timing snapshot. Preferred by drivers that
    /// answer the time-info capability query.
    fn buffer_switch_time_info(
        &self,
        rt: &mut dyn RtServices,
        time: &TimeInfo,
        outputs: &mut [BufferView<'_, u8>],
        index: usize,
        direct: bool,
    );

    /// The driver changed its sample rate.
    fn sample_rate_did_change(&self, rate: f64);

    /// Out-of-band driver message. Returns the selector-specific answer,
    /// 0 for anything unhandled.
    fn message(&self, selector: i32, value: i32) -> i32;
}

/// The transport and negotiation surface of a low-latency driver.
pub trait Driver: Send {
    /// Initializes the driver for the given protocol version.
    fn init(&mut self, protocol_version: u32) -> Result<(), DriverCallError>;

    /// Probes/acknowledges output-ready support. `Ok` means the driver
    /// wants an explicit ready notification after each switch.
    fn output_ready(&mut self) -> Result<(), DriverCallError>;

    /// Available channels as `(inputs, outputs)`.
    fn channel_counts(&mut self) -> Result<(u32, u32), DriverCallError>;

    /// Supported buffer size bounds.
    fn buffer_sizes(&mut self) -> Result<BufferSizes, DriverCallError>;

    /// Creates double buffers for the requested channels and installs the
    /// callbacks.
    fn create_buffers(
        &mut self,
        requests: &[BufferRequest],
        frames: u32,
        callbacks: Arc<dyn DriverCallbacks>,
    ) -> Result<(), DriverCallError>;

    /// Releases the double buffers and uninstalls the callbacks.
    fn dispose_buffers(&mut self) -> Result<(), DriverCallError>;

    /// Describes one channel. Only valid after [`Driver::create_buffers`].
    fn channel_descriptor(
        &mut self,
        channel: u32,
        is_input: bool,
    ) -> Result<ChannelDescriptor, DriverCallError>;

    /// Input and output latencies in frames. Only valid after
    /// [`Driver::create_buffers`].
    fn latencies(&mut self) -> Result<(u32, u32), DriverCallError>;

    /// Current stream position as `(samples, system_time_ns)`.
    fn sample_position(&mut self) -> Result<(i64, i64), DriverCallError>;

    /// Current sample rate.
    fn sample_rate(&mut self) -> Result<f64, DriverCallError>;

    /// Sets the sample rate.
    fn set_sample_rate(&mut self, rate: f64) -> Result<(), DriverCallError>;

    /// Asks whether a sample rate is supported without switching to it.
    fn can_sample_rate(&mut self, rate: f64) -> Result<(), DriverCallError>;

    /// Starts the transport; buffer switches begin.
    fn start(&mut self) -> Result<(), DriverCallError>;

    /// Stops the transport.
    fn stop(&mut self) -> Result<(), DriverCallError>;

    /// Current IO format (PCM or DSD).
    fn io_format(&mut self) -> Result<IoFormat, DriverCallError>;

    /// Switches the IO format.
    fn set_io_format(&mut self, format: IoFormat) -> Result<(), DriverCallError>;
}

/// Enumerates and instantiates drivers.
///
/// Implemented outside this crate by the platform's library wrapper;
/// [`MockLoader`] provides a hardware-free stand-in.
pub trait DriverLoader: Send {
    /// Lists the installed drivers.
    fn enumerate(&self) -> Vec<DriverDescriptor>;

    /// Loads and instantiates the given driver.
    fn instantiate(&self, descriptor: &DriverDescriptor)
        -> Result<Box<dyn Driver>, DriverCallError>;
}
