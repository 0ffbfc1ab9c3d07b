//! # asio-output
//!
//! Audio output backend bridging a player to an ASIO-style low-latency
//! driver, together with the sample-format engine that normalizes arbitrary
//! PCM layouts into deinterleaved 64-bit floats.
//!
//! `asio-output` owns the driver lifecycle (enumeration, negotiation of
//! buffer size, sample rate, and channel layout, and the transport
//! controls) and services the driver's pull-style buffer switches from a
//! producer-owned ring buffer without ever blocking the audio thread.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use asio_output::{AsioOutput, DecodedStream, OutputConfig, RingBufferPlayer};
//!
//! let player = Arc::new(RingBufferPlayer::new());
//! let output = AsioOutput::new(platform_loader(), player.clone(), OutputConfig::default());
//!
//! output.open()?;
//! let (ring_format, _layout) = output.configure_for_decoder(&decoder)?;
//! player.set_ring_format(ring_format);
//!
//! output.start()?;
//! // ... the decoder keeps player.write_frames() fed ...
//! output.request_stop();
//! ```
//!
//! ## Architecture
//!
//! The crate maintains a strict thread boundary:
//!
//! - **Driver thread**: the buffer-switch callback rebinds the driver's
//!   double-buffer views, pulls exactly one switch of frames from the
//!   player, and never allocates, blocks, or logs
//! - **Control events**: a lock-free byte ring carries reset/overload/stop
//!   codes out of the callback
//! - **Housekeeping**: a low-frequency tokio task drains the ring and runs
//!   the heavyweight reactions (stop, driver teardown and rebuild)
//!
//! Conversion into the canonical deinterleaved-double representation is
//! handled by [`FloatConverter`], a dispatch over encoding, width,
//! endianness, alignment, and signedness resolved once per source format.

// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]

mod buffer;
mod callback;
mod config;
mod convert;
mod error;
pub mod events;
mod format;
mod output;
mod player;

pub mod driver;

pub use buffer::{channel_count, BufferView};
pub use config::{DriverSelection, OutputConfig};
pub use convert::FloatConverter;
pub use error::{ConvertError, OutputError};
pub use events::ControlEvent;
pub use format::{AudioFormat, ChannelLayout, FormatFlags, FormatKind};
pub use output::{AsioOutput, OutputState};
pub use player::{DecodedStream, Decoder, MockPlayer, Player, RingBufferPlayer};
