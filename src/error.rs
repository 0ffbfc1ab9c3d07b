//! Error types for asio-output.
//!
//! Errors are split into two categories:
//! - **Control-plane errors** ([`OutputError`]): lifecycle operations that
//!   failed and left the controller state unchanged
//! - **Converter errors** ([`ConvertError`]): source formats rejected when a
//!   [`FloatConverter`](crate::FloatConverter) is constructed
//!
//! Nothing here ever crosses the real-time boundary. The buffer-switch path
//! does not fail observably: underruns become silence and a full event ring
//! drops the record.

use crate::output::OutputState;

/// Errors returned by the control-plane operations of
/// [`AsioOutput`](crate::AsioOutput).
///
/// A failed operation logs its reason and leaves the controller in the state
/// it was in before the call.
#[derive(Debug, thiserror::Error)]
pub enum OutputError {
    /// No driver could be enumerated, loaded, instantiated, or initialized.
    #[error("no usable driver available: {reason}")]
    DriverUnavailable {
        /// What went wrong while bringing the driver up.
        reason: String,
    },

    /// The decoder format is neither PCM nor DSD, or the driver rejected the
    /// requested IO format.
    #[error("format not supported by driver: {detail}")]
    FormatUnsupported {
        /// Description of the rejected format.
        detail: String,
    },

    /// The driver rejected the requested sample rate.
    #[error("sample rate {rate}Hz not supported by driver")]
    RateUnsupported {
        /// The rate that was rejected.
        rate: f64,
    },

    /// Allocation of channel tables or buffer bookkeeping failed.
    #[error("resource allocation failed: {what}")]
    ResourceExhausted {
        /// What could not be allocated.
        what: String,
    },

    /// A specific driver call returned a non-OK status.
    #[error("driver call {call} failed with status {code}")]
    DriverCall {
        /// Name of the driver entry point that failed.
        call: &'static str,
        /// Raw status code, carried for logging.
        code: i32,
    },

    /// An operation was invoked in a state where its precondition does not
    /// hold (e.g. `start` while already running).
    #[error("{operation} not permitted in state {state:?}")]
    StateViolation {
        /// The operation that was rejected.
        operation: &'static str,
        /// The controller state at the time of the call.
        state: OutputState,
    },
}

impl OutputError {
    /// Creates a `DriverUnavailable` error with the given reason.
    pub fn driver_unavailable(reason: impl Into<String>) -> Self {
        Self::DriverUnavailable {
            reason: reason.into(),
        }
    }

    /// Creates a `FormatUnsupported` error with the given detail.
    pub fn format_unsupported(detail: impl Into<String>) -> Self {
        Self::FormatUnsupported {
            detail: detail.into(),
        }
    }
}

/// Source formats rejected by [`FloatConverter::new`](crate::FloatConverter::new).
///
/// Preconditions are checked once at construction, never per call: a
/// successfully constructed converter accepts every frame count without a
/// fallible path on the audio thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConvertError {
    /// The source is not linear PCM, or declares a float width other than
    /// 32 or 64 bits.
    #[error("only PCM source formats are supported")]
    UnsupportedEncoding,

    /// A packed integer source with a width outside 8, 16, 24, or 32 bits.
    #[error("unsupported packed sample width: {0} bits")]
    UnsupportedPackedWidth(u32),

    /// An unpacked source whose container or declared width has no kernel.
    #[error("unsupported aligned sample size: {bits} bits in {container} byte container")]
    UnsupportedAlignedWidth {
        /// Container size in bytes.
        container: u32,
        /// Declared significant bits.
        bits: u32,
    },
}
